//! Blocking client for the external attestation network: the Web2Json
//! verifier (request preparation) and the data-availability layer (proof
//! retrieval). Submitting the prepared request on-chain happens elsewhere;
//! callers hand in the voting round the request landed in.

use std::{thread::sleep, time::Duration};

use rand::Rng;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    attestation::{AttestationProof, CommitteeConfig, VerificationError},
    feed::{self, ArticlesFeedRequest, FeedError},
    ledger::ArticleBatch,
};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("verifier rejected request with status {status}")]
    RequestRejected { status: String },
    #[error("no proof for round {round} after {attempts} attempts")]
    ProofUnavailable { round: u64, attempts: u32 },
    #[error(transparent)]
    Verification(#[from] VerificationError),
    #[error(transparent)]
    Feed(#[from] FeedError),
}

/// The pipeline capability the ledger's owner relies on: produce a batch
/// whose authenticity has already been checked.
pub trait AttestationSource {
    fn fetch_verified_batch(&self) -> Result<ArticleBatch, ClientError>;
}

#[derive(Clone, Debug)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
    pub jitter: Duration,
    pub request_timeout: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            max_attempts: 30,
            jitter: Duration::from_secs(1),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl PollPolicy {
    /// Exponential backoff capped at 16x the base interval, plus jitter.
    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.interval.saturating_mul(1u32 << attempt.min(4));
        let jitter_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        let extra = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        base.saturating_add(Duration::from_millis(extra))
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PreparedRequest {
    pub status: String,
    #[serde(default)]
    pub abi_encoded_request: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PrepareBody<'a> {
    attestation_type: String,
    source_id: String,
    request_body: &'a ArticlesFeedRequest,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProofQuery<'a> {
    voting_round_id: u64,
    request_bytes: &'a str,
}

/// Pending rounds come back without `response_hex`.
#[derive(Deserialize)]
struct ProofPoll {
    #[serde(default)]
    response_hex: Option<String>,
    #[serde(flatten)]
    rest: serde_json::Map<String, serde_json::Value>,
}

#[derive(Clone)]
pub struct FdcClient {
    http: Client,
    verifier_url: String,
    api_key: String,
    da_layer_url: String,
    poll: PollPolicy,
}

impl FdcClient {
    pub fn new(
        verifier_url: impl Into<String>,
        api_key: impl Into<String>,
        da_layer_url: impl Into<String>,
        poll: PollPolicy,
    ) -> Result<Self, ClientError> {
        let http = Client::builder().timeout(poll.request_timeout).build()?;
        Ok(Self {
            http,
            verifier_url: verifier_url.into(),
            api_key: api_key.into(),
            da_layer_url: da_layer_url.into(),
            poll,
        })
    }

    pub fn prepare_request(
        &self,
        request: &ArticlesFeedRequest,
    ) -> Result<PreparedRequest, ClientError> {
        let url = format!("{}Web2Json/prepareRequest", self.verifier_url);
        let body = PrepareBody {
            attestation_type: feed::encode_attestation_id(feed::ATTESTATION_TYPE),
            source_id: feed::encode_attestation_id(feed::SOURCE_ID),
            request_body: request,
        };
        info!(%url, source = %request.url, "preparing attestation request");
        let prepared: PreparedRequest = self
            .http
            .post(&url)
            .header("X-API-KEY", &self.api_key)
            .json(&body)
            .send()?
            .error_for_status()?
            .json()?;
        if prepared.status != "VALID" {
            return Err(ClientError::RequestRejected {
                status: prepared.status,
            });
        }
        Ok(prepared)
    }

    /// Poll the DA layer until the round's proof for `abi_encoded_request`
    /// is available.
    pub fn retrieve_proof(
        &self,
        abi_encoded_request: &str,
        voting_round_id: u64,
    ) -> Result<AttestationProof, ClientError> {
        let url = format!(
            "{}api/v1/fdc/proof-by-request-round-raw",
            self.da_layer_url
        );
        let query = ProofQuery {
            voting_round_id,
            request_bytes: abi_encoded_request,
        };
        for attempt in 0..self.poll.max_attempts {
            match self.poll_once(&url, &query) {
                Ok(Some(proof)) => {
                    info!(round = voting_round_id, attempt, "proof retrieved");
                    return Ok(proof);
                }
                Ok(None) => debug!(round = voting_round_id, attempt, "proof not ready"),
                Err(e) if e.is_timeout() || e.is_connect() || e.is_status() => {
                    warn!(round = voting_round_id, attempt, error = %e, "proof poll failed")
                }
                Err(e) => return Err(e.into()),
            }
            if attempt + 1 < self.poll.max_attempts {
                sleep(self.poll.backoff(attempt));
            }
        }
        Err(ClientError::ProofUnavailable {
            round: voting_round_id,
            attempts: self.poll.max_attempts,
        })
    }

    fn poll_once(
        &self,
        url: &str,
        query: &ProofQuery<'_>,
    ) -> Result<Option<AttestationProof>, reqwest::Error> {
        let poll: ProofPoll = self
            .http
            .post(url)
            .json(query)
            .send()?
            .error_for_status()?
            .json()?;
        let Some(response_hex) = poll.response_hex else {
            return Ok(None);
        };
        let mut fields = poll.rest;
        fields.insert(
            "response_hex".into(),
            serde_json::Value::String(response_hex),
        );
        fields
            .entry("voting_round_id")
            .or_insert_with(|| query.voting_round_id.into());
        match serde_json::from_value(serde_json::Value::Object(fields)) {
            Ok(proof) => Ok(Some(proof)),
            Err(e) => {
                warn!(error = %e, "proof response incomplete, retrying");
                Ok(None)
            }
        }
    }
}

/// Prepare, retrieve, verify and decode one round's article feed.
pub struct VerifiedFeed<'a> {
    pub client: &'a FdcClient,
    pub committee: &'a CommitteeConfig,
    pub request: ArticlesFeedRequest,
    pub voting_round_id: u64,
}

impl AttestationSource for VerifiedFeed<'_> {
    fn fetch_verified_batch(&self) -> Result<ArticleBatch, ClientError> {
        let prepared = self.client.prepare_request(&self.request)?;
        let proof = self
            .client
            .retrieve_proof(&prepared.abi_encoded_request, self.voting_round_id)?;
        let response = proof.verify(self.committee)?;
        Ok(feed::decode_response(&response)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use ed25519_dalek::SigningKey;
    use httpmock::{Method::POST, MockServer};
    use rand::rngs::OsRng;
    use serde_json::json;

    use crate::attestation::build_round;

    fn fast_poll(max_attempts: u32) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(1),
            max_attempts,
            jitter: Duration::ZERO,
            request_timeout: Duration::from_secs(5),
        }
    }

    fn client(server: &MockServer, max_attempts: u32) -> FdcClient {
        FdcClient::new(
            server.url("/verifier/"),
            "test-key",
            server.url("/da/"),
            fast_poll(max_attempts),
        )
        .unwrap()
    }

    const RESPONSE: &str = r#"{"title1":"Rates held","date1":"06/14/2025","contentLength1":5120,"publicationCount1":41,"overallBias1":"center","totalArticles":9}"#;

    #[test]
    fn prepare_request_sends_key_and_padded_ids() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/verifier/Web2Json/prepareRequest")
                .header("X-API-KEY", "test-key")
                .body_contains(&feed::encode_attestation_id("Web2Json"))
                .body_contains("postProcessJq");
            then.status(200)
                .json_body(json!({"status": "VALID", "abiEncodedRequest": "0xabcd"}));
        });
        let prepared = client(&server, 1)
            .prepare_request(&ArticlesFeedRequest::top_articles("https://api.test/top"))
            .unwrap();
        mock.assert();
        assert_eq!(prepared.abi_encoded_request, "0xabcd");
    }

    #[test]
    fn invalid_prepare_status_is_an_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/verifier/Web2Json/prepareRequest");
            then.status(200).json_body(json!({"status": "INVALID"}));
        });
        let err = client(&server, 1)
            .prepare_request(&ArticlesFeedRequest::top_articles("https://api.test/top"))
            .unwrap_err();
        assert!(matches!(err, ClientError::RequestRejected { status } if status == "INVALID"));
    }

    #[test]
    fn pending_proof_exhausts_attempts() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/da/api/v1/fdc/proof-by-request-round-raw");
            then.status(200).json_body(json!({"status": "pending"}));
        });
        let err = client(&server, 3).retrieve_proof("0xabcd", 77).unwrap_err();
        assert!(matches!(
            err,
            ClientError::ProofUnavailable {
                round: 77,
                attempts: 3
            }
        ));
        mock.assert_hits(3);
    }

    #[test]
    fn verified_feed_runs_the_whole_pipeline() {
        let sk = SigningKey::generate(&mut OsRng);
        let committee = CommitteeConfig::new(vec![("m0".into(), sk.verifying_key())], 1);
        let proof = build_round(77, &[RESPONSE.as_bytes().to_vec()], "m0", &sk).remove(0);

        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/verifier/Web2Json/prepareRequest");
            then.status(200)
                .json_body(json!({"status": "VALID", "abiEncodedRequest": "0xabcd"}));
        });
        let da = server.mock(|when, then| {
            when.method(POST)
                .path("/da/api/v1/fdc/proof-by-request-round-raw")
                .json_body(json!({"votingRoundId": 77, "requestBytes": "0xabcd"}));
            then.status(200).json_body(serde_json::to_value(&proof).unwrap());
        });

        let client = client(&server, 2);
        let source = VerifiedFeed {
            client: &client,
            committee: &committee,
            request: ArticlesFeedRequest::top_articles("https://api.test/top"),
            voting_round_id: 77,
        };
        let batch = source.fetch_verified_batch().unwrap();
        da.assert();
        assert_eq!(batch.articles.len(), 1);
        assert_eq!(batch.articles[0].title, "Rates held");
        assert_eq!(batch.total_articles, 9);
    }

    #[test]
    fn forged_proof_is_not_accepted() {
        let sk = SigningKey::generate(&mut OsRng);
        let committee = CommitteeConfig::new(vec![("m0".into(), sk.verifying_key())], 1);
        let mut proof = build_round(5, &[RESPONSE.as_bytes().to_vec()], "m0", &sk).remove(0);
        proof.response_hex = hex::encode(r#"{"title1":"Forged","totalArticles":1}"#);

        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/verifier/Web2Json/prepareRequest");
            then.status(200)
                .json_body(json!({"status": "VALID", "abiEncodedRequest": "0x01"}));
        });
        server.mock(|when, then| {
            when.method(POST).path("/da/api/v1/fdc/proof-by-request-round-raw");
            then.status(200).json_body(serde_json::to_value(&proof).unwrap());
        });

        let client = client(&server, 1);
        let source = VerifiedFeed {
            client: &client,
            committee: &committee,
            request: ArticlesFeedRequest::top_articles("https://api.test/top"),
            voting_round_id: 5,
        };
        assert!(matches!(
            source.fetch_verified_batch(),
            Err(ClientError::Verification(VerificationError::InclusionMismatch))
        ));
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = PollPolicy {
            interval: Duration::from_millis(10),
            max_attempts: 10,
            jitter: Duration::ZERO,
            request_timeout: Duration::from_secs(1),
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(10));
        assert_eq!(policy.backoff(2), Duration::from_millis(40));
        assert_eq!(policy.backoff(9), Duration::from_millis(160));
    }

    #[test]
    fn backoff_saturates_on_huge_settings() {
        let policy = PollPolicy {
            interval: Duration::from_millis(u64::MAX),
            max_attempts: 1,
            jitter: Duration::from_millis(u64::MAX),
            request_timeout: Duration::from_secs(1),
        };
        assert_eq!(policy.backoff(4), Duration::MAX);

        let jittered = PollPolicy {
            interval: Duration::from_millis(10),
            jitter: Duration::from_millis(5),
            ..policy
        };
        let delay = jittered.backoff(0);
        assert!(delay >= Duration::from_millis(10) && delay <= Duration::from_millis(15));
    }
}
