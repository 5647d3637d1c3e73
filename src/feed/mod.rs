//! The Web2Json request that asks the verifier for today's top articles, and
//! decoding of the flat response it attests to.

use serde::{Deserialize, Serialize};

use crate::ledger::{ArticleBatch, ArticlePayload, MAX_ARTICLES_PER_UPDATE};

pub const ATTESTATION_TYPE: &str = "Web2Json";
pub const SOURCE_ID: &str = "PublicWeb2";

/// Flattens the first three API entries into `title1..overallBias3` plus the
/// number of entries the endpoint returned.
pub const TOP_ARTICLES_JQ: &str = concat!(
    ". as $all | {",
    "title1: $all[0].mainArticleTitle, date1: $all[0].mainArticlePublishedDate, ",
    "contentLength1: ($all[0].mainArticleContent | length), ",
    "publicationCount1: ($all[0].coveringPublications | length), ",
    "overallBias1: ($all[0].overallBiasDistribution | keys[0]), ",
    "title2: $all[1].mainArticleTitle, date2: $all[1].mainArticlePublishedDate, ",
    "contentLength2: ($all[1].mainArticleContent | length), ",
    "publicationCount2: ($all[1].coveringPublications | length), ",
    "overallBias2: ($all[1].overallBiasDistribution | keys[0]), ",
    "title3: $all[2].mainArticleTitle, date3: $all[2].mainArticlePublishedDate, ",
    "contentLength3: ($all[2].mainArticleContent | length), ",
    "publicationCount3: ($all[2].coveringPublications | length), ",
    "overallBias3: ($all[2].overallBiasDistribution | keys[0]), ",
    "totalArticles: ($all | length)}"
);

const SLOT_FIELDS: [(&str, &str); 5] = [
    ("title", "string"),
    ("date", "string"),
    ("contentLength", "uint256"),
    ("publicationCount", "uint256"),
    ("overallBias", "string"),
];

/// ABI tuple signature matching [`TOP_ARTICLES_JQ`].
pub fn top_articles_abi_signature() -> String {
    let mut components = Vec::new();
    for slot in 1..=MAX_ARTICLES_PER_UPDATE {
        for (name, ty) in SLOT_FIELDS {
            components.push(serde_json::json!({
                "internalType": ty,
                "name": format!("{name}{slot}"),
                "type": ty,
            }));
        }
    }
    components.push(serde_json::json!({
        "internalType": "uint256",
        "name": "totalArticles",
        "type": "uint256",
    }));
    serde_json::json!({
        "components": components,
        "name": "articleData",
        "type": "tuple",
    })
    .to_string()
}

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("attested response is not valid article JSON: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("attested response carries no articles")]
    Empty,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ArticlesFeedRequest {
    pub url: String,
    pub http_method: String,
    pub headers: String,
    pub query_params: String,
    pub body: String,
    pub post_process_jq: String,
    pub abi_signature: String,
}

impl ArticlesFeedRequest {
    pub fn top_articles(api_url: &str) -> Self {
        Self {
            url: api_url.to_string(),
            http_method: "GET".into(),
            headers: "{}".into(),
            query_params: "{}".into(),
            body: "{}".into(),
            post_process_jq: TOP_ARTICLES_JQ.into(),
            abi_signature: top_articles_abi_signature(),
        }
    }
}

/// `name` as a 0x-prefixed, zero-padded 32-byte UTF-8 hex word.
pub fn encode_attestation_id(name: &str) -> String {
    let mut word = [0u8; 32];
    let bytes = name.as_bytes();
    let len = bytes.len().min(32);
    word[..len].copy_from_slice(&bytes[..len]);
    format!("0x{}", hex::encode(word))
}

/// Response shape produced by [`TOP_ARTICLES_JQ`]. Missing API entries come
/// back as nulls, hence the defaults everywhere.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ArticleDataTransport {
    pub title1: Option<String>,
    pub date1: Option<String>,
    pub content_length1: Option<u64>,
    pub publication_count1: Option<u64>,
    pub overall_bias1: Option<String>,
    pub title2: Option<String>,
    pub date2: Option<String>,
    pub content_length2: Option<u64>,
    pub publication_count2: Option<u64>,
    pub overall_bias2: Option<String>,
    pub title3: Option<String>,
    pub date3: Option<String>,
    pub content_length3: Option<u64>,
    pub publication_count3: Option<u64>,
    pub overall_bias3: Option<String>,
    pub total_articles: Option<u64>,
}

type Slot<'a> = (
    &'a Option<String>,
    &'a Option<String>,
    Option<u64>,
    Option<u64>,
    &'a Option<String>,
);

impl ArticleDataTransport {
    fn slots(&self) -> [Slot<'_>; MAX_ARTICLES_PER_UPDATE] {
        [
            (
                &self.title1,
                &self.date1,
                self.content_length1,
                self.publication_count1,
                &self.overall_bias1,
            ),
            (
                &self.title2,
                &self.date2,
                self.content_length2,
                self.publication_count2,
                &self.overall_bias2,
            ),
            (
                &self.title3,
                &self.date3,
                self.content_length3,
                self.publication_count3,
                &self.overall_bias3,
            ),
        ]
    }

    /// Convert to a ledger batch, skipping slots without a title.
    pub fn into_batch(self) -> Result<ArticleBatch, FeedError> {
        let articles: Vec<ArticlePayload> = self
            .slots()
            .into_iter()
            .filter_map(|(title, date, content_length, publication_count, bias)| {
                let title = title.as_deref().map(str::trim).filter(|t| !t.is_empty())?;
                Some(ArticlePayload {
                    title: title.to_string(),
                    date: date.clone().unwrap_or_default(),
                    content_length: content_length.unwrap_or_default(),
                    publication_count: publication_count.unwrap_or_default(),
                    overall_bias: bias.clone().unwrap_or_default(),
                })
            })
            .collect();
        if articles.is_empty() {
            return Err(FeedError::Empty);
        }
        Ok(ArticleBatch {
            total_articles: self.total_articles.unwrap_or(articles.len() as u64),
            articles,
        })
    }
}

/// Decode raw attested response bytes into a ledger batch.
pub fn decode_response(response: &[u8]) -> Result<ArticleBatch, FeedError> {
    let transport: ArticleDataTransport = serde_json::from_slice(response)?;
    transport.into_batch()
}
