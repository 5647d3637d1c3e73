use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use config::{Config, ConfigError, Environment, File};
use ed25519_dalek::VerifyingKey;
use serde::Deserialize;

use crate::{attestation::CommitteeConfig, client::PollPolicy};

pub const DEFAULT_CONFIG_FILE: &str = "pot.toml";

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("invalid settings: {0}")]
    Config(#[from] ConfigError),
    #[error("committee member {member}: {reason}")]
    InvalidMemberKey { member: String, reason: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollSettings {
    pub interval_ms: u64,
    pub max_attempts: u32,
    pub jitter_ms: u64,
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MemberSettings {
    pub id: String,
    /// Ed25519 public key, 64 hex characters.
    pub public_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommitteeSettings {
    pub quorum: usize,
    #[serde(default)]
    pub members: Vec<MemberSettings>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub state_path: PathBuf,
    pub log_level: String,
    pub verifier_url: String,
    pub verifier_api_key: String,
    pub da_layer_url: String,
    pub articles_api_url: String,
    pub poll: PollSettings,
    pub committee: CommitteeSettings,
}

impl Settings {
    /// Defaults, then the TOML file (optional unless given explicitly), then
    /// `POT__*` environment variables.
    pub fn load(file: Option<&Path>) -> Result<Self, SettingsError> {
        let file_source = match file {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };
        let settings = Config::builder()
            .set_default("state_path", "pot-state.json")?
            .set_default("log_level", "info")?
            .set_default(
                "verifier_url",
                "https://fdc-verifiers-testnet.flare.network/verifier/web2/",
            )?
            .set_default("verifier_api_key", "")?
            .set_default("da_layer_url", "https://ctn2-data-availability.flare.network/")?
            .set_default("articles_api_url", "http://localhost:5001/api/articles/top")?
            .set_default("poll.interval_ms", 10_000)?
            .set_default("poll.max_attempts", 30)?
            .set_default("poll.jitter_ms", 1_000)?
            .set_default("poll.request_timeout_ms", 30_000)?
            .set_default("committee.quorum", 1)?
            .add_source(file_source)
            .add_source(Environment::with_prefix("POT").separator("__"))
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(self.poll.interval_ms),
            max_attempts: self.poll.max_attempts.max(1),
            jitter: Duration::from_millis(self.poll.jitter_ms),
            request_timeout: Duration::from_millis(self.poll.request_timeout_ms),
        }
    }

    pub fn committee(&self) -> Result<CommitteeConfig, SettingsError> {
        let mut members = Vec::with_capacity(self.committee.members.len());
        for member in &self.committee.members {
            let invalid = |reason: String| SettingsError::InvalidMemberKey {
                member: member.id.clone(),
                reason,
            };
            let raw = hex::decode(member.public_key.trim().trim_start_matches("0x"))
                .map_err(|e| invalid(format!("bad hex key: {e}")))?;
            let bytes: [u8; 32] = raw
                .as_slice()
                .try_into()
                .map_err(|_| invalid(format!("key must be 32 bytes, got {}", raw.len())))?;
            let key = VerifyingKey::from_bytes(&bytes)
                .map_err(|e| invalid(format!("invalid key: {e}")))?;
            members.push((member.id.clone(), key));
        }
        Ok(CommitteeConfig::new(members, self.committee.quorum))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;
    use std::io::Write;

    #[test]
    fn file_overrides_defaults() {
        let key = SigningKey::generate(&mut OsRng).verifying_key();
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
state_path = "/var/lib/pot/state.json"

[poll]
max_attempts = 5

[committee]
quorum = 1

[[committee.members]]
id = "m0"
public_key = "{}"
"#,
            hex::encode(key.as_bytes())
        )
        .unwrap();

        let settings = Settings::load(Some(file.path())).unwrap();
        assert_eq!(settings.state_path, PathBuf::from("/var/lib/pot/state.json"));
        assert_eq!(settings.poll.max_attempts, 5);
        assert_eq!(settings.poll.interval_ms, 10_000);
        assert_eq!(settings.log_level, "info");

        let committee = settings.committee().unwrap();
        assert_eq!(committee.member_ids(), vec!["m0".to_string()]);
        assert_eq!(committee.members["m0"], key);
    }

    #[test]
    fn bad_member_key_is_reported() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[committee]\nquorum = 1\n[[committee.members]]\nid = \"m0\"\npublic_key = \"abcd\""
        )
        .unwrap();
        let settings = Settings::load(Some(file.path())).unwrap();
        match settings.committee().unwrap_err() {
            SettingsError::InvalidMemberKey { member, reason } => {
                assert_eq!(member, "m0");
                assert!(reason.contains("32 bytes"));
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        assert!(matches!(
            Settings::load(Some(&missing)),
            Err(SettingsError::Config(_))
        ));
    }
}
