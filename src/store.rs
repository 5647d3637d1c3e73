use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use tracing::debug;

use crate::ledger::{ArticleLedger, LedgerSnapshot, SnapshotError};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("ledger state io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("ledger state at {path} is not a valid snapshot: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("ledger state at {path} failed its integrity check (stored {stored}, computed {computed})")]
    RootMismatch {
        path: PathBuf,
        stored: String,
        computed: String,
    },
    #[error("ledger state at {path} is inconsistent: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: SnapshotError,
    },
    #[error("no ledger state at {0}, run `pot init` first")]
    Missing(PathBuf),
    #[error("ledger state already exists at {0}")]
    AlreadyExists(PathBuf),
}

/// JSON snapshot file holding the ledger between invocations.
#[derive(Debug, Clone)]
pub struct LedgerStore {
    path: PathBuf,
}

impl LedgerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn create(&self, ledger: &ArticleLedger) -> Result<(), StoreError> {
        if self.exists() {
            return Err(StoreError::AlreadyExists(self.path.clone()));
        }
        self.save(ledger)
    }

    pub fn load(&self) -> Result<ArticleLedger, StoreError> {
        if !self.exists() {
            return Err(StoreError::Missing(self.path.clone()));
        }
        let bytes = fs::read(&self.path).map_err(|e| self.io_err(e))?;
        let snapshot: LedgerSnapshot =
            serde_json::from_slice(&bytes).map_err(|source| StoreError::Decode {
                path: self.path.clone(),
                source,
            })?;
        let stored = snapshot.state_root;
        let ledger =
            ArticleLedger::from_snapshot(snapshot).map_err(|source| StoreError::Corrupt {
                path: self.path.clone(),
                source,
            })?;
        let computed = ledger.state_root();
        if computed != stored {
            return Err(StoreError::RootMismatch {
                path: self.path.clone(),
                stored: hex::encode(stored),
                computed: hex::encode(computed),
            });
        }
        debug!(path = %self.path.display(), root = %hex::encode(computed), "ledger loaded");
        Ok(ledger)
    }

    /// Write via a sibling temp file and rename, so readers never observe a
    /// half-written snapshot.
    pub fn save(&self, ledger: &ArticleLedger) -> Result<(), StoreError> {
        let snapshot = ledger.snapshot();
        let json = serde_json::to_vec_pretty(&snapshot).map_err(|source| StoreError::Decode {
            path: self.path.clone(),
            source,
        })?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let mut file = fs::File::create(&tmp).map_err(|e| self.io_err(e))?;
        file.write_all(&json).map_err(|e| self.io_err(e))?;
        file.sync_all().map_err(|e| self.io_err(e))?;
        fs::rename(&tmp, &self.path).map_err(|e| self.io_err(e))?;
        debug!(path = %self.path.display(), root = %hex::encode(snapshot.state_root), "ledger saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::tempdir;

    use crate::{
        address::Address,
        ledger::{ArticleBatch, ArticlePayload},
    };

    const T0: u64 = 1_750_000_000;

    fn owner() -> Address {
        Address::from_bytes([0x11; 20])
    }

    fn ledger() -> ArticleLedger {
        let mut ledger = ArticleLedger::new(owner());
        ledger
            .update(
                &owner(),
                ArticleBatch {
                    articles: vec![ArticlePayload {
                        title: "Rates held".into(),
                        ..Default::default()
                    }],
                    total_articles: 1,
                },
                T0,
            )
            .unwrap();
        ledger
    }

    #[test]
    fn save_then_load_preserves_state() {
        let dir = tempdir().unwrap();
        let store = LedgerStore::new(dir.path().join("nested/state.json"));
        let ledger = ledger();
        store.create(&ledger).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded.state_root(), ledger.state_root());
        assert_eq!(loaded.top_articles(), ledger.top_articles());
        assert!(matches!(
            store.create(&ledger),
            Err(StoreError::AlreadyExists(_))
        ));
    }

    #[test]
    fn missing_state_is_reported() {
        let dir = tempdir().unwrap();
        let store = LedgerStore::new(dir.path().join("state.json"));
        assert!(matches!(store.load(), Err(StoreError::Missing(_))));
    }

    #[test]
    fn edited_file_fails_integrity_check() {
        let dir = tempdir().unwrap();
        let store = LedgerStore::new(dir.path().join("state.json"));
        store.save(&ledger()).unwrap();

        let text = fs::read_to_string(store.path()).unwrap();
        fs::write(store.path(), text.replace("Rates held", "Rates cut")).unwrap();
        assert!(matches!(store.load(), Err(StoreError::RootMismatch { .. })));

        fs::write(store.path(), b"{").unwrap();
        assert!(matches!(store.load(), Err(StoreError::Decode { .. })));
    }

    #[test]
    fn edited_counters_and_buckets_are_refused() {
        let dir = tempdir().unwrap();
        let store = LedgerStore::new(dir.path().join("state.json"));
        let mut ledger = ledger();
        ledger
            .submit_sentiment(&Address::from_bytes([0x22; 20]), 1, true, "", T0 + 5)
            .unwrap();
        store.save(&ledger).unwrap();
        let text = fs::read_to_string(store.path()).unwrap();
        assert!(text.contains("\"next_article_id\": 2"));

        // rewinding the id counter would hand out id 1 again
        fs::write(
            store.path(),
            text.replace("\"next_article_id\": 2", "\"next_article_id\": 1"),
        )
        .unwrap();
        assert!(matches!(
            store.load(),
            Err(StoreError::Corrupt {
                source: SnapshotError::IdReuse { .. },
                ..
            })
        ));

        let day = format!("\"day_bucket\": {}", T0 / 86_400);
        assert!(text.contains(&day));
        fs::write(store.path(), text.replace(&day, "\"day_bucket\": 7")).unwrap();
        assert!(matches!(
            store.load(),
            Err(StoreError::Corrupt {
                source: SnapshotError::DayBucketMismatch { stored: 7, .. },
                ..
            })
        ));

        // a larger counter is consistent but not what was saved
        fs::write(
            store.path(),
            text.replace("\"next_article_id\": 2", "\"next_article_id\": 9"),
        )
        .unwrap();
        assert!(matches!(store.load(), Err(StoreError::RootMismatch { .. })));

        fs::write(
            store.path(),
            text.replace("\"total_articles\": 1", "\"total_articles\": 50"),
        )
        .unwrap();
        assert!(matches!(store.load(), Err(StoreError::RootMismatch { .. })));

        fs::write(store.path(), &text).unwrap();
        let mut reloaded = store.load().unwrap();
        let next = ArticleBatch {
            articles: vec![ArticlePayload {
                title: "Next".into(),
                ..Default::default()
            }],
            total_articles: 1,
        };
        let ids = reloaded.update(&owner(), next, T0 + 86_400).unwrap();
        assert_eq!(ids, vec![2]);
        assert_eq!(reloaded.article_by_id(1).unwrap().title, "Rates held");
    }
}
