use serde::{Deserialize, Serialize};

use super::{
    day_bucket, Article, ArticleId, ArticleLedger, DayBucket, LedgerEvent, LedgerMeta,
    SentimentRecord,
};
use crate::{
    address::Address,
    merkle::{self, Hash},
};

/// A snapshot whose contents contradict each other.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("next article id {next_article_id} would reuse stored id {max_id}")]
    IdReuse {
        next_article_id: ArticleId,
        max_id: ArticleId,
    },
    #[error("article {id} stored under day {stored}, published on day {expected}")]
    DayBucketMismatch {
        id: ArticleId,
        stored: DayBucket,
        expected: DayBucket,
    },
    #[error("article {id} appears twice")]
    DuplicateArticle { id: ArticleId },
    #[error("vote recorded for unknown article {id}")]
    UnknownArticle { id: ArticleId },
    #[error("vote by {voter} on article {id} is not marked as cast")]
    EmptyVote { id: ArticleId, voter: Address },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct VoteEntry {
    pub article_id: ArticleId,
    pub voter: Address,
    #[serde(flatten)]
    pub record: SentimentRecord,
}

/// Serializable image of the ledger. Indexes (daily buckets, the latest
/// batch, tallies) are rebuilt from `articles` and `votes` on restore.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub meta: LedgerMeta,
    pub next_article_id: ArticleId,
    pub total_articles: u64,
    pub articles: Vec<Article>,
    pub votes: Vec<VoteEntry>,
    pub events: Vec<LedgerEvent>,
    #[serde(with = "crate::merkle::serde_hash")]
    pub state_root: Hash,
}

impl ArticleLedger {
    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            meta: self.meta.clone(),
            next_article_id: self.next_article_id,
            total_articles: self.total_articles,
            articles: self.articles.values().cloned().collect(),
            votes: self
                .votes
                .iter()
                .map(|((article_id, voter), record)| VoteEntry {
                    article_id: *article_id,
                    voter: *voter,
                    record: record.clone(),
                })
                .collect(),
            events: self.events.clone(),
            state_root: self.state_root(),
        }
    }

    /// Rebuild a ledger from a snapshot, checking that its indexes are
    /// consistent. The stored `state_root` is not checked here; compare it
    /// against [`ArticleLedger::state_root`].
    pub fn from_snapshot(snapshot: LedgerSnapshot) -> Result<Self, SnapshotError> {
        let max_id = snapshot.articles.iter().map(|a| a.id).max().unwrap_or(0);
        if snapshot.next_article_id <= max_id {
            return Err(SnapshotError::IdReuse {
                next_article_id: snapshot.next_article_id,
                max_id,
            });
        }

        let mut ledger = ArticleLedger::new(snapshot.meta.owner);
        let last_update = snapshot.meta.last_update_timestamp;
        ledger.meta = snapshot.meta;
        ledger.next_article_id = snapshot.next_article_id;
        ledger.total_articles = snapshot.total_articles;
        ledger.events = snapshot.events;

        for article in snapshot.articles {
            let expected = day_bucket(article.published_timestamp);
            if article.day_bucket != expected {
                return Err(SnapshotError::DayBucketMismatch {
                    id: article.id,
                    stored: article.day_bucket,
                    expected,
                });
            }
            if ledger.articles.contains_key(&article.id) {
                return Err(SnapshotError::DuplicateArticle { id: article.id });
            }
            ledger
                .daily
                .entry(article.day_bucket)
                .or_default()
                .push(article.id);
            if last_update != 0 && article.published_timestamp == last_update {
                ledger.latest.push(article.id);
            }
            ledger.articles.insert(article.id, article);
        }
        for entry in snapshot.votes {
            if !ledger.articles.contains_key(&entry.article_id) {
                return Err(SnapshotError::UnknownArticle {
                    id: entry.article_id,
                });
            }
            if !entry.record.has_voted {
                return Err(SnapshotError::EmptyVote {
                    id: entry.article_id,
                    voter: entry.voter,
                });
            }
            ledger
                .tallies
                .entry(entry.article_id)
                .or_default()
                .record(entry.record.is_positive);
            ledger
                .votes
                .insert((entry.article_id, entry.voter), entry.record);
        }
        Ok(ledger)
    }

    /// SHA-256 Merkle root over meta, counters, articles, tallies, vote
    /// records and the event log.
    pub fn state_root(&self) -> Hash {
        compute_state_root(self)
    }
}

fn put_str(buf: &mut Vec<u8>, value: &str) {
    buf.extend_from_slice(&(value.len() as u64).to_le_bytes());
    buf.extend_from_slice(value.as_bytes());
}

fn event_bytes(event: &LedgerEvent) -> Vec<u8> {
    let mut buf = Vec::new();
    match event {
        LedgerEvent::ArticlesUpdated {
            article_count,
            timestamp,
            total_articles,
            update_number,
        } => {
            buf.push(0);
            for value in [article_count, timestamp, total_articles, update_number] {
                buf.extend_from_slice(&value.to_le_bytes());
            }
        }
        LedgerEvent::SentimentSubmitted {
            article_id,
            voter,
            is_positive,
            comment,
            timestamp,
        } => {
            buf.push(1);
            buf.extend_from_slice(&article_id.to_le_bytes());
            buf.extend_from_slice(voter.as_bytes());
            buf.push(*is_positive as u8);
            put_str(&mut buf, comment);
            buf.extend_from_slice(&timestamp.to_le_bytes());
        }
        LedgerEvent::OwnershipTransferred {
            previous_owner,
            new_owner,
        } => {
            buf.push(2);
            buf.extend_from_slice(previous_owner.as_bytes());
            buf.extend_from_slice(new_owner.as_bytes());
        }
    }
    buf
}

fn compute_state_root(ledger: &ArticleLedger) -> Hash {
    let meta = &ledger.meta;
    let mut leaves: Vec<Hash> = Vec::new();

    let mut buf = Vec::new();
    buf.extend_from_slice(meta.owner.as_bytes());
    buf.extend_from_slice(&meta.last_update_timestamp.to_le_bytes());
    buf.extend_from_slice(&meta.update_count.to_le_bytes());
    buf.extend_from_slice(&ledger.next_article_id.to_le_bytes());
    buf.extend_from_slice(&ledger.total_articles.to_le_bytes());
    buf.extend_from_slice(&(meta.available_dates.len() as u64).to_le_bytes());
    for day in &meta.available_dates {
        buf.extend_from_slice(&day.to_le_bytes());
    }
    leaves.push(merkle::leaf_hash(b"meta", &buf));

    for (id, article) in &ledger.articles {
        let mut buf = Vec::new();
        buf.extend_from_slice(&id.to_le_bytes());
        for field in [&article.title, &article.date, &article.overall_bias] {
            put_str(&mut buf, field);
        }
        buf.extend_from_slice(&article.content_length.to_le_bytes());
        buf.extend_from_slice(&article.publication_count.to_le_bytes());
        buf.extend_from_slice(&article.published_timestamp.to_le_bytes());
        buf.extend_from_slice(&article.day_bucket.to_le_bytes());
        leaves.push(merkle::leaf_hash(b"article", &buf));
    }
    for (id, tally) in &ledger.tallies {
        let mut buf = Vec::new();
        buf.extend_from_slice(&id.to_le_bytes());
        buf.extend_from_slice(&tally.positive_count.to_le_bytes());
        buf.extend_from_slice(&tally.negative_count.to_le_bytes());
        leaves.push(merkle::leaf_hash(b"tally", &buf));
    }
    for ((id, voter), record) in &ledger.votes {
        let mut buf = Vec::new();
        buf.extend_from_slice(&id.to_le_bytes());
        buf.extend_from_slice(voter.as_bytes());
        buf.push(record.has_voted as u8);
        buf.push(record.is_positive as u8);
        put_str(&mut buf, &record.comment);
        leaves.push(merkle::leaf_hash(b"vote", &buf));
    }
    for (seq, event) in ledger.events.iter().enumerate() {
        let mut buf = (seq as u64).to_le_bytes().to_vec();
        buf.extend_from_slice(&event_bytes(event));
        leaves.push(merkle::leaf_hash(b"event", &buf));
    }
    merkle::root(&leaves)
}
