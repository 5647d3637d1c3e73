use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::address::Address;

mod sentiment;
mod snapshot;

pub use sentiment::{ArticleSentimentView, SentimentRecord, SentimentTally};
pub use snapshot::{LedgerSnapshot, SnapshotError, VoteEntry};

pub type ArticleId = u64;
pub type DayBucket = u64;
pub type Timestamp = u64;

pub const SECONDS_PER_DAY: u64 = 86_400;
pub const FRESHNESS_THRESHOLD: u64 = 86_400;
pub const VOTING_WINDOW: u64 = 86_400;
pub const MAX_ARTICLES_PER_UPDATE: usize = 3;
pub const MAX_COMMENT_CHARS: usize = 500;

pub fn day_bucket(timestamp: Timestamp) -> DayBucket {
    timestamp / SECONDS_PER_DAY
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("only owner can call this function (caller {caller})")]
    Unauthorized { caller: Address },
    #[error("data is still fresh, next update allowed in {remaining}s")]
    NotFresh { remaining: u64 },
    #[error("invalid article ID {id}")]
    InvalidArticleId { id: ArticleId },
    #[error("voting on article {id} closed at {closed_at}")]
    VotingClosed { id: ArticleId, closed_at: Timestamp },
    #[error("{voter} already voted on article {id}")]
    AlreadyVoted { id: ArticleId, voter: Address },
    #[error("new owner cannot be zero address")]
    InvalidOwner,
    #[error("no article at index {index} for day {day}")]
    NotFound { day: DayBucket, index: usize },
    #[error("invalid index {index}, expected 0..3")]
    InvalidIndex { index: usize },
    #[error("batch must hold between 1 and 3 articles, got {size}")]
    InvalidBatchSize { size: usize },
    #[error("comment is {len} characters, limit is 500")]
    CommentTooLong { len: usize },
}

/// Article fields as delivered by the attested feed.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ArticlePayload {
    pub title: String,
    pub date: String,
    pub content_length: u64,
    pub publication_count: u64,
    pub overall_bias: String,
}

/// A verified update: up to three articles plus the feed's total count.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ArticleBatch {
    pub articles: Vec<ArticlePayload>,
    pub total_articles: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Article {
    pub id: ArticleId,
    pub title: String,
    pub date: String,
    pub content_length: u64,
    pub publication_count: u64,
    pub overall_bias: String,
    pub published_timestamp: Timestamp,
    pub day_bucket: DayBucket,
}

impl Article {
    fn from_payload(id: ArticleId, payload: ArticlePayload, published: Timestamp) -> Self {
        Self {
            id,
            title: payload.title,
            date: payload.date,
            content_length: payload.content_length,
            publication_count: payload.publication_count,
            overall_bias: payload.overall_bias,
            published_timestamp: published,
            day_bucket: day_bucket(published),
        }
    }

    /// First instant at which votes are rejected.
    pub fn voting_deadline(&self) -> Timestamp {
        self.published_timestamp.saturating_add(VOTING_WINDOW)
    }

    pub fn is_voting_active(&self, now: Timestamp) -> bool {
        now < self.voting_deadline()
    }

    pub fn voting_time_remaining(&self, now: Timestamp) -> u64 {
        self.voting_deadline().saturating_sub(now)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerMeta {
    pub owner: Address,
    pub last_update_timestamp: Timestamp,
    pub update_count: u64,
    pub available_dates: BTreeSet<DayBucket>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    ArticlesUpdated {
        article_count: u64,
        timestamp: Timestamp,
        total_articles: u64,
        update_number: u64,
    },
    SentimentSubmitted {
        article_id: ArticleId,
        voter: Address,
        is_positive: bool,
        comment: String,
        timestamp: Timestamp,
    },
    OwnershipTransferred {
        previous_owner: Address,
        new_owner: Address,
    },
}

/// Articles stored by the most recent update.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct TopArticles {
    pub articles: Vec<Article>,
    pub total_articles: u64,
}

/// Daily article ledger with per-article sentiment voting.
///
/// Every mutating call validates all of its preconditions before touching
/// state, so a returned error always leaves the ledger unchanged.
#[derive(Clone, Debug)]
pub struct ArticleLedger {
    meta: LedgerMeta,
    next_article_id: ArticleId,
    total_articles: u64,
    articles: BTreeMap<ArticleId, Article>,
    daily: BTreeMap<DayBucket, Vec<ArticleId>>,
    latest: Vec<ArticleId>,
    tallies: BTreeMap<ArticleId, SentimentTally>,
    votes: BTreeMap<(ArticleId, Address), SentimentRecord>,
    events: Vec<LedgerEvent>,
}

impl ArticleLedger {
    pub fn new(owner: Address) -> Self {
        Self {
            meta: LedgerMeta {
                owner,
                last_update_timestamp: 0,
                update_count: 0,
                available_dates: BTreeSet::new(),
            },
            next_article_id: 1,
            total_articles: 0,
            articles: BTreeMap::new(),
            daily: BTreeMap::new(),
            latest: Vec::new(),
            tallies: BTreeMap::new(),
            votes: BTreeMap::new(),
            events: Vec::new(),
        }
    }

    fn require_owner(&self, caller: &Address) -> Result<(), LedgerError> {
        if caller != &self.meta.owner {
            warn!(%caller, "rejected owner-only call");
            return Err(LedgerError::Unauthorized { caller: *caller });
        }
        Ok(())
    }

    fn never_updated(&self) -> bool {
        self.meta.last_update_timestamp == 0
    }

    /// Store a verified batch as today's articles.
    ///
    /// Returns the ids assigned to the new articles, in batch order.
    pub fn update(
        &mut self,
        caller: &Address,
        batch: ArticleBatch,
        now: Timestamp,
    ) -> Result<Vec<ArticleId>, LedgerError> {
        self.require_owner(caller)?;
        if self.is_data_fresh(now) {
            return Err(LedgerError::NotFresh {
                remaining: self.time_until_next_update(now),
            });
        }
        let size = batch.articles.len();
        if size == 0 || size > MAX_ARTICLES_PER_UPDATE {
            return Err(LedgerError::InvalidBatchSize { size });
        }

        let bucket = day_bucket(now);
        let mut ids = Vec::with_capacity(size);
        for payload in batch.articles {
            let id = self.next_article_id;
            self.next_article_id += 1;
            self.articles
                .insert(id, Article::from_payload(id, payload, now));
            ids.push(id);
        }
        self.daily.entry(bucket).or_default().extend(&ids);
        self.latest = ids.clone();
        self.total_articles = batch.total_articles;
        self.meta.available_dates.insert(bucket);
        self.meta.last_update_timestamp = now;
        self.meta.update_count += 1;

        self.events.push(LedgerEvent::ArticlesUpdated {
            article_count: ids.len() as u64,
            timestamp: now,
            total_articles: self.total_articles,
            update_number: self.meta.update_count,
        });
        info!(
            update = self.meta.update_count,
            articles = ids.len(),
            day = bucket,
            "articles updated"
        );
        Ok(ids)
    }

    pub fn transfer_ownership(
        &mut self,
        caller: &Address,
        new_owner: Address,
    ) -> Result<(), LedgerError> {
        self.require_owner(caller)?;
        if new_owner.is_zero() {
            return Err(LedgerError::InvalidOwner);
        }
        let previous_owner = std::mem::replace(&mut self.meta.owner, new_owner);
        self.events.push(LedgerEvent::OwnershipTransferred {
            previous_owner,
            new_owner,
        });
        info!(%previous_owner, %new_owner, "ownership transferred");
        Ok(())
    }

    pub fn article_by_id(&self, id: ArticleId) -> Result<&Article, LedgerError> {
        self.articles
            .get(&id)
            .ok_or(LedgerError::InvalidArticleId { id })
    }

    pub fn article_by_index(&self, day: DayBucket, index: usize) -> Result<&Article, LedgerError> {
        if index >= MAX_ARTICLES_PER_UPDATE {
            return Err(LedgerError::InvalidIndex { index });
        }
        self.daily
            .get(&day)
            .and_then(|ids| ids.get(index))
            .and_then(|id| self.articles.get(id))
            .ok_or(LedgerError::NotFound { day, index })
    }

    /// Articles stored on `day`, in submission order; empty when none exist.
    pub fn articles_by_date(&self, day: DayBucket) -> Vec<&Article> {
        self.daily
            .get(&day)
            .map(|ids| ids.iter().filter_map(|id| self.articles.get(id)).collect())
            .unwrap_or_default()
    }

    pub fn todays_articles(&self, now: Timestamp) -> Vec<&Article> {
        self.articles_by_date(day_bucket(now))
    }

    pub fn top_articles(&self) -> TopArticles {
        TopArticles {
            articles: self
                .latest
                .iter()
                .filter_map(|id| self.articles.get(id).cloned())
                .collect(),
            total_articles: self.total_articles,
        }
    }

    pub fn available_dates(&self) -> Vec<DayBucket> {
        self.meta.available_dates.iter().copied().collect()
    }

    pub fn current_date(&self, now: Timestamp) -> DayBucket {
        day_bucket(now)
    }

    /// True while the last update is younger than the freshness threshold.
    /// A ledger that was never updated is never fresh.
    pub fn is_data_fresh(&self, now: Timestamp) -> bool {
        if self.never_updated() {
            return false;
        }
        now.saturating_sub(self.meta.last_update_timestamp) < FRESHNESS_THRESHOLD
    }

    pub fn time_until_next_update(&self, now: Timestamp) -> u64 {
        if self.never_updated() {
            return 0;
        }
        let elapsed = now.saturating_sub(self.meta.last_update_timestamp);
        FRESHNESS_THRESHOLD.saturating_sub(elapsed)
    }

    pub fn owner(&self) -> &Address {
        &self.meta.owner
    }

    pub fn update_count(&self) -> u64 {
        self.meta.update_count
    }

    pub fn last_update_timestamp(&self) -> Timestamp {
        self.meta.last_update_timestamp
    }

    pub fn total_articles(&self) -> u64 {
        self.total_articles
    }

    pub fn article_count(&self) -> usize {
        self.articles.len()
    }

    pub fn meta(&self) -> &LedgerMeta {
        &self.meta
    }

    pub fn events(&self) -> &[LedgerEvent] {
        &self.events
    }
}
