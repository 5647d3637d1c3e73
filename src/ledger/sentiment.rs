use serde::{Deserialize, Serialize};
use tracing::info;

use super::{ArticleId, ArticleLedger, LedgerError, LedgerEvent, Timestamp, MAX_COMMENT_CHARS};
use crate::address::Address;

/// A single voter's final verdict on an article.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SentimentRecord {
    pub has_voted: bool,
    pub is_positive: bool,
    pub comment: String,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SentimentTally {
    pub positive_count: u64,
    pub negative_count: u64,
}

impl SentimentTally {
    pub(super) fn record(&mut self, is_positive: bool) {
        if is_positive {
            self.positive_count += 1;
        } else {
            self.negative_count += 1;
        }
    }
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct ArticleSentimentView {
    pub positive_count: u64,
    pub negative_count: u64,
    pub user_has_voted: bool,
    pub user_sentiment: bool,
    pub user_comment: String,
    pub voting_active: bool,
}

impl ArticleLedger {
    /// Cast `caller`'s one and only vote on `article_id`.
    pub fn submit_sentiment(
        &mut self,
        caller: &Address,
        article_id: ArticleId,
        is_positive: bool,
        comment: impl Into<String>,
        now: Timestamp,
    ) -> Result<(), LedgerError> {
        let article = self.article_by_id(article_id)?;
        if !article.is_voting_active(now) {
            return Err(LedgerError::VotingClosed {
                id: article_id,
                closed_at: article.voting_deadline(),
            });
        }
        if self.has_voted(article_id, caller) {
            return Err(LedgerError::AlreadyVoted {
                id: article_id,
                voter: *caller,
            });
        }
        let comment = comment.into();
        let len = comment.chars().count();
        if len > MAX_COMMENT_CHARS {
            return Err(LedgerError::CommentTooLong { len });
        }

        self.votes.insert(
            (article_id, *caller),
            SentimentRecord {
                has_voted: true,
                is_positive,
                comment: comment.clone(),
            },
        );
        self.tallies
            .entry(article_id)
            .or_default()
            .record(is_positive);
        self.events.push(LedgerEvent::SentimentSubmitted {
            article_id,
            voter: *caller,
            is_positive,
            comment,
            timestamp: now,
        });
        info!(article_id, voter = %caller, is_positive, "sentiment submitted");
        Ok(())
    }

    pub fn has_voted(&self, article_id: ArticleId, voter: &Address) -> bool {
        self.votes.contains_key(&(article_id, *voter))
    }

    pub fn sentiment_tally(&self, article_id: ArticleId) -> SentimentTally {
        self.tallies.get(&article_id).copied().unwrap_or_default()
    }

    pub fn article_sentiment(
        &self,
        article_id: ArticleId,
        user: &Address,
        now: Timestamp,
    ) -> Result<ArticleSentimentView, LedgerError> {
        let article = self.article_by_id(article_id)?;
        let tally = self.sentiment_tally(article_id);
        let record = self
            .votes
            .get(&(article_id, *user))
            .cloned()
            .unwrap_or_default();
        Ok(ArticleSentimentView {
            positive_count: tally.positive_count,
            negative_count: tally.negative_count,
            user_has_voted: record.has_voted,
            user_sentiment: record.is_positive,
            user_comment: record.comment,
            voting_active: article.is_voting_active(now),
        })
    }
}
