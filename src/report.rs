use chrono::{DateTime, Utc};

use proof_of_trust::ledger::{Article, ArticleLedger, ArticleSentimentView, Timestamp};

pub fn iso(ts: Timestamp) -> String {
    i64::try_from(ts)
        .ok()
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| format!("@{ts}"))
}

pub fn format_time_remaining(seconds: u64) -> String {
    if seconds == 0 {
        return "Voting ended".into();
    }
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if hours > 0 {
        format!("{hours}h {minutes}m remaining")
    } else if minutes > 0 {
        format!("{minutes}m {secs}s remaining")
    } else {
        format!("{secs}s remaining")
    }
}

pub fn print_article(ledger: &ArticleLedger, article: &Article, now: Timestamp) {
    let tally = ledger.sentiment_tally(article.id);
    println!("ARTICLE #{} (day {})", article.id, article.day_bucket);
    println!("- Title: {}", article.title);
    println!("- Date: {}", article.date);
    println!("- Content Length: {} characters", article.content_length);
    println!("- Publication Count: {}", article.publication_count);
    println!("- Overall Bias: {}", article.overall_bias);
    println!("- Published: {}", iso(article.published_timestamp));
    println!(
        "- Voting: {}",
        format_time_remaining(article.voting_time_remaining(now))
    );
    println!(
        "- Sentiment: +{} / -{}",
        tally.positive_count, tally.negative_count
    );
}

pub fn print_articles(ledger: &ArticleLedger, articles: &[&Article], now: Timestamp) {
    if articles.is_empty() {
        println!("(no articles)");
        return;
    }
    for article in articles {
        print_article(ledger, article, now);
        println!();
    }
}

pub fn print_sentiment(view: &ArticleSentimentView) {
    println!("- Positive: {}", view.positive_count);
    println!("- Negative: {}", view.negative_count);
    println!("- Voting Active: {}", if view.voting_active { "yes" } else { "no" });
    if view.user_has_voted {
        let verdict = if view.user_sentiment { "positive" } else { "negative" };
        println!("- Your Vote: {verdict}");
        if !view.user_comment.is_empty() {
            println!("- Your Comment: {}", view.user_comment);
        }
    } else {
        println!("- Your Vote: (none)");
    }
}

pub fn print_status(ledger: &ArticleLedger, now: Timestamp) {
    println!("=== Proof of Trust ledger ===");
    println!("Owner: {}", ledger.owner());
    println!("Freshness Threshold: 24 hours (daily updates only)");
    let top = ledger.top_articles();
    for (idx, article) in top.articles.iter().enumerate() {
        println!("- Article {} Title: {}", idx + 1, article.title);
    }
    let last = ledger.last_update_timestamp();
    if last == 0 {
        println!("- Last Update: never");
    } else {
        println!("- Last Update: {}", iso(last));
    }
    println!("- Update Count: {}", ledger.update_count());
    println!("- Total Articles Available: {}", top.total_articles);
    println!("- Stored Articles: {}", ledger.article_count());
    println!("- Current Date: {}", ledger.current_date(now));
    println!("- Available Dates: {}", ledger.available_dates().len());
    println!("- Is Data Fresh: {}", ledger.is_data_fresh(now));
    let wait = ledger.time_until_next_update(now);
    if wait > 0 {
        println!(
            "- Next Update Available In: {}h {}m",
            wait / 3600,
            (wait % 3600) / 60
        );
    } else {
        println!("- Next Update Available: Now");
    }
}
