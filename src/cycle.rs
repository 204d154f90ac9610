//! One polling cycle: fetch every source, match keywords, notify, commit.

use futures::stream::{self, StreamExt};
use std::sync::Arc;

use crate::config::{Config, FailurePolicy};
use crate::feed::{fetch, parse_feed, FeedError};
use crate::matcher::{KeywordMatcher, Match};
use crate::notify::{self, DeliveryResult, DeliverySummary, Mailer};
use crate::storage::{Database, DatabaseError};

/// Everything a cycle needs, built once at startup.
pub struct CycleContext {
    pub config: Arc<Config>,
    pub db: Database,
    pub client: reqwest::Client,
    pub mailer: Arc<dyn Mailer>,
    matcher: KeywordMatcher,
}

impl CycleContext {
    pub fn new(
        config: Arc<Config>,
        db: Database,
        client: reqwest::Client,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        let matcher = KeywordMatcher::new(&config.keywords);
        Self {
            config,
            db,
            client,
            mailer,
            matcher,
        }
    }

    pub fn matcher(&self) -> &KeywordMatcher {
        &self.matcher
    }
}

/// What one feed contributed to the cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedSummary {
    pub entries: usize,
    pub skipped: usize,
    pub matches: usize,
}

#[derive(Debug)]
pub struct FeedReport {
    pub url: String,
    pub outcome: Result<FeedSummary, FeedError>,
}

/// Result of a single cycle.
#[derive(Debug, Default)]
pub struct CycleReport {
    pub feeds: Vec<FeedReport>,
    pub deliveries: Vec<DeliveryResult>,
    /// Records written to the dedup store.
    pub committed: usize,
    /// Set when the batch commit failed; the sends will repeat next cycle.
    pub commit_error: Option<DatabaseError>,
    /// True when notification was skipped because a feed failed under
    /// [`FailurePolicy::AbortCycle`].
    pub aborted: bool,
}

impl CycleReport {
    pub fn failed_feeds(&self) -> usize {
        self.feeds.iter().filter(|f| f.outcome.is_err()).count()
    }

    pub fn total_matches(&self) -> usize {
        self.feeds
            .iter()
            .filter_map(|f| f.outcome.as_ref().ok())
            .map(|s| s.matches)
            .sum()
    }

    pub fn delivery_summary(&self) -> DeliverySummary {
        DeliverySummary::from_results(&self.deliveries)
    }
}

/// Run exactly one pass of the pipeline.
///
/// Failures are contained: a broken feed is reported and excluded, a failed
/// delivery is retried by a later cycle, and a failed commit is reported.
/// Nothing here returns an error to the caller.
pub async fn run_cycle(ctx: &CycleContext) -> CycleReport {
    let config = &ctx.config;
    tracing::info!(sources = config.sources.len(), "Starting cycle");

    let polled: Vec<(FeedReport, Vec<Match>)> = stream::iter(config.sources.iter())
        .map(|source| async move {
            let result = poll_feed(ctx, &source.url).await;
            match result {
                Ok((summary, matches)) => {
                    tracing::debug!(
                        url = %source.url,
                        entries = summary.entries,
                        skipped = summary.skipped,
                        matches = summary.matches,
                        "Feed checked"
                    );
                    (
                        FeedReport {
                            url: source.url.clone(),
                            outcome: Ok(summary),
                        },
                        matches,
                    )
                }
                Err(e) => {
                    tracing::warn!(url = %source.url, error = %e, "Feed failed, skipping");
                    (
                        FeedReport {
                            url: source.url.clone(),
                            outcome: Err(e),
                        },
                        Vec::new(),
                    )
                }
            }
        })
        .buffer_unordered(config.max_concurrent_fetches.max(1))
        .collect()
        .await;

    let mut report = CycleReport::default();
    let mut matches = Vec::new();
    for (feed, feed_matches) in polled {
        report.feeds.push(feed);
        matches.extend(feed_matches);
    }

    let failed = report.failed_feeds();
    if failed > 0 && config.failure_policy == FailurePolicy::AbortCycle {
        tracing::warn!(
            failed,
            "Feed failures with failure_policy = abort_cycle, skipping notification"
        );
        report.aborted = true;
        return report;
    }

    report.deliveries = notify::notify(
        &ctx.db,
        ctx.mailer.as_ref(),
        &config.title,
        matches,
        &config.subscribers,
        config.max_concurrent_deliveries,
    )
    .await;

    match notify::commit(&ctx.db, &report.deliveries).await {
        Ok(written) => report.committed = written,
        Err(e) => {
            tracing::error!(error = %e, "Failed to record notifications, they will be resent");
            report.commit_error = Some(e);
        }
    }

    let deliveries = report.delivery_summary();
    tracing::info!(
        feeds = report.feeds.len(),
        failed_feeds = failed,
        matches = report.total_matches(),
        sent = deliveries.sent,
        already_notified = deliveries.already_notified,
        failed_deliveries = deliveries.failed,
        committed = report.committed,
        "Cycle complete"
    );
    report
}

async fn poll_feed(
    ctx: &CycleContext,
    url: &str,
) -> Result<(FeedSummary, Vec<Match>), FeedError> {
    let bytes = fetch(&ctx.client, url).await?;
    let feed = parse_feed(&bytes)?;
    let entries = feed.entries.len();
    let matches = ctx.matcher.match_entries(feed.entries);

    Ok((
        FeedSummary {
            entries,
            skipped: feed.skipped,
            matches: matches.len(),
        },
        matches,
    ))
}
