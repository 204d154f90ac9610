//! Notification pipeline: fan matches out to subscribers, skip what the
//! dedup store has already seen, send the rest, and commit successes.
//!
//! A notification obligation is identified by [`notification_key`]. The
//! store is consulted before sending and written only after the whole
//! batch of deliveries is known ([`commit`]), so a failed send is retried
//! naturally by the next cycle.

mod mailer;
mod smtp;

use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use thiserror::Error;

use crate::config::SubscriberConfig;
use crate::matcher::Match;
use crate::storage::{Database, DatabaseError, NotificationRecord};
use crate::util::{header_line, MAX_HEADER_CHARS};

pub use mailer::{Delivery, MailError, Mailer, OutgoingMail};
pub use smtp::SmtpMailer;

/// Why a single (subscriber, match) pair was not delivered.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// The dedup lookup failed; sending blind could duplicate mail
    #[error("Dedup store lookup failed: {0}")]
    Store(#[from] DatabaseError),
    #[error(transparent)]
    Mail(#[from] MailError),
}

#[derive(Debug)]
pub enum DeliveryOutcome {
    Sent(Delivery),
    AlreadyNotified,
    Failed(NotifyError),
}

/// Outcome of one (subscriber, match) pair in a cycle.
#[derive(Debug)]
pub struct DeliveryResult {
    pub subscriber: SubscriberConfig,
    pub matched: Match,
    pub key: String,
    pub outcome: DeliveryOutcome,
}

impl DeliveryResult {
    /// True when this result should be written to the dedup store.
    pub fn is_committable(&self) -> bool {
        matches!(&self.outcome, DeliveryOutcome::Sent(d) if d.is_accepted())
    }
}

/// Per-outcome counts for a batch of deliveries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliverySummary {
    pub sent: usize,
    pub already_notified: usize,
    pub failed: usize,
}

impl DeliverySummary {
    pub fn from_results(results: &[DeliveryResult]) -> Self {
        let mut summary = Self::default();
        for result in results {
            match result.outcome {
                DeliveryOutcome::Sent(_) => summary.sent += 1,
                DeliveryOutcome::AlreadyNotified => summary.already_notified += 1,
                DeliveryOutcome::Failed(_) => summary.failed += 1,
            }
        }
        summary
    }
}

/// Deterministic identity of one notification obligation.
///
/// Plain concatenation of email, link and keyword, compatible with keys
/// written by earlier deployments.
pub fn notification_key(email: &str, link: &str, keyword: &str) -> String {
    let mut key = String::with_capacity(email.len() + link.len() + keyword.len());
    key.push_str(email);
    key.push_str(link);
    key.push_str(keyword);
    key
}

/// Build the mail for one pair.
///
/// Subject: `{title} [{keyword}]: {entry title}`, flattened to one line.
/// Body: the entry link.
pub fn compose_mail(title: &str, subscriber: &SubscriberConfig, matched: &Match) -> OutgoingMail {
    let subject = format!("{} [{}]: {}", title, matched.keyword, matched.entry.title);
    OutgoingMail {
        to: subscriber.email.clone(),
        subject: header_line(&subject, MAX_HEADER_CHARS),
        text: matched.entry.link.clone(),
    }
}

/// Drop repeated (keyword, link) matches, keeping the first occurrence.
///
/// The same article syndicated by two feeds is a single obligation; without
/// this, both copies would race on the same dedup key.
pub fn dedup_matches(matches: Vec<Match>) -> Vec<Match> {
    let mut seen = HashSet::with_capacity(matches.len());
    matches
        .into_iter()
        .filter(|m| seen.insert(m.clone()))
        .collect()
}

/// Drop subscribers whose email already appeared earlier in the list.
///
/// Two entries for one mailbox map to the same notification key.
pub fn dedup_subscribers(subscribers: &[SubscriberConfig]) -> Vec<&SubscriberConfig> {
    let mut seen = HashSet::with_capacity(subscribers.len());
    subscribers
        .iter()
        .filter(|s| {
            let fresh = seen.insert(s.email.as_str());
            if !fresh {
                tracing::debug!(email = %s.email, "Ignoring repeated subscriber");
            }
            fresh
        })
        .collect()
}

/// Deliver every (subscriber, match) pair not yet recorded in the store.
///
/// Pairs run concurrently, at most `max_concurrent` at a time. A failing
/// pair never affects another. Results are returned in completion order.
/// Nothing is written to the store here; see [`commit`].
pub async fn notify(
    db: &Database,
    mailer: &dyn Mailer,
    title: &str,
    matches: Vec<Match>,
    subscribers: &[SubscriberConfig],
    max_concurrent: usize,
) -> Vec<DeliveryResult> {
    let matches = dedup_matches(matches);
    let subscribers = dedup_subscribers(subscribers);
    let pairs: Vec<(SubscriberConfig, Match)> = matches
        .iter()
        .flat_map(|m| {
            subscribers
                .iter()
                .map(move |s| ((*s).clone(), m.clone()))
        })
        .collect();

    if pairs.is_empty() {
        return Vec::new();
    }
    tracing::debug!(
        matches = matches.len(),
        subscribers = subscribers.len(),
        pairs = pairs.len(),
        "Notifying subscribers"
    );

    stream::iter(pairs)
        .map(|(subscriber, matched)| async move {
            let key = notification_key(&subscriber.email, &matched.entry.link, &matched.keyword);
            let outcome = deliver_one(db, mailer, title, &subscriber, &matched, &key).await;
            DeliveryResult {
                subscriber,
                matched,
                key,
                outcome,
            }
        })
        .buffer_unordered(max_concurrent.max(1))
        .collect()
        .await
}

async fn deliver_one(
    db: &Database,
    mailer: &dyn Mailer,
    title: &str,
    subscriber: &SubscriberConfig,
    matched: &Match,
    key: &str,
) -> DeliveryOutcome {
    match db.is_notified(key).await {
        Ok(true) => {
            tracing::debug!(
                email = %subscriber.email,
                link = %matched.entry.link,
                keyword = %matched.keyword,
                "Already notified"
            );
            return DeliveryOutcome::AlreadyNotified;
        }
        Ok(false) => {}
        Err(e) => {
            tracing::warn!(
                email = %subscriber.email,
                link = %matched.entry.link,
                error = %e,
                "Dedup lookup failed, not sending"
            );
            return DeliveryOutcome::Failed(NotifyError::Store(e));
        }
    }

    let mail = compose_mail(title, subscriber, matched);
    match mailer.send(&mail).await {
        Ok(delivery) => {
            tracing::info!(
                email = %subscriber.email,
                link = %matched.entry.link,
                keyword = %matched.keyword,
                response = %delivery.response,
                "Notification sent"
            );
            DeliveryOutcome::Sent(delivery)
        }
        Err(e) => {
            tracing::warn!(
                email = %subscriber.email,
                link = %matched.entry.link,
                keyword = %matched.keyword,
                error = %e,
                "Notification failed, will retry next cycle"
            );
            DeliveryOutcome::Failed(NotifyError::Mail(e))
        }
    }
}

/// Record every accepted delivery in the dedup store.
///
/// Only `Sent` results whose transport accepted at least one recipient are
/// written; all writes happen in one transaction. Returns the number of
/// records written.
pub async fn commit(db: &Database, results: &[DeliveryResult]) -> Result<usize, DatabaseError> {
    let records: Vec<NotificationRecord> = results
        .iter()
        .filter(|r| r.is_committable())
        .map(|r| NotificationRecord {
            key: r.key.clone(),
            email: r.subscriber.email.clone(),
            link: r.matched.entry.link.clone(),
            keyword: r.matched.keyword.clone(),
        })
        .collect();

    let written = db.mark_notified_batch(&records).await?;
    tracing::debug!(written, "Committed notifications");
    Ok(written)
}
