//! End-to-end cycles against mock feeds and a recording mailer.
//!
//! Feeds are served by wiremock; the dedup store is in-memory unless a test
//! needs it to outlive the process.

mod common;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{config, context, rss, RecordingMailer};
use feedmailer::cycle::run_cycle;
use feedmailer::feed::{FeedError, FetchError};
use feedmailer::notify::{
    Delivery, DeliveryOutcome, DeliverySummary, MailError, Mailer, OutgoingMail,
};
use feedmailer::storage::Database;

async fn serve(server: &MockServer, route: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

async fn memory_db() -> Database {
    Database::open(":memory:").await.unwrap()
}

#[tokio::test]
async fn test_outage_scenario_sends_once() {
    let server = MockServer::start().await;
    let link = format!("{}/posts/1", server.uri());
    serve(
        &server,
        "/feed",
        rss(&[("Status update", &link, "breaking: outage")]),
    )
    .await;

    let mailer = Arc::new(RecordingMailer::default());
    let db = memory_db().await;
    let ctx = context(
        config(&[format!("{}/feed", server.uri())], &["outage"], &["a@x.com"], "isolate"),
        db.clone(),
        Arc::clone(&mailer),
    );

    let first = run_cycle(&ctx).await;
    assert_eq!(first.delivery_summary().sent, 1);
    assert_eq!(first.committed, 1);

    let sent = mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "a@x.com");
    assert_eq!(sent[0].subject, "Watcher [outage]: Status update");
    assert_eq!(sent[0].text, link);

    let key = format!("a@x.com{link}outage");
    assert!(db.is_notified(&key).await.unwrap());

    let second = run_cycle(&ctx).await;
    assert_eq!(
        second.delivery_summary(),
        DeliverySummary {
            sent: 0,
            already_notified: 1,
            failed: 0
        }
    );
    assert_eq!(second.committed, 0);
    assert_eq!(mailer.sent().len(), 1);
}

#[tokio::test]
async fn test_fan_out_to_every_subscriber() {
    let server = MockServer::start().await;
    serve(
        &server,
        "/feed",
        rss(&[
            ("One", "https://news.example/1", "outage and breach"),
            ("Two", "https://news.example/2", "nothing to see"),
        ]),
    )
    .await;

    let mailer = Arc::new(RecordingMailer::default());
    let ctx = context(
        config(
            &[format!("{}/feed", server.uri())],
            &["outage", "breach", "degraded"],
            &["a@x.com", "b@x.com"],
            "isolate",
        ),
        memory_db().await,
        Arc::clone(&mailer),
    );

    let report = run_cycle(&ctx).await;

    assert_eq!(report.total_matches(), 2);
    assert_eq!(report.deliveries.len(), 4);
    assert_eq!(mailer.sent().len(), 4);
    assert_eq!(report.committed, 4);
}

#[tokio::test]
async fn test_failing_feed_does_not_block_others() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    serve(&server, "/b", rss(&[("B", "https://b.example/1", "outage")])).await;
    serve(&server, "/c", rss(&[("C", "https://c.example/1", "outage")])).await;

    let mailer = Arc::new(RecordingMailer::default());
    let ctx = context(
        config(
            &[
                format!("{}/broken", server.uri()),
                format!("{}/b", server.uri()),
                format!("{}/c", server.uri()),
            ],
            &["outage"],
            &["a@x.com"],
            "isolate",
        ),
        memory_db().await,
        Arc::clone(&mailer),
    );

    let report = run_cycle(&ctx).await;

    assert_eq!(report.failed_feeds(), 1);
    assert!(!report.aborted);
    let broken = report
        .feeds
        .iter()
        .find(|f| f.url.ends_with("/broken"))
        .unwrap();
    assert!(matches!(
        broken.outcome,
        Err(FeedError::Fetch(FetchError::BadStatus(503)))
    ));

    let mut links: Vec<String> = mailer.sent().into_iter().map(|m| m.text).collect();
    links.sort();
    assert_eq!(links, vec!["https://b.example/1", "https://c.example/1"]);
}

#[tokio::test]
async fn test_unparseable_feed_is_isolated() {
    let server = MockServer::start().await;
    serve(&server, "/html", "<html><body>not a feed</body></html>".to_string()).await;
    serve(&server, "/ok", rss(&[("Ok", "https://ok.example/1", "outage")])).await;

    let mailer = Arc::new(RecordingMailer::default());
    let ctx = context(
        config(
            &[format!("{}/html", server.uri()), format!("{}/ok", server.uri())],
            &["outage"],
            &["a@x.com"],
            "isolate",
        ),
        memory_db().await,
        Arc::clone(&mailer),
    );

    let report = run_cycle(&ctx).await;

    assert_eq!(report.failed_feeds(), 1);
    let html = report.feeds.iter().find(|f| f.url.ends_with("/html")).unwrap();
    assert!(matches!(html.outcome, Err(FeedError::Parse(_))));
    assert_eq!(mailer.sent().len(), 1);
}

#[tokio::test]
async fn test_abort_cycle_policy_skips_notification() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    serve(&server, "/ok", rss(&[("Ok", "https://ok.example/1", "outage")])).await;

    let mailer = Arc::new(RecordingMailer::default());
    let db = memory_db().await;
    let ctx = context(
        config(
            &[format!("{}/broken", server.uri()), format!("{}/ok", server.uri())],
            &["outage"],
            &["a@x.com"],
            "abort_cycle",
        ),
        db.clone(),
        Arc::clone(&mailer),
    );

    let report = run_cycle(&ctx).await;

    assert!(report.aborted);
    assert!(report.deliveries.is_empty());
    assert!(mailer.sent().is_empty());
    assert_eq!(db.count_notifications().await.unwrap(), 0);
}

#[tokio::test]
async fn test_failed_send_is_retried_next_cycle() {
    let server = MockServer::start().await;
    serve(&server, "/feed", rss(&[("Down", "https://e.example/1", "outage")])).await;

    let mailer = Arc::new(RecordingMailer::default());
    mailer.reject("a@x.com");
    let db = memory_db().await;
    let ctx = context(
        config(
            &[format!("{}/feed", server.uri())],
            &["outage"],
            &["a@x.com", "b@x.com"],
            "isolate",
        ),
        db.clone(),
        Arc::clone(&mailer),
    );

    let first = run_cycle(&ctx).await;
    assert_eq!(first.delivery_summary().failed, 1);
    assert_eq!(first.committed, 1);
    assert!(!db.is_notified("a@x.comhttps://e.example/1outage").await.unwrap());
    assert!(db.is_notified("b@x.comhttps://e.example/1outage").await.unwrap());

    mailer.accept_all();
    let second = run_cycle(&ctx).await;

    let retried = second
        .deliveries
        .iter()
        .find(|d| d.subscriber.email == "a@x.com")
        .unwrap();
    assert!(matches!(retried.outcome, DeliveryOutcome::Sent(_)));
    let skipped = second
        .deliveries
        .iter()
        .find(|d| d.subscriber.email == "b@x.com")
        .unwrap();
    assert!(matches!(skipped.outcome, DeliveryOutcome::AlreadyNotified));
    assert!(db.is_notified("a@x.comhttps://e.example/1outage").await.unwrap());

    let recipients: Vec<String> = mailer.sent().into_iter().map(|m| m.to).collect();
    assert_eq!(recipients.iter().filter(|r| *r == "a@x.com").count(), 1);
    assert_eq!(recipients.iter().filter(|r| *r == "b@x.com").count(), 1);
}

#[tokio::test]
async fn test_same_link_in_two_feeds_mails_once() {
    let server = MockServer::start().await;
    let item = [("Shared", "https://wire.example/1", "outage")];
    serve(&server, "/a", rss(&item)).await;
    serve(&server, "/b", rss(&item)).await;

    let mailer = Arc::new(RecordingMailer::default());
    let ctx = context(
        config(
            &[format!("{}/a", server.uri()), format!("{}/b", server.uri())],
            &["outage"],
            &["a@x.com"],
            "isolate",
        ),
        memory_db().await,
        Arc::clone(&mailer),
    );

    let report = run_cycle(&ctx).await;

    assert_eq!(report.total_matches(), 2);
    assert_eq!(report.deliveries.len(), 1);
    assert_eq!(mailer.sent().len(), 1);
}

#[tokio::test]
async fn test_rdf_and_atom_feeds_match() {
    let server = MockServer::start().await;
    serve(
        &server,
        "/rdf",
        r#"<?xml version="1.0"?>
<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#" xmlns="http://purl.org/rss/1.0/">
  <channel><title>RDF</title></channel>
  <item><title>Rdf</title><link>https://rdf.example/1</link><description>outage</description></item>
</rdf:RDF>"#
            .to_string(),
    )
    .await;
    serve(
        &server,
        "/atom",
        r#"<?xml version="1.0"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom</title>
  <entry><title>Atom</title><link href="https://atom.example/1"/><summary>outage</summary></entry>
</feed>"#
            .to_string(),
    )
    .await;

    let mailer = Arc::new(RecordingMailer::default());
    let ctx = context(
        config(
            &[format!("{}/rdf", server.uri()), format!("{}/atom", server.uri())],
            &["outage"],
            &["a@x.com"],
            "isolate",
        ),
        memory_db().await,
        Arc::clone(&mailer),
    );

    let report = run_cycle(&ctx).await;

    assert_eq!(report.failed_feeds(), 0);
    let mut links: Vec<String> = mailer.sent().into_iter().map(|m| m.text).collect();
    links.sort();
    assert_eq!(links, vec!["https://atom.example/1", "https://rdf.example/1"]);
}

#[tokio::test]
async fn test_notifications_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("mailed.db");
    let db_path = db_path.to_str().unwrap();

    let server = MockServer::start().await;
    serve(&server, "/feed", rss(&[("Down", "https://e.example/1", "outage")])).await;
    let sources = [format!("{}/feed", server.uri())];

    let first_mailer = Arc::new(RecordingMailer::default());
    {
        let db = Database::open(db_path).await.unwrap();
        let ctx = context(
            config(&sources, &["outage"], &["a@x.com"], "isolate"),
            db.clone(),
            Arc::clone(&first_mailer),
        );
        run_cycle(&ctx).await;
        db.close().await;
    }
    assert_eq!(first_mailer.sent().len(), 1);

    let second_mailer = Arc::new(RecordingMailer::default());
    let db = Database::open(db_path).await.unwrap();
    let ctx = context(
        config(&sources, &["outage"], &["a@x.com"], "isolate"),
        db,
        Arc::clone(&second_mailer),
    );
    let report = run_cycle(&ctx).await;

    assert_eq!(report.delivery_summary().already_notified, 1);
    assert!(second_mailer.sent().is_empty());
}

#[tokio::test]
async fn test_subscriber_listed_twice_mailed_once() {
    let server = MockServer::start().await;
    serve(&server, "/feed", rss(&[("Down", "https://e.example/1", "outage")])).await;

    let mailer = Arc::new(RecordingMailer::default());
    let ctx = context(
        config(
            &[format!("{}/feed", server.uri())],
            &["outage"],
            &["a@x.com", "a@x.com"],
            "isolate",
        ),
        memory_db().await,
        Arc::clone(&mailer),
    );

    let report = run_cycle(&ctx).await;

    assert_eq!(report.deliveries.len(), 1);
    assert_eq!(mailer.sent().len(), 1);
    assert_eq!(report.committed, 1);
}

/// Accepts every mail, then shuts the store so the batch commit fails.
struct StoreClosingMailer {
    db: Database,
}

#[async_trait]
impl Mailer for StoreClosingMailer {
    async fn send(&self, mail: &OutgoingMail) -> Result<Delivery, MailError> {
        self.db.close().await;
        Ok(Delivery {
            accepted: vec![mail.to.clone()],
            response: "250 2.0.0 OK".to_string(),
        })
    }
}

#[tokio::test]
async fn test_commit_failure_is_reported_and_resent() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("mailed.db");
    let db_path = db_path.to_str().unwrap();

    let server = MockServer::start().await;
    serve(&server, "/feed", rss(&[("Down", "https://e.example/1", "outage")])).await;
    let sources = [format!("{}/feed", server.uri())];

    let db = Database::open(db_path).await.unwrap();
    let closing = Arc::new(StoreClosingMailer { db: db.clone() });
    let ctx = feedmailer::cycle::CycleContext::new(
        Arc::new(config(&sources, &["outage"], &["a@x.com"], "isolate")),
        db,
        feedmailer::feed::build_client(std::time::Duration::from_secs(5)).unwrap(),
        closing,
    );

    let first = run_cycle(&ctx).await;
    assert_eq!(first.delivery_summary().sent, 1);
    assert!(first.commit_error.is_some());
    assert_eq!(first.committed, 0);

    let mailer = Arc::new(RecordingMailer::default());
    let db = Database::open(db_path).await.unwrap();
    assert_eq!(db.count_notifications().await.unwrap(), 0);
    let ctx = context(
        config(&sources, &["outage"], &["a@x.com"], "isolate"),
        db.clone(),
        Arc::clone(&mailer),
    );

    let second = run_cycle(&ctx).await;
    assert_eq!(second.delivery_summary().sent, 1);
    assert!(second.commit_error.is_none());
    assert_eq!(mailer.sent().len(), 1);
    assert!(db.is_notified("a@x.comhttps://e.example/1outage").await.unwrap());
}
