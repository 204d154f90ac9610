//! Shared fixtures for cycle-level tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use feedmailer::config::Config;
use feedmailer::cycle::CycleContext;
use feedmailer::feed::build_client;
use feedmailer::notify::{Delivery, MailError, Mailer, OutgoingMail};
use feedmailer::storage::Database;

/// Mailer that records every accepted message and can be told to reject
/// specific recipients.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<OutgoingMail>>,
    rejected: Mutex<Vec<String>>,
}

impl RecordingMailer {
    pub fn sent(&self) -> Vec<OutgoingMail> {
        self.sent.lock().unwrap().clone()
    }

    pub fn reject(&self, email: &str) {
        self.rejected.lock().unwrap().push(email.to_string());
    }

    pub fn accept_all(&self) {
        self.rejected.lock().unwrap().clear();
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, mail: &OutgoingMail) -> Result<Delivery, MailError> {
        if self.rejected.lock().unwrap().contains(&mail.to) {
            return Err(MailError::Transport(format!(
                "550 5.1.1 <{}>: Recipient address rejected",
                mail.to
            )));
        }
        self.sent.lock().unwrap().push(mail.clone());
        Ok(Delivery {
            accepted: vec![mail.to.clone()],
            response: "250 2.0.0 OK".to_string(),
        })
    }
}

/// RSS 2.0 document with one item per `(title, link, description)`.
pub fn rss(items: &[(&str, &str, &str)]) -> String {
    let items: String = items
        .iter()
        .map(|(title, link, description)| {
            format!(
                "<item><title>{title}</title><link>{link}</link>\
                 <description>{description}</description></item>"
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0"?><rss version="2.0"><channel><title>Feed</title>{items}</channel></rss>"#
    )
}

/// Config with the given sources, keywords and subscribers.
pub fn config(sources: &[String], keywords: &[&str], subscribers: &[&str], policy: &str) -> Config {
    let sources: String = sources
        .iter()
        .map(|url| format!("[[sources]]\nurl = \"{url}\"\n"))
        .collect();
    let subscribers: String = subscribers
        .iter()
        .map(|email| format!("[[subscribers]]\nemail = \"{email}\"\n"))
        .collect();
    let keywords = keywords
        .iter()
        .map(|k| format!("\"{k}\""))
        .collect::<Vec<_>>()
        .join(", ");

    let toml = format!(
        r#"
title = "Watcher"
poll_minutes = 5
keywords = [{keywords}]
failure_policy = "{policy}"
fetch_timeout_secs = 5

{sources}
{subscribers}
[emailer]
host = "smtp.example.com"
from = "bot@example.com"
"#
    );
    let config = Config::from_toml_str(&toml).unwrap();
    config.validate().unwrap();
    config
}

pub fn context(config: Config, db: Database, mailer: Arc<RecordingMailer>) -> CycleContext {
    let client = build_client(config.fetch_timeout()).unwrap();
    CycleContext::new(Arc::new(config), db, client, mailer)
}
