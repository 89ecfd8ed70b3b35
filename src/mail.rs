// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Outbound mail hand-off.
//!
//! The engine never builds message bodies; it only asks a [`Mailer`] to
//! deliver a verification link. Delivery itself (SMTP, provider API, queue)
//! belongs to the implementation.

use std::sync::Mutex;

use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("mail delivery failed: {0}")]
    Delivery(String),
}

/// Delivers verification links.
///
/// Implementations must return quickly; anything slow belongs on a queue
/// behind this call.
pub trait Mailer: Send + Sync {
    fn send_verification(&self, to: &str, link: &Url) -> Result<(), MailError>;
}

/// Writes the link to the log instead of sending it. Development default.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMailer;

impl Mailer for LogMailer {
    fn send_verification(&self, to: &str, link: &Url) -> Result<(), MailError> {
        tracing::info!(target: "mail", to = %to, link = %link, "Verification email queued");
        Ok(())
    }
}

/// One captured message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMail {
    pub to: String,
    pub link: Url,
}

/// Keeps every message in memory. Used by tests to read verification links.
#[derive(Debug, Default)]
pub struct MemoryMailer {
    sent: Mutex<Vec<SentMail>>,
}

impl MemoryMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages sent so far.
    pub fn sent(&self) -> Vec<SentMail> {
        match self.sent.lock() {
            Ok(sent) => sent.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Most recent link sent to `to`.
    pub fn last_link_for(&self, to: &str) -> Option<Url> {
        self.sent()
            .into_iter()
            .rev()
            .find(|mail| mail.to == to)
            .map(|mail| mail.link)
    }
}

impl Mailer for MemoryMailer {
    fn send_verification(&self, to: &str, link: &Url) -> Result<(), MailError> {
        let mail = SentMail {
            to: to.to_string(),
            link: link.clone(),
        };
        match self.sent.lock() {
            Ok(mut sent) => sent.push(mail),
            Err(poisoned) => poisoned.into_inner().push(mail),
        }
        Ok(())
    }
}
