// expense-report-service/src/inbox/mailer.rs

use crate::config::MailConfig;
use crate::error::{ReportError, Result};
use crate::models::{ExpenseReport, GeneratedDocument};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use handlebars::Handlebars;
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use tracing::info;

const BODY_TEMPLATE: &str = "mail_body";

/// A finished report on its way to the finance recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub to: String,
    pub cc: Option<String>,
    pub reply_to: Option<String>,
    pub subject: String,
    pub body: String,
    pub attachment_name: String,
    pub attachment_path: PathBuf,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    /// Returns an identifier for the queued message.
    async fn send(&self, message: &OutgoingMessage) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct OutboxEnvelope<'a> {
    id: String,
    queued_at: DateTime<Utc>,
    to: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    cc: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to: Option<&'a str>,
    subject: &'a str,
    body: &'a str,
    attachment: OutboxAttachment<'a>,
}

#[derive(Debug, Serialize)]
struct OutboxAttachment<'a> {
    file_name: &'a str,
    content_type: &'static str,
    content_base64: String,
}

/// Queues messages as JSON files for an external MTA to pick up. A file
/// only appears under its final name once completely written.
pub struct OutboxMailer {
    dir: PathBuf,
}

impl OutboxMailer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl Mailer for OutboxMailer {
    async fn send(&self, message: &OutgoingMessage) -> Result<String> {
        let pdf = tokio::fs::read(&message.attachment_path).await.map_err(|e| {
            ReportError::DeliveryFailed(format!(
                "could not read {}: {e}",
                message.attachment_path.display()
            ))
        })?;

        let envelope = OutboxEnvelope {
            id: uuid::Uuid::new_v4().to_string(),
            queued_at: Utc::now(),
            to: &message.to,
            cc: message.cc.as_deref(),
            reply_to: message.reply_to.as_deref(),
            subject: &message.subject,
            body: &message.body,
            attachment: OutboxAttachment {
                file_name: &message.attachment_name,
                content_type: "application/pdf",
                content_base64: general_purpose::STANDARD.encode(&pdf),
            },
        };
        let json = serde_json::to_vec_pretty(&envelope)?;

        let dir = self.dir.clone();
        let target = dir.join(format!("{}.json", envelope.id));
        tokio::task::spawn_blocking(move || -> Result<()> {
            std::fs::create_dir_all(&dir)?;
            let mut staged = tempfile::Builder::new().prefix(".queued-").tempfile_in(&dir)?;
            staged.write_all(&json)?;
            staged.persist(&target).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| ReportError::DeliveryFailed(format!("outbox task failed: {e}")))?
        .map_err(|e| ReportError::DeliveryFailed(e.to_string()))?;

        info!(
            message_id = %envelope.id,
            to = %message.to,
            attachment = %message.attachment_name,
            "Message queued in outbox"
        );
        Ok(envelope.id)
    }
}

/// Renders the mail for a finalized report from the configured template.
pub struct MessageComposer {
    handlebars: Handlebars<'static>,
    mail: MailConfig,
    currency: String,
}

impl MessageComposer {
    pub fn new(mail: &MailConfig, currency: &str) -> Result<Self> {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(false);
        // Plain text mail; HTML escaping would mangle names like "Åsa & Per".
        handlebars.register_escape_fn(handlebars::no_escape);
        handlebars.register_template_string(BODY_TEMPLATE, &mail.body_template)?;

        Ok(Self {
            handlebars,
            mail: mail.clone(),
            currency: currency.to_string(),
        })
    }

    pub fn compose(&self, report: &ExpenseReport, document: &GeneratedDocument) -> Result<OutgoingMessage> {
        let context = serde_json::json!({
            "name": report.submitter_name(),
            "email": report.submitter_email(),
            "date": report.report_date().format("%Y-%m-%d").to_string(),
            "total": report.total_amount().to_string(),
            "vat": report.total_vat().map(|vat| vat.to_string()),
            "currency": self.currency,
            "receipts": report.line_items().len(),
            "file_name": document.file_name,
            "sender": self.mail.sender_name,
        });
        let body = self.handlebars.render(BODY_TEMPLATE, &context)?;

        Ok(OutgoingMessage {
            to: self.mail.recipient.clone(),
            cc: self.mail.copy.clone(),
            reply_to: report.submitter_email().map(str::to_string),
            subject: format!("{} - {}", self.mail.subject, report.submitter_name()),
            body,
            attachment_name: document.file_name.clone(),
            attachment_path: document.path.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::report::layout::tests::{item, report};
    use std::path::Path;

    fn document(path: PathBuf) -> GeneratedDocument {
        GeneratedDocument {
            file_name: path.file_name().unwrap().to_string_lossy().into_owned(),
            path,
            size_bytes: 4,
            sha256: String::new(),
            page_count: 1,
        }
    }

    #[test]
    fn composed_body_names_submitter_and_total() {
        let config = Config::with_root(Path::new("/srv")).unwrap();
        let composer = MessageComposer::new(&config.mail, &config.report.currency).unwrap();
        let report = report(vec![item("Fika", None, 12050, None), item("Buss", None, 3000, None)]);

        let message = composer
            .compose(&report, &document(PathBuf::from("/srv/output/rapport.pdf")))
            .unwrap();

        assert_eq!(message.to, config.mail.recipient);
        assert_eq!(message.subject, "Kvittounderlag - Anna Svensson");
        assert!(message.body.starts_with("Hej,"));
        assert!(message.body.contains("Anna Svensson"));
        assert!(message.body.contains("150.50 SEK"));
        assert_eq!(message.reply_to.as_deref(), Some("anna@example.org"));
    }

    #[test]
    fn broken_template_is_rejected() {
        let mut config = Config::with_root(Path::new("/srv")).unwrap();
        config.mail.body_template = "Hej {{#if name}}utan slut".to_string();
        let err = MessageComposer::new(&config.mail, "SEK").err().unwrap();
        assert_eq!(err.error_type(), "template_error");
    }

    #[tokio::test]
    async fn outbox_mailer_writes_envelope_with_pdf() {
        let dir = tempfile::tempdir().unwrap();
        let pdf_path = dir.path().join("rapport.pdf");
        std::fs::write(&pdf_path, b"%PDF").unwrap();
        let outbox = dir.path().join("outbox");
        let mailer = OutboxMailer::new(&outbox);

        let message = OutgoingMessage {
            to: "ekonomi@example.org".to_string(),
            cc: None,
            reply_to: None,
            subject: "Kvittounderlag".to_string(),
            body: "Hej".to_string(),
            attachment_name: "rapport.pdf".to_string(),
            attachment_path: pdf_path,
        };
        let id = mailer.send(&message).await.unwrap();

        let written: serde_json::Value =
            serde_json::from_slice(&std::fs::read(outbox.join(format!("{id}.json"))).unwrap()).unwrap();
        assert_eq!(written["to"], "ekonomi@example.org");
        assert_eq!(written["attachment"]["content_base64"], "JVBERg==");
        assert!(written.get("cc").is_none());
    }

    #[tokio::test]
    async fn missing_pdf_is_a_delivery_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mailer = OutboxMailer::new(dir.path());
        let message = OutgoingMessage {
            to: "x@example.org".to_string(),
            cc: None,
            reply_to: None,
            subject: "s".to_string(),
            body: "b".to_string(),
            attachment_name: "borta.pdf".to_string(),
            attachment_path: dir.path().join("borta.pdf"),
        };
        let err = mailer.send(&message).await.unwrap_err();
        assert_eq!(err.error_type(), "delivery_failed");
    }
}
