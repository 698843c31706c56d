// expense-report-service/src/inbox/mod.rs

mod handler;
mod mailer;
mod publisher;

pub use handler::SubmissionHandler;
pub use mailer::{Mailer, MessageComposer, OutboxMailer};
pub use publisher::Publisher;

use crate::config::InboxConfig;
use crate::error::{ReportError, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const CLAIMED_SUFFIX: &str = "processing";

/// Watches the inbox directory for `*.json` submissions. A file is claimed
/// by renaming it before work starts, so several watchers can share one
/// inbox without handling a submission twice.
pub struct InboxWatcher {
    dir: PathBuf,
    poll_interval: Duration,
    handler: Arc<SubmissionHandler>,
    publisher: Arc<Publisher>,
    permits: Arc<Semaphore>,
}

impl InboxWatcher {
    pub fn new(config: &InboxConfig, handler: Arc<SubmissionHandler>, publisher: Arc<Publisher>) -> Self {
        Self {
            dir: config.dir.clone(),
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(10)),
            handler,
            publisher,
            permits: Arc::new(Semaphore::new(config.max_concurrent_submissions.max(1))),
        }
    }

    /// Polls until `cancel` fires, then waits for in-flight submissions.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        info!(dir = %self.dir.display(), "Watching inbox");

        let mut in_flight = JoinSet::new();

        'poll: loop {
            while let Some(finished) = in_flight.try_join_next() {
                if let Err(e) = finished {
                    error!(error = %e, "Submission task panicked");
                }
            }

            let pending = match self.pending().await {
                Ok(pending) => pending,
                Err(e) => {
                    error!(error = %e, "Could not list inbox");
                    Vec::new()
                }
            };

            for path in pending {
                let permit = tokio::select! {
                    _ = cancel.cancelled() => break 'poll,
                    permit = Arc::clone(&self.permits).acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break 'poll,
                    },
                };
                let Some(claimed) = claim(&path).await else {
                    continue;
                };

                let handler = Arc::clone(&self.handler);
                let publisher = Arc::clone(&self.publisher);
                in_flight.spawn(async move {
                    process_claimed(&handler, &publisher, &claimed).await;
                    drop(permit);
                });
            }

            tokio::select! {
                _ = cancel.cancelled() => break 'poll,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        info!(in_flight = in_flight.len(), "Inbox watcher stopping");
        while let Some(finished) = in_flight.join_next().await {
            if let Err(e) = finished {
                error!(error = %e, "Submission task panicked");
            }
        }
        Ok(())
    }

    async fn pending(&self) -> Result<Vec<PathBuf>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut pending = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map_or(false, |ext| ext == "json") && entry.file_type().await?.is_file() {
                pending.push(path);
            }
        }
        // Oldest names first when submitters use sortable names.
        pending.sort();
        Ok(pending)
    }
}

/// Handles one submission file outside the watcher, as the `process`
/// command does. The file itself is left in place.
pub async fn process_file(handler: &SubmissionHandler, publisher: &Publisher, path: &Path) -> Result<PathBuf> {
    let data = tokio::fs::read(path).await?;
    let response = handler.handle_message(&data).await;
    let name = submission_name(path);
    publisher
        .publish_response(&name, &response)
        .await
        .ok_or_else(|| ReportError::GenerationFailed(format!("could not write response for {name}")))
}

async fn claim(path: &Path) -> Option<PathBuf> {
    let claimed = path.with_extension(format!("json.{CLAIMED_SUFFIX}"));
    match tokio::fs::rename(path, &claimed).await {
        Ok(()) => Some(claimed),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "Submission already claimed");
            None
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Could not claim submission");
            None
        }
    }
}

async fn process_claimed(handler: &SubmissionHandler, publisher: &Publisher, claimed: &Path) {
    let name = submission_name(claimed);
    info!(submission = %name, "Processing submission file");

    let data = match tokio::fs::read(claimed).await {
        Ok(data) => data,
        Err(e) => {
            error!(submission = %name, error = %e, "Could not read claimed submission");
            return;
        }
    };

    let response = handler.handle_message(&data).await;
    if publisher.publish_response(&name, &response).await.is_none() {
        // Keep the claimed file so the submission can be inspected and retried.
        return;
    }

    if let Err(e) = tokio::fs::remove_file(claimed).await {
        warn!(submission = %name, error = %e, "Could not remove processed submission");
    }
}

/// `inbox/anna.json` and `inbox/anna.json.processing` are both `anna`.
fn submission_name(path: &Path) -> String {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let without_claim = file_name
        .strip_suffix(&format!(".{CLAIMED_SUFFIX}"))
        .unwrap_or(&file_name);
    without_claim
        .strip_suffix(".json")
        .unwrap_or(without_claim)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::pipeline::ReportPipeline;
    use crate::uploads::UploadStore;

    fn watcher(config: &Config) -> (InboxWatcher, Arc<SubmissionHandler>, Arc<Publisher>) {
        let handler = Arc::new(SubmissionHandler::new(
            Arc::new(ReportPipeline::new(config)),
            UploadStore::new(&config.storage.upload_dir),
            MessageComposer::new(&config.mail, &config.report.currency).unwrap(),
            Arc::new(OutboxMailer::new(&config.mail.outbox_dir)),
        ));
        let publisher = Arc::new(Publisher::new(&config.inbox.responses_dir));
        (
            InboxWatcher::new(&config.inbox, Arc::clone(&handler), Arc::clone(&publisher)),
            handler,
            publisher,
        )
    }

    const SUBMISSION: &str = r#"{
        "action": "preview",
        "personal_info": { "date": "2024-03-15", "name": "Anna Svensson" },
        "receipts": [
            { "date": "2024-03-10", "purpose": "Fika", "cost_center": "Barn /22", "total_cost": "45" }
        ],
        "payment_info": { "bank_name": "Nordbanken", "clearing_number": "1234", "account_number": "567890" }
    }"#;

    #[test]
    fn submission_names_ignore_claim_suffix() {
        assert_eq!(submission_name(Path::new("/in/anna.json")), "anna");
        assert_eq!(submission_name(Path::new("/in/anna.json.processing")), "anna");
    }

    #[tokio::test]
    async fn claimed_file_cannot_be_claimed_twice() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.json");
        std::fs::write(&path, "{}").unwrap();

        let claimed = claim(&path).await.unwrap();
        assert!(claimed.exists());
        assert!(claim(&path).await.is_none());
    }

    #[tokio::test]
    async fn watcher_answers_pending_submissions_and_stops() {
        let root = tempfile::tempdir().unwrap();
        let mut config = Config::with_root(root.path()).unwrap();
        config.inbox.poll_interval_ms = 10;
        let (watcher, _, _) = watcher(&config);
        ReportPipeline::new(&config).ensure_directories().await.unwrap();
        std::fs::create_dir_all(&config.inbox.dir).unwrap();
        std::fs::write(config.inbox.dir.join("anna.json"), SUBMISSION).unwrap();
        std::fs::write(config.inbox.dir.join("trasig.json"), "nope").unwrap();

        let cancel = CancellationToken::new();
        let run = {
            let cancel = cancel.clone();
            async move { watcher.run(cancel).await }
        };
        let responses_dir = config.inbox.responses_dir.clone();
        let wait = async move {
            for _ in 0..500 {
                let done = ["anna.json", "trasig.json"]
                    .iter()
                    .all(|name| responses_dir.join(name).exists());
                if done {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            cancel.cancel();
        };
        let (result, ()) = tokio::join!(run, wait);
        result.unwrap();

        let ok: serde_json::Value = serde_json::from_slice(
            &std::fs::read(config.inbox.responses_dir.join("anna.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(ok["status"], "success");
        let bad: serde_json::Value = serde_json::from_slice(
            &std::fs::read(config.inbox.responses_dir.join("trasig.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(bad["error_type"], "serialization_error");
        assert_eq!(std::fs::read_dir(&config.inbox.dir).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn process_file_leaves_submission_in_place() {
        let root = tempfile::tempdir().unwrap();
        let config = Config::with_root(root.path()).unwrap();
        let (_, handler, publisher) = watcher(&config);
        ReportPipeline::new(&config).ensure_directories().await.unwrap();
        let path = root.path().join("manuell.json");
        std::fs::write(&path, SUBMISSION).unwrap();

        let response = process_file(&handler, &publisher, &path).await.unwrap();

        assert_eq!(response, config.inbox.responses_dir.join("manuell.json"));
        assert!(path.exists());
    }
}
