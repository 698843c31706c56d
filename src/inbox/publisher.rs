// expense-report-service/src/inbox/publisher.rs

use crate::models::SubmissionResponse;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// Answers a submission by writing its response JSON into the responses
/// directory under the submission's own name.
pub struct Publisher {
    dir: PathBuf,
}

impl Publisher {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn response_path(&self, submission_name: &str) -> PathBuf {
        self.dir.join(format!("{submission_name}.json"))
    }

    pub async fn publish_response(&self, submission_name: &str, response: &SubmissionResponse) -> Option<PathBuf> {
        let json_data = match serde_json::to_vec_pretty(response) {
            Ok(data) => data,
            Err(e) => {
                error!("Failed to serialize response: {}", e);
                return None;
            }
        };

        let dir = self.dir.clone();
        let target = self.response_path(submission_name);
        let written = {
            let target = target.clone();
            tokio::task::spawn_blocking(move || write_atomically(&dir, &target, &json_data)).await
        };

        match written {
            Ok(Ok(())) => {
                info!(
                    request_id = %response.request_id,
                    status = %response.status,
                    path = %target.display(),
                    "Response published successfully"
                );
                Some(target)
            }
            Ok(Err(e)) => {
                error!(request_id = %response.request_id, error = %e, "Failed to publish response");
                None
            }
            Err(e) => {
                error!(request_id = %response.request_id, error = %e, "Response writer task failed");
                None
            }
        }
    }
}

fn write_atomically(dir: &Path, target: &Path, data: &[u8]) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let mut staged = tempfile::Builder::new().prefix(".response-").tempfile_in(dir)?;
    staged.write_all(data)?;
    staged.persist(target).map_err(|e| e.error)?;
    Ok(())
}
