// expense-report-service/src/cleanup.rs

use crate::error::Result;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub deleted: usize,
    pub retained: usize,
}

/// Deletes files whose modification time is older than the retention
/// window. Subdirectories are left alone.
pub struct OutputSweeper {
    dirs: Vec<PathBuf>,
    retention: Duration,
}

impl OutputSweeper {
    pub fn new(dirs: Vec<PathBuf>, retention: Duration) -> Self {
        Self { dirs, retention }
    }

    pub async fn sweep_once(&self) -> Result<SweepReport> {
        let now = SystemTime::now();
        let mut report = SweepReport::default();

        for dir in &self.dirs {
            if !tokio::fs::try_exists(dir).await.unwrap_or(false) {
                debug!(dir = %dir.display(), "Sweep target does not exist");
                continue;
            }
            let partial = self.sweep_dir(dir, now).await?;
            report.deleted += partial.deleted;
            report.retained += partial.retained;
        }

        if report.deleted > 0 {
            info!(deleted = report.deleted, retained = report.retained, "Swept expired files");
        }
        Ok(report)
    }

    async fn sweep_dir(&self, dir: &Path, now: SystemTime) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        let mut entries = tokio::fs::read_dir(dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let metadata = match entry.metadata().await {
                Ok(metadata) if metadata.is_file() => metadata,
                Ok(_) => continue,
                Err(e) => {
                    warn!(path = %entry.path().display(), error = %e, "Could not stat file");
                    continue;
                }
            };
            let age = metadata
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .unwrap_or_default();

            if age <= self.retention {
                report.retained += 1;
                continue;
            }
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => {
                    debug!(path = %entry.path().display(), "Deleted expired file");
                    report.deleted += 1;
                }
                // Another sweeper or a finalize got there first.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %entry.path().display(), error = %e, "Could not delete expired file");
                    report.retained += 1;
                }
            }
        }

        Ok(report)
    }

    /// Sweeps every `interval` until `cancel` fires.
    pub async fn run(&self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Sweeper stopped");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        error!(error = %e, "Sweep failed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    fn age(path: &Path, by: Duration) {
        let file = File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - by).unwrap();
    }

    #[tokio::test]
    async fn only_files_past_retention_are_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("gammal.pdf");
        let fresh = dir.path().join("ny.pdf");
        std::fs::write(&old, b"old").unwrap();
        std::fs::write(&fresh, b"new").unwrap();
        std::fs::create_dir(dir.path().join("undermapp")).unwrap();
        age(&old, Duration::from_secs(2 * 3600));

        let sweeper = OutputSweeper::new(vec![dir.path().to_path_buf()], Duration::from_secs(3600));
        let report = sweeper.sweep_once().await.unwrap();

        assert_eq!(report, SweepReport { deleted: 1, retained: 1 });
        assert!(!old.exists());
        assert!(fresh.exists());
        assert!(dir.path().join("undermapp").exists());
    }

    #[tokio::test]
    async fn missing_directories_are_ignored() {
        let sweeper = OutputSweeper::new(vec![PathBuf::from("/nonexistent/sweep")], Duration::from_secs(1));
        assert_eq!(sweeper.sweep_once().await.unwrap(), SweepReport::default());
    }

    #[tokio::test]
    async fn run_stops_when_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let sweeper = OutputSweeper::new(vec![dir.path().to_path_buf()], Duration::from_secs(3600));
        let cancel = CancellationToken::new();
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), sweeper.run(Duration::from_millis(10), cancel))
            .await
            .unwrap();
    }
}
