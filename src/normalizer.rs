// expense-report-service/src/normalizer.rs

use crate::config::ConverterConfig;
use crate::error::{GenerationWarning, ReportError, Result};
use crate::models::{Attachment, AttachmentKind, ExpenseReport};
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Result of normalizing one report: the files this step created, which the
/// caller owns and must remove once the document is assembled.
#[derive(Debug, Default)]
pub struct Normalized {
    pub created_files: Vec<PathBuf>,
}

/// Rewrites HEIC/HEIF attachments to JPEG so later stages only see formats
/// that can be embedded directly.
pub struct AttachmentNormalizer {
    command: String,
    args: Vec<String>,
}

impl AttachmentNormalizer {
    pub fn new(config: &ConverterConfig) -> Self {
        Self {
            command: config.heic_command.clone(),
            args: config.heic_args.clone(),
        }
    }

    /// Attachments that fail to convert are dropped from the report and
    /// reported as warnings; the rest of the report is unaffected.
    pub async fn normalize(
        &self,
        report: &mut ExpenseReport,
        warnings: &mut Vec<GenerationWarning>,
    ) -> Normalized {
        let mut normalized = Normalized::default();

        for item in report.line_items_mut() {
            let attachments = std::mem::take(&mut item.attachments);
            let mut kept = Vec::with_capacity(attachments.len());

            for attachment in attachments {
                if attachment.kind() != AttachmentKind::Heic {
                    kept.push(attachment);
                    continue;
                }
                match self.convert(&attachment).await {
                    Ok(converted) => {
                        info!(
                            source = %attachment.original_filename,
                            converted = %converted.original_filename,
                            "Converted HEIC attachment"
                        );
                        normalized.created_files.push(converted.storage_path.clone());
                        kept.push(converted);
                    }
                    Err(e) => {
                        warn!(
                            file = %attachment.original_filename,
                            error = %e,
                            "Skipping attachment that could not be converted"
                        );
                        warnings.push(GenerationWarning::ConversionFailure {
                            file_name: attachment.original_filename.clone(),
                            reason: e.to_string(),
                        });
                    }
                }
            }

            item.attachments = kept;
        }

        normalized
    }

    async fn convert(&self, attachment: &Attachment) -> Result<Attachment> {
        let input = attachment.path();
        let output = converted_path(input);

        let args: Vec<String> = self
            .args
            .iter()
            .map(|arg| {
                arg.replace("{input}", &input.to_string_lossy())
                    .replace("{output}", &output.to_string_lossy())
            })
            .collect();

        let mut cmd = Command::new(&self.command);
        cmd.args(&args).kill_on_drop(true);

        debug!("Running converter: {:?}", cmd);

        let result = cmd.output().await.map_err(|e| {
            ReportError::ConversionFailed(format!("could not run {}: {e}", self.command))
        })?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            // Some converters leave a partial file behind on failure.
            let _ = tokio::fs::remove_file(&output).await;
            return Err(ReportError::ConversionFailed(format!(
                "{} exited with {}: {}",
                self.command,
                result.status,
                stderr.trim()
            )));
        }

        let produced = tokio::fs::metadata(&output)
            .await
            .map(|meta| meta.len() > 0)
            .unwrap_or(false);
        if !produced {
            return Err(ReportError::ConversionFailed(format!(
                "{} produced no output",
                self.command
            )));
        }

        Ok(Attachment {
            storage_path: output,
            original_filename: swap_extension(&attachment.original_filename, "jpg"),
            mime_type: "image/jpeg".to_string(),
        })
    }
}

fn converted_path(input: &Path) -> PathBuf {
    let dir = input.parent().unwrap_or_else(|| Path::new("."));
    dir.join(format!("{}.jpg", Uuid::new_v4()))
}

fn swap_extension(file_name: &str, extension: &str) -> String {
    Path::new(file_name)
        .with_extension(extension)
        .to_string_lossy()
        .into_owned()
}
