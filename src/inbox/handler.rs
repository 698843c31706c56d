// expense-report-service/src/inbox/handler.rs

use crate::error::{ReportError, Result};
use crate::inbox::mailer::{Mailer, MessageComposer};
use crate::models::{
    Attachment, GenerationOutcome, ReportSubmission, RequestContext, SubmissionAction, SubmissionResponse,
};
use crate::pipeline::ReportPipeline;
use crate::uploads::UploadStore;
use crate::validation::validate_submission;
use base64::{engine::general_purpose, Engine as _};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Turns one submission into one response. Uploads written for the
/// submission are removed again whatever the outcome.
pub struct SubmissionHandler {
    pipeline: Arc<ReportPipeline>,
    uploads: UploadStore,
    composer: MessageComposer,
    mailer: Arc<dyn Mailer>,
}

impl SubmissionHandler {
    pub fn new(
        pipeline: Arc<ReportPipeline>,
        uploads: UploadStore,
        composer: MessageComposer,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        Self {
            pipeline,
            uploads,
            composer,
            mailer,
        }
    }

    pub async fn handle_message(&self, data: &[u8]) -> SubmissionResponse {
        let ctx = RequestContext::new();

        // Parse the request
        let submission: ReportSubmission = match serde_json::from_slice(data) {
            Ok(submission) => submission,
            Err(e) => {
                error!(request_id = %ctx.request_id, "Failed to parse submission: {}", e);
                return SubmissionResponse::error(ctx.request_id, None, &ReportError::from(e));
            }
        };

        info!(
            request_id = %ctx.request_id,
            action = ?submission.action,
            receipts = submission.receipts.len(),
            files = submission.files.len(),
            "Processing submission"
        );

        let mut stored = Vec::new();
        let result = self.process(&ctx, &submission, &mut stored).await;
        self.uploads.remove_all(&stored).await;

        match result {
            Ok(outcome) => {
                info!(
                    request_id = %ctx.request_id,
                    file_name = %outcome.document.file_name,
                    warnings = outcome.warnings.len(),
                    "Submission handled"
                );
                SubmissionResponse::success(ctx.request_id, submission.action, outcome.document, &outcome.warnings)
            }
            Err(e) => {
                error!(request_id = %ctx.request_id, error = %e, "Submission failed");
                SubmissionResponse::error(ctx.request_id, Some(submission.action), &e)
            }
        }
    }

    async fn process(
        &self,
        ctx: &RequestContext,
        submission: &ReportSubmission,
        stored: &mut Vec<Attachment>,
    ) -> Result<GenerationOutcome> {
        let mut report = validate_submission(submission)?;

        for upload in &submission.files {
            let bytes = general_purpose::STANDARD.decode(upload.content_base64.trim())?;
            let attachment = self
                .uploads
                .store(&upload.file_name, &upload.mime_type, &bytes)
                .await?;
            stored.push(attachment.clone());
            report.attach(upload.receipt_index, attachment)?;
        }

        let report_for_mail = match submission.action {
            SubmissionAction::Finalize => Some(report.clone()),
            SubmissionAction::Preview => None,
        };
        let outcome = self.pipeline.generate(ctx, report).await?;

        let Some(report) = report_for_mail else {
            return Ok(outcome);
        };

        let delivered = match self.composer.compose(&report, &outcome.document) {
            Ok(message) => self.mailer.send(&message).await,
            Err(e) => Err(e),
        };

        // Delivered or not, a finalized document is never served again.
        if let Err(e) = tokio::fs::remove_file(&outcome.document.path).await {
            warn!(
                request_id = %ctx.request_id,
                path = %outcome.document.path.display(),
                error = %e,
                "Could not remove delivered document"
            );
        }

        let message_id = delivered?;
        info!(request_id = %ctx.request_id, message_id = %message_id, "Report delivered");
        Ok(outcome)
    }
}
