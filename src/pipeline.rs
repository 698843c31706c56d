// expense-report-service/src/pipeline.rs

use crate::config::Config;
use crate::error::{GenerationWarning, ReportError, Result};
use crate::models::{ExpenseReport, GeneratedDocument, GenerationOutcome, RequestContext};
use crate::normalizer::AttachmentNormalizer;
use crate::pdf::{PdfDocument, StructuredDocument};
use crate::report::{embed_attachments, merge_attachments, LayoutEngine};
use chrono::NaiveDate;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Orchestrates: normalize → lay out + embed images → write base → merge
/// PDFs → hand the finished file over to the output directory.
///
/// Holds configuration only; nothing carries over from one call to the next.
pub struct ReportPipeline {
    normalizer: AttachmentNormalizer,
    layout: Arc<LayoutEngine>,
    label: String,
    output_dir: PathBuf,
    temp_dir: PathBuf,
}

struct Assembled {
    bytes_sha256: String,
    size_bytes: u64,
    page_count: usize,
}

impl ReportPipeline {
    pub fn new(config: &Config) -> Self {
        Self {
            normalizer: AttachmentNormalizer::new(&config.converter),
            layout: Arc::new(LayoutEngine::new(&config.report, &config.storage.asset_dir)),
            label: config.report.label.clone(),
            output_dir: config.storage.output_dir.clone(),
            temp_dir: config.storage.temp_dir.clone(),
        }
    }

    pub async fn ensure_directories(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.output_dir).await?;
        tokio::fs::create_dir_all(&self.temp_dir).await?;
        Ok(())
    }

    /// Produces one finished PDF for `report`. Preview and finalize both
    /// call this; per-attachment problems come back as warnings, anything
    /// that prevents a complete document comes back as the error.
    #[instrument(skip(self, ctx, report), fields(request_id = %ctx.request_id))]
    pub async fn generate(&self, ctx: &RequestContext, mut report: ExpenseReport) -> Result<GenerationOutcome> {
        let mut warnings = Vec::new();
        let normalized = self.normalizer.normalize(&mut report, &mut warnings).await;

        let file_name = artifact_file_name(&self.label, report.report_date(), Uuid::new_v4());
        let final_path = self.output_dir.join(&file_name);

        let layout = Arc::clone(&self.layout);
        let temp_dir = self.temp_dir.clone();
        let output_dir = self.output_dir.clone();
        let target = final_path.clone();
        let joined = tokio::task::spawn_blocking(move || {
            let assembled = assemble(&layout, &report, &temp_dir, &output_dir, &target, &mut warnings);
            assembled.map(|assembled| (assembled, warnings))
        })
        .await;

        for path in &normalized.created_files {
            if let Err(e) = tokio::fs::remove_file(path).await {
                debug!(path = %path.display(), error = %e, "Could not remove converted attachment");
            }
        }

        let (assembled, warnings) = joined
            .map_err(|e| ReportError::GenerationFailed(format!("assembly task failed: {e}")))??;

        info!(
            file_name = %file_name,
            pages = assembled.page_count,
            size_bytes = assembled.size_bytes,
            warnings = warnings.len(),
            "Report generated"
        );

        Ok(GenerationOutcome {
            document: GeneratedDocument {
                path: final_path,
                file_name,
                size_bytes: assembled.size_bytes,
                sha256: assembled.bytes_sha256,
                page_count: assembled.page_count,
            },
            warnings,
        })
    }
}

/// Runs on a blocking thread. Every temporary file is a `NamedTempFile`,
/// so each exit path removes what was not persisted.
fn assemble(
    layout: &LayoutEngine,
    report: &ExpenseReport,
    temp_dir: &Path,
    output_dir: &Path,
    final_path: &Path,
    warnings: &mut Vec<GenerationWarning>,
) -> Result<Assembled> {
    let mut doc = PdfDocument::new();
    layout.render(&mut doc, report, warnings)?;
    let embedded = embed_attachments(&mut doc, report, warnings)?;
    let base_bytes = doc.save()?;
    debug!(
        image_pages = embedded.image_pages,
        pending_merges = embedded.pending_merges.len(),
        "Base document rendered"
    );

    let mut base_file = tempfile::Builder::new()
        .prefix("report-")
        .suffix(".pdf")
        .tempfile_in(temp_dir)?;
    base_file.write_all(&base_bytes)?;
    base_file.flush()?;

    if embedded.pending_merges.is_empty() {
        persist(base_file, final_path, output_dir)?;
        return Ok(Assembled {
            bytes_sha256: sha256_hex(&base_bytes),
            size_bytes: base_bytes.len() as u64,
            page_count: doc.page_count(),
        });
    }

    let written = std::fs::read(base_file.path())?;
    let mut merged = PdfDocument::load_from_bytes(&written).map_err(|e| ReportError::BaseDocumentUnreadable {
        path: base_file.path().to_path_buf(),
        reason: e.to_string(),
    })?;
    let summary = merge_attachments(&mut merged, &embedded.pending_merges, warnings)?;
    debug!(merged = summary.merged, pages = summary.pages_copied, "Merged attachments into base");

    let merged_bytes = merged.save()?;
    let mut staged = staging_file(output_dir)?;
    staged.write_all(&merged_bytes)?;
    staged.flush()?;
    staged.persist(final_path).map_err(|e| e.error)?;

    Ok(Assembled {
        bytes_sha256: sha256_hex(&merged_bytes),
        size_bytes: merged_bytes.len() as u64,
        page_count: merged.page_count(),
    })
}

/// Renames into place; when the temp and output directories live on
/// different filesystems, copies through a staging file next to the target.
fn persist(file: NamedTempFile, final_path: &Path, output_dir: &Path) -> Result<()> {
    let err = match file.persist(final_path) {
        Ok(_) => return Ok(()),
        Err(err) => err,
    };
    warn!(error = %err.error, "Rename into output directory failed, copying instead");

    let mut staged = staging_file(output_dir)?;
    let mut source = std::fs::File::open(err.file.path())?;
    std::io::copy(&mut source, staged.as_file_mut())?;
    staged.flush()?;
    staged.persist(final_path).map_err(|e| e.error)?;
    Ok(())
}

fn staging_file(output_dir: &Path) -> Result<NamedTempFile> {
    Ok(tempfile::Builder::new()
        .prefix(".partial-")
        .suffix(".pdf")
        .tempfile_in(output_dir)?)
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// `<Label>_<YYYY-MM-DD>_<uuid>.pdf`, with anything unsafe in the label
/// replaced by `_`.
pub fn artifact_file_name(label: &str, date: NaiveDate, id: Uuid) -> String {
    let sanitized_label = label
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect::<String>();
    format!("{}_{}_{}.pdf", sanitized_label, date.format("%Y-%m-%d"), id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Attachment;
    use crate::pdf::test_support::png_bytes;
    use crate::pdf::{page_texts, Canvas, Font};
    use crate::report::layout::tests::{item, report};

    struct Fixture {
        root: tempfile::TempDir,
        config: Config,
        pipeline: ReportPipeline,
    }

    async fn fixture() -> Fixture {
        let root = tempfile::tempdir().unwrap();
        let config = Config::with_root(root.path()).unwrap();
        let pipeline = ReportPipeline::new(&config);
        pipeline.ensure_directories().await.unwrap();
        std::fs::create_dir_all(&config.storage.upload_dir).unwrap();
        Fixture {
            root,
            config,
            pipeline,
        }
    }

    impl Fixture {
        fn png(&self, name: &str) -> Attachment {
            let path = self.config.storage.upload_dir.join(name);
            std::fs::write(&path, png_bytes(30, 20, false)).unwrap();
            Attachment::new(path, name, "image/png")
        }

        fn pdf(&self, name: &str, pages: usize) -> Attachment {
            let mut doc = PdfDocument::new();
            for i in 0..pages {
                let mut canvas = Canvas::letter();
                canvas.text(Font::Regular, 12.0, 72.0, 72.0, &format!("{name} sida {}", i + 1));
                doc.add_page(canvas).unwrap();
            }
            let path = self.config.storage.upload_dir.join(name);
            std::fs::write(&path, doc.save().unwrap()).unwrap();
            Attachment::new(path, name, "application/pdf")
        }

        fn temp_files(&self) -> usize {
            std::fs::read_dir(&self.config.storage.temp_dir).unwrap().count()
        }
    }

    #[tokio::test]
    async fn report_without_attachments_has_only_base_pages() {
        let fx = fixture().await;
        let outcome = fx
            .pipeline
            .generate(&RequestContext::new(), report(vec![item("Fika", None, 10000, None)]))
            .await
            .unwrap();

        assert_eq!(outcome.document.page_count, 1);
        assert!(outcome.document.path.starts_with(&fx.config.storage.output_dir));
        assert!(matches!(outcome.warnings.as_slice(), [GenerationWarning::AssetMissing { .. }]));

        let bytes = std::fs::read(&outcome.document.path).unwrap();
        assert_eq!(bytes.len() as u64, outcome.document.size_bytes);
        assert_eq!(sha256_hex(&bytes), outcome.document.sha256);
        let texts: Vec<String> = page_texts(&bytes).into_iter().flatten().collect();
        assert!(texts.contains(&"100.00 SEK".to_string()));
        assert_eq!(fx.temp_files(), 0);
    }

    #[tokio::test]
    async fn images_then_pdfs_follow_base_pages() {
        let fx = fixture().await;
        let mut first = item("Tåg", None, 25000, Some(1500));
        first.attachments = vec![fx.png("biljett.png"), fx.pdf("kvitto.pdf", 2)];
        let mut second = item("Hotell", None, 90000, None);
        second.attachments = vec![fx.pdf("faktura.pdf", 3), fx.png("karta.png")];

        let outcome = fx
            .pipeline
            .generate(&RequestContext::new(), report(vec![first, second]))
            .await
            .unwrap();

        // 1 base page, 2 image pages, then (divider + pages) per PDF.
        assert_eq!(outcome.document.page_count, 1 + 2 + (1 + 2) + (1 + 3));
        let pages = page_texts(&std::fs::read(&outcome.document.path).unwrap());
        assert_eq!(pages[1], vec!["Kvitto: Tåg".to_string()]);
        assert_eq!(pages[2], vec!["Kvitto: Hotell".to_string()]);
        assert_eq!(pages[3], vec!["Tåg".to_string()]);
        assert_eq!(pages[4], vec!["kvitto.pdf sida 1".to_string()]);
        assert_eq!(pages[6], vec!["Hotell".to_string()]);
        assert_eq!(pages[9], vec!["faktura.pdf sida 3".to_string()]);
        assert_eq!(fx.temp_files(), 0);
    }

    #[tokio::test]
    async fn deleted_pdf_is_skipped_and_document_completes() {
        let fx = fixture().await;
        let kept = fx.pdf("kvar.pdf", 1);
        let gone = fx.pdf("borta.pdf", 4);
        std::fs::remove_file(&gone.storage_path).unwrap();

        let mut receipt = item("Konferens", None, 50000, None);
        receipt.attachments = vec![gone, kept];
        let outcome = fx
            .pipeline
            .generate(&RequestContext::new(), report(vec![receipt]))
            .await
            .unwrap();

        assert_eq!(outcome.document.page_count, 1 + 1 + 1);
        assert!(outcome.warnings.iter().any(|w| matches!(
            w,
            GenerationWarning::MergeSkipped { file_name, .. } if file_name == "borta.pdf"
        )));
    }

    #[tokio::test]
    async fn repeated_generation_yields_identical_pages() {
        let fx = fixture().await;
        let mut receipt = item("Material", Some("Färg och penslar"), 12345, None);
        receipt.attachments = vec![fx.png("burk.png"), fx.pdf("bon.pdf", 1)];
        let report = report(vec![receipt]);

        let first = fx.pipeline.generate(&RequestContext::new(), report.clone()).await.unwrap();
        let second = fx.pipeline.generate(&RequestContext::new(), report).await.unwrap();

        assert_ne!(first.document.path, second.document.path);
        assert_eq!(first.document.page_count, second.document.page_count);
        assert_eq!(
            page_texts(&std::fs::read(&first.document.path).unwrap()),
            page_texts(&std::fs::read(&second.document.path).unwrap())
        );
    }

    fn report_artifacts(dir: &Path, label: &str, found: &mut Vec<PathBuf>) {
        for entry in std::fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                report_artifacts(&path, label, found);
            } else if path.file_name().unwrap().to_string_lossy().starts_with(&format!("{label}_")) {
                found.push(path);
            }
        }
    }

    #[tokio::test]
    async fn failed_handoff_leaves_no_artifact_and_no_temp_files() {
        let fx = fixture().await;
        let output_dir = fx.config.storage.output_dir.clone();
        std::fs::remove_dir_all(&output_dir).unwrap();
        std::fs::write(&output_dir, b"ingen katalog").unwrap();

        let mut with_pdf = item("Hotell", None, 90000, None);
        with_pdf.attachments = vec![fx.pdf("faktura.pdf", 2)];
        let reports = [report(vec![item("Fika", None, 4500, None)]), report(vec![with_pdf])];

        for report in reports {
            let result = fx.pipeline.generate(&RequestContext::new(), report).await;
            assert!(result.is_err());
            assert_eq!(fx.temp_files(), 0);
        }

        assert_eq!(std::fs::read(&output_dir).unwrap(), b"ingen katalog");
        let mut artifacts = Vec::new();
        report_artifacts(fx.root.path(), &fx.config.report.label, &mut artifacts);
        assert!(artifacts.is_empty(), "unexpected artifacts: {artifacts:?}");
    }

    #[test]
    fn file_name_carries_label_date_and_id() {
        let id = Uuid::new_v4();
        let date = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        assert_eq!(
            artifact_file_name("Utläggsblankett", date, id),
            format!("Utläggsblankett_2024-03-15_{id}.pdf")
        );
        assert_eq!(
            artifact_file_name("Kvitto / Resa", date, id),
            format!("Kvitto___Resa_2024-03-15_{id}.pdf")
        );
    }
}
