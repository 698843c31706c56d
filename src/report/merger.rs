// expense-report-service/src/report/merger.rs

use crate::error::{GenerationWarning, Result};
use crate::pdf::fonts::{block_height, line_height, wrap_text};
use crate::pdf::{Canvas, Font, StructuredDocument, PAGE_HEIGHT, PAGE_WIDTH};
use crate::report::PendingMerge;
use crate::report::layout::MARGIN;
use tracing::{info, warn};

const DIVIDER_SIZE: f32 = 16.0;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeSummary {
    pub merged: usize,
    pub pages_copied: usize,
}

/// Appends each pending PDF behind `base`, each preceded by a divider page
/// naming its purpose. An attachment that is missing, unreadable, empty or
/// fails to copy is skipped with a warning and gets no divider.
pub fn merge_attachments<D: StructuredDocument>(
    base: &mut D,
    pending: &[PendingMerge],
    warnings: &mut Vec<GenerationWarning>,
) -> Result<MergeSummary> {
    let mut summary = MergeSummary::default();

    for entry in pending {
        // Divider and attachment are assembled apart from `base` so a failed
        // copy leaves no stray divider behind.
        let section = load_attachment::<D>(entry).and_then(|source| {
            let mut section = D::blank();
            section.add_page(divider_page(&entry.purpose)).map_err(|e| e.to_string())?;
            section.copy_pages(source).map_err(|e| e.to_string())?;
            Ok(section)
        });
        let section = match section {
            Ok(section) => section,
            Err(reason) => {
                warn!(file = %entry.file_name, %reason, "Skipping PDF attachment");
                warnings.push(GenerationWarning::MergeSkipped {
                    file_name: entry.file_name.clone(),
                    reason,
                });
                continue;
            }
        };

        let copied = base.copy_pages(section)?.saturating_sub(1);
        summary.merged += 1;
        summary.pages_copied += copied;
        info!(file = %entry.file_name, pages = copied, "Merged PDF attachment");
    }

    Ok(summary)
}

fn load_attachment<D: StructuredDocument>(entry: &PendingMerge) -> std::result::Result<D, String> {
    let bytes = std::fs::read(&entry.path).map_err(|e| e.to_string())?;
    let source = D::load_from_bytes(&bytes).map_err(|e| e.to_string())?;
    if source.page_count() == 0 {
        return Err("document has no pages".to_string());
    }
    Ok(source)
}

/// A page carrying only the purpose label, centred.
pub fn divider_page(purpose: &str) -> Canvas {
    let mut canvas = Canvas::letter();
    let lines = wrap_text(Font::Bold, DIVIDER_SIZE, purpose, PAGE_WIDTH - 2.0 * MARGIN);
    let mut top = (PAGE_HEIGHT - block_height(DIVIDER_SIZE, lines.len())) / 2.0;
    for line in &lines {
        canvas.text_centered(Font::Bold, DIVIDER_SIZE, PAGE_WIDTH / 2.0, top, line);
        top += line_height(DIVIDER_SIZE);
    }
    canvas
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::{page_texts, PdfDocument};
    use std::path::Path;

    fn write_pdf(path: &Path, texts: &[&str]) {
        let mut doc = PdfDocument::new();
        for text in texts {
            let mut canvas = Canvas::letter();
            canvas.text(Font::Regular, 12.0, 72.0, 72.0, text);
            doc.add_page(canvas).unwrap();
        }
        std::fs::write(path, doc.save().unwrap()).unwrap();
    }

    fn pending(path: &Path, purpose: &str) -> PendingMerge {
        PendingMerge {
            path: path.to_path_buf(),
            purpose: purpose.to_string(),
            file_name: path.file_name().unwrap().to_string_lossy().into_owned(),
        }
    }

    fn base() -> PdfDocument {
        let mut doc = PdfDocument::new();
        let mut canvas = Canvas::letter();
        canvas.text(Font::Regular, 12.0, 72.0, 72.0, "bas");
        doc.add_page(canvas).unwrap();
        doc
    }

    #[test]
    fn each_attachment_gets_a_divider_then_its_pages() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("hotell.pdf");
        let second = dir.path().join("tag.pdf");
        write_pdf(&first, &["h1", "h2"]);
        write_pdf(&second, &["t1"]);

        let mut doc = base();
        let mut warnings = Vec::new();
        let summary = merge_attachments(
            &mut doc,
            &[pending(&first, "Hotell"), pending(&second, "Tåg")],
            &mut warnings,
        )
        .unwrap();

        assert!(warnings.is_empty());
        assert_eq!(summary, MergeSummary { merged: 2, pages_copied: 3 });
        let texts: Vec<String> = page_texts(&doc.save().unwrap()).into_iter().flatten().collect();
        assert_eq!(texts, vec!["bas", "Hotell", "h1", "h2", "Tåg", "t1"]);
    }

    #[test]
    fn missing_and_corrupt_attachments_are_skipped_without_divider() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("ok.pdf");
        let corrupt = dir.path().join("trasig.pdf");
        write_pdf(&good, &["ok"]);
        std::fs::write(&corrupt, b"%PDF-1.7 garbage").unwrap();

        let mut doc = base();
        let mut warnings = Vec::new();
        let summary = merge_attachments(
            &mut doc,
            &[
                pending(&dir.path().join("borta.pdf"), "Borta"),
                pending(&corrupt, "Trasig"),
                pending(&good, "Ok"),
            ],
            &mut warnings,
        )
        .unwrap();

        assert_eq!(summary.merged, 1);
        assert_eq!(doc.page_count(), 3);
        assert_eq!(warnings.len(), 2);
        assert!(warnings
            .iter()
            .all(|w| matches!(w, GenerationWarning::MergeSkipped { .. })));
    }

    /// Pages are plain labels; a source whose first line is `trasig` loads
    /// but refuses to be copied.
    #[derive(Default)]
    struct LabelDocument {
        pages: Vec<String>,
        broken: bool,
    }

    impl StructuredDocument for LabelDocument {
        fn blank() -> Self {
            Self::default()
        }

        fn load_from_bytes(bytes: &[u8]) -> Result<Self> {
            let text = String::from_utf8_lossy(bytes);
            let mut lines = text.lines().map(str::to_string).peekable();
            let broken = lines.peek().map_or(false, |first| first == "trasig");
            Ok(Self {
                pages: lines.collect(),
                broken,
            })
        }

        fn page_count(&self) -> usize {
            self.pages.len()
        }

        fn copy_pages(&mut self, source: Self) -> Result<usize> {
            if source.broken {
                return Err(crate::error::ReportError::GenerationFailed("cannot copy".to_string()));
            }
            let count = source.pages.len();
            self.pages.extend(source.pages);
            Ok(count)
        }

        fn add_page(&mut self, _canvas: Canvas) -> Result<()> {
            self.pages.push("avdelare".to_string());
            Ok(())
        }

        fn save(&mut self) -> Result<Vec<u8>> {
            Ok(self.pages.join("\n").into_bytes())
        }
    }

    #[test]
    fn attachment_that_fails_to_copy_leaves_no_divider() {
        let dir = tempfile::tempdir().unwrap();
        let broken = dir.path().join("trasig.pdf");
        let good = dir.path().join("ok.pdf");
        std::fs::write(&broken, "trasig\nx1").unwrap();
        std::fs::write(&good, "o1\no2").unwrap();

        let mut doc = LabelDocument {
            pages: vec!["bas".to_string()],
            broken: false,
        };
        let mut warnings = Vec::new();
        let summary = merge_attachments(
            &mut doc,
            &[pending(&broken, "Trasig"), pending(&good, "Ok")],
            &mut warnings,
        )
        .unwrap();

        assert_eq!(summary, MergeSummary { merged: 1, pages_copied: 2 });
        assert_eq!(doc.pages, vec!["bas", "avdelare", "o1", "o2"]);
        assert!(matches!(
            warnings.as_slice(),
            [GenerationWarning::MergeSkipped { file_name, .. }] if file_name == "trasig.pdf"
        ));
    }

    #[test]
    fn long_purpose_wraps_on_divider() {
        let canvas = divider_page(&"Konferensresa ".repeat(12));
        assert!(canvas.fonts().all(|f| f == Font::Bold));
        assert!(!canvas.is_empty());
    }
}
