// expense-report-service/src/report/embedder.rs

use crate::error::{GenerationWarning, Result};
use crate::models::{AttachmentKind, ExpenseReport};
use crate::pdf::fonts::{clamp_lines, wrap_text};
use crate::pdf::{fit_within, Canvas, Font, PdfDocument, RasterImage, StructuredDocument, PAGE_WIDTH};
use crate::report::layout::MARGIN;
use std::path::PathBuf;
use tracing::{debug, warn};

const CAPTION_SIZE: f32 = 10.0;
const CAPTION_MAX_LINES: usize = 2;
const IMAGE_TOP: f32 = 80.0;
const IMAGE_BOX_WIDTH: f32 = 500.0;
const IMAGE_BOX_HEIGHT: f32 = 600.0;

/// A PDF attachment waiting to be merged behind the base pages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMerge {
    pub path: PathBuf,
    pub purpose: String,
    pub file_name: String,
}

#[derive(Debug, Default)]
pub struct Embedded {
    pub image_pages: usize,
    pub pending_merges: Vec<PendingMerge>,
}

/// Walks attachments in line item order, then attachment order. Each
/// readable image becomes one page; PDFs are collected for the merger.
pub fn embed_attachments(
    doc: &mut PdfDocument,
    report: &ExpenseReport,
    warnings: &mut Vec<GenerationWarning>,
) -> Result<Embedded> {
    let mut embedded = Embedded::default();

    for (item, attachment) in report.attachments() {
        match attachment.kind() {
            AttachmentKind::RasterImage => {
                let image = match RasterImage::load(attachment.path()) {
                    Ok(image) => image,
                    Err(e) => {
                        let warning = if attachment.path().exists() {
                            GenerationWarning::ImageUnreadable {
                                file_name: attachment.original_filename.clone(),
                                reason: e.to_string(),
                            }
                        } else {
                            GenerationWarning::AssetMissing {
                                path: attachment.storage_path.clone(),
                            }
                        };
                        warn!(%warning, "Skipping image attachment");
                        warnings.push(warning);
                        continue;
                    }
                };
                let page = image_page(doc, &image, &item.purpose);
                doc.add_page(page)?;
                embedded.image_pages += 1;
                debug!(file = %attachment.original_filename, "Embedded image attachment");
            }
            AttachmentKind::PdfDocument => {
                embedded.pending_merges.push(PendingMerge {
                    path: attachment.storage_path.clone(),
                    purpose: item.purpose.clone(),
                    file_name: attachment.original_filename.clone(),
                });
            }
            AttachmentKind::Heic | AttachmentKind::Unsupported => {
                let warning = GenerationWarning::UnsupportedAttachment {
                    file_name: attachment.original_filename.clone(),
                    mime_type: attachment.mime_type.clone(),
                };
                warn!(%warning, "Skipping attachment");
                warnings.push(warning);
            }
        }
    }

    Ok(embedded)
}

fn image_page(doc: &mut PdfDocument, image: &RasterImage, purpose: &str) -> Canvas {
    let mut canvas = Canvas::letter();
    let max_width = PAGE_WIDTH - 2.0 * MARGIN;
    let caption = wrap_text(Font::Bold, CAPTION_SIZE, &format!("Kvitto: {purpose}"), max_width);
    let caption = clamp_lines(Font::Bold, CAPTION_SIZE, caption, CAPTION_MAX_LINES, max_width);
    canvas.text_lines(Font::Bold, CAPTION_SIZE, MARGIN, MARGIN, &caption);

    let handle = doc.register_image(image);
    let (width, height) = fit_within(image.width, image.height, IMAGE_BOX_WIDTH, IMAGE_BOX_HEIGHT);
    let x = (PAGE_WIDTH - width) / 2.0;
    let top = IMAGE_TOP + (IMAGE_BOX_HEIGHT - height) / 2.0;
    canvas.image(&handle, x, top, width, height);
    canvas
}
