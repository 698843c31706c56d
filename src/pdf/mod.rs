// expense-report-service/src/pdf/mod.rs

mod canvas;
mod document;
pub mod fonts;
mod raster;

use crate::error::Result;

pub use canvas::{fit_within, Canvas, PAGE_HEIGHT, PAGE_WIDTH};
pub use document::PdfDocument;
pub use fonts::Font;
pub use raster::RasterImage;

/// The page-level operations the report pipeline needs from a PDF library.
pub trait StructuredDocument: Sized {
    /// A document with no pages.
    fn blank() -> Self;

    fn load_from_bytes(bytes: &[u8]) -> Result<Self>;

    fn page_count(&self) -> usize;

    /// Appends every page of `source`, returning how many were copied.
    fn copy_pages(&mut self, source: Self) -> Result<usize>;

    fn add_page(&mut self, canvas: Canvas) -> Result<()>;

    fn save(&mut self) -> Result<Vec<u8>>;
}

/// Text drawn on each page, one entry per text-showing operation.
#[cfg(test)]
pub(crate) fn page_texts(bytes: &[u8]) -> Vec<Vec<String>> {
    use lopdf::content::Content;
    use lopdf::{Document, Object};

    let doc = Document::load_mem(bytes).expect("valid pdf");
    doc.get_pages()
        .values()
        .map(|page_id| {
            let raw = doc.get_page_content(*page_id).unwrap_or_default();
            let content = Content::decode(&raw).expect("decodable content");
            content
                .operations
                .iter()
                .filter(|op| op.operator == "Tj")
                .filter_map(|op| match op.operands.first() {
                    Some(Object::String(bytes, _)) => Some(fonts::decode_win_ansi(bytes)),
                    _ => None,
                })
                .collect()
        })
        .collect()
}
