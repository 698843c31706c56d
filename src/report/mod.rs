// expense-report-service/src/report/mod.rs

mod embedder;
pub mod layout;
mod merger;

pub use embedder::{embed_attachments, PendingMerge};
pub use layout::LayoutEngine;
pub use merger::merge_attachments;
