// expense-report-service/src/error.rs

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ReportError>;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("PDF error: {0}")]
    PdfError(#[from] lopdf::Error),

    #[error("Image error: {0}")]
    ImageError(#[from] image::ImageError),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Base64 decoding error: {0}")]
    Base64Error(#[from] base64::DecodeError),

    #[error("Template error: {0}")]
    TemplateError(#[from] handlebars::TemplateError),

    #[error("Rendering error: {0}")]
    RenderError(#[from] handlebars::RenderError),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Unsupported attachment type: {0}")]
    UnsupportedMediaType(String),

    #[error("Attachment {name} exceeds the upload limit ({size} bytes)")]
    AttachmentTooLarge { name: String, size: usize },

    #[error("Conversion failed: {0}")]
    ConversionFailed(String),

    #[error("Base document at {} could not be loaded: {reason}", path.display())]
    BaseDocumentUnreadable { path: PathBuf, reason: String },

    #[error("Delivery failed: {0}")]
    DeliveryFailed(String),

    #[error("Generation failed: {0}")]
    GenerationFailed(String),
}

impl ReportError {
    pub fn to_error_response(&self) -> ErrorResponse {
        ErrorResponse {
            error: self.to_string(),
            error_type: self.error_type().to_string(),
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            ReportError::IoError(_) => "io_error",
            ReportError::PdfError(_) => "pdf_error",
            ReportError::ImageError(_) => "image_error",
            ReportError::SerializationError(_) => "serialization_error",
            ReportError::Base64Error(_) => "base64_error",
            ReportError::TemplateError(_) => "template_error",
            ReportError::RenderError(_) => "render_error",
            ReportError::ValidationError(_) => "validation_error",
            ReportError::MissingField(_) => "missing_field",
            ReportError::UnsupportedMediaType(_) => "unsupported_media_type",
            ReportError::AttachmentTooLarge { .. } => "attachment_too_large",
            ReportError::ConversionFailed(_) => "conversion_failed",
            ReportError::BaseDocumentUnreadable { .. } => "base_document_unreadable",
            ReportError::DeliveryFailed(_) => "delivery_failed",
            ReportError::GenerationFailed(_) => "generation_failed",
        }
    }
}

#[derive(Debug, serde::Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_type: String,
}

/// A per-element failure that was skipped so the rest of the report could
/// still be generated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GenerationWarning {
    AssetMissing { path: PathBuf },
    ConversionFailure { file_name: String, reason: String },
    ImageUnreadable { file_name: String, reason: String },
    UnsupportedAttachment { file_name: String, mime_type: String },
    MergeSkipped { file_name: String, reason: String },
}

impl fmt::Display for GenerationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerationWarning::AssetMissing { path } => {
                write!(f, "asset not found: {}", path.display())
            }
            GenerationWarning::ConversionFailure { file_name, reason } => {
                write!(f, "could not convert {file_name}: {reason}")
            }
            GenerationWarning::ImageUnreadable { file_name, reason } => {
                write!(f, "could not embed image {file_name}: {reason}")
            }
            GenerationWarning::UnsupportedAttachment { file_name, mime_type } => {
                write!(f, "skipped {file_name}: unsupported type {mime_type}")
            }
            GenerationWarning::MergeSkipped { file_name, reason } => {
                write!(f, "could not merge {file_name}: {reason}")
            }
        }
    }
}
