// expense-report-service/src/models.rs

use crate::error::{GenerationWarning, ReportError, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

// ============================================================
// Money
// ============================================================

/// Non-negative money value in hundredths (öre).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount(i64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    #[cfg(test)]
    pub fn from_minor(minor: i64) -> Self {
        Self(minor)
    }

    /// Parses `100`, `100.5`, `1 234,50` and similar user input. More than two
    /// fractional digits are rounded half-up.
    pub fn parse(input: &str) -> Option<Self> {
        let cleaned: String = input
            .trim()
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '\u{a0}')
            .map(|c| if c == ',' { '.' } else { c })
            .collect();
        if cleaned.is_empty() || cleaned.starts_with('-') {
            return None;
        }

        let cleaned = cleaned.strip_prefix('+').unwrap_or(&cleaned);
        let (whole, fraction) = match cleaned.split_once('.') {
            Some((whole, fraction)) => (whole, fraction),
            None => (cleaned, ""),
        };
        if whole.is_empty() && fraction.is_empty() {
            return None;
        }
        if !whole.chars().all(|c| c.is_ascii_digit()) || !fraction.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }

        let units: i64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
        let digits: Vec<i64> = fraction.bytes().map(|b| i64::from(b - b'0')).collect();
        let mut cents = digits.first().copied().unwrap_or(0) * 10 + digits.get(1).copied().unwrap_or(0);
        if digits.get(2).copied().unwrap_or(0) >= 5 {
            cents += 1;
        }

        units.checked_mul(100)?.checked_add(cents).map(Amount)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl Amount {
    pub fn checked_add(self, rhs: Amount) -> Option<Amount> {
        self.0.checked_add(rhs.0).map(Amount)
    }

    /// `None` when the total does not fit.
    pub fn checked_sum(amounts: impl IntoIterator<Item = Amount>) -> Option<Amount> {
        amounts
            .into_iter()
            .try_fold(Amount::ZERO, Amount::checked_add)
    }
}

// ============================================================
// Report structure
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CostCenter {
    #[serde(rename = "Missionen /11")]
    Missionen,
    #[serde(rename = "Församlingen /21")]
    Forsamlingen,
    #[serde(rename = "Barn /22")]
    Barn,
    #[serde(rename = "Ungdom /23")]
    Ungdom,
    #[serde(rename = "UngaVuxna /24")]
    UngaVuxna,
    #[serde(rename = "Musik /25")]
    Musik,
    #[serde(rename = "Teknik /26")]
    Teknik,
    #[serde(rename = "Fastighet /41")]
    Fastighet,
    /// Free-text escape hatch; requires a custom label.
    #[serde(rename = "Annat")]
    Other,
}

impl CostCenter {
    pub const ALL: [CostCenter; 9] = [
        CostCenter::Missionen,
        CostCenter::Forsamlingen,
        CostCenter::Barn,
        CostCenter::Ungdom,
        CostCenter::UngaVuxna,
        CostCenter::Musik,
        CostCenter::Teknik,
        CostCenter::Fastighet,
        CostCenter::Other,
    ];

    pub fn label(self) -> &'static str {
        match self {
            CostCenter::Missionen => "Missionen /11",
            CostCenter::Forsamlingen => "Församlingen /21",
            CostCenter::Barn => "Barn /22",
            CostCenter::Ungdom => "Ungdom /23",
            CostCenter::UngaVuxna => "UngaVuxna /24",
            CostCenter::Musik => "Musik /25",
            CostCenter::Teknik => "Teknik /26",
            CostCenter::Fastighet => "Fastighet /41",
            CostCenter::Other => "Annat",
        }
    }
}

impl FromStr for CostCenter {
    type Err = ReportError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        CostCenter::ALL
            .into_iter()
            .find(|cc| cc.label().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| ReportError::ValidationError(format!("Okänt kostnadsställe: {wanted}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    RasterImage,
    PdfDocument,
    Heic,
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub storage_path: PathBuf,
    pub original_filename: String,
    pub mime_type: String,
}

impl Attachment {
    pub fn new(storage_path: impl Into<PathBuf>, original_filename: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            storage_path: storage_path.into(),
            original_filename: original_filename.into(),
            mime_type: mime_type.into(),
        }
    }

    /// Classified by MIME type only; the file extension is never consulted.
    pub fn kind(&self) -> AttachmentKind {
        let essence = self
            .mime_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "image/jpeg" | "image/jpg" | "image/png" => AttachmentKind::RasterImage,
            "application/pdf" => AttachmentKind::PdfDocument,
            "image/heic" | "image/heif" => AttachmentKind::Heic,
            _ => AttachmentKind::Unsupported,
        }
    }

    pub fn path(&self) -> &Path {
        &self.storage_path
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineItem {
    pub date: NaiveDate,
    pub purpose: String,
    pub cost_center: CostCenter,
    pub custom_cost_center: Option<String>,
    pub comment: Option<String>,
    pub total_cost: Amount,
    pub vat: Option<Amount>,
    pub attachments: Vec<Attachment>,
}

impl LineItem {
    /// The text shown in the cost center column.
    pub fn cost_center_text(&self) -> &str {
        match (self.cost_center, self.custom_cost_center.as_deref()) {
            (CostCenter::Other, Some(label)) => label,
            (cc, _) => cc.label(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum PaymentInfo {
    Bank {
        bank_name: String,
        clearing_number: String,
        account_number: String,
    },
    Other {
        description: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExpenseReport {
    report_date: NaiveDate,
    submitter_name: String,
    submitter_email: Option<String>,
    line_items: Vec<LineItem>,
    total_amount: Amount,
    total_vat: Option<Amount>,
    payment_info: PaymentInfo,
}

impl ExpenseReport {
    /// Totals are derived from the line items here and nowhere else.
    pub fn new(
        report_date: NaiveDate,
        submitter_name: impl Into<String>,
        submitter_email: Option<String>,
        line_items: Vec<LineItem>,
        payment_info: PaymentInfo,
    ) -> Result<Self> {
        if line_items.is_empty() {
            return Err(ReportError::ValidationError("Minst ett kvitto krävs.".to_string()));
        }
        for (index, item) in line_items.iter().enumerate() {
            let label_missing = item
                .custom_cost_center
                .as_deref()
                .map_or(true, |label| label.trim().is_empty());
            if item.cost_center == CostCenter::Other && label_missing {
                return Err(ReportError::ValidationError(format!(
                    "Ange kostnadsställe för \"Annat\" alternativet för kvitto {}.",
                    index + 1
                )));
            }
        }

        let too_large = || ReportError::ValidationError("Totalbeloppet är för stort.".to_string());
        let total_amount = Amount::checked_sum(line_items.iter().map(|item| item.total_cost)).ok_or_else(too_large)?;
        let total_vat = if line_items.iter().any(|item| item.vat.is_some()) {
            Some(Amount::checked_sum(line_items.iter().filter_map(|item| item.vat)).ok_or_else(too_large)?)
        } else {
            None
        };

        Ok(Self {
            report_date,
            submitter_name: submitter_name.into(),
            submitter_email,
            line_items,
            total_amount,
            total_vat,
            payment_info,
        })
    }

    pub fn report_date(&self) -> NaiveDate {
        self.report_date
    }

    pub fn submitter_name(&self) -> &str {
        &self.submitter_name
    }

    pub fn submitter_email(&self) -> Option<&str> {
        self.submitter_email.as_deref()
    }

    pub fn line_items(&self) -> &[LineItem] {
        &self.line_items
    }

    pub fn total_amount(&self) -> Amount {
        self.total_amount
    }

    /// `Some` only when at least one line item carries VAT.
    pub fn total_vat(&self) -> Option<Amount> {
        self.total_vat
    }

    pub fn tracks_vat(&self) -> bool {
        self.total_vat.is_some()
    }

    pub fn payment_info(&self) -> &PaymentInfo {
        &self.payment_info
    }

    pub fn attachments(&self) -> impl Iterator<Item = (&LineItem, &Attachment)> {
        self.line_items
            .iter()
            .flat_map(|item| item.attachments.iter().map(move |att| (item, att)))
    }

    pub fn attach(&mut self, line_item: usize, attachment: Attachment) -> Result<()> {
        let count = self.line_items.len();
        let item = self.line_items.get_mut(line_item).ok_or_else(|| {
            ReportError::ValidationError(format!(
                "Bilaga {} hör till kvitto {} men rapporten har {} kvitton.",
                attachment.original_filename,
                line_item + 1,
                count
            ))
        })?;
        item.attachments.push(attachment);
        Ok(())
    }

    /// Totals are not recomputed; only attachments may be touched through this.
    pub(crate) fn line_items_mut(&mut self) -> &mut [LineItem] {
        &mut self.line_items
    }
}

// ============================================================
// Pipeline results
// ============================================================

/// Request-scoped data handed to the pipeline. Nothing survives between calls.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub received_at: DateTime<Utc>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            received_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GeneratedDocument {
    pub path: PathBuf,
    pub file_name: String,
    pub size_bytes: u64,
    pub sha256: String,
    pub page_count: usize,
}

#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub document: GeneratedDocument,
    pub warnings: Vec<GenerationWarning>,
}

// ============================================================
// Wire formats
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionAction {
    Preview,
    Finalize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportSubmission {
    pub action: SubmissionAction,
    pub personal_info: PersonalInfoInput,
    #[serde(default)]
    pub receipts: Vec<ReceiptInput>,
    #[serde(default)]
    pub payment_info: PaymentInfoInput,
    #[serde(default)]
    pub files: Vec<FileUpload>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonalInfoInput {
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub name: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReceiptInput {
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub purpose: String,
    #[serde(default)]
    pub cost_center: String,
    pub custom_cost_center: Option<String>,
    pub comment: Option<String>,
    #[serde(default)]
    pub total_cost: String,
    pub vat: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaymentInfoInput {
    pub bank_name: Option<String>,
    pub clearing_number: Option<String>,
    pub account_number: Option<String>,
    pub other_method: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileUpload {
    /// Zero-based index of the receipt this file documents.
    pub receipt_index: usize,
    pub file_name: String,
    pub mime_type: String,
    pub content_base64: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmissionResponse {
    pub request_id: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<SubmissionAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<GeneratedDocument>,
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    pub generated_at: DateTime<Utc>,
}

impl SubmissionResponse {
    pub fn success(
        request_id: String,
        action: SubmissionAction,
        document: GeneratedDocument,
        warnings: &[GenerationWarning],
    ) -> Self {
        Self {
            request_id,
            status: "success".to_string(),
            action: Some(action),
            document: Some(document),
            warnings: warnings.iter().map(ToString::to_string).collect(),
            error: None,
            error_type: None,
            generated_at: Utc::now(),
        }
    }

    pub fn error(request_id: String, action: Option<SubmissionAction>, error: &ReportError) -> Self {
        let response = error.to_error_response();
        Self {
            request_id,
            status: "error".to_string(),
            action,
            document: None,
            warnings: vec![],
            error: Some(response.error),
            error_type: Some(response.error_type),
            generated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(cost: i64, vat: Option<i64>) -> LineItem {
        LineItem {
            date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            purpose: "Fika".to_string(),
            cost_center: CostCenter::Barn,
            custom_cost_center: None,
            comment: None,
            total_cost: Amount::from_minor(cost),
            vat: vat.map(Amount::from_minor),
            attachments: vec![],
        }
    }

    fn bank() -> PaymentInfo {
        PaymentInfo::Bank {
            bank_name: "Swedbank".to_string(),
            clearing_number: "8327-9".to_string(),
            account_number: "123456789".to_string(),
        }
    }

    #[test]
    fn amount_parsing_accepts_common_inputs() {
        assert_eq!(Amount::parse("100"), Some(Amount::from_minor(10000)));
        assert_eq!(Amount::parse("100.5"), Some(Amount::from_minor(10050)));
        assert_eq!(Amount::parse("1 234,56"), Some(Amount::from_minor(123456)));
        assert_eq!(Amount::parse("0.125"), Some(Amount::from_minor(13)));
        assert_eq!(Amount::parse(".5"), Some(Amount::from_minor(50)));
        assert_eq!(Amount::parse("-3"), None);
        assert_eq!(Amount::parse("abc"), None);
        assert_eq!(Amount::parse(""), None);
        assert_eq!(Amount::parse("."), None);
    }

    #[test]
    fn amount_always_formats_two_decimals() {
        assert_eq!(Amount::from_minor(10000).to_string(), "100.00");
        assert_eq!(Amount::from_minor(5).to_string(), "0.05");
        assert_eq!(Amount::from_minor(123450).to_string(), "1234.50");
    }

    #[test]
    fn totals_are_computed_from_line_items() {
        let report = ExpenseReport::new(
            NaiveDate::from_ymd_opt(2024, 3, 2).unwrap(),
            "Anna",
            None,
            vec![item(10000, Some(2000)), item(2550, None)],
            bank(),
        )
        .unwrap();
        assert_eq!(report.total_amount(), Amount::from_minor(12550));
        assert_eq!(report.total_vat(), Some(Amount::from_minor(2000)));
        assert!(report.tracks_vat());
    }

    #[test]
    fn overflowing_total_is_rejected() {
        let huge = i64::MAX / 2 + 1;
        let err = ExpenseReport::new(
            NaiveDate::from_ymd_opt(2024, 3, 2).unwrap(),
            "Anna",
            None,
            vec![item(huge, None), item(huge, None)],
            bank(),
        )
        .unwrap_err();
        assert!(matches!(err, ReportError::ValidationError(_)));

        let vat_err = ExpenseReport::new(
            NaiveDate::from_ymd_opt(2024, 3, 2).unwrap(),
            "Anna",
            None,
            vec![item(100, Some(huge)), item(100, Some(huge))],
            bank(),
        )
        .unwrap_err();
        assert!(matches!(vat_err, ReportError::ValidationError(_)));
    }

    #[test]
    fn vat_is_untracked_when_no_item_has_it() {
        let report = ExpenseReport::new(
            NaiveDate::from_ymd_opt(2024, 3, 2).unwrap(),
            "Anna",
            None,
            vec![item(100, None)],
            bank(),
        )
        .unwrap();
        assert_eq!(report.total_vat(), None);
    }

    #[test]
    fn other_cost_center_requires_label() {
        let mut other = item(100, None);
        other.cost_center = CostCenter::Other;
        other.custom_cost_center = Some("  ".to_string());
        let err = ExpenseReport::new(NaiveDate::from_ymd_opt(2024, 3, 2).unwrap(), "Anna", None, vec![other], bank())
            .unwrap_err();
        assert!(matches!(err, ReportError::ValidationError(_)));
    }

    #[test]
    fn custom_label_replaces_other() {
        let mut other = item(100, None);
        other.cost_center = CostCenter::Other;
        other.custom_cost_center = Some("Läger".to_string());
        assert_eq!(other.cost_center_text(), "Läger");
        assert_eq!(item(100, None).cost_center_text(), "Barn /22");
    }

    #[test]
    fn attachment_kind_follows_mime_type_not_extension() {
        let att = Attachment::new("/tmp/x.png", "kvitto.png", "application/pdf");
        assert_eq!(att.kind(), AttachmentKind::PdfDocument);
        let heic = Attachment::new("/tmp/x", "IMG_1.HEIC", "image/heic");
        assert_eq!(heic.kind(), AttachmentKind::Heic);
        let jpg = Attachment::new("/tmp/x", "a", "IMAGE/JPEG; charset=binary");
        assert_eq!(jpg.kind(), AttachmentKind::RasterImage);
        let txt = Attachment::new("/tmp/x", "a.txt", "text/plain");
        assert_eq!(txt.kind(), AttachmentKind::Unsupported);
    }

    #[test]
    fn cost_center_parses_labels() {
        assert_eq!("Musik /25".parse::<CostCenter>().unwrap(), CostCenter::Musik);
        assert_eq!("annat".parse::<CostCenter>().unwrap(), CostCenter::Other);
        assert!("Kyrkan /99".parse::<CostCenter>().is_err());
    }

    #[test]
    fn attach_rejects_unknown_line_item() {
        let mut report = ExpenseReport::new(
            NaiveDate::from_ymd_opt(2024, 3, 2).unwrap(),
            "Anna",
            None,
            vec![item(100, None)],
            bank(),
        )
        .unwrap();
        let att = Attachment::new("/tmp/a.png", "a.png", "image/png");
        assert!(report.attach(1, att.clone()).is_err());
        report.attach(0, att).unwrap();
        assert_eq!(report.attachments().count(), 1);
    }
}
