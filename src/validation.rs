// expense-report-service/src/validation.rs

use crate::error::{ReportError, Result};
use crate::models::{
    Amount, CostCenter, ExpenseReport, LineItem, PaymentInfo, PaymentInfoInput, ReceiptInput,
    ReportSubmission,
};
use chrono::{DateTime, NaiveDate};

/// Turns a loosely typed submission into an `ExpenseReport` without
/// attachments. File references are checked against the receipt count here so
/// uploads are never stored for a submission that would be rejected anyway.
pub fn validate_submission(submission: &ReportSubmission) -> Result<ExpenseReport> {
    let personal = &submission.personal_info;
    if personal.date.trim().is_empty() || personal.name.trim().is_empty() {
        return Err(ReportError::MissingField("Datum och Namn krävs.".to_string()));
    }
    let report_date = parse_date(&personal.date)
        .ok_or_else(|| ReportError::ValidationError("Ogiltigt datumformat.".to_string()))?;

    if submission.receipts.is_empty() {
        return Err(ReportError::ValidationError("Minst ett kvitto krävs.".to_string()));
    }

    let line_items = submission
        .receipts
        .iter()
        .enumerate()
        .map(|(index, receipt)| validate_receipt(index + 1, receipt))
        .collect::<Result<Vec<_>>>()?;

    for file in &submission.files {
        if file.receipt_index >= line_items.len() {
            return Err(ReportError::ValidationError(format!(
                "Filen {} hänvisar till kvitto {} som inte finns.",
                file.file_name,
                file.receipt_index + 1
            )));
        }
    }

    let payment_info = validate_payment(&submission.payment_info)?;
    let email = non_empty(personal.email.as_deref());

    ExpenseReport::new(report_date, personal.name.trim(), email, line_items, payment_info)
}

fn validate_receipt(number: usize, receipt: &ReceiptInput) -> Result<LineItem> {
    if receipt.date.trim().is_empty() {
        return Err(ReportError::MissingField(format!("Datum krävs för kvitto {number}.")));
    }
    let date = parse_date(&receipt.date).ok_or_else(|| {
        ReportError::ValidationError(format!("Ogiltigt datumformat för kvitto {number}."))
    })?;

    if receipt.purpose.trim().is_empty() {
        return Err(ReportError::MissingField(format!("Ändamål krävs för kvitto {number}.")));
    }

    let cost_center: CostCenter = receipt.cost_center.parse()?;
    let custom_cost_center = non_empty(receipt.custom_cost_center.as_deref());
    if cost_center == CostCenter::Other && custom_cost_center.is_none() {
        return Err(ReportError::ValidationError(format!(
            "Ange kostnadsställe för \"Annat\" alternativet för kvitto {number}."
        )));
    }

    let total_cost = Amount::parse(&receipt.total_cost).ok_or_else(|| {
        ReportError::ValidationError(format!(
            "Totalkostnad krävs och måste vara ett nummer för kvitto {number}."
        ))
    })?;

    let vat = match non_empty(receipt.vat.as_deref()) {
        Some(raw) => Some(Amount::parse(&raw).ok_or_else(|| {
            ReportError::ValidationError(format!("Moms måste vara ett nummer för kvitto {number}."))
        })?),
        None => None,
    };

    Ok(LineItem {
        date,
        purpose: receipt.purpose.trim().to_string(),
        cost_center,
        custom_cost_center: if cost_center == CostCenter::Other { custom_cost_center } else { None },
        comment: non_empty(receipt.comment.as_deref()),
        total_cost,
        vat,
        attachments: Vec::new(),
    })
}

fn validate_payment(input: &PaymentInfoInput) -> Result<PaymentInfo> {
    let bank_name = non_empty(input.bank_name.as_deref());
    let clearing_number = non_empty(input.clearing_number.as_deref());
    let account_number = non_empty(input.account_number.as_deref());
    let other_method = non_empty(input.other_method.as_deref());

    let any_bank_field = bank_name.is_some() || clearing_number.is_some() || account_number.is_some();
    if any_bank_field {
        return match (bank_name, clearing_number, account_number) {
            (Some(bank_name), Some(clearing_number), Some(account_number)) => Ok(PaymentInfo::Bank {
                bank_name,
                clearing_number,
                account_number,
            }),
            _ => Err(ReportError::ValidationError(
                "Bankens namn, clearingnummer och kontonummer krävs för banköverföring.".to_string(),
            )),
        };
    }

    match other_method {
        Some(description) => Ok(PaymentInfo::Other { description }),
        None => Err(ReportError::MissingField("Betalningsinformation krävs.".to_string())),
    }
}

/// Accepts `YYYY-MM-DD` or a full RFC 3339 timestamp (date part is kept).
pub fn parse_date(input: &str) -> Option<NaiveDate> {
    let trimmed = input.trim();
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(trimmed).ok().map(|dt| dt.date_naive()))
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
