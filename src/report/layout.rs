// expense-report-service/src/report/layout.rs

use crate::config::ReportConfig;
use crate::error::{GenerationWarning, Result};
use crate::models::{ExpenseReport, LineItem, PaymentInfo};
use crate::pdf::fonts::{block_height, clamp_lines, wrap_text};
use crate::pdf::{fit_within, Canvas, Font, PdfDocument, RasterImage, StructuredDocument, PAGE_HEIGHT, PAGE_WIDTH};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const MARGIN: f32 = 50.0;
/// Top of the table header on the first page, independent of the logo.
pub const TABLE_TOP: f32 = 200.0;
pub const ROW_SPACING: f32 = 8.0;
pub const CELL_FONT_SIZE: f32 = 8.0;
/// A cell longer than this is cut and ends with an ellipsis.
pub const MAX_CELL_LINES: usize = 40;

const CONTENT_RIGHT: f32 = PAGE_WIDTH - MARGIN;
const HEADER_RULE_OFFSET: f32 = 15.0;
const FIRST_ROW_OFFSET: f32 = 25.0;
const CELL_PADDING: f32 = 6.0;

const LOGO_WIDTH: f32 = 150.0;
const LOGO_TOP: f32 = 45.0;
const TITLE_SIZE: f32 = 16.0;
const DISCLAIMER_SIZE: f32 = 6.0;
const BODY_SIZE: f32 = 10.0;
const HEADING_SIZE: f32 = 12.0;
const IDENTITY_TOP: f32 = 120.0;
const IDENTITY_STEP: f32 = 20.0;
/// Keeps a tall logo clear of the identity lines.
const LOGO_MAX_HEIGHT: f32 = IDENTITY_TOP - LOGO_TOP - 5.0;

const BAND_GAP: f32 = 20.0;
const BAND_HEADING_OFFSET: f32 = 25.0;
const BAND_LINE_STEP: f32 = 20.0;
const FOOTER_SIZE: f32 = 7.0;
const FOOTER_RULE_GAP: f32 = 6.0;
const FOOTER_CLEARANCE: f32 = 12.0;

const COLUMNS_WITH_VAT: [f32; 6] = [60.0, 112.0, 90.0, 120.0, 70.0, 60.0];
const COLUMNS_WITHOUT_VAT: [f32; 5] = [60.0, 132.0, 100.0, 140.0, 80.0];
const HEADINGS: [&str; 6] = ["Datum", "Ändamål", "Kostnadsställe", "Kommentar", "Totalkostnad", "Moms"];

const MISSING: &str = "-";

/// One measured table row: wrapped lines per cell and the tallest cell's
/// height.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRow {
    pub cells: Vec<Vec<String>>,
    pub height: f32,
}

/// Where a row, table header or band lands: page index and distance from
/// the top of that page.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub page: usize,
    pub top: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayoutPlan {
    pub columns: Vec<f32>,
    pub rows: Vec<TableRow>,
    pub row_placements: Vec<Placement>,
    pub table_headers: Vec<Placement>,
    pub summary: Placement,
    pub payment: Placement,
    pub page_count: usize,
    /// Lowest point table rows and bands may reach on any base page.
    pub content_bottom: f32,
}

/// Lays out the base pages of a report: header, identity, line item table,
/// summary, payment details and a footer on every page.
pub struct LayoutEngine {
    label: String,
    disclaimer: String,
    currency: String,
    footer_lines: Vec<String>,
    asset_dir: PathBuf,
}

impl LayoutEngine {
    pub fn new(report: &ReportConfig, asset_dir: &Path) -> Self {
        Self {
            label: report.label.clone(),
            disclaimer: report.disclaimer.clone(),
            currency: report.currency.clone(),
            footer_lines: report.footer_lines.clone(),
            asset_dir: asset_dir.to_path_buf(),
        }
    }

    pub fn format_amount(&self, amount: impl std::fmt::Display) -> String {
        format!("{amount} {}", self.currency)
    }

    /// Measures every row and decides page breaks. Pure: the same report
    /// always yields the same plan.
    pub fn plan(&self, report: &ExpenseReport) -> LayoutPlan {
        let columns: Vec<f32> = if report.tracks_vat() {
            COLUMNS_WITH_VAT.to_vec()
        } else {
            COLUMNS_WITHOUT_VAT.to_vec()
        };
        let rows: Vec<TableRow> = report
            .line_items()
            .iter()
            .map(|item| measure_row(&self.row_cells(item, report.tracks_vat()), &columns))
            .collect();

        let content_bottom = self.footer_top() - FOOTER_CLEARANCE;
        let mut page = 0;
        let mut table_headers = vec![Placement { page, top: TABLE_TOP }];
        let mut cursor = TABLE_TOP + FIRST_ROW_OFFSET;
        let mut row_placements = Vec::with_capacity(rows.len());

        for row in &rows {
            if cursor + row.height > content_bottom {
                page += 1;
                table_headers.push(Placement { page, top: MARGIN });
                cursor = MARGIN + FIRST_ROW_OFFSET;
            }
            row_placements.push(Placement { page, top: cursor });
            cursor += row.height + ROW_SPACING;
        }

        let mut summary_top = cursor - ROW_SPACING + BAND_GAP;
        let summary_height = band_height(if report.tracks_vat() { 2 } else { 1 });
        if summary_top + summary_height > content_bottom {
            page += 1;
            summary_top = MARGIN;
        }
        let summary = Placement { page, top: summary_top };

        let mut payment_top = summary_top + summary_height + BAND_GAP;
        let payment_height = band_height(4);
        if payment_top + payment_height > content_bottom {
            page += 1;
            payment_top = MARGIN;
        }
        let payment = Placement { page, top: payment_top };

        LayoutPlan {
            columns,
            rows,
            row_placements,
            table_headers,
            summary,
            payment,
            page_count: page + 1,
            content_bottom,
        }
    }

    /// Draws the base pages into `doc` and returns the plan they follow.
    /// A missing or unreadable logo is recorded and the header is drawn
    /// without it.
    pub fn render(
        &self,
        doc: &mut PdfDocument,
        report: &ExpenseReport,
        warnings: &mut Vec<GenerationWarning>,
    ) -> Result<LayoutPlan> {
        let plan = self.plan(report);
        let mut pages: Vec<Canvas> = (0..plan.page_count).map(|_| Canvas::letter()).collect();

        self.draw_header(doc, &mut pages[0], warnings);
        self.draw_identity(&mut pages[0], report);

        for header in &plan.table_headers {
            draw_table_header(&mut pages[header.page], &plan.columns, header.top);
        }
        for (row, placement) in plan.rows.iter().zip(&plan.row_placements) {
            draw_row(&mut pages[placement.page], &plan.columns, row, placement.top);
        }

        self.draw_summary(&mut pages[plan.summary.page], report, plan.summary.top);
        self.draw_payment(&mut pages[plan.payment.page], report.payment_info(), plan.payment.top);

        for canvas in &mut pages {
            self.draw_footer(canvas);
        }
        for canvas in pages {
            doc.add_page(canvas)?;
        }

        debug!(
            rows = plan.rows.len(),
            pages = plan.page_count,
            "Laid out report base pages"
        );
        Ok(plan)
    }

    fn row_cells(&self, item: &LineItem, with_vat: bool) -> Vec<String> {
        let mut cells = vec![
            item.date.format("%Y-%m-%d").to_string(),
            item.purpose.clone(),
            item.cost_center_text().to_string(),
            item.comment
                .as_deref()
                .filter(|c| !c.trim().is_empty())
                .unwrap_or(MISSING)
                .to_string(),
            self.format_amount(item.total_cost),
        ];
        if with_vat {
            cells.push(
                item.vat
                    .map(|vat| self.format_amount(vat))
                    .unwrap_or_else(|| MISSING.to_string()),
            );
        }
        cells
    }

    fn footer_top(&self) -> f32 {
        if self.footer_lines.is_empty() {
            return PAGE_HEIGHT - MARGIN;
        }
        PAGE_HEIGHT - MARGIN - block_height(FOOTER_SIZE, self.footer_lines.len())
    }

    fn draw_header(&self, doc: &mut PdfDocument, canvas: &mut Canvas, warnings: &mut Vec<GenerationWarning>) {
        match self.load_logo() {
            Ok(logo) => {
                let handle = doc.register_image(&logo);
                let (width, height) = fit_within(logo.width, logo.height, LOGO_WIDTH, LOGO_MAX_HEIGHT);
                canvas.image(&handle, MARGIN, LOGO_TOP, width, height);
            }
            Err(warning) => {
                warn!(%warning, "Drawing header without logo");
                warnings.push(warning);
            }
        }

        canvas.text_right(Font::Bold, TITLE_SIZE, CONTENT_RIGHT, 50.0, &self.label);
        canvas.text_right(Font::Regular, DISCLAIMER_SIZE, CONTENT_RIGHT, 70.0, &self.disclaimer);
    }

    fn load_logo(&self) -> std::result::Result<RasterImage, GenerationWarning> {
        let candidates = [self.asset_dir.join("logo.png"), self.asset_dir.join("logo.jpg")];
        let Some(path) = candidates.iter().find(|p| p.is_file()) else {
            return Err(GenerationWarning::AssetMissing {
                path: candidates[0].clone(),
            });
        };
        RasterImage::load(path).map_err(|e| GenerationWarning::ImageUnreadable {
            file_name: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    fn draw_identity(&self, canvas: &mut Canvas, report: &ExpenseReport) {
        let mut lines = vec![
            format!("Datum: {}", report.report_date().format("%Y-%m-%d")),
            format!("Namn: {}", report.submitter_name()),
        ];
        if let Some(email) = report.submitter_email() {
            lines.push(format!("E-post: {email}"));
        }
        for (i, line) in lines.iter().enumerate() {
            canvas.text(Font::Regular, BODY_SIZE, MARGIN, IDENTITY_TOP + IDENTITY_STEP * i as f32, line);
        }
    }

    fn draw_summary(&self, canvas: &mut Canvas, report: &ExpenseReport, top: f32) {
        let mut lines = vec![format!("Totalt belopp: {}", self.format_amount(report.total_amount()))];
        if let Some(vat) = report.total_vat() {
            lines.push(format!("Moms: {}", self.format_amount(vat)));
        }
        draw_band(canvas, "Sammanfattning", &lines, top);
    }

    fn draw_payment(&self, canvas: &mut Canvas, payment: &PaymentInfo, top: f32) {
        let (bank, clearing, account, other) = match payment {
            PaymentInfo::Bank {
                bank_name,
                clearing_number,
                account_number,
            } => (bank_name.as_str(), clearing_number.as_str(), account_number.as_str(), MISSING),
            PaymentInfo::Other { description } => (MISSING, MISSING, MISSING, description.as_str()),
        };
        let lines = [
            format!("Bankens namn: {}", or_missing(bank)),
            format!("Clearingnummer: {}", or_missing(clearing)),
            format!("Kontonummer: {}", or_missing(account)),
            format!("Annat sätt: {}", or_missing(other)),
        ];
        draw_band(canvas, "Betalningsinformation", &lines, top);
    }

    fn draw_footer(&self, canvas: &mut Canvas) {
        if self.footer_lines.is_empty() {
            return;
        }
        let top = self.footer_top();
        canvas.rule(MARGIN, CONTENT_RIGHT, top - FOOTER_RULE_GAP, 0.5);
        canvas.text_lines(Font::Regular, FOOTER_SIZE, MARGIN, top, &self.footer_lines);
    }
}

fn or_missing(value: &str) -> &str {
    if value.trim().is_empty() {
        MISSING
    } else {
        value
    }
}

fn measure_row(cells: &[String], columns: &[f32]) -> TableRow {
    let cells: Vec<Vec<String>> = cells
        .iter()
        .zip(columns)
        .map(|(text, width)| {
            let max_width = width - CELL_PADDING;
            let lines = wrap_text(Font::Regular, CELL_FONT_SIZE, text, max_width);
            clamp_lines(Font::Regular, CELL_FONT_SIZE, lines, MAX_CELL_LINES, max_width)
        })
        .collect();
    let height = cells
        .iter()
        .map(|lines| block_height(CELL_FONT_SIZE, lines.len()))
        .fold(0.0, f32::max);
    TableRow { cells, height }
}

fn band_height(lines: usize) -> f32 {
    BAND_HEADING_OFFSET + BAND_LINE_STEP * lines as f32
}

fn draw_table_header(canvas: &mut Canvas, columns: &[f32], top: f32) {
    let mut x = MARGIN;
    for (heading, width) in HEADINGS.iter().zip(columns) {
        canvas.text(Font::Bold, CELL_FONT_SIZE, x, top, heading);
        x += width;
    }
    canvas.rule(MARGIN, CONTENT_RIGHT, top + HEADER_RULE_OFFSET, 1.0);
}

fn draw_row(canvas: &mut Canvas, columns: &[f32], row: &TableRow, top: f32) {
    let mut x = MARGIN;
    for (lines, width) in row.cells.iter().zip(columns) {
        canvas.text_lines(Font::Regular, CELL_FONT_SIZE, x, top, lines);
        x += width;
    }
}

fn draw_band(canvas: &mut Canvas, heading: &str, lines: &[String], top: f32) {
    canvas.text(Font::Bold, HEADING_SIZE, MARGIN, top, heading);
    for (i, line) in lines.iter().enumerate() {
        let line_top = top + BAND_HEADING_OFFSET + BAND_LINE_STEP * i as f32;
        canvas.text(Font::Regular, BODY_SIZE, MARGIN, line_top, line);
    }
}
