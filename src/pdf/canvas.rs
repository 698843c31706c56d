// expense-report-service/src/pdf/canvas.rs

use crate::pdf::fonts::{self, Font, ASCENT_FACTOR};
use lopdf::content::Operation;
use lopdf::{Object, StringFormat};
use std::collections::BTreeSet;

/// US Letter in points.
pub const PAGE_WIDTH: f32 = 612.0;
pub const PAGE_HEIGHT: f32 = 792.0;

/// An image already registered with a document, ready to be placed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageHandle {
    pub name: String,
    pub width: u32,
    pub height: u32,
}

/// Drawing surface for one page. Coordinates are measured from the top-left
/// corner, y growing downwards; conversion to PDF space happens on emit.
#[derive(Debug, Clone)]
pub struct Canvas {
    width: f32,
    height: f32,
    operations: Vec<Operation>,
    fonts: BTreeSet<Font>,
    images: BTreeSet<String>,
}

impl Canvas {
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            width,
            height,
            operations: Vec::new(),
            fonts: BTreeSet::new(),
            images: BTreeSet::new(),
        }
    }

    pub fn letter() -> Self {
        Self::new(PAGE_WIDTH, PAGE_HEIGHT)
    }

    pub fn size(&self) -> (f32, f32) {
        (self.width, self.height)
    }

    pub fn fonts(&self) -> impl Iterator<Item = Font> + '_ {
        self.fonts.iter().copied()
    }

    pub fn images(&self) -> impl Iterator<Item = &str> {
        self.images.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub(crate) fn into_operations(self) -> Vec<Operation> {
        self.operations
    }

    /// Draws a single line of text whose line box starts at `top`.
    pub fn text(&mut self, font: Font, size: f32, x: f32, top: f32, text: &str) {
        if text.is_empty() {
            return;
        }
        self.fonts.insert(font);
        let baseline = self.height - top - size * ASCENT_FACTOR;
        self.operations.push(Operation::new("BT", vec![]));
        self.operations.push(Operation::new(
            "Tf",
            vec![Object::Name(font.resource_name().as_bytes().to_vec()), Object::Real(size)],
        ));
        self.operations.push(Operation::new(
            "Td",
            vec![Object::Real(x), Object::Real(baseline)],
        ));
        self.operations.push(Operation::new(
            "Tj",
            vec![Object::String(fonts::encode_win_ansi(text), StringFormat::Literal)],
        ));
        self.operations.push(Operation::new("ET", vec![]));
    }

    pub fn text_right(&mut self, font: Font, size: f32, right: f32, top: f32, text: &str) {
        let x = right - fonts::text_width(font, size, text);
        self.text(font, size, x, top, text);
    }

    pub fn text_centered(&mut self, font: Font, size: f32, center: f32, top: f32, text: &str) {
        let x = center - fonts::text_width(font, size, text) / 2.0;
        self.text(font, size, x, top, text);
    }

    /// Draws pre-wrapped lines and returns the height they occupy.
    pub fn text_lines(&mut self, font: Font, size: f32, x: f32, top: f32, lines: &[String]) -> f32 {
        let advance = fonts::line_height(size);
        for (i, line) in lines.iter().enumerate() {
            self.text(font, size, x, top + advance * i as f32, line);
        }
        fonts::block_height(size, lines.len())
    }

    /// Horizontal rule at distance `y` from the top.
    pub fn rule(&mut self, x1: f32, x2: f32, y: f32, line_width: f32) {
        let pdf_y = self.height - y;
        self.operations.push(Operation::new("w", vec![Object::Real(line_width)]));
        self.operations.push(Operation::new("m", vec![Object::Real(x1), Object::Real(pdf_y)]));
        self.operations.push(Operation::new("l", vec![Object::Real(x2), Object::Real(pdf_y)]));
        self.operations.push(Operation::new("S", vec![]));
    }

    /// Places `image` in the box whose top-left corner is (`x`, `top`).
    pub fn image(&mut self, image: &ImageHandle, x: f32, top: f32, width: f32, height: f32) {
        self.images.insert(image.name.clone());
        let pdf_y = self.height - top - height;
        self.operations.push(Operation::new("q", vec![]));
        self.operations.push(Operation::new(
            "cm",
            vec![
                Object::Real(width),
                Object::Real(0.0),
                Object::Real(0.0),
                Object::Real(height),
                Object::Real(x),
                Object::Real(pdf_y),
            ],
        ));
        self.operations.push(Operation::new(
            "Do",
            vec![Object::Name(image.name.as_bytes().to_vec())],
        ));
        self.operations.push(Operation::new("Q", vec![]));
    }
}

/// Largest size with the image's aspect ratio that fits `max_width` x
/// `max_height`.
pub fn fit_within(width: u32, height: u32, max_width: f32, max_height: f32) -> (f32, f32) {
    if width == 0 || height == 0 {
        return (0.0, 0.0);
    }
    let (w, h) = (width as f32, height as f32);
    let scale = (max_width / w).min(max_height / h);
    (w * scale, h * scale)
}
