// expense-report-service/src/pdf/raster.rs

use crate::error::Result;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use image::{ColorType, GenericImageView, ImageFormat};
use std::io::Write;
use std::path::Path;

/// Pixel data in a form that can be written as a PDF image XObject.
#[derive(Debug, Clone)]
pub struct RasterImage {
    pub width: u32,
    pub height: u32,
    pub color_space: &'static str,
    pub filter: &'static str,
    pub data: Vec<u8>,
    /// Flate-compressed 8-bit alpha channel, only when some pixel is not opaque.
    pub alpha: Option<Vec<u8>>,
}

impl RasterImage {
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::decode(&bytes)
    }

    /// JPEG data with one or three components is embedded as-is; everything
    /// else is decoded and re-encoded as Flate RGB plus an optional soft mask.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let format = image::guess_format(bytes)?;
        let decoded = image::load_from_memory(bytes)?;
        let (width, height) = decoded.dimensions();

        if format == ImageFormat::Jpeg {
            let passthrough = match (decoded.color(), jpeg_components(bytes)) {
                (ColorType::L8, Some(1)) => Some("DeviceGray"),
                (ColorType::Rgb8, Some(3)) => Some("DeviceRGB"),
                _ => None,
            };
            if let Some(color_space) = passthrough {
                return Ok(Self {
                    width,
                    height,
                    color_space,
                    filter: "DCTDecode",
                    data: bytes.to_vec(),
                    alpha: None,
                });
            }
        }

        let rgba = decoded.to_rgba8();
        let mut rgb = Vec::with_capacity((width * height * 3) as usize);
        let mut alpha = Vec::with_capacity((width * height) as usize);
        let mut has_alpha = false;
        for pixel in rgba.pixels() {
            let [r, g, b, a] = pixel.0;
            if a != 255 {
                has_alpha = true;
            }
            rgb.extend_from_slice(&[r, g, b]);
            alpha.push(a);
        }

        Ok(Self {
            width,
            height,
            color_space: "DeviceRGB",
            filter: "FlateDecode",
            data: flate_compress(&rgb)?,
            alpha: if has_alpha { Some(flate_compress(&alpha)?) } else { None },
        })
    }
}

fn flate_compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Number of colour components declared in the first SOF segment.
fn jpeg_components(bytes: &[u8]) -> Option<u8> {
    if bytes.len() < 4 || bytes[0] != 0xFF || bytes[1] != 0xD8 {
        return None;
    }
    let mut pos = 2;
    while pos + 4 <= bytes.len() {
        if bytes[pos] != 0xFF {
            return None;
        }
        let marker = bytes[pos + 1];
        if marker == 0xFF {
            pos += 1;
            continue;
        }
        let length = usize::from(u16::from_be_bytes([bytes[pos + 2], bytes[pos + 3]]));
        let is_sof = matches!(marker, 0xC0..=0xCF) && !matches!(marker, 0xC4 | 0xC8 | 0xCC);
        if is_sof {
            return bytes.get(pos + 9).copied();
        }
        if marker == 0xDA {
            return None;
        }
        pos += 2 + length;
    }
    None
}
