use super::{ImageError, PixelImage};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Cursor;

/// Raster encodings accepted on either side of a comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    Png,
    Jpeg,
}

impl SourceFormat {
    /// Detect the encoding from magic bytes. A leading `FF D8` is JPEG;
    /// anything else is handed to the PNG decoder.
    pub fn sniff(bytes: &[u8]) -> Self {
        if bytes.len() >= 2 && bytes[0] == 0xFF && bytes[1] == 0xD8 {
            SourceFormat::Jpeg
        } else {
            SourceFormat::Png
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            SourceFormat::Png => "image/png",
            SourceFormat::Jpeg => "image/jpeg",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            SourceFormat::Png => "png",
            SourceFormat::Jpeg => "jpg",
        }
    }
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceFormat::Png => write!(f, "PNG"),
            SourceFormat::Jpeg => write!(f, "JPEG"),
        }
    }
}

impl From<SourceFormat> for image::ImageFormat {
    fn from(format: SourceFormat) -> Self {
        match format {
            SourceFormat::Png => image::ImageFormat::Png,
            SourceFormat::Jpeg => image::ImageFormat::Jpeg,
        }
    }
}

/// Decode PNG or JPEG bytes into an owned RGBA8 image.
pub fn decode(bytes: &[u8]) -> Result<PixelImage, ImageError> {
    let format = SourceFormat::sniff(bytes);
    let decoded = image::load_from_memory_with_format(bytes, format.into()).map_err(|e| {
        ImageError::Decode {
            format,
            message: e.to_string(),
        }
    })?;

    let rgba = decoded.to_rgba8();
    let (width, height) = rgba.dimensions();
    tracing::debug!(%format, width, height, "decoded image");
    PixelImage::new(width, height, rgba.into_raw())
}

/// Encode an image as PNG bytes (used for the rendered heat-map).
pub fn encode_png(image: &PixelImage) -> Result<Vec<u8>, ImageError> {
    let buffer = image::RgbaImage::from_raw(image.width(), image.height(), image.as_raw().to_vec())
        .ok_or_else(|| ImageError::Encode("pixel buffer does not fit dimensions".to_string()))?;

    let mut out = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(buffer)
        .write_to(&mut out, image::ImageFormat::Png)
        .map_err(|e| ImageError::Encode(e.to_string()))?;

    Ok(out.into_inner())
}
