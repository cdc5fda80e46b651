//! Raster decoding and normalization into owned RGBA8 pixel buffers.

pub mod decode;
pub mod normalize;

pub use decode::{decode, encode_png, SourceFormat};
pub use normalize::{normalize_pair, resize_nearest};

use thiserror::Error;

/// Bytes per RGBA8 pixel.
pub const CHANNELS: usize = 4;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("failed to decode {format} image: {message}")]
    Decode {
        format: SourceFormat,
        message: String,
    },
    #[error("image has zero area ({width}x{height})")]
    Dimension { width: u32, height: u32 },
    #[error("pixel buffer holds {actual} bytes, expected {expected} for {width}x{height}")]
    BufferLength {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
    #[error("cannot diff {first:?} against {second:?}: dimensions differ")]
    SizeMismatch {
        first: (u32, u32),
        second: (u32, u32),
    },
    #[error("failed to encode heat-map: {0}")]
    Encode(String),
}

/// Row-major RGBA8 image. The buffer length always equals `width * height * 4`
/// and the area is never zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelImage {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl PixelImage {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self, ImageError> {
        if width == 0 || height == 0 {
            return Err(ImageError::Dimension { width, height });
        }
        let expected = width as usize * height as usize * CHANNELS;
        if data.len() != expected {
            return Err(ImageError::BufferLength {
                width,
                height,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Build an image by evaluating `f(x, y)` for every pixel.
    pub fn from_fn<F>(width: u32, height: u32, mut f: F) -> Result<Self, ImageError>
    where
        F: FnMut(u32, u32) -> [u8; 4],
    {
        if width == 0 || height == 0 {
            return Err(ImageError::Dimension { width, height });
        }
        let mut data = Vec::with_capacity(width as usize * height as usize * CHANNELS);
        for y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&f(x, y));
            }
        }
        Self::new(width, height, data)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn as_raw(&self) -> &[u8] {
        &self.data
    }

    pub fn into_raw(self) -> Vec<u8> {
        self.data
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = (y as usize * self.width as usize + x as usize) * CHANNELS;
        [
            self.data[i],
            self.data[i + 1],
            self.data[i + 2],
            self.data[i + 3],
        ]
    }
}
