//! RGB frame type — YUYV conversion, resampling, PNG template blobs.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::imageops::FilterType;
use image::{ImageFormat, RgbImage};
use std::io::Cursor;

const DATA_URL_PREFIX: &str = "data:image/png;base64,";

/// A captured camera frame as packed RGB (3 bytes per pixel).
#[derive(Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub sequence: u32,
}

impl Frame {
    /// Wrap a packed RGB buffer, checking its length against the dimensions.
    pub fn from_rgb(data: Vec<u8>, width: u32, height: u32) -> Result<Self, FrameError> {
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            sequence: 0,
        })
    }

    /// Resample to exactly `width`×`height`, stretching if the aspect differs.
    pub fn resize(&self, width: u32, height: u32) -> Result<Frame, FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::EmptyTarget);
        }
        let img = self.to_image()?;
        let resized = if img.width() == width && img.height() == height {
            img
        } else {
            image::imageops::resize(&img, width, height, FilterType::Triangle)
        };
        Ok(Frame {
            data: resized.into_raw(),
            width,
            height,
            sequence: self.sequence,
        })
    }

    /// Encode as a PNG data URL (`data:image/png;base64,...`).
    pub fn to_data_url(&self) -> Result<String, FrameError> {
        let img = self.to_image()?;
        let mut png = Vec::new();
        img.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
        Ok(format!("{DATA_URL_PREFIX}{}", STANDARD.encode(png)))
    }

    /// Decode a PNG data URL or bare base64 PNG back into a frame.
    pub fn from_data_url(blob: &str) -> Result<Frame, FrameError> {
        let encoded = blob.strip_prefix(DATA_URL_PREFIX).unwrap_or(blob);
        let png = STANDARD.decode(encoded.trim())?;
        let img = image::load_from_memory_with_format(&png, ImageFormat::Png)?.to_rgb8();
        let (width, height) = img.dimensions();
        Frame::from_rgb(img.into_raw(), width, height)
    }

    fn to_image(&self) -> Result<RgbImage, FrameError> {
        let expected = self.width as usize * self.height as usize * 3;
        let actual = self.data.len();
        RgbImage::from_raw(self.width, self.height, self.data.clone())
            .ok_or(FrameError::InvalidLength { expected, actual })
    }
}

/// Convert packed YUYV (4:2:2) to packed RGB using BT.601 coefficients.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V]; both pixels share
/// the chroma pair.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let pixels = width as usize * height as usize;
    let expected = pixels * 2;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity(pixels * 3);
    for chunk in yuyv[..expected].chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        rgb.extend_from_slice(&ycbcr_to_rgb(y0, u, v));
        rgb.extend_from_slice(&ycbcr_to_rgb(y1, u, v));
    }
    Ok(rgb)
}

fn ycbcr_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let clamp = |x: i32| ((x + 128) >> 8).clamp(0, 255) as u8;
    [
        clamp(298 * c + 409 * e),
        clamp(298 * c - 100 * d - 208 * e),
        clamp(298 * c + 516 * d),
    ]
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid frame length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("cannot resize to an empty image")]
    EmptyTarget,
    #[error("image codec error: {0}")]
    Image(#[from] image::ImageError),
    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),
}
