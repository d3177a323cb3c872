//! Decoding arbitrary image files into the fixed 128x128 planes the
//! signature pipeline expects.

use std::fs;
use std::path::Path;

use image::{imageops, RgbImage};
use log::debug;

use crate::error::{Error, Result};
use crate::haar::{Planes, NUM_PIXELS};
use crate::signature::Signature;

/// Smallest original width or height accepted for indexing.
pub const MIN_DIMENSION: u32 = 8;

/// A decoded image scaled down to the signature raster.
pub struct Scaled {
    pub planes: Planes,
    pub width: u32,
    pub height: u32,
}

fn scale(input: RgbImage, blur: bool) -> Result<Scaled> {
    let (width, height) = input.dimensions();
    let input = if blur { imageops::blur(&input, 2.0) } else { input };
    let pixels = imageops::resize(
        &input,
        NUM_PIXELS as u32,
        NUM_PIXELS as u32,
        imageops::FilterType::Gaussian,
    )
    .into_raw();

    Ok(Scaled {
        planes: Planes::from_interleaved(&pixels)?,
        width,
        height,
    })
}

/// Decode an encoded image and scale it to the signature raster. Blurring
/// first makes queries more tolerant of noise and recompression.
pub fn load_from_memory(data: &[u8], blur: bool) -> Result<Scaled> {
    let input = image::load_from_memory(data)?.to_rgb8();
    let (width, height) = input.dimensions();
    if width < MIN_DIMENSION || height < MIN_DIMENSION {
        return Err(Error::ImageTooSmall { width, height });
    }
    debug!("Decoded {}x{} image", width, height);
    scale(input, blur)
}

impl Signature {
    pub fn from_image_bytes(id: i64, data: &[u8], blur: bool) -> Result<Signature> {
        let mut scaled = load_from_memory(data, blur)?;
        scaled.planes.transform()?;
        Signature::from_transformed(id, &scaled.planes, scaled.width as i32, scaled.height as i32)
    }

    pub fn from_path<P: AsRef<Path>>(id: i64, path: P, blur: bool) -> Result<Signature> {
        let data = fs::read(path)?;
        Signature::from_image_bytes(id, &data, blur)
    }
}
