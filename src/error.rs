use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("Image is too small to index: {width}x{height}")]
    ImageTooSmall { width: u32, height: u32 },

    #[error("Plane has {actual} samples, expected {expected}")]
    InvalidPlane { expected: usize, actual: usize },

    #[error("Signature {id} holds invalid coefficient {value}")]
    InvalidCoefficient { id: i64, value: i32 },

    #[error("Corrupt index data at byte {offset}: {reason}")]
    Corrupt { offset: usize, reason: String },
}

pub type Result<T> = std::result::Result<T, Error>;
