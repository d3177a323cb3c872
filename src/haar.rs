//! Colorspace mix and 2D Haar decomposition of 128x128 planes.

use crate::error::{Error, Result};

pub const NUM_PIXELS: usize = 128;
pub const NUM_PIXELS2: usize = NUM_PIXELS * NUM_PIXELS;

const SCALE: f64 = 0.7071; // 1/SQRT2
const DC_NORM: f64 = 256.0 * 128.0;

/// Three channel planes of `NUM_PIXELS2` samples each, row major.
#[derive(Debug, Clone, PartialEq)]
pub struct Planes {
    pub a: Vec<f64>,
    pub b: Vec<f64>,
    pub c: Vec<f64>,
}

fn check_len(len: usize) -> Result<()> {
    if len != NUM_PIXELS2 {
        return Err(Error::InvalidPlane {
            expected: NUM_PIXELS2,
            actual: len,
        });
    }
    Ok(())
}

impl Planes {
    /// Widen three 8-bit R, G, B planes.
    pub fn from_rgb8(r: &[u8], g: &[u8], b: &[u8]) -> Result<Planes> {
        check_len(r.len())?;
        check_len(g.len())?;
        check_len(b.len())?;
        let widen = |p: &[u8]| p.iter().map(|&v| f64::from(v)).collect::<Vec<_>>();
        Ok(Planes {
            a: widen(r),
            b: widen(g),
            c: widen(b),
        })
    }

    /// Split an interleaved RGB8 buffer (`r,g,b,r,g,b,...`).
    pub fn from_interleaved(pixels: &[u8]) -> Result<Planes> {
        check_len(pixels.len() / 3)?;
        if pixels.len() % 3 != 0 {
            return Err(Error::InvalidPlane {
                expected: NUM_PIXELS2 * 3,
                actual: pixels.len(),
            });
        }
        let mut planes = Planes {
            a: Vec::with_capacity(NUM_PIXELS2),
            b: Vec::with_capacity(NUM_PIXELS2),
            c: Vec::with_capacity(NUM_PIXELS2),
        };
        for pixel in pixels.chunks(3) {
            planes.a.push(f64::from(pixel[0]));
            planes.b.push(f64::from(pixel[1]));
            planes.c.push(f64::from(pixel[2]));
        }
        Ok(planes)
    }

    /// Run the full transform in place; afterwards the planes hold Y, I, Q
    /// wavelet coefficients.
    pub fn transform(&mut self) -> Result<()> {
        transform(&mut self.a, &mut self.b, &mut self.c)
    }
}

/// Mix R, G, B into the luma/chroma triple in place.
pub fn rgb_to_yiq(r: &mut [f64], g: &mut [f64], b: &mut [f64]) {
    for ((r, g), b) in r.iter_mut().zip(g.iter_mut()).zip(b.iter_mut()) {
        let y = 0.299 * *r + 0.587 * *g + 0.114 * *b;
        let i = 0.596 * *r - 0.275 * *g - 0.321 * *b;
        let q = 0.212 * *r - 0.523 * *g + 0.311 * *b;
        *r = y;
        *g = i;
        *b = q;
    }
}

/// Standard 2D Haar decomposition of one plane, rows then columns.
pub fn haar2d(data: &mut [f64]) {
    let mut t = [0.0f64; NUM_PIXELS >> 1];

    // Decompose rows
    for i in (0..NUM_PIXELS2).step_by(NUM_PIXELS) {
        let mut c = 1.0f64;
        let mut h = NUM_PIXELS;
        while h > 1 {
            let h1 = h >> 1;
            c *= SCALE;
            let mut j1 = i;
            let mut j2 = i;
            for k in t.iter_mut().take(h1) {
                let j21 = j2 + 1;
                *k = (data[j2] - data[j21]) * c;
                data[j1] = data[j2] + data[j21];

                j1 += 1;
                j2 += 2;
            }
            data[i + h1..i + 2 * h1].copy_from_slice(&t[..h1]);

            h = h1;
        }
        data[i] *= c;
    }

    // Decompose columns
    for i in 0..NUM_PIXELS {
        let mut c = 1.0f64;
        let mut h = NUM_PIXELS;
        while h > 1 {
            let h1 = h >> 1;
            c *= SCALE;
            let mut j1 = i;
            let mut j2 = i;
            for k in t.iter_mut().take(h1) {
                let j21 = j2 + NUM_PIXELS;
                *k = (data[j2] - data[j21]) * c;
                data[j1] = data[j2] + data[j21];

                j1 += NUM_PIXELS;
                j2 += 2 * NUM_PIXELS;
            }
            j1 = i + h1 * NUM_PIXELS;
            for k in t.iter().take(h1) {
                data[j1] = *k;
                j1 += NUM_PIXELS;
            }

            h = h1;
        }
        data[i] *= c;
    }
}

/// Colorspace mix, per-plane Haar decomposition and DC normalization.
///
/// Takes R, G, B sample planes and leaves Y, I, Q coefficients behind.
pub fn transform(a: &mut [f64], b: &mut [f64], c: &mut [f64]) -> Result<()> {
    check_len(a.len())?;
    check_len(b.len())?;
    check_len(c.len())?;

    rgb_to_yiq(a, b, c);
    for plane in [a, b, c].iter_mut() {
        haar2d(plane);
        plane[0] /= DC_NORM;
    }
    Ok(())
}
