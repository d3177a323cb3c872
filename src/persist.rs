//! Binary snapshot of the bucket index and signature store.
//!
//! Layout, all little-endian:
//!
//! ```text
//! for channel in 0..3, sign in 0..2, position in 0..16384:
//!     i32 bucket size, then that many i64 ids
//! i32 signature count
//! per signature:
//!     i64 id
//!     3 x 40 i32 coefficients, channel major
//!     3 x f64 averages
//!     i32 width, i32 height
//! ```

use std::collections::HashMap;
use std::fs;
use std::io::{BufWriter, Cursor, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::info;
use tempfile::NamedTempFile;

use crate::error::{Error, Result};
use crate::index::{SimilarityIndex, NUM_BUCKETS};
use crate::signature::{is_valid_coefficient, Signature, NUM_COEFS};
use crate::weights::CHANNELS;

const SIGNATURE_BYTES: usize = 8 + CHANNELS * NUM_COEFS * 4 + CHANNELS * 8 + 2 * 4;

type Input<'a> = Cursor<&'a [u8]>;

fn remaining(input: &Input) -> usize {
    input.get_ref().len().saturating_sub(input.position() as usize)
}

fn corrupt(input: &Input, reason: String) -> Error {
    Error::Corrupt {
        offset: input.position() as usize,
        reason,
    }
}

fn read_i32(input: &mut Input) -> Result<i32> {
    input
        .read_i32::<LittleEndian>()
        .map_err(|e| corrupt(input, format!("truncated i32: {}", e)))
}

fn read_i64(input: &mut Input) -> Result<i64> {
    input
        .read_i64::<LittleEndian>()
        .map_err(|e| corrupt(input, format!("truncated i64: {}", e)))
}

fn read_f64(input: &mut Input) -> Result<f64> {
    input
        .read_f64::<LittleEndian>()
        .map_err(|e| corrupt(input, format!("truncated f64: {}", e)))
}

/// Read a declared element count and make sure that many elements of `size`
/// bytes are actually present.
fn read_count(input: &mut Input, size: usize) -> Result<usize> {
    let declared = read_i32(input)?;
    if declared < 0 {
        return Err(corrupt(input, format!("negative count {}", declared)));
    }
    let count = declared as usize;
    let left = remaining(input);
    let fits = count.checked_mul(size).map_or(false, |needed| needed <= left);
    if !fits {
        return Err(corrupt(
            input,
            format!("count {} of {}-byte records exceeds the {} bytes left", count, size, left),
        ));
    }
    Ok(count)
}

fn read_signature(input: &mut Input) -> Result<Signature> {
    let id = read_i64(input)?;
    let mut coeffs = [[0i32; NUM_COEFS]; CHANNELS];
    for channel in coeffs.iter_mut() {
        for e in channel.iter_mut() {
            let value = read_i32(input)?;
            if !is_valid_coefficient(value) {
                return Err(corrupt(
                    input,
                    format!("coefficient {} out of range for id {}", value, id),
                ));
            }
            *e = value;
        }
    }
    let mut avg = [0.0f64; CHANNELS];
    for a in avg.iter_mut() {
        *a = read_f64(input)?;
    }
    let width = read_i32(input)?;
    let height = read_i32(input)?;
    Ok(Signature {
        id,
        width,
        height,
        coeffs,
        avg,
    })
}

fn write_signature<W: Write>(out: &mut W, sig: &Signature) -> Result<()> {
    out.write_i64::<LittleEndian>(sig.id)?;
    for channel in sig.coeffs.iter() {
        for e in channel.iter() {
            out.write_i32::<LittleEndian>(*e)?;
        }
    }
    for a in sig.avg.iter() {
        out.write_f64::<LittleEndian>(*a)?;
    }
    out.write_i32::<LittleEndian>(sig.width)?;
    out.write_i32::<LittleEndian>(sig.height)?;
    Ok(())
}

impl Signature {
    /// The signature's snapshot record as lowercase hex, suitable for
    /// passing signatures around as text.
    pub fn to_text(&self) -> String {
        let mut bytes = Vec::with_capacity(SIGNATURE_BYTES);
        // Writing into a Vec cannot fail.
        let _ = write_signature(&mut bytes, self);
        bytes.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Parse the output of [`to_text`](Self::to_text). Offsets in errors
    /// count bytes, not hex digits.
    pub fn from_text(text: &str) -> Result<Signature> {
        let text = text.trim();
        if text.len() != SIGNATURE_BYTES * 2 {
            return Err(Error::Corrupt {
                offset: 0,
                reason: format!(
                    "signature text is {} characters, expected {}",
                    text.len(),
                    SIGNATURE_BYTES * 2
                ),
            });
        }

        let mut bytes = Vec::with_capacity(SIGNATURE_BYTES);
        for (offset, pair) in text.as_bytes().chunks(2).enumerate() {
            let digits = match std::str::from_utf8(pair) {
                Ok(digits) if pair.iter().all(u8::is_ascii_hexdigit) => digits,
                _ => {
                    return Err(Error::Corrupt {
                        offset,
                        reason: format!("invalid hex digits {:?}", String::from_utf8_lossy(pair)),
                    })
                }
            };
            let byte = u8::from_str_radix(digits, 16).map_err(|e| Error::Corrupt {
                offset,
                reason: e.to_string(),
            })?;
            bytes.push(byte);
        }

        let mut input = Cursor::new(&bytes[..]);
        read_signature(&mut input)
    }
}

impl SimilarityIndex {
    /// Serialize the whole index. Signatures are written in ascending id
    /// order.
    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<()> {
        for bucket in &self.buckets {
            out.write_i32::<LittleEndian>(bucket.len() as i32)?;
            for id in bucket {
                out.write_i64::<LittleEndian>(*id)?;
            }
        }

        let mut sigs: Vec<&Signature> = self.sigs.values().collect();
        sigs.sort_by_key(|sig| sig.id);
        out.write_i32::<LittleEndian>(sigs.len() as i32)?;
        for sig in sigs {
            write_signature(out, sig)?;
        }
        Ok(())
    }

    /// Parse a snapshot produced by [`write_to`](Self::write_to).
    pub fn read_from(bytes: &[u8]) -> Result<SimilarityIndex> {
        let mut input = Cursor::new(bytes);

        let mut buckets = Vec::with_capacity(NUM_BUCKETS);
        for _ in 0..NUM_BUCKETS {
            let size = read_count(&mut input, 8)?;
            let mut bucket = Vec::with_capacity(size);
            for _ in 0..size {
                bucket.push(read_i64(&mut input)?);
            }
            buckets.push(bucket);
        }

        let count = read_count(&mut input, SIGNATURE_BYTES)?;
        let mut sigs = HashMap::with_capacity(count);
        for _ in 0..count {
            let sig = read_signature(&mut input)?;
            let id = sig.id;
            if sigs.insert(id, sig).is_some() {
                return Err(corrupt(&input, format!("duplicate signature id {}", id)));
            }
        }

        let left = remaining(&input);
        if left != 0 {
            return Err(corrupt(&input, format!("{} trailing bytes", left)));
        }
        for bucket in &buckets {
            if let Some(id) = bucket.iter().find(|id| !sigs.contains_key(*id)) {
                return Err(corrupt(&input, format!("bucket references unknown id {}", id)));
            }
        }

        Ok(SimilarityIndex::from_parts(buckets, sigs))
    }

    /// Write a snapshot to `path`. The data goes to a temporary file next to
    /// `path` that replaces it only once fully written, so a failed save
    /// keeps the previous snapshot.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };

        let mut tmp = NamedTempFile::new_in(dir)?;
        {
            let mut out = BufWriter::new(tmp.as_file_mut());
            self.write_to(&mut out)?;
            out.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| e.error)?;

        info!("Saved {} signatures to {}", self.len(), path.display());
        Ok(())
    }

    /// Replace the contents of this index with the snapshot at `path`. On
    /// any failure the index is left as it was.
    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        let bytes = fs::read(path)?;
        *self = SimilarityIndex::read_from(&bytes)?;
        info!("Loaded {} signatures from {}", self.len(), path.display());
        Ok(())
    }
}
