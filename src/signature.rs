//! Image signatures: the 40 strongest wavelet coefficients per channel plus
//! the per-channel average.

use std::cmp::Ordering;

use crate::error::{Error, Result};
use crate::haar::{Planes, NUM_PIXELS2};
use crate::heap::BoundedHeap;
use crate::weights::CHANNELS;

pub const NUM_COEFS: usize = 40;

/// Coefficient positions are stored as signed integers: the magnitude is the
/// linear position in the plane and a negative value marks a negative
/// coefficient. Position 0 holds the average, so no encoded value is 0.
pub type Coefs = [[i32; NUM_COEFS]; CHANNELS];

#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    pub id: i64,
    pub width: i32,
    pub height: i32,
    pub coeffs: Coefs,
    pub avg: [f64; CHANNELS],
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    magnitude: f64,
    position: usize,
}

// Larger magnitudes order first so the bounded heap keeps the strongest.
impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .magnitude
            .total_cmp(&self.magnitude)
            .then(self.position.cmp(&other.position))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

/// Encode a coefficient at `position` (>= 1) with the given value.
#[inline]
pub fn encode(position: usize, value: f64) -> i32 {
    let t = (value <= 0.0) as i32;
    (position as i32 - t) ^ -t
}

/// Split an encoded coefficient into `(sign, position)`, sign 1 meaning
/// negative.
#[inline]
pub fn decode(encoded: i32) -> (usize, usize) {
    let sign = (encoded <= 0) as i32;
    let position = (encoded - sign) ^ -sign;
    (sign as usize, position as usize)
}

/// Whether `encoded` names a detail coefficient inside the plane.
#[inline]
pub fn is_valid_coefficient(encoded: i32) -> bool {
    encoded != 0 && (encoded.unsigned_abs() as usize) < NUM_PIXELS2
}

/// Pick the `NUM_COEFS` largest magnitude coefficients of a transformed
/// plane, skipping the DC term at position 0.
///
/// The order of the returned values is heap drain order and carries no
/// meaning.
pub fn extract_top(plane: &[f64]) -> Result<[i32; NUM_COEFS]> {
    if plane.len() != NUM_PIXELS2 {
        return Err(Error::InvalidPlane {
            expected: NUM_PIXELS2,
            actual: plane.len(),
        });
    }

    let mut heap = BoundedHeap::with_capacity(NUM_COEFS);
    for (position, value) in plane.iter().enumerate().skip(1) {
        heap.offer(Candidate {
            magnitude: value.abs(),
            position,
        });
    }

    let mut out = [0i32; NUM_COEFS];
    for (slot, candidate) in out.iter_mut().zip(heap.drain()) {
        *slot = encode(candidate.position, plane[candidate.position]);
    }
    Ok(out)
}

impl Signature {
    /// Build a signature from planes that already went through
    /// [`Planes::transform`].
    pub fn from_transformed(id: i64, planes: &Planes, width: i32, height: i32) -> Result<Signature> {
        let channels = [&planes.a, &planes.b, &planes.c];
        let mut coeffs = [[0i32; NUM_COEFS]; CHANNELS];
        let mut avg = [0.0f64; CHANNELS];
        for (c, plane) in channels.iter().enumerate() {
            coeffs[c] = extract_top(plane)?;
            avg[c] = plane[0];
        }
        Ok(Signature {
            id,
            width,
            height,
            coeffs,
            avg,
        })
    }

    /// Full pipeline from three 128x128 8-bit R, G, B planes.
    pub fn from_planes(
        id: i64,
        r: &[u8],
        g: &[u8],
        b: &[u8],
        width: i32,
        height: i32,
    ) -> Result<Signature> {
        let mut planes = Planes::from_rgb8(r, g, b)?;
        planes.transform()?;
        Signature::from_transformed(id, &planes, width, height)
    }

    /// Check every coefficient is non-zero and inside the plane.
    pub fn validate(&self) -> Result<()> {
        for channel in self.coeffs.iter() {
            if let Some(&value) = channel.iter().find(|&&e| !is_valid_coefficient(e)) {
                return Err(Error::InvalidCoefficient { id: self.id, value });
            }
        }
        Ok(())
    }

    /// Every `(channel, sign, position)` this signature occupies in the
    /// bucket index. Invalid coefficients are skipped.
    pub fn bucket_keys(&self) -> impl Iterator<Item = (usize, usize, usize)> + '_ {
        self.coeffs.iter().enumerate().flat_map(|(c, coeffs)| {
            coeffs
                .iter()
                .filter(|&&e| is_valid_coefficient(e))
                .map(move |&e| {
                    let (sign, position) = decode(e);
                    (c, sign, position)
                })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::HashSet;

    fn random_plane(seed: u64) -> Vec<u8> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..NUM_PIXELS2).map(|_| rng.gen()).collect()
    }

    #[test]
    fn test_encode_decode() {
        assert_eq!(encode(7, 3.5), 7);
        assert_eq!(encode(7, -3.5), -7);
        assert_eq!(encode(1, 0.0), -1);
        assert_eq!(decode(7), (0, 7));
        assert_eq!(decode(-7), (1, 7));
        assert_eq!(decode(-16383), (1, 16383));
    }

    #[test]
    fn test_picks_planted_coefficients() {
        let mut plane = vec![0.0; NUM_PIXELS2];
        plane[0] = 1e9;
        let mut expected = HashSet::new();
        for (k, position) in (100..100 + NUM_COEFS).enumerate() {
            let value = if k % 2 == 0 { 50.0 + k as f64 } else { -50.0 - k as f64 };
            plane[position] = value;
            expected.insert(encode(position, value));
        }

        let top = extract_top(&plane).unwrap();
        let got: HashSet<i32> = top.iter().copied().collect();
        assert_eq!(got, expected);
        assert!(top.iter().all(|&e| e.abs() != 0));
    }

    #[test]
    fn test_signature_bounds() {
        for seed in 0..4 {
            let sig = Signature::from_planes(
                1,
                &random_plane(seed),
                &random_plane(seed + 100),
                &random_plane(seed + 200),
                640,
                480,
            )
            .unwrap();
            for channel in sig.coeffs.iter() {
                assert_eq!(channel.len(), NUM_COEFS);
                let magnitudes: HashSet<i32> = channel.iter().map(|e| e.abs()).collect();
                assert_eq!(magnitudes.len(), NUM_COEFS);
                assert!(channel.iter().all(|e| (1..NUM_PIXELS2 as i32).contains(&e.abs())));
            }
        }
    }

    #[test]
    fn test_signature_is_deterministic() {
        let (r, g, b) = (random_plane(1), random_plane(2), random_plane(3));
        let first = Signature::from_planes(9, &r, &g, &b, 10, 10).unwrap();
        let second = Signature::from_planes(9, &r, &g, &b, 10, 10).unwrap();

        let keys = |s: &Signature| s.bucket_keys().collect::<HashSet<_>>();
        assert_eq!(keys(&first), keys(&second));
        assert_eq!(first.avg, second.avg);
    }

    #[test]
    fn test_validate_flags_out_of_plane_coefficients() {
        let (r, g, b) = (random_plane(4), random_plane(5), random_plane(6));
        let mut sig = Signature::from_planes(3, &r, &g, &b, 10, 10).unwrap();
        assert!(sig.validate().is_ok());

        for &bad in &[0, NUM_PIXELS2 as i32, -(NUM_PIXELS2 as i32), i32::MIN, i32::MAX] {
            sig.coeffs[1][7] = bad;
            match sig.validate() {
                Err(Error::InvalidCoefficient { id, value }) => {
                    assert_eq!(id, 3);
                    assert_eq!(value, bad);
                }
                other => panic!("{} accepted: {:?}", bad, other),
            }
            assert_eq!(sig.bucket_keys().count(), CHANNELS * NUM_COEFS - 1);
        }
    }

    #[test]
    fn test_rejects_short_plane() {
        assert!(extract_top(&[0.0; 16]).is_err());
    }
}
