//! Wavelet signature similarity search.
//!
//! Images are reduced to 128x128 planes, decomposed with a 2D Haar
//! transform and summarized by their 40 strongest coefficients per channel.
//! Signatures live in a [`SimilarityIndex`] that answers top-K queries and
//! threshold queries, can be clustered with [`ClusterBuilder`] and
//! snapshotted to a little-endian binary file.
//!
//! ```no_run
//! use haarsig::{Signature, SimilarityIndex, SketchMode};
//!
//! let mut index = SimilarityIndex::new();
//! index.insert(Signature::from_path(1, "mona.jpg", false)?)?;
//! index.insert(Signature::from_path(2, "flower.jpg", false)?)?;
//!
//! let query = Signature::from_path(0, "mona-noise.jpg", true)?;
//! for hit in index.query(&query, 5, SketchMode::Photo) {
//!     println!("{} {}", hit.id, hit.score);
//! }
//! index.save("similarity.db")?;
//! # Ok::<(), haarsig::Error>(())
//! ```

pub mod cluster;
pub mod error;
pub mod haar;
pub mod heap;
pub mod index;
pub mod loader;
pub mod persist;
pub mod signature;
pub mod weights;

pub use cluster::ClusterBuilder;
pub use error::{Error, Result};
pub use haar::Planes;
pub use index::{Match, SimilarityIndex, WorkingSet};
pub use signature::Signature;
pub use weights::SketchMode;
