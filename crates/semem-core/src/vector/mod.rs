//! Vector similarity search.
//!
//! `VectorIndex` is the in-process similarity structure owned by the memory
//! manager. `rank_entries` is the brute-force ranking used by backends that
//! search their own records.

pub mod index;

pub use index::{VectorIndex, cosine_similarity, rank_entries};
