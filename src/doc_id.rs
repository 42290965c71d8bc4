//! Packing of (document, modality, segment) triples into vector ids.
//!
//! Every document owns the id range `[doc_id * SEGMENT_SPACE, (doc_id + 1) *
//! SEGMENT_SPACE)`. The lower nine tenths of that range hold text segment
//! embeddings, the upper tenth holds image embeddings:
//!
//! ```text
//! doc_id * S + 0          .. doc_id * S + 0.9 S   text segments
//! doc_id * S + 0.9 S      .. (doc_id + 1) * S     images
//! ```
//!
//! # Examples
//!
//! ```
//! use docsift::doc_id::{self, Modality};
//!
//! let id = doc_id::pack(7, Modality::Image, 2).unwrap();
//! assert_eq!(id, 7 * doc_id::SEGMENT_SPACE + doc_id::IMAGE_OFFSET + 2);
//! assert_eq!(doc_id::unpack(id), (7, Modality::Image));
//! ```

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Number of ids reserved for a single document.
pub const SEGMENT_SPACE: u64 = 100_000;

/// Local offset at which image ids start inside a document's range.
pub const IMAGE_OFFSET: u64 = SEGMENT_SPACE / 10 * 9;

/// Largest doc_id whose whole range still fits in a `u64`.
pub const MAX_DOC_ID: u64 = u64::MAX / SEGMENT_SPACE - 1;

/// The kind of content an embedding was computed from.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Text,
    Image,
}

impl Modality {
    /// How many embeddings of this modality a single document may hold.
    pub const fn capacity(self) -> u64 {
        match self {
            Modality::Text => IMAGE_OFFSET,
            Modality::Image => SEGMENT_SPACE - IMAGE_OFFSET,
        }
    }

    const fn base_offset(self) -> u64 {
        match self {
            Modality::Text => 0,
            Modality::Image => IMAGE_OFFSET,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Modality::Text => "text",
            Modality::Image => "image",
        }
    }
}

impl std::fmt::Display for Modality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pack a document id, modality and per-modality index into a vector id.
///
/// Fails with [`Error::CapacityExceeded`] when `local_index` does not fit in
/// the modality's sub-range, and with [`Error::IdSpaceExhausted`] when the
/// document's range would overflow a `u64`.
pub fn pack(doc_id: u64, modality: Modality, local_index: usize) -> Result<u64> {
    let capacity = modality.capacity();
    if local_index as u64 >= capacity {
        return Err(Error::CapacityExceeded {
            modality,
            index: local_index,
            capacity,
        });
    }
    if doc_id > MAX_DOC_ID {
        return Err(Error::IdSpaceExhausted);
    }
    Ok(doc_id * SEGMENT_SPACE + modality.base_offset() + local_index as u64)
}

/// Decode a vector id into its owning document and modality.
///
/// Total over all `u64` values.
pub fn unpack(id: u64) -> (u64, Modality) {
    let modality = if id % SEGMENT_SPACE >= IMAGE_OFFSET {
        Modality::Image
    } else {
        Modality::Text
    };
    (id / SEGMENT_SPACE, modality)
}

/// The half-open id range reserved for `doc_id`.
pub fn doc_range(doc_id: u64) -> Range<u64> {
    let start = doc_id.saturating_mul(SEGMENT_SPACE);
    start..start.saturating_add(SEGMENT_SPACE)
}
