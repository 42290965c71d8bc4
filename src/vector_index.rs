use std::{
    cmp::Ordering,
    collections::{BTreeMap, BTreeSet},
};

use rayon::prelude::*;
use redb::{ReadTransaction, ReadableTable, TableDefinition, WriteTransaction};

use crate::{
    doc_id,
    error::{Error, Result},
};

pub(crate) const VECTORS: TableDefinition<u64, &[u8]> =
    TableDefinition::new("vectors");
pub(crate) const INDEX_META: TableDefinition<&str, u64> =
    TableDefinition::new("index_meta");

const DIMENSION_KEY: &str = "dimension";

/// Nearest-neighbour store keyed by packed vector ids.
///
/// Vectors are held in memory and scored exhaustively by inner product, so
/// callers are expected to hand in unit-normalized vectors (inner product is
/// then cosine similarity). Mutations are tracked per document range and
/// written out by [`persist_into`](Self::persist_into); on disk each entry
/// is the vector's `f32` values in native byte order.
#[derive(Debug, Clone, Default)]
pub struct VectorIndex {
    dimension: Option<usize>,
    vectors: BTreeMap<u64, Vec<f32>>,
    /// Documents whose range changed since the last load or persist.
    dirty: BTreeSet<u64>,
}

impl PartialEq for VectorIndex {
    fn eq(&self, other: &Self) -> bool {
        self.dimension == other.dimension && self.vectors == other.vectors
    }
}

impl VectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// The dimension fixed by the first insert, if any.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Whether there are unpersisted changes.
    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    /// Insert a batch of vectors under the given ids.
    ///
    /// The batch is validated as a whole before anything is stored: arity,
    /// dimension and id uniqueness (within the batch and against the store).
    pub fn insert(&mut self, vectors: Vec<Vec<f32>>, ids: &[u64]) -> Result<()> {
        if vectors.len() != ids.len() {
            return Err(Error::Config(format!(
                "insert got {} vectors for {} ids",
                vectors.len(),
                ids.len()
            )));
        }
        let Some(first) = vectors.first() else {
            return Ok(());
        };

        let expected = self.dimension.unwrap_or(first.len());
        if expected == 0 {
            return Err(Error::DimensionMismatch {
                expected: 1,
                actual: 0,
            });
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != expected) {
            return Err(Error::DimensionMismatch {
                expected,
                actual: bad.len(),
            });
        }

        let mut batch = BTreeSet::new();
        for &id in ids {
            if self.vectors.contains_key(&id) || !batch.insert(id) {
                return Err(Error::DuplicateId(id));
            }
        }

        self.dimension = Some(expected);
        for (id, vector) in ids.iter().zip(vectors) {
            self.dirty.insert(doc_id::unpack(*id).0);
            self.vectors.insert(*id, vector);
        }
        Ok(())
    }

    /// The `top_n` most similar vectors to `query`, best first.
    ///
    /// Ties are broken by ascending id so results are deterministic.
    pub fn search(&self, query: &[f32], top_n: usize) -> Result<Vec<(u64, f32)>> {
        let Some(dimension) = self.dimension else {
            return Ok(Vec::new());
        };
        if query.len() != dimension {
            return Err(Error::DimensionMismatch {
                expected: dimension,
                actual: query.len(),
            });
        }
        if top_n == 0 || self.vectors.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(u64, f32)> = self
            .vectors
            .par_iter()
            .map(|(id, vector)| (*id, dot(query, vector)))
            .collect();

        if scored.len() > top_n {
            scored.select_nth_unstable_by(top_n - 1, by_score_desc);
            scored.truncate(top_n);
        }
        scored.sort_by(by_score_desc);
        Ok(scored)
    }

    /// Delete every vector in `doc_id`'s reserved range.
    ///
    /// Only the document's own range is visited, so the cost does not grow
    /// with the rest of the store. Returns how many vectors were removed.
    pub fn remove_range(&mut self, doc_id: u64) -> usize {
        let ids: Vec<u64> = self.document_ids(doc_id).collect();
        for id in &ids {
            self.vectors.remove(id);
        }
        if !ids.is_empty() {
            self.dirty.insert(doc_id);
        }
        ids.len()
    }

    /// Packed ids stored for `doc_id`, ascending.
    pub fn document_ids(&self, doc_id: u64) -> impl Iterator<Item = u64> + '_ {
        self.vectors
            .range(doc_id::doc_range(doc_id))
            .map(|(id, _)| *id)
    }

    /// Number of vectors stored for `doc_id`.
    pub fn count_range(&self, doc_id: u64) -> usize {
        self.document_ids(doc_id).count()
    }

    pub fn has_document(&self, doc_id: u64) -> bool {
        self.vectors
            .range(doc_id::doc_range(doc_id))
            .next()
            .is_some()
    }

    /// Distinct doc_ids with at least one stored vector, ascending.
    pub fn doc_ids(&self) -> Vec<u64> {
        let mut docs = Vec::new();
        let mut cursor = 0u64;
        while let Some((&id, _)) = self.vectors.range(cursor..).next() {
            let doc = doc_id::unpack(id).0;
            docs.push(doc);
            let next = doc_id::doc_range(doc).end;
            if next <= id {
                break;
            }
            cursor = next;
        }
        docs
    }

    /// Write the changed document ranges into `txn`.
    ///
    /// The caller commits the transaction and then calls
    /// [`mark_clean`](Self::mark_clean).
    pub fn persist_into(&self, txn: &WriteTransaction) -> Result<()> {
        let mut table = txn.open_table(VECTORS)?;
        for &doc in &self.dirty {
            let range = doc_id::doc_range(doc);
            let stale: Vec<u64> = table
                .range(range.clone())?
                .map(|entry| entry.map(|(k, _)| k.value()))
                .collect::<std::result::Result<_, _>>()?;
            for id in stale {
                table.remove(id)?;
            }
            for (id, vector) in self.vectors.range(range) {
                let bytes: &[u8] = bytemuck::cast_slice(vector.as_slice());
                table.insert(*id, bytes)?;
            }
        }

        if let Some(dimension) = self.dimension {
            let mut meta = txn.open_table(INDEX_META)?;
            meta.insert(DIMENSION_KEY, dimension as u64)?;
        }
        Ok(())
    }

    pub fn mark_clean(&mut self) {
        self.dirty.clear();
    }

    /// Read a full index out of `txn`.
    ///
    /// Entries whose length does not match the stored dimension mean the
    /// file is not an index this code wrote, which is reported as
    /// [`Error::Corrupt`].
    pub fn load_from(txn: &ReadTransaction) -> Result<Self> {
        let meta = txn.open_table(INDEX_META)?;
        let dimension = meta
            .get(DIMENSION_KEY)?
            .map(|v| v.value() as usize);

        let table = txn.open_table(VECTORS)?;
        let mut vectors = BTreeMap::new();
        for entry in table.iter()? {
            let (k, v) = entry?;
            let bytes = v.value();
            let Some(dimension) = dimension else {
                return Err(Error::Corrupt(
                    "vectors present without a recorded dimension".into(),
                ));
            };
            if bytes.len() != dimension * std::mem::size_of::<f32>() {
                return Err(Error::Corrupt(format!(
                    "vector {} has {} bytes, expected {}",
                    k.value(),
                    bytes.len(),
                    dimension * std::mem::size_of::<f32>()
                )));
            }
            let vector: Vec<f32> = bytes
                .chunks_exact(std::mem::size_of::<f32>())
                .map(bytemuck::pod_read_unaligned::<f32>)
                .collect();
            vectors.insert(k.value(), vector);
        }

        Ok(Self {
            dimension,
            vectors,
            dirty: BTreeSet::new(),
        })
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn by_score_desc(a: &(u64, f32), b: &(u64, f32)) -> Ordering {
    b.1.partial_cmp(&a.1)
        .unwrap_or(Ordering::Equal)
        .then(a.0.cmp(&b.0))
}
