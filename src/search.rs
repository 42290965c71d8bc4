use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::{
    doc_id::{self, Modality},
    error::{Error, Result},
    vector_index::VectorIndex,
};

/// Default number of raw neighbours fetched per requested document.
pub const DEFAULT_OVER_FETCH: usize = 100;

/// Default multiplier for hits whose modality differs from the query's.
pub const DEFAULT_BALANCE_FACTOR: f32 = 3.0;

/// Tuning knobs of the retrieval engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchOptions {
    /// Raw neighbours fetched per requested document.
    pub over_fetch: usize,
    /// Score multiplier applied to cross-modal hits.
    pub balance_factor: f32,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            over_fetch: DEFAULT_OVER_FETCH,
            balance_factor: DEFAULT_BALANCE_FACTOR,
        }
    }
}

/// One aggregated document hit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoredDocument {
    pub doc_id: u64,
    pub score: f32,
}

/// Fold raw, score-ordered hits into at most `k` documents.
///
/// Each `(document, modality)` pair contributes once, with its first (best)
/// hit. Cross-modal hits are scaled by `balance_factor`, and a document's
/// score is the larger of its two possible contributions. The output is in
/// first-seen order, not sorted by score.
pub fn aggregate_hits(
    hits: &[(u64, f32)],
    query_modality: Modality,
    k: usize,
    balance_factor: f32,
) -> Vec<ScoredDocument> {
    let mut seen: HashSet<(u64, Modality)> = HashSet::new();
    let mut position: HashMap<u64, usize> = HashMap::new();
    let mut docs: Vec<ScoredDocument> = Vec::new();

    for &(id, raw) in hits {
        if docs.len() >= k {
            break;
        }
        let (doc, modality) = doc_id::unpack(id);
        if !seen.insert((doc, modality)) {
            continue;
        }
        let score = if modality == query_modality {
            raw
        } else {
            raw * balance_factor
        };

        match position.get(&doc) {
            Some(&at) => {
                if score > docs[at].score {
                    docs[at].score = score;
                }
            }
            None => {
                position.insert(doc, docs.len());
                docs.push(ScoredDocument { doc_id: doc, score });
            }
        }
    }

    docs
}

/// Retrieve up to `k` documents for an already embedded query.
///
/// Fails with [`Error::EmptyResult`] when nothing matches, including when
/// the index holds no vectors at all.
pub fn retrieve(
    index: &VectorIndex,
    query: &[f32],
    query_modality: Modality,
    k: usize,
    options: &SearchOptions,
) -> Result<Vec<ScoredDocument>> {
    if k == 0 {
        return Err(Error::Config("result count must be at least 1".into()));
    }
    let top_n = k.saturating_mul(options.over_fetch.max(1));
    let hits = index.search(query, top_n)?;
    tracing::debug!(raw_hits = hits.len(), top_n, "vector search");

    let docs = aggregate_hits(&hits, query_modality, k, options.balance_factor);
    if docs.is_empty() {
        return Err(Error::EmptyResult);
    }
    Ok(docs)
}
