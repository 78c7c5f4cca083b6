//! Maps near-duplicate queries, restricted to an equivalent retrieval
//! context, to a previously generated answer (§4.4). Implemented as a
//! second small index keyed on query text, reusing `index_facade`'s
//! engine so the cache benefits from the same token-overlap retrieval the
//! primary index uses, while keeping its own acceptance gate (token
//! overlap >= tau and exact reference-set equality) independent of
//! whatever scoring the primary engine layers on top (upvotes,
//! associations) for retrieval ranking.
use std::{
    collections::BTreeSet,
    path::{
        Path,
        PathBuf,
    },
};

use index_facade::{
    IndexFacade,
    NaiveEngine,
};
use index_protocol::{
    Constraints,
    Metadata,
    MetadataValue,
    Scalar,
};

/// Minimum token overlap for an exact-reuse cache hit (§3.2 invariant 5).
pub const TAU: f64 = 0.95;

const DOC_ID: &str = "response_cache";
const SUGGESTION_LIMIT: i64 = 5;

pub struct ResponseCache {
    facade: IndexFacade<NaiveEngine>,
}

fn overlap(query: &str, candidate: &str) -> f64 {
    let q: BTreeSet<&str> = query.split_whitespace().collect();
    if q.is_empty() {
        return 0.0;
    }
    let c: BTreeSet<&str> = candidate.split_whitespace().collect();
    q.intersection(&c).count() as f64 / q.len() as f64
}

fn encode_metadata(answer: &str, reference_ids: &BTreeSet<u64>) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert(
        "answer".to_string(),
        MetadataValue::Scalar(Scalar::Str(answer.to_string())),
    );
    metadata.insert(
        "reference_ids".to_string(),
        MetadataValue::Array(reference_ids.iter().map(|id| Scalar::Int(*id as i64)).collect()),
    );
    metadata
}

fn decode_answer(metadata: &Metadata) -> Option<&str> {
    match metadata.get("answer") {
        Some(MetadataValue::Scalar(Scalar::Str(s))) => Some(s.as_str()),
        _ => None,
    }
}

fn decode_reference_ids(metadata: &Metadata) -> BTreeSet<u64> {
    match metadata.get("reference_ids") {
        Some(MetadataValue::Array(values)) => values
            .iter()
            .filter_map(|v| match v {
                Scalar::Int(i) if *i >= 0 => Some(*i as u64),
                _ => None,
            })
            .collect(),
        _ => BTreeSet::new(),
    }
}

impl ResponseCache {
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        Ok(Self {
            facade: IndexFacade::open(path)?,
        })
    }

    pub fn path(&self) -> &Path {
        self.facade.path()
    }

    /// Top distinct stored queries for query-completion hints, up to 5.
    /// No threshold is applied (§4.4).
    pub fn suggestions(&self, query: &str) -> anyhow::Result<Vec<String>> {
        let chunks = self.facade.query(query, SUGGESTION_LIMIT, &Constraints::new())?;
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        for chunk in chunks {
            if seen.insert(chunk.text.clone()) {
                out.push(chunk.text);
            }
        }
        out.truncate(5);
        Ok(out)
    }

    /// Returns the stored answer iff the best of the top-5 candidates has
    /// overlap >= tau with `query` and its reference-id set exactly equals
    /// `current_reference_ids` (§3.2 invariant 5, §4.4, §8 cache gate).
    pub fn lookup(
        &self,
        query: &str,
        current_reference_ids: &BTreeSet<u64>,
    ) -> anyhow::Result<Option<String>> {
        let chunks = self.facade.query(query, SUGGESTION_LIMIT, &Constraints::new())?;
        let best = chunks
            .iter()
            .map(|c| (overlap(query, &c.text), c))
            .max_by(|(a, _), (b, _)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let Some((score, chunk)) = best else {
            return Ok(None);
        };
        if score < TAU {
            return Ok(None);
        }
        if decode_reference_ids(&chunk.metadata) != *current_reference_ids {
            return Ok(None);
        }
        Ok(decode_answer(&chunk.metadata).map(|s| s.to_string()))
    }

    /// Append-only; duplicate entries only waste space (§4.4).
    pub fn insert(&self, query: &str, answer: &str, reference_ids: &BTreeSet<u64>) -> anyhow::Result<()> {
        let metadata = encode_metadata(answer, reference_ids);
        self.facade
            .insert(DOC_ID, DOC_ID, &[query.to_string()], &[metadata], None)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    #[test]
    fn cache_hit_requires_overlap_and_matching_references() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::open(dir.path()).unwrap();
        let refs: BTreeSet<u64> = [7, 12].into_iter().collect();
        cache
            .insert("what is X?", "X is ...", &refs)
            .unwrap();

        let hit = cache.lookup("what is X?", &refs).unwrap();
        assert_eq!(hit.as_deref(), Some("X is ..."));

        let other_refs: BTreeSet<u64> = [7].into_iter().collect();
        let miss = cache.lookup("what is X?", &other_refs).unwrap();
        assert_eq!(miss, None);
    }

    #[test]
    fn cache_miss_below_overlap_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::open(dir.path()).unwrap();
        let refs = BTreeSet::new();
        cache.insert("the quick brown fox jumps", "answer", &refs).unwrap();
        let miss = cache.lookup("completely different text", &refs).unwrap();
        assert_eq!(miss, None);
    }

    #[test]
    fn suggestions_are_distinct_and_capped() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::open(dir.path()).unwrap();
        let refs = BTreeSet::new();
        for _ in 0..3 {
            cache.insert("hello world", "a", &refs).unwrap();
        }
        let suggestions = cache.suggestions("hello").unwrap();
        assert_eq!(suggestions, vec!["hello world".to_string()]);
    }
}
