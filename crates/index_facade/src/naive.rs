//! The default, in-process implementation of [`IndexEngine`]. Scores
//! chunks by case-sensitive whitespace token overlap with the query text
//! (the same primitive the Response Cache uses, §4.4), folding in upvote
//! and association boosts additively. This keeps `IndexEngine` a real trait
//! boundary — another engine could be swapped in — without inventing a
//! vector-search stack that is out of scope for this exercise (§4.1
//! SPEC_FULL.md supplement).
use std::{
    collections::{
        BTreeMap,
        HashMap,
        HashSet,
    },
    path::Path,
};

use errors::ErrorMetadata;
use index_protocol::{
    Chunk,
    Constraint,
    ConstraintOp,
    Constraints,
    Document,
    Metadata,
};
use serde::{
    Deserialize,
    Serialize,
};

use crate::engine::IndexEngine;

/// Dominates ordinary token-overlap scores, so an explicit upvote always
/// outranks incidental lexical overlap (scenario 2, §8).
const UPVOTE_BOOST: f32 = 1_000_000.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredChunk {
    id: u64,
    text: String,
    document: String,
    doc_id: String,
    version: u32,
    metadata: Metadata,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct NaiveEngine {
    next_chunk_id: u64,
    chunks: BTreeMap<u64, StoredChunk>,
    /// doc_id -> version -> chunk ids inserted at that version.
    versions: BTreeMap<String, BTreeMap<u32, Vec<u64>>>,
    /// exact query string -> (chunk id -> boost weight).
    upvotes: HashMap<String, HashMap<u64, f32>>,
    /// bidirectional phrase associations: phrase -> (other phrase, strength).
    associations: HashMap<String, Vec<(String, u32)>>,
}

fn tokenize(s: &str) -> HashSet<&str> {
    s.split_whitespace().collect()
}

fn token_overlap_count(query: &str, text: &str) -> f32 {
    let q = tokenize(query);
    let t = tokenize(text);
    q.intersection(&t).count() as f32
}

fn constraint_matches(metadata: &Metadata, field: &str, constraint: &Constraint) -> bool {
    use index_protocol::{
        MetadataValue,
        Scalar,
    };
    let Some(value) = metadata.get(field) else {
        // Unknown fields yield zero results, not an error (§4.1, §9).
        return false;
    };
    let scalar = match value {
        MetadataValue::Scalar(s) => s,
        MetadataValue::Array(_) => return false,
    };
    match constraint.op {
        ConstraintOp::Eq => scalar_eq(scalar, &constraint.value),
        ConstraintOp::Lt => match (scalar.as_f64(), constraint.value.as_f64()) {
            (Some(a), Some(b)) => a < b,
            _ => false,
        },
        ConstraintOp::Gt => match (scalar.as_f64(), constraint.value.as_f64()) {
            (Some(a), Some(b)) => a > b,
            _ => false,
        },
        // The router rejects `Unknown` with 422 before a query reaches the
        // engine; reachable only if a caller builds one directly in Rust.
        ConstraintOp::Unknown => false,
    }
}

fn scalar_eq(a: &index_protocol::Scalar, b: &index_protocol::Scalar) -> bool {
    use index_protocol::Scalar::*;
    match (a, b) {
        (Null, Null) => true,
        (Bool(x), Bool(y)) => x == y,
        (Int(x), Int(y)) => x == y,
        (Float(x), Float(y)) => x == y,
        (Str(x), Str(y)) => x == y,
        (Int(x), Float(y)) | (Float(y), Int(x)) => *x as f64 == *y,
        _ => false,
    }
}

impl NaiveEngine {
    fn latest_version(&self, doc_id: &str) -> Option<u32> {
        self.versions.get(doc_id).and_then(|v| v.keys().next_back().copied())
    }

    fn upvote_boost(&self, query: &str, chunk_id: u64) -> f32 {
        self.upvotes
            .get(query)
            .and_then(|m| m.get(&chunk_id))
            .copied()
            .unwrap_or(0.0)
    }

    fn association_boost(&self, query: &str, text: &str) -> f32 {
        let Some(links) = self.associations.get(query) else {
            return 0.0;
        };
        links
            .iter()
            .filter(|(phrase, _)| text.contains(phrase.as_str()))
            .map(|(_, strength)| *strength as f32)
            .sum()
    }
}

impl IndexEngine for NaiveEngine {
    fn query(&self, text: &str, top_k: usize, constraints: &Constraints) -> anyhow::Result<Vec<Chunk>> {
        let mut scored: Vec<(f32, &StoredChunk)> = self
            .chunks
            .values()
            .filter(|c| {
                constraints
                    .iter()
                    .all(|(field, constraint)| constraint_matches(&c.metadata, field, constraint))
            })
            .map(|c| {
                let score = token_overlap_count(text, &c.text)
                    + self.association_boost(text, &c.text)
                    + self.upvote_boost(text, c.id);
                (score, c)
            })
            .collect();
        // Descending by score, ties broken by ascending chunk id (§4.1).
        scored.sort_by(|(score_a, a), (score_b, b)| {
            score_b
                .partial_cmp(score_a)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(score, c)| Chunk {
                id: c.id,
                text: c.text.clone(),
                document: c.document.clone(),
                doc_id: c.doc_id.clone(),
                score,
                metadata: c.metadata.clone(),
            })
            .collect())
    }

    fn insert(
        &mut self,
        document: &str,
        doc_id: &str,
        chunks: &[String],
        metadata: &[Metadata],
        version: Option<u32>,
    ) -> anyhow::Result<()> {
        if chunks.is_empty() {
            anyhow::bail!(ErrorMetadata::bad_request(
                "EmptyChunks",
                "Insert requires at least one chunk",
            ));
        }
        let new_version = version.unwrap_or_else(|| self.latest_version(doc_id).map_or(1, |v| v + 1));
        let mut ids = Vec::with_capacity(chunks.len());
        for (i, text) in chunks.iter().enumerate() {
            let id = self.next_chunk_id;
            self.next_chunk_id += 1;
            let chunk_metadata = metadata.get(i).cloned().unwrap_or_default();
            self.chunks.insert(
                id,
                StoredChunk {
                    id,
                    text: text.clone(),
                    document: document.to_string(),
                    doc_id: doc_id.to_string(),
                    version: new_version,
                    metadata: chunk_metadata,
                },
            );
            ids.push(id);
        }
        self.versions
            .entry(doc_id.to_string())
            .or_default()
            .insert(new_version, ids);
        Ok(())
    }

    fn delete(&mut self, doc_id: &str, keep_latest_version: bool) -> anyhow::Result<()> {
        let Some(doc_versions) = self.versions.get_mut(doc_id) else {
            // No-op if doc_id is absent (§4.1).
            return Ok(());
        };
        if keep_latest_version {
            let Some(&latest) = doc_versions.keys().next_back() else {
                return Ok(());
            };
            let to_remove: Vec<u32> = doc_versions.keys().filter(|&&v| v != latest).copied().collect();
            for v in to_remove {
                if let Some(ids) = doc_versions.remove(&v) {
                    for id in ids {
                        self.chunks.remove(&id);
                    }
                }
            }
        } else {
            for (_, ids) in doc_versions.iter() {
                for id in ids {
                    self.chunks.remove(id);
                }
            }
            self.versions.remove(doc_id);
        }
        Ok(())
    }

    fn finetune(&mut self, queries: &[String], labels: &[u64]) -> anyhow::Result<()> {
        if queries.len() != labels.len() {
            anyhow::bail!(ErrorMetadata::bad_request(
                "LengthMismatch",
                "finetune queries and labels must have equal length",
            ));
        }
        for (query, label) in queries.iter().zip(labels) {
            *self
                .upvotes
                .entry(query.clone())
                .or_default()
                .entry(*label)
                .or_insert(0.0) += UPVOTE_BOOST;
        }
        Ok(())
    }

    fn associate(&mut self, sources: &[String], targets: &[String], strength: u32) -> anyhow::Result<()> {
        if sources.len() != targets.len() {
            anyhow::bail!(ErrorMetadata::bad_request(
                "LengthMismatch",
                "associate sources and targets must have equal length",
            ));
        }
        for (source, target) in sources.iter().zip(targets) {
            self.associations
                .entry(source.clone())
                .or_default()
                .push((target.clone(), strength));
            self.associations
                .entry(target.clone())
                .or_default()
                .push((source.clone(), strength));
        }
        Ok(())
    }

    fn sources(&self) -> anyhow::Result<Vec<Document>> {
        let mut docs: Vec<Document> = self
            .versions
            .iter()
            .filter_map(|(doc_id, versions)| {
                let (&latest, ids) = versions.iter().next_back()?;
                let document = ids
                    .first()
                    .and_then(|id| self.chunks.get(id))
                    .map(|c| c.document.clone())?;
                Some(Document {
                    document,
                    doc_id: doc_id.clone(),
                    doc_version: latest,
                })
            })
            .collect();
        docs.sort_by(|a, b| a.document.cmp(&b.document).then_with(|| a.doc_id.cmp(&b.doc_id)));
        Ok(docs)
    }

    fn save(&self, path: &Path) -> anyhow::Result<()> {
        std::fs::create_dir_all(path)?;
        let file = std::fs::File::create(path.join("engine.json"))?;
        serde_json::to_writer(file, self)?;
        Ok(())
    }

    fn load(path: &Path) -> anyhow::Result<Self> {
        let file_path = path.join("engine.json");
        if !file_path.exists() {
            return Ok(Self::default());
        }
        let file = std::fs::File::open(file_path)?;
        Ok(serde_json::from_reader(file)?)
    }

    fn len(&self) -> usize {
        self.chunks.len()
    }
}

#[cfg(test)]
mod tests {
    use index_protocol::{
        Metadata,
        Scalar,
    };

    use super::*;

    fn meta(year: i64) -> Metadata {
        let mut m = Metadata::new();
        m.insert(
            "year".to_string(),
            index_protocol::MetadataValue::Scalar(Scalar::Int(year)),
        );
        m
    }

    #[test]
    fn insert_and_query_scenario_1() {
        let mut engine = NaiveEngine::default();
        engine
            .insert(
                "a.pdf",
                "d1",
                &["the cat sat".to_string(), "on the mat".to_string()],
                &[],
                None,
            )
            .unwrap();
        let results = engine.query("cat", 1, &Constraints::new()).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].text, "the cat sat");
        assert_eq!(results[0].document, "a.pdf");
    }

    #[test]
    fn upvote_reranks_scenario_2() {
        let mut engine = NaiveEngine::default();
        engine
            .insert(
                "doc",
                "d2",
                &["alpha beta".to_string(), "gamma delta".to_string()],
                &[],
                None,
            )
            .unwrap();
        let gamma_id = engine
            .query("gamma", 1, &Constraints::new())
            .unwrap()[0]
            .id;
        engine
            .finetune(&["alpha".to_string()], &[gamma_id])
            .unwrap();
        let top = &engine.query("alpha", 1, &Constraints::new()).unwrap()[0];
        assert_eq!(top.id, gamma_id);
    }

    #[test]
    fn constraint_filter_scenario_3() {
        let mut engine = NaiveEngine::default();
        engine
            .insert(
                "doc",
                "d3",
                &["x one".to_string(), "x two".to_string()],
                &[meta(2020), meta(2024)],
                None,
            )
            .unwrap();
        let mut constraints = Constraints::new();
        constraints.insert(
            "year".to_string(),
            Constraint {
                op: ConstraintOp::Gt,
                value: Scalar::Int(2021),
            },
        );
        let results = engine.query("x", 5, &constraints).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].text, "x two");
    }

    #[test]
    fn reinsert_bumps_version() {
        let mut engine = NaiveEngine::default();
        engine.insert("a", "d1", &["one".to_string()], &[], None).unwrap();
        engine.insert("a", "d1", &["two".to_string()], &[], None).unwrap();
        let docs = engine.sources().unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].doc_version, 2);
    }

    #[test]
    fn delete_unknown_doc_id_is_noop() {
        let mut engine = NaiveEngine::default();
        assert!(engine.delete("nope", false).is_ok());
    }

    #[test]
    fn delete_keep_latest_purges_old_versions() {
        let mut engine = NaiveEngine::default();
        engine.insert("a", "d1", &["one".to_string()], &[], None).unwrap();
        engine.insert("a", "d1", &["two".to_string()], &[], None).unwrap();
        engine.delete("d1", true).unwrap();
        assert_eq!(engine.len(), 1);
        let docs = engine.sources().unwrap();
        assert_eq!(docs[0].doc_version, 2);
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = NaiveEngine::default();
        engine.insert("a", "d1", &["one".to_string()], &[], None).unwrap();
        engine.save(dir.path()).unwrap();
        let loaded = NaiveEngine::load(dir.path()).unwrap();
        assert_eq!(loaded.len(), 1);
    }

    #[test]
    fn sources_are_sorted() {
        let mut engine = NaiveEngine::default();
        engine.insert("b.pdf", "d2", &["x".to_string()], &[], None).unwrap();
        engine.insert("a.pdf", "d1", &["y".to_string()], &[], None).unwrap();
        let docs = engine.sources().unwrap();
        assert_eq!(docs[0].document, "a.pdf");
        assert_eq!(docs[1].document, "b.pdf");
    }
}
