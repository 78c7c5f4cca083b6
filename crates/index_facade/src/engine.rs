use std::path::Path;

use index_protocol::{
    Chunk,
    Constraints,
    Document,
    Metadata,
};

/// The interface consumed from the external index engine (§4.1, §6.4). All
/// calls are blocking; errors are opaque to the core beyond their message,
/// which callers attach to an `ErrorMetadata` at the facade boundary.
pub trait IndexEngine: Send + Sync + Sized {
    fn query(&self, text: &str, top_k: usize, constraints: &Constraints) -> anyhow::Result<Vec<Chunk>>;

    fn insert(
        &mut self,
        document: &str,
        doc_id: &str,
        chunks: &[String],
        metadata: &[Metadata],
        version: Option<u32>,
    ) -> anyhow::Result<()>;

    fn delete(&mut self, doc_id: &str, keep_latest_version: bool) -> anyhow::Result<()>;

    fn finetune(&mut self, queries: &[String], labels: &[u64]) -> anyhow::Result<()>;

    fn associate(&mut self, sources: &[String], targets: &[String], strength: u32) -> anyhow::Result<()>;

    /// Deterministic order: ascending by `document`, then `doc_id` (§4.1).
    fn sources(&self) -> anyhow::Result<Vec<Document>>;

    fn save(&self, path: &Path) -> anyhow::Result<()>;

    fn load(path: &Path) -> anyhow::Result<Self>;

    /// Number of chunks currently stored. Exposed for metrics/tests only.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
