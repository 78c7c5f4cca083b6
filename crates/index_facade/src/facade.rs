use std::path::{
    Path,
    PathBuf,
};

use errors::ErrorMetadata;
use index_protocol::{
    Constraints,
    Document,
    Metadata,
};
use tracing::instrument;

use crate::{
    engine::IndexEngine,
    split_rw_lock::{
        new_split_rw_lock,
        Reader,
        Writer,
    },
};

/// A thin typed contract over the external index engine (§4.1). Owns
/// exactly one live handle, behind a split reader/writer guard so queries
/// don't serialize against the apply loop, while snapshot/restore can still
/// get exclusive access (§5).
pub struct IndexFacade<E: IndexEngine> {
    writer: Writer<E>,
    path: PathBuf,
}

impl<E: IndexEngine> IndexFacade<E> {
    /// Opens (or creates) the index at `path`.
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let engine = E::load(&path)?;
        let (_reader, writer) = new_split_rw_lock(engine);
        Ok(Self { writer, path })
    }

    pub fn reader(&self) -> Reader<E> {
        self.writer.reader()
    }

    /// Exposes the exclusive guard, used by the RSM apply loop (which holds
    /// the shared guard — see `writer.reader()`) and by snapshot/restore
    /// (which take this guard directly).
    pub fn writer(&self) -> &Writer<E> {
        &self.writer
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    #[instrument(skip(self, constraints))]
    pub fn query(&self, text: &str, top_k: i64, constraints: &Constraints) -> anyhow::Result<Vec<index_protocol::Chunk>> {
        if top_k <= 0 {
            anyhow::bail!(ErrorMetadata::bad_request(
                "InvalidTopK",
                "top_k must be > 0",
            ));
        }
        let guard = self.writer.read();
        guard.query(text, top_k as usize, constraints)
    }

    pub fn insert(
        &self,
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
        if !(metadata.is_empty() || metadata.len() == chunks.len()) {
            anyhow::bail!(ErrorMetadata::bad_request(
                "MetadataLengthMismatch",
                "metadata must be empty or have one entry per chunk",
            ));
        }
        let mut guard = self.writer.write();
        guard
            .insert(document, doc_id, chunks, metadata, version)
            .map_err(|e| anyhow::anyhow!(ErrorMetadata::internal(e.to_string())))
    }

    pub fn delete(&self, doc_id: &str, keep_latest_version: bool) -> anyhow::Result<()> {
        let mut guard = self.writer.write();
        guard
            .delete(doc_id, keep_latest_version)
            .map_err(|e| anyhow::anyhow!(ErrorMetadata::internal(e.to_string())))
    }

    pub fn finetune(&self, queries: &[String], labels: &[u64]) -> anyhow::Result<()> {
        if queries.len() != labels.len() {
            anyhow::bail!(ErrorMetadata::bad_request(
                "LengthMismatch",
                "queries and labels must have equal length",
            ));
        }
        let mut guard = self.writer.write();
        guard
            .finetune(queries, labels)
            .map_err(|e| anyhow::anyhow!(ErrorMetadata::internal(e.to_string())))
    }

    pub fn associate(&self, sources: &[String], targets: &[String], strength: u32) -> anyhow::Result<()> {
        if strength < 1 {
            anyhow::bail!(ErrorMetadata::bad_request(
                "InvalidStrength",
                "Associate strength must be >= 1",
            ));
        }
        let mut guard = self.writer.write();
        guard
            .associate(sources, targets, strength)
            .map_err(|e| anyhow::anyhow!(ErrorMetadata::internal(e.to_string())))
    }

    pub fn sources(&self) -> anyhow::Result<Vec<Document>> {
        let guard = self.writer.read();
        guard.sources()
    }

    /// Exclusive guard: no apply may proceed while a snapshot is taken, and
    /// vice versa (§3.2 invariant 3).
    pub fn save(&self, snapshot_path: &Path) -> anyhow::Result<()> {
        let guard = self.writer.write();
        guard.save(snapshot_path)
    }

    /// Swaps in a freshly loaded engine under the exclusive guard. Errors
    /// leave the previous handle intact (§4.3 restore protocol).
    pub fn restore_from(&self, snapshot_path: &Path) -> anyhow::Result<()> {
        let restored = E::load(snapshot_path)
            .map_err(|e| anyhow::anyhow!(ErrorMetadata::internal(format!("restore failed: {e}"))))?;
        let mut guard = self.writer.write();
        *guard = restored;
        Ok(())
    }

    /// Releases the live handle. Consuming `self` makes the release
    /// explicit at call sites even though `Drop` would do the same thing.
    pub fn close(self) {
        drop(self)
    }
}
