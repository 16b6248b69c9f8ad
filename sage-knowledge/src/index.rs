//! The knowledge index: chunked documents searchable by embedding similarity.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::KnowledgeSettings;
use crate::backend::{FlatIndex, VectorBackend};
use crate::chunker::TextChunker;
use crate::embeddings::{Embedder, build_embedder};
use crate::errors::{KnowledgeError, KnowledgeResult};
use crate::models::{ChunkHit, ChunkMeta, SourceSummary};
use crate::paths;
use crate::storage::{IndexStore, PersistedChunk, PersistedState, SourceMap};

/// Content-addressed chunk id: first 32 hex chars of
/// SHA-256(source id, ordinal, text).
pub fn chunk_id(source_id: &str, ordinal: usize, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_id.as_bytes());
    hasher.update([0u8]);
    hasher.update((ordinal as u64).to_le_bytes());
    hasher.update([0u8]);
    hasher.update(text.as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..32].to_string()
}

struct IndexState {
    backend: Box<dyn VectorBackend>,
    chunks: HashMap<String, ChunkMeta>,
    sources: SourceMap,
}

/// Everything removed for one source, kept so it can be put back.
struct RemovedSource {
    ids: Vec<String>,
    entries: Vec<(String, ChunkMeta, Vec<f32>)>,
}

struct NewChunk {
    id: String,
    meta: ChunkMeta,
    vector: Vec<f32>,
}

impl IndexState {
    fn snapshot(&self) -> PersistedState {
        let mut state = PersistedState::empty(self.backend.dimension());
        for (id, vector) in self.backend.records() {
            if let Some(meta) = self.chunks.get(&id) {
                state.index.chunks.push(PersistedChunk {
                    id,
                    meta: meta.clone(),
                    vector,
                });
            }
        }
        state.sources = self.sources.clone();
        state
    }

    /// Take a source out of the backend and both maps. On backend failure
    /// nothing is changed.
    fn remove_source(&mut self, source_id: &str) -> KnowledgeResult<Option<RemovedSource>> {
        let Some(ids) = self.sources.get(source_id).cloned() else {
            return Ok(None);
        };

        let entries: Vec<(String, ChunkMeta, Vec<f32>)> = ids
            .iter()
            .filter_map(|id| {
                let meta = self.chunks.get(id)?.clone();
                let vector = self.backend.get(id)?;
                Some((id.clone(), meta, vector))
            })
            .collect();

        if let Err(err) = self.backend.delete(&ids) {
            for (id, _, vector) in &entries {
                if self.backend.get(id).is_none()
                    && let Err(restore_err) = self.backend.upsert(id, vector.clone())
                {
                    error!(chunk_id = %id, error = %restore_err, "failed to restore vector after delete error");
                }
            }
            return Err(err);
        }

        self.sources.remove(source_id);
        for id in &ids {
            self.chunks.remove(id);
        }

        Ok(Some(RemovedSource { ids, entries }))
    }

    fn restore_source(&mut self, source_id: &str, removed: RemovedSource) {
        for (id, meta, vector) in removed.entries {
            if let Err(err) = self.backend.upsert(&id, vector) {
                error!(chunk_id = %id, error = %err, "failed to restore chunk");
                continue;
            }
            self.chunks.insert(id, meta);
        }
        self.sources.insert(source_id.to_string(), removed.ids);
    }

    fn insert_source(&mut self, source_id: &str, chunks: Vec<NewChunk>) -> KnowledgeResult<()> {
        let mut inserted: Vec<String> = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            if let Err(err) = self.backend.upsert(&chunk.id, chunk.vector.clone()) {
                if let Err(cleanup_err) = self.backend.delete(&inserted) {
                    error!(error = %cleanup_err, "failed to remove partially inserted chunks");
                }
                return Err(err);
            }
            inserted.push(chunk.id.clone());
        }

        for chunk in chunks {
            self.chunks.insert(chunk.id, chunk.meta);
        }
        self.sources.insert(source_id.to_string(), inserted);
        Ok(())
    }

    /// Undo `insert_source`, used when persisting fails.
    fn discard_source(&mut self, source_id: &str) {
        if let Some(ids) = self.sources.remove(source_id) {
            if let Err(err) = self.backend.delete(&ids) {
                error!(source_id, error = %err, "failed to discard chunks");
            }
            for id in &ids {
                self.chunks.remove(id);
            }
        }
    }
}

/// Chunked, embedded documents with source-scoped replace and delete.
///
/// Reads run concurrently. Mutations hold the write lock while they change
/// memory and persist both files, so readers only ever observe complete
/// states. Mutations on the same source id are serialized end to end.
pub struct KnowledgeIndex {
    settings: KnowledgeSettings,
    chunker: TextChunker,
    embedder: Arc<dyn Embedder>,
    store: IndexStore,
    state: RwLock<IndexState>,
    source_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KnowledgeIndex {
    /// Open the index described by `settings`, with the configured embedder
    /// and the flat cosine backend.
    pub async fn open(settings: KnowledgeSettings) -> KnowledgeResult<Self> {
        let dir = paths::index_dir(&settings)?;
        let embedder = build_embedder(&settings);
        let backend = Box::new(FlatIndex::new(settings.embedding_dim));
        Self::open_with(dir, settings, embedder, backend).await
    }

    /// Open with explicit collaborators. Persisted state found in `dir` is
    /// loaded into `backend`; corrupt state is discarded.
    pub async fn open_with(
        dir: impl Into<PathBuf>,
        settings: KnowledgeSettings,
        embedder: Arc<dyn Embedder>,
        mut backend: Box<dyn VectorBackend>,
    ) -> KnowledgeResult<Self> {
        let store = IndexStore::new(dir);
        tokio::fs::create_dir_all(store.dir()).await?;

        let loaded = {
            let store = store.clone();
            tokio::task::spawn_blocking(move || store.load())
                .await
                .map_err(|err| KnowledgeError::Backend(format!("load task failed: {err}")))?
        };

        let mut chunks = HashMap::new();
        let mut sources = SourceMap::new();

        match loaded {
            Ok(Some(persisted)) => match load_into(&mut *backend, persisted) {
                Ok((loaded_chunks, loaded_sources)) => {
                    chunks = loaded_chunks;
                    sources = loaded_sources;
                }
                Err(err) => {
                    backend.clear();
                    discard_persisted(&store, &err).await;
                }
            },
            Ok(None) => {}
            Err(err) => discard_persisted(&store, &err).await,
        }

        info!(
            dir = %store.dir().display(),
            sources = sources.len(),
            chunks = chunks.len(),
            embedder = embedder.name(),
            "knowledge index opened"
        );

        Ok(Self {
            chunker: TextChunker::new(settings.chunk_size, settings.chunk_overlap),
            settings,
            embedder,
            store,
            state: RwLock::new(IndexState {
                backend,
                chunks,
                sources,
            }),
            source_locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        self.store.dir()
    }

    pub fn settings(&self) -> &KnowledgeSettings {
        &self.settings
    }

    /// Refuse documents longer than `max_chars` characters.
    pub fn ensure_within_limit(text: &str, max_chars: usize) -> KnowledgeResult<()> {
        let actual = text.chars().count();
        if actual > max_chars {
            return Err(KnowledgeError::SizeLimitExceeded {
                limit: max_chars,
                actual,
            });
        }
        Ok(())
    }

    /// Index `text` under `source_id`, replacing any chunks the source
    /// already had. Returns the new chunk ids in document order.
    pub async fn add_document(
        &self,
        text: &str,
        source_id: &str,
        source_label: &str,
    ) -> KnowledgeResult<Vec<String>> {
        if let Some(max_chars) = self.settings.max_document_chars {
            Self::ensure_within_limit(text, max_chars)?;
        }

        let lock = self.source_lock(source_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.replace_source(text, source_id, source_label).await
        };
        self.release_source_lock(source_id, lock).await;
        result
    }

    async fn replace_source(
        &self,
        text: &str,
        source_id: &str,
        source_label: &str,
    ) -> KnowledgeResult<Vec<String>> {
        let texts = self.chunker.split(text);
        if texts.is_empty() {
            return Err(KnowledgeError::EmptyContent);
        }

        let vectors = self.embed_all(&texts).await?;
        let indexed_at = Utc::now();
        let new_chunks: Vec<NewChunk> = texts
            .into_iter()
            .zip(vectors)
            .enumerate()
            .map(|(ordinal, (text, vector))| NewChunk {
                id: chunk_id(source_id, ordinal, &text),
                meta: ChunkMeta {
                    source_id: source_id.to_string(),
                    source_label: source_label.to_string(),
                    ordinal,
                    text,
                    indexed_at,
                },
                vector,
            })
            .collect();
        let ids: Vec<String> = new_chunks.iter().map(|c| c.id.clone()).collect();

        let mut state = self.state.write().await;

        let previous = state.remove_source(source_id)?;
        if let Err(err) = state.insert_source(source_id, new_chunks) {
            if let Some(previous) = previous {
                state.restore_source(source_id, previous);
            }
            return Err(err);
        }

        if let Err(err) = self.persist(&state).await {
            state.discard_source(source_id);
            if let Some(previous) = previous {
                state.restore_source(source_id, previous);
            }
            self.rewrite_after_rollback(&state).await;
            return Err(err);
        }

        info!(
            source_id,
            chunks = ids.len(),
            replaced = previous.is_some(),
            "document indexed"
        );
        Ok(ids)
    }

    /// Remove every chunk of `source_id`. Returns `false` for unknown sources.
    pub async fn delete_source(&self, source_id: &str) -> KnowledgeResult<bool> {
        let lock = self.source_lock(source_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.remove_and_persist(source_id).await
        };
        self.release_source_lock(source_id, lock).await;
        result
    }

    async fn remove_and_persist(&self, source_id: &str) -> KnowledgeResult<bool> {
        let mut state = self.state.write().await;
        let Some(removed) = state.remove_source(source_id)? else {
            debug!(source_id, "delete requested for unknown source");
            return Ok(false);
        };
        let count = removed.ids.len();

        if let Err(err) = self.persist(&state).await {
            state.restore_source(source_id, removed);
            self.rewrite_after_rollback(&state).await;
            return Err(err);
        }

        info!(source_id, chunks = count, "source deleted");
        Ok(true)
    }

    /// Up to `k` chunks by descending similarity. Never fails: embedding
    /// errors are logged and produce no hits.
    pub async fn search(&self, query: &str, k: usize) -> Vec<ChunkHit> {
        if k == 0 || self.is_empty().await {
            return Vec::new();
        }

        let vector = match self.embedder.embed_batch(&[query.to_string()]).await {
            Ok(mut vectors) if !vectors.is_empty() => vectors.swap_remove(0),
            Ok(_) => {
                warn!("embedder returned no vector for query");
                return Vec::new();
            }
            Err(err) => {
                warn!(error = %err, "query embedding failed; returning no hits");
                return Vec::new();
            }
        };

        let state = self.state.read().await;
        let nearest = match state.backend.nearest(&vector, k) {
            Ok(nearest) => nearest,
            Err(err) => {
                warn!(error = %err, "similarity search failed; returning no hits");
                return Vec::new();
            }
        };

        nearest
            .into_iter()
            .filter_map(|(chunk_id, score)| {
                let meta = state.chunks.get(&chunk_id)?;
                Some(ChunkHit {
                    chunk_id,
                    source_id: meta.source_id.clone(),
                    source_label: meta.source_label.clone(),
                    text: meta.text.clone(),
                    score,
                    indexed_at: meta.indexed_at,
                })
            })
            .collect()
    }

    /// One summary per source, ordered by source id.
    pub async fn list_sources(&self) -> Vec<SourceSummary> {
        let state = self.state.read().await;
        state
            .sources
            .iter()
            .filter_map(|(source_id, ids)| summarize(&state.chunks, source_id, ids))
            .collect()
    }

    pub async fn source(&self, source_id: &str) -> KnowledgeResult<SourceSummary> {
        let state = self.state.read().await;
        state
            .sources
            .get(source_id)
            .and_then(|ids| summarize(&state.chunks, source_id, ids))
            .ok_or_else(|| KnowledgeError::NotFound(source_id.to_string()))
    }

    pub async fn contains_source(&self, source_id: &str) -> bool {
        self.state.read().await.sources.contains_key(source_id)
    }

    pub async fn chunk_count(&self) -> usize {
        self.state.read().await.chunks.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.chunks.is_empty()
    }

    /// Delete the persisted files, then drop every source. If the files
    /// cannot be removed the index keeps its contents.
    pub async fn clear(&self) -> KnowledgeResult<()> {
        let mut state = self.state.write().await;

        let store = self.store.clone();
        let removed = tokio::task::spawn_blocking(move || store.remove())
            .await
            .map_err(|err| KnowledgeError::Backend(format!("clear task failed: {err}")))?;
        if let Err(err) = removed {
            self.rewrite_after_rollback(&state).await;
            return Err(err);
        }

        state.backend.clear();
        state.chunks.clear();
        state.sources.clear();

        info!(dir = %self.store.dir().display(), "knowledge index cleared");
        Ok(())
    }

    async fn source_lock(&self, source_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.source_locks.lock().await;
        locks
            .entry(source_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the lock entry once no other operation holds or waits on it.
    async fn release_source_lock(&self, source_id: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.source_locks.lock().await;
        if Arc::strong_count(&lock) == 2 {
            locks.remove(source_id);
        }
    }

    /// Bring both files back in line with memory after a failed write.
    /// Failures are logged; the caller reports the original error.
    async fn rewrite_after_rollback(&self, state: &IndexState) {
        if let Err(err) = self.persist(state).await {
            error!(
                dir = %self.store.dir().display(),
                error = %err,
                "failed to rewrite knowledge index after rollback"
            );
        }
    }

    async fn embed_all(&self, texts: &[String]) -> KnowledgeResult<Vec<Vec<f32>>> {
        let batch = self.settings.embedding_batch.max(1);
        let mut vectors = Vec::with_capacity(texts.len());
        for group in texts.chunks(batch) {
            let embedded = self.embedder.embed_batch(group).await?;
            if embedded.len() != group.len() {
                return Err(KnowledgeError::Embedding(format!(
                    "expected {} embeddings, got {}",
                    group.len(),
                    embedded.len()
                )));
            }
            vectors.extend(embedded);
        }
        Ok(vectors)
    }

    async fn persist(&self, state: &IndexState) -> KnowledgeResult<()> {
        let snapshot = state.snapshot();
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || store.save(&snapshot))
            .await
            .map_err(|err| KnowledgeError::Backend(format!("persist task failed: {err}")))?
    }
}

fn summarize(
    chunks: &HashMap<String, ChunkMeta>,
    source_id: &str,
    ids: &[String],
) -> Option<SourceSummary> {
    let first = chunks.get(ids.first()?)?;
    Some(SourceSummary {
        source_id: source_id.to_string(),
        label: first.source_label.clone(),
        chunk_count: ids.len(),
        indexed_at: first.indexed_at,
    })
}

fn load_into(
    backend: &mut dyn VectorBackend,
    persisted: PersistedState,
) -> KnowledgeResult<(HashMap<String, ChunkMeta>, SourceMap)> {
    let mut chunks = HashMap::with_capacity(persisted.index.chunks.len());
    for chunk in persisted.index.chunks {
        backend
            .upsert(&chunk.id, chunk.vector)
            .map_err(|err| KnowledgeError::CorruptState(format!("chunk {}: {err}", chunk.id)))?;
        chunks.insert(chunk.id, chunk.meta);
    }
    Ok((chunks, persisted.sources))
}

async fn discard_persisted(store: &IndexStore, cause: &KnowledgeError) {
    error!(
        dir = %store.dir().display(),
        error = %cause,
        "discarding unreadable knowledge index; starting empty"
    );
    let store = store.clone();
    match tokio::task::spawn_blocking(move || store.remove()).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => error!(error = %err, "failed to remove corrupt index files"),
        Err(err) => error!(error = %err, "failed to remove corrupt index files"),
    }
}
