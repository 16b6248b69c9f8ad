//! On-disk form of the knowledge index.
//!
//! Two JSON files live in the index directory: `index.json` (dimension plus
//! every chunk with its vector and metadata) and `source_map.json`
//! (`{ "source id": ["chunk id", ...] }`). Both are replaced atomically.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{KnowledgeError, KnowledgeResult};
use crate::models::ChunkMeta;
use crate::paths::{INDEX_FILE, SOURCE_MAP_FILE};

pub const FORMAT_VERSION: u32 = 1;

pub type SourceMap = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedIndex {
    pub version: u32,
    pub dimension: Option<usize>,
    pub chunks: Vec<PersistedChunk>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedChunk {
    pub id: String,
    #[serde(flatten)]
    pub meta: ChunkMeta,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct PersistedState {
    pub index: PersistedIndex,
    pub sources: SourceMap,
}

impl PersistedState {
    pub fn empty(dimension: Option<usize>) -> Self {
        Self {
            index: PersistedIndex {
                version: FORMAT_VERSION,
                dimension,
                chunks: Vec::new(),
            },
            sources: SourceMap::new(),
        }
    }

    /// Check that the source map and the chunk list describe the same chunk set.
    pub fn validate(&self) -> KnowledgeResult<()> {
        if self.index.version != FORMAT_VERSION {
            return Err(KnowledgeError::CorruptState(format!(
                "unsupported index version {} (expected {})",
                self.index.version, FORMAT_VERSION
            )));
        }

        let mut chunks_by_id = HashMap::new();
        for chunk in &self.index.chunks {
            if chunks_by_id.insert(chunk.id.as_str(), chunk).is_some() {
                return Err(KnowledgeError::CorruptState(format!(
                    "duplicate chunk id {}",
                    chunk.id
                )));
            }
            if let Some(dim) = self.index.dimension
                && chunk.vector.len() != dim
            {
                return Err(KnowledgeError::CorruptState(format!(
                    "chunk {} has dimension {}, index declares {}",
                    chunk.id,
                    chunk.vector.len(),
                    dim
                )));
            }
        }

        let mut mapped = 0usize;
        for (source_id, ids) in &self.sources {
            if ids.is_empty() {
                return Err(KnowledgeError::CorruptState(format!(
                    "source {source_id} has no chunks"
                )));
            }
            for id in ids {
                let Some(chunk) = chunks_by_id.get(id.as_str()) else {
                    return Err(KnowledgeError::CorruptState(format!(
                        "source {source_id} references missing chunk {id}"
                    )));
                };
                if &chunk.meta.source_id != source_id {
                    return Err(KnowledgeError::CorruptState(format!(
                        "chunk {id} belongs to {} but is mapped under {source_id}",
                        chunk.meta.source_id
                    )));
                }
                mapped += 1;
            }
        }

        if mapped != self.index.chunks.len() {
            return Err(KnowledgeError::CorruptState(format!(
                "{} chunks stored but {} mapped to sources",
                self.index.chunks.len(),
                mapped
            )));
        }

        Ok(())
    }
}

/// File-level access to the index directory.
#[derive(Debug, Clone)]
pub struct IndexStore {
    dir: PathBuf,
}

impl IndexStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn index_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }

    pub fn source_map_path(&self) -> PathBuf {
        self.dir.join(SOURCE_MAP_FILE)
    }

    /// Read persisted state. `Ok(None)` means nothing was ever saved.
    pub fn load(&self) -> KnowledgeResult<Option<PersistedState>> {
        let index_path = self.index_path();
        let map_path = self.source_map_path();

        match (index_path.exists(), map_path.exists()) {
            (false, false) => return Ok(None),
            (true, false) => {
                return Err(KnowledgeError::CorruptState(
                    "index.json present without source_map.json".to_string(),
                ));
            }
            (false, true) => {
                return Err(KnowledgeError::CorruptState(
                    "source_map.json present without index.json".to_string(),
                ));
            }
            (true, true) => {}
        }

        let index_bytes = fs::read(&index_path)?;
        let map_bytes = fs::read(&map_path)?;

        let index: PersistedIndex = serde_json::from_slice(&index_bytes)
            .map_err(|err| KnowledgeError::CorruptState(format!("index.json: {err}")))?;
        let sources: SourceMap = serde_json::from_slice(&map_bytes)
            .map_err(|err| KnowledgeError::CorruptState(format!("source_map.json: {err}")))?;

        let state = PersistedState { index, sources };
        state.validate()?;
        Ok(Some(state))
    }

    pub fn save(&self, state: &PersistedState) -> KnowledgeResult<()> {
        fs::create_dir_all(&self.dir)?;
        let index_bytes = serde_json::to_vec(&state.index)?;
        let map_bytes = serde_json::to_vec_pretty(&state.sources)?;
        // Both files are written out before either is replaced.
        let index_file = self.stage(&index_bytes)?;
        let map_file = self.stage(&map_bytes)?;
        index_file
            .persist(self.index_path())
            .map_err(|err| err.error)?;
        map_file
            .persist(self.source_map_path())
            .map_err(|err| err.error)?;
        Ok(())
    }

    /// Delete both files. Missing files are not an error.
    pub fn remove(&self) -> KnowledgeResult<()> {
        for path in [self.index_path(), self.source_map_path()] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    fn stage(&self, bytes: &[u8]) -> KnowledgeResult<tempfile::NamedTempFile> {
        let mut file = tempfile::NamedTempFile::new_in(&self.dir)?;
        file.write_all(bytes)?;
        file.as_file().sync_all()?;
        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn chunk(id: &str, source: &str) -> PersistedChunk {
        PersistedChunk {
            id: id.to_string(),
            meta: ChunkMeta {
                source_id: source.to_string(),
                source_label: format!("{source}.txt"),
                ordinal: 0,
                text: "text".to_string(),
                indexed_at: Utc::now(),
            },
            vector: vec![1.0, 0.0],
        }
    }

    fn state() -> PersistedState {
        let mut state = PersistedState::empty(Some(2));
        state.index.chunks.push(chunk("c1", "doc1"));
        state
            .sources
            .insert("doc1".to_string(), vec!["c1".to_string()]);
        state
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path().join("idx"));
        assert!(store.load().unwrap().is_none());

        store.save(&state()).unwrap();
        let loaded = store.load().unwrap().expect("state");
        assert_eq!(loaded.index.chunks.len(), 1);
        assert_eq!(loaded.sources["doc1"], vec!["c1".to_string()]);

        let raw = fs::read_to_string(store.source_map_path()).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed, serde_json::json!({ "doc1": ["c1"] }));
    }

    #[test]
    fn orphan_chunk_is_corrupt() {
        let mut state = state();
        state.index.chunks.push(chunk("c2", "doc2"));
        assert!(matches!(
            state.validate(),
            Err(KnowledgeError::CorruptState(_))
        ));
    }

    #[test]
    fn dangling_source_entry_is_corrupt() {
        let mut state = state();
        state
            .sources
            .insert("doc2".to_string(), vec!["missing".to_string()]);
        assert!(matches!(
            state.validate(),
            Err(KnowledgeError::CorruptState(_))
        ));
    }

    #[test]
    fn version_mismatch_is_corrupt() {
        let mut state = state();
        state.index.version = 99;
        assert!(matches!(
            state.validate(),
            Err(KnowledgeError::CorruptState(_))
        ));
    }

    #[test]
    fn unparsable_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path());
        store.save(&state()).unwrap();
        fs::write(store.index_path(), b"{ not json").unwrap();
        assert!(matches!(
            store.load(),
            Err(KnowledgeError::CorruptState(_))
        ));
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path());
        store.save(&state()).unwrap();
        store.remove().unwrap();
        store.remove().unwrap();
        assert!(store.load().unwrap().is_none());
    }
}
