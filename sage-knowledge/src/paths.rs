use std::path::PathBuf;

use crate::KnowledgeSettings;
use crate::errors::{KnowledgeError, KnowledgeResult};

pub const KNOWLEDGE_DIR: &str = "knowledge";
pub const INDEX_FILE: &str = "index.json";
pub const SOURCE_MAP_FILE: &str = "source_map.json";

pub fn data_root() -> KnowledgeResult<PathBuf> {
    if let Ok(override_dir) = std::env::var("SAGE_DATA_DIR") {
        return Ok(PathBuf::from(override_dir));
    }

    let dir = dirs::data_dir().ok_or(KnowledgeError::MissingDataDir)?;
    Ok(dir.join("sage"))
}

pub fn index_dir(settings: &KnowledgeSettings) -> KnowledgeResult<PathBuf> {
    if let Some(path) = &settings.index_dir_override {
        return Ok(path.clone());
    }
    Ok(data_root()?.join(KNOWLEDGE_DIR))
}
