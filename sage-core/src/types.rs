use serde::{Deserialize, Serialize};

/// Where the assistant is allowed to look for context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMode {
    /// Knowledge index first, external search only when the index has nothing.
    #[default]
    #[serde(alias = "kb_then_web")]
    KbThenExternal,
    /// Knowledge index only.
    KbOnly,
    /// External search only.
    #[serde(alias = "web_only")]
    ExternalOnly,
}

impl RetrievalMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetrievalMode::KbThenExternal => "kb_then_external",
            RetrievalMode::KbOnly => "kb_only",
            RetrievalMode::ExternalOnly => "external_only",
        }
    }

    /// Whether the knowledge index may be consulted.
    pub fn uses_knowledge_index(&self) -> bool {
        matches!(self, RetrievalMode::KbThenExternal | RetrievalMode::KbOnly)
    }

    /// Whether external search may be consulted.
    pub fn uses_external_search(&self) -> bool {
        matches!(
            self,
            RetrievalMode::KbThenExternal | RetrievalMode::ExternalOnly
        )
    }
}

impl std::fmt::Display for RetrievalMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RetrievalMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "kb_then_external" | "kb_then_web" => Ok(RetrievalMode::KbThenExternal),
            "kb_only" => Ok(RetrievalMode::KbOnly),
            "external_only" | "web_only" => Ok(RetrievalMode::ExternalOnly),
            _ => Err(format!("Unknown retrieval mode: {}", s)),
        }
    }
}

/// Generation backends the gateway knows how to drive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProviderType {
    #[default]
    OpenAiCompatible,
    Ollama,
}

impl ProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::OpenAiCompatible => "openai_compatible",
            ProviderType::Ollama => "ollama",
        }
    }
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ProviderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai_compatible" | "openai-compatible" | "openai" => {
                Ok(ProviderType::OpenAiCompatible)
            }
            "ollama" => Ok(ProviderType::Ollama),
            _ => Err(format!("Unknown provider: {}", s)),
        }
    }
}

/// Embedding backends for the knowledge index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProviderType {
    /// Ollama-style `/api/embed` endpoint.
    #[default]
    Ollama,
    /// Local feature-hashing embedder, no network.
    Hashing,
}

impl EmbeddingProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingProviderType::Ollama => "ollama",
            EmbeddingProviderType::Hashing => "hashing",
        }
    }
}

impl std::fmt::Display for EmbeddingProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retrieval_mode_parses_legacy_names() {
        assert_eq!(
            "kb_then_web".parse::<RetrievalMode>().unwrap(),
            RetrievalMode::KbThenExternal
        );
        assert_eq!(
            "WEB_ONLY".parse::<RetrievalMode>().unwrap(),
            RetrievalMode::ExternalOnly
        );
        assert!("everything".parse::<RetrievalMode>().is_err());
    }

    #[test]
    fn retrieval_mode_permissions() {
        assert!(RetrievalMode::KbOnly.uses_knowledge_index());
        assert!(!RetrievalMode::KbOnly.uses_external_search());
        assert!(!RetrievalMode::ExternalOnly.uses_knowledge_index());
        assert!(RetrievalMode::KbThenExternal.uses_external_search());
    }

    #[test]
    fn provider_type_roundtrip() {
        for provider in [ProviderType::OpenAiCompatible, ProviderType::Ollama] {
            assert_eq!(provider.as_str().parse::<ProviderType>().unwrap(), provider);
        }
    }
}
