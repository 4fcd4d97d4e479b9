//! JSON run input: a registry version, its requirements and the indexed
//! documents produced by the external indexer.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::models::{content_hash, IndexedDocument, Requirement};
use crate::pipeline::EngineError;
use crate::registry::RequirementRegistry;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunInput {
    pub registry_version: String,
    pub requirements: Vec<Requirement>,
    pub documents: Vec<DocumentInput>,
}

/// An indexed document as delivered by the indexer. The content hash is
/// computed from the text when the indexer does not supply one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentInput {
    #[serde(default)]
    pub hash: Option<String>,
    pub classification: String,
    pub text: String,
    #[serde(default)]
    pub source_name: Option<String>,
}

impl From<DocumentInput> for IndexedDocument {
    fn from(input: DocumentInput) -> Self {
        let hash = input
            .hash
            .filter(|h| !h.trim().is_empty())
            .unwrap_or_else(|| content_hash(&input.text));
        IndexedDocument {
            hash,
            classification: input.classification,
            text: input.text,
            source_name: input.source_name,
        }
    }
}

impl RunInput {
    pub fn from_json(raw: &str) -> Result<Self, EngineError> {
        serde_json::from_str(raw).map_err(|e| EngineError::Input(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Input(format!("{}: {e}", path.display())))?;
        Self::from_json(&raw)
    }

    /// Build the registry (validating ids and edges) and the document set.
    pub fn into_parts(self) -> Result<(RequirementRegistry, Vec<IndexedDocument>), EngineError> {
        let registry = RequirementRegistry::new(&self.registry_version, self.requirements)?;
        let documents = self.documents.into_iter().map(IndexedDocument::from).collect();
        Ok((registry, documents))
    }
}
