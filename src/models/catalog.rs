//! Filesystem model catalog
//!
//! Text models live one directory per model under the text root; the
//! transcription and synthesis models live one directory per model under
//! the speech root.

use super::Capability;
use crate::{NeuroChatError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A resolved catalog entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub capability: Capability,
    pub identifier: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ModelCatalog {
    text_root: PathBuf,
    speech_root: PathBuf,
}

impl ModelCatalog {
    pub fn new(text_root: impl Into<PathBuf>, speech_root: impl Into<PathBuf>) -> Self {
        Self {
            text_root: text_root.into(),
            speech_root: speech_root.into(),
        }
    }

    pub fn root_for(&self, capability: Capability) -> &Path {
        match capability {
            Capability::TextGeneration => &self.text_root,
            Capability::Transcription | Capability::SpeechSynthesis => &self.speech_root,
        }
    }

    /// Look up `identifier` for `capability`.
    ///
    /// Identifiers are plain names; anything that would escape the root is
    /// treated as absent.
    pub fn locate(&self, capability: Capability, identifier: &str) -> Result<CatalogEntry> {
        if !is_plain_name(identifier) {
            return Err(NeuroChatError::ModelNotFound(format!(
                "{} model {:?} is not a catalog name",
                capability, identifier
            )));
        }

        let path = self.root_for(capability).join(identifier);
        if !path.is_dir() {
            return Err(NeuroChatError::ModelNotFound(format!(
                "{} model {:?} not found under {:?}",
                capability,
                identifier,
                self.root_for(capability)
            )));
        }

        debug!("Catalog resolved {} {:?} -> {:?}", capability, identifier, path);

        Ok(CatalogEntry {
            capability,
            identifier: identifier.to_string(),
            path,
        })
    }

    /// Selectable model names for `capability`
    pub fn list(&self, capability: Capability) -> Result<Vec<String>> {
        list_entries(self.root_for(capability))
    }
}

/// Entry names under `root`, sorted, skipping `.txt` placeholder files
pub fn list_entries(root: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();

    for entry in fs::read_dir(root)? {
        let name = entry?.file_name().to_string_lossy().into_owned();
        if name.ends_with(".txt") || name.starts_with('.') {
            continue;
        }
        names.push(name);
    }

    names.sort();
    Ok(names)
}

pub(crate) fn is_plain_name(identifier: &str) -> bool {
    !identifier.is_empty()
        && identifier != "."
        && identifier != ".."
        && !identifier.contains(['/', '\\'])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> (tempfile::TempDir, ModelCatalog) {
        let dir = tempfile::tempdir().unwrap();
        let text = dir.path().join("llm_models");
        let speech = dir.path().join("speech_models");
        fs::create_dir_all(text.join("demo-model")).unwrap();
        fs::create_dir_all(speech.join("medium")).unwrap();
        fs::write(text.join("put_models_here.txt"), "").unwrap();
        fs::write(text.join("stray-file"), "").unwrap();
        let catalog = ModelCatalog::new(text, speech);
        (dir, catalog)
    }

    #[test]
    fn test_locate_existing() {
        let (_dir, catalog) = catalog();
        let entry = catalog
            .locate(Capability::TextGeneration, "demo-model")
            .unwrap();
        assert_eq!(entry.identifier, "demo-model");
        assert!(entry.path.ends_with("llm_models/demo-model"));

        let entry = catalog.locate(Capability::Transcription, "medium").unwrap();
        assert_eq!(entry.capability, Capability::Transcription);
    }

    #[test]
    fn test_locate_missing() {
        let (_dir, catalog) = catalog();
        let err = catalog
            .locate(Capability::TextGeneration, "absent")
            .unwrap_err();
        assert!(matches!(err, NeuroChatError::ModelNotFound(_)));
    }

    #[test]
    fn test_locate_rejects_files_and_traversal() {
        let (_dir, catalog) = catalog();
        for name in ["stray-file", "../llm_models", "", ".."] {
            assert!(matches!(
                catalog.locate(Capability::TextGeneration, name),
                Err(NeuroChatError::ModelNotFound(_))
            ));
        }
    }

    #[test]
    fn test_list_skips_placeholders() {
        let (_dir, catalog) = catalog();
        let names = catalog.list(Capability::TextGeneration).unwrap();
        assert_eq!(names, vec!["demo-model".to_string(), "stray-file".to_string()]);
    }
}
