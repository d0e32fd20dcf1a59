//! Installed-apps manifest
//!
//! The manifest lives at `<install_dir>/installed_apps.json` and has the shape
//! `{ "apps": [InstalledApp, ...] }`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::Deserialize;

use super::RegistryError;
use crate::domain::InstalledApp;

pub const MANIFEST_FILE_NAME: &str = "installed_apps.json";

/// Where the registry reads installed apps from.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ManifestSource: Send + Sync {
    /// Read the complete app list. Every app must have at least one candidate.
    async fn load(&self) -> Result<Vec<InstalledApp>, RegistryError>;

    /// File to poll for changes, if the source is file-backed
    fn watch_path(&self) -> Option<PathBuf>;
}

#[derive(Debug, Deserialize)]
struct ManifestDocument {
    #[serde(default)]
    apps: Vec<InstalledApp>,
}

/// Parse and validate a manifest document.
pub fn parse_manifest(contents: &str) -> Result<Vec<InstalledApp>, RegistryError> {
    let document: ManifestDocument = serde_json::from_str(contents)?;

    if let Some(app) = document.apps.iter().find(|a| a.candidates.is_empty()) {
        return Err(RegistryError::NoCandidates(app.label.clone()));
    }
    Ok(document.apps)
}

/// Manifest read from a JSON file
#[derive(Debug, Clone)]
pub struct FileManifest {
    path: PathBuf,
}

impl FileManifest {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The manifest inside an install directory
    pub fn in_dir(install_dir: impl AsRef<Path>) -> Self {
        Self::new(install_dir.as_ref().join(MANIFEST_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ManifestSource for FileManifest {
    async fn load(&self) -> Result<Vec<InstalledApp>, RegistryError> {
        let contents =
            tokio::fs::read_to_string(&self.path)
                .await
                .map_err(|source| RegistryError::Io {
                    path: self.path.display().to_string(),
                    source,
                })?;
        parse_manifest(&contents)
    }

    fn watch_path(&self) -> Option<PathBuf> {
        Some(self.path.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_manifest() {
        let apps = parse_manifest(
            r#"{"apps":[{"label":"a","sourceLocation":"s","name":"A","mountPoint":"a","secret":"00","candidates":[{"version":"0.1.0"}]}]}"#,
        )
        .unwrap();

        assert_eq!(apps.len(), 1);
        assert_eq!(apps[0].mount_point, "a");
    }

    #[test]
    fn test_parse_empty_manifest() {
        assert!(parse_manifest("{}").unwrap().is_empty());
    }

    #[test]
    fn test_app_without_candidates_rejected() {
        let result = parse_manifest(
            r#"{"apps":[{"label":"a","name":"A","mountPoint":"a","secret":"00","candidates":[]}]}"#,
        );

        assert!(matches!(result, Err(RegistryError::NoCandidates(label)) if label == "a"));
    }

    #[test]
    fn test_invalid_version_rejected() {
        let result = parse_manifest(
            r#"{"apps":[{"label":"a","name":"A","mountPoint":"a","secret":"00","candidates":[{"version":"one"}]}]}"#,
        );

        assert!(matches!(result, Err(RegistryError::Parse(_))));
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = FileManifest::in_dir(dir.path());

        assert!(matches!(manifest.load().await, Err(RegistryError::Io { .. })));
        assert_eq!(manifest.watch_path(), Some(dir.path().join(MANIFEST_FILE_NAME)));
    }
}
