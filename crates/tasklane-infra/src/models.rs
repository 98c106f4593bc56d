//! Filesystem-backed process model store.
//!
//! Models are YAML files under the models directory. They are discovered,
//! parsed and validated once, at construction; invalid files are skipped
//! with a warning.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tasklane_core::model::{ModelError, discover_models, load_model_file};
use tasklane_core::repository::model::ProcessModelStore;
use tasklane_types::definition::ProcessModel;
use tasklane_types::error::RepositoryError;

/// Process models loaded from a directory tree.
#[derive(Debug, Clone)]
pub struct FsModelStore {
    base_dir: PathBuf,
    /// Sorted by id then version.
    models: Vec<(PathBuf, Arc<ProcessModel>)>,
}

impl FsModelStore {
    /// Discover every model under `base_dir`. A missing directory yields an
    /// empty store.
    pub fn load(base_dir: &Path) -> Result<Self, ModelError> {
        let mut models: Vec<(PathBuf, Arc<ProcessModel>)> = discover_models(base_dir)?
            .into_iter()
            .map(|(path, model)| (path, Arc::new(model)))
            .collect();
        models.sort_by(|(_, a), (_, b)| a.id.cmp(&b.id).then_with(|| a.version.cmp(&b.version)));

        for pair in models.windows(2) {
            let ((first_path, first), (second_path, second)) = (&pair[0], &pair[1]);
            if first.id == second.id && first.version == second.version {
                return Err(ModelError::ValidationError(format!(
                    "model '{}' version {} is defined by both {} and {}",
                    first.id,
                    first.version,
                    first_path.display(),
                    second_path.display()
                )));
            }
        }

        tracing::info!(dir = %base_dir.display(), count = models.len(), "process models loaded");
        Ok(Self {
            base_dir: base_dir.to_path_buf(),
            models,
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Validate a model file and copy it into the models directory as
    /// `{id}-{version}.yaml`. Returns the installed path.
    pub fn install(&mut self, source: &Path) -> Result<PathBuf, ModelError> {
        let model = load_model_file(source)?;
        if self
            .models
            .iter()
            .any(|(_, m)| m.id == model.id && m.version == model.version)
        {
            return Err(ModelError::ValidationError(format!(
                "model '{}' version {} is already installed",
                model.id, model.version
            )));
        }

        std::fs::create_dir_all(&self.base_dir)?;
        let target = self
            .base_dir
            .join(format!("{}-{}.yaml", model.id, model.version));
        std::fs::copy(source, &target)?;

        self.models.push((target.clone(), Arc::new(model)));
        self.models
            .sort_by(|(_, a), (_, b)| a.id.cmp(&b.id).then_with(|| a.version.cmp(&b.version)));
        Ok(target)
    }

    /// Where a loaded model came from.
    pub fn path_of(&self, id: &str, version: &semver::Version) -> Option<&Path> {
        self.models
            .iter()
            .find(|(_, m)| m.id == id && &m.version == version)
            .map(|(path, _)| path.as_path())
    }
}

impl ProcessModelStore for FsModelStore {
    async fn get_model(
        &self,
        id: &str,
        version: Option<&semver::Version>,
    ) -> Result<Option<Arc<ProcessModel>>, RepositoryError> {
        Ok(self
            .models
            .iter()
            .map(|(_, model)| model)
            .filter(|m| m.id == id)
            .filter(|m| version.is_none_or(|v| &m.version == v))
            .max_by(|a, b| a.version.cmp(&b.version))
            .cloned())
    }

    async fn list_models(&self) -> Result<Vec<Arc<ProcessModel>>, RepositoryError> {
        Ok(self.models.iter().map(|(_, m)| Arc::clone(m)).collect())
    }
}
