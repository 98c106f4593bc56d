//! Process model store port.

use std::sync::Arc;

use tasklane_types::definition::ProcessModel;
use tasklane_types::error::RepositoryError;

/// Source of validated process models.
///
/// Instances are pinned to a model version; passing `None` selects the
/// highest version available.
pub trait ProcessModelStore: Send + Sync {
    fn get_model(
        &self,
        id: &str,
        version: Option<&semver::Version>,
    ) -> impl std::future::Future<Output = Result<Option<Arc<ProcessModel>>, RepositoryError>> + Send;

    /// All models, sorted by id then version.
    fn list_models(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<Arc<ProcessModel>>, RepositoryError>> + Send;
}
