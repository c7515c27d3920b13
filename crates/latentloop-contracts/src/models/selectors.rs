use thiserror::Error;

use super::registry::{ModelRegistry, ModelSpec};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelSelectionError {
    #[error("Model '{0}' is not in the registry.")]
    Unknown(String),
    #[error("Model '{0}' is not available yet.")]
    Unsupported(String),
}

#[derive(Debug, Clone)]
pub struct ModelSelector {
    pub registry: ModelRegistry,
}

impl ModelSelector {
    pub fn new(registry: ModelRegistry) -> Self {
        Self { registry }
    }

    /// Resolves a menu choice. `has_provider` reports whether a generation
    /// path exists for the model's provider; a model without one counts as
    /// unsupported, the same as an explicitly disabled model.
    pub fn select(
        &self,
        requested: &str,
        has_provider: impl Fn(&str) -> bool,
    ) -> Result<ModelSpec, ModelSelectionError> {
        let requested = requested.trim();
        let Some(model) = self.registry.get(requested) else {
            return Err(ModelSelectionError::Unknown(requested.to_string()));
        };
        if !model.enabled || !has_provider(&model.provider) {
            return Err(ModelSelectionError::Unsupported(model.name.clone()));
        }
        Ok(model.clone())
    }
}
