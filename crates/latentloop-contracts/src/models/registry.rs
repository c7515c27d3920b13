use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// One selectable generative model.
///
/// `seed_dimension` is the length of every seed vector sent to the model;
/// a disabled model stays listed in the menu but cannot start a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub name: String,
    pub provider: String,
    pub seed_dimension: usize,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub description: String,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelSpec>,
}

impl ModelRegistry {
    pub fn new(models: Option<IndexMap<String, ModelSpec>>) -> Self {
        Self {
            models: models.unwrap_or_else(default_models),
        }
    }

    pub fn from_specs(specs: Vec<ModelSpec>) -> Self {
        let models = specs
            .into_iter()
            .map(|spec| (spec.name.clone(), spec))
            .collect::<IndexMap<String, ModelSpec>>();
        Self::new(Some(models))
    }

    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        self.models.get(name)
    }

    pub fn list(&self) -> impl Iterator<Item = &ModelSpec> {
        self.models.values()
    }

    pub fn names(&self) -> Vec<String> {
        self.models.keys().cloned().collect()
    }
}

fn default_models() -> IndexMap<String, ModelSpec> {
    let mut map = IndexMap::new();

    let mut insert =
        |name: &str, provider: &str, seed_dimension: usize, enabled: bool, description: &str| {
            map.insert(
                name.to_string(),
                ModelSpec {
                    name: name.to_string(),
                    provider: provider.to_string(),
                    seed_dimension,
                    enabled,
                    description: description.to_string(),
                },
            );
        };

    insert(
        "stylegan3-r-ffhq",
        "http",
        512,
        true,
        "StyleGAN3-R trained on FFHQ faces, 1024x1024.",
    );
    insert(
        "dryrun-faces",
        "dryrun",
        100,
        true,
        "Offline synthetic images derived from the seed values.",
    );
    insert(
        "stylegan2-anime",
        "http",
        512,
        false,
        "StyleGAN2 anime portraits. Not available yet.",
    );

    map
}

#[cfg(test)]
mod tests {
    use super::{ModelRegistry, ModelSpec};

    #[test]
    fn default_registry_keeps_declaration_order() {
        let registry = ModelRegistry::new(None);
        assert_eq!(
            registry.names(),
            vec!["stylegan3-r-ffhq", "dryrun-faces", "stylegan2-anime"]
        );
        assert_eq!(
            registry.get("stylegan3-r-ffhq").map(|m| m.seed_dimension),
            Some(512)
        );
    }

    #[test]
    fn spec_deserializes_with_defaults() -> anyhow::Result<()> {
        let spec: ModelSpec = serde_json::from_str(
            r#"{"name": "tiny", "provider": "dryrun", "seed_dimension": 8}"#,
        )?;
        assert!(spec.enabled);
        assert_eq!(spec.description, "");
        let registry = ModelRegistry::from_specs(vec![spec]);
        assert_eq!(registry.names(), vec!["tiny"]);
        Ok(())
    }
}
