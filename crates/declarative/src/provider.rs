//! Resource provider capability
//!
//! Providers do the actual cloud work. The engine only knows the three calls
//! below and routes each node to the provider registered for the package
//! prefix of its type (`aws:ec2/Vpc` goes to `aws`).

use crate::error::{Error, ProviderError, Result};
use crate::types::Properties;
use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// How an immutable change is carried out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplacementStrategy {
    /// Create the new instance, destroy the old one after dependents moved
    #[default]
    CreateBeforeDelete,
    /// Destroy first; needed when two instances cannot coexist
    DeleteBeforeCreate,
}

/// Which properties can change in place
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdatableProperties {
    /// Only the listed properties
    Only(BTreeSet<String>),
    /// Everything except the listed properties
    AllExcept(BTreeSet<String>),
}

impl UpdatableProperties {
    pub fn allows(&self, property: &str) -> bool {
        match self {
            Self::Only(listed) => listed.contains(property),
            Self::AllExcept(listed) => !listed.contains(property),
        }
    }
}

impl Default for UpdatableProperties {
    fn default() -> Self {
        Self::Only(BTreeSet::new())
    }
}

/// Provider metadata for one resource type
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSchema {
    #[serde(default)]
    pub updatable: UpdatableProperties,
    #[serde(default)]
    pub replacement: ReplacementStrategy,
    /// At most one instance may exist at a time
    #[serde(default)]
    pub exclusive: bool,
}

static FALLBACK_SCHEMA: ResourceSchema = ResourceSchema {
    updatable: UpdatableProperties::Only(BTreeSet::new()),
    replacement: ReplacementStrategy::CreateBeforeDelete,
    exclusive: false,
};

impl ResourceSchema {
    /// Schema where only `properties` are updatable in place
    pub fn updatable<I, S>(properties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            updatable: UpdatableProperties::Only(properties.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    /// Schema where everything except `properties` is updatable in place
    pub fn immutable<I, S>(properties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            updatable: UpdatableProperties::AllExcept(
                properties.into_iter().map(Into::into).collect(),
            ),
            ..Self::default()
        }
    }

    pub fn with_replacement(mut self, replacement: ReplacementStrategy) -> Self {
        self.replacement = replacement;
        self
    }

    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    pub fn is_updatable(&self, property: &str) -> bool {
        self.updatable.allows(property)
    }

    /// Exclusive types are always replaced delete-first
    pub fn effective_replacement(&self) -> ReplacementStrategy {
        if self.exclusive {
            ReplacementStrategy::DeleteBeforeCreate
        } else {
            self.replacement
        }
    }
}

/// Result of a successful `apply`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Applied {
    pub outputs: Properties,
    pub provider_id: String,
}

/// The capability a cloud provider implements
#[async_trait]
pub trait Provider: Send + Sync {
    /// Human-readable name for logs
    fn name(&self) -> &str;

    async fn describe(&self, resource_type: &str) -> std::result::Result<ResourceSchema, ProviderError>;

    /// Create (no `prior_id`) or update in place (with `prior_id`)
    async fn apply(
        &self,
        resource_type: &str,
        inputs: &Properties,
        prior_id: Option<&str>,
    ) -> std::result::Result<Applied, ProviderError>;

    async fn destroy(
        &self,
        resource_type: &str,
        provider_id: &str,
    ) -> std::result::Result<(), ProviderError>;
}

/// Package prefix of a resource type (`aws:ec2/Vpc` -> `aws`)
pub fn package_of(resource_type: &str) -> &str {
    resource_type
        .split_once(':')
        .map_or(resource_type, |(package, _)| package)
}

/// Providers keyed by type prefix
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: IndexMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, package: impl Into<String>, provider: Arc<dyn Provider>) -> &mut Self {
        self.providers.insert(package.into(), provider);
        self
    }

    pub fn provider_for(&self, resource_type: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(package_of(resource_type)).cloned()
    }

    pub fn packages(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }

    /// Ask each provider for the schema of every listed type
    pub async fn describe_all<'a, I>(&self, resource_types: I) -> Result<SchemaCatalog>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut catalog = SchemaCatalog::default();
        for resource_type in resource_types {
            if catalog.schemas.contains_key(resource_type) {
                continue;
            }
            let provider = self
                .provider_for(resource_type)
                .ok_or_else(|| Error::NoProvider(resource_type.to_string()))?;
            let schema = provider
                .describe(resource_type)
                .await
                .map_err(|source| Error::Describe {
                    resource_type: resource_type.to_string(),
                    source,
                })?;
            log::debug!(
                "{} describes {resource_type}: {:?}",
                provider.name(),
                schema
            );
            catalog.insert(resource_type, schema);
        }
        Ok(catalog)
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("packages", &self.providers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Schemas for the types of one pass
#[derive(Debug, Clone, Default)]
pub struct SchemaCatalog {
    schemas: HashMap<String, ResourceSchema>,
}

impl SchemaCatalog {
    pub fn insert(&mut self, resource_type: impl Into<String>, schema: ResourceSchema) {
        self.schemas.insert(resource_type.into(), schema);
    }

    /// Schema for a type; unknown types treat every property as immutable
    pub fn schema_for(&self, resource_type: &str) -> &ResourceSchema {
        self.schemas.get(resource_type).unwrap_or(&FALLBACK_SCHEMA)
    }
}
