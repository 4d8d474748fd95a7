//! In-process provider that fabricates resources
//!
//! Echoes inputs back as outputs and assigns random ids. Used for dry runs,
//! demos and tests of declarations without touching a cloud.

use async_trait::async_trait;
use declarative::{Applied, Properties, Provider, ProviderError, ResourceSchema};
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::BTreeSet;

/// Provider whose resources exist only in the state file
#[derive(Debug, Default)]
pub struct SimulatedProvider {
    name: String,
    immutable: IndexMap<String, BTreeSet<String>>,
    exclusive: BTreeSet<String>,
}

impl SimulatedProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Mark properties of a type as requiring replacement
    pub fn with_immutable<I, S>(mut self, resource_type: impl Into<String>, properties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.immutable
            .entry(resource_type.into())
            .or_default()
            .extend(properties.into_iter().map(Into::into));
        self
    }

    /// Allow at most one instance of a type at a time
    pub fn with_exclusive(mut self, resource_type: impl Into<String>) -> Self {
        self.exclusive.insert(resource_type.into());
        self
    }
}

/// Short prefix for fabricated ids (`aws:ec2/SecurityGroup` -> `securitygroup`)
fn id_prefix(resource_type: &str) -> String {
    resource_type
        .rsplit(['/', ':'])
        .next()
        .unwrap_or(resource_type)
        .to_lowercase()
}

#[async_trait]
impl Provider for SimulatedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn describe(&self, resource_type: &str) -> Result<ResourceSchema, ProviderError> {
        let immutable = self
            .immutable
            .get(resource_type)
            .cloned()
            .unwrap_or_default();
        let schema = ResourceSchema::immutable(immutable);
        Ok(if self.exclusive.contains(resource_type) {
            schema.exclusive()
        } else {
            schema
        })
    }

    async fn apply(
        &self,
        resource_type: &str,
        inputs: &Properties,
        prior_id: Option<&str>,
    ) -> Result<Applied, ProviderError> {
        let provider_id = prior_id.map_or_else(
            || format!("{}-{}", id_prefix(resource_type), nanoid::nanoid!(10)),
            ToString::to_string,
        );
        log::debug!(
            "{}: {} {resource_type} {provider_id}",
            self.name,
            if prior_id.is_some() { "updated" } else { "created" }
        );

        let mut outputs = inputs.clone();
        outputs.insert("id".to_string(), Value::String(provider_id.clone()));
        outputs.insert(
            "urn".to_string(),
            Value::String(format!("urn:{}:{resource_type}::{provider_id}", self.name)),
        );
        Ok(Applied {
            outputs,
            provider_id,
        })
    }

    async fn destroy(&self, resource_type: &str, provider_id: &str) -> Result<(), ProviderError> {
        log::debug!("{}: destroyed {resource_type} {provider_id}", self.name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use declarative::ReplacementStrategy;
    use serde_json::json;

    #[test]
    fn test_id_prefix() {
        assert_eq!(id_prefix("aws:ec2/SecurityGroup"), "securitygroup");
        assert_eq!(id_prefix("gcp:storage/Bucket"), "bucket");
        assert_eq!(id_prefix("random"), "random");
    }

    #[tokio::test]
    async fn test_apply_echoes_inputs() {
        let provider = SimulatedProvider::new("aws");
        let mut inputs = Properties::new();
        inputs.insert("cidrBlock".to_string(), json!("10.0.0.0/16"));

        let created = provider.apply("aws:ec2/Vpc", &inputs, None).await.unwrap();
        assert!(created.provider_id.starts_with("vpc-"));
        assert_eq!(created.outputs["cidrBlock"], json!("10.0.0.0/16"));
        assert_eq!(created.outputs["id"], json!(created.provider_id));

        let updated = provider
            .apply("aws:ec2/Vpc", &inputs, Some(&created.provider_id))
            .await
            .unwrap();
        assert_eq!(updated.provider_id, created.provider_id);
    }

    #[tokio::test]
    async fn test_ids_are_unique() {
        let provider = SimulatedProvider::new("aws");
        let a = provider
            .apply("aws:s3/Bucket", &Properties::new(), None)
            .await
            .unwrap();
        let b = provider
            .apply("aws:s3/Bucket", &Properties::new(), None)
            .await
            .unwrap();
        assert_ne!(a.provider_id, b.provider_id);
    }

    #[tokio::test]
    async fn test_describe_uses_configuration() {
        let provider = SimulatedProvider::new("gcp")
            .with_immutable("gcp:storage/Bucket", ["name", "location"])
            .with_exclusive("gcp:storage/Bucket");

        let bucket = provider.describe("gcp:storage/Bucket").await.unwrap();
        assert!(!bucket.is_updatable("location"));
        assert!(bucket.is_updatable("labels"));
        assert_eq!(
            bucket.effective_replacement(),
            ReplacementStrategy::DeleteBeforeCreate
        );

        let topic = provider.describe("gcp:pubsub/Topic").await.unwrap();
        assert!(topic.is_updatable("name"));
        assert_eq!(
            topic.effective_replacement(),
            ReplacementStrategy::CreateBeforeDelete
        );
    }
}
