//! Scripted provider for engine tests

use crate::error::ProviderError;
use crate::provider::{Applied, Provider, ResourceSchema};
use crate::types::Properties;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    Apply { name: String, prior: Option<String> },
    Destroy { name: String, provider_id: String },
}

/// Records every call, fabricates `<name>-<n>` ids and fails on request.
///
/// Nodes are told apart by their `name` input.
pub(crate) struct ScriptedProvider {
    schemas: HashMap<String, ResourceSchema>,
    failures: Mutex<HashMap<String, VecDeque<Option<ProviderError>>>>,
    calls: Mutex<Vec<Call>>,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    next_id: AtomicUsize,
}

impl ScriptedProvider {
    pub(crate) fn new() -> Self {
        Self {
            schemas: HashMap::new(),
            failures: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            next_id: AtomicUsize::new(1),
        }
    }

    pub(crate) fn with_schema(mut self, resource_type: &str, schema: ResourceSchema) -> Self {
        self.schemas.insert(resource_type.to_string(), schema);
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Queue a failure for the next call touching `name`
    pub(crate) fn fail_next(&self, name: &str, error: ProviderError) {
        self.failures
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .push_back(Some(error));
    }

    /// Let the next call touching `name` through ahead of queued failures
    pub(crate) fn pass_next(&self, name: &str) {
        self.failures
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .push_back(None);
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn applied(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Apply { name, .. } => Some(name),
                Call::Destroy { .. } => None,
            })
            .collect()
    }

    pub(crate) fn destroyed(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Destroy { name, .. } => Some(name),
                Call::Apply { .. } => None,
            })
            .collect()
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn run(&self, name: &str, call: Call) -> Result<(), ProviderError> {
        self.calls.lock().unwrap().push(call);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let failure = self
            .failures
            .lock()
            .unwrap()
            .get_mut(name)
            .and_then(VecDeque::pop_front)
            .flatten();
        failure.map_or(Ok(()), Err)
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn describe(&self, resource_type: &str) -> Result<ResourceSchema, ProviderError> {
        Ok(self
            .schemas
            .get(resource_type)
            .cloned()
            .unwrap_or_else(|| ResourceSchema::updatable(["tags"])))
    }

    async fn apply(
        &self,
        resource_type: &str,
        inputs: &Properties,
        prior_id: Option<&str>,
    ) -> Result<Applied, ProviderError> {
        let name = inputs
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or(resource_type)
            .to_string();
        self.run(
            &name,
            Call::Apply {
                name: name.clone(),
                prior: prior_id.map(ToString::to_string),
            },
        )
        .await?;

        let provider_id = prior_id.map_or_else(
            || format!("{name}-{}", self.next_id.fetch_add(1, Ordering::SeqCst)),
            ToString::to_string,
        );
        let mut outputs = inputs.clone();
        outputs.insert("id".to_string(), json!(provider_id));
        outputs.insert(
            "arn".to_string(),
            json!(format!("arn:{resource_type}:{provider_id}")),
        );
        Ok(Applied {
            outputs,
            provider_id,
        })
    }

    async fn destroy(&self, _resource_type: &str, provider_id: &str) -> Result<(), ProviderError> {
        let name = provider_id
            .rsplit_once('-')
            .map_or(provider_id, |(name, _)| name)
            .to_string();
        self.run(
            &name,
            Call::Destroy {
                name: name.clone(),
                provider_id: provider_id.to_string(),
            },
        )
        .await
    }
}
