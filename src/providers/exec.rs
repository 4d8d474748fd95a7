//! External plugin provider - one process per call, JSON over stdin/stdout
//!
//! The plugin is invoked as `<command> [args...] <operation>` where the
//! operation is `describe`, `apply` or `destroy`. The request is written to
//! stdin as a single JSON object; a successful call prints a JSON response on
//! stdout and exits 0.
//!
//! Failures are reported either by exiting non-zero or by printing
//! `{"error": {"message": "...", "transient": true}}`. Exit code 75
//! (`EX_TEMPFAIL`) always means a transient failure.

use async_trait::async_trait;
use declarative::{Applied, Properties, Provider, ProviderError, ResourceSchema};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Exit code that marks a retryable failure
pub const EX_TEMPFAIL: i32 = 75;

const STDERR_PREVIEW_CHARS: usize = 2_000;

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Request<'a> {
    Describe {
        #[serde(rename = "type")]
        resource_type: &'a str,
    },
    Apply {
        #[serde(rename = "type")]
        resource_type: &'a str,
        inputs: &'a Properties,
        #[serde(skip_serializing_if = "Option::is_none")]
        prior_id: Option<&'a str>,
    },
    Destroy {
        #[serde(rename = "type")]
        resource_type: &'a str,
        provider_id: &'a str,
    },
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
    #[serde(default)]
    transient: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

/// Provider backed by an external executable
#[derive(Debug)]
pub struct ExecProvider {
    name: String,
    command: String,
    args: Vec<String>,
    schemas: Mutex<HashMap<String, ResourceSchema>>,
}

impl ExecProvider {
    pub fn new(name: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args,
            schemas: Mutex::new(HashMap::new()),
        }
    }

    fn cached(&self, resource_type: &str) -> Option<ResourceSchema> {
        match self.schemas.lock() {
            Ok(schemas) => schemas.get(resource_type).cloned(),
            Err(poisoned) => poisoned.into_inner().get(resource_type).cloned(),
        }
    }

    fn remember(&self, resource_type: &str, schema: ResourceSchema) {
        match self.schemas.lock() {
            Ok(mut schemas) => schemas.insert(resource_type.to_string(), schema),
            Err(poisoned) => poisoned
                .into_inner()
                .insert(resource_type.to_string(), schema),
        };
    }

    async fn invoke<T: DeserializeOwned>(
        &self,
        operation: &str,
        request: &Request<'_>,
    ) -> Result<T, ProviderError> {
        let payload = serde_json::to_vec(request)
            .map_err(|e| ProviderError::permanent(format!("failed to encode request: {e}")))?;

        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .arg(operation)
            .kill_on_drop(true)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        log::trace!("{}: running {} {operation}", self.name, self.command);
        let mut child = cmd.spawn().map_err(|e| {
            ProviderError::permanent(format!("failed to start '{}': {e}", self.command))
        })?;

        // stdout is drained while the request is still being written
        let writer = child.stdin.take().map(|mut stdin| {
            let name = self.name.clone();
            tokio::spawn(async move {
                // a plugin may exit without reading its request
                if let Err(e) = stdin.write_all(&payload).await {
                    log::debug!("{name}: could not write request: {e}");
                }
            })
        });

        let output = child.wait_with_output().await.map_err(|e| {
            ProviderError::transient(format!("failed to wait for '{}': {e}", self.command))
        })?;
        if let Some(writer) = writer
            && let Err(e) = writer.await
        {
            log::debug!("{}: request writer stopped: {e}", self.name);
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(&stdout) {
            let ErrorBody { message, transient } = envelope.error;
            return Err(match transient {
                Some(true) => ProviderError::transient(message),
                Some(false) => ProviderError::permanent(message),
                None => ProviderError::from_message(&message),
            });
        }

        if !output.status.success() {
            let message = format!(
                "{operation} exited with {}: {}",
                output.status,
                preview(stderr.trim(), STDERR_PREVIEW_CHARS)
            );
            return Err(if output.status.code() == Some(EX_TEMPFAIL) {
                ProviderError::transient(message)
            } else {
                ProviderError::permanent(message)
            });
        }

        let body = if stdout.trim().is_empty() {
            "null"
        } else {
            stdout.as_ref()
        };
        serde_json::from_str(body).map_err(|e| {
            ProviderError::permanent(format!("invalid {operation} response: {e}"))
        })
    }
}

#[async_trait]
impl Provider for ExecProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn describe(&self, resource_type: &str) -> Result<ResourceSchema, ProviderError> {
        if let Some(schema) = self.cached(resource_type) {
            return Ok(schema);
        }
        let schema: ResourceSchema = self
            .invoke("describe", &Request::Describe { resource_type })
            .await?;
        self.remember(resource_type, schema.clone());
        Ok(schema)
    }

    async fn apply(
        &self,
        resource_type: &str,
        inputs: &Properties,
        prior_id: Option<&str>,
    ) -> Result<Applied, ProviderError> {
        self.invoke(
            "apply",
            &Request::Apply {
                resource_type,
                inputs,
                prior_id,
            },
        )
        .await
    }

    async fn destroy(&self, resource_type: &str, provider_id: &str) -> Result<(), ProviderError> {
        let _: Value = self
            .invoke(
                "destroy",
                &Request::Destroy {
                    resource_type,
                    provider_id,
                },
            )
            .await?;
        Ok(())
    }
}

fn preview(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(limit).collect();
    cut.push_str("...");
    cut
}
