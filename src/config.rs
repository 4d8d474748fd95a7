//! Declaration file loading
//!
//! A declaration is a TOML document with optional `[settings]`, `[config]`,
//! `[providers.<package>]` and `[exports]` tables plus any number of
//! `[[resource]]` entries. See `infragraph.example.toml`.

use anyhow::{Context, Result};
use declarative::{ExecuteOptions, Graph, GraphBuilder, ProviderRegistry, RetryConfig};
use indexmap::IndexMap;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::interpolate::{self, ConfigEntry};
use crate::providers::{ExecProvider, SimulatedProvider};

/// Default declaration file name
pub const DEFAULT_FILE: &str = "infragraph.toml";

/// Default state location, relative to the declaration
pub const DEFAULT_STATE: &str = ".infragraph/state.json";

// ============================================================================
// File Format
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Declaration {
    #[serde(default)]
    pub settings: Settings,

    #[serde(default)]
    pub config: IndexMap<String, ConfigValue>,

    #[serde(default)]
    pub providers: IndexMap<String, ProviderConfig>,

    #[serde(default, rename = "resource")]
    pub resources: Vec<ResourceDecl>,

    #[serde(default)]
    pub exports: IndexMap<String, toml::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Max in-flight provider calls
    pub jobs: Option<usize>,
    pub max_attempts: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub timeout_secs: Option<u64>,
    /// State file path; `~` is expanded, relative paths are resolved
    /// against the declaration's directory
    pub state: Option<String>,
}

/// A config value, optionally flagged secret
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Detailed {
        value: toml::Value,
        #[serde(default)]
        secret: bool,
    },
    Plain(toml::Value),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum ProviderConfig {
    /// External plugin executable
    Exec {
        command: String,
        #[serde(default)]
        args: Vec<String>,
    },
    /// In-process stand-in
    Simulated {
        #[serde(default)]
        immutable: IndexMap<String, Vec<String>>,
        #[serde(default)]
        exclusive: Vec<String>,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    #[serde(default)]
    pub inputs: IndexMap<String, toml::Value>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub replace_on_changes: Vec<String>,
    /// Input properties to treat as secret even without secret config
    #[serde(default)]
    pub secrets: Vec<String>,
}

// ============================================================================
// Loading
// ============================================================================

/// A loaded declaration and where it came from
#[derive(Debug)]
pub struct Loaded {
    pub path: PathBuf,
    pub declaration: Declaration,
}

impl Loaded {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read declaration {}", path.display()))?;
        let declaration = Declaration::parse(&content)
            .with_context(|| format!("Invalid declaration {}", path.display()))?;
        log::debug!(
            "Loaded {} resources from {}",
            declaration.resources.len(),
            path.display()
        );
        Ok(Self {
            path: path.to_path_buf(),
            declaration,
        })
    }

    /// State file location for this declaration
    pub fn state_path(&self) -> PathBuf {
        let configured = self
            .declaration
            .settings
            .state
            .as_deref()
            .unwrap_or(DEFAULT_STATE);
        let expanded = PathBuf::from(shellexpand::tilde(configured).as_ref());
        if expanded.is_absolute() {
            return expanded;
        }
        match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.join(expanded),
            _ => expanded,
        }
    }
}

impl Declaration {
    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Config values available to `${config.key}`
    fn config_entries(&self) -> IndexMap<String, ConfigEntry> {
        self.config
            .iter()
            .map(|(key, value)| {
                let entry = match value {
                    ConfigValue::Detailed { value, secret } => ConfigEntry {
                        value: interpolate::toml_to_json(value),
                        secret: *secret,
                    },
                    ConfigValue::Plain(value) => ConfigEntry {
                        value: interpolate::toml_to_json(value),
                        secret: false,
                    },
                };
                (key.clone(), entry)
            })
            .collect()
    }

    /// Build and validate the resource graph
    pub fn graph(&self) -> Result<Graph> {
        let config = self.config_entries();
        let mut builder = GraphBuilder::new();

        for resource in &self.resources {
            let mut inputs = IndexMap::with_capacity(resource.inputs.len());
            let mut secret = Vec::new();
            for (property, value) in &resource.inputs {
                let converted = interpolate::from_toml(property, value, &config)
                    .with_context(|| format!("In resource '{}'", resource.name))?;
                if converted.secret {
                    secret.push(property.clone());
                }
                inputs.insert(property.clone(), converted.input);
            }

            let node = builder.add_node(
                resource.name.as_str(),
                resource.resource_type.as_str(),
                inputs,
            )?;
            for target in &resource.depends_on {
                node.depend_on(target.as_str());
            }
            for property in &resource.replace_on_changes {
                node.replace_on_change(property.as_str());
            }
            for property in secret.iter().chain(&resource.secrets) {
                node.mark_secret(property.as_str());
            }
        }

        for (name, value) in &self.exports {
            let converted = interpolate::from_toml(name, value, &config)
                .with_context(|| format!("In export '{name}'"))?;
            builder.export(name.as_str(), converted.input);
            if converted.secret {
                builder.mark_export_secret(name.as_str());
            }
        }

        Ok(builder.validate()?)
    }

    /// Instantiate every configured provider
    pub fn providers(&self) -> ProviderRegistry {
        let mut registry = ProviderRegistry::new();
        for (package, config) in &self.providers {
            match config {
                ProviderConfig::Exec { command, args } => {
                    let command = shellexpand::tilde(command).into_owned();
                    registry.register(
                        package.as_str(),
                        Arc::new(ExecProvider::new(package.as_str(), command, args.clone())),
                    );
                }
                ProviderConfig::Simulated {
                    immutable,
                    exclusive,
                } => {
                    let mut provider = SimulatedProvider::new(package.as_str());
                    for (resource_type, properties) in immutable {
                        provider = provider
                            .with_immutable(resource_type.as_str(), properties.iter().cloned());
                    }
                    for resource_type in exclusive {
                        provider = provider.with_exclusive(resource_type.as_str());
                    }
                    registry.register(package.as_str(), Arc::new(provider));
                }
            }
        }
        registry
    }

    /// Execution options from `[settings]`, with `jobs` overridable
    pub fn execute_options(&self, jobs: Option<usize>) -> ExecuteOptions {
        let defaults = ExecuteOptions::default();
        let settings = &self.settings;

        let mut retry = RetryConfig::default();
        if let Some(max_attempts) = settings.max_attempts {
            retry.max_attempts = max_attempts;
        }
        if let Some(ms) = settings.base_delay_ms {
            retry.base_delay = Duration::from_millis(ms);
        }

        ExecuteOptions {
            jobs: jobs.or(settings.jobs).unwrap_or(defaults.jobs),
            retry,
            timeout: match settings.timeout_secs {
                Some(0) => None,
                Some(secs) => Some(Duration::from_secs(secs)),
                None => defaults.timeout,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use declarative::{Input, Segment};
    use serde_json::json;

    const SAMPLE: &str = r#"
[settings]
jobs = 8
max_attempts = 5
timeout_secs = 60

[config]
cidr_block = { value = "10.0.0.0/16", secret = true }
key_name = "deployer"

[providers.aws]
kind = "simulated"
immutable = { "aws:ec2/Vpc" = ["cidrBlock"] }

[[resource]]
name = "vpc"
type = "aws:ec2/Vpc"
inputs = { cidrBlock = "${config.cidr_block}", enableDnsSupport = true }

[[resource]]
name = "subnet"
type = "aws:ec2/Subnet"
replace_on_changes = ["availabilityZone"]
inputs = { vpcId = "${vpc.id}", availabilityZone = "us-east-1a" }

[[resource]]
name = "web"
type = "aws:ec2/Instance"
depends_on = ["subnet"]
inputs = { keyName = "${config.key_name}", userData = "VPC=${vpc.id}" }

[exports]
vpcId = "${vpc.id}"
cidr = "${config.cidr_block}"
"#;

    #[test]
    fn test_parse_sample() {
        let declaration = Declaration::parse(SAMPLE).unwrap();
        assert_eq!(declaration.resources.len(), 3);
        assert_eq!(declaration.settings.jobs, Some(8));
        assert!(matches!(
            declaration.providers["aws"],
            ProviderConfig::Simulated { .. }
        ));
    }

    #[test]
    fn test_graph_from_declaration() {
        let graph = Declaration::parse(SAMPLE).unwrap().graph().unwrap();
        assert_eq!(graph.len(), 3);

        let levels: Vec<Vec<&str>> = graph
            .levels()
            .iter()
            .map(|level| level.iter().map(|id| id.as_str()).collect())
            .collect();
        assert_eq!(levels, vec![vec!["vpc"], vec!["subnet"], vec!["web"]]);

        let vpc = graph.get("vpc").unwrap();
        assert_eq!(vpc.inputs["cidrBlock"], Input::literal("10.0.0.0/16"));
        assert!(vpc.is_secret("cidrBlock"));
        assert!(!vpc.is_secret("enableDnsSupport"));

        let subnet = graph.get("subnet").unwrap();
        assert_eq!(subnet.inputs["vpcId"], Input::reference("vpc", "id"));
        assert!(subnet.replace_on_changes.contains("availabilityZone"));

        let web = graph.get("web").unwrap();
        assert_eq!(web.inputs["keyName"], Input::literal("deployer"));
        assert_eq!(
            web.inputs["userData"],
            Input::template(vec![Segment::text("VPC="), Segment::reference("vpc", "id")])
        );

        assert!(graph.is_secret_export("cidr"));
        assert!(!graph.is_secret_export("vpcId"));
    }

    #[test]
    fn test_unknown_reference_rejected() {
        let declaration = Declaration::parse(
            r#"
[[resource]]
name = "subnet"
type = "aws:ec2/Subnet"
inputs = { vpcId = "${vpc.id}" }
"#,
        )
        .unwrap();
        let err = declaration.graph().unwrap_err();
        assert!(err.to_string().contains("vpc"));
    }

    #[test]
    fn test_unknown_config_rejected() {
        let declaration = Declaration::parse(
            r#"
[[resource]]
name = "vpc"
type = "aws:ec2/Vpc"
inputs = { cidrBlock = "${config.nope}" }
"#,
        )
        .unwrap();
        let err = declaration.graph().unwrap_err();
        assert!(format!("{err:#}").contains("unknown config key 'nope'"));
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(Declaration::parse("[settings]\nparallelism = 3\n").is_err());
    }

    #[test]
    fn test_exec_provider_config() {
        let declaration = Declaration::parse(
            r#"
[providers.aws]
kind = "exec"
command = "~/bin/infragraph-aws"
args = ["--region", "us-east-1"]
"#,
        )
        .unwrap();
        let registry = declaration.providers();
        assert!(registry.provider_for("aws:ec2/Vpc").is_some());
        assert!(registry.provider_for("gcp:storage/Bucket").is_none());
    }

    #[test]
    fn test_execute_options() {
        let declaration = Declaration::parse(SAMPLE).unwrap();
        let options = declaration.execute_options(None);
        assert_eq!(options.jobs, 8);
        assert_eq!(options.retry.max_attempts, 5);
        assert_eq!(options.timeout, Some(Duration::from_secs(60)));

        assert_eq!(declaration.execute_options(Some(2)).jobs, 2);
        assert_eq!(Declaration::default().execute_options(None).jobs, 4);
    }

    #[test]
    fn test_state_path_relative_to_declaration() {
        let loaded = Loaded {
            path: PathBuf::from("/srv/stack/infragraph.toml"),
            declaration: Declaration::default(),
        };
        assert_eq!(
            loaded.state_path(),
            PathBuf::from("/srv/stack/.infragraph/state.json")
        );

        let bare = Loaded {
            path: PathBuf::from("infragraph.toml"),
            declaration: Declaration::default(),
        };
        assert_eq!(bare.state_path(), PathBuf::from(DEFAULT_STATE));
    }

    #[test]
    fn test_load_from_disk() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join(DEFAULT_FILE);
        fs::write(&path, SAMPLE).unwrap();

        let loaded = Loaded::load(&path).unwrap();
        assert_eq!(loaded.declaration.exports.len(), 2);
        assert_eq!(
            interpolate::toml_to_json(&loaded.declaration.exports["vpcId"]),
            json!("${vpc.id}")
        );
    }
}
