//! `${...}` interpolation in declaration strings
//!
//! - `"${vpc.id}"` alone is a reference to an output of node `vpc`
//! - `"arn:${role.name}/x"` is a template over one or more references
//! - `"${config.key}"` substitutes a configuration value
//! - `"$${"` is a literal `${`

use declarative::{Input, Segment};
use indexmap::IndexMap;
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;
use thiserror::Error;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\$\{|\$\{([^}]*)\}").expect("placeholder pattern compiles"));

/// Errors found while reading a declaration
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeclarationError {
    #[error("'{text}' is not a valid reference, expected ${{node.output}}")]
    BadReference { text: String },

    #[error("unknown config key '{key}'")]
    UnknownConfig { key: String },

    #[error("unsupported value for '{property}': {reason}")]
    UnsupportedValue { property: String, reason: String },
}

/// A configuration value available to `${config.key}`
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigEntry {
    pub value: Value,
    pub secret: bool,
}

/// An interpolated value plus whether any secret went into it
#[derive(Debug, Clone, PartialEq)]
pub struct Interpolated {
    pub input: Input,
    pub secret: bool,
}

enum Piece {
    Text(String),
    Config(Value),
    Ref(Segment),
}

/// Interpolate a single string
pub fn interpolate(
    text: &str,
    config: &IndexMap<String, ConfigEntry>,
) -> Result<Interpolated, DeclarationError> {
    let mut pieces = Vec::new();
    let mut secret = false;
    let mut last = 0;

    for caps in PLACEHOLDER.captures_iter(text) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        if whole.start() > last {
            pieces.push(Piece::Text(text[last..whole.start()].to_string()));
        }
        last = whole.end();

        let Some(inner) = caps.get(1) else {
            pieces.push(Piece::Text("${".to_string()));
            continue;
        };
        let (node, output) = split_reference(inner.as_str())?;
        if node == "config" {
            let entry = config
                .get(output)
                .ok_or_else(|| DeclarationError::UnknownConfig {
                    key: output.to_string(),
                })?;
            secret |= entry.secret;
            pieces.push(Piece::Config(entry.value.clone()));
        } else {
            pieces.push(Piece::Ref(Segment::reference(node, output)));
        }
    }
    if last < text.len() {
        pieces.push(Piece::Text(text[last..].to_string()));
    }

    Ok(Interpolated {
        input: assemble(pieces),
        secret,
    })
}

fn split_reference(inner: &str) -> Result<(&str, &str), DeclarationError> {
    let bad = || DeclarationError::BadReference {
        text: format!("${{{inner}}}"),
    };
    let (node, output) = inner.trim().split_once('.').ok_or_else(bad)?;
    if node.is_empty() || output.is_empty() {
        return Err(bad());
    }
    Ok((node, output))
}

fn assemble(mut pieces: Vec<Piece>) -> Input {
    // a lone placeholder keeps its type
    if pieces.len() == 1 {
        match pieces.pop() {
            Some(Piece::Ref(Segment::Ref(reference))) => return Input::Ref(reference),
            Some(Piece::Config(value)) => return Input::Literal(value),
            Some(piece) => pieces.push(piece),
            None => {}
        }
    }

    let mut segments: Vec<Segment> = Vec::new();
    for piece in pieces {
        let segment = match piece {
            Piece::Text(text) => Segment::Text(text),
            Piece::Config(value) => Segment::Text(declarative::types::render_scalar(&value)),
            Piece::Ref(segment) => segment,
        };
        match (segments.last_mut(), segment) {
            (Some(Segment::Text(previous)), Segment::Text(text)) => previous.push_str(&text),
            (_, segment) => segments.push(segment),
        }
    }

    if segments.iter().any(|s| matches!(s, Segment::Ref(_))) {
        return Input::Template(segments);
    }
    let text = segments
        .into_iter()
        .map(|s| match s {
            Segment::Text(text) => text,
            Segment::Ref(_) => String::new(),
        })
        .collect::<String>();
    Input::Literal(Value::String(text))
}

/// Convert a TOML value, interpolating every string inside it
pub fn from_toml(
    property: &str,
    value: &toml::Value,
    config: &IndexMap<String, ConfigEntry>,
) -> Result<Interpolated, DeclarationError> {
    let literal = |value: Value| Interpolated {
        input: Input::Literal(value),
        secret: false,
    };

    match value {
        toml::Value::String(s) => interpolate(s, config),
        toml::Value::Integer(i) => Ok(literal(Value::from(*i))),
        toml::Value::Boolean(b) => Ok(literal(Value::Bool(*b))),
        toml::Value::Datetime(d) => Ok(literal(Value::String(d.to_string()))),
        toml::Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(|n| literal(Value::Number(n)))
            .ok_or_else(|| DeclarationError::UnsupportedValue {
                property: property.to_string(),
                reason: format!("{f} is not a finite number"),
            }),
        toml::Value::Array(items) => {
            let mut secret = false;
            let mut inputs = Vec::with_capacity(items.len());
            for item in items {
                let converted = from_toml(property, item, config)?;
                secret |= converted.secret;
                inputs.push(converted.input);
            }
            Ok(Interpolated {
                input: Input::List(inputs),
                secret,
            })
        }
        toml::Value::Table(table) => {
            let mut secret = false;
            let mut entries = IndexMap::with_capacity(table.len());
            for (key, item) in table {
                let converted = from_toml(property, item, config)?;
                secret |= converted.secret;
                entries.insert(key.clone(), converted.input);
            }
            Ok(Interpolated {
                input: Input::Map(entries),
                secret,
            })
        }
    }
}

/// Convert a TOML value to JSON without interpolation
pub fn toml_to_json(value: &toml::Value) -> Value {
    match value {
        toml::Value::String(s) => Value::String(s.clone()),
        toml::Value::Integer(i) => Value::from(*i),
        toml::Value::Float(f) => serde_json::Number::from_f64(*f).map_or(Value::Null, Value::Number),
        toml::Value::Boolean(b) => Value::Bool(*b),
        toml::Value::Datetime(d) => Value::String(d.to_string()),
        toml::Value::Array(items) => Value::Array(items.iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => Value::Object(
            table
                .iter()
                .map(|(k, v)| (k.clone(), toml_to_json(v)))
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use declarative::Reference;
    use serde_json::json;

    fn config() -> IndexMap<String, ConfigEntry> {
        let mut config = IndexMap::new();
        config.insert(
            "cidr_block".to_string(),
            ConfigEntry {
                value: json!("10.0.0.0/16"),
                secret: true,
            },
        );
        config.insert(
            "port".to_string(),
            ConfigEntry {
                value: json!(5432),
                secret: false,
            },
        );
        config
    }

    #[test]
    fn test_plain_string() {
        let result = interpolate("hello", &config()).unwrap();
        assert_eq!(result.input, Input::literal("hello"));
        assert!(!result.secret);
    }

    #[test]
    fn test_lone_reference() {
        let result = interpolate("${vpc.id}", &config()).unwrap();
        assert_eq!(result.input, Input::Ref(Reference::new("vpc", "id")));
    }

    #[test]
    fn test_template() {
        let result = interpolate("DB_HOST=${db.address}:${config.port}", &config()).unwrap();
        assert_eq!(
            result.input,
            Input::Template(vec![
                Segment::text("DB_HOST="),
                Segment::reference("db", "address"),
                Segment::text(":5432"),
            ])
        );
    }

    #[test]
    fn test_lone_config_keeps_type() {
        let result = interpolate("${config.port}", &config()).unwrap();
        assert_eq!(result.input, Input::Literal(json!(5432)));
    }

    #[test]
    fn test_secret_config_tracked() {
        let result = interpolate("${config.cidr_block}", &config()).unwrap();
        assert_eq!(result.input, Input::literal("10.0.0.0/16"));
        assert!(result.secret);
    }

    #[test]
    fn test_escape() {
        let result = interpolate("echo $${HOME} ${config.port}", &config()).unwrap();
        assert_eq!(result.input, Input::literal("echo ${HOME} 5432"));
    }

    #[test]
    fn test_errors() {
        assert_eq!(
            interpolate("${config.missing}", &config()).unwrap_err(),
            DeclarationError::UnknownConfig {
                key: "missing".to_string()
            }
        );
        assert!(matches!(
            interpolate("${vpc}", &config()),
            Err(DeclarationError::BadReference { .. })
        ));
        assert!(matches!(
            interpolate("${.id}", &config()),
            Err(DeclarationError::BadReference { .. })
        ));
    }

    #[test]
    fn test_nested_toml() {
        let table: toml::Table =
            toml::from_str(r#"tags = { Name = "web", Vpc = "${vpc.id}" }"#).unwrap();
        let tags = table.get("tags").unwrap();
        let result = from_toml("tags", tags, &config()).unwrap();

        let Input::Map(entries) = result.input else {
            panic!("expected a map");
        };
        assert_eq!(entries["Name"], Input::literal("web"));
        assert_eq!(entries["Vpc"], Input::reference("vpc", "id"));
    }

    #[test]
    fn test_secret_inside_list() {
        let value = toml::Value::Array(vec![
            toml::Value::String("a".to_string()),
            toml::Value::String("${config.cidr_block}".to_string()),
        ]);
        assert!(from_toml("cidrs", &value, &config()).unwrap().secret);
    }
}
