//! Property resolution for a run.
//!
//! Three flat layers, lowest to highest precedence:
//! global parameters → job folder settings → job data overrides.
//! A key in a higher layer replaces the lower one; values are never merged.
//!
//! Jobs that declare a [`PropertySchema`] get typed values back, with
//! structured warnings for unknown keys, type mismatches and missing
//! required keys.

use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;

use taskmesh_core::error::{Result, TaskMeshError};

/// Flat merge, later layers win.
pub fn merge_layers(layers: &[&HashMap<String, String>]) -> HashMap<String, String> {
    let mut merged = HashMap::new();
    for layer in layers {
        merged.extend(layer.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    merged
}

pub fn resolve(
    global: &HashMap<String, String>,
    settings: &HashMap<String, String>,
    overrides: &HashMap<String, String>,
) -> HashMap<String, String> {
    merge_layers(&[global, settings, overrides])
}

/// Load `settings.toml` then `settings.<environment>.toml` from a job folder.
/// A missing folder or file is an empty layer.
pub fn load_job_settings(folder: &Path, environment: &str) -> Result<HashMap<String, String>> {
    let mut settings = HashMap::new();
    for name in ["settings.toml".to_string(), format!("settings.{environment}.toml")] {
        let file = folder.join(&name);
        if !file.is_file() {
            continue;
        }
        let content = std::fs::read_to_string(&file)
            .map_err(|e| TaskMeshError::Settings(format!("{}: {e}", file.display())))?;
        settings.extend(parse_settings(&content, &file)?);
    }
    Ok(settings)
}

fn parse_settings(content: &str, file: &Path) -> Result<HashMap<String, String>> {
    let table: toml::Table = toml::from_str(content)
        .map_err(|e| TaskMeshError::Settings(format!("{}: {e}", file.display())))?;
    table
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                toml::Value::String(s) => s,
                toml::Value::Integer(i) => i.to_string(),
                toml::Value::Float(f) => f.to_string(),
                toml::Value::Boolean(b) => b.to_string(),
                toml::Value::Datetime(d) => d.to_string(),
                toml::Value::Array(_) | toml::Value::Table(_) => {
                    return Err(TaskMeshError::Settings(format!(
                        "{}: '{key}' must be a scalar value",
                        file.display()
                    )));
                }
            };
            Ok((key, value))
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyKind {
    String,
    Integer,
    Float,
    Bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PropertyValue {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
}

impl PropertyKind {
    fn parse(self, raw: &str) -> Option<PropertyValue> {
        match self {
            PropertyKind::String => Some(PropertyValue::String(raw.to_string())),
            PropertyKind::Integer => raw.trim().parse().ok().map(PropertyValue::Integer),
            PropertyKind::Float => raw.trim().parse().ok().map(PropertyValue::Float),
            PropertyKind::Bool => match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Some(PropertyValue::Bool(true)),
                "false" | "0" | "no" => Some(PropertyValue::Bool(false)),
                _ => None,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PropertyWarning {
    UnknownKey { key: String },
    TypeMismatch { key: String, expected: PropertyKind, value: String },
    MissingRequired { key: String },
}

impl std::fmt::Display for PropertyWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownKey { key } => write!(f, "unknown property '{key}'"),
            Self::TypeMismatch { key, expected, value } => {
                write!(f, "property '{key}' expected {expected:?}, got '{value}'")
            }
            Self::MissingRequired { key } => write!(f, "required property '{key}' is missing"),
        }
    }
}

#[derive(Debug, Clone)]
struct PropertyField {
    name: String,
    kind: PropertyKind,
    required: bool,
}

/// Typed description of the properties a job reads.
#[derive(Debug, Clone, Default)]
pub struct PropertySchema {
    fields: Vec<PropertyField>,
}

impl PropertySchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn optional(mut self, name: &str, kind: PropertyKind) -> Self {
        self.fields.push(PropertyField { name: name.into(), kind, required: false });
        self
    }

    pub fn required(mut self, name: &str, kind: PropertyKind) -> Self {
        self.fields.push(PropertyField { name: name.into(), kind, required: true });
        self
    }

    /// Bind `resolved` against the schema. Unknown keys are only reported for
    /// `job_scoped`, since global parameters are shared by every job.
    pub fn bind(
        &self,
        resolved: &HashMap<String, String>,
        job_scoped: &HashMap<String, String>,
    ) -> BoundProperties {
        let mut bound = BoundProperties::default();

        for field in &self.fields {
            match resolved.get(&field.name) {
                Some(raw) => match field.kind.parse(raw) {
                    Some(value) => {
                        bound.values.insert(field.name.clone(), value);
                    }
                    None => bound.warnings.push(PropertyWarning::TypeMismatch {
                        key: field.name.clone(),
                        expected: field.kind,
                        value: raw.clone(),
                    }),
                },
                None if field.required => bound.warnings.push(PropertyWarning::MissingRequired {
                    key: field.name.clone(),
                }),
                None => {}
            }
        }

        let mut unknown: Vec<&String> = job_scoped
            .keys()
            .filter(|k| !self.fields.iter().any(|f| &f.name == *k))
            .collect();
        unknown.sort();
        for key in unknown {
            bound.warnings.push(PropertyWarning::UnknownKey { key: key.clone() });
        }

        for warning in &bound.warnings {
            tracing::warn!(warning = ?warning, "⚠️ Property binding: {warning}");
        }
        bound
    }
}

#[derive(Debug, Clone, Default)]
pub struct BoundProperties {
    values: HashMap<String, PropertyValue>,
    warnings: Vec<PropertyWarning>,
}

impl BoundProperties {
    pub fn warnings(&self) -> &[PropertyWarning] {
        &self.warnings
    }

    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.values.get(key)? {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        match self.values.get(key)? {
            PropertyValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        match self.values.get(key)? {
            PropertyValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.values.get(key)? {
            PropertyValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_three_layer_precedence() {
        let global = map(&[("A", "1"), ("B", "2")]);
        let settings = map(&[("B", "3"), ("C", "4")]);
        let overrides = map(&[("C", "5")]);
        assert_eq!(
            resolve(&global, &settings, &overrides),
            map(&[("A", "1"), ("B", "3"), ("C", "5")])
        );
    }

    #[test]
    fn test_environment_settings_override_shared() {
        let dir = std::env::temp_dir().join(format!("taskmesh-settings-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("settings.toml"), "host = \"shared\"\nretries = 3\n").unwrap();
        std::fs::write(dir.join("settings.staging.toml"), "host = \"staging\"\n").unwrap();

        let settings = load_job_settings(&dir, "staging").unwrap();
        assert_eq!(settings.get("host").map(String::as_str), Some("staging"));
        assert_eq!(settings.get("retries").map(String::as_str), Some("3"));

        let settings = load_job_settings(&dir, "production").unwrap();
        assert_eq!(settings.get("host").map(String::as_str), Some("shared"));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_folder_is_empty_layer() {
        let dir = std::env::temp_dir().join("taskmesh-settings-does-not-exist");
        assert!(load_job_settings(&dir, "production").unwrap().is_empty());
    }

    #[test]
    fn test_malformed_or_nested_settings_fail() {
        let dir = std::env::temp_dir().join(format!("taskmesh-settings-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("settings.toml"), "host = \n").unwrap();
        assert!(matches!(
            load_job_settings(&dir, "production").unwrap_err(),
            TaskMeshError::Settings(_)
        ));

        std::fs::write(dir.join("settings.toml"), "[db]\nhost = \"x\"\n").unwrap();
        assert!(matches!(
            load_job_settings(&dir, "production").unwrap_err(),
            TaskMeshError::Settings(_)
        ));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_bind_reports_structured_warnings() {
        let schema = PropertySchema::new()
            .required("batch_size", PropertyKind::Integer)
            .optional("dry_run", PropertyKind::Bool)
            .required("target", PropertyKind::String);
        let resolved = map(&[("batch_size", "many"), ("dry_run", "yes"), ("colour", "red"), ("global", "g")]);
        let job_scoped = map(&[("batch_size", "many"), ("colour", "red")]);

        let bound = schema.bind(&resolved, &job_scoped);
        assert_eq!(bound.get_bool("dry_run"), Some(true));
        assert_eq!(bound.get_i64("batch_size"), None);
        assert_eq!(
            bound.warnings(),
            &[
                PropertyWarning::TypeMismatch {
                    key: "batch_size".into(),
                    expected: PropertyKind::Integer,
                    value: "many".into(),
                },
                PropertyWarning::MissingRequired { key: "target".into() },
                PropertyWarning::UnknownKey { key: "colour".into() },
            ]
        );
    }

    #[test]
    fn test_bind_typed_values() {
        let schema = PropertySchema::new()
            .optional("ratio", PropertyKind::Float)
            .optional("name", PropertyKind::String);
        let resolved = map(&[("ratio", "0.5"), ("name", "nightly")]);
        let bound = schema.bind(&resolved, &resolved);
        assert_eq!(bound.get_f64("ratio"), Some(0.5));
        assert_eq!(bound.get_str("name"), Some("nightly"));
        assert!(bound.warnings().is_empty());
    }
}
