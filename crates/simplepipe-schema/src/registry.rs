use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use jsonschema::Validator;
use serde_json::Value;
use simplepipe_frame::{
    is_valid_tag, BodyValidator, FrameError, DEFAULT_MAX_TAG_LEN, SEQUENCE_TAG,
};

use crate::config::RegistryConfig;
use crate::error::{Result, SchemaError};

const SCHEMA_SUFFIX: &str = ".schema.json";

/// Tag-keyed registry of compiled JSON Schema validators.
pub struct SchemaRegistry {
    validators: HashMap<String, Validator>,
    config: RegistryConfig,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            validators: HashMap::new(),
            config,
        }
    }

    /// Register a schema for `tag` from a JSON string.
    pub fn register(&mut self, tag: &str, schema_json: &str) -> Result<()> {
        let schema: Value = serde_json::from_str(schema_json)?;
        self.register_value(tag, &schema)
    }

    /// Register a schema for `tag` from a JSON value.
    pub fn register_value(&mut self, tag: &str, schema: &Value) -> Result<()> {
        if !is_valid_tag(tag, DEFAULT_MAX_TAG_LEN) {
            return Err(SchemaError::InvalidTag(tag.to_string()));
        }

        let mut schema = schema.clone();
        if self.config.close_objects {
            close_objects(&mut schema);
        }

        let compiled =
            jsonschema::validator_for(&schema).map_err(|err| SchemaError::CompileFailed {
                tag: tag.to_string(),
                message: err.to_string(),
            })?;

        if self.validators.insert(tag.to_string(), compiled).is_some() {
            tracing::debug!(tag, "replaced payload schema");
        }
        Ok(())
    }

    /// Load every `<Tag>.schema.json` file in `path`.
    pub fn from_directory(path: &Path) -> Result<Self> {
        Self::from_directory_with_config(path, RegistryConfig::default())
    }

    /// Load every `<Tag>.schema.json` file in `path` with explicit config.
    ///
    /// Symlinked schema files and files over the configured size are refused.
    /// Files with other suffixes are skipped.
    pub fn from_directory_with_config(path: &Path, config: RegistryConfig) -> Result<Self> {
        let mut registry = Self::with_config(config);

        let entries = std::fs::read_dir(path)
            .map_err(|err| SchemaError::LoadFailed(format!("{}: {err}", path.display())))?;

        let mut loaded = 0usize;
        for entry in entries {
            let entry = entry.map_err(|err| SchemaError::LoadFailed(err.to_string()))?;
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            let Some(tag) = file_name.strip_suffix(SCHEMA_SUFFIX) else {
                continue;
            };

            let entry_path = entry.path();
            let metadata = std::fs::symlink_metadata(&entry_path)
                .map_err(|err| SchemaError::LoadFailed(err.to_string()))?;
            if metadata.file_type().is_symlink() {
                return Err(SchemaError::LoadFailed(format!(
                    "refusing to load schema symlink: {file_name}"
                )));
            }
            if !metadata.is_file() {
                continue;
            }

            loaded += 1;
            if loaded > registry.config.max_directory_schemas {
                return Err(SchemaError::LoadFailed(format!(
                    "more than {} schemas in {}",
                    registry.config.max_directory_schemas,
                    path.display()
                )));
            }

            let content = read_limited(&entry_path, registry.config.max_schema_bytes)?;
            registry.register(tag, &content)?;
            tracing::debug!(tag, path = %entry_path.display(), "loaded payload schema");
        }

        Ok(registry)
    }

    /// Build a registry from `(tag, schema)` pairs compiled into the binary.
    pub fn from_embedded(schemas: &[(&str, &str)]) -> Result<Self> {
        let mut registry = Self::new();
        for (tag, schema) in schemas {
            registry.register(tag, schema)?;
        }
        Ok(registry)
    }

    /// Validate a body against the schema for `tag`.
    pub fn validate(&self, tag: &str, body: &[u8]) -> Result<()> {
        let Some(validator) = self.validators.get(tag) else {
            if self.config.skip_sequence_acks && tag == SEQUENCE_TAG {
                return Ok(());
            }
            if self.config.require_schema {
                return Err(SchemaError::NoSchema(tag.to_string()));
            }
            return Ok(());
        };

        let value: Value = serde_json::from_slice(body).map_err(|err| {
            SchemaError::ValidationFailed {
                tag: tag.to_string(),
                message: format!("not valid JSON: {err}"),
            }
        })?;

        let mut errors = validator.iter_errors(&value);
        if let Some(first) = errors.next() {
            let mut message = first.to_string();
            for err in errors.take(3) {
                message.push_str("; ");
                message.push_str(&err.to_string());
            }
            return Err(SchemaError::ValidationFailed {
                tag: tag.to_string(),
                message,
            });
        }
        Ok(())
    }

    pub fn has_schema(&self, tag: &str) -> bool {
        self.validators.contains_key(tag)
    }

    /// Tags with a registered schema, sorted.
    pub fn tags(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self.validators.keys().map(String::as_str).collect();
        tags.sort_unstable();
        tags
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BodyValidator for SchemaRegistry {
    fn validate_body(&self, tag: &str, body: &[u8]) -> simplepipe_frame::Result<()> {
        self.validate(tag, body).map_err(FrameError::from)
    }
}

fn read_limited(path: &Path, max_bytes: usize) -> Result<String> {
    let file = std::fs::File::open(path)
        .map_err(|err| SchemaError::LoadFailed(format!("{}: {err}", path.display())))?;
    let limit = u64::try_from(max_bytes.saturating_add(1)).unwrap_or(u64::MAX);
    let mut content = String::new();
    file.take(limit)
        .read_to_string(&mut content)
        .map_err(|err| SchemaError::LoadFailed(format!("{}: {err}", path.display())))?;
    if content.len() > max_bytes {
        return Err(SchemaError::LoadFailed(format!(
            "schema file larger than {max_bytes} bytes: {}",
            path.display()
        )));
    }
    Ok(content)
}

/// Keywords whose value maps names to subschemas.
const SCHEMA_MAPS: [&str; 5] = [
    "properties",
    "patternProperties",
    "dependentSchemas",
    "$defs",
    "definitions",
];

/// Keywords whose value is instance data, never a schema.
const DATA_KEYWORDS: [&str; 4] = ["const", "enum", "default", "examples"];

/// Add `additionalProperties: false` to every object schema that does not
/// set it, at any depth.
fn close_objects(value: &mut Value) {
    match value {
        Value::Object(map) => {
            let is_object = match map.get("type") {
                Some(Value::String(kind)) => kind == "object",
                Some(Value::Array(kinds)) => kinds.iter().any(|k| k == "object"),
                _ => map.contains_key("properties") || map.contains_key("required"),
            };
            if is_object && !map.contains_key("additionalProperties") {
                map.insert("additionalProperties".to_string(), Value::Bool(false));
            }
            for (keyword, child) in map.iter_mut() {
                if DATA_KEYWORDS.contains(&keyword.as_str()) {
                    continue;
                }
                match child {
                    Value::Object(schemas) if SCHEMA_MAPS.contains(&keyword.as_str()) => {
                        schemas.values_mut().for_each(close_objects);
                    }
                    _ => close_objects(child),
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(close_objects),
        _ => {}
    }
}
