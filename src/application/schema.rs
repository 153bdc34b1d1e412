//! Versioned rule-format schemas used to validate fragments.
//!
//! The toolchain's default version gets a schema derived from the catalog. Other versions
//! are external artifacts loaded from a directory of `<version>.json` files.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use jsonschema::error::ValidationErrorKind;
use jsonschema::{ValidationError, Validator};
use serde_json::{json, Map, Value};
use tracing::{debug, instrument};

use crate::application::error_ext::{IoResultExt, JsonResultExt};
use crate::application::{ApplicationError, ApplicationResult};
use crate::domain::{CapabilityKind, Catalog, CompileError, CompileResult};
use crate::infrastructure::FileSystem;

/// Rule format assumed when neither the fragment nor the settings name one.
pub const DEFAULT_RULE_FORMAT: &str = "v2024-02-12";

/// Prefix of child entries that pull in another fragment.
pub const INCLUDE_PREFIX: &str = "#include:";

/// First schema violation found in a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    pub message: String,
    /// JSON pointer into the validated document
    pub pointer: String,
}

/// Compiled schemas keyed by rule-format version.
#[derive(Clone, Default)]
pub struct SchemaRegistry {
    validators: BTreeMap<String, Arc<Validator>>,
}

impl std::fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaRegistry")
            .field("versions", &self.validators.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the catalog-derived schema under `version`.
    pub fn builtin(catalog: &Catalog, version: &str) -> ApplicationResult<Self> {
        let mut registry = Self::new();
        registry.register(version, &rule_format_schema(catalog))?;
        Ok(registry)
    }

    #[instrument(level = "debug", skip(self, schema))]
    pub fn register(&mut self, version: &str, schema: &Value) -> ApplicationResult<()> {
        let validator = jsonschema::validator_for(schema).map_err(|e| ApplicationError::Schema {
            version: version.to_string(),
            message: e.to_string(),
        })?;
        self.validators
            .insert(version.to_string(), Arc::new(validator));
        Ok(())
    }

    /// Load every `<version>.json` in `dir`. Existing versions are replaced.
    #[instrument(level = "debug", skip(self, fs))]
    pub fn load_dir(&mut self, fs: &dyn FileSystem, dir: &Path) -> ApplicationResult<usize> {
        let mut loaded = 0;
        for path in fs.list_files(dir).with_path_context("list schemas", dir)? {
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(version) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let text = fs
                .read_to_string(&path)
                .with_path_context("read schema", &path)?;
            let schema: Value =
                serde_json::from_str(&text).with_path_context("parse schema", &path)?;
            self.register(version, &schema)?;
            debug!(%version, "schema loaded");
            loaded += 1;
        }
        Ok(loaded)
    }

    /// Validate `document`, returning only the first violation.
    pub fn validate(&self, version: &str, document: &Value) -> CompileResult<Option<SchemaViolation>> {
        let validator = self
            .validators
            .get(version)
            .ok_or_else(|| CompileError::UnknownRuleFormat(version.to_string()))?;
        Ok(validator.iter_errors(document).next().map(|e| SchemaViolation {
            message: e.to_string(),
            pointer: violation_pointer(&e),
        }))
    }
}

/// Pointer to the offending value. An unexpected member is addressed by its key,
/// not by the object that holds it.
fn violation_pointer(error: &ValidationError<'_>) -> String {
    let mut pointer = error.instance_path.to_string();
    if let ValidationErrorKind::AdditionalProperties { unexpected } = &error.kind {
        if let Some(key) = unexpected.first() {
            pointer.push('/');
            pointer.push_str(&key.replace('~', "~0").replace('/', "~1"));
        }
    }
    pointer
}

/// Build the rule-format schema for fragments from the catalog.
///
/// Capability names are restricted to the catalog and each capability's options are
/// checked against its own option schema. Children are either rules or include strings.
pub fn rule_format_schema(catalog: &Catalog) -> Value {
    let rule = json!({
        "type": "object",
        "properties": {
            "ruleFormat": { "type": "string" },
            "name": { "type": "string" },
            "comment": { "type": "string" },
            "provenance": { "type": "string" },
            "matchPolicy": { "enum": ["any", "all"] },
            "criteria": {
                "type": "array",
                "items": { "$ref": "#/definitions/criteria" }
            },
            "behaviors": {
                "type": "array",
                "items": { "$ref": "#/definitions/behavior" }
            },
            "variables": {
                "type": "array",
                "items": { "$ref": "#/definitions/variable" }
            },
            "children": {
                "type": "array",
                "items": {
                    "if": { "type": "string" },
                    "then": { "pattern": format!("^{INCLUDE_PREFIX}.+") },
                    "else": { "$ref": "#/definitions/rule" }
                }
            }
        },
        "additionalProperties": false
    });

    let variable = json!({
        "type": "object",
        "required": ["name"],
        "properties": {
            "name": { "type": "string", "minLength": 1 },
            "value": { "type": "string" },
            "description": { "type": "string" },
            "hidden": { "type": "boolean" },
            "sensitive": { "type": "boolean" },
            "provenance": { "type": "string" }
        },
        "additionalProperties": false
    });

    let mut schema = Map::new();
    schema.insert(
        "$schema".into(),
        json!("http://json-schema.org/draft-07/schema#"),
    );
    schema.insert("title".into(), json!("Rule fragment"));
    schema.insert(
        "definitions".into(),
        json!({
            "rule": rule,
            "variable": variable,
            "criteria": capability_schema(catalog, CapabilityKind::Criteria),
            "behavior": capability_schema(catalog, CapabilityKind::Behavior),
        }),
    );
    schema.insert("$ref".into(), json!("#/definitions/rule"));
    Value::Object(schema)
}

fn capability_schema(catalog: &Catalog, kind: CapabilityKind) -> Value {
    let names: Vec<&str> = catalog.descriptors(kind).map(|d| d.name.as_str()).collect();
    let name_schema = if names.is_empty() {
        json!({ "type": "string" })
    } else {
        json!({ "enum": names })
    };

    let per_name: Vec<Value> = catalog
        .descriptors(kind)
        .map(|d| {
            json!({
                "if": {
                    "properties": { "name": { "const": d.name } },
                    "required": ["name"]
                },
                "then": {
                    "properties": { "options": d.option_schema }
                }
            })
        })
        .collect();

    let mut schema = json!({
        "type": "object",
        "required": ["name"],
        "properties": {
            "name": name_schema,
            "options": { "type": "object" },
            "provenance": { "type": "string" }
        },
        "additionalProperties": false
    });
    if !per_name.is_empty() {
        schema["allOf"] = Value::Array(per_name);
    }
    schema
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::testing::sample_catalog;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::builtin(&sample_catalog(), DEFAULT_RULE_FORMAT).unwrap()
    }

    #[test]
    fn given_valid_fragment_when_validating_then_no_violation() {
        let document = json!({
            "name": "x",
            "behaviors": [{ "name": "caching", "options": { "ttl": "1d" } }],
            "children": ["#include:other.json", { "name": "nested" }]
        });

        let violation = registry().validate(DEFAULT_RULE_FORMAT, &document).unwrap();
        assert_eq!(violation, None);
    }

    #[test]
    fn given_bad_option_enum_when_validating_then_points_at_option() {
        let document = json!({
            "behaviors": [{ "name": "caching", "options": { "behavior": "FOREVER" } }]
        });

        let violation = registry()
            .validate(DEFAULT_RULE_FORMAT, &document)
            .unwrap()
            .expect("violation");

        assert_eq!(violation.pointer, "/behaviors/0/options/behavior");
        assert!(violation.message.contains("FOREVER"), "{}", violation.message);
    }

    #[test]
    fn given_unknown_behavior_name_when_validating_then_violation() {
        let document = json!({ "behaviors": [{ "name": "teleport" }] });
        let violation = registry().validate(DEFAULT_RULE_FORMAT, &document).unwrap();
        assert!(violation.is_some());
    }

    #[test]
    fn given_nested_child_error_when_validating_then_points_into_child() {
        let document = json!({
            "children": [{ "name": "inner", "matchPolicy": "sometimes" }]
        });

        let violation = registry()
            .validate(DEFAULT_RULE_FORMAT, &document)
            .unwrap()
            .expect("violation");

        assert_eq!(violation.pointer, "/children/0/matchPolicy");
    }

    #[test]
    fn given_misspelled_rule_key_when_validating_then_points_at_key() {
        let document = json!({
            "children": [{ "name": "inner", "behaviours": [] }]
        });

        let violation = registry()
            .validate(DEFAULT_RULE_FORMAT, &document)
            .unwrap()
            .expect("violation");

        assert_eq!(violation.pointer, "/children/0/behaviours");
    }

    #[test]
    fn given_unknown_version_when_validating_then_unknown_rule_format() {
        let result = registry().validate("v1999-01-01", &json!({}));
        assert!(matches!(result, Err(CompileError::UnknownRuleFormat(v)) if v == "v1999-01-01"));
    }
}
