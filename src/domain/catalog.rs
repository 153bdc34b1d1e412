//! Capability catalog: the descriptors the compiler consumes for every criteria/behavior.
//!
//! Descriptors come from an external generator. They are checked once, when registered, so
//! the per-call code can trust their variable-handling declarations.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, instrument};

use crate::domain::error::{CompileError, CompileResult};

/// Whether a capability is a match condition or an effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityKind {
    Criteria,
    Behavior,
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapabilityKind::Criteria => write!(f, "criteria"),
            CapabilityKind::Behavior => write!(f, "behavior"),
        }
    }
}

/// Option keys that carry variable names or references.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VariableHandling {
    /// Keys whose string values may embed `{{user.NAME}}` references
    pub inline: Vec<String>,
    /// Keys whose value is itself the name of a new variable
    pub names: Vec<String>,
    /// Keys holding arrays of variable names
    pub lists: Vec<String>,
}

impl VariableHandling {
    pub fn is_empty(&self) -> bool {
        self.inline.is_empty() && self.names.is_empty() && self.lists.is_empty()
    }
}

/// Descriptor of a single capability, as produced by the catalog generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityDescriptor {
    pub name: String,
    /// JSON schema for the `options` object
    #[serde(default = "open_object_schema")]
    pub option_schema: Value,
    /// Values merged under user-supplied options
    #[serde(default)]
    pub defaults: Map<String, Value>,
    #[serde(default)]
    pub variable_handling: VariableHandling,
}

fn open_object_schema() -> Value {
    serde_json::json!({ "type": "object" })
}

impl CapabilityDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            option_schema: open_object_schema(),
            defaults: Map::new(),
            variable_handling: VariableHandling::default(),
        }
    }

    pub fn with_option_schema(mut self, schema: Value) -> Self {
        self.option_schema = schema;
        self
    }

    pub fn with_default(mut self, key: impl Into<String>, value: Value) -> Self {
        self.defaults.insert(key.into(), value);
        self
    }

    pub fn with_variables(mut self, handling: VariableHandling) -> Self {
        self.variable_handling = handling;
        self
    }

    /// Merge user options over the catalog defaults.
    ///
    /// `null` means "no options". Anything other than an object is a `TypeMismatch`.
    pub fn resolve_options(&self, options: Value) -> CompileResult<Map<String, Value>> {
        let user = match options {
            Value::Null => Map::new(),
            Value::Object(map) => map,
            _ => return Err(CompileError::type_mismatch(&self.name, "options", "object")),
        };
        let mut merged = self.defaults.clone();
        merged.extend(user);
        Ok(merged)
    }

    fn check(&self, kind: CapabilityKind) -> CompileResult<()> {
        let invalid = |reason: String| CompileError::InvalidDescriptor {
            kind,
            name: self.name.clone(),
            reason,
        };

        if self.name.is_empty() {
            return Err(invalid("empty name".to_string()));
        }
        if !self.option_schema.is_object() {
            return Err(invalid("option schema is not an object".to_string()));
        }
        jsonschema::validator_for(&self.option_schema)
            .map_err(|e| invalid(format!("option schema does not compile: {e}")))?;

        let properties = self
            .option_schema
            .get("properties")
            .and_then(Value::as_object);

        let handling = &self.variable_handling;
        let declared = handling
            .inline
            .iter()
            .map(|k| (k, None))
            .chain(handling.names.iter().map(|k| (k, Some("string"))))
            .chain(handling.lists.iter().map(|k| (k, Some("array"))));

        for (key, expected_type) in declared {
            let Some(properties) = properties else {
                continue;
            };
            let Some(property) = properties.get(key) else {
                return Err(invalid(format!(
                    "variable option '{key}' is not declared in the option schema"
                )));
            };
            if let (Some(expected), Some(actual)) =
                (expected_type, property.get("type").and_then(Value::as_str))
            {
                if expected != actual {
                    return Err(invalid(format!(
                        "variable option '{key}' is declared as {actual}, expected {expected}"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// On-disk shape of the generator output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogFile {
    pub criteria: Vec<CapabilityDescriptor>,
    pub behaviors: Vec<CapabilityDescriptor>,
}

/// Checked descriptors keyed by kind and name.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    criteria: BTreeMap<String, CapabilityDescriptor>,
    behaviors: BTreeMap<String, CapabilityDescriptor>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor after validating it. Re-registering a name replaces it.
    #[instrument(level = "debug", skip(self, descriptor), fields(name = %descriptor.name))]
    pub fn register(
        &mut self,
        kind: CapabilityKind,
        descriptor: CapabilityDescriptor,
    ) -> CompileResult<()> {
        descriptor.check(kind)?;
        debug!("registered {} '{}'", kind, descriptor.name);
        self.entries_mut(kind)
            .insert(descriptor.name.clone(), descriptor);
        Ok(())
    }

    pub fn with(mut self, kind: CapabilityKind, descriptor: CapabilityDescriptor) -> CompileResult<Self> {
        self.register(kind, descriptor)?;
        Ok(self)
    }

    pub fn from_file(file: CatalogFile) -> CompileResult<Self> {
        let mut catalog = Self::new();
        for descriptor in file.criteria {
            catalog.register(CapabilityKind::Criteria, descriptor)?;
        }
        for descriptor in file.behaviors {
            catalog.register(CapabilityKind::Behavior, descriptor)?;
        }
        Ok(catalog)
    }

    pub fn get(&self, kind: CapabilityKind, name: &str) -> Option<&CapabilityDescriptor> {
        self.entries(kind).get(name)
    }

    /// Like [`Catalog::get`] but an absent name is an error.
    pub fn require(&self, kind: CapabilityKind, name: &str) -> CompileResult<&CapabilityDescriptor> {
        self.get(kind, name)
            .ok_or_else(|| CompileError::UnknownCapability {
                kind,
                name: name.to_string(),
            })
    }

    pub fn descriptors(&self, kind: CapabilityKind) -> impl Iterator<Item = &CapabilityDescriptor> {
        self.entries(kind).values()
    }

    pub fn len(&self) -> usize {
        self.criteria.len() + self.behaviors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entries(&self, kind: CapabilityKind) -> &BTreeMap<String, CapabilityDescriptor> {
        match kind {
            CapabilityKind::Criteria => &self.criteria,
            CapabilityKind::Behavior => &self.behaviors,
        }
    }

    fn entries_mut(&mut self, kind: CapabilityKind) -> &mut BTreeMap<String, CapabilityDescriptor> {
        match kind {
            CapabilityKind::Criteria => &mut self.criteria,
            CapabilityKind::Behavior => &mut self.behaviors,
        }
    }
}
