//! Discovery and registration of user variables referenced from capability options.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

use crate::domain::arena::{RuleArena, RuleId, Variable};
use crate::domain::catalog::CapabilityDescriptor;
use crate::domain::error::{CompileError, CompileResult};
use crate::domain::provenance::Provenance;

/// `{{user.NAME}}`; other namespaces (`builtin.`, ...) are not user variables.
static REFERENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{user\.([A-Za-z0-9_]+)\}\}").unwrap());

/// Collect variable names referenced in `options`, in the order they appear.
///
/// Names declared by the descriptor's `names`/`lists` keys come first, then inline
/// references. Keys not mentioned by the descriptor are not inspected.
pub fn extract_references(
    descriptor: &CapabilityDescriptor,
    options: &Map<String, Value>,
) -> CompileResult<Vec<String>> {
    let handling = &descriptor.variable_handling;
    let mut found = Vec::new();

    for key in &handling.names {
        match options.get(key) {
            None | Some(Value::Null) => {}
            Some(Value::String(name)) if name.is_empty() => {}
            Some(Value::String(name)) => found.push(name.clone()),
            Some(_) => return Err(CompileError::type_mismatch(&descriptor.name, key, "string")),
        }
    }

    for key in &handling.lists {
        match options.get(key) {
            None | Some(Value::Null) => {}
            Some(Value::Array(items)) => {
                for item in items {
                    let name = item.as_str().ok_or_else(|| {
                        CompileError::type_mismatch(&descriptor.name, key, "array of strings")
                    })?;
                    found.push(name.to_string());
                }
            }
            Some(_) => return Err(CompileError::type_mismatch(&descriptor.name, key, "array")),
        }
    }

    for key in &handling.inline {
        if let Some(value) = options.get(key) {
            collect_inline(value, &mut found);
        }
    }

    Ok(found)
}

fn collect_inline(value: &Value, found: &mut Vec<String>) {
    match value {
        Value::String(s) => {
            for caps in REFERENCE.captures_iter(s) {
                found.push(caps[1].to_string());
            }
        }
        Value::Array(items) => items.iter().for_each(|v| collect_inline(v, found)),
        Value::Object(map) => map.values().for_each(|v| collect_inline(v, found)),
        _ => {}
    }
}

/// Register every variable referenced by a capability at the root of `node`'s tree.
///
/// First registration wins; later references to the same name leave the original
/// description and provenance untouched.
pub fn register_references(
    tree: &mut RuleArena,
    node: RuleId,
    descriptor: &CapabilityDescriptor,
    options: &Map<String, Value>,
    provenance: &Provenance,
) -> CompileResult<()> {
    if descriptor.variable_handling.is_empty() {
        return Ok(());
    }
    let names = extract_references(descriptor, options)?;
    for name in names {
        register(tree, node, &name, provenance);
    }
    Ok(())
}

/// Register a single name discovered at `provenance`.
pub fn register(tree: &mut RuleArena, node: RuleId, name: &str, provenance: &Provenance) -> bool {
    declare(
        tree,
        node,
        Variable {
            name: name.to_string(),
            description: format!("defined at {provenance}"),
            hidden: false,
            sensitive: false,
            provenance: provenance.clone(),
        },
    )
}

/// Insert a fully described variable unless the name is taken.
pub fn declare(tree: &mut RuleArena, node: RuleId, variable: Variable) -> bool {
    // Variables live on the root; resolve it the same way for every node.
    let root = tree.root_of(node);
    debug_assert_eq!(root, tree.root());
    let name = variable.name.clone();
    let inserted = tree.variables_mut().insert_if_absent(variable);
    if inserted {
        debug!(%name, "variable registered");
    }
    inserted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::arena::RuleNode;
    use crate::domain::catalog::VariableHandling;
    use serde_json::json;

    fn descriptor() -> CapabilityDescriptor {
        CapabilityDescriptor::new("setVariable").with_variables(VariableHandling {
            inline: vec!["value".into()],
            names: vec!["variableName".into()],
            lists: vec!["dependsOn".into()],
        })
    }

    fn options(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn given_all_handling_kinds_when_extracting_then_finds_every_name_in_order() {
        let found = extract_references(
            &descriptor(),
            &options(json!({
                "variableName": "PMUSER_TARGET",
                "dependsOn": ["PMUSER_A", "PMUSER_B"],
                "value": "{{user.PMUSER_C}}-{{builtin.AK_HOST}}-{{user.PMUSER_D}}"
            })),
        )
        .unwrap();

        assert_eq!(
            found,
            vec!["PMUSER_TARGET", "PMUSER_A", "PMUSER_B", "PMUSER_C", "PMUSER_D"]
        );
    }

    #[test]
    fn given_non_array_list_option_when_extracting_then_type_mismatch_names_option() {
        let err = extract_references(
            &descriptor(),
            &options(json!({ "dependsOn": "PMUSER_A" })),
        )
        .unwrap_err();

        match err {
            CompileError::TypeMismatch {
                capability, option, ..
            } => {
                assert_eq!(capability, "setVariable");
                assert_eq!(option, "dependsOn");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn given_unhandled_key_with_reference_when_extracting_then_ignored() {
        let found = extract_references(
            &descriptor(),
            &options(json!({ "other": "{{user.PMUSER_X}}" })),
        )
        .unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn given_same_name_from_two_sites_when_registering_then_first_site_kept() {
        let mut tree = RuleArena::new();
        let root = tree.root();
        let child = tree.insert_child(root, RuleNode::default());

        register(&mut tree, child, "myVar", &Provenance::from("config.rs:10"));
        register(&mut tree, root, "myVar", &Provenance::from("config.rs:20"));

        let variable = tree.variables().get("myVar").unwrap();
        assert_eq!(variable.description, "defined at config.rs:10");
        assert!(!variable.hidden);
        assert!(!variable.sensitive);
    }
}
