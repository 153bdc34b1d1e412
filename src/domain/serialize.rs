//! Tree to document conversion.

use serde_json::{json, Map, Value};
use tracing::instrument;

use crate::domain::arena::{Capability, RuleArena, RuleId, RuleNode};

/// The compiled output handed to the upload client.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub rule_format: String,
    /// The root rule in rule shape
    pub rules: Value,
}

impl Document {
    /// `{"ruleFormat": ..., "rules": ...}`, the shape remote error pointers address.
    pub fn to_value(&self) -> Value {
        json!({
            "ruleFormat": self.rule_format,
            "rules": self.rules,
        })
    }

    pub fn to_string_pretty(&self) -> String {
        // Serializing a Value cannot fail
        serde_json::to_string_pretty(&self.to_value()).unwrap_or_default()
    }
}

/// Serialize the whole tree into a document.
#[instrument(level = "debug", skip(tree))]
pub fn serialize(tree: &RuleArena, rule_format: &str) -> Document {
    Document {
        rule_format: rule_format.to_string(),
        rules: serialize_rules(tree),
    }
}

/// Serialize the tree in rule shape, starting at the root.
pub fn serialize_rules(tree: &RuleArena) -> Value {
    rule_value(tree, tree.root())
}

fn rule_value(tree: &RuleArena, idx: RuleId) -> Value {
    let node = tree.node(idx);
    let mut rule = Map::new();

    rule.insert("name".into(), Value::String(display_name(node)));
    rule.insert("comment".into(), Value::String(display_comment(node)));

    if let Some(provenance) = &node.provenance {
        rule.insert("provenance".into(), Value::String(provenance.to_string()));
    }
    if !node.matchers.is_empty() {
        rule.insert("criteria".into(), capabilities_value(&node.matchers));
    }
    if let Some(policy) = node.match_policy {
        rule.insert("matchPolicy".into(), Value::String(policy.as_str().into()));
    }
    if idx == tree.root() && !tree.variables().is_empty() {
        let variables = tree
            .variables()
            .iter()
            .map(|v| {
                json!({
                    "name": v.name,
                    "value": "",
                    "description": v.description,
                    "hidden": v.hidden,
                    "sensitive": v.sensitive,
                    "provenance": v.provenance.to_string(),
                })
            })
            .collect();
        rule.insert("variables".into(), Value::Array(variables));
    }
    if !node.commands.is_empty() {
        rule.insert("behaviors".into(), capabilities_value(&node.commands));
    }
    if !node.children.is_empty() {
        let children = node
            .children
            .iter()
            .map(|&child| rule_value(tree, child))
            .collect();
        rule.insert("children".into(), Value::Array(children));
    }

    Value::Object(rule)
}

fn capabilities_value(entries: &[Capability]) -> Value {
    entries
        .iter()
        .map(|c| {
            json!({
                "name": c.name,
                "options": c.options,
                "provenance": c.provenance.to_string(),
            })
        })
        .collect()
}

fn display_name(node: &RuleNode) -> String {
    node.label()
}

// The provenance is appended, never substituted, so it survives a user comment.
fn display_comment(node: &RuleNode) -> String {
    match (&node.comment, &node.provenance) {
        (Some(comment), Some(provenance)) => format!("{comment}\n{provenance}"),
        (Some(comment), None) => comment.clone(),
        (None, Some(provenance)) => provenance.to_string(),
        (None, None) => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::arena::MatchPolicy;
    use crate::domain::provenance::Provenance;
    use crate::domain::variables;

    fn capability(name: &str, provenance: &str) -> Capability {
        Capability {
            name: name.into(),
            options: Map::new(),
            provenance: Provenance::from(provenance),
        }
    }

    #[test]
    fn given_bare_node_when_serializing_then_omits_empty_collections() {
        let tree = RuleArena::new();
        let rules = serialize_rules(&tree);

        let object = rules.as_object().unwrap();
        for key in ["criteria", "behaviors", "children", "variables", "matchPolicy"] {
            assert!(!object.contains_key(key), "unexpected key {key}");
        }
        assert_eq!(rules["name"], "default");
        assert_eq!(rules["comment"], "");
    }

    #[test]
    fn given_comment_and_provenance_when_serializing_then_keeps_both() {
        let mut tree = RuleArena::new();
        let root = tree.root();
        tree.insert_child(
            root,
            RuleNode {
                name: Some("Static".into()),
                comment: Some("Cache static assets".into()),
                provenance: Some(Provenance::from("src/rules.rs:12")),
                ..Default::default()
            },
        );

        let rules = serialize_rules(&tree);
        let comment = rules["children"][0]["comment"].as_str().unwrap();

        assert!(comment.starts_with("Cache static assets"));
        assert!(comment.contains("src/rules.rs:12"));
    }

    #[test]
    fn given_unnamed_node_when_serializing_then_provenance_fills_name_and_comment() {
        let mut tree = RuleArena::new();
        let root = tree.root();
        tree.insert_child(
            root,
            RuleNode {
                provenance: Some(Provenance::from("src/rules.rs:40")),
                matchers: vec![capability("path", "src/rules.rs:40")],
                match_policy: Some(MatchPolicy::All),
                ..Default::default()
            },
        );

        let child = &serialize_rules(&tree)["children"][0];

        assert_eq!(child["name"], "src/rules.rs:40");
        assert_eq!(child["comment"], "src/rules.rs:40");
        assert_eq!(child["matchPolicy"], "all");
        assert_eq!(child["criteria"][0]["provenance"], "src/rules.rs:40");
    }

    #[test]
    fn given_registered_variables_when_serializing_then_only_root_lists_them() {
        let mut tree = RuleArena::new();
        let root = tree.root();
        let child = tree.insert_child(root, RuleNode::default());
        variables::register(&mut tree, child, "PMUSER_A", &Provenance::from("x.rs:1"));

        let rules = serialize_rules(&tree);

        assert_eq!(rules["variables"][0]["name"], "PMUSER_A");
        assert!(rules["children"][0].get("variables").is_none());
    }

    #[test]
    fn given_same_tree_when_serializing_twice_then_identical() {
        let mut tree = RuleArena::new();
        let root = tree.root();
        tree.node_mut(root).commands.push(capability("caching", "a.rs:1"));

        assert_eq!(serialize(&tree, "latest"), serialize(&tree, "latest"));
    }
}
