use std::collections::HashMap;
use std::fmt;

use generational_arena::{Arena, Index};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use termtree::Tree;
use tracing::{instrument, trace};

use crate::domain::provenance::Provenance;

/// Handle of a rule inside its arena.
pub type RuleId = Index;

/// How multiple criteria on one rule combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchPolicy {
    Any,
    All,
}

impl MatchPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchPolicy::Any => "any",
            MatchPolicy::All => "all",
        }
    }
}

impl fmt::Display for MatchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One criteria or behavior entry on a rule.
#[derive(Debug, Clone, PartialEq)]
pub struct Capability {
    pub name: String,
    /// Options after catalog defaults were merged in
    pub options: Map<String, Value>,
    pub provenance: Provenance,
}

/// A rule in the arena. Children are owned top-down; `parent` is only a lookup aid.
#[derive(Debug, Clone, Default)]
pub struct RuleNode {
    pub name: Option<String>,
    pub comment: Option<String>,
    pub matchers: Vec<Capability>,
    pub commands: Vec<Capability>,
    pub match_policy: Option<MatchPolicy>,
    /// None only for the synthetic root
    pub provenance: Option<Provenance>,
    pub parent: Option<RuleId>,
    pub children: Vec<RuleId>,
}

impl RuleNode {
    /// Label used for display: the user name, else provenance, else "default".
    pub fn label(&self) -> String {
        self.name
            .clone()
            .or_else(|| self.provenance.as_ref().map(ToString::to_string))
            .unwrap_or_else(|| "default".to_string())
    }
}

/// A user variable declared at the tree root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    pub name: String,
    pub description: String,
    pub hidden: bool,
    pub sensitive: bool,
    pub provenance: Provenance,
}

/// Root-scoped variable table. Insertion order is kept for stable output.
#[derive(Debug, Clone, Default)]
pub struct VariableTable {
    entries: Vec<Variable>,
    by_name: HashMap<String, usize>,
}

impl VariableTable {
    /// Insert unless the name already exists. Returns whether it was inserted.
    pub fn insert_if_absent(&mut self, variable: Variable) -> bool {
        if self.by_name.contains_key(&variable.name) {
            return false;
        }
        self.by_name
            .insert(variable.name.clone(), self.entries.len());
        self.entries.push(variable);
        true
    }

    pub fn get(&self, name: &str) -> Option<&Variable> {
        self.by_name.get(name).map(|&i| &self.entries[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Variable> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Arena-owned rule tree with a single root and the root's variable table.
///
/// The root is allocated on construction; every other node is inserted under an existing
/// parent, so parent chains always end at the root.
#[derive(Debug)]
pub struct RuleArena {
    arena: Arena<RuleNode>,
    root: RuleId,
    variables: VariableTable,
}

impl Default for RuleArena {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleArena {
    /// Allocate a tree holding only an unnamed root.
    pub fn new() -> Self {
        let mut arena = Arena::new();
        let root = arena.insert(RuleNode::default());
        Self {
            arena,
            root,
            variables: VariableTable::default(),
        }
    }

    pub fn root(&self) -> RuleId {
        self.root
    }

    /// Append a new child under `parent` and return its id.
    ///
    /// # Panics
    /// If `parent` does not belong to this arena. Ids are only handed out by the arena
    /// itself and nodes are never removed, so this is a programming error.
    #[instrument(level = "trace", skip(self, node))]
    pub fn insert_child(&mut self, parent: RuleId, mut node: RuleNode) -> RuleId {
        node.parent = Some(parent);
        let idx = self.arena.insert(node);
        self.node_mut(parent).children.push(idx);
        trace!(?idx, "rule inserted");
        idx
    }

    pub fn get(&self, idx: RuleId) -> Option<&RuleNode> {
        self.arena.get(idx)
    }

    /// # Panics
    /// If `idx` is not from this arena.
    pub fn node(&self, idx: RuleId) -> &RuleNode {
        &self.arena[idx]
    }

    /// # Panics
    /// If `idx` is not from this arena.
    pub fn node_mut(&mut self, idx: RuleId) -> &mut RuleNode {
        &mut self.arena[idx]
    }

    pub fn parent(&self, idx: RuleId) -> Option<RuleId> {
        self.get(idx).and_then(|n| n.parent)
    }

    /// Walk parent links up to the root.
    pub fn root_of(&self, mut idx: RuleId) -> RuleId {
        while let Some(parent) = self.parent(idx) {
            idx = parent;
        }
        idx
    }

    pub fn variables(&self) -> &VariableTable {
        &self.variables
    }

    pub fn variables_mut(&mut self) -> &mut VariableTable {
        &mut self.variables
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    /// Pre-order traversal from the root, children left to right.
    pub fn iter(&self) -> RuleIterator<'_> {
        RuleIterator::new(self)
    }

    #[instrument(level = "debug", skip(self))]
    pub fn depth(&self) -> usize {
        self.calculate_depth(self.root)
    }

    fn calculate_depth(&self, idx: RuleId) -> usize {
        1 + self
            .node(idx)
            .children
            .iter()
            .map(|&child| self.calculate_depth(child))
            .max()
            .unwrap_or(0)
    }

    /// Render rule labels with their criteria/behavior names.
    pub fn to_tree_string(&self) -> Tree<String> {
        fn build(arena: &RuleArena, idx: RuleId) -> Tree<String> {
            let node = arena.node(idx);
            let mut label = node.label();
            if !node.matchers.is_empty() {
                let names: Vec<_> = node.matchers.iter().map(|m| m.name.as_str()).collect();
                let policy = node.match_policy.map(|p| format!("{p} ")).unwrap_or_default();
                label.push_str(&format!(" [if {}{}]", policy, names.join(", ")));
            }
            if !node.commands.is_empty() {
                let names: Vec<_> = node.commands.iter().map(|c| c.name.as_str()).collect();
                label.push_str(&format!(" {{{}}}", names.join(", ")));
            }
            let leaves: Vec<_> = node.children.iter().map(|&c| build(arena, c)).collect();
            Tree::new(label).with_leaves(leaves)
        }
        build(self, self.root)
    }
}

pub struct RuleIterator<'a> {
    arena: &'a RuleArena,
    stack: Vec<RuleId>,
}

impl<'a> RuleIterator<'a> {
    fn new(arena: &'a RuleArena) -> Self {
        Self {
            arena,
            stack: vec![arena.root()],
        }
    }
}

impl<'a> Iterator for RuleIterator<'a> {
    type Item = (RuleId, &'a RuleNode);

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.stack.pop()?;
        let node = self.arena.get(current)?;
        // Reverse push keeps left-to-right order
        for &child in node.children.iter().rev() {
            self.stack.push(child);
        }
        Some((current, node))
    }
}
