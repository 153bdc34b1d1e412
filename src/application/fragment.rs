//! Import of externally authored JSON rule fragments into a tree.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::application::schema::{SchemaRegistry, INCLUDE_PREFIX};
use crate::domain::pointer::{line_excerpt, locate_in_text};
use crate::domain::variables;
use crate::domain::{
    Capability, CapabilityKind, Catalog, CompileError, CompileResult, FragmentFailure,
    MatchPolicy, Provenance, RuleArena, RuleId, RuleNode, Variable,
};
use crate::infrastructure::FileSystem;

/// Declarative rule shape accepted in fragment files.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct FragmentRule {
    name: Option<String>,
    comment: Option<String>,
    match_policy: Option<MatchPolicy>,
    criteria: Vec<FragmentCapability>,
    behaviors: Vec<FragmentCapability>,
    variables: Vec<FragmentVariable>,
    children: Vec<FragmentChild>,
}

#[derive(Debug, Clone, Deserialize)]
struct FragmentCapability {
    name: String,
    #[serde(default)]
    options: Value,
}

#[derive(Debug, Clone, Deserialize)]
struct FragmentVariable {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    hidden: bool,
    #[serde(default)]
    sensitive: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum FragmentChild {
    Include(String),
    Rule(FragmentRule),
}

/// Resolve a fragment path expression against the directory of the file that referenced it.
///
/// Absolute paths pass through. The result is lexically normalized (`.` and `..` folded)
/// but not canonicalized, so provenance shows the path the author wrote.
pub fn resolve_fragment_path(origin_dir: &Path, expression: &str) -> PathBuf {
    let expression = Path::new(expression);
    let joined = if expression.is_absolute() {
        expression.to_path_buf()
    } else {
        origin_dir.join(expression)
    };
    normalize_lexically(&joined)
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Loads, validates and splices fragments. Cheap to clone.
#[derive(Clone)]
pub struct FragmentImporter {
    fs: Arc<dyn FileSystem>,
    schemas: Arc<SchemaRegistry>,
    default_rule_format: String,
    excerpt_width: usize,
}

impl std::fmt::Debug for FragmentImporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FragmentImporter")
            .field("schemas", &self.schemas)
            .field("default_rule_format", &self.default_rule_format)
            .finish()
    }
}

/// Text and location of the fragment being converted.
struct Source<'a> {
    path: &'a Path,
    text: &'a str,
}

impl Source<'_> {
    fn provenance_at(&self, pointer: &str) -> Provenance {
        Provenance::at_line(self.path, locate_in_text(self.text, pointer).line)
    }

    fn dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new(""))
    }
}

impl FragmentImporter {
    pub fn new(
        fs: Arc<dyn FileSystem>,
        schemas: Arc<SchemaRegistry>,
        default_rule_format: impl Into<String>,
        excerpt_width: usize,
    ) -> Self {
        Self {
            fs,
            schemas,
            default_rule_format: default_rule_format.into(),
            excerpt_width,
        }
    }

    /// Import the fragment at `expression` as the last child of `parent`.
    ///
    /// Returns the id of the fragment's root rule.
    #[instrument(level = "debug", skip(self, tree, catalog))]
    pub fn import(
        &self,
        tree: &mut RuleArena,
        catalog: &Catalog,
        parent: RuleId,
        origin_dir: &Path,
        expression: &str,
    ) -> CompileResult<RuleId> {
        let mut stack = Vec::new();
        self.import_nested(tree, catalog, parent, origin_dir, expression, &mut stack)
    }

    fn import_nested(
        &self,
        tree: &mut RuleArena,
        catalog: &Catalog,
        parent: RuleId,
        origin_dir: &Path,
        expression: &str,
        stack: &mut Vec<PathBuf>,
    ) -> CompileResult<RuleId> {
        let path = resolve_fragment_path(origin_dir, expression);
        if stack.contains(&path) {
            return Err(CompileError::bad_fragment(path, FragmentFailure::IncludeCycle));
        }

        let text = self
            .fs
            .read_to_string(&path)
            .map_err(|source| CompileError::FragmentIo {
                path: path.clone(),
                source,
            })?;
        let rule = self.load(&path, &text)?;
        debug!(path = %path.display(), "fragment validated");

        stack.push(path.clone());
        let source = Source {
            path: &path,
            text: &text,
        };
        let id = self.splice(
            tree,
            catalog,
            parent,
            rule,
            "",
            Provenance::from_path(&path),
            &source,
            stack,
        )?;
        stack.pop();
        Ok(id)
    }

    /// Parse and validate fragment text.
    fn load(&self, path: &Path, text: &str) -> CompileResult<FragmentRule> {
        let document: Value = serde_json::from_str(text).map_err(|e| {
            CompileError::bad_fragment(
                path,
                FragmentFailure::Parse {
                    message: e.to_string(),
                    line: e.line(),
                    column: e.column(),
                },
            )
        })?;

        let version = document
            .get("ruleFormat")
            .and_then(Value::as_str)
            .unwrap_or(&self.default_rule_format)
            .to_string();

        if let Some(violation) = self.schemas.validate(&version, &document)? {
            return Err(self.invalid(path, text, violation.message, violation.pointer));
        }

        // A looser external schema may accept shapes the converter cannot
        serde_json::from_value(document)
            .map_err(|e| self.invalid(path, text, e.to_string(), String::new()))
    }

    fn invalid(&self, path: &Path, text: &str, message: String, pointer: String) -> CompileError {
        let position = locate_in_text(text, &pointer);
        CompileError::bad_fragment(
            path,
            FragmentFailure::Invalid {
                message,
                line: position.line,
                excerpt: line_excerpt(text, position.line, self.excerpt_width),
                pointer,
            },
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn splice(
        &self,
        tree: &mut RuleArena,
        catalog: &Catalog,
        parent: RuleId,
        rule: FragmentRule,
        pointer: &str,
        provenance: Provenance,
        source: &Source<'_>,
        stack: &mut Vec<PathBuf>,
    ) -> CompileResult<RuleId> {
        let id = tree.insert_child(
            parent,
            RuleNode {
                name: rule.name,
                comment: rule.comment,
                match_policy: rule.match_policy,
                provenance: Some(provenance),
                ..Default::default()
            },
        );

        for (i, variable) in rule.variables.into_iter().enumerate() {
            let provenance = source.provenance_at(&format!("{pointer}/variables/{i}"));
            let description = variable
                .description
                .unwrap_or_else(|| format!("defined at {provenance}"));
            variables::declare(
                tree,
                id,
                Variable {
                    name: variable.name,
                    description,
                    hidden: variable.hidden,
                    sensitive: variable.sensitive,
                    provenance,
                },
            );
        }

        for (i, entry) in rule.criteria.into_iter().enumerate() {
            let provenance = source.provenance_at(&format!("{pointer}/criteria/{i}"));
            let capability =
                attach(tree, catalog, id, CapabilityKind::Criteria, entry, provenance)?;
            tree.node_mut(id).matchers.push(capability);
        }

        for (i, entry) in rule.behaviors.into_iter().enumerate() {
            let provenance = source.provenance_at(&format!("{pointer}/behaviors/{i}"));
            let capability =
                attach(tree, catalog, id, CapabilityKind::Behavior, entry, provenance)?;
            tree.node_mut(id).commands.push(capability);
        }

        for (i, child) in rule.children.into_iter().enumerate() {
            let child_pointer = format!("{pointer}/children/{i}");
            match child {
                FragmentChild::Include(reference) => {
                    let Some(expression) = reference.strip_prefix(INCLUDE_PREFIX) else {
                        return Err(self.invalid(
                            source.path,
                            source.text,
                            format!("child reference must start with '{INCLUDE_PREFIX}'"),
                            child_pointer,
                        ));
                    };
                    self.import_nested(tree, catalog, id, source.dir(), expression.trim(), stack)?;
                }
                FragmentChild::Rule(child) => {
                    let provenance = source.provenance_at(&child_pointer);
                    self.splice(
                        tree,
                        catalog,
                        id,
                        child,
                        &child_pointer,
                        provenance,
                        source,
                        stack,
                    )?;
                }
            }
        }

        Ok(id)
    }
}

/// Apply catalog defaults and variable discovery to one fragment entry.
fn attach(
    tree: &mut RuleArena,
    catalog: &Catalog,
    node: RuleId,
    kind: CapabilityKind,
    entry: FragmentCapability,
    provenance: Provenance,
) -> CompileResult<Capability> {
    let descriptor = catalog.require(kind, &entry.name)?;
    let options = descriptor.resolve_options(entry.options)?;
    variables::register_references(tree, node, descriptor, &options, &provenance)?;
    Ok(Capability {
        name: entry.name,
        options,
        provenance,
    })
}
