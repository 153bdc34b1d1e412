//! The compiler entry point and the builder handles operators use to describe rules.
//!
//! ```ignore
//! let compilation = compiler.compile(|root| {
//!     root.behavior("origin", json!({ "hostname": "origin.example.com" }))?;
//!     root.criteria("path", json!({ "values": ["/static/*"] }))?
//!         .behavior("caching", json!({ "ttl": "7d" }))?;
//!     root.import("fragments/security.json")?;
//!     Ok(())
//! })?;
//! ```

use std::panic::Location;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::application::fragment::FragmentImporter;
use crate::application::schema::{SchemaRegistry, DEFAULT_RULE_FORMAT};
use crate::application::ApplicationResult;
use crate::config::Settings;
use crate::domain::provenance::caller_dir;
use crate::domain::variables;
use crate::domain::{
    serialize, Capability, CapabilityKind, Catalog, CompileResult, Document, MatchPolicy,
    Provenance, RuleArena, RuleId, RuleNode,
};
use crate::infrastructure::{FileSystem, RealFileSystem};

/// Name given to the root rule.
pub const ROOT_RULE_NAME: &str = "default";

/// Default width of the line excerpt in fragment validation errors.
pub const DEFAULT_EXCERPT_WIDTH: usize = 80;

/// Holds everything a compile run needs; reusable across runs.
#[derive(Debug, Clone)]
pub struct Compiler {
    catalog: Arc<Catalog>,
    fragments: FragmentImporter,
    rule_format: String,
    source_root: PathBuf,
}

/// Output of a single compile run.
#[derive(Debug)]
pub struct Compilation {
    pub tree: RuleArena,
    pub document: Document,
}

impl Compiler {
    /// Compiler with the built-in schema, the real filesystem and the current directory
    /// as source root.
    pub fn new(catalog: Catalog) -> ApplicationResult<Self> {
        let schemas = SchemaRegistry::builtin(&catalog, DEFAULT_RULE_FORMAT)?;
        Ok(Self::with_parts(
            catalog,
            schemas,
            Arc::new(RealFileSystem),
            DEFAULT_RULE_FORMAT,
            std::env::current_dir().unwrap_or_default(),
            DEFAULT_EXCERPT_WIDTH,
        ))
    }

    /// Compiler configured from settings: schema directory, rule format, source root.
    #[instrument(level = "debug", skip(settings, catalog, fs))]
    pub fn from_settings(
        settings: &Settings,
        catalog: Catalog,
        fs: Arc<dyn FileSystem>,
    ) -> ApplicationResult<Self> {
        let mut schemas = SchemaRegistry::builtin(&catalog, &settings.rule_format)?;
        if let Some(dir) = &settings.schema_dir {
            let loaded = schemas.load_dir(fs.as_ref(), dir)?;
            debug!(loaded, dir = %dir.display(), "external schemas loaded");
        }
        Ok(Self::with_parts(
            catalog,
            schemas,
            fs,
            &settings.rule_format,
            settings.source_root.clone(),
            settings.excerpt_width,
        ))
    }

    pub fn with_parts(
        catalog: Catalog,
        schemas: SchemaRegistry,
        fs: Arc<dyn FileSystem>,
        rule_format: &str,
        source_root: PathBuf,
        excerpt_width: usize,
    ) -> Self {
        Self {
            catalog: Arc::new(catalog),
            fragments: FragmentImporter::new(fs, Arc::new(schemas), rule_format, excerpt_width),
            rule_format: rule_format.to_string(),
            source_root,
        }
    }

    /// Directory that relative call-site file names are resolved against.
    pub fn with_source_root(mut self, source_root: impl Into<PathBuf>) -> Self {
        self.source_root = source_root.into();
        self
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn rule_format(&self) -> &str {
        &self.rule_format
    }

    /// Run `configure` once against a fresh root and serialize the result.
    ///
    /// Any error aborts the run; no partial tree is returned.
    #[instrument(level = "info", skip(self, configure))]
    pub fn compile<F>(&self, configure: F) -> CompileResult<Compilation>
    where
        F: FnOnce(&mut RuleScope<'_>) -> CompileResult<()>,
    {
        let tree = self.build_tree(configure)?;
        let document = serialize(&tree, &self.rule_format);
        info!(rules = tree.len(), variables = tree.variables().len(), "compiled");
        Ok(Compilation { tree, document })
    }

    /// Like [`Compiler::compile`] without serializing.
    pub fn build_tree<F>(&self, configure: F) -> CompileResult<RuleArena>
    where
        F: FnOnce(&mut RuleScope<'_>) -> CompileResult<()>,
    {
        let mut session = CompileSession {
            tree: RuleArena::new(),
            catalog: Arc::clone(&self.catalog),
            fragments: self.fragments.clone(),
            source_root: self.source_root.clone(),
        };
        let root = session.tree.root();
        session.tree.node_mut(root).name = Some(ROOT_RULE_NAME.to_string());

        let mut scope = RuleScope {
            session: &mut session,
            id: root,
        };
        configure(&mut scope)?;
        Ok(session.tree)
    }
}

/// State of one compile run: the tree under construction plus shared collaborators.
#[derive(Debug)]
pub struct CompileSession {
    tree: RuleArena,
    catalog: Arc<Catalog>,
    fragments: FragmentImporter,
    source_root: PathBuf,
}

impl CompileSession {
    /// Look up the descriptor, merge defaults and register variables.
    fn capability(
        &mut self,
        node: RuleId,
        kind: CapabilityKind,
        name: &str,
        options: Value,
        provenance: Provenance,
    ) -> CompileResult<Capability> {
        let descriptor = self.catalog.require(kind, name)?;
        let options = descriptor.resolve_options(options)?;
        variables::register_references(&mut self.tree, node, descriptor, &options, &provenance)?;
        debug!(%kind, name, %provenance, "capability added");
        Ok(Capability {
            name: name.to_string(),
            options,
            provenance,
        })
    }

    fn child(&mut self, parent: RuleId, node: RuleNode) -> RuleId {
        self.tree.insert_child(parent, node)
    }
}

/// Handle to one rule while the operator's function runs.
///
/// Behaviors continue on the same rule (`&mut Self`); criteria fork a child scope.
pub struct RuleScope<'s> {
    session: &'s mut CompileSession,
    id: RuleId,
}

impl<'s> RuleScope<'s> {
    /// Arena id of the rule this handle mutates.
    pub fn id(&self) -> RuleId {
        self.id
    }

    /// Read-only view of the tree built so far.
    pub fn tree(&self) -> &RuleArena {
        &self.session.tree
    }

    pub fn node(&self) -> &RuleNode {
        self.session.tree.node(self.id)
    }

    pub fn name(&mut self, name: impl Into<String>) -> &mut Self {
        self.session.tree.node_mut(self.id).name = Some(name.into());
        self
    }

    pub fn comment(&mut self, comment: impl Into<String>) -> &mut Self {
        self.session.tree.node_mut(self.id).comment = Some(comment.into());
        self
    }

    /// Append a behavior to this rule and keep chaining on it.
    #[track_caller]
    pub fn behavior(&mut self, name: &str, options: Value) -> CompileResult<&mut Self> {
        let provenance = Provenance::capture();
        let capability =
            self.session
                .capability(self.id, CapabilityKind::Behavior, name, options, provenance)?;
        self.session.tree.node_mut(self.id).commands.push(capability);
        Ok(self)
    }

    /// Add a single criterion in a new child rule and return the child.
    ///
    /// Behaviors chained on the result apply only when the criterion matches.
    #[track_caller]
    pub fn criteria(&mut self, name: &str, options: Value) -> CompileResult<RuleScope<'_>> {
        let provenance = Provenance::capture();
        let capability = self.session.capability(
            self.id,
            CapabilityKind::Criteria,
            name,
            options,
            provenance.clone(),
        )?;
        let child = self.session.child(
            self.id,
            RuleNode {
                matchers: vec![capability],
                provenance: Some(provenance),
                ..Default::default()
            },
        );
        Ok(self.scope(child))
    }

    /// Dispatch on `kind`: behaviors return a handle to this rule, criteria a new child.
    #[track_caller]
    pub fn add_capability(
        &mut self,
        kind: CapabilityKind,
        name: &str,
        options: Value,
    ) -> CompileResult<RuleScope<'_>> {
        match kind {
            CapabilityKind::Behavior => {
                self.behavior(name, options)?;
                let id = self.id;
                Ok(self.scope(id))
            }
            CapabilityKind::Criteria => self.criteria(name, options),
        }
    }

    /// Nest a labelled child rule without a match condition.
    #[track_caller]
    pub fn group(&mut self, label: &str, comment: Option<&str>) -> RuleScope<'_> {
        let provenance = Provenance::capture();
        let child = self.session.child(
            self.id,
            RuleNode {
                name: Some(label.to_string()),
                comment: comment.map(str::to_string),
                provenance: Some(provenance),
                ..Default::default()
            },
        );
        self.scope(child)
    }

    /// Child rule that applies when any of the collected criteria match.
    #[track_caller]
    pub fn any_of<F>(&mut self, collect: F) -> CompileResult<RuleScope<'_>>
    where
        F: FnOnce(&mut CriteriaSet),
    {
        let provenance = Provenance::capture();
        self.compose(MatchPolicy::Any, provenance, collect)
    }

    /// Child rule that applies when all of the collected criteria match.
    #[track_caller]
    pub fn all_of<F>(&mut self, collect: F) -> CompileResult<RuleScope<'_>>
    where
        F: FnOnce(&mut CriteriaSet),
    {
        let provenance = Provenance::capture();
        self.compose(MatchPolicy::All, provenance, collect)
    }

    fn compose<F>(
        &mut self,
        policy: MatchPolicy,
        provenance: Provenance,
        collect: F,
    ) -> CompileResult<RuleScope<'_>>
    where
        F: FnOnce(&mut CriteriaSet),
    {
        let mut set = CriteriaSet::default();
        collect(&mut set);

        let mut matchers = Vec::with_capacity(set.pending.len());
        for pending in set.pending {
            matchers.push(self.session.capability(
                self.id,
                CapabilityKind::Criteria,
                &pending.name,
                pending.options,
                pending.provenance,
            )?);
        }

        let child = self.session.child(
            self.id,
            RuleNode {
                matchers,
                match_policy: Some(policy),
                provenance: Some(provenance),
                ..Default::default()
            },
        );
        debug!(%policy, "criteria composed");
        Ok(self.scope(child))
    }

    /// Splice the JSON fragment at `path` in as the last child of this rule.
    ///
    /// Relative paths resolve against the directory of the calling source file.
    #[track_caller]
    pub fn import(&mut self, path: &str) -> CompileResult<&mut Self> {
        let location = Location::caller();
        let session = &mut *self.session;
        let origin = caller_dir(location, &session.source_root);
        session
            .fragments
            .import(&mut session.tree, &session.catalog, self.id, &origin, path)?;
        Ok(self)
    }

    fn scope(&mut self, id: RuleId) -> RuleScope<'_> {
        RuleScope {
            session: &mut *self.session,
            id,
        }
    }
}

struct PendingCriteria {
    name: String,
    options: Value,
    provenance: Provenance,
}

/// Accumulator for [`RuleScope::any_of`] / [`RuleScope::all_of`]. Only criteria can be added.
#[derive(Default)]
pub struct CriteriaSet {
    pending: Vec<PendingCriteria>,
}

impl CriteriaSet {
    #[track_caller]
    pub fn criteria(&mut self, name: &str, options: Value) -> &mut Self {
        self.pending.push(PendingCriteria {
            name: name.to_string(),
            options,
            provenance: Provenance::capture(),
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::testing::{init_test_setup, sample_catalog};
    use serde_json::json;

    fn compiler() -> Compiler {
        init_test_setup();
        Compiler::new(sample_catalog()).unwrap()
    }

    #[test]
    fn given_chained_behaviors_when_building_then_same_handle_returned() {
        compiler()
            .build_tree(|root| {
                let root_ptr: *const RuleScope<'_> = root;
                let id = root.id();

                let returned = root.behavior("caching", json!({ "ttl": "1d" }))?;
                assert!(std::ptr::eq(returned, root_ptr));
                assert_eq!(returned.id(), id);

                let again = returned.behavior("origin", json!({ "hostname": "o.example.com" }))?;
                assert_eq!(again.id(), id);
                assert_eq!(again.node().commands.len(), 2);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn given_criteria_when_building_then_forks_child_scope() {
        let tree = compiler()
            .build_tree(|root| {
                let root_id = root.id();
                let child = root.criteria("path", json!({ "values": ["/img/*"] }))?;
                assert_ne!(child.id(), root_id);
                assert_eq!(child.tree().parent(child.id()), Some(root_id));
                assert!(child.node().match_policy.is_none());
                Ok(())
            })
            .unwrap();

        let root = tree.node(tree.root());
        assert_eq!(root.children.len(), 1);
        assert!(root.matchers.is_empty());
    }

    #[test]
    fn given_criteria_then_behavior_when_building_then_behavior_lands_on_child() {
        let tree = compiler()
            .build_tree(|root| {
                root.criteria("path", json!({ "values": ["/img/*"] }))?
                    .behavior("caching", json!({ "ttl": "30d" }))?;
                Ok(())
            })
            .unwrap();

        let root = tree.node(tree.root());
        assert!(root.commands.is_empty());
        let child = tree.node(root.children[0]);
        assert_eq!(child.commands[0].name, "caching");
    }

    #[test]
    fn given_all_of_when_composing_then_policy_is_all_and_order_kept() {
        let tree = compiler()
            .build_tree(|root| {
                root.all_of(|c| {
                    c.criteria("hostname", json!({ "values": ["www.example.com"] }))
                        .criteria("path", json!({ "values": ["/api/*"] }));
                })?
                .behavior("caching", json!({ "behavior": "NO_STORE" }))?;
                Ok(())
            })
            .unwrap();

        let composed = tree.node(tree.node(tree.root()).children[0]);
        assert_eq!(composed.match_policy, Some(MatchPolicy::All));
        let names: Vec<_> = composed.matchers.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["hostname", "path"]);
        assert_eq!(composed.commands.len(), 1);
    }

    #[test]
    fn given_any_of_when_composing_then_policy_is_any_without_commands() {
        let tree = compiler()
            .build_tree(|root| {
                root.any_of(|c| {
                    c.criteria("path", json!({ "values": ["/a"] }));
                    c.criteria("path", json!({ "values": ["/b"] }));
                })?;
                Ok(())
            })
            .unwrap();

        let composed = tree.node(tree.node(tree.root()).children[0]);
        assert_eq!(composed.match_policy, Some(MatchPolicy::Any));
        assert_eq!(composed.matchers.len(), 2);
        assert!(composed.commands.is_empty());
    }

    #[test]
    fn given_add_capability_when_dispatching_then_behaves_like_typed_methods() {
        compiler()
            .build_tree(|root| {
                let root_id = root.id();
                let same = root.add_capability(CapabilityKind::Behavior, "caching", json!({}))?;
                assert_eq!(same.id(), root_id);
                let forked =
                    root.add_capability(CapabilityKind::Criteria, "path", json!({ "values": ["/"] }))?;
                assert_ne!(forked.id(), root_id);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn given_behavior_via_add_capability_when_building_then_same_entry_as_behavior() {
        let tree = compiler()
            .build_tree(|root| {
                root.behavior("caching", json!({ "ttl": "1d" }))?;
                root.add_capability(CapabilityKind::Behavior, "caching", json!({ "ttl": "1d" }))?;
                Ok(())
            })
            .unwrap();

        let commands = &tree.node(tree.root()).commands;
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0].options, commands[1].options);
        assert_eq!(commands[1].options["behavior"], "MAX_AGE");
        let provenance = commands[1].provenance.as_str();
        assert!(provenance.contains("builder.rs:"), "{provenance}");
        assert_ne!(commands[0].provenance, commands[1].provenance);
    }

    #[test]
    fn given_behavior_call_when_building_then_provenance_is_this_file() {
        let tree = compiler()
            .build_tree(|root| {
                root.behavior("caching", json!({}))?;
                Ok(())
            })
            .unwrap();

        let provenance = tree.node(tree.root()).commands[0].provenance.to_string();
        assert!(provenance.contains("builder.rs:"), "{provenance}");
    }

    #[test]
    fn given_unknown_behavior_when_building_then_run_aborts() {
        let result = compiler().build_tree(|root| {
            root.behavior("teleport", json!({}))?;
            Ok(())
        });
        assert!(result.is_err());
    }

    #[test]
    fn given_compile_when_done_then_root_is_named_default() {
        let compilation = compiler().compile(|_| Ok(())).unwrap();
        assert_eq!(compilation.document.rules["name"], ROOT_RULE_NAME);
        assert_eq!(compilation.document.rule_format, DEFAULT_RULE_FORMAT);
    }
}
