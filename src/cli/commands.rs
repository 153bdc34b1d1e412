//! Command execution
//!
//! Dispatches CLI commands to the compiler.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::CommandFactory;
use clap_complete::generate;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::application::error_ext::{IoResultExt, JsonResultExt};
use crate::application::schema::rule_format_schema;
use crate::application::Compiler;
use crate::cli::args::{Cli, Commands, ConfigCommands};
use crate::cli::error::{CliError, CliResult};
use crate::cli::output;
use crate::config::{global_config_path, project_config_path, Settings};
use crate::domain::{resolve_provenance, CapabilityKind, Catalog, CatalogFile};
use crate::infrastructure::{FileSystem, InfraError, RealFileSystem};

/// Execute a CLI command.
pub fn execute_command(cli: &Cli) -> CliResult<()> {
    let project_dir = match &cli.project_dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().map_err(|e| InfraError::io("get current directory", e))?,
    };
    let mut settings = Settings::load(Some(project_dir.as_path()))?;
    if let Some(catalog) = &cli.catalog {
        settings.catalog = Some(catalog.clone());
    }
    debug!(?settings, "settings loaded");

    match &cli.command {
        Some(Commands::Compile {
            fragment,
            output,
            tree,
        }) => cmd_compile(&settings, fragment, output.as_deref(), *tree),
        Some(Commands::Locate { document, pointer }) => cmd_locate(document, pointer),
        Some(Commands::Schema) => cmd_schema(&settings),
        Some(Commands::Capabilities) => cmd_capabilities(&settings),
        Some(Commands::Config { command }) => cmd_config(&settings, &project_dir, command),
        Some(Commands::Completion { shell }) => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            generate(*shell, &mut cmd, name, &mut io::stdout());
            Ok(())
        }
        None => Err(CliError::Usage(
            "no command given, see `rulecraft --help`".to_string(),
        )),
    }
}

/// Read and check the catalog named in the settings.
fn load_catalog(settings: &Settings, fs: &dyn FileSystem) -> CliResult<Catalog> {
    let path = settings.catalog.as_deref().ok_or_else(|| {
        CliError::Usage(
            "no capability catalog configured: pass --catalog or set `catalog` in rulecraft.toml"
                .to_string(),
        )
    })?;
    let text = fs
        .read_to_string(path)
        .with_path_context("read catalog", path)?;
    let file: CatalogFile =
        serde_json::from_str(&text).with_path_context("parse catalog", path)?;
    let catalog = Catalog::from_file(file)?;
    debug!(capabilities = catalog.len(), path = %path.display(), "catalog loaded");
    Ok(catalog)
}

fn absolute(path: &Path) -> CliResult<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().map_err(|e| InfraError::io("get current directory", e))?;
    Ok(cwd.join(path))
}

#[instrument(level = "debug", skip(settings))]
fn cmd_compile(settings: &Settings, fragment: &Path, output: Option<&Path>, tree: bool) -> CliResult<()> {
    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);
    let catalog = load_catalog(settings, fs.as_ref())?;
    let compiler = Compiler::from_settings(settings, catalog, fs)?;

    let fragment = absolute(fragment)?;
    let expression = fragment.to_string_lossy().into_owned();
    let compilation = compiler.compile(|root| {
        root.import(&expression)?;
        Ok(())
    })?;

    if tree {
        output::info(&compilation.tree.to_tree_string());
        return Ok(());
    }

    let document = compilation.document.to_string_pretty();
    match output {
        Some(path) => {
            std::fs::write(path, format!("{document}\n"))
                .map_err(|e| InfraError::io(format!("write {}", path.display()), e))?;
            output::success(&format!(
                "{} rules written to {}",
                compilation.tree.len(),
                path.display()
            ));
        }
        None => output::info(&document),
    }
    Ok(())
}

#[instrument(level = "debug")]
fn cmd_locate(document: &Path, pointer: &str) -> CliResult<()> {
    let text = RealFileSystem
        .read_to_string(document)
        .with_path_context("read document", document)?;
    let value: Value = serde_json::from_str(&text).with_path_context("parse document", document)?;

    match resolve_provenance(&value, pointer) {
        Some(provenance) => {
            output::info(&provenance);
            Ok(())
        }
        None => Err(CliError::NotFound(format!(
            "no provenance recorded on the path of {pointer}"
        ))),
    }
}

fn cmd_schema(settings: &Settings) -> CliResult<()> {
    let catalog = load_catalog(settings, &RealFileSystem)?;
    let schema = rule_format_schema(&catalog);
    let text = serde_json::to_string_pretty(&schema).map_err(|e| {
        crate::application::ApplicationError::OperationFailed {
            context: "render schema".to_string(),
            source: Box::new(e),
        }
    })?;
    output::info(&text);
    Ok(())
}

fn cmd_capabilities(settings: &Settings) -> CliResult<()> {
    let catalog = load_catalog(settings, &RealFileSystem)?;
    for kind in [CapabilityKind::Criteria, CapabilityKind::Behavior] {
        output::header(&kind);
        for descriptor in catalog.descriptors(kind) {
            let defaults: Vec<_> = descriptor.defaults.keys().map(String::as_str).collect();
            if defaults.is_empty() {
                output::info(&format!("  {}", descriptor.name));
            } else {
                output::field(&descriptor.name, &format!("defaults {}", defaults.join(", ")));
            }
        }
    }
    Ok(())
}

fn cmd_config(settings: &Settings, project_dir: &Path, command: &ConfigCommands) -> CliResult<()> {
    match command {
        ConfigCommands::Show => output::info(&settings.to_toml()?),
        ConfigCommands::Template => output::info(&Settings::template()),
        ConfigCommands::Path => {
            output::header(&"Config paths");
            match global_config_path() {
                Some(path) => output::field("global", &path.display()),
                None => output::warning("no home directory, global config disabled"),
            }
            output::field("project", &project_config_path(project_dir).display());
        }
    }
    Ok(())
}
