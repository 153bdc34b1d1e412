//! CLI argument definitions using clap

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueHint};

/// Compile CDN delivery rules and trace validation errors back to their source
#[derive(Parser, Debug)]
#[command(name = "rulecraft")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Turn debugging information on (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub debug: u8,

    /// Project directory holding rulecraft.toml (default: cwd)
    #[arg(short = 'C', long, global = true, value_hint = ValueHint::DirPath)]
    pub project_dir: Option<PathBuf>,

    /// Capability catalog (overrides the configured one)
    #[arg(long, global = true, env = "RULECRAFT_CATALOG", value_hint = ValueHint::FilePath)]
    pub catalog: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compile a rule fragment into a rule tree document
    Compile {
        /// Fragment file spliced under the default rule
        #[arg(value_hint = ValueHint::FilePath)]
        fragment: PathBuf,
        /// Write the document here instead of stdout
        #[arg(short, long, value_hint = ValueHint::FilePath)]
        output: Option<PathBuf>,
        /// Print the rule hierarchy instead of the document
        #[arg(long)]
        tree: bool,
    },

    /// Find the source location behind a JSON pointer into a compiled document
    Locate {
        /// Compiled rule tree document
        #[arg(value_hint = ValueHint::FilePath)]
        document: PathBuf,
        /// JSON pointer reported by the remote validator, e.g. #/rules/behaviors/0/options/ttl
        pointer: String,
    },

    /// Print the rule-format schema fragments are validated against
    Schema,

    /// List the capabilities in the catalog
    Capabilities,

    /// Manage settings
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Generate shell completions
    Completion {
        /// Shell type
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show merged config
    Show,

    /// Print a config template
    Template,

    /// Show config paths
    Path,
}
