use cachemeter_quota::PersistenceType;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Inspect and repair the disk usage accounting of per-origin cache stores.
#[derive(Debug, Parser)]
#[command(name = "cachemeter", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file (TOML, YAML or JSON).
    #[arg(long, global = true, env = "CACHEMETER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Storage root, overriding the configured one.
    #[arg(long, global = true)]
    pub storage_root: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Report the usage of an origin's cache directory.
    ///
    /// Without `--init`, an origin whose padding total is unknown (missing or
    /// corrupt `.padding`, or a pending `.padding-tmp`) reports 0: there is
    /// no long-running quota authority to fall back to between runs.
    Usage {
        #[command(flatten)]
        target: Target,
        /// Recompute the padding total from the record store if the padding
        /// file can't be trusted, as done when the origin is first loaded.
        #[arg(long)]
        init: bool,
    },
    /// Show the state of an origin's padding files.
    Padding(Target),
    /// Recompute an origin's padding total from its record store.
    RestorePadding(Target),
    /// Reset an origin's padding total to zero.
    WipePadding(Target),
    /// Create a zero padding file where none exists yet.
    Upgrade(Target),
}

#[derive(Debug, Args)]
pub struct Target {
    /// Origin whose cache directory to operate on, e.g. `https://example.com`.
    #[arg(long)]
    pub origin: String,
    #[arg(long, value_enum, default_value_t = Persistence::Default)]
    pub persistence: Persistence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Persistence {
    Persistent,
    Temporary,
    Default,
}

impl From<Persistence> for PersistenceType {
    fn from(value: Persistence) -> Self {
        match value {
            Persistence::Persistent => Self::Persistent,
            Persistence::Temporary => Self::Temporary,
            Persistence::Default => Self::Default,
        }
    }
}
