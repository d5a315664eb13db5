//! CLI argument parsing and command definitions.

use clap::{Args, Parser, Subcommand};

// ============================================================================
// CLI argument types
// ============================================================================

/// Embedding normalization and bulk reprocessing for semantic search indices.
#[derive(Parser, Debug)]
#[command(name = "semvec", author, version, about, long_about = None)]
pub struct CliArgs {
    /// Path to configuration file.
    #[arg(short, long, env = "SEMVEC_CONFIG", global = true)]
    pub config: Option<String>,

    /// Enable verbose output.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Suppress non-essential output.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,
}

/// Top-level commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the HTTP API.
    Serve {
        /// Host address to bind to (overrides config).
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config).
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Pipeline definition operations.
    #[command(subcommand)]
    Pipeline(PipelineAction),

    /// Vector field schema operations.
    #[command(subcommand)]
    Schema(SchemaAction),

    /// Regenerate a vector field for every matching record.
    Reprocess(ReprocessArgs),

    /// Reprocessing job operations.
    #[command(subcommand)]
    Jobs(JobsAction),

    /// Nearest-neighbor search.
    Search(SearchArgs),

    /// Configuration operations.
    #[command(subcommand)]
    Config(ConfigAction),
}

/// Pipeline subcommands.
#[derive(Subcommand, Debug)]
pub enum PipelineAction {
    /// Register a new definition version and make it active.
    Register {
        /// Output vector field.
        #[arg(short, long)]
        field: String,

        /// Attributes to concatenate, in order.
        #[arg(long, value_delimiter = ',', required = true)]
        compose: Vec<String>,

        /// Output vector dimension.
        #[arg(short, long)]
        dimension: usize,
    },

    /// Make an existing version active.
    Activate {
        /// Output vector field.
        #[arg(short, long)]
        field: String,

        /// Version to activate.
        #[arg(long)]
        version: u64,
    },

    /// Show the active or a specific definition.
    Show {
        /// Output vector field.
        #[arg(short, long)]
        field: String,

        /// Version to show instead of the active one.
        #[arg(long)]
        version: Option<u64>,
    },

    /// List fields, or every version of one field.
    List {
        /// Output vector field.
        #[arg(short, long)]
        field: Option<String>,
    },
}

/// Schema subcommands.
#[derive(Subcommand, Debug)]
pub enum SchemaAction {
    /// Declare the vector field of the active definition in the store.
    Declare {
        /// Output vector field.
        #[arg(short, long)]
        field: String,
    },
}

/// Arguments for `semvec reprocess`.
#[derive(Args, Debug)]
pub struct ReprocessArgs {
    /// Output vector field.
    #[arg(short, long)]
    pub field: String,

    /// Definition version (defaults to the active one).
    #[arg(long)]
    pub version: Option<u64>,

    /// Records per batch (overrides config).
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Number of slices (overrides config).
    #[arg(long)]
    pub slices: Option<u32>,

    /// Only records whose vector is missing or from another version.
    #[arg(long)]
    pub stale_only: bool,
}

/// Jobs subcommands.
#[derive(Subcommand, Debug)]
pub enum JobsAction {
    /// List persisted jobs.
    List,

    /// Show one job.
    Status {
        /// Job id.
        id: String,
    },

    /// Resume a cancelled or failed job and wait for it.
    Resume {
        /// Job id.
        id: String,
    },

    /// Delete a finished job.
    Clear {
        /// Job id.
        id: String,
    },
}

/// Arguments for `semvec search`.
#[derive(Args, Debug)]
pub struct SearchArgs {
    /// Output vector field.
    #[arg(short, long)]
    pub field: String,

    /// Free-text query.
    #[arg(long, conflicts_with = "vector", required_unless_present = "vector")]
    pub text: Option<String>,

    /// Query vector, comma separated.
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
    pub vector: Option<Vec<f32>>,

    /// Results to return.
    #[arg(short, default_value_t = 10)]
    pub k: usize,

    /// Candidate pool size.
    #[arg(long)]
    pub candidates: Option<usize>,

    /// Attributes to return with each hit.
    #[arg(long, value_delimiter = ',')]
    pub fields: Vec<String>,
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show the resolved config file path.
    Path,

    /// Print the effective configuration as TOML.
    Show,

    /// Create a default configuration file.
    Init {
        /// Output file path (defaults to XDG config path).
        #[arg(long)]
        file: Option<String>,

        /// Overwrite existing file.
        #[arg(long)]
        force: bool,
    },
}

// ============================================================================
// Tests
// ============================================================================
