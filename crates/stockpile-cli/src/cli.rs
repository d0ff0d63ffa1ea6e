use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "stockpile")]
#[command(about = "Stockpile cache CLI: inspect and invalidate the shared cache")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (defaults to ./stockpile.toml when present)
    #[arg(short, long, global = true, env = "STOCKPILE_CONFIG")]
    pub config: Option<String>,

    /// Output format
    #[arg(short, long, global = true)]
    pub format: Option<OutputFormat>,
}

#[derive(Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check the shared store connection
    Ping,
    /// Read the raw cached value at a key
    Get(GetArgs),
    /// Compute the cache key for a namespace and JSON query parameters
    Key(KeyArgs),
    /// Invalidate one or more tags
    Invalidate(InvalidateArgs),
    /// Show the tag cascade graph
    Graph,
    /// Stream invalidation events from all instances
    Watch(WatchArgs),
}

#[derive(clap::Args)]
pub struct GetArgs {
    /// Cache key (e.g. orders:42)
    pub key: String,
}

#[derive(clap::Args)]
pub struct KeyArgs {
    /// Key namespace (e.g. products:list)
    pub namespace: String,
    /// Query parameters as a JSON object
    pub params: String,
}

#[derive(clap::Args)]
pub struct InvalidateArgs {
    /// Tags to invalidate (e.g. orders, products:42)
    #[arg(required = true)]
    pub tags: Vec<String>,
    /// Do not invalidate dependent tags
    #[arg(long)]
    pub no_cascade: bool,
    /// Do not notify other instances
    #[arg(long)]
    pub no_broadcast: bool,
    /// Only drop this process's local copies
    #[arg(long, conflicts_with_all = ["no_cascade", "no_broadcast"])]
    pub local_only: bool,
}

#[derive(clap::Args)]
pub struct WatchArgs {
    /// Stop after this many events
    #[arg(short = 'n', long)]
    pub limit: Option<usize>,
}
