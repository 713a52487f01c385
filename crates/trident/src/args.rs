use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum LogFormatArg {
    #[default]
    Pretty,
    Json,
}

impl From<LogFormatArg> for logutil::LogFormat {
    fn from(format: LogFormatArg) -> Self {
        match format {
            LogFormatArg::Pretty => logutil::LogFormat::HumanReadable,
            LogFormatArg::Json => logutil::LogFormat::Json,
        }
    }
}

#[derive(Parser)]
#[clap(name = "trident")]
#[clap(version)]
#[clap(about = "Cross-database pipeline executor", long_about = None)]
pub struct Cli {
    /// Log verbosity.
    #[clap(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log output format.
    #[clap(long, value_enum, default_value_t = LogFormatArg::Pretty, global = true)]
    pub log_format: LogFormatArg,

    /// Path to the schema inference output.
    #[clap(long, env = "SCHEMA_FILE", default_value = "schemas.json")]
    pub schema_file: PathBuf,

    /// Result cache TTL in seconds. Zero disables caching.
    #[clap(long, env = "CACHE_TTL", default_value_t = 3600)]
    pub cache_ttl_secs: u64,

    #[clap(flatten)]
    pub backends: BackendArgs,

    #[clap(subcommand)]
    pub command: Commands,
}

/// Connection settings for the backends a plan can target.
///
/// A backend is registered only when its required settings are present;
/// plans touching an unconfigured backend fail at execution time.
#[derive(Debug, Clone, Parser)]
pub struct BackendArgs {
    /// Postgres host.
    #[clap(long, env = "PG_HOST")]
    pub pg_host: Option<String>,

    /// Postgres port.
    #[clap(long, env = "PG_PORT")]
    pub pg_port: Option<u16>,

    /// Postgres user.
    #[clap(long, env = "PG_USER")]
    pub pg_user: Option<String>,

    /// Postgres password.
    #[clap(long, env = "PG_PASSWORD")]
    pub pg_password: Option<String>,

    /// Postgres database name.
    #[clap(long, env = "PG_DATABASE")]
    pub pg_database: Option<String>,

    /// Neo4j HTTP URI, e.g. <http://localhost:7474>.
    #[clap(long, env = "NEO4J_URI")]
    pub neo4j_uri: Option<String>,

    /// Neo4j user.
    #[clap(long, env = "NEO4J_USER")]
    pub neo4j_user: Option<String>,

    /// Neo4j password.
    #[clap(long, env = "NEO4J_PASSWORD")]
    pub neo4j_password: Option<String>,

    /// Neo4j database name.
    #[clap(long, env = "NEO4J_DATABASE", default_value = "neo4j")]
    pub neo4j_database: String,

    /// MongoDB connection string.
    #[clap(long, env = "MONGO_URI")]
    pub mongo_uri: Option<String>,

    /// MongoDB database name.
    #[clap(long, env = "MONGO_DATABASE")]
    pub mongo_database: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute a pipeline plan and print the merged results.
    Run(RunArgs),
    /// Check connectivity to every configured backend.
    Check,
}

#[derive(Debug, Parser)]
pub struct RunArgs {
    /// Path to the plan JSON. Reads stdin when omitted.
    #[clap(short, long)]
    pub plan: Option<PathBuf>,
}
