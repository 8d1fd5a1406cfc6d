use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser, Debug)]
#[command(name = "yacht", version, about = "Policy-enforcing MySQL proxy")]
struct Cli {
    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the proxy.
    Serve {
        /// Path to yacht.yaml
        #[arg(long, short, default_value = "yacht.yaml", env = "YACHT_CONFIG")]
        config: PathBuf,
    },

    /// Load and validate the configuration and policy without starting.
    Check {
        /// Path to yacht.yaml
        #[arg(long, short, default_value = "yacht.yaml", env = "YACHT_CONFIG")]
        config: PathBuf,
    },

    /// Parse a statement and decide it against a policy file, offline.
    Explain {
        /// Path to the policy file
        #[arg(long)]
        policy: PathBuf,

        /// Decide as if the mooring flag were set
        #[arg(long, default_value_t = false)]
        moored: bool,

        /// Default database used to qualify bare table names
        #[arg(long)]
        database: Option<String>,

        /// Print the result as JSON
        #[arg(long, default_value_t = false)]
        json: bool,

        /// The SQL text to explain
        sql: String,
    },
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.cmd {
        Command::Serve { config } => commands::serve::serve(config).await?,
        Command::Check { config } => commands::check::run(&config)?,
        Command::Explain {
            policy,
            moored,
            database,
            json,
            sql,
        } => commands::explain::run(&policy, moored, database.as_deref(), json, &sql)?,
    }

    Ok(())
}
