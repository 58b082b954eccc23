use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "slipway",
    about = "slipway — blue/green deploys for auto-scaling groups",
    version,
    propagate_version = true,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a release document through the deploy machine
    Deploy {
        /// Path to release.json
        release_file: String,
    },
    /// Raise the halt flag for a running release
    Halt {
        /// Path to release.json
        release_file: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("slipway=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Deploy { release_file } => commands::deploy::run(&release_file).await,
        Commands::Halt { release_file } => commands::halt::run(&release_file).await,
    }
}
