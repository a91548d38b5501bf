//! lesson-harvest — command-line entry point.

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

mod cli;

#[derive(Parser)]
#[command(
    name = "lesson-harvest",
    about = "LessonHarvest — sign in, walk a course level, and download every lesson video",
    version,
    after_help = "Credentials are read from LESSON_HARVEST_EMAIL and LESSON_HARVEST_PASSWORD."
)]
struct Cli {
    /// Log level (trace, debug, info, warn, error). RUST_LOG takes precedence.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Harvest one course level
    Run(cli::run_cmd::RunArgs),
    /// Check environment and diagnose issues
    Doctor {
        /// Config file to check (defaults as for `run`)
        #[arg(long)]
        config: Option<std::path::PathBuf>,
    },
    /// Generate shell completion scripts
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish)
        shell: Shell,
    },
}

fn init_tracing(level: &str, json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_json);

    let mut json_errors = false;
    let result = match cli.command {
        Commands::Run(args) => {
            json_errors = args.json;
            cli::run_cmd::run(args).await
        }
        Commands::Doctor { config } => cli::doctor::run(config.as_deref()).await,
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "lesson-harvest", &mut std::io::stdout());
            Ok(())
        }
    };

    // 0 = run completed, 1 = could not start
    if let Err(e) = &result {
        if json_errors {
            cli::output::print_json(&serde_json::json!({
                "error": true,
                "message": format!("{e:#}"),
            }));
        } else {
            eprintln!("  Error: {e:#}");
        }
        std::process::exit(1);
    }

    result
}
