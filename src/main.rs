use anyhow::Result;
use clap::{CommandFactory, Parser};

use vm_sweeper::cli::{split_known_args, Cli};
use vm_sweeper::commands::sweep::{self, SweepOptions};
use vm_sweeper::config::Config;
use vm_sweeper::console::{Console, Target};

fn main() -> Result<()> {
    let args = split_known_args(std::env::args());
    let cli = Cli::parse_from(&args.known);

    // Initialize logging based on verbosity
    init_logging(cli.verbose, cli.quiet);

    if !args.unknown.is_empty() {
        Console::new(Target::Stderr, false).warn(&format!(
            "Ignoring unknown argument(s): {}",
            args.unknown.join(" ")
        ));
    }

    if let Some(shell) = cli.completions {
        clap_complete::generate(shell, &mut Cli::command(), "vm-sweeper", &mut std::io::stdout());
        return Ok(());
    }

    // Load configuration
    let config = Config::load(cli.config.as_deref())?;

    tracing::debug!(?config, "Loaded configuration");

    let options = SweepOptions::from_cli(&cli);
    tracing::info!(run = ?options.run, skip = ?options.skip, "Starting sweep");
    let outcome = sweep::run(&options, &config)?;

    if options.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    }

    Ok(())
}

fn init_logging(verbosity: u8, quiet: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let level = if quiet {
        "warn"
    } else {
        match verbosity {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("vm_sweeper={}", level)));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(filter)
        .init();
}
