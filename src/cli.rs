use clap::{CommandFactory, Parser};
use clap_complete::Shell;
use std::path::PathBuf;

use crate::config::RunConfig;

/// vm-sweeper - Best-effort cleanup of freshly provisioned Linux virtual machines
#[derive(Parser, Debug)]
#[command(name = "vm-sweeper")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    pub quiet: bool,

    /// Show what would be done without changing anything
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Leave cloud-init installed
    #[arg(long)]
    pub keep_cloud_init: bool,

    /// Skip the package update/upgrade stage
    #[arg(long)]
    pub no_update: bool,

    /// Keep the newest non-running kernel as a fallback
    #[arg(long)]
    pub keep_one_backup: bool,

    /// Stages to leave out (comma-separated ids)
    #[arg(long, value_delimiter = ',', value_name = "IDS")]
    pub skip: Vec<String>,

    /// Print the run summary as JSON
    #[arg(long)]
    pub json: bool,

    /// Generate shell completions and exit
    #[arg(long, value_enum, value_name = "SHELL")]
    pub completions: Option<Shell>,
}

impl Cli {
    pub fn run_config(&self) -> RunConfig {
        RunConfig {
            dry_run: self.dry_run,
            remove_cloud_init: !self.keep_cloud_init,
            do_system_update: !self.no_update,
            keep_one_backup_kernel: self.keep_one_backup,
        }
    }
}

/// Arguments after splitting off the ones clap does not know about.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SplitArgs {
    pub known: Vec<String>,
    pub unknown: Vec<String>,
}

/// Separate recognized arguments from unrecognized ones.
///
/// The first element is the program name and is always kept. Unknown flags
/// (and stray positional words) end up in `unknown` so the caller can warn
/// about them instead of failing.
pub fn split_known_args<I, S>(args: I) -> SplitArgs
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut command = Cli::command();
    command.build();

    let mut longs: Vec<(String, bool)> = Vec::new();
    let mut shorts: Vec<(char, bool)> = Vec::new();
    for arg in command.get_arguments() {
        let takes_value = arg.get_action().takes_values();
        if let Some(long) = arg.get_long() {
            longs.push((long.to_string(), takes_value));
        }
        if let Some(short) = arg.get_short() {
            shorts.push((short, takes_value));
        }
    }

    let long_takes_value = |name: &str| longs.iter().find(|(l, _)| l == name).map(|(_, v)| *v);
    let short_takes_value = |c: char| shorts.iter().find(|(s, _)| *s == c).map(|(_, v)| *v);

    let mut split = SplitArgs::default();
    let mut iter = args.into_iter().map(Into::into);

    if let Some(program) = iter.next() {
        split.known.push(program);
    }

    while let Some(arg) = iter.next() {
        if arg == "--" {
            split.unknown.extend(iter.by_ref());
            break;
        }

        if let Some(body) = arg.strip_prefix("--") {
            let (name, inline_value) = match body.split_once('=') {
                Some((name, _)) => (name, true),
                None => (body, false),
            };
            match long_takes_value(name) {
                Some(true) => {
                    split.known.push(arg.clone());
                    if !inline_value {
                        if let Some(value) = iter.next() {
                            split.known.push(value);
                        }
                    }
                }
                Some(false) if !inline_value => split.known.push(arg),
                _ => split.unknown.push(arg),
            }
            continue;
        }

        if arg.len() > 1 && arg.starts_with('-') {
            let cluster: Vec<char> = arg.chars().skip(1).collect();
            let mut needs_value = false;
            let mut recognized = true;
            for (i, c) in cluster.iter().enumerate() {
                match short_takes_value(*c) {
                    Some(true) => {
                        // The rest of the cluster, if any, is the value.
                        needs_value = i + 1 == cluster.len();
                        break;
                    }
                    Some(false) => {}
                    None => {
                        recognized = false;
                        break;
                    }
                }
            }
            if recognized {
                split.known.push(arg);
                if needs_value {
                    if let Some(value) = iter.next() {
                        split.known.push(value);
                    }
                }
            } else {
                split.unknown.push(arg);
            }
            continue;
        }

        split.unknown.push(arg);
    }

    split
}
