use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use yadisk_repo::commands::{Invocation, Status};
use yadisk_repo::config::AppConfig;

#[derive(Debug, Parser)]
#[command(
    name = "ydrepo",
    version,
    about = "Push and pull a local directory against a Yandex Disk folder"
)]
struct Cli {
    /// Delete without asking for confirmation
    #[arg(short = 'y', long = "yes", global = true)]
    yes: bool,

    /// Verbose logging (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, PartialEq, Eq, Subcommand)]
enum Command {
    /// Clone a remote folder into a new directory named after it
    Clone {
        /// Logical remote path; the Disk root when omitted
        #[arg(default_value = "/")]
        path: String,
    },
    /// Upload local changes and remove remote entries deleted locally
    Push {
        /// Repository directory; the current directory when omitted
        dir: Option<PathBuf>,
    },
    /// Download remote changes and remove local entries deleted remotely
    Pull {
        /// Repository directory; the current directory when omitted
        dir: Option<PathBuf>,
    },
    /// Create a remote folder and bind the current directory to it
    Init {
        /// Logical remote path of the new folder
        path: String,
    },
    /// List folders under a remote path
    List {
        #[arg(default_value = "/")]
        path: String,
    },
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<Status> {
    let invocation = Invocation::new(AppConfig::from_env(), cli.yes);
    let cwd = std::env::current_dir().context("current directory is unavailable")?;
    match cli.command {
        Command::Clone { path } => invocation.clone_repo(&cwd, &path).await,
        Command::Push { dir } => invocation.push(&dir.unwrap_or(cwd)).await,
        Command::Pull { dir } => invocation.pull(&dir.unwrap_or(cwd)).await,
        Command::Init { path } => invocation.init(&cwd, &path).await,
        Command::List { path } => invocation.list(&path).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match run(cli).await {
        Ok(status) => status.into(),
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn clone_defaults_to_root() {
        let cli = parse(&["ydrepo", "clone"]);
        assert_eq!(cli.command, Command::Clone { path: "/".into() });
    }

    #[test]
    fn push_and_pull_take_optional_directory() {
        assert_eq!(parse(&["ydrepo", "push"]).command, Command::Push { dir: None });
        assert_eq!(
            parse(&["ydrepo", "pull", "work"]).command,
            Command::Pull {
                dir: Some(PathBuf::from("work"))
            }
        );
    }

    #[test]
    fn init_requires_a_path() {
        assert!(Cli::try_parse_from(["ydrepo", "init"]).is_err());
        assert_eq!(
            parse(&["ydrepo", "init", "Projects/new"]).command,
            Command::Init {
                path: "Projects/new".into()
            }
        );
    }

    #[test]
    fn global_flags_parse_after_subcommand() {
        let cli = parse(&["ydrepo", "push", "-y", "-vv"]);
        assert!(cli.yes);
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn unknown_command_is_rejected() {
        assert!(Cli::try_parse_from(["ydrepo", "sync"]).is_err());
    }
}
