use std::io::{IsTerminal, Write};
use std::path::Path;
use std::process::ExitCode;

use anyhow::Context;
use tracing::debug;
use yadisk_core::YadiskClient;

use crate::config::AppConfig;
use crate::repository::{RepoError, Repository, RepositoryConfig};
use crate::sync::disk_store::DiskStore;
use crate::sync::gate::{AlwaysConfirm, ConfirmationGate, InteractivePrompt, TerminalPrompt};
use crate::sync::report::{ConsoleReporter, DeletionPolicy, SyncOutcome, SyncReporter};
use crate::sync::resolver::PathResolver;
use crate::sync::store::{KindFilter, RemoteStore};

/// How a command ended, as seen by the shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    /// Deletion declined, or the command refused to overwrite a binding.
    Refused,
    /// No repository, a corrupt one, or a remote path that does not exist.
    NotFound,
    Offline,
}

impl Status {
    pub fn code(self) -> u8 {
        match self {
            Status::Success => 0,
            Status::Refused => 1,
            Status::NotFound => 2,
            Status::Offline => 3,
        }
    }
}

impl From<Status> for ExitCode {
    fn from(status: Status) -> Self {
        ExitCode::from(status.code())
    }
}

/// Per-run settings shared by every command.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub config: AppConfig,
    pub assume_yes: bool,
}

impl Invocation {
    pub fn new(config: AppConfig, assume_yes: bool) -> Self {
        Self { config, assume_yes }
    }

    pub fn deletion(&self) -> DeletionPolicy {
        if self.assume_yes || self.config.assume_yes {
            DeletionPolicy::Force
        } else {
            DeletionPolicy::Ask
        }
    }

    fn gate(&self) -> Box<dyn ConfirmationGate> {
        match self.deletion() {
            DeletionPolicy::Force => Box::new(AlwaysConfirm),
            DeletionPolicy::Ask if std::io::stdin().is_terminal() => Box::new(TerminalPrompt),
            DeletionPolicy::Ask => Box::new(InteractivePrompt::stdio()),
        }
    }

    /// Builds the Disk store and probes the API once. `Err(Status::Offline)`
    /// when the service cannot be reached.
    pub async fn connect(&self) -> anyhow::Result<Result<DiskStore, Status>> {
        let token = AppConfig::token()?;
        let client = YadiskClient::with_base_url(&self.config.api_url, token)
            .context("invalid YADISK_API_URL")?;
        match client.disk_info().await {
            Ok(info) => debug!(used = info.used_space, total = info.total_space, "connected"),
            Err(err) if err.is_connectivity() => {
                eprintln!("Error: couldn't connect to Yandex Disk ({err})");
                return Ok(Err(Status::Offline));
            }
            Err(err) => return Err(err).context("failed to query Yandex Disk"),
        }
        Ok(Ok(DiskStore::new(client)
            .with_page_size(self.config.page_size)
            .with_permanent_delete(self.config.delete_permanently)))
    }

    pub async fn clone_repo(&self, container: &Path, logical_path: &str) -> anyhow::Result<Status> {
        let store = match self.connect().await? {
            Ok(store) => store,
            Err(status) => return Ok(status),
        };
        let mut gate = self.gate();
        clone_with(
            store,
            container,
            logical_path,
            self.deletion(),
            gate.as_mut(),
            &mut ConsoleReporter::new(),
        )
        .await
    }

    pub async fn push(&self, dir: &Path) -> anyhow::Result<Status> {
        if let Some(status) = require_marker(dir).await? {
            return Ok(status);
        }
        let store = match self.connect().await? {
            Ok(store) => store,
            Err(status) => return Ok(status),
        };
        let mut gate = self.gate();
        push_with(
            store,
            dir,
            self.deletion(),
            gate.as_mut(),
            &mut ConsoleReporter::new(),
        )
        .await
    }

    pub async fn pull(&self, dir: &Path) -> anyhow::Result<Status> {
        if let Some(status) = require_marker(dir).await? {
            return Ok(status);
        }
        let store = match self.connect().await? {
            Ok(store) => store,
            Err(status) => return Ok(status),
        };
        let mut gate = self.gate();
        pull_with(
            store,
            dir,
            self.deletion(),
            gate.as_mut(),
            &mut ConsoleReporter::new(),
        )
        .await
    }

    pub async fn init(&self, dir: &Path, logical_path: &str) -> anyhow::Result<Status> {
        let store = match self.connect().await? {
            Ok(store) => store,
            Err(status) => return Ok(status),
        };
        init_with(store, dir, logical_path).await
    }

    pub async fn list(&self, logical_path: &str) -> anyhow::Result<Status> {
        let store = match self.connect().await? {
            Ok(store) => store,
            Err(status) => return Ok(status),
        };
        list_with(&store, logical_path, &mut std::io::stdout().lock()).await
    }
}

/// `Some(status)` when `dir` is not a repository; checked before connecting.
async fn require_marker(dir: &Path) -> anyhow::Result<Option<Status>> {
    match RepositoryConfig::load(dir).await {
        Ok(Some(_)) => Ok(None),
        Ok(None) => {
            eprintln!("Error: no repository found in {}", dir.display());
            Ok(Some(Status::NotFound))
        }
        Err(err) => refusal(err).map(Some),
    }
}

/// Maps the expected failures to a status after telling the user;
/// anything else propagates.
fn refusal(err: RepoError) -> anyhow::Result<Status> {
    let status = if matches!(err, RepoError::Conflict(_) | RepoError::AlreadyExists(_)) {
        Status::Refused
    } else if matches!(err, RepoError::Corrupt { .. } | RepoError::Json { .. }) {
        Status::NotFound
    } else if err.is_connectivity() {
        Status::Offline
    } else {
        return Err(err.into());
    };
    eprintln!("Error: {err}");
    Ok(status)
}

fn missing_remote_message(path: &str) -> String {
    format!("remote path {path} was not found; run `init {path}` to create it")
}

fn finish(verb: &str, outcome: &SyncOutcome) -> Status {
    let report = outcome.report();
    if outcome.is_aborted() {
        println!("Aborted: deletions were declined.");
        return Status::Refused;
    }
    println!(
        "{verb} complete: {} new, {} updated, {} downloaded, {} folders created, {} deleted, {} unchanged.",
        report.created_files,
        report.updated,
        report.downloaded,
        report.created_folders,
        report.deleted,
        report.skipped,
    );
    if !report.failures.is_empty() {
        eprintln!("{} entries failed; see messages above.", report.failures.len());
    }
    Status::Success
}

pub async fn clone_with<S: RemoteStore>(
    store: S,
    container: &Path,
    logical_path: &str,
    deletion: DeletionPolicy,
    gate: &mut dyn ConfirmationGate,
    reporter: &mut dyn SyncReporter,
) -> anyhow::Result<Status> {
    let mut repo = match Repository::clone_into(store, container, logical_path).await {
        Ok(repo) => repo,
        Err(err) => return refusal(err),
    };
    if repo.is_corrupt() {
        eprintln!("Error: {}", missing_remote_message(&repo.config().path));
        return Ok(Status::NotFound);
    }
    println!("Cloning into {}", repo.root().display());
    match repo.pull(deletion, gate, reporter).await {
        Ok(outcome) => Ok(finish("Clone", &outcome)),
        Err(err) => refusal(err),
    }
}

pub async fn push_with<S: RemoteStore>(
    store: S,
    dir: &Path,
    deletion: DeletionPolicy,
    gate: &mut dyn ConfirmationGate,
    reporter: &mut dyn SyncReporter,
) -> anyhow::Result<Status> {
    let mut repo = match Repository::open(store, dir).await {
        Ok(Some(repo)) => repo,
        Ok(None) => {
            eprintln!("Error: no repository found in {}", dir.display());
            return Ok(Status::NotFound);
        }
        Err(err) => return refusal(err),
    };
    match repo.push(deletion, gate, reporter).await {
        Ok(outcome) => Ok(finish("Push", &outcome)),
        Err(err) => refusal(err),
    }
}

pub async fn pull_with<S: RemoteStore>(
    store: S,
    dir: &Path,
    deletion: DeletionPolicy,
    gate: &mut dyn ConfirmationGate,
    reporter: &mut dyn SyncReporter,
) -> anyhow::Result<Status> {
    let mut repo = match Repository::open(store, dir).await {
        Ok(Some(repo)) => repo,
        Ok(None) => {
            eprintln!("Error: no repository found in {}", dir.display());
            return Ok(Status::NotFound);
        }
        Err(err) => return refusal(err),
    };
    match repo.pull(deletion, gate, reporter).await {
        Ok(outcome) => Ok(finish("Pull", &outcome)),
        Err(err) => refusal(err),
    }
}

pub async fn init_with<S: RemoteStore>(
    store: S,
    dir: &Path,
    logical_path: &str,
) -> anyhow::Result<Status> {
    match Repository::init(store, dir, logical_path).await {
        Ok(repo) => {
            println!(
                "Initialised repository {} ({}) in {}",
                repo.name(),
                repo.config().path,
                dir.display()
            );
            Ok(Status::Success)
        }
        Err(err) => refusal(err),
    }
}

/// Writes the sorted names of the folders under `logical_path`.
pub async fn list_with<S: RemoteStore>(
    store: &S,
    logical_path: &str,
    out: &mut dyn Write,
) -> anyhow::Result<Status> {
    let folder = match PathResolver::new(store).resolve(logical_path).await {
        Ok(Some(folder)) => folder,
        Ok(None) => {
            eprintln!("Error: remote path {logical_path} was not found");
            return Ok(Status::NotFound);
        }
        Err(err) => return refusal(err.into()),
    };
    let children = match store.list_children(&folder, KindFilter::Folders).await {
        Ok(children) => children,
        Err(err) => return refusal(err.into()),
    };
    let mut names: Vec<String> = children.into_iter().map(|entry| entry.name).collect();
    names.sort();
    for name in names {
        writeln!(out, "{name}")?;
    }
    Ok(Status::Success)
}
