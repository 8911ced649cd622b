use std::collections::VecDeque;
use std::io::{self, BufRead, Write};

use dialoguer::Confirm;
use tracing::warn;

use super::store::EntryKind;

/// Which tree a pending deletion applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletionSide {
    /// Push is about to remove entries from the remote folder.
    Remote,
    /// Pull is about to remove entries from the working tree.
    Local,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDeletion {
    /// Path relative to the repository root.
    pub path: String,
    pub kind: EntryKind,
}

#[derive(Debug)]
pub struct DeletionRequest<'a> {
    pub side: DeletionSide,
    pub entries: &'a [PendingDeletion],
}

/// Decides whether a batch of deletions may go ahead.
pub trait ConfirmationGate {
    fn confirm_deletion(&mut self, request: &DeletionRequest<'_>) -> bool;
}

/// Approves everything; used for `--yes`.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysConfirm;

impl ConfirmationGate for AlwaysConfirm {
    fn confirm_deletion(&mut self, _request: &DeletionRequest<'_>) -> bool {
        true
    }
}

/// Lists the pending deletions and asks `y/n` until it gets a valid answer.
/// End of input counts as `n`. Used when stdin is not a terminal.
pub struct InteractivePrompt<R, W> {
    input: R,
    output: W,
}

impl InteractivePrompt<io::StdinLock<'static>, io::Stderr> {
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stderr())
    }
}

impl<R: BufRead, W: Write> InteractivePrompt<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    fn ask(&mut self, request: &DeletionRequest<'_>) -> io::Result<bool> {
        write!(self.output, "{}", describe(request))?;
        loop {
            write!(self.output, "Do you still wish to proceed (y/n)? ")?;
            self.output.flush()?;
            let mut line = String::new();
            if self.input.read_line(&mut line)? == 0 {
                return Ok(false);
            }
            match line.trim() {
                "y" | "Y" | "yes" => return Ok(true),
                "n" | "N" | "no" => return Ok(false),
                _ => writeln!(self.output, "Invalid input")?,
            }
        }
    }
}

impl<R: BufRead, W: Write> ConfirmationGate for InteractivePrompt<R, W> {
    fn confirm_deletion(&mut self, request: &DeletionRequest<'_>) -> bool {
        match self.ask(request) {
            Ok(answer) => answer,
            Err(err) => {
                warn!(error = %err, "confirmation prompt failed; declining");
                false
            }
        }
    }
}

/// Terminal confirmation through `dialoguer`, defaulting to no.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPrompt;

impl ConfirmationGate for TerminalPrompt {
    fn confirm_deletion(&mut self, request: &DeletionRequest<'_>) -> bool {
        eprint!("{}", describe(request));
        match Confirm::new()
            .with_prompt("Do you still wish to proceed?")
            .default(false)
            .interact()
        {
            Ok(answer) => answer,
            Err(err) => {
                warn!(error = %err, "confirmation prompt failed; declining");
                false
            }
        }
    }
}

fn describe(request: &DeletionRequest<'_>) -> String {
    let action = match request.side {
        DeletionSide::Remote => "deleted from the remote folder in order to push",
        DeletionSide::Local => "deleted locally in order to pull",
    };
    let mut text = format!("The following files/folders need to be {action}:\n");
    for entry in request.entries {
        match entry.kind {
            EntryKind::Folder => text.push_str(&format!(" {}/...\n", entry.path)),
            EntryKind::File => text.push_str(&format!(" {}\n", entry.path)),
        }
    }
    text
}

/// Answers from a fixed script and remembers what it was asked.
#[derive(Debug, Default)]
pub struct ScriptedGate {
    answers: VecDeque<bool>,
    fallback: bool,
    asked: Vec<(DeletionSide, Vec<String>)>,
}

impl ScriptedGate {
    pub fn new(answers: impl IntoIterator<Item = bool>, fallback: bool) -> Self {
        Self {
            answers: answers.into_iter().collect(),
            fallback,
            asked: Vec::new(),
        }
    }

    pub fn accepting() -> Self {
        Self::new([], true)
    }

    pub fn declining() -> Self {
        Self::new([], false)
    }

    /// Every request so far, as (side, relative paths).
    pub fn asked(&self) -> &[(DeletionSide, Vec<String>)] {
        &self.asked
    }
}

impl ConfirmationGate for ScriptedGate {
    fn confirm_deletion(&mut self, request: &DeletionRequest<'_>) -> bool {
        self.asked.push((
            request.side,
            request.entries.iter().map(|e| e.path.clone()).collect(),
        ));
        self.answers.pop_front().unwrap_or(self.fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(entries: &[PendingDeletion]) -> DeletionRequest<'_> {
        DeletionRequest {
            side: DeletionSide::Local,
            entries,
        }
    }

    fn pending() -> Vec<PendingDeletion> {
        vec![
            PendingDeletion {
                path: "old.txt".into(),
                kind: EntryKind::File,
            },
            PendingDeletion {
                path: "stale".into(),
                kind: EntryKind::Folder,
            },
        ]
    }

    #[test]
    fn prompt_reasks_until_valid_answer() {
        let entries = pending();
        let mut out = Vec::new();
        let mut prompt = InteractivePrompt::new(&b"maybe\ny\n"[..], &mut out);
        assert!(prompt.confirm_deletion(&request(&entries)));
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains(" old.txt\n"));
        assert!(text.contains(" stale/...\n"));
        assert!(text.contains("Invalid input"));
    }

    #[test]
    fn prompt_declines_on_no_and_on_eof() {
        let entries = pending();
        let mut prompt = InteractivePrompt::new(&b"n\n"[..], Vec::new());
        assert!(!prompt.confirm_deletion(&request(&entries)));
        let mut prompt = InteractivePrompt::new(&b""[..], Vec::new());
        assert!(!prompt.confirm_deletion(&request(&entries)));
    }

    #[test]
    fn description_names_the_side() {
        let entries = pending();
        let remote = DeletionRequest {
            side: DeletionSide::Remote,
            entries: &entries,
        };
        assert!(describe(&remote).starts_with(
            "The following files/folders need to be deleted from the remote folder"
        ));
        assert!(describe(&request(&entries)).contains("deleted locally in order to pull"));
    }

    #[test]
    fn scripted_gate_records_requests() {
        let entries = pending();
        let mut gate = ScriptedGate::new([false], true);
        assert!(!gate.confirm_deletion(&request(&entries)));
        assert!(gate.confirm_deletion(&request(&entries)));
        assert_eq!(gate.asked().len(), 2);
        assert_eq!(gate.asked()[0].1, vec!["old.txt", "stale"]);
    }
}
