//! Thin, cancellation-aware façade over the jj CLI.
//!
//! Each operation shells out once, returns stdout, and maps stderr onto a
//! small typed taxonomy. Messages are sanitized at this boundary so an empty
//! commit description fails next to its cause, not inside jj.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum VcsError {
    #[error("not inside a jj repository")]
    NotRepo,
    #[error("vcs command not found: {0}")]
    CommandNotFound(String),
    #[error("empty message rejected")]
    EmptyMessage,
    #[error("vcs command cancelled")]
    Cancelled,
    #[error("vcs command failed: {0}")]
    Command(String),
}

/// Strip NULs and trim surrounding whitespace.
pub fn sanitize_message(message: &str) -> String {
    message.replace('\0', "").trim().to_string()
}

/// Sanitize and reject empty results.
fn validated_message(message: &str) -> Result<String, VcsError> {
    let clean = sanitize_message(message);
    if clean.is_empty() {
        return Err(VcsError::EmptyMessage);
    }
    Ok(clean)
}

/// Map a failed command's stderr onto the error taxonomy.
fn classify_stderr(stderr: &str) -> VcsError {
    let lowered = stderr.to_lowercase();
    if lowered.contains("no jj repo") || lowered.contains("not a valid repository") {
        VcsError::NotRepo
    } else {
        VcsError::Command(stderr.trim().to_string())
    }
}

/// Capability interface over the version-control tool. Implemented by
/// `JjVcs` (real CLI) and `FakeVcs` (tests).
#[async_trait::async_trait]
pub trait Vcs: Send + Sync {
    async fn status(&self, cancel: CancellationToken) -> Result<String, VcsError>;
    /// Start a new change; returns its change id.
    async fn new_change(
        &self,
        description: Option<&str>,
        cancel: CancellationToken,
    ) -> Result<String, VcsError>;
    async fn describe(&self, message: &str, cancel: CancellationToken) -> Result<(), VcsError>;
    /// Diff text of the working-copy change.
    async fn show(&self, cancel: CancellationToken) -> Result<String, VcsError>;
    async fn commit(&self, message: &str, cancel: CancellationToken) -> Result<(), VcsError>;
    async fn log(
        &self,
        revset: Option<&str>,
        template: Option<&str>,
        cancel: CancellationToken,
    ) -> Result<String, VcsError>;
}

/// Real jj invocation in a fixed working directory.
pub struct JjVcs {
    pub bin: PathBuf,
    pub cwd: PathBuf,
}

impl JjVcs {
    pub fn new(cwd: PathBuf) -> Self {
        Self {
            bin: PathBuf::from("jj"),
            cwd,
        }
    }

    /// Check the binary is reachable and the directory is a repository.
    pub async fn verify_repo(&self, cancel: CancellationToken) -> Result<(), VcsError> {
        self.exec(&["status"], cancel).await.map(|_| ())
    }

    async fn exec(&self, args: &[&str], cancel: CancellationToken) -> Result<String, VcsError> {
        let mut cmd = tokio::process::Command::new(&self.bin);
        cmd.args(args)
            .current_dir(&self.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                VcsError::CommandNotFound(self.bin.display().to_string())
            } else {
                VcsError::Command(e.to_string())
            }
        })?;

        tokio::select! {
            output = child.wait_with_output() => {
                let output = output.map_err(|e| VcsError::Command(e.to_string()))?;
                if output.status.success() {
                    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
                } else {
                    Err(classify_stderr(&String::from_utf8_lossy(&output.stderr)))
                }
            }
            // The child future is dropped here; kill_on_drop reaps it.
            _ = cancel.cancelled() => Err(VcsError::Cancelled),
        }
    }
}

#[async_trait::async_trait]
impl Vcs for JjVcs {
    async fn status(&self, cancel: CancellationToken) -> Result<String, VcsError> {
        self.exec(&["status"], cancel).await
    }

    async fn new_change(
        &self,
        description: Option<&str>,
        cancel: CancellationToken,
    ) -> Result<String, VcsError> {
        match description {
            Some(desc) => {
                let message = validated_message(desc)?;
                self.exec(&["new", "-m", &message], cancel.clone()).await?;
            }
            None => {
                self.exec(&["new"], cancel.clone()).await?;
            }
        }
        // jj prints the new change to stderr; ask for the id explicitly.
        let id = self
            .exec(&["log", "-r", "@", "--no-graph", "-T", "change_id"], cancel)
            .await?;
        Ok(id.trim().to_string())
    }

    async fn describe(&self, message: &str, cancel: CancellationToken) -> Result<(), VcsError> {
        let message = validated_message(message)?;
        self.exec(&["describe", "-m", &message], cancel)
            .await
            .map(|_| ())
    }

    async fn show(&self, cancel: CancellationToken) -> Result<String, VcsError> {
        self.exec(&["show"], cancel).await
    }

    async fn commit(&self, message: &str, cancel: CancellationToken) -> Result<(), VcsError> {
        let message = validated_message(message)?;
        self.exec(&["commit", "-m", &message], cancel)
            .await
            .map(|_| ())
    }

    async fn log(
        &self,
        revset: Option<&str>,
        template: Option<&str>,
        cancel: CancellationToken,
    ) -> Result<String, VcsError> {
        let mut args = vec!["log"];
        if let Some(r) = revset {
            args.push("-r");
            args.push(r);
        }
        if let Some(t) = template {
            args.push("--no-graph");
            args.push("-T");
            args.push(t);
        }
        self.exec(&args, cancel).await
    }
}

// ── Recording fake ──

/// In-memory fake recording every call. Commit messages are kept separately
/// so tests can assert on exactly what would have landed in history.
#[derive(Default)]
pub struct FakeVcs {
    calls: Mutex<Vec<String>>,
    commits: Mutex<Vec<String>>,
    diff: Mutex<String>,
    fail_commits: Mutex<bool>,
}

impl FakeVcs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_diff(&self, diff: &str) {
        *self.diff.lock().unwrap() = diff.to_string();
    }

    /// Make every subsequent `commit` fail with a generic error.
    pub fn fail_commits(&self) {
        *self.fail_commits.lock().unwrap() = true;
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn commits(&self) -> Vec<String> {
        self.commits.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait::async_trait]
impl Vcs for FakeVcs {
    async fn status(&self, _cancel: CancellationToken) -> Result<String, VcsError> {
        self.record("status".into());
        Ok("The working copy is clean".into())
    }

    async fn new_change(
        &self,
        description: Option<&str>,
        _cancel: CancellationToken,
    ) -> Result<String, VcsError> {
        if let Some(desc) = description {
            validated_message(desc)?;
        }
        let id = format!("change{}", self.calls.lock().unwrap().len());
        self.record(format!("new_change({})", description.unwrap_or("")));
        Ok(id)
    }

    async fn describe(&self, message: &str, _cancel: CancellationToken) -> Result<(), VcsError> {
        let message = validated_message(message)?;
        self.record(format!("describe({message})"));
        Ok(())
    }

    async fn show(&self, _cancel: CancellationToken) -> Result<String, VcsError> {
        self.record("show".into());
        Ok(self.diff.lock().unwrap().clone())
    }

    async fn commit(&self, message: &str, _cancel: CancellationToken) -> Result<(), VcsError> {
        let message = validated_message(message)?;
        if *self.fail_commits.lock().unwrap() {
            return Err(VcsError::Command("fake commit failure".into()));
        }
        self.record(format!("commit({message})"));
        self.commits.lock().unwrap().push(message);
        Ok(())
    }

    async fn log(
        &self,
        revset: Option<&str>,
        _template: Option<&str>,
        _cancel: CancellationToken,
    ) -> Result<String, VcsError> {
        self.record(format!("log({})", revset.unwrap_or("")));
        Ok(String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_nuls_and_trims() {
        assert_eq!(sanitize_message("  fix\0 things \n"), "fix things");
        assert_eq!(sanitize_message("\0\0"), "");
    }

    #[test]
    fn validated_message_rejects_empty() {
        assert!(matches!(validated_message("ok"), Ok(m) if m == "ok"));
        assert!(matches!(
            validated_message("  \0 "),
            Err(VcsError::EmptyMessage)
        ));
    }

    #[test]
    fn stderr_classification() {
        assert!(matches!(
            classify_stderr("Error: There is no jj repo in \".\""),
            VcsError::NotRepo
        ));
        assert!(matches!(
            classify_stderr("some other failure"),
            VcsError::Command(msg) if msg == "some other failure"
        ));
    }

    #[tokio::test]
    async fn missing_binary_maps_to_command_not_found() {
        let vcs = JjVcs {
            bin: PathBuf::from("ralph-test-no-such-jj"),
            cwd: PathBuf::from("."),
        };
        let err = vcs.status(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, VcsError::CommandNotFound(_)));
    }

    #[tokio::test]
    async fn fake_records_commits() {
        let vcs = FakeVcs::new();
        let cancel = CancellationToken::new();
        vcs.new_change(None, cancel.clone()).await.unwrap();
        vcs.commit("first pass", cancel.clone()).await.unwrap();
        assert_eq!(vcs.commits(), vec!["first pass"]);
        assert!(vcs.calls().iter().any(|c| c.starts_with("new_change")));
    }

    #[tokio::test]
    async fn describe_sanitizes_before_recording() {
        let vcs = FakeVcs::new();
        vcs.describe("  wip\0 change ", CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(vcs.calls(), vec!["describe(wip change)"]);

        let err = vcs
            .describe("\0", CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, VcsError::EmptyMessage));
    }

    #[tokio::test]
    async fn fake_rejects_empty_commit_message() {
        let vcs = FakeVcs::new();
        let err = vcs
            .commit("   ", CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, VcsError::EmptyMessage));
        assert!(vcs.commits().is_empty());
    }

    #[tokio::test]
    async fn fake_commit_failure_is_generic() {
        let vcs = FakeVcs::new();
        vcs.fail_commits();
        let err = vcs
            .commit("msg", CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, VcsError::Command(_)));
        assert!(vcs.commits().is_empty());
    }
}
