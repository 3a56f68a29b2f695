//! Git operations through the `git` executable

use crate::config::schema::FetchConfig;
use crate::error::{HermitError, HermitResult};
use std::ffi::OsString;
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Thin wrapper over the `git` command line.
///
/// Every command is bounded by `timeout`. Network steps that fail for a
/// transient reason are retried up to `max_tries` times.
#[derive(Debug, Clone)]
pub struct GitClient {
    program: String,
    timeout: Duration,
    max_tries: u32,
    backoff: Duration,
}

impl Default for GitClient {
    fn default() -> Self {
        Self::new()
    }
}

impl GitClient {
    pub fn new() -> Self {
        Self::with_program("git")
    }

    /// Use a different executable, for tests
    pub fn with_program(program: impl Into<String>) -> Self {
        let defaults = FetchConfig::default();
        Self {
            program: program.into(),
            timeout: defaults.requests_timeout(),
            max_tries: defaults.download_max_tries,
            backoff: defaults.retry_backoff(),
        }
    }

    /// Take the timeout and retry policy from the fetch settings
    pub fn with_fetch_config(mut self, config: &FetchConfig) -> Self {
        self.timeout = config.requests_timeout();
        self.max_tries = config.download_max_tries.max(1);
        self.backoff = config.retry_backoff();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, max_tries: u32, backoff: Duration) -> Self {
        self.max_tries = max_tries.max(1);
        self.backoff = backoff;
        self
    }

    /// Fetch exactly `revision` from `url` and write it to `dest` as a tarball
    /// with a `package/` prefix. `work` is a scratch directory that is removed
    /// afterwards.
    pub async fn archive_revision(
        &self,
        url: &str,
        revision: &str,
        dest: &Path,
        work: &Path,
    ) -> HermitResult<()> {
        validate_revision(revision)?;
        let result = self.archive_in(url, revision, dest, work).await;
        if let Err(e) = tokio::fs::remove_dir_all(work).await {
            debug!("Failed to clean up {}: {}", work.display(), e);
        }
        result
    }

    async fn archive_in(
        &self,
        url: &str,
        revision: &str,
        dest: &Path,
        work: &Path,
    ) -> HermitResult<()> {
        self.run(None, &["init", "--quiet", "--bare"], Some(work)).await?;
        self.fetch_with_retries(work, url, revision).await?;

        let fetched = self
            .run(Some(work), &["rev-parse", "--verify", "FETCH_HEAD^{commit}"], None)
            .await?;
        if !fetched.trim().eq_ignore_ascii_case(revision) {
            return Err(HermitError::GitInvalidRevision(format!(
                "{} resolved to {} instead of the pinned commit",
                revision,
                fetched.trim()
            )));
        }

        let mut args: Vec<OsString> = ["archive", "--format=tar.gz", "--prefix=package/", "--output"]
            .iter()
            .map(OsString::from)
            .collect();
        args.push(dest.as_os_str().to_os_string());
        args.push(OsString::from("FETCH_HEAD"));
        self.run_os(Some(work), &args).await?;
        Ok(())
    }

    async fn fetch_with_retries(&self, work: &Path, url: &str, revision: &str) -> HermitResult<()> {
        let args = ["fetch", "--quiet", "--depth", "1", url, revision];
        let mut attempt = 1;
        loop {
            match self.run(Some(work), &args, None).await {
                Ok(_) => return Ok(()),
                Err(e) if e.is_retryable() && attempt < self.max_tries => {
                    warn!(
                        "Attempt {}/{} to fetch {} from {} failed: {}",
                        attempt, self.max_tries, revision, url, e
                    );
                    tokio::time::sleep(self.backoff * attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn run(&self, cwd: Option<&Path>, args: &[&str], target: Option<&Path>) -> HermitResult<String> {
        let mut os_args: Vec<OsString> = args.iter().map(OsString::from).collect();
        if let Some(target) = target {
            os_args.push(target.as_os_str().to_os_string());
        }
        self.run_os(cwd, &os_args).await
    }

    async fn run_os(&self, cwd: Option<&Path>, args: &[OsString]) -> HermitResult<String> {
        let command_line = format!(
            "{} {}",
            self.program,
            args.iter()
                .map(|a| a.to_string_lossy())
                .collect::<Vec<_>>()
                .join(" ")
        );
        debug!("Running: {}", command_line);

        let mut cmd = Command::new(&self.program);
        if let Some(cwd) = cwd {
            cmd.arg("-C").arg(cwd);
        }
        cmd.args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .kill_on_drop(true);
        // The child is killed when the timed-out future is dropped
        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(output) => output.map_err(|e| HermitError::command_failed(command_line.clone(), e))?,
            Err(_) => {
                return Err(HermitError::fetch(
                    command_line,
                    format!("timed out after {}s", self.timeout.as_secs_f32()),
                ))
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(classify_failure(&command_line, cwd, &stderr));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// A pinned revision must be a full commit id
pub fn validate_revision(revision: &str) -> HermitResult<()> {
    if revision.len() == 40 && revision.chars().all(|c| c.is_ascii_hexdigit()) {
        Ok(())
    } else {
        Err(HermitError::GitInvalidRevision(format!(
            "{:?} is not a full 40-character commit id",
            revision
        )))
    }
}

/// stderr fragments of network failures worth another attempt
const TRANSIENT_FAILURES: &[&str] = &[
    "timed out",
    "connection reset",
    "connection refused",
    "early eof",
    "remote end hung up",
    "rpc failed",
    "unable to access",
];

fn classify_failure(command: &str, cwd: Option<&Path>, stderr: &str) -> HermitError {
    let lower = stderr.to_lowercase();
    if lower.contains("not a git repository") {
        return HermitError::NotAGitRepo(cwd.map(Path::to_path_buf).unwrap_or_default());
    }
    if lower.contains("does not appear to be a git repository")
        || lower.contains("repository not found")
        || lower.contains("could not read from remote")
        || lower.contains("could not resolve host")
    {
        return HermitError::GitRemoteNotFound(stderr.to_string());
    }
    if lower.contains("couldn't find remote ref")
        || lower.contains("unknown revision")
        || lower.contains("not our ref")
        || lower.contains("bad object")
    {
        return HermitError::GitInvalidRevision(stderr.to_string());
    }
    if TRANSIENT_FAILURES.iter().any(|t| lower.contains(t)) {
        return HermitError::fetch(command, stderr);
    }
    HermitError::Git {
        command: command.to_string(),
        stderr: stderr.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::TempDir;

    #[test]
    fn revision_must_be_full_sha() {
        assert!(validate_revision("0123456789abcdef0123456789abcdef01234567").is_ok());
        assert_eq!(
            validate_revision("main").unwrap_err().kind(),
            ErrorKind::GitInvalidRevision
        );
    }

    #[test]
    fn failures_are_classified() {
        let remote = classify_failure(
            "git fetch",
            None,
            "fatal: repository 'https://example.com/x.git/' not found\nfatal: Could not read from remote repository.",
        );
        assert_eq!(remote.kind(), ErrorKind::GitRemoteNotFound);

        let rev = classify_failure("git fetch", None, "fatal: couldn't find remote ref deadbeef");
        assert_eq!(rev.kind(), ErrorKind::GitInvalidRevision);

        let repo = classify_failure(
            "git rev-parse",
            Some(Path::new("/tmp/x")),
            "fatal: not a git repository (or any of the parent directories): .git",
        );
        assert_eq!(repo.kind(), ErrorKind::NotAGitRepo);

        let other = classify_failure("git archive", None, "fatal: something else");
        assert_eq!(other.kind(), ErrorKind::GitError);

        let transient = classify_failure(
            "git fetch",
            None,
            "error: RPC failed; curl 56 Recv failure: Connection reset by peer",
        );
        assert!(transient.is_retryable());
    }

    /// A fake git whose `fetch` never finishes. Each call is appended to `log`.
    #[cfg(unix)]
    fn hanging_git(dir: &Path, log: &Path) -> String {
        use std::os::unix::fs::PermissionsExt;
        let script = dir.join("git");
        std::fs::write(
            &script,
            format!(
                "#!/bin/sh\necho \"$*\" >> '{}'\ncase \" $* \" in *\" fetch \"*) exec sleep 30;; esac\nexit 0\n",
                log.display()
            ),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script.to_string_lossy().into_owned()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stalled_fetch_times_out_and_is_retried() {
        let temp = TempDir::new().unwrap();
        let log = temp.path().join("calls.log");
        let client = GitClient::with_program(hanging_git(temp.path(), &log))
            .with_timeout(Duration::from_millis(300))
            .with_retries(2, Duration::from_millis(10));

        let result = tokio::time::timeout(
            Duration::from_secs(20),
            client.archive_revision(
                "https://example.com/repo.git",
                "0123456789abcdef0123456789abcdef01234567",
                &temp.path().join("out.tgz"),
                &temp.path().join("work"),
            ),
        )
        .await
        .expect("git call must not hang");

        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FetchError);
        assert!(err.to_string().contains("timed out"));
        let calls = std::fs::read_to_string(&log).unwrap();
        assert_eq!(calls.lines().filter(|l| l.contains(" fetch ")).count(), 2);
    }

    #[tokio::test]
    async fn missing_executable_is_reported() {
        let temp = TempDir::new().unwrap();
        let client = GitClient::with_program("hermit-test-no-such-git");
        let err = client
            .archive_revision(
                "https://example.com/repo.git",
                "0123456789abcdef0123456789abcdef01234567",
                &temp.path().join("out.tgz"),
                &temp.path().join("work"),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExecutableNotFound);
    }
}
