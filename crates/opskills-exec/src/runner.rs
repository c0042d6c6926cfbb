//! Script runner.
//!
//! Runs a single `bash` script with captured output and a hard timeout.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

use crate::ExecError;

/// Default timeout (30 minutes).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Captured output of a finished script.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOutput {
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
    /// Exit code (-1 when terminated by a signal)
    pub exit_code: i32,
}

impl RunOutput {
    /// Whether the script exited with status zero.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs bash scripts with a wall-clock limit.
#[derive(Debug, Clone)]
pub struct ScriptRunner {
    timeout: Duration,
}

impl Default for ScriptRunner {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl ScriptRunner {
    /// Create a runner with the given timeout.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// The configured timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `script` with `args` and extra environment variables.
    ///
    /// The working directory is the script's own directory and stdin is
    /// closed. A non-zero exit is a normal [`RunOutput`]; only spawn
    /// failures and timeouts are errors. On timeout the script's whole
    /// process group is killed.
    pub async fn run(
        &self,
        script: &Path,
        args: &[String],
        env: &[(String, String)],
    ) -> Result<RunOutput, ExecError> {
        if !script.is_file() {
            return Err(ExecError::ScriptNotFound(script.to_path_buf()));
        }
        // bash resolves the path after the chdir below
        let script = tokio::fs::canonicalize(script)
            .await
            .map_err(|_| ExecError::ScriptNotFound(script.to_path_buf()))?;
        let script = script.as_path();

        let mut command = Command::new("bash");
        command
            .arg(script)
            .args(args)
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = script.parent().filter(|d| !d.as_os_str().is_empty()) {
            command.current_dir(dir);
        }

        // Own process group so a timeout also reaches the script's children
        #[cfg(unix)]
        command.process_group(0);

        let deadline = Instant::now() + self.timeout;
        let mut child = command.spawn().map_err(ExecError::Spawn)?;
        debug!(script = %script.display(), pid = ?child.id(), "Started script");

        let stdout_task = spawn_reader(child.stdout.take());
        let stderr_task = spawn_reader(child.stderr.take());

        let status = match timeout_at(deadline, child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                warn!(
                    script = %script.display(),
                    timeout_secs = self.timeout.as_secs(),
                    "Script timed out, killing process group"
                );
                kill_tree(&mut child).await;
                stdout_task.abort();
                stderr_task.abort();
                return Err(ExecError::Timeout(self.timeout));
            }
        };

        // A background grandchild may still hold the pipes open
        let stdout = collect(stdout_task, deadline).await;
        let stderr = collect(stderr_task, deadline).await;

        let exit_code = status.code().unwrap_or(-1);
        debug!(script = %script.display(), exit_code, "Script finished");

        Ok(RunOutput {
            stdout,
            stderr,
            exit_code,
        })
    }
}

fn spawn_reader<R>(stream: Option<R>) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut stream) = stream {
            if let Err(e) = stream.read_to_end(&mut buf).await {
                debug!(error = %e, "Error reading script output");
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

async fn collect(mut task: JoinHandle<String>, deadline: Instant) -> String {
    match timeout_at(deadline, &mut task).await {
        Ok(Ok(output)) => output,
        Ok(Err(_)) => String::new(),
        Err(_) => {
            task.abort();
            String::new()
        }
    }
}

async fn kill_tree(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = child.id() {
            if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
                debug!(pid, error = %e, "killpg failed");
            }
        }
    }

    if let Err(e) = child.kill().await {
        debug!(error = %e, "Failed to kill script");
    }
}
