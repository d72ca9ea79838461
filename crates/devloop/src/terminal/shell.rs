//! Long-lived shell processes with sentinel-delimited command output

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Builds the command that starts a shell reading commands from stdin
pub trait ShellLauncher: Send + Sync {
    /// Short description for logs and the session listing
    fn describe(&self) -> String;

    fn command(&self) -> Command;
}

/// Local `bash` rooted at the workspace
#[derive(Debug, Clone)]
pub struct LocalShell {
    pub shell: String,
    pub working_dir: PathBuf,
}

impl ShellLauncher for LocalShell {
    fn describe(&self) -> String {
        format!("local {} in {}", self.shell, self.working_dir.display())
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.shell);
        cmd.args(["--noprofile", "--norc", "-s"])
            .current_dir(&self.working_dir);
        cmd
    }
}

/// Shell inside a running container via `docker exec -i`
#[derive(Debug, Clone)]
pub struct DockerShell {
    pub container: String,
    pub shell: String,
    pub working_dir: Option<String>,
}

impl DockerShell {
    /// Fail early when the docker CLI is missing
    pub fn check_available() -> Result<()> {
        which::which("docker").context("docker executable not found in PATH")?;
        Ok(())
    }
}

impl ShellLauncher for DockerShell {
    fn describe(&self) -> String {
        format!("{} in container {}", self.shell, self.container)
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new("docker");
        cmd.arg("exec").arg("-i");
        if let Some(ref dir) = self.working_dir {
            cmd.arg("-w").arg(dir);
        }
        cmd.arg(&self.container)
            .arg(&self.shell)
            .args(["--noprofile", "--norc", "-s"]);
        cmd
    }
}

/// How a command run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    /// Sentinel seen; exit code is known
    Completed,
    TimedOut,
    Cancelled,
    /// The shell exited before the command finished
    ShellExited,
}

/// Output of one command
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub output: String,
    pub exit_code: Option<i32>,
    pub status: CommandStatus,
}

/// A running shell child with piped stdin/stdout
pub struct ShellProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    marker: String,
}

impl ShellProcess {
    pub async fn spawn(launcher: &dyn ShellLauncher) -> Result<Self> {
        let mut cmd = launcher.command();
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to start {}", launcher.describe()))?;

        let stdin = child.stdin.take().context("shell stdin not captured")?;
        let stdout = child.stdout.take().context("shell stdout not captured")?;

        let mut process = Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            marker: format!("__DEVLOOP_DONE_{}__", uuid::Uuid::new_v4().simple()),
        };

        // Merge stderr into stdout for everything that follows
        process.write("exec 2>&1\n").await?;
        debug!(shell = %launcher.describe(), "Shell started");
        Ok(process)
    }

    /// Run one command to completion, timeout or cancellation.
    ///
    /// After a timeout, a cancellation or a shell exit the process is no
    /// longer usable.
    pub async fn run(
        &mut self,
        command: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<RunOutput> {
        if command.contains(&self.marker) {
            bail!("command contains the session sentinel");
        }

        // The command reaches the shell as quoted heredoc text and is parsed
        // by eval, so unbalanced quotes or an open heredoc fail the command
        // instead of swallowing the sentinel
        let script = format!(
            "{{ eval \"$(cat <<'{marker}_CMD'\n{command}\n{marker}_CMD\n)\"; }} < /dev/null\n\
             printf '\\n{marker}%d\\n' \"$?\"\n",
            marker = self.marker,
            command = command,
        );
        self.write(&script).await?;

        let mut collected = String::new();
        let status = tokio::select! {
            _ = cancel.cancelled() => Err(CommandStatus::Cancelled),
            _ = tokio::time::sleep(timeout) => Err(CommandStatus::TimedOut),
            result = read_until_marker(&mut self.stdout, &self.marker, &mut collected) => {
                result.map_err(|_| CommandStatus::ShellExited)
            }
        };

        match status {
            Ok(Some(code)) => Ok(RunOutput {
                output: strip_sentinel_newline(collected),
                exit_code: Some(code),
                status: CommandStatus::Completed,
            }),
            Ok(None) | Err(CommandStatus::ShellExited) => Ok(RunOutput {
                output: collected,
                exit_code: None,
                status: CommandStatus::ShellExited,
            }),
            Err(status) => {
                self.kill().await;
                Ok(RunOutput {
                    output: collected,
                    exit_code: None,
                    status,
                })
            }
        }
    }

    pub async fn kill(&mut self) {
        if let Err(e) = self.child.kill().await {
            debug!(error = %e, "Shell already gone");
        }
    }

    async fn write(&mut self, text: &str) -> Result<()> {
        self.stdin
            .write_all(text.as_bytes())
            .await
            .context("Failed to write to shell")?;
        self.stdin.flush().await.context("Failed to flush shell stdin")
    }
}

/// Read lines into `out` until the sentinel line arrives.
///
/// Returns the exit code carried by the sentinel, or `None` on EOF.
async fn read_until_marker(
    reader: &mut BufReader<ChildStdout>,
    marker: &str,
    out: &mut String,
) -> std::io::Result<Option<i32>> {
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            return Ok(None);
        }
        let text = String::from_utf8_lossy(&line);
        if let Some(pos) = text.find(marker) {
            out.push_str(&text[..pos]);
            let code = text[pos + marker.len()..].trim().parse().unwrap_or(-1);
            return Ok(Some(code));
        }
        out.push_str(&text);
    }
}

/// The sentinel is printed after a newline; drop that newline again
fn strip_sentinel_newline(mut output: String) -> String {
    if output.ends_with('\n') {
        output.pop();
    }
    output
}
