use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Environment handed to backend processes so model libraries never reach
/// the network. Applied per child, the gateway's own environment is untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct OfflineEnv {
    vars: Vec<(String, String)>,
}

impl OfflineEnv {
    pub fn new(hf_home: &Path) -> Self {
        let mut vars: Vec<(String, String)> = [
            ("HF_HUB_OFFLINE", "1"),
            ("TRANSFORMERS_OFFLINE", "1"),
            ("DIFFUSERS_OFFLINE", "1"),
            ("HF_DATASETS_OFFLINE", "1"),
            ("NO_PROXY", "127.0.0.1,localhost"),
            ("no_proxy", "127.0.0.1,localhost"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        vars.push(("HF_HOME".to_string(), hf_home.display().to_string()));
        Self { vars }
    }

    pub fn vars(&self) -> &[(String, String)] {
        &self.vars
    }

    fn apply(&self, cmd: &mut Command) {
        for (key, value) in &self.vars {
            cmd.env(key, value);
        }
    }
}

/// Captured result of a finished child process.
#[derive(Debug)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Run `program` to completion, killing it if it outlives `timeout`.
///
/// The child is also killed when the returned future is dropped, which is how
/// a worker's own handler timeout reaches the process.
pub async fn run_with_timeout<I, S>(
    program: &Path,
    args: I,
    env: &OfflineEnv,
    cwd: Option<&Path>,
    timeout: Duration,
) -> Result<CommandOutput, ProcessError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    env.apply(&mut cmd);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    let child = cmd.spawn().map_err(ProcessError::Spawn)?;
    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| ProcessError::TimedOut(timeout))?
        .map_err(ProcessError::Io)?;

    Ok(CommandOutput {
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("failed to start process: {0}")]
    Spawn(std::io::Error),

    #[error("process killed after {0:?} timeout")]
    TimedOut(Duration),

    #[error("process I/O failed: {0}")]
    Io(std::io::Error),
}
