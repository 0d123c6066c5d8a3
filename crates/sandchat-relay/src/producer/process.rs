//! Child-process producers.
//!
//! Spawns one process per request with the input text as its final argv
//! element, and relays stdout line by line as it arrives. Two flavours are
//! configured from settings: the command-line AI tool for chat, and the
//! shell for the sandbox endpoint.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};

use sandchat_core::config::{ChatConfig, ShellConfig};
use sandchat_core::event::MAX_ERROR_DETAIL;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use super::{Fragment, FragmentStream, Producer, ProducerError, ProducerInput};

type FragmentTx = mpsc::Sender<Result<Fragment, ProducerError>>;

/// Account a child process runs as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    pub home: PathBuf,
}

impl Identity {
    /// Look up a local account by name.
    pub fn lookup(name: &str) -> Result<Self, ProducerError> {
        let user = nix::unistd::User::from_name(name)
            .map_err(|e| ProducerError::Config(format!("failed to look up user {name}: {e}")))?
            .ok_or_else(|| ProducerError::Config(format!("user {name} does not exist")))?;
        Ok(Self {
            name: user.name,
            uid: user.uid.as_raw(),
            gid: user.gid.as_raw(),
            home: user.dir,
        })
    }
}

/// How to launch a producer process.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub program: PathBuf,
    /// Arguments placed before the input text.
    pub args: Vec<String>,
    pub working_directory: Option<PathBuf>,
    /// Start from an empty environment instead of inheriting ours.
    pub clear_env: bool,
    pub env: Vec<(String, String)>,
    pub identity: Option<Identity>,
    /// Relay stderr lines alongside stdout.
    pub merge_stderr: bool,
}

impl ProcessSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_directory: None,
            clear_env: false,
            env: Vec::new(),
            identity: None,
            merge_stderr: false,
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    fn command(&self, input: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(input)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_directory {
            cmd.current_dir(dir);
        }
        if self.clear_env {
            cmd.env_clear();
        }
        cmd.envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        #[cfg(unix)]
        if let Some(identity) = &self.identity {
            cmd.uid(identity.uid).gid(identity.gid);
        }
        cmd
    }
}

/// Producer backed by a child process.
#[derive(Debug, Clone)]
pub struct ProcessProducer {
    name: &'static str,
    spec: ProcessSpec,
}

impl ProcessProducer {
    pub const fn new(name: &'static str, spec: ProcessSpec) -> Self {
        Self { name, spec }
    }

    /// The command-line AI tool, given the flattened prompt as its last
    /// argument. The API key is passed through the environment.
    pub fn cli(config: &ChatConfig, api_key: Option<String>) -> Self {
        let mut spec = ProcessSpec::new(&config.cli_bin);
        spec.args.clone_from(&config.cli_args);
        if let Some(key) = api_key {
            spec = spec.env("ANTHROPIC_API_KEY", key);
        }
        Self::new("cli", spec)
    }

    /// `<program> -c <command>` in a fixed directory with a minimal
    /// environment. The API key is never exposed to shell commands.
    pub fn shell(config: &ShellConfig, identity: Option<Identity>) -> Self {
        let home = identity
            .as_ref()
            .map_or_else(|| config.working_directory.clone(), |id| id.home.clone());
        let user = identity
            .as_ref()
            .map_or_else(|| "sandbox".to_string(), |id| id.name.clone());

        let mut spec = ProcessSpec::new(&config.program)
            .arg("-c")
            .env("PATH", &config.path)
            .env("HOME", home.to_string_lossy())
            .env("USER", user)
            .env("TERM", "dumb")
            .env("LANG", "C.UTF-8");
        spec.working_directory = Some(config.working_directory.clone());
        spec.clear_env = true;
        spec.identity = identity;
        spec.merge_stderr = true;
        Self::new("shell", spec)
    }

    pub const fn spec(&self) -> &ProcessSpec {
        &self.spec
    }
}

#[async_trait::async_trait]
impl Producer for ProcessProducer {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn start(&self, input: ProducerInput) -> Result<FragmentStream, ProducerError> {
        let program = self.spec.program.display().to_string();
        info!(
            producer = self.name,
            program = %program,
            run_as = ?self.spec.identity.as_ref().map(|id| &id.name),
            input_len = input.text.len(),
            "Spawning producer process"
        );

        let mut child = self
            .spec
            .command(&input.text)
            .spawn()
            .map_err(|e| ProducerError::SpawnFailed {
                program: program.clone(),
                reason: e.to_string(),
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProducerError::SpawnFailed {
                program: program.clone(),
                reason: "Failed to capture stdout".to_string(),
            })?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ProducerError::SpawnFailed {
                program,
                reason: "Failed to capture stderr".to_string(),
            })?;

        let (tx, rx) = mpsc::channel(32);
        let stdout_task = tokio::spawn(forward_lines(stdout, tx.clone()));
        let stderr_tx = self.spec.merge_stderr.then(|| tx.clone());
        let stderr_task = tokio::spawn(collect_stderr(stderr, stderr_tx));
        tokio::spawn(supervise(self.name, child, tx, stdout_task, stderr_task));

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

/// Read `pipe` one line at a time and send each non-empty line.
///
/// Invalid UTF-8 is replaced rather than ending the stream.
async fn forward_lines<R: AsyncRead + Unpin>(pipe: R, tx: FragmentTx) {
    let mut reader = BufReader::new(pipe);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']);
                if line.is_empty() {
                    continue;
                }
                if tx.send(Ok(Fragment::Line(line.to_string()))).await.is_err() {
                    debug!("fragment receiver dropped, stopping reader");
                    break;
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to read producer output");
                break;
            }
        }
    }
}

/// Drain stderr, keeping at most `MAX_ERROR_DETAIL` characters for
/// diagnostics. With `tx` set, lines are also forwarded as output.
async fn collect_stderr<R: AsyncRead + Unpin>(pipe: R, tx: Option<FragmentTx>) -> String {
    let mut reader = BufReader::new(pipe);
    let mut buf = Vec::new();
    let mut captured = String::new();
    let mut tx = tx;
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                if captured.chars().count() < MAX_ERROR_DETAIL {
                    captured.push_str(&line);
                }
                let line = line.trim_end_matches(['\n', '\r']);
                if line.is_empty() {
                    continue;
                }
                if let Some(sender) = &tx {
                    if sender.send(Ok(Fragment::Line(line.to_string()))).await.is_err() {
                        tx = None;
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to read producer stderr");
                break;
            }
        }
    }
    captured.trim_end().to_string()
}

/// Wait for the child and send the terminal fragment once all output has
/// been forwarded. Kills the child if the caller goes away first.
async fn supervise(
    name: &'static str,
    mut child: Child,
    tx: FragmentTx,
    stdout_task: JoinHandle<()>,
    stderr_task: JoinHandle<String>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        () = tx.closed() => {
            warn!(producer = name, "Caller disconnected, killing producer process");
            if let Err(e) = child.kill().await {
                warn!(producer = name, error = %e, "Failed to kill producer process");
            }
            return;
        }
    };

    if let Err(e) = stdout_task.await {
        warn!(producer = name, error = %e, "stdout reader task failed");
    }
    let stderr = stderr_task.await.unwrap_or_default();

    let terminal = match status {
        Ok(status) => exit_fragment(name, status, stderr),
        Err(e) => Err(ProducerError::Io(format!("failed to wait for process: {e}"))),
    };
    if tx.send(terminal).await.is_err() {
        debug!(producer = name, "fragment receiver dropped before exit status");
    }
}

fn exit_fragment(
    name: &'static str,
    status: ExitStatus,
    stderr: String,
) -> Result<Fragment, ProducerError> {
    if status.success() {
        info!(producer = name, code = ?status.code(), "Producer process finished");
        Ok(Fragment::Exit(status.code()))
    } else {
        warn!(producer = name, code = ?status.code(), "Producer process failed");
        Err(ProducerError::Exited {
            code: status.code(),
            stderr,
        })
    }
}
