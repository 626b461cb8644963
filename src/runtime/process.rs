//! Host process runner: spawn, timed wait with process-group teardown, combined output capture.

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::{CancelToken, ReproError, ReproResult};

const POLL_INTERVAL: Duration = Duration::from_millis(50);
/// How long to keep reading output after the process exited; grandchildren may hold the pipe.
/// This is a total budget, not an idle timeout.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Program {
    /// A command line interpreted by `sh -c` (redirections such as `< input` work).
    Shell(String),
    Exec { program: String, args: Vec<String> },
}

#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: Program,
    pub cwd: PathBuf,
    pub env: BTreeMap<String, String>,
    pub env_remove: Vec<String>,
    pub new_process_group: bool,
    pub stdin: Option<Vec<u8>>,
    pub capture: bool,
}

impl CommandSpec {
    pub fn shell(command: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self::with_program(Program::Shell(command.into()), cwd.into())
    }

    pub fn exec<I, S>(program: impl Into<String>, args: I, cwd: impl Into<PathBuf>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_program(
            Program::Exec {
                program: program.into(),
                args: args.into_iter().map(Into::into).collect(),
            },
            cwd.into(),
        )
    }

    fn with_program(program: Program, cwd: PathBuf) -> Self {
        Self {
            program,
            cwd,
            env: BTreeMap::new(),
            env_remove: Vec::new(),
            new_process_group: true,
            stdin: None,
            capture: true,
        }
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn envs(mut self, vars: &BTreeMap<String, String>) -> Self {
        self.env.extend(vars.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn env_remove(mut self, key: impl Into<String>) -> Self {
        self.env_remove.push(key.into());
        self
    }

    pub fn new_process_group(mut self, yes: bool) -> Self {
        self.new_process_group = yes;
        self
    }

    pub fn stdin(mut self, input: Vec<u8>) -> Self {
        self.stdin = Some(input);
        self
    }

    pub fn discard_output(mut self) -> Self {
        self.capture = false;
        self
    }

    /// `K="v" ... command`, the form logged before spawning.
    pub fn display(&self) -> String {
        let env = self
            .env
            .iter()
            .map(|(k, v)| format!("{k}=\"{v}\""))
            .collect::<Vec<_>>()
            .join(" ");
        let cmd = match &self.program {
            Program::Shell(line) => line.clone(),
            Program::Exec { program, args } => {
                let mut parts = vec![program.clone()];
                parts.extend(args.iter().cloned());
                parts.join(" ")
            }
        };
        format!("{env} {cmd}").trim().to_string()
    }

    fn program_name(&self) -> String {
        match &self.program {
            Program::Shell(_) => "sh".to_string(),
            Program::Exec { program, .. } => program.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WaitOptions {
    /// Measured from spawn, not from the start of `wait`.
    pub timeout: Option<Duration>,
    /// Time between SIGTERM and SIGKILL once the timeout fires.
    pub kill_grace: Duration,
}

impl WaitOptions {
    pub fn unbounded() -> Self {
        Self {
            timeout: None,
            kill_grace: Duration::from_secs(3),
        }
    }

    pub fn with_timeout(timeout: Duration, kill_grace: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            kill_grace,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutcome {
    /// Exit code, or the negated signal number when the process was killed by a signal.
    pub exit_code: i32,
    pub output: String,
    pub timed_out: bool,
}

#[derive(Debug)]
pub struct ProcessHandle {
    child: Child,
    label: String,
    group: bool,
    started: Instant,
    output_rx: Option<Receiver<Vec<u8>>>,
    stdin_writer: Option<JoinHandle<()>>,
    reaped: bool,
}

pub fn spawn(spec: &CommandSpec) -> ReproResult<ProcessHandle> {
    let mut cmd = match &spec.program {
        Program::Shell(line) => {
            let mut c = Command::new("sh");
            c.arg("-c").arg(line);
            c
        }
        Program::Exec { program, args } => {
            let mut c = Command::new(program);
            c.args(args);
            c
        }
    };
    cmd.current_dir(&spec.cwd);
    for key in &spec.env_remove {
        cmd.env_remove(key);
    }
    cmd.envs(&spec.env);
    if spec.new_process_group {
        cmd.process_group(0);
    }
    cmd.stdin(if spec.stdin.is_some() { Stdio::piped() } else { Stdio::null() });
    if spec.capture {
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    } else {
        cmd.stdout(Stdio::null()).stderr(Stdio::null());
    }

    tracing::debug!("spawning: {}", spec.display());
    let mut child = cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ReproError::ToolNotInstalled {
                binary: spec.program_name(),
            }
        } else {
            ReproError::Process(format!("failed to spawn {:?}: {e}", spec.display()))
        }
    })?;

    let output_rx = if spec.capture {
        let (tx, rx) = mpsc::channel();
        if let Some(out) = child.stdout.take() {
            spawn_output_pump(out, tx.clone());
        }
        if let Some(err) = child.stderr.take() {
            spawn_output_pump(err, tx);
        }
        Some(rx)
    } else {
        None
    };

    let stdin_writer = match (spec.stdin.clone(), child.stdin.take()) {
        (Some(input), Some(mut pipe)) => Some(thread::spawn(move || {
            // A target that exits without reading stdin closes the pipe; that is not an error here.
            let _ = pipe.write_all(&input);
        })),
        _ => None,
    };

    Ok(ProcessHandle {
        child,
        label: spec.display(),
        group: spec.new_process_group,
        started: Instant::now(),
        output_rx,
        stdin_writer,
        reaped: false,
    })
}

/// Spawns and waits in one call.
pub fn run(spec: &CommandSpec, opts: &WaitOptions, cancel: &CancelToken) -> ReproResult<ProcessOutcome> {
    spawn(spec)?.wait(opts, cancel)
}

fn spawn_output_pump<R: Read + Send + 'static>(mut reader: R, tx: Sender<Vec<u8>>) {
    thread::spawn(move || {
        let mut buf = [0u8; 8192];
        loop {
            match reader.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
    });
}

/// Collects whatever arrives before `until`. A descendant that keeps writing after the leader
/// exited only delays the caller by the remaining budget.
fn drain_until(rx: &Receiver<Vec<u8>>, until: Instant, cancel: &CancelToken, output: &mut Vec<u8>, label: &str) {
    loop {
        let left = until.saturating_duration_since(Instant::now());
        if left.is_zero() || cancel.is_cancelled() {
            tracing::debug!("output of {label} still open after exit; not waiting further");
            return;
        }
        match rx.recv_timeout(left.min(POLL_INTERVAL)) {
            Ok(chunk) => output.extend_from_slice(&chunk),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

impl ProcessHandle {
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Waits for exit. When the timeout elapses the whole group gets SIGTERM, then SIGKILL after
    /// `kill_grace`. Cancellation kills the group immediately and returns `Err(Cancelled)`.
    pub fn wait(mut self, opts: &WaitOptions, cancel: &CancelToken) -> ReproResult<ProcessOutcome> {
        let deadline = opts.timeout.map(|t| self.started + t);
        let mut output = Vec::new();
        let mut timed_out = false;

        let status = loop {
            self.drain_ready(&mut output);
            if let Some(status) = self.child.try_wait()? {
                break status;
            }
            if cancel.is_cancelled() {
                tracing::debug!("cancelled; killing {}", self.label);
                self.signal(Signal::SIGKILL)?;
                self.child.wait()?;
                self.reaped = true;
                return Err(ReproError::Cancelled);
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                timed_out = true;
                tracing::info!("timeout reached; terminating process group of {}", self.label);
                self.signal(Signal::SIGTERM)?;
                let status = match self.wait_for_exit(opts.kill_grace, &mut output)? {
                    Some(status) => status,
                    None => {
                        self.signal(Signal::SIGKILL)?;
                        self.child.wait()?
                    }
                };
                break status;
            }
            thread::sleep(POLL_INTERVAL);
        };
        self.reaped = true;

        if let Some(rx) = self.output_rx.take() {
            drain_until(&rx, Instant::now() + DRAIN_TIMEOUT, cancel, &mut output, &self.label);
        }
        if let Some(writer) = self.stdin_writer.take() {
            let _ = writer.join();
        }

        let exit_code = status
            .code()
            .unwrap_or_else(|| status.signal().map(|s| -s).unwrap_or(-1));
        if exit_code != 0 {
            tracing::debug!("{} exited with {exit_code}", self.label);
        }
        Ok(ProcessOutcome {
            exit_code,
            output: String::from_utf8_lossy(&output).into_owned(),
            timed_out,
        })
    }

    /// SIGTERM, then SIGKILL if the process is still around after `grace`.
    pub fn terminate(&mut self, grace: Duration) -> ReproResult<()> {
        if self.reaped || self.child.try_wait()?.is_some() {
            self.reaped = true;
            return Ok(());
        }
        self.signal(Signal::SIGTERM)?;
        let mut sink = Vec::new();
        if self.wait_for_exit(grace, &mut sink)?.is_none() {
            self.signal(Signal::SIGKILL)?;
            self.child.wait()?;
        }
        self.reaped = true;
        Ok(())
    }

    fn wait_for_exit(
        &mut self,
        grace: Duration,
        output: &mut Vec<u8>,
    ) -> ReproResult<Option<std::process::ExitStatus>> {
        let until = Instant::now() + grace;
        loop {
            self.drain_ready(output);
            if let Some(status) = self.child.try_wait()? {
                return Ok(Some(status));
            }
            if Instant::now() >= until {
                return Ok(None);
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn drain_ready(&mut self, output: &mut Vec<u8>) {
        let Some(rx) = &self.output_rx else {
            return;
        };
        loop {
            match rx.try_recv() {
                Ok(chunk) => output.extend_from_slice(&chunk),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
    }

    fn signal(&self, sig: Signal) -> ReproResult<()> {
        if self.group {
            signal_process_group(self.pid(), sig)
        } else {
            signal_process(self.pid(), sig)
        }
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if self.reaped {
            return;
        }
        if let Ok(None) = self.child.try_wait() {
            if let Err(err) = self.signal(Signal::SIGKILL) {
                tracing::warn!("failed to kill {}: {err}", self.label);
            }
            let _ = self.child.wait();
        }
    }
}

/// Sends `sig` to every process in the group led by `pgid`. A group that is already gone is fine.
pub fn signal_process_group(pgid: u32, sig: Signal) -> ReproResult<()> {
    match signal::killpg(Pid::from_raw(pgid as i32), sig) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(errno) => Err(ReproError::Process(format!(
            "failed to send {sig:?} to process group {pgid}: {errno}"
        ))),
    }
}

pub fn signal_process(pid: u32, sig: Signal) -> ReproResult<()> {
    match signal::kill(Pid::from_raw(pid as i32), sig) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(errno) => Err(ReproError::Process(format!("failed to send {sig:?} to {pid}: {errno}"))),
    }
}

/// Looks `binary` up on PATH (or checks it directly when it contains a slash).
pub fn find_in_path(binary: &str) -> Option<PathBuf> {
    use std::os::unix::fs::PermissionsExt;

    let is_executable = |p: &Path| {
        p.metadata()
            .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    };
    if binary.contains('/') {
        let p = PathBuf::from(binary);
        return is_executable(&p).then_some(p);
    }
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(binary))
        .find(|candidate| is_executable(candidate))
}

pub fn require_binary(binary: &str) -> ReproResult<PathBuf> {
    find_in_path(binary).ok_or_else(|| ReproError::ToolNotInstalled {
        binary: binary.to_string(),
    })
}
