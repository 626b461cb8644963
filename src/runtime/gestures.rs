//! Gesture replay: find the target's visible windows and feed them synthetic input via xdotool.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::{
    process_tree, run, CancelToken, Clock, CommandSpec, ProcessOutcome, ReproError, ReproResult, WaitOptions,
};

const TRIGGER_PREFIX: &str = "Trigger:";
pub const DEFAULT_GESTURE_DELAY: Duration = Duration::from_secs(5);
const XDOTOOL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GestureAction {
    pub kind: String,
    pub payload: String,
}

impl GestureAction {
    pub fn parse(raw: &str) -> ReproResult<Self> {
        let (kind, payload) = raw
            .split_once(',')
            .ok_or_else(|| ReproError::MalformedGesture(raw.to_string()))?;
        Ok(Self {
            kind: kind.to_string(),
            payload: payload.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GesturePlan {
    pub start_delay: Duration,
    pub actions: Vec<GestureAction>,
}

impl GesturePlan {
    /// A trailing `Trigger:<seconds>` sets the start delay and is not replayed.
    pub fn parse<S: AsRef<str>>(gestures: &[S]) -> ReproResult<Self> {
        let mut raw: Vec<&str> = gestures.iter().map(AsRef::as_ref).collect();
        let mut start_delay = DEFAULT_GESTURE_DELAY;
        let trigger = raw
            .last()
            .and_then(|g| g.strip_prefix(TRIGGER_PREFIX))
            .map(str::to_string);
        if let Some(secs) = trigger {
            let secs: u64 = secs
                .trim()
                .parse()
                .map_err(|_| ReproError::MalformedGesture(format!("{TRIGGER_PREFIX}{secs}")))?;
            start_delay = Duration::from_secs(secs);
            raw.pop();
        }
        let actions = raw.into_iter().map(GestureAction::parse).collect::<ReproResult<Vec<_>>>()?;
        Ok(Self { start_delay, actions })
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Time one window's replay needs before the last gesture has been sent.
    pub fn replay_budget(&self, settle: Duration, interval: Duration) -> Duration {
        let per_action = interval.saturating_mul(u32::try_from(self.actions.len()).unwrap_or(u32::MAX));
        self.start_delay.saturating_add(settle).saturating_add(per_action)
    }
}

/// Window-system operations gesture replay needs.
pub trait WindowDriver: Send + Sync {
    fn search_windows(&self, pid: u32) -> ReproResult<Vec<String>>;
    fn activate(&self, window: &str) -> ReproResult<()>;
    fn dispatch(&self, action: &GestureAction, window: &str) -> ReproResult<()>;
}

/// Exit status `sh` reports when the command itself could not be found.
const COMMAND_NOT_FOUND: i32 = 127;

#[derive(Debug, Clone)]
pub struct XdotoolDriver {
    binary: PathBuf,
    display: String,
    cwd: PathBuf,
    cancel: CancelToken,
}

impl XdotoolDriver {
    /// Every call is bounded by `cancel`, so a hung `--sync` ends with the attempt.
    pub fn new(binary: impl Into<PathBuf>, display: impl Into<String>, cancel: CancelToken) -> Self {
        Self {
            binary: binary.into(),
            display: display.into(),
            cwd: std::env::var_os("HOME").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("/")),
            cancel,
        }
    }

    fn invoke(&self, command: &str) -> ReproResult<ProcessOutcome> {
        let spec = CommandSpec::shell(format!("'{}' {command}", self.binary.display()), self.cwd.clone())
            .env("DISPLAY", &self.display)
            .new_process_group(false);
        let outcome = run(
            &spec,
            &WaitOptions::with_timeout(XDOTOOL_TIMEOUT, Duration::from_millis(500)),
            &self.cancel,
        )?;
        if outcome.exit_code == COMMAND_NOT_FOUND {
            return Err(ReproError::ToolNotInstalled {
                binary: self.binary.display().to_string(),
            });
        }
        Ok(outcome)
    }

    fn xdotool(&self, command: &str) -> ReproResult<()> {
        let outcome = self.invoke(command)?;
        if outcome.exit_code != 0 {
            return Err(ReproError::Process(format!(
                "xdotool {command} exited with {}",
                outcome.exit_code
            )));
        }
        Ok(())
    }
}

impl WindowDriver for XdotoolDriver {
    fn search_windows(&self, pid: u32) -> ReproResult<Vec<String>> {
        // Exit status 1 only means "nothing matched"; any numeric lines are still usable.
        let outcome = self.invoke(&format!("search --all --pid {pid} --onlyvisible --name \".*\""))?;
        Ok(numeric_lines(&outcome.output))
    }

    fn activate(&self, window: &str) -> ReproResult<()> {
        self.xdotool(&format!("windowactivate --sync {window}"))
    }

    fn dispatch(&self, action: &GestureAction, window: &str) -> ReproResult<()> {
        let command = if action.kind == "windowsize" {
            format!("windowsize {window} {}", action.payload)
        } else {
            format!("{} -- {}", action.kind, action.payload)
        };
        self.xdotool(&command)
    }
}

fn numeric_lines(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && l.bytes().all(|b| b.is_ascii_digit()))
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GestureReport {
    pub windows: BTreeSet<String>,
    pub warnings: Vec<String>,
}

pub struct GestureReplayer<'a> {
    pub plan: &'a GesturePlan,
    pub driver: &'a dyn WindowDriver,
    pub clock: &'a dyn Clock,
    pub settle: Duration,
    pub interval: Duration,
}

impl GestureReplayer<'_> {
    /// Replays the plan against the windows of `root_pid`'s process tree. Driver failures become
    /// warnings; only cancellation (the attempt finished or the user interrupted) ends it early.
    pub fn replay(&self, root_pid: u32, cancel: &CancelToken) -> GestureReport {
        self.replay_with(root_pid, process_tree, cancel)
    }

    pub(crate) fn replay_with(
        &self,
        root_pid: u32,
        tree: impl Fn(u32) -> Vec<u32>,
        cancel: &CancelToken,
    ) -> GestureReport {
        let mut report = GestureReport::default();
        if self.clock.sleep(self.plan.start_delay, cancel).is_err() {
            report.cut_short("before the start delay elapsed");
            return report;
        }

        tracing::info!("running gestures");
        let pids = tree(root_pid);
        if pids.is_empty() {
            report
                .warnings
                .push(format!("process {root_pid} exited before gestures could run"));
            return report;
        }
        tracing::info!(
            "waiting {}s for windows to appear (pids={pids:?})",
            self.settle.as_secs()
        );
        if self.clock.sleep(self.settle, cancel).is_err() {
            report.cut_short("while waiting for windows to appear");
            return report;
        }

        for pid in pids {
            match self.driver.search_windows(pid) {
                Ok(found) => report.windows.extend(found),
                Err(err) => report.warnings.push(format!("window search for pid {pid} failed: {err}")),
            }
        }
        tracing::info!("found windows: {:?}", report.windows);

        let windows: Vec<String> = report.windows.iter().cloned().collect();
        for window in &windows {
            if cancel.is_cancelled() {
                report.cut_short(&format!("before window {window}"));
                return report;
            }
            tracing::info!("running gestures on window {window}");
            if let Err(err) = self.driver.activate(window) {
                report.warnings.push(format!("activating window {window} failed: {err}"));
            }
            for action in &self.plan.actions {
                if cancel.is_cancelled() {
                    report.cut_short(&format!("on window {window}"));
                    return report;
                }
                tracing::debug!("gesture {},{}", action.kind, action.payload);
                if let Err(err) = self.driver.dispatch(action, window) {
                    report
                        .warnings
                        .push(format!("gesture {},{} on {window} failed: {err}", action.kind, action.payload));
                }
                // A cancelled pause is noticed by the check above, and only if gestures remain.
                let _ = self.clock.sleep(self.interval, cancel);
            }
        }
        report
    }
}

impl GestureReport {
    fn cut_short(&mut self, stage: &str) {
        tracing::warn!("gesture replay cut short {stage}");
        self.warnings
            .push(format!("gesture replay cut short {stage}; the attempt ended first"));
    }
}
