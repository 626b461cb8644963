//! Virtual X display for GUI targets: Xvfb, a window manager, and an optional VNC viewer.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{spawn, CancelToken, Clock, CommandSpec, Config, ProcessHandle, ReproError, ReproResult, DEFAULT_DISPLAY};

pub const WINDOW_MANAGER: &str = "blackbox";
const FIRST_DISPLAY: u32 = 100;
const LAST_DISPLAY: u32 = 10_000;

/// A started helper process owned by a display session.
pub trait HelperProcess: Send {
    fn label(&self) -> &str;
    fn terminate(&mut self, grace: Duration) -> ReproResult<()>;
}

impl HelperProcess for ProcessHandle {
    fn label(&self) -> &str {
        ProcessHandle::label(self)
    }

    fn terminate(&mut self, grace: Duration) -> ReproResult<()> {
        ProcessHandle::terminate(self, grace)
    }
}

pub trait HelperLauncher: Send + Sync {
    fn launch(&self, spec: CommandSpec) -> ReproResult<Box<dyn HelperProcess>>;
}

/// Starts helpers as real host processes with their output discarded.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostLauncher;

impl HelperLauncher for HostLauncher {
    fn launch(&self, spec: CommandSpec) -> ReproResult<Box<dyn HelperProcess>> {
        Ok(Box::new(spawn(&spec.discard_output())?))
    }
}

#[derive(Debug, Clone)]
pub struct DisplaySettings {
    pub disabled: bool,
    pub width: u32,
    pub height: u32,
    pub stagger: Duration,
    pub viewer_delay: Duration,
    pub remote_viewer: bool,
    pub kill_grace: Duration,
    /// Where X servers leave their `.X<n>-lock` files.
    pub lock_dir: PathBuf,
}

impl DisplaySettings {
    pub fn from_config(config: &Config, disabled: bool) -> Self {
        Self {
            disabled,
            width: config.display_width,
            height: config.display_height,
            stagger: Duration::from_millis(config.helper_stagger_ms),
            viewer_delay: Duration::from_secs(config.viewer_delay_secs),
            remote_viewer: config.remote_viewer,
            kill_grace: Duration::from_millis(config.kill_grace_ms),
            lock_dir: PathBuf::from("/tmp"),
        }
    }
}

/// First display number without an X lock file.
pub fn free_display_number(lock_dir: &Path) -> ReproResult<u32> {
    (FIRST_DISPLAY..LAST_DISPLAY)
        .find(|n| !lock_dir.join(format!(".X{n}-lock")).exists())
        .ok_or_else(|| ReproError::Process("no free X display number".to_string()))
}

/// Scoped display. Helpers are torn down in reverse start order exactly once, when the session
/// is dropped (or when starting fails part way).
pub struct DisplaySession {
    display: Option<String>,
    helpers: Vec<Box<dyn HelperProcess>>,
    kill_grace: Duration,
}

impl std::fmt::Debug for DisplaySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisplaySession")
            .field("display", &self.display)
            .field("helpers", &self.helpers.iter().map(|h| h.label()).collect::<Vec<_>>())
            .finish()
    }
}

impl DisplaySession {
    pub fn disabled() -> Self {
        Self {
            display: None,
            helpers: Vec::new(),
            kill_grace: Duration::ZERO,
        }
    }

    pub fn start(
        settings: &DisplaySettings,
        launcher: &dyn HelperLauncher,
        clock: &dyn Clock,
        cancel: &CancelToken,
    ) -> ReproResult<Self> {
        if settings.disabled {
            return Ok(Self::disabled());
        }

        let number = free_display_number(&settings.lock_dir)?;
        let display_name = format!(":{number}");
        // Anything pushed here is torn down by Drop if a later step fails.
        let mut session = Self {
            display: Some(display_name.clone()),
            helpers: Vec::new(),
            kill_grace: settings.kill_grace,
        };

        tracing::info!("starting virtual display {display_name}");
        let cwd = PathBuf::from(".");
        session.helpers.push(launcher.launch(CommandSpec::exec(
            "Xvfb",
            [
                display_name.clone(),
                "-screen".to_string(),
                "0".to_string(),
                format!("{}x{}x24", settings.width, settings.height),
            ],
            cwd.clone(),
        ))?);
        clock.sleep(settings.stagger, cancel)?;

        tracing::info!("starting the {WINDOW_MANAGER} window manager on {display_name}");
        let wm = launcher
            .launch(CommandSpec::exec(WINDOW_MANAGER, Vec::<String>::new(), cwd.clone()).env("DISPLAY", &display_name))
            .map_err(|err| match err {
                ReproError::ToolNotInstalled { binary } => ReproError::WindowManagerNotInstalled { binary },
                other => other,
            })?;
        session.helpers.push(wm);

        if settings.remote_viewer {
            clock.sleep(settings.stagger, cancel)?;
            session.helpers.push(launcher.launch(CommandSpec::exec(
                "x11vnc",
                ["-localhost", "-forever", "-display", display_name.as_str()],
                cwd.clone(),
            ))?);
            clock.sleep(settings.viewer_delay, cancel)?;
            session.helpers.push(
                launcher.launch(CommandSpec::exec("vncviewer", ["localhost"], cwd).env("DISPLAY", DEFAULT_DISPLAY))?,
            );
        }
        Ok(session)
    }

    /// `None` when the display is disabled.
    pub fn display_name(&self) -> Option<&str> {
        self.display.as_deref()
    }

    fn teardown(&mut self) {
        while let Some(mut helper) = self.helpers.pop() {
            tracing::debug!("stopping display helper {}", helper.label());
            if let Err(err) = helper.terminate(self.kill_grace) {
                tracing::warn!("failed to stop {}: {err}", helper.label());
            }
        }
    }
}

impl Drop for DisplaySession {
    fn drop(&mut self) {
        self.teardown();
    }
}
