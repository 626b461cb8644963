//! `crashrepro.toml` config loading.

use serde::{Deserialize, Serialize};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::JobDefinition;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Base directory for cached testcases and run summaries.
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,

    /// Directory holding the symbolizer, suppression lists and the symbolize proxy.
    /// Defaults to `<base_dir>/resources`.
    #[serde(default)]
    pub resources_dir: Option<PathBuf>,

    /// Endpoint that turns raw output into a crash signature.
    #[serde(default = "default_signature_url")]
    pub signature_url: String,

    /// Maximum reproduction attempts.
    #[serde(default = "default_iterations")]
    pub iterations: u32,

    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Hard wall-clock limit for GUI targets.
    #[serde(default = "default_gui_timeout_secs")]
    pub gui_timeout_secs: u64,

    /// Optional limit for non-GUI targets. Unset means wait for exit.
    #[serde(default)]
    pub run_timeout_secs: Option<u64>,

    /// Time between SIGTERM and SIGKILL when a timeout fires, so shutdown stack traces get written.
    #[serde(default = "default_kill_grace_ms")]
    pub kill_grace_ms: u64,

    #[serde(default = "default_window_settle_secs")]
    pub window_settle_secs: u64,

    #[serde(default = "default_gesture_interval_ms")]
    pub gesture_interval_ms: u64,

    #[serde(default = "default_display_width")]
    pub display_width: u32,

    #[serde(default = "default_display_height")]
    pub display_height: u32,

    #[serde(default = "default_helper_stagger_ms")]
    pub helper_stagger_ms: u64,

    #[serde(default = "default_viewer_delay_secs")]
    pub viewer_delay_secs: u64,

    /// Start x11vnc + vncviewer so the virtual display can be watched.
    #[serde(default = "default_remote_viewer")]
    pub remote_viewer: bool,

    /// xdotool binary used for gesture replay; a bare name is looked up on PATH.
    #[serde(default = "default_xdotool_path")]
    pub xdotool_path: PathBuf,

    /// Profile directory wiped and pinned before every GUI attempt.
    #[serde(default = "default_user_profile_dir")]
    pub user_profile_dir: PathBuf,

    #[serde(default)]
    pub jobs: BTreeMap<String, JobDefinition>,

    #[serde(default)]
    pub presets: BTreeMap<String, JobDefinition>,
}

fn default_base_dir() -> PathBuf {
    PathBuf::from(".crashrepro")
}

fn default_signature_url() -> String {
    "https://clusterfuzz.com/v2/parse_stacktrace".to_string()
}

fn default_iterations() -> u32 {
    10
}

fn default_retry_backoff_ms() -> u64 {
    3_000
}

fn default_gui_timeout_secs() -> u64 {
    15
}

fn default_kill_grace_ms() -> u64 {
    3_000
}

fn default_window_settle_secs() -> u64 {
    20
}

fn default_gesture_interval_ms() -> u64 {
    200
}

fn default_display_width() -> u32 {
    1280
}

fn default_display_height() -> u32 {
    1024
}

fn default_helper_stagger_ms() -> u64 {
    500
}

fn default_viewer_delay_secs() -> u64 {
    5
}

fn default_remote_viewer() -> bool {
    true
}

fn default_xdotool_path() -> PathBuf {
    PathBuf::from("xdotool")
}

fn default_user_profile_dir() -> PathBuf {
    PathBuf::from("/tmp/crashrepro-user-profile-data")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            resources_dir: None,
            signature_url: default_signature_url(),
            iterations: default_iterations(),
            retry_backoff_ms: default_retry_backoff_ms(),
            gui_timeout_secs: default_gui_timeout_secs(),
            run_timeout_secs: None,
            kill_grace_ms: default_kill_grace_ms(),
            window_settle_secs: default_window_settle_secs(),
            gesture_interval_ms: default_gesture_interval_ms(),
            display_width: default_display_width(),
            display_height: default_display_height(),
            helper_stagger_ms: default_helper_stagger_ms(),
            viewer_delay_secs: default_viewer_delay_secs(),
            remote_viewer: default_remote_viewer(),
            xdotool_path: default_xdotool_path(),
            user_profile_dir: default_user_profile_dir(),
            jobs: BTreeMap::new(),
            presets: BTreeMap::new(),
        }
    }
}

impl Config {
    pub fn load_optional(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(s) => match toml::from_str::<Config>(&s) {
                Ok(cfg) => cfg,
                Err(err) => {
                    tracing::warn!("failed to parse config {}: {err}", path.display());
                    Self::default()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(err) => {
                tracing::warn!("failed to read config {}: {err}", path.display());
                Self::default()
            }
        }
    }

    pub fn resources_dir(&self) -> PathBuf {
        self.resources_dir
            .clone()
            .unwrap_or_else(|| self.base_dir.join("resources"))
    }

    pub fn testcases_dir(&self) -> PathBuf {
        self.base_dir.join("testcases")
    }

    pub fn testcase_dir(&self, testcase_id: &str) -> PathBuf {
        self.testcases_dir().join(format!("{testcase_id}_testcase"))
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.base_dir.join("runs")
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_keeps_defaults() {
        let cfg: Config = toml::from_str(
            r#"
iterations = 3

[presets.libfuzzer_asan]
reproducer = "libfuzzer"
sanitizer = "ASAN"

[jobs.libfuzzer_chrome_asan]
preset = "libfuzzer_asan"
"#,
        )
        .unwrap();
        assert_eq!(cfg.iterations, 3);
        assert_eq!(cfg.retry_backoff_ms, 3_000);
        assert_eq!(cfg.gui_timeout_secs, 15);
        assert_eq!(cfg.resources_dir(), PathBuf::from(".crashrepro/resources"));
        assert_eq!(
            cfg.jobs["libfuzzer_chrome_asan"].preset.as_deref(),
            Some("libfuzzer_asan")
        );
    }

    #[test]
    fn missing_config_is_default() {
        let cfg = Config::load_optional(Path::new("/nonexistent/crashrepro.toml"));
        assert_eq!(cfg.iterations, 10);
        assert!(cfg.jobs.is_empty());
    }
}
