//! One reproduction attempt per call: environment rewrite, flavor-specific preparation, the run
//! itself and, for GUI targets, the virtual display, gesture replay and post-run symbolization.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use crate::{
    original_signature, require_binary, rewrite_sanitizer_env, spawn, CancelToken, Clock, CommandSpec, Config,
    CrashSignature, DisplaySession, DisplaySettings, GesturePlan, GestureReplayer, GestureReport, HelperLauncher,
    HostLauncher, ReproError, ReproResult, ReproducerKind, Resources, SignatureExtractor, SystemClock, WaitOptions,
    XdotoolDriver, DEFAULT_DISPLAY,
};

pub const GL_DRAWING_FLAG: &str = "--disable-gl-drawing-for-tests";
pub const USER_DATA_DIR_FLAG: &str = "--user-data-dir=";
const SYMBOLIZE_SCRIPT: &str = "tools/valgrind/asan/asan_symbolize.py";

/// Inputs of one reproduction session.
#[derive(Debug, Clone)]
pub struct ReproductionContext {
    pub testcase_id: String,
    pub testcase_path: PathBuf,
    pub job_type: String,
    pub binary: PathBuf,
    pub args: String,
    pub sanitizer: Option<String>,
    pub gestures: Vec<String>,
    pub source_dir: Option<PathBuf>,
    pub environment: BTreeMap<String, String>,
    pub stacktrace_lines: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ReproSettings {
    pub run_timeout: Option<Duration>,
    pub gui_timeout: Duration,
    pub kill_grace: Duration,
    pub window_settle: Duration,
    pub gesture_interval: Duration,
    pub xdotool: PathBuf,
    pub user_profile_dir: PathBuf,
    pub display: DisplaySettings,
}

impl ReproSettings {
    pub fn from_config(config: &Config, disable_display: bool) -> Self {
        Self {
            run_timeout: config.run_timeout_secs.map(Duration::from_secs),
            gui_timeout: Duration::from_secs(config.gui_timeout_secs),
            kill_grace: config.kill_grace(),
            window_settle: Duration::from_secs(config.window_settle_secs),
            gesture_interval: Duration::from_millis(config.gesture_interval_ms),
            xdotool: config.xdotool_path.clone(),
            user_profile_dir: config.user_profile_dir.clone(),
            display: DisplaySettings::from_config(config, disable_display),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptOutput {
    pub exit_code: i32,
    pub timed_out: bool,
    pub output: String,
    pub warnings: Vec<String>,
}

/// What the convergence loop drives.
pub trait CrashReproducer {
    fn original(&self) -> &CrashSignature;
    fn job_type(&self) -> &str;
    fn attempt(&mut self) -> ReproResult<AttemptOutput>;
}

#[derive(Debug)]
enum Flavor {
    Base,
    Libfuzzer,
    /// `xdotool` is resolved only when there is something to replay.
    Gui { replay: Option<(GesturePlan, PathBuf)> },
}

pub struct Reproducer {
    context: ReproductionContext,
    kind: ReproducerKind,
    flavor: Flavor,
    sanitizer: String,
    resources: Resources,
    settings: ReproSettings,
    original: CrashSignature,
    /// Working copy of the argument string; flavor edits land here, never in the context.
    args: String,
    cancel: CancelToken,
    clock: Box<dyn Clock>,
    launcher: Box<dyn HelperLauncher>,
    span: tracing::Span,
}

impl Reproducer {
    pub fn new(
        context: ReproductionContext,
        kind: ReproducerKind,
        resources: Resources,
        settings: ReproSettings,
        extractor: &dyn SignatureExtractor,
        cancel: CancelToken,
    ) -> ReproResult<Self> {
        let span = tracing::info_span!("reproducer", testcase = %context.testcase_id, job = %context.job_type);
        let _entered = span.enter();

        let sanitizer = context
            .sanitizer
            .clone()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ReproError::SanitizerNotProvided {
                job_type: context.job_type.clone(),
            })?;

        let flavor = match kind {
            ReproducerKind::Base => Flavor::Base,
            ReproducerKind::Libfuzzer => Flavor::Libfuzzer,
            ReproducerKind::Gui => {
                let plan = GesturePlan::parse(&context.gestures)?;
                let replay = if plan.is_empty() {
                    None
                } else {
                    let xdotool = require_binary(&settings.xdotool.to_string_lossy())?;
                    Some((plan, xdotool))
                };
                Flavor::Gui { replay }
            }
        };

        let original = original_signature(extractor, &context.job_type, &context.stacktrace_lines)?;
        tracing::info!(
            "original crash type: {}; state:\n  {}",
            original.crash_type,
            original.state_block()
        );
        drop(_entered);

        Ok(Self {
            args: context.args.clone(),
            context,
            kind,
            flavor,
            sanitizer: sanitizer.to_ascii_uppercase(),
            resources,
            settings,
            original,
            cancel,
            clock: Box::new(SystemClock),
            launcher: Box::new(HostLauncher),
            span,
        })
    }

    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_launcher(mut self, launcher: Box<dyn HelperLauncher>) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn kind(&self) -> ReproducerKind {
        self.kind
    }

    pub fn sanitizer(&self) -> &str {
        &self.sanitizer
    }

    pub fn args(&self) -> &str {
        &self.args
    }

    pub fn environment(&self) -> &BTreeMap<String, String> {
        &self.context.environment
    }

    fn prepare(&mut self) -> ReproResult<()> {
        match &self.flavor {
            Flavor::Base => {}
            Flavor::Libfuzzer => {
                let mut parsed = deserialize_fuzzer_args(&self.args)?;
                fix_dict_arg(&mut parsed, binary_dir(&self.context.binary));
                self.args = serialize_fuzzer_args(&parsed);
            }
            Flavor::Gui { .. } => {
                let profile = &self.settings.user_profile_dir;
                if profile.exists() {
                    std::fs::remove_dir_all(profile)?;
                }
                self.args = pin_user_data_dir(&self.args, profile);
                self.args = toggle_gl_drawing(&self.args, !self.settings.display.disabled);
            }
        }
        Ok(())
    }

    fn command_line(&self) -> String {
        format!(
            "{} {} {}",
            self.context.binary.display(),
            self.args.trim(),
            self.context.testcase_path.display()
        )
    }

    fn run_direct(&mut self) -> ReproResult<AttemptOutput> {
        let spec = CommandSpec::shell(self.command_line(), binary_dir(&self.context.binary))
            .envs(&self.context.environment);
        tracing::info!("running: {}", spec.display());
        let wait = WaitOptions {
            timeout: self.settings.run_timeout,
            kill_grace: self.settings.kill_grace,
        };
        let outcome = spawn(&spec)?.wait(&wait, &self.cancel)?;
        Ok(AttemptOutput {
            exit_code: outcome.exit_code,
            timed_out: outcome.timed_out,
            output: outcome.output,
            warnings: Vec::new(),
        })
    }

    fn run_gui(&mut self, replay: Option<&(GesturePlan, PathBuf)>) -> ReproResult<AttemptOutput> {
        let session = DisplaySession::start(
            &self.settings.display,
            self.launcher.as_ref(),
            self.clock.as_ref(),
            &self.cancel,
        )?;

        // Symbolization happens after the run.
        self.context.environment.remove("ASAN_SYMBOLIZER_PATH");
        let display = match session.display_name() {
            Some(name) => {
                self.context.environment.insert("DISPLAY".to_string(), name.to_string());
                name.to_string()
            }
            None => self
                .context
                .environment
                .get("DISPLAY")
                .cloned()
                .unwrap_or_else(|| DEFAULT_DISPLAY.to_string()),
        };

        let spec = CommandSpec::shell(self.command_line(), binary_dir(&self.context.binary))
            .envs(&self.context.environment)
            .env_remove("ASAN_SYMBOLIZER_PATH");
        tracing::info!("running: {}", spec.display());
        let handle = spawn(&spec)?;
        let pid = handle.pid();

        let settle = self.settings.window_settle;
        let interval = self.settings.gesture_interval;
        // The deadline runs from spawn; gestures get their own share on top of the GUI timeout.
        let budget = replay.map_or(Duration::ZERO, |(plan, _)| plan.replay_budget(settle, interval));
        let wait = WaitOptions::with_timeout(
            self.settings.gui_timeout.saturating_add(budget),
            self.settings.kill_grace,
        );
        let replay_cancel = self.cancel.child();
        let clock = self.clock.as_ref();
        let cancel = &self.cancel;

        let (waited, report) = thread::scope(|s| {
            let replay = replay.map(|(plan, xdotool)| {
                let replay_cancel = &replay_cancel;
                let display = display.clone();
                s.spawn(move || {
                    let driver = XdotoolDriver::new(xdotool.clone(), display, replay_cancel.clone());
                    GestureReplayer {
                        plan,
                        driver: &driver,
                        clock,
                        settle,
                        interval,
                    }
                    .replay(pid, replay_cancel)
                })
            });
            let waited = handle.wait(&wait, cancel);
            replay_cancel.cancel();
            let report = match replay {
                Some(h) => h.join().unwrap_or_else(|_| GestureReport {
                    warnings: vec!["gesture replay panicked".to_string()],
                    ..GestureReport::default()
                }),
                None => GestureReport::default(),
            };
            (waited, report)
        });
        drop(session);

        let outcome = waited?;
        let mut warnings = report.warnings;
        let output = self.symbolize(outcome.output, &mut warnings)?;
        for warning in &warnings {
            tracing::warn!("{warning}");
        }
        Ok(AttemptOutput {
            exit_code: outcome.exit_code,
            timed_out: outcome.timed_out,
            output,
            warnings,
        })
    }

    /// Pipes raw output through the source tree's `asan_symbolize.py`.
    fn symbolize(&self, output: String, warnings: &mut Vec<String>) -> ReproResult<String> {
        let Some(source) = &self.context.source_dir else {
            warnings.push("no source directory given; output is not symbolized".to_string());
            return Ok(output);
        };
        let script = source.join(SYMBOLIZE_SCRIPT);
        if !script.is_file() {
            warnings.push(format!("{} not found; output is not symbolized", script.display()));
            return Ok(output);
        }
        let proxy = self.resources.symbolize_proxy()?;

        let mut input = output.clone().into_bytes();
        input.push(0);
        let home = std::env::var_os("HOME").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("/"));
        let spec = CommandSpec::exec(script.display().to_string(), Vec::<String>::new(), home)
            .env("LLVM_SYMBOLIZER_PATH", proxy.display().to_string())
            .env("CHROMIUM_SRC", source.display().to_string())
            .stdin(input);
        let outcome = spawn(&spec)?.wait(&WaitOptions::unbounded(), &self.cancel)?;
        if outcome.exit_code != 0 || outcome.output.trim().is_empty() {
            warnings.push(format!("symbolization exited with {}; keeping raw output", outcome.exit_code));
            return Ok(output);
        }
        Ok(outcome.output)
    }
}

impl CrashReproducer for Reproducer {
    fn original(&self) -> &CrashSignature {
        &self.original
    }

    fn job_type(&self) -> &str {
        &self.context.job_type
    }

    fn attempt(&mut self) -> ReproResult<AttemptOutput> {
        let span = self.span.clone();
        let _entered = span.enter();
        self.cancel.check()?;

        rewrite_sanitizer_env(&mut self.context.environment, &self.sanitizer, &self.resources)?;
        self.prepare()?;
        let gui = match &self.flavor {
            Flavor::Gui { replay } => Some(replay.clone()),
            Flavor::Base | Flavor::Libfuzzer => None,
        };
        match gui {
            Some(replay) => self.run_gui(replay.as_ref()),
            None => self.run_direct(),
        }
    }
}

fn binary_dir(binary: &Path) -> &Path {
    binary
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// `-dict=a -runs=100` into `{dict: a, runs: 100}`; each token is split at its first `=`.
pub fn deserialize_fuzzer_args(args: &str) -> ReproResult<BTreeMap<String, String>> {
    let mut out = BTreeMap::new();
    for token in args.split_whitespace() {
        let (key, value) = token
            .split_once('=')
            .ok_or_else(|| ReproError::MalformedArgument(token.to_string()))?;
        let key = key.trim_start_matches('-');
        if key.is_empty() {
            return Err(ReproError::MalformedArgument(token.to_string()));
        }
        out.insert(key.to_string(), value.to_string());
    }
    Ok(out)
}

/// Sorted by key.
pub fn serialize_fuzzer_args(args: &BTreeMap<String, String>) -> String {
    args.iter()
        .map(|(k, v)| format!("-{k}={v}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Points `dict` at the copy next to the binary.
pub fn fix_dict_arg(args: &mut BTreeMap<String, String>, build_dir: &Path) {
    if let Some(dict) = args.get_mut("dict") {
        if let Some(name) = Path::new(dict.as_str()).file_name() {
            *dict = build_dir.join(name).display().to_string();
        }
    }
}

pub fn pin_user_data_dir(args: &str, profile: &Path) -> String {
    let flag = format!("{USER_DATA_DIR_FLAG}{}", profile.display());
    if args.split_whitespace().any(|t| t == flag) {
        args.to_string()
    } else {
        format!("{} {flag}", args.trim()).trim().to_string()
    }
}

/// Adds the GL flag when drawing to a virtual display, removes it otherwise.
pub fn toggle_gl_drawing(args: &str, display_enabled: bool) -> String {
    let mut tokens: Vec<&str> = args.split_whitespace().filter(|t| *t != GL_DRAWING_FLAG).collect();
    if display_enabled {
        tokens.push(GL_DRAWING_FLAG);
    }
    tokens.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SUPPRESSIONS_DIR, SYMBOLIZE_PROXY_FILE, SYMBOLIZER_FILE};
    use std::os::unix::fs::PermissionsExt;
    use std::sync::Mutex;

    struct FixedExtractor;

    impl SignatureExtractor for FixedExtractor {
        fn extract(&self, _job_type: &str, _stacktrace: &str) -> ReproResult<CrashSignature> {
            Ok(CrashSignature::new("Heap-buffer-overflow", vec!["foo".to_string()]))
        }
    }

    struct Workspace {
        root: PathBuf,
        resources: Resources,
    }

    impl Workspace {
        fn new() -> Self {
            let root = std::env::temp_dir().join(format!("crashrepro-repro-{}", uuid::Uuid::new_v4()));
            let res = root.join("resources");
            std::fs::create_dir_all(res.join(SUPPRESSIONS_DIR)).unwrap();
            std::fs::write(res.join(SYMBOLIZER_FILE), "").unwrap();
            std::fs::write(res.join(SYMBOLIZE_PROXY_FILE), "").unwrap();
            std::fs::write(res.join(SUPPRESSIONS_DIR).join("lsan_suppressions.txt"), "").unwrap();
            let resources = Resources::locate(&res).unwrap();
            Self { root, resources }
        }

        fn script(&self, name: &str, body: &str) -> PathBuf {
            let path = self.root.join("build").join(name);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        fn context(&self, binary: PathBuf, args: &str) -> ReproductionContext {
            let testcase = self.root.join("testcase.js");
            std::fs::write(&testcase, "crash()").unwrap();
            ReproductionContext {
                testcase_id: "1234".to_string(),
                testcase_path: testcase,
                job_type: "linux_asan_d8".to_string(),
                binary,
                args: args.to_string(),
                sanitizer: Some("ASAN".to_string()),
                gestures: Vec::new(),
                source_dir: None,
                environment: BTreeMap::from([(
                    "LSAN_OPTIONS".to_string(),
                    "suppressions=/old:external_symbolizer_path=/old".to_string(),
                )]),
                stacktrace_lines: vec!["#0 foo".to_string()],
            }
        }

        fn settings(&self) -> ReproSettings {
            let mut cfg = Config::default();
            cfg.user_profile_dir = self.root.join("profile");
            cfg.kill_grace_ms = 200;
            ReproSettings::from_config(&cfg, true)
        }
    }

    impl Drop for Workspace {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.root);
        }
    }

    #[test]
    fn fuzzer_args_round_trip_sorted() {
        let parsed = deserialize_fuzzer_args("-runs=100 -dict=/a/b/c.dict  -timeout=25").unwrap();
        assert_eq!(serialize_fuzzer_args(&parsed), "-dict=/a/b/c.dict -runs=100 -timeout=25");
        assert!(deserialize_fuzzer_args("").unwrap().is_empty());
        assert_eq!(
            deserialize_fuzzer_args("-only_ascii=1 -rss_limit_mb=2048").unwrap()["rss_limit_mb"],
            "2048"
        );
    }

    #[test]
    fn malformed_fuzzer_args_are_rejected() {
        for bad in ["-runs", "-a=1 flag", "-=3"] {
            assert!(matches!(deserialize_fuzzer_args(bad), Err(ReproError::MalformedArgument(_))), "{bad}");
        }
    }

    #[test]
    fn dict_moves_next_to_binary() {
        let mut args = deserialize_fuzzer_args("-dict=/mnt/fuzz/dicts/xml.dict -runs=1").unwrap();
        fix_dict_arg(&mut args, Path::new("/out/Release"));
        assert_eq!(args["dict"], "/out/Release/xml.dict");

        let mut none = deserialize_fuzzer_args("-runs=1").unwrap();
        fix_dict_arg(&mut none, Path::new("/out"));
        assert!(!none.contains_key("dict"));
    }

    #[test]
    fn gl_flag_follows_display_state() {
        assert_eq!(toggle_gl_drawing("--a", true), format!("--a {GL_DRAWING_FLAG}"));
        assert_eq!(toggle_gl_drawing(&format!("--a {GL_DRAWING_FLAG} --b"), false), "--a --b");
        let twice = toggle_gl_drawing(&toggle_gl_drawing("--a", true), true);
        assert_eq!(twice.matches(GL_DRAWING_FLAG).count(), 1);
    }

    #[test]
    fn user_data_dir_is_pinned_once() {
        let p = Path::new("/tmp/profile");
        let once = pin_user_data_dir("--a", p);
        assert_eq!(once, "--a --user-data-dir=/tmp/profile");
        assert_eq!(pin_user_data_dir(&once, p), once);
    }

    #[test]
    fn missing_sanitizer_is_a_config_error() {
        let ws = Workspace::new();
        let mut ctx = ws.context(PathBuf::from("/bin/true"), "");
        ctx.sanitizer = None;
        let err = Reproducer::new(
            ctx,
            ReproducerKind::Base,
            ws.resources.clone(),
            ws.settings(),
            &FixedExtractor,
            CancelToken::new(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, ReproError::SanitizerNotProvided { .. }));
    }

    #[test]
    fn malformed_gestures_fail_construction() {
        let ws = Workspace::new();
        let mut ctx = ws.context(PathBuf::from("/bin/true"), "");
        ctx.gestures = vec!["nocomma".to_string()];
        let err = Reproducer::new(
            ctx,
            ReproducerKind::Gui,
            ws.resources.clone(),
            ws.settings(),
            &FixedExtractor,
            CancelToken::new(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, ReproError::MalformedGesture(_)));
    }

    #[test]
    fn base_attempt_runs_binary_with_rewritten_environment() {
        let ws = Workspace::new();
        let binary = ws.script("d8", "echo \"args=$*\"; echo \"lsan=$LSAN_OPTIONS\"; echo \"sym=$ASAN_SYMBOLIZER_PATH\"; exit 1");
        let ctx = ws.context(binary, "--turbo");
        let mut repro = Reproducer::new(
            ctx,
            ReproducerKind::Base,
            ws.resources.clone(),
            ws.settings(),
            &FixedExtractor,
            CancelToken::new(),
        )
        .unwrap();
        assert_eq!(repro.original().crash_type, "Heap-buffer-overflow");

        let out = repro.attempt().unwrap();
        assert_eq!(out.exit_code, 1);
        assert!(!out.timed_out);
        assert!(out.output.contains(&format!("args=--turbo {}", ws.root.join("testcase.js").display())));
        assert!(out.output.contains(&format!(
            "lsan=suppressions={}",
            ws.resources.root().join("suppressions/lsan_suppressions.txt").display()
        )));
        assert!(out.output.contains(&format!("sym={}", ws.resources.symbolizer().display())));
    }

    #[test]
    fn libfuzzer_attempt_rewrites_args_every_time() {
        let ws = Workspace::new();
        let binary = ws.script("fuzzer", "echo \"$@\"");
        let ctx = ws.context(binary.clone(), "-runs=100 -dict=/elsewhere/x.dict");
        let mut repro = Reproducer::new(
            ctx,
            ReproducerKind::Libfuzzer,
            ws.resources.clone(),
            ws.settings(),
            &FixedExtractor,
            CancelToken::new(),
        )
        .unwrap();
        repro.attempt().unwrap();
        let first = repro.args().to_string();
        let out = repro.attempt().unwrap();
        assert_eq!(repro.args(), first);
        let dict = binary.parent().unwrap().join("x.dict");
        assert_eq!(first, format!("-dict={} -runs=100", dict.display()));
        assert!(out.output.contains(&first));
    }

    #[test]
    fn gui_attempt_without_display_clears_profile_and_strips_symbolizer() {
        let ws = Workspace::new();
        let binary = ws.script(
            "chrome",
            "echo \"args=$*\"; echo \"sym=${ASAN_SYMBOLIZER_PATH:-unset}\"; echo \"display=$DISPLAY\"",
        );
        let settings = ws.settings();
        std::fs::create_dir_all(settings.user_profile_dir.join("Default")).unwrap();
        let ctx = ws.context(binary, &format!("--a {GL_DRAWING_FLAG}"));
        let mut repro = Reproducer::new(
            ctx,
            ReproducerKind::Gui,
            ws.resources.clone(),
            settings.clone(),
            &FixedExtractor,
            CancelToken::new(),
        )
        .unwrap();

        let out = repro.attempt().unwrap();
        assert!(!settings.user_profile_dir.exists());
        assert!(!repro.args().contains(GL_DRAWING_FLAG));
        assert!(repro
            .args()
            .contains(&format!("{USER_DATA_DIR_FLAG}{}", settings.user_profile_dir.display())));
        assert!(out.output.contains("sym=unset"));
        assert!(out.output.contains(&format!("display={DEFAULT_DISPLAY}")));
        assert!(!repro.environment().contains_key("ASAN_SYMBOLIZER_PATH"));
        // No source tree: the raw output is kept and the skip is reported.
        assert_eq!(out.warnings.len(), 1);
    }

    #[test]
    fn gui_attempt_times_out_and_kills_the_target() {
        let ws = Workspace::new();
        let binary = ws.script("chrome", "echo started; sleep 30");
        let mut settings = ws.settings();
        settings.gui_timeout = Duration::from_millis(300);
        let ctx = ws.context(binary, "");
        let mut repro = Reproducer::new(
            ctx,
            ReproducerKind::Gui,
            ws.resources.clone(),
            settings,
            &FixedExtractor,
            CancelToken::new(),
        )
        .unwrap();
        let start = std::time::Instant::now();
        let out = repro.attempt().unwrap();
        assert!(out.timed_out);
        assert!(out.output.contains("started"));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn gui_attempt_symbolizes_through_source_tree() {
        let ws = Workspace::new();
        let binary = ws.script("chrome", "echo '#0 0xdead in ??'");
        let source = ws.root.join("src");
        let script = source.join(SYMBOLIZE_SCRIPT);
        std::fs::create_dir_all(script.parent().unwrap()).unwrap();
        std::fs::write(
            &script,
            "#!/bin/sh\necho \"proxy=$LLVM_SYMBOLIZER_PATH\"\necho \"src=$CHROMIUM_SRC\"\ntr -d '\\000' | sed 's/??/foo/'\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut ctx = ws.context(binary, "");
        ctx.source_dir = Some(source.clone());
        let mut repro = Reproducer::new(
            ctx,
            ReproducerKind::Gui,
            ws.resources.clone(),
            ws.settings(),
            &FixedExtractor,
            CancelToken::new(),
        )
        .unwrap();
        let out = repro.attempt().unwrap();
        assert!(out.output.contains("#0 0xdead in foo"), "{}", out.output);
        assert!(out.output.contains(&format!("src={}", source.display())));
        assert!(out
            .output
            .contains(&format!("proxy={}", ws.resources.root().join(SYMBOLIZE_PROXY_FILE).display())));
        assert!(out.warnings.is_empty(), "{:?}", out.warnings);
    }

    #[test]
    fn gui_attempt_replays_gestures_before_the_deadline() {
        let ws = Workspace::new();
        let log = ws.root.join("xdotool.log");
        let xdotool = ws.script(
            "xdotool",
            &format!("echo \"$*\" >> {}\n[ \"$1\" = search ] && echo 4242\nexit 0", log.display()),
        );
        let binary = ws.script("chrome", "sleep 4; echo done");
        let mut settings = ws.settings();
        settings.xdotool = xdotool;
        // Shorter than settle alone: gestures must still run.
        settings.gui_timeout = Duration::from_secs(2);
        settings.window_settle = Duration::from_secs(3);
        settings.gesture_interval = Duration::from_millis(50);
        let mut ctx = ws.context(binary, "");
        ctx.gestures = vec!["key,a".to_string(), "windowsize,100 200".to_string(), "Trigger:0".to_string()];
        let mut repro = Reproducer::new(
            ctx,
            ReproducerKind::Gui,
            ws.resources.clone(),
            settings,
            &FixedExtractor,
            CancelToken::new(),
        )
        .unwrap();

        let out = repro.attempt().unwrap();
        assert!(!out.timed_out);
        assert!(out.output.contains("done"));
        assert!(!out.warnings.iter().any(|w| w.contains("cut short")), "{:?}", out.warnings);

        let recorded = std::fs::read_to_string(&log).unwrap();
        let lines: Vec<&str> = recorded.lines().collect();
        let searches = lines.iter().take_while(|l| l.starts_with("search ")).count();
        assert!(searches >= 1, "{recorded}");
        assert!(lines[..searches].iter().all(|l| l.contains("--onlyvisible")));
        assert_eq!(
            &lines[searches..],
            ["windowactivate --sync 4242", "key -- a", "windowsize 4242 100 200"]
        );
    }

    #[test]
    fn gestures_need_xdotool_but_a_bare_trigger_does_not() {
        let ws = Workspace::new();
        let mut settings = ws.settings();
        settings.xdotool = ws.root.join("no-such-xdotool");

        let mut ctx = ws.context(PathBuf::from("/bin/true"), "");
        ctx.gestures = vec!["key,a".to_string()];
        let err = Reproducer::new(
            ctx,
            ReproducerKind::Gui,
            ws.resources.clone(),
            settings.clone(),
            &FixedExtractor,
            CancelToken::new(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, ReproError::ToolNotInstalled { .. }), "{err}");

        let mut ctx = ws.context(PathBuf::from("/bin/true"), "");
        ctx.gestures = vec!["Trigger:1".to_string()];
        assert!(Reproducer::new(
            ctx,
            ReproducerKind::Gui,
            ws.resources.clone(),
            settings,
            &FixedExtractor,
            CancelToken::new(),
        )
        .is_ok());
    }

    #[test]
    fn symbolize_proxy_is_only_needed_when_symbolizing() {
        let ws = Workspace::new();
        std::fs::remove_file(ws.resources.root().join(SYMBOLIZE_PROXY_FILE)).unwrap();
        let binary = ws.script("chrome", "echo '#0 0xdead in ??'");

        let mut repro = Reproducer::new(
            ws.context(binary.clone(), ""),
            ReproducerKind::Gui,
            ws.resources.clone(),
            ws.settings(),
            &FixedExtractor,
            CancelToken::new(),
        )
        .unwrap();
        let out = repro.attempt().unwrap();
        assert!(out.output.contains("0xdead"));
        assert_eq!(out.warnings.len(), 1);

        let source = ws.root.join("src");
        let script = source.join(SYMBOLIZE_SCRIPT);
        std::fs::create_dir_all(script.parent().unwrap()).unwrap();
        std::fs::write(&script, "#!/bin/sh\ncat\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        let mut ctx = ws.context(binary, "");
        ctx.source_dir = Some(source);
        let mut repro = Reproducer::new(
            ctx,
            ReproducerKind::Gui,
            ws.resources.clone(),
            ws.settings(),
            &FixedExtractor,
            CancelToken::new(),
        )
        .unwrap();
        let err = repro.attempt().unwrap_err();
        assert!(matches!(err, ReproError::MissingResource(_)), "{err}");
        assert!(err.is_installation_error());
    }

    #[test]
    fn cancelled_token_stops_before_running() {
        let ws = Workspace::new();
        let marker = ws.root.join("ran");
        let binary = ws.script("d8", &format!("touch {}", marker.display()));
        let cancel = CancelToken::new();
        let mut repro = Reproducer::new(
            ws.context(binary, ""),
            ReproducerKind::Base,
            ws.resources.clone(),
            ws.settings(),
            &FixedExtractor,
            cancel.clone(),
        )
        .unwrap();
        cancel.cancel();
        assert!(matches!(repro.attempt(), Err(ReproError::Cancelled)));
        assert!(!marker.exists());
    }

    #[test]
    fn display_start_failure_aborts_the_attempt() {
        struct NoXvfb(Mutex<u32>);
        impl HelperLauncher for NoXvfb {
            fn launch(&self, _spec: CommandSpec) -> ReproResult<Box<dyn crate::HelperProcess>> {
                *self.0.lock().unwrap() += 1;
                Err(ReproError::ToolNotInstalled { binary: "Xvfb".to_string() })
            }
        }

        let ws = Workspace::new();
        let binary = ws.script("chrome", &format!("touch {}", ws.root.join("ran").display()));
        let mut settings = ws.settings();
        settings.display.disabled = false;
        settings.display.lock_dir = ws.root.clone();
        let mut repro = Reproducer::new(
            ws.context(binary, ""),
            ReproducerKind::Gui,
            ws.resources.clone(),
            settings,
            &FixedExtractor,
            CancelToken::new(),
        )
        .unwrap()
        .with_launcher(Box::new(NoXvfb(Mutex::new(0))));
        let err = repro.attempt().unwrap_err();
        assert!(err.is_installation_error());
        assert!(!ws.root.join("ran").exists());
    }
}
