//! `crashrepro reproduce`: load a cached testcase, resolve its job, and drive the retry loop.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::{
    converge, resolve_job, wall_time_iso_utc, write_summary, CancelToken, Clock, Config, Convergence, CrashReproducer,
    ExitStatus, ReproError, ReproResult, ReproSettings, ReproSummary, ReproducerKind, Reproducer,
    ReproductionContext, Resources, SignatureExtractor, SystemClock, Testcase,
};

#[derive(Debug, Clone, Default)]
pub struct ReproduceOptions {
    pub testcase_id: String,
    /// Overrides `<base_dir>/testcases/<id>_testcase`.
    pub testcase_dir: Option<PathBuf>,
    pub binary: Option<PathBuf>,
    pub build_dir: Option<PathBuf>,
    pub source_dir: Option<PathBuf>,
    pub iterations: Option<u32>,
    pub disable_xvfb: bool,
    pub target_args: String,
    pub flavor: Option<ReproducerKind>,
    pub sanitizer: Option<String>,
    pub timeout: Option<Duration>,
    pub backoff: Option<Duration>,
}

pub fn reproduce(
    config: &Config,
    opt: &ReproduceOptions,
    extractor: &dyn SignatureExtractor,
    cancel: &CancelToken,
) -> ReproResult<ReproSummary> {
    reproduce_with_clock(config, opt, extractor, &SystemClock, cancel)
}

pub fn reproduce_with_clock(
    config: &Config,
    opt: &ReproduceOptions,
    extractor: &dyn SignatureExtractor,
    clock: &dyn Clock,
    cancel: &CancelToken,
) -> ReproResult<ReproSummary> {
    if opt.testcase_id.trim().is_empty() {
        return Err(ReproError::InvalidArgument("testcase id must not be empty".to_string()));
    }
    let started_at = wall_time_iso_utc();
    let started = Instant::now();
    let run_id = uuid::Uuid::new_v4().to_string();

    let testcase_dir = opt
        .testcase_dir
        .clone()
        .unwrap_or_else(|| config.testcase_dir(&opt.testcase_id));
    let testcase = Testcase::load(&testcase_dir)?;
    let testcase_path = testcase.input_path(&testcase_dir)?;
    let job = resolve_job(
        &testcase.job_type,
        &config.jobs,
        &config.presets,
        opt.flavor,
        opt.sanitizer.as_deref(),
    )?;
    let binary = resolve_binary(opt, job.binary.as_deref(), &testcase.job_type)?;
    let resources = Resources::locate(&config.resources_dir())?;

    let mut warnings = testcase.warnings();
    for warning in &warnings {
        tracing::warn!("{warning}");
    }

    let mut settings = ReproSettings::from_config(config, opt.disable_xvfb);
    if let Some(timeout) = opt.timeout {
        settings.run_timeout = Some(timeout);
        settings.gui_timeout = timeout;
    }

    let args = format!("{} {}", testcase.reproduction_args, opt.target_args)
        .trim()
        .to_string();
    let digest = std::fs::read(&testcase_path)
        .map(|bytes| blake3::hash(&bytes).to_hex().to_string())
        .ok();
    let context = ReproductionContext {
        testcase_id: testcase.id.clone(),
        testcase_path,
        job_type: testcase.job_type.clone(),
        binary,
        args,
        sanitizer: Some(job.sanitizer.clone()),
        gestures: testcase.gestures.clone(),
        source_dir: opt.source_dir.clone(),
        environment: testcase.environment.clone(),
        stacktrace_lines: testcase.stacktrace_lines.clone(),
    };

    let mut reproducer = Reproducer::new(context, job.reproducer, resources, settings, extractor, cancel.clone())?;
    let iterations = opt.iterations.unwrap_or(config.iterations);
    let backoff = opt.backoff.unwrap_or_else(|| config.retry_backoff());
    let outcome = converge(&mut reproducer, extractor, iterations, backoff, clock, cancel)?;

    // Repeated after the output scrolled past.
    for warning in testcase.warnings() {
        tracing::warn!("{warning}");
    }
    for record in &outcome.attempts {
        warnings.extend(record.warnings.iter().map(|w| format!("attempt {}: {w}", record.attempt)));
    }

    let mut summary = ReproSummary {
        status: match outcome.status {
            Convergence::Reproduced => ExitStatus::Reproduced,
            Convergence::NotReproduced => ExitStatus::NotReproduced,
        },
        run_id: run_id.clone(),
        testcase_id: testcase.id.clone(),
        job_type: testcase.job_type.clone(),
        reproducer: job.reproducer,
        sanitizer: reproducer.sanitizer().to_string(),
        testcase_digest: digest,
        started_at,
        finished_at: wall_time_iso_utc(),
        duration_ms: started.elapsed().as_millis() as u64,
        original: reproducer.original().clone(),
        attempts: outcome.attempts,
        warnings,
        summary_path: None,
    };
    let run_dir = config.runs_dir().join(&run_id);
    let path = write_summary(&summary, &run_dir)?;
    summary.summary_path = Some(path.display().to_string());
    Ok(summary)
}

fn resolve_binary(opt: &ReproduceOptions, job_binary: Option<&str>, job_type: &str) -> ReproResult<PathBuf> {
    let binary = match (&opt.binary, &opt.build_dir) {
        (Some(binary), _) => binary.clone(),
        (None, Some(build_dir)) => {
            let name = job_binary.ok_or_else(|| {
                ReproError::Config(format!("job {job_type} names no binary; pass --binary"))
            })?;
            build_dir.join(name)
        }
        (None, None) => {
            return Err(ReproError::InvalidArgument(
                "either --binary or --build-dir is required".to_string(),
            ))
        }
    };
    if !binary.is_file() {
        return Err(ReproError::InvalidArgument(format!(
            "binary {} does not exist",
            binary.display()
        )));
    }
    Ok(binary)
}
