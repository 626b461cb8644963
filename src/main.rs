//! crashrepro CLI entrypoint.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use std::path::PathBuf;
use std::process::ExitCode;

use crashrepro::{
    AttemptTimeout, CancelToken, Config, ExitStatus, HttpSignatureExtractor, ReproError, ReproSummary,
    ReproduceOptions, ReproducerKind, RetryBackoff,
};

#[derive(Debug, Parser)]
#[command(name = "crashrepro")]
#[command(about = "reproduce fuzzer-found crash testcases locally and check them against the recorded signature")]
struct Cli {
    /// Path to config file. Missing configs are treated as "defaults".
    #[arg(long, global = true, default_value = "crashrepro.toml")]
    config: PathBuf,

    /// Log level.
    #[arg(long, global = true, default_value = "info")]
    log: String,

    /// Machine-readable output to stdout (JSON).
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Re-run a cached testcase until its crash signature matches the recorded one
    Reproduce {
        testcase_id: String,

        /// Directory holding testcase.json and the input (default: <base_dir>/testcases/<id>_testcase).
        #[arg(long)]
        testcase_dir: Option<PathBuf>,

        /// Target binary.
        #[arg(long, conflicts_with = "build_dir")]
        binary: Option<PathBuf>,

        /// Build output directory; the job's `binary` is looked up inside it.
        #[arg(long)]
        build_dir: Option<PathBuf>,

        /// Source checkout, used to symbolize GUI target output.
        #[arg(long)]
        source: Option<PathBuf>,

        /// Maximum attempts.
        #[arg(long)]
        iterations: Option<u32>,

        /// Run GUI targets on the host display instead of a virtual one.
        #[arg(long)]
        disable_xvfb: bool,

        /// Extra arguments appended to the recorded ones.
        #[arg(long, default_value = "", allow_hyphen_values = true)]
        target_args: String,

        /// Reproducer flavor (overrides the job definition).
        #[arg(long)]
        flavor: Option<ReproducerKind>,

        /// Sanitizer tag, e.g. ASAN (overrides the job definition).
        #[arg(long)]
        sanitizer: Option<String>,

        /// Per-attempt wall-clock limit, e.g. 30s or 1m30s (bare numbers are seconds).
        #[arg(long)]
        timeout: Option<AttemptTimeout>,

        /// Pause between attempts (0 retries immediately).
        #[arg(long)]
        backoff: Option<RetryBackoff>,
    },

    /// Print host tool and resource availability
    Env,

    /// Print version and build info
    Version,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = init_tracing(&cli.log) {
        // Tracing is best-effort; if it fails, we still continue.
        eprintln!("warning: failed to init tracing: {err:#}");
    }

    let config = Config::load_optional(&cli.config);

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    if let Err(err) = ctrlc::set_handler(move || handler_token.cancel()) {
        tracing::warn!("failed to install Ctrl+C handler: {err}");
    }

    match run_command(&cli, &config, &cancel) {
        Ok(code) => code,
        Err(err) => print_error_and_exit(&cli, err),
    }
}

fn init_tracing(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))?;
    Ok(())
}

fn run_command(cli: &Cli, config: &Config, cancel: &CancelToken) -> anyhow::Result<ExitCode> {
    match &cli.command {
        Command::Reproduce {
            testcase_id,
            testcase_dir,
            binary,
            build_dir,
            source,
            iterations,
            disable_xvfb,
            target_args,
            flavor,
            sanitizer,
            timeout,
            backoff,
        } => {
            let extractor = HttpSignatureExtractor::new(config.signature_url.clone());
            let summary = crashrepro::reproduce(
                config,
                &ReproduceOptions {
                    testcase_id: testcase_id.clone(),
                    testcase_dir: testcase_dir.clone(),
                    binary: binary.clone(),
                    build_dir: build_dir.clone(),
                    source_dir: source.clone(),
                    iterations: *iterations,
                    disable_xvfb: *disable_xvfb,
                    target_args: target_args.clone(),
                    flavor: *flavor,
                    sanitizer: sanitizer.clone(),
                    timeout: timeout.map(|d| d.0),
                    backoff: backoff.map(|d| d.0),
                },
                &extractor,
                cancel,
            )?;
            print_summary(cli, &summary)?;
            Ok(exit_code_for_status(summary.status))
        }

        Command::Env => {
            let info = crashrepro::env_info(config);
            if cli.json {
                print_json_or_text(cli, &info)?;
            } else {
                println!("{}", info.pretty());
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::Version => {
            let info = crashrepro::version_info();
            print_json_or_text(cli, &info)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn print_summary(cli: &Cli, summary: &ReproSummary) -> anyhow::Result<()> {
    if cli.json {
        print_json_or_text(cli, summary)?;
    } else {
        println!("{}", summary.pretty());
    }
    Ok(())
}

fn print_json_or_text<T: serde::Serialize>(cli: &Cli, value: &T) -> anyhow::Result<()> {
    if cli.json {
        println!("{}", serde_json::to_string(value)?);
    } else {
        println!("{}", serde_json::to_string_pretty(value)?);
    }
    Ok(())
}

fn print_error_and_exit(cli: &Cli, err: anyhow::Error) -> ExitCode {
    let status = match err.downcast_ref::<ReproError>() {
        Some(ReproError::Cancelled) => ExitStatus::Cancelled,
        Some(e) if e.is_installation_error() => ExitStatus::MissingTool,
        _ => ExitStatus::Error,
    };
    let msg = format!("{err:#}");
    if cli.json {
        let out = serde_json::json!({
            "status": status,
            "code": if status == ExitStatus::Error { "error" } else { "failure" },
            "message": msg,
        });
        println!("{out}");
    } else {
        eprintln!("{msg}");
    }
    exit_code_for_status(status)
}

fn exit_code_for_status(status: ExitStatus) -> ExitCode {
    match status {
        ExitStatus::Reproduced => ExitCode::SUCCESS,
        ExitStatus::NotReproduced => ExitCode::from(1),
        ExitStatus::Error => ExitCode::from(2),
        ExitStatus::MissingTool => ExitCode::from(3),
        ExitStatus::Cancelled => ExitCode::from(130),
    }
}
