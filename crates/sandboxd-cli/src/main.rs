// crates/sandboxd-cli/src/main.rs

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueHint};
use log::info;
use sandboxd::result::JobRequest;
use sandboxd::{run_in_sandbox, Interpreted, Limits, Settings};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one job's entry script inside a fresh sandbox.
    Run {
        /// Job id; resolved under settings.jobs_dir.
        #[arg(long, required = true)]
        job: String,
        /// Entry script, relative to the job directory.
        #[arg(long, default_value = "main.py")]
        entry: String,
        /// Overrides settings.defaults.timeout_s.
        #[arg(long)]
        timeout: Option<u64>,
        #[arg(long)]
        noexec_work: bool,
        #[arg(long)]
        enable_loopback: bool,
        #[arg(long)]
        bind_full_etc: bool,
        /// Path to sandbox.yaml; falls back to $SANDBOX_CONF or conf/sandbox.yaml.
        #[arg(long, value_hint = ValueHint::FilePath)]
        conf: Option<PathBuf>,
        /// Path to limits.yaml; a missing file disables cgroup limits.
        #[arg(long, default_value = "conf/limits.yaml", value_hint = ValueHint::FilePath)]
        limits: PathBuf,
    },
}

fn main() -> ExitCode {
    env_logger::init();

    let args = Cli::parse();
    match args.command {
        Commands::Run {
            job,
            entry,
            timeout,
            noexec_work,
            enable_loopback,
            bind_full_etc,
            conf,
            limits,
        } => run(job, entry, timeout, noexec_work, enable_loopback, bind_full_etc, conf, limits),
    }
}

#[allow(clippy::too_many_arguments)]
fn run(
    job_id: String,
    entry: String,
    timeout: Option<u64>,
    noexec_work: bool,
    enable_loopback: bool,
    bind_full_etc: bool,
    conf: Option<PathBuf>,
    limits_path: PathBuf,
) -> ExitCode {
    let settings = match Settings::load(conf.as_deref()) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("sandboxd: {e}");
            return ExitCode::from(1);
        }
    };
    let limits = match Limits::load(&limits_path) {
        Ok(l) => l,
        Err(e) => {
            eprintln!("sandboxd: {e}");
            return ExitCode::from(1);
        }
    };

    // CLI flag wins over the settings file's defaults, matching the
    // original CLI's precedence rule.
    let job = JobRequest {
        job_dir: settings.jobs_dir.join(&job_id),
        entry,
        timeout_s: timeout.unwrap_or(settings.defaults.timeout_s),
        noexec_work: noexec_work || settings.defaults.noexec_work,
        enable_loopback: enable_loopback || settings.defaults.enable_loopback,
        bind_full_etc: bind_full_etc || settings.defaults.bind_full_etc,
    };

    info!("running job {job_id}");
    let runner = Interpreted::python3();
    let result = run_in_sandbox(&job, &settings.rootfs, &limits, &runner);

    let rendered = serde_json::to_string_pretty(&result)
        .unwrap_or_else(|e| format!(r#"{{"status":"error","stderr":"failed to render result: {e}"}}"#));
    println!("{rendered}");

    ExitCode::from(result.exit_code() as u8)
}
