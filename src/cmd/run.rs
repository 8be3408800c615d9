/*!
`run.rs`

Implements `salt-step run <MODE>`: one pipeline step against salt-api.

Flow:
  1. Merge CLI flags with the optional step file (`--config`)
  2. Build the ExecutionMode + RunConfig
  3. `--dry-run`: print the request that would be sent and stop
  4. Otherwise start the run on a tokio runtime; Ctrl-C cancels it
  5. Render the outcome (box header + per-minion table, or JSON)

Side effects on success (opt-in):
  --save-file   <workspace>/saltOutput.json
  --save-env    SALTBUILDOUTPUT=<raw json> appended to --env-file
                (default <workspace>/salt-step.env)

JSON Success Output:
{
  "status": "ok",
  "mode": "local",
  "server": "https://salt.example:8000/",
  "function": "cmd.run",
  "target": "web*",
  "elapsed_ms": 812,
  "saved_file": null,
  "results": [ { "minion_id": "web1", "retcode": 0, "return_value": ... } ],
  "return": [ ...raw salt-api return array... ]
}

JSON Error Output:
{
  "status": "error",
  "state": "validating",
  "kind": "validation",
  "error": "message",
  "partial": [ ... ]
}
*/

use anyhow::{Context, Result};
use clap::Args;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use salt_step::salt::dispatch::{DEFAULT_MINION_TIMEOUT, DEFAULT_POLL_INTERVAL};
use salt_step::salt::mode::{DEFAULT_BATCH_SIZE, DEFAULT_SUBSET};
use salt_step::salt::{
    DispatchOptions, Endpoint, ExecutionMode, ExecutionRequest, MinionResult, Orchestrator,
    RunConfig, RunError, RunReport, SaltError, StepHost, Target, TargetType, build_request,
    http_client,
};
use serde_json::json;
use tracing::{debug, warn};

use super::format::{Role, StyleOptions, box_header, color, emoji, minion_rows, table};
use super::mode::ModeArg;
use super::options::{ConnectionArgs, StepFile};

/// Default name of the env file written by `--save-env`.
pub const DEFAULT_ENV_FILE: &str = "salt-step.env";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/* ---- Argument Struct ---- */

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Execution mode (falls back to `mode:` in the step file)
    #[arg(value_enum)]
    pub mode: Option<ModeArg>,

    #[command(flatten)]
    pub conn: ConnectionArgs,

    /// Target expression for local / batch / subset
    #[arg(short = 't', long)]
    pub target: Option<String>,

    /// How the target is matched (glob, pcre, list, grain, compound, ...)
    #[arg(long = "target-type", value_name = "TYPE")]
    pub target_type: Option<String>,

    /// Salt function, e.g. cmd.run or state.orchestrate
    #[arg(short = 'f', long)]
    pub function: Option<String>,

    /// Argument string: positional words and key=value pairs
    #[arg(short = 'a', long, allow_hyphen_values = true)]
    pub arguments: Option<String>,

    /// Batch size for batch mode (default 100%)
    #[arg(long = "batch-size")]
    pub batch_size: Option<String>,

    /// Seconds to wait between batches
    #[arg(long = "batch-wait")]
    pub batch_wait: Option<String>,

    /// Number of minions for subset mode (default 1)
    #[arg(long)]
    pub subset: Option<String>,

    /// Runner mods (e.g. the orchestrate SLS)
    #[arg(long)]
    pub mods: Option<String>,

    /// Runner pillar as key=value pairs or JSON
    #[arg(long)]
    pub pillar: Option<String>,

    /// Event tag for hook mode
    #[arg(long)]
    pub tag: Option<String>,

    /// Hook payload as key=value pairs
    #[arg(long, allow_hyphen_values = true)]
    pub post: Option<String>,

    /// Return as soon as salt-api accepts the request
    #[arg(long = "no-block")]
    pub no_block: bool,

    /// Seconds between job lookups while blocking (default 10)
    #[arg(long = "poll-interval", value_name = "SECS")]
    pub poll_interval: Option<u64>,

    /// Seconds to wait for minions while blocking (default 30)
    #[arg(long = "minion-timeout", value_name = "SECS")]
    pub minion_timeout: Option<u64>,

    /// Write the raw return to <workspace>/saltOutput.json on success
    #[arg(long = "save-file")]
    pub save_file: bool,

    /// Export the raw return as SALTBUILDOUTPUT into --env-file on success
    #[arg(long = "save-env")]
    pub save_env: bool,

    /// Workspace directory (default: current directory)
    #[arg(long, value_name = "DIR")]
    pub workspace: Option<PathBuf>,

    /// File receiving exported variables (default <workspace>/salt-step.env)
    #[arg(long = "env-file", value_name = "PATH")]
    pub env_file: Option<PathBuf>,

    /// Print the request that would be sent, then exit
    #[arg(long = "dry-run")]
    pub dry_run: bool,

    /// Output JSON
    #[arg(long)]
    pub json: bool,
}

/* ---- Public Entry Point ---- */

pub fn execute_run(args: RunArgs) -> Result<()> {
    let file = match args.conn.step_file() {
        Ok(f) => f,
        Err(e) => return output_error(args.json, SaltError::config(format!("{e:#}")).into()),
    };

    let mode = match resolve_mode(&args, &file) {
        Ok(m) => m,
        Err(e) => return output_error(args.json, e.into()),
    };
    let function = pick(&args.function, &file.function).unwrap_or_default();
    let arguments = match resolve_arguments(&args, &file, &mode) {
        Ok(a) => a,
        Err(e) => return output_error(args.json, e.into()),
    };

    if args.dry_run {
        return match build_request(&mode, &function, &arguments) {
            Ok(request) => {
                print_dry_run(&request, args.json);
                Ok(())
            }
            Err(e) => output_error(args.json, e.into()),
        };
    }

    let config = match resolve_run_config(&args, &file, mode, function, arguments) {
        Ok(c) => c,
        Err(e) => return output_error(args.json, e.into()),
    };
    let workspace = match &args.workspace {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().context("cannot determine current directory")?,
    };
    let env_file = args
        .env_file
        .clone()
        .unwrap_or_else(|| workspace.join(DEFAULT_ENV_FILE));

    let host = Arc::new(ConsoleHost {
        workspace,
        env_file,
        style: StyleOptions::detect(),
        json: args.json,
    });
    let credentials = Arc::new(args.conn.credential_provider(&file));
    let mode_name = config.mode.name();

    let rt = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
    let result = rt.block_on(async {
        let http = http_client(CONNECT_TIMEOUT)?;
        let handle = Orchestrator::new(http).start(config, credentials, host);

        let signal = handle.cancel_signal();
        let interrupt = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received; cancelling run");
                signal.cancel();
            }
        });
        let result = handle.wait().await;
        interrupt.abort();
        Ok::<_, SaltError>(result)
    });

    match result {
        Ok(Ok(report)) => {
            print_report(mode_name, &report, args.json);
            Ok(())
        }
        Ok(Err(err)) => output_run_error(args.json, err),
        Err(e) => output_error(args.json, e.into()),
    }
}

/* ---- Option Resolution ---- */

fn pick<T: Clone>(cli: &Option<T>, file: &Option<T>) -> Option<T> {
    cli.clone().or_else(|| file.clone())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

fn resolve_mode(args: &RunArgs, file: &StepFile) -> Result<ExecutionMode, SaltError> {
    let mode = match (args.mode, file.mode.as_deref()) {
        (Some(m), _) => m,
        (None, Some(raw)) => ModeArg::from_str_ci(raw).ok_or_else(|| {
            let names: Vec<String> = ModeArg::variants().iter().map(|m| m.to_string()).collect();
            SaltError::config(format!(
                "unknown mode '{raw}' (expected one of: {})",
                names.join(", ")
            ))
        })?,
        (None, None) => {
            return Err(SaltError::config(
                "no mode given (local, batch, subset, runner or hook)",
            ));
        }
    };

    if !mode.is_targeted() && pick(&args.target, &file.target).is_some() {
        warn!("--target is ignored in {} mode", mode);
    }

    let target = || -> Result<Target, SaltError> {
        let target_type: TargetType = pick(&args.target_type, &file.target_type)
            .as_deref()
            .unwrap_or(TargetType::Glob.as_str())
            .parse()?;
        let expression = pick(&args.target, &file.target).unwrap_or_default();
        Ok(Target::new(expression, target_type))
    };

    let mode = match mode {
        ModeArg::Local => ExecutionMode::Local { target: target()? },
        ModeArg::Batch => ExecutionMode::LocalBatch {
            target: target()?,
            batch_size: pick(&args.batch_size, &file.batch_size)
                .unwrap_or_else(|| DEFAULT_BATCH_SIZE.to_string()),
            batch_wait: non_empty(pick(&args.batch_wait, &file.batch_wait)),
        },
        ModeArg::Subset => ExecutionMode::LocalSubset {
            target: target()?,
            subset: pick(&args.subset, &file.subset).unwrap_or_else(|| DEFAULT_SUBSET.to_string()),
        },
        ModeArg::Runner => ExecutionMode::Runner {
            mods: non_empty(pick(&args.mods, &file.mods)),
            pillar: non_empty(pick(&args.pillar, &file.pillar)),
        },
        ModeArg::Hook => ExecutionMode::Hook {
            tag: pick(&args.tag, &file.tag).unwrap_or_default(),
        },
    };
    mode.validate()?;
    Ok(mode)
}

/// Hooks take their payload from `--post`; every other mode from `--arguments`.
fn resolve_arguments(
    args: &RunArgs,
    file: &StepFile,
    mode: &ExecutionMode,
) -> Result<String, SaltError> {
    let is_hook = matches!(mode, ExecutionMode::Hook { .. });
    if args.post.is_some() && !is_hook {
        return Err(SaltError::config("--post only applies to hook mode"));
    }
    let cli = if is_hook {
        args.post.clone().or_else(|| args.arguments.clone())
    } else {
        args.arguments.clone()
    };
    Ok(cli.or_else(|| file.arguments.clone()).unwrap_or_default())
}

fn resolve_run_config(
    args: &RunArgs,
    file: &StepFile,
    mode: ExecutionMode,
    function: String,
    arguments: String,
) -> Result<RunConfig, SaltError> {
    let seconds = |cli: Option<u64>, file: Option<u64>, default: Duration, what: &str| {
        match cli.or(file) {
            Some(0) => Err(SaltError::config(format!("{what} must be at least 1 second"))),
            Some(s) => Ok(Duration::from_secs(s)),
            None => Ok(default),
        }
    };

    let mut config = RunConfig::new(args.conn.resolve_servers(file)?, mode, function)
        .with_arguments(arguments);
    config.auth_backend = args.conn.resolve_auth(file);
    config.dispatch = DispatchOptions {
        blocking: !args.no_block && file.blocking.unwrap_or(true),
        poll_interval: seconds(
            args.poll_interval,
            file.poll_interval,
            DEFAULT_POLL_INTERVAL,
            "poll interval",
        )?,
        minion_timeout: seconds(
            args.minion_timeout,
            file.minion_timeout,
            DEFAULT_MINION_TIMEOUT,
            "minion timeout",
        )?,
    };
    config.save_file = args.save_file || file.save_file.unwrap_or(false);
    config.save_env = args.save_env || file.save_env.unwrap_or(false);
    Ok(config)
}

/* ---- Step Host ---- */

/// Console-backed host: build log on stdout (stderr with --json),
/// variables appended to an env file.
struct ConsoleHost {
    workspace: PathBuf,
    env_file: PathBuf,
    style: StyleOptions,
    json: bool,
}

impl StepHost for ConsoleHost {
    fn log(&self, line: &str) {
        if self.json {
            eprintln!("{line}");
        } else {
            println!("{} {line}", color(Role::Dim, "[salt]", &self.style));
        }
    }

    fn workspace(&self) -> Option<&Path> {
        Some(&self.workspace)
    }

    fn export_variable(&self, key: &str, value: &str) -> Result<(), SaltError> {
        append_variable(&self.env_file, key, value)?;
        debug!("Exported {} to {}", key, self.env_file.display());
        Ok(())
    }
}

fn append_variable(path: &Path, key: &str, value: &str) -> std::io::Result<()> {
    let mut f = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(f, "{key}={value}")
}

/* ---- Output Helpers ---- */

fn endpoint_path(request: &ExecutionRequest) -> String {
    match request.endpoint() {
        Endpoint::Run => "/".to_string(),
        Endpoint::Hook(tag) => format!("/hook/{tag}"),
    }
}

fn print_dry_run(request: &ExecutionRequest, json: bool) {
    if json {
        let out = json!({
            "status": "ok",
            "dry_run": true,
            "endpoint": endpoint_path(request),
            "request": request.to_json(),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&out).unwrap_or_else(|_| out.to_string())
        );
        return;
    }
    let style = StyleOptions::detect();
    println!(
        "{}",
        box_header(
            format!("{} Dry Run", emoji("info", &style)),
            Some(format!("POST {}", endpoint_path(request)).as_str()),
            &style,
        )
    );
    let body = request.to_json();
    println!(
        "{}",
        serde_json::to_string_pretty(&body).unwrap_or_else(|_| body.to_string())
    );
}

fn print_report(mode: &str, report: &RunReport, json: bool) {
    let elapsed_ms = report.elapsed.as_millis();
    if json {
        let out = json!({
            "status": "ok",
            "mode": mode,
            "server": report.server_url.as_str(),
            "function": report.request.function(),
            "target": report.request.target_label(),
            "elapsed_ms": elapsed_ms,
            "saved_file": report.saved_file.as_ref().map(|p| p.display().to_string()),
            "results": report.outcome.results,
            "return": report.outcome.raw,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&out).unwrap_or_else(|_| out.to_string())
        );
        return;
    }

    let style = StyleOptions::detect();
    let subtitle = format!(
        "{mode} • {} • {elapsed_ms} ms",
        report.request.target_label()
    );
    println!(
        "{}",
        box_header(
            format!("{} Run Succeeded", emoji("success", &style)),
            Some(subtitle.as_str()),
            &style,
        )
    );
    print_minions(&report.outcome.results, &style);
    println!(
        "{} {}",
        emoji("info", &style),
        color(Role::Dim, format!("server: {}", report.server_url), &style)
    );
    if let Some(path) = &report.saved_file {
        println!(
            "{} {}",
            emoji("info", &style),
            color(Role::Dim, format!("output: {}", path.display()), &style)
        );
    }
}

fn print_minions(results: &[MinionResult], style: &StyleOptions) {
    if results.is_empty() {
        return;
    }
    let rows = minion_rows(results, style);
    println!("{}", table(&["MINION", "RETCODE", "RETURN"], &rows, style));
    println!();
}

fn output_run_error(json: bool, err: RunError) -> Result<()> {
    if json {
        let out = json!({
            "status": "error",
            "state": err.state.as_str(),
            "kind": err.source.kind(),
            "error": err.source.to_string(),
            "partial": err.partial(),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&out).unwrap_or_else(|_| out.to_string())
        );
    } else {
        let style = StyleOptions::detect();
        let title = format!("{} Run Failed ({})", emoji("error", &style), err.state);
        println!(
            "{}",
            box_header(
                title,
                Some(color(Role::Error, err.source.to_string(), &style).as_str()),
                &style,
            )
        );
        print_minions(err.partial(), &style);
    }
    Err(err.into())
}

fn output_error(json: bool, err: anyhow::Error) -> Result<()> {
    if json {
        let out = json!({"status": "error", "error": format!("{err:#}")});
        println!(
            "{}",
            serde_json::to_string_pretty(&out).unwrap_or_else(|_| out.to_string())
        );
    } else {
        let style = StyleOptions::detect();
        let title = format!("{} Run Error", emoji("error", &style));
        let subtitle = color(Role::Error, format!("{err:#}"), &style);
        println!("{}", box_header(title, Some(subtitle.as_str()), &style));
        println!(
            "{} {}",
            emoji("info", &style),
            color(Role::Dim, "Use --dry-run to inspect the request.", &style)
        );
    }
    Err(err)
}

/* ---- Tests ---- */
