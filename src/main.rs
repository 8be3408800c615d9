use clap::{Parser, Subcommand};

mod cmd;
mod utils;

use cmd::{CheckArgs, RunArgs};
use salt_step::salt::{RunError, SaltError};

/// salt-step - run SaltStack jobs through salt-api as a pipeline step
///
/// Command layout:
///   salt-step run <local|batch|subset|runner|hook> [flags] [--json]
///   salt-step check [connection flags] [--json]
///
/// Global flags / env:
///   -v / -vv        Increase verbosity (RUST_LOG overrides)
///   -q / --quiet    Errors only
///   SALT_API_URL    Server fallback if -s not provided (comma list = failover)
///   SALT_USERNAME   Username fallback if -u not provided
///   SALT_PASSWORD   Password unless --password-file is given
///
/// Exit status:
///   0  success
///   1  run failed (authentication, transport, timeout, validation, cancel)
///   2  configuration error
///
/// Examples:
///   salt-step run local -s https://salt:8000 -u ci -t 'web*' -f cmd.run -a 'ls -la'
///   salt-step run batch -t 'G@role:web' --target-type compound --batch-size 10% -f state.apply
///   salt-step run runner -f state.orchestrate --mods deploy --pillar 'version=1.2'
///   salt-step run hook --tag deploy/done --post 'env=prod'
///   salt-step run --config step.yml --save-file --save-env
///   salt-step check -s https://salt-a:8000,https://salt-b:8000
#[derive(Parser, Debug)]
#[command(
    name = "salt-step",
    version,
    author,
    about = "salt-step - SaltStack salt-api jobs for build pipelines",
    propagate_version = true,
    disable_help_subcommand = true
)]
pub struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Silence all non-error output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one Salt job and validate every minion's result
    Run(Box<RunArgs>),

    /// Authenticate only and report the server that answered
    Check(CheckArgs),
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let level = utils::derive_level(cli.verbose, cli.quiet);
    utils::init_logging(level);

    let result = match cli.command {
        Commands::Run(args) => cmd::execute_run(*args),
        Commands::Check(args) => cmd::execute_check(args),
    };

    if let Err(err) = result {
        eprintln!("Error: {err:#}");
        std::process::exit(exit_code(&err));
    }
}

/// 2 for configuration problems, 1 for every other failure.
fn exit_code(err: &anyhow::Error) -> i32 {
    let source = match err.downcast_ref::<RunError>() {
        Some(run) => Some(&run.source),
        None => err.downcast_ref::<SaltError>(),
    };
    match source {
        Some(SaltError::Configuration(_)) => 2,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use salt_step::salt::RunState;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn exit_codes() {
        let config = anyhow::Error::from(SaltError::config("no server"));
        assert_eq!(exit_code(&config), 2);

        let building = anyhow::Error::from(RunError {
            state: RunState::Building,
            source: SaltError::config("mode requires a function"),
        });
        assert_eq!(exit_code(&building), 2);

        let validation = anyhow::Error::from(RunError {
            state: RunState::Validating,
            source: SaltError::Validation("web2 (retcode 1)".into()),
        });
        assert_eq!(exit_code(&validation), 1);

        assert_eq!(exit_code(&anyhow::anyhow!("boom")), 1);
    }

    #[test]
    fn parses_run_subcommand() {
        let cli = Cli::try_parse_from([
            "salt-step", "-v", "run", "batch", "-t", "web*", "-f", "test.ping", "--batch-size",
            "10%",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 1);
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.mode, Some(cmd::mode::ModeArg::Batch));
                assert_eq!(args.batch_size.as_deref(), Some("10%"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
