/*!
Command modules for the `salt-step` CLI.

Layout:
  src/cmd/
    mod.rs      (this file: declarations + re-exports)
    mode.rs     (ModeArg enum + helpers)
    options.rs  (connection flags, step file, credential provider)
    run.rs      (RunArgs   + execute_run)
    check.rs    (CheckArgs + execute_check)
    format.rs   (color / box / table helpers for human output)

Conventions:
  - Each subcommand module exposes one public `execute_*` function
    returning `anyhow::Result<()>`.
  - Argument structs derive `clap::Args`.
  - Errors keep their `SaltError` / `RunError` type inside the anyhow
    chain so `main` can pick the exit code.
*/

pub mod check;
pub mod format;
pub mod mode;
pub mod options;
pub mod run;

pub use check::{CheckArgs, execute_check};
pub use run::{RunArgs, execute_run};
