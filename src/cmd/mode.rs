/*!
Execution mode selector for `salt-step run <MODE>`.

Variants:
  local  (synchronous local client; blocking waits poll the job)
  batch  (local_batch)
  subset (local_subset)
  runner (master-side runner)
  hook   (reactor webhook)

Helpers:
  - variants()
  - from_str_ci()
  - is_targeted()
*/

use std::fmt;

/// Mode chosen on the command line (or `mode:` in a step file).
#[derive(clap::ValueEnum, Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ModeArg {
    /// Run a function on matched minions
    Local,
    /// Run on matched minions a batch at a time
    #[value(alias = "local_batch")]
    Batch,
    /// Run on a random subset of matched minions
    #[value(alias = "local_subset")]
    Subset,
    /// Run a master-side runner (e.g. state.orchestrate)
    Runner,
    /// POST an event to /hook/<tag>
    Hook,
}

impl ModeArg {
    pub const fn variants() -> &'static [ModeArg] {
        &[
            ModeArg::Local,
            ModeArg::Batch,
            ModeArg::Subset,
            ModeArg::Runner,
            ModeArg::Hook,
        ]
    }

    /// Case-insensitive parser for step-file values (accepts client names too).
    pub fn from_str_ci(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Some(ModeArg::Local),
            "batch" | "local_batch" => Some(ModeArg::Batch),
            "subset" | "local_subset" => Some(ModeArg::Subset),
            "runner" => Some(ModeArg::Runner),
            "hook" => Some(ModeArg::Hook),
            _ => None,
        }
    }

    /// Whether the mode needs `--target`.
    pub fn is_targeted(&self) -> bool {
        matches!(self, ModeArg::Local | ModeArg::Batch | ModeArg::Subset)
    }
}

impl fmt::Display for ModeArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ModeArg::Local => "local",
            ModeArg::Batch => "batch",
            ModeArg::Subset => "subset",
            ModeArg::Runner => "runner",
            ModeArg::Hook => "hook",
        };
        f.write_str(s)
    }
}
