//! Execution modes (salt-api "clients").
//!
//! Each variant owns its options and contributes its own request fields;
//! the common `client` / target / `fun` / `arg` / `kwarg` assembly lives in
//! `request::build_request`.

use std::fmt;
use std::str::FromStr;

use serde_json::{Map, Value};

use super::args::parse_keywords;
use super::error::{Result, SaltError};

pub const DEFAULT_BATCH_SIZE: &str = "100%";
pub const DEFAULT_SUBSET: &str = "1";

/// Minion matching strategy sent as `expr_form`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TargetType {
    #[default]
    Glob,
    Pcre,
    List,
    Grain,
    GrainPcre,
    Pillar,
    PillarPcre,
    Nodegroup,
    Range,
    Compound,
    Ipcidr,
}

impl TargetType {
    pub const fn variants() -> &'static [TargetType] {
        &[
            TargetType::Glob,
            TargetType::Pcre,
            TargetType::List,
            TargetType::Grain,
            TargetType::GrainPcre,
            TargetType::Pillar,
            TargetType::PillarPcre,
            TargetType::Nodegroup,
            TargetType::Range,
            TargetType::Compound,
            TargetType::Ipcidr,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TargetType::Glob => "glob",
            TargetType::Pcre => "pcre",
            TargetType::List => "list",
            TargetType::Grain => "grain",
            TargetType::GrainPcre => "grain_pcre",
            TargetType::Pillar => "pillar",
            TargetType::PillarPcre => "pillar_pcre",
            TargetType::Nodegroup => "nodegroup",
            TargetType::Range => "range",
            TargetType::Compound => "compound",
            TargetType::Ipcidr => "ipcidr",
        }
    }
}

impl FromStr for TargetType {
    type Err = SaltError;

    fn from_str(s: &str) -> Result<Self> {
        let norm = s.trim().to_ascii_lowercase();
        TargetType::variants()
            .iter()
            .copied()
            .find(|t| t.as_str() == norm)
            .ok_or_else(|| SaltError::config(format!("unknown target type '{s}'")))
    }
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Target expression plus how to match it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub expression: String,
    pub target_type: TargetType,
}

impl Target {
    pub fn new(expression: impl Into<String>, target_type: TargetType) -> Self {
        Self {
            expression: expression.into(),
            target_type,
        }
    }
}

/// The closed set of supported job submission modes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionMode {
    Local {
        target: Target,
    },
    LocalBatch {
        target: Target,
        /// Absolute count or percentage, passed through as given.
        batch_size: String,
        batch_wait: Option<String>,
    },
    LocalSubset {
        target: Target,
        subset: String,
    },
    Runner {
        mods: Option<String>,
        pillar: Option<String>,
    },
    /// Fire a reactor event through `/hook/<tag>`.
    Hook {
        tag: String,
    },
}

impl ExecutionMode {
    /// Value of the request's `client` field; hooks have none.
    pub fn client(&self) -> Option<&'static str> {
        match self {
            ExecutionMode::Local { .. } => Some("local"),
            ExecutionMode::LocalBatch { .. } => Some("local_batch"),
            ExecutionMode::LocalSubset { .. } => Some("local_subset"),
            ExecutionMode::Runner { .. } => Some("runner"),
            ExecutionMode::Hook { .. } => None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.client().unwrap_or("hook")
    }

    /// Minion target for target-based modes.
    pub fn target(&self) -> Option<&Target> {
        match self {
            ExecutionMode::Local { target }
            | ExecutionMode::LocalBatch { target, .. }
            | ExecutionMode::LocalSubset { target, .. } => Some(target),
            ExecutionMode::Runner { .. } | ExecutionMode::Hook { .. } => None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(target) = self.target()
            && target.expression.trim().is_empty()
        {
            return Err(SaltError::config(format!(
                "{} mode requires a target",
                self.name()
            )));
        }
        match self {
            ExecutionMode::LocalBatch { batch_size, .. } if batch_size.trim().is_empty() => {
                Err(SaltError::config("batch size cannot be empty"))
            }
            ExecutionMode::LocalSubset { subset, .. } if subset.trim().is_empty() => {
                Err(SaltError::config("subset cannot be empty"))
            }
            ExecutionMode::Hook { tag } if tag.trim().is_empty() => {
                Err(SaltError::config("hook mode requires a tag"))
            }
            _ => Ok(()),
        }
    }

    /// Insert the fields only this mode carries.
    pub(crate) fn apply_fields(&self, body: &mut Map<String, Value>) -> Result<()> {
        match self {
            ExecutionMode::Local { .. } | ExecutionMode::Hook { .. } => {}
            ExecutionMode::LocalBatch {
                batch_size,
                batch_wait,
                ..
            } => {
                body.insert("batch".into(), Value::String(batch_size.trim().to_string()));
                if let Some(wait) = batch_wait.as_deref().map(str::trim)
                    && !wait.is_empty()
                {
                    body.insert("batch_wait".into(), Value::String(wait.to_string()));
                }
            }
            ExecutionMode::LocalSubset { subset, .. } => {
                let subset = subset.trim();
                let sub = subset
                    .parse::<u64>()
                    .map(|n| Value::Number(n.into()))
                    .unwrap_or_else(|_| Value::String(subset.to_string()));
                body.insert("sub".into(), sub);
            }
            ExecutionMode::Runner { mods, pillar } => {
                if let Some(mods) = mods.as_deref().map(str::trim)
                    && !mods.is_empty()
                {
                    body.insert("mods".into(), Value::String(mods.to_string()));
                }
                if let Some(pillar) = pillar.as_deref().map(str::trim)
                    && !pillar.is_empty()
                {
                    let data = parse_keywords(pillar)
                        .map_err(|e| SaltError::config(format!("invalid pillar: {e}")))?;
                    body.insert("pillar".into(), Value::Object(data));
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.target() {
            Some(t) => write!(f, "{} ({} {})", self.name(), t.target_type, t.expression),
            None => f.write_str(self.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_type_parse_case_insensitive() {
        assert_eq!(" GLOB ".parse::<TargetType>().unwrap(), TargetType::Glob);
        assert_eq!("grain_pcre".parse::<TargetType>().unwrap(), TargetType::GrainPcre);
        assert!("bogus".parse::<TargetType>().is_err());
    }

    #[test]
    fn client_names() {
        let target = Target::new("*", TargetType::Glob);
        assert_eq!(ExecutionMode::Local { target: target.clone() }.client(), Some("local"));
        assert_eq!(
            ExecutionMode::LocalSubset {
                target,
                subset: "2".into()
            }
            .client(),
            Some("local_subset")
        );
        assert_eq!(ExecutionMode::Hook { tag: "t".into() }.client(), None);
        assert_eq!(ExecutionMode::Hook { tag: "t".into() }.name(), "hook");
    }

    #[test]
    fn validate_rejects_blank_target_and_batch() {
        let mode = ExecutionMode::Local {
            target: Target::new("  ", TargetType::Glob),
        };
        assert!(mode.validate().is_err());

        let mode = ExecutionMode::LocalBatch {
            target: Target::new("web*", TargetType::Glob),
            batch_size: "".into(),
            batch_wait: None,
        };
        assert!(mode.validate().is_err());
    }

    #[test]
    fn subset_numeric_becomes_integer() {
        let mode = ExecutionMode::LocalSubset {
            target: Target::new("*", TargetType::Glob),
            subset: "3".into(),
        };
        let mut body = Map::new();
        mode.apply_fields(&mut body).unwrap();
        assert_eq!(body.get("sub"), Some(&Value::from(3u64)));
    }

    #[test]
    fn runner_pillar_must_be_keywords() {
        let mode = ExecutionMode::Runner {
            mods: Some("deploy".into()),
            pillar: Some("loose".into()),
        };
        let mut body = Map::new();
        let err = mode.apply_fields(&mut body).unwrap_err();
        assert!(err.to_string().contains("invalid pillar"));
    }

    #[test]
    fn display_includes_target() {
        let mode = ExecutionMode::Local {
            target: Target::new("db*", TargetType::Glob),
        };
        assert_eq!(mode.to_string(), "local (glob db*)");
    }
}
