/*!
options.rs - option plumbing shared by `run` and `check`.

Focus:
  - ConnectionArgs: servers / username / password file / eauth / step file
  - StepFile: JSON or YAML file whose keys fill options missing on the CLI
  - EnvCredentials: CredentialProvider backed by env vars or a password file

Precedence everywhere: CLI flag > step file > environment > default.
*/

use anyhow::{Context, Result};
use clap::Args;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use salt_step::salt::{CredentialProvider, Credentials, SaltError, parse_server_list};
use url::Url;

use crate::utils::env_non_empty;

pub const ENV_SERVER: &str = "SALT_API_URL";
pub const ENV_USERNAME: &str = "SALT_USERNAME";
pub const ENV_PASSWORD: &str = "SALT_PASSWORD";

/* ---- Argument Struct ---- */

#[derive(Args, Debug, Clone, Default)]
pub struct ConnectionArgs {
    /// salt-api base URL; repeat or comma-separate for failover (env SALT_API_URL)
    #[arg(short = 's', long = "server", value_name = "URL")]
    pub servers: Vec<String>,

    /// Login name (env SALT_USERNAME)
    #[arg(short = 'u', long)]
    pub username: Option<String>,

    /// Read the password from this file instead of SALT_PASSWORD
    #[arg(long = "password-file", value_name = "PATH")]
    pub password_file: Option<PathBuf>,

    /// External auth backend (eauth), e.g. pam, ldap, auto
    #[arg(long = "auth", value_name = "EAUTH")]
    pub auth: Option<String>,

    /// Step file (JSON or YAML). CLI flags override its entries
    #[arg(short = 'c', long = "config", value_name = "PATH")]
    pub config: Option<PathBuf>,
}

/* ---- Step File ---- */

/// Every option a pipeline step can carry in a file.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct StepFile {
    pub server: Option<String>,
    pub username: Option<String>,
    pub password_file: Option<PathBuf>,
    pub auth: Option<String>,
    pub mode: Option<String>,
    pub target: Option<String>,
    pub target_type: Option<String>,
    pub function: Option<String>,
    pub arguments: Option<String>,
    pub batch_size: Option<String>,
    pub batch_wait: Option<String>,
    pub subset: Option<String>,
    pub mods: Option<String>,
    pub pillar: Option<String>,
    pub tag: Option<String>,
    pub blocking: Option<bool>,
    pub poll_interval: Option<u64>,
    pub minion_timeout: Option<u64>,
    pub save_file: Option<bool>,
    pub save_env: Option<bool>,
}

/// Load a step file; `.yaml` / `.yml` are YAML, everything else JSON.
pub fn load_step_file(path: &Path) -> Result<StepFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read step file: {}", path.display()))?;
    let lower = path.to_string_lossy().to_ascii_lowercase();
    if lower.ends_with(".yaml") || lower.ends_with(".yml") {
        serde_yaml::from_str(&raw).context("failed to parse YAML step file")
    } else {
        serde_json::from_str(&raw).context("failed to parse JSON step file")
    }
}

impl ConnectionArgs {
    pub fn step_file(&self) -> Result<StepFile> {
        match &self.config {
            Some(path) => load_step_file(path),
            None => Ok(StepFile::default()),
        }
    }

    /// Server candidates in failover order.
    pub fn resolve_servers(&self, file: &StepFile) -> Result<Vec<Url>, SaltError> {
        let joined = if !self.servers.is_empty() {
            self.servers.join(",")
        } else if let Some(s) = file.server.clone() {
            s
        } else {
            env_non_empty(ENV_SERVER).ok_or_else(|| {
                SaltError::config(format!("no server specified (use --server or {ENV_SERVER})"))
            })?
        };
        parse_server_list(&joined)
    }

    pub fn resolve_auth(&self, file: &StepFile) -> String {
        self.auth
            .clone()
            .or_else(|| file.auth.clone())
            .unwrap_or_else(|| salt_step::salt::orchestrator::DEFAULT_AUTH_BACKEND.to_string())
    }

    pub fn credential_provider(&self, file: &StepFile) -> EnvCredentials {
        EnvCredentials {
            username: self.username.clone().or_else(|| file.username.clone()),
            password_file: self
                .password_file
                .clone()
                .or_else(|| file.password_file.clone()),
        }
    }
}

/* ---- Credentials ---- */

/// Resolves credentials lazily, at authentication time.
#[derive(Debug, Clone, Default)]
pub struct EnvCredentials {
    pub username: Option<String>,
    pub password_file: Option<PathBuf>,
}

impl CredentialProvider for EnvCredentials {
    fn credentials(&self) -> Result<Credentials, SaltError> {
        let username = self
            .username
            .clone()
            .filter(|u| !u.trim().is_empty())
            .or_else(|| env_non_empty(ENV_USERNAME))
            .ok_or_else(|| {
                SaltError::config(format!("no username (use --username or {ENV_USERNAME})"))
            })?;
        let password = match &self.password_file {
            Some(path) => std::fs::read_to_string(path)
                .map(|s| s.trim_end_matches(['\r', '\n']).to_string())
                .map_err(|e| {
                    SaltError::config(format!("cannot read password file {}: {e}", path.display()))
                })?,
            None => std::env::var(ENV_PASSWORD).map_err(|_| {
                SaltError::config(format!("no password (set {ENV_PASSWORD} or --password-file)"))
            })?,
        };
        Ok(Credentials::new(username, password))
    }
}

/* ---- Tests ---- */
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn yaml_step_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("step.yml");
        std::fs::write(
            &path,
            "server: https://salt.example:8000\nmode: batch\ntarget: 'web*'\nbatch_size: '10%'\nminion_timeout: 120\n",
        )
        .unwrap();
        let file = load_step_file(&path).unwrap();
        assert_eq!(file.mode.as_deref(), Some("batch"));
        assert_eq!(file.batch_size.as_deref(), Some("10%"));
        assert_eq!(file.minion_timeout, Some(120));
    }

    #[test]
    fn json_step_file_rejects_unknown_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("step.json");
        std::fs::write(&path, r#"{ "target": "*", "bogus": 1 }"#).unwrap();
        assert!(load_step_file(&path).is_err());
    }

    #[test]
    fn cli_servers_override_file() {
        let args = ConnectionArgs {
            servers: vec!["https://a.example".into(), "https://b.example".into()],
            ..Default::default()
        };
        let file = StepFile {
            server: Some("https://file.example".into()),
            ..Default::default()
        };
        let servers = args.resolve_servers(&file).unwrap();
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[0].host_str(), Some("a.example"));

        let servers = ConnectionArgs::default().resolve_servers(&file).unwrap();
        assert_eq!(servers[0].host_str(), Some("file.example"));
    }

    #[test]
    fn auth_defaults_to_pam() {
        let file = StepFile {
            auth: Some("ldap".into()),
            ..Default::default()
        };
        assert_eq!(ConnectionArgs::default().resolve_auth(&file), "ldap");
        assert_eq!(ConnectionArgs::default().resolve_auth(&StepFile::default()), "pam");
    }

    #[test]
    fn password_file_is_trimmed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pw");
        std::fs::write(&path, "hunter2\n").unwrap();
        let provider = EnvCredentials {
            username: Some("ci".into()),
            password_file: Some(path),
        };
        let creds = provider.credentials().unwrap();
        assert_eq!(creds.username(), "ci");
        assert!(!format!("{creds:?}").contains("hunter2"));
    }
}
