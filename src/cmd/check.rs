/*!
`check.rs`

`salt-step check`: authenticate only and report which salt-api server
accepted the login. Nothing is dispatched.

JSON Success Output:
{ "status": "ok", "server": "https://salt.example:8000/", "auth": "pam", "elapsed_ms": 120 }
*/

use anyhow::{Context, Result};
use clap::Args;
use std::time::{Duration, Instant};

use salt_step::salt::{CredentialProvider, SaltError, ServerToken, authenticate, http_client};
use serde_json::json;

use super::format::{Role, StyleOptions, box_header, color, emoji};
use super::options::ConnectionArgs;

#[derive(Args, Debug, Clone)]
pub struct CheckArgs {
    #[command(flatten)]
    pub conn: ConnectionArgs,

    /// Output JSON
    #[arg(long)]
    pub json: bool,
}

pub fn execute_check(args: CheckArgs) -> Result<()> {
    let started = Instant::now();
    let file = match args.conn.step_file() {
        Ok(f) => f,
        Err(e) => return output_error(args.json, SaltError::config(format!("{e:#}"))),
    };
    let backend = args.conn.resolve_auth(&file);
    let provider = args.conn.credential_provider(&file);

    let rt = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
    let result = rt.block_on(async {
        let servers = args.conn.resolve_servers(&file)?;
        let creds = provider.credentials()?;
        let http = http_client(Duration::from_secs(10))?;
        authenticate(&http, &servers, &creds, &backend).await
    });
    let elapsed_ms = started.elapsed().as_millis();

    match result {
        Ok(token) => {
            print_success(&token, &backend, elapsed_ms, args.json);
            Ok(())
        }
        Err(e) => output_error(args.json, e),
    }
}

fn print_success(token: &ServerToken, backend: &str, elapsed_ms: u128, json: bool) {
    if json {
        let out = json!({
            "status": "ok",
            "server": token.server_url.as_str(),
            "auth": backend,
            "elapsed_ms": elapsed_ms,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&out).unwrap_or_else(|_| out.to_string())
        );
        return;
    }
    let style = StyleOptions::detect();
    let subtitle = format!("{} • eauth {backend} • {elapsed_ms} ms", token.server_url);
    println!(
        "{}",
        box_header(
            format!("{} Connection OK", emoji("success", &style)),
            Some(subtitle.as_str()),
            &style,
        )
    );
}

fn output_error(json: bool, err: SaltError) -> Result<()> {
    if json {
        let out = json!({"status": "error", "kind": err.kind(), "error": err.to_string()});
        println!(
            "{}",
            serde_json::to_string_pretty(&out).unwrap_or_else(|_| out.to_string())
        );
    } else {
        let style = StyleOptions::detect();
        let title = format!("{} Connection Failed", emoji("error", &style));
        let subtitle = color(Role::Error, err.to_string(), &style);
        println!("{}", box_header(title, Some(subtitle.as_str()), &style));
    }
    Err(err.into())
}
