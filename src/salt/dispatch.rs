//! Job submission and the blocking wait for minion returns.
//!
//! Non-blocking: POST `/` and hand back whatever `return` holds.
//! Blocking `local`: submit via `/minions` (salt-api runs it as
//! `local_async`), then poll `/jobs/<jid>` until every expected minion
//! answered or the minion timeout passes. Other blocking modes rely on the
//! synchronous client and are bounded by the same timeout.

use std::collections::HashSet;
use std::time::Duration;

use reqwest::Client;
use serde_json::{Map, Value, json};
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, info, warn};

use super::auth::ServerToken;
use super::endpoint_url;
use super::error::{Result, SaltError};
use super::request::{Endpoint, ExecutionRequest};
use super::result::{MinionResult, collect_minion_results, derive_retcode};

pub const AUTH_HEADER: &str = "X-Auth-Token";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_MINION_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchOptions {
    pub blocking: bool,
    pub poll_interval: Duration,
    pub minion_timeout: Duration,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            blocking: true,
            poll_interval: DEFAULT_POLL_INTERVAL,
            minion_timeout: DEFAULT_MINION_TIMEOUT,
        }
    }
}

/// What came back from salt-api for one dispatched request.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchResponse {
    /// The `return` array, verbatim for synchronous submissions.
    pub raw: Value,
    pub results: Vec<MinionResult>,
}

/// Send `request` and, when blocking, wait for the minions.
pub async fn dispatch(
    http: &Client,
    token: &ServerToken,
    request: &ExecutionRequest,
    options: &DispatchOptions,
) -> Result<DispatchResponse> {
    let started = Instant::now();
    match request.endpoint() {
        Endpoint::Hook(tag) => {
            let reply = bounded(
                options,
                started,
                request,
                post_json(http, token, &format!("hook/{tag}"), request.body()),
            )
            .await?;
            let replies = vec![reply];
            let results = collect_minion_results(None, &replies);
            Ok(DispatchResponse {
                raw: Value::Array(replies),
                results,
            })
        }
        Endpoint::Run if options.blocking && request.client() == Some("local") => {
            wait_for_local_job(http, token, request, options).await
        }
        Endpoint::Run => {
            let reply = bounded(options, started, request, post_json(http, token, "", request.body()))
                .await?;
            let returns = return_array(&reply)?;
            let results = collect_minion_results(request.client(), &returns);
            Ok(DispatchResponse {
                raw: Value::Array(returns),
                results,
            })
        }
    }
}

/// Apply the minion timeout to synchronous submissions when blocking.
async fn bounded<F>(
    options: &DispatchOptions,
    started: Instant,
    request: &ExecutionRequest,
    fut: F,
) -> Result<Value>
where
    F: std::future::Future<Output = Result<Value>>,
{
    if !options.blocking {
        return fut.await;
    }
    match timeout(options.minion_timeout, fut).await {
        Ok(res) => res,
        Err(_) => Err(SaltError::Timeout {
            elapsed: started.elapsed(),
            target: request.target_label(),
            partial: Vec::new(),
        }),
    }
}

async fn wait_for_local_job(
    http: &Client,
    token: &ServerToken,
    request: &ExecutionRequest,
    options: &DispatchOptions,
) -> Result<DispatchResponse> {
    let started = Instant::now();
    let Some(deadline) = started.checked_add(options.minion_timeout) else {
        return Err(SaltError::config(format!(
            "minion timeout of {}s is too large",
            options.minion_timeout.as_secs()
        )));
    };

    let submitted = bounded(options, started, request, post_json(http, token, "minions", request.body()))
        .await?;
    let returns = return_array(&submitted)?;
    let job = returns.first().cloned().unwrap_or(Value::Null);
    let Some(jid) = job.get("jid").and_then(Value::as_str).map(str::to_string) else {
        warn!("No jid returned for {}; nothing matched", request.target_label());
        return Ok(DispatchResponse {
            raw: Value::Array(Vec::new()),
            results: Vec::new(),
        });
    };
    let expected: Vec<String> = job
        .get("minions")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    info!("Job {} submitted to {} minion(s)", jid, expected.len());
    if expected.is_empty() {
        return Ok(DispatchResponse {
            raw: Value::Array(Vec::new()),
            results: Vec::new(),
        });
    }

    let job_path = format!("jobs/{jid}");
    let mut returned: Vec<MinionResult> = Vec::new();
    loop {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        sleep(options.poll_interval.min(deadline - now)).await;

        // A slow lookup costs at most one more poll interval.
        match timeout(options.poll_interval, get_json(http, token, &job_path)).await {
            Ok(Ok(lookup)) => returned = job_results(&lookup),
            Ok(Err(e)) => return Err(e),
            Err(_) => debug!("Lookup of job {} exceeded the poll interval", jid),
        }

        let seen: HashSet<&str> = returned.iter().map(|r| r.minion_id.as_str()).collect();
        debug!("Job {}: {}/{} minion(s) returned", jid, seen.len(), expected.len());
        if expected.iter().all(|m| seen.contains(m.as_str())) {
            return Ok(local_response(returned));
        }
    }

    if returned.is_empty() {
        return Err(SaltError::Timeout {
            elapsed: started.elapsed(),
            target: request.target_label(),
            partial: expected.into_iter().map(MinionResult::no_response).collect(),
        });
    }

    let seen: HashSet<String> = returned.iter().map(|r| r.minion_id.clone()).collect();
    for minion in expected.iter().filter(|m| !seen.contains(*m)) {
        warn!("Minion {} did not return within {:?}", minion, options.minion_timeout);
        returned.push(MinionResult::no_response(minion.clone()));
    }
    Ok(local_response(returned))
}

/// Rebuild the `[{minion: return}]` shape a synchronous `local` call produces.
fn local_response(results: Vec<MinionResult>) -> DispatchResponse {
    let mut by_minion = Map::new();
    for r in &results {
        by_minion.insert(r.minion_id.clone(), r.return_value.clone());
    }
    DispatchResponse {
        raw: json!([by_minion]),
        results,
    }
}

/// Parse a `/jobs/<jid>` reply. `info[0].Result` carries retcodes; fall
/// back to `return[0]` for older salt-api versions.
fn job_results(lookup: &Value) -> Vec<MinionResult> {
    let detailed = lookup
        .get("info")
        .and_then(Value::as_array)
        .and_then(|a| a.first())
        .and_then(|i| i.get("Result"))
        .and_then(Value::as_object);

    if let Some(result) = detailed {
        return result
            .iter()
            .map(|(minion, entry)| {
                let ret = entry.get("return").cloned().unwrap_or(Value::Null);
                let retcode = entry
                    .get("retcode")
                    .and_then(Value::as_i64)
                    .unwrap_or_else(|| {
                        if entry.get("success") == Some(&Value::Bool(false)) {
                            1
                        } else {
                            derive_retcode(&ret)
                        }
                    });
                MinionResult {
                    minion_id: minion.clone(),
                    retcode,
                    return_value: ret,
                }
            })
            .collect();
    }

    lookup
        .get("return")
        .and_then(Value::as_array)
        .and_then(|a| a.first())
        .and_then(Value::as_object)
        .map(|m| {
            m.iter()
                .map(|(minion, ret)| MinionResult::from_return(minion.clone(), ret.clone()))
                .collect()
        })
        .unwrap_or_default()
}

fn return_array(reply: &Value) -> Result<Vec<Value>> {
    reply
        .get("return")
        .and_then(Value::as_array)
        .cloned()
        .ok_or_else(|| SaltError::transport(format!("response has no 'return' array: {reply}")))
}

async fn post_json(
    http: &Client,
    token: &ServerToken,
    path: &str,
    body: &Map<String, Value>,
) -> Result<Value> {
    let url = endpoint_url(&token.server_url, path);
    debug!("POST {}", url);
    let response = http
        .post(&url)
        .header(AUTH_HEADER, &token.token)
        .header(reqwest::header::ACCEPT, "application/json")
        .json(body)
        .send()
        .await?;
    read_json(&url, response).await
}

async fn get_json(http: &Client, token: &ServerToken, path: &str) -> Result<Value> {
    let url = endpoint_url(&token.server_url, path);
    debug!("GET {}", url);
    let response = http
        .get(&url)
        .header(AUTH_HEADER, &token.token)
        .header(reqwest::header::ACCEPT, "application/json")
        .send()
        .await?;
    read_json(&url, response).await
}

async fn read_json(url: &str, response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(SaltError::transport(format!("{url}: HTTP {status}: {body}")));
    }
    serde_json::from_str(&body)
        .map_err(|e| SaltError::transport(format!("{url}: invalid JSON ({e}): {body}")))
}
