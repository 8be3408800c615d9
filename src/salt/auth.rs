//! salt-api login (`POST /login`) with ordered server failover.

use std::fmt;

use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use super::endpoint_url;
use super::error::{Result, SaltError};

/// Username + secret handed over by the host's credential store.
#[derive(Clone)]
pub struct Credentials {
    username: String,
    secret: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: secret.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Replace every occurrence of the secret in `text`.
    fn redact(&self, text: &str) -> String {
        if self.secret.is_empty() {
            text.to_string()
        } else {
            text.replace(&self.secret, "****")
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("secret", &"****")
            .finish()
    }
}

/// Source of credentials for a run.
pub trait CredentialProvider: Send + Sync {
    fn credentials(&self) -> Result<Credentials>;
}

impl CredentialProvider for Credentials {
    fn credentials(&self) -> Result<Credentials> {
        Ok(self.clone())
    }
}

/// Token plus the server that issued it. Lives for one run only.
#[derive(Clone, PartialEq, Eq)]
pub struct ServerToken {
    pub token: String,
    pub server_url: Url,
}

impl fmt::Debug for ServerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerToken")
            .field("token", &"****")
            .field("server_url", &self.server_url.as_str())
            .finish()
    }
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
    eauth: &'a str,
}

/// Parse a comma separated list of salt-api base URLs.
pub fn parse_server_list(raw: &str) -> Result<Vec<Url>> {
    let mut servers = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let url = Url::parse(part)
            .map_err(|e| SaltError::config(format!("invalid server URL '{part}': {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(SaltError::config(format!(
                "server URL must be http or https: {part}"
            )));
        }
        servers.push(url);
    }
    if servers.is_empty() {
        return Err(SaltError::config("no salt-api server configured"));
    }
    Ok(servers)
}

/// Log in against each server in order and return the first token issued.
pub async fn authenticate(
    http: &Client,
    servers: &[Url],
    credentials: &Credentials,
    auth_backend: &str,
) -> Result<ServerToken> {
    if servers.is_empty() {
        return Err(SaltError::config("no salt-api server configured"));
    }
    if credentials.username.trim().is_empty() {
        return Err(SaltError::config("username cannot be empty"));
    }

    let mut failures = Vec::with_capacity(servers.len());
    for server in servers {
        match login(http, server, credentials, auth_backend).await {
            Ok(token) => {
                info!("Authenticated against {}", server);
                return Ok(ServerToken {
                    token,
                    server_url: server.clone(),
                });
            }
            Err(reason) => {
                warn!("Login failed on {}: {}", server, reason);
                failures.push(format!("{server}: {reason}"));
            }
        }
    }

    Err(SaltError::Authentication(format!(
        "no server accepted the login (tried {}): {}",
        servers
            .iter()
            .map(Url::as_str)
            .collect::<Vec<_>>()
            .join(", "),
        failures.join("; ")
    )))
}

/// One login attempt; the error string never carries the password.
async fn login(
    http: &Client,
    server: &Url,
    credentials: &Credentials,
    auth_backend: &str,
) -> std::result::Result<String, String> {
    let url = endpoint_url(server, "login");
    debug!("POST {} (user={}, eauth={})", url, credentials.username, auth_backend);

    let response = http
        .post(&url)
        .header(reqwest::header::ACCEPT, "application/json")
        .json(&LoginRequest {
            username: &credentials.username,
            password: &credentials.secret,
            eauth: auth_backend,
        })
        .send()
        .await
        .map_err(|e| credentials.redact(&e.to_string()))?;

    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if !status.is_success() {
        return Err(credentials.redact(&format!("HTTP {status}: {body}")));
    }

    let parsed: Value = serde_json::from_str(&body)
        .map_err(|e| credentials.redact(&format!("HTTP {status}: unreadable body ({e}): {body}")))?;
    extract_token(&parsed)
        .map(str::to_string)
        .ok_or_else(|| credentials.redact(&format!("HTTP {status}: no token in response: {body}")))
}

fn extract_token(body: &Value) -> Option<&str> {
    body.get("return")
        .and_then(Value::as_array)
        .and_then(|arr| arr.first())
        .and_then(|first| first.get("token"))
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn creds() -> Credentials {
        Credentials::new("jenkins", "s3cret-pass")
    }

    fn login_ok(token: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "return": [{"token": token, "expire": 1700000000.0, "user": "jenkins", "eauth": "pam"}]
        }))
    }

    #[test]
    fn server_list_parsing() {
        let servers = parse_server_list("https://a.example:8000, http://b.example/api ,").unwrap();
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[1].path(), "/api");
        assert!(parse_server_list(" , ").is_err());
        assert!(parse_server_list("ftp://x").is_err());
        assert!(parse_server_list("not a url").is_err());
    }

    #[test]
    fn debug_redacts_secret() {
        let out = format!("{:?}", creds());
        assert!(out.contains("jenkins"));
        assert!(!out.contains("s3cret-pass"));
    }

    #[tokio::test]
    async fn login_returns_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/login"))
            .and(body_json(json!({"username": "jenkins", "password": "s3cret-pass", "eauth": "pam"})))
            .respond_with(login_ok("abc123"))
            .expect(1)
            .mount(&server)
            .await;

        let url = Url::parse(&server.uri()).unwrap();
        let token = authenticate(&Client::new(), &[url.clone()], &creds(), "pam")
            .await
            .unwrap();
        assert_eq!(token.token, "abc123");
        assert_eq!(token.server_url, url);
    }

    #[tokio::test]
    async fn unauthorized_is_authentication_error_without_password() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/login"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad login for s3cret-pass"))
            .mount(&server)
            .await;

        let url = Url::parse(&server.uri()).unwrap();
        let err = authenticate(&Client::new(), &[url], &creds(), "pam")
            .await
            .unwrap_err();
        let msg = err.to_string();
        assert!(matches!(err, SaltError::Authentication(_)));
        assert!(msg.contains("401"));
        assert!(msg.contains("bad login"));
        assert!(!msg.contains("s3cret-pass"));
    }

    #[tokio::test]
    async fn missing_token_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"return": [{}]})))
            .mount(&server)
            .await;

        let url = Url::parse(&server.uri()).unwrap();
        let err = authenticate(&Client::new(), &[url], &creds(), "pam")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no token"));
    }

    #[tokio::test]
    async fn fails_over_to_next_server() {
        let bad = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/login"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&bad)
            .await;
        let good = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/login"))
            .respond_with(login_ok("tok"))
            .mount(&good)
            .await;

        let servers = vec![
            Url::parse(&bad.uri()).unwrap(),
            Url::parse(&good.uri()).unwrap(),
        ];
        let token = authenticate(&Client::new(), &servers, &creds(), "ldap")
            .await
            .unwrap();
        assert_eq!(token.server_url, servers[1]);
    }

    #[tokio::test]
    async fn all_servers_failing_lists_each() {
        let a = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&a)
            .await;
        let b = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&b)
            .await;

        let servers = vec![Url::parse(&a.uri()).unwrap(), Url::parse(&b.uri()).unwrap()];
        let msg = authenticate(&Client::new(), &servers, &creds(), "pam")
            .await
            .unwrap_err()
            .to_string();
        assert!(msg.contains(servers[0].as_str()));
        assert!(msg.contains(servers[1].as_str()));
        assert!(msg.contains("401"));
        assert!(msg.contains("500"));
    }
}
