//! One-off installed-app OAuth flow that mints a YouTube refresh token.
//!
//! The flow binds a loopback listener on 127.0.0.1, prints the consent URL,
//! waits for the redirect carrying `code` and `state`, then exchanges the code
//! (with its PKCE verifier) at the token endpoint.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::distributions::Alphanumeric;
use rand::{Rng, RngCore};
use reqwest::Url;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use crate::errors::ExternalError;
use crate::youtube::{TOKEN_URI, UPLOAD_SCOPE};

const SERVICE: &str = "youtube-oauth";

const AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";

const VERIFIER_LEN: usize = 64;

const EXCHANGE_TIMEOUT_SECS: u64 = 30;

const SHUTDOWN_GRACE_MS: u64 = 1000;

const SUCCESS_PAGE: &str =
    "<html><body><h1>Authentication complete.</h1><p>You can close this window.</p></body></html>";

const FAILURE_PAGE: &str = "<html><body><h1>Authentication failed.</h1></body></html>";

/// OAuth client registration, as downloaded from the cloud console.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClientSecrets {
    /// Client id.
    pub client_id: String,
    /// Client secret.
    pub client_secret: String,
    /// Consent endpoint.
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    /// Token endpoint.
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_auth_uri() -> String {
    AUTH_URI.to_string()
}

fn default_token_uri() -> String {
    TOKEN_URI.to_string()
}

#[derive(Debug, Deserialize)]
struct SecretsFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

impl ClientSecrets {
    /// Parses a client secrets document (`installed` or `web` section).
    pub fn from_json(json: &str) -> Result<Self, ExternalError> {
        let file: SecretsFile = serde_json::from_str(json)
            .map_err(|e| ExternalError::local(SERVICE, format!("Invalid client secrets: {e}")))?;
        file.installed.or(file.web).ok_or_else(|| {
            ExternalError::local(
                SERVICE,
                "Client secrets must contain an 'installed' or 'web' section",
            )
        })
    }

    /// Reads and parses a client secrets file.
    pub fn load(path: &Path) -> Result<Self, ExternalError> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            ExternalError::local(SERVICE, format!("Cannot read {}: {e}", path.display()))
        })?;
        Self::from_json(&json)
    }
}

/// PKCE verifier and its S256 challenge.
#[derive(Clone, PartialEq, Eq)]
pub struct Pkce {
    verifier: String,
    challenge: String,
}

impl std::fmt::Debug for Pkce {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pkce")
            .field("challenge", &self.challenge)
            .finish_non_exhaustive()
    }
}

impl Pkce {
    /// Generates a fresh random verifier.
    #[must_use]
    pub fn generate() -> Self {
        let verifier: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(VERIFIER_LEN)
            .map(char::from)
            .collect();
        Self::from_verifier(verifier)
    }

    /// Derives the challenge for a known verifier.
    #[must_use]
    pub fn from_verifier(verifier: impl Into<String>) -> Self {
        let verifier = verifier.into();
        let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
        Self {
            verifier,
            challenge,
        }
    }

    /// The secret verifier sent with the code exchange.
    #[must_use]
    pub fn verifier(&self) -> &str {
        &self.verifier
    }

    /// The challenge sent with the consent request.
    #[must_use]
    pub fn challenge(&self) -> &str {
        &self.challenge
    }
}

/// Random anti-forgery state value.
#[must_use]
pub fn random_state() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Builds the consent URL for an offline upload grant.
pub fn authorization_url(
    secrets: &ClientSecrets,
    redirect_uri: &str,
    pkce: &Pkce,
    state: &str,
) -> Result<Url, ExternalError> {
    Url::parse_with_params(
        &secrets.auth_uri,
        &[
            ("response_type", "code"),
            ("client_id", secrets.client_id.as_str()),
            ("redirect_uri", redirect_uri),
            ("scope", UPLOAD_SCOPE),
            ("access_type", "offline"),
            ("prompt", "consent"),
            ("state", state),
            ("code_challenge", pkce.challenge()),
            ("code_challenge_method", "S256"),
        ],
    )
    .map_err(|e| ExternalError::local(SERVICE, format!("Invalid auth URI: {e}")))
}

/// What a redirect request carried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Callback {
    /// The user granted access.
    Code(String),
    /// The provider reported an error (e.g. `access_denied`).
    Denied(String),
    /// Not an OAuth redirect (e.g. a favicon request).
    Unrelated,
}

/// Interprets the request target of a redirect, checking `state`.
pub fn parse_callback(target: &str, expected_state: &str) -> Result<Callback, ExternalError> {
    let url = Url::parse("http://127.0.0.1")
        .and_then(|base| base.join(target))
        .map_err(|e| ExternalError::rejected(SERVICE, format!("Bad redirect target: {e}")))?;
    let params: HashMap<String, String> = url.query_pairs().into_owned().collect();
    classify_redirect(&params, expected_state)
}

/// Classifies decoded redirect query parameters, checking `state`.
pub fn classify_redirect(
    params: &HashMap<String, String>,
    expected_state: &str,
) -> Result<Callback, ExternalError> {
    let code = params.get("code");
    let error = params.get("error");
    if code.is_none() && error.is_none() {
        return Ok(Callback::Unrelated);
    }
    if params.get("state").map(String::as_str) != Some(expected_state) {
        return Err(ExternalError::rejected(
            SERVICE,
            "State mismatch in OAuth redirect",
        ));
    }
    Ok(match (code, error) {
        (_, Some(error)) => Callback::Denied(error.clone()),
        (Some(code), None) => Callback::Code(code.clone()),
        (None, None) => Callback::Unrelated,
    })
}

type RedirectSender = oneshot::Sender<Result<String, ExternalError>>;

#[derive(Clone)]
struct RedirectState {
    expected_state: Arc<str>,
    result_tx: Arc<Mutex<Option<RedirectSender>>>,
}

fn redirect_router(state: RedirectState) -> Router {
    Router::new()
        .route("/", get(receive_redirect))
        .with_state(state)
}

/// Redirect endpoint. The first code, denial or state mismatch settles the flow.
async fn receive_redirect(
    State(state): State<RedirectState>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, Html<&'static str>) {
    let outcome = match classify_redirect(&params, &state.expected_state) {
        Ok(Callback::Unrelated) => return (StatusCode::NOT_FOUND, Html("")),
        Ok(Callback::Code(code)) => Ok(code),
        Ok(Callback::Denied(error)) => Err(ExternalError::rejected(
            SERVICE,
            format!("Authorization denied: {error}"),
        )),
        Err(e) => Err(e),
    };
    tracing::debug!(accepted = outcome.is_ok(), "OAuth redirect received");

    let response = if outcome.is_ok() {
        (StatusCode::OK, Html(SUCCESS_PAGE))
    } else {
        (StatusCode::BAD_REQUEST, Html(FAILURE_PAGE))
    };
    if let Some(tx) = state.result_tx.lock().take() {
        // The receiver is gone only once the flow already settled.
        let _ = tx.send(outcome);
    }
    response
}

/// Loopback listener receiving the redirect.
#[derive(Debug)]
pub struct LoopbackReceiver {
    listener: TcpListener,
    port: u16,
}

impl LoopbackReceiver {
    /// Binds 127.0.0.1 on `port` (0 picks a free port).
    pub async fn bind(port: u16) -> Result<Self, ExternalError> {
        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .map_err(|e| ExternalError::local(SERVICE, format!("Cannot bind loopback: {e}")))?;
        let port = listener
            .local_addr()
            .map_err(|e| ExternalError::local(SERVICE, e.to_string()))?
            .port();
        Ok(Self { listener, port })
    }

    /// Redirect URI pointing at this listener.
    #[must_use]
    pub fn redirect_uri(&self) -> String {
        format!("http://127.0.0.1:{}/", self.port)
    }

    /// Serves the redirect endpoint until a request settles the flow, then
    /// shuts the server down.
    pub async fn wait_for_code(self, expected_state: &str) -> Result<String, ExternalError> {
        let (result_tx, result_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let app = redirect_router(RedirectState {
            expected_state: Arc::from(expected_state),
            result_tx: Arc::new(Mutex::new(Some(result_tx))),
        });

        let mut server = tokio::spawn(async move {
            axum::serve(self.listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
        });

        let outcome = result_rx.await;
        let _ = shutdown_tx.send(());
        match tokio::time::timeout(Duration::from_millis(SHUTDOWN_GRACE_MS), &mut server).await {
            Ok(Ok(Err(e))) => tracing::debug!(error = %e, "Loopback server error"),
            Ok(_) => {}
            Err(_) => {
                tracing::debug!("Loopback server still draining connections; aborting");
                server.abort();
            }
        }

        outcome.map_err(|_| {
            ExternalError::local(SERVICE, "Loopback server stopped before the redirect arrived")
        })?
    }
}

/// Tokens returned by the code exchange.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    /// Short-lived access token.
    pub access_token: String,
    /// Long-lived refresh token; absent when consent was not re-prompted.
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Lifetime of the access token in seconds.
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// Exchanges an authorization code for tokens.
pub async fn exchange_code(
    secrets: &ClientSecrets,
    code: &str,
    pkce: &Pkce,
    redirect_uri: &str,
) -> Result<TokenGrant, ExternalError> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(EXCHANGE_TIMEOUT_SECS))
        .build()
        .map_err(|e| ExternalError::local(SERVICE, format!("HTTP client: {e}")))?;
    let response = client
        .post(&secrets.token_uri)
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", secrets.client_id.as_str()),
            ("client_secret", secrets.client_secret.as_str()),
            ("redirect_uri", redirect_uri),
            ("code_verifier", pkce.verifier()),
        ])
        .send()
        .await
        .map_err(|e| ExternalError::from_reqwest(SERVICE, &e))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| ExternalError::from_reqwest(SERVICE, &e))?;
    if !status.is_success() {
        return Err(ExternalError::from_status(SERVICE, status.as_u16(), &body));
    }
    serde_json::from_str(&body)
        .map_err(|e| ExternalError::rejected(SERVICE, format!("Unexpected token response: {e}")))
}

/// Runs the complete flow and returns a refresh token.
///
/// The consent URL is written to stderr; the caller opens it in a browser.
pub async fn run_installed_flow(secrets: &ClientSecrets, port: u16) -> Result<String, ExternalError> {
    let receiver = LoopbackReceiver::bind(port).await?;
    let redirect_uri = receiver.redirect_uri();
    let pkce = Pkce::generate();
    let state = random_state();

    let url = authorization_url(secrets, &redirect_uri, &pkce, &state)?;
    tracing::info!(redirect_uri = %redirect_uri, "Waiting for OAuth redirect");
    eprintln!("Open this URL in your browser to authorize uploads:\n\n{url}\n");

    let code = receiver.wait_for_code(&state).await?;
    let grant = exchange_code(secrets, &code, &pkce, &redirect_uri).await?;
    grant.refresh_token.ok_or_else(|| {
        ExternalError::rejected(
            SERVICE,
            "Token response has no refresh_token; revoke the app's access and retry",
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SECRETS: &str = r#"{
        "installed": {
            "client_id": "123.apps.googleusercontent.com",
            "client_secret": "shh",
            "auth_uri": "https://accounts.google.com/o/oauth2/auth",
            "token_uri": "https://oauth2.googleapis.com/token",
            "redirect_uris": ["http://localhost"]
        }
    }"#;

    #[test]
    fn test_client_secrets_sections() {
        let secrets = ClientSecrets::from_json(SECRETS).unwrap();
        assert_eq!(secrets.client_id, "123.apps.googleusercontent.com");
        assert_eq!(secrets.token_uri, TOKEN_URI);

        let web = ClientSecrets::from_json(r#"{"web":{"client_id":"w","client_secret":"s"}}"#).unwrap();
        assert_eq!(web.client_id, "w");
        assert_eq!(web.auth_uri, AUTH_URI);

        assert!(ClientSecrets::from_json(r#"{"other":{}}"#).is_err());
    }

    #[test]
    fn test_pkce_s256_challenge() {
        let pkce = Pkce::from_verifier("factreel-pkce-verifier-0123456789-abcdefghijklmnop");
        assert_eq!(pkce.challenge(), "h5Wcgu2AN_HaWJVs_kfiofFAW5SwJm0SavYQDQdEyqU");
        assert!(!format!("{pkce:?}").contains("factreel-pkce-verifier"));
    }

    #[test]
    fn test_pkce_generate() {
        let a = Pkce::generate();
        let b = Pkce::generate();
        assert_eq!(a.verifier().len(), VERIFIER_LEN);
        assert_ne!(a.verifier(), b.verifier());
        assert_eq!(a, Pkce::from_verifier(a.verifier()));
        assert_eq!(random_state().len(), 32);
    }

    #[test]
    fn test_authorization_url() {
        let secrets = ClientSecrets::from_json(SECRETS).unwrap();
        let pkce = Pkce::from_verifier("v");
        let url = authorization_url(&secrets, "http://127.0.0.1:8765/", &pkce, "st").unwrap();
        let pairs: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();

        assert_eq!(url.host_str(), Some("accounts.google.com"));
        assert_eq!(pairs["scope"], UPLOAD_SCOPE);
        assert_eq!(pairs["access_type"], "offline");
        assert_eq!(pairs["prompt"], "consent");
        assert_eq!(pairs["code_challenge_method"], "S256");
        assert_eq!(pairs["code_challenge"], pkce.challenge());
        assert_eq!(pairs["redirect_uri"], "http://127.0.0.1:8765/");
        assert_eq!(pairs["state"], "st");
    }

    #[test]
    fn test_parse_callback() {
        assert_eq!(
            parse_callback("/?state=abc&code=4%2F0Ad", "abc").unwrap(),
            Callback::Code("4/0Ad".to_string())
        );
        assert_eq!(
            parse_callback("/?error=access_denied&state=abc", "abc").unwrap(),
            Callback::Denied("access_denied".to_string())
        );
        assert_eq!(parse_callback("/favicon.ico", "abc").unwrap(), Callback::Unrelated);
        assert!(parse_callback("/?state=evil&code=x", "abc").is_err());
        assert!(parse_callback("/?code=x", "abc").is_err());
    }

    async fn send_request(addr: &str, target: &str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let request = format!("GET {target} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    fn loopback_addr(receiver: &LoopbackReceiver) -> String {
        receiver
            .redirect_uri()
            .trim_start_matches("http://")
            .trim_end_matches('/')
            .to_string()
    }

    #[tokio::test]
    async fn test_loopback_receives_code() {
        let receiver = LoopbackReceiver::bind(0).await.unwrap();
        assert!(receiver.redirect_uri().starts_with("http://127.0.0.1:"));
        let addr = loopback_addr(&receiver);

        let client = tokio::spawn(async move {
            let not_found = send_request(&addr, "/favicon.ico").await;
            let unrelated = send_request(&addr, "/?foo=bar").await;
            let ok = send_request(&addr, "/?code=abc&state=s1").await;
            (not_found, unrelated, ok)
        });

        let code = receiver.wait_for_code("s1").await.unwrap();
        assert_eq!(code, "abc");
        let (not_found, unrelated, ok) = client.await.unwrap();
        assert!(not_found.starts_with("HTTP/1.1 404"));
        assert!(unrelated.starts_with("HTTP/1.1 404"));
        assert!(ok.starts_with("HTTP/1.1 200 OK"));
        assert!(ok.contains("Authentication complete."));
    }

    #[tokio::test]
    async fn test_loopback_not_blocked_by_idle_connection() {
        let receiver = LoopbackReceiver::bind(0).await.unwrap();
        let addr = loopback_addr(&receiver);

        let client = tokio::spawn(async move {
            // Opened and never written to, like a browser preconnect.
            let idle = tokio::net::TcpStream::connect(&addr).await.unwrap();
            let response = send_request(&addr, "/?code=abc&state=s1").await;
            drop(idle);
            response
        });

        let code = tokio::time::timeout(Duration::from_secs(3), receiver.wait_for_code("s1"))
            .await
            .expect("redirect should be served despite an idle connection")
            .unwrap();
        assert_eq!(code, "abc");
        assert!(client.await.unwrap().starts_with("HTTP/1.1 200 OK"));
    }

    #[tokio::test]
    async fn test_loopback_state_mismatch_and_denial() {
        let receiver = LoopbackReceiver::bind(0).await.unwrap();
        let addr = loopback_addr(&receiver);
        let client = tokio::spawn(async move { send_request(&addr, "/?code=abc&state=evil").await });

        let err = receiver.wait_for_code("s1").await.unwrap_err();
        assert!(err.message.contains("State mismatch"));
        assert!(client.await.unwrap().starts_with("HTTP/1.1 400"));

        let receiver = LoopbackReceiver::bind(0).await.unwrap();
        let addr = loopback_addr(&receiver);
        let client =
            tokio::spawn(async move { send_request(&addr, "/?error=access_denied&state=s1").await });

        let err = receiver.wait_for_code("s1").await.unwrap_err();
        assert_eq!(err.kind, crate::errors::ErrorKind::Rejected);
        assert!(err.message.contains("access_denied"));
        assert!(client.await.unwrap().starts_with("HTTP/1.1 400"));
    }
}
