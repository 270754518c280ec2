//! Shared helpers: a mock OIDC provider and token signing.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::{
    Form, Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use parking_lot::{Mutex, RwLock};
use serde_json::{Value, json};
use tokio::net::TcpListener;

use routeros_mcp_auth::authz::Environment;
use routeros_mcp_auth::config::OidcConfig;
use routeros_mcp_auth::identity::TokenValidator;

pub const CLIENT_ID: &str = "routeros-mcp";
pub const KEY_A: &str = include_str!("../fixtures/rsa_key_a.pem");
pub const KEY_B: &str = include_str!("../fixtures/rsa_key_b.pem");
pub const JWKS_A: &str = include_str!("../fixtures/jwks_a.json");
pub const JWKS_B: &str = include_str!("../fixtures/jwks_b.json");

/// Authorization code the mock token endpoint accepts.
pub const GOOD_CODE: &str = "good-code";
/// Refresh token the mock token endpoint accepts.
pub const GOOD_REFRESH: &str = "rt-1";

/// Mutable state behind the mock provider.
pub struct IdpState {
    issuer: RwLock<String>,
    jwks: RwLock<Value>,
    fail: AtomicBool,
    jwks_delay_ms: AtomicU64,
    pub discovery_hits: AtomicUsize,
    pub jwks_hits: AtomicUsize,
    pub token_requests: Mutex<Vec<HashMap<String, String>>>,
}

/// An OIDC provider on an ephemeral localhost port.
pub struct MockIdp {
    pub issuer: String,
    pub state: Arc<IdpState>,
}

impl MockIdp {
    /// Start a provider serving `jwks_a.json`.
    pub async fn start() -> Self {
        let state = Arc::new(IdpState {
            issuer: RwLock::new(String::new()),
            jwks: RwLock::new(serde_json::from_str(JWKS_A).unwrap()),
            fail: AtomicBool::new(false),
            jwks_delay_ms: AtomicU64::new(0),
            discovery_hits: AtomicUsize::new(0),
            jwks_hits: AtomicUsize::new(0),
            token_requests: Mutex::new(Vec::new()),
        });

        let app = Router::new()
            .route("/.well-known/openid-configuration", get(discovery))
            .route("/jwks", get(jwks))
            .route("/token", post(token))
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let issuer = format!("http://{}", listener.local_addr().unwrap());
        *state.issuer.write() = issuer.clone();

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { issuer, state }
    }

    /// Make every endpoint answer 503 (or recover).
    pub fn set_failing(&self, fail: bool) {
        self.state.fail.store(fail, Ordering::SeqCst);
    }

    /// Serve a different JWKS document.
    pub fn set_jwks(&self, jwks: &str) {
        *self.state.jwks.write() = serde_json::from_str(jwks).unwrap();
    }

    /// Delay every JWKS response.
    pub fn set_jwks_delay(&self, delay: Duration) {
        self.state
            .jwks_delay_ms
            .store(u64::try_from(delay.as_millis()).unwrap(), Ordering::SeqCst);
    }

    pub fn jwks_hits(&self) -> usize {
        self.state.jwks_hits.load(Ordering::SeqCst)
    }

    /// OIDC settings pointing at this provider.
    pub fn oidc_config(&self) -> OidcConfig {
        OidcConfig {
            provider_url: self.issuer.clone(),
            client_id: CLIENT_ID.to_string(),
            http_timeout: Duration::from_secs(2),
            ..Default::default()
        }
    }

    /// A validator for this provider with default settings.
    pub fn validator(&self) -> TokenValidator {
        TokenValidator::new(&self.oidc_config(), Environment::Lab).unwrap()
    }

    /// Claims this provider would issue for `sub`, valid for ten minutes.
    pub fn claims(&self, sub: &str) -> Value {
        json!({
            "iss": self.issuer,
            "aud": CLIENT_ID,
            "sub": sub,
            "exp": now() + 600,
            "iat": now(),
        })
    }
}

async fn discovery(State(state): State<Arc<IdpState>>) -> Response {
    state.discovery_hits.fetch_add(1, Ordering::SeqCst);
    if state.fail.load(Ordering::SeqCst) {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let issuer = state.issuer.read().clone();
    Json(json!({
        "issuer": issuer,
        "jwks_uri": format!("{issuer}/jwks"),
        "authorization_endpoint": format!("{issuer}/authorize"),
        "token_endpoint": format!("{issuer}/token"),
        "code_challenge_methods_supported": ["S256"],
    }))
    .into_response()
}

async fn jwks(State(state): State<Arc<IdpState>>) -> Response {
    state.jwks_hits.fetch_add(1, Ordering::SeqCst);
    let delay = state.jwks_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
    if state.fail.load(Ordering::SeqCst) {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let body = state.jwks.read().clone();
    Json(body).into_response()
}

async fn token(
    State(state): State<Arc<IdpState>>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    state.token_requests.lock().push(form.clone());

    let grant = form.get("grant_type").map(String::as_str);
    let accepted = match grant {
        Some("authorization_code") => {
            form.get("code").map(String::as_str) == Some(GOOD_CODE)
                && form.get("code_verifier").is_some_and(|v| v.len() >= 43)
        }
        Some("refresh_token") => form.get("refresh_token").map(String::as_str) == Some(GOOD_REFRESH),
        _ => false,
    };

    if accepted {
        Json(json!({
            "access_token": "at-issued",
            "token_type": "Bearer",
            "expires_in": 300,
            "refresh_token": "rt-2",
            "scope": "openid profile email",
        }))
        .into_response()
    } else {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "invalid_grant"})),
        )
            .into_response()
    }
}

pub fn now() -> i64 {
    i64::try_from(SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()).unwrap()
}

/// Sign `claims` with an RSA fixture key.
pub fn sign_with(claims: &Value, pem: &str, kid: Option<&str>) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = kid.map(str::to_string);
    jsonwebtoken::encode(
        &header,
        claims,
        &EncodingKey::from_rsa_pem(pem.as_bytes()).unwrap(),
    )
    .unwrap()
}

/// Sign with key A under its published kid.
pub fn sign(claims: &Value) -> String {
    sign_with(claims, KEY_A, Some("key-a"))
}
