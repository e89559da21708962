use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Deserialize};
use shared::{
    domain::{AuthEvent, NewPost, Post, PostId, Session, SortOrder},
    error::BackendError,
    protocol::{
        AuthUserRecord, ErrorBody, PasswordGrant, RefreshGrant, SignUpPayload, SignUpResponse,
        TokenResponse, UserMetadata,
    },
};
use tokio::{
    io::AsyncWriteExt,
    sync::{broadcast, RwLock},
};
use tracing::{debug, info, warn};

use crate::backend::{
    BackendResult, BlogBackend, SignUpOutcome, SignUpRequest, AUTH_EVENT_CAPACITY,
};

pub const DEFAULT_TABLE: &str = "blogs";

#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    pub url: String,
    pub anon_key: String,
    pub table: String,
    /// Where the session survives restarts; `None` keeps it in memory only.
    pub session_file: Option<PathBuf>,
}

impl SupabaseConfig {
    pub fn new(url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            anon_key: anon_key.into(),
            table: DEFAULT_TABLE.to_string(),
            session_file: None,
        }
    }
}

/// Backend client for a hosted project: auth under `/auth/v1`, rows under
/// `/rest/v1`.
pub struct SupabaseBackend {
    http: Client,
    config: SupabaseConfig,
    session: RwLock<Option<Session>>,
    events: broadcast::Sender<AuthEvent>,
}

#[derive(Deserialize)]
struct JwtClaims {
    exp: Option<i64>,
}

/// Reads `exp` from a JWT payload. The signature is not checked; the server
/// does that on every request.
pub fn jwt_expiry(token: &str) -> Option<DateTime<Utc>> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: JwtClaims = serde_json::from_slice(&bytes).ok()?;
    DateTime::from_timestamp(claims.exp?, 0)
}

async fn check(res: Response) -> BackendResult<Response> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let code = status.as_u16();
    let body = res.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .ok()
        .and_then(ErrorBody::into_message)
        .unwrap_or_else(|| format!("HTTP {code}"));
    debug!(status = code, %message, "backend request failed");
    Err(BackendError::from_status(code, message))
}

async fn send(req: RequestBuilder) -> BackendResult<Response> {
    let res = req
        .send()
        .await
        .map_err(|err| BackendError::transport(err.to_string()))?;
    check(res).await
}

async fn send_json<T: DeserializeOwned>(req: RequestBuilder) -> BackendResult<T> {
    send(req)
        .await?
        .json::<T>()
        .await
        .map_err(|err| BackendError::internal(format!("unexpected response body: {err}")))
}

impl SupabaseBackend {
    pub fn new(config: SupabaseConfig) -> Self {
        let (events, _) = broadcast::channel(AUTH_EVENT_CAPACITY);
        Self {
            http: Client::new(),
            config,
            session: RwLock::new(None),
            events,
        }
    }

    /// Loads a session saved by an earlier run. A missing or unreadable file
    /// leaves the client signed out.
    pub async fn restore_session(&self) {
        let Some(path) = &self.config.session_file else {
            return;
        };
        let raw = match tokio::fs::read(path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to read saved session");
                return;
            }
        };
        match serde_json::from_slice::<Session>(&raw) {
            Ok(session) => {
                debug!(user_id = %session.user.id, "restored saved session");
                *self.session.write().await = Some(session);
            }
            Err(err) => warn!(path = %path.display(), error = %err, "ignoring corrupt saved session"),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.url.trim_end_matches('/'), path)
    }

    fn table_endpoint(&self) -> String {
        self.endpoint(&format!("rest/v1/{}", self.config.table))
    }

    fn request(&self, req: RequestBuilder, bearer: Option<&str>) -> RequestBuilder {
        req.header("apikey", &self.config.anon_key)
            .bearer_auth(bearer.unwrap_or(&self.config.anon_key))
    }

    async fn store_session(&self, session: Session) {
        *self.session.write().await = Some(session.clone());
        self.persist(Some(&session)).await;
        let _ = self.events.send(AuthEvent::SignedIn(session));
    }

    async fn drop_session(&self) {
        *self.session.write().await = None;
        self.persist(None).await;
        let _ = self.events.send(AuthEvent::SignedOut);
    }

    async fn persist(&self, session: Option<&Session>) {
        let Some(path) = &self.config.session_file else {
            return;
        };
        let result = match session {
            Some(session) => match serde_json::to_vec_pretty(session) {
                Ok(bytes) => write_private(path, &bytes).await,
                Err(err) => {
                    warn!(error = %err, "failed to encode session");
                    return;
                }
            },
            None => match tokio::fs::remove_file(path).await {
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
                other => other,
            },
        };
        if let Err(err) = result {
            warn!(path = %path.display(), error = %err, "failed to update saved session");
        }
    }

    async fn refresh(&self, refresh_token: &str) -> BackendResult<Session> {
        let req = self.request(
            self.http
                .post(self.endpoint("auth/v1/token"))
                .query(&[("grant_type", "refresh_token")])
                .json(&RefreshGrant {
                    refresh_token: refresh_token.to_string(),
                }),
            None,
        );
        let token: TokenResponse = send_json(req).await?;
        Ok(token.into_session(Utc::now()))
    }

    async fn access_token(&self) -> BackendResult<Option<String>> {
        Ok(self
            .current_session()
            .await?
            .map(|session| session.access_token))
    }
}

/// The saved session holds live tokens, so the file is readable by its owner only.
async fn write_private(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);
    let mut file = options.open(path).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))
            .await?;
    }
    file.write_all(bytes).await?;
    file.flush().await
}

#[async_trait]
impl BlogBackend for SupabaseBackend {
    async fn is_ready(&self) -> bool {
        let req = self.request(self.http.get(self.endpoint("auth/v1/health")), None);
        match send(req).await {
            Ok(_) => true,
            Err(err) => {
                debug!(error = %err, "health check failed");
                false
            }
        }
    }

    /// Refreshes an expired session; a failed refresh signs the client out.
    async fn current_session(&self) -> BackendResult<Option<Session>> {
        let Some(session) = self.session.read().await.clone() else {
            return Ok(None);
        };
        if !session.is_expired_at(Utc::now()) {
            return Ok(Some(session));
        }

        match self.refresh(&session.refresh_token).await {
            Ok(refreshed) => {
                debug!(user_id = %refreshed.user.id, "session refreshed");
                *self.session.write().await = Some(refreshed.clone());
                self.persist(Some(&refreshed)).await;
                Ok(Some(refreshed))
            }
            Err(err) => {
                warn!(error = %err, "session expired and could not be refreshed");
                self.drop_session().await;
                Ok(None)
            }
        }
    }

    async fn set_session(&self, access_token: &str, refresh_token: &str) -> BackendResult<Session> {
        let expires_at = jwt_expiry(access_token);
        let session = if expires_at.is_some_and(|at| at <= Utc::now()) {
            self.refresh(refresh_token).await?
        } else {
            let req = self.request(self.http.get(self.endpoint("auth/v1/user")), Some(access_token));
            let user: AuthUserRecord = send_json(req).await?;
            Session {
                access_token: access_token.to_string(),
                refresh_token: refresh_token.to_string(),
                expires_at,
                user: user.into(),
            }
        };
        info!(user_id = %session.user.id, "session established from tokens");
        self.store_session(session.clone()).await;
        Ok(session)
    }

    async fn sign_up(&self, request: SignUpRequest) -> BackendResult<SignUpOutcome> {
        let name = request.name.trim();
        let payload = SignUpPayload {
            email: request.email,
            password: request.password,
            data: UserMetadata {
                name: (!name.is_empty()).then(|| name.to_string()),
            },
        };
        let req = self.request(
            self.http
                .post(self.endpoint("auth/v1/signup"))
                .query(&[("redirect_to", request.redirect_to.as_str())])
                .json(&payload),
            None,
        );
        match send_json::<SignUpResponse>(req).await? {
            SignUpResponse::User(user) => Ok(SignUpOutcome {
                user: user.into(),
                session: None,
            }),
            SignUpResponse::Session(token) => {
                let session = token.into_session(Utc::now());
                self.store_session(session.clone()).await;
                Ok(SignUpOutcome {
                    user: session.user.clone(),
                    session: Some(session),
                })
            }
        }
    }

    async fn sign_in(&self, email: &str, password: &str) -> BackendResult<Session> {
        let req = self.request(
            self.http
                .post(self.endpoint("auth/v1/token"))
                .query(&[("grant_type", "password")])
                .json(&PasswordGrant {
                    email: email.to_string(),
                    password: password.to_string(),
                }),
            None,
        );
        let token: TokenResponse = send_json(req).await?;
        let session = token.into_session(Utc::now());
        self.store_session(session.clone()).await;
        Ok(session)
    }

    /// The local session is dropped even when the logout request fails.
    async fn sign_out(&self) -> BackendResult<()> {
        let token = self
            .session
            .read()
            .await
            .as_ref()
            .map(|session| session.access_token.clone());
        let result = match token {
            Some(token) => {
                let req = self.request(
                    self.http.post(self.endpoint("auth/v1/logout")),
                    Some(&token),
                );
                send(req).await.map(|_| ())
            }
            None => Ok(()),
        };
        self.drop_session().await;
        result
    }

    fn subscribe_auth_events(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    async fn insert_post(&self, post: NewPost) -> BackendResult<Post> {
        let token = self.access_token().await?;
        let req = self
            .request(self.http.post(self.table_endpoint()), token.as_deref())
            .header("Prefer", "return=representation")
            .json(&[post]);
        let rows: Vec<Post> = send_json(req).await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| BackendError::internal("insert returned no row"))
    }

    async fn select_posts(&self, order: SortOrder) -> BackendResult<Vec<Post>> {
        let token = self.access_token().await?;
        let direction = if order.is_ascending() { "asc" } else { "desc" };
        let order_by = format!("created_at.{direction}");
        let req = self.request(
            self.http
                .get(self.table_endpoint())
                .query(&[("select", "*"), ("order", order_by.as_str())]),
            token.as_deref(),
        );
        send_json(req).await
    }

    async fn delete_post(&self, id: PostId) -> BackendResult<()> {
        let token = self.access_token().await?;
        let predicate = format!("eq.{id}");
        let req = self.request(
            self.http
                .delete(self.table_endpoint())
                .query(&[("id", predicate.as_str())]),
            token.as_deref(),
        );
        send(req).await.map(|_| ())
    }
}

#[cfg(test)]
#[path = "tests/supabase_tests.rs"]
mod tests;
