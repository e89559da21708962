use async_trait::async_trait;
use shared::{
    domain::{AuthEvent, NewPost, Post, PostId, Session, SortOrder, User},
    error::BackendError,
};
use tokio::sync::broadcast;
use tokio_stream::{wrappers::BroadcastStream, StreamExt};
use tracing::warn;

pub type BackendResult<T> = Result<T, BackendError>;

pub const AUTH_EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct SignUpRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub redirect_to: String,
}

#[derive(Debug, Clone)]
pub struct SignUpOutcome {
    pub user: User,
    /// Present only when the backend confirms accounts without email.
    pub session: Option<Session>,
}

/// Auth and row access for the `blogs` collection.
#[async_trait]
pub trait BlogBackend: Send + Sync {
    async fn is_ready(&self) -> bool;
    async fn current_session(&self) -> BackendResult<Option<Session>>;
    async fn set_session(&self, access_token: &str, refresh_token: &str) -> BackendResult<Session>;
    async fn sign_up(&self, request: SignUpRequest) -> BackendResult<SignUpOutcome>;
    async fn sign_in(&self, email: &str, password: &str) -> BackendResult<Session>;
    async fn sign_out(&self) -> BackendResult<()>;
    fn subscribe_auth_events(&self) -> broadcast::Receiver<AuthEvent>;
    async fn insert_post(&self, post: NewPost) -> BackendResult<Post>;
    async fn select_posts(&self, order: SortOrder) -> BackendResult<Vec<Post>>;
    async fn delete_post(&self, id: PostId) -> BackendResult<()>;
}

/// Single-consumer view over the backend's auth notifications.
pub struct AuthEventStream {
    inner: BroadcastStream<AuthEvent>,
}

impl AuthEventStream {
    pub fn new(rx: broadcast::Receiver<AuthEvent>) -> Self {
        Self {
            inner: BroadcastStream::new(rx),
        }
    }

    /// Next notification, or `None` once the backend is dropped. Notifications
    /// lost to a slow consumer are skipped.
    pub async fn next(&mut self) -> Option<AuthEvent> {
        loop {
            match self.inner.next().await? {
                Ok(event) => return Some(event),
                Err(err) => warn!(error = %err, "auth event stream lagged"),
            }
        }
    }
}
