//! Process-local backend. Enforces the same owner-only delete rule the hosted
//! row policies do, so the offline host behaves like the real service.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
};

use async_trait::async_trait;
use shared::{
    domain::{AuthEvent, NewPost, Post, PostId, Session, SortOrder, User, UserId},
    error::{BackendError, ErrorCode},
};
use tokio::sync::{broadcast, Mutex};
use uuid::Uuid;

use crate::backend::{
    BackendResult, BlogBackend, SignUpOutcome, SignUpRequest, AUTH_EVENT_CAPACITY,
};

struct Account {
    user: User,
    password: String,
}

#[derive(Default)]
struct MemoryState {
    accounts: HashMap<String, Account>,
    tokens: HashMap<String, UserId>,
    posts: Vec<Post>,
    next_post_id: i64,
    session: Option<Session>,
}

pub struct MemoryBackend {
    ready: AtomicBool,
    token_counter: AtomicU64,
    inner: Mutex<MemoryState>,
    events: broadcast::Sender<AuthEvent>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(AUTH_EVENT_CAPACITY);
        Self {
            ready: AtomicBool::new(true),
            token_counter: AtomicU64::new(0),
            inner: Mutex::new(MemoryState {
                next_post_id: 1,
                ..MemoryState::default()
            }),
            events,
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Token pair a confirmation email would carry for `email`.
    pub async fn issue_tokens(&self, email: &str) -> Option<(String, String)> {
        let mut inner = self.inner.lock().await;
        let user_id = inner.accounts.get(&email_key(email))?.user.id;
        let access = self.next_token("access");
        let refresh = self.next_token("refresh");
        inner.tokens.insert(access.clone(), user_id);
        Some((access, refresh))
    }

    pub async fn posts(&self) -> Vec<Post> {
        self.inner.lock().await.posts.clone()
    }

    fn next_token(&self, kind: &str) -> String {
        let n = self.token_counter.fetch_add(1, Ordering::SeqCst);
        format!("{kind}-{n}-{}", Uuid::new_v4().simple())
    }

    /// Replaces the current session; its access token stops working.
    fn open_session(&self, inner: &mut MemoryState, user: User) -> Session {
        if let Some(previous) = inner.session.take() {
            inner.tokens.remove(&previous.access_token);
        }
        let access_token = self.next_token("access");
        inner.tokens.insert(access_token.clone(), user.id);
        let session = Session {
            access_token,
            refresh_token: self.next_token("refresh"),
            expires_at: None,
            user,
        };
        inner.session = Some(session.clone());
        let _ = self.events.send(AuthEvent::SignedIn(session.clone()));
        session
    }
}

fn email_key(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

fn unauthorized() -> BackendError {
    BackendError::new(ErrorCode::Unauthorized, "Auth session missing!")
}

#[async_trait]
impl BlogBackend for MemoryBackend {
    async fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn current_session(&self) -> BackendResult<Option<Session>> {
        Ok(self.inner.lock().await.session.clone())
    }

    async fn set_session(&self, access_token: &str, _refresh_token: &str) -> BackendResult<Session> {
        let mut inner = self.inner.lock().await;
        let user_id = inner
            .tokens
            .remove(access_token)
            .ok_or_else(|| BackendError::new(ErrorCode::Unauthorized, "Invalid JWT"))?;
        let user = inner
            .accounts
            .values()
            .find(|account| account.user.id == user_id)
            .map(|account| account.user.clone())
            .ok_or_else(|| BackendError::new(ErrorCode::NotFound, "User not found"))?;
        Ok(self.open_session(&mut inner, user))
    }

    async fn sign_up(&self, request: SignUpRequest) -> BackendResult<SignUpOutcome> {
        let mut inner = self.inner.lock().await;
        let key = email_key(&request.email);
        if key.is_empty() {
            return Err(BackendError::new(
                ErrorCode::Validation,
                "Unable to validate email address: invalid format",
            ));
        }
        if inner.accounts.contains_key(&key) {
            return Err(BackendError::new(
                ErrorCode::Validation,
                "User already registered",
            ));
        }
        let name = request.name.trim();
        let user = User {
            id: UserId(Uuid::new_v4()),
            email: request.email.trim().to_string(),
            name: (!name.is_empty()).then(|| name.to_string()),
        };
        inner.accounts.insert(
            key,
            Account {
                user: user.clone(),
                password: request.password,
            },
        );
        Ok(SignUpOutcome {
            user,
            session: None,
        })
    }

    async fn sign_in(&self, email: &str, password: &str) -> BackendResult<Session> {
        let mut inner = self.inner.lock().await;
        let user = match inner.accounts.get(&email_key(email)) {
            Some(account) if account.password == password => account.user.clone(),
            _ => {
                return Err(BackendError::new(
                    ErrorCode::Validation,
                    "Invalid login credentials",
                ))
            }
        };
        Ok(self.open_session(&mut inner, user))
    }

    async fn sign_out(&self) -> BackendResult<()> {
        let mut inner = self.inner.lock().await;
        if let Some(session) = inner.session.take() {
            inner.tokens.remove(&session.access_token);
        }
        let _ = self.events.send(AuthEvent::SignedOut);
        Ok(())
    }

    fn subscribe_auth_events(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    async fn insert_post(&self, post: NewPost) -> BackendResult<Post> {
        let mut inner = self.inner.lock().await;
        let owner = inner.session.as_ref().ok_or_else(unauthorized)?.user.id;
        if owner != post.user_id {
            return Err(BackendError::new(
                ErrorCode::Forbidden,
                "new row violates row-level security policy for table \"blogs\"",
            ));
        }
        let id = PostId(inner.next_post_id);
        inner.next_post_id += 1;
        let stored = Post {
            id,
            title: post.title,
            content: post.content,
            user_id: post.user_id,
            author_name: post.author_name,
            created_at: post.created_at,
        };
        inner.posts.push(stored.clone());
        Ok(stored)
    }

    async fn select_posts(&self, order: SortOrder) -> BackendResult<Vec<Post>> {
        let mut posts = self.inner.lock().await.posts.clone();
        order.sort(&mut posts);
        Ok(posts)
    }

    async fn delete_post(&self, id: PostId) -> BackendResult<()> {
        let mut inner = self.inner.lock().await;
        let owner = inner.session.as_ref().ok_or_else(unauthorized)?.user.id;
        let Some(index) = inner.posts.iter().position(|post| post.id == id) else {
            return Ok(());
        };
        if inner.posts[index].user_id != owner {
            return Err(BackendError::new(
                ErrorCode::Forbidden,
                format!("permission denied to delete post {id}"),
            ));
        }
        inner.posts.remove(index);
        Ok(())
    }
}
