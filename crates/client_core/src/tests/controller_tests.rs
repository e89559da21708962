use super::*;
use std::{
    collections::HashMap,
    sync::Mutex as StdMutex,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{
    domain::{Session, UserId},
    error::{BackendError, ErrorCode},
};
use tokio::sync::broadcast;

use crate::{
    backend::{BackendResult, SignUpOutcome},
    error::ValidationError,
    memory::MemoryBackend,
    render::PostCard,
};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Section {
    None,
    Auth,
    App(String),
}

#[derive(Default)]
struct SurfaceLog {
    section: Option<Section>,
    tab: Option<AuthTab>,
    messages: HashMap<FormId, FormMessage>,
    resets: Vec<FormId>,
    feeds: Vec<Feed>,
    alerts: Vec<String>,
    confirms: Vec<String>,
    fragment: Option<String>,
    fatal: Option<String>,
}

struct RecordingSurface {
    confirm_answer: bool,
    log: StdMutex<SurfaceLog>,
}

impl RecordingSurface {
    fn new() -> Arc<Self> {
        Self::with_fragment(None)
    }

    fn with_fragment(fragment: Option<&str>) -> Arc<Self> {
        Arc::new(Self {
            confirm_answer: true,
            log: StdMutex::new(SurfaceLog {
                fragment: fragment.map(str::to_string),
                ..SurfaceLog::default()
            }),
        })
    }

    fn declining() -> Arc<Self> {
        Arc::new(Self {
            confirm_answer: false,
            log: StdMutex::new(SurfaceLog::default()),
        })
    }

    fn section(&self) -> Section {
        self.log
            .lock()
            .expect("log")
            .section
            .clone()
            .unwrap_or(Section::None)
    }

    fn message(&self, form: FormId) -> Option<FormMessage> {
        self.log.lock().expect("log").messages.get(&form).cloned()
    }

    fn last_feed(&self) -> Option<Feed> {
        self.log.lock().expect("log").feeds.last().cloned()
    }

    fn feed_count(&self) -> usize {
        self.log.lock().expect("log").feeds.len()
    }

    fn alerts(&self) -> Vec<String> {
        self.log.lock().expect("log").alerts.clone()
    }
}

#[async_trait]
impl PageSurface for RecordingSurface {
    fn show_auth_section(&self) {
        self.log.lock().expect("log").section = Some(Section::Auth);
    }

    fn show_app_section(&self, display_name: &str) {
        self.log.lock().expect("log").section = Some(Section::App(display_name.to_string()));
    }

    fn switch_auth_tab(&self, tab: AuthTab) {
        self.log.lock().expect("log").tab = Some(tab);
    }

    fn set_form_message(&self, form: FormId, message: FormMessage) {
        self.log.lock().expect("log").messages.insert(form, message);
    }

    fn reset_form(&self, form: FormId) {
        self.log.lock().expect("log").resets.push(form);
    }

    fn render_feed(&self, feed: &Feed) {
        self.log.lock().expect("log").feeds.push(feed.clone());
    }

    fn alert(&self, message: &str) {
        self.log.lock().expect("log").alerts.push(message.to_string());
    }

    async fn confirm(&self, message: &str) -> bool {
        self.log
            .lock()
            .expect("log")
            .confirms
            .push(message.to_string());
        self.confirm_answer
    }

    fn page_url(&self) -> String {
        "http://localhost:8080/index.html".to_string()
    }

    fn location_fragment(&self) -> Option<String> {
        self.log.lock().expect("log").fragment.clone()
    }

    fn clear_fragment(&self) {
        self.log.lock().expect("log").fragment = None;
    }

    fn show_fatal_error(&self, message: &str) {
        self.log.lock().expect("log").fatal = Some(message.to_string());
    }
}

/// Counts calls per operation and can fail selected ones.
struct RecordingBackend {
    inner: MemoryBackend,
    calls: StdMutex<HashMap<&'static str, usize>>,
    failing: StdMutex<HashMap<&'static str, BackendError>>,
}

impl RecordingBackend {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryBackend::new(),
            calls: StdMutex::new(HashMap::new()),
            failing: StdMutex::new(HashMap::new()),
        })
    }

    fn fail(&self, op: &'static str, err: BackendError) {
        self.failing.lock().expect("failing").insert(op, err);
    }

    fn calls(&self, op: &str) -> usize {
        self.calls
            .lock()
            .expect("calls")
            .get(op)
            .copied()
            .unwrap_or(0)
    }

    fn record(&self, op: &'static str) -> BackendResult<()> {
        *self.calls.lock().expect("calls").entry(op).or_default() += 1;
        match self.failing.lock().expect("failing").get(op) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl BlogBackend for RecordingBackend {
    async fn is_ready(&self) -> bool {
        *self.calls.lock().expect("calls").entry("is_ready").or_default() += 1;
        self.inner.is_ready().await
    }

    async fn current_session(&self) -> BackendResult<Option<Session>> {
        self.record("current_session")?;
        self.inner.current_session().await
    }

    async fn set_session(&self, access_token: &str, refresh_token: &str) -> BackendResult<Session> {
        self.record("set_session")?;
        self.inner.set_session(access_token, refresh_token).await
    }

    async fn sign_up(&self, request: SignUpRequest) -> BackendResult<SignUpOutcome> {
        self.record("sign_up")?;
        self.inner.sign_up(request).await
    }

    async fn sign_in(&self, email: &str, password: &str) -> BackendResult<Session> {
        self.record("sign_in")?;
        self.inner.sign_in(email, password).await
    }

    async fn sign_out(&self) -> BackendResult<()> {
        let outcome = self.record("sign_out");
        self.inner.sign_out().await?;
        outcome
    }

    fn subscribe_auth_events(&self) -> broadcast::Receiver<AuthEvent> {
        self.inner.subscribe_auth_events()
    }

    async fn insert_post(&self, post: NewPost) -> BackendResult<Post> {
        self.record("insert_post")?;
        self.inner.insert_post(post).await
    }

    async fn select_posts(&self, order: SortOrder) -> BackendResult<Vec<Post>> {
        self.record("select_posts")?;
        self.inner.select_posts(order).await
    }

    async fn delete_post(&self, id: PostId) -> BackendResult<()> {
        self.record("delete_post")?;
        self.inner.delete_post(id).await
    }
}

async fn register(backend: &RecordingBackend, name: &str, email: &str) {
    backend
        .inner
        .sign_up(SignUpRequest {
            name: name.into(),
            email: email.into(),
            password: "hunter22".into(),
            redirect_to: "http://localhost/".into(),
        })
        .await
        .expect("register");
}

fn fast_policy() -> StartupPolicy {
    StartupPolicy {
        interval: Duration::from_millis(10),
        max_attempts: 3,
    }
}

fn feed_titles(feed: &Feed) -> Vec<String> {
    match feed {
        Feed::Posts(cards) => cards.iter().map(|card| card.post.title.clone()).collect(),
        _ => Vec::new(),
    }
}

fn post_at(user: &User, title: &str, ts: &str) -> NewPost {
    let created_at: DateTime<Utc> = ts.parse().expect("timestamp");
    NewPost {
        created_at,
        ..NewPost::authored_by(user, title, "content")
    }
}

#[tokio::test]
async fn fresh_load_without_session_shows_auth_view_and_skips_feed() {
    let backend = RecordingBackend::new();
    let surface = RecordingSurface::new();
    let mut controller = BlogController::new(backend.clone(), surface.clone());

    controller.start(fast_policy()).await.expect("start");

    assert_eq!(surface.section(), Section::Auth);
    assert!(controller.current_user().is_none());
    assert_eq!(backend.calls("select_posts"), 0);
    assert_eq!(surface.feed_count(), 0);
}

#[tokio::test]
async fn sign_in_shows_app_and_loads_feed_once() {
    let backend = RecordingBackend::new();
    register(&backend, "", "reader@example.com").await;
    let surface = RecordingSurface::new();
    let mut controller = BlogController::new(backend.clone(), surface.clone());
    let mut events = controller.start(fast_policy()).await.expect("start");

    controller
        .sign_in("reader@example.com", "hunter22")
        .await
        .expect("sign in");

    // The backend's own notification for the same sign-in changes nothing.
    let event = events.next().await.expect("signed in event");
    assert!(matches!(event, AuthEvent::SignedIn(_)));
    controller.handle_auth_event(event).await;

    assert_eq!(
        surface.section(),
        Section::App("reader@example.com".to_string())
    );
    assert_eq!(backend.calls("select_posts"), 1);
    assert_eq!(surface.last_feed(), Some(Feed::Empty));
}

#[tokio::test]
async fn failed_sign_in_surfaces_backend_message_and_keeps_user() {
    let backend = RecordingBackend::new();
    register(&backend, "", "reader@example.com").await;
    let surface = RecordingSurface::new();
    let mut controller = BlogController::new(backend.clone(), surface.clone());

    let err = controller
        .sign_in("reader@example.com", "wrong")
        .await
        .expect_err("bad password");

    assert!(matches!(err, ClientError::Backend(_)));
    assert_eq!(
        surface.message(FormId::Login),
        Some(FormMessage::Error("Invalid login credentials".to_string()))
    );
    assert!(controller.current_user().is_none());
}

#[tokio::test]
async fn sign_up_validation_never_reaches_backend() {
    let backend = RecordingBackend::new();
    let surface = RecordingSurface::new();
    let mut controller = BlogController::new(backend.clone(), surface.clone());

    for password in ["", "a", "abcde"] {
        let err = controller
            .sign_up("Ann", "ann@example.com", password, password)
            .await
            .expect_err("too short");
        assert_eq!(err, ClientError::Validation(ValidationError::PasswordTooShort));
    }

    let err = controller
        .sign_up("Ann", "ann@example.com", "longenough", "longenougH")
        .await
        .expect_err("mismatch");
    assert_eq!(err, ClientError::Validation(ValidationError::PasswordMismatch));
    assert_eq!(
        surface.message(FormId::Signup),
        Some(FormMessage::Error("Passwords do not match".to_string()))
    );
    assert_eq!(backend.calls("sign_up"), 0);
}

#[tokio::test(start_paused = true)]
async fn sign_up_success_shows_notice_then_returns_to_login() {
    let backend = RecordingBackend::new();
    let surface = RecordingSurface::new();
    let mut controller = BlogController::new(backend.clone(), surface.clone());
    controller.switch_auth_tab(AuthTab::Signup);

    controller
        .sign_up("Ann", "ann@example.com", "secret1", "secret1")
        .await
        .expect("sign up");

    assert_eq!(
        surface.message(FormId::Signup),
        Some(FormMessage::Success(SIGN_UP_NOTICE.to_string()))
    );
    assert!(surface.log.lock().expect("log").resets.contains(&FormId::Signup));
    assert_eq!(surface.log.lock().expect("log").tab, Some(AuthTab::Signup));

    tokio::time::sleep(NOTICE_DELAY + Duration::from_millis(1)).await;
    assert_eq!(surface.log.lock().expect("log").tab, Some(AuthTab::Login));
}

#[tokio::test]
async fn sign_up_backend_error_is_shown_verbatim() {
    let backend = RecordingBackend::new();
    register(&backend, "", "ann@example.com").await;
    let surface = RecordingSurface::new();
    let mut controller = BlogController::new(backend.clone(), surface.clone());

    let err = controller
        .sign_up("Ann", "ann@example.com", "secret1", "secret1")
        .await
        .expect_err("duplicate");

    assert!(matches!(err, ClientError::Backend(_)));
    assert_eq!(
        surface.message(FormId::Signup),
        Some(FormMessage::Error("User already registered".to_string()))
    );
}

#[tokio::test]
async fn create_post_without_session_is_rejected_locally() {
    let backend = RecordingBackend::new();
    let surface = RecordingSurface::new();
    let mut controller = BlogController::new(backend.clone(), surface.clone());

    let err = controller
        .create_post("title", "content")
        .await
        .expect_err("no session");

    assert_eq!(err, ClientError::AuthRequired);
    assert_eq!(backend.calls("insert_post"), 0);
    assert_eq!(
        surface.message(FormId::CreatePost),
        Some(FormMessage::Error(
            "You must be logged in to create a post".to_string()
        ))
    );
}

#[tokio::test(start_paused = true)]
async fn created_post_is_stored_raw_and_rendered_escaped() {
    let backend = RecordingBackend::new();
    register(&backend, "Writer", "writer@example.com").await;
    let surface = RecordingSurface::new();
    let mut controller = BlogController::new(backend.clone(), surface.clone());
    controller
        .sign_in("writer@example.com", "hunter22")
        .await
        .expect("sign in");

    let post = controller
        .create_post("Hello & <b>World</b>", "first post")
        .await
        .expect("create");

    assert_eq!(post.title, "Hello & <b>World</b>");
    assert_eq!(post.author_name, "Writer");
    let stored = backend.inner.posts().await;
    assert_eq!(stored[0].title, "Hello & <b>World</b>");

    let feed = surface.last_feed().expect("feed");
    let html = feed.to_html();
    assert!(html.contains("Hello &amp; &lt;b&gt;World&lt;/b&gt;"));
    assert!(html.contains("blog-post-delete"));

    assert!(surface.log.lock().expect("log").resets.contains(&FormId::CreatePost));
    assert_eq!(
        surface.message(FormId::CreatePost),
        Some(FormMessage::Success(PUBLISH_NOTICE.to_string()))
    );
    tokio::time::sleep(NOTICE_DELAY + Duration::from_millis(1)).await;
    assert_eq!(surface.message(FormId::CreatePost), Some(FormMessage::Cleared));
}

#[tokio::test]
async fn create_post_backend_error_is_prefixed() {
    let backend = RecordingBackend::new();
    register(&backend, "", "writer@example.com").await;
    backend.fail(
        "insert_post",
        BackendError::new(ErrorCode::Forbidden, "permission denied for table blogs"),
    );
    let surface = RecordingSurface::new();
    let mut controller = BlogController::new(backend.clone(), surface.clone());
    controller
        .sign_in("writer@example.com", "hunter22")
        .await
        .expect("sign in");

    controller
        .create_post("t", "c")
        .await
        .expect_err("insert fails");

    assert_eq!(
        surface.message(FormId::CreatePost),
        Some(FormMessage::Error(
            "Error creating blog post: permission denied for table blogs".to_string()
        ))
    );
}

#[tokio::test]
async fn sort_preference_controls_feed_order() {
    let backend = RecordingBackend::new();
    register(&backend, "", "writer@example.com").await;
    let surface = RecordingSurface::new();
    let mut controller = BlogController::new(backend.clone(), surface.clone());
    controller
        .sign_in("writer@example.com", "hunter22")
        .await
        .expect("sign in");
    let user = controller.current_user().cloned().expect("user");

    for (title, ts) in [
        ("T2", "2024-02-01T00:00:00Z"),
        ("T1", "2024-01-01T00:00:00Z"),
        ("T3", "2024-03-01T00:00:00Z"),
    ] {
        backend
            .inner
            .insert_post(post_at(&user, title, ts))
            .await
            .expect("insert");
    }

    controller.load_posts().await;
    assert_eq!(
        feed_titles(&surface.last_feed().expect("feed")),
        vec!["T3", "T2", "T1"]
    );

    controller.set_sort_order(SortOrder::Oldest).await;
    assert_eq!(controller.state().sort, SortOrder::Oldest);
    assert_eq!(
        feed_titles(&surface.last_feed().expect("feed")),
        vec!["T1", "T2", "T3"]
    );
}

#[tokio::test]
async fn foreign_posts_have_no_delete_control_and_backend_refuses() {
    let backend = RecordingBackend::new();
    register(&backend, "Owner", "owner@example.com").await;
    register(&backend, "Visitor", "visitor@example.com").await;
    let owner = backend
        .inner
        .sign_in("owner@example.com", "hunter22")
        .await
        .expect("owner");
    let post = backend
        .inner
        .insert_post(NewPost::authored_by(&owner.user, "mine", "body"))
        .await
        .expect("insert");

    let surface = RecordingSurface::new();
    let mut controller = BlogController::new(backend.clone(), surface.clone());
    controller
        .sign_in("visitor@example.com", "hunter22")
        .await
        .expect("sign in");

    let feed = surface.last_feed().expect("feed");
    match &feed {
        Feed::Posts(cards) => {
            let card: &PostCard = &cards[0];
            assert!(!card.can_delete);
        }
        other => panic!("unexpected feed: {other:?}"),
    }
    assert!(!feed.to_html().contains("blog-post-delete"));

    controller
        .delete_post(post.id)
        .await
        .expect_err("backend refuses");
    assert_eq!(
        surface.alerts(),
        vec![format!("Error deleting post: permission denied to delete post {}", post.id)]
    );
    assert_eq!(backend.inner.posts().await.len(), 1);
}

#[tokio::test]
async fn delete_requires_confirmation() {
    let backend = RecordingBackend::new();
    register(&backend, "", "owner@example.com").await;
    let surface = RecordingSurface::declining();
    let mut controller = BlogController::new(backend.clone(), surface.clone());
    controller
        .sign_in("owner@example.com", "hunter22")
        .await
        .expect("sign in");
    let post = controller.create_post("t", "c").await.expect("create");

    let deleted = controller.delete_post(post.id).await.expect("declined");

    assert!(!deleted);
    assert_eq!(backend.calls("delete_post"), 0);
    assert_eq!(
        surface.log.lock().expect("log").confirms,
        vec![DELETE_CONFIRMATION.to_string()]
    );
}

#[tokio::test]
async fn confirmed_delete_reloads_feed() {
    let backend = RecordingBackend::new();
    register(&backend, "", "owner@example.com").await;
    let surface = RecordingSurface::new();
    let mut controller = BlogController::new(backend.clone(), surface.clone());
    controller
        .sign_in("owner@example.com", "hunter22")
        .await
        .expect("sign in");
    let post = controller.create_post("t", "c").await.expect("create");

    assert!(controller.delete_post(post.id).await.expect("delete"));
    assert_eq!(surface.last_feed(), Some(Feed::Empty));
}

#[tokio::test]
async fn feed_failure_renders_generic_placeholder() {
    let backend = RecordingBackend::new();
    backend.fail(
        "select_posts",
        BackendError::new(ErrorCode::Internal, "relation \"blogs\" does not exist"),
    );
    register(&backend, "", "reader@example.com").await;
    let surface = RecordingSurface::new();
    let mut controller = BlogController::new(backend.clone(), surface.clone());

    controller
        .sign_in("reader@example.com", "hunter22")
        .await
        .expect("sign in");

    assert_eq!(backend.calls("select_posts"), 1);
    assert_eq!(surface.last_feed(), Some(Feed::LoadFailed));
    assert!(!surface
        .last_feed()
        .expect("feed")
        .to_html()
        .contains("does not exist"));
}

#[tokio::test]
async fn sign_out_clears_state_even_when_backend_fails() {
    let backend = RecordingBackend::new();
    register(&backend, "", "reader@example.com").await;
    backend.fail("sign_out", BackendError::transport("connection reset"));
    let surface = RecordingSurface::new();
    let mut controller = BlogController::new(backend.clone(), surface.clone());
    controller
        .sign_in("reader@example.com", "hunter22")
        .await
        .expect("sign in");
    surface.set_form_message(FormId::CreatePost, FormMessage::Error("stale".into()));

    controller.sign_out().await;

    assert!(controller.current_user().is_none());
    assert_eq!(surface.section(), Section::Auth);
    for form in FormId::ALL {
        assert_eq!(surface.message(form), Some(FormMessage::Cleared));
        assert!(surface.log.lock().expect("log").resets.contains(&form));
    }
}

#[tokio::test]
async fn expired_confirmation_link_alerts_and_clears_fragment() {
    let backend = RecordingBackend::new();
    let surface = RecordingSurface::with_fragment(Some(
        "#error=access_denied&error_code=otp_expired&error_description=Email+link+is+invalid+or+has+expired",
    ));
    let mut controller = BlogController::new(backend.clone(), surface.clone());

    controller.start(fast_policy()).await.expect("start");

    assert_eq!(surface.alerts(), vec![EXPIRED_LINK_ALERT.to_string()]);
    assert_eq!(surface.location_fragment(), None);
    assert_eq!(backend.calls("set_session"), 0);
    assert!(controller.current_user().is_none());
    assert_eq!(surface.section(), Section::Auth);
}

#[tokio::test]
async fn confirmation_tokens_establish_session_once() {
    let backend = RecordingBackend::new();
    register(&backend, "Ann", "ann@example.com").await;
    let (access, refresh) = backend
        .inner
        .issue_tokens("ann@example.com")
        .await
        .expect("tokens");
    let surface = RecordingSurface::with_fragment(Some(&format!(
        "#access_token={access}&refresh_token={refresh}&type=signup"
    )));
    let mut controller = BlogController::new(backend.clone(), surface.clone());

    controller.start(fast_policy()).await.expect("start");

    assert_eq!(surface.location_fragment(), None);
    assert_eq!(surface.section(), Section::App("Ann".to_string()));
    assert_eq!(backend.calls("set_session"), 1);
    assert_eq!(backend.calls("select_posts"), 1);

    controller.handle_email_confirmation_redirect().await;
    assert_eq!(backend.calls("set_session"), 1);
}

#[tokio::test(start_paused = true)]
async fn unavailable_backend_is_fatal() {
    let backend = RecordingBackend::new();
    backend.inner.set_ready(false);
    let surface = RecordingSurface::new();
    let mut controller = BlogController::new(backend.clone(), surface.clone());

    let err = match controller.start(fast_policy()).await {
        Ok(_) => panic!("startup should fail"),
        Err(err) => err,
    };

    assert_eq!(err, ClientError::Startup(STARTUP_FAILURE.to_string()));
    assert_eq!(backend.calls("is_ready"), 3);
    assert_eq!(backend.calls("current_session"), 0);
    let fatal = surface.log.lock().expect("log").fatal.clone().expect("fatal");
    assert!(fatal.contains(STARTUP_FAILURE));
}

#[tokio::test(start_paused = true)]
async fn readiness_counter_stops_on_success() {
    let backend = RecordingBackend::new();

    let readiness = wait_for_backend(backend.as_ref(), fast_policy()).await;

    assert_eq!(readiness, Readiness::Ready { attempts: 1 });
    assert_eq!(backend.calls("is_ready"), 1);
}

#[tokio::test]
async fn signed_out_event_from_another_flow_returns_to_auth_view() {
    let backend = RecordingBackend::new();
    register(&backend, "", "reader@example.com").await;
    let surface = RecordingSurface::new();
    let mut controller = BlogController::new(backend.clone(), surface.clone());
    controller
        .sign_in("reader@example.com", "hunter22")
        .await
        .expect("sign in");

    controller.handle_auth_event(AuthEvent::SignedOut).await;

    assert!(controller.current_user().is_none());
    assert_eq!(surface.section(), Section::Auth);
    let viewer: Option<UserId> = controller.current_user().map(|u| u.id);
    assert_eq!(viewer, None);
}

#[tokio::test]
async fn feed_is_not_loaded_while_signed_out() {
    let backend = RecordingBackend::new();
    register(&backend, "", "reader@example.com").await;
    let surface = RecordingSurface::new();
    let mut controller = BlogController::new(backend.clone(), surface.clone());
    controller.start(fast_policy()).await.expect("start");

    controller.set_sort_order(SortOrder::Oldest).await;
    controller.load_posts().await;

    assert_eq!(surface.section(), Section::Auth);
    assert_eq!(backend.calls("select_posts"), 0);
    assert_eq!(surface.feed_count(), 0);
    assert_eq!(controller.state().sort, SortOrder::Oldest);

    controller
        .sign_in("reader@example.com", "hunter22")
        .await
        .expect("sign in");
    assert_eq!(backend.calls("select_posts"), 1);
}

#[tokio::test(start_paused = true)]
async fn publish_notice_timer_does_not_clear_a_later_error() {
    let backend = RecordingBackend::new();
    register(&backend, "", "writer@example.com").await;
    let surface = RecordingSurface::new();
    let mut controller = BlogController::new(backend.clone(), surface.clone());
    controller
        .sign_in("writer@example.com", "hunter22")
        .await
        .expect("sign in");

    controller.create_post("first", "ok").await.expect("first publish");
    tokio::time::sleep(Duration::from_secs(1)).await;

    backend.fail(
        "insert_post",
        BackendError::new(ErrorCode::Internal, "db down"),
    );
    controller
        .create_post("second", "fails")
        .await
        .expect_err("second publish");

    tokio::time::sleep(NOTICE_DELAY + Duration::from_millis(100)).await;
    assert_eq!(
        surface.message(FormId::CreatePost),
        Some(FormMessage::Error(
            "Error creating blog post: db down".to_string()
        ))
    );
}
