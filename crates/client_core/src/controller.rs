use std::{sync::Arc, time::Duration};

use shared::domain::{AuthEvent, NewPost, Post, PostId, SortOrder, User};
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

use crate::{
    backend::{AuthEventStream, BlogBackend, SignUpRequest},
    error::{validate_sign_up_passwords, ClientError},
    fragment::RedirectFragment,
    render::Feed,
    startup::{wait_for_backend, Readiness, StartupPolicy},
    surface::{AuthTab, FormId, FormMessage, PageSurface},
    view::{ViewEffect, ViewState},
};

pub const NOTICE_DELAY: Duration = Duration::from_secs(3);
pub const SIGN_UP_NOTICE: &str =
    "Account created! Please check your email to verify your account.";
pub const PUBLISH_NOTICE: &str = "Blog post published successfully!";
pub const EXPIRED_LINK_ALERT: &str = "Email link has expired. Please sign up again.";
pub const DELETE_CONFIRMATION: &str = "Are you sure you want to delete this post?";
pub const STARTUP_FAILURE: &str =
    "Failed to reach the blog backend. Please check your configuration.";

#[derive(Debug, Clone, Default)]
pub struct AppState {
    pub view: ViewState,
    pub sort: SortOrder,
    redirect_handled: bool,
}

impl AppState {
    pub fn current_user(&self) -> Option<&User> {
        self.view.current_user()
    }
}

pub struct BlogController<B: ?Sized, S: ?Sized> {
    backend: Arc<B>,
    surface: Arc<S>,
    state: AppState,
    publish_notice_timer: Option<AbortHandle>,
}

impl<B, S> BlogController<B, S>
where
    B: BlogBackend + ?Sized + 'static,
    S: PageSurface + ?Sized + 'static,
{
    pub fn new(backend: Arc<B>, surface: Arc<S>) -> Self {
        Self {
            backend,
            surface,
            state: AppState::default(),
            publish_notice_timer: None,
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn current_user(&self) -> Option<&User> {
        self.state.current_user()
    }

    /// Waits for the backend, subscribes to auth notifications, detects an
    /// existing session and consumes a confirmation redirect if the page URL
    /// carries one.
    pub async fn start(&mut self, policy: StartupPolicy) -> Result<AuthEventStream, ClientError> {
        if let Readiness::Unavailable { attempts } =
            wait_for_backend(self.backend.as_ref(), policy).await
        {
            error!(attempts, "backend client did not become ready");
            self.surface.show_fatal_error(STARTUP_FAILURE);
            return Err(ClientError::Startup(STARTUP_FAILURE.to_string()));
        }

        let events = AuthEventStream::new(self.backend.subscribe_auth_events());
        self.initialize().await;
        self.handle_email_confirmation_redirect().await;
        Ok(events)
    }

    pub async fn initialize(&mut self) {
        let session = match self.backend.current_session().await {
            Ok(session) => session,
            Err(err) => {
                error!(error = %err, "error checking auth status");
                None
            }
        };
        let (next, effects) = self.state.view.after_session_lookup(session.as_ref());
        self.state.view = next;
        self.apply_effects(effects).await;
    }

    pub async fn handle_auth_event(&mut self, event: AuthEvent) {
        let (next, effects) = self.state.view.transition(&event);
        self.state.view = next;
        self.apply_effects(effects).await;
    }

    async fn apply_effects(&mut self, effects: Vec<ViewEffect>) {
        for effect in effects {
            match effect {
                ViewEffect::ShowAuthSection => self.surface.show_auth_section(),
                ViewEffect::ShowAppSection { display_name } => {
                    self.surface.show_app_section(&display_name)
                }
                ViewEffect::LoadFeed => self.load_posts().await,
                ViewEffect::ClearForms => self.clear_forms(),
            }
        }
    }

    /// Runs at most once per controller; later calls do nothing.
    pub async fn handle_email_confirmation_redirect(&mut self) {
        if self.state.redirect_handled {
            return;
        }
        self.state.redirect_handled = true;

        let Some(raw) = self.surface.location_fragment() else {
            return;
        };
        match RedirectFragment::parse(&raw) {
            RedirectFragment::Empty => {}
            fragment @ RedirectFragment::Error { .. } => {
                warn!(?fragment, "auth error from redirect");
                if fragment.is_expired_link() {
                    self.surface.alert(EXPIRED_LINK_ALERT);
                    self.surface.clear_fragment();
                }
            }
            RedirectFragment::Tokens {
                access_token,
                refresh_token,
            } => match self.backend.set_session(&access_token, &refresh_token).await {
                Ok(session) => {
                    info!(user_id = %session.user.id, "email confirmed");
                    self.surface.clear_fragment();
                    self.initialize().await;
                }
                Err(err) => error!(error = %err, "error setting session from redirect"),
            },
        }
    }

    pub fn switch_auth_tab(&self, tab: AuthTab) {
        self.surface.switch_auth_tab(tab);
    }

    pub async fn sign_up(
        &mut self,
        name: &str,
        email: &str,
        password: &str,
        confirm_password: &str,
    ) -> Result<(), ClientError> {
        self.surface
            .set_form_message(FormId::Signup, FormMessage::Cleared);

        if let Err(err) = validate_sign_up_passwords(password, confirm_password) {
            self.surface
                .set_form_message(FormId::Signup, FormMessage::Error(err.to_string()));
            return Err(err.into());
        }

        let request = SignUpRequest {
            name: name.to_string(),
            email: email.to_string(),
            password: password.to_string(),
            redirect_to: self.surface.page_url(),
        };
        let outcome = match self.backend.sign_up(request).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(error = %err, "signup rejected");
                self.surface
                    .set_form_message(FormId::Signup, FormMessage::Error(err.message.clone()));
                return Err(err.into());
            }
        };

        info!(user_id = %outcome.user.id, "account created");
        self.surface.set_form_message(
            FormId::Signup,
            FormMessage::Success(SIGN_UP_NOTICE.to_string()),
        );
        self.surface.reset_form(FormId::Signup);

        let surface = Arc::clone(&self.surface);
        tokio::spawn(async move {
            tokio::time::sleep(NOTICE_DELAY).await;
            surface.switch_auth_tab(AuthTab::Login);
        });

        if let Some(session) = outcome.session {
            self.handle_auth_event(AuthEvent::SignedIn(session)).await;
        }
        Ok(())
    }

    pub async fn sign_in(&mut self, email: &str, password: &str) -> Result<(), ClientError> {
        self.surface
            .set_form_message(FormId::Login, FormMessage::Cleared);

        match self.backend.sign_in(email, password).await {
            Ok(session) => {
                info!(user_id = %session.user.id, "signed in");
                self.handle_auth_event(AuthEvent::SignedIn(session)).await;
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "login rejected");
                self.surface
                    .set_form_message(FormId::Login, FormMessage::Error(err.message.clone()));
                Err(err.into())
            }
        }
    }

    /// Local state always moves to the signed-out view; a backend failure is
    /// only logged.
    pub async fn sign_out(&mut self) {
        if let Err(err) = self.backend.sign_out().await {
            error!(error = %err, "logout error");
        }
        self.handle_auth_event(AuthEvent::SignedOut).await;
    }

    /// The preference is kept while signed out and applies to the next load.
    pub async fn set_sort_order(&mut self, order: SortOrder) {
        self.state.sort = order;
        self.load_posts().await;
    }

    /// The feed only exists in the signed-in view; signed out this does nothing.
    pub async fn load_posts(&mut self) {
        let Some(viewer) = self.current_user().map(|user| user.id) else {
            debug!("feed load skipped while signed out");
            return;
        };
        let viewer = Some(viewer);
        let feed = match self.backend.select_posts(self.state.sort).await {
            Ok(posts) => Feed::from_posts(posts, viewer),
            Err(err) => {
                error!(error = %err, "load posts error");
                Feed::LoadFailed
            }
        };
        self.surface.render_feed(&feed);
    }

    pub async fn create_post(&mut self, title: &str, content: &str) -> Result<Post, ClientError> {
        let Some(user) = self.current_user().cloned() else {
            self.surface.set_form_message(
                FormId::CreatePost,
                FormMessage::Error(ClientError::AuthRequired.to_string()),
            );
            return Err(ClientError::AuthRequired);
        };
        if let Some(timer) = self.publish_notice_timer.take() {
            timer.abort();
        }
        self.surface
            .set_form_message(FormId::CreatePost, FormMessage::Cleared);

        let post = match self
            .backend
            .insert_post(NewPost::authored_by(&user, title, content))
            .await
        {
            Ok(post) => post,
            Err(err) => {
                error!(error = %err, "create post error");
                self.surface.set_form_message(
                    FormId::CreatePost,
                    FormMessage::Error(format!("Error creating blog post: {}", err.message)),
                );
                return Err(err.into());
            }
        };

        info!(post_id = %post.id, "post published");
        self.surface.reset_form(FormId::CreatePost);
        self.load_posts().await;
        self.surface.set_form_message(
            FormId::CreatePost,
            FormMessage::Success(PUBLISH_NOTICE.to_string()),
        );

        // Aborted by the next publish attempt.
        let surface = Arc::clone(&self.surface);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(NOTICE_DELAY).await;
            surface.set_form_message(FormId::CreatePost, FormMessage::Cleared);
        });
        self.publish_notice_timer = Some(timer.abort_handle());

        Ok(post)
    }

    /// Returns `Ok(false)` when the user declines the confirmation. Ownership
    /// is enforced by the backend, not here.
    pub async fn delete_post(&mut self, id: PostId) -> Result<bool, ClientError> {
        if !self.surface.confirm(DELETE_CONFIRMATION).await {
            return Ok(false);
        }

        match self.backend.delete_post(id).await {
            Ok(()) => {
                info!(post_id = %id, "post deleted");
                self.load_posts().await;
                Ok(true)
            }
            Err(err) => {
                error!(post_id = %id, error = %err, "delete error");
                self.surface
                    .alert(&format!("Error deleting post: {}", err.message));
                Err(err.into())
            }
        }
    }

    pub fn clear_forms(&self) {
        for form in FormId::ALL {
            self.surface.reset_form(form);
            self.surface.set_form_message(form, FormMessage::Cleared);
        }
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
