//! Two-state view machine. Transitions are pure: they return the next state
//! and the effects the controller has to apply to the page.

use shared::domain::{AuthEvent, Session, User};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ViewState {
    #[default]
    Unauthenticated,
    Authenticated {
        user: User,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewEffect {
    ShowAuthSection,
    ShowAppSection { display_name: String },
    LoadFeed,
    ClearForms,
}

impl ViewState {
    pub fn current_user(&self) -> Option<&User> {
        match self {
            ViewState::Authenticated { user } => Some(user),
            ViewState::Unauthenticated => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, ViewState::Authenticated { .. })
    }

    /// Applies the result of a session lookup. Runs at startup and again after
    /// a confirmation link established a session.
    pub fn after_session_lookup(&self, session: Option<&Session>) -> (ViewState, Vec<ViewEffect>) {
        match (self, session) {
            (_, Some(session)) => self.transition(&AuthEvent::SignedIn(session.clone())),
            (ViewState::Authenticated { .. }, None) => self.transition(&AuthEvent::SignedOut),
            (ViewState::Unauthenticated, None) => {
                (ViewState::Unauthenticated, vec![ViewEffect::ShowAuthSection])
            }
        }
    }

    /// A repeated notification for the state already shown yields no effects,
    /// so a direct call followed by the matching backend event loads the feed
    /// once.
    pub fn transition(&self, event: &AuthEvent) -> (ViewState, Vec<ViewEffect>) {
        match (self, event) {
            (ViewState::Authenticated { user }, AuthEvent::SignedIn(session))
                if *user == session.user =>
            {
                (self.clone(), Vec::new())
            }
            (_, AuthEvent::SignedIn(session)) => signed_in(&session.user),
            (ViewState::Unauthenticated, AuthEvent::SignedOut) => (self.clone(), Vec::new()),
            (ViewState::Authenticated { .. }, AuthEvent::SignedOut) => (
                ViewState::Unauthenticated,
                vec![ViewEffect::ShowAuthSection, ViewEffect::ClearForms],
            ),
        }
    }
}

fn signed_in(user: &User) -> (ViewState, Vec<ViewEffect>) {
    (
        ViewState::Authenticated { user: user.clone() },
        vec![
            ViewEffect::ShowAppSection {
                display_name: user.display_name().to_string(),
            },
            ViewEffect::LoadFeed,
        ],
    )
}
