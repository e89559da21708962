use async_trait::async_trait;

use crate::render::Feed;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormId {
    Login,
    Signup,
    CreatePost,
}

impl FormId {
    pub const ALL: [FormId; 3] = [FormId::Login, FormId::Signup, FormId::CreatePost];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthTab {
    Login,
    Signup,
}

/// Inline text under a form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormMessage {
    Cleared,
    Error(String),
    Success(String),
}

/// The page the controller draws on: sections, forms, the feed container,
/// dialogs and the page location.
#[async_trait]
pub trait PageSurface: Send + Sync {
    fn show_auth_section(&self);
    fn show_app_section(&self, display_name: &str);
    fn switch_auth_tab(&self, tab: AuthTab);
    fn set_form_message(&self, form: FormId, message: FormMessage);
    fn reset_form(&self, form: FormId);
    fn render_feed(&self, feed: &Feed);
    fn alert(&self, message: &str);
    async fn confirm(&self, message: &str) -> bool;
    /// Origin and path of the current page, without query or fragment.
    fn page_url(&self) -> String;
    fn location_fragment(&self) -> Option<String>;
    fn clear_fragment(&self);
    /// Replaces the whole page with an error; used when startup fails.
    fn show_fatal_error(&self, message: &str);
}
