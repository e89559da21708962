//! Page surface for a terminal: sections and messages are printed, dialogs
//! read from stdin, and the feed markup can be mirrored to a file by a
//! background writer.

use std::{
    io::Write as _,
    path::PathBuf,
    sync::Mutex as StdMutex,
};

use async_trait::async_trait;
use client_core::{
    render::{fatal_error_html, Feed},
    AuthTab, FormId, FormMessage, PageSurface,
};
use tokio::{
    io::{AsyncBufReadExt, BufReader, Lines, Stdin},
    sync::{mpsc, Mutex},
    task::JoinHandle,
};
use tracing::warn;
use url::Url;

pub struct TerminalSurface {
    input: Mutex<Lines<BufReader<Stdin>>>,
    location: StdMutex<Url>,
    mirror: StdMutex<Option<mpsc::UnboundedSender<String>>>,
    writer: StdMutex<Option<JoinHandle<()>>>,
}

fn form_label(form: FormId) -> &'static str {
    match form {
        FormId::Login => "login",
        FormId::Signup => "signup",
        FormId::CreatePost => "post",
    }
}

impl TerminalSurface {
    /// Must be called inside a runtime when `feed_html` is set.
    pub fn new(location: Url, feed_html: Option<PathBuf>) -> Self {
        let (mirror, writer) = match feed_html {
            Some(path) => {
                let (tx, rx) = mpsc::unbounded_channel();
                (Some(tx), Some(tokio::spawn(write_markup(path, rx))))
            }
            None => (None, None),
        };
        Self {
            input: Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
            location: StdMutex::new(location),
            mirror: StdMutex::new(mirror),
            writer: StdMutex::new(writer),
        }
    }

    /// Stops mirroring and waits until queued markup is on disk.
    pub async fn close(&self) {
        drop(lock(&self.mirror).take());
        let writer = lock(&self.writer).take();
        if let Some(writer) = writer {
            if let Err(err) = writer.await {
                warn!(error = %err, "feed markup writer failed");
            }
        }
    }

    /// Next line from stdin, `None` at end of input.
    pub async fn next_line(&self) -> std::io::Result<Option<String>> {
        self.input.lock().await.next_line().await
    }

    pub fn prompt(&self) {
        print!("> ");
        let _ = std::io::stdout().flush();
    }

    pub fn notice(&self, message: &str) {
        println!("{message}");
    }

    fn mirror_html(&self, html: String) {
        if let Some(mirror) = lock(&self.mirror).as_ref() {
            let _ = mirror.send(html);
        }
    }

    fn with_location<T>(&self, f: impl FnOnce(&mut Url) -> T) -> T {
        f(&mut lock(&self.location))
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Writes renders in order; each one replaces the file.
async fn write_markup(path: PathBuf, mut rx: mpsc::UnboundedReceiver<String>) {
    while let Some(html) = rx.recv().await {
        if let Err(err) = tokio::fs::write(&path, html).await {
            warn!(path = %path.display(), error = %err, "failed to write feed markup");
        }
    }
}

#[async_trait]
impl PageSurface for TerminalSurface {
    fn show_auth_section(&self) {
        println!("-- signed out: use `login` or `signup` --");
    }

    fn show_app_section(&self, display_name: &str) {
        println!("-- signed in as {display_name} --");
    }

    fn switch_auth_tab(&self, tab: AuthTab) {
        match tab {
            AuthTab::Login => println!("[auth] login form active"),
            AuthTab::Signup => println!("[auth] signup form active"),
        }
    }

    fn set_form_message(&self, form: FormId, message: FormMessage) {
        match message {
            FormMessage::Cleared => {}
            FormMessage::Error(text) => println!("[{}] error: {text}", form_label(form)),
            FormMessage::Success(text) => println!("[{}] {text}", form_label(form)),
        }
    }

    fn reset_form(&self, _form: FormId) {}

    fn render_feed(&self, feed: &Feed) {
        match feed {
            Feed::Posts(cards) => {
                for card in cards {
                    let delete = if card.can_delete { "  [delete]" } else { "" };
                    println!("#{} {}{delete}", card.post.id, card.post.title);
                    println!("   by {} - {}", card.post.author_name, card.date);
                    println!("   {}", card.post.content);
                }
            }
            Feed::Empty => println!("{}", client_core::render::NO_POSTS_MESSAGE),
            Feed::LoadFailed => println!("{}", client_core::render::LOAD_ERROR_MESSAGE),
        }
        self.mirror_html(feed.to_html());
    }

    fn alert(&self, message: &str) {
        println!("!! {message}");
    }

    async fn confirm(&self, message: &str) -> bool {
        print!("{message} [y/N] ");
        let _ = std::io::stdout().flush();
        match self.next_line().await {
            Ok(Some(answer)) => matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
            _ => false,
        }
    }

    fn page_url(&self) -> String {
        self.with_location(|location| {
            let mut page = location.clone();
            page.set_query(None);
            page.set_fragment(None);
            page.to_string()
        })
    }

    fn location_fragment(&self) -> Option<String> {
        self.with_location(|location| location.fragment().map(str::to_string))
    }

    fn clear_fragment(&self) {
        self.with_location(|location| location.set_fragment(None));
    }

    fn show_fatal_error(&self, message: &str) {
        eprintln!("Error: {message}");
        self.mirror_html(fatal_error_html(message));
    }
}
