//! Markup for the post feed. All user-supplied text goes through
//! [`escape_html`] before it is placed in a template.

use std::fmt::Write as _;

use chrono::{DateTime, Local, TimeZone, Utc};
use shared::domain::{Post, UserId};

pub const NO_POSTS_MESSAGE: &str = "No blog posts yet. Be the first to create one!";
pub const LOAD_ERROR_MESSAGE: &str = "Error loading blog posts";

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#039;"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Short en-US date (`Mar 5, 2024`) in the given zone.
pub fn format_post_date<Tz: TimeZone>(created_at: &DateTime<Utc>, tz: &Tz) -> String
where
    Tz::Offset: std::fmt::Display,
{
    created_at
        .with_timezone(tz)
        .format("%b %-d, %Y")
        .to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostCard {
    pub post: Post,
    pub date: String,
    pub can_delete: bool,
}

impl PostCard {
    pub fn new<Tz: TimeZone>(post: Post, viewer: Option<UserId>, tz: &Tz) -> Self
    where
        Tz::Offset: std::fmt::Display,
    {
        let can_delete = viewer == Some(post.user_id);
        let date = format_post_date(&post.created_at, tz);
        Self {
            post,
            date,
            can_delete,
        }
    }

    pub fn to_html(&self) -> String {
        let delete_button = if self.can_delete {
            format!(
                r#"<button class="blog-post-delete" data-post-id="{}">Delete</button>"#,
                self.post.id
            )
        } else {
            String::new()
        };

        format!(
            r#"<div class="blog-post">
    <div class="blog-post-header">
        <h3 class="blog-post-title">{title}</h3>
        {delete_button}
    </div>
    <p class="blog-post-meta">
        By <span class="blog-post-author">{author}</span> &bull; {date}
    </p>
    <p class="blog-post-content">{content}</p>
</div>"#,
            title = escape_html(&self.post.title),
            author = escape_html(&self.post.author_name),
            date = self.date,
            content = escape_html(&self.post.content),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Feed {
    Posts(Vec<PostCard>),
    Empty,
    LoadFailed,
}

impl Feed {
    pub fn from_posts(posts: Vec<Post>, viewer: Option<UserId>) -> Self {
        Self::from_posts_in(posts, viewer, &Local)
    }

    pub fn from_posts_in<Tz: TimeZone>(posts: Vec<Post>, viewer: Option<UserId>, tz: &Tz) -> Self
    where
        Tz::Offset: std::fmt::Display,
    {
        if posts.is_empty() {
            return Feed::Empty;
        }
        Feed::Posts(
            posts
                .into_iter()
                .map(|post| PostCard::new(post, viewer, tz))
                .collect(),
        )
    }

    pub fn to_html(&self) -> String {
        match self {
            Feed::Posts(cards) => {
                let mut html = String::new();
                for card in cards {
                    let _ = writeln!(html, "{}", card.to_html());
                }
                html
            }
            Feed::Empty => format!(r#"<p class="no-posts">{NO_POSTS_MESSAGE}</p>"#),
            Feed::LoadFailed => format!(r#"<p class="no-posts">{LOAD_ERROR_MESSAGE}</p>"#),
        }
    }
}

pub fn fatal_error_html(message: &str) -> String {
    format!(
        r#"<div style="text-align: center; padding: 50px; color: red;"><h1>Error</h1><p>{}</p></div>"#,
        escape_html(message)
    )
}
