//! Parsing of the one-time tokens an email-confirmation link leaves in the
//! page URL fragment.

use url::form_urlencoded;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectFragment {
    Empty,
    Tokens {
        access_token: String,
        refresh_token: String,
    },
    Error {
        code: String,
        description: Option<String>,
    },
}

impl RedirectFragment {
    /// Accepts the fragment with or without its leading `#`.
    pub fn parse(fragment: &str) -> Self {
        let raw = fragment.strip_prefix('#').unwrap_or(fragment);
        let mut access_token = None;
        let mut refresh_token = None;
        let mut error = None;
        let mut description = None;
        let mut error_code = None;

        for (key, value) in form_urlencoded::parse(raw.as_bytes()) {
            let value = value.into_owned();
            match key.as_ref() {
                "access_token" => access_token = Some(value),
                "refresh_token" => refresh_token = Some(value),
                "error" => error = Some(value),
                "error_code" => error_code = Some(value),
                "error_description" => description = Some(value),
                _ => {}
            }
        }

        if let Some(code) = error.or(error_code) {
            return RedirectFragment::Error { code, description };
        }
        match (access_token, refresh_token) {
            (Some(access_token), Some(refresh_token))
                if !access_token.is_empty() && !refresh_token.is_empty() =>
            {
                RedirectFragment::Tokens {
                    access_token,
                    refresh_token,
                }
            }
            _ => RedirectFragment::Empty,
        }
    }

    pub fn is_expired_link(&self) -> bool {
        match self {
            RedirectFragment::Error { code, description } => {
                code.contains("expired")
                    || description
                        .as_deref()
                        .is_some_and(|text| text.to_ascii_lowercase().contains("expired"))
            }
            _ => false,
        }
    }
}
