//! Line commands typed at the prompt. They stand in for the page's buttons
//! and form submissions.

use client_core::AuthTab;
use shared::domain::{PostId, SortOrder};

pub const HELP: &str = "\
commands:
  login <email> <password>
  signup <name> <email> <password> <confirm>   (use \"\" for no name)
  logout
  tab login|signup
  post <title> | <content>
  list
  sort newest|oldest
  delete <id>
  help
  quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Login {
        email: String,
        password: String,
    },
    Signup {
        name: String,
        email: String,
        password: String,
        confirm_password: String,
    },
    Logout,
    Tab(AuthTab),
    Post {
        title: String,
        content: String,
    },
    List,
    Sort(SortOrder),
    Delete(PostId),
    Help,
    Quit,
}

pub fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (verb, rest) = line
        .split_once(char::is_whitespace)
        .map(|(verb, rest)| (verb, rest.trim()))
        .unwrap_or((line, ""));

    let command = match verb.to_ascii_lowercase().as_str() {
        "login" => match words(rest).as_slice() {
            [email, password] => Command::Login {
                email: email.clone(),
                password: password.clone(),
            },
            _ => return Err("usage: login <email> <password>".into()),
        },
        "signup" => match words(rest).as_slice() {
            [name, email, password, confirm] => Command::Signup {
                name: name.clone(),
                email: email.clone(),
                password: password.clone(),
                confirm_password: confirm.clone(),
            },
            _ => return Err("usage: signup <name> <email> <password> <confirm>".into()),
        },
        "logout" => Command::Logout,
        "tab" => match rest {
            "login" => Command::Tab(AuthTab::Login),
            "signup" => Command::Tab(AuthTab::Signup),
            _ => return Err("usage: tab login|signup".into()),
        },
        "post" => {
            let (title, content) = rest
                .split_once('|')
                .ok_or_else(|| "usage: post <title> | <content>".to_string())?;
            Command::Post {
                title: title.trim().to_string(),
                content: content.trim().to_string(),
            }
        }
        "list" => Command::List,
        "sort" => Command::Sort(rest.parse()?),
        "delete" => {
            let id = rest
                .parse::<i64>()
                .map_err(|_| format!("invalid post id '{rest}'"))?;
            Command::Delete(PostId(id))
        }
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(format!("unknown command '{other}'; type help")),
    };
    Ok(Some(command))
}

/// Whitespace-separated words; double quotes group words and `""` is an
/// empty word.
fn words(input: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut started = false;

    for ch in input.chars() {
        match ch {
            '"' => {
                quoted = !quoted;
                started = true;
            }
            c if c.is_whitespace() && !quoted => {
                if started {
                    out.push(std::mem::take(&mut current));
                    started = false;
                }
            }
            c => {
                current.push(c);
                started = true;
            }
        }
    }
    if started {
        out.push(current);
    }
    out
}
