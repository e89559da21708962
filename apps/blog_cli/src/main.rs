use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use client_core::{
    startup::StartupPolicy, BlogBackend, BlogController, MemoryBackend, SupabaseBackend,
};
use tracing::debug;
use tracing_subscriber::EnvFilter;
use url::Url;

mod commands;
mod config;
mod terminal;

use commands::{parse_command, Command, HELP};
use config::load_settings;
use terminal::TerminalSurface;

#[derive(Parser, Debug)]
#[command(about = "Terminal client for a hosted single-table blog")]
struct Args {
    /// Config file; defaults to ./blog.toml when present.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Keep accounts and posts in memory instead of using the hosted backend.
    #[arg(long)]
    offline: bool,
    /// Page location, including a confirmation-link fragment if any.
    #[arg(long)]
    page_url: Option<String>,
    /// Write the rendered feed markup to this file on every render.
    #[arg(long)]
    feed_html: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let settings = load_settings(args.config.as_deref())?;
    let raw_page_url = args.page_url.as_deref().unwrap_or(&settings.page_url);
    let page_url =
        Url::parse(raw_page_url).with_context(|| format!("invalid page url '{raw_page_url}'"))?;
    let surface = Arc::new(TerminalSurface::new(page_url, args.feed_html));
    let policy = settings.startup_policy();

    if args.offline {
        return run(Arc::new(MemoryBackend::new()), surface, policy).await;
    }

    settings.ensure_credentials()?;
    let backend = SupabaseBackend::new(settings.supabase_config());
    backend.restore_session().await;
    run(Arc::new(backend), surface, policy).await
}

async fn run<B>(backend: Arc<B>, surface: Arc<TerminalSurface>, policy: StartupPolicy) -> Result<()>
where
    B: BlogBackend + 'static,
{
    let result = session(backend, Arc::clone(&surface), policy).await;
    surface.close().await;
    result
}

async fn session<B>(
    backend: Arc<B>,
    surface: Arc<TerminalSurface>,
    policy: StartupPolicy,
) -> Result<()>
where
    B: BlogBackend + 'static,
{
    let mut controller = BlogController::new(backend, Arc::clone(&surface));
    let mut events = controller.start(policy).await?;
    surface.notice(HELP);

    loop {
        surface.prompt();
        tokio::select! {
            line = surface.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break;
                };
                match parse_command(&line) {
                    Ok(None) => {}
                    Ok(Some(Command::Quit)) => break,
                    Ok(Some(command)) => dispatch(&mut controller, &surface, command).await,
                    Err(message) => surface.notice(&message),
                }
            }
            Some(event) = events.next() => {
                debug!(?event, "auth state changed");
                controller.handle_auth_event(event).await;
            }
        }
    }
    Ok(())
}

async fn dispatch<B>(
    controller: &mut BlogController<B, TerminalSurface>,
    surface: &TerminalSurface,
    command: Command,
) where
    B: BlogBackend + 'static,
{
    let result = match command {
        Command::Login { email, password } => controller.sign_in(&email, &password).await,
        Command::Signup {
            name,
            email,
            password,
            confirm_password,
        } => {
            controller
                .sign_up(&name, &email, &password, &confirm_password)
                .await
        }
        Command::Logout => {
            controller.sign_out().await;
            Ok(())
        }
        Command::Tab(tab) => {
            controller.switch_auth_tab(tab);
            Ok(())
        }
        Command::Post { title, content } => {
            controller.create_post(&title, &content).await.map(|_| ())
        }
        Command::List => {
            controller.load_posts().await;
            Ok(())
        }
        Command::Sort(order) => {
            controller.set_sort_order(order).await;
            Ok(())
        }
        Command::Delete(id) => controller.delete_post(id).await.map(|_| ()),
        Command::Help => {
            surface.notice(HELP);
            Ok(())
        }
        Command::Quit => Ok(()),
    };
    if let Err(err) = result {
        debug!(error = %err, "command failed");
    }
}
