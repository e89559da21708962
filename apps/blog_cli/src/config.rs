use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{bail, Context};
use client_core::{startup::StartupPolicy, SupabaseConfig};
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "blog.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub table: String,
    pub page_url: String,
    pub session_file: Option<PathBuf>,
    pub startup_poll_interval_ms: u64,
    pub startup_max_attempts: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            supabase_url: option_env!("SUPABASE_URL")
                .unwrap_or("https://your-project.supabase.co")
                .into(),
            supabase_anon_key: option_env!("SUPABASE_ANON_KEY")
                .unwrap_or("your-anon-key")
                .into(),
            table: client_core::supabase::DEFAULT_TABLE.into(),
            page_url: "http://localhost:8080/".into(),
            session_file: None,
            startup_poll_interval_ms: 100,
            startup_max_attempts: 20,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    supabase_url: Option<String>,
    supabase_anon_key: Option<String>,
    table: Option<String>,
    page_url: Option<String>,
    session_file: Option<PathBuf>,
    startup_poll_interval_ms: Option<u64>,
    startup_max_attempts: Option<u32>,
}

impl Settings {
    pub fn startup_policy(&self) -> StartupPolicy {
        StartupPolicy {
            interval: Duration::from_millis(self.startup_poll_interval_ms),
            max_attempts: self.startup_max_attempts,
        }
    }

    pub fn supabase_config(&self) -> SupabaseConfig {
        SupabaseConfig {
            url: self.supabase_url.clone(),
            anon_key: self.supabase_anon_key.clone(),
            table: self.table.clone(),
            session_file: self.session_file.clone(),
        }
    }

    /// Placeholder credentials mean the project was never configured.
    pub fn ensure_credentials(&self) -> anyhow::Result<()> {
        if self.supabase_url.contains("your-project") || self.supabase_anon_key == "your-anon-key" {
            bail!(
                "backend credentials are not configured; set SUPABASE_URL and SUPABASE_ANON_KEY \
                 or fill in {DEFAULT_CONFIG_FILE}"
            );
        }
        Ok(())
    }
}

/// Defaults, then the config file, then environment variables.
pub fn load_settings(path: Option<&Path>) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    let (path, required) = match path {
        Some(path) => (path.to_path_buf(), true),
        None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
    };
    match fs::read_to_string(&path) {
        Ok(raw) => {
            let file_cfg: FileSettings = toml::from_str(&raw)
                .with_context(|| format!("failed to parse config file '{}'", path.display()))?;
            apply_file(&mut settings, file_cfg);
        }
        Err(err) if !required && err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read config file '{}'", path.display()))
        }
    }

    apply_env(&mut settings, |key| std::env::var(key).ok());
    Ok(settings)
}

fn apply_file(settings: &mut Settings, file_cfg: FileSettings) {
    if let Some(v) = file_cfg.supabase_url {
        settings.supabase_url = v;
    }
    if let Some(v) = file_cfg.supabase_anon_key {
        settings.supabase_anon_key = v;
    }
    if let Some(v) = file_cfg.table {
        settings.table = v;
    }
    if let Some(v) = file_cfg.page_url {
        settings.page_url = v;
    }
    if file_cfg.session_file.is_some() {
        settings.session_file = file_cfg.session_file;
    }
    if let Some(v) = file_cfg.startup_poll_interval_ms {
        settings.startup_poll_interval_ms = v;
    }
    if let Some(v) = file_cfg.startup_max_attempts {
        settings.startup_max_attempts = v;
    }
}

fn apply_env(settings: &mut Settings, var: impl Fn(&str) -> Option<String>) {
    if let Some(v) = var("SUPABASE_URL") {
        settings.supabase_url = v;
    }
    if let Some(v) = var("APP__SUPABASE_URL") {
        settings.supabase_url = v;
    }

    if let Some(v) = var("SUPABASE_ANON_KEY") {
        settings.supabase_anon_key = v;
    }
    if let Some(v) = var("APP__SUPABASE_ANON_KEY") {
        settings.supabase_anon_key = v;
    }

    if let Some(v) = var("APP__TABLE") {
        settings.table = v;
    }
    if let Some(v) = var("APP__PAGE_URL") {
        settings.page_url = v;
    }
    if let Some(v) = var("APP__SESSION_FILE") {
        settings.session_file = Some(PathBuf::from(v));
    }

    if let Some(v) = var("APP__STARTUP_POLL_INTERVAL_MS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.startup_poll_interval_ms = parsed;
        }
    }
    if let Some(v) = var("APP__STARTUP_MAX_ATTEMPTS") {
        if let Ok(parsed) = v.parse::<u32>() {
            settings.startup_max_attempts = parsed;
        }
    }
}
