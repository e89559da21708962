use std::time::Duration;

use tracing::{debug, info, warn};

use crate::backend::BlogBackend;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartupPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for StartupPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready { attempts: u32 },
    Unavailable { attempts: u32 },
}

/// Polls the backend until it answers or the attempt budget runs out. The
/// attempt counter stops at the first successful check.
pub async fn wait_for_backend<B>(backend: &B, policy: StartupPolicy) -> Readiness
where
    B: BlogBackend + ?Sized,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempts = 0;
    while attempts < max_attempts {
        attempts += 1;
        if backend.is_ready().await {
            info!(attempts, "backend client ready");
            return Readiness::Ready { attempts };
        }
        debug!(attempts, max_attempts, "backend client not ready yet");
        if attempts < max_attempts {
            tokio::time::sleep(policy.interval).await;
        }
    }
    warn!(attempts, "backend client unavailable after retry budget");
    Readiness::Unavailable { attempts }
}
