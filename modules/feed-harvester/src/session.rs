// Session manager: lazy browser session negotiation with a retry cooldown.
//
// Negotiation only launches a browser and configures its viewport; it never
// enters credentials. Credential login is the separate, explicit flow in
// `login.rs`, so a long-lived authenticated profile keeps working without
// re-triggering login on every renewal.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::traits::{BrowserLauncher, BrowserSession, LaunchConfig};

/// Minimum time between negotiation attempts.
pub const DEFAULT_SESSION_COOLDOWN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub cooldown: Duration,
    pub launch: LaunchConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cooldown: DEFAULT_SESSION_COOLDOWN,
            launch: LaunchConfig::default(),
        }
    }
}

/// `valid` is true only while `handle` is live and no rate-limit or auth
/// failure has been seen since the last successful negotiation.
#[derive(Default)]
struct SessionState {
    valid: bool,
    last_check: Option<Instant>,
    handle: Option<Box<dyn BrowserSession>>,
}

pub struct SessionManager {
    launcher: Arc<dyn BrowserLauncher>,
    config: SessionConfig,
    state: SessionState,
}

impl SessionManager {
    pub fn new(launcher: Arc<dyn BrowserLauncher>, config: SessionConfig) -> Self {
        Self {
            launcher,
            config,
            state: SessionState::default(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.state.valid
    }

    /// The live session, if one has been negotiated and not invalidated.
    pub fn session(&self) -> Option<&dyn BrowserSession> {
        if !self.state.valid {
            return None;
        }
        self.state.handle.as_deref()
    }

    /// Make sure a usable session exists.
    ///
    /// Returns `Ok(true)` when a session is ready and `Ok(false)` when the last
    /// attempt was within the cooldown window (caller retries later). A failed
    /// launch is returned as an error and still starts the cooldown.
    pub async fn ensure_session(&mut self) -> Result<bool> {
        if self.state.valid {
            return Ok(true);
        }

        if let Some(last) = self.state.last_check {
            let elapsed = last.elapsed();
            if elapsed < self.config.cooldown {
                debug!(
                    elapsed_secs = elapsed.as_secs(),
                    cooldown_secs = self.config.cooldown.as_secs(),
                    "session: negotiation cooling down"
                );
                return Ok(false);
            }
        }

        self.negotiate().await?;
        Ok(true)
    }

    /// Drop validity and release the browser.
    pub async fn invalidate(&mut self) {
        if self.state.valid {
            info!("session: invalidated");
        }
        self.state.valid = false;
        self.release().await;
    }

    async fn negotiate(&mut self) -> Result<()> {
        self.state.last_check = Some(Instant::now());
        self.release().await;

        info!("session: negotiating");
        let handle = self
            .launcher
            .launch(&self.config.launch)
            .await
            .context("Browser launch failed")?;

        self.state.handle = Some(handle);
        self.state.valid = true;
        info!("session: ready");
        Ok(())
    }

    async fn release(&mut self) {
        if let Some(handle) = self.state.handle.take() {
            if let Err(e) = handle.close().await {
                warn!(error = %e, "session: failed to close browser");
            }
        }
    }

    // --- Login support ---

    /// A browser handle for the login flow, launched if needed. Does not
    /// mark the session valid.
    pub(crate) async fn handle_for_login(&mut self) -> Result<&dyn BrowserSession> {
        if self.state.handle.is_none() {
            let handle = self
                .launcher
                .launch(&self.config.launch)
                .await
                .context("Browser launch failed")?;
            self.state.handle = Some(handle);
        }
        self.state
            .handle
            .as_deref()
            .context("browser handle missing after launch")
    }

    /// Record a successful login.
    pub(crate) fn mark_valid(&mut self) {
        if self.state.handle.is_some() {
            self.state.valid = true;
            self.state.last_check = Some(Instant::now());
        }
    }
}
