// Explicit credential login, kept apart from passive session negotiation.
//
// Start -> NavigateHome -> NavigateLogin -> EnterUsername
//   -> [EnterUsernameConfirmation] -> EnterPassword -> Submit
//   -> CheckPasswordAccepted -> CheckEmailVerificationRequired -> Valid | Invalid
//
// The feed gives no explicit success signal: a password counts as accepted
// when the page URL moves away from the login form within the observation
// window. A detected email challenge is always Invalid; no remediation is
// attempted.

use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::detect::PageDetector;
use crate::session::SessionManager;
use crate::traits::BrowserSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginStep {
    Start,
    NavigateHome,
    NavigateLogin,
    EnterUsername,
    EnterUsernameConfirmation,
    EnterPassword,
    Submit,
    CheckPasswordAccepted,
    CheckEmailVerificationRequired,
    Valid,
    Invalid(LoginFailure),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginFailure {
    FormMissing,
    ConfirmationRequired,
    PasswordRejected,
    EmailVerificationRequired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    Valid,
    Invalid(LoginFailure),
}

#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    /// Answer for the "confirm your identity" prompt some accounts get.
    pub username_confirmation: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field(
                "username_confirmation",
                &self.username_confirmation.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct LoginConfig {
    pub home_url: String,
    pub login_url: String,
    pub username_input: String,
    pub confirmation_input: String,
    pub password_input: String,
    pub wait_timeout: Duration,
    /// How long to watch for the post-submit redirect.
    pub observe_window: Duration,
}

impl LoginConfig {
    pub fn for_origin(origin: &str) -> Self {
        let origin = origin.trim_end_matches('/');
        Self {
            home_url: format!("{origin}/"),
            login_url: format!("{origin}/i/flow/login"),
            username_input: r#"input[autocomplete="username"]"#.to_string(),
            confirmation_input: r#"input[data-testid="ocfEnterTextTextInput"]"#.to_string(),
            password_input: r#"input[name="password"]"#.to_string(),
            wait_timeout: Duration::from_secs(10),
            observe_window: Duration::from_secs(5),
        }
    }
}

pub struct LoginFlow {
    config: LoginConfig,
    email_challenge: Box<dyn PageDetector>,
}

impl LoginFlow {
    pub fn new(config: LoginConfig, email_challenge: Box<dyn PageDetector>) -> Self {
        Self {
            config,
            email_challenge,
        }
    }

    /// Run the flow once. On `Valid` the session is marked valid; on
    /// `Invalid` or error it is invalidated and the browser released.
    pub async fn run(
        &self,
        sessions: &mut SessionManager,
        credentials: &Credentials,
    ) -> Result<LoginOutcome> {
        let result = match sessions.handle_for_login().await {
            Ok(page) => self.drive(page, credentials).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(LoginOutcome::Valid) => {
                sessions.mark_valid();
                info!("login: session valid");
                Ok(LoginOutcome::Valid)
            }
            Ok(LoginOutcome::Invalid(failure)) => {
                warn!(?failure, "login: rejected");
                sessions.invalidate().await;
                Ok(LoginOutcome::Invalid(failure))
            }
            Err(e) => {
                sessions.invalidate().await;
                Err(e)
            }
        }
    }

    async fn drive(
        &self,
        page: &dyn BrowserSession,
        credentials: &Credentials,
    ) -> Result<LoginOutcome> {
        let cfg = &self.config;
        let mut step = LoginStep::Start;
        let mut url_before_submit = String::new();

        loop {
            debug!(?step, "login: step");
            step = match step {
                LoginStep::Start => LoginStep::NavigateHome,
                LoginStep::NavigateHome => {
                    page.navigate(&cfg.home_url).await?;
                    LoginStep::NavigateLogin
                }
                LoginStep::NavigateLogin => {
                    page.navigate(&cfg.login_url).await?;
                    if page.wait_for(&cfg.username_input, cfg.wait_timeout).await? {
                        LoginStep::EnterUsername
                    } else {
                        LoginStep::Invalid(LoginFailure::FormMissing)
                    }
                }
                LoginStep::EnterUsername => {
                    page.type_text(&cfg.username_input, &credentials.username)
                        .await?;
                    page.press_enter().await?;
                    if page.wait_for(&cfg.confirmation_input, cfg.wait_timeout).await? {
                        LoginStep::EnterUsernameConfirmation
                    } else {
                        LoginStep::EnterPassword
                    }
                }
                LoginStep::EnterUsernameConfirmation => match &credentials.username_confirmation {
                    Some(answer) => {
                        page.type_text(&cfg.confirmation_input, answer).await?;
                        page.press_enter().await?;
                        LoginStep::EnterPassword
                    }
                    None => {
                        LoginStep::Invalid(LoginFailure::ConfirmationRequired)
                    }
                },
                LoginStep::EnterPassword => {
                    if page.wait_for(&cfg.password_input, cfg.wait_timeout).await? {
                        page.type_text(&cfg.password_input, &credentials.password)
                            .await?;
                        LoginStep::Submit
                    } else {
                        LoginStep::Invalid(LoginFailure::FormMissing)
                    }
                }
                LoginStep::Submit => {
                    url_before_submit = page.current_url().await?;
                    page.press_enter().await?;
                    LoginStep::CheckPasswordAccepted
                }
                LoginStep::CheckPasswordAccepted => {
                    tokio::time::sleep(cfg.observe_window).await;
                    let url_after = page.current_url().await?;
                    if url_after == url_before_submit {
                        LoginStep::Invalid(LoginFailure::PasswordRejected)
                    } else {
                        LoginStep::CheckEmailVerificationRequired
                    }
                }
                LoginStep::CheckEmailVerificationRequired => {
                    let text = page.page_text().await.unwrap_or_default();
                    if self.email_challenge.matches(&text) {
                        LoginStep::Invalid(LoginFailure::EmailVerificationRequired)
                    } else {
                        LoginStep::Valid
                    }
                }
                LoginStep::Valid => return Ok(LoginOutcome::Valid),
                LoginStep::Invalid(failure) => return Ok(LoginOutcome::Invalid(failure)),
            };
        }
    }
}
