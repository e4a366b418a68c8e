//! Login/navigation state machine for the portal.
//!
//! Reproduces the human click-path from the unauthenticated login form to a
//! direct request against the internal usage endpoint. The driver never
//! looks at responses; whether the payload was captured is the response
//! watcher's verdict. Steps run over the [`PortalPage`] trait so the machine
//! is exercised without a browser in tests.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::PortalConfig;
use crate::credentials::Credentials;
use crate::logging::ExtractorLogger;

/// Error surfaced by a [`PortalPage`] implementation.
#[derive(Debug, Error)]
pub enum PageError {
    #[error("page operation failed: {0}")]
    Message(String),
}

/// Driver-visible surface of one portal page.
#[async_trait]
pub trait PortalPage: Send + Sync {
    /// Navigate and wait for the document load to finish.
    async fn navigate(&self, url: &str) -> Result<(), PageError>;

    /// Wait for the navigation a form submit triggered to quiesce. This is
    /// best-effort; the element polls below provide the real readiness
    /// signal for the next step.
    async fn await_settled(&self) -> Result<(), PageError>;

    /// Poll for an element's presence; `false` when still absent at the
    /// timeout.
    async fn wait_for_element(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> Result<bool, PageError>;

    async fn type_text(&self, selector: &str, text: &str) -> Result<(), PageError>;

    async fn click(&self, selector: &str) -> Result<(), PageError>;

    /// Fixed settling delay where no readiness signal exists.
    async fn settle_delay(&self, delay: Duration);
}

/// Logical steps of the human login path. These are page-flow states, not
/// network protocol states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginStep {
    LoginPage,
    EnterIdentity,
    EnterSecret,
    PostLoginNavigate,
    OptionalReauth,
    RequestData,
}

impl LoginStep {
    pub const FIRST: LoginStep = LoginStep::LoginPage;

    /// Next step in the sequence; `None` after the terminal data request.
    pub fn next(self) -> Option<LoginStep> {
        match self {
            LoginStep::LoginPage => Some(LoginStep::EnterIdentity),
            LoginStep::EnterIdentity => Some(LoginStep::EnterSecret),
            LoginStep::EnterSecret => Some(LoginStep::PostLoginNavigate),
            LoginStep::PostLoginNavigate => Some(LoginStep::OptionalReauth),
            LoginStep::OptionalReauth => Some(LoginStep::RequestData),
            LoginStep::RequestData => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            LoginStep::LoginPage => "login-page",
            LoginStep::EnterIdentity => "enter-identity",
            LoginStep::EnterSecret => "enter-secret",
            LoginStep::PostLoginNavigate => "post-login-navigate",
            LoginStep::OptionalReauth => "optional-reauth",
            LoginStep::RequestData => "request-data",
        }
    }
}

/// Errors surfaced by the driver. Optional-step failures are swallowed and
/// never appear here.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("timed out waiting for element '{selector}' during {step}")]
    ElementTimeout {
        step: &'static str,
        selector: String,
    },
    #[error("{step} failed: {source}")]
    Step {
        step: &'static str,
        #[source]
        source: PageError,
    },
}

impl DriverError {
    fn step(step: LoginStep, source: PageError) -> Self {
        DriverError::Step {
            step: step.label(),
            source,
        }
    }

    /// The step the failure happened in.
    pub fn at_step(&self) -> &'static str {
        match self {
            DriverError::ElementTimeout { step, .. } => step,
            DriverError::Step { step, .. } => step,
        }
    }
}

/// Reproduces the human login sequence against a [`PortalPage`].
pub struct NavigationDriver<'a> {
    config: &'a PortalConfig,
    credentials: &'a Credentials,
    logger: &'a ExtractorLogger,
}

impl<'a> NavigationDriver<'a> {
    pub fn new(
        config: &'a PortalConfig,
        credentials: &'a Credentials,
        logger: &'a ExtractorLogger,
    ) -> Self {
        Self {
            config,
            credentials,
            logger,
        }
    }

    /// Run every step in order. `Ok(())` means the sequence is exhausted,
    /// not that a payload was captured.
    pub async fn run<P: PortalPage + ?Sized>(&self, page: &P) -> Result<(), DriverError> {
        let mut step = Some(LoginStep::FIRST);
        while let Some(current) = step {
            self.logger
                .debug(format!("driver step {}", current.label()), Some("driver"), None);
            self.perform(current, page).await?;
            step = current.next();
        }
        Ok(())
    }

    async fn perform<P: PortalPage + ?Sized>(
        &self,
        step: LoginStep,
        page: &P,
    ) -> Result<(), DriverError> {
        match step {
            LoginStep::LoginPage => {
                page.navigate(&self.config.login_url)
                    .await
                    .map_err(|source| DriverError::step(step, source))?;
                // The login form is populated asynchronously after load.
                self.require_element(page, step, &self.config.identity_selector)
                    .await
            }
            LoginStep::EnterIdentity => {
                self.submit_field(page, step, &self.config.identity_selector, self.credentials.identity())
                    .await
            }
            LoginStep::EnterSecret => {
                self.require_element(page, step, &self.config.secret_selector)
                    .await?;
                self.submit_field(page, step, &self.config.secret_selector, self.credentials.secret())
                    .await
            }
            LoginStep::PostLoginNavigate => {
                page.navigate(&self.config.landing_url)
                    .await
                    .map_err(|source| DriverError::step(step, source))?;
                // The landing page is a SPA shell with no element worth
                // waiting for; a fixed delay is the only readiness signal.
                page.settle_delay(self.config.settle_delay()).await;
                Ok(())
            }
            LoginStep::OptionalReauth => {
                self.reauth_if_prompted(page).await;
                Ok(())
            }
            LoginStep::RequestData => page
                .navigate(&self.config.usage_endpoint)
                .await
                .map_err(|source| DriverError::step(step, source)),
        }
    }

    async fn require_element<P: PortalPage + ?Sized>(
        &self,
        page: &P,
        step: LoginStep,
        selector: &str,
    ) -> Result<(), DriverError> {
        let found = page
            .wait_for_element(selector, self.config.element_timeout())
            .await
            .map_err(|source| DriverError::step(step, source))?;
        if found {
            Ok(())
        } else {
            Err(DriverError::ElementTimeout {
                step: step.label(),
                selector: selector.to_string(),
            })
        }
    }

    async fn submit_field<P: PortalPage + ?Sized>(
        &self,
        page: &P,
        step: LoginStep,
        selector: &str,
        text: &str,
    ) -> Result<(), DriverError> {
        page.type_text(selector, text)
            .await
            .map_err(|source| DriverError::step(step, source))?;
        page.click(&self.config.submit_selector)
            .await
            .map_err(|source| DriverError::step(step, source))?;
        page.await_settled()
            .await
            .map_err(|source| DriverError::step(step, source))
    }

    /// The portal sometimes re-prompts for the secret on the landing page.
    /// Absence of the prompt is the common case and not a failure; errors
    /// while answering it are logged and swallowed.
    async fn reauth_if_prompted<P: PortalPage + ?Sized>(&self, page: &P) {
        match self.try_reauth(page).await {
            Ok(true) => {
                self.logger
                    .debug("re-auth challenge answered", Some("driver"), None);
            }
            Ok(false) => {}
            Err(err) => {
                self.logger
                    .debug(format!("re-auth skipped: {err}"), Some("driver"), None);
            }
        }
    }

    async fn try_reauth<P: PortalPage + ?Sized>(&self, page: &P) -> Result<bool, PageError> {
        let prompted = page
            .wait_for_element(&self.config.secret_selector, self.config.reauth_probe())
            .await?;
        if !prompted {
            return Ok(false);
        }

        page.type_text(&self.config.secret_selector, self.credentials.secret())
            .await?;
        page.click(&self.config.submit_selector).await?;
        page.await_settled().await?;
        Ok(true)
    }
}
