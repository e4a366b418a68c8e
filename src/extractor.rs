//! Orchestration of a single extraction attempt.
//!
//! The extractor owns the whole lifecycle: launch a session, install the
//! traffic filter and response watcher before any navigation, drive the
//! login sequence, and race the drive against payload capture under one
//! overall deadline. Whatever the outcome, the session is torn down exactly
//! once and the caller receives exactly one resolution.

use std::future::Future;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::timeout;

use crate::config::PortalConfig;
use crate::credentials::Credentials;
use crate::driver::{DriverError, LoginStep, NavigationDriver};
use crate::filter::TrafficFilter;
use crate::logging::ExtractorLogger;
use crate::session::{PortalSession, SessionError};
use crate::types::UsagePayload;
use crate::watcher::{CaptureOutcome, CaptureSlot, PayloadError, ResponseWatcher};

/// Terminal outcome of one extraction attempt. All variants are final; the
/// caller decides whether to retry a whole extraction.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The login sequence ran to its end (or the deadline) without the
    /// usage endpoint ever delivering the payload: wrong credentials, an
    /// unexpected challenge, or changed portal markup.
    #[error("authentication incomplete: {reason}")]
    AuthenticationIncomplete { reason: String },

    /// The browser session could not be created or the portal could not be
    /// reached at all.
    #[error("session setup failed: {reason}")]
    SessionSetup { reason: String },

    /// The usage response was observed but its body was unusable.
    #[error("usage payload unusable: {source}")]
    PayloadParse {
        #[source]
        source: PayloadError,
    },
}

impl From<SessionError> for ExtractError {
    fn from(err: SessionError) -> Self {
        ExtractError::SessionSetup {
            reason: err.to_string(),
        }
    }
}

/// Drives one extraction attempt per [`UsageExtractor::extract`] call.
pub struct UsageExtractor {
    config: PortalConfig,
    logger: Arc<ExtractorLogger>,
}

impl UsageExtractor {
    pub fn new(config: PortalConfig) -> Self {
        Self::with_logger(config, Arc::new(ExtractorLogger::default()))
    }

    pub fn with_logger(config: PortalConfig, logger: Arc<ExtractorLogger>) -> Self {
        Self { config, logger }
    }

    pub fn config(&self) -> &PortalConfig {
        &self.config
    }

    /// Run one full extraction attempt.
    ///
    /// The session is closed exactly once on every path out of here, and the
    /// returned future resolves exactly once.
    pub async fn extract(
        &self,
        credentials: &Credentials,
        debug: bool,
    ) -> Result<UsagePayload, ExtractError> {
        let mut session = PortalSession::launch(&self.config, debug, self.logger.clone()).await?;

        let (slot, capture_rx) = CaptureSlot::new();
        let watcher = ResponseWatcher::new(&self.config.usage_endpoint);
        let installed = session
            .install_traffic_watch(TrafficFilter::new(), watcher, Arc::new(slot))
            .await;

        let result = match installed {
            Ok(()) => {
                let driver = NavigationDriver::new(&self.config, credentials, &self.logger);
                self.race(driver.run(&session), capture_rx).await
            }
            Err(err) => Err(ExtractError::from(err)),
        };

        session.close().await;

        match &result {
            Ok(_) => self.logger.info("usage payload extracted", Some("extract"), None),
            Err(err) => self
                .logger
                .error(format!("extraction failed: {err}"), Some("extract"), None),
        }

        result
    }

    /// Race the navigation sequence against payload capture under the
    /// overall deadline. Capture wins ties; driver exhaustion grants the
    /// watcher a short grace window before the attempt is declared failed.
    async fn race<F>(
        &self,
        drive: F,
        capture_rx: oneshot::Receiver<CaptureOutcome>,
    ) -> Result<UsagePayload, ExtractError>
    where
        F: Future<Output = Result<(), DriverError>>,
    {
        match timeout(
            self.config.overall_deadline(),
            self.race_inner(drive, capture_rx),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ExtractError::AuthenticationIncomplete {
                reason: format!(
                    "no payload captured within the {}ms deadline",
                    self.config.overall_deadline_ms
                ),
            }),
        }
    }

    async fn race_inner<F>(
        &self,
        drive: F,
        mut capture_rx: oneshot::Receiver<CaptureOutcome>,
    ) -> Result<UsagePayload, ExtractError>
    where
        F: Future<Output = Result<(), DriverError>>,
    {
        tokio::pin!(drive);

        tokio::select! {
            // Capture wins ties; completing it cancels the rest of the
            // drive by dropping its future.
            biased;
            outcome = &mut capture_rx => resolve_capture(outcome),
            driven = &mut drive => {
                driven.map_err(|err| self.driver_failure(err))?;
                // The final navigation's own response may still be paused
                // in the interception layer.
                match timeout(self.config.capture_grace(), &mut capture_rx).await {
                    Ok(outcome) => resolve_capture(outcome),
                    Err(_) => Err(ExtractError::AuthenticationIncomplete {
                        reason: "login sequence exhausted without capturing the usage payload"
                            .to_string(),
                    }),
                }
            }
        }
    }

    /// Map a driver failure onto the surfaced taxonomy. Failing to reach the
    /// login page at all is an environment problem. Everything after it,
    /// including a required field that never appeared, is indistinguishable
    /// from an unanswered challenge and surfaces as incomplete
    /// authentication.
    fn driver_failure(&self, err: DriverError) -> ExtractError {
        match &err {
            DriverError::Step { step, .. } if *step == LoginStep::LoginPage.label() => {
                ExtractError::SessionSetup {
                    reason: err.to_string(),
                }
            }
            _ => ExtractError::AuthenticationIncomplete {
                reason: err.to_string(),
            },
        }
    }
}

fn resolve_capture(
    outcome: Result<CaptureOutcome, oneshot::error::RecvError>,
) -> Result<UsagePayload, ExtractError> {
    match outcome {
        Ok(Ok(payload)) => Ok(payload),
        Ok(Err(source)) => Err(ExtractError::PayloadParse { source }),
        Err(_) => Err(ExtractError::AuthenticationIncomplete {
            reason: "capture channel closed before any payload arrived".to_string(),
        }),
    }
}
