//! Browser session lifecycle and CDP wiring.
//!
//! A [`PortalSession`] owns exactly one browser instance and one page for
//! the duration of a single extraction attempt. It installs the traffic
//! filter and response watcher at the CDP `Fetch` layer before any
//! navigation, implements the [`PortalPage`] operations the navigation
//! driver needs, and is torn down exactly once via [`PortalSession::close`].

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::IntoEventKind;
use chromiumoxide::cdp::browser_protocol::emulation::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::fetch::{
    self, ContinueRequestParams, EventRequestPaused, FailRequestParams, GetResponseBodyParams,
    RequestPattern, RequestStage,
};
use chromiumoxide::cdp::browser_protocol::network::{
    ErrorReason, EventLoadingFailed, EventLoadingFinished, EventRequestServedFromCache,
    EventRequestWillBeSent, ResourceType,
};
use chromiumoxide::listeners::EventStream;
use chromiumoxide::page::Page;
use futures_util::StreamExt;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, sleep};

use crate::config::PortalConfig;
use crate::driver::{PageError, PortalPage};
use crate::filter::{TrafficDecision, TrafficFilter};
use crate::logging::ExtractorLogger;
use crate::watcher::{CaptureSlot, PayloadError, ResponseWatcher};

/// Errors raised while creating or driving the browser session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to configure browser launch: {0}")]
    LaunchConfig(String),
    #[error("browser session error: {0}")]
    Cdp(String),
}

fn cdp_error(err: impl std::fmt::Display) -> SessionError {
    SessionError::Cdp(err.to_string())
}

fn page_error(err: impl std::fmt::Display) -> PageError {
    PageError::Message(err.to_string())
}

/// Exclusively-owned browser + page pair backing one extraction attempt.
pub struct PortalSession {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
    intercept: Option<JoinHandle<()>>,
    config: PortalConfig,
    logger: Arc<ExtractorLogger>,
}

impl PortalSession {
    /// Launch a fresh browser and open the single page this session owns.
    ///
    /// `debug` shows the browser window; extraction behaviour is unchanged.
    pub async fn launch(
        config: &PortalConfig,
        debug: bool,
        logger: Arc<ExtractorLogger>,
    ) -> Result<Self, SessionError> {
        let browser_config = build_browser_config(config, debug)?;

        let (browser, handler) = Browser::launch(browser_config)
            .await
            .map_err(cdp_error)?;
        let handler = spawn_handler(handler, logger.clone());

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(cdp_error)?;

        // An ordinary desktop user-agent keeps the portal's bot heuristics
        // quiet; set before any portal navigation.
        page.execute(SetUserAgentOverrideParams::new(config.user_agent.clone()))
            .await
            .map_err(cdp_error)?;

        Ok(Self {
            browser,
            page,
            handler,
            intercept: None,
            config: config.clone(),
            logger,
        })
    }

    /// Install the traffic filter and response watcher.
    ///
    /// Must run before the first portal navigation; requests issued earlier
    /// would bypass both. Every paused request receives exactly one
    /// continue/fail decision, and the first matching response completes the
    /// capture slot.
    pub async fn install_traffic_watch(
        &mut self,
        filter: TrafficFilter,
        watcher: ResponseWatcher,
        slot: Arc<CaptureSlot>,
    ) -> Result<(), SessionError> {
        let patterns = vec![
            RequestPattern {
                url_pattern: Some("*".to_string()),
                resource_type: None,
                request_stage: Some(RequestStage::Request),
            },
            RequestPattern {
                url_pattern: Some(format!("{}*", watcher.endpoint_prefix())),
                resource_type: None,
                request_stage: Some(RequestStage::Response),
            },
        ];

        self.page
            .execute(fetch::EnableParams {
                patterns: Some(patterns),
                handle_auth_requests: None,
            })
            .await
            .map_err(cdp_error)?;

        let mut events = self
            .page
            .event_listener::<EventRequestPaused>()
            .await
            .map_err(cdp_error)?;

        let page = self.page.clone();
        let logger = self.logger.clone();
        let handle = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                handle_paused_request(&page, &filter, &watcher, &slot, &logger, &event).await;
            }
        });

        self.intercept = Some(handle);
        Ok(())
    }

    /// Tear the session down. Called exactly once on every exit path; no
    /// browser process survives it.
    pub async fn close(mut self) {
        if let Some(task) = self.intercept.take() {
            task.abort();
        }

        if let Err(err) = self.browser.close().await {
            self.logger
                .debug(format!("browser close failed: {err}"), Some("session"), None);
        }
        match time::timeout(Duration::from_secs(5), self.browser.wait()).await {
            Ok(Err(err)) => {
                self.logger
                    .debug(format!("browser wait failed: {err}"), Some("session"), None);
            }
            Err(_) => {
                self.logger.debug(
                    "browser did not exit in time; dropping the handle kills it",
                    Some("session"),
                    None,
                );
            }
            Ok(Ok(_)) => {}
        }
        self.handler.abort();
    }

    async fn element_exists(&self, selector: &str) -> Result<bool, PageError> {
        let selector_json = serde_json::to_string(selector).map_err(page_error)?;
        let expression = format!("document.querySelector({selector_json}) !== null");
        let result = self.page.evaluate(expression).await.map_err(page_error)?;
        Ok(result
            .value()
            .and_then(JsonValue::as_bool)
            .unwrap_or(false))
    }

    /// Wait until the page's network activity has been quiet for a short
    /// window, bounded by the configured settle timeout. Mirrors the
    /// "network idle" the portal's own front-end is built against.
    async fn wait_for_network_quiet(&self) -> Result<(), PageError> {
        let quiet_window = Duration::from_millis(500);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut listeners: Vec<JoinHandle<()>> = Vec::new();

        listeners.push(spawn_net_event_listener(
            self.page
                .event_listener::<EventRequestWillBeSent>()
                .await
                .map_err(page_error)?,
            tx.clone(),
            |ev: EventRequestWillBeSent| {
                // Long-lived streams never finish; counting them would keep
                // the page "busy" forever.
                if matches!(
                    ev.r#type.as_ref(),
                    Some(ResourceType::WebSocket | ResourceType::EventSource)
                ) {
                    return None;
                }
                Some(NetEvent::Opened(ev.request_id.as_ref().to_string()))
            },
        ));
        listeners.push(spawn_net_event_listener(
            self.page
                .event_listener::<EventLoadingFinished>()
                .await
                .map_err(page_error)?,
            tx.clone(),
            |ev: EventLoadingFinished| Some(NetEvent::Closed(ev.request_id.as_ref().to_string())),
        ));
        listeners.push(spawn_net_event_listener(
            self.page
                .event_listener::<EventLoadingFailed>()
                .await
                .map_err(page_error)?,
            tx.clone(),
            |ev: EventLoadingFailed| Some(NetEvent::Closed(ev.request_id.as_ref().to_string())),
        ));
        listeners.push(spawn_net_event_listener(
            self.page
                .event_listener::<EventRequestServedFromCache>()
                .await
                .map_err(page_error)?,
            tx.clone(),
            |ev: EventRequestServedFromCache| {
                Some(NetEvent::Closed(ev.request_id.as_ref().to_string()))
            },
        ));
        drop(tx);

        let mut inflight: HashSet<String> = HashSet::new();
        let quiet_timer = sleep(quiet_window);
        tokio::pin!(quiet_timer);
        let deadline = sleep(self.config.settle_timeout());
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                maybe_event = rx.recv() => {
                    match maybe_event {
                        Some(NetEvent::Opened(id)) => {
                            inflight.insert(id);
                        }
                        Some(NetEvent::Closed(id)) => {
                            inflight.remove(&id);
                            if inflight.is_empty() {
                                quiet_timer.as_mut().reset(Instant::now() + quiet_window);
                            }
                        }
                        None => break,
                    }
                }
                _ = &mut quiet_timer, if inflight.is_empty() => break,
                _ = &mut deadline => {
                    if !inflight.is_empty() {
                        self.logger.debug(
                            format!(
                                "settle timeout reached with {} requests in flight",
                                inflight.len()
                            ),
                            Some("session"),
                            None,
                        );
                    }
                    break;
                }
            }
        }

        for listener in listeners {
            listener.abort();
        }

        Ok(())
    }
}

#[async_trait]
impl PortalPage for PortalSession {
    async fn navigate(&self, url: &str) -> Result<(), PageError> {
        self.page.goto(url).await.map_err(page_error)?;
        self.page.wait_for_navigation().await.map_err(page_error)?;
        Ok(())
    }

    async fn await_settled(&self) -> Result<(), PageError> {
        self.wait_for_network_quiet().await
    }

    async fn wait_for_element(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> Result<bool, PageError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.element_exists(selector).await? {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            sleep(self.config.element_poll_interval()).await;
        }
    }

    async fn type_text(&self, selector: &str, text: &str) -> Result<(), PageError> {
        let text_json = serde_json::to_string(text).map_err(page_error)?;
        let body = format!(
            "const value = {text_json};
            el.focus();
            if ('value' in el) {{ el.value = value; }}
            el.dispatchEvent(new Event('input', {{ bubbles: true }}));
            el.dispatchEvent(new Event('change', {{ bubbles: true }}));
            return true;"
        );
        let script = build_selector_script(selector, &body)?;
        self.page.evaluate(script).await.map_err(page_error)?;
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<(), PageError> {
        let script = build_selector_script(selector, "el.click(); return true;")?;
        self.page.evaluate(script).await.map_err(page_error)?;
        Ok(())
    }

    async fn settle_delay(&self, delay: Duration) {
        sleep(delay).await;
    }
}

enum NetEvent {
    Opened(String),
    Closed(String),
}

fn spawn_net_event_listener<T, F>(
    mut stream: EventStream<T>,
    tx: mpsc::UnboundedSender<NetEvent>,
    map: F,
) -> JoinHandle<()>
where
    T: IntoEventKind + Clone + Unpin + Send + 'static,
    F: Fn(T) -> Option<NetEvent> + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(event) = stream.next().await {
            let owned = (*event).clone();
            if let Some(mapped) = map(owned) {
                if tx.send(mapped).is_err() {
                    break;
                }
            }
        }
    })
}

/// Handle one paused request: filter it at the request stage, or capture
/// the usage body at the response stage. Either way the request is always
/// continued or failed, never left hanging.
async fn handle_paused_request(
    page: &Page,
    filter: &TrafficFilter,
    watcher: &ResponseWatcher,
    slot: &CaptureSlot,
    logger: &ExtractorLogger,
    event: &EventRequestPaused,
) {
    let url = event.request.url.as_str();
    let response_stage =
        event.response_status_code.is_some() || event.response_error_reason.is_some();

    if response_stage {
        if watcher.matches(url) && !slot.is_taken() {
            match fetch_response_body(page, event).await {
                Ok(body) => {
                    logger.debug(
                        format!("usage endpoint response captured ({} bytes)", body.len()),
                        Some("watch"),
                        None,
                    );
                    slot.complete(watcher.parse(&body));
                }
                Err(reason) => {
                    slot.complete(Err(PayloadError::BodyUnavailable { reason }));
                }
            }
        }
        continue_request(page, event, logger).await;
        return;
    }

    match filter.decide(url, &event.resource_type) {
        TrafficDecision::Allow => continue_request(page, event, logger).await,
        TrafficDecision::Abort => fail_request(page, event, logger).await,
    }
}

async fn fetch_response_body(page: &Page, event: &EventRequestPaused) -> Result<Vec<u8>, String> {
    let response = page
        .execute(GetResponseBodyParams::new(event.request_id.clone()))
        .await
        .map_err(|err| err.to_string())?;
    decode_body(&response.body, response.base64_encoded)
}

fn decode_body(body: &str, base64_encoded: bool) -> Result<Vec<u8>, String> {
    if base64_encoded {
        BASE64_STANDARD
            .decode(body.as_bytes())
            .map_err(|err| err.to_string())
    } else {
        Ok(body.as_bytes().to_vec())
    }
}

async fn continue_request(page: &Page, event: &EventRequestPaused, logger: &ExtractorLogger) {
    let params = ContinueRequestParams {
        request_id: event.request_id.clone(),
        url: None,
        method: None,
        post_data: None,
        headers: None,
        intercept_response: None,
    };
    if let Err(err) = page.execute(params).await {
        logger.debug(
            format!("failed to continue {}: {err}", event.request.url),
            Some("filter"),
            None,
        );
    }
}

async fn fail_request(page: &Page, event: &EventRequestPaused, logger: &ExtractorLogger) {
    let params = FailRequestParams {
        request_id: event.request_id.clone(),
        error_reason: ErrorReason::Aborted,
    };
    if let Err(err) = page.execute(params).await {
        logger.debug(
            format!("failed to abort {}: {err}", event.request.url),
            Some("filter"),
            None,
        );
    }
}

fn build_selector_script(selector: &str, body: &str) -> Result<String, PageError> {
    let selector_json = serde_json::to_string(selector).map_err(page_error)?;
    Ok(format!(
        "(function() {{
            const el = document.querySelector({selector});
            if (!el) {{
                throw new Error('Element not found for selector');
            }}
            {body}
        }})()",
        selector = selector_json,
        body = body
    ))
}

fn build_browser_config(config: &PortalConfig, debug: bool) -> Result<BrowserConfig, SessionError> {
    let mut builder = BrowserConfig::builder();

    if let Some(path) = &config.chrome_executable {
        builder = builder.chrome_executable(path);
    }

    let builder = builder
        .arg("--disable-blink-features=AutomationControlled")
        .arg("--disable-infobars")
        .arg("--no-first-run")
        .arg("--no-default-browser-check");

    let builder = if debug || !config.headless {
        builder.with_head()
    } else {
        builder
    };

    builder.build().map_err(SessionError::LaunchConfig)
}

fn spawn_handler(
    mut handler: chromiumoxide::handler::Handler,
    logger: Arc<ExtractorLogger>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(result) = handler.next().await {
            if let Err(err) = result {
                logger.debug(format!("cdp handler error: {err}"), Some("session"), None);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_script_json_escapes_the_selector() {
        let script = build_selector_script("#user \"quoted\"", "el.click(); return true;")
            .expect("script builds");
        assert!(script.contains("document.querySelector(\"#user \\\"quoted\\\"\")"));
        assert!(script.contains("el.click()"));
    }

    #[test]
    fn decode_body_handles_both_encodings() {
        let plain = decode_body("{\"a\":1}", false).expect("plain body");
        assert_eq!(plain, b"{\"a\":1}");

        let encoded = BASE64_STANDARD.encode(b"{\"a\":1}");
        let decoded = decode_body(&encoded, true).expect("base64 body");
        assert_eq!(decoded, b"{\"a\":1}");

        assert!(decode_body("not base64!!!", true).is_err());
    }

    #[test]
    fn launch_config_accepts_every_visibility_combination() {
        // Pin an executable path so the builder does not probe the host for
        // an installed Chrome.
        let mut config = PortalConfig::default();
        config.chrome_executable = Some("/usr/bin/chromium".into());

        assert!(build_browser_config(&config, false).is_ok());
        assert!(build_browser_config(&config, true).is_ok());

        config.headless = false;
        assert!(build_browser_config(&config, false).is_ok());
    }
}
