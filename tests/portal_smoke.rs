//! Browser-backed smoke test for the session layer.
//!
//! Requires `XFIN_CHROME_BIN` pointing at a Chrome/Chromium binary and is
//! skipped otherwise. It exercises launch, interception install, a real
//! navigation with the traffic filter active, element polling, and the
//! close path, without touching the actual portal (a `data:` document
//! stands in for it).

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use xfin_usage::config::PortalConfig;
use xfin_usage::driver::PortalPage;
use xfin_usage::filter::TrafficFilter;
use xfin_usage::logging::{ExtractorLogger, Verbosity};
use xfin_usage::session::PortalSession;
use xfin_usage::watcher::{CaptureSlot, ResponseWatcher};

#[tokio::test]
async fn session_launches_filters_and_closes() -> Result<()> {
    let chrome_bin = match env::var("XFIN_CHROME_BIN") {
        Ok(value) if !value.trim().is_empty() => PathBuf::from(value),
        _ => {
            eprintln!("skipping browser smoke test: XFIN_CHROME_BIN not set");
            return Ok(());
        }
    };

    if !chrome_bin.exists() {
        eprintln!(
            "skipping browser smoke test: chrome executable not found at {}",
            chrome_bin.display()
        );
        return Ok(());
    }

    let mut config = PortalConfig::default();
    config.chrome_executable = Some(chrome_bin);
    config.headless = true;
    config.settle_timeout_ms = 5_000;

    let logger = Arc::new(ExtractorLogger::new(Verbosity::Minimal));
    let mut session = PortalSession::launch(&config, false, logger)
        .await
        .context("failed to launch browser session")?;

    let (slot, _capture_rx) = CaptureSlot::new();
    let watcher = ResponseWatcher::new(&config.usage_endpoint);
    session
        .install_traffic_watch(TrafficFilter::new(), watcher, Arc::new(slot))
        .await
        .context("failed to install traffic watch")?;

    session
        .navigate("data:text/html,<html><body><h1 id=\"greeting\">hello</h1></body></html>")
        .await
        .context("navigation failed with interception active")?;

    let found = session
        .wait_for_element("#greeting", Duration::from_secs(5))
        .await
        .context("element poll failed")?;
    assert!(found, "expected the test element to be present");

    let absent = session
        .wait_for_element("#not-there", Duration::from_millis(300))
        .await
        .context("element poll failed")?;
    assert!(!absent, "expected the missing element to stay missing");

    session.close().await;
    Ok(())
}
