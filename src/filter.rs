//! Request filtering for the portal session.
//!
//! Every request the page wants to issue is paused at the CDP `Fetch` layer
//! and classified here before the browser sends it. Images, marketing
//! beacons, and video assets play no part in login or usage extraction, so
//! they are aborted to cut page weight and noise. A paused request that
//! never receives a decision stalls the page load, so classification is
//! total: every input maps to exactly one [`TrafficDecision`].

use chromiumoxide::cdp::browser_protocol::network::ResourceType;

/// Outcome of filtering a single pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrafficDecision {
    /// Let the browser send the request.
    Allow,
    /// Terminate the request at the network layer.
    Abort,
}

/// Marketing/telemetry vendors embedded by the portal; none are needed for
/// login or the usage fetch.
const TRACKER_SUBSTRINGS: &[&str] = &["adobedtm", "demdex", "quantummetric"];

/// Video containers the portal occasionally serves without a media resource
/// type declared on the request.
const VIDEO_EXTENSIONS: &[&str] = &[".mp4", ".avi", ".flv", ".mov", ".wmv"];

/// Stateless classifier for outgoing portal requests.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrafficFilter;

impl TrafficFilter {
    pub fn new() -> Self {
        Self
    }

    /// Classify one pending request from its URL and declared resource kind.
    ///
    /// Rules are evaluated in order and the first match wins.
    pub fn decide(&self, url: &str, resource_type: &ResourceType) -> TrafficDecision {
        let url = url.to_ascii_lowercase();

        if matches!(resource_type, ResourceType::Image) {
            return TrafficDecision::Abort;
        }

        if TRACKER_SUBSTRINGS
            .iter()
            .any(|vendor| url.contains(vendor))
        {
            return TrafficDecision::Abort;
        }

        if matches!(resource_type, ResourceType::Media)
            || VIDEO_EXTENSIONS.iter().any(|ext| url.ends_with(ext))
        {
            return TrafficDecision::Abort;
        }

        TrafficDecision::Allow
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn images_are_aborted_regardless_of_url() {
        let filter = TrafficFilter::new();
        assert_eq!(
            filter.decide("https://login.xfinity.com/logo.png", &ResourceType::Image),
            TrafficDecision::Abort
        );
        assert_eq!(
            filter.decide("https://customer.xfinity.com/api", &ResourceType::Image),
            TrafficDecision::Abort
        );
    }

    #[test]
    fn tracking_vendors_are_aborted_even_as_scripts() {
        let filter = TrafficFilter::new();
        for url in [
            "https://assets.adobedtm.com/launch.js",
            "https://dpm.demdex.net/id",
            "https://cdn.quantummetric.com/qscend.js",
        ] {
            assert_eq!(
                filter.decide(url, &ResourceType::Script),
                TrafficDecision::Abort,
                "expected abort for {url}"
            );
        }
    }

    #[test]
    fn tracker_match_is_case_insensitive() {
        let filter = TrafficFilter::new();
        assert_eq!(
            filter.decide("https://Assets.AdobeDTM.com/x.js", &ResourceType::Script),
            TrafficDecision::Abort
        );
    }

    #[test]
    fn media_and_video_extensions_are_aborted() {
        let filter = TrafficFilter::new();
        assert_eq!(
            filter.decide("https://cdn.example.com/stream", &ResourceType::Media),
            TrafficDecision::Abort
        );
        for ext in ["mp4", "avi", "flv", "mov", "wmv"] {
            let url = format!("https://cdn.example.com/promo.{ext}");
            assert_eq!(
                filter.decide(&url, &ResourceType::Other),
                TrafficDecision::Abort,
                "expected abort for {url}"
            );
        }
    }

    #[test]
    fn documents_scripts_and_api_calls_are_allowed() {
        let filter = TrafficFilter::new();
        assert_eq!(
            filter.decide("https://login.xfinity.com/login", &ResourceType::Document),
            TrafficDecision::Allow
        );
        assert_eq!(
            filter.decide(
                "https://customer.xfinity.com/apis/csp/account/me/services/internet/usage?filter=internet",
                &ResourceType::Xhr
            ),
            TrafficDecision::Allow
        );
        assert_eq!(
            filter.decide("https://login.xfinity.com/static/app.js", &ResourceType::Script),
            TrafficDecision::Allow
        );
    }

    #[test]
    fn video_extension_must_terminate_the_path() {
        let filter = TrafficFilter::new();
        assert_eq!(
            filter.decide(
                "https://cdn.example.com/list?format=mp4",
                &ResourceType::Fetch
            ),
            TrafficDecision::Allow
        );
    }
}
