//! Browser-driven usage extraction for the Xfinity customer portal.
//!
//! The portal exposes no public API; its front-end authenticates a human
//! and fetches a usage document from an internal endpoint. This crate
//! reproduces that flow with a real Chrome session: it drives the login
//! sequence the way a person would, filters the traffic the page issues,
//! watches every response for the internal usage endpoint, and resolves
//! with the first captured document.
//!
//! The DOM selectors and URLs this depends on are owned by the portal and
//! carry no stability guarantee; see [`config`] for the full list of
//! assumptions.

pub mod config;
pub mod credentials;
pub mod driver;
pub mod extractor;
pub mod filter;
pub mod logging;
pub mod session;
pub mod types;
pub mod watcher;

pub use config::PortalConfig;
pub use credentials::Credentials;
pub use extractor::{ExtractError, UsageExtractor};
pub use types::{UsagePayload, UsageReport};
