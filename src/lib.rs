//! A Rust client for the Target delivery API: personalized content for app locations.
//!
//! # Overview
//!
//! The crate revolves around a [`TargetClient`] that turns requests for the content of
//! *locations* (mboxes) into calls against the delivery API and routes the decoded response back
//! to the caller. Each [`TargetRequest`] carries default content and a callback that is invoked
//! exactly once, with content from the server, from the prefetch cache, or with its default
//! content on any failure.
//!
//! Content can be prefetched with [`TargetClient::prefetch_content`]. A later retrieve of a
//! prefetched location is served from the cache without a network round trip. Display and click
//! notifications for fetched locations are sent with [`TargetClient::locations_displayed`] and
//! [`TargetClient::location_clicked`].
//!
//! The client keeps visitor identifiers (tntId, thirdPartyId, sessionId and the edge host) in a
//! [`DataStore`]. Use [`FileDataStore`] to keep them across restarts.
//!
//! An [`AnalyticsLogger`] can be provided to forward Analytics for Target (A4T) payloads to your
//! analytics pipeline.
//!
//! # Error Handling
//!
//! Errors are represented by the [`Error`] enum.
//!
//! Content operations never fail at the call site. Failures reach the caller through callbacks:
//! location requests receive their default content and prefetch or raw request callbacks receive
//! an `Err`. The returned errors are valuable for debugging and usually indicate that developer's
//! attention is needed.
//!
//! # Logging
//!
//! The package uses the [`log`](https://docs.rs/log/latest/log/) crate for logging messages, with
//! the `target_delivery` target and structured key-values. Consider integrating a
//! `log`-compatible logger implementation for better visibility into client operations.
//!
//! # Examples
//!
//! Examples can be found in the `demos` directory of the `target-delivery` crate repository.

#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]

mod analytics_logger;
mod client;
mod completion;
mod config;
mod configuration;
mod context;
mod data_store;
mod engine;
mod error;
mod notifications;
mod parameters;
mod prefetch_cache;
mod request;
mod request_builder;
mod response;
mod state;
mod transport;
mod wire;
mod worker;

pub use analytics_logger::{AnalyticsForTargetEvent, AnalyticsLogger};
pub use client::TargetClient;
pub use config::ClientConfig;
pub use configuration::{PrivacyStatus, TargetConfiguration};
pub use context::{
    AuthenticatedState, CustomerId, DeviceContext, ExternalState, ExternalStateProvider,
    Orientation, VisitorIdentity,
};
pub use data_store::{DataStore, FileDataStore, InMemoryDataStore};
pub use error::{Error, Result};
pub use parameters::{TargetOrder, TargetParameters, TargetProduct};
pub use request::{Content, ContentSource, MboxContent, RawRequest, TargetPrefetch, TargetRequest};
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport};
