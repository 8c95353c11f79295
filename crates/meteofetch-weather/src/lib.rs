//! Weather observations for meteofetch
//!
//! Domain types, the Open-Meteo fetch client, normalization of raw provider
//! rows, threshold alerts with webhook delivery and the raw payload archive.

pub mod alerts;
pub mod archive;
pub mod normalize;
pub mod notify;
pub mod provider;
pub mod types;

pub use alerts::{Alert, AlertKind, AlertOrigin, AlertRules};
pub use archive::PayloadArchive;
pub use normalize::{parse_timestamp, Normalizer};
pub use notify::WebhookNotifier;
pub use provider::{FetchClient, OpenMeteoClient};
pub use types::*;
