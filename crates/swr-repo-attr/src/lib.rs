//! swr-repo-attr - bulk-switch SWR repositories between public and private
//!
//! Repositories are listed through the SWR management API with a
//! `namespace::..|limit::..|is_public::..` filter, then each one is patched
//! with the configured visibility. Every request is signed with the APIG
//! `SDK-HMAC-SHA256` scheme.

pub mod client;
pub mod config;
pub mod error;
pub mod signer;
pub mod updater;

pub use client::{RegistryApi, RepoFilter, SwrClient};
pub use config::{load_config, SwrConfig, TargetAttr};
pub use error::{Result, SwrError};
pub use signer::Signer;
pub use updater::{RepoAttrUpdater, UpdateSummary};
