//! APIC tenant service
//!
//! Runs inside the policy controller as an app and republishes its tenant
//! list, authenticating to the controller with the app's certificate key.

pub mod client;
pub mod config;
pub mod routes;
pub mod signer;

pub use client::{ApicClient, ClassQuery};
pub use config::ApicConfig;
pub use signer::CertSigner;
