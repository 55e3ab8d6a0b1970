//! careroute-gateway — HTTP front door for the triage engine
//!
//! Exposes the full pipeline (`/v1/triage`), a routing-only dry run
//! (`/v1/route`) and a status endpoint, guarded by an optional bearer token.

pub mod auth;
pub mod server;

pub use server::GatewayServer;
