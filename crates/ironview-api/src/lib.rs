//! HTTP control surface for ironview.
//!
//! Exposes the supervisor (start/stop/status), the discovery service
//! (run/status/logs), operator CRUD for devices and register configs, and
//! reading queries. No UI and no authentication live here; this is the
//! programmatic surface only.

pub mod handlers;
pub mod server;

pub use server::{create_router, serve, ServerState};
