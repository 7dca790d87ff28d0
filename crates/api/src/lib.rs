//! HTTP surface for fanwave.
//!
//! Management routes (campaign send/recover, queue inspection and control)
//! sit behind bearer-token admin auth; the provider event webhook and the
//! tracking routes are reachable without it, since mail clients and the
//! provider cannot carry our credentials.

pub mod endpoints;
pub mod extractors;
pub mod response;
pub mod state;

pub use endpoints::router;
pub use state::AppState;
