//! vtt-link is a resilient client for talking to a remote virtual-tabletop
//! game server on behalf of assistant tooling.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`client`] owns transport selection, the connection state machine, the
//!   streaming-channel lifecycle, and the public request API (dice rolls,
//!   actor/item search, scene and world lookups, generic HTTP verbs).
//! - [`cache`] provides the bounded TTL/LRU response cache the read paths
//!   consult before going to the wire.
//! - [`retry`] wraps remote calls with bounded retries, exponential backoff,
//!   and failure classification.
//! - [`error`] defines the error taxonomy shared by all of the above.
//!
//! Higher layers (tool handlers, diagnostics sub-clients, process wiring)
//! consume [`client::TabletopClient`] and are deliberately not part of this
//! crate.

pub mod cache;
pub mod client;
pub mod error;
pub mod retry;
