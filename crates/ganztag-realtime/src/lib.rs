//! In-process real-time fan-out for supervisor dashboards.
//!
//! The [`Hub`] routes [`Event`](ganztag_core::event::Event)s to registered
//! clients by topic. Each SSE connection owns one registration and turns its
//! delivery channel into a byte stream of SSE frames (see [`connection`]).
//!
//! There is exactly one `Hub` per process. It is created at bootstrap and
//! shared behind an `Arc`; nothing here is a global.

pub mod connection;
pub mod frame;
pub mod hub;

pub use connection::{ConnectionOptions, event_stream};
pub use hub::{ClientId, ClientStats, Hub, HubStats, Subscription};
