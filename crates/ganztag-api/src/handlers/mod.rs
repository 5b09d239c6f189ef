//! Route handlers, one module per resource.

pub mod checkin;
pub mod locations;
pub mod scheduled;
pub mod session;
pub mod settings;
pub mod sse;
