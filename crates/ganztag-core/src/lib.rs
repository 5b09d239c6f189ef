//! Core types and trait definitions for the ganztag occupancy engine.
//!
//! This crate is deliberately free of HTTP and database dependencies. The
//! check-in state machine, the subscription resolver and the event model live
//! here and run against the [`store::ActiveTx`] abstraction.

pub mod checkin;
pub mod device_session;
pub mod error;
pub mod event;
pub mod facility;
pub mod location;
pub mod person;
pub mod scheduled;
pub mod session;
pub mod store;
pub mod subscription;

pub use error::{Classify, Error, ErrorKind, Result};

/// Opaque 64-bit entity id.
pub type Id = i64;
