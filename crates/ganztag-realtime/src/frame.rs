//! SSE wire framing.
//!
//! An event frame is `event: <name>\ndata: <json>\n\n`; a heartbeat is the
//! comment frame `: heartbeat\n\n`. Compact JSON never contains a newline, so
//! one `data:` line always suffices.

use bytes::Bytes;
use ganztag_core::event::Event;
use serde::Serialize;

pub const HEARTBEAT: &str = ": heartbeat\n\n";

/// Frame an arbitrary serialisable value under the event name `name`.
pub fn named<T: Serialize + ?Sized>(name: &str, data: &T) -> serde_json::Result<Bytes> {
  let json = serde_json::to_string(data)?;
  Ok(Bytes::from(format!("event: {name}\ndata: {json}\n\n")))
}

/// Frame a domain event; the event name is its kind.
pub fn event(event: &Event) -> serde_json::Result<Bytes> { named(event.kind().as_str(), event) }

pub fn heartbeat() -> Bytes { Bytes::from_static(HEARTBEAT.as_bytes()) }
