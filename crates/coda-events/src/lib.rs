//! `coda-events` — the typed event fabric shared by every component.
//!
//! Three pieces:
//! - [`types::EventType`] — the closed taxonomy of event tags observers
//!   can subscribe to.
//! - [`frame`] — the wire envelope (`version`/`seq`/`timestamp`/`type`/
//!   `data`), the replay frame sent to late joiners, and the inbound
//!   client frame.
//! - [`bus`] — the thread-safe submission primitive. Producers hold an
//!   [`bus::EventSink`] (clonable, non-blocking, callable from any thread
//!   or task); the gateway's dispatcher drains the matching
//!   [`bus::EventStream`], stamps sequence numbers, and fans out.

pub mod bus;
pub mod frame;
pub mod payloads;
pub mod types;

pub use bus::{EventBus, EventSink, EventStream, Submission};
pub use frame::{ClientFrame, EventFrame, ReplayFrame};
pub use types::EventType;
