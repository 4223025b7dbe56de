//! `coda-gateway` — the WebSocket fan-out half of the event fabric plus
//! the binary entry point.
//!
//! A single dispatcher task drains the event bus, stamps gap-free
//! sequence numbers, maintains the high-priority replay ring, and
//! publishes serialized frames into a broadcast channel. Each observer
//! connection gets the replay backlog first, then the live stream; slow
//! observers lag (dropping oldest) or are disconnected on send timeout,
//! never blocking producers or other observers.

pub mod app;
pub mod http;
pub mod ws;
