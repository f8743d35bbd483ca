#![forbid(unsafe_code)]

//! Unified event bus for the lodestream asset cache.

mod bus;
mod cache;
mod event;
mod net;

pub use bus::EventBus;
pub use cache::CacheEvent;
pub use event::Event;
pub use net::NetEvent;
