use crate::{CacheEvent, NetEvent};

/// Unified event for the full cache pipeline.
///
/// Hierarchical: each subsystem has its own variant with a sub-enum.
#[derive(Clone, Debug)]
pub enum Event {
    /// Cache lifecycle event.
    Cache(CacheEvent),
    /// Transport event.
    Net(NetEvent),
}

impl From<CacheEvent> for Event {
    fn from(e: CacheEvent) -> Self {
        Self::Cache(e)
    }
}

impl From<NetEvent> for Event {
    fn from(e: NetEvent) -> Self {
        Self::Net(e)
    }
}
