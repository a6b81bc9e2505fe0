//! EventSink port.
//!
//! Emission is synchronous and infallible from the caller's side: a sink
//! that cannot deliver drops the event rather than stall coordination.

use crate::domain::events::EngineEvent;

pub trait EventSink: Send + Sync {
    fn emit(&self, event: EngineEvent);
}
