//! In-memory implementations of every port.
//!
//! Good for a single process and for tests. A deployment with several
//! engine instances replaces `InMemoryQueueService`, `InMemoryTaskStore`
//! and `InMemoryBudgetLedger` with implementations over a shared store.

pub mod event_sinks;
pub mod inmem_budget;
pub mod inmem_queue;
pub mod inmem_store;
pub mod keyword_planner;
pub mod keyword_safety;

pub use self::event_sinks::{BroadcastEventSink, FanoutEventSink, NoopEventSink, TracingEventSink};
pub use self::inmem_budget::InMemoryBudgetLedger;
pub use self::inmem_queue::InMemoryQueueService;
pub use self::inmem_store::InMemoryTaskStore;
pub use self::keyword_planner::KeywordPlanner;
pub use self::keyword_safety::KeywordSafetyScreen;
