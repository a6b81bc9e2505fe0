//! IdGenerator port.
//!
//! ULIDs take their timestamp from the injected `Clock`, so ids generated
//! under a `FixedClock` share a predictable time prefix.

use std::sync::Arc;

use ulid::Ulid;

use crate::domain::ids::{ResultId, TaskId};
use crate::ports::Clock;

pub trait IdGenerator: Send + Sync {
    fn generate_task_id(&self) -> TaskId;

    fn generate_result_id(&self) -> ResultId;
}

pub struct UlidGenerator {
    clock: Arc<dyn Clock>,
}

impl UlidGenerator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    fn next(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl IdGenerator for UlidGenerator {
    fn generate_task_id(&self) -> TaskId {
        TaskId::from_ulid(self.next())
    }

    fn generate_result_id(&self) -> ResultId {
        ResultId::from_ulid(self.next())
    }
}
