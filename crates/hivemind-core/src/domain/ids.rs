//! Domain identifiers (strongly-typed IDs).
//!
//! # Two families of identifier
//! - **Engine-generated** (`TaskId`, `ResultId`): ULIDs minted by the
//!   `IdGenerator` port at the moment a task is admitted or a result built.
//! - **Externally named** (`OwnerId`, `ExecutorId`): strings chosen by the
//!   caller or the worker pool, wrapped so they cannot be mixed up.
//!
//! ## ULID properties relied on
//! - **Sortable by time**: the timestamp leads, so ids order by creation and
//!   the in-memory store can list an owner's tasks in admission order.
//! - **No coordination**: any node can mint them without a shared counter.
//! - **128-bit**: same size as a UUID, and `Id<T>` adds nothing on top.
//!
//! ## Phantom marker
//! `Id<T>` carries the shared implementation once. `T` is an uninhabited
//! marker type held in `PhantomData`, so it exists only at compile time and
//! a `TaskId` is rejected wherever a `ResultId` is expected.
//!
//! ## Wire forms
//! - serde: the bare ULID string (`"01HZ..."`), which is what queue channels
//!   and stored records carry.
//! - `Display`: prefixed (`task-01HZ...`), which is what logs and events show.
//! - `Id::parse` accepts either.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// Marker trait for each ID kind.
///
/// Supplies the prefix `Display` puts in front of the ULID.
pub trait IdMarker: Send + Sync + 'static {
    /// Display prefix, e.g. `"task-"`.
    fn prefix() -> &'static str;
}

/// Generic ULID-backed identifier.
///
/// `T` only exists at compile time (`PhantomData`), so `Id<T>` has the same
/// size as a bare `Ulid`.
///
/// # Example
/// ```ignore
/// let task: TaskId = Id::from_ulid(Ulid::new());
/// let result: ResultId = Id::from_ulid(Ulid::new());
/// // different types: passing `task` where a ResultId is wanted won't compile
/// ```
#[repr(transparent)]
#[derive(Debug, Serialize, Deserialize)]
#[serde(transparent, bound = "")]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    /// Wrap a ULID. Production code gets ids from `IdGenerator` instead.
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    /// The inner ULID.
    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }

    /// Parse the display form (`task-01H...`) or a bare ULID string.
    pub fn parse(s: &str) -> Option<Self> {
        let raw = s.strip_prefix(T::prefix()).unwrap_or(s);
        Ulid::from_string(raw).ok().map(Self::from_ulid)
    }
}

// Manual impls: derives would put bounds on `T`, which is uninhabited.
impl<T: IdMarker> Clone for Id<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: IdMarker> Copy for Id<T> {}

impl<T: IdMarker> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ulid == other.ulid
    }
}

impl<T: IdMarker> Eq for Id<T> {}

impl<T: IdMarker> std::hash::Hash for Id<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.ulid.hash(state);
    }
}

impl<T: IdMarker> PartialOrd for Id<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: IdMarker> Ord for Id<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.ulid.cmp(&other.ulid)
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

// ========================================
// Markers
// ========================================

#[derive(Debug)]
pub enum TaskMarker {}

impl IdMarker for TaskMarker {
    fn prefix() -> &'static str {
        "task-"
    }
}

#[derive(Debug)]
pub enum ResultMarker {}

impl IdMarker for ResultMarker {
    fn prefix() -> &'static str {
        "result-"
    }
}

/// Identifier of a Task (atomic unit of work).
pub type TaskId = Id<TaskMarker>;

/// Identifier of a Result (one execution attempt's output).
pub type ResultId = Id<ResultMarker>;

/// The entity that owns tasks, budget and committed state (a campaign, an agent).
///
/// Every queue channel, budget window and state cell is keyed by it, so two
/// owners never contend with each other. It is also embedded verbatim in
/// channel names (`agent:{owner}:tasks`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Name of the executor that produced a result. Executors are stateless, so
/// this is only used for tracing and bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutorId(String);

impl ExecutorId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExecutorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
