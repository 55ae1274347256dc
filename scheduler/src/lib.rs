//! A bounded, priority-ordered request scheduler for streaming 3D tile and
//! resource fetches.
//!
//! This crate is the admission/throttling layer that sits between a
//! real-time visibility traversal (discovering candidate fetches every
//! frame) and a caller-supplied transport (the actual network I/O). It owns:
//!
//! - [`Scheduler`](scheduler::Scheduler) (C4): per-frame admission, eviction
//!   and reconciliation, enforcing a global concurrency cap and per-server
//!   caps.
//! - [`PriorityHeap`](priority_heap::PriorityHeap) (C1): the bounded
//!   min-heap of pending requests the scheduler admits from.
//! - [`ServerRegistry`](server_registry::ServerRegistry) (C2): per-origin
//!   active-request counters.
//! - [`Request`](request::Request) (C3): the fetch descriptor and its
//!   mutable scheduling state.
//! - [`Tile`](tile::Tile) (C5): the lifecycle of one streaming tile's
//!   content, built on top of `Request`.
//! - [`priority`] (C6): the deterministic scalar-priority composite the
//!   heap orders by.
//!
//! What this crate does **not** do: issue HTTP requests itself (the caller
//! supplies a `request_fn`), parse tile payloads, or render anything. Those
//! are external collaborators.

pub mod config;
pub mod payload;
pub mod priority;
pub mod priority_heap;
pub mod request;
pub mod scheduler;
pub mod server_registry;
pub mod stats;
pub mod tile;
pub mod url;

pub use config::SchedulerConfig;
pub use payload::Payload;
pub use priority::{is_foveated_deferred, normalize, PackedPriority, PriorityInputs};
pub use priority_heap::PriorityHeap;
pub use request::{Completion, Request, RequestHandle, RequestKind, RequestState};
pub use scheduler::{CompletionListener, Scheduler};
pub use server_registry::ServerRegistry;
pub use stats::Statistics;
pub use tile::{ContentState, Tile};
