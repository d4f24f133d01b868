//! Shared building blocks: identifiers, synchronization primitives,
//! retry policies and the restart guardian.

pub mod bootstrap;
pub mod guardian;
pub mod ids;
pub mod latch;
pub mod reset_event;
pub mod retry;
