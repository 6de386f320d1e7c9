//! atl-runtime
//!
//! Work that runs independently of requests: the scheduled sweep
//! (reminders, delay penalties, non-conformity escalation) and the outbox
//! delivery loop.

mod scheduler;
mod sweep;

pub use scheduler::{spawn_outbox_loop, spawn_sweep_loop, BackgroundTasks};
pub use sweep::{Sweep, SweepReport};
