//! Sync orchestration: one `SyncSession` per replica pair.

mod retry;
mod scheduler;
mod session;

pub use scheduler::ScheduleRequest;
pub use session::SyncSession;
