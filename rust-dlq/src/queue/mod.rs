//! Job queue: the job model, the ordered store, and its change events.

pub mod events;
pub mod job;
pub mod store;

pub use events::QueueEvent;
pub use job::{Job, JobId, JobStatus, NewJob};
pub use store::{JobStore, MoveTo};
