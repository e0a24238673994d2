//! Background scheduling of queued mail

pub mod dispatcher;

pub use dispatcher::{DispatchReport, Scheduler, STALE_REASON};
