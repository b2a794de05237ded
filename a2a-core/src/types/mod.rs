//! A2A protocol data model.
//!
//! Messages, parts, tasks and the update events agents publish, plus the
//! request parameters the server accepts.

mod message;
mod params;
mod part;
mod task;

pub use message::*;
pub use params::*;
pub use part::*;
pub use task::*;
