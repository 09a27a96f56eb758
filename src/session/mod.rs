//! Interview session state machine
//!
//! Stages: Intro -> Interview -> Summary. The controller owns the session,
//! its per-question deadline and the voice arbiter, and is the only thing
//! that mutates them.

mod controller;
mod deadline;
mod model;
mod snapshot;

pub use controller::SessionController;
pub use model::{Speaker, Stage};
pub use snapshot::SessionSnapshot;
