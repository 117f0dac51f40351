pub mod bus;
pub mod controller;
pub mod distill;
pub mod events;

pub use controller::{Controller, ControllerConfig, PlanSource, RunOutcome, RunReport};
pub use events::{IterationPhase, RunEvent};
