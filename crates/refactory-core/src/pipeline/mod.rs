pub mod candidates;
pub mod orchestrator;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod testkit;

pub use orchestrator::{Collaborators, Orchestrator, PassReport};
pub use scheduler::{PassOutcome, Poller};
