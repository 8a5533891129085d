pub mod bridge;
pub mod orchestrator;
pub mod queue;
pub mod registry;
pub mod worker;

pub use bridge::*;
pub use orchestrator::*;
pub use queue::*;
pub use registry::*;
pub use worker::*;
