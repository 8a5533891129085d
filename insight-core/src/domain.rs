pub mod ids;
pub mod task;
pub mod config;
pub mod dataset;
pub mod envelope;
pub mod report;

pub use ids::*;
pub use task::*;
pub use config::*;
pub use dataset::*;
pub use envelope::*;
pub use report::*;
