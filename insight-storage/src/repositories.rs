pub mod dispatch;
pub mod record;
pub mod task;

pub use dispatch::*;
pub use record::*;
pub use task::*;
