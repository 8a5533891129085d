pub mod store;
pub mod version;

pub use store::*;
pub use version::*;
