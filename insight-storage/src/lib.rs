pub mod artifacts;
pub mod cache;
pub mod postgres;
pub mod repositories;

pub use artifacts::{ArtifactStore, VersionRegistry};
pub use cache::{ArtifactLoadCache, Cache, MemoryCache};
pub use postgres::{create_pool, create_pool_with_config, PostgresConfig};
pub use repositories::{Dispatch, DispatchRepository, RecordRepository, TaskRepository};
