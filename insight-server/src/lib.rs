pub mod config;
pub mod dataset;
pub mod units;

use std::sync::Arc;

use insight_storage::{ArtifactLoadCache, MemoryCache, PostgresConfig};
use insight_workflow::{FallbackSummarizer, TaskOrchestrator, UnitRegistry};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::units::{
    DescriptiveSummaryAnalyzer, GroupComparisonRadarAnalyzer, WhatIfSimulatorTrainer,
    DESCRIPTIVE_SUMMARY, GROUP_COMPARISON_RADAR, WHAT_IF_SIMULATOR,
};

/// All built-in units; an empty unit list in a task config expands to this
/// set.
pub fn default_registry() -> UnitRegistry {
    UnitRegistry::new()
        .with_trainer(WHAT_IF_SIMULATOR, Arc::new(WhatIfSimulatorTrainer))
        .with_analyzer(
            GROUP_COMPARISON_RADAR,
            Arc::new(GroupComparisonRadarAnalyzer::default()),
        )
        .with_analyzer(DESCRIPTIVE_SUMMARY, Arc::new(DescriptiveSummaryAnalyzer))
}

pub fn build_orchestrator(config: &Config) -> Arc<TaskOrchestrator> {
    let cache = ArtifactLoadCache::new(
        Arc::new(MemoryCache::new()),
        config.artifact_cache_ttl(),
    );
    Arc::new(TaskOrchestrator::new(
        &config.output_dir,
        Arc::new(default_registry()),
        Arc::new(FallbackSummarizer),
        cache,
    ))
}

pub fn postgres_config(config: &Config) -> PostgresConfig {
    PostgresConfig::new(config.database_url.clone())
}

/// Tracing setup shared by the supervisor and the worker binary.
pub fn init_tracing(config: &Config) {
    let default_filter = format!(
        "insight_server={level},insight_workflow={level},insight_storage={level}",
        level = config.log_level
    );
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry_has_all_units() {
        let registry = default_registry();
        assert_eq!(registry.trainer_names(), vec![WHAT_IF_SIMULATOR]);
        assert_eq!(
            registry.analyzer_names(),
            vec![DESCRIPTIVE_SUMMARY, GROUP_COMPARISON_RADAR]
        );
    }
}
