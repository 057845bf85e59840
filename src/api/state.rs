use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::{
    config::EngineSettings,
    context::RequestContext,
    db::{MemoryRecommendationCache, RecommendationCache},
    services::{
        ExperimentAnalyzer, ExperimentRegistry, InteractionRecorder, RecommendationEngine,
        VariantAssigner,
    },
    store::{ExperimentStore, MemoryStore, SignalStore},
    tasks::TaskPool,
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<RecommendationEngine>,
    pub recorder: Arc<InteractionRecorder>,
    pub registry: ExperimentRegistry,
    pub assigner: VariantAssigner,
    pub analyzer: ExperimentAnalyzer,
    request_timeout: Duration,
    shutdown: CancellationToken,
}

impl AppState {
    /// Wires every service onto the given stores, cache, and task pool
    pub fn new(
        signals: Arc<dyn SignalStore>,
        experiments: Arc<dyn ExperimentStore>,
        cache: Arc<dyn RecommendationCache>,
        tasks: Arc<dyn TaskPool>,
        settings: EngineSettings,
    ) -> Self {
        let request_timeout = settings.store_timeout;
        let confidence_level = settings.confidence_level;

        let engine = Arc::new(RecommendationEngine::new(
            signals.clone(),
            experiments.clone(),
            cache.clone(),
            settings,
        ));
        let recorder = Arc::new(InteractionRecorder::new(
            signals,
            experiments.clone(),
            cache,
            tasks,
            engine.clone(),
        ));

        Self {
            engine,
            recorder,
            registry: ExperimentRegistry::new(experiments.clone()),
            assigner: VariantAssigner::new(experiments.clone()),
            analyzer: ExperimentAnalyzer::new(experiments, confidence_level),
            request_timeout,
            shutdown: CancellationToken::new(),
        }
    }

    /// State backed entirely by process memory
    pub fn in_memory(store: MemoryStore, tasks: Arc<dyn TaskPool>) -> Self {
        Self::new(
            Arc::new(store.clone()),
            Arc::new(store),
            Arc::new(MemoryRecommendationCache::new()),
            tasks,
            EngineSettings::default(),
        )
    }

    /// Ties every request scope to `shutdown`, so store calls still in flight
    /// are abandoned once the server starts draining
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Fresh cancellation scope for one request
    pub fn request_context(&self) -> RequestContext {
        RequestContext::child_of(&self.shutdown, self.request_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::InlineTaskPool;

    #[test]
    fn test_request_context_follows_shutdown() {
        let shutdown = CancellationToken::new();
        let state = AppState::in_memory(MemoryStore::new(), Arc::new(InlineTaskPool::new()))
            .with_shutdown(shutdown.clone());

        let before = state.request_context();
        assert!(!before.is_cancelled());

        shutdown.cancel();
        assert!(before.is_cancelled());
        assert!(state.request_context().is_cancelled());
    }
}
