use std::sync::Arc;
use std::time::Duration;

use crate::auxiliary::SideEffects;
use crate::enrollment::progress::ProgressTracker;
use crate::enrollment::sync::EnrollmentSynchronizer;
use crate::generation::coordinator::{CoordinatorSettings, RegenerationCoordinator};
use crate::generation::generator::{ContentGenerationClient, GenerationSettings};
use crate::jobs::ledger::JobLedger;
use crate::llm_client::CompletionProvider;
use crate::store::PipelineStore;
use crate::tasks::dispatcher::TaskDispatcher;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<RegenerationCoordinator>,
    /// Read side of the job ledger, for status polling.
    pub ledger: JobLedger,
    pub progress: Arc<ProgressTracker>,
    pub dispatcher: Arc<TaskDispatcher>,
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    pub generation: GenerationSettings,
    pub require_personalization: bool,
    pub store_timeout: Duration,
}

impl AppState {
    /// Wires every service over one store and one completion provider.
    pub fn new(
        store: Arc<dyn PipelineStore>,
        provider: Arc<dyn CompletionProvider>,
        side_effects: SideEffects,
        settings: PipelineSettings,
    ) -> Self {
        let ledger = JobLedger::new(Arc::clone(&store), settings.store_timeout);
        let enrollments = EnrollmentSynchronizer::new(Arc::clone(&store), settings.store_timeout);
        let dispatcher = Arc::new(TaskDispatcher::with_builtin_handlers());

        let coordinator = RegenerationCoordinator::new(
            Arc::clone(&store),
            ledger.clone(),
            enrollments.clone(),
            ContentGenerationClient::new(provider, settings.generation),
            side_effects,
            CoordinatorSettings {
                require_personalization: settings.require_personalization,
                store_timeout: settings.store_timeout,
            },
        );
        let progress = ProgressTracker::new(
            store,
            enrollments,
            Arc::clone(&dispatcher),
            settings.store_timeout,
        );

        Self {
            coordinator: Arc::new(coordinator),
            ledger,
            progress: Arc::new(progress),
            dispatcher,
        }
    }
}
