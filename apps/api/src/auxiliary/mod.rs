//! Auxiliary side effects of a generation run: learner notifications and the
//! content archive.
//!
//! Nothing here is on the critical path. Each effect runs as its own task
//! whose `JoinHandle` is returned; a failure is logged with the job id and
//! never changes the job's outcome.

pub mod archive;
pub mod notifier;

use std::future::Future;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::content::GeneratedContent;

use self::archive::ContentArchive;
use self::notifier::{Notification, Notifier};

/// Spawns `effect`, logging any error it returns under `label`.
pub fn submit<F>(label: &'static str, job_id: Uuid, effect: F) -> JoinHandle<()>
where
    F: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        match effect.await {
            Ok(()) => debug!("Side effect '{}' for job {} done", label, job_id),
            Err(e) => warn!("Side effect '{}' for job {} failed: {:#}", label, job_id, e),
        }
    })
}

#[derive(Clone)]
pub struct SideEffects {
    notifier: Arc<dyn Notifier>,
    archive: Option<Arc<dyn ContentArchive>>,
}

impl SideEffects {
    pub fn new(notifier: Arc<dyn Notifier>, archive: Option<Arc<dyn ContentArchive>>) -> Self {
        Self { notifier, archive }
    }

    /// Notifies the learner and, when configured, archives the content.
    pub fn content_ready(&self, job_id: Uuid, content: &GeneratedContent) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(2);

        let notifier = Arc::clone(&self.notifier);
        let notification = Notification::ContentReady {
            job_id,
            learner_id: content.learner_id.clone(),
            course_id: content.course_id.clone(),
            content_id: content.id,
        };
        handles.push(submit("notify", job_id, async move {
            notifier.notify(&notification).await
        }));

        if let Some(archive) = &self.archive {
            let archive = Arc::clone(archive);
            let content = content.clone();
            handles.push(submit("archive", job_id, async move {
                archive.archive(&content).await.map(|_| ())
            }));
        }

        handles
    }

    pub fn generation_failed(
        &self,
        job_id: Uuid,
        learner_id: &str,
        course_id: &str,
        error_message: &str,
    ) -> JoinHandle<()> {
        let notifier = Arc::clone(&self.notifier);
        let notification = Notification::GenerationFailed {
            job_id,
            learner_id: learner_id.to_string(),
            course_id: course_id.to_string(),
            error_message: error_message.to_string(),
        };
        submit("notify", job_id, async move {
            notifier.notify(&notification).await
        })
    }
}
