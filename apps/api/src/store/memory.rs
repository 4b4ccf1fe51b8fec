//! In-memory pipeline store for tests. One mutex guards all tables so every
//! operation observes and leaves a consistent snapshot.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::content::GeneratedContent;
use crate::models::enrollment::Enrollment;
use crate::models::job::{GenerationJob, JobStatus};
use crate::models::learner::{Course, Learner, LearnerSkill, PersonalizationInputs};
use crate::store::{EnrollmentUpdate, PipelineStore, ProgressUpdate, UnitCompletion};

type Pair = (String, String);

#[derive(Default)]
struct Tables {
    learners: HashMap<String, Learner>,
    courses: HashMap<String, Course>,
    personalization: HashMap<String, PersonalizationInputs>,
    jobs: HashMap<Uuid, GenerationJob>,
    contents: HashMap<Uuid, GeneratedContent>,
    enrollments: HashMap<Pair, Enrollment>,
    completions: HashMap<Pair, BTreeSet<String>>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    fail_next_swap: AtomicBool,
    fail_next_job_completion: AtomicBool,
    swap_after_next_read: Mutex<Option<GeneratedContent>>,
}

fn pair(learner_id: &str, course_id: &str) -> Pair {
    (learner_id.to_string(), course_id.to_string())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_learner(&self, id: &str) {
        self.tables.lock().learners.insert(
            id.to_string(),
            Learner {
                id: id.to_string(),
                full_name: format!("Learner {id}"),
                role: Some("Data Analyst".to_string()),
                department: Some("Finance".to_string()),
                experience_level: Some("mid".to_string()),
            },
        );
    }

    pub fn add_course(&self, id: &str) {
        self.tables.lock().courses.insert(
            id.to_string(),
            Course {
                id: id.to_string(),
                title: format!("Course {id}"),
                description: "Working with relational data".to_string(),
                objectives: vec!["Write joins".to_string(), "Model tables".to_string()],
                difficulty: Some("intermediate".to_string()),
            },
        );
    }

    /// Gives the learner a minimal but non-empty personalization profile.
    pub fn add_profile(&self, learner_id: &str) {
        self.tables.lock().personalization.insert(
            learner_id.to_string(),
            PersonalizationInputs {
                profile: Some(serde_json::json!({ "goal": "move into analytics engineering" })),
                skills: vec![LearnerSkill {
                    name: "sql".to_string(),
                    proficiency: Some("intermediate".to_string()),
                }],
                extracted_profile: None,
            },
        );
    }

    pub fn insert_content(&self, content: GeneratedContent) {
        self.tables.lock().contents.insert(content.id, content);
    }

    pub fn put_enrollment(&self, enrollment: Enrollment) {
        let key = pair(&enrollment.learner_id, &enrollment.course_id);
        self.tables.lock().enrollments.insert(key, enrollment);
    }

    pub fn mark_completed(&self, learner_id: &str, course_id: &str, unit_id: &str) {
        self.tables
            .lock()
            .completions
            .entry(pair(learner_id, course_id))
            .or_default()
            .insert(unit_id.to_string());
    }

    /// Makes the next `swap_active_content` fail without applying anything.
    pub fn fail_next_swap(&self) {
        self.fail_next_swap.store(true, Ordering::SeqCst);
    }

    /// Makes the next write that moves a job to `completed` fail.
    pub fn fail_next_job_completion(&self) {
        self.fail_next_job_completion.store(true, Ordering::SeqCst);
    }

    /// Lets the next `get_content` return, then activates `content` and points
    /// the pair's enrollment at it, as a regeneration landing in between.
    pub fn swap_after_next_read(&self, content: GeneratedContent) {
        *self.swap_after_next_read.lock() = Some(content);
    }

    pub fn contents_for(&self, learner_id: &str, course_id: &str) -> Vec<GeneratedContent> {
        self.tables
            .lock()
            .contents
            .values()
            .filter(|c| c.learner_id == learner_id && c.course_id == course_id)
            .cloned()
            .collect()
    }

    pub fn active_count(&self, learner_id: &str, course_id: &str) -> usize {
        self.contents_for(learner_id, course_id)
            .iter()
            .filter(|c| c.is_active)
            .count()
    }

    pub fn jobs_for(&self, learner_id: &str, course_id: &str) -> Vec<GenerationJob> {
        self.tables
            .lock()
            .jobs
            .values()
            .filter(|j| j.learner_id == learner_id && j.course_id == course_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl PipelineStore for MemoryStore {
    async fn get_learner(&self, learner_id: &str) -> Result<Option<Learner>, AppError> {
        Ok(self.tables.lock().learners.get(learner_id).cloned())
    }

    async fn get_course(&self, course_id: &str) -> Result<Option<Course>, AppError> {
        Ok(self.tables.lock().courses.get(course_id).cloned())
    }

    async fn get_personalization_inputs(
        &self,
        learner_id: &str,
    ) -> Result<PersonalizationInputs, AppError> {
        Ok(self
            .tables
            .lock()
            .personalization
            .get(learner_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn insert_job(&self, job: &GenerationJob) -> Result<(), AppError> {
        let mut tables = self.tables.lock();
        if tables.jobs.contains_key(&job.id) {
            return Err(AppError::Persistence(format!("duplicate job id {}", job.id)));
        }
        tables.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<GenerationJob>, AppError> {
        Ok(self.tables.lock().jobs.get(&job_id).cloned())
    }

    async fn update_in_progress_job(&self, job: &GenerationJob) -> Result<bool, AppError> {
        if job.status == JobStatus::Completed
            && self.fail_next_job_completion.swap(false, Ordering::SeqCst)
        {
            return Err(AppError::Persistence("injected job write failure".to_string()));
        }
        let mut tables = self.tables.lock();
        match tables.jobs.get_mut(&job.id) {
            Some(stored) if stored.status == JobStatus::InProgress => {
                let progress = stored.progress_percent.max(job.progress_percent);
                *stored = job.clone();
                stored.progress_percent = progress;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_active_content(
        &self,
        learner_id: &str,
        course_id: &str,
    ) -> Result<Option<GeneratedContent>, AppError> {
        Ok(self
            .tables
            .lock()
            .contents
            .values()
            .find(|c| c.is_active && c.learner_id == learner_id && c.course_id == course_id)
            .cloned())
    }

    async fn get_content(&self, content_id: Uuid) -> Result<Option<GeneratedContent>, AppError> {
        let mut tables = self.tables.lock();
        let found = tables.contents.get(&content_id).cloned();

        if let Some(replacement) = self.swap_after_next_read.lock().take() {
            let key = pair(&replacement.learner_id, &replacement.course_id);
            if let Some(enrollment) = tables.enrollments.get_mut(&key) {
                enrollment.active_content_id = Some(replacement.id);
                enrollment.total_units = replacement.unit_count();
            }
            activate(&mut tables, replacement, &[]);
        }
        Ok(found)
    }

    async fn swap_active_content(
        &self,
        content: &GeneratedContent,
        retired: &[Uuid],
    ) -> Result<(), AppError> {
        if self.fail_next_swap.swap(false, Ordering::SeqCst) {
            return Err(AppError::Persistence("injected swap failure".to_string()));
        }
        activate(&mut self.tables.lock(), content.clone(), retired);
        Ok(())
    }

    async fn get_enrollment(
        &self,
        learner_id: &str,
        course_id: &str,
    ) -> Result<Option<Enrollment>, AppError> {
        Ok(self
            .tables
            .lock()
            .enrollments
            .get(&pair(learner_id, course_id))
            .cloned())
    }

    async fn update_enrollment(
        &self,
        learner_id: &str,
        course_id: &str,
        update: EnrollmentUpdate,
    ) -> Result<Option<Enrollment>, AppError> {
        let key = pair(learner_id, course_id);
        let mut tables = self.tables.lock();
        let current = tables.enrollments.get(&key).cloned();
        match update(current.clone())? {
            Some(next) => {
                tables.enrollments.insert(key, next.clone());
                Ok(Some(next))
            }
            None => Ok(current),
        }
    }

    async fn update_enrollment_progress(
        &self,
        learner_id: &str,
        course_id: &str,
        change: Option<UnitCompletion>,
        update: ProgressUpdate,
    ) -> Result<Option<Enrollment>, AppError> {
        let key = pair(learner_id, course_id);
        let mut tables = self.tables.lock();
        let current = tables.enrollments.get(&key).cloned();

        let mut units = tables.completions.get(&key).cloned().unwrap_or_default();
        if let Some(change) = &change {
            if change.completed {
                units.insert(change.unit_id.clone());
            } else {
                units.remove(&change.unit_id);
            }
        }
        let listed: Vec<String> = units.iter().cloned().collect();

        match update(current.clone(), listed.as_slice())? {
            Some(next) => {
                tables.completions.insert(key.clone(), units);
                tables.enrollments.insert(key, next.clone());
                Ok(Some(next))
            }
            None => Ok(current),
        }
    }
}

/// Deactivates the pair's other rows, drops `retired` and stores `content` as
/// the active row. Sections keep the order they were submitted in.
fn activate(tables: &mut Tables, mut content: GeneratedContent, retired: &[Uuid]) {
    for existing in tables.contents.values_mut() {
        if existing.learner_id == content.learner_id
            && existing.course_id == content.course_id
            && existing.id != content.id
        {
            existing.is_active = false;
        }
    }
    for id in retired {
        if *id != content.id {
            tables.contents.remove(id);
        }
    }
    content.is_active = true;
    tables.contents.insert(content.id, content);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::content::ContentSection;
    use chrono::Utc;

    fn content(learner: &str, course: &str, active: bool) -> GeneratedContent {
        GeneratedContent {
            id: Uuid::new_v4(),
            course_id: course.to_string(),
            learner_id: learner.to_string(),
            title: "SQL for analysts".to_string(),
            description: String::new(),
            learning_objectives: vec![],
            sections: vec![
                ContentSection {
                    module_id: "m1".to_string(),
                    title: "Joins".to_string(),
                    body: "...".to_string(),
                    order_index: 0,
                },
                ContentSection {
                    module_id: "m2".to_string(),
                    title: "Windows".to_string(),
                    body: "...".to_string(),
                    order_index: 1,
                },
            ],
            source_job_id: Uuid::new_v4(),
            is_active: active,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_swap_replaces_active_row() {
        let store = MemoryStore::new();
        let old = content("e1", "c1", true);
        let old_id = old.id;
        store.insert_content(old);

        let new = content("e1", "c1", false);
        store.swap_active_content(&new, &[old_id]).await.unwrap();

        assert_eq!(store.active_count("e1", "c1"), 1);
        assert!(store.get_content(old_id).await.unwrap().is_none());
        let active = store.get_active_content("e1", "c1").await.unwrap().unwrap();
        assert_eq!(active.id, new.id);
    }

    #[tokio::test]
    async fn test_failed_swap_leaves_prior_content() {
        let store = MemoryStore::new();
        let old = content("e1", "c1", true);
        let old_id = old.id;
        store.insert_content(old);
        store.fail_next_swap();

        let new = content("e1", "c1", false);
        assert!(store.swap_active_content(&new, &[old_id]).await.is_err());

        let active = store.get_active_content("e1", "c1").await.unwrap().unwrap();
        assert_eq!(active.id, old_id);
        assert_eq!(store.contents_for("e1", "c1").len(), 1);
    }

    #[tokio::test]
    async fn test_declined_progress_update_drops_pending_completion() {
        let store = MemoryStore::new();
        store.put_enrollment(Enrollment::new("e1", "c1", Utc::now()));
        let change = UnitCompletion {
            unit_id: "m1".to_string(),
            completed: true,
            at: Utc::now(),
        };

        let update: ProgressUpdate = Box::new(|_, units: &[String]| {
            assert_eq!(units.to_vec(), vec!["m1".to_string()]);
            Ok(None)
        });
        store
            .update_enrollment_progress("e1", "c1", Some(change), update)
            .await
            .unwrap();

        let update: ProgressUpdate = Box::new(|current, units: &[String]| {
            assert!(units.is_empty());
            Ok(current)
        });
        store
            .update_enrollment_progress("e1", "c1", None, update)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_terminal_job_is_not_overwritten() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let mut job = GenerationJob {
            id: Uuid::new_v4(),
            learner_id: "e1".to_string(),
            course_id: "c1".to_string(),
            status: JobStatus::Failed,
            current_step: 2,
            total_steps: 6,
            progress_percent: 25,
            step_description: "failed".to_string(),
            error_message: Some("boom".to_string()),
            metadata: serde_json::json!({}),
            created_at: now,
            updated_at: now,
            completed_at: Some(now),
        };
        store.insert_job(&job).await.unwrap();

        job.status = JobStatus::Completed;
        assert!(!store.update_in_progress_job(&job).await.unwrap());
        let stored = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
    }
}
