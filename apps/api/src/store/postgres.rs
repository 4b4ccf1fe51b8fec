//! PostgreSQL backend for the pipeline store.
//!
//! Status enums are stored as TEXT; rows are read into private `*Record`
//! types and converted at this boundary.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use tracing::debug;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::content::{ContentSection, GeneratedContent};
use crate::models::enrollment::Enrollment;
use crate::models::job::GenerationJob;
use crate::models::learner::{Course, Learner, LearnerSkill, PersonalizationInputs};
use crate::store::{EnrollmentUpdate, PipelineStore, ProgressUpdate, UnitCompletion};

#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Records
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, FromRow)]
struct JobRecord {
    id: Uuid,
    learner_id: String,
    course_id: String,
    status: String,
    current_step: i32,
    total_steps: i32,
    progress_percent: i32,
    step_description: String,
    error_message: Option<String>,
    metadata: Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<JobRecord> for GenerationJob {
    type Error = AppError;

    fn try_from(r: JobRecord) -> Result<Self, Self::Error> {
        Ok(GenerationJob {
            id: r.id,
            learner_id: r.learner_id,
            course_id: r.course_id,
            status: r.status.parse()?,
            current_step: r.current_step,
            total_steps: r.total_steps,
            progress_percent: r.progress_percent,
            step_description: r.step_description,
            error_message: r.error_message,
            metadata: r.metadata,
            created_at: r.created_at,
            updated_at: r.updated_at,
            completed_at: r.completed_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct ContentRecord {
    id: Uuid,
    course_id: String,
    learner_id: String,
    title: String,
    description: String,
    learning_objectives: Vec<String>,
    source_job_id: Uuid,
    is_active: bool,
    created_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct SectionRecord {
    module_id: String,
    title: String,
    body: String,
    order_index: i32,
}

#[derive(Debug, FromRow)]
struct EnrollmentRecord {
    learner_id: String,
    course_id: String,
    status: String,
    content_generation_status: String,
    active_content_id: Option<Uuid>,
    latest_job_id: Option<Uuid>,
    progress_percent: i32,
    completed_units: i32,
    total_units: i32,
    assessed_progress: i32,
    derived_status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<EnrollmentRecord> for Enrollment {
    type Error = AppError;

    fn try_from(r: EnrollmentRecord) -> Result<Self, Self::Error> {
        Ok(Enrollment {
            learner_id: r.learner_id,
            course_id: r.course_id,
            status: r.status.parse()?,
            content_generation_status: r.content_generation_status.parse()?,
            active_content_id: r.active_content_id,
            latest_job_id: r.latest_job_id,
            progress_percent: r.progress_percent,
            completed_units: r.completed_units,
            total_units: r.total_units,
            assessed_progress: r.assessed_progress,
            derived_status: r.derived_status.parse()?,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct ProfileRecord {
    profile: Option<Value>,
    extracted_profile: Option<Value>,
}

const ENROLLMENT_COLUMNS: &str = "learner_id, course_id, status, content_generation_status, \
     active_content_id, latest_job_id, progress_percent, completed_units, total_units, \
     assessed_progress, derived_status, created_at, updated_at";

// ────────────────────────────────────────────────────────────────────────────
// Helpers
// ────────────────────────────────────────────────────────────────────────────

impl PostgresStore {
    async fn load_sections(&self, content_id: Uuid) -> Result<Vec<ContentSection>, AppError> {
        let sections = sqlx::query_as::<_, SectionRecord>(
            r#"
            SELECT module_id, title, body, order_index
            FROM generated_content_sections
            WHERE content_id = $1
            ORDER BY order_index ASC
            "#,
        )
        .bind(content_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(sections
            .into_iter()
            .map(|s| ContentSection {
                module_id: s.module_id,
                title: s.title,
                body: s.body,
                order_index: s.order_index,
            })
            .collect())
    }

    async fn hydrate(&self, record: ContentRecord) -> Result<GeneratedContent, AppError> {
        let sections = self.load_sections(record.id).await?;
        Ok(GeneratedContent {
            id: record.id,
            course_id: record.course_id,
            learner_id: record.learner_id,
            title: record.title,
            description: record.description,
            learning_objectives: record.learning_objectives,
            sections,
            source_job_id: record.source_job_id,
            is_active: record.is_active,
            created_at: record.created_at,
        })
    }
}

async fn write_enrollment(
    tx: &mut Transaction<'_, Postgres>,
    e: &Enrollment,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO enrollments
            (learner_id, course_id, status, content_generation_status, active_content_id,
             latest_job_id, progress_percent, completed_units, total_units, assessed_progress,
             derived_status, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        ON CONFLICT (learner_id, course_id) DO UPDATE SET
            status = EXCLUDED.status,
            content_generation_status = EXCLUDED.content_generation_status,
            active_content_id = EXCLUDED.active_content_id,
            latest_job_id = EXCLUDED.latest_job_id,
            progress_percent = EXCLUDED.progress_percent,
            completed_units = EXCLUDED.completed_units,
            total_units = EXCLUDED.total_units,
            assessed_progress = EXCLUDED.assessed_progress,
            derived_status = EXCLUDED.derived_status,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(&e.learner_id)
    .bind(&e.course_id)
    .bind(e.status.as_str())
    .bind(e.content_generation_status.as_str())
    .bind(e.active_content_id)
    .bind(e.latest_job_id)
    .bind(e.progress_percent)
    .bind(e.completed_units)
    .bind(e.total_units)
    .bind(e.assessed_progress)
    .bind(e.derived_status.as_str())
    .bind(e.created_at)
    .bind(e.updated_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Reads the pair's enrollment and holds its row lock until `tx` ends.
async fn lock_enrollment(
    tx: &mut Transaction<'_, Postgres>,
    learner_id: &str,
    course_id: &str,
) -> Result<Option<Enrollment>, AppError> {
    sqlx::query_as::<_, EnrollmentRecord>(&format!(
        "SELECT {ENROLLMENT_COLUMNS} FROM enrollments \
         WHERE learner_id = $1 AND course_id = $2 FOR UPDATE"
    ))
    .bind(learner_id)
    .bind(course_id)
    .fetch_optional(&mut **tx)
    .await?
    .map(Enrollment::try_from)
    .transpose()
}

async fn write_unit_completion(
    tx: &mut Transaction<'_, Postgres>,
    learner_id: &str,
    course_id: &str,
    change: &UnitCompletion,
) -> Result<(), AppError> {
    if change.completed {
        sqlx::query(
            r#"
            INSERT INTO enrollment_unit_completions (learner_id, course_id, unit_id, completed_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (learner_id, course_id, unit_id) DO NOTHING
            "#,
        )
        .bind(learner_id)
        .bind(course_id)
        .bind(&change.unit_id)
        .bind(change.at)
        .execute(&mut **tx)
        .await?;
    } else {
        sqlx::query(
            r#"
            DELETE FROM enrollment_unit_completions
            WHERE learner_id = $1 AND course_id = $2 AND unit_id = $3
            "#,
        )
        .bind(learner_id)
        .bind(course_id)
        .bind(&change.unit_id)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

// ────────────────────────────────────────────────────────────────────────────
// PipelineStore
// ────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl PipelineStore for PostgresStore {
    async fn get_learner(&self, learner_id: &str) -> Result<Option<Learner>, AppError> {
        Ok(sqlx::query_as::<_, Learner>(
            "SELECT id, full_name, role, department, experience_level FROM learners WHERE id = $1",
        )
        .bind(learner_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn get_course(&self, course_id: &str) -> Result<Option<Course>, AppError> {
        Ok(sqlx::query_as::<_, Course>(
            "SELECT id, title, description, objectives, difficulty FROM courses WHERE id = $1",
        )
        .bind(course_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn get_personalization_inputs(
        &self,
        learner_id: &str,
    ) -> Result<PersonalizationInputs, AppError> {
        let profile = sqlx::query_as::<_, ProfileRecord>(
            "SELECT profile, extracted_profile FROM learner_profiles WHERE learner_id = $1",
        )
        .bind(learner_id)
        .fetch_optional(&self.pool)
        .await?;

        let skills = sqlx::query_as::<_, LearnerSkill>(
            "SELECT name, proficiency FROM learner_skills WHERE learner_id = $1 ORDER BY name",
        )
        .bind(learner_id)
        .fetch_all(&self.pool)
        .await?;

        let (profile, extracted_profile) = profile
            .map(|p| (p.profile, p.extracted_profile))
            .unwrap_or((None, None));

        Ok(PersonalizationInputs {
            profile,
            skills,
            extracted_profile,
        })
    }

    async fn insert_job(&self, job: &GenerationJob) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO generation_jobs
                (id, learner_id, course_id, status, current_step, total_steps,
                 progress_percent, step_description, error_message, metadata,
                 created_at, updated_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(job.id)
        .bind(&job.learner_id)
        .bind(&job.course_id)
        .bind(job.status.as_str())
        .bind(job.current_step)
        .bind(job.total_steps)
        .bind(job.progress_percent)
        .bind(&job.step_description)
        .bind(&job.error_message)
        .bind(&job.metadata)
        .bind(job.created_at)
        .bind(job.updated_at)
        .bind(job.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<GenerationJob>, AppError> {
        let record =
            sqlx::query_as::<_, JobRecord>("SELECT * FROM generation_jobs WHERE id = $1")
                .bind(job_id)
                .fetch_optional(&self.pool)
                .await?;
        record.map(GenerationJob::try_from).transpose()
    }

    async fn update_in_progress_job(&self, job: &GenerationJob) -> Result<bool, AppError> {
        // GREATEST keeps progress monotonic even against a stale in-memory copy.
        let result = sqlx::query(
            r#"
            UPDATE generation_jobs SET
                status = $2,
                current_step = $3,
                progress_percent = GREATEST(progress_percent, $4),
                step_description = $5,
                error_message = $6,
                metadata = $7,
                updated_at = $8,
                completed_at = $9
            WHERE id = $1 AND status = 'in_progress'
            "#,
        )
        .bind(job.id)
        .bind(job.status.as_str())
        .bind(job.current_step)
        .bind(job.progress_percent)
        .bind(&job.step_description)
        .bind(&job.error_message)
        .bind(&job.metadata)
        .bind(job.updated_at)
        .bind(job.completed_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_active_content(
        &self,
        learner_id: &str,
        course_id: &str,
    ) -> Result<Option<GeneratedContent>, AppError> {
        let record = sqlx::query_as::<_, ContentRecord>(
            r#"
            SELECT id, course_id, learner_id, title, description, learning_objectives,
                   source_job_id, is_active, created_at
            FROM generated_contents
            WHERE learner_id = $1 AND course_id = $2 AND is_active
            "#,
        )
        .bind(learner_id)
        .bind(course_id)
        .fetch_optional(&self.pool)
        .await?;

        match record {
            Some(record) => Ok(Some(self.hydrate(record).await?)),
            None => Ok(None),
        }
    }

    async fn get_content(&self, content_id: Uuid) -> Result<Option<GeneratedContent>, AppError> {
        let record = sqlx::query_as::<_, ContentRecord>(
            r#"
            SELECT id, course_id, learner_id, title, description, learning_objectives,
                   source_job_id, is_active, created_at
            FROM generated_contents
            WHERE id = $1
            "#,
        )
        .bind(content_id)
        .fetch_optional(&self.pool)
        .await?;

        match record {
            Some(record) => Ok(Some(self.hydrate(record).await?)),
            None => Ok(None),
        }
    }

    async fn swap_active_content(
        &self,
        content: &GeneratedContent,
        retired: &[Uuid],
    ) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        // 1. Stage the replacement, inactive.
        sqlx::query(
            r#"
            INSERT INTO generated_contents
                (id, course_id, learner_id, title, description, learning_objectives,
                 source_job_id, is_active, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, FALSE, $8)
            "#,
        )
        .bind(content.id)
        .bind(&content.course_id)
        .bind(&content.learner_id)
        .bind(&content.title)
        .bind(&content.description)
        .bind(&content.learning_objectives)
        .bind(content.source_job_id)
        .bind(content.created_at)
        .execute(&mut *tx)
        .await?;

        for section in &content.sections {
            sqlx::query(
                r#"
                INSERT INTO generated_content_sections
                    (content_id, module_id, title, body, order_index)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(content.id)
            .bind(&section.module_id)
            .bind(&section.title)
            .bind(&section.body)
            .bind(section.order_index)
            .execute(&mut *tx)
            .await?;
        }

        // 2. Retire whatever is active for the pair.
        let deactivated = sqlx::query(
            r#"
            UPDATE generated_contents SET is_active = FALSE
            WHERE learner_id = $1 AND course_id = $2 AND is_active AND id <> $3
            "#,
        )
        .bind(&content.learner_id)
        .bind(&content.course_id)
        .bind(content.id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if !retired.is_empty() {
            sqlx::query("DELETE FROM generated_contents WHERE id = ANY($1) AND id <> $2")
                .bind(retired)
                .bind(content.id)
                .execute(&mut *tx)
                .await?;
        }

        // 3. Flip the replacement live.
        sqlx::query("UPDATE generated_contents SET is_active = TRUE WHERE id = $1")
            .bind(content.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        debug!(
            "Swapped active content for learner {} / course {}: new={}, deactivated={}, removed={}",
            content.learner_id,
            content.course_id,
            content.id,
            deactivated,
            retired.len()
        );
        Ok(())
    }

    async fn get_enrollment(
        &self,
        learner_id: &str,
        course_id: &str,
    ) -> Result<Option<Enrollment>, AppError> {
        let record = sqlx::query_as::<_, EnrollmentRecord>(&format!(
            "SELECT {ENROLLMENT_COLUMNS} FROM enrollments WHERE learner_id = $1 AND course_id = $2"
        ))
        .bind(learner_id)
        .bind(course_id)
        .fetch_optional(&self.pool)
        .await?;
        record.map(Enrollment::try_from).transpose()
    }

    async fn update_enrollment(
        &self,
        learner_id: &str,
        course_id: &str,
        update: EnrollmentUpdate,
    ) -> Result<Option<Enrollment>, AppError> {
        let mut tx = self.pool.begin().await?;
        let current = lock_enrollment(&mut tx, learner_id, course_id).await?;

        let unchanged = current.clone();
        match update(current)? {
            Some(enrollment) => {
                write_enrollment(&mut tx, &enrollment).await?;
                tx.commit().await?;
                Ok(Some(enrollment))
            }
            None => {
                tx.rollback().await?;
                Ok(unchanged)
            }
        }
    }

    async fn update_enrollment_progress(
        &self,
        learner_id: &str,
        course_id: &str,
        change: Option<UnitCompletion>,
        update: ProgressUpdate,
    ) -> Result<Option<Enrollment>, AppError> {
        let mut tx = self.pool.begin().await?;
        let current = lock_enrollment(&mut tx, learner_id, course_id).await?;

        if let Some(change) = &change {
            write_unit_completion(&mut tx, learner_id, course_id, change).await?;
        }
        let units: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT unit_id FROM enrollment_unit_completions
            WHERE learner_id = $1 AND course_id = $2
            ORDER BY unit_id
            "#,
        )
        .bind(learner_id)
        .bind(course_id)
        .fetch_all(&mut *tx)
        .await?;

        let unchanged = current.clone();
        match update(current, units.as_slice())? {
            Some(enrollment) => {
                write_enrollment(&mut tx, &enrollment).await?;
                tx.commit().await?;
                Ok(Some(enrollment))
            }
            None => {
                tx.rollback().await?;
                Ok(unchanged)
            }
        }
    }
}
