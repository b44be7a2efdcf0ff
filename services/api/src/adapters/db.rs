//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete
//! implementation of the `PlanStore`, `UsageTracker`, and `AuthStore` ports
//! from the `core` crate. It handles all interactions with the PostgreSQL
//! database using `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use study_planner_core::domain::{
    NewStudyPlan, NewUsageRecord, PlanPage, PlanUpdate, ScheduleItem, StudyPlan, TokenCounters,
    TokenUsage, User, UserCredentials,
};
use study_planner_core::ports::{AuthStore, PlanStore, PortError, PortResult, UsageTracker};

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter backing all three persistence ports.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct StudyPlanRecord {
    id: Uuid,
    title: String,
    description: String,
    prompt: String,
    level: String,
    selected_topics: Vec<String>,
    schedule: serde_json::Value,
    user_id: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl StudyPlanRecord {
    fn into_domain(self) -> PortResult<StudyPlan> {
        // A schedule document that no longer parses is corrupt data, not a
        // missing row.
        let schedule: Vec<ScheduleItem> = serde_json::from_value(self.schedule)
            .map_err(|e| PortError::Unexpected(format!("stored schedule is malformed: {e}")))?;
        Ok(StudyPlan {
            id: self.id,
            title: self.title,
            description: self.description,
            prompt: self.prompt,
            level: self.level,
            selected_topics: self.selected_topics,
            schedule,
            owner_user_id: self.user_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(FromRow)]
struct UserRecord {
    id: Uuid,
    email: String,
    name: String,
}

impl UserRecord {
    fn into_domain(self) -> User {
        User {
            id: self.id,
            email: self.email,
            name: self.name,
        }
    }
}

#[derive(FromRow)]
struct CredentialsRecord {
    id: Uuid,
    email: String,
    name: String,
    password_hash: String,
}

impl CredentialsRecord {
    fn into_domain(self) -> UserCredentials {
        UserCredentials {
            id: self.id,
            email: self.email,
            name: self.name,
            hashed_password: self.password_hash,
        }
    }
}

#[derive(FromRow)]
struct CountersRecord {
    total_tokens_used: i64,
    daily_tokens_used: i64,
    last_token_reset: Option<NaiveDate>,
}

impl CountersRecord {
    fn into_domain(self) -> TokenCounters {
        TokenCounters {
            total_tokens_used: self.total_tokens_used,
            daily_tokens_used: self.daily_tokens_used,
            last_reset_date: self.last_token_reset,
        }
    }
}

const PLAN_COLUMNS: &str = "id, title, description, prompt, level, selected_topics, schedule, \
     user_id, created_at, updated_at";

//=========================================================================================
// `PlanStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl PlanStore for DbAdapter {
    async fn create(&self, new_plan: NewStudyPlan) -> PortResult<StudyPlan> {
        let schedule = serde_json::to_value(&new_plan.schedule)
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let record = sqlx::query_as::<_, StudyPlanRecord>(&format!(
            "INSERT INTO study_plans \
                 (id, title, description, prompt, level, selected_topics, schedule, user_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING {PLAN_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(&new_plan.title)
        .bind(&new_plan.description)
        .bind(&new_plan.prompt)
        .bind(&new_plan.level)
        .bind(&new_plan.selected_topics)
        .bind(schedule)
        .bind(new_plan.owner_user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;

        record.into_domain()
    }

    async fn list_by_owner(&self, owner: Uuid, page: u32, page_size: u32) -> PortResult<PlanPage> {
        let page = page.max(1);
        let offset = (page as i64 - 1) * page_size as i64;

        let (total,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM study_plans WHERE user_id = $1")
                .bind(owner)
                .fetch_one(&self.pool)
                .await
                .map_err(unexpected)?;

        let records = sqlx::query_as::<_, StudyPlanRecord>(&format!(
            "SELECT {PLAN_COLUMNS} FROM study_plans \
             WHERE user_id = $1 \
             ORDER BY created_at DESC \
             LIMIT $2 OFFSET $3"
        ))
        .bind(owner)
        .bind(page_size as i64)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        let items = records
            .into_iter()
            .map(StudyPlanRecord::into_domain)
            .collect::<PortResult<Vec<_>>>()?;

        Ok(PlanPage::new(items, total, page, page_size))
    }

    async fn get_by_id(&self, id: Uuid) -> PortResult<Option<StudyPlan>> {
        let record = sqlx::query_as::<_, StudyPlanRecord>(&format!(
            "SELECT {PLAN_COLUMNS} FROM study_plans WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;

        record.map(StudyPlanRecord::into_domain).transpose()
    }

    async fn update(&self, id: Uuid, changes: PlanUpdate) -> PortResult<StudyPlan> {
        let schedule = changes
            .schedule
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let record = sqlx::query_as::<_, StudyPlanRecord>(&format!(
            "UPDATE study_plans SET \
                 title = COALESCE($2, title), \
                 description = COALESCE($3, description), \
                 selected_topics = COALESCE($4, selected_topics), \
                 schedule = COALESCE($5, schedule), \
                 updated_at = NOW() \
             WHERE id = $1 \
             RETURNING {PLAN_COLUMNS}"
        ))
        .bind(id)
        .bind(&changes.title)
        .bind(&changes.description)
        .bind(&changes.selected_topics)
        .bind(schedule)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?
        .ok_or_else(|| PortError::NotFound(format!("Study plan {} not found", id)))?;

        record.into_domain()
    }

    async fn delete(&self, id: Uuid) -> PortResult<()> {
        sqlx::query("DELETE FROM study_plans WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }
}

//=========================================================================================
// `UsageTracker` Trait Implementation
//=========================================================================================

#[async_trait]
impl UsageTracker for DbAdapter {
    async fn increment(&self, user_id: Uuid, tokens: i64) -> PortResult<()> {
        let record = sqlx::query_as::<_, CountersRecord>(
            "SELECT total_tokens_used, daily_tokens_used, last_token_reset \
             FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?
        .ok_or_else(|| PortError::NotFound(format!("User {} not found", user_id)))?;

        let mut counters = record.into_domain();
        counters.apply_increment(tokens, Utc::now().date_naive());

        sqlx::query(
            "UPDATE users SET \
                 total_tokens_used = $2, \
                 daily_tokens_used = $3, \
                 last_token_reset = $4, \
                 updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(user_id)
        .bind(counters.total_tokens_used)
        .bind(counters.daily_tokens_used)
        .bind(counters.last_reset_date)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(())
    }

    async fn get_usage(&self, user_id: Uuid) -> PortResult<TokenUsage> {
        let record = sqlx::query_as::<_, CountersRecord>(
            "SELECT total_tokens_used, daily_tokens_used, last_token_reset \
             FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?
        .ok_or_else(|| PortError::NotFound(format!("User {} not found", user_id)))?;

        let mut counters = record.into_domain();
        // A read that crosses a day boundary persists the zeroed daily
        // counter even without a new increment.
        if counters.refresh(Utc::now().date_naive()) {
            sqlx::query(
                "UPDATE users SET daily_tokens_used = $2, last_token_reset = $3, \
                 updated_at = NOW() WHERE id = $1",
            )
            .bind(user_id)
            .bind(counters.daily_tokens_used)
            .bind(counters.last_reset_date)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        }

        Ok(counters.as_usage())
    }

    async fn record_audit(&self, entry: NewUsageRecord) -> PortResult<()> {
        let metadata = serde_json::to_value(&entry.metadata)
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        sqlx::query(
            "INSERT INTO ai_requests \
                 (id, request_type, prompt, level, tokens_used, metadata, user_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(Uuid::new_v4())
        .bind(entry.request_type.to_string())
        .bind(&entry.prompt)
        .bind(&entry.level)
        .bind(entry.tokens_used)
        .bind(metadata)
        .bind(entry.user_id)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(())
    }
}

//=========================================================================================
// `AuthStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl AuthStore for DbAdapter {
    async fn create_user(
        &self,
        email: &str,
        name: &str,
        hashed_password: &str,
    ) -> PortResult<User> {
        let record = sqlx::query_as::<_, UserRecord>(
            "INSERT INTO users (id, email, name, password_hash) \
             VALUES ($1, $2, $3, $4) \
             RETURNING id, email, name",
        )
        .bind(Uuid::new_v4())
        .bind(email)
        .bind(name)
        .bind(hashed_password)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                PortError::Conflict("User with this email already exists".to_string())
            }
            _ => unexpected(e),
        })?;

        Ok(record.into_domain())
    }

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials> {
        let record = sqlx::query_as::<_, CredentialsRecord>(
            "SELECT id, email, name, password_hash FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?
        .ok_or_else(|| PortError::NotFound(format!("User {} not found", email)))?;

        Ok(record.into_domain())
    }

    async fn get_user_by_id(&self, user_id: Uuid) -> PortResult<User> {
        let record =
            sqlx::query_as::<_, UserRecord>("SELECT id, email, name FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(unexpected)?
                .ok_or_else(|| PortError::NotFound(format!("User {} not found", user_id)))?;

        Ok(record.into_domain())
    }

    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()> {
        sqlx::query("INSERT INTO auth_sessions (id, user_id, expires_at) VALUES ($1, $2, $3)")
            .bind(session_id)
            .bind(user_id)
            .bind(expires_at)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn validate_auth_session(&self, session_id: &str) -> PortResult<Uuid> {
        let row: Option<(Uuid,)> = sqlx::query_as(
            "SELECT user_id FROM auth_sessions WHERE id = $1 AND expires_at > NOW()",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;

        row.map(|(user_id,)| user_id).ok_or(PortError::Unauthorized)
    }

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()> {
        sqlx::query("DELETE FROM auth_sessions WHERE id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }
}
