//! crates/study_planner_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the
//! core to be independent of specific external implementations like databases
//! or generative-model APIs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{
    GeneratedPlan, GeneratedTopics, NewStudyPlan, NewUsageRecord, PlanPage, PlanUpdate, StudyPlan,
    TokenUsage, User, UserCredentials,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g.,
/// database, generation provider).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Conflict: {0}")]
    Conflict(String),
    /// Any failure of a generation round trip: transport, timeout, or a
    /// response that does not match the requested shape. Callers see it as
    /// one opaque failure; the detail string is for logs only.
    #[error("generation failed: {0}")]
    Generation(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

/// The external generative-model client. Each call is a single blocking
/// round trip; failures are surfaced, never retried.
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Produces a normalized batch of exactly 20 candidate topics for a
    /// subject and level, avoiding `exclude_topics` when present.
    async fn generate_topics(
        &self,
        subject: &str,
        level: &str,
        exclude_topics: &[String],
    ) -> PortResult<GeneratedTopics>;

    /// Produces a full timeline-structured curriculum integrating the
    /// caller-selected topics on top of the subject's fundamentals.
    async fn generate_plan(
        &self,
        subject: &str,
        level: &str,
        selected_topics: &[String],
    ) -> PortResult<GeneratedPlan>;

    /// Merges additional topics into an existing plan without discarding its
    /// structure, preserving the timeline order of current periods.
    async fn refine_plan(
        &self,
        existing: &StudyPlan,
        additional_topics: &[String],
    ) -> PortResult<GeneratedPlan>;
}

/// Persistence for study plans. Each operation is a single atomic store
/// operation; no multi-step transactions are required.
#[async_trait]
pub trait PlanStore: Send + Sync {
    async fn create(&self, new_plan: NewStudyPlan) -> PortResult<StudyPlan>;

    /// One owner's plans, newest first, with offset pagination.
    async fn list_by_owner(&self, owner: Uuid, page: u32, page_size: u32) -> PortResult<PlanPage>;

    async fn get_by_id(&self, id: Uuid) -> PortResult<Option<StudyPlan>>;

    /// Merges the supplied fields, refreshes `updated_at`, and returns the
    /// full updated entity.
    async fn update(&self, id: Uuid, changes: PlanUpdate) -> PortResult<StudyPlan>;

    async fn delete(&self, id: Uuid) -> PortResult<()>;
}

/// Per-user token accounting and the append-only generation audit log.
#[async_trait]
pub trait UsageTracker: Send + Sync {
    /// Adds `tokens` to the user's counters, resetting the daily figure on a
    /// day boundary.
    async fn increment(&self, user_id: Uuid, tokens: i64) -> PortResult<()>;

    /// Current counters; persists the day-boundary daily reset as a side
    /// effect of the read.
    async fn get_usage(&self, user_id: Uuid) -> PortResult<TokenUsage>;

    /// Append-only insert of one audit entry. Never updated or deleted.
    async fn record_audit(&self, entry: NewUsageRecord) -> PortResult<()>;
}

/// User accounts and browser login sessions. Consumed by the web layer;
/// the orchestration core never touches it.
#[async_trait]
pub trait AuthStore: Send + Sync {
    async fn create_user(&self, email: &str, name: &str, hashed_password: &str)
        -> PortResult<User>;

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials>;

    async fn get_user_by_id(&self, user_id: Uuid) -> PortResult<User>;

    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()>;

    /// Resolves an unexpired session id to its user, or `Unauthorized`.
    async fn validate_auth_session(&self, session_id: &str) -> PortResult<Uuid>;

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()>;
}
