//! crates/study_planner_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any database or web framework; the
//! schedule tree is carried as one serializable document wherever it goes.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A candidate topic from one generation batch. Core topics are the
/// fundamentals the model judged mandatory for the requested level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Topic {
    pub name: String,
    pub is_core: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lesson {
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanTopic {
    pub title: String,
    pub lessons: Vec<Lesson>,
}

/// One time-boxed block of a curriculum ("Week 1", "Module 3", ...).
/// The order of items within a schedule is chronological and must be
/// preserved by storage and by refinement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleItem {
    pub period: String,
    pub objective: String,
    pub topics: Vec<PlanTopic>,
}

/// A persisted study plan, owned by exactly one user.
///
/// A plan is created whole at generate-plan time; it never exists without a
/// schedule. Only refinement mutates it afterwards (title, description,
/// schedule, and a growing topic list).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudyPlan {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub prompt: String,
    pub level: String,
    pub selected_topics: Vec<String>,
    pub schedule: Vec<ScheduleItem>,
    #[serde(rename = "userId")]
    pub owner_user_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert shape for a new plan; id and timestamps are store-assigned.
#[derive(Debug, Clone)]
pub struct NewStudyPlan {
    pub title: String,
    pub description: String,
    pub prompt: String,
    pub level: String,
    pub selected_topics: Vec<String>,
    pub schedule: Vec<ScheduleItem>,
    pub owner_user_id: Uuid,
}

/// Partial update applied by refinement. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct PlanUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub selected_topics: Option<Vec<String>>,
    pub schedule: Option<Vec<ScheduleItem>>,
}

/// One page of a user's plans, newest first.
#[derive(Debug, Clone)]
pub struct PlanPage {
    pub items: Vec<StudyPlan>,
    pub total: i64,
    pub page: u32,
    pub total_pages: u32,
}

impl PlanPage {
    /// Builds a page envelope; `total_pages` is `ceil(total / page_size)`.
    pub fn new(items: Vec<StudyPlan>, total: i64, page: u32, page_size: u32) -> Self {
        let total_pages = if page_size == 0 {
            0
        } else {
            (total.max(0) as u64).div_ceil(page_size as u64) as u32
        };
        Self {
            items,
            total,
            page,
            total_pages,
        }
    }
}

/// What one topic-generation round trip yields.
#[derive(Debug, Clone)]
pub struct GeneratedTopics {
    pub topics: Vec<Topic>,
    pub tokens_used: i64,
}

/// What one plan-generation or refinement round trip yields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedPlan {
    pub title: String,
    pub description: String,
    pub schedule: Vec<ScheduleItem>,
    #[serde(rename = "tokensUsed")]
    pub tokens_used: i64,
}

/// The kind of generation call an audit entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    GenerateTopics,
    GeneratePlan,
    RefinePlan,
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::GenerateTopics => "generate_topics",
            Self::GeneratePlan => "generate_plan",
            Self::RefinePlan => "refine_plan",
        };
        f.write_str(s)
    }
}

impl FromStr for RequestType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "generate_topics" => Ok(Self::GenerateTopics),
            "generate_plan" => Ok(Self::GeneratePlan),
            "refine_plan" => Ok(Self::RefinePlan),
            other => Err(format!("invalid request type: {other:?}")),
        }
    }
}

/// Per-request-type audit payload. Each request type has a statically known
/// shape; serialization is untagged so the stored document carries only the
/// fields themselves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AuditMetadata {
    #[serde(rename_all = "camelCase")]
    Refine {
        additional_topics: Vec<String>,
        additional_topics_count: usize,
        study_plan_id: Uuid,
        original_title: String,
    },
    #[serde(rename_all = "camelCase")]
    Plan {
        selected_topics_count: usize,
        schedule_items_count: usize,
    },
    #[serde(rename_all = "camelCase")]
    Topics { topics_count: usize },
}

/// Append-only audit entry written after every generation call.
#[derive(Debug, Clone)]
pub struct NewUsageRecord {
    pub request_type: RequestType,
    pub prompt: String,
    pub level: String,
    pub tokens_used: i64,
    pub user_id: Option<Uuid>,
    pub metadata: AuditMetadata,
}

/// A user's running token counters, split into all-time and current-day
/// figures. `last_reset_date` is the calendar day the daily figure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TokenCounters {
    pub total_tokens_used: i64,
    pub daily_tokens_used: i64,
    pub last_reset_date: Option<NaiveDate>,
}

impl TokenCounters {
    /// Credits `tokens` against both counters. The first increment on a new
    /// calendar day seeds the daily counter with the increment itself rather
    /// than zero.
    pub fn apply_increment(&mut self, tokens: i64, today: NaiveDate) {
        if self.last_reset_date != Some(today) {
            self.daily_tokens_used = tokens;
            self.last_reset_date = Some(today);
        } else {
            self.daily_tokens_used += tokens;
        }
        self.total_tokens_used += tokens;
    }

    /// Day-boundary reset on the read path: a stale date zeroes the daily
    /// counter and advances the date. Returns true when state changed and the
    /// caller must persist it. Idempotent within one day.
    pub fn refresh(&mut self, today: NaiveDate) -> bool {
        if self.last_reset_date != Some(today) {
            self.daily_tokens_used = 0;
            self.last_reset_date = Some(today);
            true
        } else {
            false
        }
    }

    pub fn as_usage(&self) -> TokenUsage {
        TokenUsage {
            total_tokens_used: self.total_tokens_used,
            daily_tokens_used: self.daily_tokens_used,
        }
    }
}

/// Read model for the counters, as reported to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub total_tokens_used: i64,
    pub daily_tokens_used: i64,
}

// Represents a user - used throughout the app.
#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: String,
}

// Only used internally for login/signup - contains sensitive data.
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub hashed_password: String,
}
