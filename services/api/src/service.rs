//! services/api/src/service.rs
//!
//! The orchestration service for the generation workflow. Sequences the
//! generation client, the plan store, and the usage tracker for each of the
//! three operations, with explicit constructor-passed collaborators.
//!
//! Bookkeeping must never cost the user their generation result: counter
//! updates and plan saves are attempted and their failures logged, and audit
//! writes are detached onto a task tracker that the server drains at
//! shutdown.

use std::sync::Arc;

use tokio_util::task::TaskTracker;
use tracing::{error, warn};
use uuid::Uuid;

use study_planner_core::domain::{
    AuditMetadata, GeneratedPlan, GeneratedTopics, NewStudyPlan, NewUsageRecord, PlanUpdate,
    RequestType,
};
use study_planner_core::ports::{
    GenerationService, PlanStore, PortError, PortResult, UsageTracker,
};

/// The result of a generate-plan request. `study_plan_id` is present only
/// when the best-effort save succeeded.
#[derive(Debug)]
pub struct PlanOutcome {
    pub plan: GeneratedPlan,
    pub study_plan_id: Option<Uuid>,
}

/// Orchestrates topic generation, plan generation, and plan refinement.
pub struct PlannerService {
    generation: Arc<dyn GenerationService>,
    plans: Arc<dyn PlanStore>,
    usage: Arc<dyn UsageTracker>,
    detached: TaskTracker,
}

impl PlannerService {
    pub fn new(
        generation: Arc<dyn GenerationService>,
        plans: Arc<dyn PlanStore>,
        usage: Arc<dyn UsageTracker>,
    ) -> Self {
        Self {
            generation,
            plans,
            usage,
            detached: TaskTracker::new(),
        }
    }

    /// Generates a curated topic batch. Counters are credited when a user is
    /// present; the audit entry is written without blocking the response.
    pub async fn generate_topics(
        &self,
        user_id: Option<Uuid>,
        prompt: &str,
        level: &str,
        exclude_topics: &[String],
    ) -> PortResult<GeneratedTopics> {
        let generated = self
            .generation
            .generate_topics(prompt, level, exclude_topics)
            .await?;

        self.credit_tokens(user_id, generated.tokens_used).await;
        self.record_audit(NewUsageRecord {
            request_type: RequestType::GenerateTopics,
            prompt: prompt.to_string(),
            level: level.to_string(),
            tokens_used: generated.tokens_used,
            user_id,
            metadata: AuditMetadata::Topics {
                topics_count: generated.topics.len(),
            },
        });

        Ok(generated)
    }

    /// Generates a full plan and persists it for the caller. A failed save
    /// is logged and the generated plan still returned: the user keeps their
    /// result even when storage is down.
    pub async fn generate_plan(
        &self,
        user_id: Uuid,
        prompt: &str,
        level: &str,
        selected_topics: &[String],
    ) -> PortResult<PlanOutcome> {
        let generated = self
            .generation
            .generate_plan(prompt, level, selected_topics)
            .await?;

        self.credit_tokens(Some(user_id), generated.tokens_used)
            .await;

        let study_plan_id = match self
            .plans
            .create(NewStudyPlan {
                title: generated.title.clone(),
                description: generated.description.clone(),
                prompt: prompt.to_string(),
                level: level.to_string(),
                selected_topics: selected_topics.to_vec(),
                schedule: generated.schedule.clone(),
                owner_user_id: user_id,
            })
            .await
        {
            Ok(plan) => Some(plan.id),
            Err(e) => {
                error!("failed to save generated study plan: {e}");
                None
            }
        };

        self.record_audit(NewUsageRecord {
            request_type: RequestType::GeneratePlan,
            prompt: prompt.to_string(),
            level: level.to_string(),
            tokens_used: generated.tokens_used,
            user_id: Some(user_id),
            metadata: AuditMetadata::Plan {
                selected_topics_count: selected_topics.len(),
                schedule_items_count: generated.schedule.len(),
            },
        });

        Ok(PlanOutcome {
            plan: generated,
            study_plan_id,
        })
    }

    /// Merges additional topics into a stored plan. An absent plan and a
    /// plan owned by someone else surface the same generic denial, so
    /// existence is not leaked to non-owners.
    pub async fn refine_plan(
        &self,
        user_id: Uuid,
        plan_id: Uuid,
        additional_topics: &[String],
    ) -> PortResult<GeneratedPlan> {
        let existing = self
            .plans
            .get_by_id(plan_id)
            .await?
            .filter(|plan| plan.owner_user_id == user_id)
            .ok_or_else(|| PortError::NotFound("Study plan not found".to_string()))?;

        let refined = self
            .generation
            .refine_plan(&existing, additional_topics)
            .await?;

        self.credit_tokens(Some(user_id), refined.tokens_used).await;

        // The new selection is the prior list plus the additions, duplicates
        // preserved.
        let mut merged_topics = existing.selected_topics.clone();
        merged_topics.extend(additional_topics.iter().cloned());

        let update = PlanUpdate {
            title: Some(refined.title.clone()),
            description: Some(refined.description.clone()),
            selected_topics: Some(merged_topics),
            schedule: Some(refined.schedule.clone()),
        };
        if let Err(e) = self.plans.update(plan_id, update).await {
            error!("failed to persist refined study plan {plan_id}: {e}");
        }

        self.record_audit(NewUsageRecord {
            request_type: RequestType::RefinePlan,
            prompt: existing.prompt.clone(),
            level: existing.level.clone(),
            tokens_used: refined.tokens_used,
            user_id: Some(user_id),
            metadata: AuditMetadata::Refine {
                additional_topics: additional_topics.to_vec(),
                additional_topics_count: additional_topics.len(),
                study_plan_id: plan_id,
                original_title: existing.title.clone(),
            },
        });

        Ok(refined)
    }

    /// Best-effort counter update; failures must not reach the caller.
    async fn credit_tokens(&self, user_id: Option<Uuid>, tokens: i64) {
        let Some(user_id) = user_id else { return };
        if tokens <= 0 {
            return;
        }
        if let Err(e) = self.usage.increment(user_id, tokens).await {
            warn!("failed to update token counters for user {user_id}: {e}");
        }
    }

    /// Detached audit write. The response path never awaits it; the tracker
    /// keeps it alive so `drain` can flush in-flight writes at shutdown.
    fn record_audit(&self, entry: NewUsageRecord) {
        let usage = Arc::clone(&self.usage);
        self.detached.spawn(async move {
            if let Err(e) = usage.record_audit(entry).await {
                error!("failed to record generation audit entry: {e}");
            }
        });
    }

    /// Waits for all detached writes to finish. Called on graceful shutdown
    /// (and by tests that need to observe audit effects); the tracker is
    /// reopened afterwards so the service stays usable.
    pub async fn drain(&self) {
        self.detached.close();
        self.detached.wait().await;
        self.detached.reopen();
    }
}
