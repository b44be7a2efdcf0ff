//! Tests for the orchestration service: sequencing, ownership checks, and
//! the tolerance of bookkeeping failures.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use api_lib::service::PlannerService;
use study_planner_core::domain::{
    AuditMetadata, GeneratedPlan, GeneratedTopics, Lesson, NewStudyPlan, NewUsageRecord, PlanPage,
    PlanTopic, PlanUpdate, RequestType, ScheduleItem, StudyPlan, TokenUsage, Topic,
};
use study_planner_core::ports::{
    GenerationService, PlanStore, PortError, PortResult, UsageTracker,
};

// ===========================================================================
// Mock ports
// ===========================================================================

struct StubGeneration {
    tokens: i64,
    fail: bool,
}

impl StubGeneration {
    fn new(tokens: i64) -> Self {
        Self {
            tokens,
            fail: false,
        }
    }

    fn failing() -> Self {
        Self {
            tokens: 0,
            fail: true,
        }
    }
}

fn topic_batch() -> Vec<Topic> {
    (1..=20)
        .map(|i| Topic {
            name: format!("Topic {i}"),
            is_core: i <= 10,
        })
        .collect()
}

fn sample_schedule() -> Vec<ScheduleItem> {
    vec![
        ScheduleItem {
            period: "Week 1".into(),
            objective: "Foundations".into(),
            topics: vec![PlanTopic {
                title: "Clay Preparation".into(),
                lessons: vec![Lesson {
                    title: "Wedging".into(),
                    description: "Removing air pockets".into(),
                }],
            }],
        },
        ScheduleItem {
            period: "Week 2".into(),
            objective: "The wheel".into(),
            topics: vec![],
        },
    ]
}

#[async_trait]
impl GenerationService for StubGeneration {
    async fn generate_topics(
        &self,
        _subject: &str,
        _level: &str,
        _exclude_topics: &[String],
    ) -> PortResult<GeneratedTopics> {
        if self.fail {
            return Err(PortError::Generation("stubbed outage".into()));
        }
        Ok(GeneratedTopics {
            topics: topic_batch(),
            tokens_used: self.tokens,
        })
    }

    async fn generate_plan(
        &self,
        _subject: &str,
        _level: &str,
        _selected_topics: &[String],
    ) -> PortResult<GeneratedPlan> {
        if self.fail {
            return Err(PortError::Generation("stubbed outage".into()));
        }
        Ok(GeneratedPlan {
            title: "Pottery Path".into(),
            description: "Eight weeks of clay".into(),
            schedule: sample_schedule(),
            tokens_used: self.tokens,
        })
    }

    async fn refine_plan(
        &self,
        existing: &StudyPlan,
        additional_topics: &[String],
    ) -> PortResult<GeneratedPlan> {
        if self.fail {
            return Err(PortError::Generation("stubbed outage".into()));
        }
        let mut schedule = existing.schedule.clone();
        schedule.push(ScheduleItem {
            period: format!("Week {}", schedule.len() + 1),
            objective: format!("New material: {}", additional_topics.join(", ")),
            topics: vec![],
        });
        Ok(GeneratedPlan {
            title: format!("{} (expanded)", existing.title),
            description: existing.description.clone(),
            schedule,
            tokens_used: self.tokens,
        })
    }
}

#[derive(Default)]
struct RecordingPlanStore {
    plans: Mutex<HashMap<Uuid, StudyPlan>>,
    updates: Mutex<Vec<(Uuid, PlanUpdate)>>,
    fail_create: bool,
    fail_update: bool,
}

impl RecordingPlanStore {
    fn seed(&self, plan: StudyPlan) {
        self.plans.lock().unwrap().insert(plan.id, plan);
    }

    fn stored(&self, id: Uuid) -> Option<StudyPlan> {
        self.plans.lock().unwrap().get(&id).cloned()
    }
}

#[async_trait]
impl PlanStore for RecordingPlanStore {
    async fn create(&self, new_plan: NewStudyPlan) -> PortResult<StudyPlan> {
        if self.fail_create {
            return Err(PortError::Unexpected("store offline".into()));
        }
        let now = Utc::now();
        let plan = StudyPlan {
            id: Uuid::new_v4(),
            title: new_plan.title,
            description: new_plan.description,
            prompt: new_plan.prompt,
            level: new_plan.level,
            selected_topics: new_plan.selected_topics,
            schedule: new_plan.schedule,
            owner_user_id: new_plan.owner_user_id,
            created_at: now,
            updated_at: now,
        };
        self.plans.lock().unwrap().insert(plan.id, plan.clone());
        Ok(plan)
    }

    async fn list_by_owner(&self, owner: Uuid, page: u32, page_size: u32) -> PortResult<PlanPage> {
        let mut items: Vec<StudyPlan> = self
            .plans
            .lock()
            .unwrap()
            .values()
            .filter(|p| p.owner_user_id == owner)
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = items.len() as i64;
        let start = ((page.max(1) - 1) * page_size) as usize;
        let items: Vec<StudyPlan> = items
            .into_iter()
            .skip(start)
            .take(page_size as usize)
            .collect();
        Ok(PlanPage::new(items, total, page, page_size))
    }

    async fn get_by_id(&self, id: Uuid) -> PortResult<Option<StudyPlan>> {
        Ok(self.stored(id))
    }

    async fn update(&self, id: Uuid, changes: PlanUpdate) -> PortResult<StudyPlan> {
        if self.fail_update {
            return Err(PortError::Unexpected("store offline".into()));
        }
        self.updates.lock().unwrap().push((id, changes.clone()));
        let mut plans = self.plans.lock().unwrap();
        let plan = plans
            .get_mut(&id)
            .ok_or_else(|| PortError::NotFound(format!("Study plan {id} not found")))?;
        if let Some(title) = changes.title {
            plan.title = title;
        }
        if let Some(description) = changes.description {
            plan.description = description;
        }
        if let Some(topics) = changes.selected_topics {
            plan.selected_topics = topics;
        }
        if let Some(schedule) = changes.schedule {
            plan.schedule = schedule;
        }
        plan.updated_at = Utc::now();
        Ok(plan.clone())
    }

    async fn delete(&self, id: Uuid) -> PortResult<()> {
        self.plans.lock().unwrap().remove(&id);
        Ok(())
    }
}

#[derive(Default)]
struct RecordingUsage {
    increments: Mutex<Vec<(Uuid, i64)>>,
    audits: Mutex<Vec<NewUsageRecord>>,
    fail_audit: bool,
}

impl RecordingUsage {
    fn failing_audit() -> Self {
        Self {
            fail_audit: true,
            ..Self::default()
        }
    }

    fn increments(&self) -> Vec<(Uuid, i64)> {
        self.increments.lock().unwrap().clone()
    }

    fn audits(&self) -> Vec<NewUsageRecord> {
        self.audits.lock().unwrap().clone()
    }
}

#[async_trait]
impl UsageTracker for RecordingUsage {
    async fn increment(&self, user_id: Uuid, tokens: i64) -> PortResult<()> {
        self.increments.lock().unwrap().push((user_id, tokens));
        Ok(())
    }

    async fn get_usage(&self, _user_id: Uuid) -> PortResult<TokenUsage> {
        let total = self.increments.lock().unwrap().iter().map(|(_, t)| t).sum();
        Ok(TokenUsage {
            total_tokens_used: total,
            daily_tokens_used: total,
        })
    }

    async fn record_audit(&self, entry: NewUsageRecord) -> PortResult<()> {
        if self.fail_audit {
            return Err(PortError::Unexpected("audit store offline".into()));
        }
        self.audits.lock().unwrap().push(entry);
        Ok(())
    }
}

// ===========================================================================
// Harness
// ===========================================================================

struct Harness {
    service: PlannerService,
    plans: Arc<RecordingPlanStore>,
    usage: Arc<RecordingUsage>,
}

impl Harness {
    fn new(generation: StubGeneration, plans: RecordingPlanStore, usage: RecordingUsage) -> Self {
        let plans = Arc::new(plans);
        let usage = Arc::new(usage);
        let service = PlannerService::new(
            Arc::new(generation),
            plans.clone(),
            usage.clone(),
        );
        Self {
            service,
            plans,
            usage,
        }
    }

    fn with_tokens(tokens: i64) -> Self {
        Self::new(
            StubGeneration::new(tokens),
            RecordingPlanStore::default(),
            RecordingUsage::default(),
        )
    }
}

fn seeded_plan(owner: Uuid, selected_topics: Vec<String>) -> StudyPlan {
    let now = Utc::now();
    StudyPlan {
        id: Uuid::new_v4(),
        title: "Pottery Path".into(),
        description: "Eight weeks of clay".into(),
        prompt: "Pottery".into(),
        level: "Beginner".into(),
        selected_topics,
        schedule: sample_schedule(),
        owner_user_id: owner,
        created_at: now,
        updated_at: now,
    }
}

// ===========================================================================
// generate-topics
// ===========================================================================

#[tokio::test]
async fn generate_topics_credits_counters_and_audits() {
    let harness = Harness::with_tokens(120);
    let user = Uuid::new_v4();

    let generated = harness
        .service
        .generate_topics(Some(user), "Pottery", "Beginner", &[])
        .await
        .expect("generation should succeed");

    assert_eq!(generated.topics.len(), 20);
    assert_eq!(generated.tokens_used, 120);
    assert_eq!(harness.usage.increments(), vec![(user, 120)]);

    harness.service.drain().await;
    let audits = harness.usage.audits();
    assert_eq!(audits.len(), 1);
    assert_eq!(audits[0].request_type, RequestType::GenerateTopics);
    assert_eq!(audits[0].user_id, Some(user));
    assert_eq!(
        audits[0].metadata,
        AuditMetadata::Topics { topics_count: 20 }
    );
}

#[tokio::test]
async fn generate_topics_audit_failure_leaves_the_response_unchanged() {
    let harness = Harness::new(
        StubGeneration::new(80),
        RecordingPlanStore::default(),
        RecordingUsage::failing_audit(),
    );
    let user = Uuid::new_v4();

    let generated = harness
        .service
        .generate_topics(Some(user), "Pottery", "Beginner", &[])
        .await
        .expect("a broken audit log must not fail the request");

    harness.service.drain().await;
    assert_eq!(generated.topics.len(), 20);
    // The counter update still happened; only the audit write was lost.
    assert_eq!(harness.usage.increments(), vec![(user, 80)]);
    assert!(harness.usage.audits().is_empty());
}

#[tokio::test]
async fn anonymous_topic_generation_skips_counters_but_still_audits() {
    let harness = Harness::with_tokens(50);

    harness
        .service
        .generate_topics(None, "Pottery", "Beginner", &[])
        .await
        .expect("generation should succeed");

    harness.service.drain().await;
    assert!(harness.usage.increments().is_empty());
    let audits = harness.usage.audits();
    assert_eq!(audits.len(), 1);
    assert_eq!(audits[0].user_id, None);
}

#[tokio::test]
async fn zero_token_responses_do_not_touch_counters() {
    let harness = Harness::with_tokens(0);
    let user = Uuid::new_v4();

    harness
        .service
        .generate_topics(Some(user), "Pottery", "Beginner", &[])
        .await
        .expect("generation should succeed");

    assert!(harness.usage.increments().is_empty());
}

#[tokio::test]
async fn generation_failure_is_fatal_and_records_nothing() {
    let harness = Harness::new(
        StubGeneration::failing(),
        RecordingPlanStore::default(),
        RecordingUsage::default(),
    );

    let err = harness
        .service
        .generate_topics(Some(Uuid::new_v4()), "Pottery", "Beginner", &[])
        .await
        .unwrap_err();
    assert!(matches!(err, PortError::Generation(_)));

    harness.service.drain().await;
    assert!(harness.usage.increments().is_empty());
    assert!(harness.usage.audits().is_empty());
}

// ===========================================================================
// generate-plan
// ===========================================================================

#[tokio::test]
async fn generate_plan_persists_the_plan_for_its_owner() {
    let harness = Harness::with_tokens(300);
    let user = Uuid::new_v4();
    let selected = vec!["Glazing".to_string(), "Raku Firing".to_string()];

    let outcome = harness
        .service
        .generate_plan(user, "Pottery", "Beginner", &selected)
        .await
        .expect("generation should succeed");

    let id = outcome.study_plan_id.expect("the save should succeed");
    let stored = harness.plans.stored(id).expect("plan should be stored");
    assert_eq!(stored.owner_user_id, user);
    assert_eq!(stored.prompt, "Pottery");
    assert_eq!(stored.level, "Beginner");
    assert_eq!(stored.selected_topics, selected);
    assert_eq!(stored.schedule, outcome.plan.schedule);

    harness.service.drain().await;
    let audits = harness.usage.audits();
    assert_eq!(audits.len(), 1);
    assert_eq!(audits[0].request_type, RequestType::GeneratePlan);
    assert_eq!(
        audits[0].metadata,
        AuditMetadata::Plan {
            selected_topics_count: 2,
            schedule_items_count: 2,
        }
    );
}

#[tokio::test]
async fn generate_plan_survives_a_failed_save() {
    let harness = Harness::new(
        StubGeneration::new(300),
        RecordingPlanStore {
            fail_create: true,
            ..RecordingPlanStore::default()
        },
        RecordingUsage::default(),
    );
    let user = Uuid::new_v4();

    let outcome = harness
        .service
        .generate_plan(user, "Pottery", "Beginner", &[])
        .await
        .expect("the user still gets their plan when storage is down");

    assert!(outcome.study_plan_id.is_none());
    assert_eq!(outcome.plan.title, "Pottery Path");

    harness.service.drain().await;
    // Counters and audit log were still written.
    assert_eq!(harness.usage.increments().len(), 1);
    assert_eq!(harness.usage.audits().len(), 1);
}

// ===========================================================================
// refine-plan
// ===========================================================================

#[tokio::test]
async fn refine_appends_topics_without_deduplicating() {
    let harness = Harness::with_tokens(150);
    let user = Uuid::new_v4();
    let plan = seeded_plan(user, vec!["Glazing".into(), "Wheel Throwing".into()]);
    let plan_id = plan.id;
    harness.plans.seed(plan);

    // "Glazing" is deliberately submitted again.
    let additional = vec!["Glazing".to_string(), "Raku Firing".to_string()];
    let refined = harness
        .service
        .refine_plan(user, plan_id, &additional)
        .await
        .expect("refine should succeed");

    assert_eq!(refined.title, "Pottery Path (expanded)");
    assert_eq!(refined.schedule.len(), 3);

    let stored = harness.plans.stored(plan_id).unwrap();
    assert_eq!(
        stored.selected_topics,
        vec!["Glazing", "Wheel Throwing", "Glazing", "Raku Firing"]
    );
    assert_eq!(stored.title, refined.title);
    assert_eq!(stored.schedule, refined.schedule);

    harness.service.drain().await;
    let audits = harness.usage.audits();
    assert_eq!(audits.len(), 1);
    assert_eq!(audits[0].request_type, RequestType::RefinePlan);
    assert_eq!(
        audits[0].metadata,
        AuditMetadata::Refine {
            additional_topics: additional,
            additional_topics_count: 2,
            study_plan_id: plan_id,
            original_title: "Pottery Path".into(),
        }
    );
}

#[tokio::test]
async fn refine_preserves_the_existing_schedule_order() {
    let harness = Harness::with_tokens(150);
    let user = Uuid::new_v4();
    let plan = seeded_plan(user, vec![]);
    let plan_id = plan.id;
    let original_periods: Vec<String> =
        plan.schedule.iter().map(|s| s.period.clone()).collect();
    harness.plans.seed(plan);

    let refined = harness
        .service
        .refine_plan(user, plan_id, &["Raku Firing".to_string()])
        .await
        .unwrap();

    let refined_periods: Vec<String> =
        refined.schedule.iter().map(|s| s.period.clone()).collect();
    assert_eq!(&refined_periods[..original_periods.len()], &original_periods[..]);
}

#[tokio::test]
async fn absent_and_foreign_plans_raise_the_same_denial() {
    let harness = Harness::with_tokens(150);
    let owner = Uuid::new_v4();
    let stranger = Uuid::new_v4();
    let plan = seeded_plan(owner, vec![]);
    let plan_id = plan.id;
    harness.plans.seed(plan);

    let absent = harness
        .service
        .refine_plan(owner, Uuid::new_v4(), &["Raku Firing".to_string()])
        .await
        .unwrap_err();
    let foreign = harness
        .service
        .refine_plan(stranger, plan_id, &["Raku Firing".to_string()])
        .await
        .unwrap_err();

    // Existence must not be leaked: both failures are indistinguishable.
    assert_eq!(absent.to_string(), foreign.to_string());
    assert!(matches!(absent, PortError::NotFound(_)));
    assert!(matches!(foreign, PortError::NotFound(_)));

    harness.service.drain().await;
    assert!(harness.usage.audits().is_empty());
}

#[tokio::test]
async fn refine_survives_a_failed_update() {
    let harness = Harness::new(
        StubGeneration::new(150),
        RecordingPlanStore {
            fail_update: true,
            ..RecordingPlanStore::default()
        },
        RecordingUsage::default(),
    );
    let user = Uuid::new_v4();
    let plan = seeded_plan(user, vec!["Glazing".into()]);
    let plan_id = plan.id;
    harness.plans.seed(plan);

    let refined = harness
        .service
        .refine_plan(user, plan_id, &["Raku Firing".to_string()])
        .await
        .expect("the refined plan is returned even when the update fails");
    assert_eq!(refined.title, "Pottery Path (expanded)");

    // The stored plan is untouched.
    let stored = harness.plans.stored(plan_id).unwrap();
    assert_eq!(stored.title, "Pottery Path");
}
