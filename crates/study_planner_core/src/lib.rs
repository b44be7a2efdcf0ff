pub mod domain;
pub mod ports;
pub mod workflow;

pub use domain::{
    AuditMetadata, GeneratedPlan, GeneratedTopics, Lesson, NewStudyPlan, NewUsageRecord, PlanPage,
    PlanTopic, PlanUpdate, RequestType, ScheduleItem, StudyPlan, TokenCounters, TokenUsage, Topic,
    User, UserCredentials,
};
pub use ports::{AuthStore, GenerationService, PlanStore, PortError, PortResult, UsageTracker};
pub use workflow::{CreationStep, PlanCreationFlow, PlanRefineFlow, ViewMode};
