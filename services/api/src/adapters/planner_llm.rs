//! services/api/src/adapters/planner_llm.rs
//!
//! This module contains the adapter for the curriculum-generation LLM.
//! It implements the `GenerationService` port from the `core` crate against
//! an OpenAI-compatible chat-completions endpoint.

use std::collections::HashSet;
use std::time::Duration;

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequest, CreateChatCompletionRequestArgs, ResponseFormat,
    },
    Client,
};
use async_trait::async_trait;
use serde::Deserialize;

use study_planner_core::domain::{GeneratedPlan, GeneratedTopics, ScheduleItem, StudyPlan, Topic};
use study_planner_core::ports::{GenerationService, PortError, PortResult};

/// Every topic batch is normalized to exactly this many entries so the
/// selection UI always has a stable set to lay out.
const TOPIC_BATCH_SIZE: usize = 20;

const SYSTEM_INSTRUCTIONS: &str = "You are a curriculum designer. You respond with a single JSON \
object that matches the shape requested in the user message exactly: no prose, no Markdown, no \
surrounding commentary.";

const TOPICS_PROMPT_TEMPLATE: &str = r#"Generate a list of approximately 20 distinct sub-topics, concepts, or skills for learning "{subject}" at a "{level}" level.

Mark between 8 and 12 of them as core: the must-have fundamentals without which the subject cannot be learned at this level. Mark the rest as optional.{exclusion_clause}

Respond with a JSON object of exactly this shape:
{"topics": [{"name": "<topic name>", "isCore": <true or false>}, ...]}

Ensure each topic is specific, actionable, and relevant to the subject matter."#;

const PLAN_PROMPT_TEMPLATE: &str = r#"Create a comprehensive structured study plan for "{subject}" ({level} level).

The plan MUST include all essential and fundamental topics required to master this subject at the specified level.{topics_instruction}

Structure the plan by Timeline (e.g., Weeks or Modules).
For each time block, list the main Topics covered.
For each Topic, list specific Lesson titles with a brief description.

Do not generate full lesson content, just the structure.

Respond with a JSON object of exactly this shape:
{"title": "<compelling title>", "description": "<brief overview>", "schedule": [{"period": "<e.g. Week 1>", "objective": "<learning objective>", "topics": [{"title": "<topic name>", "lessons": [{"title": "<lesson title>", "description": "<brief lesson description>"}]}]}]}"#;

const REFINE_PROMPT_TEMPLATE: &str = r#"An existing study plan is being extended. Integrate the additional topics below into the plan without discarding its existing structure: add new schedule sections or expand existing ones, and keep the chronological order of the current periods intact.

EXISTING PLAN
Title: {title}
Description: {description}
Schedule (JSON):
{schedule}

ADDITIONAL TOPICS: {topics}

Respond with a JSON object of exactly this shape:
{"title": "<updated title>", "description": "<updated overview>", "schedule": [{"period": "<e.g. Week 1>", "objective": "<learning objective>", "topics": [{"title": "<topic name>", "lessons": [{"title": "<lesson title>", "description": "<brief lesson description>"}]}]}]}"#;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `GenerationService` using an OpenAI-compatible
/// LLM endpoint.
#[derive(Clone)]
pub struct LlmPlannerAdapter {
    client: Client<OpenAIConfig>,
    model: String,
    timeout: Duration,
}

impl LlmPlannerAdapter {
    /// Creates a new `LlmPlannerAdapter`. `timeout` bounds each round trip;
    /// a slow provider surfaces as a generation failure, never a retry.
    pub fn new(client: Client<OpenAIConfig>, model: String, timeout: Duration) -> Self {
        Self {
            client,
            model,
            timeout,
        }
    }

    fn build_request(&self, user_prompt: &str) -> PortResult<CreateChatCompletionRequest> {
        let messages = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(SYSTEM_INSTRUCTIONS)
                .build()
                .map_err(|e| PortError::Generation(e.to_string()))?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(user_prompt)
                .build()
                .map_err(|e| PortError::Generation(e.to_string()))?
                .into(),
        ];

        CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .temperature(0.7)
            .response_format(ResponseFormat::JsonObject)
            .build()
            .map_err(|e| PortError::Generation(e.to_string()))
    }

    /// One bounded round trip. Returns the raw response text and the token
    /// count (provider usage metadata when present, length estimate
    /// otherwise).
    async fn complete(&self, user_prompt: &str) -> PortResult<(String, i64)> {
        let request = self.build_request(user_prompt)?;

        let response = tokio::time::timeout(self.timeout, self.client.chat().create(request))
            .await
            .map_err(|_| {
                PortError::Generation(format!(
                    "provider did not respond within {}s",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e: OpenAIError| PortError::Generation(e.to_string()))?;

        let tokens_from_usage = response
            .usage
            .as_ref()
            .map(|usage| usage.total_tokens as i64);

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                PortError::Generation("provider response contained no text content".to_string())
            })?;

        let tokens_used =
            tokens_from_usage.unwrap_or_else(|| estimate_tokens(user_prompt, &content));

        Ok((content, tokens_used))
    }
}

//=========================================================================================
// `GenerationService` Trait Implementation
//=========================================================================================

#[async_trait]
impl GenerationService for LlmPlannerAdapter {
    async fn generate_topics(
        &self,
        subject: &str,
        level: &str,
        exclude_topics: &[String],
    ) -> PortResult<GeneratedTopics> {
        let prompt = render_topics_prompt(subject, level, exclude_topics);
        let (content, tokens_used) = self.complete(&prompt).await?;

        let payload: TopicsPayload = parse_payload(&content)?;
        Ok(GeneratedTopics {
            topics: normalize_topics(payload.topics),
            tokens_used,
        })
    }

    async fn generate_plan(
        &self,
        subject: &str,
        level: &str,
        selected_topics: &[String],
    ) -> PortResult<GeneratedPlan> {
        let prompt = render_plan_prompt(subject, level, selected_topics);
        let (content, tokens_used) = self.complete(&prompt).await?;

        let payload: PlanPayload = parse_payload(&content)?;
        payload.into_generated(tokens_used)
    }

    async fn refine_plan(
        &self,
        existing: &StudyPlan,
        additional_topics: &[String],
    ) -> PortResult<GeneratedPlan> {
        let prompt = render_refine_prompt(existing, additional_topics)?;
        let (content, tokens_used) = self.complete(&prompt).await?;

        let payload: PlanPayload = parse_payload(&content)?;
        payload.into_generated(tokens_used)
    }
}

//=========================================================================================
// Prompt Rendering
//=========================================================================================

fn render_topics_prompt(subject: &str, level: &str, exclude_topics: &[String]) -> String {
    let exclusion_clause = if exclude_topics.is_empty() {
        String::new()
    } else {
        format!(
            "\n\nDo not suggest any of the following topics again: {}.",
            exclude_topics.join(", ")
        )
    };

    TOPICS_PROMPT_TEMPLATE
        .replace("{subject}", subject)
        .replace("{level}", level)
        .replace("{exclusion_clause}", &exclusion_clause)
}

fn render_plan_prompt(subject: &str, level: &str, selected_topics: &[String]) -> String {
    let topics_instruction = if selected_topics.is_empty() {
        String::new()
    } else {
        format!(
            "\n\nAdditionally, ensure these specific user-selected topics are integrated into the plan: {}.",
            selected_topics.join(", ")
        )
    };

    PLAN_PROMPT_TEMPLATE
        .replace("{subject}", subject)
        .replace("{level}", level)
        .replace("{topics_instruction}", &topics_instruction)
}

fn render_refine_prompt(existing: &StudyPlan, additional_topics: &[String]) -> PortResult<String> {
    let schedule_json = serde_json::to_string_pretty(&existing.schedule)
        .map_err(|e| PortError::Generation(e.to_string()))?;

    Ok(REFINE_PROMPT_TEMPLATE
        .replace("{title}", &existing.title)
        .replace("{description}", &existing.description)
        .replace("{schedule}", &schedule_json)
        .replace("{topics}", &additional_topics.join(", ")))
}

//=========================================================================================
// Response Parsing and Normalization
//=========================================================================================

#[derive(Debug, Deserialize)]
struct TopicsPayload {
    topics: Vec<Topic>,
}

#[derive(Deserialize)]
struct PlanPayload {
    title: String,
    #[serde(default)]
    description: String,
    schedule: Vec<ScheduleItem>,
}

impl PlanPayload {
    fn into_generated(self, tokens_used: i64) -> PortResult<GeneratedPlan> {
        if self.schedule.is_empty() {
            return Err(PortError::Generation(
                "provider returned an empty schedule".to_string(),
            ));
        }
        Ok(GeneratedPlan {
            title: self.title,
            description: self.description,
            schedule: self.schedule,
            tokens_used,
        })
    }
}

fn parse_payload<T: serde::de::DeserializeOwned>(content: &str) -> PortResult<T> {
    serde_json::from_str(strip_fences(content))
        .map_err(|e| PortError::Generation(format!("provider response did not parse: {e}")))
}

/// Some models wrap their JSON in a Markdown code fence despite the
/// instructions; tolerate that before parsing.
fn strip_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Normalizes one raw batch to exactly [`TOPIC_BATCH_SIZE`] topics:
/// case-insensitive de-duplication, truncation of oversized batches in
/// provider order, and placeholder padding of undersized ones.
fn normalize_topics(raw: Vec<Topic>) -> Vec<Topic> {
    let mut seen = HashSet::new();
    let mut topics: Vec<Topic> = Vec::with_capacity(TOPIC_BATCH_SIZE);

    for mut topic in raw {
        topic.name = topic.name.trim().to_string();
        if topic.name.is_empty() {
            continue;
        }
        if seen.insert(topic.name.to_lowercase()) {
            topics.push(topic);
        }
    }

    topics.truncate(TOPIC_BATCH_SIZE);

    let mut n = 1;
    while topics.len() < TOPIC_BATCH_SIZE {
        topics.push(Topic {
            name: format!("Additional Topic {n}"),
            is_core: false,
        });
        n += 1;
    }

    topics
}

/// Length-based fallback when the provider reports no usage metadata:
/// roughly one token per four characters of combined input and output.
/// This is an approximation, not billing-accurate.
fn estimate_tokens(input: &str, output: &str) -> i64 {
    (input.len().div_ceil(4) + output.len().div_ceil(4)) as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn topic(name: &str, is_core: bool) -> Topic {
        Topic {
            name: name.to_string(),
            is_core,
        }
    }

    #[test]
    fn undersized_batches_are_padded_in_order() {
        let raw = vec![topic("Clay Preparation", true), topic("Glazing", false)];
        let normalized = normalize_topics(raw);

        assert_eq!(normalized.len(), TOPIC_BATCH_SIZE);
        assert_eq!(normalized[2].name, "Additional Topic 1");
        assert_eq!(normalized[19].name, "Additional Topic 18");
        assert!(normalized[2..].iter().all(|t| !t.is_core));
    }

    #[test]
    fn oversized_batches_keep_the_first_twenty_in_provider_order() {
        let raw: Vec<Topic> = (0..25).map(|i| topic(&format!("Topic {i}"), false)).collect();
        let normalized = normalize_topics(raw);

        assert_eq!(normalized.len(), TOPIC_BATCH_SIZE);
        assert_eq!(normalized[0].name, "Topic 0");
        assert_eq!(normalized[19].name, "Topic 19");
    }

    #[test]
    fn duplicate_names_are_dropped_case_insensitively() {
        let raw = vec![
            topic("Glazing", true),
            topic("glazing", false),
            topic("  Glazing  ", false),
            topic("Kiln Safety", false),
        ];
        let normalized = normalize_topics(raw);

        assert_eq!(normalized[0].name, "Glazing");
        assert!(normalized[0].is_core);
        assert_eq!(normalized[1].name, "Kiln Safety");
        assert_eq!(normalized[2].name, "Additional Topic 1");
    }

    #[test]
    fn token_estimate_rounds_each_side_up() {
        // 9 chars -> 3 tokens, 2 chars -> 1 token.
        assert_eq!(estimate_tokens("123456789", "ab"), 4);
        assert_eq!(estimate_tokens("", ""), 0);
    }

    #[test]
    fn fenced_responses_still_parse() {
        let fenced = "```json\n{\"topics\": [{\"name\": \"Glazing\", \"isCore\": true}]}\n```";
        let payload: TopicsPayload = parse_payload(fenced).unwrap();
        assert_eq!(payload.topics.len(), 1);
        assert!(payload.topics[0].is_core);

        let bare = "{\"topics\": []}";
        let payload: TopicsPayload = parse_payload(bare).unwrap();
        assert!(payload.topics.is_empty());
    }

    #[test]
    fn prose_responses_fail_as_generation_errors() {
        let err = parse_payload::<TopicsPayload>("Here are your topics!").unwrap_err();
        assert!(matches!(err, PortError::Generation(_)));
    }

    #[test]
    fn topics_prompt_carries_the_exclusion_clause() {
        let excluded = vec!["Glazing".to_string(), "Kiln Safety".to_string()];
        let prompt = render_topics_prompt("Pottery", "Beginner", &excluded);
        assert!(prompt.contains("\"Pottery\""));
        assert!(prompt.contains("Do not suggest any of the following topics again: Glazing, Kiln Safety."));

        let without = render_topics_prompt("Pottery", "Beginner", &[]);
        assert!(!without.contains("Do not suggest"));
    }

    #[test]
    fn refine_prompt_embeds_the_existing_schedule() {
        let plan = StudyPlan {
            id: Uuid::new_v4(),
            title: "Pottery Path".into(),
            description: "Eight weeks of clay".into(),
            prompt: "Pottery".into(),
            level: "Beginner".into(),
            selected_topics: vec!["Glazing".into()],
            schedule: vec![ScheduleItem {
                period: "Week 1".into(),
                objective: "Meet the wheel".into(),
                topics: vec![],
            }],
            owner_user_id: Uuid::new_v4(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let prompt = render_refine_prompt(&plan, &["Raku Firing".to_string()]).unwrap();
        assert!(prompt.contains("Title: Pottery Path"));
        assert!(prompt.contains("Week 1"));
        assert!(prompt.contains("ADDITIONAL TOPICS: Raku Firing"));
    }

    #[test]
    fn empty_schedules_are_rejected() {
        let payload = PlanPayload {
            title: "Empty".into(),
            description: String::new(),
            schedule: vec![],
        };
        assert!(matches!(
            payload.into_generated(10),
            Err(PortError::Generation(_))
        ));
    }
}
