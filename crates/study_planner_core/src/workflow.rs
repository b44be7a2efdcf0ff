//! crates/study_planner_core/src/workflow.rs
//!
//! Client-side workflow state machines. These model the steps the UI walks a
//! user through, independent of any rendering or transport: the creation flow
//! (input -> topic selection -> result) and the refine flow on an existing
//! plan (viewing <-> refining). Transitions return `true` when accepted and
//! are no-ops otherwise.

use crate::domain::{GeneratedPlan, Topic};

/// Steps of the plan-creation flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreationStep {
    Input,
    Selection,
    Result,
}

/// Drives a user from a subject/level prompt to a generated plan.
///
/// Core topics returned by the generation step are pre-selected and cannot
/// be deselected; non-core topics toggle freely.
#[derive(Debug)]
pub struct PlanCreationFlow {
    step: CreationStep,
    prompt: String,
    level: String,
    topics: Vec<Topic>,
    selected: Vec<String>,
    result: Option<GeneratedPlan>,
}

impl Default for PlanCreationFlow {
    fn default() -> Self {
        Self::new()
    }
}

impl PlanCreationFlow {
    pub fn new() -> Self {
        Self {
            step: CreationStep::Input,
            prompt: String::new(),
            level: String::new(),
            topics: Vec::new(),
            selected: Vec::new(),
            result: None,
        }
    }

    pub fn step(&self) -> CreationStep {
        self.step
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn level(&self) -> &str {
        &self.level
    }

    pub fn topics(&self) -> &[Topic] {
        &self.topics
    }

    pub fn selected_topics(&self) -> &[String] {
        &self.selected
    }

    pub fn result(&self) -> Option<&GeneratedPlan> {
        self.result.as_ref()
    }

    /// Records the submitted form. The flow stays on the input step until
    /// the topic fetch completes.
    pub fn submit_input(&mut self, prompt: &str, level: &str) -> bool {
        if self.step != CreationStep::Input || prompt.trim().is_empty() || level.trim().is_empty()
        {
            return false;
        }
        self.prompt = prompt.trim().to_string();
        self.level = level.trim().to_string();
        true
    }

    /// Topic fetch completed: move to selection with core topics
    /// pre-selected.
    pub fn topics_loaded(&mut self, topics: Vec<Topic>) -> bool {
        if self.step != CreationStep::Input || self.prompt.is_empty() {
            return false;
        }
        self.selected = topics
            .iter()
            .filter(|t| t.is_core)
            .map(|t| t.name.clone())
            .collect();
        self.topics = topics;
        self.step = CreationStep::Selection;
        true
    }

    /// Toggles a suggested topic. Deselecting a core topic is a no-op.
    pub fn toggle_topic(&mut self, name: &str) -> bool {
        if self.step != CreationStep::Selection {
            return false;
        }
        let Some(topic) = self.topics.iter().find(|t| t.name == name) else {
            return false;
        };
        if let Some(pos) = self.selected.iter().position(|s| s == name) {
            if topic.is_core {
                return false;
            }
            self.selected.remove(pos);
        } else {
            self.selected.push(name.to_string());
        }
        true
    }

    /// Plan generation completed: move to the result step.
    pub fn plan_ready(&mut self, plan: GeneratedPlan) -> bool {
        if self.step != CreationStep::Selection {
            return false;
        }
        self.result = Some(plan);
        self.step = CreationStep::Result;
        true
    }

    /// Back to a blank input form.
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

/// View modes of an already-persisted plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewMode {
    Viewing,
    Refining,
}

/// Drives the refine loop on an existing plan: fetch fresh suggestions
/// (excluding what the plan already covers), curate, apply.
#[derive(Debug)]
pub struct PlanRefineFlow {
    mode: ViewMode,
    included: Vec<String>,
    suggestions: Vec<Topic>,
    selected_new: Vec<String>,
}

impl PlanRefineFlow {
    /// `included` is the plan's current topic list.
    pub fn new(included: Vec<String>) -> Self {
        Self {
            mode: ViewMode::Viewing,
            included,
            suggestions: Vec::new(),
            selected_new: Vec::new(),
        }
    }

    pub fn mode(&self) -> ViewMode {
        self.mode
    }

    pub fn included_topics(&self) -> &[String] {
        &self.included
    }

    pub fn suggestions(&self) -> &[Topic] {
        &self.suggestions
    }

    pub fn selected_new_topics(&self) -> &[String] {
        &self.selected_new
    }

    /// Enters refine mode and returns the exclusion list to send with the
    /// suggestion fetch.
    pub fn start_refine(&mut self) -> &[String] {
        self.mode = ViewMode::Refining;
        self.suggestions.clear();
        self.selected_new.clear();
        &self.included
    }

    /// Suggestion fetch completed. Topics the plan already includes are
    /// dropped (case-insensitive); surviving core topics are pre-selected.
    pub fn suggestions_loaded(&mut self, topics: Vec<Topic>) -> bool {
        if self.mode != ViewMode::Refining {
            return false;
        }
        let fresh: Vec<Topic> = topics
            .into_iter()
            .filter(|t| {
                !self
                    .included
                    .iter()
                    .any(|existing| existing.eq_ignore_ascii_case(&t.name))
            })
            .collect();
        self.selected_new = fresh
            .iter()
            .filter(|t| t.is_core)
            .map(|t| t.name.clone())
            .collect();
        self.suggestions = fresh;
        true
    }

    /// Toggles a suggested topic; core suggestions stay selected.
    pub fn toggle_topic(&mut self, name: &str) -> bool {
        if self.mode != ViewMode::Refining {
            return false;
        }
        let Some(topic) = self.suggestions.iter().find(|t| t.name == name) else {
            return false;
        };
        if let Some(pos) = self.selected_new.iter().position(|s| s == name) {
            if topic.is_core {
                return false;
            }
            self.selected_new.remove(pos);
        } else {
            self.selected_new.push(name.to_string());
        }
        true
    }

    /// Refinement may only be submitted with at least one topic selected.
    pub fn can_submit(&self) -> bool {
        self.mode == ViewMode::Refining && !self.selected_new.is_empty()
    }

    /// The refine call succeeded: append the new selections to the plan's
    /// topic list and return to viewing. Returns the topics that were sent.
    pub fn applied(&mut self) -> Vec<String> {
        let applied = std::mem::take(&mut self.selected_new);
        self.included.extend(applied.iter().cloned());
        self.suggestions.clear();
        self.mode = ViewMode::Viewing;
        applied
    }

    /// Abandons refine mode, discarding suggestions and selections.
    pub fn cancel(&mut self) {
        self.mode = ViewMode::Viewing;
        self.suggestions.clear();
        self.selected_new.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topic(name: &str, is_core: bool) -> Topic {
        Topic {
            name: name.to_string(),
            is_core,
        }
    }

    fn sample_batch() -> Vec<Topic> {
        vec![
            topic("Clay Preparation", true),
            topic("Wheel Throwing", true),
            topic("Glazing", false),
            topic("Raku Firing", false),
        ]
    }

    #[test]
    fn creation_flow_advances_only_after_topics_arrive() {
        let mut flow = PlanCreationFlow::new();
        assert!(flow.submit_input("Pottery", "Beginner"));
        assert_eq!(flow.step(), CreationStep::Input);

        assert!(flow.topics_loaded(sample_batch()));
        assert_eq!(flow.step(), CreationStep::Selection);
    }

    #[test]
    fn creation_flow_rejects_blank_input() {
        let mut flow = PlanCreationFlow::new();
        assert!(!flow.submit_input("   ", "Beginner"));
        assert!(!flow.topics_loaded(sample_batch()));
        assert_eq!(flow.step(), CreationStep::Input);
    }

    #[test]
    fn core_topics_are_preselected_and_cannot_be_deselected() {
        let mut flow = PlanCreationFlow::new();
        flow.submit_input("Pottery", "Beginner");
        flow.topics_loaded(sample_batch());

        assert_eq!(
            flow.selected_topics(),
            ["Clay Preparation", "Wheel Throwing"]
        );

        // Toggling a selected core topic is a no-op.
        assert!(!flow.toggle_topic("Clay Preparation"));
        assert_eq!(flow.selected_topics().len(), 2);

        // Non-core topics toggle both ways.
        assert!(flow.toggle_topic("Glazing"));
        assert!(flow.selected_topics().contains(&"Glazing".to_string()));
        assert!(flow.toggle_topic("Glazing"));
        assert!(!flow.selected_topics().contains(&"Glazing".to_string()));
    }

    #[test]
    fn unknown_topics_cannot_be_toggled() {
        let mut flow = PlanCreationFlow::new();
        flow.submit_input("Pottery", "Beginner");
        flow.topics_loaded(sample_batch());
        assert!(!flow.toggle_topic("Knitting"));
    }

    #[test]
    fn plan_arrival_completes_the_flow() {
        let mut flow = PlanCreationFlow::new();
        flow.submit_input("Pottery", "Beginner");
        flow.topics_loaded(sample_batch());

        let plan = GeneratedPlan {
            title: "Pottery Path".into(),
            description: "Eight weeks of clay".into(),
            schedule: vec![],
            tokens_used: 50,
        };
        assert!(flow.plan_ready(plan));
        assert_eq!(flow.step(), CreationStep::Result);
        assert!(flow.result().is_some());

        flow.reset();
        assert_eq!(flow.step(), CreationStep::Input);
        assert!(flow.selected_topics().is_empty());
    }

    #[test]
    fn refine_flow_excludes_already_included_topics_case_insensitively() {
        let mut flow = PlanRefineFlow::new(vec!["glazing".into(), "Clay Preparation".into()]);
        assert_eq!(flow.start_refine(), ["glazing", "Clay Preparation"]);

        flow.suggestions_loaded(vec![
            topic("Glazing", false),
            topic("Kiln Safety", true),
            topic("Slip Casting", false),
        ]);

        let names: Vec<&str> = flow.suggestions().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["Kiln Safety", "Slip Casting"]);
        // The surviving core suggestion is pre-selected.
        assert_eq!(flow.selected_new_topics(), ["Kiln Safety"]);
    }

    #[test]
    fn refine_flow_requires_at_least_one_selection() {
        let mut flow = PlanRefineFlow::new(vec![]);
        flow.start_refine();
        flow.suggestions_loaded(vec![topic("Slip Casting", false)]);
        assert!(!flow.can_submit());

        flow.toggle_topic("Slip Casting");
        assert!(flow.can_submit());
    }

    #[test]
    fn refine_flow_keeps_core_suggestions_selected() {
        let mut flow = PlanRefineFlow::new(vec![]);
        flow.start_refine();
        flow.suggestions_loaded(vec![topic("Kiln Safety", true)]);
        assert!(!flow.toggle_topic("Kiln Safety"));
        assert_eq!(flow.selected_new_topics(), ["Kiln Safety"]);
    }

    #[test]
    fn applying_a_refinement_appends_to_the_included_list() {
        let mut flow = PlanRefineFlow::new(vec!["Glazing".into()]);
        flow.start_refine();
        flow.suggestions_loaded(vec![topic("Kiln Safety", true), topic("Slip Casting", false)]);
        flow.toggle_topic("Slip Casting");

        let applied = flow.applied();
        assert_eq!(applied, ["Kiln Safety", "Slip Casting"]);
        assert_eq!(
            flow.included_topics(),
            ["Glazing", "Kiln Safety", "Slip Casting"]
        );
        assert_eq!(flow.mode(), ViewMode::Viewing);
        assert!(flow.suggestions().is_empty());
    }

    #[test]
    fn cancelling_refine_discards_the_selection() {
        let mut flow = PlanRefineFlow::new(vec!["Glazing".into()]);
        flow.start_refine();
        flow.suggestions_loaded(vec![topic("Kiln Safety", true)]);
        flow.cancel();

        assert_eq!(flow.mode(), ViewMode::Viewing);
        assert!(flow.selected_new_topics().is_empty());
        assert_eq!(flow.included_topics(), ["Glazing"]);
    }
}
