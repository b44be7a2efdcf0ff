pub mod db;
pub mod planner_llm;

pub use db::DbAdapter;
pub use planner_llm::LlmPlannerAdapter;
