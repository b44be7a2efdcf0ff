pub mod auth;
pub mod middleware;
pub mod rest;
pub mod state;

pub use middleware::require_auth;
pub use rest::{
    generate_plan_handler, generate_topics_handler, get_study_plan_handler,
    list_study_plans_handler, refine_plan_handler,
};
