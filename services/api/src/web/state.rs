//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use std::sync::Arc;

use crate::config::Config;
use crate::service::PlannerService;
use study_planner_core::ports::{AuthStore, PlanStore, UsageTracker};

/// The shared application state, created once at startup and passed to all
/// handlers. Collaborators are held as trait objects so the web layer stays
/// independent of the concrete adapters.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub auth: Arc<dyn AuthStore>,
    pub plans: Arc<dyn PlanStore>,
    pub usage: Arc<dyn UsageTracker>,
    pub planner: Arc<PlannerService>,
}
