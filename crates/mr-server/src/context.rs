//! Application context shared by all route handlers via Axum state.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use mr_av::{Runner, ToolRegistry};
use mr_core::config::Config;
use mr_core::events::EventBus;
use mr_jobs::{Coordinator, HealthTracker, SlotPool};

/// Everything a handler may need, cheap to clone.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub tools: Arc<ToolRegistry>,
    pub coordinator: Arc<Coordinator>,
    pub health: Arc<HealthTracker>,
    pub event_bus: Arc<EventBus>,
    pub started_at: DateTime<Utc>,
}

impl AppContext {
    /// Wire up the tool registry, slot pool, coordinator and health tracker.
    ///
    /// The readiness state starts as `Starting`; nothing is admitted until
    /// the transcoder self-check passes.
    pub fn build(config: Config) -> mr_core::Result<Self> {
        let event_bus = Arc::new(EventBus::default());
        let tools = Arc::new(ToolRegistry::discover(&config.tools));

        let pool = SlotPool::new(
            config.jobs.capacity,
            config.jobs.max_queue,
            config.jobs.unhealthy_after_spawn_failures,
            Arc::clone(&event_bus),
        );
        let runner = Runner::new(Arc::clone(&tools), config.jobs.work_dir.clone());
        let coordinator = Coordinator::new(
            config.jobs.clone(),
            runner,
            Arc::clone(&pool),
            Arc::clone(&event_bus),
        )?;
        let health = HealthTracker::new(pool, config.health.heartbeat_interval());

        Ok(Self {
            config: Arc::new(config),
            tools,
            coordinator,
            health,
            event_bus,
            started_at: Utc::now(),
        })
    }
}
