use std::sync::Arc;

use tokio::sync::broadcast;

use errand_notify::TemplateCatalog;
use errand_scheduler::{AlarmEvent, JobStore};
use errand_tool_runtime::{ControllerLoop, ToolRegistry};

use crate::app_config::Services;

pub struct AppState {
    pub registry: Arc<ToolRegistry>,
    pub controller: Option<Arc<ControllerLoop>>,
    pub catalog: Arc<TemplateCatalog>,
    pub store: Arc<JobStore>,
    pub events: broadcast::Sender<AlarmEvent>,
}

impl From<&Services> for AppState {
    fn from(services: &Services) -> Self {
        Self {
            registry: services.registry.clone(),
            controller: services.controller.clone(),
            catalog: services.catalog.clone(),
            store: services.store.clone(),
            events: services.events.clone(),
        }
    }
}
