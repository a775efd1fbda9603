use std::sync::Arc;

use patrol_core::notify::Notifier;
use patrol_core::service::JobService;

use crate::events::EventSink;

#[derive(Clone)]
pub struct AppState {
    pub job_service: Arc<JobService>,
    pub notifier: Arc<Notifier>,
    pub events: Arc<dyn EventSink>,
}
