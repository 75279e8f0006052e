use std::sync::Arc;

use actix_web::web::{self, ServiceConfig};
use apimon_service::Runtime;
use apimon_service::bus::Topics;
use apimon_service::bus::push::PushReceiver;
use apimon_service::ondemand::OndemandCoordinator;

mod health;
mod ondemand;
mod push;

/// Shared handles the routes work with
pub struct AppState {
    pub topics: Topics,
    pub coordinator: Arc<OndemandCoordinator>,
    pub push: Option<Arc<PushReceiver>>,
}

impl AppState {
    pub fn from_runtime(runtime: &Runtime) -> Self {
        Self {
            topics: runtime.topics.clone(),
            coordinator: runtime.coordinator.clone(),
            push: runtime.push_receiver.clone(),
        }
    }
}

pub fn routes(cfg: &mut ServiceConfig) {
    cfg.service(health::health_route)
        .service(push::push_route)
        .service(web::scope("/accounts").service(ondemand::ondemand_route));
}
