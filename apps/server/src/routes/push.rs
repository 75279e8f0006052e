use actix_web::http::header::AUTHORIZATION;
use actix_web::web::{Bytes, Data, Path};
use actix_web::{HttpRequest, HttpResponse, Responder, post};
use apimon_service::bus::push::PushOutcome;
use tracing::{debug, warn};

use super::AppState;

/// Inbound push from the managed bus.
///
/// Always acknowledged with 200: a rejected message is logged and dropped
/// so the bus does not redeliver it.
#[post("/push/{kind}")]
pub async fn push_route(
    state: Data<AppState>,
    kind: Path<String>,
    request: HttpRequest,
    body: Bytes,
) -> impl Responder {
    let Some(topic) = state.topics.from_kind(&kind) else {
        warn!(kind = %kind, "Push for unknown topic kind");
        return HttpResponse::Ok().finish();
    };
    let Some(receiver) = &state.push else {
        warn!(%topic, "Push received but push transport is disabled");
        return HttpResponse::Ok().finish();
    };

    let authorization = request.headers().get(AUTHORIZATION).and_then(|v| v.to_str().ok());
    match receiver.accept(&topic, authorization, &body) {
        PushOutcome::Delivered { receivers, .. } => debug!(%topic, receivers, "Push accepted"),
        PushOutcome::Rejected(reason) => debug!(%topic, %reason, "Push dropped"),
    }
    HttpResponse::Ok().finish()
}
