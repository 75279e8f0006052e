use actix_web::web::{Data, Json, Path};
use actix_web::{HttpResponse, post};
use probe::Monitor;
use serde_json::Value;
use tracing::info;

use super::AppState;
use crate::error::AppError;

/// Run a monitor definition once and return its result.
///
/// The body is a monitor without persistence requirements: `id` may be
/// omitted and the account comes from the path.
#[post("/{account_id}/ondemand")]
pub async fn ondemand_route(
    state: Data<AppState>,
    account_id: Path<String>,
    body: Json<Value>,
) -> Result<HttpResponse, AppError> {
    let mut body = body.into_inner();
    let Some(fields) = body.as_object_mut() else {
        return Err(AppError::BadRequest("expected a monitor object".into()));
    };
    fields.entry("id").or_insert_with(|| "draft".into());
    fields.insert("accountId".into(), account_id.as_str().into());

    let monitor: Monitor = serde_json::from_value(body).map_err(|e| AppError::BadRequest(e.to_string()))?;
    info!(account_id = %account_id, url = %monitor.url, "On-demand run requested");

    let result = state.coordinator.run(&account_id, monitor).await?;
    Ok(HttpResponse::Ok().json(result))
}
