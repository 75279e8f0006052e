use std::io::Error as IoError;

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use apimon_service::ondemand::OndemandError;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0:#}")]
    Io(#[from] IoError),
    #[error("Address parsing error: {0}")]
    AddrParse(#[from] std::net::AddrParseError),
    #[error("Config error: {0}")]
    Config(#[from] apimon_service::config::Error),
    #[error("Startup failed: {0:#}")]
    Startup(#[from] anyhow::Error),
    #[error("{0}")]
    Ondemand(#[from] OndemandError),
    #[error("Invalid request: {0}")]
    BadRequest(String),
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Ondemand(OndemandError::TimedOut(_)) => StatusCode::GATEWAY_TIMEOUT,
            AppError::Ondemand(_) => StatusCode::BAD_GATEWAY,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let err = match self {
            AppError::Ondemand(OndemandError::TimedOut(_)) => "timed out".to_string(),
            other => other.to_string(),
        };
        HttpResponse::build(self.status_code()).json(json!({ "err": err }))
    }
}
