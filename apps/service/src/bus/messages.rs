use probe::{Monitor, MonitorResult};
use serde::{Deserialize, Serialize};

/// Payload of a dispatch topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchMessage {
    /// Set for on-demand runs only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    /// Region the message was dispatched for
    pub location: String,
    pub monitor: Monitor,
}

/// Payload of the post-request topic. Body and headers stay in storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostRequestEvent {
    pub monitor_id: String,
    pub result_id: String,
    pub account_id: String,
    pub err: String,
}

impl PostRequestEvent {
    pub fn from_result(result: &MonitorResult) -> Self {
        Self {
            monitor_id: result.monitor_id.clone(),
            result_id: result.id.clone(),
            account_id: result.account_id.clone(),
            err: result.err.clone(),
        }
    }
}

/// Payload of the on-demand response topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OndemandResponse {
    pub run_id: String,
    pub result: MonitorResult,
}
