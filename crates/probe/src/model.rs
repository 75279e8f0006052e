//! Monitor and result records shared by every stage of the pipeline.
//!
//! Field names serialize in camelCase so the records travel over the bus
//! and the HTTP surface in the same shape.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Ordered name/value pairs. Repeated names are kept as separate entries.
pub type Tuples = Vec<(String, String)>;

/// `err` value for a status outside the accepted range.
pub const ERR_HTTP_ERROR_CODE: &str = "ERR_HTTP_ERROR_CODE";

/// `err` value for a response that failed at least one assertion.
pub const ERR_ASSERTIONS: &str = "ERR_ASSERTIONS";

/// Lifecycle status of a monitor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorStatus {
    #[default]
    Active,
    Paused,
    /// Synthetic status for a one-off run that is never persisted
    Ondemand,
}

/// Credentials attached to the outgoing request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Auth {
    #[default]
    None,
    Basic { username: String, password: String },
    Bearer { token: String },
}

/// Explicit escalation thresholds and the channels to notify
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thresholds {
    #[serde(default)]
    pub fail_count: u32,
    #[serde(default)]
    pub fail_time_minutes: u32,
    #[serde(default)]
    pub channels: Vec<String>,
}

impl Thresholds {
    /// Both thresholds at zero switches notifications off.
    pub fn is_disabled(&self) -> bool {
        self.fail_count == 0 && self.fail_time_minutes == 0
    }
}

/// Notification settings of a monitor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum NotificationPolicy {
    /// Use the account defaults and its default-enabled channels
    UseGlobal,
    Custom(Thresholds),
}

/// Value inspected by an assertion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Subject {
    Code,
    TotalTime,
    CertExpiryDays,
    Header { name: String },
    Body,
    /// JSONPath expression evaluated against the parsed body
    JsonBody { name: String },
}

impl Subject {
    pub fn kind(&self) -> &'static str {
        match self {
            Subject::Code => "code",
            Subject::TotalTime => "totalTime",
            Subject::CertExpiryDays => "certExpiryDays",
            Subject::Header { .. } => "header",
            Subject::Body => "body",
            Subject::JsonBody { .. } => "jsonBody",
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Subject::Header { name } | Subject::JsonBody { name } => Some(name),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "contains")]
    Contains,
    #[serde(rename = "matches")]
    Matches,
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            Operator::Eq => "=",
            Operator::Ne => "!=",
            Operator::Gt => ">",
            Operator::Lt => "<",
            Operator::Contains => "contains",
            Operator::Matches => "matches",
        };
        f.write_str(op)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assertion {
    #[serde(flatten)]
    pub subject: Subject,
    pub op: Operator,
    #[serde(deserialize_with = "string_or_number")]
    pub value: String,
}

/// Outcome of one assertion. `fail` is absent when the assertion passed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionResult {
    #[serde(flatten)]
    pub assertion: Assertion,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail: Option<String>,
}

impl AssertionResult {
    pub fn passed(&self) -> bool {
        self.fail.is_none()
    }
}

/// A user-defined HTTP check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Monitor {
    pub id: String,
    pub account_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: MonitorStatus,
    #[serde(default = "default_method")]
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: Tuples,
    #[serde(default)]
    pub query_params: Tuples,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub body_type: Option<String>,
    #[serde(default)]
    pub auth: Auth,
    /// Seconds between runs
    #[serde(default)]
    pub frequency: u32,
    /// Per-attempt timeout in seconds, overriding the engine default
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default = "default_true")]
    pub follow_redirects: bool,
    #[serde(default)]
    pub locations: Vec<String>,
    #[serde(default)]
    pub assertions: Vec<Assertion>,
    #[serde(default)]
    pub notifications: Option<NotificationPolicy>,
    #[serde(default)]
    pub pre_script: Option<String>,
    /// Named environments, lowest priority first
    #[serde(default)]
    pub env_ids: Vec<String>,
    /// Monitor-local overrides applied over every environment
    #[serde(default)]
    pub variables: Tuples,
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_true() -> bool {
    true
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Int(i64),
        Float(f64),
        Bool(bool),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Int(n) => n.to_string(),
        Raw::Float(n) => n.to_string(),
        Raw::Bool(b) => b.to_string(),
    })
}

/// Phase timings of one attempt, in milliseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Timings {
    pub wait: u64,
    pub dns: u64,
    pub tcp: u64,
    pub tls: u64,
    pub upload: u64,
    pub ttfb: u64,
    pub download: u64,
    #[serde(rename = "totalTime")]
    pub total: u64,
}

/// Outcome of a single execution attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorResult {
    pub id: String,
    pub monitor_id: String,
    pub account_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub location: String,
    pub url: String,
    #[serde(default)]
    pub ip: String,
    pub code: u16,
    #[serde(default)]
    pub code_status: String,
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub headers: Tuples,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub body_size: usize,
    #[serde(flatten)]
    pub timings: Timings,
    #[serde(default)]
    pub cert_common_name: Option<String>,
    #[serde(default)]
    pub cert_expiry_days: Option<i64>,
    #[serde(default)]
    pub assert_results: Vec<AssertionResult>,
    /// Empty on success, otherwise the failure classification
    #[serde(default)]
    pub err: String,
}

impl MonitorResult {
    /// Zero-valued result for `monitor`, used when no response was received.
    pub fn shell(monitor: &Monitor, location: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            monitor_id: monitor.id.clone(),
            account_id: monitor.account_id.clone(),
            created_at: Utc::now(),
            location: location.to_string(),
            url: monitor.url.clone(),
            ip: String::new(),
            code: 0,
            code_status: String::new(),
            protocol: String::new(),
            headers: Vec::new(),
            body: String::new(),
            body_size: 0,
            timings: Timings::default(),
            cert_common_name: None,
            cert_expiry_days: None,
            assert_results: Vec::new(),
            err: String::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.err.is_empty()
    }

    /// Value of the first header named `name`, ignoring ASCII case
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}
