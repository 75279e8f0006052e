use std::collections::BTreeMap;
use std::{env, fmt, fs, path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read config: {0}")]
    ReadFailed(std::io::Error),
    #[error("failed to write config: {0}")]
    WriteFailed(std::io::Error),
    #[error("failed to parse config: {0}")]
    ParseFailed(String),
    #[error("no config path available, set XDG_CONFIG_HOME or HOME")]
    ConfigPathUnavailable,
}

/// Pipeline stages a process takes part in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Scheduler,
    Worker,
    Escalation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusTransport {
    /// Same-process broadcast channels
    Local,
    /// Signed HTTP push to subscriber endpoints
    Push,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OndemandTransport {
    InProcess,
    Bus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub service: Service,
    pub execution: Execution,
    pub bus: Bus,
    pub ondemand: Ondemand,
    #[serde(default)]
    pub notifications: Notifications,
    #[serde(default)]
    pub sandbox: Sandbox,
    #[serde(default)]
    pub storage: Storage,
    pub server: Server,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    /// Prefix of every topic name
    pub scope: String,
    /// Regions whose dispatch topics this process consumes
    pub regions: Vec<String>,
    pub roles: Vec<Role>,
    pub tick_seconds: u64,
    /// Region used for on-demand runs and monitors without locations
    pub default_region: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub timeout_seconds: u64,
    pub max_redirects: usize,
    pub max_body_bytes: usize,
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bus {
    pub transport: BusTransport,
    pub channel_capacity: usize,
    #[serde(default)]
    pub push: Push,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Push {
    pub audience: String,
    pub issuer: String,
    pub secret: String,
    /// Subscriber push URLs keyed by topic name
    #[serde(default)]
    pub endpoints: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ondemand {
    pub timeout_seconds: u64,
    pub transport: OndemandTransport,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Notifications {
    #[serde(default)]
    pub sendgrid_api_key: Option<String>,
    #[serde(default)]
    pub sender_email: Option<String>,
    #[serde(default)]
    pub sendgrid_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Sandbox {
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Storage {
    #[serde(default)]
    pub seed_file: Option<path::PathBuf>,
    /// Results kept per monitor by the in-memory store
    #[serde(default = "default_max_results")]
    pub max_results_per_monitor: usize,
    /// Escalation log entries kept per monitor
    #[serde(default = "default_max_activity")]
    pub max_activity_per_monitor: usize,
    /// Age after which the retention sweep drops results
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,
}

fn default_max_results() -> usize {
    1000
}

fn default_max_activity() -> usize {
    100
}

fn default_retention_hours() -> u64 {
    24
}

impl Default for Storage {
    fn default() -> Self {
        Self {
            seed_file: None,
            max_results_per_monitor: default_max_results(),
            max_activity_per_monitor: default_max_activity(),
            retention_hours: default_retention_hours(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub bind: String,
    pub port: u16,
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/apimon/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, Error> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(Error::ConfigPathUnavailable);
    };

    Ok(path.join("apimon/config.toml"))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service: Service {
                scope: "apimon".into(),
                regions: vec!["local".into()],
                roles: vec![Role::Scheduler, Role::Worker, Role::Escalation],
                tick_seconds: 10,
                default_region: "local".into(),
            },
            execution: Execution {
                timeout_seconds: 15,
                max_redirects: 10,
                max_body_bytes: 5 * 1024 * 1024,
                user_agent: probe::transport::DEFAULT_USER_AGENT.into(),
            },
            bus: Bus { transport: BusTransport::Local, channel_capacity: 1024, push: Push::default() },
            ondemand: Ondemand { timeout_seconds: 10, transport: OndemandTransport::InProcess },
            notifications: Notifications::default(),
            sandbox: Sandbox::default(),
            storage: Storage::default(),
            server: Server { bind: "0.0.0.0".into(), port: 8080 },
        }
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);
        let set = |value: bool| if value { "set" } else { "unset" };

        writeln!(f, "Current Internal Configuration State:")?;
        write_title_1(f, "Service")?;
        write_1(f, "Scope", &self.service.scope)?;
        write_1(f, "Regions", &self.service.regions.join(", "))?;
        write_1(f, "Roles", &format!("{:?}", self.service.roles))?;
        write_1(f, "Tick Seconds", &self.service.tick_seconds)?;
        write_1(f, "Default Region", &self.service.default_region)?;

        write_title_1(f, "Execution")?;
        write_1(f, "Timeout Seconds", &self.execution.timeout_seconds)?;
        write_1(f, "Max Redirects", &self.execution.max_redirects)?;
        write_1(f, "Max Body Bytes", &self.execution.max_body_bytes)?;
        write_1(f, "User Agent", &self.execution.user_agent)?;

        write_title_1(f, "Bus")?;
        write_1(f, "Transport", &format!("{:?}", self.bus.transport))?;
        write_1(f, "Channel Capacity", &self.bus.channel_capacity)?;
        write_1(f, "Push Endpoints", &self.bus.push.endpoints.len())?;
        write_1(f, "Push Secret", &set(!self.bus.push.secret.is_empty()))?;

        write_title_1(f, "On-demand")?;
        write_1(f, "Timeout Seconds", &self.ondemand.timeout_seconds)?;
        write_1(f, "Transport", &format!("{:?}", self.ondemand.transport))?;

        write_title_1(f, "Notifications")?;
        write_1(f, "SendGrid Key", &set(self.notifications.sendgrid_api_key.is_some()))?;

        write_title_1(f, "Storage")?;
        write_1(f, "Max Results Per Monitor", &self.storage.max_results_per_monitor)?;
        write_1(f, "Retention Hours", &self.storage.retention_hours)?;

        write_title_1(f, "Server")?;
        write_1(f, "Bind Address", &self.server.bind)?;
        write_1(f, "Port", &self.server.port)?;

        Ok(())
    }
}

impl Config {
    pub fn retention_policy(&self) -> crate::storage::RetentionPolicy {
        crate::storage::RetentionPolicy {
            max_results_per_monitor: self.storage.max_results_per_monitor.max(1),
            max_activity_per_monitor: self.storage.max_activity_per_monitor.max(1),
            // capped at a century, longer is indistinguishable from forever
            max_age: chrono::Duration::hours(i64::try_from(self.storage.retention_hours.min(876_000)).unwrap_or(876_000)),
        }
    }

    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/apimon/config.toml
    ///  or the specified path, with the name config.toml if one does not exist
    ///
    /// ```rust,no_run
    /// let cfg = apimon_service::config::Config::from_config(None::<&std::path::Path>)?;
    /// println!("{}", cfg);
    /// # Ok::<(), apimon_service::config::Error>(())
    /// ```
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, Error> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path).map_err(Error::ReadFailed)?;
            toml::from_str(raw_string.as_str()).map_err(|err| Error::ParseFailed(err.to_string()))
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            Ok(config)
        }
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &std::path::Path) -> Result<(), Error> {
        let config_str: String =
            toml::to_string_pretty(self).map_err(|err| Error::ParseFailed(err.to_string()))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(Error::WriteFailed)?;
        }

        std::fs::write(path, config_str).map_err(Error::WriteFailed)
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.service.roles.contains(&role)
    }

    pub fn http_options(&self) -> probe::HttpOptions {
        probe::HttpOptions {
            timeout: std::time::Duration::from_secs(self.execution.timeout_seconds),
            max_redirects: self.execution.max_redirects,
            max_body_bytes: self.execution.max_body_bytes,
            user_agent: self.execution.user_agent.clone(),
        }
    }
}
