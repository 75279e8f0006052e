//! # probe
//!
//! Execution core of apimon: the monitor and result model, `{{name}}`
//! templating, the instrumented HTTP transport, the pre-request script
//! stage, and assertion evaluation.
//!
//! ```rust,no_run
//! use probe::{Engine, HttpOptions, Monitor, template::Env};
//!
//! # async fn run(monitor: Monitor) -> anyhow::Result<()> {
//! let engine = Engine::new(HttpOptions::default())?;
//! let result = engine.run(&monitor, Env::new(), "local").await;
//! println!("{} {}", result.code, result.err);
//! # Ok(())
//! # }
//! ```

pub mod assertions;
pub mod engine;
pub mod model;
pub mod script;
pub mod template;
pub mod transport;

pub use engine::Engine;
pub use model::{
    Assertion, AssertionResult, Auth, Monitor, MonitorResult, MonitorStatus, NotificationPolicy,
    Operator, Subject, Thresholds, Timings, Tuples, ERR_ASSERTIONS, ERR_HTTP_ERROR_CODE,
};
pub use script::{HttpSandbox, ScriptError, ScriptRunner};
pub use transport::{HttpOptions, TransportError};
