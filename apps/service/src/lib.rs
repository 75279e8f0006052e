//! apimon service: scheduling, execution, escalation and on-demand runs
//! around the `probe` engine, connected through a message bus.

pub mod bus;
pub mod config;
pub mod escalation;
pub mod notify;
pub mod ondemand;
pub mod runtime;
pub mod scheduler;
pub mod storage;
pub mod worker;

pub use config::Config;
pub use runtime::Runtime;
