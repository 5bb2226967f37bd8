pub mod auto_login;
pub mod config;
pub mod http_client;
pub mod network_probe;
pub mod notifier;
pub mod observer;
pub mod portal_client;
pub mod process;
pub mod proxy;
pub mod retry;
pub mod types;

pub use auto_login::AutoLogin;
pub use config::{LoginConfig, PortalEndpoints};
pub use types::{Credentials, Failure, FailureKind, LoginAttempt, Outcome};
