pub mod access_policy;
pub mod cancel;
pub mod error;
pub mod lock;
pub mod orchestrator;
pub mod poller;
pub mod prober;
pub mod registrar;
pub mod report;

pub use cancel::{cancel_pair, CancelHandle, CancelToken};
pub use error::ReconcileError;
pub use orchestrator::Orchestrator;
pub use report::{Change, ProvisionReport};
