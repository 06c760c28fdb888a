//! Reconciles processor webhooks and status polls with live client
//! connections, delivering each job's result exactly once.

pub mod bridge;
pub mod config;
pub mod dispatcher;
pub mod jobs;
pub mod metrics;
pub mod poller;
pub mod receiver;
pub mod registry;
pub mod store;

pub use bridge::{Bridge, BridgeStats};
pub use config::BridgeConfig;
pub use dispatcher::RequestDispatcher;
pub use jobs::{Job, JobState, JobTable};
pub use poller::{FallbackPoller, PollOutcome};
pub use receiver::{CallbackReceiver, ReceiptOutcome};
pub use registry::{Connection, ConnectionRegistry};
pub use store::{BridgeStore, Resolution};
