pub mod config;
pub mod detector;
pub mod engine;
pub mod error;
pub mod identity;
pub mod poller;
pub mod rotator;
pub mod supervisor;

pub use config::{ConfigLoader, RunConfig};
pub use detector::{Classification, RunState, StallQuotaDetector, Thresholds};
pub use error::{Error, Result};
pub use identity::{Identity, IdentityPool, Route};
pub use poller::{PollFailure, PollOutcome, ProgressSnapshot, RcClient, StatsSource};
pub use rotator::RotationAction;
pub use supervisor::{RunOutcome, RunSummary, Supervisor};
