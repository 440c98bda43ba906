//! Session acquisition against an elastically scaled inference service.
//!
//! The flow is: resolve a session directly; if the service reports that no
//! server is running, request a launch, drain its progress until a session is
//! bound, and run the inference there. Every session bound along the way is
//! released before [`RecoveryController::run`] returns.

pub mod controller;
pub mod invoker;
pub mod provisioning;
pub mod resolver;
pub mod session;

pub use controller::{Cleanup, Phase, RecoveryController, RecoveryError, Report};
pub use invoker::invoke;
pub use provisioning::{Progress, Provisioner, ProvisioningMonitor};
pub use resolver::SessionResolver;
pub use session::{ReleaseOutcome, SessionHandle};
