pub mod https;
pub mod memory;
pub mod types;

pub use https::{HttpsChannel, HttpsTransport};
pub use memory::{CallCounts, LaunchFailure, SimulatedCloud};
pub use types::{
    Channel, LaunchState, LaunchStatus, LaunchTicket, SessionInfo, SharedChannel, Transport,
};
