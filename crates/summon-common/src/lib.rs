pub mod credentials;
pub mod endpoint;
pub mod error;
pub mod identity;
pub mod progress;
pub mod result;

pub use credentials::{Credentials, CredentialsError};
pub use endpoint::Endpoint;
pub use error::{InvocationError, ReleaseError, ServerError, ServerErrorKind};
pub use identity::{IdentityError, ServiceIdentity};
pub use progress::ProgressEvent;
pub use result::{InferenceResult, ResultRecord};

pub mod telemetry;
