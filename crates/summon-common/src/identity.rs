use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    #[error("service type must not be empty")]
    EmptyServiceType,
    #[error("model spec must not be empty")]
    EmptyModelSpec,
}

/// Which inference capability a session is requested for.
///
/// On the wire the pair travels as `type_name` / `model_spec`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ServiceIdentity {
    #[serde(rename = "type_name")]
    service_type: String,
    model_spec: String,
}

impl ServiceIdentity {
    pub fn new(
        service_type: impl Into<String>,
        model_spec: impl Into<String>,
    ) -> Result<Self, IdentityError> {
        let service_type = service_type.into();
        let model_spec = model_spec.into();
        if service_type.trim().is_empty() {
            return Err(IdentityError::EmptyServiceType);
        }
        if model_spec.trim().is_empty() {
            return Err(IdentityError::EmptyModelSpec);
        }
        Ok(Self {
            service_type,
            model_spec,
        })
    }

    pub fn service_type(&self) -> &str {
        &self.service_type
    }

    pub fn model_spec(&self) -> &str {
        &self.model_spec
    }
}

impl std::fmt::Display for ServiceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.service_type, self.model_spec)
    }
}
