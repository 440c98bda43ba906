use serde_json::{Map, Value};

#[derive(Debug, thiserror::Error)]
pub enum CredentialsError {
    #[error("auth info is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("auth info must be a JSON object")]
    NotAnObject,
}

/// Authentication payload plus the certificate the remote side must chain to.
///
/// Never mutated after construction. `Debug` prints payload keys only.
#[derive(Clone)]
pub struct Credentials {
    auth_info: Map<String, Value>,
    trust_anchor: Vec<u8>,
}

impl Credentials {
    pub fn new(auth_info: Map<String, Value>, trust_anchor: Vec<u8>) -> Self {
        Self {
            auth_info,
            trust_anchor,
        }
    }

    /// Parse the payload from its JSON text form, e.g. `{"user_id":"..","user_key":".."}`.
    pub fn from_json(auth_info: &str, trust_anchor: Vec<u8>) -> Result<Self, CredentialsError> {
        match serde_json::from_str::<Value>(auth_info)? {
            Value::Object(map) => Ok(Self::new(map, trust_anchor)),
            _ => Err(CredentialsError::NotAnObject),
        }
    }

    pub fn auth_info(&self) -> &Map<String, Value> {
        &self.auth_info
    }

    /// Compact JSON form sent alongside every remote call.
    pub fn auth_header(&self) -> String {
        Value::Object(self.auth_info.clone()).to_string()
    }

    pub fn trust_anchor(&self) -> &[u8] {
        &self.trust_anchor
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("auth_info_keys", &self.auth_info.keys().collect::<Vec<_>>())
            .field("trust_anchor_len", &self.trust_anchor.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json_object() {
        let creds =
            Credentials::from_json(r#"{"user_id":"u1","user_key":"secret"}"#, b"ca".to_vec())
                .unwrap();
        assert_eq!(creds.auth_info()["user_id"], "u1");
        assert_eq!(creds.trust_anchor(), b"ca");
        assert_eq!(
            serde_json::from_str::<Value>(&creds.auth_header()).unwrap(),
            serde_json::json!({"user_id": "u1", "user_key": "secret"})
        );
    }

    #[test]
    fn test_rejects_non_object() {
        assert!(matches!(
            Credentials::from_json("[1,2]", Vec::new()),
            Err(CredentialsError::NotAnObject)
        ));
        assert!(matches!(
            Credentials::from_json("{", Vec::new()),
            Err(CredentialsError::Json(_))
        ));
    }

    #[test]
    fn test_debug_redacts_values() {
        let creds = Credentials::from_json(r#"{"user_key":"secret"}"#, Vec::new()).unwrap();
        let printed = format!("{creds:?}");
        assert!(printed.contains("user_key"));
        assert!(!printed.contains("secret"));
    }
}
