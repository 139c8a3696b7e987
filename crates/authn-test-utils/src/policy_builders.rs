//! Builders for configuration snapshot JSON.
//!
//! Produces the declarative documents the controller consumes, so tests can
//! stay close to what operators write.

use serde_json::{json, Map, Value};

/// Builder for one `jwtProviders` entry.
#[derive(Debug, Clone)]
pub struct JwtProviderBuilder {
    spec: Map<String, Value>,
}

impl JwtProviderBuilder {
    /// A sub-provider fetching keys from `jwks_uri`.
    pub fn new(name: &str, jwks_uri: &str) -> Self {
        let mut spec = Map::new();
        spec.insert("name".to_string(), json!(name));
        spec.insert("remoteJWKS".to_string(), json!({ "uri": jwks_uri }));
        Self { spec }
    }

    pub fn issuer(mut self, issuer: &str) -> Self {
        self.spec.insert("issuer".to_string(), json!(issuer));
        self
    }

    pub fn audiences(mut self, audiences: &[&str]) -> Self {
        self.spec.insert("audiences".to_string(), json!(audiences));
        self
    }

    /// Set a `remoteJWKS` field such as `timeout` or `refreshInterval`.
    pub fn remote_jwks(mut self, field: &str, value: Value) -> Self {
        if let Some(Value::Object(remote)) = self.spec.get_mut("remoteJWKS") {
            remote.insert(field.to_string(), value);
        }
        self
    }

    pub fn claim_to_header(mut self, header: &str, claim: &str) -> Self {
        let entry = self
            .spec
            .entry("claimToHeaders")
            .or_insert_with(|| json!([]));
        if let Value::Array(items) = entry {
            items.push(json!({ "header": header, "claim": claim }));
        }
        self
    }

    /// Replace the credential sources.
    pub fn extract_from(mut self, extract_from: Value) -> Self {
        self.spec.insert("extractFrom".to_string(), extract_from);
        self
    }

    pub fn build(self) -> Value {
        Value::Object(self.spec)
    }
}

/// Builder for a whole configuration snapshot.
///
/// # Example
/// ```rust,ignore
/// let snapshot = PolicyBuilder::new()
///     .jwt_provider("example", vec![JwtProviderBuilder::new("main", &uri)])
///     .route("/api", &["example"], true)
///     .build();
/// ```
#[derive(Debug, Clone, Default)]
pub struct PolicyBuilder {
    providers: Vec<Value>,
    routes: Vec<Value>,
}

impl PolicyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a `JWT` provider with the given sub-providers.
    pub fn jwt_provider(mut self, name: &str, jwt_providers: Vec<JwtProviderBuilder>) -> Self {
        let items: Vec<Value> = jwt_providers.into_iter().map(JwtProviderBuilder::build).collect();
        self.providers.push(json!({
            "name": name,
            "type": "JWT",
            "jwtProviders": items,
        }));
        self
    }

    /// Add a provider document verbatim.
    pub fn raw_provider(mut self, provider: Value) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn route(mut self, route: &str, providers: &[&str], require_credential: bool) -> Self {
        self.routes.push(json!({
            "route": route,
            "providers": providers,
            "requireCredential": require_credential,
        }));
        self
    }

    pub fn build(self) -> Value {
        json!({ "providers": self.providers, "routes": self.routes })
    }

    pub fn to_bytes(self) -> Vec<u8> {
        serde_json::to_vec(&self.build()).expect("snapshot serialization failed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_builder_shape() {
        let snapshot = PolicyBuilder::new()
            .jwt_provider(
                "example",
                vec![JwtProviderBuilder::new("main", "https://foo.com/jwks.json")
                    .issuer("https://www.example.com")
                    .remote_jwks("timeout", json!("2s"))
                    .claim_to_header("x-sub", "sub")],
            )
            .route("/api", &["example"], true)
            .build();

        let provider = &snapshot["providers"][0];
        assert_eq!(provider["type"], "JWT");
        assert_eq!(provider["jwtProviders"][0]["remoteJWKS"]["timeout"], "2s");
        assert_eq!(provider["jwtProviders"][0]["claimToHeaders"][0]["header"], "x-sub");
        assert_eq!(snapshot["routes"][0]["requireCredential"], true);
    }
}
