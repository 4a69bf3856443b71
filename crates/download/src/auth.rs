// Path: crates/download/src/auth.rs
//! Bearer-token validation and the per-request permission cache.

use arca_types::config::AuthConfig;
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use std::sync::Arc;

/// The set of dataset identifiers the caller may read, attached to every
/// authenticated request. Downstream handlers read it and never mutate it.
#[derive(Clone)]
pub struct PermissionCache {
    /// Permitted dataset identifiers, in token order.
    pub datasets: Arc<Vec<String>>,
}

impl PermissionCache {
    /// Whether the caller may read a dataset.
    pub fn contains(&self, dataset_id: &str) -> bool {
        self.datasets.iter().any(|d| d == dataset_id)
    }
}

#[derive(Debug, Deserialize)]
struct TokenClaims {
    #[allow(dead_code)]
    iss: String,
    #[serde(default)]
    datasets: Vec<String>,
}

/// Validates bearer tokens against the configured issuers.
#[derive(Clone)]
pub struct TokenVerifier {
    key: Arc<DecodingKey>,
    validation: Arc<Validation>,
}

impl TokenVerifier {
    /// Builds the verifier from the configuration section. A missing key
    /// source is a fatal configuration error.
    pub fn new(config: &AuthConfig) -> Result<Self, anyhow::Error> {
        let (key, algorithm) = if let Some(secret) = &config.jwt_secret {
            (DecodingKey::from_secret(secret.as_bytes()), Algorithm::HS256)
        } else if let Some(path) = &config.jwt_pub_key_path {
            let pem = std::fs::read(path)?;
            (DecodingKey::from_rsa_pem(&pem)?, Algorithm::RS256)
        } else {
            anyhow::bail!("auth requires either jwtSecret or jwtPubKeyPath");
        };
        let mut validation = Validation::new(algorithm);
        validation.set_issuer(&config.issuers);
        validation.set_required_spec_claims(&["exp", "iss"]);
        Ok(TokenVerifier {
            key: Arc::new(key),
            validation: Arc::new(validation),
        })
    }

    fn permissions(&self, token: &str) -> Result<PermissionCache, jsonwebtoken::errors::Error> {
        let data = jsonwebtoken::decode::<TokenClaims>(token, &self.key, &self.validation)?;
        Ok(PermissionCache {
            datasets: Arc::new(data.claims.datasets),
        })
    }
}

/// Middleware mapping `Authorization: Bearer` to a [`PermissionCache`] in
/// the request extensions. Requests without a valid token end here.
pub async fn token_middleware(
    State(verifier): State<TokenVerifier>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    let Some(token) = token else {
        return (StatusCode::UNAUTHORIZED, "unauthorised").into_response();
    };
    match verifier.permissions(token) {
        Ok(cache) => {
            request.extensions_mut().insert(cache);
            next.run(request).await
        }
        Err(e) => {
            tracing::debug!(target: "download", error = %e, "token rejected");
            (StatusCode::UNAUTHORIZED, "unauthorised").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde::Serialize;

    #[derive(Serialize)]
    struct Claims<'a> {
        iss: &'a str,
        exp: u64,
        datasets: Vec<&'a str>,
    }

    fn config() -> AuthConfig {
        AuthConfig {
            issuers: vec!["https://login.example.org".to_owned()],
            jwt_secret: Some("test-secret".to_owned()),
            jwt_pub_key_path: None,
        }
    }

    fn sign(claims: &Claims<'_>) -> String {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(b"test-secret"),
        )
        .unwrap()
    }

    #[test]
    fn valid_token_yields_dataset_cache() {
        let verifier = TokenVerifier::new(&config()).unwrap();
        let token = sign(&Claims {
            iss: "https://login.example.org",
            exp: 4102444800,
            datasets: vec!["DS-1", "doi://DS-2"],
        });
        let cache = verifier.permissions(&token).unwrap();
        assert!(cache.contains("DS-1"));
        assert!(cache.contains("doi://DS-2"));
        assert!(!cache.contains("DS-3"));
    }

    #[test]
    fn wrong_issuer_is_rejected() {
        let verifier = TokenVerifier::new(&config()).unwrap();
        let token = sign(&Claims {
            iss: "https://rogue.example.org",
            exp: 4102444800,
            datasets: vec!["DS-1"],
        });
        assert!(verifier.permissions(&token).is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let verifier = TokenVerifier::new(&config()).unwrap();
        let token = sign(&Claims {
            iss: "https://login.example.org",
            exp: 946684800,
            datasets: vec!["DS-1"],
        });
        assert!(verifier.permissions(&token).is_err());
    }
}
