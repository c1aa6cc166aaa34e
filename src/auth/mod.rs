//! Identity-service client: token issue and region endpoint discovery.
//!
//! Tokens are requested with the password method (plus TOTP when an MFA
//! passcode is supplied) in the `default` domain. The tenant is tried as a
//! project name first and as a project ID second, since the operator may
//! have configured either.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::config::{ConfigError, CredentialValidator, OperatorConfig, Session, ValidationFuture};
use crate::http::{build_client, truncate_body};

const TOKEN_HEADER: &str = "X-Subject-Token";
const AUTH_HEADER: &str = "X-Auth-Token";
const REGION_SERVICE_TYPE: &str = "regionInfo";
const INTERNAL_INTERFACE: &str = "internal";
const DEFAULT_DOMAIN: &str = "default";
const BODY_LIMIT: usize = 512;

/// Errors raised by [`AuthClient`].
#[derive(Debug, Error)]
pub enum AuthError {
    /// The request never produced a response.
    #[error("{op} request failed: {message}")]
    Transport {
        /// Operation that failed.
        op: &'static str,
        /// Human-readable error message.
        message: String,
    },
    /// The identity service answered with a non-success status.
    #[error("{op} returned {status}: {body}")]
    Status {
        /// Operation that failed.
        op: &'static str,
        /// HTTP status code.
        status: u16,
        /// Truncated response body.
        body: String,
    },
    /// The response could not be decoded.
    #[error("{op} returned an unexpected payload: {message}")]
    Decode {
        /// Operation that failed.
        op: &'static str,
        /// Human-readable error message.
        message: String,
    },
    /// The service catalog has no region-info service.
    #[error("the service catalog has no {REGION_SERVICE_TYPE} service")]
    NoRegionService,
    /// No internal endpoint exists for the region.
    #[error("no internal endpoint for region {region}")]
    RegionNotFound {
        /// Region that was requested.
        region: String,
    },
}

/// A bearer token scoped to one project.
#[derive(Clone, Eq, PartialEq)]
pub struct AuthToken {
    /// Opaque bearer value for `X-Auth-Token`.
    pub token: String,
    /// Identity-service user ID.
    pub user_id: String,
    /// Project the token is scoped to.
    pub project_id: String,
    /// Host of the account the token was issued by.
    pub du_fqdn: String,
    /// User name, normally an e-mail address.
    pub email: String,
    /// Expiry instant.
    pub expires_at: DateTime<Utc>,
}

impl AuthToken {
    /// Returns `true` while `now` is before the expiry instant.
    #[must_use]
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

impl std::fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthToken")
            .field("token", &crate::scrub::MASK)
            .field("user_id", &self.user_id)
            .field("project_id", &self.project_id)
            .field("du_fqdn", &self.du_fqdn)
            .field("email", &self.email)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Credentials for a token request.
#[derive(Clone, Copy, Debug)]
pub struct Credentials<'a> {
    /// User name.
    pub username: &'a str,
    /// Password.
    pub password: &'a str,
    /// Project name or ID.
    pub tenant: &'a str,
    /// Optional TOTP passcode.
    pub mfa: Option<&'a str>,
}

impl<'a> From<&'a OperatorConfig> for Credentials<'a> {
    fn from(config: &'a OperatorConfig) -> Self {
        Self {
            username: config.username.trim(),
            password: &config.password,
            tenant: config.tenant.trim(),
            mfa: config.mfa(),
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum ProjectScope {
    Name,
    Id,
}

#[derive(Debug, Deserialize)]
struct TokenEnvelope {
    token: TokenBody,
}

#[derive(Debug, Deserialize)]
struct TokenBody {
    expires_at: DateTime<Utc>,
    user: NamedRef,
    project: NamedRef,
}

#[derive(Debug, Deserialize)]
struct NamedRef {
    id: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct ServiceList {
    services: Vec<ServiceEntry>,
}

#[derive(Debug, Deserialize)]
struct ServiceEntry {
    id: String,
}

#[derive(Debug, Deserialize)]
struct EndpointList {
    endpoints: Vec<EndpointEntry>,
}

#[derive(Debug, Deserialize)]
struct EndpointEntry {
    #[serde(default)]
    region: String,
    #[serde(default)]
    interface: String,
    url: String,
}

/// Client for the identity service under `/keystone/v3`.
#[derive(Clone, Debug)]
pub struct AuthClient {
    http: Client,
    base: Url,
}

impl AuthClient {
    /// Builds a client for the account at `base`.
    #[must_use]
    pub const fn new(http: Client, base: Url) -> Self {
        Self { http, base }
    }

    fn url(&self, path: &str) -> Result<Url, AuthError> {
        self.base.join(path).map_err(|err| AuthError::Decode {
            op: "BuildUrl",
            message: err.to_string(),
        })
    }

    /// Issues a token, scoping the tenant by name and then by ID.
    ///
    /// # Errors
    ///
    /// Returns the name-scoped failure when both scopes are rejected, or a
    /// transport error as soon as one occurs.
    pub async fn authenticate(&self, creds: Credentials<'_>) -> Result<AuthToken, AuthError> {
        match self.request_token(creds, ProjectScope::Name).await {
            Ok(token) => Ok(token),
            Err(by_name @ AuthError::Status { .. }) => {
                debug!(error = %by_name, "tenant is not a project name; retrying as an id");
                self.request_token(creds, ProjectScope::Id)
                    .await
                    .map_err(|by_id| match by_id {
                        AuthError::Status { .. } => by_name,
                        other => other,
                    })
            }
            Err(err) => Err(err),
        }
    }

    async fn request_token(
        &self,
        creds: Credentials<'_>,
        scope: ProjectScope,
    ) -> Result<AuthToken, AuthError> {
        const OP: &str = "IssueToken";
        let response = self
            .http
            .post(self.url("keystone/v3/auth/tokens")?)
            .json(&token_request(creds, scope))
            .send()
            .await
            .map_err(|err| AuthError::Transport {
                op: OP,
                message: err.to_string(),
            })?;

        let status = response.status();
        let token_header = response
            .headers()
            .get(TOKEN_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let body = response.text().await.map_err(|err| AuthError::Transport {
            op: OP,
            message: err.to_string(),
        })?;
        if !status.is_success() {
            return Err(AuthError::Status {
                op: OP,
                status: status.as_u16(),
                body: truncate_body(&body, BODY_LIMIT),
            });
        }

        let token = token_header.ok_or_else(|| AuthError::Decode {
            op: OP,
            message: format!("missing {TOKEN_HEADER} header"),
        })?;
        let envelope: TokenEnvelope =
            serde_json::from_str(&body).map_err(|err| AuthError::Decode {
                op: OP,
                message: err.to_string(),
            })?;

        info!(user = %envelope.token.user.name, project = %envelope.token.project.name, "token issued");
        Ok(AuthToken {
            token,
            user_id: envelope.token.user.id,
            project_id: envelope.token.project.id,
            du_fqdn: self.base.host_str().unwrap_or_default().to_owned(),
            email: creds.username.to_owned(),
            expires_at: envelope.token.expires_at,
        })
    }

    /// Finds the base URL of the internal endpoint for `region`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::RegionNotFound`] when no internal endpoint
    /// matches the region.
    pub async fn region_endpoint(&self, token: &AuthToken, region: &str) -> Result<Url, AuthError> {
        let mut services_url = self.url("keystone/v3/services")?;
        services_url
            .query_pairs_mut()
            .append_pair("type", REGION_SERVICE_TYPE);
        let services: ServiceList = self.get_json("ListServices", services_url, token).await?;
        let service = services
            .services
            .into_iter()
            .next()
            .ok_or(AuthError::NoRegionService)?;

        let mut endpoints_url = self.url("keystone/v3/endpoints")?;
        endpoints_url
            .query_pairs_mut()
            .append_pair("service_id", &service.id);
        let endpoints: EndpointList = self.get_json("ListEndpoints", endpoints_url, token).await?;

        let endpoint = endpoints
            .endpoints
            .into_iter()
            .find(|entry| entry.region == region && entry.interface == INTERNAL_INTERFACE)
            .ok_or_else(|| AuthError::RegionNotFound {
                region: region.to_owned(),
            })?;

        let parsed = Url::parse(&endpoint.url).map_err(|err| AuthError::Decode {
            op: "ListEndpoints",
            message: format!("endpoint url {}: {err}", endpoint.url),
        })?;
        let origin = Url::parse(&parsed.origin().ascii_serialization()).map_err(|err| {
            AuthError::Decode {
                op: "ListEndpoints",
                message: err.to_string(),
            }
        })?;
        debug!(%region, endpoint = %origin, "resolved region endpoint");
        Ok(origin)
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        op: &'static str,
        url: Url,
        token: &AuthToken,
    ) -> Result<T, AuthError> {
        let response = self
            .http
            .get(url)
            .header(AUTH_HEADER, &token.token)
            .send()
            .await
            .map_err(|err| AuthError::Transport {
                op,
                message: err.to_string(),
            })?;
        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Status {
                op,
                status: status.as_u16(),
                body: truncate_body(&body, BODY_LIMIT),
            });
        }
        response.json().await.map_err(|err| AuthError::Decode {
            op,
            message: err.to_string(),
        })
    }
}

fn token_request(creds: Credentials<'_>, scope: ProjectScope) -> Value {
    let password = json!({
        "user": {
            "name": creds.username,
            "domain": { "id": DEFAULT_DOMAIN },
            "password": creds.password,
        }
    });
    let identity = match creds.mfa {
        Some(passcode) => json!({
            "methods": ["password", "totp"],
            "password": password,
            "totp": {
                "user": {
                    "name": creds.username,
                    "domain": { "id": DEFAULT_DOMAIN },
                    "passcode": passcode,
                }
            },
        }),
        None => json!({ "methods": ["password"], "password": password }),
    };
    let project = match scope {
        ProjectScope::Name => json!({ "name": creds.tenant, "domain": { "id": DEFAULT_DOMAIN } }),
        ProjectScope::Id => json!({ "id": creds.tenant }),
    };
    json!({ "auth": { "identity": identity, "scope": { "project": project } } })
}

/// [`CredentialValidator`] that authenticates against the configured account.
#[derive(Clone, Copy, Debug)]
pub struct IdentityValidator {
    timeout: Duration,
}

impl IdentityValidator {
    /// Builds a validator whose HTTP calls time out after `timeout`.
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn check(&self, config: &OperatorConfig) -> Result<Session, ConfigError> {
        let base = config.account_base()?;
        let http = build_client(config, self.timeout).map_err(|err| ConfigError::InvalidCreds {
            message: err.to_string(),
        })?;
        let client = AuthClient::new(http, base);

        let token = client
            .authenticate(Credentials::from(config))
            .await
            .map_err(|err| ConfigError::InvalidCreds {
                message: err.to_string(),
            })?;
        let endpoint = client
            .region_endpoint(&token, config.region.trim())
            .await
            .map_err(|err| match err {
                AuthError::RegionNotFound { region } => ConfigError::InvalidRegion { region },
                other => ConfigError::InvalidCreds {
                    message: other.to_string(),
                },
            })?;

        Ok(Session {
            config: config.clone(),
            token,
            endpoint,
        })
    }
}

impl CredentialValidator for IdentityValidator {
    fn validate<'a>(&'a self, config: &'a OperatorConfig) -> ValidationFuture<'a> {
        Box::pin(self.check(config))
    }
}

#[cfg(test)]
mod tests {
    use super::{Credentials, ProjectScope, token_request};

    fn creds(mfa: Option<&str>) -> Credentials<'_> {
        Credentials {
            username: "ops@acme.io",
            password: "hunter2",
            tenant: "service",
            mfa,
        }
    }

    #[test]
    fn name_scope_uses_default_domain() {
        let body = token_request(creds(None), ProjectScope::Name);
        assert_eq!(body["auth"]["scope"]["project"]["name"], "service");
        assert_eq!(body["auth"]["scope"]["project"]["domain"]["id"], "default");
        assert_eq!(body["auth"]["identity"]["methods"], serde_json::json!(["password"]));
        assert!(body["auth"]["identity"].get("totp").is_none());
    }

    #[test]
    fn id_scope_omits_domain() {
        let body = token_request(creds(None), ProjectScope::Id);
        assert_eq!(body["auth"]["scope"]["project"]["id"], "service");
        assert!(body["auth"]["scope"]["project"].get("domain").is_none());
    }

    #[test]
    fn mfa_adds_totp_method() {
        let body = token_request(creds(Some("654321")), ProjectScope::Name);
        assert_eq!(
            body["auth"]["identity"]["methods"],
            serde_json::json!(["password", "totp"])
        );
        assert_eq!(body["auth"]["identity"]["totp"]["user"]["passcode"], "654321");
    }
}
