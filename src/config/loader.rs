//! Loading and validating the operator configuration.

use std::future::Future;
use std::pin::Pin;

use tracing::{info, warn};
use url::Url;

use super::prompt::{Prompter, prompt_operator_config};
use super::store::CredentialStore;
use super::{ConfigError, OperatorConfig};
use crate::auth::AuthToken;

/// Number of times the operator is re-prompted before giving up.
pub const MAX_PROMPT_ATTEMPTS: u32 = 3;

/// A validated configuration with the token obtained while validating it.
#[derive(Clone, Debug)]
pub struct Session {
    /// Configuration that passed validation.
    pub config: OperatorConfig,
    /// Token scoped to the configured tenant.
    pub token: AuthToken,
    /// Base URL of the region's control-plane services.
    pub endpoint: Url,
}

/// Boxed future returned by [`CredentialValidator::validate`].
pub type ValidationFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Session, ConfigError>> + Send + 'a>>;

/// Checks credentials against the identity service.
pub trait CredentialValidator: Send + Sync {
    /// Authenticates with `config` and resolves its region endpoint.
    ///
    /// Implementations return [`ConfigError::InvalidCreds`] when the identity
    /// service rejects the credentials and [`ConfigError::InvalidRegion`]
    /// when the region has no internal endpoint.
    fn validate<'a>(&'a self, config: &'a OperatorConfig) -> ValidationFuture<'a>;
}

/// Loads the stored configuration and validates it, optionally re-prompting.
pub struct ConfigLoader<'a> {
    store: &'a dyn CredentialStore,
    validator: &'a dyn CredentialValidator,
}

impl<'a> ConfigLoader<'a> {
    /// Builds a loader over a store and a validator.
    #[must_use]
    pub const fn new(store: &'a dyn CredentialStore, validator: &'a dyn CredentialValidator) -> Self {
        Self { store, validator }
    }

    /// Loads the stored configuration into `caller` and validates it.
    ///
    /// Non-empty stored fields overwrite the caller's; the caller's MFA token
    /// is kept.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NoConfig`] when nothing is stored,
    /// [`ConfigError::MissingFields`] when required fields are empty, and
    /// the validator's error when the credentials are rejected.
    pub async fn load(&self, caller: &OperatorConfig) -> Result<Session, ConfigError> {
        let Some(stored) = self.store.load()? else {
            return Err(ConfigError::NoConfig {
                path: self.store.location().to_path_buf(),
            });
        };

        let mut config = caller.clone();
        config.absorb(&stored);
        config.require_complete()?;
        config.account_base()?;
        self.validator.validate(&config).await
    }

    /// Like [`ConfigLoader::load`], but re-prompts the operator when the
    /// configuration is absent or rejected.
    ///
    /// The operator is prompted at most [`MAX_PROMPT_ATTEMPTS`] times. A
    /// configuration that validates is written back to the store.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MaxAttemptsExceeded`] when every prompt yields
    /// an invalid configuration, and any error that prompting cannot fix
    /// unchanged.
    pub async fn load_interactive(
        &self,
        caller: &OperatorConfig,
        prompter: &dyn Prompter,
    ) -> Result<Session, ConfigError> {
        let mut seed = match self.load(caller).await {
            Ok(session) => return Ok(session),
            Err(err) if err.is_promptable() => {
                warn!(error = %err, "stored configuration is not usable");
                self.store.load().ok().flatten().unwrap_or_else(|| caller.clone())
            }
            Err(err) => return Err(err),
        };

        for attempt in 1..=MAX_PROMPT_ATTEMPTS {
            let candidate = prompt_operator_config(prompter, &seed)?;
            match self.try_candidate(&candidate).await {
                Ok(session) => {
                    let path = self.store.save(&candidate)?;
                    info!(%path, attempt, "configuration saved");
                    return Ok(session);
                }
                Err(err) if err.is_promptable() => {
                    warn!(error = %err, attempt, "configuration rejected");
                    seed = candidate;
                }
                Err(err) => return Err(err),
            }
        }

        Err(ConfigError::MaxAttemptsExceeded {
            attempts: MAX_PROMPT_ATTEMPTS,
        })
    }

    /// Validates a freshly captured configuration and stores it on success.
    ///
    /// # Errors
    ///
    /// Returns the validation error, or a store error when saving fails.
    pub async fn validate_and_save(&self, config: &OperatorConfig) -> Result<Session, ConfigError> {
        let session = self.try_candidate(config).await?;
        self.store.save(config)?;
        Ok(session)
    }

    async fn try_candidate(&self, config: &OperatorConfig) -> Result<Session, ConfigError> {
        config.require_complete()?;
        config.account_base()?;
        self.validator.validate(config).await
    }
}
