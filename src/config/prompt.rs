//! Interactive capture of operator and node credentials.

use camino::Utf8PathBuf;
use dialoguer::theme::ColorfulTheme;
use dialoguer::{Confirm, Input, Password, Select};
use thiserror::Error;

use super::{ConfigError, DEFAULT_REGION, DEFAULT_TENANT, NodeConfig, OperatorConfig};

const NONE_ANSWER: &str = "None";

/// Raised when the terminal cannot be prompted.
#[derive(Debug, Error)]
#[error("prompt failed: {message}")]
pub struct PromptError {
    /// Human-readable error message.
    pub message: String,
}

impl From<dialoguer::Error> for PromptError {
    fn from(value: dialoguer::Error) -> Self {
        Self {
            message: value.to_string(),
        }
    }
}

/// Terminal interaction used by configuration capture and confirmations.
pub trait Prompter: Send + Sync {
    /// Reads a line of text, offering `default` when given.
    ///
    /// # Errors
    ///
    /// Returns [`PromptError`] when the terminal cannot be read.
    fn input(&self, prompt: &str, default: Option<&str>) -> Result<String, PromptError>;

    /// Reads a secret without echo.
    ///
    /// # Errors
    ///
    /// Returns [`PromptError`] when the terminal cannot be read.
    fn password(&self, prompt: &str, allow_empty: bool) -> Result<String, PromptError>;

    /// Asks a yes/no question.
    ///
    /// # Errors
    ///
    /// Returns [`PromptError`] when the terminal cannot be read.
    fn confirm(&self, prompt: &str, default: bool) -> Result<bool, PromptError>;

    /// Asks the operator to pick one of `items`, returning its index.
    ///
    /// # Errors
    ///
    /// Returns [`PromptError`] when the terminal cannot be read.
    fn select(&self, prompt: &str, items: &[&str], default: usize) -> Result<usize, PromptError>;
}

/// [`Prompter`] backed by `dialoguer` on the controlling terminal.
#[derive(Clone, Debug, Default)]
pub struct DialoguerPrompter;

impl Prompter for DialoguerPrompter {
    fn input(&self, prompt: &str, default: Option<&str>) -> Result<String, PromptError> {
        let theme = ColorfulTheme::default();
        let mut input = Input::<String>::with_theme(&theme).with_prompt(prompt);
        if let Some(value) = default {
            input = input.default(value.to_owned());
        }
        Ok(input.interact_text()?)
    }

    fn password(&self, prompt: &str, allow_empty: bool) -> Result<String, PromptError> {
        Ok(Password::with_theme(&ColorfulTheme::default())
            .with_prompt(prompt)
            .allow_empty_password(allow_empty)
            .interact()?)
    }

    fn confirm(&self, prompt: &str, default: bool) -> Result<bool, PromptError> {
        Ok(Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(prompt)
            .default(default)
            .interact()?)
    }

    fn select(&self, prompt: &str, items: &[&str], default: usize) -> Result<usize, PromptError> {
        Ok(Select::with_theme(&ColorfulTheme::default())
            .with_prompt(prompt)
            .default(default)
            .items(items)
            .interact()?)
    }
}

fn or_default<'a>(current: &'a str, fallback: &'a str) -> &'a str {
    if current.trim().is_empty() {
        fallback
    } else {
        current
    }
}

fn none_to_empty(answer: String) -> String {
    if answer.trim().eq_ignore_ascii_case(NONE_ANSWER) {
        String::new()
    } else {
        answer.trim().to_owned()
    }
}

/// Prompts for a full operator configuration, seeded from `current`.
///
/// Region defaults to `RegionOne`, tenant to `service`; proxy and MFA accept
/// `None`.
///
/// # Errors
///
/// Returns [`ConfigError::Prompt`] when the terminal cannot be read.
pub fn prompt_operator_config(
    prompter: &dyn Prompter,
    current: &OperatorConfig,
) -> Result<OperatorConfig, ConfigError> {
    let mut config = current.clone();

    let account = prompter.input(
        "Platform9 Account URL",
        Some(current.account_url.as_str()).filter(|url| !url.is_empty()),
    )?;
    config.account_url = account.trim().to_owned();

    let username = prompter.input(
        "Username",
        Some(current.username.as_str()).filter(|name| !name.is_empty()),
    )?;
    config.username = username.trim().to_owned();
    config.password = prompter.password("Password", false)?;

    config.region = prompter
        .input("Region", Some(or_default(&current.region, DEFAULT_REGION)))?
        .trim()
        .to_owned();
    config.tenant = prompter
        .input("Tenant", Some(or_default(&current.tenant, DEFAULT_TENANT)))?
        .trim()
        .to_owned();
    config.proxy_url = none_to_empty(prompter.input(
        "Proxy URL",
        Some(or_default(&current.proxy_url, NONE_ANSWER)),
    )?);
    config.mfa_token = none_to_empty(prompter.input("MFA Token", Some(NONE_ANSWER))?);

    Ok(config)
}

/// Fills missing remote credentials on `node`.
///
/// With a prompter the operator is asked for a user and then, through a
/// 1/2 menu, for either a password or a private-key path. Without one the
/// configuration is only validated.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidNodeConfig`] when credentials remain
/// incomplete and [`ConfigError::Prompt`] when the terminal cannot be read.
pub fn complete_node_config(
    mut node: NodeConfig,
    prompter: Option<&dyn Prompter>,
) -> Result<NodeConfig, ConfigError> {
    let Some(terminal) = prompter else {
        node.validate()?;
        return Ok(node);
    };
    if !node.targets_remote() || node.validate().is_ok() {
        return Ok(node);
    }

    if node.user.trim().is_empty() {
        node.user = terminal.input("SSH user for remote nodes", None)?.trim().to_owned();
    }

    let has_password = node.password.as_deref().is_some_and(|pw| !pw.is_empty());
    let has_key = node.ssh_key.as_ref().is_some_and(|key| !key.as_str().is_empty());
    if !has_password && !has_key {
        let choice = terminal.select(
            "Authenticate to remote nodes with",
            &["1. Password", "2. SSH private key"],
            0,
        )?;
        if choice == 0 {
            node.password = Some(terminal.password("SSH password", false)?);
        } else {
            let path = terminal.input("Path to SSH private key", None)?;
            node.ssh_key = Some(Utf8PathBuf::from(path.trim()));
        }
    }

    node.validate()?;
    Ok(node)
}
