//! Unit tests for configuration capture, merging and validation.

use camino::Utf8PathBuf;
use rstest::{fixture, rstest};

use super::{
    ConfigError, ConfigLoader, MAX_PROMPT_ATTEMPTS, NodeConfig, OperatorConfig, RuntimeSettings,
    SettingsError, complete_node_config, prompt_operator_config,
};
use crate::ssh::SshAuth;
use crate::test_support::{Answer, MemoryStore, ScriptedPrompter, StaticValidator, operator_config};

#[fixture]
fn validator() -> StaticValidator {
    StaticValidator::accepting("hunter2", "RegionOne")
}

fn remote_node() -> NodeConfig {
    NodeConfig {
        user: String::from("ubuntu"),
        ips: vec![String::from("10.0.0.5")],
        ..NodeConfig::default()
    }
}

#[test]
fn missing_fields_are_named_in_order() {
    let config = OperatorConfig {
        username: String::from("ops@acme.io"),
        region: String::from("  "),
        ..OperatorConfig::default()
    };
    let err = config.require_complete().err();
    assert!(
        matches!(&err, Some(ConfigError::MissingFields { fields }) if fields == &["fqdn", "password", "region"]),
        "got {err:?}"
    );
}

#[rstest]
#[case("acme.platform9.net", "https://acme.platform9.net/")]
#[case("https://acme.platform9.net/", "https://acme.platform9.net/")]
#[case("http://10.0.0.1:8443", "http://10.0.0.1:8443/")]
fn account_url_gains_a_scheme(#[case] raw: &str, #[case] expected: &str) {
    let config = OperatorConfig {
        account_url: raw.to_owned(),
        ..operator_config()
    };
    let base = config
        .account_base()
        .unwrap_or_else(|err| panic!("{raw} should parse: {err}"));
    assert_eq!(base.as_str(), expected);
}

#[rstest]
#[case("")]
#[case("https://exa mple.com")]
fn unusable_account_urls_are_rejected(#[case] raw: &str) {
    let config = OperatorConfig {
        account_url: raw.to_owned(),
        ..operator_config()
    };
    assert!(matches!(
        config.account_base(),
        Err(ConfigError::InvalidAccountUrl { .. })
    ));
}

#[rstest]
#[case("", None)]
#[case("None", None)]
#[case("none", None)]
#[case(" https://proxy.acme.io:3128 ", Some("https://proxy.acme.io:3128"))]
fn proxy_treats_none_as_absent(#[case] raw: &str, #[case] expected: Option<&str>) {
    let config = OperatorConfig {
        proxy_url: raw.to_owned(),
        ..operator_config()
    };
    assert_eq!(config.proxy(), expected);
}

#[test]
fn absorb_keeps_the_callers_mfa_token() {
    let mut caller = OperatorConfig {
        mfa_token: String::from("123456"),
        ..OperatorConfig::default()
    };
    let stored = OperatorConfig {
        mfa_token: String::from("stale"),
        proxy_url: String::from("https://proxy.acme.io:3128"),
        ..operator_config()
    };

    caller.absorb(&stored);

    assert_eq!(caller.mfa_token, "123456");
    assert_eq!(caller.account_url, "https://acme.platform9.net");
    assert_eq!(caller.proxy_url, "https://proxy.acme.io:3128");
}

#[test]
fn debug_output_masks_the_password() {
    let rendered = format!("{:?}", operator_config());
    assert!(!rendered.contains("hunter2"), "{rendered}");
    assert!(rendered.contains("*****"), "{rendered}");
}

#[test]
fn local_targets_need_no_credentials() {
    let node = NodeConfig {
        ips: vec![String::from("127.0.0.1"), String::from("localhost")],
        ..NodeConfig::default()
    };
    assert!(node.validate().is_ok());
    assert_eq!(NodeConfig::default().hosts(), ["127.0.0.1"]);
}

#[rstest]
#[case(None, None, false)]
#[case(Some("secret"), Some("/home/ops/.ssh/id_ed25519"), false)]
#[case(Some("secret"), None, true)]
#[case(None, Some("/home/ops/.ssh/id_ed25519"), true)]
fn remote_targets_need_exactly_one_secret(
    #[case] password: Option<&str>,
    #[case] key: Option<&str>,
    #[case] valid: bool,
) {
    let node = NodeConfig {
        password: password.map(str::to_owned),
        ssh_key: key.map(Utf8PathBuf::from),
        ..remote_node()
    };
    assert_eq!(node.validate().is_ok(), valid);
}

#[test]
fn remote_target_without_user_is_rejected() {
    let node = NodeConfig {
        user: String::new(),
        password: Some(String::from("secret")),
        ..remote_node()
    };
    assert!(matches!(
        node.validate(),
        Err(ConfigError::InvalidNodeConfig { .. })
    ));
}

#[test]
fn node_prompt_offers_password_or_key() {
    let prompter = ScriptedPrompter::new([Answer::Select(1), Answer::Text(String::from("/home/ops/.ssh/id_rsa"))]);

    let node = complete_node_config(remote_node(), Some(&prompter))
        .unwrap_or_else(|err| panic!("node config should complete: {err}"));

    assert!(matches!(node.ssh_auth(), Ok(SshAuth::PrivateKey(path)) if path.as_str() == "/home/ops/.ssh/id_rsa"));
    assert_eq!(prompter.remaining(), 0);
}

#[test]
fn node_prompt_asks_for_missing_user_first() {
    let anonymous = NodeConfig {
        user: String::new(),
        ..remote_node()
    };
    let prompter = ScriptedPrompter::new([
        Answer::Text(String::from("centos")),
        Answer::Select(0),
        Answer::Text(String::from("secret")),
    ]);

    let node = complete_node_config(anonymous, Some(&prompter))
        .unwrap_or_else(|err| panic!("node config should complete: {err}"));

    assert_eq!(node.user, "centos");
    assert_eq!(node.password.as_deref(), Some("secret"));
    assert_eq!(prompter.prompts().len(), 3);
}

#[test]
fn node_config_without_prompter_is_only_validated() {
    let err = complete_node_config(remote_node(), None).err();
    assert!(matches!(err, Some(ConfigError::InvalidNodeConfig { .. })), "got {err:?}");
}

#[test]
fn operator_prompt_uses_defaults_for_empty_answers() {
    let prompter = ScriptedPrompter::new([
        Answer::Text(String::from(" acme.platform9.net ")),
        Answer::Text(String::from("ops@acme.io")),
        Answer::Text(String::from("hunter2")),
        Answer::Text(String::new()),
        Answer::Text(String::new()),
        Answer::Text(String::new()),
        Answer::Text(String::from("None")),
    ]);

    let config = prompt_operator_config(&prompter, &OperatorConfig::default())
        .unwrap_or_else(|err| panic!("prompt should succeed: {err}"));

    assert_eq!(config.account_url, "acme.platform9.net");
    assert_eq!(config.region, "RegionOne");
    assert_eq!(config.tenant, "service");
    assert!(config.proxy_url.is_empty());
    assert!(config.mfa_token.is_empty());
}

#[rstest]
#[tokio::test]
async fn load_without_stored_config_reports_its_location(validator: StaticValidator) {
    let store = MemoryStore::empty();
    let loader = ConfigLoader::new(&store, &validator);

    let err = loader.load(&OperatorConfig::default()).await.err();

    assert!(
        matches!(&err, Some(ConfigError::NoConfig { path }) if path.as_str() == "/home/operator/pf9/db/config.json"),
        "got {err:?}"
    );
    assert_eq!(validator.calls(), 0);
}

#[rstest]
#[tokio::test]
async fn load_merges_caller_mfa_with_stored_config(validator: StaticValidator) {
    let store = MemoryStore::holding(operator_config());
    let loader = ConfigLoader::new(&store, &validator);
    let caller = OperatorConfig {
        mfa_token: String::from("654321"),
        ..OperatorConfig::default()
    };

    let session = loader
        .load(&caller)
        .await
        .unwrap_or_else(|err| panic!("stored config should load: {err}"));

    assert_eq!(session.config.mfa_token, "654321");
    assert_eq!(session.endpoint.as_str(), "https://acme.platform9.net/");
    assert_eq!(store.saves(), 0);
}

#[rstest]
#[tokio::test]
async fn interactive_load_saves_the_first_valid_answer(validator: StaticValidator) {
    let store = MemoryStore::empty();
    let loader = ConfigLoader::new(&store, &validator);
    let mut answers = ScriptedPrompter::operator_answers("acme.platform9.net", "ops@acme.io", "wrong", "RegionOne");
    answers.extend(ScriptedPrompter::operator_answers(
        "acme.platform9.net",
        "ops@acme.io",
        "hunter2",
        "RegionOne",
    ));
    let prompter = ScriptedPrompter::new(answers);

    let session = loader
        .load_interactive(&OperatorConfig::default(), &prompter)
        .await
        .unwrap_or_else(|err| panic!("second attempt should validate: {err}"));

    assert_eq!(session.config.password, "hunter2");
    assert_eq!(store.saves(), 1);
    assert_eq!(validator.calls(), 2);
    let saved = store.current().unwrap_or_else(|| panic!("config should be saved"));
    assert!(saved.mfa_token.is_empty());
}

#[rstest]
#[tokio::test]
async fn interactive_load_gives_up_after_three_rejections(validator: StaticValidator) {
    let store = MemoryStore::empty();
    let loader = ConfigLoader::new(&store, &validator);
    let mut answers = Vec::new();
    answers.extend(ScriptedPrompter::operator_answers("acme.platform9.net", "ops@acme.io", "wrong", "RegionOne"));
    answers.extend(ScriptedPrompter::operator_answers("acme.platform9.net", "ops@acme.io", "hunter2", "RegionTwo"));
    answers.extend(ScriptedPrompter::operator_answers("https://exa mple.com", "ops@acme.io", "hunter2", "RegionOne"));
    let prompter = ScriptedPrompter::new(answers);

    let err = loader
        .load_interactive(&OperatorConfig::default(), &prompter)
        .await
        .err();

    assert!(
        matches!(err, Some(ConfigError::MaxAttemptsExceeded { attempts }) if attempts == MAX_PROMPT_ATTEMPTS),
        "got {err:?}"
    );
    assert_eq!(store.saves(), 0);
    assert_eq!(prompter.remaining(), 0);
}

#[rstest]
#[tokio::test]
async fn rejected_credentials_are_not_saved(validator: StaticValidator) {
    let store = MemoryStore::empty();
    let loader = ConfigLoader::new(&store, &validator);
    let config = OperatorConfig {
        password: String::from("wrong"),
        ..operator_config()
    };

    let err = loader.validate_and_save(&config).await.err();

    assert!(matches!(err, Some(ConfigError::InvalidCreds { .. })), "got {err:?}");
    assert!(store.current().is_none());
}

#[test]
fn promptable_errors_exclude_store_failures() {
    assert!(ConfigError::InvalidRegion { region: String::from("RegionTwo") }.is_promptable());
    assert!(!ConfigError::MaxAttemptsExceeded { attempts: 3 }.is_promptable());
    assert!(!ConfigError::InvalidNodeConfig { message: String::new() }.is_promptable());
}

#[test]
fn baseline_settings_validate() {
    assert!(RuntimeSettings::baseline().validate().is_ok());
    let settings = RuntimeSettings {
        retry_attempts: 0,
        ..RuntimeSettings::baseline()
    };
    assert!(matches!(
        settings.validate(),
        Err(SettingsError::Invalid { field: "retry_attempts", .. })
    ));
}
