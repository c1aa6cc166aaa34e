//! HTTP client construction for identity and control-plane calls.
//!
//! Proxy and TLS settings are scoped to the client built here; the process
//! environment is never touched.

use std::time::Duration;

use reqwest::{Client, NoProxy, Proxy};

use crate::config::OperatorConfig;

/// Builds the HTTP client used for every call of one command.
///
/// The client routes HTTPS through `config.proxy_url` (bypassing the hosts in
/// `config.no_proxy`) and skips certificate verification when
/// `config.allow_insecure` is set.
///
/// # Errors
///
/// Returns the `reqwest` error when the proxy URL is invalid or the TLS
/// backend cannot be initialised.
pub fn build_client(config: &OperatorConfig, timeout: Duration) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder()
        .timeout(timeout)
        .user_agent(concat!("pf9ctl/", env!("CARGO_PKG_VERSION")));

    if config.allow_insecure {
        builder = builder.danger_accept_invalid_certs(true);
    }

    if let Some(proxy_url) = config.proxy() {
        let proxy = Proxy::https(proxy_url)?.no_proxy(NoProxy::from_string(&config.no_proxy));
        builder = builder.proxy(proxy);
    }

    builder.build()
}

/// Truncates a response body for inclusion in an error.
#[must_use]
pub fn truncate_body(body: &str, limit: usize) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(limit) {
        Some((cut, _)) => format!("{}…", trimmed.get(..cut).unwrap_or(trimmed)),
        None => trimmed.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rstest::rstest;

    use super::{build_client, truncate_body};
    use crate::config::OperatorConfig;

    #[rstest]
    #[case("short", 10, "short")]
    #[case("  padded  ", 10, "padded")]
    #[case("abcdefghij", 4, "abcd…")]
    #[case("ééééé", 2, "éé…")]
    fn truncate_body_respects_char_boundaries(
        #[case] body: &str,
        #[case] limit: usize,
        #[case] expected: &str,
    ) {
        assert_eq!(truncate_body(body, limit), expected);
    }

    #[test]
    fn build_client_accepts_proxy_and_insecure_settings() {
        let config = OperatorConfig {
            proxy_url: String::from("http://squid.internal:3128"),
            no_proxy: String::from("localhost,10.0.0.0/8"),
            allow_insecure: true,
            ..OperatorConfig::default()
        };
        build_client(&config, Duration::from_secs(5))
            .unwrap_or_else(|err| panic!("client should build: {err}"));
    }

    #[test]
    fn build_client_rejects_malformed_proxy() {
        let config = OperatorConfig {
            proxy_url: String::from("http://[bad"),
            ..OperatorConfig::default()
        };
        assert!(build_client(&config, Duration::from_secs(5)).is_err());
    }
}
