//! Command-line rendering shared by both executor variants.
//!
//! Arguments are quoted one at a time with POSIX single quotes, so a script
//! passed as a single `bash -c` argument (for example an `awk '{print $4}'`
//! pipeline) reaches the remote shell byte-for-byte.
//!
//! `PATH` is handed through `sudo` as an assignment so the elevated command
//! resolves programs the way the calling user's shell does.

use shell_escape::unix::escape;

/// `PATH` assignment in the rendered line, expanded by the executing shell.
pub const PATH_ASSIGNMENT: &str = "\"PATH=$PATH\"";

/// Elevation and environment applied to every command.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Invocation {
    /// Proxy URL exported as `https_proxy` for the command.
    pub proxy_url: Option<String>,
    /// Whether `sudo` reads its password from stdin (`sudo -S`).
    pub sudo_reads_stdin: bool,
}

impl Invocation {
    /// Builds an invocation for an optional proxy and sudo password.
    #[must_use]
    pub fn new(proxy_url: Option<&str>, sudo_password: Option<&str>) -> Self {
        Self {
            proxy_url: proxy_url
                .map(str::trim)
                .filter(|url| !url.is_empty())
                .map(str::to_owned),
            sudo_reads_stdin: sudo_password.is_some_and(|pw| !pw.is_empty()),
        }
    }

    /// Arguments placed between `sudo` and the program name.
    #[must_use]
    pub fn sudo_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if self.sudo_reads_stdin {
            args.push(String::from("-S"));
            args.push(String::from("-p"));
            args.push(String::new());
        }
        if let Some(proxy) = &self.proxy_url {
            args.push(format!("https_proxy={proxy}"));
        }
        args
    }
}

/// Quotes `program` and each argument into one shell-invocable string.
#[must_use]
pub fn quote_command(program: &str, args: &[&str]) -> String {
    let mut rendered = String::from(escape(program.into()).as_ref());
    for arg in args {
        rendered.push(' ');
        rendered.push_str(escape((*arg).into()).as_ref());
    }
    rendered
}

/// Renders the full elevated command line, `sudo` prefix included.
///
/// The local variant logs this string and passes its own `PATH` value in the
/// same position; the remote variant sends it as the SSH exec payload, where
/// the login shell expands [`PATH_ASSIGNMENT`].
#[must_use]
pub fn render_command(invocation: &Invocation, program: &str, args: &[&str]) -> String {
    let sudo_args = invocation.sudo_args();
    let prefix_args: Vec<&str> = sudo_args.iter().map(String::as_str).collect();
    let mut rendered = quote_command("sudo", &prefix_args);
    rendered.push(' ');
    rendered.push_str(PATH_ASSIGNMENT);
    rendered.push(' ');
    rendered.push_str(&quote_command(program, args));
    rendered
}
