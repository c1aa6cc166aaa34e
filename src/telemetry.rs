//! Pipeline event emission.
//!
//! Orchestrator stages report through an [`EventSink`]. The default sink
//! turns events into `tracing` records; setting
//! `PF9CTL_SEGMENT_EVENTS_DISABLE` swaps in a sink that drops them.

use std::env;
use std::sync::Arc;

use tracing::info;

/// Environment variable that disables event emission.
pub const EVENTS_DISABLE_ENV: &str = "PF9CTL_SEGMENT_EVENTS_DISABLE";

/// Outcome carried by an [`Event`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EventOutcome {
    /// A stage began.
    Started,
    /// A stage finished successfully.
    Succeeded,
    /// A stage failed.
    Failed,
}

impl EventOutcome {
    /// Lower-case outcome name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

/// One pipeline event.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Event {
    /// Event name, for example `Prep-node`.
    pub name: &'static str,
    /// Host the event concerns.
    pub host: String,
    /// What happened.
    pub outcome: EventOutcome,
    /// Free-form detail; already scrubbed of secrets.
    pub detail: String,
}

impl Event {
    /// Builds an event with no detail.
    #[must_use]
    pub fn new(name: &'static str, host: &str, outcome: EventOutcome) -> Self {
        Self {
            name,
            host: host.to_owned(),
            outcome,
            detail: String::new(),
        }
    }

    /// Attaches `detail` to the event.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }
}

/// Receiver of pipeline events.
pub trait EventSink: Send + Sync {
    /// Records one event.
    fn emit(&self, event: &Event);
}

/// Sink that writes events as `tracing` records.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogEventSink;

impl EventSink for LogEventSink {
    fn emit(&self, event: &Event) {
        info!(
            event = event.name,
            host = %event.host,
            outcome = event.outcome.as_str(),
            detail = %event.detail,
            "pipeline event"
        );
    }
}

/// Sink that drops every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: &Event) {}
}

/// Chooses the sink from the environment.
#[must_use]
pub fn sink_from_env() -> Arc<dyn EventSink> {
    if events_disabled(env::var(EVENTS_DISABLE_ENV).ok().as_deref()) {
        Arc::new(NoopEventSink)
    } else {
        Arc::new(LogEventSink)
    }
}

fn events_disabled(value: Option<&str>) -> bool {
    value.is_some_and(|raw| {
        let flag = raw.trim();
        !flag.is_empty() && !flag.eq_ignore_ascii_case("false") && flag != "0"
    })
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::events_disabled;

    #[rstest]
    #[case(None, false)]
    #[case(Some(""), false)]
    #[case(Some("0"), false)]
    #[case(Some("false"), false)]
    #[case(Some("true"), true)]
    #[case(Some("1"), true)]
    fn disable_flag_parsing(#[case] value: Option<&str>, #[case] disabled: bool) {
        assert_eq!(events_disabled(value), disabled);
    }
}
