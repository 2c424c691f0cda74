//! Rule-based routing of published events to sinks.
//!
//! Every rule is evaluated against every event. An event goes to the union of
//! the sinks of all matching rules, so a catch-all rule and a specific rule
//! both fire for the same event.

pub mod pattern;
mod router;
mod rule;
mod sink;

pub use pattern::{compile_event_pattern, Comparison, Predicate};
pub use router::{RouteOutcome, RoutingStats, RuleRouter};
pub use rule::{Rule, RuleSet};
pub use sink::{
    LogSink, MemorySink, Notification, NotificationSink, Sink, SinkRegistry,
    DEFAULT_OUTBOX_CAPACITY,
};
