//! Domain identifiers.
//!
//! Every persisted entity carries a ULID wrapped in its own type, so a
//! workflow id can never be handed to an execution lookup. The canonical
//! form everywhere (JSON, database columns, JWT claims, log lines) is the
//! prefixed string, e.g. `exec_01J8...`: `Display` produces it, `FromStr`
//! and serde accept it. A bare ULID also parses, for callers that already
//! stripped the prefix; a *wrong* prefix does not.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Returned when a string is not a valid identifier of the expected type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    /// The prefix the target id type expected.
    pub expected_prefix: &'static str,
    /// The rejected input.
    pub input: String,
}

impl fmt::Display for ParseIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "'{}' is not a valid {}-prefixed id",
            self.input, self.expected_prefix
        )
    }
}

impl std::error::Error for ParseIdError {}

fn parse_prefixed(input: &str, prefix: &'static str) -> Result<Ulid, ParseIdError> {
    let reject = || ParseIdError {
        expected_prefix: prefix,
        input: input.to_string(),
    };

    match input.split_once('_') {
        // Prefixed form: the prefix must be ours
        Some((head, tail)) if head == prefix => Ulid::from_str(tail).map_err(|_| reject()),
        Some(_) => Err(reject()),
        // Bare ULID
        None => Ulid::from_str(input).map_err(|_| reject()),
    }
}

macro_rules! entity_id {
    ($(#[$doc:meta])* $name:ident => $prefix:literal) => {
        $(#[$doc])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(Ulid);

        impl $name {
            /// Prefix used in the canonical string form.
            pub const PREFIX: &'static str = $prefix;

            /// Mints a fresh id.
            #[must_use]
            pub fn new() -> Self {
                Self(Ulid::new())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}_{}", Self::PREFIX, self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({self})", stringify!($name))
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(input: &str) -> Result<Self, Self::Err> {
                parse_prefixed(input, Self::PREFIX).map(Self)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                raw.parse().map_err(D::Error::custom)
            }
        }
    };
}

entity_id!(
    /// A user account.
    UserId => "usr"
);

entity_id!(
    /// A workflow definition.
    WorkflowId => "wf"
);

entity_id!(
    /// One run of a workflow.
    ExecutionId => "exec"
);

entity_id!(
    /// A persisted per-node agent log record.
    AgentLogId => "alog"
);

entity_id!(
    /// A live collaboration connection.
    ConnectionId => "conn"
);

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn canonical_form_carries_the_type_prefix() {
        assert!(UserId::new().to_string().starts_with("usr_"));
        assert!(WorkflowId::new().to_string().starts_with("wf_"));
        assert!(ExecutionId::new().to_string().starts_with("exec_"));
        assert!(AgentLogId::new().to_string().starts_with("alog_"));
        assert!(ConnectionId::new().to_string().starts_with("conn_"));
    }

    #[test]
    fn display_and_parse_agree() {
        let id = ExecutionId::new();
        let parsed: ExecutionId = id.to_string().parse().expect("canonical form parses");
        assert_eq!(parsed, id);
    }

    #[test]
    fn bare_ulid_parses_but_foreign_prefix_does_not() {
        let execution = ExecutionId::new();
        let bare = execution.to_string().replace("exec_", "");
        assert_eq!(bare.parse::<ExecutionId>().expect("bare ulid"), execution);

        // An execution id is not a workflow id, even with a valid ULID inside
        let err = execution
            .to_string()
            .parse::<WorkflowId>()
            .expect_err("prefix mismatch");
        assert_eq!(err.expected_prefix, "wf");
        assert!(err.to_string().contains("wf"));
    }

    #[test]
    fn junk_is_rejected() {
        assert!("".parse::<UserId>().is_err());
        assert!("usr_".parse::<UserId>().is_err());
        assert!("usr_not-a-ulid".parse::<UserId>().is_err());
        assert!("completely wrong".parse::<UserId>().is_err());
    }

    #[test]
    fn ids_key_in_flight_tables() {
        // The engine keys its in-flight map by ExecutionId
        let mut in_flight: HashMap<ExecutionId, &str> = HashMap::new();
        let running = ExecutionId::new();
        in_flight.insert(running, "running");
        in_flight.insert(ExecutionId::new(), "running");

        assert_eq!(in_flight.len(), 2);
        assert_eq!(in_flight.get(&running), Some(&"running"));
    }

    #[test]
    fn json_embeds_the_prefixed_string() {
        let workflow_id = WorkflowId::new();
        let execution_id = ExecutionId::new();
        let frame = serde_json::json!({
            "workflow_id": workflow_id,
            "execution_id": execution_id,
        });

        let raw = frame["execution_id"].as_str().expect("string form");
        assert!(raw.starts_with("exec_"));

        let back: ExecutionId =
            serde_json::from_value(frame["execution_id"].clone()).expect("deserialize");
        assert_eq!(back, execution_id);
    }

    #[test]
    fn debug_names_the_type() {
        let id = ConnectionId::new();
        let debug = format!("{id:?}");
        assert!(debug.starts_with("ConnectionId(conn_"));
    }
}
