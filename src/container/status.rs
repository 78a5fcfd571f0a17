use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Canonical lifecycle status of a managed container.
///
/// Every backend's status vocabulary is translated into this enum before it
/// reaches the store or a caller (see [`crate::reconcile::map_runtime_status`]).
///
/// # State Transitions
///
/// ```text
/// Creating ──► Created ──► Starting ──► Running ──► Stopping ──► Stopped
///    │                        ▲                                    │
///    └──────────► Running     └────────────────────────────────────┘
///
/// any ──► Removing ──► (row deleted)
/// any ──► Error
/// ```
///
/// A cloud backend may skip `Created` and go from `Creating` straight to
/// `Running` once ingress is enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Creating,
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
    Removing,
    Error,
}

impl Status {
    /// All canonical values, in lifecycle order.
    pub const ALL: [Status; 8] = [
        Status::Creating,
        Status::Created,
        Status::Starting,
        Status::Running,
        Status::Stopping,
        Status::Stopped,
        Status::Removing,
        Status::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Creating => "creating",
            Status::Created => "created",
            Status::Starting => "starting",
            Status::Running => "running",
            Status::Stopping => "stopping",
            Status::Stopped => "stopped",
            Status::Removing => "removing",
            Status::Error => "error",
        }
    }

    /// True while an operation is in flight for the container.
    pub fn is_transitional(&self) -> bool {
        matches!(
            self,
            Status::Creating | Status::Starting | Status::Stopping | Status::Removing
        )
    }

    /// Check if a status transition is allowed.
    ///
    /// `Error` and `Removing` are reachable from everywhere: a failed backend
    /// call must always be recordable, and a container can always be removed.
    /// Everything may be retried from `Error`.
    ///
    /// # Examples
    ///
    /// ```
    /// use cloudport::Status;
    ///
    /// assert!(Status::Stopped.is_valid_transition(Status::Starting));
    /// assert!(Status::Creating.is_valid_transition(Status::Running));
    /// assert!(!Status::Stopped.is_valid_transition(Status::Running));
    /// ```
    pub fn is_valid_transition(&self, to: Status) -> bool {
        use Status::*;
        match (self, to) {
            (_, Error) | (_, Removing) => true,
            (Error, _) => true,
            (s1, s2) if *s1 == s2 => true,

            (Creating, Created) | (Creating, Running) => true,
            (Created, Starting) => true,
            (Starting, Running) => true,
            (Running, Stopping) | (Running, Starting) => true,
            (Stopping, Stopped) | (Stopping, Running) => true,
            (Stopped, Starting) | (Stopped, Stopping) => true,
            (Created, Stopping) => true,

            _ => false,
        }
    }

    /// The resting status an intermediate status settles into on success.
    pub fn next_terminal(&self) -> Status {
        match self {
            Status::Creating | Status::Starting => Status::Running,
            Status::Stopping => Status::Stopped,
            other => *other,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    /// Strict parse of a canonical value. Runtime vocabularies go through
    /// [`crate::reconcile::map_runtime_status`] instead.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Status::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown status '{}'", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_round_trips_through_from_str() {
        for status in Status::ALL {
            assert_eq!(status.to_string().parse::<Status>(), Ok(status));
        }
    }

    #[test]
    fn unknown_string_is_rejected() {
        assert!("exited".parse::<Status>().is_err());
        assert!("Running".parse::<Status>().is_err());
    }

    #[test]
    fn transitional_states() {
        assert!(Status::Creating.is_transitional());
        assert!(Status::Starting.is_transitional());
        assert!(Status::Stopping.is_transitional());
        assert!(Status::Removing.is_transitional());
        assert!(!Status::Running.is_transitional());
        assert!(!Status::Stopped.is_transitional());
        assert!(!Status::Error.is_transitional());
        assert!(!Status::Created.is_transitional());
    }

    #[test]
    fn error_and_removing_reachable_from_everywhere() {
        for status in Status::ALL {
            assert!(status.is_valid_transition(Status::Error));
            assert!(status.is_valid_transition(Status::Removing));
        }
    }

    #[test]
    fn cloud_create_may_skip_created() {
        assert!(Status::Creating.is_valid_transition(Status::Running));
    }

    #[test]
    fn invalid_transitions() {
        assert!(!Status::Stopped.is_valid_transition(Status::Running));
        assert!(!Status::Running.is_valid_transition(Status::Stopped));
        assert!(!Status::Creating.is_valid_transition(Status::Stopped));
        assert!(!Status::Removing.is_valid_transition(Status::Running));
    }

    #[test]
    fn serde_uses_lowercase() {
        assert_eq!(
            serde_json::to_string(&Status::Stopping).unwrap(),
            "\"stopping\""
        );
        let parsed: Status = serde_json::from_str("\"removing\"").unwrap();
        assert_eq!(parsed, Status::Removing);
    }
}
