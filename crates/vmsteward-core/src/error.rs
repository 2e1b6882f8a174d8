// ── Core error types ──
//
// User-facing errors from vmsteward-core. Callers never see raw session
// or fault types from the control plane. The `From<vmsteward_api::Error>`
// impl translates them into the variants below.

use std::time::Duration;

use humantime::format_duration;
use thiserror::Error;

use vmsteward_api::EntityKind;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot connect to vCenter at {endpoint}: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    // ── Input / lookup errors ────────────────────────────────────────
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Could not find {kind} with name {name}")]
    ObjectNotFound { kind: String, name: String },

    /// A name was cached as one kind of entity and requested as another.
    #[error("Requested {requested} '{name}' but it is known as a {cached}")]
    KindMismatch {
        name: String,
        requested: EntityKind,
        cached: EntityKind,
    },

    #[error("Name already in use: {name}")]
    CreateDuplicate { name: String },

    // ── Control-plane state errors ───────────────────────────────────
    #[error("Bad state: {message}")]
    BadState { message: String },

    #[error("{operation} timed out after {}", human(.waited))]
    Timeout { operation: String, waited: Duration },

    // ── Guest OS errors ──────────────────────────────────────────────
    #[error("Guest OS error: {message}")]
    GuestOs { message: String },

    #[error("Guest OS timed out after {}: {message}", human(.waited))]
    GuestOsTimeout { message: String, waited: Duration },

    /// Non-zero exit and no redirected output to tell what happened.
    #[error(
        "{command} exited with code {exit_code} but no output file was specified, \
         so the output was not recorded"
    )]
    ProcessUnknownResult { command: String, exit_code: i32 },

    /// Non-zero exit with blank output, and blank output is declared acceptable.
    #[error(
        "{command} exited with code {exit_code} and a blank output, which is an accepted \
         output. The command may have failed silently"
    )]
    AmbiguousResult { command: String, exit_code: i32 },

    #[error("{command} exited with code {exit_code} and unexpected output: {output}")]
    BadOutput {
        command: String,
        exit_code: i32,
        output: String,
    },
}

fn human(d: &Duration) -> humantime::FormattedDuration {
    format_duration(*d)
}

impl CoreError {
    pub(crate) fn bad_state(message: impl Into<String>) -> Self {
        Self::BadState {
            message: message.into(),
        }
    }

    pub(crate) fn guest_os(message: impl Into<String>) -> Self {
        Self::GuestOs {
            message: message.into(),
        }
    }

    /// Returns `true` for any of the timeout variants.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::GuestOsTimeout { .. })
    }
}

// ── Conversion from control-plane errors ─────────────────────────────

impl From<vmsteward_api::Error> for CoreError {
    fn from(err: vmsteward_api::Error) -> Self {
        use vmsteward_api::Error as Api;

        match err {
            Api::Connect { endpoint, reason } => CoreError::ConnectionFailed { endpoint, reason },
            Api::Authentication { message } => CoreError::ConnectionFailed {
                endpoint: "<session>".into(),
                reason: format!("authentication failed: {message}"),
            },
            Api::SessionExpired => CoreError::ConnectionFailed {
                endpoint: "<session>".into(),
                reason: "session expired and could not be re-established".into(),
            },
            Api::Transport(ref e) => CoreError::ConnectionFailed {
                endpoint: e
                    .url()
                    .map_or_else(|| "<unknown>".into(), ToString::to_string),
                reason: e.to_string(),
            },
            Api::InvalidUrl(e) => CoreError::InvalidInput {
                message: format!("invalid URL: {e}"),
            },
            Api::Tls(message) => CoreError::InvalidInput { message },
            Api::NotFound(name) => CoreError::ObjectNotFound {
                kind: "managed object".into(),
                name,
            },
            Api::NoPermission { message } => {
                CoreError::bad_state(format!("Permissions error: {message}"))
            }
            Api::DuplicateName { name } => CoreError::CreateDuplicate { name },
            Api::InvalidName { name } => CoreError::InvalidInput {
                message: format!("name {name} is invalid"),
            },
            Api::SystemError { message } | Api::Fault { message } => {
                CoreError::BadState { message }
            }
            Api::GuestOperation { message } => CoreError::GuestOs { message },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_names_budget_in_human_units() {
        let err = CoreError::Timeout {
            operation: "Waiting for VMware Tools on web-01".into(),
            waited: Duration::from_secs(20 * 60),
        };
        assert_eq!(
            err.to_string(),
            "Waiting for VMware Tools on web-01 timed out after 20m"
        );
        assert!(err.is_timeout());
    }

    #[test]
    fn duplicate_name_maps_to_create_duplicate() {
        let err: CoreError = vmsteward_api::Error::DuplicateName {
            name: "builds".into(),
        }
        .into();
        assert!(matches!(err, CoreError::CreateDuplicate { name } if name == "builds"));
    }

    #[test]
    fn invalid_name_maps_to_invalid_input() {
        let err: CoreError = vmsteward_api::Error::InvalidName { name: "a/b".into() }.into();
        assert!(matches!(err, CoreError::InvalidInput { .. }));
    }

    #[test]
    fn permission_fault_is_bad_state() {
        let err: CoreError = vmsteward_api::Error::NoPermission {
            message: "VirtualMachine.Provisioning.Clone".into(),
        }
        .into();
        let CoreError::BadState { message } = err else {
            panic!("expected BadState");
        };
        assert!(message.starts_with("Permissions error"));
    }

    #[test]
    fn connect_failure_keeps_endpoint() {
        let err: CoreError = vmsteward_api::Error::Connect {
            endpoint: "vcenter.lab:443".into(),
            reason: "connection refused".into(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "Cannot connect to vCenter at vcenter.lab:443: connection refused"
        );
    }
}
