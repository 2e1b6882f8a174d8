use thiserror::Error;

/// Top-level error type for the `vmsteward-api` crate.
///
/// Covers every failure mode a control-plane session can report:
/// session and transport problems, faults raised by the control plane,
/// and guest-operation failures. `vmsteward-core` maps these into its
/// user-facing taxonomy.
#[derive(Debug, Error)]
pub enum Error {
    // ── Session ─────────────────────────────────────────────────────
    /// The control plane could not be reached or refused the login.
    #[error("Cannot connect to {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },

    /// Credentials rejected.
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// The session handle went stale and must be re-established.
    #[error("Session expired -- re-authentication required")]
    SessionExpired,

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// TLS setup error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── Faults ──────────────────────────────────────────────────────
    /// Managed object reference no longer (or never) existed.
    #[error("Managed object not found: {0}")]
    NotFound(String),

    /// The session user lacks a privilege for the call.
    #[error("Permission denied: {message}")]
    NoPermission { message: String },

    /// An entity with that name already exists in the target container.
    #[error("Duplicate name: {name}")]
    DuplicateName { name: String },

    /// The control plane rejected a name as malformed.
    #[error("Invalid name: {name}")]
    InvalidName { name: String },

    /// Generic system fault. The control plane sometimes raises this with
    /// an "Invalid Fault" message for requests that succeed when retried.
    #[error("System error: {message}")]
    SystemError { message: String },

    /// Any other fault reported by the control plane.
    #[error("Control plane fault: {message}")]
    Fault { message: String },

    // ── Guest operations ────────────────────────────────────────────
    /// Guest operation rejected (bad guest credentials, tools not ready, ...).
    #[error("Guest operation failed: {message}")]
    GuestOperation { message: String },
}

impl Error {
    /// Returns `true` if the session must be re-established before retrying.
    pub fn is_session_expired(&self) -> bool {
        matches!(self, Self::SessionExpired)
    }

    /// Returns `true` for the transient "Invalid Fault" system error seen
    /// when asking a guest to reboot.
    pub fn is_invalid_fault(&self) -> bool {
        match self {
            Self::SystemError { message } => message.to_lowercase().contains("invalid fault"),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_fault_is_case_insensitive() {
        let err = Error::SystemError {
            message: "vim.fault.SystemError: Invalid Fault".into(),
        };
        assert!(err.is_invalid_fault());
        assert!(!err.is_session_expired());
    }

    #[test]
    fn other_system_errors_are_not_invalid_faults() {
        let err = Error::SystemError {
            message: "connection reset by host".into(),
        };
        assert!(!err.is_invalid_fault());
    }

    #[test]
    fn permission_errors_are_not_session_expiry() {
        let err = Error::NoPermission {
            message: "VirtualMachine.Provisioning.Clone".into(),
        };
        assert!(!err.is_invalid_fault());
        assert!(!err.is_session_expired());
    }

    #[test]
    fn session_expiry_is_detected() {
        assert!(Error::SessionExpired.is_session_expired());
        assert!(!Error::NotFound("vm-1".into()).is_session_expired());
    }
}
