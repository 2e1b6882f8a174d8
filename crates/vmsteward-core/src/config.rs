// ── Runtime connection configuration ──
//
// These types describe *how* to reach a vCenter and how patiently to wait
// on it. They carry credential data and polling tuning, but never touch
// disk. `vmsteward-config` builds them from files and environment.

use std::time::Duration;

use secrecy::SecretString;
use vmsteward_api::{Credentials, Endpoint, TlsMode, TransportConfig};

/// Default vCenter HTTPS port.
pub const DEFAULT_PORT: u16 = 443;

/// Configuration for connecting to a single vCenter.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Hostname or IP of the vCenter.
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    /// TLS verification for guest file downloads from ESXi hosts.
    pub tls: TlsMode,
    /// HTTP timeout for guest file downloads.
    pub timeout: Duration,
    pub polling: PollingConfig,
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>, username: impl Into<String>, password: SecretString) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            username: username.into(),
            password,
            tls: TlsMode::default(),
            timeout: Duration::from_secs(30),
            polling: PollingConfig::default(),
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            host: self.host.clone(),
            port: self.port,
        }
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }

    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            tls: self.tls.clone(),
            timeout: self.timeout,
        }
    }
}

/// Every wait, poll interval, and retry bound used while driving the
/// control plane.
///
/// The defaults are tuned for vCenter: VMware Tools status regularly lags
/// reality by minutes, and a VM object's state can stop updating until it
/// is looked up again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollingConfig {
    // ── Tasks ────────────────────────────────────────────────────────
    pub task_poll_interval: Duration,

    // ── Power ────────────────────────────────────────────────────────
    pub power_on_timeout: Duration,
    pub shutdown_task_timeout: Duration,
    pub hard_power_off_timeout: Duration,
    pub hard_restart_timeout: Duration,
    /// Grace period after a shutdown request that returned no task.
    pub shutdown_settle: Duration,
    pub power_off_poll_interval: Duration,
    pub power_off_polls_per_refresh: u32,
    pub power_off_refresh_limit: u32,

    // ── VMware Tools ─────────────────────────────────────────────────
    pub tools_poll_interval: Duration,
    pub tools_polls_per_refresh: u32,
    pub tools_refresh_limit: u32,

    // ── Soft restart ─────────────────────────────────────────────────
    pub soft_restart_cycles: u32,
    pub reboot_attempts: u32,
    pub invalid_fault_backoff: Duration,
    pub reboot_poll_interval: Duration,
    /// Polls waiting for tools to stop after a reboot request.
    pub reboot_start_polls: u32,
    /// Polls waiting for the guest to report running again.
    pub reboot_finish_polls: u32,

    // ── Guest commands ───────────────────────────────────────────────
    pub guest_poll_interval: Duration,

    // ── Inventory / lifecycle ────────────────────────────────────────
    pub reconfigure_timeout: Duration,
    pub annotation_timeout: Duration,
    pub move_timeout: Duration,
    pub destroy_timeout: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            task_poll_interval: Duration::from_secs(10),

            power_on_timeout: Duration::from_secs(60),
            shutdown_task_timeout: Duration::from_secs(240),
            hard_power_off_timeout: Duration::from_secs(60),
            hard_restart_timeout: Duration::from_secs(30),
            shutdown_settle: Duration::from_secs(20),
            power_off_poll_interval: Duration::from_secs(5),
            power_off_polls_per_refresh: 24,
            power_off_refresh_limit: 5,

            tools_poll_interval: Duration::from_secs(5),
            tools_polls_per_refresh: 24,
            tools_refresh_limit: 10,

            soft_restart_cycles: 5,
            reboot_attempts: 5,
            invalid_fault_backoff: Duration::from_secs(30),
            reboot_poll_interval: Duration::from_secs(1),
            reboot_start_polls: 120,
            reboot_finish_polls: 1800,

            guest_poll_interval: Duration::from_secs(5),

            reconfigure_timeout: Duration::from_secs(60),
            annotation_timeout: Duration::from_secs(20),
            move_timeout: Duration::from_secs(60),
            destroy_timeout: Duration::from_secs(10),
        }
    }
}

impl PollingConfig {
    /// Total time the tools-wait policy allows before giving up.
    pub fn tools_budget(&self) -> Duration {
        self.tools_poll_interval
            .saturating_mul(self.tools_polls_per_refresh)
            .saturating_mul(self.tools_refresh_limit)
    }

    /// Total time a task-less soft power-off is polled before giving up.
    pub fn power_off_budget(&self) -> Duration {
        self.shutdown_settle.saturating_add(
            self.power_off_poll_interval
                .saturating_mul(self.power_off_polls_per_refresh)
                .saturating_mul(self.power_off_refresh_limit),
        )
    }

    /// Total time to wait for the guest to come back after a reboot.
    pub fn reboot_finish_budget(&self) -> Duration {
        self.reboot_poll_interval
            .saturating_mul(self.reboot_finish_polls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tools_budget_is_twenty_minutes() {
        assert_eq!(
            PollingConfig::default().tools_budget(),
            Duration::from_secs(20 * 60)
        );
    }

    #[test]
    fn reboot_finish_budget_is_thirty_minutes() {
        assert_eq!(
            PollingConfig::default().reboot_finish_budget(),
            Duration::from_secs(30 * 60)
        );
    }

    #[test]
    fn connection_defaults() {
        let config = ConnectionConfig::new("vcenter.lab", "svc", SecretString::from("pw".to_string()));
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.endpoint().to_string(), "vcenter.lab:443");
        assert_eq!(config.transport().tls, TlsMode::DangerAcceptInvalid);
    }
}
