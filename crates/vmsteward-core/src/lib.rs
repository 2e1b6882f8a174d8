//! Dependable lifecycle operations on top of a flaky vSphere control plane.
//!
//! vCenter answers most requests with a task handle and reports VM state
//! late, or on some VM objects not at all. This crate turns that into
//! calls that return only once the work is done or has definitely failed:
//!
//! - **[`VSphere`]**: Facade keyed by names: clone, reconfigure, destroy,
//!   power, custom fields, folders. Owns the [`Connection`].
//!
//! - **[`Connection`]**: Session plus guest-operations handles, swapped
//!   atomically on reconnect. Calls failing with an expired session are
//!   reconnected and retried once. Also caches name → handle lookups
//!   ([`resolve`](Connection::resolve)).
//!
//! - **[`PowerController`]**: Power transitions and the VMware Tools /
//!   guest-state polling that decides when a VM is usable, including the
//!   periodic refresh of stale VM objects by UUID.
//!
//! - **[`GuestOsInterface`]**: Runs a [`GuestCommand`] in the guest and
//!   judges success from the exit code or, failing that, the redirected
//!   output downloaded from the ESXi host.
//!
//! - **[`wait_for_task`]**: The task poller everything else is built on.
//!
//! All waits are `tokio::time::sleep` based. Every interval and retry bound
//! lives in [`PollingConfig`].

pub mod config;
pub mod connection;
pub mod error;
pub mod guest;
pub mod power;
pub mod resolver;
pub mod task;
pub mod vsphere;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{ConnectionConfig, DEFAULT_PORT, PollingConfig};
pub use connection::Connection;
pub use error::CoreError;
pub use guest::{CommandSuccess, GuestCommand, GuestOsInterface};
pub use power::{PowerController, is_powered_off, is_powered_on};
pub use resolver::EntityCache;
pub use task::{expect_task, wait_for_task};
pub use vsphere::{FieldMatch, HardwareSpec, NOTES_FIELD, VSphere};

pub use vmsteward_api::{
    EntityKind, EntityRef, GuestState, PowerState, TaskRef, TaskState, TlsMode,
    ToolsRunningStatus,
};
