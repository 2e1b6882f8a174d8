// ── Control-plane value types ──
//
// Everything that crosses the control-plane boundary: managed object
// references, task handles, observed runtime states, and the specs
// submitted with clone / reconfigure calls.

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

// ── Managed objects ─────────────────────────────────────────────────

/// Kind of inventory entity a handle points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
pub enum EntityKind {
    VirtualMachine,
    HostSystem,
    Datastore,
    Folder,
    Network,
    ResourcePool,
}

/// Opaque reference to a managed object, qualified by its kind.
///
/// The `id` is the control plane's managed object id (e.g. `vm-42`).
/// Display follows the `vim.Kind:id` convention used in task logs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: String,
}

impl EntityRef {
    pub fn new(kind: EntityKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }

    pub fn vm(id: impl Into<String>) -> Self {
        Self::new(EntityKind::VirtualMachine, id)
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'vim.{}:{}'", self.kind, self.id)
    }
}

/// One row of an inventory scan: display name plus handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundEntity {
    pub name: String,
    pub entity: EntityRef,
}

// ── Tasks ───────────────────────────────────────────────────────────

/// Handle to an in-flight asynchronous control-plane operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskRef(pub String);

impl fmt::Display for TaskRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'vim.Task:{}'", self.0)
    }
}

/// Reported state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "camelCase")]
#[serde(rename_all = "camelCase")]
pub enum TaskState {
    Queued,
    Running,
    Success,
    Error,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }
}

// ── Observed runtime states ─────────────────────────────────────────
//
// The control plane reports these as free-form strings. Known values map
// to variants; anything else is kept verbatim so it can be logged.

/// `summary.runtime.powerState`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PowerState {
    PoweredOn,
    PoweredOff,
    Suspended,
    Other(String),
}

/// `guest.toolsRunningStatus`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolsRunningStatus {
    Running,
    NotRunning,
    ExecutingScripts,
    Other(String),
}

/// `guest.guestState`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuestState {
    Running,
    NotRunning,
    ShuttingDown,
    Resetting,
    Standby,
    Unknown,
    Other(String),
}

impl PowerState {
    pub fn as_str(&self) -> &str {
        match self {
            Self::PoweredOn => "poweredOn",
            Self::PoweredOff => "poweredOff",
            Self::Suspended => "suspended",
            Self::Other(s) => s,
        }
    }
}

impl FromStr for PowerState {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "poweredOn" => Self::PoweredOn,
            "poweredOff" => Self::PoweredOff,
            "suspended" => Self::Suspended,
            other => Self::Other(other.to_owned()),
        })
    }
}

impl ToolsRunningStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Running => "guestToolsRunning",
            Self::NotRunning => "guestToolsNotRunning",
            Self::ExecutingScripts => "guestToolsExecutingScripts",
            Self::Other(s) => s,
        }
    }
}

impl FromStr for ToolsRunningStatus {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "guestToolsRunning" => Self::Running,
            "guestToolsNotRunning" => Self::NotRunning,
            "guestToolsExecutingScripts" => Self::ExecutingScripts,
            other => Self::Other(other.to_owned()),
        })
    }
}

impl GuestState {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Running => "running",
            Self::NotRunning => "notRunning",
            Self::ShuttingDown => "shuttingDown",
            Self::Resetting => "resetting",
            Self::Standby => "standby",
            Self::Unknown => "unknown",
            Self::Other(s) => s,
        }
    }
}

impl FromStr for GuestState {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "running" => Self::Running,
            "notRunning" => Self::NotRunning,
            "shuttingDown" => Self::ShuttingDown,
            "resetting" => Self::Resetting,
            "standby" => Self::Standby,
            "unknown" => Self::Unknown,
            other => Self::Other(other.to_owned()),
        })
    }
}

macro_rules! display_as_str {
    ($($ty:ty),+) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        })+
    };
}

display_as_str!(PowerState, ToolsRunningStatus, GuestState);

// ── Hardware ────────────────────────────────────────────────────────

/// A virtual disk attached to a VM, capacity in the control plane's
/// native unit (KB).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualDisk {
    pub key: i32,
    pub label: String,
    pub capacity_in_kb: u64,
}

/// Network adapter edit for a reconfigure call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NicSpec {
    pub key: i32,
    pub label: String,
    pub network: EntityRef,
    pub network_name: String,
    pub wake_on_lan: bool,
    pub address_type: String,
    pub start_connected: bool,
    pub allow_guest_control: bool,
}

/// One device edit inside a [`ConfigSpec`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceChange {
    /// Replace the adapter with the given key by a vmxnet3 adapter on `network`.
    EditNic(NicSpec),
    /// Grow an existing disk to the given capacity.
    ResizeDisk { key: i32, capacity_in_bytes: u64 },
}

/// Reconfigure request. Fields left `None` are not touched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigSpec {
    pub num_cpus: Option<u32>,
    pub memory_mb: Option<u64>,
    pub cpu_hot_add_enabled: Option<bool>,
    pub memory_hot_add_enabled: Option<bool>,
    pub annotation: Option<String>,
    pub device_changes: Vec<DeviceChange>,
}

/// Where a clone is placed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelocateSpec {
    pub datastore: EntityRef,
    pub host: EntityRef,
    pub pool: EntityRef,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloneSpec {
    pub location: RelocateSpec,
    pub power_on: bool,
    pub template: bool,
}

// ── Custom fields ───────────────────────────────────────────────────

/// A custom attribute definition available on an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomFieldDef {
    pub key: i32,
    pub name: String,
}

/// A value stored for a custom attribute on an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomFieldValue {
    pub key: i32,
    pub value: String,
}

// ── Guest operations ────────────────────────────────────────────────

/// Login for guest operations (an OS account inside the VM).
#[derive(Debug, Clone)]
pub struct GuestCredentials {
    pub username: String,
    pub password: SecretString,
}

/// Program submitted to the guest process manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramSpec {
    pub program_path: String,
    pub arguments: String,
}

/// Process id inside the guest. Zero is never a valid id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GuestProcessId(pub u64);

impl GuestProcessId {
    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for GuestProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status of a guest process. `exit_code` is `None` while it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestProcessInfo {
    pub pid: GuestProcessId,
    pub exit_code: Option<i32>,
}

// ── Session ─────────────────────────────────────────────────────────

/// Control-plane endpoint address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Control-plane login.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}
