// ── Control-plane capability set ──
//
// The virtualization control plane as seen by vmsteward: a session that
// can enumerate inventory, start asynchronous tasks, report runtime state,
// and hand out the guest-operations sub-services. The SDK that actually
// speaks the wire protocol implements these traits; tests use the
// scripted fake behind the `fake` feature.

use std::sync::Arc;

use async_trait::async_trait;
use url::Url;

use crate::error::Error;
use crate::model::{
    CloneSpec, ConfigSpec, Credentials, CustomFieldDef, CustomFieldValue, Endpoint, EntityKind,
    EntityRef, FoundEntity, GuestCredentials, GuestProcessId, GuestProcessInfo, GuestState,
    PowerState, ProgramSpec, TaskRef, TaskState, ToolsRunningStatus, VirtualDisk,
};

/// Opens authenticated sessions against a control plane.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Log in and return a fresh session.
    async fn connect(
        &self,
        endpoint: &Endpoint,
        credentials: &Credentials,
    ) -> Result<Arc<dyn ControlPlane>, Error>;
}

/// An authenticated control-plane session.
///
/// Any method may fail with [`Error::SessionExpired`] once the session
/// goes stale; callers are expected to reconnect and retry.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    // ── Tasks ───────────────────────────────────────────────────────
    async fn task_state(&self, task: &TaskRef) -> Result<TaskState, Error>;

    // ── Inventory ───────────────────────────────────────────────────

    /// Enumerate every entity of `kind` reachable from the root folder.
    /// This is a full inventory traversal and is slow on large sites.
    async fn find_entities(&self, kind: EntityKind) -> Result<Vec<FoundEntity>, Error>;

    /// Look a VM up by its BIOS UUID. Returns the current handle and name.
    async fn find_vm_by_uuid(&self, uuid: &str) -> Result<Option<FoundEntity>, Error>;

    // ── Power ───────────────────────────────────────────────────────
    async fn power_on(&self, vm: &EntityRef) -> Result<TaskRef, Error>;
    async fn power_off(&self, vm: &EntityRef) -> Result<TaskRef, Error>;
    async fn reset(&self, vm: &EntityRef) -> Result<TaskRef, Error>;

    /// Ask the guest OS to shut down. The control plane does not always
    /// hand back a task for this.
    async fn shutdown_guest(&self, vm: &EntityRef) -> Result<Option<TaskRef>, Error>;

    /// Ask the guest OS to reboot. Fire and forget.
    async fn reboot_guest(&self, vm: &EntityRef) -> Result<(), Error>;

    // ── Runtime state ───────────────────────────────────────────────
    async fn power_state(&self, vm: &EntityRef) -> Result<PowerState, Error>;
    async fn tools_running_status(&self, vm: &EntityRef) -> Result<ToolsRunningStatus, Error>;
    async fn guest_state(&self, vm: &EntityRef) -> Result<GuestState, Error>;
    async fn vm_uuid(&self, vm: &EntityRef) -> Result<String, Error>;
    async fn virtual_disks(&self, vm: &EntityRef) -> Result<Vec<VirtualDisk>, Error>;
    async fn annotation(&self, vm: &EntityRef) -> Result<String, Error>;

    async fn host_in_maintenance_mode(&self, host: &EntityRef) -> Result<bool, Error>;

    /// Resource pool of the compute resource the host belongs to.
    async fn host_resource_pool(&self, host: &EntityRef) -> Result<EntityRef, Error>;

    // ── Lifecycle ───────────────────────────────────────────────────
    async fn clone_vm(
        &self,
        template: &EntityRef,
        folder: &EntityRef,
        name: &str,
        spec: &CloneSpec,
    ) -> Result<TaskRef, Error>;

    async fn reconfigure(&self, vm: &EntityRef, spec: &ConfigSpec) -> Result<TaskRef, Error>;
    async fn destroy(&self, vm: &EntityRef) -> Result<TaskRef, Error>;

    // ── Custom fields ───────────────────────────────────────────────
    async fn available_fields(&self, entity: &EntityRef) -> Result<Vec<CustomFieldDef>, Error>;
    async fn custom_values(&self, entity: &EntityRef) -> Result<Vec<CustomFieldValue>, Error>;
    async fn define_field(&self, name: &str, kind: EntityKind) -> Result<CustomFieldDef, Error>;
    async fn set_custom_field(&self, entity: &EntityRef, key: i32, value: &str)
    -> Result<(), Error>;

    // ── Folders ─────────────────────────────────────────────────────
    async fn create_folder(&self, parent: &EntityRef, name: &str) -> Result<EntityRef, Error>;
    async fn move_into_folder(&self, folder: &EntityRef, vms: &[EntityRef])
    -> Result<TaskRef, Error>;

    // ── Guest operations sub-services ───────────────────────────────
    async fn process_manager(&self) -> Result<Arc<dyn GuestProcessManager>, Error>;
    async fn file_manager(&self) -> Result<Arc<dyn GuestFileManager>, Error>;
}

/// Starts and inspects processes inside a guest OS.
#[async_trait]
pub trait GuestProcessManager: Send + Sync {
    async fn start_program(
        &self,
        vm: &EntityRef,
        auth: &GuestCredentials,
        spec: &ProgramSpec,
    ) -> Result<GuestProcessId, Error>;

    async fn list_processes(
        &self,
        vm: &EntityRef,
        auth: &GuestCredentials,
        pids: &[GuestProcessId],
    ) -> Result<Vec<GuestProcessInfo>, Error>;
}

/// Stages guest files for download.
#[async_trait]
pub trait GuestFileManager: Send + Sync {
    /// Returns the one-time download URL, or `None` if the control plane
    /// did not provide one.
    async fn initiate_file_transfer_from_guest(
        &self,
        vm: &EntityRef,
        auth: &GuestCredentials,
        guest_path: &str,
    ) -> Result<Option<Url>, Error>;
}
