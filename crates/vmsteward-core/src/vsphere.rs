// ── VSphere facade ──
//
// Name-based lifecycle operations for VMs on one vCenter. Each method is
// a single call that resolves names, submits the control-plane work, and
// waits until it is done or has definitely failed.

use std::sync::Arc;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use vmsteward_api::{
    CloneSpec, ConfigSpec, Connector, DeviceChange, EntityKind, EntityRef, NicSpec, PowerState,
    RelocateSpec,
};

use crate::config::ConnectionConfig;
use crate::connection::Connection;
use crate::error::CoreError;
use crate::guest::GuestOsInterface;
use crate::power::{self, PowerController};
use crate::task::{expect_task, wait_for_task};

/// Custom field name that maps to the VM's annotation rather than to a
/// custom attribute.
pub const NOTES_FIELD: &str = "Notes";

/// Device key vCenter assigns the first network adapter.
const PRIMARY_NIC_KEY: i32 = 4000;

/// Requested virtual hardware for [`VSphere::configure_vm`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareSpec {
    pub vcpus: u32,
    pub memory_mb: u64,
    pub disk_gb: u64,
}

impl HardwareSpec {
    /// Requested disk size in KB, the unit vCenter reports disks in.
    pub fn disk_kb(&self) -> u64 {
        self.disk_gb.saturating_mul(1024 * 1024)
    }
}

/// How a requested custom field name is matched against the fields
/// defined in vCenter.
///
/// Email and account fields are named inconsistently across sites
/// ("Owner Email", "email_address", ...), so they match loosely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldMatch {
    /// Case-insensitive equality with the lowercased name.
    Exact(String),
    /// Any field whose lowercased name contains the keyword.
    Contains(&'static str),
}

impl FieldMatch {
    pub fn for_field(name: &str) -> Self {
        let lower = name.to_lowercase();
        if lower.contains("email") {
            Self::Contains("email")
        } else if lower.contains("account") {
            Self::Contains("account")
        } else {
            Self::Exact(lower)
        }
    }

    pub fn matches(&self, candidate: &str) -> bool {
        let candidate = candidate.to_lowercase();
        match self {
            Self::Exact(name) => candidate == *name,
            Self::Contains(keyword) => candidate.contains(keyword),
        }
    }
}

/// Handle to one vCenter.
#[derive(Clone)]
pub struct VSphere {
    conn: Arc<Connection>,
}

impl VSphere {
    /// Log in to the vCenter described by `config`.
    pub async fn connect(
        connector: Arc<dyn Connector>,
        config: &ConnectionConfig,
    ) -> Result<Self, CoreError> {
        info!(endpoint = %config.endpoint(), "connecting to vSphere");
        let conn = Connection::connect(connector, config).await?;
        Ok(Self {
            conn: Arc::new(conn),
        })
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }

    /// Force a fresh session and fresh guest-operations handles.
    pub async fn reconnect(&self) -> Result<(), CoreError> {
        self.conn.refresh().await
    }

    // ── Provisioning ─────────────────────────────────────────────────

    /// Clone `template` onto `host`/`datastore` into `folder` as `new_name`.
    /// The clone is left powered off.
    pub async fn clone_vm(
        &self,
        template: &str,
        host: &str,
        datastore: &str,
        folder: &str,
        new_name: &str,
    ) -> Result<(), CoreError> {
        info!(template, "getting ready to clone VM");
        let template_ref = self.conn.vm(template).await?;

        let host_ref = self.conn.host(host).await?;
        let host_ref = &host_ref;
        let in_maintenance = self
            .conn
            .call(|p| async move { p.host_in_maintenance_mode(host_ref).await })
            .await?;
        if in_maintenance {
            return Err(CoreError::bad_state(format!(
                "Target host {host} is in maintenance mode, can't deploy there"
            )));
        }

        let datastore_ref = self.conn.datastore(datastore).await?;
        let folder_ref = self.conn.folder(folder).await?;
        let pool = self
            .conn
            .call(|p| async move { p.host_resource_pool(host_ref).await })
            .await?;

        let spec = CloneSpec {
            location: RelocateSpec {
                datastore: datastore_ref,
                host: host_ref.clone(),
                pool,
            },
            power_on: false,
            template: false,
        };

        info!(template, new_name, folder, host, "cloning VM, this will take some time");
        let (t, f, s) = (&template_ref, &folder_ref, &spec);
        let task = self
            .conn
            .call(|p| async move { p.clone_vm(t, f, new_name, s).await })
            .await
            .map_err(|e| match e {
                vmsteward_api::Error::NoPermission { message } => CoreError::bad_state(format!(
                    "Permissions error: not allowed to clone VM template {template}: {message}"
                )),
                other => other.into(),
            })?;

        if !wait_for_task(&self.conn, &task, None).await? {
            return Err(CoreError::bad_state(
                "VMware failed to clone the VM, check the vSphere logs",
            ));
        }
        info!(new_name, "clone finished");
        Ok(())
    }

    /// Attach the VM to `network` and apply `hardware`. Disks are grown to
    /// the requested size, never shrunk.
    pub async fn configure_vm(
        &self,
        vm: &str,
        network: &str,
        hardware: &HardwareSpec,
    ) -> Result<(), CoreError> {
        let vm_ref = self.conn.vm(vm).await?;
        let network_ref = self.conn.network(network).await?;

        let mut device_changes = vec![DeviceChange::EditNic(NicSpec {
            key: PRIMARY_NIC_KEY,
            label: "Network Adapter".into(),
            network: network_ref,
            network_name: network.into(),
            wake_on_lan: true,
            address_type: "assigned".into(),
            start_connected: true,
            allow_guest_control: true,
        })];

        let vm_ref = &vm_ref;
        let disks = self
            .conn
            .call(|p| async move { p.virtual_disks(vm_ref).await })
            .await?;
        let Some(template_disk) = disks.first() else {
            return Err(CoreError::bad_state(format!(
                "VM {vm} has no disks, cannot resize"
            )));
        };

        let requested_kb = hardware.disk_kb();
        if requested_kb > template_disk.capacity_in_kb {
            info!(
                vm,
                requested_kb,
                template_kb = template_disk.capacity_in_kb,
                "increasing disk size"
            );
            device_changes.push(DeviceChange::ResizeDisk {
                key: template_disk.key,
                capacity_in_bytes: requested_kb.saturating_mul(1024),
            });
        } else {
            info!(vm, "requested disk size is not larger than the template, not resizing");
        }

        let spec = ConfigSpec {
            num_cpus: Some(hardware.vcpus),
            memory_mb: Some(hardware.memory_mb),
            cpu_hot_add_enabled: Some(true),
            memory_hot_add_enabled: Some(true),
            annotation: None,
            device_changes,
        };

        info!(vm, vcpus = hardware.vcpus, memory_mb = hardware.memory_mb, "reconfiguring hardware");
        let spec = &spec;
        let task = self
            .conn
            .call(|p| async move { p.reconfigure(vm_ref, spec).await })
            .await?;
        expect_task(
            &self.conn,
            &task,
            Some(self.conn.polling.reconfigure_timeout),
            "VMware failed to reconfigure the VM, check the vSphere logs",
        )
        .await?;

        info!(vm, "hardware reconfigured");
        Ok(())
    }

    /// Destroy the VM, hard powering it off first unless already off.
    pub async fn destroy_vm(&self, vm: &str) -> Result<(), CoreError> {
        if !self.is_powered_off(vm).await? {
            self.power_off_vm_hard(vm).await?;
        }

        let vm_ref = self.conn.vm(vm).await?;
        let vm_ref = &vm_ref;
        warn!(vm, "destroying VM");
        let task = self
            .conn
            .call(|p| async move { p.destroy(vm_ref).await })
            .await?;
        expect_task(
            &self.conn,
            &task,
            Some(self.conn.polling.destroy_timeout),
            "VMware failed to destroy the VM",
        )
        .await
    }

    // ── Custom fields ────────────────────────────────────────────────

    /// Set a custom field on the VM, defining the field if needed. The
    /// field named `Notes` is the VM's annotation.
    pub async fn update_custom_field(
        &self,
        vm: &str,
        field: &str,
        value: &str,
    ) -> Result<(), CoreError> {
        let vm_ref = self.conn.vm(vm).await?;

        if field == NOTES_FIELD {
            return self.set_annotation(&vm_ref, value).await;
        }

        self.set_custom_attribute(&vm_ref, field, value)
            .await
            .map_err(|e| {
                CoreError::bad_state(format!(
                    "Couldn't add or update custom field due to error: {e}"
                ))
            })
    }

    /// Read a custom field from the VM. `None` if the field is not defined
    /// or has no value.
    pub async fn custom_field(&self, vm: &str, field: &str) -> Result<Option<String>, CoreError> {
        let vm_ref = self.conn.vm(vm).await?;
        let vm_ref = &vm_ref;

        if field == NOTES_FIELD {
            let annotation = self
                .conn
                .call(|p| async move { p.annotation(vm_ref).await })
                .await?;
            return Ok(Some(annotation));
        }

        let matcher = FieldMatch::for_field(field);
        let fields = self
            .conn
            .call(|p| async move { p.available_fields(vm_ref).await })
            .await?;
        let Some(def) = fields.into_iter().find(|f| matcher.matches(&f.name)) else {
            return Ok(None);
        };

        let values = self
            .conn
            .call(|p| async move { p.custom_values(vm_ref).await })
            .await?;
        Ok(values.into_iter().find(|v| v.key == def.key).map(|v| v.value))
    }

    async fn set_annotation(&self, vm: &EntityRef, value: &str) -> Result<(), CoreError> {
        let spec = ConfigSpec {
            annotation: Some(value.to_owned()),
            ..ConfigSpec::default()
        };
        let spec = &spec;
        let task = self
            .conn
            .call(|p| async move { p.reconfigure(vm, spec).await })
            .await?;
        expect_task(
            &self.conn,
            &task,
            Some(self.conn.polling.annotation_timeout),
            "VMware failed to update the VM notes",
        )
        .await
    }

    async fn set_custom_attribute(
        &self,
        vm: &EntityRef,
        field: &str,
        value: &str,
    ) -> Result<(), CoreError> {
        let matcher = FieldMatch::for_field(field);
        let fields = self
            .conn
            .call(|p| async move { p.available_fields(vm).await })
            .await?;

        let def = match fields.into_iter().find(|f| matcher.matches(&f.name)) {
            Some(def) => def,
            None => {
                info!(field, "custom field not defined, creating it");
                self.conn
                    .call(|p| async move { p.define_field(field, EntityKind::VirtualMachine).await })
                    .await?
            }
        };

        let key = def.key;
        self.conn
            .call(|p| async move { p.set_custom_field(vm, key, value).await })
            .await?;
        Ok(())
    }

    // ── Folders ──────────────────────────────────────────────────────

    /// Create a VM folder inside `parent`.
    pub async fn create_folder(&self, parent: &str, name: &str) -> Result<EntityRef, CoreError> {
        let parent_ref = self.conn.folder(parent).await?;
        let parent_ref = &parent_ref;
        let folder = self
            .conn
            .call(|p| async move { p.create_folder(parent_ref, name).await })
            .await
            .map_err(|e| match e {
                vmsteward_api::Error::DuplicateName { .. } => CoreError::CreateDuplicate { name: name.into() },
                vmsteward_api::Error::InvalidName { .. } => CoreError::InvalidInput {
                    message: format!("Folder name {name} is invalid"),
                },
                other => other.into(),
            })?;

        info!(parent, name, "created folder");
        self.conn.cache.insert(name, folder.clone());
        Ok(folder)
    }

    pub async fn move_vm_to_folder(&self, vm: &str, folder: &str) -> Result<(), CoreError> {
        let folder_ref = self.conn.folder(folder).await?;
        let vm_ref = self.conn.vm(vm).await?;
        let (f, vms) = (&folder_ref, &[vm_ref]);
        let task = self
            .conn
            .call(|p| async move { p.move_into_folder(f, vms).await })
            .await?;
        expect_task(
            &self.conn,
            &task,
            Some(self.conn.polling.move_timeout),
            "VMware task to move VM failed",
        )
        .await
    }

    // ── Power ────────────────────────────────────────────────────────

    pub async fn vm_power_state(&self, vm: &str) -> Result<PowerState, CoreError> {
        let vm_ref = self.conn.vm(vm).await?;
        PowerController::new(&self.conn, vm_ref).power_state().await
    }

    pub async fn is_powered_on(&self, vm: &str) -> Result<bool, CoreError> {
        Ok(power::is_powered_on(&self.vm_power_state(vm).await?))
    }

    /// Not the negation of [`is_powered_on`](Self::is_powered_on):
    /// suspended and unknown states are neither.
    pub async fn is_powered_off(&self, vm: &str) -> Result<bool, CoreError> {
        Ok(power::is_powered_off(&self.vm_power_state(vm).await?))
    }

    /// Power on and return once VMware Tools are running.
    pub async fn power_on_vm(&self, vm: &str) -> Result<(), CoreError> {
        self.controller(vm).await?.power_on().await
    }

    pub async fn power_off_vm_soft(&self, vm: &str) -> Result<(), CoreError> {
        self.controller(vm).await?.power_off_soft().await
    }

    pub async fn power_off_vm_hard(&self, vm: &str) -> Result<(), CoreError> {
        self.controller(vm).await?.power_off_hard().await
    }

    /// Reboot through the guest OS and return once it is back.
    pub async fn restart_vm_soft(&self, vm: &str) -> Result<(), CoreError> {
        self.controller(vm).await?.restart_soft().await
    }

    pub async fn restart_vm_hard(&self, vm: &str) -> Result<(), CoreError> {
        self.controller(vm).await?.restart_hard().await
    }

    async fn controller(&self, vm: &str) -> Result<PowerController<'_>, CoreError> {
        let vm_ref = self.conn.vm(vm).await?;
        Ok(PowerController::new(&self.conn, vm_ref))
    }

    // ── Guest OS ─────────────────────────────────────────────────────

    /// Bind a guest OS login to the VM for running commands.
    pub async fn guest_os(
        &self,
        vm: &str,
        username: &str,
        password: SecretString,
    ) -> Result<GuestOsInterface, CoreError> {
        GuestOsInterface::new(Arc::clone(&self.conn), vm, username, password).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_and_account_fields_match_loosely() {
        let email = FieldMatch::for_field("Contact Email");
        assert_eq!(email, FieldMatch::Contains("email"));
        assert!(email.matches("Owner EMAIL address"));
        assert!(!email.matches("Owner"));

        let account = FieldMatch::for_field("account_id");
        assert!(account.matches("Billing Account"));
    }

    #[test]
    fn other_fields_match_exactly_ignoring_case() {
        let matcher = FieldMatch::for_field("Cost Centre");
        assert!(matcher.matches("cost centre"));
        assert!(!matcher.matches("Cost Centre 2"));
    }

    #[test]
    fn disk_kb_uses_binary_units() {
        let spec = HardwareSpec {
            vcpus: 2,
            memory_mb: 4096,
            disk_gb: 40,
        };
        assert_eq!(spec.disk_kb(), 40 * 1024 * 1024);
    }
}
