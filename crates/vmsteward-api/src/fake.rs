//! Scripted in-memory control plane.
//!
//! Lets tests of code built on [`ControlPlane`] reproduce the control
//! plane's quirks on demand: tasks that never finish, shutdown requests
//! that return no task, VM objects whose state stops updating until they
//! are looked up again by UUID, transient "Invalid Fault" errors on
//! reboot, and sessions that expire mid-operation.
//!
//! Every call is recorded so tests can assert on ordering and poll counts.
//! Runtime state is driven by [`Script`]s: each read pops the next value
//! and the last value sticks forever.
//!
//! # Panics
//!
//! Setup methods panic on misuse, e.g. editing an unknown VM id or
//! building an empty [`Script`]. A poisoned state lock also panics.

#![allow(clippy::expect_used)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use url::Url;

use crate::error::Error;
use crate::model::{
    CloneSpec, ConfigSpec, Credentials, CustomFieldDef, CustomFieldValue, Endpoint, EntityKind,
    EntityRef, FoundEntity, GuestCredentials, GuestProcessId, GuestProcessInfo, GuestState,
    PowerState, ProgramSpec, TaskRef, TaskState, ToolsRunningStatus, VirtualDisk,
};
use crate::plane::{Connector, ControlPlane, GuestFileManager, GuestProcessManager};

// ── Script ──────────────────────────────────────────────────────────

/// A sequence of values returned by successive reads. The final value
/// repeats once the sequence is exhausted.
#[derive(Debug, Clone)]
pub struct Script<T: Clone> {
    values: VecDeque<T>,
}

impl<T: Clone> Script<T> {
    pub fn constant(value: T) -> Self {
        Self {
            values: VecDeque::from([value]),
        }
    }

    /// Panics if `values` is empty.
    pub fn sequence(values: impl IntoIterator<Item = T>) -> Self {
        let values: VecDeque<T> = values.into_iter().collect();
        assert!(!values.is_empty(), "a script needs at least one value");
        Self { values }
    }

    /// `first` repeated `times` times, then `then` forever.
    pub fn after(first: T, times: usize, then: T) -> Self {
        let mut values: VecDeque<T> = std::iter::repeat_n(first, times).collect();
        values.push_back(then);
        Self { values }
    }

    fn next(&mut self) -> T {
        if self.values.len() > 1 {
            if let Some(value) = self.values.pop_front() {
                return value;
            }
        }
        self.values
            .front()
            .cloned()
            .expect("script always holds one value")
    }
}

// ── Recorded calls ──────────────────────────────────────────────────

/// Actions that submit a task. Used to script their outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskAction {
    PowerOn,
    PowerOff,
    Reset,
    ShutdownGuest,
    Clone,
    Reconfigure,
    Destroy,
    MoveIntoFolder,
}

/// A call made against the fake, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    TaskState(TaskRef),
    FindEntities(EntityKind),
    FindVmByUuid(String),
    PowerOn(EntityRef),
    PowerOff(EntityRef),
    Reset(EntityRef),
    ShutdownGuest(EntityRef),
    RebootGuest(EntityRef),
    PowerState(EntityRef),
    ToolsRunningStatus(EntityRef),
    GuestState(EntityRef),
    CloneVm {
        template: EntityRef,
        folder: EntityRef,
        name: String,
        spec: CloneSpec,
    },
    Reconfigure {
        vm: EntityRef,
        spec: ConfigSpec,
    },
    Destroy(EntityRef),
    DefineField(String),
    SetCustomField {
        entity: EntityRef,
        key: i32,
        value: String,
    },
    CreateFolder {
        parent: EntityRef,
        name: String,
    },
    MoveIntoFolder {
        folder: EntityRef,
        vms: Vec<EntityRef>,
    },
    StartProgram(ProgramSpec),
    ListProcesses(Vec<GuestProcessId>),
    InitiateFileTransfer(String),
}

impl Call {
    /// Returns `true` for calls that submit a control-plane task.
    pub fn is_task_submission(&self) -> bool {
        matches!(
            self,
            Self::PowerOn(_)
                | Self::PowerOff(_)
                | Self::Reset(_)
                | Self::CloneVm { .. }
                | Self::Reconfigure { .. }
                | Self::Destroy(_)
                | Self::MoveIntoFolder { .. }
        )
    }
}

// ── State ───────────────────────────────────────────────────────────

/// Scripted runtime state of one VM handle.
#[derive(Debug, Clone)]
pub struct FakeVm {
    pub uuid: String,
    pub power: Script<PowerState>,
    pub tools: Script<ToolsRunningStatus>,
    pub guest: Script<GuestState>,
    pub disks: Vec<VirtualDisk>,
    pub annotation: String,
}

impl FakeVm {
    fn new(uuid: String) -> Self {
        Self {
            uuid,
            power: Script::constant(PowerState::PoweredOff),
            tools: Script::constant(ToolsRunningStatus::Running),
            guest: Script::constant(GuestState::Running),
            disks: vec![VirtualDisk {
                key: 2000,
                label: "Hard disk 1".into(),
                capacity_in_kb: 16 * 1024 * 1024,
            }],
            annotation: String::new(),
        }
    }
}

#[derive(Debug, Clone)]
struct FakeHost {
    in_maintenance_mode: bool,
    pool: EntityRef,
}

#[derive(Default)]
struct FakeState {
    entities: Vec<FoundEntity>,
    vms: HashMap<String, FakeVm>,
    hosts: HashMap<String, FakeHost>,
    uuid_targets: HashMap<String, FoundEntity>,
    tasks: HashMap<String, Script<TaskState>>,
    next_task: u64,
    outcomes: HashMap<TaskAction, Vec<TaskState>>,
    shutdown_returns_task: bool,
    reboot_errors: VecDeque<Error>,
    clone_error: Option<Error>,
    create_folder_error: Option<Error>,
    fields: Vec<CustomFieldDef>,
    values: HashMap<(String, i32), String>,
    next_field_key: i32,
    next_folder: u64,
    launch_pid: u64,
    launch_error: Option<Error>,
    processes: Option<Script<Vec<GuestProcessInfo>>>,
    download_url: Option<Url>,
    calls: Vec<Call>,
}

// ── FakeControlPlane ────────────────────────────────────────────────

/// Cheaply cloneable handle to a shared scripted control plane.
#[derive(Clone, Default)]
pub struct FakeControlPlane {
    state: Arc<Mutex<FakeState>>,
    expiring_calls: Arc<AtomicUsize>,
}

impl FakeControlPlane {
    pub fn new() -> Self {
        let plane = Self::default();
        {
            let mut state = plane.lock();
            state.shutdown_returns_task = true;
            state.launch_pid = 1000;
            state.next_field_key = 100;
        }
        plane
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().expect("fake state lock poisoned")
    }

    // ── Inventory setup ──────────────────────────────────────────────

    /// Register a plain inventory entity.
    pub fn add_entity(&self, kind: EntityKind, name: &str, id: &str) -> EntityRef {
        let entity = EntityRef::new(kind, id);
        self.lock().entities.push(FoundEntity {
            name: name.into(),
            entity: entity.clone(),
        });
        entity
    }

    /// Register a VM: powered off, tools running, one 16 GB disk,
    /// UUID `uuid-{id}` resolving back to the same handle.
    pub fn add_vm(&self, name: &str, id: &str) -> EntityRef {
        let vm = self.add_entity(EntityKind::VirtualMachine, name, id);
        let uuid = format!("uuid-{id}");
        let mut state = self.lock();
        state.vms.insert(id.into(), FakeVm::new(uuid.clone()));
        state.uuid_targets.insert(
            uuid,
            FoundEntity {
                name: name.into(),
                entity: vm.clone(),
            },
        );
        vm
    }

    /// Register a VM handle that is not visible to inventory scans, only
    /// reachable through a UUID lookup. Models the fresh object returned
    /// when a stale handle is refreshed.
    pub fn add_hidden_vm(&self, id: &str, uuid: &str) -> EntityRef {
        let vm = EntityRef::vm(id);
        self.lock().vms.insert(id.into(), FakeVm::new(uuid.into()));
        vm
    }

    /// Make UUID lookups for `uuid` return `entity` under `name`.
    pub fn set_uuid_target(&self, uuid: &str, name: &str, entity: &EntityRef) {
        self.lock().uuid_targets.insert(
            uuid.into(),
            FoundEntity {
                name: name.into(),
                entity: entity.clone(),
            },
        );
    }

    /// Edit the scripted state of a VM handle.
    pub fn with_vm(&self, id: &str, edit: impl FnOnce(&mut FakeVm)) {
        let mut state = self.lock();
        let vm = state.vms.get_mut(id).expect("unknown fake VM");
        edit(vm);
    }

    /// Register a host with its own resource pool.
    pub fn add_host(&self, name: &str, id: &str, in_maintenance_mode: bool) -> EntityRef {
        let host = self.add_entity(EntityKind::HostSystem, name, id);
        let pool = EntityRef::new(EntityKind::ResourcePool, format!("resgroup-{id}"));
        self.lock().hosts.insert(
            id.into(),
            FakeHost {
                in_maintenance_mode,
                pool,
            },
        );
        host
    }

    pub fn add_field(&self, name: &str) -> CustomFieldDef {
        let mut state = self.lock();
        let def = CustomFieldDef {
            key: state.next_field_key,
            name: name.into(),
        };
        state.next_field_key += 1;
        state.fields.push(def.clone());
        def
    }

    // ── Behaviour setup ──────────────────────────────────────────────

    /// States reported by tasks submitted for `action`. Default: success.
    pub fn set_task_outcome(&self, action: TaskAction, states: Vec<TaskState>) {
        self.lock().outcomes.insert(action, states);
    }

    /// Create a task directly with the given state sequence.
    pub fn submit_task(&self, states: Vec<TaskState>) -> TaskRef {
        let mut state = self.lock();
        Self::new_task(&mut state, states)
    }

    pub fn set_shutdown_returns_task(&self, returns_task: bool) {
        self.lock().shutdown_returns_task = returns_task;
    }

    /// Queue an error for the next reboot request.
    pub fn push_reboot_error(&self, error: Error) {
        self.lock().reboot_errors.push_back(error);
    }

    pub fn fail_clone_with(&self, error: Error) {
        self.lock().clone_error = Some(error);
    }

    pub fn fail_create_folder_with(&self, error: Error) {
        self.lock().create_folder_error = Some(error);
    }

    /// The next `calls` calls fail with [`Error::SessionExpired`].
    pub fn expire_session(&self, calls: usize) {
        self.expiring_calls.store(calls, Ordering::SeqCst);
    }

    pub fn set_launch_pid(&self, pid: u64) {
        self.lock().launch_pid = pid;
    }

    pub fn fail_launch_with(&self, error: Error) {
        self.lock().launch_error = Some(error);
    }

    /// Successive process listings. Default: one process exiting with 0.
    pub fn set_process_script(&self, script: Script<Vec<GuestProcessInfo>>) {
        self.lock().processes = Some(script);
    }

    pub fn set_download_url(&self, url: Option<Url>) {
        self.lock().download_url = url;
    }

    // ── Inspection ───────────────────────────────────────────────────

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.lock().calls.iter().filter(|c| predicate(c)).count()
    }

    pub fn custom_value(&self, entity: &EntityRef, key: i32) -> Option<String> {
        self.lock().values.get(&(entity.id.clone(), key)).cloned()
    }

    pub fn field_named(&self, name: &str) -> Option<CustomFieldDef> {
        self.lock().fields.iter().find(|f| f.name == name).cloned()
    }

    // ── Internals ────────────────────────────────────────────────────

    fn new_task(state: &mut FakeState, states: Vec<TaskState>) -> TaskRef {
        state.next_task += 1;
        let id = format!("task-{}", state.next_task);
        let script = if states.is_empty() {
            Script::constant(TaskState::Success)
        } else {
            Script::sequence(states)
        };
        state.tasks.insert(id.clone(), script);
        TaskRef(id)
    }

    fn start_task(&self, action: TaskAction, call: Call) -> Result<TaskRef, Error> {
        self.check_session()?;
        let mut state = self.lock();
        state.calls.push(call);
        let states = state.outcomes.get(&action).cloned().unwrap_or_default();
        Ok(Self::new_task(&mut state, states))
    }

    fn record(&self, call: Call) -> Result<MutexGuard<'_, FakeState>, Error> {
        self.check_session()?;
        let mut state = self.lock();
        state.calls.push(call);
        Ok(state)
    }

    fn check_session(&self) -> Result<(), Error> {
        let expired = self
            .expiring_calls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if expired {
            Err(Error::SessionExpired)
        } else {
            Ok(())
        }
    }
}

fn vm_mut<'a>(state: &'a mut FakeState, vm: &EntityRef) -> Result<&'a mut FakeVm, Error> {
    state
        .vms
        .get_mut(&vm.id)
        .ok_or_else(|| Error::NotFound(vm.to_string()))
}

fn host<'a>(state: &'a FakeState, host: &EntityRef) -> Result<&'a FakeHost, Error> {
    state
        .hosts
        .get(&host.id)
        .ok_or_else(|| Error::NotFound(host.to_string()))
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    async fn task_state(&self, task: &TaskRef) -> Result<TaskState, Error> {
        let mut state = self.record(Call::TaskState(task.clone()))?;
        state
            .tasks
            .get_mut(&task.0)
            .map(Script::next)
            .ok_or_else(|| Error::NotFound(task.to_string()))
    }

    async fn find_entities(&self, kind: EntityKind) -> Result<Vec<FoundEntity>, Error> {
        let state = self.record(Call::FindEntities(kind))?;
        Ok(state
            .entities
            .iter()
            .filter(|e| e.entity.kind == kind)
            .cloned()
            .collect())
    }

    async fn find_vm_by_uuid(&self, uuid: &str) -> Result<Option<FoundEntity>, Error> {
        let state = self.record(Call::FindVmByUuid(uuid.into()))?;
        Ok(state.uuid_targets.get(uuid).cloned())
    }

    async fn power_on(&self, vm: &EntityRef) -> Result<TaskRef, Error> {
        self.start_task(TaskAction::PowerOn, Call::PowerOn(vm.clone()))
    }

    async fn power_off(&self, vm: &EntityRef) -> Result<TaskRef, Error> {
        self.start_task(TaskAction::PowerOff, Call::PowerOff(vm.clone()))
    }

    async fn reset(&self, vm: &EntityRef) -> Result<TaskRef, Error> {
        self.start_task(TaskAction::Reset, Call::Reset(vm.clone()))
    }

    async fn shutdown_guest(&self, vm: &EntityRef) -> Result<Option<TaskRef>, Error> {
        let mut state = self.record(Call::ShutdownGuest(vm.clone()))?;
        if !state.shutdown_returns_task {
            return Ok(None);
        }
        let states = state
            .outcomes
            .get(&TaskAction::ShutdownGuest)
            .cloned()
            .unwrap_or_default();
        Ok(Some(Self::new_task(&mut state, states)))
    }

    async fn reboot_guest(&self, vm: &EntityRef) -> Result<(), Error> {
        let mut state = self.record(Call::RebootGuest(vm.clone()))?;
        match state.reboot_errors.pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn power_state(&self, vm: &EntityRef) -> Result<PowerState, Error> {
        let mut state = self.record(Call::PowerState(vm.clone()))?;
        Ok(vm_mut(&mut state, vm)?.power.next())
    }

    async fn tools_running_status(&self, vm: &EntityRef) -> Result<ToolsRunningStatus, Error> {
        let mut state = self.record(Call::ToolsRunningStatus(vm.clone()))?;
        Ok(vm_mut(&mut state, vm)?.tools.next())
    }

    async fn guest_state(&self, vm: &EntityRef) -> Result<GuestState, Error> {
        let mut state = self.record(Call::GuestState(vm.clone()))?;
        Ok(vm_mut(&mut state, vm)?.guest.next())
    }

    async fn vm_uuid(&self, vm: &EntityRef) -> Result<String, Error> {
        self.check_session()?;
        let mut state = self.lock();
        Ok(vm_mut(&mut state, vm)?.uuid.clone())
    }

    async fn virtual_disks(&self, vm: &EntityRef) -> Result<Vec<VirtualDisk>, Error> {
        self.check_session()?;
        let mut state = self.lock();
        Ok(vm_mut(&mut state, vm)?.disks.clone())
    }

    async fn annotation(&self, vm: &EntityRef) -> Result<String, Error> {
        self.check_session()?;
        let mut state = self.lock();
        Ok(vm_mut(&mut state, vm)?.annotation.clone())
    }

    async fn host_in_maintenance_mode(&self, host_ref: &EntityRef) -> Result<bool, Error> {
        self.check_session()?;
        let state = self.lock();
        Ok(host(&state, host_ref)?.in_maintenance_mode)
    }

    async fn host_resource_pool(&self, host_ref: &EntityRef) -> Result<EntityRef, Error> {
        self.check_session()?;
        let state = self.lock();
        Ok(host(&state, host_ref)?.pool.clone())
    }

    async fn clone_vm(
        &self,
        template: &EntityRef,
        folder: &EntityRef,
        name: &str,
        spec: &CloneSpec,
    ) -> Result<TaskRef, Error> {
        if let Some(error) = self.lock().clone_error.take() {
            return Err(error);
        }
        self.start_task(
            TaskAction::Clone,
            Call::CloneVm {
                template: template.clone(),
                folder: folder.clone(),
                name: name.into(),
                spec: spec.clone(),
            },
        )
    }

    async fn reconfigure(&self, vm: &EntityRef, spec: &ConfigSpec) -> Result<TaskRef, Error> {
        if let Some(annotation) = &spec.annotation {
            let mut state = self.lock();
            vm_mut(&mut state, vm)?.annotation.clone_from(annotation);
        }
        self.start_task(
            TaskAction::Reconfigure,
            Call::Reconfigure {
                vm: vm.clone(),
                spec: spec.clone(),
            },
        )
    }

    async fn destroy(&self, vm: &EntityRef) -> Result<TaskRef, Error> {
        self.start_task(TaskAction::Destroy, Call::Destroy(vm.clone()))
    }

    async fn available_fields(&self, _entity: &EntityRef) -> Result<Vec<CustomFieldDef>, Error> {
        self.check_session()?;
        Ok(self.lock().fields.clone())
    }

    async fn custom_values(&self, entity: &EntityRef) -> Result<Vec<CustomFieldValue>, Error> {
        self.check_session()?;
        let state = self.lock();
        let mut values: Vec<CustomFieldValue> = state
            .values
            .iter()
            .filter(|((id, _), _)| *id == entity.id)
            .map(|((_, key), value)| CustomFieldValue {
                key: *key,
                value: value.clone(),
            })
            .collect();
        values.sort_by_key(|v| v.key);
        Ok(values)
    }

    async fn define_field(&self, name: &str, _kind: EntityKind) -> Result<CustomFieldDef, Error> {
        let mut state = self.record(Call::DefineField(name.into()))?;
        if state.fields.iter().any(|f| f.name == name) {
            return Err(Error::DuplicateName { name: name.into() });
        }
        let def = CustomFieldDef {
            key: state.next_field_key,
            name: name.into(),
        };
        state.next_field_key += 1;
        state.fields.push(def.clone());
        Ok(def)
    }

    async fn set_custom_field(
        &self,
        entity: &EntityRef,
        key: i32,
        value: &str,
    ) -> Result<(), Error> {
        let mut state = self.record(Call::SetCustomField {
            entity: entity.clone(),
            key,
            value: value.into(),
        })?;
        state.values.insert((entity.id.clone(), key), value.into());
        Ok(())
    }

    async fn create_folder(&self, parent: &EntityRef, name: &str) -> Result<EntityRef, Error> {
        let mut state = self.record(Call::CreateFolder {
            parent: parent.clone(),
            name: name.into(),
        })?;
        if let Some(error) = state.create_folder_error.take() {
            return Err(error);
        }
        state.next_folder += 1;
        let folder = EntityRef::new(EntityKind::Folder, format!("group-v{}", state.next_folder));
        state.entities.push(FoundEntity {
            name: name.into(),
            entity: folder.clone(),
        });
        Ok(folder)
    }

    async fn move_into_folder(
        &self,
        folder: &EntityRef,
        vms: &[EntityRef],
    ) -> Result<TaskRef, Error> {
        self.start_task(
            TaskAction::MoveIntoFolder,
            Call::MoveIntoFolder {
                folder: folder.clone(),
                vms: vms.to_vec(),
            },
        )
    }

    async fn process_manager(&self) -> Result<Arc<dyn GuestProcessManager>, Error> {
        self.check_session()?;
        Ok(Arc::new(self.clone()))
    }

    async fn file_manager(&self) -> Result<Arc<dyn GuestFileManager>, Error> {
        self.check_session()?;
        Ok(Arc::new(self.clone()))
    }
}

#[async_trait]
impl GuestProcessManager for FakeControlPlane {
    async fn start_program(
        &self,
        _vm: &EntityRef,
        _auth: &GuestCredentials,
        spec: &ProgramSpec,
    ) -> Result<GuestProcessId, Error> {
        let mut state = self.record(Call::StartProgram(spec.clone()))?;
        if let Some(error) = state.launch_error.take() {
            return Err(error);
        }
        Ok(GuestProcessId(state.launch_pid))
    }

    async fn list_processes(
        &self,
        _vm: &EntityRef,
        _auth: &GuestCredentials,
        pids: &[GuestProcessId],
    ) -> Result<Vec<GuestProcessInfo>, Error> {
        let mut state = self.record(Call::ListProcesses(pids.to_vec()))?;
        let pid = pids.first().copied().unwrap_or(GuestProcessId(state.launch_pid));
        Ok(match state.processes.as_mut() {
            Some(script) => script.next(),
            None => vec![GuestProcessInfo {
                pid,
                exit_code: Some(0),
            }],
        })
    }
}

#[async_trait]
impl GuestFileManager for FakeControlPlane {
    async fn initiate_file_transfer_from_guest(
        &self,
        _vm: &EntityRef,
        _auth: &GuestCredentials,
        guest_path: &str,
    ) -> Result<Option<Url>, Error> {
        let state = self.record(Call::InitiateFileTransfer(guest_path.into()))?;
        Ok(state.download_url.clone())
    }
}

// ── FakeConnector ───────────────────────────────────────────────────

/// Connector that hands out the same [`FakeControlPlane`] on every login.
#[derive(Clone, Default)]
pub struct FakeConnector {
    plane: FakeControlPlane,
    connects: Arc<AtomicUsize>,
    refuse: Arc<Mutex<Option<String>>>,
}

impl FakeConnector {
    pub fn new(plane: FakeControlPlane) -> Self {
        Self {
            plane,
            connects: Arc::new(AtomicUsize::new(0)),
            refuse: Arc::new(Mutex::new(None)),
        }
    }

    pub fn plane(&self) -> &FakeControlPlane {
        &self.plane
    }

    /// Number of successful logins so far.
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Refuse every subsequent login with `reason`.
    pub fn refuse_logins(&self, reason: &str) {
        *self.refuse.lock().expect("refuse lock poisoned") = Some(reason.into());
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(
        &self,
        endpoint: &Endpoint,
        _credentials: &Credentials,
    ) -> Result<Arc<dyn ControlPlane>, Error> {
        let refused = self.refuse.lock().expect("refuse lock poisoned").clone();
        if let Some(reason) = refused {
            return Err(Error::Connect {
                endpoint: endpoint.to_string(),
                reason,
            });
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(self.plane.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_repeats_last_value() {
        let mut script = Script::sequence([1, 2, 3]);
        assert_eq!(script.next(), 1);
        assert_eq!(script.next(), 2);
        assert_eq!(script.next(), 3);
        assert_eq!(script.next(), 3);
    }

    #[test]
    fn script_after_switches_once() {
        let mut script = Script::after('a', 2, 'b');
        assert_eq!(script.next(), 'a');
        assert_eq!(script.next(), 'a');
        assert_eq!(script.next(), 'b');
        assert_eq!(script.next(), 'b');
    }

    #[test]
    #[should_panic(expected = "unknown fake VM")]
    fn editing_unknown_vm_panics() {
        let plane = FakeControlPlane::new();
        plane.with_vm("vm-404", |_| {});
    }

    #[tokio::test]
    async fn expired_session_fails_exactly_n_calls() {
        let plane = FakeControlPlane::new();
        let vm = plane.add_vm("web-01", "vm-1");
        plane.expire_session(2);

        assert!(matches!(plane.power_state(&vm).await, Err(Error::SessionExpired)));
        assert!(matches!(plane.power_state(&vm).await, Err(Error::SessionExpired)));
        assert_eq!(
            plane.power_state(&vm).await.ok(),
            Some(PowerState::PoweredOff)
        );
    }

    #[tokio::test]
    async fn shutdown_without_task_quirk() {
        let plane = FakeControlPlane::new();
        let vm = plane.add_vm("web-01", "vm-1");
        plane.set_shutdown_returns_task(false);

        assert_eq!(plane.shutdown_guest(&vm).await.ok(), Some(None));
        assert_eq!(plane.calls(), vec![Call::ShutdownGuest(vm)]);
    }
}
