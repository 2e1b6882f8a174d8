// vmsteward-api: control-plane capability traits and wire types for vSphere automation

pub mod error;
pub mod file_transfer;
pub mod model;
pub mod plane;
pub mod transport;

#[cfg(feature = "fake")]
pub mod fake;

pub use error::Error;
pub use file_transfer::{FetchedFile, FileTransferClient};
pub use model::{
    CloneSpec, ConfigSpec, Credentials, CustomFieldDef, CustomFieldValue, DeviceChange, Endpoint,
    EntityKind, EntityRef, FoundEntity, GuestCredentials, GuestProcessId, GuestProcessInfo,
    GuestState, NicSpec, PowerState, ProgramSpec, RelocateSpec, TaskRef, TaskState,
    ToolsRunningStatus, VirtualDisk,
};
pub use plane::{Connector, ControlPlane, GuestFileManager, GuestProcessManager};
pub use transport::{TlsMode, TransportConfig};
