//! VM specification schema definitions

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Storage bus of a controller
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageControllerType {
    #[serde(rename = "IDE")]
    Ide,
    #[serde(rename = "SATA")]
    Sata,
    #[serde(rename = "SCSI")]
    Scsi,
    #[serde(rename = "NVMe")]
    NVMe,
}

impl StorageControllerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ide => "IDE",
            Self::Sata => "SATA",
            Self::Scsi => "SCSI",
            Self::NVMe => "NVMe",
        }
    }

    /// Value for `storagectl --add`
    pub fn bus(&self) -> &'static str {
        match self {
            Self::Ide => "ide",
            Self::Sata => "sata",
            Self::Scsi => "scsi",
            Self::NVMe => "pcie",
        }
    }

    /// Map a `storagecontrollertype<i>` value (chipset or bus name) back to a bus
    pub fn from_vbox(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "ide" | "piix3" | "piix4" | "ich6" => Some(Self::Ide),
            "sata" | "intelahci" => Some(Self::Sata),
            "scsi" | "lsilogic" | "buslogic" | "lsilogicsas" | "sas" => Some(Self::Scsi),
            "nvme" | "pcie" => Some(Self::NVMe),
            _ => None,
        }
    }
}

impl fmt::Display for StorageControllerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Disk image format
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum DiskFormat {
    #[default]
    Vdi,
    Vmdk,
    Vhd,
}

impl DiskFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vdi => "VDI",
            Self::Vmdk => "VMDK",
            Self::Vhd => "VHD",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "VDI" => Some(Self::Vdi),
            "VMDK" => Some(Self::Vmdk),
            "VHD" => Some(Self::Vhd),
            _ => None,
        }
    }
}

/// Kind of drive a medium is attached as
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DriveType {
    #[default]
    #[serde(rename = "hdd")]
    Hdd,
    #[serde(rename = "dvddrive")]
    Dvd,
    #[serde(rename = "fdd")]
    Floppy,
}

impl DriveType {
    /// Value for `storageattach --type`
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hdd => "hdd",
            Self::Dvd => "dvddrive",
            Self::Floppy => "fdd",
        }
    }

    /// Medium class for `showmediuminfo`
    pub fn for_show_medium(&self) -> &'static str {
        match self {
            Self::Hdd => "disk",
            Self::Dvd => "dvd",
            Self::Floppy => "floppy",
        }
    }
}

/// Observed machine state
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VmState {
    Poweroff,
    Running,
    Paused,
    Saved,
    Aborted,
}

impl VmState {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "poweroff" => Some(Self::Poweroff),
            "running" => Some(Self::Running),
            "paused" => Some(Self::Paused),
            "saved" => Some(Self::Saved),
            "aborted" => Some(Self::Aborted),
            _ => None,
        }
    }
}

/// Attachment mode of a network adapter
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkMode {
    #[serde(rename = "none")]
    None,
    #[serde(rename = "null")]
    Null,
    #[serde(rename = "nat")]
    Nat,
    #[serde(rename = "natnetwork")]
    NatNetwork,
    #[serde(rename = "bridged")]
    Bridged,
    #[serde(rename = "intnet")]
    Internal,
    #[serde(rename = "hostonly")]
    HostOnly,
    #[serde(rename = "generic")]
    Generic,
}

impl NetworkMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Null => "null",
            Self::Nat => "nat",
            Self::NatNetwork => "natnetwork",
            Self::Bridged => "bridged",
            Self::Internal => "intnet",
            Self::HostOnly => "hostonly",
            Self::Generic => "generic",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "none" => Some(Self::None),
            "null" => Some(Self::Null),
            "nat" => Some(Self::Nat),
            "natnetwork" => Some(Self::NatNetwork),
            "bridged" => Some(Self::Bridged),
            "intnet" => Some(Self::Internal),
            "hostonly" => Some(Self::HostOnly),
            "generic" => Some(Self::Generic),
            _ => None,
        }
    }

    /// Flag prefix naming the attached network, for modes that take one
    pub fn adapter_flag(&self) -> Option<&'static str> {
        match self {
            Self::Bridged => Some("--bridgeadapter"),
            Self::HostOnly => Some("--hostonlyadapter"),
            Self::Internal => Some("--intnet"),
            Self::NatNetwork => Some("--nat-network"),
            _ => None,
        }
    }
}

impl fmt::Display for NetworkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Emulated network chip
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NicType {
    #[serde(rename = "Am79C970A")]
    Am79C970A,
    #[serde(rename = "Am79C973")]
    Am79C973,
    #[default]
    #[serde(rename = "82540EM")]
    I82540EM,
    #[serde(rename = "82543GC")]
    I82543GC,
    #[serde(rename = "82545EM")]
    I82545EM,
    #[serde(rename = "virtio")]
    Virtio,
}

impl NicType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Am79C970A => "Am79C970A",
            Self::Am79C973 => "Am79C973",
            Self::I82540EM => "82540EM",
            Self::I82543GC => "82543GC",
            Self::I82545EM => "82545EM",
            Self::Virtio => "virtio",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Am79C970A" => Some(Self::Am79C970A),
            "Am79C973" => Some(Self::Am79C973),
            "82540EM" => Some(Self::I82540EM),
            "82543GC" => Some(Self::I82543GC),
            "82545EM" => Some(Self::I82545EM),
            "virtio" => Some(Self::Virtio),
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum NetProtocol {
    #[default]
    Tcp,
    Udp,
}

impl NetProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        }
    }
}

/// Entry of the firmware boot order
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BootDevice {
    None,
    Floppy,
    Dvd,
    Disk,
    Net,
}

impl BootDevice {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Floppy => "floppy",
            Self::Dvd => "dvd",
            Self::Disk => "disk",
            Self::Net => "net",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "none" => Some(Self::None),
            "floppy" => Some(Self::Floppy),
            "dvd" => Some(Self::Dvd),
            "disk" => Some(Self::Disk),
            "net" => Some(Self::Net),
            _ => None,
        }
    }
}

/// Drag-and-drop / shared clipboard direction
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SharingMode {
    #[default]
    Disabled,
    HostToGuest,
    GuestToHost,
    Bidirectional,
}

impl SharingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::HostToGuest => "hosttoguest",
            Self::GuestToHost => "guesttohost",
            Self::Bidirectional => "bidirectional",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "disabled" => Some(Self::Disabled),
            "hosttoguest" => Some(Self::HostToGuest),
            "guesttohost" => Some(Self::GuestToHost),
            "bidirectional" => Some(Self::Bidirectional),
            _ => None,
        }
    }
}

/// Where a disk plugs into a storage bus
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct StorageControllerAttachment {
    /// Name of the target controller
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub controller_type: Option<StorageControllerType>,
    pub port: u32,
    pub device: u32,
}

/// Disk declaration
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Disk {
    pub path: PathBuf, // may be relative to the VM directory until defaulted
    pub size_mb: u64,
    pub format: Option<DiskFormat>,
    pub uuid: Option<String>,
    pub controller: StorageControllerAttachment,
    #[serde(rename = "type")]
    pub drive_type: Option<DriveType>,
    pub non_rotational: bool,
    pub auto_discard: bool,
}

impl Disk {
    /// Identity used to address the medium
    pub fn uuid_or_path(&self) -> String {
        match &self.uuid {
            Some(uuid) if !uuid.is_empty() => uuid.clone(),
            _ => self.path.to_string_lossy().into_owned(),
        }
    }
}

/// Storage controller declaration
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StorageController {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub controller_type: StorageControllerType,
    #[serde(default)]
    pub instance: u32,
    #[serde(default)]
    pub port_count: u32,
    #[serde(default)]
    pub bootable: Option<bool>,
}

impl StorageController {
    pub fn new(name: impl Into<String>, controller_type: StorageControllerType) -> Self {
        Self {
            name: Some(name.into()),
            controller_type,
            instance: 0,
            port_count: 0,
            bootable: None,
        }
    }

    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or_default()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// NAT port forwarding rule
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct PortForwarding {
    pub name: String,
    pub protocol: NetProtocol,
    pub host_ip: String,
    pub host_port: u16,
    pub guest_ip: String,
    pub guest_port: u16,
}

impl PortForwarding {
    /// Rule in the `name,proto,hostip,hostport,guestip,guestport` form
    pub fn rule(&self) -> String {
        format!(
            "{},{},{},{},{},{}",
            self.name,
            self.protocol.as_str(),
            self.host_ip,
            self.host_port,
            self.guest_ip,
            self.guest_port
        )
    }
}

/// Network adapter declaration
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Nic {
    /// 1-based slot, re-derived from declaration order on every defaulting pass
    pub index: u32,
    pub mode: Option<NetworkMode>,
    /// Host network to attach to; for host-only and bridged this is the host device
    pub network_name: Option<String>,
    #[serde(rename = "type")]
    pub nic_type: Option<NicType>,
    pub cable_connected: Option<bool>,
    pub speed_kbps: u32,
    pub boot_priority: Option<u32>,
    pub mac: Option<String>,
    pub port_forwarding: Vec<PortForwarding>,
}

/// Host-visible network discovered by enumeration
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Network {
    pub name: String,
    pub guid: String,
    pub hw_address: String,
    pub device_name: String,
    pub mode: NetworkMode,
}

impl Network {
    pub fn new(name: impl Into<String>, mode: NetworkMode) -> Self {
        Self {
            name: name.into(),
            guid: String::new(),
            hw_address: String::new(),
            device_name: String::new(),
            mode,
        }
    }
}

/// Desired machine configuration
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct VirtualMachineSpec {
    /// Identifies the VM and names its directory under the base path
    pub name: String,
    /// `/`-delimited group path, e.g. `/example`
    pub group: Option<String>,
    pub cpus: u32,
    pub memory_mb: u32,
    pub os_type: String,
    pub disks: Vec<Disk>,
    pub storage_controllers: Vec<StorageController>,
    pub nics: Vec<Nic>,
    pub boot: Vec<BootDevice>,
    pub drag_and_drop: Option<SharingMode>,
    pub clipboard: Option<SharingMode>,
}

/// A machine: identity, spec and observed state
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct VirtualMachine {
    /// Populated only after a successful read-back
    pub uuid: Option<String>,
    pub spec: VirtualMachineSpec,
    pub state: Option<VmState>,
    pub snapshots: Vec<Snapshot>,
    pub current_snapshot: Option<Snapshot>,
}

impl VirtualMachine {
    pub fn new(spec: VirtualMachineSpec) -> Self {
        Self {
            spec,
            ..Self::default()
        }
    }

    /// UUID when known, otherwise the name
    pub fn uuid_or_name(&self) -> &str {
        match &self.uuid {
            Some(uuid) if !uuid.is_empty() => uuid,
            _ => &self.spec.name,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct DhcpServer {
    pub network_name: String,
    pub ip_address: String,
    pub network_mask: String,
    pub lower_ip_address: String,
    pub upper_ip_address: String,
    pub enabled: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct OsType {
    pub id: String,
    pub description: String,
    pub family_id: String,
    pub family_description: String,
    pub bit64: bool,
}
