//! Reconstruction of a [`VirtualMachine`] from a `showvminfo --machinereadable`
//! dump.
//!
//! The dump flattens repeated structures into suffixed keys:
//! `storagecontrollername<i>` for controllers, `"<ctl>-<port>-<device>"` for
//! attachments, `nic<i>` for adapters and `SnapshotName-1-1...` for the
//! snapshot chain. Each pass below knows one of these conventions.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::ValueMap;
use crate::config::schema::{
    BootDevice, Disk, DriveType, NetworkMode, Nic, NicType, SharingMode, Snapshot,
    StorageController, StorageControllerAttachment, StorageControllerType, VirtualMachine,
    VirtualMachineSpec, VmState,
};
use crate::error::{Error, Result};
use crate::utils::paths::{group_from_settings_file, settings_file};

/// Highest controller / NIC index scanned (exclusive).
pub const MAX_RECORDS: usize = 20;

/// Value marking an empty attachment slot.
const EMPTY_SLOT: &str = "none";

/// Number of boot slots a machine has.
const BOOT_SLOTS: usize = 4;

fn required_str<'a>(m: &'a ValueMap, key: &'static str) -> Result<&'a str> {
    m.get_str(key).ok_or_else(|| Error::Decode {
        what: "machine info",
        message: format!("missing string field {key}"),
    })
}

fn required_int(m: &ValueMap, key: &'static str) -> Result<i64> {
    m.get_int(key).ok_or_else(|| Error::Decode {
        what: "machine info",
        message: format!("missing integer field {key}"),
    })
}

fn to_u32(key: &'static str, v: i64) -> Result<u32> {
    u32::try_from(v).map_err(|_| Error::Decode {
        what: "machine info",
        message: format!("{key} out of range: {v}"),
    })
}

/// Build a machine from a decoded dump. `base_path` is used to recover the
/// group from the settings file location.
pub fn decode_vm(m: &ValueMap, base_path: &Path) -> Result<VirtualMachine> {
    let uuid = required_str(m, "UUID")?.to_string();
    let name = required_str(m, "name")?.to_string();
    let cfg_file = PathBuf::from(required_str(m, "CfgFile")?);
    let cpus = to_u32("cpus", required_int(m, "cpus")?)?;
    let memory_mb = to_u32("memory", required_int(m, "memory")?)?;

    let group = group_from_settings_file(base_path, &cfg_file);
    if cfg_file != settings_file(base_path, group.as_deref(), &name) {
        warn!(cfg_file = %cfg_file.display(), vm = %name, "settings file is outside the expected layout");
    }

    let state = m.get_str("VMState").and_then(|s| {
        let state = VmState::parse(s);
        if state.is_none() {
            debug!(state = s, "unrecognised VM state");
        }
        state
    });

    let (storage_controllers, disks) = decode_storage(m);
    let (snapshots, current_snapshot) = decode_snapshots(m);

    Ok(VirtualMachine {
        uuid: Some(uuid),
        spec: VirtualMachineSpec {
            name,
            group,
            cpus,
            memory_mb,
            os_type: m.get_str("ostype").unwrap_or_default().to_string(),
            disks,
            storage_controllers,
            nics: decode_nics(m),
            boot: decode_boot_order(m),
            drag_and_drop: Some(decode_sharing(m, "draganddrop")),
            clipboard: Some(decode_sharing(m, "clipboard")),
        },
        state,
        snapshots,
        current_snapshot,
    })
}

fn decode_sharing(m: &ValueMap, key: &str) -> SharingMode {
    m.get_str(key).and_then(SharingMode::parse).unwrap_or_default()
}

fn nesting_suffix(depth: usize) -> String {
    "-1".repeat(depth)
}

/// Suffix addressing the node named by `CurrentSnapshotNode`: one `-1` per digit.
fn node_suffix(node: &str) -> String {
    node.chars().filter(char::is_ascii_digit).map(|_| "-1").collect()
}

/// Walk `SnapshotName`, `SnapshotName-1`, `SnapshotName-1-1`, ... until a
/// level is missing, and resolve the current snapshot.
pub fn decode_snapshots(m: &ValueMap) -> (Vec<Snapshot>, Option<Snapshot>) {
    let mut snapshots = Vec::new();
    let mut depth = 0;

    loop {
        let suffix = nesting_suffix(depth);
        let Some(name) = m.get_str(&format!("SnapshotName{suffix}")) else {
            break;
        };
        snapshots.push(Snapshot {
            name: name.to_string(),
            description: m
                .get_str(&format!("SnapshotDescription{suffix}"))
                .unwrap_or_default()
                .to_string(),
        });
        depth += 1;
    }

    let current = m.get_str("CurrentSnapshotName").map(|name| {
        let description = m
            .get_str("CurrentSnapshotNode")
            .and_then(|node| m.get_str(&format!("SnapshotDescription{}", node_suffix(node))))
            .unwrap_or_default();
        Snapshot {
            name: name.to_string(),
            description: description.to_string(),
        }
    });

    (snapshots, current)
}

/// Controllers from `storagecontroller*<i>` and the media attached to them.
pub fn decode_storage(m: &ValueMap) -> (Vec<StorageController>, Vec<Disk>) {
    let mut controllers = Vec::new();
    let mut disks = Vec::new();

    for i in 0..MAX_RECORDS {
        let Some(name) = m.get_str(&format!("storagecontrollername{i}")) else {
            break;
        };

        let type_key = format!("storagecontrollertype{i}");
        let controller_type = match m.get_str(&type_key).and_then(StorageControllerType::from_vbox) {
            Some(t) => t,
            None => {
                warn!(controller = name, value = ?m.get(&type_key), "unknown storage controller type, assuming SATA");
                StorageControllerType::Sata
            }
        };

        let number = |key: String| {
            m.get_number(&key)
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or_default()
        };

        let sc = StorageController {
            name: Some(name.to_string()),
            controller_type,
            instance: number(format!("storagecontrollerinstance{i}")),
            port_count: number(format!("storagecontrollerportcount{i}")),
            bootable: m
                .get_str(&format!("storagecontrollerbootable{i}"))
                .map(|b| b == "on"),
        };

        // IDE ports carry a master and a slave device
        let devices = if controller_type == StorageControllerType::Ide { 2 } else { 1 };
        for port in 0..sc.port_count {
            for device in 0..devices {
                let Some(path) = m.get_str(&format!("{name}-{port}-{device}")) else {
                    continue;
                };
                if path == EMPTY_SLOT {
                    continue;
                }
                disks.push(Disk {
                    path: PathBuf::from(path),
                    uuid: m
                        .get_str(&format!("{name}-ImageUUID-{port}-{device}"))
                        .map(str::to_string),
                    controller: StorageControllerAttachment {
                        name: Some(name.to_string()),
                        controller_type: Some(controller_type),
                        port,
                        device,
                    },
                    drive_type: Some(if path.ends_with(".iso") {
                        DriveType::Dvd
                    } else {
                        DriveType::Hdd
                    }),
                    ..Disk::default()
                });
            }
        }

        controllers.push(sc);
    }

    (controllers, disks)
}

/// Adapters from `nic<i>`; `none` slots are skipped, a missing key ends the scan.
pub fn decode_nics(m: &ValueMap) -> Vec<Nic> {
    let mut nics = Vec::new();

    for i in 1..MAX_RECORDS {
        let Some(mode) = m.get_str(&format!("nic{i}")) else {
            break;
        };
        if mode == EMPTY_SLOT {
            continue;
        }
        let Some(mode) = NetworkMode::parse(mode) else {
            warn!(nic = i, mode, "unknown network mode, skipping adapter");
            continue;
        };

        let network_key = match mode {
            NetworkMode::HostOnly => Some(format!("hostonlyadapter{i}")),
            NetworkMode::Bridged => Some(format!("bridgeadapter{i}")),
            NetworkMode::Internal => Some(format!("intnet{i}")),
            NetworkMode::NatNetwork => Some(format!("natnet{i}")),
            _ => None,
        };

        nics.push(Nic {
            index: i as u32,
            mode: Some(mode),
            network_name: network_key.and_then(|k| m.get_str(&k)).map(str::to_string),
            nic_type: m.get_str(&format!("nictype{i}")).and_then(NicType::parse),
            cable_connected: m.get_str(&format!("cableconnected{i}")).map(|v| v == "on"),
            speed_kbps: m
                .get_number(&format!("nicspeed{i}"))
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or_default(),
            boot_priority: m
                .get_number(&format!("nicbootprio{i}"))
                .and_then(|v| u32::try_from(v).ok())
                .filter(|p| *p > 0),
            mac: m.get_str(&format!("macaddress{i}")).map(str::to_string),
            port_forwarding: Vec::new(),
        });
    }

    nics
}

/// Boot order from `boot1..boot4`, leaving out empty slots.
pub fn decode_boot_order(m: &ValueMap) -> Vec<BootDevice> {
    (1..=BOOT_SLOTS)
        .filter_map(|i| m.get_str(&format!("boot{i}")))
        .filter_map(BootDevice::parse)
        .filter(|b| *b != BootDevice::None)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::decode_machine_readable;

    const SHOW_VM_INFO: &str = r#"
name="testvm1"
groups="/tess,/tess2"
ostype="Other Linux (32-bit)"
UUID="6aa44e71-71c6-4e68-a61f-f69e133ecffa"
CfgFile="/Users/me/VirtualBox VMs/tess/testvm1/testvm1.vbox"
memory=128
vram=8
cpus=1
boot1="floppy"
boot2="dvd"
boot3="disk"
boot4="none"
VMState="poweroff"
storagecontrollername0="SATA1"
storagecontrollertype0="IntelAhci"
storagecontrollerinstance0="0"
storagecontrollermaxportcount0="30"
storagecontrollerportcount0="30"
storagecontrollerbootable0="on"
"SATA1-0-0"="/Users/me/VirtualBox VMs/tess/testvm1/disk1.vdi"
"SATA1-ImageUUID-0-0"="38f0cf9d-6c60-4f59-ba0b-cd1dfb5329d6"
"SATA1-1-0"="none"
"SATA1-2-0"="none"
"SATA1-29-0"="none"
natnet1="nat"
macaddress1="080027220665"
cableconnected1="on"
nic1="nat"
nictype1="Am79C973"
nicspeed1="0"
nic2="none"
nic3="none"
clipboard="disabled"
draganddrop="bidirectional"
"#;

    fn decode(text: &str) -> Result<VirtualMachine> {
        let m = decode_machine_readable(text)?;
        decode_vm(&m, Path::new("/Users/me/VirtualBox VMs"))
    }

    #[test]
    fn decodes_identity_and_typed_numbers() {
        let vm = decode(SHOW_VM_INFO).unwrap();
        assert_eq!(vm.uuid.as_deref(), Some("6aa44e71-71c6-4e68-a61f-f69e133ecffa"));
        assert_eq!(vm.spec.name, "testvm1");
        assert_eq!(vm.spec.group.as_deref(), Some("/tess"));
        assert_eq!(vm.spec.cpus, 1);
        assert_eq!(vm.spec.memory_mb, 128);
        assert_eq!(vm.spec.os_type, "Other Linux (32-bit)");
        assert_eq!(vm.state, Some(VmState::Poweroff));
        assert_eq!(vm.spec.boot, vec![BootDevice::Floppy, BootDevice::Dvd, BootDevice::Disk]);
        assert_eq!(vm.spec.drag_and_drop, Some(SharingMode::Bidirectional));
        assert_eq!(vm.spec.clipboard, Some(SharingMode::Disabled));
    }

    #[test]
    fn single_sata_disk_at_port_zero() {
        let vm = decode(SHOW_VM_INFO).unwrap();
        assert_eq!(vm.spec.storage_controllers.len(), 1);
        let sc = &vm.spec.storage_controllers[0];
        assert_eq!(sc.name(), "SATA1");
        assert_eq!(sc.controller_type, StorageControllerType::Sata);
        assert_eq!(sc.port_count, 30);
        assert_eq!(sc.bootable, Some(true));

        assert_eq!(vm.spec.disks.len(), 1);
        let disk = &vm.spec.disks[0];
        assert_eq!(disk.controller.name.as_deref(), Some("SATA1"));
        assert_eq!(disk.controller.port, 0);
        assert_eq!(disk.controller.device, 0);
        assert_eq!(disk.uuid.as_deref(), Some("38f0cf9d-6c60-4f59-ba0b-cd1dfb5329d6"));
        assert_eq!(disk.path, PathBuf::from("/Users/me/VirtualBox VMs/tess/testvm1/disk1.vdi"));
    }

    #[test]
    fn nat_nic_is_decoded_and_none_slots_skipped() {
        let vm = decode(SHOW_VM_INFO).unwrap();
        assert_eq!(vm.spec.nics.len(), 1);
        let nic = &vm.spec.nics[0];
        assert_eq!(nic.index, 1);
        assert_eq!(nic.mode, Some(NetworkMode::Nat));
        assert_eq!(nic.nic_type, Some(NicType::Am79C973));
        assert_eq!(nic.cable_connected, Some(true));
        assert_eq!(nic.mac.as_deref(), Some("080027220665"));
        assert_eq!(nic.network_name, None);
    }

    #[test]
    fn missing_required_field_is_fatal() {
        for key in ["UUID=", "name=", "CfgFile=", "cpus=", "memory="] {
            let text: String = SHOW_VM_INFO
                .lines()
                .filter(|l| !l.starts_with(key))
                .map(|l| format!("{l}\n"))
                .collect();
            let err = decode(&text).unwrap_err();
            assert!(matches!(err, Error::Decode { .. }), "{key}: {err:?}");
        }
    }

    #[test]
    fn quoted_cpu_count_is_not_an_integer() {
        let text = SHOW_VM_INFO.replace("cpus=1", "cpus=\"1\"");
        assert!(decode(&text).is_err());
    }

    #[test]
    fn snapshot_chain_and_current_node() {
        let text = r#"
SnapshotName="base"
SnapshotUUID="u1"
SnapshotName-1="installed"
SnapshotDescription-1="after install"
SnapshotName-1-1="configured"
SnapshotDescription-1-1="after config"
SnapshotName-1-1-1-1="orphan"
CurrentSnapshotName="installed"
CurrentSnapshotUUID="u2"
CurrentSnapshotNode="SnapshotName-1"
"#;
        let m = decode_machine_readable(text).unwrap();
        let (snapshots, current) = decode_snapshots(&m);
        let names: Vec<_> = snapshots.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["base", "installed", "configured"]);
        assert_eq!(snapshots[0].description, "");
        assert_eq!(
            current,
            Some(Snapshot {
                name: "installed".into(),
                description: "after install".into()
            })
        );
    }

    #[test]
    fn no_snapshots() {
        let m = decode_machine_readable("name=\"x\"\n").unwrap();
        assert_eq!(decode_snapshots(&m), (vec![], None));
    }

    #[test]
    fn controller_scan_stops_at_first_gap() {
        let text = r#"
storagecontrollername0="IDE1"
storagecontrollertype0="PIIX4"
storagecontrollerportcount0="2"
"IDE1-0-0"="/vms/a.vdi"
"IDE1-0-1"="/vms/b.vdi"
"IDE1-1-0"="/vms/c.iso"
"IDE1-1-1"="none"
storagecontrollername2="SATA1"
storagecontrollertype2="IntelAhci"
storagecontrollerportcount2="1"
"SATA1-0-0"="/vms/d.vdi"
"#;
        let m = decode_machine_readable(text).unwrap();
        let (controllers, disks) = decode_storage(&m);
        assert_eq!(controllers.len(), 1);
        assert_eq!(controllers[0].controller_type, StorageControllerType::Ide);

        let slots: Vec<_> = disks.iter().map(|d| (d.controller.port, d.controller.device)).collect();
        assert_eq!(slots, vec![(0, 0), (0, 1), (1, 0)]);
        assert_eq!(disks[2].drive_type, Some(DriveType::Dvd));
    }

    #[test]
    fn attached_networks_by_mode() {
        let text = r#"
nic1="hostonly"
hostonlyadapter1="vboxnet0"
nic2="bridged"
bridgeadapter2="en0"
nic3="intnet"
intnet3="lab"
nic4="natnetwork"
natnet4="NatNetwork"
nicbootprio4="2"
"#;
        let m = decode_machine_readable(text).unwrap();
        let nics = decode_nics(&m);
        let names: Vec<_> = nics.iter().map(|n| n.network_name.as_deref().unwrap()).collect();
        assert_eq!(names, vec!["vboxnet0", "en0", "lab", "NatNetwork"]);
        assert_eq!(nics[3].boot_priority, Some(2));
        assert_eq!(nics[3].index, 4);
    }
}
