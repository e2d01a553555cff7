//! Spec defaulting and validation.
//!
//! [`apply_defaults`] is pure: it reads only the spec, the base path and an
//! already synced [`NetworkInventory`]. Storage problems are collected over
//! the whole pass and reported together; NIC defaulting runs last and its
//! failure ends the pass on its own.

use std::path::Path;

use tracing::{debug, instrument, warn};

use crate::config::schema::{
    DiskFormat, DriveType, StorageController, StorageControllerType, VirtualMachine,
};
use crate::error::{Result, ValidationErrors};
use crate::runner::CommandRunner;
use crate::utils::paths::{resolve_under_root, vm_base_dir};
use crate::vm::disk::default_controller_name;
use crate::vm::manager::VBox;
use crate::vm::network::{apply_nic_defaults, NetworkInventory};

/// Fill in everything a declaration leaves unset and validate the result.
///
/// - unnamed controllers become `<Type><position>`; duplicate names are errors
/// - relative disk paths move under the VM directory
/// - disks default to a VDI hard disk on `SATA1`, which is created if needed
/// - a disk naming a controller takes that controller's type
/// - every disk gets a port/device slot on its controller, in declaration order
/// - NICs get slots, modes, types and networks
pub fn apply_defaults(
    mut vm: VirtualMachine,
    base_path: &Path,
    inventory: &NetworkInventory,
) -> Result<VirtualMachine> {
    let mut verrs = ValidationErrors::new();
    let base_dir = vm_base_dir(base_path, vm.spec.group.as_deref(), &vm.spec.name);
    let spec = &mut vm.spec;

    if spec.name.trim().is_empty() {
        verrs.add("vm/name", "name must not be empty");
    }

    // explicit controllers keep declaration order and come first
    let mut controllers: Vec<StorageController> = Vec::with_capacity(spec.storage_controllers.len());
    for (i, mut ctr) in std::mem::take(&mut spec.storage_controllers).into_iter().enumerate() {
        if ctr.name().is_empty() {
            ctr.name = Some(default_controller_name(ctr.controller_type, i + 1));
        }
        if controllers.iter().any(|c| c.name() == ctr.name()) {
            verrs.add(
                format!("storagecontroller/{i}"),
                format!("duplicate storage controller name {}", ctr.name()),
            );
            continue;
        }
        controllers.push(ctr);
    }

    for disk in spec.disks.iter_mut() {
        if !disk.path.as_os_str().is_empty() && !disk.path.is_absolute() {
            disk.path = resolve_under_root(&base_dir, &disk.path);
        }
        disk.drive_type.get_or_insert(DriveType::Hdd);
        disk.format.get_or_insert(DiskFormat::default());

        let att = &mut disk.controller;
        let named = att
            .name
            .as_deref()
            .filter(|n| !n.is_empty())
            .and_then(|n| controllers.iter().find(|c| c.name() == n));
        let ctype = match named {
            Some(c) => {
                if let Some(declared) = att.controller_type.filter(|t| *t != c.controller_type) {
                    warn!(
                        controller = c.name(),
                        declared = %declared,
                        actual = %c.controller_type,
                        "disk declares a different controller type, using the controller's"
                    );
                }
                c.controller_type
            }
            None => att.controller_type.unwrap_or(StorageControllerType::Sata),
        };
        att.controller_type = Some(ctype);

        if att.name.as_deref().map_or(true, str::is_empty) {
            let name = default_controller_name(ctype, 1);
            if !controllers.iter().any(|c| c.name() == name) {
                debug!(controller = %name, "adding default storage controller");
                controllers.push(StorageController::new(name.as_str(), ctype));
            }
            att.name = Some(name);
        }
    }

    // slots are handed out per controller in disk declaration order
    let mut used = vec![0u32; controllers.len()];
    for (i, disk) in spec.disks.iter_mut().enumerate() {
        let path = format!("disk/{i}");
        if disk.path.as_os_str().is_empty() {
            verrs.add(path, "disk path is empty, an absolute or relative file path is required");
            continue;
        }

        let att = &mut disk.controller;
        let name = att.name.as_deref().unwrap_or_default();
        let Some(pos) = controllers.iter().position(|c| c.name() == name) else {
            verrs.add(path, format!("storagecontroller ref {name} did not resolve"));
            continue;
        };
        let ctr = &controllers[pos];

        let n = used[pos];
        used[pos] += 1;
        match ctr.controller_type {
            StorageControllerType::Ide => {
                att.port = n / 2;
                att.device = n % 2;
            }
            StorageControllerType::Sata => {
                att.port = n;
                att.device = 0;
            }
            other => {
                warn!(controller = name, controller_type = %other, "no slot layout for controller type, using one device per port");
                att.port = n;
                att.device = 0;
            }
        }
    }
    spec.storage_controllers = controllers;

    apply_nic_defaults(&mut spec.nics, inventory)?;

    verrs.into_result()?;
    Ok(vm)
}

impl<R: CommandRunner> VBox<R> {
    /// Sync the network inventory and default `vm`.
    ///
    /// Returns every validation problem found, or the defaulted machine.
    #[instrument(skip(self, vm), fields(vm = %vm.spec.name))]
    pub fn ensure_defaults(&mut self, vm: VirtualMachine) -> Result<VirtualMachine> {
        self.sync_networks()?;
        apply_defaults(vm, self.base_path(), self.inventory())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{
        Disk, Network, NetworkMode, Nic, StorageControllerAttachment, VirtualMachineSpec,
    };
    use crate::error::Error;
    use crate::mock::MockRunner;
    use std::path::PathBuf;

    fn inventory() -> NetworkInventory {
        let mut inv = NetworkInventory::default();
        inv.insert(Network::new("vboxnet0", NetworkMode::HostOnly));
        inv
    }

    fn disk(path: &str) -> Disk {
        Disk {
            path: PathBuf::from(path),
            size_mb: 1000,
            ..Disk::default()
        }
    }

    fn on(name: &str, ctype: Option<StorageControllerType>) -> StorageControllerAttachment {
        StorageControllerAttachment {
            name: Some(name.to_string()),
            controller_type: ctype,
            ..StorageControllerAttachment::default()
        }
    }

    /// Disk bound to an IDE controller by type only
    fn ide(path: &str) -> Disk {
        Disk {
            controller: StorageControllerAttachment {
                controller_type: Some(StorageControllerType::Ide),
                ..StorageControllerAttachment::default()
            },
            ..disk(path)
        }
    }

    fn slots(vm: &VirtualMachine) -> Vec<(u32, u32)> {
        vm.spec
            .disks
            .iter()
            .map(|d| (d.controller.port, d.controller.device))
            .collect()
    }

    fn spec() -> VirtualMachineSpec {
        VirtualMachineSpec {
            name: "vm01".into(),
            group: Some("/example".into()),
            cpus: 2,
            memory_mb: 1000,
            os_type: "Linux_64".into(),
            ..VirtualMachineSpec::default()
        }
    }

    fn defaults(spec: VirtualMachineSpec) -> Result<VirtualMachine> {
        apply_defaults(VirtualMachine::new(spec), Path::new("/vms"), &inventory())
    }

    #[test]
    fn test_default_disk_gets_sata_controller() {
        let mut s = spec();
        s.disks = vec![disk("disk1.vdi")];
        let vm = defaults(s).unwrap();

        let d = &vm.spec.disks[0];
        assert_eq!(d.path, PathBuf::from("/vms/example/vm01/disk1.vdi"));
        assert_eq!(d.drive_type, Some(DriveType::Hdd));
        assert_eq!(d.format, Some(DiskFormat::Vdi));
        assert_eq!(d.controller.name.as_deref(), Some("SATA1"));
        assert_eq!(d.controller.controller_type, Some(StorageControllerType::Sata));
        assert_eq!((d.controller.port, d.controller.device), (0, 0));

        assert_eq!(
            vm.spec.storage_controllers,
            vec![StorageController::new("SATA1", StorageControllerType::Sata)]
        );
    }

    #[test]
    fn test_absolute_paths_are_kept() {
        let mut s = spec();
        s.disks = vec![disk("/data/disk1.vdi")];
        let vm = defaults(s).unwrap();
        assert_eq!(vm.spec.disks[0].path, PathBuf::from("/data/disk1.vdi"));
    }

    #[test]
    fn test_sata_ports_follow_declaration_order() {
        let mut s = spec();
        s.disks = vec![disk("a.vdi"), disk("b.vdi"), disk("c.vdi")];
        let vm = defaults(s).unwrap();
        let slots: Vec<_> = vm
            .spec
            .disks
            .iter()
            .map(|d| (d.controller.port, d.controller.device))
            .collect();
        assert_eq!(slots, vec![(0, 0), (1, 0), (2, 0)]);
        assert_eq!(vm.spec.storage_controllers.len(), 1);
    }

    #[test]
    fn test_ide_uses_two_devices_per_port() {
        let mut s = spec();
        s.disks = (0..5).map(|i| ide(&format!("d{i}.vdi"))).collect();
        let vm = defaults(s).unwrap();
        assert_eq!(slots(&vm), vec![(0, 0), (0, 1), (1, 0), (1, 1), (2, 0)]);
        assert_eq!(
            vm.spec.storage_controllers,
            vec![StorageController::new("IDE1", StorageControllerType::Ide)]
        );
    }

    #[test]
    fn test_ide_slots_on_explicit_controller() {
        let mut s = spec();
        s.storage_controllers = vec![StorageController::new("IDE1", StorageControllerType::Ide)];
        s.disks = (0..4)
            .map(|i| Disk {
                controller: on("IDE1", None),
                ..disk(&format!("d{i}.vdi"))
            })
            .collect();
        let vm = defaults(s).unwrap();
        assert_eq!(slots(&vm), vec![(0, 0), (0, 1), (1, 0), (1, 1)]);
    }

    #[test]
    fn test_fresh_copies_get_identical_assignments() {
        let mut s = spec();
        s.disks = vec![ide("a.vdi"), disk("b.vdi"), ide("c.vdi"), ide("d.vdi"), disk("e.vdi")];
        s.nics = vec![Nic::default(), Nic::default()];

        let first = defaults(s.clone()).unwrap();
        let second = defaults(s).unwrap();
        assert_eq!(first, second);
        assert_eq!(slots(&first), vec![(0, 0), (0, 0), (0, 1), (1, 0), (1, 0)]);
    }

    #[test]
    fn test_disk_inherits_type_from_explicit_controller() {
        let mut s = spec();
        s.storage_controllers = vec![StorageController::new("boot", StorageControllerType::Ide)];
        s.disks = vec![Disk {
            controller: on("boot", None),
            ..disk("a.vdi")
        }];
        let vm = defaults(s).unwrap();
        assert_eq!(vm.spec.disks[0].controller.controller_type, Some(StorageControllerType::Ide));
        assert_eq!(vm.spec.storage_controllers.len(), 1);
    }

    #[test]
    fn test_named_controller_overrides_declared_type() {
        let mut s = spec();
        s.storage_controllers = vec![StorageController::new("SATA1", StorageControllerType::Sata)];
        s.disks = vec![
            Disk {
                controller: on("SATA1", Some(StorageControllerType::Ide)),
                ..disk("a.vdi")
            },
            disk("b.vdi"),
        ];
        let vm = defaults(s).unwrap();
        let att: Vec<_> = vm
            .spec
            .disks
            .iter()
            .map(|d| (d.controller.controller_type, d.controller.port, d.controller.device))
            .collect();
        assert_eq!(
            att,
            vec![
                (Some(StorageControllerType::Sata), 0, 0),
                (Some(StorageControllerType::Sata), 1, 0),
            ]
        );
        assert_eq!(vm.spec.storage_controllers.len(), 1);
    }

    #[test]
    fn test_unnamed_explicit_controller_is_shared_with_default_disks() {
        let mut s = spec();
        s.storage_controllers = vec![StorageController {
            name: None,
            controller_type: StorageControllerType::Sata,
            instance: 0,
            port_count: 4,
            bootable: Some(true),
        }];
        s.disks = vec![disk("a.vdi"), disk("b.vdi")];
        let vm = defaults(s).unwrap();
        assert_eq!(vm.spec.storage_controllers.len(), 1);
        assert_eq!(vm.spec.storage_controllers[0].name(), "SATA1");
        assert_eq!(vm.spec.storage_controllers[0].port_count, 4);
        assert_eq!(vm.spec.disks[1].controller.port, 1);
    }

    #[test]
    fn test_controller_order_is_explicit_then_discovered() {
        let mut s = spec();
        s.storage_controllers = vec![StorageController::new("nvme", StorageControllerType::NVMe)];
        s.disks = vec![
            Disk {
                controller: StorageControllerAttachment {
                    controller_type: Some(StorageControllerType::Ide),
                    ..StorageControllerAttachment::default()
                },
                ..disk("a.vdi")
            },
            disk("b.vdi"),
            Disk {
                controller: on("nvme", None),
                ..disk("c.vdi")
            },
        ];
        let vm = defaults(s).unwrap();
        let names: Vec<_> = vm.spec.storage_controllers.iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["nvme", "IDE1", "SATA1"]);
        assert_eq!(vm.spec.disks[2].controller.port, 0);
    }

    #[test]
    fn test_errors_are_collected_across_the_pass() {
        let mut s = spec();
        s.storage_controllers = vec![
            StorageController::new("SATA1", StorageControllerType::Sata),
            StorageController::new("SATA1", StorageControllerType::Sata),
        ];
        s.disks = vec![
            disk(""),
            Disk {
                controller: on("nope", Some(StorageControllerType::Sata)),
                ..disk("b.vdi")
            },
            Disk {
                controller: on("SATA1", Some(StorageControllerType::Ide)),
                ..disk("c.vdi")
            },
            disk("d.vdi"),
        ];

        let err = defaults(s).unwrap_err();
        let verrs = err.validation().unwrap();
        assert_eq!(verrs.len(), 3, "{verrs}");
        assert!(verrs.has_path("storagecontroller/1"));
        assert!(verrs.has_path("disk/0"));
        assert!(verrs.has_path("disk/1"));
        assert!(!verrs.has_path("disk/2"));
        assert!(!verrs.has_path("disk/3"));
        assert!(err.to_string().contains("storagecontroller ref nope did not resolve"));
    }

    #[test]
    fn test_empty_name_is_rejected() {
        let mut s = spec();
        s.name = String::new();
        let err = defaults(s).unwrap_err();
        assert!(err.validation().unwrap().has_path("vm/name"));
    }

    #[test]
    fn test_nic_failure_aborts_pass() {
        let mut s = spec();
        s.nics = vec![Nic {
            mode: Some(NetworkMode::Internal),
            ..Nic::default()
        }];
        let err = defaults(s).unwrap_err();
        assert!(err.validation().unwrap().has_path("nic/0"));
    }

    #[test]
    fn test_defaulting_is_idempotent() {
        let mut s = spec();
        s.disks = vec![
            disk("a.vdi"),
            ide("b.vdi"),
        ];
        s.nics = vec![Nic::default()];
        let once = defaults(s).unwrap();
        let twice = apply_defaults(once.clone(), Path::new("/vms"), &inventory()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_ensure_defaults_syncs_networks() {
        let runner = MockRunner::new().with_network(Network::new("vboxnet3", NetworkMode::HostOnly));
        let mut vb = VBox::new(runner, "/vms");
        let mut s = spec();
        s.nics = vec![Nic::default()];
        let vm = vb.ensure_defaults(VirtualMachine::new(s)).unwrap();
        assert_eq!(vm.spec.nics[0].network_name.as_deref(), Some("vboxnet3"));
        assert!(vb.runner().calls().iter().any(|c| c == &["list", "hostonlyifs"]));
    }

    #[test]
    fn test_ensure_defaults_fails_hard_on_sync_error() {
        let runner = MockRunner::new().fail_on(&["list", "bridgedifs"], "VBoxManage: error: boom");
        let mut vb = VBox::new(runner, "/vms");
        let err = vb.ensure_defaults(VirtualMachine::new(spec())).unwrap_err();
        assert!(matches!(err, Error::Command { .. }));
    }
}
