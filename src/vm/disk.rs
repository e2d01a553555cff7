//! Disk media and storage controllers

use tracing::{debug, info};

use crate::config::schema::{
    Disk, DriveType, StorageController, StorageControllerType, VirtualMachine,
};
use crate::decode::lists::decode_medium_info;
use crate::error::{Error, Result};
use crate::runner::CommandRunner;
use crate::vm::manager::VBox;

impl<R: CommandRunner> VBox<R> {
    /// Look a medium up by UUID, or by path when it has none.
    ///
    /// Returns [`Error::DiskNotFound`] when VirtualBox does not know it.
    pub fn disk_info(&self, disk: &Disk) -> Result<Disk> {
        let id = disk.uuid_or_path();
        let class = disk.drive_type.unwrap_or_default().for_show_medium();

        let out = match self.manage(&["showmediuminfo", class, id.as_str()]) {
            Ok(out) => out,
            Err(e) if e.is_disk_not_found() => return Err(Error::DiskNotFound(id)),
            Err(e) => return Err(e),
        };

        let mut info = decode_medium_info(&out)?;
        if info.uuid.as_deref().map_or(true, str::is_empty) {
            return Err(Error::DiskNotFound(id));
        }
        info.drive_type = disk.drive_type;
        Ok(info)
    }

    /// Create a new hard disk image
    pub fn create_disk(&self, disk: &Disk) -> Result<()> {
        let path = disk.path.to_string_lossy().into_owned();
        if path.is_empty() {
            return Err(Error::InvalidArgument("disk path is empty".into()));
        }
        let size = disk.size_mb.to_string();
        let format = disk.format.unwrap_or_default();

        self.manage(&[
            "createmedium",
            "disk",
            "--filename",
            path.as_str(),
            "--size",
            size.as_str(),
            "--format",
            format.as_str(),
        ])?;
        info!(disk = %path, size_mb = disk.size_mb, "created disk");
        Ok(())
    }

    /// Return the registered medium for `disk`, creating hard disks that do
    /// not exist yet. Optical and floppy media must already be present.
    pub fn ensure_disk(&self, disk: &Disk) -> Result<Disk> {
        match self.disk_info(disk) {
            Ok(found) => {
                debug!(disk = %disk.path.display(), uuid = ?found.uuid, "disk exists");
                Ok(found)
            }
            Err(e) if e.is_disk_not_found() && disk.drive_type.unwrap_or_default() == DriveType::Hdd => {
                self.create_disk(disk)?;
                // the UUID is only known once VirtualBox has the medium
                let lookup = Disk {
                    uuid: None,
                    ..disk.clone()
                };
                self.disk_info(&lookup)
            }
            Err(e) => Err(e),
        }
    }

    /// Close the medium and delete its file
    pub fn delete_disk(&self, disk: &Disk) -> Result<()> {
        let id = disk.uuid_or_path();
        match self.manage(&["closemedium", id.as_str(), "--delete"]) {
            Err(e) if e.is_disk_not_found() => Err(Error::DiskNotFound(id)),
            other => other.map(|_| ()),
        }
    }

    /// Make the disk immutable; writes are discarded when the VM powers off
    pub fn mark_immutable(&self, disk: &Disk) -> Result<()> {
        let id = disk.uuid_or_path();
        self.manage(&["modifymedium", "disk", id.as_str(), "--type", "immutable"])?;
        Ok(())
    }

    /// Add a storage controller to the VM.
    ///
    /// Returns [`Error::AlreadyExists`] when a controller of that name is
    /// already present.
    pub fn add_storage_controller(&self, vm: &VirtualMachine, ctr: &StorageController) -> Result<()> {
        let name = ctr.name();
        if name.is_empty() {
            return Err(Error::InvalidArgument("storage controller needs a name".into()));
        }

        let mut args = vec![
            "storagectl".to_string(),
            vm.uuid_or_name().to_string(),
            "--name".to_string(),
            name.to_string(),
            "--add".to_string(),
            ctr.controller_type.bus().to_string(),
        ];
        if ctr.port_count > 0 {
            args.extend(["--portcount".to_string(), ctr.port_count.to_string()]);
        }
        if let Some(bootable) = ctr.bootable {
            let v = if bootable { "on" } else { "off" };
            args.extend(["--bootable".to_string(), v.to_string()]);
        }

        match self.manage(&args) {
            Err(e) if e.is_already_exists() => Err(Error::AlreadyExists(name.to_string())),
            other => other.map(|_| ()),
        }
    }

    /// Attach a disk at the slot recorded in its controller attachment
    pub fn attach_storage(&self, vm: &VirtualMachine, disk: &Disk) -> Result<()> {
        if !disk.path.is_absolute() {
            return Err(Error::InvalidArgument(format!(
                "disk path {} must be absolute",
                disk.path.display()
            )));
        }
        let ctr = disk.controller.name.as_deref().unwrap_or_default();
        if ctr.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "disk {} has no storage controller",
                disk.path.display()
            )));
        }

        let drive = disk.drive_type.unwrap_or_default();
        let mut args = vec![
            "storageattach".to_string(),
            vm.uuid_or_name().to_string(),
            "--storagectl".to_string(),
            ctr.to_string(),
            "--port".to_string(),
            disk.controller.port.to_string(),
            "--device".to_string(),
            disk.controller.device.to_string(),
            "--type".to_string(),
            drive.as_str().to_string(),
            "--medium".to_string(),
            disk.path.to_string_lossy().into_owned(),
        ];
        if drive == DriveType::Hdd {
            if disk.non_rotational {
                args.extend(["--nonrotational".to_string(), "on".to_string()]);
            }
            if disk.auto_discard {
                args.extend(["--discard".to_string(), "on".to_string()]);
            }
        }

        self.manage(&args)?;
        Ok(())
    }
}

/// Default controller name for a type: `SATA1`, `IDE1`, ...
pub fn default_controller_name(controller_type: StorageControllerType, ordinal: usize) -> String {
    format!("{controller_type}{ordinal}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{DiskFormat, StorageControllerAttachment, VirtualMachineSpec};
    use crate::mock::MockRunner;
    use std::path::PathBuf;

    fn disk(path: &str) -> Disk {
        Disk {
            path: PathBuf::from(path),
            size_mb: 1000,
            format: Some(DiskFormat::Vdi),
            drive_type: Some(DriveType::Hdd),
            ..Disk::default()
        }
    }

    fn vm() -> VirtualMachine {
        VirtualMachine::new(VirtualMachineSpec {
            name: "vm01".into(),
            cpus: 1,
            memory_mb: 512,
            ..VirtualMachineSpec::default()
        })
    }

    #[test]
    fn test_default_controller_name() {
        assert_eq!(default_controller_name(StorageControllerType::Sata, 1), "SATA1");
        assert_eq!(default_controller_name(StorageControllerType::NVMe, 2), "NVMe2");
    }

    #[test]
    fn test_missing_disk_is_disk_not_found() {
        let vb = VBox::new(MockRunner::new(), "/vms");
        let err = vb.disk_info(&disk("/vms/vm01/missing.vdi")).unwrap_err();
        assert!(matches!(err, Error::DiskNotFound(id) if id == "/vms/vm01/missing.vdi"));
    }

    #[test]
    fn test_ensure_disk_creates_once() {
        let vb = VBox::new(MockRunner::new(), "/vms");
        let d = disk("/vms/vm01/disk1.vdi");

        let created = vb.ensure_disk(&d).unwrap();
        assert!(created.uuid.is_some());
        assert_eq!(created.size_mb, 1000);

        let again = vb.ensure_disk(&d).unwrap();
        assert_eq!(again.uuid, created.uuid);
        let creates = vb
            .runner()
            .calls()
            .iter()
            .filter(|c| c[0] == "createmedium")
            .count();
        assert_eq!(creates, 1);
    }

    #[test]
    fn test_ensure_disk_does_not_create_dvd() {
        let vb = VBox::new(MockRunner::new(), "/vms");
        let mut iso = disk("/isos/install.iso");
        iso.drive_type = Some(DriveType::Dvd);
        assert!(vb.ensure_disk(&iso).unwrap_err().is_disk_not_found());
        assert!(vb.runner().calls().iter().all(|c| c[0] != "createmedium"));
    }

    #[test]
    fn test_delete_disk() {
        let vb = VBox::new(MockRunner::new(), "/vms");
        let d = vb.ensure_disk(&disk("/vms/vm01/disk1.vdi")).unwrap();
        vb.mark_immutable(&d).unwrap();
        vb.delete_disk(&d).unwrap();
        assert!(vb.delete_disk(&d).unwrap_err().is_disk_not_found());
    }

    #[test]
    fn test_attach_requires_absolute_path_and_controller() {
        let vb = VBox::new(MockRunner::new(), "/vms");
        let mut d = disk("relative.vdi");
        d.controller.name = Some("SATA1".into());
        assert!(matches!(vb.attach_storage(&vm(), &d), Err(Error::InvalidArgument(_))));

        let d = disk("/vms/vm01/disk1.vdi");
        assert!(matches!(vb.attach_storage(&vm(), &d), Err(Error::InvalidArgument(_))));
        assert!(vb.runner().calls().is_empty());
    }

    #[test]
    fn test_attach_arguments() {
        let vb = VBox::new(MockRunner::new(), "/vms");
        let machine = vm();
        vb.create_vm(&machine).unwrap();
        vb.register_vm(&machine).unwrap();
        let mut ctr = StorageController::new("SATA1", StorageControllerType::Sata);
        ctr.bootable = Some(true);
        vb.add_storage_controller(&machine, &ctr).unwrap();
        assert!(vb.add_storage_controller(&machine, &ctr).unwrap_err().is_already_exists());

        let mut d = vb.ensure_disk(&disk("/vms/vm01/disk1.vdi")).unwrap();
        d.drive_type = Some(DriveType::Hdd);
        d.non_rotational = true;
        d.controller = StorageControllerAttachment {
            name: Some("SATA1".into()),
            controller_type: Some(StorageControllerType::Sata),
            port: 1,
            device: 0,
        };
        vb.attach_storage(&machine, &d).unwrap();
        assert_eq!(
            vb.runner().calls().last().unwrap(),
            &vec![
                "storageattach", "vm01", "--storagectl", "SATA1", "--port", "1", "--device", "0",
                "--type", "hdd", "--medium", "/vms/vm01/disk1.vdi", "--nonrotational", "on",
            ]
        );

        let info = vb.vm_info("vm01").unwrap();
        assert_eq!(info.spec.storage_controllers.len(), 1);
        assert_eq!(info.spec.storage_controllers[0].bootable, Some(true));
        assert_eq!(info.spec.disks.len(), 1);
        assert_eq!(info.spec.disks[0].controller.port, 1);
        assert_eq!(info.spec.disks[0].uuid, d.uuid);
    }
}
