//! Reconcile a defaulted spec into a registered VirtualBox machine

use tracing::{info, instrument, warn};

use crate::config::schema::VirtualMachine;
use crate::config::FailurePolicy;
use crate::error::{Error, OperationError, Result};
use crate::runner::CommandRunner;
use crate::vm::manager::VBox;

fn op(path: impl Into<String>, op: &'static str) -> impl FnOnce(Error) -> Error {
    let path = path.into();
    move |e| OperationError::new(path, op, e).into()
}

impl<R: CommandRunner> VBox<R> {
    /// Create or update the machine so it matches `vm`, which must already
    /// have been through [`VBox::ensure_defaults`].
    ///
    /// Steps run in a fixed order and stop at the first failure, returned as
    /// an [`OperationError`] naming the element and step. Nothing done before
    /// the failure is rolled back; calling again picks up from the tolerated
    /// "already exists" states. On success `vm` gains the disk UUIDs and the
    /// machine UUID, and the machine as read back is returned.
    #[instrument(skip(self, vm), fields(vm = %vm.spec.name))]
    pub fn define(&self, vm: &mut VirtualMachine) -> Result<VirtualMachine> {
        self.ensure_vm_host_path(vm).map_err(op("vm/path", "ensure"))?;

        for i in 0..vm.spec.disks.len() {
            let found = self
                .ensure_disk(&vm.spec.disks[i])
                .map_err(op(format!("disk/{i}"), "ensure"))?;
            vm.spec.disks[i].uuid = found.uuid;
        }

        match self.create_vm(vm) {
            Ok(()) => info!("created vm"),
            Err(e) if e.is_already_exists() => info!("vm settings already exist"),
            Err(e) => return Err(op("vm", "create")(e)),
        }

        match self.register_vm(vm) {
            Ok(()) => info!("registered vm"),
            Err(e) if e.is_already_exists() && self.options().already_registered == FailurePolicy::Warn => {
                warn!(error = %e, "vm already registered")
            }
            Err(e) => return Err(op("vm", "register")(e)),
        }

        self.set_cpu_count(vm, vm.spec.cpus).map_err(op("vm/cpu", "set"))?;
        self.set_memory(vm, vm.spec.memory_mb).map_err(op("vm/memory", "set"))?;

        for (i, ctr) in vm.spec.storage_controllers.iter().enumerate() {
            match self.add_storage_controller(vm, ctr) {
                Err(e) if !e.is_already_exists() => {
                    return Err(op(format!("storagecontroller/{i}"), "add")(e))
                }
                _ => {}
            }
        }

        for (i, disk) in vm.spec.disks.iter().enumerate() {
            match self.attach_storage(vm, disk) {
                Err(e) if !(e.is_already_exists() || e.is_already_attached()) => {
                    return Err(op(format!("disk/{i}"), "attach")(e))
                }
                _ => {}
            }
        }

        self.enable_ioapic(vm).map_err(op("vm/ioapic", "enable"))?;
        if let Some(mode) = vm.spec.drag_and_drop {
            self.set_drag_and_drop(vm, mode).map_err(op("vm/draganddrop", "set"))?;
        }
        if let Some(mode) = vm.spec.clipboard {
            self.set_clipboard(vm, mode).map_err(op("vm/clipboard", "set"))?;
        }

        for (i, nic) in vm.spec.nics.iter().enumerate() {
            self.add_nic(vm, nic).map_err(op(format!("nic/{i}"), "add"))?;
        }

        if !vm.spec.boot.is_empty() {
            if let Err(e) = self.set_boot_order(vm, &vm.spec.boot) {
                match self.options().boot_order {
                    FailurePolicy::Warn => warn!(error = %e, "failed to set boot order"),
                    FailurePolicy::Abort => return Err(op("vm/boot", "set")(e)),
                }
            }
        }

        let defined = self.vm_info(vm.uuid_or_name()).map_err(op("vm", "read"))?;
        let uuid = match defined.uuid.as_deref() {
            Some(uuid) if !uuid.is_empty() => uuid.to_string(),
            _ => return Err(Error::NotConverged(vm.spec.name.clone())),
        };
        info!(uuid = %uuid, "vm defined");
        vm.uuid = Some(uuid);
        Ok(defined)
    }
}
