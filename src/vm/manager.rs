//! VM lifecycle management through VBoxManage

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::config::schema::{
    BootDevice, DhcpServer, OsType, SharingMode, Snapshot, VirtualMachine, VirtualMachineSpec,
};
use crate::config::{Config, DefineOptions};
use crate::decode::lists::{decode_dhcp_servers, decode_os_types};
use crate::decode::{decode_machine_readable, machine::decode_vm};
use crate::error::{classify, Error, Result};
use crate::runner::{CommandRunner, VBoxManage};
use crate::utils::paths::{settings_file, vm_base_dir};
use crate::vm::network::{nic_args, NetworkInventory};

/// Settings that `modify_vm` can push to an existing machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmField {
    Name,
    Group,
    OsType,
    Memory,
    Cpus,
    BootOrder,
    NetworkAdapters,
    DragAndDrop,
    Clipboard,
}

/// Runtime control actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    Start,
    PowerOff,
    Pause,
    Resume,
    Reset,
    Save,
    DragAndDrop,
    Clipboard,
}

/// VirtualBox manager driving the `VBoxManage` tool.
///
/// Not safe for concurrent `define` calls against the same machine name: the
/// tool's state is process-wide and callers must serialize such calls.
pub struct VBox<R = VBoxManage> {
    runner: R,
    base_path: PathBuf,
    options: DefineOptions,
    pub(crate) inventory: NetworkInventory,
}

impl VBox<VBoxManage> {
    /// Build a manager that runs the real tool, as described by `config`
    pub fn from_config(config: &Config) -> Result<Self> {
        let runner = VBoxManage::locate(config.vboxmanage.as_deref());
        Ok(Self::new(runner, config.base_path()?).with_options(config.define))
    }
}

impl<R: CommandRunner> VBox<R> {
    /// Create a new manager over `runner`, keeping VMs under `base_path`
    pub fn new(runner: R, base_path: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            base_path: base_path.into(),
            options: DefineOptions::default(),
            inventory: NetworkInventory::default(),
        }
    }

    pub fn with_options(mut self, options: DefineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn options(&self) -> &DefineOptions {
        &self.options
    }

    /// Networks seen by the last inventory sync
    pub fn inventory(&self) -> &NetworkInventory {
        &self.inventory
    }

    /// Directory holding the VM's settings and relative disks
    pub fn vm_base_dir(&self, spec: &VirtualMachineSpec) -> PathBuf {
        vm_base_dir(&self.base_path, spec.group.as_deref(), &spec.name)
    }

    /// Settings file the VM is registered from
    pub fn settings_file(&self, spec: &VirtualMachineSpec) -> PathBuf {
        settings_file(&self.base_path, spec.group.as_deref(), &spec.name)
    }

    /// Run VBoxManage, classifying failures by their output
    pub fn manage<S: AsRef<str>>(&self, args: &[S]) -> Result<String> {
        let args: Vec<String> = args.iter().map(|a| a.as_ref().to_string()).collect();
        let out = self.runner.run(&args)?;
        if out.success {
            Ok(out.stdout)
        } else {
            Err(classify(&args, &out.stdout, &out.stderr))
        }
    }

    pub(crate) fn modify(&self, vm: &VirtualMachine, params: Vec<String>) -> Result<String> {
        let mut args = vec!["modifyvm".to_string(), vm.uuid_or_name().to_string()];
        args.extend(params);
        self.manage(&args)
    }

    fn control_vm(&self, vm: &VirtualMachine, params: &[&str]) -> Result<String> {
        let mut args = vec!["controlvm", vm.uuid_or_name()];
        args.extend_from_slice(params);
        self.manage(&args)
    }

    /// Create the VM's directory if absent
    pub fn ensure_vm_host_path(&self, vm: &VirtualMachine) -> Result<()> {
        fs::create_dir_all(self.vm_base_dir(&vm.spec))?;
        Ok(())
    }

    /// Create (but do not register) the VM
    pub fn create_vm(&self, vm: &VirtualMachine) -> Result<()> {
        let base = self.base_path.to_string_lossy().into_owned();
        let mut args = vec!["createvm", "--name", vm.spec.name.as_str()];
        if !vm.spec.os_type.is_empty() {
            args.extend(["--ostype", vm.spec.os_type.as_str()]);
        }
        args.extend(["--basefolder", base.as_str()]);
        if let Some(group) = vm.spec.group.as_deref().filter(|g| !g.is_empty()) {
            args.extend(["--groups", group]);
        }

        match self.manage(&args) {
            Err(e) if e.is_already_exists() => Err(Error::AlreadyExists(
                self.settings_file(&vm.spec).display().to_string(),
            )),
            other => other.map(|_| ()),
        }
    }

    /// Remove the settings file. The VM must be unregistered first.
    pub fn delete_vm(&self, vm: &VirtualMachine) -> Result<()> {
        match fs::remove_file(self.settings_file(&vm.spec)) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    pub fn register_vm(&self, vm: &VirtualMachine) -> Result<()> {
        let cfg = self.settings_file(&vm.spec).to_string_lossy().into_owned();
        self.manage(&["registervm", cfg.as_str()])?;
        Ok(())
    }

    pub fn unregister_vm(&self, vm: &VirtualMachine) -> Result<()> {
        self.manage(&["unregistervm", vm.uuid_or_name()])?;
        Ok(())
    }

    /// Apply a runtime control action
    pub fn control(&self, vm: &VirtualMachine, action: ControlAction) -> Result<String> {
        match action {
            ControlAction::Start => self.manage(&["startvm", vm.uuid_or_name(), "--type", "headless"]),
            ControlAction::PowerOff => self.control_vm(vm, &["poweroff"]),
            ControlAction::Pause => self.control_vm(vm, &["pause"]),
            ControlAction::Resume => self.control_vm(vm, &["resume"]),
            ControlAction::Reset => self.control_vm(vm, &["reset"]),
            ControlAction::Save => self.control_vm(vm, &["savestate"]),
            ControlAction::DragAndDrop => {
                let mode = vm.spec.drag_and_drop.unwrap_or_default();
                self.control_vm(vm, &["draganddrop", mode.as_str()])
            }
            ControlAction::Clipboard => {
                let mode = vm.spec.clipboard.unwrap_or_default();
                self.control_vm(vm, &["clipboard", "mode", mode.as_str()])
            }
        }
    }

    /// Start headless
    pub fn start(&self, vm: &VirtualMachine) -> Result<String> {
        self.control(vm, ControlAction::Start)
    }

    pub fn stop(&self, vm: &VirtualMachine) -> Result<String> {
        self.control(vm, ControlAction::PowerOff)
    }

    /// Power off (ignoring failure) and start again
    pub fn restart(&self, vm: &VirtualMachine) -> Result<String> {
        if let Err(e) = self.stop(vm) {
            debug!(vm = vm.uuid_or_name(), error = %e, "poweroff before restart failed");
        }
        self.start(vm)
    }

    pub fn save(&self, vm: &VirtualMachine) -> Result<String> {
        self.control(vm, ControlAction::Save)
    }

    pub fn pause(&self, vm: &VirtualMachine) -> Result<String> {
        self.control(vm, ControlAction::Pause)
    }

    pub fn resume(&self, vm: &VirtualMachine) -> Result<String> {
        self.control(vm, ControlAction::Resume)
    }

    pub fn reset(&self, vm: &VirtualMachine) -> Result<String> {
        self.control(vm, ControlAction::Reset)
    }

    /// Push selected spec fields to the VM in one modifyvm call
    pub fn modify_vm(&self, vm: &VirtualMachine, fields: &[VmField]) -> Result<()> {
        if fields.is_empty() {
            return Err(Error::InvalidArgument("no parameters to change".into()));
        }

        let spec = &vm.spec;
        let mut params = Vec::new();
        for field in fields {
            match field {
                VmField::Name => params.extend(["--name".to_string(), spec.name.clone()]),
                VmField::Group => {
                    params.extend(["--groups".to_string(), spec.group.clone().unwrap_or_default()])
                }
                VmField::OsType => params.extend(["--ostype".to_string(), spec.os_type.clone()]),
                VmField::Memory => params.extend(["--memory".to_string(), spec.memory_mb.to_string()]),
                VmField::Cpus => params.extend(["--cpus".to_string(), spec.cpus.to_string()]),
                VmField::BootOrder => params.extend(boot_args(&spec.boot)),
                VmField::NetworkAdapters => {
                    for nic in &spec.nics {
                        params.extend(nic_args(nic));
                    }
                }
                VmField::DragAndDrop => params.push(format!(
                    "--drag-and-drop={}",
                    spec.drag_and_drop.unwrap_or_default().as_str()
                )),
                VmField::Clipboard => params.push(format!(
                    "--clipboard-mode={}",
                    spec.clipboard.unwrap_or_default().as_str()
                )),
            }
        }
        self.modify(vm, params)?;
        Ok(())
    }

    /// Sets the amount of RAM, in MB, the VM allocates from the host
    pub fn set_memory(&self, vm: &VirtualMachine, size_mb: u32) -> Result<()> {
        self.modify(vm, vec!["--memory".into(), size_mb.to_string()])?;
        Ok(())
    }

    /// Sets the number of virtual CPUs
    pub fn set_cpu_count(&self, vm: &VirtualMachine, cpus: u32) -> Result<()> {
        self.modify(vm, vec!["--cpus".into(), cpus.to_string()])?;
        Ok(())
    }

    /// Sets the video memory, in MB
    pub fn set_vram(&self, vm: &VirtualMachine, vram_mb: u32) -> Result<()> {
        self.modify(vm, vec!["--vram".into(), vram_mb.to_string()])?;
        Ok(())
    }

    /// Enables page fusion (memory deduplication across similar VMs)
    pub fn set_page_fusion(&self, vm: &VirtualMachine) -> Result<()> {
        self.modify(vm, vec!["--pagefusion".into(), "on".into()])?;
        Ok(())
    }

    /// Specifies the boot order
    pub fn set_boot_order(&self, vm: &VirtualMachine, order: &[BootDevice]) -> Result<()> {
        self.modify(vm, boot_args(order))?;
        Ok(())
    }

    pub fn enable_ioapic(&self, vm: &VirtualMachine) -> Result<()> {
        self.modify(vm, vec!["--ioapic".into(), "on".into()])?;
        Ok(())
    }

    pub fn set_drag_and_drop(&self, vm: &VirtualMachine, mode: SharingMode) -> Result<()> {
        self.modify(vm, vec![format!("--drag-and-drop={}", mode.as_str())])?;
        Ok(())
    }

    pub fn set_clipboard(&self, vm: &VirtualMachine, mode: SharingMode) -> Result<()> {
        self.modify(vm, vec![format!("--clipboard-mode={}", mode.as_str())])?;
        Ok(())
    }

    pub fn take_snapshot(&self, vm: &VirtualMachine, snapshot: &Snapshot, live: bool) -> Result<()> {
        let mut args = vec![
            "snapshot".to_string(),
            vm.spec.name.clone(),
            "take".to_string(),
            snapshot.name.clone(),
        ];
        if !snapshot.description.is_empty() {
            args.push(format!("--description={}", snapshot.description));
        }
        if live {
            args.push("--live".to_string());
        }
        self.manage(&args)?;
        Ok(())
    }

    pub fn delete_snapshot(&self, vm: &VirtualMachine, snapshot: &Snapshot) -> Result<()> {
        self.manage(&["snapshot", vm.spec.name.as_str(), "delete", snapshot.name.as_str()])?;
        Ok(())
    }

    pub fn restore_snapshot(&self, vm: &VirtualMachine, snapshot: &Snapshot) -> Result<()> {
        self.manage(&["snapshot", vm.spec.name.as_str(), "restore", snapshot.name.as_str()])?;
        Ok(())
    }

    /// Rename and/or re-describe a snapshot; unchanged fields are not sent
    pub fn edit_snapshot(&self, vm: &VirtualMachine, prev: &Snapshot, next: &Snapshot) -> Result<()> {
        let mut args = vec![
            "snapshot".to_string(),
            vm.spec.name.clone(),
            "edit".to_string(),
            prev.name.clone(),
        ];
        if !next.description.is_empty() && next.description != prev.description {
            args.push(format!("--description={}", next.description));
        }
        if !next.name.is_empty() && next.name != prev.name {
            args.extend(["--name".to_string(), next.name.clone()]);
        }
        self.manage(&args)?;
        Ok(())
    }

    /// Raw `snapshot list` output
    pub fn list_snapshots(&self, vm: &VirtualMachine) -> Result<String> {
        self.manage(&["snapshot", vm.spec.name.as_str(), "list"])
    }

    /// Read a machine back from the hypervisor
    pub fn vm_info(&self, uuid_or_name: &str) -> Result<VirtualMachine> {
        let out = match self.manage(&["showvminfo", uuid_or_name, "--machinereadable"]) {
            Ok(out) => out,
            Err(e @ (Error::ToolNotFound(_) | Error::Spawn(_))) => return Err(e),
            Err(e) => {
                debug!(vm = uuid_or_name, error = %e, "showvminfo failed");
                return Err(Error::MachineNotFound(uuid_or_name.to_string()));
            }
        };

        let values = decode_machine_readable(&out)?;
        decode_vm(&values, &self.base_path)
    }

    pub fn list_os_types(&self) -> Result<BTreeMap<String, OsType>> {
        let out = self.manage(&["list", "ostypes"])?;
        decode_os_types(&out)
    }

    pub fn list_dhcp_servers(&self) -> Result<BTreeMap<String, DhcpServer>> {
        let out = self.manage(&["list", "dhcpservers"])?;
        decode_dhcp_servers(&out)
    }

    pub fn enable_dhcp_server(&self, server: &DhcpServer) -> Result<()> {
        self.manage(&[
            "dhcpserver".to_string(),
            "add".to_string(),
            "--netname".to_string(),
            server.network_name.clone(),
            format!("--ip={}", server.ip_address),
            format!("--netmask={}", server.network_mask),
            format!("--lowerip={}", server.lower_ip_address),
            format!("--upperip={}", server.upper_ip_address),
            "--enable".to_string(),
        ])?;
        Ok(())
    }

    /// Remove the DHCP server of a network; absent servers are fine
    pub fn disable_dhcp_server(&self, network_name: &str) -> Result<()> {
        match self.manage(&["dhcpserver", "remove", "--netname", network_name]) {
            Err(e) if e.is_not_found() => {
                warn!(network = network_name, "no DHCP server to remove");
                Ok(())
            }
            other => other.map(|_| ()),
        }
    }
}

/// Boot slots a machine has
const BOOT_SLOTS: usize = 4;

/// `--boot<n> <device>` pairs; slots past the given order are cleared
pub(crate) fn boot_args(order: &[BootDevice]) -> Vec<String> {
    (0..BOOT_SLOTS.max(order.len()))
        .flat_map(|i| {
            let dev = order.get(i).copied().unwrap_or(BootDevice::None);
            [format!("--boot{}", i + 1), dev.as_str().to_string()]
        })
        .collect()
}
