//! Mock `VBoxManage` for testing and development.
//!
//! [`MockRunner`] keeps machines, media and host networks in memory and
//! answers the subset of commands this crate issues, in the same text formats
//! the real tool prints. Every invocation is recorded so tests can assert on
//! command order, and failures can be injected by argument prefix.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;
use uuid::Uuid;

use crate::config::schema::{DhcpServer, Network, NetworkMode};
use crate::error::Result;
use crate::runner::{CommandOutput, CommandRunner};
use crate::utils::paths::settings_file;

const NIC_SLOTS: u32 = 8;

#[derive(Debug, Clone)]
struct Medium {
    uuid: String,
    path: String,
    format: String,
    size_mb: u64,
}

#[derive(Debug, Clone)]
struct Controller {
    name: String,
    bus: String,
    port_count: u32,
    bootable: bool,
}

impl Controller {
    fn chipset(&self) -> &'static str {
        match self.bus.as_str() {
            "ide" => "PIIX4",
            "scsi" => "LsiLogic",
            "pcie" => "NVMe",
            _ => "IntelAhci",
        }
    }

    fn devices(&self) -> u32 {
        if self.bus == "ide" {
            2
        } else {
            1
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Adapter {
    mode: String,
    network: Option<String>,
    nic_type: Option<String>,
    cable: Option<String>,
    mac: Option<String>,
    speed: Option<String>,
    boot_prio: Option<String>,
    forwards: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
struct Attachment {
    path: String,
    uuid: String,
}

#[derive(Debug, Clone)]
struct Machine {
    uuid: String,
    name: String,
    group: String,
    cfg_file: String,
    os_type: String,
    registered: bool,
    cpus: String,
    memory: String,
    settings: BTreeMap<String, String>,
    state: &'static str,
    controllers: Vec<Controller>,
    attachments: BTreeMap<(String, u32, u32), Attachment>,
    nics: BTreeMap<u32, Adapter>,
    boot: [String; 4],
    drag_and_drop: String,
    clipboard: String,
    snapshots: Vec<(String, String)>,
    current: Option<usize>,
}

#[derive(Debug, Default)]
struct MockState {
    calls: Vec<Vec<String>>,
    failures: Vec<(Vec<String>, String)>,
    media: Vec<Medium>,
    machines: Vec<Machine>,
    networks: Vec<Network>,
    dhcp: BTreeMap<String, DhcpServer>,
}

/// In-memory `VBoxManage`.
#[derive(Debug, Default)]
pub struct MockRunner {
    state: Mutex<MockState>,
}

type Reply = std::result::Result<String, String>;

fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

fn indexed(flag: &str, prefix: &str) -> Option<u32> {
    flag.strip_prefix(prefix)?.parse().ok()
}

fn not_registered(id: &str) -> String {
    format!("VBoxManage: error: Could not find a registered machine named '{id}'")
}

fn file_not_found(path: &str) -> String {
    format!("VBoxManage: error: Could not find file for the medium '{path}' (VERR_FILE_NOT_FOUND)")
}

/// Value following `flag`, either as the next argument or as `flag=value`.
fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == flag {
            return iter.next().map(String::as_str);
        }
        if let Some(v) = arg.strip_prefix(flag).and_then(|r| r.strip_prefix('=')) {
            return Some(v);
        }
    }
    None
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a host network to the inventory
    pub fn with_network(self, nw: Network) -> Self {
        self.lock().networks.push(nw);
        self
    }

    /// Register an existing medium, e.g. an installer ISO
    pub fn with_medium(self, path: impl AsRef<Path>, size_mb: u64) -> Self {
        let path = path.as_ref().to_string_lossy().into_owned();
        self.lock().media.push(Medium {
            uuid: Uuid::new_v4().to_string(),
            path,
            format: "VDI".to_string(),
            size_mb,
        });
        self
    }

    /// Fail every invocation whose arguments start with `prefix`
    pub fn fail_on(self, prefix: &[&str], stderr: &str) -> Self {
        self.inject_failure(prefix, stderr);
        self
    }

    pub fn inject_failure(&self, prefix: &[&str], stderr: &str) {
        let prefix = prefix.iter().map(|s| s.to_string()).collect();
        self.lock().failures.push((prefix, stderr.to_string()));
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// Every invocation so far, in order
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.lock().calls.clone()
    }

    /// Index of the first invocation starting with `prefix`
    pub fn position(&self, prefix: &[&str]) -> Option<usize> {
        self.lock()
            .calls
            .iter()
            .position(|c| c.len() >= prefix.len() && c.iter().zip(prefix).all(|(a, b)| a == b))
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// UUID of a registered machine
    pub fn machine_uuid(&self, name: &str) -> Option<String> {
        self.lock()
            .machines
            .iter()
            .find(|m| m.registered && m.name == name)
            .map(|m| m.uuid.clone())
    }
}

impl CommandRunner for MockRunner {
    fn run(&self, args: &[String]) -> Result<CommandOutput> {
        let mut st = self.lock();
        st.calls.push(args.to_vec());
        debug!(args = %args.join(" "), "mock exec");

        let injected = st
            .failures
            .iter()
            .find(|(prefix, _)| args.starts_with(prefix))
            .map(|(_, stderr)| stderr.clone());
        if let Some(stderr) = injected {
            return Ok(CommandOutput::failed(stderr));
        }

        Ok(match st.dispatch(args) {
            Ok(stdout) => CommandOutput::ok(stdout),
            Err(stderr) => CommandOutput::failed(stderr),
        })
    }
}

impl MockState {
    fn dispatch(&mut self, args: &[String]) -> Reply {
        let cmd = args.first().map(String::as_str).unwrap_or_default();
        let rest = args.get(1..).unwrap_or_default();
        match cmd {
            "list" => self.list(rest),
            "createvm" => self.create_vm(rest),
            "registervm" => self.register_vm(rest),
            "unregistervm" => self.unregister_vm(rest),
            "showvminfo" => self.show_vm_info(rest),
            "modifyvm" => self.modify_vm(rest),
            "storagectl" => self.storage_ctl(rest),
            "storageattach" => self.storage_attach(rest),
            "startvm" => self.start_vm(rest),
            "controlvm" => self.control_vm(rest),
            "snapshot" => self.snapshot(rest),
            "showmediuminfo" => self.show_medium_info(rest),
            "createmedium" => self.create_medium(rest),
            "closemedium" => self.close_medium(rest),
            "modifymedium" => self.modify_medium(rest),
            "hostonlyif" => self.host_only_if(rest),
            "natnetwork" => self.nat_network(rest),
            "dhcpserver" => self.dhcp_server(rest),
            other => Err(format!("VBoxManage: error: Invalid command '{other}'")),
        }
    }

    fn machine_mut(&mut self, id: &str) -> std::result::Result<&mut Machine, String> {
        self.machines
            .iter_mut()
            .find(|m| m.registered && (m.uuid == id || m.name == id))
            .ok_or_else(|| not_registered(id))
    }

    fn medium(&self, id: &str) -> Option<&Medium> {
        self.media.iter().find(|m| m.uuid == id || m.path == id)
    }

    fn list(&self, args: &[String]) -> Reply {
        let mut out = String::new();
        match args.first().map(String::as_str) {
            Some("hostonlyifs") => {
                for (i, nw) in self.networks.iter().filter(|n| n.mode == NetworkMode::HostOnly).enumerate() {
                    out.push_str(&format!(
                        "Name:            {name}\nGUID:            786f6276-656e-4{i:03}-8000-0a0027000000\nDHCP:            Disabled\nIPAddress:       192.168.{net}.1\nNetworkMask:     255.255.255.0\nHardwareAddress: 0a:00:27:00:00:{i:02x}\nMediumType:      Ethernet\nStatus:          Up\nVBoxNetworkName: HostInterfaceNetworking-{name}\n\n",
                        name = nw.name,
                        net = 56 + i,
                    ));
                }
            }
            Some("bridgedifs") => {
                for nw in self.networks.iter().filter(|n| n.mode == NetworkMode::Bridged) {
                    out.push_str(&format!(
                        "Name:            {name}\nGUID:            00000000-0000-0000-0000-000000000000\nDHCP:            Disabled\nMediumType:      Ethernet\nStatus:          Up\nVBoxNetworkName: HostInterfaceNetworking-{name}\n\n",
                        name = nw.name,
                    ));
                }
            }
            Some("intnets") => {
                for nw in self.networks.iter().filter(|n| n.mode == NetworkMode::Internal) {
                    out.push_str(&format!("Name:        {}\n\n", nw.name));
                }
            }
            Some("natnets") => {
                for nw in self.networks.iter().filter(|n| n.mode == NetworkMode::NatNetwork) {
                    out.push_str(&format!(
                        "NetworkName:    {}\nIP:             10.0.2.1\nNetwork:        10.0.2.0/24\nIPv6 Enabled:   No\nDHCP Enabled:   Yes\nEnabled:        Yes\n\n",
                        nw.name
                    ));
                }
            }
            Some("dhcpservers") => {
                for s in self.dhcp.values() {
                    out.push_str(&format!(
                        "NetworkName:    {}\nIP:             {}\nNetworkMask:    {}\nlowerIPAddress: {}\nupperIPAddress: {}\nEnabled:        {}\n\n",
                        s.network_name,
                        s.ip_address,
                        s.network_mask,
                        s.lower_ip_address,
                        s.upper_ip_address,
                        if s.enabled { "Yes" } else { "No" },
                    ));
                }
            }
            Some("ostypes") => {
                for (id, desc, family, bit64) in [
                    ("Linux", "Other Linux (32-bit)", "Linux", false),
                    ("Linux_64", "Other Linux (64-bit)", "Linux", true),
                    ("Ubuntu_64", "Ubuntu (64-bit)", "Linux", true),
                    ("Windows10_64", "Windows 10 (64-bit)", "Windows", true),
                ] {
                    out.push_str(&format!(
                        "ID:          {id}\nDescription: {desc}\nFamily ID:   {family}\nFamily Desc: {family}\n64 bit:      {bit64}\n\n"
                    ));
                }
            }
            other => return Err(format!("VBoxManage: error: Unknown list type {other:?}")),
        }
        Ok(out)
    }

    fn create_vm(&mut self, args: &[String]) -> Reply {
        let name = flag_value(args, "--name").ok_or("VBoxManage: error: --name is required")?;
        let base = flag_value(args, "--basefolder").ok_or("VBoxManage: error: --basefolder is required")?;
        let group = flag_value(args, "--groups");
        let cfg = settings_file(Path::new(base), group, name).to_string_lossy().into_owned();

        if self.machines.iter().any(|m| m.cfg_file == cfg) {
            return Err(format!(
                "VBoxManage: error: Machine settings file '{cfg}' already exists"
            ));
        }

        let uuid = Uuid::new_v4().to_string();
        self.machines.push(Machine {
            uuid: uuid.clone(),
            name: name.to_string(),
            group: group.unwrap_or("/").to_string(),
            cfg_file: cfg.clone(),
            os_type: flag_value(args, "--ostype").unwrap_or("Other").to_string(),
            registered: false,
            cpus: "1".to_string(),
            memory: "128".to_string(),
            settings: BTreeMap::new(),
            state: "poweroff",
            controllers: Vec::new(),
            attachments: BTreeMap::new(),
            nics: BTreeMap::new(),
            boot: ["floppy", "dvd", "disk", "none"].map(String::from),
            drag_and_drop: "disabled".to_string(),
            clipboard: "disabled".to_string(),
            snapshots: Vec::new(),
            current: None,
        });
        Ok(format!(
            "Virtual machine '{name}' is created.\nUUID: {uuid}\nSettings file: '{cfg}'\n"
        ))
    }

    fn register_vm(&mut self, args: &[String]) -> Reply {
        let cfg = args.first().map(String::as_str).unwrap_or_default();
        let Some(m) = self.machines.iter_mut().find(|m| m.cfg_file == cfg) else {
            return Err(format!(
                "VBoxManage: error: Could not find file '{cfg}' (VERR_FILE_NOT_FOUND)"
            ));
        };
        if m.registered {
            return Err(format!(
                "VBoxManage: error: A machine with UUID {{{}}} already exists in the media registry",
                m.uuid
            ));
        }
        m.registered = true;
        Ok(String::new())
    }

    fn unregister_vm(&mut self, args: &[String]) -> Reply {
        let id = args.first().map(String::as_str).unwrap_or_default();
        self.machine_mut(id)?.registered = false;
        Ok(String::new())
    }

    fn show_vm_info(&mut self, args: &[String]) -> Reply {
        let id = args.first().map(String::as_str).unwrap_or_default();
        let m = self.machine_mut(id)?;
        let mut out = String::new();
        let mut put = |k: &str, v: String| {
            out.push_str(k);
            out.push('=');
            out.push_str(&v);
            out.push('\n');
        };

        put("name", quote(&m.name));
        put("groups", quote(&m.group));
        put("ostype", quote(&m.os_type));
        put("UUID", quote(&m.uuid));
        put("CfgFile", quote(&m.cfg_file));
        put("memory", m.memory.clone());
        put("vram", m.settings.get("vram").cloned().unwrap_or_else(|| "8".to_string()));
        put("cpus", m.cpus.clone());
        put("ioapic", quote(m.settings.get("ioapic").map_or("off", String::as_str)));
        put("pagefusion", quote(m.settings.get("pagefusion").map_or("off", String::as_str)));
        for (i, dev) in m.boot.iter().enumerate() {
            put(&format!("boot{}", i + 1), quote(dev));
        }
        put("VMState", quote(m.state));

        for (i, c) in m.controllers.iter().enumerate() {
            put(&format!("storagecontrollername{i}"), quote(&c.name));
            put(&format!("storagecontrollertype{i}"), quote(c.chipset()));
            put(&format!("storagecontrollerinstance{i}"), quote("0"));
            put(&format!("storagecontrollermaxportcount{i}"), quote(&c.port_count.to_string()));
            put(&format!("storagecontrollerportcount{i}"), quote(&c.port_count.to_string()));
            put(
                &format!("storagecontrollerbootable{i}"),
                quote(if c.bootable { "on" } else { "off" }),
            );
        }
        for c in &m.controllers {
            for port in 0..c.port_count {
                for device in 0..c.devices() {
                    let slot = quote(&format!("{}-{port}-{device}", c.name));
                    match m.attachments.get(&(c.name.clone(), port, device)) {
                        Some(a) => {
                            put(&slot, quote(&a.path));
                            put(
                                &quote(&format!("{}-ImageUUID-{port}-{device}", c.name)),
                                quote(&a.uuid),
                            );
                        }
                        None => put(&slot, quote("none")),
                    }
                }
            }
        }

        for i in 1..=NIC_SLOTS {
            let Some(nic) = m.nics.get(&i) else {
                put(&format!("nic{i}"), quote("none"));
                continue;
            };
            let key = match nic.mode.as_str() {
                "hostonly" => Some("hostonlyadapter"),
                "bridged" => Some("bridgeadapter"),
                "intnet" => Some("intnet"),
                "natnetwork" => Some("natnet"),
                _ => None,
            };
            if let (Some(key), Some(net)) = (key, nic.network.as_deref()) {
                put(&format!("{key}{i}"), quote(net));
            }
            if nic.mode == "nat" {
                put(&format!("natnet{i}"), quote("nat"));
            }
            put(&format!("macaddress{i}"), quote(nic.mac.as_deref().unwrap_or("080027000000")));
            put(&format!("cableconnected{i}"), quote(nic.cable.as_deref().unwrap_or("on")));
            put(&format!("nic{i}"), quote(&nic.mode));
            put(&format!("nictype{i}"), quote(nic.nic_type.as_deref().unwrap_or("82540EM")));
            put(&format!("nicspeed{i}"), quote(nic.speed.as_deref().unwrap_or("0")));
            put(&format!("nicbootprio{i}"), quote(nic.boot_prio.as_deref().unwrap_or("0")));
            for (k, rule) in nic.forwards.values().enumerate() {
                put(&format!("Forwarding({k})"), quote(rule));
            }
        }

        put("clipboard", quote(&m.clipboard));
        put("draganddrop", quote(&m.drag_and_drop));

        for (depth, (name, desc)) in m.snapshots.iter().enumerate() {
            let suffix = "-1".repeat(depth);
            put(&format!("SnapshotName{suffix}"), quote(name));
            put(&format!("SnapshotUUID{suffix}"), quote(&Uuid::new_v4().to_string()));
            put(&format!("SnapshotDescription{suffix}"), quote(desc));
        }
        if let Some((name, _)) = m.current.and_then(|c| m.snapshots.get(c)) {
            put("CurrentSnapshotName", quote(name));
            let node = format!("SnapshotName{}", "-1".repeat(m.current.unwrap_or_default()));
            put("CurrentSnapshotNode", quote(&node));
        }
        Ok(out)
    }

    fn modify_vm(&mut self, args: &[String]) -> Reply {
        let id = args.first().map(String::as_str).unwrap_or_default();
        let m = self.machine_mut(id)?;

        let mut iter = args.iter().skip(1);
        while let Some(arg) = iter.next() {
            let (flag, value) = match arg.split_once('=') {
                Some((f, v)) if f.starts_with("--") => (f, v.to_string()),
                _ => (
                    arg.as_str(),
                    iter.next()
                        .cloned()
                        .ok_or_else(|| format!("VBoxManage: error: Missing argument to '{arg}'"))?,
                ),
            };

            if let Some(i) = indexed(flag, "--natpf") {
                let nic = m.nics.entry(i).or_default();
                if value == "delete" {
                    let name = iter
                        .next()
                        .ok_or_else(|| format!("VBoxManage: error: Missing argument to '{flag}'"))?;
                    if nic.forwards.remove(name).is_none() {
                        return Err("VBoxManage: error: A NAT rule of this name does not exist".to_string());
                    }
                } else {
                    let name = value.split(',').next().unwrap_or_default().to_string();
                    if nic.forwards.contains_key(&name) {
                        return Err("VBoxManage: error: A NAT rule of this name already exists".to_string());
                    }
                    nic.forwards.insert(name, value);
                }
                continue;
            }
            if let Some(i) = indexed(flag, "--boot") {
                let slot = m
                    .boot
                    .get_mut((i as usize).wrapping_sub(1))
                    .ok_or_else(|| format!("VBoxManage: error: Invalid boot slot {i}"))?;
                *slot = value;
                continue;
            }

            let nic_flag = [
                "--nictype",
                "--nicspeed",
                "--nicbootprio",
                "--cableconnected",
                "--macaddress",
                "--hostonlyadapter",
                "--bridgeadapter",
                "--intnet",
                "--nat-network",
                "--nic",
            ]
            .into_iter()
            .find_map(|prefix| indexed(flag, prefix).map(|i| (prefix, i)));
            if let Some((prefix, i)) = nic_flag {
                if i == 0 || i > NIC_SLOTS {
                    return Err(format!("VBoxManage: error: Invalid NIC number {i}"));
                }
                if prefix == "--nic" && value == "none" {
                    m.nics.remove(&i);
                    continue;
                }
                let nic = m.nics.entry(i).or_default();
                match prefix {
                    "--nic" => nic.mode = value,
                    "--nictype" => nic.nic_type = Some(value),
                    "--nicspeed" => nic.speed = Some(value),
                    "--nicbootprio" => nic.boot_prio = Some(value),
                    "--cableconnected" => nic.cable = Some(value),
                    "--macaddress" => nic.mac = Some(value),
                    _ => nic.network = Some(value),
                }
                continue;
            }

            match flag {
                "--name" => m.name = value,
                "--groups" => m.group = value,
                "--ostype" => m.os_type = value,
                "--cpus" | "--memory" => {
                    if value.parse::<u32>().map_or(true, |v| v == 0) {
                        return Err(format!("VBoxManage: error: Invalid value '{value}' for {flag}"));
                    }
                    if flag == "--cpus" {
                        m.cpus = value;
                    } else {
                        m.memory = value;
                    }
                }
                "--ioapic" | "--vram" | "--pagefusion" => {
                    m.settings.insert(flag.trim_start_matches('-').to_string(), value);
                }
                "--drag-and-drop" => m.drag_and_drop = value,
                "--clipboard-mode" => m.clipboard = value,
                other => return Err(format!("VBoxManage: error: Unknown option: {other}")),
            }
        }
        Ok(String::new())
    }

    fn storage_ctl(&mut self, args: &[String]) -> Reply {
        let id = args.first().map(String::as_str).unwrap_or_default();
        let name = flag_value(args, "--name").ok_or("VBoxManage: error: --name is required")?;
        let bus = flag_value(args, "--add").ok_or("VBoxManage: error: --add is required")?;
        let default_ports = match bus {
            "ide" => 2,
            "sata" => 30,
            "scsi" => 16,
            "pcie" => 1,
            other => return Err(format!("VBoxManage: error: Invalid --add argument '{other}'")),
        };
        let port_count = match flag_value(args, "--portcount") {
            Some(n) => n
                .parse()
                .map_err(|_| format!("VBoxManage: error: Invalid port count '{n}'"))?,
            None => default_ports,
        };
        let bootable = flag_value(args, "--bootable").map_or(true, |b| b == "on");

        let m = self.machine_mut(id)?;
        if m.controllers.iter().any(|c| c.name == name) {
            return Err(format!(
                "VBoxManage: error: Storage controller named '{name}' already exists"
            ));
        }
        m.controllers.push(Controller {
            name: name.to_string(),
            bus: bus.to_string(),
            port_count,
            bootable,
        });
        Ok(String::new())
    }

    fn storage_attach(&mut self, args: &[String]) -> Reply {
        let id = args.first().map(String::as_str).unwrap_or_default();
        let ctl = flag_value(args, "--storagectl").ok_or("VBoxManage: error: --storagectl is required")?;
        let parse = |flag: &str| -> std::result::Result<u32, String> {
            flag_value(args, flag)
                .and_then(|v| v.parse().ok())
                .ok_or_else(|| format!("VBoxManage: error: {flag} is required"))
        };
        let port = parse("--port")?;
        let device = parse("--device")?;
        let kind = flag_value(args, "--type").unwrap_or("hdd");
        let medium = flag_value(args, "--medium").ok_or("VBoxManage: error: --medium is required")?;

        let known = self.medium(medium).map(|m| (m.path.clone(), m.uuid.clone()));
        let (path, uuid) = match known {
            Some(found) => found,
            None if kind == "hdd" => return Err(file_not_found(medium)),
            None => {
                let uuid = Uuid::new_v4().to_string();
                self.media.push(Medium {
                    uuid: uuid.clone(),
                    path: medium.to_string(),
                    format: "RAW".to_string(),
                    size_mb: 0,
                });
                (medium.to_string(), uuid)
            }
        };

        let m = self.machine_mut(id)?;
        let Some(c) = m.controllers.iter().find(|c| c.name == ctl) else {
            return Err(format!(
                "VBoxManage: error: Could not find a controller named '{ctl}'"
            ));
        };
        if port >= c.port_count || device >= c.devices() {
            return Err(format!(
                "VBoxManage: error: The port and/or device parameter are out of range: port={port} (must be in range [0, {}]), device={device}",
                c.port_count.saturating_sub(1)
            ));
        }

        let slot = (ctl.to_string(), port, device);
        if m.attachments.get(&slot).is_some_and(|a| a.uuid == uuid) {
            return Err(format!(
                "VBoxManage: error: Medium '{path}' is already attached to this virtual machine"
            ));
        }
        m.attachments.insert(slot, Attachment { path, uuid });
        Ok(String::new())
    }

    fn start_vm(&mut self, args: &[String]) -> Reply {
        let id = args.first().map(String::as_str).unwrap_or_default();
        let m = self.machine_mut(id)?;
        if m.state == "running" || m.state == "paused" {
            return Err(format!(
                "VBoxManage: error: The machine '{}' is already locked for a session (or being unlocked)",
                m.name
            ));
        }
        m.state = "running";
        Ok(format!(
            "Waiting for VM \"{0}\" to power on...\nVM \"{0}\" has been successfully started.\n",
            m.name
        ))
    }

    fn control_vm(&mut self, args: &[String]) -> Reply {
        let id = args.first().map(String::as_str).unwrap_or_default();
        let action = args.get(1).map(String::as_str).unwrap_or_default();
        let value = args.last().cloned().unwrap_or_default();
        let m = self.machine_mut(id)?;

        let next = match (action, m.state) {
            ("draganddrop", _) => {
                m.drag_and_drop = value;
                return Ok(String::new());
            }
            ("clipboard", _) => {
                m.clipboard = value;
                return Ok(String::new());
            }
            ("poweroff", "running" | "paused") => "poweroff",
            ("pause", "running") => "paused",
            ("resume", "paused") => "running",
            ("reset", "running") => "running",
            ("savestate", "running" | "paused") => "saved",
            ("poweroff" | "pause" | "resume" | "reset" | "savestate", _) => {
                return Err(format!(
                    "VBoxManage: error: Machine '{}' is not currently running",
                    m.name
                ))
            }
            (other, _) => return Err(format!("VBoxManage: error: Invalid parameter '{other}'")),
        };
        m.state = next;
        Ok(String::new())
    }

    fn snapshot(&mut self, args: &[String]) -> Reply {
        let id = args.first().map(String::as_str).unwrap_or_default();
        let action = args.get(1).map(String::as_str).unwrap_or_default();
        let name = args.get(2).cloned().unwrap_or_default();
        let m = self.machine_mut(id)?;
        let find = |m: &Machine| {
            m.snapshots
                .iter()
                .position(|(n, _)| *n == name)
                .ok_or_else(|| format!("VBoxManage: error: Could not find a snapshot named '{name}'"))
        };

        match action {
            "take" => {
                let desc = flag_value(args, "--description").unwrap_or_default().to_string();
                m.snapshots.push((name.clone(), desc));
                m.current = Some(m.snapshots.len() - 1);
                Ok(format!("Snapshot taken. UUID: {}\n", Uuid::new_v4()))
            }
            "delete" => {
                let pos = find(&*m)?;
                m.snapshots.remove(pos);
                m.current = match m.current {
                    Some(c) if c > pos => Some(c - 1),
                    Some(c) if c == pos => pos.checked_sub(1),
                    other => other,
                };
                Ok(String::new())
            }
            "restore" => {
                let pos = find(&*m)?;
                m.current = Some(pos);
                Ok(format!("Restoring snapshot '{name}'\n"))
            }
            "edit" => {
                let pos = find(&*m)?;
                if let Some(desc) = flag_value(args, "--description") {
                    m.snapshots[pos].1 = desc.to_string();
                }
                if let Some(new_name) = flag_value(args, "--name") {
                    m.snapshots[pos].0 = new_name.to_string();
                }
                Ok(String::new())
            }
            "list" => {
                if m.snapshots.is_empty() {
                    return Err("This machine does not have any snapshots".to_string());
                }
                let mut out = String::new();
                for (depth, (n, _)) in m.snapshots.iter().enumerate() {
                    let marker = if m.current == Some(depth) { " *" } else { "" };
                    out.push_str(&format!("{}Name: {n}{marker}\n", "   ".repeat(depth + 1)));
                }
                Ok(out)
            }
            other => Err(format!("VBoxManage: error: Invalid parameter '{other}'")),
        }
    }

    fn show_medium_info(&self, args: &[String]) -> Reply {
        let id = args.last().map(String::as_str).unwrap_or_default();
        let m = self.medium(id).ok_or_else(|| file_not_found(id))?;
        Ok(format!(
            "UUID:           {}\nParent UUID:    base\nState:          created\nType:           normal (base)\nLocation:       {}\nStorage format: {}\nFormat variant: dynamic default\nCapacity:       {} MBytes\nSize on disk:   2 MBytes\nEncryption:     disabled\n",
            m.uuid, m.path, m.format, m.size_mb
        ))
    }

    fn create_medium(&mut self, args: &[String]) -> Reply {
        let path = flag_value(args, "--filename").ok_or("VBoxManage: error: --filename is required")?;
        let size_mb = flag_value(args, "--size")
            .and_then(|s| s.parse().ok())
            .ok_or("VBoxManage: error: --size is required")?;
        if self.medium(path).is_some() {
            return Err(format!(
                "VBoxManage: error: Failed to create medium\nVBoxManage: error: VD: cannot create image '{path}', the file already exists (VERR_ALREADY_EXISTS)"
            ));
        }
        let uuid = Uuid::new_v4().to_string();
        self.media.push(Medium {
            uuid: uuid.clone(),
            path: path.to_string(),
            format: flag_value(args, "--format").unwrap_or("VDI").to_string(),
            size_mb,
        });
        Ok(format!("0%...10%...100%\nMedium created. UUID: {uuid}\n"))
    }

    fn close_medium(&mut self, args: &[String]) -> Reply {
        let id = args.first().map(String::as_str).unwrap_or_default();
        let pos = self
            .media
            .iter()
            .position(|m| m.uuid == id || m.path == id)
            .ok_or_else(|| file_not_found(id))?;
        self.media.remove(pos);
        Ok(String::new())
    }

    fn modify_medium(&mut self, args: &[String]) -> Reply {
        let id = args.get(1).map(String::as_str).unwrap_or_default();
        self.medium(id).ok_or_else(|| file_not_found(id))?;
        Ok(String::new())
    }

    fn host_only_if(&mut self, args: &[String]) -> Reply {
        match args.first().map(String::as_str) {
            Some("create") => {
                let name = (0..)
                    .map(|i| format!("vboxnet{i}"))
                    .find(|n| !self.networks.iter().any(|nw| nw.name == *n))
                    .unwrap_or_default();
                self.networks.push(Network::new(name.as_str(), NetworkMode::HostOnly));
                Ok(format!("0%...10%...100%\nInterface '{name}' was successfully created\n"))
            }
            Some("remove") => {
                let name = args.get(1).map(String::as_str).unwrap_or_default();
                self.remove_network(name, NetworkMode::HostOnly).ok_or_else(|| {
                    format!("VBoxManage: error: The host network interface named '{name}' could not be found")
                })
            }
            other => Err(format!("VBoxManage: error: Invalid parameter {other:?}")),
        }
    }

    fn nat_network(&mut self, args: &[String]) -> Reply {
        let name = flag_value(args, "--netname").unwrap_or_default();
        match args.first().map(String::as_str) {
            Some("remove") => self
                .remove_network(name, NetworkMode::NatNetwork)
                .ok_or_else(|| format!("VBoxManage: error: NAT network '{name}' does not exist")),
            other => Err(format!("VBoxManage: error: Invalid parameter {other:?}")),
        }
    }

    fn remove_network(&mut self, name: &str, mode: NetworkMode) -> Option<String> {
        let pos = self.networks.iter().position(|n| n.name == name && n.mode == mode)?;
        self.networks.remove(pos);
        Some(String::new())
    }

    fn dhcp_server(&mut self, args: &[String]) -> Reply {
        let name = flag_value(args, "--netname").ok_or("VBoxManage: error: --netname is required")?;
        match args.first().map(String::as_str) {
            Some("add") => {
                if self.dhcp.contains_key(name) {
                    return Err("VBoxManage: error: DHCP server already exists".to_string());
                }
                let field = |f: &str| flag_value(args, f).unwrap_or_default().to_string();
                let server = DhcpServer {
                    network_name: name.to_string(),
                    ip_address: field("--ip"),
                    network_mask: field("--netmask"),
                    lower_ip_address: field("--lowerip"),
                    upper_ip_address: field("--upperip"),
                    enabled: args.iter().any(|a| a == "--enable"),
                };
                self.dhcp.insert(name.to_string(), server);
                Ok(String::new())
            }
            Some("remove") => self
                .dhcp
                .remove(name)
                .map(|_| String::new())
                .ok_or_else(|| "VBoxManage: error: DHCP server does not exist".to_string()),
            other => Err(format!("VBoxManage: error: Invalid parameter {other:?}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(r: &MockRunner, args: &[&str]) -> CommandOutput {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        r.run(&args).unwrap()
    }

    #[test]
    fn records_calls_in_order() {
        let r = MockRunner::new();
        run(&r, &["list", "intnets"]);
        run(&r, &["list", "natnets"]);
        assert_eq!(r.calls(), vec![vec!["list", "intnets"], vec!["list", "natnets"]]);
        assert_eq!(r.position(&["list", "natnets"]), Some(1));
        assert_eq!(r.position(&["createvm"]), None);
    }

    #[test]
    fn injected_failures_match_by_prefix() {
        let r = MockRunner::new().fail_on(&["list", "ostypes"], "boom");
        let out = run(&r, &["list", "ostypes"]);
        assert!(!out.success);
        assert_eq!(out.stderr, "boom");
        assert!(run(&r, &["list", "intnets"]).success);

        r.clear_failures();
        assert!(run(&r, &["list", "ostypes"]).success);
    }

    #[test]
    fn unknown_command_fails() {
        let r = MockRunner::new();
        assert!(!run(&r, &["frobnicate"]).success);
    }

    #[test]
    fn machine_dump_quotes_slot_keys() {
        let r = MockRunner::new().with_medium("/vms/a.vdi", 10);
        run(&r, &["createvm", "--name", "a", "--basefolder", "/vms"]);
        run(&r, &["registervm", "/vms/a/a.vbox"]);
        run(&r, &["storagectl", "a", "--name", "IDE1", "--add", "ide"]);
        let out = run(
            &r,
            &["storageattach", "a", "--storagectl", "IDE1", "--port", "1", "--device", "1", "--type", "hdd", "--medium", "/vms/a.vdi"],
        );
        assert!(out.success, "{}", out.stderr);

        let dump = run(&r, &["showvminfo", "a", "--machinereadable"]).stdout;
        assert!(dump.contains("\"IDE1-1-1\"=\"/vms/a.vdi\"\n"));
        assert!(dump.contains("\"IDE1-0-0\"=\"none\"\n"));
        assert!(dump.contains("storagecontrollertype0=\"PIIX4\"\n"));
        assert!(dump.contains("cpus=1\n"));
    }

    #[test]
    fn out_of_range_port_is_rejected() {
        let r = MockRunner::new().with_medium("/vms/a.vdi", 10);
        run(&r, &["createvm", "--name", "a", "--basefolder", "/vms"]);
        run(&r, &["registervm", "/vms/a/a.vbox"]);
        run(&r, &["storagectl", "a", "--name", "NVMe1", "--add", "pcie"]);
        let out = run(
            &r,
            &["storageattach", "a", "--storagectl", "NVMe1", "--port", "1", "--device", "0", "--type", "hdd", "--medium", "/vms/a.vdi"],
        );
        assert!(!out.success);
    }
}
