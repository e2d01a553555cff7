//! Host networks and network adapters

use std::collections::BTreeMap;

use tracing::{debug, info, instrument};

use crate::config::schema::{Network, NetworkMode, Nic, NicType, PortForwarding, VirtualMachine};
use crate::decode::lists::{decode_created_interface, decode_networks};
use crate::error::{Error, Result, ValidationErrors};
use crate::runner::CommandRunner;
use crate::vm::manager::VBox;

/// Host networks by kind, keyed by name.
///
/// Replaced wholesale on every sync, never merged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NetworkInventory {
    pub host_only: BTreeMap<String, Network>,
    pub bridged: BTreeMap<String, Network>,
    pub internal: BTreeMap<String, Network>,
    pub nat: BTreeMap<String, Network>,
}

impl NetworkInventory {
    fn by_mode(&self, mode: NetworkMode) -> Option<&BTreeMap<String, Network>> {
        match mode {
            NetworkMode::HostOnly => Some(&self.host_only),
            NetworkMode::Bridged => Some(&self.bridged),
            NetworkMode::Internal => Some(&self.internal),
            NetworkMode::NatNetwork => Some(&self.nat),
            _ => None,
        }
    }

    pub fn get(&self, mode: NetworkMode, name: &str) -> Option<&Network> {
        self.by_mode(mode)?.get(name)
    }

    /// Network a NIC of `mode` falls back to: the lowest sorting name
    pub fn default_network(&self, mode: NetworkMode) -> Option<&Network> {
        self.by_mode(mode)?.values().next()
    }

    pub fn insert(&mut self, nw: Network) {
        let map = match nw.mode {
            NetworkMode::HostOnly => &mut self.host_only,
            NetworkMode::Bridged => &mut self.bridged,
            NetworkMode::Internal => &mut self.internal,
            NetworkMode::NatNetwork => &mut self.nat,
            _ => return,
        };
        map.insert(nw.name.clone(), nw);
    }

    pub fn len(&self) -> usize {
        self.host_only.len() + self.bridged.len() + self.internal.len() + self.nat.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fill in NIC slots, modes, types and networks.
///
/// Slots follow declaration order starting at 1. Internal networks are never
/// guessed; host-only, bridged and NAT-network adapters without a network
/// take the first one in `inventory`.
pub fn apply_nic_defaults(nics: &mut [Nic], inventory: &NetworkInventory) -> Result<()> {
    let mut verrs = ValidationErrors::new();

    for (i, nic) in nics.iter_mut().enumerate() {
        nic.index = i as u32 + 1;
        let mode = *nic.mode.get_or_insert(NetworkMode::HostOnly);
        nic.nic_type.get_or_insert(NicType::default());

        if nic.network_name.as_deref().is_some_and(|n| !n.is_empty()) {
            continue;
        }
        match mode {
            NetworkMode::Internal => verrs.add(
                format!("nic/{i}"),
                "networkname must be supplied for an internal network",
            ),
            NetworkMode::HostOnly | NetworkMode::Bridged | NetworkMode::NatNetwork => {
                match inventory.default_network(mode) {
                    Some(nw) => {
                        debug!(nic = nic.index, network = %nw.name, "defaulted nic network");
                        nic.network_name = Some(nw.name.clone());
                    }
                    None => verrs.add(
                        format!("nic/{i}"),
                        format!("no {mode} network exists to default to"),
                    ),
                }
            }
            NetworkMode::None | NetworkMode::Null | NetworkMode::Nat | NetworkMode::Generic => {}
        }
    }

    verrs.into_result()
}

/// `modifyvm` parameters configuring one adapter
pub fn nic_args(nic: &Nic) -> Vec<String> {
    let i = nic.index;
    let mode = nic.mode.unwrap_or(NetworkMode::HostOnly);
    let mut args = vec![format!("--nic{i}"), mode.as_str().to_string()];

    if let (Some(flag), Some(name)) = (mode.adapter_flag(), nic.network_name.as_deref()) {
        if !name.is_empty() {
            args.extend([format!("{flag}{i}"), name.to_string()]);
        }
    }
    if let Some(t) = nic.nic_type {
        args.extend([format!("--nictype{i}"), t.as_str().to_string()]);
    }
    if let Some(connected) = nic.cable_connected {
        let v = if connected { "on" } else { "off" };
        args.extend([format!("--cableconnected{i}"), v.to_string()]);
    }
    if let Some(mac) = nic.mac.as_deref().filter(|m| !m.is_empty()) {
        args.extend([format!("--macaddress{i}"), mac.to_string()]);
    }
    if nic.speed_kbps > 0 {
        args.extend([format!("--nicspeed{i}"), nic.speed_kbps.to_string()]);
    }
    if let Some(prio) = nic.boot_priority {
        args.extend([format!("--nicbootprio{i}"), prio.to_string()]);
    }
    for pf in &nic.port_forwarding {
        args.extend([format!("--natpf{i}"), pf.rule()]);
    }
    args
}

impl<R: CommandRunner> VBox<R> {
    fn list_networks(&self, kind: &str, mode: NetworkMode) -> Result<Vec<Network>> {
        let out = self.manage(&["list", kind])?;
        decode_networks(&out, mode)
    }

    pub fn host_only_networks(&self) -> Result<Vec<Network>> {
        self.list_networks("hostonlyifs", NetworkMode::HostOnly)
    }

    pub fn bridged_networks(&self) -> Result<Vec<Network>> {
        self.list_networks("bridgedifs", NetworkMode::Bridged)
    }

    pub fn internal_networks(&self) -> Result<Vec<Network>> {
        self.list_networks("intnets", NetworkMode::Internal)
    }

    pub fn nat_networks(&self) -> Result<Vec<Network>> {
        self.list_networks("natnets", NetworkMode::NatNetwork)
    }

    /// Re-enumerate all host networks; the inventory is only replaced when
    /// every listing succeeds.
    #[instrument(skip(self))]
    pub fn sync_networks(&mut self) -> Result<()> {
        let mut inventory = NetworkInventory::default();
        for nw in self
            .host_only_networks()?
            .into_iter()
            .chain(self.bridged_networks()?)
            .chain(self.internal_networks()?)
            .chain(self.nat_networks()?)
        {
            inventory.insert(nw);
        }
        debug!(networks = inventory.len(), "network inventory synced");
        self.inventory = inventory;
        Ok(())
    }

    /// Sync the inventory, then default every NIC of `vm`
    pub fn set_nic_defaults(&mut self, vm: &mut VirtualMachine) -> Result<()> {
        self.sync_networks()?;
        apply_nic_defaults(&mut vm.spec.nics, &self.inventory)
    }

    /// Create a new host-only interface, named by VirtualBox
    pub fn create_host_only_network(&self) -> Result<Network> {
        let out = self.manage(&["hostonlyif", "create"])?;
        let name = decode_created_interface(&out).ok_or_else(|| Error::Decode {
            what: "hostonlyif create",
            message: format!("no interface name in output {:?}", out.trim()),
        })?;
        info!(network = %name, "created host-only network");
        Ok(Network::new(name, NetworkMode::HostOnly))
    }

    /// Remove a host-only or NAT network
    pub fn delete_network(&self, nw: &Network) -> Result<()> {
        let res = match nw.mode {
            NetworkMode::HostOnly => self.manage(&["hostonlyif", "remove", nw.name.as_str()]),
            NetworkMode::NatNetwork => {
                self.manage(&["natnetwork", "remove", "--netname", nw.name.as_str()])
            }
            other => {
                return Err(Error::InvalidArgument(format!(
                    "{other} network {} cannot be removed",
                    nw.name
                )))
            }
        };
        match res {
            Err(e) if e.is_not_found() => Err(Error::NotFound(nw.name.clone())),
            other => other.map(|_| ()),
        }
    }

    /// Configure one adapter of an existing VM
    pub fn add_nic(&self, vm: &VirtualMachine, nic: &Nic) -> Result<()> {
        if nic.index == 0 {
            return Err(Error::InvalidArgument("nic index must start at 1".into()));
        }
        self.modify(vm, nic_args(nic))?;
        Ok(())
    }

    pub fn add_port_forwarding(&self, vm: &VirtualMachine, nic: u32, pf: &PortForwarding) -> Result<()> {
        self.modify(vm, vec![format!("--natpf{nic}"), pf.rule()])?;
        Ok(())
    }

    pub fn delete_port_forwarding(&self, vm: &VirtualMachine, nic: u32, name: &str) -> Result<()> {
        self.modify(vm, vec![format!("--natpf{nic}"), "delete".into(), name.to_string()])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::NetProtocol;
    use crate::mock::MockRunner;

    fn inventory() -> NetworkInventory {
        let mut inv = NetworkInventory::default();
        inv.insert(Network::new("vboxnet1", NetworkMode::HostOnly));
        inv.insert(Network::new("vboxnet0", NetworkMode::HostOnly));
        inv.insert(Network::new("en0: Wi-Fi", NetworkMode::Bridged));
        inv
    }

    #[test]
    fn test_nic_defaults() {
        let mut nics = vec![
            Nic::default(),
            Nic {
                mode: Some(NetworkMode::Bridged),
                ..Nic::default()
            },
            Nic {
                mode: Some(NetworkMode::Nat),
                ..Nic::default()
            },
            Nic {
                mode: Some(NetworkMode::HostOnly),
                network_name: Some("vboxnet1".into()),
                nic_type: Some(NicType::Virtio),
                ..Nic::default()
            },
        ];
        apply_nic_defaults(&mut nics, &inventory()).unwrap();

        assert_eq!(nics.iter().map(|n| n.index).collect::<Vec<_>>(), vec![1, 2, 3, 4]);
        assert_eq!(nics[0].mode, Some(NetworkMode::HostOnly));
        assert_eq!(nics[0].network_name.as_deref(), Some("vboxnet0"));
        assert_eq!(nics[0].nic_type, Some(NicType::I82540EM));
        assert_eq!(nics[1].network_name.as_deref(), Some("en0: Wi-Fi"));
        assert_eq!(nics[2].network_name, None);
        assert_eq!(nics[3].network_name.as_deref(), Some("vboxnet1"));
        assert_eq!(nics[3].nic_type, Some(NicType::Virtio));
    }

    #[test]
    fn test_nic_defaults_report_every_failure() {
        let mut nics = vec![
            Nic {
                mode: Some(NetworkMode::Internal),
                ..Nic::default()
            },
            Nic {
                mode: Some(NetworkMode::NatNetwork),
                ..Nic::default()
            },
        ];
        let err = apply_nic_defaults(&mut nics, &inventory()).unwrap_err();
        let verrs = err.validation().unwrap();
        assert_eq!(verrs.len(), 2);
        assert!(verrs.has_path("nic/0"));
        assert!(verrs.has_path("nic/1"));
    }

    #[test]
    fn test_nic_args() {
        let nic = Nic {
            index: 2,
            mode: Some(NetworkMode::Bridged),
            network_name: Some("en0: Wi-Fi".into()),
            nic_type: Some(NicType::Virtio),
            cable_connected: Some(true),
            speed_kbps: 1000000,
            boot_priority: Some(1),
            mac: Some("080027AABBCC".into()),
            port_forwarding: vec![],
        };
        assert_eq!(
            nic_args(&nic),
            vec![
                "--nic2", "bridged", "--bridgeadapter2", "en0: Wi-Fi", "--nictype2", "virtio",
                "--cableconnected2", "on", "--macaddress2", "080027AABBCC", "--nicspeed2",
                "1000000", "--nicbootprio2", "1",
            ]
        );
    }

    #[test]
    fn test_nat_port_forwarding_args() {
        let nic = Nic {
            index: 1,
            mode: Some(NetworkMode::Nat),
            port_forwarding: vec![PortForwarding {
                name: "ssh".into(),
                protocol: NetProtocol::Tcp,
                host_ip: String::new(),
                host_port: 2222,
                guest_ip: String::new(),
                guest_port: 22,
            }],
            ..Nic::default()
        };
        assert_eq!(nic_args(&nic), vec!["--nic1", "nat", "--natpf1", "ssh,tcp,,2222,,22"]);
    }

    #[test]
    fn test_sync_replaces_inventory() {
        let runner = MockRunner::new()
            .with_network(Network::new("vboxnet0", NetworkMode::HostOnly))
            .with_network(Network::new("intnet", NetworkMode::Internal));
        let mut vb = VBox::new(runner, "/vms");
        vb.inventory.insert(Network::new("stale", NetworkMode::Bridged));

        vb.sync_networks().unwrap();
        assert!(vb.inventory().get(NetworkMode::HostOnly, "vboxnet0").is_some());
        assert!(vb.inventory().get(NetworkMode::Internal, "intnet").is_some());
        assert!(vb.inventory().bridged.is_empty());
    }

    #[test]
    fn test_failed_sync_keeps_previous_inventory() {
        let runner = MockRunner::new()
            .with_network(Network::new("vboxnet0", NetworkMode::HostOnly))
            .fail_on(&["list", "natnets"], "VBoxManage: error: boom");
        let mut vb = VBox::new(runner, "/vms");
        vb.inventory.insert(Network::new("old", NetworkMode::HostOnly));

        assert!(vb.sync_networks().is_err());
        assert_eq!(vb.inventory().host_only.keys().collect::<Vec<_>>(), vec!["old"]);
    }

    #[test]
    fn test_set_nic_defaults_syncs_first() {
        let runner = MockRunner::new().with_network(Network::new("vboxnet3", NetworkMode::HostOnly));
        let mut vb = VBox::new(runner, "/vms");
        let mut vm = VirtualMachine::default();
        vm.spec.nics = vec![Nic::default()];

        vb.set_nic_defaults(&mut vm).unwrap();
        assert_eq!(vm.spec.nics[0].network_name.as_deref(), Some("vboxnet3"));
        assert_eq!(vb.runner().position(&["list", "hostonlyifs"]), Some(0));
    }

    #[test]
    fn test_port_forwarding() {
        let vb = VBox::new(MockRunner::new(), "/vms");
        let mut vm = VirtualMachine::default();
        vm.spec.name = "vm01".into();
        vb.create_vm(&vm).unwrap();
        vb.register_vm(&vm).unwrap();

        let pf = PortForwarding {
            name: "web".into(),
            protocol: NetProtocol::Tcp,
            host_ip: "127.0.0.1".into(),
            host_port: 8080,
            guest_ip: String::new(),
            guest_port: 80,
        };
        vb.add_port_forwarding(&vm, 1, &pf).unwrap();
        assert_eq!(
            vb.runner().calls().last().unwrap(),
            &vec!["modifyvm", "vm01", "--natpf1", "web,tcp,127.0.0.1,8080,,80"]
        );
        assert!(vb.add_port_forwarding(&vm, 1, &pf).unwrap_err().is_already_exists());

        vb.delete_port_forwarding(&vm, 1, "web").unwrap();
        assert_eq!(
            vb.runner().calls().last().unwrap(),
            &vec!["modifyvm", "vm01", "--natpf1", "delete", "web"]
        );
        assert!(vb.delete_port_forwarding(&vm, 1, "web").unwrap_err().is_not_found());
    }

    #[test]
    fn test_create_and_delete_host_only_network() {
        let vb = VBox::new(MockRunner::new(), "/vms");
        let nw = vb.create_host_only_network().unwrap();
        assert_eq!(nw.name, "vboxnet0");
        assert_eq!(vb.host_only_networks().unwrap().len(), 1);

        vb.delete_network(&nw).unwrap();
        assert!(vb.host_only_networks().unwrap().is_empty());
        assert!(matches!(vb.delete_network(&nw), Err(Error::NotFound(_))));
    }
}
