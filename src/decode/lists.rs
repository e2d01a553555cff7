//! Decoders for the colon-separated list and info commands.

use std::collections::BTreeMap;
use std::path::PathBuf;

use super::{parse_key_values, try_parse_key_values, Grammar, Line};
use crate::config::schema::{DhcpServer, Disk, DiskFormat, Network, NetworkMode, OsType};
use crate::error::Result;

const HOST_IF_PREFIX: &str = "HostInterfaceNetworking-";

/// Decode `list hostonlyifs|bridgedifs|intnets|natnets`; records end at a
/// blank line.
pub fn decode_networks(text: &str, mode: NetworkMode) -> Result<Vec<Network>> {
    let mut nws = Vec::new();
    let mut nw = Network::new("", mode);

    try_parse_key_values(text, Grammar::Colon, |line| {
        match line {
            Line::Pair { key, value } => match key {
                "Name" | "NetworkName" => nw.name = value.to_string(),
                "GUID" => nw.guid = value.to_string(),
                "HardwareAddress" => nw.hw_address = value.to_string(),
                "VBoxNetworkName" => {
                    nw.device_name = value.strip_prefix(HOST_IF_PREFIX).unwrap_or(value).to_string()
                }
                _ => {}
            },
            Line::Blank => {
                let done = std::mem::replace(&mut nw, Network::new("", mode));
                if !done.name.is_empty() {
                    nws.push(done);
                }
            }
            Line::Unmatched(_) => {}
        }
        Ok(())
    })?;

    // output that does not end in a blank line still closes the last record
    if !nw.name.is_empty() {
        nws.push(nw);
    }
    Ok(nws)
}

/// Decode `list dhcpservers`, keyed by network name.
pub fn decode_dhcp_servers(text: &str) -> Result<BTreeMap<String, DhcpServer>> {
    let mut servers = BTreeMap::new();
    let mut current: Option<String> = None;

    parse_key_values(text, Grammar::Colon, |key, val| {
        if key == "NetworkName" {
            servers.insert(
                val.to_string(),
                DhcpServer {
                    network_name: val.to_string(),
                    ..DhcpServer::default()
                },
            );
            current = Some(val.to_string());
            return Ok(());
        }

        let Some(server) = current.as_ref().and_then(|n| servers.get_mut(n)) else {
            return Ok(());
        };
        match key {
            "IP" => server.ip_address = val.to_string(),
            "upperIPAddress" => server.upper_ip_address = val.to_string(),
            "lowerIPAddress" => server.lower_ip_address = val.to_string(),
            "NetworkMask" => server.network_mask = val.to_string(),
            "Enabled" => server.enabled = val == "Yes",
            _ => {}
        }
        Ok(())
    })?;

    Ok(servers)
}

/// Decode `list ostypes`, keyed by ID.
pub fn decode_os_types(text: &str) -> Result<BTreeMap<String, OsType>> {
    let mut types = BTreeMap::new();
    let mut current: Option<String> = None;

    parse_key_values(text, Grammar::Colon, |key, val| {
        if key == "ID" {
            types.insert(
                val.to_string(),
                OsType {
                    id: val.to_string(),
                    ..OsType::default()
                },
            );
            current = Some(val.to_string());
            return Ok(());
        }

        let Some(os) = current.as_ref().and_then(|id| types.get_mut(id)) else {
            return Ok(());
        };
        match key {
            "Description" => os.description = val.to_string(),
            "Family ID" => os.family_id = val.to_string(),
            "Family Desc" => os.family_description = val.to_string(),
            "64 bit" => os.bit64 = val == "true",
            _ => {}
        }
        Ok(())
    })?;

    Ok(types)
}

/// Decode `showmediuminfo`. The UUID is left unset when the output has none.
pub fn decode_medium_info(text: &str) -> Result<Disk> {
    let mut disk = Disk::default();

    parse_key_values(text, Grammar::Colon, |key, val| {
        match key {
            "UUID" => disk.uuid = Some(val.to_string()),
            "Location" => disk.path = PathBuf::from(val),
            "Storage format" => disk.format = DiskFormat::parse(val),
            // "1000 MBytes"
            "Capacity" => {
                if let Some(mb) = val.split_whitespace().next().and_then(|n| n.parse().ok()) {
                    disk.size_mb = mb;
                }
            }
            _ => {}
        }
        Ok(())
    })?;

    Ok(disk)
}

/// Name reported by `hostonlyif create`.
pub fn decode_created_interface(text: &str) -> Option<String> {
    let start = text.find("Interface '")? + "Interface '".len();
    let rest = &text[start..];
    let end = rest.find("' was successfully created")?;
    Some(rest[..end].to_string())
}
