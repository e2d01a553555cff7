//! VM definition files

use crate::config::schema::{VirtualMachine, VirtualMachineSpec};
use crate::error::Result;
use std::fs::File;
use std::path::Path;

/// Load a VM spec from a JSON file
pub fn load_spec(path: &Path) -> Result<VirtualMachineSpec> {
    let f = File::open(path)?;
    let spec: VirtualMachineSpec = serde_json::from_reader(f)?;
    Ok(spec)
}

/// Save a VM, spec and observed state, to a JSON file
pub fn save_vm(path: &Path, vm: &VirtualMachine) -> Result<()> {
    let f = File::create(path)?;
    serde_json::to_writer_pretty(f, vm)?;
    Ok(())
}
