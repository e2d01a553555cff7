//! Path utility functions

use crate::error::{Error, Result};
use std::path::{Component, Path, PathBuf};

/// Extension of VirtualBox machine settings files
pub const SETTINGS_EXT: &str = "vbox";

/// Get the default base directory for VM folders
pub fn default_base_path() -> Result<PathBuf> {
    Ok(dirs::home_dir()
        .ok_or_else(|| {
            Error::InvalidArgument("basepath not supplied and no home directory found".into())
        })?
        .join("VirtualBox VMs"))
}

/// Resolve path under root directory
pub fn resolve_under_root(root: &Path, p: &Path) -> PathBuf {
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        root.join(p)
    }
}

/// Directory of a VM: `<base>/<group...>/<name>`
pub fn vm_base_dir(base: &Path, group: Option<&str>, name: &str) -> PathBuf {
    let mut dir = base.to_path_buf();
    if let Some(group) = group {
        // groups are rooted ("/example") but must nest under base
        dir.extend(group.split('/').filter(|s| !s.is_empty()));
    }
    dir.join(name)
}

/// Settings file of a VM: `<base>/<group...>/<name>/<name>.vbox`
pub fn settings_file(base: &Path, group: Option<&str>, name: &str) -> PathBuf {
    vm_base_dir(base, group, name).join(format!("{name}.{SETTINGS_EXT}"))
}

/// Recover the group of a VM from where its settings file lives
pub fn group_from_settings_file(base: &Path, cfg_file: &Path) -> Option<String> {
    let rel = cfg_file.strip_prefix(base).ok()?;
    let elems: Vec<String> = rel
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();

    // <group...>/<name>/<name>.vbox
    if elems.len() >= 3 {
        Some(format!("/{}", elems[..elems.len() - 2].join("/")))
    } else {
        None
    }
}
