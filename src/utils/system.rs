//! System utility functions

use std::env;
use std::path::{Path, PathBuf};

/// Name of the VirtualBox management binary
pub const VBOXMANAGE: &str = "VBoxManage";

/// Environment variables the VirtualBox installers set to the install dir
const INSTALL_DIR_VARS: &[&str] = &["VBOX_MSI_INSTALL_PATH", "VBOX_INSTALL_PATH"];

/// Pick the VBoxManage path: explicit override, `PATH`, install dir, bare name
pub fn locate_vboxmanage(configured: Option<&Path>) -> PathBuf {
    if let Some(p) = configured {
        return p.to_path_buf();
    }

    if let Ok(p) = which::which(VBOXMANAGE) {
        return p;
    }

    for var in INSTALL_DIR_VARS {
        if let Some(dir) = env::var_os(var) {
            let candidate = PathBuf::from(dir).join(binary_name());
            if candidate.is_file() {
                return candidate;
            }
        }
    }

    PathBuf::from(VBOXMANAGE)
}

fn binary_name() -> String {
    if cfg!(windows) {
        format!("{VBOXMANAGE}.exe")
    } else {
        VBOXMANAGE.to_string()
    }
}
