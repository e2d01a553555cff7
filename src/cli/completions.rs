//! Shell completion utilities

use crate::cli::commands::Cli;
use crate::error::{Error, Result};
use clap::CommandFactory;
use clap_complete::{generate, Generator, Shell};
use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;

/// Generate shell completions
pub fn print_completions<G: Generator>(gen: G, cmd: &mut clap::Command) {
    generate(gen, cmd, cmd.get_name().to_string(), &mut std::io::stdout());
}

/// Install Fish completions automatically
pub fn install_fish_completions() -> Result<PathBuf> {
    let home_dir = dirs::home_dir()
        .ok_or_else(|| Error::InvalidArgument("could not find home directory".into()))?;

    let fish_dir = home_dir.join(".config").join("fish").join("completions");
    fs::create_dir_all(&fish_dir)?;

    let completion_file = fish_dir.join("vbm.fish");
    let mut cmd = Cli::command();
    let mut file = File::create(&completion_file)?;

    generate(Shell::Fish, &mut cmd, "vbm", &mut file);
    Ok(completion_file)
}

/// Render the man page to `out`
pub fn write_man_page(out: &mut impl Write) -> Result<()> {
    let man = clap_mangen::Man::new(Cli::command());
    man.render(out)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_man_page_names_commands() {
        let mut buf = Vec::new();
        write_man_page(&mut buf).unwrap();
        let page = String::from_utf8(buf).unwrap();
        assert!(page.contains("vbm"));
        assert!(page.contains("define"));
    }
}
