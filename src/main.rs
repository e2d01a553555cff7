use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use std::io;
use std::path::Path;
use tracing_subscriber::EnvFilter;

use vbm::cli::commands::{Cli, Cmd};
use vbm::cli::completions::{install_fish_completions, print_completions, write_man_page};
use vbm::config::{load_or_default, Config};
use vbm::vm::config::{load_spec, save_vm};
use vbm::vm::{ControlAction, VBox};
use vbm::{VirtualMachine, VirtualMachineSpec};

fn init_logging(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vbm=info")),
        1 => EnvFilter::new("vbm=debug"),
        _ => EnvFilter::new("vbm=trace"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn manager(config: &Config) -> Result<VBox> {
    VBox::from_config(config).context("failed to set up VirtualBox manager")
}

fn read_spec(path: &Path) -> Result<VirtualMachine> {
    let spec = load_spec(path).with_context(|| format!("failed to read spec {}", path.display()))?;
    Ok(VirtualMachine::new(spec))
}

fn by_name(name: &str) -> VirtualMachine {
    VirtualMachine::new(VirtualMachineSpec {
        name: name.to_string(),
        ..VirtualMachineSpec::default()
    })
}

fn print_json(vm: &VirtualMachine) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(vm)?);
    Ok(())
}

fn control(config: &Config, name: &str, action: ControlAction) -> Result<()> {
    let (verb, done) = match action {
        ControlAction::Start => ("start", "started"),
        ControlAction::PowerOff => ("stop", "stopped"),
        ControlAction::Pause => ("pause", "paused"),
        ControlAction::Resume => ("resume", "resumed"),
        _ => ("control", "updated"),
    };
    let vb = manager(config)?;
    vb.control(&by_name(name), action)
        .with_context(|| format!("failed to {verb} VM '{name}'"))?;
    println!("VM '{name}' {done}");
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.cmd {
        Cmd::Completions { shell } => {
            print_completions(shell, &mut Cli::command());
            return Ok(());
        }
        Cmd::InstallFish => {
            let path = install_fish_completions()?;
            println!("Fish completions installed to: {}", path.display());
            return Ok(());
        }
        Cmd::ManPage => {
            write_man_page(&mut io::stdout())?;
            return Ok(());
        }
        _ => {}
    }

    let config = load_or_default(cli.config.as_deref()).context("failed to load config")?;

    match cli.cmd {
        Cmd::Define { spec, output } => {
            let vm = read_spec(&spec)?;
            let mut vb = manager(&config)?;
            let mut vm = vb.ensure_defaults(vm)?;
            let defined = vb
                .define(&mut vm)
                .with_context(|| format!("failed to define VM '{}'", vm.spec.name))?;
            match output {
                Some(path) => save_vm(&path, &defined)?,
                None => print_json(&defined)?,
            }
        }
        Cmd::Defaults { spec } => {
            let vm = read_spec(&spec)?;
            let mut vb = manager(&config)?;
            print_json(&vb.ensure_defaults(vm)?)?;
        }
        Cmd::Info { vm } => {
            let vb = manager(&config)?;
            print_json(&vb.vm_info(&vm)?)?;
        }
        Cmd::Start { vm } => control(&config, &vm, ControlAction::Start)?,
        Cmd::Stop { vm } => control(&config, &vm, ControlAction::PowerOff)?,
        Cmd::Pause { vm } => control(&config, &vm, ControlAction::Pause)?,
        Cmd::Resume { vm } => control(&config, &vm, ControlAction::Resume)?,
        Cmd::Networks => {
            let mut vb = manager(&config)?;
            vb.sync_networks()?;
            let inv = vb.inventory();
            for (kind, nets) in [
                ("hostonly", &inv.host_only),
                ("bridged", &inv.bridged),
                ("intnet", &inv.internal),
                ("natnetwork", &inv.nat),
            ] {
                for nw in nets.values() {
                    println!("{kind:<12} {}", nw.name);
                }
            }
        }
        Cmd::Ostypes => {
            let vb = manager(&config)?;
            for os in vb.list_os_types()?.values() {
                println!("{:<24} {}", os.id, os.description);
            }
        }
        Cmd::Completions { .. } | Cmd::InstallFish | Cmd::ManPage => {}
    }

    Ok(())
}
