use std::fs;
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use metal_install::preflight::{check_required_tools, required_tools, InstallMode};
use metal_install::{
    logging, Arch, BuildManifest, Firmware, InstallRequest, InstalledMachine, Installer,
    InstallerConfig,
};

/// Install a build onto a QEMU VM through a real install path.
#[derive(Parser, Debug)]
#[command(name = "metal-install", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Network install: PXE/GRUB boot the installer kernel.
    Pxe {
        #[command(flatten)]
        common: CommonArgs,
        /// Use the legacy installer kernel/initramfs.
        #[arg(long)]
        legacy: bool,
        /// Extra installer kernel argument (repeatable).
        #[arg(long = "karg", value_name = "ARG")]
        kargs: Vec<String>,
    },
    /// Boot the live ISO with an embedded install config.
    Iso {
        #[command(flatten)]
        common: CommonArgs,
        /// Ignition config for the live environment.
        #[arg(long, value_name = "FILE")]
        live_ignition: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Path to the build's meta.json.
    #[arg(long, value_name = "META_JSON")]
    build: PathBuf,
    /// Ignition config for the installed system.
    #[arg(long, value_name = "FILE")]
    ignition: PathBuf,
    /// Target architecture. Defaults to the host.
    #[arg(long)]
    arch: Option<Arch>,
    #[arg(long, default_value = "bios")]
    firmware: Firmware,
    /// Host tool configuration (TOML).
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Skip image signature verification.
    #[arg(long)]
    insecure: bool,
    /// Attach the guest console to this terminal.
    #[arg(long)]
    console: bool,
    /// Raw argument appended to the QEMU command line (repeatable).
    #[arg(long = "qemu-arg", value_name = "ARG", allow_hyphen_values = true)]
    qemu_args: Vec<String>,
}

impl CommonArgs {
    fn config(&self) -> Result<InstallerConfig> {
        match &self.config {
            Some(path) => InstallerConfig::load(path),
            None => Ok(InstallerConfig::default()),
        }
    }

    fn request(&self) -> Result<InstallRequest> {
        let build = BuildManifest::load(&self.build)?;
        let arch = match self.arch {
            Some(arch) => arch,
            None => Arch::host()?,
        };
        let mut req = InstallRequest::new(build, arch);
        req.firmware = self.firmware;
        req.insecure = self.insecure;
        req.console = self.console;
        req.qemu_args = self.qemu_args.clone();
        req.ignition = read_text(&self.ignition)?;
        Ok(req)
    }
}

fn read_text(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("reading '{}'", path.display()))
}

fn main() -> Result<()> {
    logging::init();
    let cli = Cli::parse();

    let (installer, req, mode) = match cli.command {
        Command::Pxe {
            common,
            legacy,
            kargs,
        } => {
            let mut req = common.request()?;
            req.legacy_installer = legacy;
            req.kargs = kargs;
            (Installer::new(common.config()?), req, InstallMode::Network)
        }
        Command::Iso {
            common,
            live_ignition,
        } => {
            let mut req = common.request()?;
            req.live_ignition = live_ignition.as_deref().map(read_text).transpose()?;
            (Installer::new(common.config()?), req, InstallMode::IsoEmbed)
        }
    };

    check_required_tools(&required_tools(installer.config(), req.arch, mode))?;

    let machine = match mode {
        InstallMode::Network => installer.pxe(&req)?,
        InstallMode::IsoEmbed => installer.install_via_iso_embed(&req)?,
    };
    wait_for_operator(&machine)?;
    machine.destroy()
}

fn wait_for_operator(machine: &InstalledMachine) -> Result<()> {
    tracing::info!(
        workdir = %machine.workdir().display(),
        content_url = machine.content_url(),
        pid = ?machine.vm().pid(),
        "machine running; press Enter to tear down"
    );
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("reading stdin")?;
    Ok(())
}
