//! Install orchestration.
//!
//! Two ways to get a metal image onto a VM disk:
//!
//! - [`Installer::pxe`]: boot the installer kernel over the network
//!   (PXELINUX, GRUB netboot, or a synthesized s390x image) and let it
//!   fetch the metal image and target config from a content server.
//! - [`Installer::install_via_iso_embed`]: boot a copy of the live ISO with
//!   an embedded config that runs `coreos-installer` against the content
//!   server.
//!
//! Each attempt stages into its own scratch directory and its own server
//! port, so concurrent attempts share nothing. The scratch directory belongs
//! to the attempt until the VM is running; only then does it move into the
//! returned [`InstalledMachine`]. Any earlier failure drops it, which
//! removes it.

use std::fs;
use std::path::PathBuf;

use crate::arch::{Arch, PxeBootPlan, DEFAULT_QEMU_HOST_IPV4, PXE_USER_NET};
use crate::artifacts::{ArtifactKind, BuildManifest, KernelSetup};
use crate::bootchain::{BootChain, BootChainContext};
use crate::config::InstallerConfig;
use crate::content_server::ContentServer;
use crate::error::{InstallError, Result};
use crate::fsutil::{abs_symlink, reflink_copy, write_file};
use crate::ignition::{self, TARGET_CONFIG_NAME};
use crate::kargs::{self, KargsInput, CONFIG_NAME};
use crate::machine::InstalledMachine;
use crate::metal::stage_metal_image;
use crate::qemu::{Disk, Firmware, QemuBuilder, QemuLauncher, RunningVm, VmLauncher};
use crate::scratch::ScratchDir;

/// Memory floor for live installer environments (in MiB); the live rootfs lives in RAM.
pub const LIVE_MEMORY_MIB: u32 = 4096;

/// Memory floor for s390x guests (in MiB).
pub const S390X_MEMORY_MIB: u32 = 16384;

/// Fixed MAC so the guest's network identity is stable across runs.
const NIC_MAC: &str = "52:54:00:12:34:56";

/// Everything the caller decides about one install attempt.
#[derive(Debug, Clone)]
pub struct InstallRequest {
    pub build: BuildManifest,
    pub arch: Arch,
    pub firmware: Firmware,
    /// Pass the guest console through to our stdio.
    pub console: bool,
    /// Skip image signature verification in the installer.
    pub insecure: bool,
    /// Raw arguments appended to the QEMU command line.
    pub qemu_args: Vec<String>,
    /// Use the legacy installer kernel/initramfs instead of the live ones.
    pub legacy_installer: bool,
    /// Extra kernel arguments for the installer (network installs only).
    pub kargs: Vec<String>,
    /// Ignition config for the installed system.
    pub ignition: String,
    /// Ignition config for the live environment (ISO installs only).
    pub live_ignition: Option<String>,
}

impl InstallRequest {
    pub fn new(build: BuildManifest, arch: Arch) -> Self {
        Self {
            build,
            arch,
            firmware: Firmware::Bios,
            console: false,
            insecure: false,
            qemu_args: Vec::new(),
            legacy_installer: false,
            kargs: Vec::new(),
            ignition: String::new(),
            live_ignition: None,
        }
    }
}

/// Runs install attempts.
pub struct Installer {
    config: InstallerConfig,
    launcher: Box<dyn VmLauncher>,
}

impl std::fmt::Debug for Installer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Installer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Installer {
    /// Installer that boots real QEMU processes.
    pub fn new(config: InstallerConfig) -> Self {
        let launcher = Box::new(QemuLauncher::new(config.qemu_img.clone()));
        Self { config, launcher }
    }

    pub fn with_launcher(config: InstallerConfig, launcher: Box<dyn VmLauncher>) -> Self {
        Self { config, launcher }
    }

    pub fn config(&self) -> &InstallerConfig {
        &self.config
    }

    fn new_builder(&self, req: &InstallRequest) -> QemuBuilder {
        let mut builder = QemuBuilder::new(req.arch, req.firmware, self.config.memory_mib);
        builder.add_disk(Disk {
            size: self.config.disk_size.clone(),
        });
        if req.arch == Arch::S390x {
            builder.ensure_memory(S390X_MEMORY_MIB);
        }
        builder.set_inherit_console(req.console);
        builder
    }

    /// Network install through the live (or legacy) installer.
    pub fn pxe(&self, req: &InstallRequest) -> Result<InstalledMachine> {
        req.build.require(ArtifactKind::Metal)?;
        let live = !req.legacy_installer;
        let kern = req.build.kernel_setup(req.legacy_installer)?;
        let pxe = req.arch.pxe_plan(&self.config.syslinux_dir)?;
        tracing::info!(
            build = req.build.label(),
            arch = %req.arch,
            installer = if live { "live" } else { "legacy" },
            "starting network install"
        );

        let mut session = InstallSession::setup(self, req, kern, pxe)?;
        match session.boot(self, req, live) {
            Ok((vm, kargs)) => Ok(session.into_machine(vm, kargs)),
            Err(e) => {
                session.destroy();
                Err(e)
            }
        }
    }

    /// Install by booting the live ISO with an embedded config.
    pub fn install_via_iso_embed(&self, req: &InstallRequest) -> Result<InstalledMachine> {
        if !req.kargs.is_empty() {
            return Err(InstallError::unsupported(
                "injecting kernel arguments is not supported with ISO-embed installs",
            ));
        }
        let metal = req.build.require(ArtifactKind::Metal)?;
        let live_iso = req.build.require(ArtifactKind::LiveIso)?;
        let live_config = match &req.live_ignition {
            Some(text) => ignition::parse_config(text, "live")?,
            None => serde_json::json!({ "ignition": { "version": ignition::IGNITION_VERSION } }),
        };
        tracing::info!(build = req.build.label(), arch = %req.arch, "starting ISO-embed install");

        let scratch = ScratchDir::new_in(&self.config.tmp_root(), "mantle-metal")
            .map_err(|e| InstallError::Staging {
                step: "creating scratch directory".to_string(),
                source: e.into(),
            })?;

        write_file(&scratch.path().join(TARGET_CONFIG_NAME), &req.ignition)
            .map_err(InstallError::staging("writing target config"))?;
        let metal_name = stage_metal_image(&req.build.build_dir, metal, scratch.path())
            .map_err(InstallError::staging("setting up metal image"))?;

        let server = ContentServer::start(scratch.path(), DEFAULT_QEMU_HOST_IPV4)
            .map_err(InstallError::NetworkSetup)?;

        let installer_layer =
            ignition::installer_config(server.base_url(), &metal_name, req.insecure);
        let merged = ignition::live_config(live_config, installer_layer);
        let serialized = serde_json::to_string(&merged)
            .map_err(|e| InstallError::staging("serializing live config")(e.into()))?;

        let iso = scratch.path().join("test.iso");
        reflink_copy(&self.config.cp, &req.build.artifact_path(live_iso), &iso)
            .map_err(InstallError::staging("copying iso"))?;
        ignition::embed_iso(&self.config.coreos_installer, &iso, &serialized)?;

        let mut builder = self.new_builder(req);
        builder.ensure_memory(LIVE_MEMORY_MIB);
        builder.add_install_iso(iso);
        builder.append(req.qemu_args.iter().cloned());

        let vm = self
            .launcher
            .launch(&builder, scratch.path())
            .map_err(InstallError::Launch)?;
        Ok(InstalledMachine::new(
            scratch,
            vm,
            Vec::new(),
            server.base_url().to_string(),
        ))
    }
}

/// State of one network install attempt between staging and launch.
#[derive(Debug)]
pub struct InstallSession {
    scratch: ScratchDir,
    tftp_dir: PathBuf,
    builder: QemuBuilder,
    kern: KernelSetup,
    pxe: PxeBootPlan,
    metal_name: String,
    server: ContentServer,
}

impl InstallSession {
    /// Stage the content directory and start serving it.
    fn setup(
        installer: &Installer,
        req: &InstallRequest,
        kern: KernelSetup,
        pxe: PxeBootPlan,
    ) -> Result<Self> {
        let config = &installer.config;
        let builder = installer.new_builder(req);

        let scratch = ScratchDir::new_in(&config.tmp_root(), "kola-testiso").map_err(|e| {
            InstallError::Staging {
                step: "creating scratch directory".to_string(),
                source: e.into(),
            }
        })?;
        let tftp_dir = scratch.path().join("tftp");
        fs::create_dir(&tftp_dir).map_err(|e| InstallError::Staging {
            step: "creating tftp directory".to_string(),
            source: e.into(),
        })?;

        let build_dir = &req.build.build_dir;
        write_file(&tftp_dir.join(CONFIG_NAME), &req.ignition)
            .map_err(InstallError::staging("writing target config"))?;
        for name in [&kern.kernel, &kern.initramfs] {
            abs_symlink(&build_dir.join(name), &tftp_dir.join(name))
                .map_err(InstallError::staging(format!("linking {name}")))?;
        }

        let metal = req.build.require(ArtifactKind::Metal)?;
        let metal_name = stage_metal_image(build_dir, metal, &tftp_dir)
            .map_err(InstallError::staging("setting up metal image"))?;

        let server =
            ContentServer::start(&tftp_dir, pxe.tftp_ip).map_err(InstallError::NetworkSetup)?;

        Ok(Self {
            scratch,
            tftp_dir,
            builder,
            kern,
            pxe,
            metal_name,
            server,
        })
    }

    /// Compose kernel arguments, build the boot chain and launch the VM.
    fn boot(
        &mut self,
        installer: &Installer,
        req: &InstallRequest,
        live: bool,
    ) -> Result<(Box<dyn RunningVm>, Vec<String>)> {
        if live {
            self.builder.ensure_memory(LIVE_MEMORY_MIB);
        }
        let kargs = kargs::compose(
            req.arch,
            &KargsInput {
                base_url: self.server.base_url(),
                metal_name: &self.metal_name,
                live,
                insecure: req.insecure,
                extra: &req.kargs,
            },
        );
        tracing::info!(kargs = %kargs.join(" "), "installer kernel arguments");

        let bootfile = self.complete_pxe_setup(installer, req, &kargs.join(" "))?;
        let vm = self.run(installer, req, &bootfile)?;
        Ok((vm, kargs))
    }

    fn complete_pxe_setup(
        &mut self,
        installer: &Installer,
        req: &InstallRequest,
        kargs: &str,
    ) -> Result<String> {
        let chain = BootChain::for_plan(&self.pxe);
        tracing::info!(chain = ?chain, "building boot chain");
        let bootfile = chain.build(&BootChainContext {
            arch: req.arch,
            tftp_dir: &self.tftp_dir,
            build_dir: &req.build.build_dir,
            kern: &self.kern,
            kargs,
            config: &installer.config,
        })?;
        self.pxe.bootfile = Some(bootfile.clone());
        Ok(bootfile)
    }

    fn run(
        &self,
        installer: &Installer,
        req: &InstallRequest,
        bootfile: &str,
    ) -> Result<Box<dyn RunningVm>> {
        let mut builder = self.builder.clone();

        let mut netdev = format!("{},netdev=mynet0,mac={NIC_MAC}", self.pxe.nic_model);
        match self.pxe.boot_index {
            Some(index) => netdev.push_str(&format!(",bootindex={index}")),
            None => builder.append([
                "-boot".to_string(),
                "once=n".to_string(),
                "-option-rom".to_string(),
                installer.config.pxe_option_rom.display().to_string(),
            ]),
        }
        builder.append(["-device".to_string(), netdev]);

        let mut usernet = format!(
            "user,id=mynet0,tftp={},bootfile={}",
            self.tftp_dir.display(),
            bootfile
        );
        if self.pxe.needs_pxe_subnet() {
            usernet.push(',');
            usernet.push_str(PXE_USER_NET);
        }
        builder.append(["-netdev".to_string(), usernet]);
        builder.append(req.qemu_args.iter().cloned());

        installer
            .launcher
            .launch(&builder, self.scratch.path())
            .map_err(InstallError::Launch)
    }

    /// Hand the scratch directory to the running machine.
    fn into_machine(self, vm: Box<dyn RunningVm>, kargs: Vec<String>) -> InstalledMachine {
        let base_url = self.server.base_url().to_string();
        InstalledMachine::new(self.scratch, vm, kargs, base_url)
    }

    /// Roll back: remove everything staged so far.
    fn destroy(self) {
        let path = self.scratch.path().to_path_buf();
        if let Err(e) = self.scratch.release() {
            tracing::warn!(path = %path.display(), error = %e, "removing scratch directory");
        }
    }
}
