//! QEMU driver.
//!
//! `QemuBuilder` describes the VM (disks, firmware, memory, install medium,
//! extra raw arguments) and turns that into a `qemu-system-*` command line.
//! Starting it goes through [`VmLauncher`], so install flows can be driven
//! without a hypervisor.

use anyhow::{Context, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::str::FromStr;

use crate::arch::Arch;
use crate::error::InstallError;
use crate::process::Cmd;

/// Name of the serial log written when the console is not inherited.
pub const CONSOLE_LOG: &str = "console.txt";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Firmware {
    Bios,
    Uefi,
}

impl FromStr for Firmware {
    type Err = InstallError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bios" | "" => Ok(Firmware::Bios),
            "uefi" => Ok(Firmware::Uefi),
            other => Err(InstallError::unsupported(format!(
                "unknown firmware '{other}' (expected 'bios' or 'uefi')"
            ))),
        }
    }
}

impl fmt::Display for Firmware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Firmware::Bios => "bios",
            Firmware::Uefi => "uefi",
        })
    }
}

/// A blank qcow2 disk created in the VM's work directory at launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disk {
    pub size: String,
}

/// Description of a VM to start.
#[derive(Debug, Clone)]
pub struct QemuBuilder {
    arch: Arch,
    firmware: Firmware,
    memory_mib: u32,
    disks: Vec<Disk>,
    install_iso: Option<PathBuf>,
    inherit_console: bool,
    args: Vec<String>,
}

impl QemuBuilder {
    pub fn new(arch: Arch, firmware: Firmware, memory_mib: u32) -> Self {
        Self {
            arch,
            firmware,
            memory_mib,
            disks: Vec::new(),
            install_iso: None,
            inherit_console: false,
            args: Vec::new(),
        }
    }

    pub fn arch(&self) -> Arch {
        self.arch
    }

    pub fn firmware(&self) -> Firmware {
        self.firmware
    }

    pub fn memory_mib(&self) -> u32 {
        self.memory_mib
    }

    /// Raise guest memory to at least `floor_mib`.
    pub fn ensure_memory(&mut self, floor_mib: u32) {
        self.memory_mib = self.memory_mib.max(floor_mib);
    }

    pub fn disks(&self) -> &[Disk] {
        &self.disks
    }

    pub fn add_disk(&mut self, disk: Disk) {
        self.disks.push(disk);
    }

    pub fn install_iso(&self) -> Option<&Path> {
        self.install_iso.as_deref()
    }

    /// Attach an ISO the VM boots from once its disks turn out to be empty.
    pub fn add_install_iso(&mut self, iso: PathBuf) {
        self.install_iso = Some(iso);
    }

    pub fn set_inherit_console(&mut self, inherit: bool) {
        self.inherit_console = inherit;
    }

    pub fn inherit_console(&self) -> bool {
        self.inherit_console
    }

    /// Raw arguments appended after everything the builder generates.
    pub fn append<I, S>(&mut self, args: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
    }

    pub fn extra_args(&self) -> &[String] {
        &self.args
    }

    pub fn disk_path(workdir: &Path, index: usize) -> PathBuf {
        workdir.join(format!("disk{index}.qcow2"))
    }

    fn virtio_bus(&self) -> &'static str {
        if self.arch == Arch::S390x {
            "ccw"
        } else {
            "pci"
        }
    }

    /// Build the command line. Disk images are expected at [`Self::disk_path`].
    pub fn build(&self, workdir: &Path) -> Result<Command> {
        let mut cmd = Command::new(self.arch.qemu_system());

        match self.arch {
            Arch::Ppc64le => {
                cmd.args(["-machine", "pseries"]);
            }
            Arch::Aarch64 => {
                cmd.args(["-machine", "virt"]);
            }
            Arch::S390x => {
                cmd.args(["-machine", "s390-ccw-virtio"]);
            }
            Arch::X86_64 => {}
        }

        // Enable KVM acceleration if available
        if Path::new("/dev/kvm").exists() {
            cmd.args(["-enable-kvm", "-cpu", "host"]);
        } else if self.arch == Arch::Aarch64 {
            cmd.args(["-cpu", "cortex-a57"]);
        }

        cmd.args(["-smp", "2"]);
        cmd.args(["-m", &self.memory_mib.to_string()]);

        if self.firmware == Firmware::Uefi {
            let code = find_uefi_firmware(self.arch).with_context(|| {
                format!("no UEFI firmware found for {}", self.arch)
            })?;
            cmd.args([
                "-drive",
                &format!("if=pflash,format=raw,readonly=on,file={}", code.display()),
            ]);
        }

        let bus = self.virtio_bus();
        for (index, _) in self.disks.iter().enumerate() {
            let path = Self::disk_path(workdir, index);
            if self.install_iso.is_some() {
                // Explicit boot order: installed disk first, ISO as fallback.
                cmd.args([
                    "-drive",
                    &format!("if=none,id=disk{index},format=qcow2,file={}", path.display()),
                    "-device",
                    &format!("virtio-blk-{bus},drive=disk{index},bootindex={}", index + 1),
                ]);
            } else {
                cmd.args([
                    "-drive",
                    &format!("if=virtio,format=qcow2,file={}", path.display()),
                ]);
            }
        }

        if let Some(iso) = &self.install_iso {
            let bootindex = self.disks.len() + 1;
            cmd.args([
                "-drive",
                &format!(
                    "if=none,id=installiso,format=raw,media=cdrom,readonly=on,file={}",
                    iso.display()
                ),
            ]);
            if self.arch == Arch::X86_64 {
                // Use AHCI for consistency with real hardware
                cmd.args([
                    "-device",
                    "ahci,id=ahci0",
                    "-device",
                    &format!("ide-cd,drive=installiso,bus=ahci0.0,bootindex={bootindex}"),
                ]);
            } else {
                cmd.args([
                    "-device",
                    &format!("virtio-scsi-{bus},id=scsi0"),
                    "-device",
                    &format!("scsi-cd,drive=installiso,bus=scsi0.0,bootindex={bootindex}"),
                ]);
            }
        }

        if self.inherit_console {
            cmd.arg("-nographic");
        } else {
            cmd.args(["-display", "none"]);
            cmd.args([
                "-serial",
                &format!("file:{}", workdir.join(CONSOLE_LOG).display()),
            ]);
        }

        cmd.args(&self.args);
        Ok(cmd)
    }
}

/// Find UEFI firmware code for `arch`.
pub fn find_uefi_firmware(arch: Arch) -> Option<PathBuf> {
    let candidates: &[&str] = match arch {
        Arch::X86_64 => &[
            // Fedora/RHEL
            "/usr/share/edk2/ovmf/OVMF_CODE.fd",
            "/usr/share/OVMF/OVMF_CODE.fd",
            // Debian/Ubuntu
            "/usr/share/OVMF/OVMF_CODE_4M.fd",
            "/usr/share/qemu/OVMF.fd",
            // Arch
            "/usr/share/edk2-ovmf/x64/OVMF_CODE.fd",
        ],
        Arch::Aarch64 => &[
            "/usr/share/edk2/aarch64/QEMU_EFI-pflash.raw",
            "/usr/share/AAVMF/AAVMF_CODE.fd",
        ],
        Arch::Ppc64le | Arch::S390x => &[],
    };

    candidates.iter().map(PathBuf::from).find(|p| p.exists())
}

/// A started VM.
pub trait RunningVm: fmt::Debug + Send {
    fn pid(&self) -> Option<u32>;

    /// Stop the VM. Safe to call on an already stopped VM.
    fn kill(&mut self) -> Result<()>;
}

/// Starts VMs described by a [`QemuBuilder`].
pub trait VmLauncher: Send + Sync {
    /// `workdir` is owned by the caller and outlives the VM.
    fn launch(&self, builder: &QemuBuilder, workdir: &Path) -> Result<Box<dyn RunningVm>>;
}

/// Launches real `qemu-system-*` processes.
#[derive(Debug, Clone)]
pub struct QemuLauncher {
    qemu_img: String,
}

impl QemuLauncher {
    pub fn new(qemu_img: impl Into<String>) -> Self {
        Self {
            qemu_img: qemu_img.into(),
        }
    }
}

impl VmLauncher for QemuLauncher {
    fn launch(&self, builder: &QemuBuilder, workdir: &Path) -> Result<Box<dyn RunningVm>> {
        for (index, disk) in builder.disks().iter().enumerate() {
            Cmd::new(&self.qemu_img)
                .args(["create", "-q", "-f", "qcow2"])
                .arg_path(&QemuBuilder::disk_path(workdir, index))
                .arg(&disk.size)
                .error_msg("qemu-img create failed")
                .run()?;
        }

        let mut cmd = builder.build(workdir)?;
        cmd.stdin(Stdio::null());
        if !builder.inherit_console() {
            cmd.stdout(Stdio::null());
        }
        tracing::debug!(command = ?cmd, "starting qemu");

        let child = cmd
            .spawn()
            .with_context(|| format!("spawning {}", builder.arch().qemu_system()))?;
        tracing::info!(pid = child.id(), "qemu started");
        Ok(Box::new(QemuInstance { child: Some(child) }))
    }
}

/// A running QEMU process. Killed on drop.
#[derive(Debug)]
pub struct QemuInstance {
    child: Option<Child>,
}

impl RunningVm for QemuInstance {
    fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    fn kill(&mut self) -> Result<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        if child.try_wait()?.is_none() {
            child.kill().context("killing qemu")?;
        }
        let status = child.wait().context("reaping qemu")?;
        tracing::debug!(%status, "qemu exited");
        Ok(())
    }
}

impl Drop for QemuInstance {
    fn drop(&mut self) {
        if let Err(e) = self.kill() {
            tracing::warn!(error = %e, "stopping qemu");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(cmd: &Command) -> Vec<String> {
        cmd.get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn firmware_parse() {
        assert_eq!("bios".parse::<Firmware>().unwrap(), Firmware::Bios);
        assert_eq!("uefi".parse::<Firmware>().unwrap(), Firmware::Uefi);
        assert!(matches!(
            "coreboot".parse::<Firmware>(),
            Err(InstallError::UnsupportedConfiguration(_))
        ));
    }

    #[test]
    fn memory_only_rises() {
        let mut builder = QemuBuilder::new(Arch::X86_64, Firmware::Bios, 1536);
        builder.ensure_memory(4096);
        assert_eq!(builder.memory_mib(), 4096);
        builder.ensure_memory(2048);
        assert_eq!(builder.memory_mib(), 4096);
    }

    #[test]
    fn network_boot_command_line() {
        let workdir = Path::new("/tmp/work");
        let mut builder = QemuBuilder::new(Arch::X86_64, Firmware::Bios, 1536);
        builder.add_disk(Disk {
            size: "12G".to_string(),
        });
        builder.append(["-boot", "once=n"]);

        let cmd = builder.build(workdir).unwrap();
        assert_eq!(cmd.get_program(), "qemu-system-x86_64");
        let args = args(&cmd);
        let joined = args.join(" ");
        assert!(joined.contains("-m 1536"));
        assert!(joined.contains("-drive if=virtio,format=qcow2,file=/tmp/work/disk0.qcow2"));
        assert!(joined.contains("-serial file:/tmp/work/console.txt"));
        assert_eq!(&args[args.len() - 2..], ["-boot", "once=n"]);
        assert!(!joined.contains("bootindex"));
    }

    #[test]
    fn install_iso_boots_after_disk() {
        let mut builder = QemuBuilder::new(Arch::Ppc64le, Firmware::Bios, 4096);
        builder.add_disk(Disk {
            size: "12G".to_string(),
        });
        builder.add_install_iso(PathBuf::from("/tmp/work/test.iso"));
        builder.set_inherit_console(true);

        let cmd = builder.build(Path::new("/tmp/work")).unwrap();
        assert_eq!(cmd.get_program(), "qemu-system-ppc64");
        let joined = args(&cmd).join(" ");
        assert!(joined.contains("virtio-blk-pci,drive=disk0,bootindex=1"));
        assert!(joined.contains("scsi-cd,drive=installiso,bus=scsi0.0,bootindex=2"));
        assert!(joined.contains("file=/tmp/work/test.iso"));
        assert!(joined.contains("-nographic"));
    }

    #[test]
    fn s390x_uses_ccw() {
        let mut builder = QemuBuilder::new(Arch::S390x, Firmware::Bios, 16384);
        builder.add_disk(Disk {
            size: "12G".to_string(),
        });
        builder.add_install_iso(PathBuf::from("/w/test.iso"));
        let joined = args(&builder.build(Path::new("/w")).unwrap()).join(" ");
        assert!(joined.contains("-machine s390-ccw-virtio"));
        assert!(joined.contains("virtio-blk-ccw,drive=disk0"));
        assert!(joined.contains("virtio-scsi-ccw,id=scsi0"));
    }

    #[test]
    fn instance_kill_is_idempotent() {
        let child = Command::new("sleep").arg("30").spawn().unwrap();
        let mut vm = QemuInstance { child: Some(child) };
        assert!(vm.pid().is_some());
        vm.kill().unwrap();
        vm.kill().unwrap();
        assert!(vm.pid().is_none());
    }
}
