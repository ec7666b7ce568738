//! Architecture tables.
//!
//! Everything that differs per architecture is looked up here once: the
//! serial console device, the QEMU system binary, and the network boot plan.
//! The set of architectures is closed, so an unknown name fails at parse
//! time and nothing downstream ever has to guess a default.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::InstallError;

/// Address of the host as seen from QEMU user networking (`man qemu-kvm`, `-netdev`).
pub const DEFAULT_QEMU_HOST_IPV4: &str = "10.0.2.2";

/// Host address inside the dedicated user-net subnet used for PXE.
pub const PXE_TFTP_IPV4: &str = "192.168.76.2";

/// Subnet and DHCP start handed to QEMU when the PXE subnet is in use.
pub const PXE_USER_NET: &str = "net=192.168.76.0/24,dhcpstart=192.168.76.9";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
    X86_64,
    Ppc64le,
    Aarch64,
    S390x,
}

impl Arch {
    pub const ALL: [Arch; 4] = [Arch::X86_64, Arch::Ppc64le, Arch::Aarch64, Arch::S390x];

    /// Architecture of the running host, in RPM naming.
    pub fn host() -> Result<Arch, InstallError> {
        let rpm_arch = match std::env::consts::ARCH {
            "powerpc64" => "ppc64le",
            other => other,
        };
        rpm_arch.parse()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Arch::X86_64 => "x86_64",
            Arch::Ppc64le => "ppc64le",
            Arch::Aarch64 => "aarch64",
            Arch::S390x => "s390x",
        }
    }

    /// Kernel console device for this architecture.
    pub fn console(self) -> &'static str {
        match self {
            Arch::X86_64 => "ttyS0",
            Arch::Ppc64le => "hvc0",
            Arch::Aarch64 => "ttyAMA0",
            Arch::S390x => "ttysclp0",
        }
    }

    pub fn qemu_system(self) -> &'static str {
        match self {
            Arch::X86_64 => "qemu-system-x86_64",
            Arch::Ppc64le => "qemu-system-ppc64",
            Arch::Aarch64 => "qemu-system-aarch64",
            Arch::S390x => "qemu-system-s390x",
        }
    }

    /// Network boot plan for this architecture.
    ///
    /// `syslinux_dir` is where prebuilt PXELINUX binaries live on the host;
    /// it is only consulted on architectures that boot through PXELINUX.
    pub fn pxe_plan(self, syslinux_dir: &Path) -> Result<PxeBootPlan, InstallError> {
        let plan = match self {
            Arch::X86_64 => PxeBootPlan {
                protocol: BootProtocol::Pxe,
                nic_model: "e1000",
                tftp_ip: PXE_TFTP_IPV4,
                boot_index: None,
                pxe_image_dir: Some(syslinux_dir.to_path_buf()),
                bootfile: None,
            },
            Arch::Ppc64le => PxeBootPlan {
                protocol: BootProtocol::Grub,
                nic_model: "virtio-net-pci",
                tftp_ip: PXE_TFTP_IPV4,
                boot_index: None,
                pxe_image_dir: None,
                bootfile: None,
            },
            // s390x has no prebuilt PXE image; one is synthesized per install.
            Arch::S390x => PxeBootPlan {
                protocol: BootProtocol::Pxe,
                nic_model: "virtio-net-ccw",
                tftp_ip: DEFAULT_QEMU_HOST_IPV4,
                boot_index: Some(1),
                pxe_image_dir: None,
                bootfile: None,
            },
            Arch::Aarch64 => {
                return Err(InstallError::unsupported(format!(
                    "network install is not supported on {}",
                    self
                )))
            }
        };
        Ok(plan)
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Arch {
    type Err = InstallError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Arch::ALL
            .into_iter()
            .find(|arch| arch.as_str() == s)
            .ok_or_else(|| InstallError::unsupported(format!("unsupported arch {}", s)))
    }
}

/// Second-stage boot protocol served over TFTP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootProtocol {
    Pxe,
    Grub,
}

/// How a given architecture gets from NIC firmware to the installer kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PxeBootPlan {
    pub protocol: BootProtocol,
    pub nic_model: &'static str,
    pub tftp_ip: &'static str,
    /// NIC `bootindex`; when unset the VM is told to boot from network once.
    pub boot_index: Option<u32>,
    /// Prebuilt PXELINUX binaries. `None` means an image must be synthesized.
    pub pxe_image_dir: Option<PathBuf>,
    /// Filled in by the boot chain builder.
    pub bootfile: Option<String>,
}

impl PxeBootPlan {
    /// Whether the dedicated PXE subnet has to be configured on the user netdev.
    pub fn needs_pxe_subnet(&self) -> bool {
        self.tftp_ip != DEFAULT_QEMU_HOST_IPV4
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn console_table() {
        let expected = [
            ("x86_64", "ttyS0"),
            ("ppc64le", "hvc0"),
            ("aarch64", "ttyAMA0"),
            ("s390x", "ttysclp0"),
        ];
        for (name, tty) in expected {
            let arch: Arch = name.parse().unwrap();
            assert_eq!(arch.console(), tty);
            assert_eq!(arch.to_string(), name);
        }
    }

    #[test]
    fn unknown_arch_is_rejected() {
        for name in ["riscv64", "", "X86_64", "i686"] {
            let err = name.parse::<Arch>().unwrap_err();
            assert!(matches!(err, InstallError::UnsupportedConfiguration(_)));
        }
    }

    #[test]
    fn pxe_plans() {
        let syslinux = Path::new("/usr/share/syslinux");

        let x86 = Arch::X86_64.pxe_plan(syslinux).unwrap();
        assert_eq!(x86.protocol, BootProtocol::Pxe);
        assert_eq!(x86.nic_model, "e1000");
        assert_eq!(x86.pxe_image_dir.as_deref(), Some(syslinux));
        assert!(x86.needs_pxe_subnet());
        assert!(x86.bootfile.is_none());

        let ppc = Arch::Ppc64le.pxe_plan(syslinux).unwrap();
        assert_eq!(ppc.protocol, BootProtocol::Grub);
        assert_eq!(ppc.nic_model, "virtio-net-pci");

        let s390 = Arch::S390x.pxe_plan(syslinux).unwrap();
        assert_eq!(s390.protocol, BootProtocol::Pxe);
        assert_eq!(s390.boot_index, Some(1));
        assert!(s390.pxe_image_dir.is_none());
        assert!(!s390.needs_pxe_subnet());
    }

    #[test]
    fn aarch64_has_no_network_install() {
        let err = Arch::Aarch64
            .pxe_plan(Path::new("/usr/share/syslinux"))
            .unwrap_err();
        assert!(matches!(err, InstallError::UnsupportedConfiguration(_)));
    }
}
