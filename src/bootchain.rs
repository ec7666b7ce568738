//! Second-stage network boot chain.
//!
//! Each architecture boots the installer through exactly one chain, picked
//! from its [`PxeBootPlan`]:
//!
//! - [`BootChain::PxePrebuilt`]: PXELINUX binaries copied from the host.
//! - [`BootChain::PxeSynthesized`]: no prebuilt loader exists (s390x), so a
//!   network boot image is built from kernel, initramfs and parmfile.
//! - [`BootChain::Grub`]: a GRUB netboot directory plus `grub.cfg`.
//!
//! Every chain yields the bootfile path, relative to the TFTP root.

use anyhow::Context;
use indoc::formatdoc;
use std::path::{Path, PathBuf};

use crate::arch::{Arch, BootProtocol, PxeBootPlan};
use crate::artifacts::KernelSetup;
use crate::config::InstallerConfig;
use crate::error::{InstallError, Result};
use crate::fsutil::{reflink_copy, write_file};
use crate::process::Cmd;

/// PXELINUX loader and its one required module.
pub const PXE_IMAGES: [&str; 2] = ["pxelinux.0", "ldlinux.c32"];

pub const PXE_CONFIG_DIR: &str = "pxelinux.cfg";

pub const GRUB_BOOTFILE: &str = "/boot/grub2/powerpc-ieee1275/core.elf";

pub const GRUB_CONFIG: &str = "boot/grub2/grub.cfg";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootChain {
    PxePrebuilt { image_dir: PathBuf },
    PxeSynthesized,
    Grub,
}

/// Everything a chain needs to emit its artifacts.
#[derive(Debug)]
pub struct BootChainContext<'a> {
    pub arch: Arch,
    pub tftp_dir: &'a Path,
    pub build_dir: &'a Path,
    pub kern: &'a KernelSetup,
    pub kargs: &'a str,
    pub config: &'a InstallerConfig,
}

impl BootChain {
    pub fn for_plan(plan: &PxeBootPlan) -> Self {
        match (plan.protocol, &plan.pxe_image_dir) {
            (BootProtocol::Pxe, Some(dir)) => BootChain::PxePrebuilt {
                image_dir: dir.clone(),
            },
            (BootProtocol::Pxe, None) => BootChain::PxeSynthesized,
            (BootProtocol::Grub, _) => BootChain::Grub,
        }
    }

    /// Emit the chain into the TFTP root and return the bootfile.
    pub fn build(&self, ctx: &BootChainContext<'_>) -> Result<String> {
        match self {
            BootChain::PxePrebuilt { image_dir } => {
                write_pxe_config(ctx)?;
                for img in PXE_IMAGES {
                    reflink_copy(&ctx.config.cp, &image_dir.join(img), &ctx.tftp_dir.join(img))
                        .map_err(InstallError::boot_chain(format!("copying {img}")))?;
                }
                Ok(format!("/{}", PXE_IMAGES[0]))
            }
            BootChain::PxeSynthesized => {
                let pxe_config = write_pxe_config(ctx)?;
                Cmd::new(ctx.config.mk_s390image.as_os_str())
                    .arg_path(&ctx.build_dir.join(&ctx.kern.kernel))
                    .arg("-r")
                    .arg_path(&ctx.build_dir.join(&ctx.kern.initramfs))
                    .arg("-p")
                    .arg_path(&pxe_config)
                    .arg_path(&ctx.tftp_dir.join(PXE_IMAGES[0]))
                    .error_msg("mk-s390image failed")
                    .run()
                    .map_err(InstallError::boot_chain("synthesizing network boot image"))?;
                Ok(format!("/{}", PXE_IMAGES[0]))
            }
            BootChain::Grub => {
                Cmd::new(&ctx.config.grub_mknetdir)
                    .arg(format!("--net-directory={}", ctx.tftp_dir.display()))
                    .error_msg("grub2-mknetdir failed")
                    .run()
                    .map_err(InstallError::boot_chain("creating GRUB netboot directory"))?;
                write_file(
                    &ctx.tftp_dir.join(GRUB_CONFIG),
                    grub_config(ctx.kern, ctx.kargs),
                )
                .map_err(InstallError::boot_chain("writing grub.cfg"))?;
                Ok(GRUB_BOOTFILE.to_string())
            }
        }
    }
}

fn write_pxe_config(ctx: &BootChainContext<'_>) -> Result<PathBuf> {
    let path = ctx.tftp_dir.join(PXE_CONFIG_DIR).join("default");
    write_file(&path, pxe_config(ctx.arch, ctx.kern, ctx.kargs))
        .context("writing PXE config")
        .map_err(InstallError::boot_chain("writing pxelinux.cfg/default"))?;
    Ok(path)
}

/// `pxelinux.cfg/default` contents.
///
/// s390x consumes this file as a parmfile, which is the bare kernel command
/// line rather than a PXELINUX stanza.
pub fn pxe_config(arch: Arch, kern: &KernelSetup, kargs: &str) -> String {
    if arch == Arch::S390x {
        return kargs.to_string();
    }
    formatdoc! {"
        DEFAULT pxeboot
        TIMEOUT 20
        PROMPT 0
        LABEL pxeboot
            KERNEL {kernel}
            APPEND initrd={initramfs} {kargs}
        ",
        kernel = kern.kernel,
        initramfs = kern.initramfs,
    }
}

pub fn grub_config(kern: &KernelSetup, kargs: &str) -> String {
    formatdoc! {r#"
        default=0
        timeout=1
        menuentry "CoreOS (BIOS)" {{
            echo "Loading kernel"
            linux /{kernel} {kargs}
            echo "Loading initrd"
            initrd {initramfs}
        }}
        "#,
        kernel = kern.kernel,
        initramfs = kern.initramfs,
    }
}
