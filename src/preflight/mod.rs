//! Preflight checks for install attempts.
//!
//! Validates that the host has the tools an install path shells out to, so
//! a missing package shows up as one readable list instead of a failure
//! halfway through staging.
//!
//! # Example
//!
//! ```rust,no_run
//! use metal_install::arch::Arch;
//! use metal_install::config::InstallerConfig;
//! use metal_install::preflight::{check_required_tools, required_tools, InstallMode};
//!
//! let config = InstallerConfig::default();
//! let tools = required_tools(&config, Arch::X86_64, InstallMode::Network);
//! if let Err(e) = check_required_tools(&tools) {
//!     eprintln!("{}", e);
//! }
//! ```

use anyhow::{bail, Result};

use crate::arch::{Arch, BootProtocol};
use crate::config::InstallerConfig;

/// Which install path is about to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallMode {
    Network,
    IsoEmbed,
}

/// Check if a command exists on the host system (absolute paths included).
pub fn command_exists(cmd: &str) -> bool {
    which::which(cmd).is_ok()
}

/// Tools needed for `mode` on `arch`, as (command, package) pairs.
pub fn required_tools(
    config: &InstallerConfig,
    arch: Arch,
    mode: InstallMode,
) -> Vec<(String, &'static str)> {
    let mut tools = vec![
        (arch.qemu_system().to_string(), "qemu-system"),
        (config.qemu_img.clone(), "qemu-img"),
        (config.cp.clone(), "coreutils"),
    ];

    match mode {
        InstallMode::IsoEmbed => {
            tools.push((config.coreos_installer.clone(), "coreos-installer"));
        }
        InstallMode::Network => {
            let Ok(plan) = arch.pxe_plan(&config.syslinux_dir) else {
                return tools;
            };
            match (plan.protocol, plan.pxe_image_dir) {
                (BootProtocol::Grub, _) => {
                    tools.push((config.grub_mknetdir.clone(), "grub2-tools"));
                }
                (BootProtocol::Pxe, None) => {
                    tools.push((
                        config.mk_s390image.display().to_string(),
                        "s390utils-base",
                    ));
                }
                (BootProtocol::Pxe, Some(_)) => {}
            }
        }
    }
    tools
}

/// Check that specific tools are available.
///
/// # Returns
///
/// * `Ok(())` if all tools are found
/// * `Err` with list of missing tools and their packages
pub fn check_required_tools(tools: &[(String, &str)]) -> Result<()> {
    let missing: Vec<_> = tools
        .iter()
        .filter(|(tool, _)| !command_exists(tool))
        .collect();

    if !missing.is_empty() {
        let msg = missing
            .iter()
            .map(|(t, p)| format!("  {} (install: {})", t, p))
            .collect::<Vec<_>>()
            .join("\n");
        bail!("Missing required host tools:\n{}", msg);
    }

    Ok(())
}
