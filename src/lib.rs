//! Install and boot a built CoreOS-style image under QEMU for testing.
//!
//! Given a build's artifacts (kernel, initramfs, live ISO, metal image),
//! this crate boots a VM through one of the real install paths and returns
//! the running machine:
//!
//! - **Network install** - PXELINUX, GRUB netboot, or a synthesized s390x
//!   boot image, with the installer fetching the metal image and Ignition
//!   config from an ephemeral HTTP content server.
//! - **ISO-embed install** - the live ISO with a generated Ignition config
//!   embedded that runs `coreos-installer` on first boot.
//!
//! # Architecture
//!
//! ```text
//! Installer::pxe / Installer::install_via_iso_embed
//!     │
//!     ├── artifacts       resolve kernel/initramfs, ISO, metal image
//!     ├── metal           compress or link the metal image
//!     ├── content_server  serve the staged directory over HTTP
//!     ├── kargs           compose installer kernel arguments
//!     ├── bootchain       PXELINUX / mk-s390image / GRUB netboot
//!     ├── ignition        layered live config + iso embed
//!     └── qemu            launch the VM
//!            │
//!            └── InstalledMachine (owns the VM and its scratch dir)
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use metal_install::{Arch, BuildManifest, InstallRequest, Installer, InstallerConfig};
//! use std::path::Path;
//!
//! let build = BuildManifest::load(Path::new("builds/latest/x86_64/meta.json"))?;
//! let mut req = InstallRequest::new(build, Arch::host()?);
//! req.ignition = r#"{"ignition":{"version":"3.0.0"}}"#.to_string();
//!
//! let machine = Installer::new(InstallerConfig::default()).pxe(&req)?;
//! // ... interact with the VM ...
//! machine.destroy()?;
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod arch;
pub mod artifacts;
pub mod bootchain;
pub mod config;
pub mod content_server;
pub mod error;
pub mod fsutil;
pub mod ignition;
pub mod kargs;
pub mod logging;
pub mod machine;
pub mod metal;
pub mod preflight;
pub mod process;
pub mod qemu;
pub mod scratch;
pub mod session;

pub use arch::Arch;
pub use artifacts::BuildManifest;
pub use config::InstallerConfig;
pub use error::InstallError;
pub use machine::InstalledMachine;
pub use qemu::{Firmware, RunningVm, VmLauncher};
pub use session::{InstallRequest, Installer};
