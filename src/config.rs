//! Host-side configuration: where tools and firmware live.
//!
//! Every field has a default matching a coreos-assembler container, so an
//! empty TOML file (or no file) is a valid configuration.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InstallerConfig {
    /// Parent for per-attempt scratch directories. Defaults to the system temp dir.
    pub tmp_root: Option<PathBuf>,
    /// Prebuilt PXELINUX binaries (`pxelinux.0`, `ldlinux.c32`).
    pub syslinux_dir: PathBuf,
    /// s390x network boot image builder.
    pub mk_s390image: PathBuf,
    pub grub_mknetdir: String,
    pub coreos_installer: String,
    /// Copy tool; must accept `--reflink=auto SRC DEST`.
    pub cp: String,
    pub qemu_img: String,
    /// Option ROM loaded when the NIC has no boot index.
    pub pxe_option_rom: PathBuf,
    /// Size of the install target disk, in `qemu-img` syntax.
    pub disk_size: String,
    /// Guest memory for legacy installs; live installs raise it.
    pub memory_mib: u32,
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            tmp_root: None,
            syslinux_dir: PathBuf::from("/usr/share/syslinux"),
            mk_s390image: PathBuf::from("/usr/share/s390-tools/netboot/mk-s390image"),
            grub_mknetdir: "grub2-mknetdir".to_string(),
            coreos_installer: "coreos-installer".to_string(),
            cp: "cp".to_string(),
            qemu_img: "qemu-img".to_string(),
            pxe_option_rom: PathBuf::from("/usr/share/qemu/pxe-rtl8139.rom"),
            disk_size: "12G".to_string(),
            memory_mib: 1536,
        }
    }
}

impl InstallerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading installer config '{}'", path.display()))?;
        toml::from_str(&text)
            .with_context(|| format!("parsing installer config '{}'", path.display()))
    }

    pub fn tmp_root(&self) -> PathBuf {
        self.tmp_root.clone().unwrap_or_else(std::env::temp_dir)
    }
}
