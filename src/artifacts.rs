//! Build artifact manifest and resolution.
//!
//! A build is described by a coreos-assembler style `meta.json`. Artifact
//! paths in it are relative to the directory holding the manifest.

use anyhow::Context;
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{InstallError, Result};

/// Artifact kinds the installer knows how to consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Kernel,
    Initramfs,
    LiveKernel,
    LiveInitramfs,
    LiveIso,
    Metal,
}

impl ArtifactKind {
    /// Key used in the manifest's `images` map.
    pub fn key(self) -> &'static str {
        match self {
            ArtifactKind::Kernel => "kernel",
            ArtifactKind::Initramfs => "initramfs",
            ArtifactKind::LiveKernel => "live-kernel",
            ArtifactKind::LiveInitramfs => "live-initramfs",
            ArtifactKind::LiveIso => "live-iso",
            ArtifactKind::Metal => "metal",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Artifact {
    pub path: String,
    #[serde(default)]
    pub sha256: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BuildArtifacts {
    pub kernel: Option<Artifact>,
    pub initramfs: Option<Artifact>,
    #[serde(rename = "live-kernel")]
    pub live_kernel: Option<Artifact>,
    #[serde(rename = "live-initramfs")]
    pub live_initramfs: Option<Artifact>,
    #[serde(rename = "live-iso")]
    pub live_iso: Option<Artifact>,
    pub metal: Option<Artifact>,
}

impl BuildArtifacts {
    pub fn get(&self, kind: ArtifactKind) -> Option<&Artifact> {
        match kind {
            ArtifactKind::Kernel => self.kernel.as_ref(),
            ArtifactKind::Initramfs => self.initramfs.as_ref(),
            ArtifactKind::LiveKernel => self.live_kernel.as_ref(),
            ArtifactKind::LiveInitramfs => self.live_initramfs.as_ref(),
            ArtifactKind::LiveIso => self.live_iso.as_ref(),
            ArtifactKind::Metal => self.metal.as_ref(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct MetaJson {
    name: String,
    #[serde(rename = "ostree-version", default)]
    ostree_version: Option<String>,
    #[serde(default)]
    images: BuildArtifacts,
}

/// A resolved build: its manifest plus the directory artifacts live in.
#[derive(Debug, Clone)]
pub struct BuildManifest {
    pub name: String,
    pub ostree_version: Option<String>,
    pub build_dir: PathBuf,
    pub artifacts: BuildArtifacts,
}

impl BuildManifest {
    /// Load `meta.json`. The build directory is the manifest's parent.
    pub fn load(meta_json: &Path) -> anyhow::Result<Self> {
        let bytes = fs::read_to_string(meta_json)
            .with_context(|| format!("reading build manifest '{}'", meta_json.display()))?;
        let meta: MetaJson = serde_json::from_str(&bytes)
            .with_context(|| format!("parsing build manifest '{}'", meta_json.display()))?;
        let build_dir = meta_json
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(Self {
            name: meta.name,
            ostree_version: meta.ostree_version,
            build_dir,
            artifacts: meta.images,
        })
    }

    /// Name used in diagnostics: the ostree version when known, else the build name.
    pub fn label(&self) -> &str {
        self.ostree_version.as_deref().unwrap_or(&self.name)
    }

    /// Look up an artifact path, failing if the key is absent or its path empty.
    pub fn require(&self, kind: ArtifactKind) -> Result<&str> {
        match self.artifacts.get(kind) {
            Some(artifact) if !artifact.path.is_empty() => Ok(&artifact.path),
            _ => Err(InstallError::MissingArtifact {
                build: self.label().to_string(),
                artifact: kind,
            }),
        }
    }

    /// Absolute-ish path of an artifact inside the build directory.
    pub fn artifact_path(&self, name: &str) -> PathBuf {
        self.build_dir.join(name)
    }

    /// Resolve the kernel/initramfs pair for a network install.
    pub fn kernel_setup(&self, legacy: bool) -> Result<KernelSetup> {
        let (kernel, initramfs) = if legacy {
            (ArtifactKind::Kernel, ArtifactKind::Initramfs)
        } else {
            (ArtifactKind::LiveKernel, ArtifactKind::LiveInitramfs)
        };
        Ok(KernelSetup {
            kernel: self.require(kernel)?.to_string(),
            initramfs: self.require(initramfs)?.to_string(),
        })
    }
}

/// Kernel and initramfs file names, relative to the build directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelSetup {
    pub kernel: String,
    pub initramfs: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const META: &str = r#"{
        "name": "fedora-coreos",
        "ostree-version": "32.20200601.dev.0",
        "images": {
            "live-kernel": { "path": "fcos-live-kernel-x86_64" },
            "live-initramfs": { "path": "fcos-live-initramfs.x86_64.img" },
            "metal": { "path": "fcos-metal.x86_64.raw", "sha256": "abc" },
            "kernel": { "path": "" }
        }
    }"#;

    fn load(dir: &TempDir) -> BuildManifest {
        let meta = dir.path().join("meta.json");
        fs::write(&meta, META).unwrap();
        BuildManifest::load(&meta).unwrap()
    }

    #[test]
    fn load_sets_build_dir() {
        let dir = TempDir::new().unwrap();
        let build = load(&dir);
        assert_eq!(build.build_dir, dir.path());
        assert_eq!(build.label(), "32.20200601.dev.0");
        assert_eq!(
            build.artifact_path("x"),
            dir.path().join("x"),
        );
    }

    #[test]
    fn live_kernel_setup() {
        let dir = TempDir::new().unwrap();
        let kern = load(&dir).kernel_setup(false).unwrap();
        assert_eq!(kern.kernel, "fcos-live-kernel-x86_64");
        assert_eq!(kern.initramfs, "fcos-live-initramfs.x86_64.img");
    }

    #[test]
    fn empty_path_counts_as_missing() {
        let dir = TempDir::new().unwrap();
        let err = load(&dir).kernel_setup(true).unwrap_err();
        match err {
            InstallError::MissingArtifact { build, artifact } => {
                assert_eq!(build, "32.20200601.dev.0");
                assert_eq!(artifact, ArtifactKind::Kernel);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn absent_key_names_the_artifact() {
        let dir = TempDir::new().unwrap();
        let err = load(&dir).require(ArtifactKind::LiveIso).unwrap_err();
        assert!(err.to_string().contains("`live-iso`"));
    }
}
