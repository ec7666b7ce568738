//! The result of a successful install.

use anyhow::Context;
use std::path::Path;

use crate::qemu::RunningVm;
use crate::scratch::ScratchDir;

/// A running VM together with the scratch directory it still uses.
///
/// The directory holds the VM's disk, its console log and (for network
/// installs) the content served to the installer. It lives exactly as long
/// as this handle.
#[derive(Debug)]
pub struct InstalledMachine {
    // Dropped before `scratch`: the VM must be gone before its disk is.
    vm: Box<dyn RunningVm>,
    scratch: ScratchDir,
    kernel_args: Vec<String>,
    content_url: String,
}

impl InstalledMachine {
    pub(crate) fn new(
        scratch: ScratchDir,
        vm: Box<dyn RunningVm>,
        kernel_args: Vec<String>,
        content_url: String,
    ) -> Self {
        Self {
            vm,
            scratch,
            kernel_args,
            content_url,
        }
    }

    pub fn vm(&self) -> &dyn RunningVm {
        self.vm.as_ref()
    }

    pub fn vm_mut(&mut self) -> &mut dyn RunningVm {
        self.vm.as_mut()
    }

    /// Kernel arguments the installer was booted with. Empty for ISO installs,
    /// whose arguments live in the embedded ISO.
    pub fn kernel_args(&self) -> &[String] {
        &self.kernel_args
    }

    /// Base URL of the content server as the guest sees it.
    pub fn content_url(&self) -> &str {
        &self.content_url
    }

    pub fn workdir(&self) -> &Path {
        self.scratch.path()
    }

    /// Stop the VM and remove the scratch directory.
    pub fn destroy(mut self) -> anyhow::Result<()> {
        let killed = self.vm.kill();
        let path = self.scratch.path().to_path_buf();
        self.scratch
            .release()
            .with_context(|| format!("removing '{}'", path.display()))?;
        killed
    }
}
