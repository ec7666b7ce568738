//! Small filesystem helpers shared by the staging steps.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::process::Cmd;

/// Make `path` absolute against the current directory without resolving symlinks.
pub fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("resolving current directory")?;
    Ok(cwd.join(path))
}

/// Symlink `dest` to the absolute form of `src`.
pub fn abs_symlink(src: &Path, dest: &Path) -> Result<()> {
    let src = absolute(src)?;
    std::os::unix::fs::symlink(&src, dest).with_context(|| {
        format!(
            "creating symlink '{}' -> '{}'",
            dest.display(),
            src.display()
        )
    })
}

/// Copy a file preferring a reflink, falling back to a plain copy.
///
/// `cp` is the tool that knows how to clone extents on filesystems that
/// support it; `--reflink=auto` makes it degrade quietly elsewhere.
pub fn reflink_copy(cp: &str, src: &Path, dest: &Path) -> Result<()> {
    Cmd::new(cp)
        .arg("--reflink=auto")
        .arg_path(src)
        .arg_path(dest)
        .error_msg(format!("copying {}", src.display()))
        .run()?;
    Ok(())
}

/// Write a file, creating parent directories as needed.
pub fn write_file(path: &Path, contents: impl AsRef<[u8]>) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating directory '{}'", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("writing '{}'", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn abs_symlink_points_at_absolute_source() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        fs::write(&src, b"payload").unwrap();
        let link = temp.path().join("link");

        abs_symlink(&src, &link).unwrap();

        assert!(fs::read_link(&link).unwrap().is_absolute());
        assert_eq!(fs::read(&link).unwrap(), b"payload");
    }

    #[test]
    fn reflink_copy_copies_bytes() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("a.iso");
        let dest = temp.path().join("b.iso");
        fs::write(&src, b"iso bytes").unwrap();

        reflink_copy("cp", &src, &dest).unwrap();

        assert_eq!(fs::read(&dest).unwrap(), b"iso bytes");
    }

    #[test]
    fn write_file_creates_parents() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("boot/grub2/grub.cfg");
        write_file(&path, "default=0\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "default=0\n");
    }
}
