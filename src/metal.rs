//! Metal image staging.
//!
//! The installer fetches the metal image over HTTP. A raw image is
//! compressed once into the content directory so the transfer stays small;
//! anything already compressed is just linked in.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::Path;

use crate::fsutil::abs_symlink;

/// Suffix identifying an uncompressed metal image.
pub const RAW_SUFFIX: &str = ".raw";

/// Suffix appended to a metal image compressed by [`stage_metal_image`].
pub const COMPRESSED_SUFFIX: &str = ".zst";

/// zstd level used for staging: speed over ratio.
const ZSTD_LEVEL: i32 = 1;

/// Stage `metal_name` from `build_dir` into `dest_dir`.
///
/// Returns the file name to reference in install URLs.
pub fn stage_metal_image(build_dir: &Path, metal_name: &str, dest_dir: &Path) -> Result<String> {
    let src = build_dir.join(metal_name);

    if !metal_name.ends_with(RAW_SUFFIX) {
        abs_symlink(&src, &dest_dir.join(metal_name))?;
        return Ok(metal_name.to_string());
    }

    let staged_name = format!("{metal_name}{COMPRESSED_SUFFIX}");
    let dest = dest_dir.join(&staged_name);
    tracing::info!(image = %src.display(), "compressing metal image");
    compress(&src, &dest)
        .with_context(|| format!("compressing '{}' to '{}'", src.display(), dest.display()))?;
    Ok(staged_name)
}

fn compress(src: &Path, dest: &Path) -> Result<()> {
    let mut reader = BufReader::new(File::open(src)?);
    let writer = BufWriter::new(File::create(dest)?);
    let mut encoder = zstd::stream::Encoder::new(writer, ZSTD_LEVEL)?;
    io::copy(&mut reader, &mut encoder)?;
    encoder.finish()?.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn payload() -> Vec<u8> {
        (0..256 * 1024u32).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn raw_image_is_compressed_and_round_trips() {
        let build = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        let bytes = payload();
        fs::write(build.path().join("fcos-metal.raw"), &bytes).unwrap();

        let name = stage_metal_image(build.path(), "fcos-metal.raw", dest.path()).unwrap();

        assert_eq!(name, "fcos-metal.raw.zst");
        let staged = dest.path().join(&name);
        assert!(!staged.is_symlink());
        let compressed = fs::read(&staged).unwrap();
        assert!(compressed.len() < bytes.len());
        assert_eq!(zstd::decode_all(compressed.as_slice()).unwrap(), bytes);
    }

    #[test]
    fn compressed_image_is_linked_not_copied() {
        let build = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        fs::write(build.path().join("fcos-metal.raw.xz"), b"already xz").unwrap();

        let name = stage_metal_image(build.path(), "fcos-metal.raw.xz", dest.path()).unwrap();

        assert_eq!(name, "fcos-metal.raw.xz");
        let staged = dest.path().join(&name);
        assert!(staged.is_symlink());
        assert_eq!(
            fs::read_link(&staged).unwrap(),
            build.path().join("fcos-metal.raw.xz")
        );
        assert_eq!(fs::read(&staged).unwrap(), b"already xz");
    }

    #[test]
    fn missing_raw_image_fails() {
        let build = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        assert!(stage_metal_image(build.path(), "absent.raw", dest.path()).is_err());
    }
}
