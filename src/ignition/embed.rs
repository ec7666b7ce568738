use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

use crate::error::{InstallError, Result};

/// Embed `config` into the ISO at `iso` in place with `coreos-installer iso embed`.
///
/// The document is streamed on stdin from a separate thread while the tool
/// runs, so a large config cannot deadlock against the tool's own buffering.
pub fn embed_iso(coreos_installer: &str, iso: &Path, config: &str) -> Result<()> {
    tracing::info!(iso = %iso.display(), "embedding live config");

    let mut child = Command::new(coreos_installer)
        .args(["iso", "embed"])
        .arg(iso)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| InstallError::Embed {
            diagnostics: format!("spawning {coreos_installer}: {e}"),
        })?;
    let mut stdin = child.stdin.take().ok_or_else(|| InstallError::Embed {
        diagnostics: "stdin of coreos-installer was not captured".to_string(),
    })?;

    let (written, output) = std::thread::scope(|s| {
        let writer = s.spawn(move || stdin.write_all(config.as_bytes()));
        let output = child.wait_with_output();
        (writer.join(), output)
    });

    let output = output.map_err(|e| InstallError::Embed {
        diagnostics: format!("waiting for {coreos_installer}: {e}"),
    })?;
    if !output.status.success() {
        return Err(InstallError::Embed {
            diagnostics: format!(
                "{} ({})",
                String::from_utf8_lossy(&output.stderr).trim(),
                output.status
            ),
        });
    }

    match written {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(InstallError::Embed {
            diagnostics: format!("writing config to {coreos_installer}: {e}"),
        }),
        Err(_) => Err(InstallError::Embed {
            diagnostics: "config writer thread panicked".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    /// Fake `coreos-installer` that appends stdin to the ISO path.
    fn fake_installer(dir: &Path, body: &str) -> String {
        let path = dir.join("coreos-installer");
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path.display().to_string()
    }

    #[test]
    fn streams_config_to_tool() {
        let temp = TempDir::new().unwrap();
        let iso = temp.path().join("test.iso");
        fs::write(&iso, "ISO:").unwrap();
        let tool = fake_installer(temp.path(), r#"[ "$1 $2" = "iso embed" ] || exit 9; cat >> "$3""#);
        let config = "x".repeat(1 << 20);

        embed_iso(&tool, &iso, &config).unwrap();

        let contents = fs::read_to_string(&iso).unwrap();
        assert_eq!(contents.len(), 4 + config.len());
        assert!(contents.starts_with("ISO:x"));
    }

    #[test]
    fn nonzero_exit_reports_diagnostics() {
        let temp = TempDir::new().unwrap();
        let iso = temp.path().join("test.iso");
        fs::write(&iso, "").unwrap();
        let tool = fake_installer(temp.path(), "echo 'Error: not a live ISO' >&2; exit 1");

        match embed_iso(&tool, &iso, "{}") {
            Err(InstallError::Embed { diagnostics }) => {
                assert!(diagnostics.contains("not a live ISO"), "{diagnostics}");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn missing_tool_is_an_embed_error() {
        let temp = TempDir::new().unwrap();
        let err = embed_iso("definitely_not_a_real_command_12345", &temp.path().join("x.iso"), "{}")
            .unwrap_err();
        assert!(matches!(err, InstallError::Embed { .. }));
    }
}
