//! Ignition configs for the ISO-embed install path.
//!
//! The live ISO boots with a config built in three layers:
//!
//! 1. the caller's live config, applied while the installer runs,
//! 2. the installer layer: a `coreos-installer` unit that writes the metal
//!    image, a reboot unit gated on it, and a pointer config telling the
//!    installed system to fetch the real target config over HTTP,
//! 3. an autologin overlay for poking at the console.
//!
//! Later layers win on conflicts.

mod embed;
pub mod merge;

pub use embed::embed_iso;
pub use merge::merge;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use indoc::{formatdoc, indoc};
use serde_json::{json, Value};

use crate::error::{InstallError, Result};

pub const IGNITION_VERSION: &str = "3.0.0";

/// Where the live environment writes the pointer config for the installer.
pub const POINTER_CONFIG_PATH: &str = "/var/opt/pointer.ign";

/// Install target disk inside the guest.
pub const TARGET_DEVICE: &str = "/dev/vda";

/// Name of the real target config in the content directory.
pub const TARGET_CONFIG_NAME: &str = "target.ign";

pub const INSTALLER_UNIT: &str = "coreos-installer.service";
pub const REBOOT_UNIT: &str = "coreos-installer-reboot.service";

/// Copy of the system reboot unit without its `ConditionPathExists`.
const REBOOT_UNIT_CONTENTS: &str = indoc! {"
    [Unit]
    Description=Reboot after CoreOS Installer
    After=coreos-installer.service
    Requires=coreos-installer.service
    OnFailure=emergency.target
    OnFailureJobMode=replace-irreversibly

    [Service]
    Type=simple
    ExecStart=/usr/bin/systemctl --no-block reboot
    StandardOutput=kmsg+console
    StandardError=kmsg+console
    [Install]
    WantedBy=multi-user.target
"};

const AUTOLOGIN_DROPIN: &str = indoc! {"
    [Service]
    ExecStart=
    ExecStart=-/usr/sbin/agetty --autologin core --noclear %I $TERM
"};

const SERIAL_AUTOLOGIN_DROPIN: &str = indoc! {"
    [Service]
    TTYVTDisallocate=no
    ExecStart=
    ExecStart=-/usr/sbin/agetty --autologin core --noclear %I $TERM
"};

/// Parse a caller-supplied Ignition document.
///
/// Only [`IGNITION_VERSION`] documents are accepted; merged output carries that version.
pub fn parse_config(text: &str, what: &str) -> Result<Value> {
    let value: Value = serde_json::from_str(text).map_err(|e| {
        InstallError::unsupported(format!("parsing provided {what} config: {e}"))
    })?;
    match value.pointer("/ignition/version").and_then(Value::as_str) {
        Some(IGNITION_VERSION) => Ok(value),
        Some(other) => Err(InstallError::unsupported(format!(
            "provided {what} config has ignition.version {other}, expected {IGNITION_VERSION}"
        ))),
        None => Err(InstallError::unsupported(format!(
            "provided {what} config has no ignition.version"
        ))),
    }
}

/// RFC 2397 data URL carrying `data` as base64 text.
pub fn data_url(data: &[u8]) -> String {
    format!("data:text/plain;charset=utf-8;base64,{}", STANDARD.encode(data))
}

/// Config whose only content is a reference to `target`.
pub fn pointer_config(target: &str) -> Value {
    json!({
        "ignition": {
            "version": IGNITION_VERSION,
            "config": { "merge": [{ "source": target }] }
        }
    })
}

/// `ExecStart` contents of the installer unit.
pub fn installer_unit(base_url: &str, metal_name: &str, insecure: bool) -> String {
    let insecure_opt = if insecure { "--insecure" } else { "" };
    formatdoc! {"
        [Unit]
        After=network-online.target
        Wants=network-online.target
        [Service]
        RemainAfterExit=yes
        Type=oneshot
        ExecStart=/usr/bin/coreos-installer install --image-url {base_url}/{metal_name} --ignition {POINTER_CONFIG_PATH} {insecure_opt} {TARGET_DEVICE}
        StandardOutput=kmsg+console
        StandardError=kmsg+console
        [Install]
        WantedBy=multi-user.target
    "}
}

/// The installer layer.
pub fn installer_config(base_url: &str, metal_name: &str, insecure: bool) -> Value {
    let pointer = pointer_config(&format!("{base_url}/{TARGET_CONFIG_NAME}"));
    json!({
        "ignition": { "version": IGNITION_VERSION },
        "systemd": {
            "units": [
                {
                    "name": INSTALLER_UNIT,
                    "contents": installer_unit(base_url, metal_name, insecure),
                    "enabled": true
                },
                {
                    "name": REBOOT_UNIT,
                    "contents": REBOOT_UNIT_CONTENTS,
                    "enabled": true
                }
            ]
        },
        "storage": {
            "files": [{
                "path": POINTER_CONFIG_PATH,
                "contents": { "source": data_url(pointer.to_string().as_bytes()) },
                "mode": 0o644
            }]
        }
    })
}

/// Autologin on the VT and serial gettys.
pub fn autologin() -> Value {
    json!({
        "ignition": { "version": IGNITION_VERSION },
        "systemd": {
            "units": [
                {
                    "name": "getty@.service",
                    "dropins": [{ "name": "10-autologin.conf", "contents": AUTOLOGIN_DROPIN }]
                },
                {
                    "name": "serial-getty@.service",
                    "dropins": [{ "name": "10-autologin.conf", "contents": SERIAL_AUTOLOGIN_DROPIN }]
                }
            ]
        }
    })
}

/// Layer the live config, the installer layer and autologin, in that order.
pub fn live_config(live: Value, installer: Value) -> Value {
    merge(merge(live, installer), autologin())
}
