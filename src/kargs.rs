//! Kernel argument composition for network installs.
//!
//! Groups are emitted in a fixed order: base, live, install, insecure, then
//! whatever the caller asked for. Composition is pure so it can be checked
//! without any VM or network resource.

use crate::arch::Arch;

/// Turn on networking in the initramfs.
pub const BASE_KARGS: &[&str] = &["rd.neednet=1", "ip=dhcp"];

/// Only for the live installer: run Ignition and pretend to be metal.
pub const LIVE_KARGS: &[&str] = &["ignition.firstboot", "ignition.platform.id=metal"];

/// Install target, relative to `/dev`.
pub const INSTALL_DEV: &str = "vda";

/// Name of the target Ignition config in the content directory.
pub const CONFIG_NAME: &str = "config.ign";

/// Inputs that vary per install.
#[derive(Debug, Clone)]
pub struct KargsInput<'a> {
    pub base_url: &'a str,
    pub metal_name: &'a str,
    pub live: bool,
    pub insecure: bool,
    pub extra: &'a [String],
}

pub fn base_kargs(arch: Arch) -> Vec<String> {
    let mut kargs: Vec<String> = BASE_KARGS.iter().map(|s| s.to_string()).collect();
    kargs.push(format!("console={}", arch.console()));
    kargs
}

pub fn install_kargs(input: &KargsInput<'_>) -> Vec<String> {
    let mut kargs = vec![
        "coreos.inst=yes".to_string(),
        format!("coreos.inst.install_dev={INSTALL_DEV}"),
        format!("coreos.inst.image_url={}/{}", input.base_url, input.metal_name),
        format!("coreos.inst.ignition_url={}/{CONFIG_NAME}", input.base_url),
    ];
    // TODO: drop once signatures are served next to the metal image
    if input.insecure {
        kargs.push("coreos.inst.insecure=1".to_string());
    }
    kargs
}

/// Full, ordered kernel argument list.
pub fn compose(arch: Arch, input: &KargsInput<'_>) -> Vec<String> {
    let mut kargs = base_kargs(arch);
    if input.live {
        kargs.extend(LIVE_KARGS.iter().map(|s| s.to_string()));
    }
    kargs.extend(install_kargs(input));
    kargs.extend(input.extra.iter().cloned());
    kargs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(live: bool, insecure: bool) -> KargsInput<'static> {
        KargsInput {
            base_url: "http://192.168.76.2:8080",
            metal_name: "metal.raw.zst",
            live,
            insecure,
            extra: &[],
        }
    }

    #[test]
    fn console_comes_from_arch_table() {
        for arch in Arch::ALL {
            let kargs = compose(arch, &input(true, false));
            let consoles: Vec<_> = kargs.iter().filter(|k| k.starts_with("console=")).collect();
            assert_eq!(consoles, vec![&format!("console={}", arch.console())]);
        }
    }

    #[test]
    fn live_group_only_in_live_mode() {
        let live = compose(Arch::X86_64, &input(true, false));
        let legacy = compose(Arch::X86_64, &input(false, false));
        for karg in LIVE_KARGS {
            assert!(live.iter().any(|k| k == karg));
            assert!(!legacy.iter().any(|k| k == karg));
        }
    }

    #[test]
    fn full_ordering() {
        let extra = vec!["foo=bar".to_string()];
        let kargs = compose(
            Arch::S390x,
            &KargsInput {
                extra: &extra,
                ..input(true, true)
            },
        );
        assert_eq!(
            kargs,
            vec![
                "rd.neednet=1",
                "ip=dhcp",
                "console=ttysclp0",
                "ignition.firstboot",
                "ignition.platform.id=metal",
                "coreos.inst=yes",
                "coreos.inst.install_dev=vda",
                "coreos.inst.image_url=http://192.168.76.2:8080/metal.raw.zst",
                "coreos.inst.ignition_url=http://192.168.76.2:8080/config.ign",
                "coreos.inst.insecure=1",
                "foo=bar",
            ]
        );
    }

    #[test]
    fn insecure_is_opt_in() {
        let kargs = compose(Arch::Ppc64le, &input(false, false));
        assert!(!kargs.iter().any(|k| k.starts_with("coreos.inst.insecure")));
    }
}
