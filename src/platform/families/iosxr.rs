//! IOS XR platform profile, covering both 32-bit and 64-bit (eXR) builds.
//!
//! XR prompts carry the route processor path in front of the hostname:
//!
//! ```text
//! RP/0/RP0/CPU0:pe1#               # privileged exec
//! RP/0/RSP0/CPU0:asr9k-1(config)#  # configuration mode
//! RP/0/RP0/CPU0:pe1>               # rare unprivileged shell
//! ```
//!
//! Patterns use `(?m)` so `^` anchors to line starts; a `#` buried in a
//! login banner never passes for a prompt.

use super::super::profile::{bre, re, PlatformProfile};

/// Create the IOS XR platform profile.
///
/// Identity extraction prefers `show version brief` and falls back to
/// `show version` on platforms where the brief form was removed.
pub fn platform() -> PlatformProfile {
    PlatformProfile {
        name: "iosxr",
        os_type: "XR",
        banner: re(r"IOS[ -]XR|Cisco IOS XR Software|RP/\d+/RS?P?\d+/CPU\d+"),
        prompt: re(r"(?m)^RP/\d+/RS?P?\d+/CPU\d+:(?P<hostname>[\w.-]+)(?:\([^)]*\))?[#>]\s*$"),
        unprivileged: bre(r"(?m)^RP/\d+/RS?P?\d+/CPU\d+:[\w.-]+>\s*$"),
        privileged: bre(r"(?m)^RP/\d+/RS?P?\d+/CPU\d+:[\w.-]+(?:\([^)]*\))?#\s*$"),
        password: bre(r"(?mi)^.*password:\s*$"),
        syntax_error: bre(
            r"% Invalid input detected|% Ambiguous command|% Incomplete command|ERROR: ",
        ),
        more: bre(r"--\s?[Mm]ore\s?--"),
        connection_closed: bre(r"Connection closed|closed by foreign host|closed by remote host"),
        paging_disable: vec![
            "terminal exec prompt no-timestamp",
            "terminal length 0",
            "terminal width 0",
        ],
        version_commands: vec!["show version brief", "show version"],
        inventory_command: Some("admin show inventory chassis"),
        reload_command: "admin reload location all",
        reload_confirms: vec![(bre(r"Proceed with reload\? \[confirm\]"), "\r")],
        supports_enable: false,
        identity_extraction: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_hostname() {
        let profile = platform();
        assert_eq!(
            profile.hostname_from_prompt("RP/0/RP0/CPU0:xr-pe1#"),
            Some("xr-pe1".to_string())
        );
        assert_eq!(
            profile.hostname_from_prompt("RP/0/RSP0/CPU0:ASR9K-PE4(config)#"),
            Some("ASR9K-PE4".to_string())
        );
        assert!(profile.hostname_from_prompt("plainrouter#").is_none());
    }

    #[test]
    fn test_banner_detection() {
        let profile = platform();
        assert!(profile.banner.is_match("Cisco IOS XR Software, Version 6.1.2"));
        assert!(profile.banner.is_match("RP/0/RP0/CPU0:router#"));
        assert!(!profile.banner.is_match("Cisco IOS Software, C2900"));
    }

    #[test]
    fn test_privilege_patterns() {
        let profile = platform();
        assert!(profile.privileged.is_match(b"RP/0/RP0/CPU0:pe1#"));
        assert!(profile.unprivileged.is_match(b"RP/0/RP0/CPU0:pe1>"));
        assert!(!profile.privileged.is_match(b"RP/0/RP0/CPU0:pe1>"));
    }
}
