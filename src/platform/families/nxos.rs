//! NX-OS platform profile for Nexus switches.
//!
//! NX-OS sessions land directly in privileged mode, so there is no enable
//! negotiation and the unprivileged pattern almost never fires:
//!
//! ```text
//! n9k-leaf1#            # privileged exec
//! n9k-leaf1(config)#    # configuration mode
//! ```

use super::super::profile::{bre, re, PlatformProfile};

/// Create the NX-OS platform profile.
pub fn platform() -> PlatformProfile {
    PlatformProfile {
        name: "nxos",
        os_type: "NX-OS",
        banner: re(r"NX-OS|Nexus Operating System|Cisco Nexus"),
        prompt: re(r"(?m)^(?P<hostname>[\w.-]+)(?:\([^)]*\))?#\s*$"),
        unprivileged: bre(r"(?m)^[\w.-]+>\s*$"),
        privileged: bre(r"(?m)^[\w.-]+(?:\([^)]*\))?#\s*$"),
        password: bre(r"(?mi)^.*password:\s*$"),
        syntax_error: bre(
            r"% Invalid command|Cmd exec error|% Incomplete command|% Ambiguous command",
        ),
        more: bre(r"--\s?[Mm]ore\s?--"),
        connection_closed: bre(r"Connection closed|closed by foreign host|closed by remote host"),
        paging_disable: vec!["terminal length 0"],
        version_commands: vec!["show version"],
        inventory_command: Some("show inventory"),
        reload_command: "reload",
        reload_confirms: vec![(
            bre(r"This command will reboot the system\. \(y/n\)\?\s*\[n\]"),
            "y",
        )],
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
            profile.hostname_from_prompt("n9k-leaf1#"),
            Some("n9k-leaf1".to_string())
        );
        assert_eq!(
            profile.hostname_from_prompt("n9k-leaf1(config-if)#"),
            Some("n9k-leaf1".to_string())
        );
    }

    #[test]
    fn test_banner_detection() {
        let profile = platform();
        assert!(profile.banner.is_match("Cisco Nexus Operating System (NX-OS) Software"));
        assert!(!profile.banner.is_match("Cisco IOS XR Software"));
    }

    #[test]
    fn test_syntax_error_phrasings() {
        let profile = platform();
        assert!(profile.syntax_error.is_match(b"% Invalid command at '^' marker."));
        assert!(profile.syntax_error.is_match(b"Cmd exec error."));
    }
}
