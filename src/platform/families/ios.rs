//! Classic IOS and IOS XE platform profile.
//!
//! The only family with enable negotiation: a login that lands at a `>`
//! prompt gets escalated with `enable` before anything else runs.
//!
//! ```text
//! router>              # user exec
//! router#              # privileged exec
//! router(config)#      # configuration mode
//! ```

use super::super::profile::{bre, re, PlatformProfile};

/// Create the IOS / IOS XE platform profile.
pub fn platform() -> PlatformProfile {
    PlatformProfile {
        name: "ios",
        os_type: "IOS",
        banner: re(r"IOS Software|IOS \(tm\)|IOS-XE Software|IOS XE Software"),
        prompt: re(r"(?m)^(?P<hostname>[\w.-]+)(?:\([^)]*\))?[#>]\s*$"),
        unprivileged: bre(r"(?m)^[\w.-]+>\s*$"),
        privileged: bre(r"(?m)^[\w.-]+(?:\([^)]*\))?#\s*$"),
        password: bre(r"(?mi)^.*password:\s*$"),
        syntax_error: bre(
            r"% Invalid input detected|% Ambiguous command|% Incomplete command|% Unknown command|% Bad IP address",
        ),
        more: bre(r"--\s?[Mm]ore\s?--"),
        connection_closed: bre(r"Connection closed|closed by foreign host|closed by remote host"),
        paging_disable: vec!["terminal length 0", "terminal width 0"],
        version_commands: vec!["show version"],
        inventory_command: Some("show inventory"),
        reload_command: "reload",
        reload_confirms: vec![
            (
                bre(r"System configuration has been modified\. Save\? \[yes/no\]:"),
                "yes",
            ),
            (bre(r"Proceed with reload\? \[confirm\]"), "\r"),
        ],
        supports_enable: true,
        identity_extraction: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_modes() {
        let profile = platform();
        assert!(profile.is_unprivileged("router>"));
        assert!(!profile.is_unprivileged("router#"));
        assert_eq!(
            profile.hostname_from_prompt("edge-rtr1#"),
            Some("edge-rtr1".to_string())
        );
        assert_eq!(
            profile.hostname_from_prompt("edge-rtr1(config)#"),
            Some("edge-rtr1".to_string())
        );
    }

    #[test]
    fn test_prompt_not_matched_inside_banner() {
        let profile = platform();
        // '#' in the middle of a banner line is not a prompt.
        assert!(profile
            .hostname_from_prompt("warning # unauthorized access prohibited")
            .is_none());
    }

    #[test]
    fn test_syntax_error_phrasings() {
        let profile = platform();
        assert!(profile
            .syntax_error
            .is_match(b"% Invalid input detected at '^' marker."));
        assert!(profile.syntax_error.is_match(b"% Ambiguous command:  \"sh\""));
        assert!(profile.syntax_error.is_match(b"% Incomplete command."));
    }

    #[test]
    fn test_reload_confirms() {
        let profile = platform();
        assert_eq!(profile.reload_confirms.len(), 2);
        assert!(profile.reload_confirms[0]
            .0
            .is_match(b"System configuration has been modified. Save? [yes/no]:"));
        assert!(profile.reload_confirms[1]
            .0
            .is_match(b"Proceed with reload? [confirm]"));
    }
}
