//! Fallback profile for devices no family pattern recognizes.
//!
//! Supports raw send/expect against a loose shell-style prompt. Identity
//! extraction and paging setup are skipped since the command dialect is
//! unknown.

use super::super::profile::{bre, re, PlatformProfile};

/// Create the generic fallback profile. Its banner pattern matches
/// everything, so it must be registered last.
pub fn platform() -> PlatformProfile {
    PlatformProfile {
        name: "generic",
        os_type: "unknown",
        banner: re(r""),
        prompt: re(r"(?m)^(?P<hostname>[\w.-]+)(?:\([^)]*\))?[$#>%]\s*$"),
        unprivileged: bre(r"(?m)^[\w.-]+>\s*$"),
        privileged: bre(r"(?m)^[\w.-]+(?:\([^)]*\))?[$#%]\s*$"),
        password: bre(r"(?mi)^.*password:\s*$"),
        syntax_error: bre(r"% Invalid input|command not found|syntax error"),
        more: bre(r"--\s?[Mm]ore\s?--"),
        connection_closed: bre(r"Connection closed|closed by foreign host|closed by remote host"),
        paging_disable: vec![],
        version_commands: vec![],
        inventory_command: None,
        reload_command: "reload",
        reload_confirms: vec![],
        supports_enable: false,
        identity_extraction: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_shell_prompts() {
        let profile = platform();
        assert_eq!(
            profile.hostname_from_prompt("jumphost$"),
            Some("jumphost".to_string())
        );
        assert_eq!(
            profile.hostname_from_prompt("bastion#"),
            Some("bastion".to_string())
        );
    }

    #[test]
    fn test_banner_matches_anything() {
        let profile = platform();
        assert!(profile.banner.is_match("anything at all"));
        assert!(profile.banner.is_match(""));
    }
}
