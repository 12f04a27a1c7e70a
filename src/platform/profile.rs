//! Platform profile record.
//!
//! A profile is an immutable bundle of prompt patterns and command dialect
//! data for one device family. Behavior differences between families live
//! entirely in this data; the discovery and execution state machines are
//! the same for everyone.

use std::fmt;

use regex::bytes;
use regex::Regex;

/// Prompt patterns and command dialect for one device family.
pub struct PlatformProfile {
    /// Family key, e.g. "iosxr", "nxos", "ios", "generic".
    pub name: &'static str,

    /// Operating system reported before version parsing refines it.
    pub os_type: &'static str,

    /// Matched against banner and prompt text during profile selection.
    pub banner: Regex,

    /// Full prompt pattern with a named `hostname` capture.
    pub prompt: Regex,

    /// Prompt variant indicating unprivileged mode.
    pub unprivileged: bytes::Regex,

    /// Prompt variant indicating privileged mode.
    pub privileged: bytes::Regex,

    /// Password prompt (login and enable).
    pub password: bytes::Regex,

    /// Syntax / ambiguous / incomplete command output phrasings.
    pub syntax_error: bytes::Regex,

    /// Pager continuation prompt.
    pub more: bytes::Regex,

    /// Remote-side session termination phrasings, watched during command
    /// execution and reload.
    pub connection_closed: bytes::Regex,

    /// Commands that disable output paging, run once after connect.
    pub paging_disable: Vec<&'static str>,

    /// Version queries in fallback order; the next one is tried when the
    /// device rejects the previous.
    pub version_commands: Vec<&'static str>,

    /// Inventory query for product/serial extraction, when supported.
    pub inventory_command: Option<&'static str>,

    /// Command that reboots the device.
    pub reload_command: &'static str,

    /// Confirmation prompts the reload command may raise, with the
    /// response for each.
    pub reload_confirms: Vec<(bytes::Regex, &'static str)>,

    /// Whether the family has an enable privilege level.
    pub supports_enable: bool,

    /// False for the unknown fallback: raw send/expect only, no identity
    /// extraction beyond the raw prompt string.
    pub identity_extraction: bool,
}

impl PlatformProfile {
    /// Extract the hostname from a prompt string, when the prompt matches
    /// this profile's pattern.
    pub fn hostname_from_prompt(&self, prompt: &str) -> Option<String> {
        self.prompt
            .captures(prompt)
            .and_then(|c| c.name("hostname"))
            .map(|m| m.as_str().to_string())
    }

    /// Whether a prompt indicates unprivileged mode.
    pub fn is_unprivileged(&self, prompt: &str) -> bool {
        self.unprivileged.is_match(prompt.as_bytes())
            && !self.privileged.is_match(prompt.as_bytes())
    }
}

impl fmt::Debug for PlatformProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlatformProfile")
            .field("name", &self.name)
            .field("os_type", &self.os_type)
            .field("supports_enable", &self.supports_enable)
            .field("identity_extraction", &self.identity_extraction)
            .finish()
    }
}

/// Compile a str pattern, panicking on invalid built-in data.
pub(crate) fn re(pattern: &str) -> Regex {
    Regex::new(pattern).expect("invalid profile pattern")
}

/// Compile a bytes pattern, panicking on invalid built-in data.
pub(crate) fn bre(pattern: &str) -> bytes::Regex {
    bytes::Regex::new(pattern).expect("invalid profile pattern")
}
