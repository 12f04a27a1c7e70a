//! Global platform registry for profile lookup and OS detection.

use indexmap::IndexMap;
use once_cell::sync::Lazy;

use super::families;
use super::profile::PlatformProfile;

/// Global registry, built once. Insertion order is detection priority;
/// generic registers last because its banner pattern matches everything.
static REGISTRY: Lazy<PlatformRegistry> = Lazy::new(|| {
    let mut registry = PlatformRegistry::new();
    registry.register(families::iosxr::platform());
    registry.register(families::nxos::platform());
    registry.register(families::ios::platform());
    registry.register(families::generic::platform());
    registry
});

/// Registry of platform profiles, checked in registration order.
#[derive(Debug, Default)]
pub struct PlatformRegistry {
    profiles: IndexMap<&'static str, PlatformProfile>,
}

impl PlatformRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            profiles: IndexMap::new(),
        }
    }

    /// Get the global registry.
    pub fn global() -> &'static PlatformRegistry {
        &REGISTRY
    }

    /// Register a profile. Later registrations have lower detection priority.
    pub fn register(&mut self, profile: PlatformProfile) {
        self.profiles.insert(profile.name, profile);
    }

    /// Get a profile by name.
    pub fn get(&self, name: &str) -> Option<&PlatformProfile> {
        self.profiles.get(name)
    }

    /// List registered profile names in priority order.
    pub fn names(&self) -> impl Iterator<Item = &&'static str> {
        self.profiles.keys()
    }

    /// Pick the first profile whose banner pattern matches the login banner
    /// or the detected prompt. Always succeeds because generic matches
    /// everything.
    pub fn detect(&self, banner: &str, prompt: &str) -> &PlatformProfile {
        for profile in self.profiles.values() {
            if profile.banner.is_match(banner) || profile.banner.is_match(prompt) {
                return profile;
            }
        }
        // Unreachable while generic is registered, but stay total.
        self.profiles
            .get("generic")
            .or_else(|| self.profiles.values().next())
            .expect("registry has no profiles")
    }
}

/// Detect the platform for a login banner and prompt using the global
/// registry.
pub fn detect(banner: &str, prompt: &str) -> &'static PlatformProfile {
    PlatformRegistry::global().detect(banner, prompt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_xr_from_banner() {
        let profile = detect("Cisco IOS XR Software, Version 6.1.2", "");
        assert_eq!(profile.name, "iosxr");
    }

    #[test]
    fn test_detect_xr_from_prompt() {
        let profile = detect("", "RP/0/RP0/CPU0:pe1#");
        assert_eq!(profile.name, "iosxr");
    }

    #[test]
    fn test_detect_nxos() {
        let profile = detect(
            "Cisco Nexus Operating System (NX-OS) Software\nTAC support: ...",
            "n9k-leaf1#",
        );
        assert_eq!(profile.name, "nxos");
    }

    #[test]
    fn test_detect_ios() {
        let profile = detect(
            "Cisco IOS Software, C2900 Software (C2900-UNIVERSALK9-M)",
            "router>",
        );
        assert_eq!(profile.name, "ios");
    }

    #[test]
    fn test_generic_fallback() {
        let profile = detect("Welcome to Ubuntu 22.04", "jumphost$");
        assert_eq!(profile.name, "generic");
    }

    #[test]
    fn test_priority_order() {
        let names: Vec<_> = PlatformRegistry::global().names().copied().collect();
        assert_eq!(names, vec!["iosxr", "nxos", "ios", "generic"]);
    }
}
