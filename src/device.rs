//! Device identity model and output parsers.
//!
//! [`DeviceInfo`] is filled in from `show version`, the inventory command,
//! and `show users` output after a session reaches the target device. All
//! fields stay at their defaults when discovery is skipped or the device
//! rejects the query commands.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

static OS_VERSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)Version (.*?)(?:\[| |$)").expect("version pattern"));
static NXOS_VERSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)System version: (.*)").expect("version pattern"));
static OS_TYPE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(XR|XE|NX-OS)").expect("os pattern"));
static PLATFORM_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^(?:  )?cisco (.*?) ").expect("platform pattern"));
static UDI_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)NAME: (?P<name>.*?),? DESCR").expect("udi pattern"));
static UDI_DESCR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)DESCR: (?P<description>.*)").expect("udi pattern"));
static UDI_PID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)PID: (?P<pid>.*?),? ").expect("udi pattern"));
static UDI_VID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)VID: (?P<vid>.*?),? ").expect("udi pattern"));
static UDI_SN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)SN: (?P<sn>.*)").expect("udi pattern"));
static PID_MODEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([A-Z]{3}[-| ]?[0-9]{3,4})").expect("pid pattern"));

/// Identity attributes discovered from the target device.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeviceInfo {
    /// Hostname extracted from the prompt.
    pub hostname: Option<String>,
    /// Hardware family, e.g. "ASR9K", "N9K", or "generic".
    pub family: Option<String>,
    /// Hardware model string from the version or inventory output.
    pub platform: Option<String>,
    /// Operating system flavor: "XR", "eXR", "XE", "NX-OS", or "IOS".
    pub os_type: Option<String>,
    /// Operating system version string.
    pub os_version: Option<String>,
    /// Chassis name from the inventory output.
    pub udi_name: Option<String>,
    /// Chassis description from the inventory output.
    pub udi_description: Option<String>,
    /// Product identifier.
    pub pid: Option<String>,
    /// Version identifier.
    pub vid: Option<String>,
    /// Serial number.
    pub serial_number: Option<String>,
    /// Exact prompt string detected on the device.
    pub prompt: Option<String>,
    /// Whether the session arrived over a console or aux line.
    pub is_console: bool,
}

impl DeviceInfo {
    /// Fill OS and platform fields from `show version` output.
    pub fn apply_version_output(&mut self, output: &str) {
        if let Some(c) = OS_VERSION.captures(output) {
            self.os_version = Some(c[1].trim().to_string());
        }
        // NX-OS reports the real version on a separate line.
        if let Some(c) = NXOS_VERSION.captures(output) {
            self.os_version = Some(c[1].trim().to_string());
        }

        let mut os_type = OS_TYPE
            .captures(output)
            .map(|c| c[1].to_string())
            .unwrap_or_else(|| "IOS".to_string());
        if os_type == "XR" && output.contains("Build Information") {
            os_type = "eXR".to_string();
        }
        self.os_type = Some(os_type);

        match PLATFORM_LINE.captures(output) {
            Some(c) => {
                let model = c[1].to_string();
                self.family = Some(self.classify_family(&model));
                self.platform = Some(model);
            }
            None => {
                self.family = Some("generic".to_string());
            }
        }
    }

    /// Fill unique device identifier fields from inventory output.
    pub fn apply_inventory_output(&mut self, output: &str) {
        if let Some(c) = UDI_NAME.captures(output) {
            self.udi_name = Some(c["name"].trim_matches(['"', ' ', ','].as_ref()).to_string());
        }
        if let Some(c) = UDI_DESCR.captures(output) {
            self.udi_description = Some(
                c["description"]
                    .trim_matches(['"', ' ', '\r'].as_ref())
                    .to_string(),
            );
        }
        if let Some(c) = UDI_PID.captures(output) {
            self.pid = Some(c["pid"].to_string());
        }
        if let Some(c) = UDI_VID.captures(output) {
            self.vid = Some(c["vid"].to_string());
        }
        if let Some(c) = UDI_SN.captures(output) {
            self.serial_number = Some(c["sn"].trim().to_string());
        }
        // A recognizable model in the PID is more precise than the
        // version output's platform string.
        if let Some(pid) = &self.pid {
            if let Some(c) = PID_MODEL.captures(pid) {
                self.platform = Some(c[1].to_string());
            }
        }
    }

    /// Mark the session as console-attached based on `show users` output.
    /// The active line is the one flagged with `*`; con, tty, and aux
    /// lines count as console, vty does not.
    pub fn apply_users_output(&mut self, output: &str) {
        self.is_console = false;
        for line in output.lines() {
            if !line.contains('*') {
                continue;
            }
            if line.contains("vty") {
                return;
            }
            if line.contains("con") || line.contains("tty") || line.contains("aux") {
                self.is_console = true;
            }
            return;
        }
    }

    fn classify_family(&self, model: &str) -> String {
        let os_type = self.os_type.as_deref().unwrap_or("");
        let family = if model.starts_with("ASR9K") {
            "ASR9K"
        } else if model.starts_with("NCS-6") {
            "NCS6K"
        } else if model.starts_with("NCS-4") {
            "NCS4K"
        } else if model.starts_with("NCS-50") {
            "NCS5K"
        } else if model.starts_with("NCS-55") {
            "NCS5500"
        } else if model.starts_with("CRS") {
            "CRS"
        } else if model.starts_with("ASR-9") && os_type == "XE" {
            "ASR900"
        } else if model.starts_with("Nexus9000") && os_type == "NX-OS" {
            "N9K"
        } else if model.starts_with("NCS1") || model.starts_with("NCS-1") {
            "NCS1K"
        } else {
            return model.to_string();
        };
        family.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const XR_VERSION: &str = "\
Cisco IOS XR Software, Version 6.1.2[Default]
Copyright (c) 2016 by Cisco Systems, Inc.

ROM: System Bootstrap, Version 0.75

cisco ASR9K Series (Intel 686 F6M14S4) processor with 8388608K bytes of memory.
";

    const NXOS_VERSION_OUT: &str = "\
Cisco Nexus Operating System (NX-OS) Software
Software
  system:    version 7.0(3)I4(2)
System version: 7.0(3)I4(2)
Hardware
  cisco Nexus9000 C9396PX Chassis
";

    const IOS_VERSION_OUT: &str = "\
Cisco IOS Software, C2900 Software (C2951-UNIVERSALK9-M), Version 15.2(4)M5, RELEASE SOFTWARE (fc2)
cisco CISCO2951/K9 (revision 1.0) with 2027520K/69632K bytes of memory.
";

    const XR_INVENTORY: &str = "\
NAME: \"chassis ASR-9006-AC\", DESCR: \"ASR 9006 AC Chassis\"
PID: ASR-9006-AC, VID: V01, SN: FOX1810G8LR
";

    #[test]
    fn test_xr_version_parsing() {
        let mut info = DeviceInfo::default();
        info.apply_version_output(XR_VERSION);
        assert_eq!(info.os_type.as_deref(), Some("XR"));
        assert_eq!(info.os_version.as_deref(), Some("6.1.2"));
        assert_eq!(info.family.as_deref(), Some("ASR9K"));
        assert_eq!(info.platform.as_deref(), Some("ASR9K"));
    }

    #[test]
    fn test_exr_detection() {
        let mut info = DeviceInfo::default();
        let text = format!("{}\nBuild Information:\n", XR_VERSION);
        info.apply_version_output(&text);
        assert_eq!(info.os_type.as_deref(), Some("eXR"));
    }

    #[test]
    fn test_nxos_version_parsing() {
        let mut info = DeviceInfo::default();
        info.apply_version_output(NXOS_VERSION_OUT);
        assert_eq!(info.os_type.as_deref(), Some("NX-OS"));
        assert_eq!(info.os_version.as_deref(), Some("7.0(3)I4(2)"));
        assert_eq!(info.family.as_deref(), Some("N9K"));
        assert_eq!(info.platform.as_deref(), Some("Nexus9000"));
    }

    #[test]
    fn test_ios_version_parsing() {
        let mut info = DeviceInfo::default();
        info.apply_version_output(IOS_VERSION_OUT);
        assert_eq!(info.os_type.as_deref(), Some("IOS"));
        assert_eq!(info.os_version.as_deref(), Some("15.2(4)M5,"));
        assert_eq!(info.family.as_deref(), Some("CISCO2951/K9"));
    }

    #[test]
    fn test_no_platform_line_falls_back_to_generic() {
        let mut info = DeviceInfo::default();
        info.apply_version_output("Linux jumphost 5.10.0");
        assert_eq!(info.family.as_deref(), Some("generic"));
        assert!(info.platform.is_none());
    }

    #[test]
    fn test_inventory_parsing() {
        let mut info = DeviceInfo::default();
        info.apply_inventory_output(XR_INVENTORY);
        assert_eq!(info.udi_name.as_deref(), Some("chassis ASR-9006-AC"));
        assert_eq!(info.udi_description.as_deref(), Some("ASR 9006 AC Chassis"));
        assert_eq!(info.pid.as_deref(), Some("ASR-9006-AC"));
        assert_eq!(info.vid.as_deref(), Some("V01"));
        assert_eq!(info.serial_number.as_deref(), Some("FOX1810G8LR"));
        // Model refined from the PID.
        assert_eq!(info.platform.as_deref(), Some("ASR-9006"));
    }

    #[test]
    fn test_console_detection() {
        let mut info = DeviceInfo::default();
        info.apply_users_output(
            "    Line       User       Host(s)              Idle\n\
             *  0 con 0     admin      idle                 00:00:00\n",
        );
        assert!(info.is_console);

        info.apply_users_output(
            "    Line       User       Host(s)              Idle\n\
             * 194 vty 0    admin      idle                 00:00:00\n",
        );
        assert!(!info.is_console);

        info.apply_users_output("no active line marker here\n");
        assert!(!info.is_console);
    }
}
