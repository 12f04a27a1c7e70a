//! Platform profiles and detection.
//!
//! A [`PlatformProfile`] packs the prompt patterns and command dialect for
//! one device family. The [`registry`] holds the built-in profiles in
//! detection priority order and picks one from the login banner and
//! detected prompt.

pub mod families;
mod profile;
pub mod registry;

pub use profile::PlatformProfile;
pub use registry::{detect, PlatformRegistry};
