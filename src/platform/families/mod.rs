//! Built-in platform profiles, one module per OS family.

pub mod generic;
pub mod ios;
pub mod iosxr;
pub mod nxos;
