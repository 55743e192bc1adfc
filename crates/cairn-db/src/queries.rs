//! Query functions organized by table group.

pub mod accounts;
pub mod charges;
pub mod pins;
pub mod quota;
pub mod settings;
