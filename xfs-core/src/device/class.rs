//! Three-character device class tags (`CDM`, `IDC`, `PIN`, ...).

use std::fmt;
use std::str::FromStr;

use crate::error::XfsError;

/// Upper-cased, exactly three ASCII alphanumerics.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceClass(String);

impl DeviceClass {
    pub fn new(tag: &str) -> Result<Self, XfsError> {
        let tag = tag.trim();
        if tag.len() != 3 || !tag.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(XfsError::InvalidDeviceClass(tag.to_string()));
        }
        Ok(Self(tag.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `WFS_INF_<CLASS>_STATUS`
    pub fn status_category(&self) -> String {
        format!("WFS_INF_{}_STATUS", self.0)
    }

    /// `WFS_INF_<CLASS>_CAPABILITIES`
    pub fn capabilities_category(&self) -> String {
        format!("WFS_INF_{}_CAPABILITIES", self.0)
    }
}

impl FromStr for DeviceClass {
    type Err = XfsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
