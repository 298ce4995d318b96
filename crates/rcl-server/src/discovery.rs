use tracing::{info, warn};

use rcl_protocol::cl::{
    CL_DEVICE_NAME, CL_DEVICE_TYPE_ALL, CL_PLATFORM_NAME, CL_PLATFORM_VENDOR, CL_PLATFORM_VERSION,
};
use rcl_protocol::{Handle, ResourceKind};

use crate::driver::ClDriver;

/// What the driver exposes for one platform.
#[derive(Debug, Clone)]
pub struct PlatformSummary {
    pub handle: Handle,
    pub name: String,
    pub vendor: String,
    pub version: String,
    pub devices: Vec<String>,
}

/// Enumerate every platform and device the driver offers.
pub fn discover(driver: &dyn ClDriver) -> Vec<PlatformSummary> {
    let platforms = match driver.platform_ids() {
        Ok(p) => p,
        Err(status) => {
            warn!(backend = driver.backend(), status, "platform enumeration failed");
            return Vec::new();
        }
    };

    let summaries: Vec<PlatformSummary> = platforms
        .into_iter()
        .map(|platform| {
            let text = |param| info_string(driver, ResourceKind::Platform, platform, param);
            // A platform without devices is still reported.
            let devices = driver
                .device_ids(platform, CL_DEVICE_TYPE_ALL)
                .unwrap_or_default()
                .into_iter()
                .map(|d| info_string(driver, ResourceKind::Device, d, CL_DEVICE_NAME))
                .collect();
            PlatformSummary {
                handle: platform,
                name: text(CL_PLATFORM_NAME),
                vendor: text(CL_PLATFORM_VENDOR),
                version: text(CL_PLATFORM_VERSION),
                devices,
            }
        })
        .collect();

    info!(backend = driver.backend(), "discovered {} platform(s)", summaries.len());
    if summaries.is_empty() {
        warn!("no compute platforms available on this machine");
    }
    summaries
}

/// A NUL-terminated info string, or `"?"` when the query fails.
fn info_string(driver: &dyn ClDriver, kind: ResourceKind, object: Handle, param: u32) -> String {
    match driver.info(kind, object, param) {
        Ok(bytes) => {
            let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
            String::from_utf8_lossy(&bytes[..end]).into_owned()
        }
        Err(_) => "?".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimDriver;

    #[test]
    fn simulated_platform_is_discovered() {
        let driver = SimDriver::new();
        let found = discover(&driver);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "rcl simulated platform");
        assert_eq!(found[0].devices.len(), 1);
    }
}
