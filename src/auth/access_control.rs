use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

/// 新设备登录开关
///
/// 关闭时主密码正确也不允许创建新设备，已有设备的 refresh 不受影响
#[derive(Debug)]
pub struct AccessControl {
    new_device_login_allowed: AtomicBool,
}

impl AccessControl {
    pub fn new(allow_new_device_login: bool) -> Self {
        Self {
            new_device_login_allowed: AtomicBool::new(allow_new_device_login),
        }
    }

    pub fn is_new_device_login_allowed(&self) -> bool {
        self.new_device_login_allowed.load(Ordering::Acquire)
    }

    pub fn set_new_device_login_allowed(&self, allowed: bool) {
        let previous = self.new_device_login_allowed.swap(allowed, Ordering::AcqRel);
        if previous != allowed {
            info!("🔐 新设备登录开关: {} → {}", previous, allowed);
        }
    }
}
