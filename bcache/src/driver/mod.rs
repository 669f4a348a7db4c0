//! # 块设备驱动
//!
//! 驱动按主设备号注册。设备从空闲变为有当前请求时，请求层调用 [`BlockDriver::do_request`]；
//! 驱动完成当前请求后调用 [`BufferCache::end_request`]，再继续处理新的当前请求，
//! 直到链表为空。

mod ramdisk;

use alloc::sync::Arc;

use block_dev::DeviceId;

pub use self::ramdisk::{RAMDISK_MAJOR, RamDisk};
use crate::BufferCache;
use crate::config::NR_BLK_DEV;

pub trait BlockDriver: Send + Sync {
    /// 处理设备的当前请求
    ///
    /// 同步驱动在返回前处理完整条链表；中断驱动只需启动传输，由中断继续。
    fn do_request(&self, cache: &BufferCache);

    /// 次设备上的可移动介质是否更换过
    fn media_changed(&self, _minor: u8) -> bool {
        false
    }
}

impl BufferCache {
    /// 为主设备号注册驱动
    pub fn register_driver(&self, major: u8, driver: Arc<dyn BlockDriver>) {
        assert!(
            major != 0 && (major as usize) < NR_BLK_DEV,
            "invalid major {major}"
        );
        self.drivers.exclusive_session(self.cpu(), |drivers| {
            let slot = &mut drivers[major as usize];
            if slot.is_some() {
                panic!("driver for major {major} registered twice");
            }
            *slot = Some(driver);
        });
        log::info!("block driver registered on major {major}");
    }

    pub(crate) fn driver(&self, major: u8) -> Option<Arc<dyn BlockDriver>> {
        self.drivers
            .exclusive_access(self.cpu())
            .get(major as usize)?
            .clone()
    }

    /// 检查可移动介质是否更换，更换了就作废该设备的全部缓冲区
    ///
    /// 返回介质是否更换。
    pub fn check_disk_change(&self, dev: DeviceId) -> bool {
        let Some(driver) = self.driver(dev.major()) else {
            return false;
        };
        if !driver.media_changed(dev.minor()) {
            return false;
        }
        log::warn!("disk change detected on device {dev}");
        self.invalidate(dev);
        true
    }
}
