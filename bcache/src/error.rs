use core::fmt;

use block_dev::DeviceId;

/// 可恢复的 I/O 错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoError {
    /// 主设备号上没有注册驱动
    NoDevice(DeviceId),
    Unreadable { dev: DeviceId, block: u32 },
    Unwritable { dev: DeviceId, block: u32 },
}

impl fmt::Display for IoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoDevice(dev) => write!(f, "nonexistent block device {dev}"),
            Self::Unreadable { dev, block } => {
                write!(f, "failed to read block {block} of device {dev}")
            }
            Self::Unwritable { dev, block } => {
                write!(f, "failed to write block {block} of device {dev}")
            }
        }
    }
}
