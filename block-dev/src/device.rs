use core::fmt;

use derive_more::{From, Into};

/// 设备号：高 8 位为主设备号（选择驱动），低 8 位为次设备号
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, From, Into)]
#[repr(transparent)]
pub struct DeviceId(u16);

impl DeviceId {
    /// 空设备号，缓冲区没有身份时使用
    pub const NONE: Self = Self(0);

    pub const fn new(major: u8, minor: u8) -> Self {
        Self(((major as u16) << 8) | minor as u16)
    }

    #[inline]
    pub const fn major(self) -> u8 {
        (self.0 >> 8) as u8
    }

    #[inline]
    pub const fn minor(self) -> u8 {
        self.0 as u8
    }

    #[inline]
    pub const fn raw(self) -> u16 {
        self.0
    }

    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}", self.0)
    }
}
