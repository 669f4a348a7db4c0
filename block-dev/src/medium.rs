use core::any::Any;
use core::fmt;

/// 存储介质特质
///
/// 驱动在完成传输时通过它搬运扇区数据；`buf` 的长度总是 [`SECTOR_SIZE`] 的整数倍。
///
/// [`SECTOR_SIZE`]: crate::SECTOR_SIZE
pub trait BlockDevice: Send + Sync + Any {
    fn read_sectors(&self, sector: u64, buf: &mut [u8]) -> Result<(), MediumError>;
    fn write_sectors(&self, sector: u64, buf: &[u8]) -> Result<(), MediumError>;
    /// 介质的扇区总数
    fn sector_count(&self) -> u64;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediumError {
    /// 访问越过介质末尾
    OutOfRange { sector: u64 },
    /// 介质本身读写失败
    Faulted { sector: u64 },
}

impl fmt::Display for MediumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfRange { sector } => write!(f, "sector {sector} is out of range"),
            Self::Faulted { sector } => write!(f, "medium fault at sector {sector}"),
        }
    }
}
