//! # 块设备接口层
//!
//! 块设备以**扇区**为单位读写，缓冲层以**块**为单位缓存；
//! 本 crate 规定两者的尺寸、设备号的编码，
//! 以及驱动读写存储介质所用的 [`BlockDevice`] 特质。

#![no_std]

mod device;
mod medium;

pub use self::{
    device::DeviceId,
    medium::{BlockDevice, MediumError},
};

/// 扇区大小，驱动与介质之间的最小传输单位
pub const SECTOR_SIZE: usize = 512;
/// 块大小，一个缓冲区承载的数据量
pub const BLOCK_SIZE: usize = 1024;
pub const SECTORS_PER_BLOCK: usize = BLOCK_SIZE / SECTOR_SIZE;
