//! # 宿主机上的缓冲层
//!
//! 用线程模拟单处理器上的任务与中断，为缓冲层提供文件或内存介质，
//! 以及逐扇区传输、带错误注入的中断驱动磁盘。

mod cpu;
mod disk;
mod medium;

pub use self::{
    cpu::HostCpu,
    disk::{DiskCommand, SIMDISK_MAJOR, SimDisk},
    medium::{BlockFile, MemDisk},
};
