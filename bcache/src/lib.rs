//! # 块缓冲层
//!
//! 用一小块内存缓存块设备上的块：同一个块在内存中至多一份，
//! 脏块在换出之前写回，对设备的访问经按电梯顺序排列的请求队列串行化。
//!
//! 单处理器、内核不可抢占，并发只来自中断。共享状态没有锁，
//! 只在屏蔽中断的短暂区间内修改；睡眠前后不持有任何借用，醒来后重新确认一切。

#![no_std]

extern crate alloc;
#[cfg(test)]
extern crate std;

mod buffer;
mod cache;
pub mod config;
mod driver;
mod error;
mod request;
mod sync;

use alloc::sync::Arc;

use spin::Once;

pub use self::{
    buffer::{Buffer, BufferFlag, BufferId, BufferInfo},
    cache::{BufferCache, region_size},
    driver::{BlockDriver, RAMDISK_MAJOR, RamDisk},
    error::IoError,
    request::{Command, Direction, PendingRequest},
    sync::{IrqGuard, Processor, TaskId, UpCell, UpRefMut, WaitQueue},
};

static BUFFER_CACHE: Once<Arc<BufferCache>> = Once::new();

/// 用预留的内存区域建立全局缓冲层，只能调用一次
pub fn init(cpu: Arc<dyn Processor>, region: &'static mut [u8]) -> Arc<BufferCache> {
    if BUFFER_CACHE.is_completed() {
        panic!("buffer cache initialized twice");
    }
    Arc::clone(BUFFER_CACHE.call_once(|| Arc::new(BufferCache::new(cpu, region))))
}

#[inline]
pub fn bcache() -> &'static Arc<BufferCache> {
    BUFFER_CACHE
        .get()
        .expect("buffer cache used before initialization")
}
