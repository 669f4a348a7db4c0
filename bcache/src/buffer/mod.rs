//! # 缓冲区
//!
//! 描述符在初始化时一次分配，此后只原地更换身份，从不销毁。
//! 使用者拿到的是计数句柄 [`Buffer`]，句柄销毁即释放一次引用。

mod head;
mod index;

use core::fmt;

use block_dev::DeviceId;
use derive_more::{From, Into};
use enumflags2::BitFlags;

pub use self::head::BufferFlag;
pub(crate) use self::{head::BufferHead, index::IdentityIndex};
use crate::BufferCache;

/// 描述符在缓冲池中的下标
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, From, Into)]
#[repr(transparent)]
pub struct BufferId(usize);

/// 被钉住的缓冲区
///
/// 持有期间身份不会改变。销毁时先等待传输结束，再把引用计数减一。
pub struct Buffer<'a> {
    cache: &'a BufferCache,
    id: BufferId,
    dev: DeviceId,
    block: u32,
}

impl<'a> Buffer<'a> {
    pub(crate) fn new(cache: &'a BufferCache, id: BufferId) -> Self {
        let (dev, block) = cache.identity(id);
        Self {
            cache,
            id,
            dev,
            block,
        }
    }

    #[inline]
    pub fn id(&self) -> BufferId {
        self.id
    }

    #[inline]
    pub fn dev(&self) -> DeviceId {
        self.dev
    }

    #[inline]
    pub fn block(&self) -> u32 {
        self.block
    }

    pub fn flags(&self) -> BitFlags<BufferFlag> {
        self.cache.flags(self.id)
    }

    pub fn is_uptodate(&self) -> bool {
        self.flags().contains(BufferFlag::Uptodate)
    }

    pub fn is_dirty(&self) -> bool {
        self.flags().contains(BufferFlag::Dirty)
    }

    pub fn is_locked(&self) -> bool {
        self.flags().contains(BufferFlag::Locked)
    }

    pub fn ref_count(&self) -> usize {
        self.cache.ref_count(self.id)
    }

    /// 读数据，先等待进行中的传输结束
    pub fn map<V>(&self, f: impl FnOnce(&[u8]) -> V) -> V {
        self.cache.wait_on_buffer(self.id);
        self.cache.with_data(self.id, |data| f(data))
    }

    /// 改数据并标脏
    pub fn map_mut<V>(&mut self, f: impl FnOnce(&mut [u8]) -> V) -> V {
        self.cache.wait_on_buffer(self.id);
        let ret = self.cache.with_data(self.id, f);
        self.mark_dirty();
        ret
    }

    /// 清零整块，视作有效且需写回
    pub fn zeroize(&mut self) {
        self.map_mut(|data| data.fill(0));
        self.set_uptodate();
    }

    pub fn mark_dirty(&mut self) {
        self.cache
            .update_flags(self.id, |flags| flags.insert(BufferFlag::Dirty));
    }

    pub fn set_uptodate(&mut self) {
        self.cache
            .update_flags(self.id, |flags| flags.insert(BufferFlag::Uptodate));
    }

    /// 交出引用而不等待传输结束
    pub(crate) fn unpin(self) {
        let (cache, id) = (self.cache, self.id);
        core::mem::forget(self);
        cache.put(id);
    }
}

impl Drop for Buffer<'_> {
    fn drop(&mut self) {
        self.cache.brelse(self.id);
    }
}

impl fmt::Debug for Buffer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("id", &self.id)
            .field("dev", &self.dev)
            .field("block", &self.block)
            .finish()
    }
}

/// 描述符的只读快照
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferInfo {
    pub id: BufferId,
    pub dev: DeviceId,
    pub block: u32,
    pub flags: BitFlags<BufferFlag>,
    pub count: usize,
}

impl From<(BufferId, &BufferHead)> for BufferInfo {
    fn from((id, head): (BufferId, &BufferHead)) -> Self {
        Self {
            id,
            dev: head.dev,
            block: head.block,
            flags: head.flags,
            count: head.count,
        }
    }
}
