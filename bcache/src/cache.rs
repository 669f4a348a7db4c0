//! # 缓存管理
//!
//! 所有共享状态（身份索引、请求表、驱动表）只在屏蔽中断的短暂区间内读写，
//! 任何可能睡眠的调用前后都不持有借用。
//! 睡醒之后，睡前确认过的条件一律重新确认。

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::mem;

use block_dev::{BLOCK_SIZE, DeviceId};
use enumflags2::BitFlags;

use crate::buffer::{Buffer, BufferFlag, BufferHead, BufferId, BufferInfo, IdentityIndex};
use crate::config::{NR_BLK_DEV, PAGE_BLOCKS};
use crate::driver::BlockDriver;
use crate::request::{Direction, RequestTable};
use crate::sync::{IrqGuard, Processor, UpCell, WaitQueue};
use crate::IoError;

/// 容纳 `nr_buffers` 个缓冲区所需的内存区域长度
pub const fn region_size(nr_buffers: usize) -> usize {
    nr_buffers * (BLOCK_SIZE + mem::size_of::<BufferHead>())
}

pub struct BufferCache {
    pub(crate) cpu: Arc<dyn Processor>,
    pub(crate) index: UpCell<IdentityIndex>,
    /// 每个缓冲区的数据块
    data: Box<[UpCell<&'static mut [u8]>]>,
    /// 每个缓冲区的解锁等待锚
    lock_waits: Box<[WaitQueue]>,
    /// 等待有缓冲区可回收
    buffer_wait: WaitQueue,
    pub(crate) requests: UpCell<RequestTable>,
    /// 等待有空闲请求项
    pub(crate) wait_for_request: WaitQueue,
    pub(crate) drivers: UpCell<[Option<Arc<dyn BlockDriver>>; NR_BLK_DEV]>,
}

impl BufferCache {
    /// 把预留的内存区域划分为描述符与数据块
    ///
    /// 数据块从区域顶端向下切分，剩余部分记为描述符的开销。
    pub fn new(cpu: Arc<dyn Processor>, region: &'static mut [u8]) -> Self {
        let nr_buffers = region.len() / region_size(1);
        let index = IdentityIndex::new(nr_buffers);
        let split = region.len() - nr_buffers * BLOCK_SIZE;
        let (_, blocks) = region.split_at_mut(split);
        let data: Box<[_]> = blocks
            .chunks_exact_mut(BLOCK_SIZE)
            .rev()
            .map(UpCell::new)
            .collect();
        let lock_waits = (0..nr_buffers).map(|_| WaitQueue::new()).collect();
        log::info!("buffer cache: {nr_buffers} buffers = {} bytes", nr_buffers * BLOCK_SIZE);

        Self {
            cpu,
            index: UpCell::new(index),
            data,
            lock_waits,
            buffer_wait: WaitQueue::new(),
            requests: UpCell::new(RequestTable::new()),
            wait_for_request: WaitQueue::new(),
            drivers: UpCell::new([const { None }; NR_BLK_DEV]),
        }
    }

    #[inline]
    pub(crate) fn cpu(&self) -> &dyn Processor {
        &*self.cpu
    }

    pub fn nr_buffers(&self) -> usize {
        self.data.len()
    }

    /// 查找已缓存的块
    ///
    /// 找到后先增加引用再等待解锁；等待期间身份可能被换掉，换掉了就放弃并重新查找。
    pub fn lookup(&self, dev: DeviceId, block: u32) -> Option<Buffer<'_>> {
        let cpu = self.cpu();
        loop {
            let id = self.index.exclusive_session(cpu, |index| {
                let id = index.find(dev, block)?;
                index.pin(id);
                Some(id)
            })?;
            self.wait_on_buffer(id);
            if self.identity(id) == (dev, block) {
                return Some(Buffer::new(self, id));
            }
            self.index.exclusive_session(cpu, |index| index.unpin(id));
        }
    }

    /// 取得块的缓冲区，必要时回收一个空闲缓冲区并换上新身份
    ///
    /// 返回的缓冲区不保证有效，需要数据时用 [`read`]。
    ///
    /// [`read`]: BufferCache::read
    pub fn acquire(&self, dev: DeviceId, block: u32) -> Buffer<'_> {
        assert!(!dev.is_none(), "acquiring a block without device");
        let cpu = self.cpu();
        'repeat: loop {
            if let Some(buf) = self.lookup(dev, block) {
                return buf;
            }

            let Some(id) = self.index.exclusive_session(cpu, |index| index.select_victim()) else {
                self.buffer_wait.sleep_on(cpu);
                continue 'repeat;
            };

            self.wait_on_buffer(id);
            if self.ref_count(id) != 0 {
                continue 'repeat;
            }
            while self.flags(id).contains(BufferFlag::Dirty) {
                let (victim_dev, _) = self.identity(id);
                log::debug!("reclaiming dirty buffer {id:?}, syncing device {victim_dev}");
                self.sync(victim_dev);
                self.wait_on_buffer(id);
                if self.ref_count(id) != 0 {
                    continue 'repeat;
                }
            }

            // 睡眠期间别人可能已经把目标块装进来了
            let claimed = self.index.exclusive_session(cpu, |index| {
                if index.find(dev, block).is_some() {
                    return false;
                }
                index.reassign(id, dev, block);
                true
            });
            if claimed {
                log::trace!("buffer {id:?} -> ({dev}, {block})");
                return Buffer::new(self, id);
            }
        }
    }

    /// 读块，返回有效的缓冲区
    pub fn read(&self, dev: DeviceId, block: u32) -> Result<Buffer<'_>, IoError> {
        let buf = self.acquire(dev, block);
        if buf.is_uptodate() {
            return Ok(buf);
        }
        self.ll_rw_block(Direction::Read, buf.id())?;
        self.wait_on_buffer(buf.id());
        if buf.is_uptodate() {
            Ok(buf)
        } else {
            Err(IoError::Unreadable { dev, block })
        }
    }

    /// 读块，同时为后续的块发起预读
    ///
    /// 预读尽力而为：不等待，不报告失败。
    pub fn read_ahead(
        &self,
        dev: DeviceId,
        block: u32,
        ahead: &[u32],
    ) -> Result<Buffer<'_>, IoError> {
        let buf = self.acquire(dev, block);
        if !buf.is_uptodate() {
            self.ll_rw_block(Direction::Read, buf.id())?;
        }
        for &hint in ahead {
            let tmp = self.acquire(dev, hint);
            if !tmp.is_uptodate() {
                let _ = self.ll_rw_block(Direction::ReadAhead, tmp.id());
            }
            tmp.unpin();
        }
        self.wait_on_buffer(buf.id());
        if buf.is_uptodate() {
            Ok(buf)
        } else {
            Err(IoError::Unreadable { dev, block })
        }
    }

    /// 读一整页的块到 `page`，`None` 表示该位置不读
    ///
    /// 先发起全部读请求，再逐个等待并复制。返回每个位置是否复制成功。
    pub fn read_page(
        &self,
        dev: DeviceId,
        blocks: [Option<u32>; PAGE_BLOCKS],
        page: &mut [u8],
    ) -> [bool; PAGE_BLOCKS] {
        assert!(page.len() >= PAGE_BLOCKS * BLOCK_SIZE, "page too small");
        let bufs = blocks.map(|block| {
            let buf = self.acquire(dev, block?);
            if !buf.is_uptodate() {
                let _ = self.ll_rw_block(Direction::Read, buf.id());
            }
            Some(buf)
        });

        let mut copied = [false; PAGE_BLOCKS];
        for ((buf, dst), ok) in bufs
            .into_iter()
            .zip(page.chunks_exact_mut(BLOCK_SIZE))
            .zip(copied.iter_mut())
        {
            let Some(buf) = buf else { continue };
            self.wait_on_buffer(buf.id());
            if buf.is_uptodate() {
                buf.map(|data| dst.copy_from_slice(data));
                *ok = true;
            }
        }
        copied
    }

    /// 释放缓冲区，等同于销毁句柄
    #[inline]
    pub fn release(&self, buf: Buffer<'_>) {
        drop(buf);
    }

    /// 写回缓冲区并等待传输结束
    pub fn write(&self, buf: &Buffer<'_>) -> Result<(), IoError> {
        if !buf.is_dirty() {
            return Ok(());
        }
        self.ll_rw_block(Direction::Write, buf.id())?;
        self.wait_on_buffer(buf.id());
        if buf.is_uptodate() {
            Ok(())
        } else {
            Err(IoError::Unwritable {
                dev: buf.dev(),
                block: buf.block(),
            })
        }
    }

    /// 为设备的所有脏缓冲区发起写回，不等待完成
    pub fn sync(&self, dev: DeviceId) {
        self.sync_matching(|d| d == dev);
    }

    /// 写回所有设备的脏缓冲区
    pub fn sync_all(&self) {
        self.sync_matching(|d| !d.is_none());
    }

    fn sync_matching(&self, matches: impl Fn(DeviceId) -> bool) {
        let cpu = self.cpu();
        let ids = self.index.exclusive_access(cpu).ids();
        for id in ids {
            if !matches(self.identity(id).0) {
                continue;
            }
            self.wait_on_buffer(id);
            let (dev, block) = self.identity(id);
            if !matches(dev) || !self.flags(id).contains(BufferFlag::Dirty) {
                continue;
            }
            if let Err(IoError::NoDevice(_)) = self.ll_rw_block(Direction::Write, id) {
                log::warn!("discarding dirty block {block} of nonexistent device {dev}");
                self.update_flags(id, |flags| flags.remove(BufferFlag::Dirty));
            }
        }
    }

    /// 作废设备的所有缓冲区：身份保留，数据不再有效，也不再写回
    pub fn invalidate(&self, dev: DeviceId) {
        let cpu = self.cpu();
        let ids = self.index.exclusive_access(cpu).ids();
        for id in ids {
            if self.identity(id).0 != dev {
                continue;
            }
            self.wait_on_buffer(id);
            if self.identity(id).0 == dev {
                self.update_flags(id, |flags| {
                    flags.remove(BufferFlag::Uptodate | BufferFlag::Dirty)
                });
            }
        }
    }

    /// 所有描述符的快照
    pub fn buffers(&self) -> Vec<BufferInfo> {
        self.index.exclusive_session(self.cpu(), |index| {
            index
                .ids()
                .map(|id| BufferInfo::from((id, index.head(id))))
                .collect()
        })
    }
}

// 缓冲区底层操作
impl BufferCache {
    pub(crate) fn identity(&self, id: BufferId) -> (DeviceId, u32) {
        let index = self.index.exclusive_access(self.cpu());
        let head = index.head(id);
        (head.dev, head.block)
    }

    pub(crate) fn flags(&self, id: BufferId) -> BitFlags<BufferFlag> {
        self.index.exclusive_access(self.cpu()).head(id).flags
    }

    pub(crate) fn update_flags(&self, id: BufferId, f: impl FnOnce(&mut BitFlags<BufferFlag>)) {
        f(&mut self.index.exclusive_access(self.cpu()).head_mut(id).flags)
    }

    pub(crate) fn ref_count(&self, id: BufferId) -> usize {
        self.index.exclusive_access(self.cpu()).head(id).count
    }

    pub(crate) fn with_data<V>(&self, id: BufferId, f: impl FnOnce(&mut [u8]) -> V) -> V {
        let mut data = self.data[usize::from(id)].exclusive_access(self.cpu());
        f(&mut data)
    }

    /// 等待缓冲区解锁
    pub(crate) fn wait_on_buffer(&self, id: BufferId) {
        let cpu = self.cpu();
        let _irq = IrqGuard::new(cpu);
        while self.flags(id).contains(BufferFlag::Locked) {
            self.lock_waits[usize::from(id)].sleep_on(cpu);
        }
    }

    pub(crate) fn lock_buffer(&self, id: BufferId) {
        let cpu = self.cpu();
        let _irq = IrqGuard::new(cpu);
        while self.flags(id).contains(BufferFlag::Locked) {
            self.lock_waits[usize::from(id)].sleep_on(cpu);
        }
        self.update_flags(id, |flags| flags.insert(BufferFlag::Locked));
    }

    pub(crate) fn unlock_buffer(&self, id: BufferId) {
        let cpu = self.cpu();
        if !self.flags(id).contains(BufferFlag::Locked) {
            log::warn!("free buffer being unlocked");
        }
        self.update_flags(id, |flags| flags.remove(BufferFlag::Locked));
        self.lock_waits[usize::from(id)].wake_up(cpu);
    }

    /// 释放一次引用：等待传输结束后计数减一
    pub(crate) fn brelse(&self, id: BufferId) {
        self.wait_on_buffer(id);
        self.put(id);
    }

    /// 计数减一，不等待
    pub(crate) fn put(&self, id: BufferId) {
        let cpu = self.cpu();
        self.index.exclusive_session(cpu, |index| index.unpin(id));
        self.buffer_wait.wake_up(cpu);
    }
}
