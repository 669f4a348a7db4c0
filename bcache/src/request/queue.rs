//! 请求的提交与完成
//!
//! 提交发生在任务上下文，完成发生在驱动的中断上下文，
//! 二者共享请求表与缓冲区标志，都只在屏蔽中断时修改。

use alloc::vec::Vec;

use block_dev::{SECTOR_SIZE, SECTORS_PER_BLOCK};
use enumflags2::BitFlags;

use super::{Command, Direction, PendingRequest, Request};
use crate::buffer::{Buffer, BufferFlag, BufferId};
use crate::sync::{IrqGuard, WaitQueue};
use crate::{BufferCache, IoError};

impl BufferCache {
    /// 为缓冲区发起一次传输，不等待完成
    ///
    /// 写一个不脏的缓冲区、读一个有效的缓冲区都不会产生请求。
    pub fn submit(&self, dir: Direction, buf: &Buffer<'_>) -> Result<(), IoError> {
        self.ll_rw_block(dir, buf.id())
    }

    pub(crate) fn ll_rw_block(&self, dir: Direction, id: BufferId) -> Result<(), IoError> {
        let (dev, _) = self.identity(id);
        if self.driver(dev.major()).is_none() {
            log::error!("trying to access nonexistent block device {dev}");
            return Err(IoError::NoDevice(dev));
        }
        self.make_request(dev.major(), dir, id);
        Ok(())
    }

    fn make_request(&self, major: u8, dir: Direction, id: BufferId) {
        let cpu = self.cpu();
        // 预读预写遇到上锁的缓冲区直接放弃
        if dir.is_ahead() && self.flags(id).contains(BufferFlag::Locked) {
            return;
        }
        let cmd = dir.command();
        let needless = |flags: BitFlags<BufferFlag>| match cmd {
            Command::Write => !flags.contains(BufferFlag::Dirty),
            Command::Read => flags.contains(BufferFlag::Uptodate),
        };
        if needless(self.flags(id)) {
            return;
        }

        self.lock_buffer(id);
        // 等锁期间别的提交可能已经完成了同样的传输
        if needless(self.flags(id)) {
            self.unlock_buffer(id);
            return;
        }

        let (dev, block) = self.identity(id);
        let mut req = Request {
            dev,
            cmd,
            errors: 0,
            sector: block as u64 * SECTORS_PER_BLOCK as u64,
            nr_sectors: SECTORS_PER_BLOCK,
            offset: 0,
            buffer: id,
            waiting: WaitQueue::new(),
            next: None,
        };
        let slot = loop {
            let _irq = IrqGuard::new(cpu);
            match self.requests.exclusive_session(cpu, |table| table.alloc(req)) {
                Ok(slot) => break slot,
                Err(_) if dir.is_ahead() => {
                    self.unlock_buffer(id);
                    return;
                }
                Err(back) => {
                    req = back;
                    self.wait_for_request.sleep_on(cpu);
                }
            }
        };
        log::debug!("{cmd:?} request for block {block} of {dev} in slot {slot}");
        self.add_request(major, slot);
    }

    fn add_request(&self, major: u8, slot: usize) {
        let cpu = self.cpu();
        let idle = {
            let _irq = IrqGuard::new(cpu);
            let buffer = self.requests.exclusive_access(cpu).get(slot).buffer;
            self.update_flags(buffer, |flags| flags.remove(BufferFlag::Dirty));
            self.requests
                .exclusive_session(cpu, |table| table.add(major, slot))
        };
        if !idle {
            return;
        }
        if let Some(driver) = self.driver(major) {
            driver.do_request(self);
        }
    }

    /// 设备上的请求，当前请求在最前
    pub fn pending_requests(&self, major: u8) -> Vec<PendingRequest> {
        self.requests.exclusive_session(self.cpu(), |table| {
            table.pending(major).map(PendingRequest::from).collect()
        })
    }
}

// 驱动使用的接口
impl BufferCache {
    /// 设备的当前请求
    ///
    /// 当前请求必须属于该设备，且其缓冲区处于上锁状态。
    pub fn current_request(&self, major: u8) -> Option<PendingRequest> {
        let (req, buffer) = self.requests.exclusive_session(self.cpu(), |table| {
            let req = table.get(table.current(major)?);
            Some((PendingRequest::from(req), req.buffer))
        })?;
        if req.dev.major() != major {
            panic!("request list destroyed");
        }
        if !self.flags(buffer).contains(BufferFlag::Locked) {
            panic!("block not locked");
        }
        Some(req)
    }

    /// 访问当前请求尚未传输的那部分数据
    pub fn request_data<V>(&self, major: u8, f: impl FnOnce(&mut [u8]) -> V) -> V {
        let (buffer, start, len) = self.requests.exclusive_session(self.cpu(), |table| {
            let Some(slot) = table.current(major) else {
                panic!("no current request on major {major}");
            };
            let req = table.get(slot);
            (req.buffer, req.offset, req.nr_sectors * SECTOR_SIZE)
        });
        self.with_data(buffer, |data| f(&mut data[start..start + len]))
    }

    /// 当前请求又完成了 `sectors` 个扇区，返回剩余的扇区数
    ///
    /// 传输有进展即清零出错计数。
    pub fn advance_request(&self, major: u8, sectors: usize) -> usize {
        self.requests.exclusive_session(self.cpu(), |table| {
            let Some(slot) = table.current(major) else {
                panic!("no current request on major {major}");
            };
            let req = table.get_mut(slot);
            assert!(sectors <= req.nr_sectors, "request overrun");
            req.sector += sectors as u64;
            req.nr_sectors -= sectors;
            req.offset += sectors * SECTOR_SIZE;
            req.errors = 0;
            req.nr_sectors
        })
    }

    /// 当前请求出错一次，返回累计的出错次数
    ///
    /// 达到 `max_errors` 时请求以失败结束。
    pub fn request_failed(&self, major: u8, max_errors: u32) -> u32 {
        let errors = self.requests.exclusive_session(self.cpu(), |table| {
            let Some(slot) = table.current(major) else {
                panic!("no current request on major {major}");
            };
            let req = table.get_mut(slot);
            req.errors += 1;
            req.errors
        });
        if errors >= max_errors {
            self.end_request(major, false);
        }
        errors
    }

    /// 结束当前请求
    ///
    /// 设置缓冲区的有效标志并解锁，唤醒等待者，释放请求项，下一个请求成为当前请求。
    /// 驱动随后应继续处理新的当前请求。
    pub fn end_request(&self, major: u8, uptodate: bool) {
        let cpu = self.cpu();
        let req = self
            .requests
            .exclusive_session(cpu, |table| table.finish_current(major));
        self.update_flags(req.buffer, |flags| {
            if uptodate {
                flags.insert(BufferFlag::Uptodate);
            } else {
                flags.remove(BufferFlag::Uptodate);
            }
        });
        self.unlock_buffer(req.buffer);
        if !uptodate {
            let (dev, block) = self.identity(req.buffer);
            log::error!("I/O error, dev {dev}, block {block}");
        }
        req.waiting.wake_up(cpu);
        self.wait_for_request.wake_up(cpu);
    }
}
