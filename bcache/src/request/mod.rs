//! # 请求层
//!
//! 请求项存放在固定大小的表中，每个主设备维护一条按电梯顺序排列的待处理链表，
//! 链表头是驱动正在处理的当前请求。

mod elevator;
mod queue;

use block_dev::DeviceId;

use crate::buffer::BufferId;
use crate::config::{NR_BLK_DEV, NR_REQUEST, NR_WRITE_REQUEST};
use crate::sync::WaitQueue;

/// 提交方向；预读、预写是尽力而为的读写
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
    ReadAhead,
    WriteAhead,
}

impl Direction {
    /// 去掉尽力而为的修饰
    pub fn command(self) -> Command {
        match self {
            Self::Read | Self::ReadAhead => Command::Read,
            Self::Write | Self::WriteAhead => Command::Write,
        }
    }

    pub fn is_ahead(self) -> bool {
        matches!(self, Self::ReadAhead | Self::WriteAhead)
    }
}

/// 请求实际执行的传输方向，读排在写前面
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Command {
    Read,
    Write,
}

pub(crate) struct Request {
    pub dev: DeviceId,
    pub cmd: Command,
    pub errors: u32,
    pub sector: u64,
    pub nr_sectors: usize,
    /// 已传输的字节数
    pub offset: usize,
    pub buffer: BufferId,
    /// 等待该请求完成的任务
    pub waiting: WaitQueue,
    pub next: Option<usize>,
}

/// 请求的只读快照，驱动通过它得知当前请求还剩哪些扇区
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingRequest {
    pub dev: DeviceId,
    pub cmd: Command,
    pub sector: u64,
    pub nr_sectors: usize,
    pub errors: u32,
}

impl From<&Request> for PendingRequest {
    fn from(req: &Request) -> Self {
        Self {
            dev: req.dev,
            cmd: req.cmd,
            sector: req.sector,
            nr_sectors: req.nr_sectors,
            errors: req.errors,
        }
    }
}

pub(crate) struct RequestTable {
    slots: [Option<Request>; NR_REQUEST],
    /// 各主设备的当前请求
    current: [Option<usize>; NR_BLK_DEV],
}

impl RequestTable {
    pub fn new() -> Self {
        Self {
            slots: [const { None }; NR_REQUEST],
            current: [None; NR_BLK_DEV],
        }
    }

    /// 分配空闲请求项：读从表尾找起，写只在前 2/3 中找
    ///
    /// 表满时原样交还请求。
    pub fn alloc(&mut self, req: Request) -> Result<usize, Request> {
        let end = match req.cmd {
            Command::Read => NR_REQUEST,
            Command::Write => NR_WRITE_REQUEST,
        };
        match (0..end).rev().find(|&i| self.slots[i].is_none()) {
            Some(slot) => {
                self.slots[slot] = Some(req);
                Ok(slot)
            }
            None => Err(req),
        }
    }

    /// 把请求挂到设备的链表上。设备空闲时它成为当前请求，返回 `true`
    pub fn add(&mut self, major: u8, slot: usize) -> bool {
        self.get_mut(slot).next = None;
        let Some(current) = self.current.get_mut(major as usize) else {
            panic!("invalid major {major}");
        };
        match *current {
            None => {
                *current = Some(slot);
                true
            }
            Some(head) => {
                elevator::insert(self, head, slot);
                false
            }
        }
    }

    #[inline]
    pub fn current(&self, major: u8) -> Option<usize> {
        self.current.get(major as usize).copied().flatten()
    }

    /// 摘下当前请求并释放请求项，下一个请求成为当前请求
    pub fn finish_current(&mut self, major: u8) -> Request {
        let Some(slot) = self.current(major) else {
            panic!("no current request on major {major}");
        };
        let Some(req) = self.slots[slot].take() else {
            panic!("request list destroyed");
        };
        self.current[major as usize] = req.next;
        req
    }

    pub fn get(&self, slot: usize) -> &Request {
        self.slots[slot]
            .as_ref()
            .unwrap_or_else(|| panic!("request list destroyed"))
    }

    pub fn get_mut(&mut self, slot: usize) -> &mut Request {
        self.slots[slot]
            .as_mut()
            .unwrap_or_else(|| panic!("request list destroyed"))
    }

    /// 按链表顺序列出设备的请求，当前请求在最前
    pub fn pending(&self, major: u8) -> impl Iterator<Item = &Request> {
        let mut cursor = self.current(major);
        core::iter::from_fn(move || {
            let req = self.get(cursor?);
            cursor = req.next;
            Some(req)
        })
    }

    #[cfg(test)]
    pub fn is_full(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec;
    use alloc::vec::Vec;

    use super::*;

    const MAJOR: u8 = 3;

    pub(super) fn request(cmd: Command, sector: u64) -> Request {
        Request {
            dev: DeviceId::new(MAJOR, 0),
            cmd,
            errors: 0,
            sector,
            nr_sectors: 2,
            offset: 0,
            buffer: BufferId::from(0),
            waiting: WaitQueue::new(),
            next: None,
        }
    }

    fn submit(table: &mut RequestTable, cmd: Command, sector: u64) -> bool {
        let slot = table.alloc(request(cmd, sector)).ok().unwrap();
        table.add(MAJOR, slot)
    }

    fn order(table: &RequestTable) -> Vec<(Command, u64)> {
        table.pending(MAJOR).map(|req| (req.cmd, req.sector)).collect()
    }

    #[test]
    fn write_partition() {
        let mut table = RequestTable::new();
        let writes: Vec<usize> = (0..)
            .map_while(|i| table.alloc(request(Command::Write, i)).ok())
            .collect();
        assert_eq!(NR_WRITE_REQUEST, writes.len());
        assert!(writes.iter().all(|&slot| slot < NR_WRITE_REQUEST));
        assert!(!table.is_full());

        // 后 1/3 只给读
        let reads: Vec<usize> = (0..)
            .map_while(|i| table.alloc(request(Command::Read, i)).ok())
            .collect();
        assert_eq!(NR_REQUEST - NR_WRITE_REQUEST, reads.len());
        assert_eq!(NR_REQUEST - 1, reads[0]);
        assert!(table.is_full());
        assert!(table.alloc(request(Command::Read, 0)).is_err());
    }

    #[test]
    fn reads_start_from_tail() {
        let mut table = RequestTable::new();
        assert_eq!(Some(NR_REQUEST - 1), table.alloc(request(Command::Read, 0)).ok());
        assert_eq!(
            Some(NR_WRITE_REQUEST - 1),
            table.alloc(request(Command::Write, 0)).ok()
        );
    }

    #[test]
    fn first_request_becomes_current() {
        let mut table = RequestTable::new();
        assert!(submit(&mut table, Command::Write, 100));
        assert!(!submit(&mut table, Command::Read, 8));
        assert_eq!(vec![(Command::Write, 100), (Command::Read, 8)], order(&table));

        let done = table.finish_current(MAJOR);
        assert_eq!(100, done.sector);
        assert_eq!(vec![(Command::Read, 8)], order(&table));
        table.finish_current(MAJOR);
        assert!(table.current(MAJOR).is_none());
        assert!(table.slots.iter().all(Option::is_none));
    }

    #[test]
    fn unknown_major_is_idle() {
        let mut table = RequestTable::new();
        submit(&mut table, Command::Read, 8);
        assert!(table.current(NR_BLK_DEV as u8).is_none());
        assert!(table.current(u8::MAX).is_none());
        assert_eq!(0, table.pending(u8::MAX).count());
    }
}
