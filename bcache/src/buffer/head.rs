use block_dev::DeviceId;
use enumflags2::{BitFlags, bitflags};

use super::BufferId;

#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferFlag {
    /// 数据是设备上该块的有效副本
    Uptodate = 1,
    /// 数据比设备上的新，换出身份之前必须写回
    Dirty = 1 << 1,
    /// 有传输正在进行
    Locked = 1 << 2,
}

/// 缓冲区描述符
#[derive(Debug)]
pub(crate) struct BufferHead {
    pub dev: DeviceId,
    pub block: u32,
    pub flags: BitFlags<BufferFlag>,
    /// 引用计数，非零时身份不可更换
    pub count: usize,
    /// 哈希链，仅当 `dev` 非空时有意义
    pub hash_prev: Option<BufferId>,
    pub hash_next: Option<BufferId>,
    /// 回收环，所有描述符都在环上
    pub prev_free: BufferId,
    pub next_free: BufferId,
}

impl BufferHead {
    pub fn new(prev_free: BufferId, next_free: BufferId) -> Self {
        Self {
            dev: DeviceId::NONE,
            block: 0,
            flags: BitFlags::empty(),
            count: 0,
            hash_prev: None,
            hash_next: None,
            prev_free,
            next_free,
        }
    }

    #[inline]
    pub fn is(&self, flag: BufferFlag) -> bool {
        self.flags.contains(flag)
    }

    /// 回收代价：脏块需要写回，代价最高；上锁的块等传输结束即可
    #[inline]
    pub fn badness(&self) -> u8 {
        2 * self.is(BufferFlag::Dirty) as u8 + self.is(BufferFlag::Locked) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn badness() {
        let mut head = BufferHead::new(BufferId::from(0), BufferId::from(0));
        assert_eq!(0, head.badness());
        head.flags |= BufferFlag::Locked;
        assert_eq!(1, head.badness());
        head.flags = BufferFlag::Dirty.into();
        assert_eq!(2, head.badness());
        head.flags |= BufferFlag::Locked | BufferFlag::Uptodate;
        assert_eq!(3, head.badness());
    }
}
