//! 身份索引
//!
//! 哈希表把 (设备, 块号) 映射到描述符；回收环串起**全部**描述符，
//! 刚换过身份的放到环尾，回收时从环头开始找。

use alloc::vec::Vec;

use block_dev::DeviceId;

use super::{BufferFlag, BufferHead, BufferId};
use crate::config::NR_HASH;

pub(crate) struct IdentityIndex {
    heads: Vec<BufferHead>,
    hash_table: Vec<Option<BufferId>>,
    /// 回收环的环头
    free_list: BufferId,
}

#[inline]
fn hash(dev: DeviceId, block: u32) -> usize {
    (dev.raw() as usize ^ block as usize) % NR_HASH
}

impl IdentityIndex {
    pub fn new(nr_buffers: usize) -> Self {
        assert!(nr_buffers > 0, "no memory for buffers");
        let heads = (0..nr_buffers)
            .map(|i| {
                BufferHead::new(
                    BufferId::from((i + nr_buffers - 1) % nr_buffers),
                    BufferId::from((i + 1) % nr_buffers),
                )
            })
            .collect();

        Self {
            heads,
            hash_table: alloc::vec![None; NR_HASH],
            free_list: BufferId::from(0),
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.heads.len()
    }

    #[inline]
    pub fn head(&self, id: BufferId) -> &BufferHead {
        &self.heads[usize::from(id)]
    }

    #[inline]
    pub fn head_mut(&mut self, id: BufferId) -> &mut BufferHead {
        &mut self.heads[usize::from(id)]
    }

    pub fn ids(&self) -> impl Iterator<Item = BufferId> + use<> {
        (0..self.heads.len()).map(BufferId::from)
    }

    /// 沿哈希链查找身份
    pub fn find(&self, dev: DeviceId, block: u32) -> Option<BufferId> {
        let mut cursor = self.hash_table[hash(dev, block)];
        while let Some(id) = cursor {
            let head = self.head(id);
            if head.dev == dev && head.block == block {
                return Some(id);
            }
            cursor = head.hash_next;
        }
        None
    }

    #[inline]
    pub fn pin(&mut self, id: BufferId) {
        self.head_mut(id).count += 1;
    }

    pub fn unpin(&mut self, id: BufferId) {
        let head = self.head_mut(id);
        if head.count == 0 {
            panic!("trying to free free buffer");
        }
        head.count -= 1;
    }

    /// 从环头开始找回收代价最小的空闲描述符，遇到代价为零的立即停止
    pub fn select_victim(&self) -> Option<BufferId> {
        let mut best: Option<(BufferId, u8)> = None;
        let mut id = self.free_list;
        loop {
            let head = self.head(id);
            if head.count == 0 {
                let badness = head.badness();
                if best.is_none_or(|(_, min)| badness < min) {
                    best = Some((id, badness));
                    if badness == 0 {
                        break;
                    }
                }
            }
            id = head.next_free;
            if id == self.free_list {
                break;
            }
        }
        best.map(|(id, _)| id)
    }

    /// 把空闲描述符换成新身份：引用计数置一，清除脏与有效标志，挪到环尾与新哈希链头
    pub fn reassign(&mut self, id: BufferId, dev: DeviceId, block: u32) {
        assert!(!dev.is_none(), "buffer identity without device");
        assert_eq!(0, self.head(id).count, "reassigning a pinned buffer");

        self.remove_from_queues(id);
        let head = self.head_mut(id);
        head.count = 1;
        head.flags.remove(BufferFlag::Dirty | BufferFlag::Uptodate);
        head.dev = dev;
        head.block = block;
        self.insert_into_queues(id);
    }

    fn remove_from_queues(&mut self, id: BufferId) {
        let BufferHead {
            dev,
            block,
            hash_prev,
            hash_next,
            prev_free,
            next_free,
            ..
        } = *self.head(id);

        // 哈希链
        if let Some(next) = hash_next {
            self.head_mut(next).hash_prev = hash_prev;
        }
        if let Some(prev) = hash_prev {
            self.head_mut(prev).hash_next = hash_next;
        } else if !dev.is_none() {
            let bucket = &mut self.hash_table[hash(dev, block)];
            if *bucket != Some(id) {
                panic!("hash chain corrupted");
            }
            *bucket = hash_next;
        }

        // 回收环
        if self.head(prev_free).next_free != id || self.head(next_free).prev_free != id {
            panic!("free block list corrupted");
        }
        self.head_mut(prev_free).next_free = next_free;
        self.head_mut(next_free).prev_free = prev_free;
        if self.free_list == id {
            self.free_list = next_free;
        }

        let head = self.head_mut(id);
        head.hash_prev = None;
        head.hash_next = None;
        head.prev_free = id;
        head.next_free = id;
    }

    fn insert_into_queues(&mut self, id: BufferId) {
        // 放到环尾；环中只有它自己时无需链接
        if self.free_list != id {
            let first = self.free_list;
            let last = self.head(first).prev_free;
            let head = self.head_mut(id);
            head.next_free = first;
            head.prev_free = last;
            self.head_mut(last).next_free = id;
            self.head_mut(first).prev_free = id;
        }

        let (dev, block) = (self.head(id).dev, self.head(id).block);
        if dev.is_none() {
            return;
        }
        let bucket = hash(dev, block);
        let first = self.hash_table[bucket].replace(id);
        if let Some(first) = first {
            self.head_mut(first).hash_prev = Some(id);
        }
        let head = self.head_mut(id);
        head.hash_prev = None;
        head.hash_next = first;
    }

    /// 按回收环的顺序列出描述符
    #[cfg(test)]
    fn ring(&self) -> Vec<BufferId> {
        let mut ring = Vec::new();
        let mut id = self.free_list;
        loop {
            ring.push(id);
            id = self.head(id).next_free;
            if id == self.free_list {
                break;
            }
        }
        ring
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;

    use super::*;

    const DEV: DeviceId = DeviceId::new(1, 1);

    fn ids(raw: &[usize]) -> Vec<BufferId> {
        raw.iter().copied().map(BufferId::from).collect()
    }

    /// 每个有身份的描述符都能查到自己，且身份不重复
    fn check(index: &IdentityIndex) {
        assert_eq!(index.len(), index.ring().len());
        let mut seen = Vec::new();
        for id in index.ids() {
            let head = index.head(id);
            if head.dev.is_none() {
                assert!(head.hash_prev.is_none() && head.hash_next.is_none());
                continue;
            }
            assert_eq!(Some(id), index.find(head.dev, head.block));
            assert!(!seen.contains(&(head.dev, head.block)));
            seen.push((head.dev, head.block));
        }
    }

    #[test]
    fn initial_ring() {
        let index = IdentityIndex::new(4);
        assert_eq!(ids(&[0, 1, 2, 3]), index.ring());
        assert_eq!(None, index.find(DEV, 0));
        check(&index);
    }

    #[test]
    fn reassign_moves_to_tail() {
        let mut index = IdentityIndex::new(4);
        index.reassign(BufferId::from(0), DEV, 5);
        assert_eq!(ids(&[1, 2, 3, 0]), index.ring());
        index.reassign(BufferId::from(2), DEV, 6);
        assert_eq!(ids(&[1, 3, 0, 2]), index.ring());
        assert_eq!(Some(BufferId::from(0)), index.find(DEV, 5));
        assert_eq!(Some(BufferId::from(2)), index.find(DEV, 6));
        check(&index);
    }

    #[test]
    fn colliding_identities() {
        let mut index = IdentityIndex::new(3);
        // 与 (DEV, 7) 落在同一个桶
        assert_eq!(hash(DEV, 7), hash(DEV, 7 + NR_HASH as u32));
        let other = DeviceId::new(3, 1);

        index.reassign(BufferId::from(0), DEV, 7);
        index.reassign(BufferId::from(1), DEV, 7 + NR_HASH as u32);
        index.reassign(BufferId::from(2), other, 3);
        check(&index);

        index.unpin(BufferId::from(1));
        index.reassign(BufferId::from(1), DEV, 8);
        assert_eq!(None, index.find(DEV, 7 + NR_HASH as u32));
        assert_eq!(Some(BufferId::from(0)), index.find(DEV, 7));
        check(&index);

        index.unpin(BufferId::from(0));
        index.reassign(BufferId::from(0), DEV, 9);
        assert_eq!(None, index.find(DEV, 7));
        check(&index);
    }

    #[test]
    fn victim_prefers_clean_then_locked() {
        let mut index = IdentityIndex::new(3);
        for (i, block) in [1, 2, 3].into_iter().enumerate() {
            index.reassign(BufferId::from(i), DEV, block);
            index.unpin(BufferId::from(i));
        }
        index.head_mut(BufferId::from(0)).flags |= BufferFlag::Dirty;
        index.head_mut(BufferId::from(1)).flags |= BufferFlag::Locked;
        assert_eq!(Some(BufferId::from(2)), index.select_victim());

        index.pin(BufferId::from(2));
        assert_eq!(Some(BufferId::from(1)), index.select_victim());

        index.pin(BufferId::from(1));
        assert_eq!(Some(BufferId::from(0)), index.select_victim());

        index.pin(BufferId::from(0));
        assert_eq!(None, index.select_victim());
    }

    #[test]
    fn victim_scan_starts_at_ring_head() {
        let mut index = IdentityIndex::new(3);
        index.reassign(BufferId::from(0), DEV, 1);
        index.unpin(BufferId::from(0));
        // 环：1 2 0，全部空闲且干净
        assert_eq!(Some(BufferId::from(1)), index.select_victim());
    }

    #[test]
    #[should_panic(expected = "trying to free free buffer")]
    fn unpin_underflow() {
        let mut index = IdentityIndex::new(1);
        index.unpin(BufferId::from(0));
    }
}
