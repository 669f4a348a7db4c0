#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;

use bcache::{BufferCache, BufferFlag, RAMDISK_MAJOR, RamDisk};
use bcache_sim::{HostCpu, MemDisk, SIMDISK_MAJOR, SimDisk};
use block_dev::{BLOCK_SIZE, DeviceId, SECTORS_PER_BLOCK};

pub const RAM: DeviceId = DeviceId::new(RAMDISK_MAJOR, 1);
pub const DISK: DeviceId = DeviceId::new(SIMDISK_MAJOR, 0);

pub struct Machine {
    pub cpu: Arc<HostCpu>,
    pub cache: Arc<BufferCache>,
}

impl Machine {
    /// 带一块 256 个块的内存盘
    pub fn new(nr_buffers: usize) -> Self {
        let cpu = HostCpu::new();
        let region = vec![0u8; bcache::region_size(nr_buffers)].leak();
        let cache = Arc::new(BufferCache::new(cpu.clone(), region));
        let machine = Self { cpu, cache };
        machine.run(|_, cache| {
            cache.register_driver(RAMDISK_MAJOR, Arc::new(RamDisk::new(256 * BLOCK_SIZE)));
        });
        machine
    }

    /// 再接一块中断驱动的磁盘
    pub fn with_disk(
        nr_buffers: usize,
        max_errors: u32,
        blocks: u64,
    ) -> (Self, Arc<SimDisk>, Arc<MemDisk>) {
        let machine = Self::new(nr_buffers);
        let medium = Arc::new(MemDisk::new(blocks * SECTORS_PER_BLOCK as u64));
        let disk = SimDisk::new(
            Arc::clone(&machine.cpu),
            medium.clone(),
            Arc::downgrade(&machine.cache),
            max_errors,
        );
        let driver = Arc::clone(&disk);
        machine.run(move |_, cache| cache.register_driver(SIMDISK_MAJOR, driver));
        (machine, disk, medium)
    }

    /// 以一个任务的身份运行 `f`，等待它结束
    pub fn run<T, F>(&self, f: F) -> T
    where
        F: FnOnce(&Arc<HostCpu>, &Arc<BufferCache>) -> T + Send + 'static,
        T: Send + 'static,
    {
        let (cpu, cache) = (Arc::clone(&self.cpu), Arc::clone(&self.cache));
        self.cpu.run(move || f(&cpu, &cache))
    }
}

/// 等在途的传输结束，再检查静止时的不变式：
/// 身份不重复，没有上锁或被钉住的缓冲区，请求队列为空
pub fn assert_quiescent(machine: &Machine) {
    machine.run(|cpu, cache| {
        while cache
            .buffers()
            .iter()
            .any(|info| info.flags.contains(BufferFlag::Locked))
        {
            cpu.yield_now();
        }
        let mut identities = HashSet::new();
        for info in cache.buffers() {
            assert_eq!(0, info.count, "{info:?} still pinned");
            if !info.dev.is_none() {
                assert!(identities.insert((info.dev, info.block)), "{info:?} duplicated");
            }
        }
        assert!(cache.pending_requests(RAMDISK_MAJOR).is_empty());
        assert!(cache.pending_requests(SIMDISK_MAJOR).is_empty());
    });
}

pub fn fill(block: u32, seed: u8) -> Vec<u8> {
    (0..BLOCK_SIZE)
        .map(|i| (i as u32 ^ block).wrapping_add(seed as u32) as u8)
        .collect()
}
