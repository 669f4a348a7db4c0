//! 内存盘
//!
//! 把一段内存当作次设备号为 1 的块设备。传输是同步的，
//! `do_request` 返回时链表上的请求已全部完成。

use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;

use block_dev::SECTOR_SIZE;

use super::BlockDriver;
use crate::BufferCache;
use crate::request::Command;
use crate::sync::UpCell;

pub const RAMDISK_MAJOR: u8 = 1;
const RAMDISK_MINOR: u8 = 1;

pub struct RamDisk {
    memory: UpCell<Box<[u8]>>,
}

impl RamDisk {
    /// 长度为 `len` 字节、内容全零的内存盘
    pub fn new(len: usize) -> Self {
        Self::from_image(vec![0; len])
    }

    pub fn from_image(image: Vec<u8>) -> Self {
        log::info!("ram disk: {} bytes", image.len());
        Self {
            memory: UpCell::new(image.into_boxed_slice()),
        }
    }
}

impl BlockDriver for RamDisk {
    fn do_request(&self, cache: &BufferCache) {
        while let Some(req) = cache.current_request(RAMDISK_MAJOR) {
            let start = req.sector as usize * SECTOR_SIZE;
            let len = req.nr_sectors * SECTOR_SIZE;
            let mut memory = self.memory.exclusive_access(cache.cpu());
            if req.dev.minor() != RAMDISK_MINOR || start + len > memory.len() {
                drop(memory);
                cache.end_request(RAMDISK_MAJOR, false);
                continue;
            }
            let disk = &mut memory[start..start + len];
            cache.request_data(RAMDISK_MAJOR, |data| match req.cmd {
                Command::Read => data.copy_from_slice(disk),
                Command::Write => disk.copy_from_slice(data),
            });
            drop(memory);
            cache.end_request(RAMDISK_MAJOR, true);
        }
    }
}
