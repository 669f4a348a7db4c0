use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::{Mutex, PoisonError};

use block_dev::{BlockDevice, MediumError, SECTOR_SIZE};

/// 越界检查，返回起始字节偏移
fn locate(sector: u64, len: usize, sector_count: u64) -> Result<u64, MediumError> {
    assert_eq!(0, len % SECTOR_SIZE, "not a complete sector");
    if sector + (len / SECTOR_SIZE) as u64 > sector_count {
        return Err(MediumError::OutOfRange { sector });
    }
    Ok(sector * SECTOR_SIZE as u64)
}

/// 以宿主机文件为介质
#[derive(Debug)]
pub struct BlockFile {
    file: Mutex<File>,
    sector_count: u64,
}

impl BlockFile {
    pub fn new(file: File) -> io::Result<Self> {
        let sector_count = file.metadata()?.len() / SECTOR_SIZE as u64;
        Ok(Self {
            file: Mutex::new(file),
            sector_count,
        })
    }
}

impl BlockDevice for BlockFile {
    fn read_sectors(&self, sector: u64, buf: &mut [u8]) -> Result<(), MediumError> {
        let offset = locate(sector, buf.len(), self.sector_count)?;
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        file.seek(SeekFrom::Start(offset))
            .and_then(|_| file.read_exact(buf))
            .map_err(|err| {
                log::error!("reading sector {sector}: {err}");
                MediumError::Faulted { sector }
            })
    }

    fn write_sectors(&self, sector: u64, buf: &[u8]) -> Result<(), MediumError> {
        let offset = locate(sector, buf.len(), self.sector_count)?;
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        file.seek(SeekFrom::Start(offset))
            .and_then(|_| file.write_all(buf))
            .map_err(|err| {
                log::error!("writing sector {sector}: {err}");
                MediumError::Faulted { sector }
            })
    }

    fn sector_count(&self) -> u64 {
        self.sector_count
    }
}

/// 以内存为介质
#[derive(Debug)]
pub struct MemDisk(Mutex<Vec<u8>>);

impl MemDisk {
    pub fn new(sector_count: u64) -> Self {
        Self(Mutex::new(vec![0; sector_count as usize * SECTOR_SIZE]))
    }

    /// 介质内容的副本
    pub fn snapshot(&self) -> Vec<u8> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl BlockDevice for MemDisk {
    fn read_sectors(&self, sector: u64, buf: &mut [u8]) -> Result<(), MediumError> {
        let offset = locate(sector, buf.len(), self.sector_count())? as usize;
        let data = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        buf.copy_from_slice(&data[offset..offset + buf.len()]);
        Ok(())
    }

    fn write_sectors(&self, sector: u64, buf: &[u8]) -> Result<(), MediumError> {
        let offset = locate(sector, buf.len(), self.sector_count())? as usize;
        let mut data = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        data[offset..offset + buf.len()].copy_from_slice(buf);
        Ok(())
    }

    fn sector_count(&self) -> u64 {
        (self.0.lock().unwrap_or_else(PoisonError::into_inner).len() / SECTOR_SIZE) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_disk_bounds() {
        let disk = MemDisk::new(4);
        let mut buf = [0u8; 2 * SECTOR_SIZE];
        assert_eq!(
            Err(MediumError::OutOfRange { sector: 3 }),
            disk.read_sectors(3, &mut buf)
        );
        buf.fill(9);
        disk.write_sectors(2, &buf).unwrap();
        assert!(disk.snapshot()[2 * SECTOR_SIZE..].iter().all(|&b| b == 9));
    }

    #[test]
    fn block_file_round_trip() {
        let path = std::env::temp_dir().join(format!("bcache-sim-{}.img", std::process::id()));
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .unwrap();
        file.set_len(8 * SECTOR_SIZE as u64).unwrap();
        let disk = BlockFile::new(file).unwrap();
        assert_eq!(8, disk.sector_count());

        let data = [0x3cu8; SECTOR_SIZE];
        disk.write_sectors(5, &data).unwrap();
        let mut buf = [0u8; SECTOR_SIZE];
        disk.read_sectors(5, &mut buf).unwrap();
        assert_eq!(data, buf);
        assert!(disk.write_sectors(8, &data).is_err());
        std::fs::remove_file(path).unwrap();
    }
}
