mod cli;

use std::fs::OpenOptions;
use std::io;
use std::sync::Arc;

use bcache::BufferCache;
use bcache::config::MAX_ERRORS;
use bcache_sim::{BlockFile, HostCpu, SIMDISK_MAJOR, SimDisk};
use block_dev::{BLOCK_SIZE, DeviceId};
use clap::Parser;

use self::cli::Cli;

const DEV: DeviceId = DeviceId::new(SIMDISK_MAJOR, 0);

/// 块 `block` 应有的内容
fn pattern(block: u32, data: &mut [u8]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte = (block as usize * 31 + i) as u8;
    }
}

/// 每个任务轮流写一个块，再读回另一个块检查内容
fn worker(cache: &BufferCache, task: usize, blocks: u32, rounds: u32) -> u32 {
    let mut mismatches = 0;
    let mut expected = [0u8; BLOCK_SIZE];
    for round in 0..rounds {
        let block = (task as u32 * 7 + round * 3) % blocks;
        let mut buf = cache.acquire(DEV, block);
        buf.map_mut(|data| pattern(block, data));
        buf.set_uptodate();
        drop(buf);

        let probe = (block + blocks / 2) % blocks;
        match cache.read_ahead(DEV, probe, &[(probe + 1) % blocks]) {
            Ok(buf) => {
                pattern(probe, &mut expected);
                // 还没写过的块内容为零
                let ok = buf.map(|data| data == expected || data.iter().all(|&b| b == 0));
                if !ok {
                    log::error!("task {task}: block {probe} holds unexpected data");
                    mismatches += 1;
                }
            }
            Err(err) => log::warn!("task {task}: {err}"),
        }
    }
    mismatches
}

fn main() -> io::Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    println!("image={:?}\nbuffers={}", cli.image, cli.buffers);
    let blocks = cli.blocks.min(cli.size).max(1);

    let fd = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&cli.image)?;
    fd.set_len(cli.size as u64 * BLOCK_SIZE as u64)?;
    let medium = Arc::new(BlockFile::new(fd)?);

    let cpu = HostCpu::new();
    let region = vec![0u8; bcache::region_size(cli.buffers)].leak();
    let cache = bcache::init(cpu.clone(), region);
    let disk = SimDisk::new(
        Arc::clone(&cpu),
        medium,
        Arc::downgrade(&cache),
        MAX_ERRORS,
    );
    disk.set_fault_every(cli.fault_every);
    {
        let cache = Arc::clone(&cache);
        cpu.run(move || {
            cache.register_driver(SIMDISK_MAJOR, disk);
        });
    }

    let handles = {
        let (spawner, cache) = (Arc::clone(&cpu), Arc::clone(&cache));
        let (tasks, rounds) = (cli.tasks, cli.rounds);
        cpu.run(move || {
            (0..tasks)
                .map(|task| {
                    let cache = Arc::clone(&cache);
                    spawner.spawn(move || worker(&cache, task, blocks, rounds))
                })
                .collect::<Vec<_>>()
        })
    };
    let mismatches: u32 = handles
        .into_iter()
        .map(|handle| handle.join().unwrap_or(1))
        .sum();

    // 写回全部脏块，作废缓存后从设备读回校验
    let verify = Arc::clone(&cache);
    let (verified, failed) = cpu.run(move || {
        verify.sync_all();
        verify.invalidate(DEV);
        let mut expected = [0u8; BLOCK_SIZE];
        let (mut verified, mut failed) = (0, 0);
        for block in 0..blocks {
            pattern(block, &mut expected);
            match verify.read(DEV, block) {
                Ok(buf) if buf.map(|data| data == expected) => verified += 1,
                Ok(_) => log::debug!("block {block} was never written"),
                Err(err) => {
                    log::error!("{err}");
                    failed += 1;
                }
            }
        }
        (verified, failed)
    });

    println!(
        "tasks={} rounds={} mismatches={mismatches} verified={verified}/{blocks} unreadable={failed}",
        cli.tasks, cli.rounds
    );
    Ok(())
}
