mod common;

use std::time::{Duration, Instant};

use bcache::{BufferFlag, Direction};
use bcache_sim::SIMDISK_MAJOR;
use common::{DISK, Machine, RAM, assert_quiescent, fill};

#[test]
fn sync_all_flushes_every_device() {
    let (machine, _disk, medium) = Machine::with_disk(8, 7, 16);
    machine.run(|_, cache| {
        for (dev, block) in [(DISK, 3), (DISK, 1), (RAM, 3)] {
            let mut buf = cache.acquire(dev, block);
            buf.map_mut(|data| data.copy_from_slice(&fill(block, dev.major())));
            buf.set_uptodate();
        }
        cache.sync_all();
        // 进入请求队列即不再是脏块
        assert!(cache
            .buffers()
            .iter()
            .all(|info| !info.flags.contains(BufferFlag::Dirty)));

        // 作废后从设备读回
        cache.invalidate(RAM);
        let buf = cache.read(RAM, 3).unwrap();
        assert!(buf.map(|data| data == fill(3, RAM.major()).as_slice()));
    });
    assert_quiescent(&machine);

    let image = medium.snapshot();
    assert_eq!(fill(1, DISK.major()), image[1024..2048]);
    assert_eq!(fill(3, DISK.major()), image[3 * 1024..4 * 1024]);
}

#[test]
fn media_change_invalidates() {
    let (machine, disk, _) = Machine::with_disk(4, 7, 16);
    let (trigger, probe) = (disk.clone(), disk.clone());
    machine.run(move |_, cache| {
        drop(cache.read(DISK, 2).unwrap());
        drop(cache.read(RAM, 2).unwrap());
        assert!(!cache.check_disk_change(DISK));

        trigger.change_media();
        assert!(cache.check_disk_change(DISK));
        assert!(!cache.check_disk_change(DISK));

        // 身份保留，数据失效；另一设备不受影响
        let stale = cache.lookup(DISK, 2).unwrap();
        assert!(!stale.is_uptodate());
        drop(stale);
        assert!(cache.lookup(RAM, 2).unwrap().is_uptodate());
        assert!(!cache.check_disk_change(RAM));
    });
    let reads = probe.commands().len();
    machine.run(|_, cache| drop(cache.read(DISK, 2).unwrap()));
    assert_eq!(reads + 2, disk.commands().len());
    assert!(machine
        .run(|_, cache| cache.pending_requests(SIMDISK_MAJOR))
        .is_empty());
    assert_quiescent(&machine);
}

#[test]
fn completion_lands_while_task_runs() {
    let (machine, _disk, _) = Machine::with_disk(4, 7, 16);
    machine.run(|cpu, cache| {
        let buf = cache.acquire(DISK, 3);
        cache.submit(Direction::Read, &buf).unwrap();
        // 不睡眠也不让出，传输完成的中断在两次查询之间到达
        let deadline = Instant::now() + Duration::from_secs(5);
        while buf.is_locked() {
            assert!(Instant::now() < deadline, "completion never delivered");
        }
        assert!(buf.is_uptodate());
        assert!(!cpu.has_blocked());
    });
    assert_quiescent(&machine);
}

#[test]
fn global_instance() {
    let cpu = bcache_sim::HostCpu::new();
    let region = vec![0u8; bcache::region_size(2)].leak();
    let cache = bcache::init(cpu.clone(), region);
    assert!(std::sync::Arc::ptr_eq(&cache, bcache::bcache()));
    assert_eq!(2, cache.nr_buffers());
}
