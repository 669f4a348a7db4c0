//! 中断驱动的磁盘
//!
//! 控制器线程逐条执行命令，每完成一个扇区递交一次中断，
//! 中断处理程序搬运数据并推进当前请求。
//! 传输出错时先重新校准，出错次数过半后先复位控制器，达到上限则放弃该请求。

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::thread;

use bcache::{BlockDriver, BufferCache, Command, PendingRequest};
use block_dev::{BlockDevice, MediumError, SECTOR_SIZE};

use crate::HostCpu;

pub const SIMDISK_MAJOR: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskCommand {
    Read { sector: u64 },
    Write { sector: u64 },
    Recalibrate,
    Reset,
}

impl DiskCommand {
    fn transfer(req: &PendingRequest) -> Self {
        match req.cmd {
            Command::Read => Self::Read { sector: req.sector },
            Command::Write => Self::Write { sector: req.sector },
        }
    }

    pub fn is_transfer(self) -> bool {
        matches!(self, Self::Read { .. } | Self::Write { .. })
    }
}

pub struct SimDisk {
    cpu: Arc<HostCpu>,
    medium: Arc<dyn BlockDevice>,
    cache: Weak<BufferCache>,
    max_errors: u32,
    controller: Mutex<Controller>,
    resumed: Condvar,
    commands: Mutex<Sender<DiskCommand>>,
}

#[derive(Default)]
struct Controller {
    recalibrate: bool,
    reset: bool,
    /// 待注入的传输错误
    faults: usize,
    /// 每隔多少次传输注入一次错误，0 表示不注入
    fault_every: usize,
    transfers: usize,
    paused: bool,
    media_changed: bool,
    issued: Vec<DiskCommand>,
}

impl SimDisk {
    pub fn new(
        cpu: Arc<HostCpu>,
        medium: Arc<dyn BlockDevice>,
        cache: Weak<BufferCache>,
        max_errors: u32,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::channel();
        let disk = Arc::new(Self {
            cpu,
            medium,
            cache,
            max_errors,
            controller: Mutex::new(Controller::default()),
            resumed: Condvar::new(),
            commands: Mutex::new(tx),
        });
        let weak = Arc::downgrade(&disk);
        thread::Builder::new()
            .name("simdisk".into())
            .spawn(move || run_controller(weak, rx))
            .expect("failed to spawn the disk controller");
        disk
    }

    /// 让接下来的 `n` 次传输失败
    pub fn inject_faults(&self, n: usize) {
        self.controller().faults += n;
    }

    /// 每 `every` 次传输失败一次，0 表示关闭
    pub fn set_fault_every(&self, every: usize) {
        self.controller().fault_every = every;
    }

    /// 暂停控制器，已发出的命令在恢复之前不会完成
    pub fn pause(&self) {
        self.controller().paused = true;
    }

    pub fn resume(&self) {
        self.controller().paused = false;
        self.resumed.notify_all();
    }

    /// 模拟更换介质
    pub fn change_media(&self) {
        self.controller().media_changed = true;
    }

    /// 已发出的全部命令
    pub fn commands(&self) -> Vec<DiskCommand> {
        self.controller().issued.clone()
    }

    fn controller(&self) -> MutexGuard<'_, Controller> {
        self.controller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn issue(&self, cmd: DiskCommand) {
        log::trace!("disk command {cmd:?}");
        self.controller().issued.push(cmd);
        let _ = self
            .commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .send(cmd);
    }

    /// 控制器执行命令，返回是否成功
    fn execute(&self, cmd: DiskCommand) -> bool {
        let mut ctrl = self.controller();
        while ctrl.paused {
            ctrl = self
                .resumed
                .wait(ctrl)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if !cmd.is_transfer() {
            return true;
        }
        ctrl.transfers += 1;
        if ctrl.faults > 0 {
            ctrl.faults -= 1;
            return false;
        }
        ctrl.fault_every == 0 || ctrl.transfers % ctrl.fault_every != 0
    }

    /// 在当前请求的缓冲区与介质之间搬运一个扇区
    fn transfer(&self, cache: &BufferCache, cmd: DiskCommand) -> Result<(), MediumError> {
        cache.request_data(SIMDISK_MAJOR, |data| {
            let data = &mut data[..SECTOR_SIZE];
            match cmd {
                DiskCommand::Read { sector } => self.medium.read_sectors(sector, data),
                DiskCommand::Write { sector } => self.medium.write_sectors(sector, data),
                DiskCommand::Recalibrate | DiskCommand::Reset => Ok(()),
            }
        })
    }

    fn handle_irq(&self, cmd: DiskCommand, ok: bool) {
        let Some(cache) = self.cache.upgrade() else {
            return;
        };
        if cmd.is_transfer() {
            match ok.then(|| self.transfer(&cache, cmd)) {
                Some(Ok(())) => {
                    if cache.advance_request(SIMDISK_MAJOR, 1) > 0 {
                        if let Some(req) = cache.current_request(SIMDISK_MAJOR) {
                            self.issue(DiskCommand::transfer(&req));
                        }
                        return;
                    }
                    cache.end_request(SIMDISK_MAJOR, true);
                }
                Some(Err(err)) => {
                    log::warn!("disk: {err}");
                    self.bad_rw_intr(&cache);
                }
                None => self.bad_rw_intr(&cache),
            }
        }
        self.do_request(&cache);
    }

    fn bad_rw_intr(&self, cache: &BufferCache) {
        let errors = cache.request_failed(SIMDISK_MAJOR, self.max_errors);
        log::warn!("disk transfer error, {errors} in a row");
        let mut ctrl = self.controller();
        if errors > self.max_errors / 2 {
            ctrl.reset = true;
        } else {
            ctrl.recalibrate = true;
        }
    }
}

impl BlockDriver for SimDisk {
    fn do_request(&self, cache: &BufferCache) {
        while let Some(req) = cache.current_request(SIMDISK_MAJOR) {
            if req.dev.minor() != 0
                || req.sector + req.nr_sectors as u64 > self.medium.sector_count()
            {
                cache.end_request(SIMDISK_MAJOR, false);
                continue;
            }
            let cmd = {
                let mut ctrl = self.controller();
                if ctrl.reset {
                    ctrl.reset = false;
                    ctrl.recalibrate = true;
                    DiskCommand::Reset
                } else if ctrl.recalibrate {
                    ctrl.recalibrate = false;
                    DiskCommand::Recalibrate
                } else {
                    DiskCommand::transfer(&req)
                }
            };
            self.issue(cmd);
            return;
        }
    }

    fn media_changed(&self, minor: u8) -> bool {
        minor == 0 && std::mem::take(&mut self.controller().media_changed)
    }
}

fn run_controller(disk: Weak<SimDisk>, commands: Receiver<DiskCommand>) {
    for cmd in commands {
        let Some(disk) = disk.upgrade() else {
            break;
        };
        let ok = disk.execute(cmd);
        disk.cpu.interrupt(|| disk.handle_irq(cmd, ok));
    }
}
