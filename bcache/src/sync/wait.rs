use super::{IrqGuard, Processor, TaskId, UpCell};

/// 等待锚
///
/// 只记住最近一个入睡的任务。新来的等待者顶替旧的，
/// 自己被唤醒后再唤醒被顶替的那个，一次唤醒因此沿链传遍所有等待者。
/// 醒来不意味着等待的条件成立，调用方必须循环复查。
#[derive(Debug)]
pub struct WaitQueue {
    waiter: UpCell<Option<TaskId>>,
}

impl WaitQueue {
    pub const fn new() -> Self {
        Self {
            waiter: UpCell::new(None),
        }
    }

    /// 在锚上睡眠，直到被唤醒
    pub fn sleep_on(&self, cpu: &dyn Processor) {
        let _irq = IrqGuard::new(cpu);
        let current = cpu.current_task();
        let prev = self.waiter.exclusive_access(cpu).replace(current);
        cpu.block_current();
        if let Some(prev) = prev {
            cpu.wakeup_task(prev);
        }
    }

    /// 唤醒锚上记录的任务
    pub fn wake_up(&self, cpu: &dyn Processor) {
        let waiter = self.waiter.exclusive_access(cpu).take();
        if let Some(task) = waiter {
            cpu.wakeup_task(task);
        }
    }

    pub fn is_empty(&self, cpu: &dyn Processor) -> bool {
        self.waiter.exclusive_access(cpu).is_none()
    }
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}
