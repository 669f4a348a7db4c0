use derive_more::{From, Into};

/// 任务标识，由调度器分配
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, From, Into)]
#[repr(transparent)]
pub struct TaskId(pub usize);

/// 缓冲层对调度器与中断控制的全部依赖
///
/// 处理器只有一个，内核不可抢占，并发只来自中断。
pub trait Processor: Send + Sync {
    /// 当前任务，在中断上下文中调用会 panic
    fn current_task(&self) -> TaskId;

    /// 挂起当前任务并切换到其它任务，直到被 [`wakeup_task`] 重新置为就绪并再次调度。
    ///
    /// 调用方可以处于屏蔽中断的状态，挂起期间中断照常响应，
    /// 返回时恢复调用方的屏蔽状态。
    ///
    /// [`wakeup_task`]: Processor::wakeup_task
    fn block_current(&self);

    /// 把阻塞的任务置为就绪，对未阻塞的任务无效
    fn wakeup_task(&self, task: TaskId);

    /// 屏蔽中断，可嵌套
    fn push_off(&self);

    /// 与 [`push_off`] 配对，最外层退出时恢复屏蔽之前的中断使能
    ///
    /// [`push_off`]: Processor::push_off
    fn pop_off(&self);
}

/// 只有一个任务、没有中断源的处理器
#[cfg(test)]
pub(crate) struct UniProcessor {
    nested_level: core::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl UniProcessor {
    pub fn new() -> Self {
        Self {
            nested_level: core::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn nested_level(&self) -> usize {
        self.nested_level.load(core::sync::atomic::Ordering::Relaxed)
    }
}

#[cfg(test)]
impl Processor for UniProcessor {
    fn current_task(&self) -> TaskId {
        TaskId(1)
    }

    fn block_current(&self) {
        panic!("the only task would sleep forever");
    }

    fn wakeup_task(&self, _task: TaskId) {}

    fn push_off(&self) {
        self.nested_level
            .fetch_add(1, core::sync::atomic::Ordering::Relaxed);
    }

    fn pop_off(&self) {
        let prev = self
            .nested_level
            .fetch_sub(1, core::sync::atomic::Ordering::Relaxed);
        assert!(prev > 0, "pop_off without push_off");
    }
}
