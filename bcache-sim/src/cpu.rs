//! 宿主机上的单处理器
//!
//! 每个任务是一个线程，同一时刻只有持有处理器的线程在运行。
//! 设备线程递交的中断在处理器空闲时执行，即当前任务阻塞、让出或结束之后；
//! 当前任务退出最外层的屏蔽区时，已递交的中断也会打断它。
//! 中断先于就绪任务得到调度，被打断的任务在中断处理完后接着运行。

use std::cell::RefCell;
use std::collections::{BTreeSet, VecDeque};
use std::panic;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use bcache::{Processor, TaskId};

thread_local! {
    static CONTEXT: RefCell<Option<Context>> = const { RefCell::new(None) };
}

/// 线程在处理器上的身份
struct Context {
    id: TaskId,
    in_interrupt: bool,
    guard: InterruptGuard,
}

/// 中断守卫的嵌套层数，每条控制流各有一份
#[derive(Default)]
struct InterruptGuard {
    nested_level: usize,
}

impl InterruptGuard {
    fn enter(&mut self) {
        self.nested_level += 1;
    }

    fn exit(&mut self) {
        if self.nested_level == 0 {
            panic!("pop_off without push_off");
        }
        self.nested_level -= 1;
    }
}

pub struct HostCpu {
    state: Mutex<CpuState>,
    turn: Condvar,
}

/// FIFO 调度，中断优先
#[derive(Default)]
struct CpuState {
    running: Option<TaskId>,
    ready_queue: VecDeque<TaskId>,
    interrupts: VecDeque<TaskId>,
    /// 被中断打断的任务
    interrupted: Option<TaskId>,
    blocked: BTreeSet<TaskId>,
    next_id: usize,
}

/// 控制流结束时交还处理器
struct Leave<'a> {
    cpu: &'a HostCpu,
    id: TaskId,
}

impl Drop for Leave<'_> {
    fn drop(&mut self) {
        let mut state = self.cpu.state();
        if state.running == Some(self.id) {
            state.running = None;
            self.cpu.dispatch(&mut state);
        }
    }
}

impl HostCpu {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(CpuState::default()),
            turn: Condvar::new(),
        })
    }

    /// 新建任务，排在就绪队列末尾
    pub fn spawn<F, T>(self: &Arc<Self>, f: F) -> JoinHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let id = {
            let mut state = self.state();
            let id = state.alloc_id();
            state.ready_queue.push_back(id);
            self.dispatch(&mut state);
            id
        };
        let cpu = Arc::clone(self);
        thread::Builder::new()
            .name(format!("task-{}", id.0))
            .spawn(move || {
                attach(id, false);
                drop(cpu.wait_turn(cpu.state(), id));
                let _leave = Leave { cpu: &cpu, id };
                f()
            })
            .expect("failed to spawn a task thread")
    }

    /// 新建任务并等待它结束，任务中的 panic 原样传出
    pub fn run<F, T>(self: &Arc<Self>, f: F) -> T
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.spawn(f)
            .join()
            .unwrap_or_else(|payload| panic::resume_unwind(payload))
    }

    /// 当前任务让出处理器，排到就绪队列末尾
    pub fn yield_now(&self) {
        let id = self.current_task();
        let mut state = self.state();
        state.ready_queue.push_back(id);
        state.running = None;
        self.dispatch(&mut state);
        drop(self.wait_turn(state, id));
    }

    /// 由设备线程递交中断，处理器空闲时在中断上下文中执行 `handler`
    pub fn interrupt<T>(&self, handler: impl FnOnce() -> T) -> T {
        let id = CONTEXT.with(|context| {
            let mut context = context.borrow_mut();
            match &*context {
                Some(ctx) if ctx.in_interrupt => ctx.id,
                Some(_) => panic!("interrupt raised by a task"),
                None => {
                    let id = self.state().alloc_id();
                    *context = Some(Context {
                        id,
                        in_interrupt: true,
                        guard: InterruptGuard::default(),
                    });
                    id
                }
            }
        });

        let mut state = self.state();
        state.interrupts.push_back(id);
        self.dispatch(&mut state);
        drop(self.wait_turn(state, id));

        let _leave = Leave { cpu: self, id };
        handler()
    }

    /// 是否有任务在等待被唤醒
    pub fn has_blocked(&self) -> bool {
        !self.state().blocked.is_empty()
    }

    /// 是否有已递交但尚未处理的中断
    pub fn has_pending_interrupt(&self) -> bool {
        !self.state().interrupts.is_empty()
    }

    fn state(&self) -> MutexGuard<'_, CpuState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 处理器空闲时选出下一条控制流
    fn dispatch(&self, state: &mut CpuState) {
        if state.running.is_none() {
            state.running = state
                .interrupts
                .pop_front()
                .or_else(|| state.interrupted.take())
                .or_else(|| state.ready_queue.pop_front());
            self.turn.notify_all();
        }
    }

    /// 开中断的边界：有已递交的中断就让出处理器，处理完再回来
    fn preempt(&self, id: TaskId) {
        let mut state = self.state();
        if state.interrupts.is_empty() {
            return;
        }
        debug_assert_eq!(Some(id), state.running);
        state.running = None;
        state.interrupted = Some(id);
        self.dispatch(&mut state);
        drop(self.wait_turn(state, id));
    }

    fn wait_turn<'a>(
        &self,
        mut state: MutexGuard<'a, CpuState>,
        id: TaskId,
    ) -> MutexGuard<'a, CpuState> {
        while state.running != Some(id) {
            state = self
                .turn
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state
    }
}

impl CpuState {
    fn alloc_id(&mut self) -> TaskId {
        self.next_id += 1;
        TaskId(self.next_id)
    }
}

fn attach(id: TaskId, in_interrupt: bool) {
    CONTEXT.with(|context| {
        *context.borrow_mut() = Some(Context {
            id,
            in_interrupt,
            guard: InterruptGuard::default(),
        })
    });
}

fn with_context<V>(f: impl FnOnce(&mut Context) -> V) -> V {
    CONTEXT.with(|context| {
        let mut context = context.borrow_mut();
        let Some(ctx) = context.as_mut() else {
            panic!("thread is not running on the host cpu");
        };
        f(ctx)
    })
}

impl Processor for HostCpu {
    fn current_task(&self) -> TaskId {
        with_context(|ctx| {
            if ctx.in_interrupt {
                panic!("no current task in interrupt context");
            }
            ctx.id
        })
    }

    fn block_current(&self) {
        let id = with_context(|ctx| {
            if ctx.in_interrupt {
                panic!("trying to sleep in interrupt context");
            }
            ctx.id
        });
        let mut state = self.state();
        state.blocked.insert(id);
        state.running = None;
        self.dispatch(&mut state);
        drop(self.wait_turn(state, id));
    }

    fn wakeup_task(&self, task: TaskId) {
        let mut state = self.state();
        if state.blocked.remove(&task) {
            state.ready_queue.push_back(task);
            self.dispatch(&mut state);
        }
    }

    fn push_off(&self) {
        with_context(|ctx| ctx.guard.enter());
    }

    fn pop_off(&self) {
        let enabled = with_context(|ctx| {
            ctx.guard.exit();
            (!ctx.in_interrupt && ctx.guard.nested_level == 0).then_some(ctx.id)
        });
        if let Some(id) = enabled {
            self.preempt(id);
        }
    }
}
