mod processor;
mod up;
mod wait;

pub use self::{
    processor::{Processor, TaskId},
    up::{IrqGuard, UpCell, UpRefMut},
    wait::WaitQueue,
};

#[cfg(test)]
pub(crate) use self::processor::UniProcessor;
