use core::cell::{RefCell, RefMut};
use core::ops::{Deref, DerefMut};

use super::Processor;

/// 单处理器上的独占单元
///
/// 借用期间屏蔽中断，中断处理程序因此不会与被打断的控制流同时借用。
#[derive(Debug)]
pub struct UpCell<T> {
    inner: RefCell<T>,
}

unsafe impl<T> Sync for UpCell<T> {}

// `Option`是为了在释放时可以提前销毁`RefMut`，不受启用中断的影响
pub struct UpRefMut<'a, T>(Option<RefMut<'a, T>>, &'a dyn Processor);

impl<T> UpCell<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: RefCell::new(value),
        }
    }

    /// Panic if the data has been borrowed.
    pub fn exclusive_access<'a>(&'a self, cpu: &'a dyn Processor) -> UpRefMut<'a, T> {
        cpu.push_off();
        UpRefMut(Some(self.inner.borrow_mut()), cpu)
    }

    pub fn exclusive_session<F, V>(&self, cpu: &dyn Processor, f: F) -> V
    where
        F: FnOnce(&mut T) -> V,
    {
        let mut inner = self.exclusive_access(cpu);
        f(&mut inner)
    }
}

impl<T> Drop for UpRefMut<'_, T> {
    fn drop(&mut self) {
        self.0 = None;
        self.1.pop_off();
    }
}

impl<T> Deref for UpRefMut<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        self.0.as_deref().unwrap()
    }
}

impl<T> DerefMut for UpRefMut<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.0.as_deref_mut().unwrap()
    }
}

/// 中断守卫，存活期间屏蔽中断
pub struct IrqGuard<'a>(&'a dyn Processor);

impl<'a> IrqGuard<'a> {
    pub fn new(cpu: &'a dyn Processor) -> Self {
        cpu.push_off();
        Self(cpu)
    }
}

impl Drop for IrqGuard<'_> {
    fn drop(&mut self) {
        self.0.pop_off();
    }
}
