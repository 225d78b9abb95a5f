use parking_lot::RwLock;

use crate::precondition;

/// 无效地址，例如相机没有绑定 transform 时使用
pub const INVALID_ADDRESS: u32 = u32::MAX;

/// slot 的状态
///
/// 状态流转: Free -> Alive -> (Retired ->) Free
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Free,
    /// liveness bit 为 1，可以被访问
    Alive,
    /// liveness bit 已经清除，但对象仍然占据 slot，等待延迟销毁后释放
    Retired,
}

struct Slot<T> {
    value: Option<T>,
    alive: bool,
}
impl<T> Slot<T> {
    fn state(&self) -> SlotState {
        match (&self.value, self.alive) {
            (None, _) => SlotState::Free,
            (Some(_), true) => SlotState::Alive,
            (Some(_), false) => SlotState::Retired,
        }
    }
}

struct Inner<T> {
    slots: Vec<Slot<T>>,
    free_list: Vec<u32>,
    alive_count: usize,
}

/// 句柄表
///
/// 用稳定的 `u32` 地址索引对象，代替跨线程传递的指针。
/// 所有修改 liveness bit 的操作都持有写锁，因此同一时刻只有一个 writer。
///
/// 对于需要延迟销毁的对象，先 [`retire`](Self::retire)（对外不可见，但 slot 不会被复用），
/// 等 GPU 不再引用后再 [`release`](Self::release)。
pub struct HandleTable<T> {
    name: &'static str,
    inner: RwLock<Inner<T>>,
}

// new & init
impl<T> HandleTable<T> {
    pub fn new(name: &'static str) -> Self {
        Self::with_capacity(name, 0)
    }

    pub fn with_capacity(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            inner: RwLock::new(Inner {
                slots: Vec::with_capacity(capacity),
                free_list: Vec::new(),
                alive_count: 0,
            }),
        }
    }
}
// 写操作
impl<T> HandleTable<T> {
    /// 插入对象，返回稳定地址
    pub fn insert(&self, value: T) -> u32 {
        let mut inner = self.inner.write();
        inner.alive_count += 1;

        if let Some(addr) = inner.free_list.pop() {
            let slot = &mut inner.slots[addr as usize];
            slot.value = Some(value);
            slot.alive = true;
            return addr;
        }

        let addr = inner.slots.len() as u32;
        assert!(addr != INVALID_ADDRESS, "HandleTable<{}> exhausted", self.name);
        inner.slots.push(Slot {
            value: Some(value),
            alive: true,
        });
        addr
    }

    /// 立即移除对象，slot 进入 free list
    ///
    /// 地址未知或者已经移除属于前置条件违规
    pub fn remove(&self, addr: u32) -> Option<T> {
        let mut inner = self.inner.write();
        let state = Self::state_of(&inner, addr);
        if !precondition!(state == SlotState::Alive, "HandleTable<{}>: remove {addr} in state {state:?}", self.name)
        {
            return None;
        }

        inner.alive_count -= 1;
        inner.free_list.push(addr);
        let slot = &mut inner.slots[addr as usize];
        slot.alive = false;
        slot.value.take()
    }

    /// 清除 liveness bit，对象保留在 slot 中，地址不会被复用
    pub fn retire(&self, addr: u32) -> bool {
        let mut inner = self.inner.write();
        let state = Self::state_of(&inner, addr);
        if !precondition!(state == SlotState::Alive, "HandleTable<{}>: retire {addr} in state {state:?}", self.name)
        {
            return false;
        }

        inner.alive_count -= 1;
        inner.slots[addr as usize].alive = false;
        true
    }

    /// 取出已经 retire 的对象，slot 回到 free list
    pub fn release(&self, addr: u32) -> Option<T> {
        let mut inner = self.inner.write();
        let state = Self::state_of(&inner, addr);
        if !precondition!(state == SlotState::Retired, "HandleTable<{}>: release {addr} in state {state:?}", self.name)
        {
            return None;
        }

        inner.free_list.push(addr);
        inner.slots[addr as usize].value.take()
    }

    /// 独占访问某个对象
    pub fn with_mut<R>(&self, addr: u32, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut inner = self.inner.write();
        let slot = inner.slots.get_mut(addr as usize).filter(|slot| slot.alive)?;
        slot.value.as_mut().map(f)
    }

    /// 取出所有对象（包括 retired），用于 shutdown
    pub fn drain(&self) -> Vec<(u32, T)> {
        let mut inner = self.inner.write();
        inner.alive_count = 0;
        inner.free_list.clear();
        let drained = inner
            .slots
            .iter_mut()
            .enumerate()
            .filter_map(|(addr, slot)| slot.value.take().map(|value| (addr as u32, value)))
            .collect();
        inner.slots.clear();
        drained
    }

    fn state_of(inner: &Inner<T>, addr: u32) -> SlotState {
        inner.slots.get(addr as usize).map_or(SlotState::Free, Slot::state)
    }
}
// 读操作
impl<T> HandleTable<T> {
    /// 共享访问某个对象，地址无效时返回 None
    pub fn with<R>(&self, addr: u32, f: impl FnOnce(&T) -> R) -> Option<R> {
        let inner = self.inner.read();
        let slot = inner.slots.get(addr as usize).filter(|slot| slot.alive)?;
        slot.value.as_ref().map(f)
    }

    #[inline]
    pub fn is_alive(&self, addr: u32) -> bool {
        self.state(addr) == SlotState::Alive
    }

    #[inline]
    pub fn state(&self, addr: u32) -> SlotState {
        Self::state_of(&self.inner.read(), addr)
    }

    /// 存活对象的数量
    #[inline]
    pub fn len(&self) -> usize {
        self.inner.read().alive_count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 按地址顺序遍历所有存活对象
    pub fn for_each_alive(&self, mut f: impl FnMut(u32, &T)) {
        let inner = self.inner.read();
        for (addr, slot) in inner.slots.iter().enumerate() {
            if let (true, Some(value)) = (slot.alive, slot.value.as_ref()) {
                f(addr as u32, value);
            }
        }
    }

    /// 按地址顺序收集所有存活对象的地址
    pub fn alive_addresses(&self) -> Vec<u32> {
        let mut addrs = Vec::new();
        self.for_each_alive(|addr, _| addrs.push(addr));
        addrs
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }
}
impl<T: Clone> HandleTable<T> {
    #[inline]
    pub fn get_cloned(&self, addr: u32) -> Option<T> {
        self.with(addr, T::clone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_insert_and_access() {
        let table = HandleTable::new("test");
        let a = table.insert(10);
        let b = table.insert(20);

        assert_ne!(a, b);
        assert_eq!(table.get_cloned(a), Some(10));
        assert_eq!(table.with(b, |v| v * 2), Some(40));
        assert_eq!(table.len(), 2);
        assert_eq!(table.get_cloned(INVALID_ADDRESS), None);
    }

    #[test]
    fn test_removed_slot_is_reused() {
        let table = HandleTable::new("test");
        let a = table.insert("a");
        let _b = table.insert("b");

        assert_eq!(table.remove(a), Some("a"));
        assert!(!table.is_alive(a));

        let c = table.insert("c");
        assert_eq!(c, a);
        assert_eq!(table.get_cloned(c), Some("c"));
    }

    #[test]
    fn test_retired_slot_is_hidden_and_not_reused() {
        let table = HandleTable::new("test");
        let a = table.insert(1);

        assert!(table.retire(a));
        assert_eq!(table.state(a), SlotState::Retired);
        assert_eq!(table.get_cloned(a), None);
        assert_eq!(table.len(), 0);

        let b = table.insert(2);
        assert_ne!(a, b);

        assert_eq!(table.release(a), Some(1));
        assert_eq!(table.state(a), SlotState::Free);
        assert_eq!(table.insert(3), a);
    }

    #[test]
    #[should_panic]
    fn test_double_remove_is_precondition_violation() {
        let table = HandleTable::new("test");
        let a = table.insert(1);
        table.remove(a);
        table.remove(a);
    }

    #[test]
    #[should_panic]
    fn test_release_alive_slot_is_precondition_violation() {
        let table = HandleTable::new("test");
        let a = table.insert(1);
        table.release(a);
    }

    #[test]
    fn test_with_mut_and_iteration_order() {
        let table = HandleTable::new("test");
        let addrs: Vec<u32> = (0..4).map(|i| table.insert(i)).collect();
        table.with_mut(addrs[2], |v| *v = 100);
        table.retire(addrs[1]);

        let mut seen = Vec::new();
        table.for_each_alive(|addr, v| seen.push((addr, *v)));
        assert_eq!(seen, vec![(addrs[0], 0), (addrs[2], 100), (addrs[3], 3)]);
        assert_eq!(table.alive_addresses(), vec![addrs[0], addrs[2], addrs[3]]);
    }

    #[test]
    fn test_drain_includes_retired() {
        let table = HandleTable::new("test");
        let a = table.insert(1);
        table.insert(2);
        table.retire(a);

        let drained = table.drain();
        assert_eq!(drained.len(), 2);
        assert!(table.is_empty());
    }

    #[test]
    fn test_concurrent_writers() {
        let table = Arc::new(HandleTable::new("test"));
        let workers: Vec<_> = (0..4)
            .map(|t| {
                let table = table.clone();
                std::thread::spawn(move || {
                    for i in 0..250 {
                        let addr = table.insert(t * 1000 + i);
                        table.with_mut(addr, |v| *v += 1);
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(table.len(), 1000);
        let mut addrs = table.alive_addresses();
        addrs.dedup();
        assert_eq!(addrs.len(), 1000);
    }
}
