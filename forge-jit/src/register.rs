//! Abstract SIMD register file and spill policy (spec §4.4).
//!
//! Tracks which of the sixteen abstract registers (XMM0-15 under SSE2,
//! YMM0-15 under AVX2 — the instruction-set layer maps the index to a
//! concrete register name) currently holds which node's value, with pin
//! (lock/unlock) and dirty-bit bookkeeping. This module knows nothing about
//! code emission; it only decides *which* register to use and *whether* a
//! spill is required before reuse. The forward/reverse emitters ask the
//! instruction set to actually emit the spill store.

use std::collections::HashMap;

use forge_ir::NodeId;

/// Index into the abstract register file (0..=15).
pub type RegIdx = u8;

/// Number of registers in the abstract file.
pub const NUM_REGISTERS: usize = 16;

#[derive(Debug, Clone, Copy)]
struct Slot {
    node: NodeId,
    dirty: bool,
    locked: bool,
    last_used: u64,
}

/// The outcome of [`RegisterAllocator::allocate_avoiding`]: the chosen
/// register, plus the previous occupant that must be spilled (by the
/// caller, via the instruction set) before the register is reused.
#[derive(Debug, Clone, Copy)]
pub struct Allocation {
    /// The register to use.
    pub reg: RegIdx,
    /// If `Some`, this node's dirty value must be stored to its buffer slot
    /// before `reg` is repurposed.
    pub spill: Option<NodeId>,
}

/// Tracks register occupancy for one code-emission pass (forward or
/// reverse); a fresh allocator is used per pass since live ranges do not
/// cross the forward/reverse boundary.
pub struct RegisterAllocator {
    slots: [Option<Slot>; NUM_REGISTERS],
    location: HashMap<NodeId, RegIdx>,
    clock: u64,
}

impl Default for RegisterAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterAllocator {
    /// Creates an allocator with every register free.
    pub fn new() -> Self {
        Self {
            slots: [None; NUM_REGISTERS],
            location: HashMap::new(),
            clock: 0,
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Is `node` currently resident in a register?
    pub fn find_node(&self, node: NodeId) -> Option<RegIdx> {
        self.location.get(&node).copied()
    }

    /// Pins `reg` so [`allocate_avoiding`](Self::allocate_avoiding) will not
    /// select it, for the duration of a multi-instruction emission.
    pub fn lock(&mut self, reg: RegIdx) {
        if let Some(slot) = &mut self.slots[reg as usize] {
            slot.locked = true;
        }
    }

    /// Releases a pin taken by [`lock`](Self::lock).
    pub fn unlock(&mut self, reg: RegIdx) {
        if let Some(slot) = &mut self.slots[reg as usize] {
            slot.locked = false;
        }
    }

    /// Records that `reg` now holds `node`'s value. `dirty = true` means the
    /// register has not yet been written back to `node`'s buffer slot.
    pub fn set_register(&mut self, reg: RegIdx, node: NodeId, dirty: bool) {
        if let Some(old) = self.find_node(node) {
            if old != reg {
                self.location.remove(&node);
            }
        }
        let locked = self.slots[reg as usize].map(|s| s.locked).unwrap_or(false);
        let last_used = self.tick();
        self.slots[reg as usize] = Some(Slot {
            node,
            dirty,
            locked,
            last_used,
        });
        self.location.insert(node, reg);
    }

    /// Every register still holding a value not yet written back to its
    /// buffer slot, used to flush the pipeline at the end of a pass.
    pub fn dirty_occupants(&self) -> Vec<(RegIdx, NodeId)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.map(|s| (i as RegIdx, s)))
            .filter(|(_, s)| s.dirty)
            .map(|(i, s)| (i, s.node))
            .collect()
    }

    /// Marks `node`'s register (if resident) as flushed to its buffer slot.
    pub fn mark_clean(&mut self, node: NodeId) {
        if let Some(reg) = self.find_node(node) {
            if let Some(slot) = &mut self.slots[reg as usize] {
                slot.dirty = false;
            }
        }
    }

    /// Chooses a register not in `avoid` and not locked: a free register if
    /// one exists, otherwise the coldest unpinned register, preferring a
    /// clean occupant over a dirty one. If the chosen register currently
    /// holds a dirty value, the caller must spill it (the instruction set
    /// emits the store) before reuse — reported via [`Allocation::spill`].
    pub fn allocate_avoiding(&mut self, avoid: &[RegIdx]) -> Allocation {
        let is_avoided = |r: RegIdx| avoid.contains(&r);

        if let Some(r) = (0..NUM_REGISTERS as RegIdx)
            .find(|&r| !is_avoided(r) && self.slots[r as usize].is_none())
        {
            return Allocation { reg: r, spill: None };
        }

        let candidate = (0..NUM_REGISTERS as RegIdx)
            .filter(|&r| !is_avoided(r))
            .filter_map(|r| self.slots[r as usize].map(|s| (r, s)))
            .filter(|(_, s)| !s.locked)
            .min_by_key(|(_, s)| (s.dirty, s.last_used))
            .map(|(r, _)| r)
            .expect("no eligible register: caller avoided or locked every register");

        let occupant = self.slots[candidate as usize].unwrap();
        self.location.remove(&occupant.node);
        self.slots[candidate as usize] = None;

        Allocation {
            reg: candidate,
            spill: occupant.dirty.then_some(occupant.node),
        }
    }
}

/// RAII guard released by [`lock_registers`] which unlocks its registers on
/// drop, matching the lock-then-emit-then-unlock discipline the instruction
/// set uses around every multi-instruction sequence (spec §9 design notes).
pub struct RegisterLock<'a> {
    allocator: &'a mut RegisterAllocator,
    regs: Vec<RegIdx>,
}

impl<'a> RegisterLock<'a> {
    /// Locks `regs` against eviction until this guard is dropped.
    pub fn new(allocator: &'a mut RegisterAllocator, regs: &[RegIdx]) -> Self {
        for &r in regs {
            allocator.lock(r);
        }
        Self {
            allocator,
            regs: regs.to_vec(),
        }
    }
}

impl Drop for RegisterLock<'_> {
    fn drop(&mut self) {
        for &r in &self.regs {
            self.allocator.unlock(r);
        }
    }
}

/// Locks `regs` for the duration of `f`, then unlocks them, regardless of
/// which order `f` itself allocates further registers in. The
/// closure-over-a-lock form the emitters actually use, since a guard value
/// would otherwise have to outlive calls that need `alloc` mutably for
/// other reasons at the same time.
pub fn with_locked<F, R>(allocator: &mut RegisterAllocator, regs: &[RegIdx], f: F) -> R
where
    F: FnOnce(&mut RegisterAllocator) -> R,
{
    for &r in regs {
        allocator.lock(r);
    }
    let result = f(allocator);
    for &r in regs {
        allocator.unlock(r);
    }
    result
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_allocator_prefers_free_registers() {
        let mut alloc = RegisterAllocator::new();
        let a = alloc.allocate_avoiding(&[]);
        assert!(a.spill.is_none());
        alloc.set_register(a.reg, 0, true);
        assert_eq!(alloc.find_node(0), Some(a.reg));
    }

    #[test]
    fn locked_registers_are_never_chosen() {
        let mut alloc = RegisterAllocator::new();
        let mut taken = Vec::new();
        for n in 0..NUM_REGISTERS as NodeId {
            let a = alloc.allocate_avoiding(&taken);
            alloc.set_register(a.reg, n, true);
            alloc.lock(a.reg);
            taken.push(a.reg);
        }
        // every register is now locked and dirty; allocating while avoiding
        // none should still find nothing and panic, so avoid that and
        // instead verify lock/unlock round-trips.
        for &r in &taken {
            alloc.unlock(r);
        }
        let a = alloc.allocate_avoiding(&[]);
        assert!(a.spill.is_some());
    }

    #[test]
    fn clean_registers_are_evicted_before_dirty_ones() {
        let mut alloc = RegisterAllocator::new();
        let a0 = alloc.allocate_avoiding(&[]);
        alloc.set_register(a0.reg, 0, false);
        for n in 1..NUM_REGISTERS as NodeId {
            let a = alloc.allocate_avoiding(&[]);
            alloc.set_register(a.reg, n, true);
        }
        let next = alloc.allocate_avoiding(&[]);
        assert_eq!(next.reg, a0.reg);
        assert!(next.spill.is_none());
    }

    #[test]
    fn register_lock_guard_unlocks_on_drop() {
        let mut alloc = RegisterAllocator::new();
        let a = alloc.allocate_avoiding(&[]);
        alloc.set_register(a.reg, 0, true);
        {
            let _guard = RegisterLock::new(&mut alloc, &[a.reg]);
            assert!(alloc.slots[a.reg as usize].unwrap().locked);
        }
        assert!(!alloc.slots[a.reg as usize].unwrap().locked);
    }
}
