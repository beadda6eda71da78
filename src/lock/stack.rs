//! The intrusive, growable stack backing [`super::locker::Locker`].
//!
//! The first acquisition is stored inline (no allocation); once a second
//! entry is pushed the stack switches to a chain of `Block`s whose
//! capacities double `8 -> 16 -> 32 -> 64` and then stay at 64. This
//! mirrors the reference design's rationale verbatim ("keep this inlining
//! — benchmarks depend on it") while using a flat `Vec<Block>` in place of
//! the original's backward-linked block pointers, which needless fights
//! the borrow checker for no behavioral gain here.

use crate::common::IndexId;

use super::types::LockMode;

const FIRST_BLOCK_CAPACITY: usize = 8;
const MAX_BLOCK_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct StackEntry {
    pub index_id: IndexId,
    pub key: Box<[u8]>,
    pub mode: LockMode,
    /// `Some(prior_mode)` iff this push strengthened a mode already held
    /// (from an earlier, still-open scope) rather than a fresh
    /// acquisition. Such entries must be demoted rather than fully
    /// released on `unlockLast`/`scopeExit`.
    pub demote_to: Option<LockMode>,
}

struct Block {
    entries: Vec<StackEntry>,
    capacity: usize,
}

impl Block {
    fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
        }
    }

    fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }
}

fn next_capacity(current: usize) -> usize {
    match current {
        8 => 16,
        16 => 32,
        _ => MAX_BLOCK_CAPACITY,
    }
}

enum Tail {
    Empty,
    Inline(StackEntry),
    Chain(Vec<Block>),
}

pub struct LockStack {
    tail: Tail,
}

impl Default for LockStack {
    fn default() -> Self {
        Self { tail: Tail::Empty }
    }
}

impl LockStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        match &self.tail {
            Tail::Empty => 0,
            Tail::Inline(_) => 1,
            Tail::Chain(blocks) => blocks.iter().map(|b| b.entries.len()).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn top(&self) -> Option<&StackEntry> {
        match &self.tail {
            Tail::Empty => None,
            Tail::Inline(e) => Some(e),
            Tail::Chain(blocks) => blocks.iter().rev().find_map(|b| b.entries.last()),
        }
    }

    pub fn top_mut(&mut self) -> Option<&mut StackEntry> {
        match &mut self.tail {
            Tail::Empty => None,
            Tail::Inline(e) => Some(e),
            Tail::Chain(blocks) => blocks.iter_mut().rev().find_map(|b| b.entries.last_mut()),
        }
    }

    /// Finds the mode of the most recently pushed entry for `(index_id,
    /// key)`, searching from the top down. Used to compute `demote_to` for
    /// a cross-scope re-acquisition.
    pub fn find_mode(&self, index_id: IndexId, key: &[u8]) -> Option<LockMode> {
        self.iter_rev()
            .find(|e| e.index_id == index_id && &*e.key == key)
            .map(|e| e.mode)
    }

    fn iter_rev(&self) -> impl Iterator<Item = &StackEntry> {
        let inline: Box<dyn Iterator<Item = &StackEntry>> = match &self.tail {
            Tail::Empty => Box::new(std::iter::empty()),
            Tail::Inline(e) => Box::new(std::iter::once(e)),
            Tail::Chain(blocks) => {
                Box::new(blocks.iter().rev().flat_map(|b| b.entries.iter().rev()))
            }
        };
        inline
    }

    pub fn push(&mut self, entry: StackEntry) {
        self.tail = match std::mem::replace(&mut self.tail, Tail::Empty) {
            Tail::Empty => Tail::Inline(entry),
            Tail::Inline(prev) => {
                let mut block = Block::new(FIRST_BLOCK_CAPACITY);
                block.entries.push(prev);
                block.entries.push(entry);
                Tail::Chain(vec![block])
            }
            Tail::Chain(mut blocks) => {
                let needs_new_block = blocks.last().map(Block::is_full).unwrap_or(true);
                if needs_new_block {
                    let next_cap = blocks
                        .last()
                        .map(|b| next_capacity(b.capacity))
                        .unwrap_or(FIRST_BLOCK_CAPACITY);
                    blocks.push(Block::new(next_cap));
                }
                blocks.last_mut().unwrap().entries.push(entry);
                Tail::Chain(blocks)
            }
        };
    }

    /// Pops the single most recent entry, in LIFO order.
    pub fn pop(&mut self) -> Option<StackEntry> {
        match std::mem::replace(&mut self.tail, Tail::Empty) {
            Tail::Empty => None,
            Tail::Inline(e) => Some(e),
            Tail::Chain(mut blocks) => {
                let popped = blocks.last_mut().and_then(|b| b.entries.pop());
                while blocks.last().map(|b| b.entries.is_empty()).unwrap_or(false) {
                    blocks.pop();
                }
                self.tail = if blocks.is_empty() {
                    Tail::Empty
                } else {
                    Tail::Chain(blocks)
                };
                popped
            }
        }
    }

    /// Pops entries down to `target_len`, returning them in LIFO (most
    /// recently pushed first) order — the order `scopeExit` needs to
    /// unwind them in.
    pub fn truncate_to(&mut self, target_len: usize) -> Vec<StackEntry> {
        let mut popped = Vec::new();
        while self.len() > target_len {
            if let Some(e) = self.pop() {
                popped.push(e);
            } else {
                break;
            }
        }
        popped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(n: u8) -> StackEntry {
        StackEntry {
            index_id: 1,
            key: vec![n].into_boxed_slice(),
            mode: LockMode::Shared,
            demote_to: None,
        }
    }

    #[test]
    fn first_push_is_inline() {
        let mut stack = LockStack::new();
        stack.push(entry(1));
        assert_eq!(stack.len(), 1);
        assert!(matches!(stack.tail, Tail::Inline(_)));
    }

    #[test]
    fn second_push_promotes_to_chain() {
        let mut stack = LockStack::new();
        stack.push(entry(1));
        stack.push(entry(2));
        assert_eq!(stack.len(), 2);
        assert!(matches!(stack.tail, Tail::Chain(_)));
    }

    #[test]
    fn block_grows_past_first_capacity() {
        let mut stack = LockStack::new();
        for n in 0..20u8 {
            stack.push(entry(n));
        }
        assert_eq!(stack.len(), 20);
    }

    #[test]
    fn truncate_to_unwinds_lifo() {
        let mut stack = LockStack::new();
        for n in 0..5u8 {
            stack.push(entry(n));
        }
        let popped = stack.truncate_to(2);
        assert_eq!(stack.len(), 2);
        assert_eq!(popped.iter().map(|e| e.key[0]).collect::<Vec<_>>(), vec![4, 3, 2]);
    }

    #[test]
    fn find_mode_searches_from_top() {
        let mut stack = LockStack::new();
        stack.push(entry(1));
        let mut e2 = entry(1);
        e2.mode = LockMode::Exclusive;
        stack.push(e2);
        assert_eq!(stack.find_mode(1, &[1]), Some(LockMode::Exclusive));
    }
}
