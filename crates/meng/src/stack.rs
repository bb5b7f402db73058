//! The value stack.
//!
//! Stack items are either owned — the stack pops and destroys them — or
//! repush items that borrow a value owned by another slot (a caller's local,
//! parameter, or a member of some owned value). A repush never outlives the
//! slot it borrows from: calls push repush items above the owning frame's
//! region and every unwind truncates from the top.

use smallvec::SmallVec;
use strum::Display;

use crate::{
    class::ParmDir,
    except::{RunError, RunResult},
    value::{Payload, Value},
};

/// Addresses a value reachable from the stack: a slot holding an owned
/// value, optionally followed by a member path into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Absolute stack index of an owned item.
    pub slot: usize,
    /// Member indices to walk from that value, outermost first.
    pub path: SmallVec<[u16; 2]>,
}

impl Target {
    #[must_use]
    pub fn slot(slot: usize) -> Self {
        Self {
            slot,
            path: SmallVec::new(),
        }
    }

    /// Extends the target one member deeper.
    #[must_use]
    pub fn member(&self, index: u16) -> Self {
        let mut path = self.path.clone();
        path.push(index);
        Self { slot: self.slot, path }
    }
}

/// What a stack item is, for diagnostics and binding checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum StackKind {
    Local,
    Parm(ParmDir),
    Member,
    Return,
    Temp,
}

/// The storage of a stack item.
#[derive(Debug)]
pub enum Cell {
    /// The stack owns the value and destroys it on pop.
    Owned(Value),
    /// Repush: borrows a value owned elsewhere on the stack.
    Repush(Target),
}

/// One stack item.
#[derive(Debug)]
pub struct StackItem {
    pub kind: StackKind,
    pub cell: Cell,
}

/// The engine's value stack.
#[derive(Debug, Default)]
pub struct ValueStack {
    items: Vec<StackItem>,
}

impl ValueStack {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub fn depth(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn push_owned(&mut self, kind: StackKind, value: Value) -> usize {
        self.items.push(StackItem {
            kind,
            cell: Cell::Owned(value),
        });
        self.items.len() - 1
    }

    pub fn push_repush(&mut self, kind: StackKind, target: Target) -> usize {
        self.items.push(StackItem {
            kind,
            cell: Cell::Repush(target),
        });
        self.items.len() - 1
    }

    /// Pops the top item. The caller decides whether an owned value gets
    /// recycled into a pool or dropped.
    pub fn pop(&mut self) -> RunResult<StackItem> {
        self.items
            .pop()
            .ok_or_else(|| RunError::internal("value stack underflow"))
    }

    /// Drops items down to the given depth. Owned values are destroyed.
    pub fn truncate(&mut self, depth: usize) {
        self.items.truncate(depth);
    }

    #[must_use]
    pub fn item(&self, index: usize) -> Option<&StackItem> {
        self.items.get(index)
    }

    /// The kind of a stack item, for binding checks.
    pub fn kind_at(&self, index: usize) -> RunResult<StackKind> {
        self.items
            .get(index)
            .map(|item| item.kind)
            .ok_or_else(|| RunError::internal(format!("bad stack index {index}")))
    }

    /// Normalizes a stack index to the target of the value it names,
    /// following repush indirections.
    pub fn resolve(&self, index: usize) -> RunResult<Target> {
        let mut current = Target::slot(index);
        loop {
            let item = self
                .items
                .get(current.slot)
                .ok_or_else(|| RunError::internal(format!("bad stack index {}", current.slot)))?;
            match &item.cell {
                Cell::Owned(_) => return Ok(current),
                Cell::Repush(inner) => {
                    // The repush's own member path applies first, then the
                    // path accumulated so far.
                    let mut path = inner.path.clone();
                    path.extend(current.path.iter().copied());
                    current = Target {
                        slot: inner.slot,
                        path,
                    };
                }
            }
        }
    }

    /// Reads the value a normalized target names.
    pub fn value(&self, target: &Target) -> RunResult<&Value> {
        let item = self
            .items
            .get(target.slot)
            .ok_or_else(|| RunError::internal(format!("bad stack index {}", target.slot)))?;
        let Cell::Owned(value) = &item.cell else {
            return Err(RunError::internal("target slot is not an owned value"));
        };
        let mut value = value;
        for &member in &target.path {
            let Payload::Members(members) = &value.payload else {
                return Err(RunError::internal("member path into a class with no members"));
            };
            value = members
                .get(usize::from(member))
                .ok_or_else(|| RunError::internal(format!("bad member id {member}")))?;
        }
        Ok(value)
    }

    /// Mutable access to the value a normalized target names.
    pub fn value_mut(&mut self, target: &Target) -> RunResult<&mut Value> {
        let item = self
            .items
            .get_mut(target.slot)
            .ok_or_else(|| RunError::internal(format!("bad stack index {}", target.slot)))?;
        let Cell::Owned(value) = &mut item.cell else {
            return Err(RunError::internal("target slot is not an owned value"));
        };
        let mut value = value;
        for &member in &target.path {
            let Payload::Members(members) = &mut value.payload else {
                return Err(RunError::internal("member path into a class with no members"));
            };
            value = members
                .get_mut(usize::from(member))
                .ok_or_else(|| RunError::internal(format!("bad member id {member}")))?;
        }
        Ok(value)
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::ClassId;

    fn val(n: u32) -> Value {
        Value::new(ClassId::from_index(4), Payload::Card4(n))
    }

    #[test]
    fn repush_chains_resolve_to_owner() {
        let mut stack = ValueStack::new();
        let owner = stack.push_owned(StackKind::Local, val(42));
        let first = stack.push_repush(StackKind::Parm(ParmDir::Out), Target::slot(owner));
        stack.push_repush(StackKind::Parm(ParmDir::Out), Target::slot(first));
        let resolved = stack.resolve(2).unwrap();
        assert_eq!(resolved, Target::slot(owner));
        assert_eq!(stack.value(&resolved).unwrap().as_card4().unwrap(), 42);
    }

    #[test]
    fn member_paths_reach_nested_values() {
        let mut stack = ValueStack::new();
        let inner = Value::new(ClassId::from_index(9), Payload::Members(vec![val(7), val(8)]));
        let outer = Value::new(ClassId::from_index(10), Payload::Members(vec![inner]));
        let base = stack.push_owned(StackKind::Local, outer);
        let target = Target::slot(base).member(0).member(1);
        assert_eq!(stack.value(&target).unwrap().as_card4().unwrap(), 8);
        stack.value_mut(&target).unwrap().payload = Payload::Card4(9);
        assert_eq!(stack.value(&target).unwrap().as_card4().unwrap(), 9);
    }

    #[test]
    fn repush_member_path_prepends() {
        let mut stack = ValueStack::new();
        let inner = Value::new(ClassId::from_index(9), Payload::Members(vec![val(7)]));
        let base = stack.push_owned(StackKind::Local, Value::new(ClassId::from_index(10), Payload::Members(vec![inner])));
        // A repush naming member 0, then a member access 0 through it.
        let repush = stack.push_repush(StackKind::Member, Target::slot(base).member(0));
        let resolved = stack.resolve(repush).unwrap();
        let through = Target {
            slot: resolved.slot,
            path: resolved.path.iter().copied().chain([0]).collect(),
        };
        assert_eq!(stack.value(&through).unwrap().as_card4().unwrap(), 7);
    }

    #[test]
    fn underflow_is_an_internal_fault() {
        let mut stack = ValueStack::new();
        assert!(matches!(stack.pop(), Err(RunError::Internal(_))));
    }
}
