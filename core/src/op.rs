use crate::opcode::Opcode;
use crate::temp::TempIdx;
use crate::types::Type;

/// Maximum number of argument slots per IR operation. Calls use up to
/// `callo + calli + 2`, which with split 64-bit values stays within this.
pub const MAX_OP_ARGS: usize = 16;

/// One argument slot of an op.
///
/// A machine word whose meaning depends on the slot: a temp index for
/// output/input slots, and a raw value (label id, immediate, condition,
/// function address, flag bitmap) for constant slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Arg(pub u64);

impl Arg {
    /// Call-argument padding sentinel; liveness treats it as neither live
    /// nor dead.
    pub const DUMMY: Arg = Arg(u64::MAX);

    pub const ZERO: Arg = Arg(0);

    pub const fn temp(t: TempIdx) -> Arg {
        Arg(t.0 as u64)
    }

    pub const fn value(v: u64) -> Arg {
        Arg(v)
    }

    pub const fn label(id: u32) -> Arg {
        Arg(id as u64)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    pub const fn as_temp(self) -> TempIdx {
        TempIdx(self.0 as u32)
    }

    pub const fn as_label(self) -> u32 {
        self.0 as u32
    }

    pub const fn is_dummy(self) -> bool {
        self.0 == u64::MAX
    }
}

impl From<TempIdx> for Arg {
    fn from(t: TempIdx) -> Arg {
        Arg::temp(t)
    }
}

/// Liveness annotations for one op: per argument slot, whether the value
/// dies at this op, and for outputs whether it must be synced to memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LifeData(pub u32);

impl LifeData {
    pub fn is_dead(&self, n: usize) -> bool {
        self.0 & (1 << (n * 2)) != 0
    }

    pub fn is_sync(&self, n: usize) -> bool {
        self.0 & (1 << (n * 2 + 1)) != 0
    }

    pub fn set_dead(&mut self, n: usize) {
        self.0 |= 1 << (n * 2);
    }

    pub fn set_sync(&mut self, n: usize) {
        self.0 |= 1 << (n * 2 + 1);
    }
}

/// One three-address micro-operation.
///
/// Ops live in an array-backed doubly linked list (`OpList`); `prev` and
/// `next` are slot indices, with slot 0 acting as the sentinel. Argument
/// layout is outputs, then inputs, then constants; calls carry their own
/// counts (`callo`, `calli`) and the layout
/// `[rets..., inputs..., func, flags]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Op {
    pub opc: Opcode,
    /// Operand width for type-polymorphic opcodes.
    pub ty: Type,
    pub prev: u32,
    pub next: u32,
    pub life: LifeData,
    /// Call only: number of return-value slots.
    pub callo: u8,
    /// Call only: number of passed arguments (dummies included).
    pub calli: u8,
    pub nargs: u8,
    pub args: [Arg; MAX_OP_ARGS],
}

impl Op {
    pub fn new(opc: Opcode, ty: Type) -> Self {
        Self {
            opc,
            ty,
            prev: 0,
            next: 0,
            life: LifeData::default(),
            callo: 0,
            calli: 0,
            nargs: 0,
            args: [Arg::ZERO; MAX_OP_ARGS],
        }
    }

    /// Number of output arguments, honouring the call layout.
    pub fn nb_oargs(&self) -> usize {
        if self.opc == Opcode::Call {
            self.callo as usize
        } else {
            self.opc.def().nb_oargs as usize
        }
    }

    /// Number of input arguments, honouring the call layout.
    pub fn nb_iargs(&self) -> usize {
        if self.opc == Opcode::Call {
            self.calli as usize
        } else {
            self.opc.def().nb_iargs as usize
        }
    }
}

/// The op list: an array of ops linked into a doubly linked list by slot
/// index. Slot 0 is a sentinel whose `next` is the first op and whose
/// `prev` is the last, so an empty list links the sentinel to itself.
///
/// Insertion and removal only rewrite links, so forward and backward walks
/// survive mid-pass edits at other positions. Removed slots are cleared
/// but never reused within a TB.
#[derive(Debug, Clone)]
pub struct OpList {
    ops: Vec<Op>,
}

impl OpList {
    pub fn new() -> Self {
        let mut list = Self { ops: Vec::with_capacity(256) };
        list.clear();
        list
    }

    /// Reset to an empty list for a new TB.
    pub fn clear(&mut self) {
        self.ops.clear();
        self.ops.push(Op::new(Opcode::Nop, Type::I32));
    }

    /// Slot index of the first op, or 0 if empty.
    pub fn first(&self) -> u32 {
        self.ops[0].next
    }

    /// Slot index of the last op, or 0 if empty.
    pub fn last(&self) -> u32 {
        self.ops[0].prev
    }

    pub fn is_empty(&self) -> bool {
        self.ops[0].next == 0
    }

    pub fn get(&self, idx: u32) -> &Op {
        &self.ops[idx as usize]
    }

    pub fn get_mut(&mut self, idx: u32) -> &mut Op {
        &mut self.ops[idx as usize]
    }

    /// Total slots ever allocated, sentinel included.
    pub fn num_slots(&self) -> usize {
        self.ops.len()
    }

    /// Number of ops currently linked into the list.
    pub fn len(&self) -> usize {
        let mut n = 0;
        let mut oi = self.first();
        while oi != 0 {
            n += 1;
            oi = self.get(oi).next;
        }
        n
    }

    fn push(&mut self, op: Op) -> u32 {
        let idx = self.ops.len() as u32;
        self.ops.push(op);
        idx
    }

    /// Append an op at the tail.
    pub fn append(&mut self, opc: Opcode, ty: Type) -> u32 {
        let mut op = Op::new(opc, ty);
        let last = self.ops[0].prev;
        op.prev = last;
        op.next = 0;
        let idx = self.push(op);
        self.ops[last as usize].next = idx;
        self.ops[0].prev = idx;
        idx
    }

    /// Insert a new op immediately before `reference`.
    pub fn insert_before(&mut self, reference: u32, opc: Opcode, ty: Type) -> u32 {
        let prev = self.ops[reference as usize].prev;
        let mut op = Op::new(opc, ty);
        op.prev = prev;
        op.next = reference;
        let idx = self.push(op);
        self.ops[prev as usize].next = idx;
        self.ops[reference as usize].prev = idx;
        idx
    }

    /// Insert a new op immediately after `reference`.
    pub fn insert_after(&mut self, reference: u32, opc: Opcode, ty: Type) -> u32 {
        let next = self.ops[reference as usize].next;
        let mut op = Op::new(opc, ty);
        op.prev = reference;
        op.next = next;
        let idx = self.push(op);
        self.ops[next as usize].prev = idx;
        self.ops[reference as usize].next = idx;
        idx
    }

    /// Unlink an op and clear its slot. The slot stays allocated.
    pub fn remove(&mut self, idx: u32) {
        assert!(idx != 0, "attempted to remove the list sentinel");
        let (prev, next) = {
            let op = &self.ops[idx as usize];
            (op.prev, op.next)
        };
        self.ops[next as usize].prev = prev;
        self.ops[prev as usize].next = next;
        self.ops[idx as usize] = Op::new(Opcode::Nop, Type::I32);
    }
}

impl Default for OpList {
    fn default() -> Self {
        Self::new()
    }
}
