use crate::types::{TempVal, Type};

/// Allocation class of a temporary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TempKind {
    /// Scratch value, live within one extended basic block.
    Ebb,
    /// Preserved across basic blocks within the same TB.
    Local,
    /// Canonical storage is a CPU-state field; declared once per context.
    Global,
}

/// Index into the context's temp pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TempIdx(pub u32);

impl TempIdx {
    /// The adjacent high half of a 64-bit value split on a 32-bit host.
    pub const fn high_half(self) -> TempIdx {
        TempIdx(self.0 + 1)
    }
}

/// A temporary: a symbolic value addressed by its index.
///
/// Carries both the IR-level identity (kind, types, memory home) and the
/// register allocator's view of where the value currently lives
/// (`val_type`, `reg`, `val`, coherence).
#[derive(Debug, Clone)]
pub struct Temp {
    pub idx: TempIdx,
    /// The operand type the passes see (always I32 on 32-bit hosts).
    pub ty: Type,
    /// Declared type; differs from `ty` for halves of a split 64-bit value.
    pub base_type: Type,
    pub kind: TempKind,
    /// Pinned to one host register for its whole lifetime (env pointer,
    /// frame pointer). Never spilled, never reallocated.
    pub fixed_reg: bool,
    /// Global whose memory home is reached through a pointer that is
    /// itself a non-fixed global.
    pub indirect: bool,
    /// Slot currently in use (clear means available on the free list).
    pub temp_allocated: bool,

    // -- Register allocator state --
    pub val_type: TempVal,
    /// Host register holding the value (meaningful when `val_type` is Reg).
    pub reg: Option<u8>,
    /// For `val_type == Const`, the immediate.
    pub val: u64,
    /// The in-memory copy matches the register copy.
    pub mem_coherent: bool,
    /// A memory slot exists for this temp.
    pub mem_allocated: bool,
    /// Temp whose register anchors the memory home (env or frame temp).
    pub mem_base: Option<TempIdx>,
    pub mem_offset: i64,

    /// Display name; globals always have one.
    pub name: Option<String>,
}

impl Temp {
    pub fn new(idx: TempIdx, ty: Type, kind: TempKind) -> Self {
        Self {
            idx,
            ty,
            base_type: ty,
            kind,
            fixed_reg: false,
            indirect: false,
            temp_allocated: true,
            val_type: TempVal::Dead,
            reg: None,
            val: 0,
            mem_coherent: false,
            mem_allocated: false,
            mem_base: None,
            mem_offset: 0,
            name: None,
        }
    }

    pub fn new_fixed(idx: TempIdx, ty: Type, reg: u8, name: &str) -> Self {
        let mut t = Self::new(idx, ty, TempKind::Global);
        t.fixed_reg = true;
        t.val_type = TempVal::Reg;
        t.reg = Some(reg);
        t.name = Some(name.to_owned());
        t
    }

    pub fn new_mem_global(
        idx: TempIdx,
        ty: Type,
        base: TempIdx,
        offset: i64,
        indirect: bool,
        name: String,
    ) -> Self {
        let mut t = Self::new(idx, ty, TempKind::Global);
        t.indirect = indirect;
        t.val_type = TempVal::Mem;
        t.mem_coherent = true;
        t.mem_allocated = true;
        t.mem_base = Some(base);
        t.mem_offset = offset;
        t.name = Some(name);
        t
    }

    pub fn is_global(&self) -> bool {
        self.kind == TempKind::Global
    }

    pub fn is_local(&self) -> bool {
        self.kind == TempKind::Local
    }

    /// Whether the value must survive in memory when it leaves a register.
    pub fn spills_to_mem(&self) -> bool {
        matches!(self.kind, TempKind::Global | TempKind::Local)
    }
}
