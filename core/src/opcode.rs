use bitflags::bitflags;

bitflags! {
    /// Static properties of an opcode.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpFlags: u16 {
        /// Exits the translation block.
        const BB_EXIT = 0x01;
        /// Ends a basic block; temps cease to live in registers.
        const BB_END = 0x02;
        /// Clobbers caller-saved registers, like a function call.
        const CALL_CLOBBER = 0x04;
        /// May trap or touch memory; never removed by dead-code
        /// elimination and forces globals to be readable from memory.
        const SIDE_EFFECTS = 0x08;
        /// Operands may be I32 or I64; the width lives on the op.
        const INT = 0x10;
        /// Handled specially by the allocator; the host emitter never
        /// sees it through `out_op` and no constraints are loaded.
        const NOT_PRESENT = 0x20;
    }
}

bitflags! {
    /// Behaviour of a called helper, as seen by liveness and the
    /// allocator.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CallFlags: u32 {
        /// Helper does not read the CPU-state globals.
        const NO_READ_GLOBALS = 0x01;
        /// Helper does not write the CPU-state globals.
        const NO_WRITE_GLOBALS = 0x02;
        /// Pure helper: removable when every result is dead.
        const NO_SIDE_EFFECTS = 0x04;
    }
}

/// Static metadata for one opcode: display name, fixed argument counts
/// (outputs, inputs, constants) and flags. Calls override the counts per
/// op.
#[derive(Debug, Clone, Copy)]
pub struct OpDef {
    pub name: &'static str,
    pub nb_oargs: u8,
    pub nb_iargs: u8,
    pub nb_cargs: u8,
    pub flags: OpFlags,
}

impl OpDef {
    pub const fn nb_args(&self) -> u8 {
        self.nb_oargs + self.nb_iargs + self.nb_cargs
    }
}

/// The IR opcodes. Integer ops are type-polymorphic (`INT` flag); the
/// operand width is carried on each op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    // -- Pseudo ops --
    Nop = 0,
    Discard,
    InsnStart,
    SetLabel,

    // -- Data movement --
    Mov,
    Movi,
    SetCond,

    // -- Arithmetic --
    Add,
    Sub,
    Mul,
    DivS,
    DivU,
    RemS,
    RemU,
    Neg,
    Not,

    // -- Logic --
    And,
    Or,
    Xor,
    AndC,
    OrC,

    // -- Shift / rotate --
    Shl,
    Shr,
    Sar,
    RotL,
    RotR,

    // -- Widening / double-word arithmetic --
    MulUH,
    MulSH,
    MulU2,
    MulS2,
    Add2,
    Sub2,

    // -- Type conversion --
    ExtI32I64,
    ExtUI32I64,
    ExtrlI64I32,
    ExtrhI64I32,

    // -- Host memory access (CPU-state fields, spill slots) --
    Ld8U,
    Ld8S,
    Ld16U,
    Ld16S,
    Ld32U,
    Ld32S,
    Ld,
    St8,
    St16,
    St32,
    St,

    // -- Guest memory access --
    GuestLd,
    GuestSt,

    // -- Control flow --
    Br,
    BrCond,
    BrCond2,
    SetCond2,
    GotoTb,
    ExitTb,
    GotoPtr,

    // -- Call --
    Call,

    // Sentinel, must be last.
    Count,
}

pub const NB_OPS: usize = Opcode::Count as usize;

const fn def(
    name: &'static str,
    nb_oargs: u8,
    nb_iargs: u8,
    nb_cargs: u8,
    flags: OpFlags,
) -> OpDef {
    OpDef { name, nb_oargs, nb_iargs, nb_cargs, flags }
}

const N: OpFlags = OpFlags::empty();
const INT: OpFlags = OpFlags::INT;
const NP: OpFlags = OpFlags::NOT_PRESENT;
const SE: OpFlags = OpFlags::SIDE_EFFECTS;
const CC: OpFlags = OpFlags::CALL_CLOBBER;
const BE: OpFlags = OpFlags::BB_END;
const BX: OpFlags = OpFlags::BB_EXIT;

const fn f2(a: OpFlags, b: OpFlags) -> OpFlags {
    OpFlags::from_bits_truncate(a.bits() | b.bits())
}

const fn f3(a: OpFlags, b: OpFlags, c: OpFlags) -> OpFlags {
    OpFlags::from_bits_truncate(a.bits() | b.bits() | c.bits())
}

/// Static opcode definition table, indexed by `Opcode as usize`.
/// Per-argument register constraints are not here: they are target data,
/// parsed into per-context state by the constraint loader.
pub static OPCODE_DEFS: [OpDef; NB_OPS] = [
    def("nop", 0, 0, 0, NP),
    def("discard", 1, 0, 0, NP),
    def("insn_start", 0, 0, 2, NP),
    def("set_label", 0, 0, 1, f2(BE, NP)),
    def("mov", 1, 1, 0, f2(INT, NP)),
    def("movi", 1, 0, 1, f2(INT, NP)),
    def("setcond", 1, 2, 1, INT),
    def("add", 1, 2, 0, INT),
    def("sub", 1, 2, 0, INT),
    def("mul", 1, 2, 0, INT),
    def("divs", 1, 2, 0, INT),
    def("divu", 1, 2, 0, INT),
    def("rems", 1, 2, 0, INT),
    def("remu", 1, 2, 0, INT),
    def("neg", 1, 1, 0, INT),
    def("not", 1, 1, 0, INT),
    def("and", 1, 2, 0, INT),
    def("or", 1, 2, 0, INT),
    def("xor", 1, 2, 0, INT),
    def("andc", 1, 2, 0, INT),
    def("orc", 1, 2, 0, INT),
    def("shl", 1, 2, 0, INT),
    def("shr", 1, 2, 0, INT),
    def("sar", 1, 2, 0, INT),
    def("rotl", 1, 2, 0, INT),
    def("rotr", 1, 2, 0, INT),
    def("muluh", 1, 2, 0, INT),
    def("mulsh", 1, 2, 0, INT),
    def("mulu2", 2, 2, 0, INT),
    def("muls2", 2, 2, 0, INT),
    def("add2", 2, 4, 0, INT),
    def("sub2", 2, 4, 0, INT),
    def("ext_i32_i64", 1, 1, 0, N),
    def("extu_i32_i64", 1, 1, 0, N),
    def("extrl_i64_i32", 1, 1, 0, N),
    def("extrh_i64_i32", 1, 1, 0, N),
    def("ld8u", 1, 1, 1, INT),
    def("ld8s", 1, 1, 1, INT),
    def("ld16u", 1, 1, 1, INT),
    def("ld16s", 1, 1, 1, INT),
    def("ld32u", 1, 1, 1, INT),
    def("ld32s", 1, 1, 1, INT),
    def("ld", 1, 1, 1, INT),
    def("st8", 0, 2, 1, INT),
    def("st16", 0, 2, 1, INT),
    def("st32", 0, 2, 1, INT),
    def("st", 0, 2, 1, INT),
    def("guest_ld", 1, 1, 1, f3(INT, SE, CC)),
    def("guest_st", 0, 2, 1, f3(INT, SE, CC)),
    def("br", 0, 0, 1, BE),
    def("brcond", 0, 2, 2, f2(INT, BE)),
    def("brcond2", 0, 4, 2, BE),
    def("setcond2", 1, 4, 1, N),
    def("goto_tb", 0, 0, 1, f2(BX, BE)),
    def("exit_tb", 0, 0, 1, f2(BX, BE)),
    def("goto_ptr", 0, 1, 0, f2(BX, BE)),
    def("call", 0, 0, 3, f2(CC, NP)),
];

impl Opcode {
    pub fn def(self) -> &'static OpDef {
        &OPCODE_DEFS[self as usize]
    }

    pub fn from_index(idx: usize) -> Option<Opcode> {
        if idx < NB_OPS {
            // SAFETY: Opcode is repr(u8) with contiguous discriminants
            // 0..NB_OPS.
            Some(unsafe { std::mem::transmute::<u8, Opcode>(idx as u8) })
        } else {
            None
        }
    }
}
