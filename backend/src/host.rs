use tcgen_core::{Arg, HostLayout, Opcode, RegSet, RelocKind, Result, Type, TYPE_COUNT};

use crate::code_buffer::CodeBuffer;

/// Plain-data description of the host ABI and register file. Everything
/// the passes need to know about a target that is not code.
#[derive(Debug, Clone)]
pub struct TargetDesc {
    pub layout: HostLayout,
    /// Number of host general registers (at most 64).
    pub nb_regs: u8,
    /// Allocation preference order; the register selector walks this.
    pub reg_alloc_order: &'static [u8],
    /// Registers the allocator must never touch (stack pointer etc.).
    pub reserved_regs: RegSet,
    /// Registers able to hold a value of each type.
    pub available_regs: [RegSet; TYPE_COUNT],
    /// ABI argument registers, in order.
    pub call_iarg_regs: &'static [u8],
    /// ABI return-value registers, in order.
    pub call_oarg_regs: &'static [u8],
    /// Caller-saved registers, freed around calls and call-clobber ops.
    pub call_clobber_regs: RegSet,
    /// Register addressing the outgoing call-argument area.
    pub call_stack_reg: u8,
    /// Offset of the first stack argument slot.
    pub call_stack_offset: i64,
    /// Required alignment of the outgoing argument area, in bytes.
    pub stack_align: usize,
    /// Stack grows towards higher addresses.
    pub stack_growsup: bool,
    /// Bytes statically reserved for outgoing call arguments; needing
    /// more aborts the TB.
    pub static_call_args_size: usize,
    /// Target implements `muluh` / `mulsh`, enabling the mul2 narrowing
    /// in liveness.
    pub has_muluh: bool,
    pub has_mulsh: bool,
}

impl TargetDesc {
    pub fn available_for(&self, ty: Type) -> RegSet {
        self.available_regs[ty as usize]
    }
}

/// A relocation produced by the host emitter for a not-yet-bound label:
/// patch the instruction field at `offset` once the label's address is
/// known.
#[derive(Debug, Clone, Copy)]
pub struct RelocRequest {
    pub label: u32,
    pub kind: RelocKind,
    pub offset: usize,
    pub addend: i64,
}

/// The narrow interface a host backend implements for the middle end.
///
/// The register allocator resolves every op argument to a host register
/// or an admissible immediate before calling `out_op`; `out_mov`,
/// `out_movi`, `out_ld` and `out_st` are the primitives it uses for its
/// own moves, reloads, spills and syncs. Branch emission for unresolved
/// labels reports `RelocRequest`s, which the core patches on label
/// resolution through `patch_reloc`.
pub trait HostEmitter {
    fn target(&self) -> &TargetDesc;

    /// Constraint strings for a present opcode, one per output+input
    /// argument. Tokens: digit = alias that output, `&` = new register,
    /// `i` = immediate allowed, anything else goes to
    /// `parse_constraint_char`.
    fn op_constraints(&self, opc: Opcode) -> Option<&'static [&'static str]>;

    /// Decode one target-specific constraint character into the register
    /// set it admits.
    fn parse_constraint_char(&self, ch: char, ty: Type) -> Option<RegSet>;

    /// Whether `val` may be encoded as an immediate operand.
    fn const_match(&self, val: u64, ty: Type) -> bool;

    fn out_mov(&self, buf: &mut CodeBuffer, ty: Type, dst: u8, src: u8);

    fn out_movi(&self, buf: &mut CodeBuffer, ty: Type, dst: u8, val: u64);

    fn out_ld(&self, buf: &mut CodeBuffer, ty: Type, dst: u8, base: u8, offset: i64);

    fn out_st(&self, buf: &mut CodeBuffer, ty: Type, src: u8, base: u8, offset: i64);

    /// Emit one resolved op. `args` holds host register numbers for
    /// output/input slots (or immediates where `const_args` is set) and
    /// raw constant args after them.
    fn out_op(
        &self,
        buf: &mut CodeBuffer,
        opc: Opcode,
        ty: Type,
        args: &[Arg],
        const_args: &[bool],
        relocs: &mut Vec<RelocRequest>,
    );

    fn out_call(&self, buf: &mut CodeBuffer, target: u64);

    /// Patch the instruction field at `offset` to refer to code address
    /// `value`. Fails when the displacement does not fit the field.
    fn patch_reloc(
        &self,
        buf: &mut CodeBuffer,
        kind: RelocKind,
        offset: usize,
        value: usize,
        addend: i64,
    ) -> Result<()>;
}
