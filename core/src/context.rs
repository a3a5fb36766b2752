use crate::arena::Arena;
use crate::error::{Error, Result};
use crate::label::Label;
use crate::op::OpList;
use crate::temp::{Temp, TempIdx, TempKind};
use crate::types::{HostLayout, RegSet, TempBitSet, Type, TYPE_COUNT};

/// Maximum number of temps per translation context.
pub const MAX_TEMPS: usize = 512;
/// Maximum number of labels per translation block.
pub const MAX_LABELS: usize = 512;

/// Per-thread translation context.
///
/// Holds everything one translation needs: the temp pool (globals at the
/// front), the op list, labels, the per-TB arena and the spill frame
/// description. One context translates one TB at a time; distinct
/// contexts share nothing mutable.
pub struct Context {
    temps: Vec<Temp>,
    /// Free lists indexed by `(base_type, locality)`, allowing temp reuse
    /// within one TB.
    free_temps: [TempBitSet; 2 * TYPE_COUNT],
    nb_globals: u32,
    nb_indirects: u32,

    pub ops: OpList,
    labels: Vec<Label>,
    arena: Arena,

    /// Registers the allocator must never hand out.
    pub reserved_regs: RegSet,
    host: HostLayout,

    // -- Spill frame --
    frame_temp: Option<TempIdx>,
    frame_start: i64,
    frame_end: i64,
    frame_offset: i64,

    /// End offset in host code of each guest instruction, filled during
    /// code generation from `insn_start` markers.
    pub gen_insn_end_off: Vec<usize>,
}

impl Context {
    pub fn new() -> Self {
        Self::with_layout(HostLayout::default())
    }

    pub fn with_layout(host: HostLayout) -> Self {
        Self {
            temps: Vec::with_capacity(64),
            free_temps: std::array::from_fn(|_| TempBitSet::with_capacity(MAX_TEMPS)),
            nb_globals: 0,
            nb_indirects: 0,
            ops: OpList::new(),
            labels: Vec::new(),
            arena: Arena::new(),
            reserved_regs: RegSet::EMPTY,
            host,
            frame_temp: None,
            frame_start: 0,
            frame_end: 0,
            frame_offset: 0,
            gen_insn_end_off: Vec::new(),
        }
    }

    pub fn set_host_layout(&mut self, host: HostLayout) {
        self.host = host;
    }

    pub fn host(&self) -> &HostLayout {
        &self.host
    }

    /// Reset per-TB state: arena, non-global temps, labels, the op list
    /// and the frame bump pointer. Globals survive.
    pub fn func_start(&mut self) {
        self.arena.reset();
        self.temps.truncate(self.nb_globals as usize);
        for set in &mut self.free_temps {
            set.clear_all();
        }
        self.labels.clear();
        self.ops.clear();
        self.frame_offset = self.frame_start;
        self.gen_insn_end_off.clear();
    }

    // -- Globals --

    fn push_temp(&mut self, temp: Temp) -> Result<TempIdx> {
        if self.temps.len() >= MAX_TEMPS {
            return Err(Error::TooManyTemps);
        }
        let idx = temp.idx;
        self.temps.push(temp);
        Ok(idx)
    }

    fn global_reg_new_internal(
        &mut self,
        ty: Type,
        reg: u8,
        name: &str,
        allow_reserved: bool,
    ) -> Result<TempIdx> {
        assert_eq!(
            self.temps.len() as u32,
            self.nb_globals,
            "globals must be registered before temps"
        );
        assert!(
            ty.size_bits() <= self.host.reg_bits as u32,
            "fixed global wider than a host register"
        );
        assert!(
            allow_reserved || !self.reserved_regs.contains(reg),
            "register already reserved"
        );
        let idx = TempIdx(self.temps.len() as u32);
        self.push_temp(Temp::new_fixed(idx, ty, reg, name))?;
        self.nb_globals += 1;
        self.reserved_regs = self.reserved_regs.set(reg);
        Ok(idx)
    }

    /// Create a global pinned to a host register (e.g. the CPU-state
    /// pointer). The register becomes reserved.
    pub fn global_reg_new(&mut self, ty: Type, reg: u8, name: &str) -> Result<TempIdx> {
        self.global_reg_new_internal(ty, reg, name, false)
    }

    /// Create a global anchored at `(base, offset)`. When the base is not
    /// itself a fixed register, the global is indirect and will be
    /// lowered to a direct temp by liveness pass 2. On 32-bit hosts a
    /// 64-bit global becomes two 32-bit halves at adjacent indices.
    pub fn global_mem_new(
        &mut self,
        ty: Type,
        base: TempIdx,
        offset: i64,
        name: &str,
    ) -> Result<TempIdx> {
        assert_eq!(
            self.temps.len() as u32,
            self.nb_globals,
            "globals must be registered before temps"
        );
        let indirect = !self.temp(base).fixed_reg;

        if self.host.reg_bits == 32 && ty == Type::I64 {
            // Both halves or neither.
            if self.temps.len() + 2 > MAX_TEMPS {
                return Err(Error::TooManyTemps);
            }
            // Low half first; on big-endian hosts it lives in the upper
            // word of the field.
            let (off0, off1) = if self.host.big_endian {
                (offset + 4, offset)
            } else {
                (offset, offset + 4)
            };
            let idx = TempIdx(self.temps.len() as u32);
            let mut lo = Temp::new_mem_global(
                idx,
                Type::I32,
                base,
                off0,
                indirect,
                format!("{name}_0"),
            );
            lo.base_type = Type::I64;
            self.push_temp(lo)?;
            let mut hi = Temp::new_mem_global(
                idx.high_half(),
                Type::I32,
                base,
                off1,
                indirect,
                format!("{name}_1"),
            );
            hi.base_type = Type::I64;
            self.push_temp(hi)?;
            self.nb_globals += 2;
            self.nb_indirects += 2 * indirect as u32;
            Ok(idx)
        } else {
            let idx = TempIdx(self.temps.len() as u32);
            self.push_temp(Temp::new_mem_global(
                idx,
                ty,
                base,
                offset,
                indirect,
                name.to_owned(),
            ))?;
            self.nb_globals += 1;
            self.nb_indirects += indirect as u32;
            Ok(idx)
        }
    }

    // -- Temps --

    /// Allocate a temp, reusing a freed slot of the same type and
    /// locality when one exists. On 32-bit hosts a 64-bit temp becomes a
    /// pair of 32-bit halves at adjacent indices.
    pub fn temp_new(&mut self, ty: Type, local: bool) -> Result<TempIdx> {
        let k = ty as usize + TYPE_COUNT * local as usize;
        if let Some(idx) = self.free_temps[k].find_first() {
            self.free_temps[k].clear(idx);
            let t = &mut self.temps[idx];
            debug_assert_eq!(t.base_type, ty);
            debug_assert_eq!(t.is_local(), local);
            t.temp_allocated = true;
            return Ok(TempIdx(idx as u32));
        }

        let kind = if local { TempKind::Local } else { TempKind::Ebb };
        if self.host.reg_bits == 32 && ty == Type::I64 {
            // Both halves or neither.
            if self.temps.len() + 2 > MAX_TEMPS {
                return Err(Error::TooManyTemps);
            }
            let idx = TempIdx(self.temps.len() as u32);
            let mut lo = Temp::new(idx, Type::I32, kind);
            lo.base_type = Type::I64;
            self.push_temp(lo)?;
            let mut hi = Temp::new(idx.high_half(), Type::I32, kind);
            hi.base_type = Type::I64;
            self.push_temp(hi)?;
            Ok(idx)
        } else {
            let idx = TempIdx(self.temps.len() as u32);
            self.push_temp(Temp::new(idx, ty, kind))
        }
    }

    /// Release a temp for reuse within the current TB.
    pub fn temp_free(&mut self, idx: TempIdx) {
        assert!(
            idx.0 >= self.nb_globals && (idx.0 as usize) < self.temps.len(),
            "temp_free on a global or out-of-range temp"
        );
        let t = &mut self.temps[idx.0 as usize];
        assert!(t.temp_allocated, "temp freed twice");
        t.temp_allocated = false;
        let k = t.base_type as usize + TYPE_COUNT * t.is_local() as usize;
        self.free_temps[k].set(idx.0 as usize);
    }

    /// Allocate a bare direct temp standing in for an indirect global
    /// (liveness pass 2). Never drawn from the free lists.
    pub fn temp_new_shadow(&mut self, ty: Type, base_type: Type) -> Result<TempIdx> {
        let idx = TempIdx(self.temps.len() as u32);
        let mut t = Temp::new(idx, ty, TempKind::Ebb);
        t.base_type = base_type;
        self.push_temp(t)
    }

    pub fn temp(&self, idx: TempIdx) -> &Temp {
        &self.temps[idx.0 as usize]
    }

    pub fn temp_mut(&mut self, idx: TempIdx) -> &mut Temp {
        &mut self.temps[idx.0 as usize]
    }

    pub fn temps(&self) -> &[Temp] {
        &self.temps
    }

    pub fn globals(&self) -> &[Temp] {
        &self.temps[..self.nb_globals as usize]
    }

    pub fn nb_globals(&self) -> u32 {
        self.nb_globals
    }

    pub fn nb_temps(&self) -> u32 {
        self.temps.len() as u32
    }

    pub fn nb_indirects(&self) -> u32 {
        self.nb_indirects
    }

    // -- Labels --

    pub fn gen_label(&mut self) -> Result<u32> {
        if self.labels.len() >= MAX_LABELS {
            return Err(Error::TooManyLabels);
        }
        let id = self.labels.len() as u32;
        self.labels.push(Label::new(id));
        Ok(id)
    }

    pub fn label(&self, id: u32) -> &Label {
        &self.labels[id as usize]
    }

    pub fn label_mut(&mut self, id: u32) -> &mut Label {
        &mut self.labels[id as usize]
    }

    pub fn num_labels(&self) -> usize {
        self.labels.len()
    }

    // -- Spill frame --

    /// Describe the stack area available for spilling. Registers a fixed
    /// temp for the frame base so spill slots have a regular memory home.
    pub fn set_frame(&mut self, reg: u8, start: i64, size: i64) -> Result<()> {
        assert!(self.frame_temp.is_none(), "spill frame configured twice");
        let idx = self.global_reg_new_internal(
            self.host.word_type(),
            reg,
            "_frame",
            true,
        )?;
        self.frame_temp = Some(idx);
        self.frame_start = start;
        self.frame_end = start + size;
        self.frame_offset = start;
        Ok(())
    }

    pub fn frame_temp(&self) -> Option<TempIdx> {
        self.frame_temp
    }

    /// Give a temp a word-aligned slot in the spill frame.
    pub fn temp_allocate_frame(&mut self, idx: TempIdx) -> Result<()> {
        let word = self.host.word_bytes() as i64;
        let base = self.frame_temp.expect("no spill frame configured");
        self.frame_offset = (self.frame_offset + word - 1) & !(word - 1);
        if self.frame_offset + word > self.frame_end {
            return Err(Error::FrameOverflow);
        }
        let offset = self.frame_offset;
        self.frame_offset += word;
        let t = &mut self.temps[idx.0 as usize];
        t.mem_offset = offset;
        t.mem_base = Some(base);
        t.mem_allocated = true;
        Ok(())
    }

    pub fn arena_mut(&mut self) -> &mut Arena {
        &mut self.arena
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
