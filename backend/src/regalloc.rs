use tcgen_core::{
    Arg, CallFlags, Context, Error, OpFlags, Opcode, RegSet, Reloc, Result, TempIdx, TempVal,
    MAX_OP_ARGS,
};

use crate::code_buffer::CodeBuffer;
use crate::constraint::ConstraintTable;
use crate::host::{HostEmitter, RelocRequest};

const MAX_HOST_REGS: usize = 64;

/// Forward-walking linear register allocator.
///
/// Owns the inverse register map for one code-generation run. Every op is
/// lowered with its inputs resolved to registers or admissible
/// immediates, constraints (alias, new-register, admissible sets)
/// enforced, and the per-op life bits applied afterwards.
pub struct RegAlloc<'a, H: HostEmitter> {
    ctx: &'a mut Context,
    host: &'a H,
    cons: &'a ConstraintTable,
    buf: &'a mut CodeBuffer,
    /// reg -> temp currently holding it. Fixed temps are not tracked
    /// here; their registers are reserved.
    reg_to_temp: [Option<TempIdx>; MAX_HOST_REGS],
    relocs: Vec<RelocRequest>,
}

impl<'a, H: HostEmitter> RegAlloc<'a, H> {
    pub fn new(
        ctx: &'a mut Context,
        host: &'a H,
        cons: &'a ConstraintTable,
        buf: &'a mut CodeBuffer,
    ) -> Self {
        Self {
            ctx,
            host,
            cons,
            buf,
            reg_to_temp: [None; MAX_HOST_REGS],
            relocs: Vec::new(),
        }
    }

    /// TB-entry state: globals live in memory (fixed ones in their
    /// register), locals in memory, scratch temps dead.
    fn alloc_start(&mut self) {
        let nb_globals = self.ctx.nb_globals();
        let nb_temps = self.ctx.nb_temps();
        for i in 0..nb_temps {
            let t = self.ctx.temp_mut(TempIdx(i));
            if i < nb_globals {
                if t.fixed_reg {
                    t.val_type = TempVal::Reg;
                } else {
                    t.val_type = TempVal::Mem;
                    t.mem_coherent = true;
                }
            } else {
                t.val_type = if t.is_local() { TempVal::Mem } else { TempVal::Dead };
                t.mem_allocated = false;
            }
        }
        self.reg_to_temp = [None; MAX_HOST_REGS];
    }

    /// Host register anchoring a temp's memory home.
    fn base_reg(&self, idx: TempIdx) -> u8 {
        let base = self.ctx.temp(idx).mem_base.expect("temp has no memory home");
        self.ctx.temp(base).reg.expect("memory base not in a register")
    }

    /// Write a register's value back to its temp's memory slot.
    fn reg_sync(&mut self, reg: u8) -> Result<()> {
        let host = self.host;
        let idx = self.reg_to_temp[reg as usize].expect("sync of unassigned register");
        let t = self.ctx.temp(idx);
        debug_assert!(t.val_type == TempVal::Reg && t.reg == Some(reg));
        if !t.mem_coherent && !t.fixed_reg {
            if !t.mem_allocated {
                self.ctx.temp_allocate_frame(idx)?;
            }
            let t = self.ctx.temp(idx);
            let (ty, offset) = (t.ty, t.mem_offset);
            let base = self.base_reg(idx);
            host.out_st(self.buf, ty, reg, base, offset);
        }
        self.ctx.temp_mut(idx).mem_coherent = true;
        Ok(())
    }

    /// Free a register by spilling its current holder to memory.
    fn reg_free(&mut self, reg: u8) -> Result<()> {
        if let Some(idx) = self.reg_to_temp[reg as usize] {
            self.reg_sync(reg)?;
            self.ctx.temp_mut(idx).val_type = TempVal::Mem;
            self.reg_to_temp[reg as usize] = None;
        }
        Ok(())
    }

    /// Pick a register from `required \ allocated`, walking the target's
    /// preference order: first a free one, then any by spilling its
    /// holder.
    fn reg_alloc(&mut self, required: RegSet, allocated: RegSet) -> Result<u8> {
        let order = self.host.target().reg_alloc_order;
        let candidates = required.subtract(allocated);

        for &reg in order {
            if candidates.contains(reg) && self.reg_to_temp[reg as usize].is_none() {
                return Ok(reg);
            }
        }
        for &reg in order {
            if candidates.contains(reg) {
                self.reg_free(reg)?;
                return Ok(reg);
            }
        }
        Err(Error::RegAllocStarved)
    }

    /// The temp's value is no longer needed in a register.
    fn temp_dead(&mut self, idx: TempIdx) {
        let t = self.ctx.temp(idx);
        if t.fixed_reg {
            return;
        }
        if t.val_type == TempVal::Reg {
            self.reg_to_temp[t.reg.unwrap() as usize] = None;
        }
        let spills = t.spills_to_mem();
        self.ctx.temp_mut(idx).val_type =
            if spills { TempVal::Mem } else { TempVal::Dead };
    }

    /// Make the temp's memory copy current. Constants pass through a
    /// register on the way.
    fn temp_sync(&mut self, idx: TempIdx, allocated: RegSet) -> Result<()> {
        let host = self.host;
        let t = self.ctx.temp(idx);
        if t.fixed_reg {
            return Ok(());
        }
        match t.val_type {
            TempVal::Const => {
                let (ty, val) = (t.ty, t.val);
                let avail = host.target().available_for(ty);
                let reg = self.reg_alloc(avail, allocated)?;
                {
                    let t = self.ctx.temp_mut(idx);
                    t.val_type = TempVal::Reg;
                    t.reg = Some(reg);
                    t.mem_coherent = false;
                }
                self.reg_to_temp[reg as usize] = Some(idx);
                host.out_movi(self.buf, ty, reg, val);
                self.reg_sync(reg)
            }
            TempVal::Reg => {
                let reg = t.reg.unwrap();
                self.reg_sync(reg)
            }
            TempVal::Dead | TempVal::Mem => Ok(()),
        }
    }

    /// Sync a temp to memory and drop it from its register.
    fn temp_save(&mut self, idx: TempIdx, allocated: RegSet) -> Result<()> {
        self.temp_sync(idx, allocated)?;
        self.temp_dead(idx);
        Ok(())
    }

    /// Save every global to its canonical location; the following code
    /// may modify them in memory.
    fn save_globals(&mut self, allocated: RegSet) -> Result<()> {
        for i in 0..self.ctx.nb_globals() {
            self.temp_save(TempIdx(i), allocated)?;
        }
        Ok(())
    }

    /// Sync every global; the following code may read them from memory.
    fn sync_globals(&mut self, allocated: RegSet) -> Result<()> {
        for i in 0..self.ctx.nb_globals() {
            self.temp_sync(TempIdx(i), allocated)?;
        }
        Ok(())
    }

    /// Basic-block boundary: locals are saved, scratch temps die, and
    /// globals return to memory.
    fn bb_end(&mut self, allocated: RegSet) -> Result<()> {
        for i in self.ctx.nb_globals()..self.ctx.nb_temps() {
            let idx = TempIdx(i);
            if self.ctx.temp(idx).is_local() {
                self.temp_save(idx, allocated)?;
            } else {
                // Liveness already killed scratch temps on BB ends.
                debug_assert!(self.ctx.temp(idx).val_type != TempVal::Reg);
                self.temp_dead(idx);
            }
        }
        self.save_globals(allocated)
    }

    /// `movi`: record the constant without emitting code, unless the
    /// target temp is pinned to a register.
    fn do_movi(&mut self, op: &tcgen_core::Op) -> Result<()> {
        let host = self.host;
        let oidx = op.args[0].as_temp();
        let val = op.args[1].raw();
        let ots = self.ctx.temp(oidx);

        if ots.fixed_reg {
            // No constant propagation through fixed registers.
            let (ty, reg) = (ots.ty, ots.reg.unwrap());
            host.out_movi(self.buf, ty, reg, val);
        } else {
            if ots.val_type == TempVal::Reg {
                self.reg_to_temp[ots.reg.unwrap() as usize] = None;
            }
            let t = self.ctx.temp_mut(oidx);
            t.val_type = TempVal::Const;
            t.val = val;
        }
        if op.life.is_sync(0) {
            self.temp_sync(oidx, self.ctx.reserved_regs)?;
        }
        if op.life.is_dead(0) {
            self.temp_dead(oidx);
        }
        Ok(())
    }

    /// `mov`: rename, propagate a constant, steal a dying source's
    /// register, or fall back to a host move.
    fn do_mov(&mut self, op: &tcgen_core::Op) -> Result<()> {
        let host = self.host;
        let life = op.life;
        let mut allocated = self.ctx.reserved_regs;
        let oidx = op.args[0].as_temp();
        let iidx = op.args[1].as_temp();
        let otype = self.ctx.temp(oidx).ty;
        let itype = self.ctx.temp(iidx).ty;

        // If the copy itself needs the source in a register (the output
        // is fixed or must hit memory), load the source into its own
        // register first so it is not reloaded at its next use.
        let ofixed = self.ctx.temp(oidx).fixed_reg;
        let ival = self.ctx.temp(iidx).val_type;
        if ((life.is_sync(0) || ofixed) && ival != TempVal::Reg) || ival == TempVal::Mem {
            let avail = host.target().available_for(itype);
            let reg = self.reg_alloc(avail, allocated)?;
            let ts = self.ctx.temp(iidx);
            match ts.val_type {
                TempVal::Mem => {
                    let offset = ts.mem_offset;
                    let base = self.base_reg(iidx);
                    host.out_ld(self.buf, itype, reg, base, offset);
                    self.ctx.temp_mut(iidx).mem_coherent = true;
                }
                TempVal::Const => {
                    let val = ts.val;
                    host.out_movi(self.buf, itype, reg, val);
                    self.ctx.temp_mut(iidx).mem_coherent = false;
                }
                _ => unreachable!("mov source has no value"),
            }
            self.reg_to_temp[reg as usize] = Some(iidx);
            let t = self.ctx.temp_mut(iidx);
            t.val_type = TempVal::Reg;
            t.reg = Some(reg);
        }

        if life.is_dead(0) && !ofixed {
            // The output dies here, so it only exists in memory: store
            // straight from the source register.
            debug_assert!(life.is_sync(0));
            debug_assert_eq!(self.ctx.temp(iidx).val_type, TempVal::Reg);
            if !self.ctx.temp(oidx).mem_allocated {
                self.ctx.temp_allocate_frame(oidx)?;
            }
            let src = self.ctx.temp(iidx).reg.unwrap();
            let offset = self.ctx.temp(oidx).mem_offset;
            let base = self.base_reg(oidx);
            host.out_st(self.buf, otype, src, base, offset);
            if life.is_dead(1) {
                self.temp_dead(iidx);
            }
            self.temp_dead(oidx);
        } else if self.ctx.temp(iidx).val_type == TempVal::Const {
            // Propagate the constant.
            let ots = self.ctx.temp(oidx);
            if ots.val_type == TempVal::Reg {
                self.reg_to_temp[ots.reg.unwrap() as usize] = None;
            }
            let val = self.ctx.temp(iidx).val;
            let t = self.ctx.temp_mut(oidx);
            t.val_type = TempVal::Const;
            t.val = val;
        } else {
            debug_assert_eq!(self.ctx.temp(iidx).val_type, TempVal::Reg);
            let ifixed = self.ctx.temp(iidx).fixed_reg;
            if life.is_dead(1) && !ifixed && !ofixed {
                // Suppressed move: the output inherits the dying
                // source's register.
                let ots = self.ctx.temp(oidx);
                if ots.val_type == TempVal::Reg {
                    self.reg_to_temp[ots.reg.unwrap() as usize] = None;
                }
                let reg = self.ctx.temp(iidx).reg.unwrap();
                self.temp_dead(iidx);
                self.ctx.temp_mut(oidx).reg = Some(reg);
            } else {
                if self.ctx.temp(oidx).val_type != TempVal::Reg {
                    // Don't spill the source while picking the output
                    // register.
                    allocated = allocated.set(self.ctx.temp(iidx).reg.unwrap());
                    let avail = host.target().available_for(otype);
                    let reg = self.reg_alloc(avail, allocated)?;
                    self.ctx.temp_mut(oidx).reg = Some(reg);
                }
                let dst = self.ctx.temp(oidx).reg.unwrap();
                let src = self.ctx.temp(iidx).reg.unwrap();
                host.out_mov(self.buf, otype, dst, src);
            }
            let t = self.ctx.temp_mut(oidx);
            t.val_type = TempVal::Reg;
            t.mem_coherent = false;
            let reg = t.reg.unwrap();
            self.reg_to_temp[reg as usize] = Some(oidx);
            if life.is_sync(0) {
                self.reg_sync(reg)?;
            }
        }
        Ok(())
    }

    /// Generic constraint-driven lowering of one op.
    fn do_op(&mut self, op: &tcgen_core::Op) -> Result<()> {
        let host = self.host;
        let def = op.opc.def();
        let nb_oargs = def.nb_oargs as usize;
        let nb_iargs = def.nb_iargs as usize;
        let nb_cargs = def.nb_cargs as usize;
        let ct = *self.cons.get(op.opc);
        let life = op.life;

        let mut new_args = [Arg::ZERO; MAX_OP_ARGS];
        let mut const_args = [false; MAX_OP_ARGS];

        // Constant args pass through untouched.
        new_args[nb_oargs + nb_iargs..nb_oargs + nb_iargs + nb_cargs]
            .copy_from_slice(&op.args[nb_oargs + nb_iargs..nb_oargs + nb_iargs + nb_cargs]);

        // Satisfy input constraints, most constrained argument first.
        let mut allocated = self.ctx.reserved_regs;
        'inputs: for k in 0..nb_iargs {
            let i = ct.sorted_args[nb_oargs + k] as usize;
            let tidx = op.args[i].as_temp();
            let arg_ct = ct.args[i];

            match self.ctx.temp(tidx).val_type {
                TempVal::Mem => {
                    let t = self.ctx.temp(tidx);
                    let (ty, offset) = (t.ty, t.mem_offset);
                    let base = self.base_reg(tidx);
                    let reg = self.reg_alloc(arg_ct.regs, allocated)?;
                    host.out_ld(self.buf, ty, reg, base, offset);
                    let t = self.ctx.temp_mut(tidx);
                    t.val_type = TempVal::Reg;
                    t.reg = Some(reg);
                    t.mem_coherent = true;
                    self.reg_to_temp[reg as usize] = Some(tidx);
                }
                TempVal::Const => {
                    let t = self.ctx.temp(tidx);
                    let (ty, val) = (t.ty, t.val);
                    if arg_ct.accepts_const && host.const_match(val, ty) {
                        // The instruction takes the immediate directly.
                        new_args[i] = Arg::value(val);
                        const_args[i] = true;
                        continue 'inputs;
                    }
                    let reg = self.reg_alloc(arg_ct.regs, allocated)?;
                    host.out_movi(self.buf, ty, reg, val);
                    let t = self.ctx.temp_mut(tidx);
                    t.val_type = TempVal::Reg;
                    t.reg = Some(reg);
                    t.mem_coherent = false;
                    self.reg_to_temp[reg as usize] = Some(tidx);
                }
                TempVal::Reg => {}
                TempVal::Dead => unreachable!("op input has no value"),
            }

            let ts = self.ctx.temp(tidx);
            debug_assert_eq!(ts.val_type, TempVal::Reg);
            let mut reg = ts.reg.unwrap();
            let ty = ts.ty;

            let mut force_copy = false;
            if arg_ct.ialias {
                if ts.fixed_reg {
                    // A fixed input aliased to an output needs a copy
                    // unless the op writes the very same temp.
                    force_copy = op.args[i] != op.args[arg_ct.alias_index as usize];
                } else {
                    // An aliased input still live after the op must be
                    // copied away before the output overwrites it.
                    force_copy = !life.is_dead(i);
                }
            }

            if force_copy || !arg_ct.regs.contains(reg) {
                // Allocate a register matching the constraint and move
                // the value there; the temp keeps its own register.
                let copy = self.reg_alloc(arg_ct.regs, allocated)?;
                host.out_mov(self.buf, ty, copy, reg);
                reg = copy;
            }
            new_args[i] = Arg::value(reg as u64);
            const_args[i] = false;
            allocated = allocated.set(reg);
        }
        let input_regs = allocated;

        // Inputs that die here free their registers before outputs are
        // placed.
        for i in nb_oargs..nb_oargs + nb_iargs {
            if life.is_dead(i) {
                self.temp_dead(op.args[i].as_temp());
            }
        }

        if def.flags.contains(OpFlags::BB_END) {
            self.bb_end(allocated)?;
        } else {
            if def.flags.contains(OpFlags::CALL_CLOBBER) {
                let clobber = host.target().call_clobber_regs;
                let nb_regs = host.target().nb_regs;
                for reg in 0..nb_regs {
                    if clobber.contains(reg) {
                        self.reg_free(reg)?;
                    }
                }
            }
            if def.flags.contains(OpFlags::SIDE_EFFECTS) {
                // The op may raise an exception; globals must be
                // readable from memory.
                self.sync_globals(allocated)?;
            }

            // Satisfy output constraints.
            allocated = self.ctx.reserved_regs;
            for k in 0..nb_oargs {
                let i = ct.sorted_args[k] as usize;
                let tidx = op.args[i].as_temp();
                let arg_ct = ct.args[i];
                let ts = self.ctx.temp(tidx);

                let reg = if arg_ct.oalias && !const_args[arg_ct.alias_index as usize] {
                    new_args[arg_ct.alias_index as usize].raw() as u8
                } else if arg_ct.newreg {
                    // Must not overlap any input register.
                    self.reg_alloc(arg_ct.regs, allocated.union(input_regs))?
                } else if ts.fixed_reg && arg_ct.regs.contains(ts.reg.unwrap()) {
                    ts.reg.unwrap()
                } else {
                    self.reg_alloc(arg_ct.regs, allocated)?
                };
                allocated = allocated.set(reg);

                let ts = self.ctx.temp(tidx);
                if !ts.fixed_reg {
                    if ts.val_type == TempVal::Reg {
                        self.reg_to_temp[ts.reg.unwrap() as usize] = None;
                    }
                    let t = self.ctx.temp_mut(tidx);
                    t.val_type = TempVal::Reg;
                    t.reg = Some(reg);
                    // The value is rewritten; memory is stale until the
                    // next sync.
                    t.mem_coherent = false;
                    self.reg_to_temp[reg as usize] = Some(tidx);
                }
                new_args[i] = Arg::value(reg as u64);
            }
        }

        host.out_op(
            self.buf,
            op.opc,
            op.ty,
            &new_args[..nb_oargs + nb_iargs + nb_cargs],
            &const_args[..nb_oargs + nb_iargs + nb_cargs],
            &mut self.relocs,
        );
        self.flush_relocs()?;

        // Per-output fixups: move into pinned registers, then apply
        // sync/die bits.
        for i in 0..nb_oargs {
            let tidx = op.args[i].as_temp();
            let ts = self.ctx.temp(tidx);
            let reg = new_args[i].raw() as u8;
            if ts.fixed_reg {
                if ts.reg != Some(reg) {
                    let (ty, dst) = (ts.ty, ts.reg.unwrap());
                    host.out_mov(self.buf, ty, dst, reg);
                }
            } else {
                if life.is_sync(i) {
                    self.reg_sync(reg)?;
                }
                if life.is_dead(i) {
                    self.temp_dead(tidx);
                }
            }
        }
        Ok(())
    }

    /// Lower a helper call: stack arguments, ABI registers, clobbers,
    /// flag-driven global handling, then the return values.
    fn do_call(&mut self, op: &tcgen_core::Op) -> Result<()> {
        let host = self.host;
        let nb_oargs = op.callo as usize;
        let nb_iargs = op.calli as usize;
        let func = op.args[nb_oargs + nb_iargs].raw();
        let flags = CallFlags::from_bits_truncate(op.args[nb_oargs + nb_iargs + 1].raw() as u32);
        let life = op.life;

        let target = host.target();
        let iarg_regs = target.call_iarg_regs;
        let oarg_regs = target.call_oarg_regs;
        let clobber = target.call_clobber_regs;
        let nb_host_regs = target.nb_regs;
        let stack_reg = target.call_stack_reg;
        let word = target.layout.word_bytes();
        let align = target.stack_align;
        let growsup = target.stack_growsup;
        let avail = target.available_regs;
        let static_size = target.static_call_args_size;
        let mut stack_offset = target.call_stack_offset;

        let nb_reg_args = iarg_regs.len().min(nb_iargs);

        // Arguments beyond the register count go to the preallocated
        // stack area.
        let needed = ((nb_iargs - nb_reg_args) * word + align - 1) & !(align - 1);
        if needed > static_size {
            return Err(Error::CallStackOverflow { needed, reserved: static_size });
        }

        for i in nb_reg_args..nb_iargs {
            let arg = op.args[nb_oargs + i];
            if growsup {
                stack_offset -= word as i64;
            }
            if !arg.is_dummy() {
                let tidx = arg.as_temp();
                let t = self.ctx.temp(tidx);
                let (ty, val_type, cur_reg, val, offset) =
                    (t.ty, t.val_type, t.reg, t.val, t.mem_offset);
                match val_type {
                    TempVal::Reg => {
                        host.out_st(self.buf, ty, cur_reg.unwrap(), stack_reg, stack_offset);
                    }
                    TempVal::Mem => {
                        let base = self.base_reg(tidx);
                        let reg =
                            self.reg_alloc(avail[ty as usize], self.ctx.reserved_regs)?;
                        host.out_ld(self.buf, ty, reg, base, offset);
                        host.out_st(self.buf, ty, reg, stack_reg, stack_offset);
                    }
                    TempVal::Const => {
                        let reg =
                            self.reg_alloc(avail[ty as usize], self.ctx.reserved_regs)?;
                        host.out_movi(self.buf, ty, reg, val);
                        host.out_st(self.buf, ty, reg, stack_reg, stack_offset);
                    }
                    TempVal::Dead => unreachable!("call argument has no value"),
                }
            }
            if !growsup {
                stack_offset += word as i64;
            }
        }

        // Remaining arguments go to the ABI registers, each freed first.
        let mut allocated = self.ctx.reserved_regs;
        for i in 0..nb_reg_args {
            let arg = op.args[nb_oargs + i];
            if arg.is_dummy() {
                continue;
            }
            let tidx = arg.as_temp();
            let reg = iarg_regs[i];
            self.reg_free(reg)?;
            let t = self.ctx.temp(tidx);
            let (ty, val_type, cur_reg, val, offset) =
                (t.ty, t.val_type, t.reg, t.val, t.mem_offset);
            match val_type {
                TempVal::Reg => {
                    if cur_reg != Some(reg) {
                        host.out_mov(self.buf, ty, reg, cur_reg.unwrap());
                    }
                }
                TempVal::Mem => {
                    let base = self.base_reg(tidx);
                    host.out_ld(self.buf, ty, reg, base, offset);
                }
                TempVal::Const => {
                    host.out_movi(self.buf, ty, reg, val);
                }
                TempVal::Dead => unreachable!("call argument has no value"),
            }
            allocated = allocated.set(reg);
        }

        for i in nb_oargs..nb_oargs + nb_iargs {
            if life.is_dead(i) && !op.args[i].is_dummy() {
                self.temp_dead(op.args[i].as_temp());
            }
        }

        for reg in 0..nb_host_regs {
            if clobber.contains(reg) {
                self.reg_free(reg)?;
            }
        }

        // Save globals the helper may write, sync those it may read.
        if flags.contains(CallFlags::NO_READ_GLOBALS) {
            // Nothing to do.
        } else if flags.contains(CallFlags::NO_WRITE_GLOBALS) {
            self.sync_globals(allocated)?;
        } else {
            self.save_globals(allocated)?;
        }

        host.out_call(self.buf, func);

        // Return values arrive in the ABI output registers.
        for i in 0..nb_oargs {
            let tidx = op.args[i].as_temp();
            let reg = oarg_regs[i];
            debug_assert!(self.reg_to_temp[reg as usize].is_none());
            let ts = self.ctx.temp(tidx);
            if ts.fixed_reg {
                if ts.reg != Some(reg) {
                    let (ty, dst) = (ts.ty, ts.reg.unwrap());
                    host.out_mov(self.buf, ty, dst, reg);
                }
            } else {
                if ts.val_type == TempVal::Reg {
                    self.reg_to_temp[ts.reg.unwrap() as usize] = None;
                }
                let t = self.ctx.temp_mut(tidx);
                t.val_type = TempVal::Reg;
                t.reg = Some(reg);
                t.mem_coherent = false;
                self.reg_to_temp[reg as usize] = Some(tidx);
                if life.is_sync(i) {
                    self.reg_sync(reg)?;
                }
                if life.is_dead(i) {
                    self.temp_dead(tidx);
                }
            }
        }
        Ok(())
    }

    /// Place a label: flush the basic block, bind the label and patch
    /// every pending forward reference.
    fn do_set_label(&mut self, op: &tcgen_core::Op) -> Result<()> {
        self.bb_end(self.ctx.reserved_regs)?;
        let id = op.args[0].as_label();
        if self.ctx.label(id).has_value {
            return Err(Error::LabelRedefined(id));
        }
        let value = self.buf.offset();
        let pending = self.ctx.label_mut(id).bind(value);
        for r in pending {
            self.host
                .patch_reloc(self.buf, r.kind, r.offset, value, r.addend)?;
        }
        Ok(())
    }

    /// Resolve relocation requests reported by the emitter: patch now
    /// when the label is bound, queue on the label otherwise.
    fn flush_relocs(&mut self) -> Result<()> {
        while let Some(rq) = self.relocs.pop() {
            let label = self.ctx.label(rq.label);
            if label.has_value {
                let value = label.value;
                self.host
                    .patch_reloc(self.buf, rq.kind, rq.offset, value, rq.addend)?;
            } else {
                self.ctx.label_mut(rq.label).add_reloc(Reloc {
                    offset: rq.offset,
                    kind: rq.kind,
                    addend: rq.addend,
                });
            }
        }
        Ok(())
    }

    /// Register-map coherence check, run after every op in debug builds:
    /// the inverse map and the temp states must agree in both
    /// directions.
    #[cfg(debug_assertions)]
    fn check_regs(&self) {
        for reg in 0..self.host.target().nb_regs as usize {
            if let Some(idx) = self.reg_to_temp[reg] {
                let t = self.ctx.temp(idx);
                assert!(
                    t.val_type == TempVal::Reg && t.reg == Some(reg as u8),
                    "inconsistent state for register {reg}: maps to temp {} \
                     which is {:?} in {:?}",
                    idx.0,
                    t.val_type,
                    t.reg,
                );
            }
        }
        for t in self.ctx.temps() {
            if t.val_type == TempVal::Reg && !t.fixed_reg {
                let reg = t.reg.unwrap() as usize;
                assert!(
                    self.reg_to_temp[reg] == Some(t.idx),
                    "temp {} claims register {reg} but the map disagrees",
                    t.idx.0,
                );
            }
        }
    }

    /// Walk the op list in order, lowering each op and testing the
    /// buffer's high-water mark after every one.
    pub fn run(&mut self) -> Result<()> {
        self.alloc_start();

        let mut num_insns: i64 = -1;
        let mut oi = self.ctx.ops.first();
        while oi != 0 {
            let op = self.ctx.ops.get(oi).clone();
            let next = op.next;

            match op.opc {
                Opcode::Mov => self.do_mov(&op)?,
                Opcode::Movi => self.do_movi(&op)?,
                Opcode::Discard => self.temp_dead(op.args[0].as_temp()),
                Opcode::SetLabel => self.do_set_label(&op)?,
                Opcode::Call => self.do_call(&op)?,
                Opcode::Nop => {}
                Opcode::InsnStart => {
                    if num_insns >= 0 {
                        self.ctx.gen_insn_end_off.push(self.buf.offset());
                    }
                    num_insns += 1;
                }
                _ => {
                    debug_assert!(!op.opc.def().flags.contains(OpFlags::NOT_PRESENT));
                    self.do_op(&op)?;
                }
            }

            #[cfg(debug_assertions)]
            self.check_regs();

            if self.buf.offset() > self.buf.high_water() {
                return Err(Error::BufferFull);
            }
            oi = next;
        }
        if num_insns >= 0 {
            self.ctx.gen_insn_end_off.push(self.buf.offset());
        }
        Ok(())
    }
}
