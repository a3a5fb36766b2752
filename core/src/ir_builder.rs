use crate::context::Context;
use crate::error::Result;
use crate::op::{Arg, MAX_OP_ARGS};
use crate::opcode::{CallFlags, Opcode};
use crate::temp::TempIdx;
use crate::types::{Cond, Type};

impl Context {
    /// Append an op and fill its argument slots.
    fn emit(&mut self, opc: Opcode, ty: Type, args: &[Arg]) -> u32 {
        debug_assert!(args.len() <= MAX_OP_ARGS);
        let oi = self.ops.append(opc, ty);
        let op = self.ops.get_mut(oi);
        op.args[..args.len()].copy_from_slice(args);
        op.nargs = args.len() as u8;
        oi
    }

    fn emit_binary(&mut self, opc: Opcode, ty: Type, d: TempIdx, a: TempIdx, b: TempIdx) {
        self.emit(opc, ty, &[d.into(), a.into(), b.into()]);
    }

    fn emit_unary(&mut self, opc: Opcode, ty: Type, d: TempIdx, s: TempIdx) {
        self.emit(opc, ty, &[d.into(), s.into()]);
    }

    // -- Data movement --

    pub fn gen_mov(&mut self, ty: Type, d: TempIdx, s: TempIdx) {
        self.emit_unary(Opcode::Mov, ty, d, s);
    }

    pub fn gen_movi(&mut self, ty: Type, d: TempIdx, val: u64) {
        self.emit(Opcode::Movi, ty, &[d.into(), Arg::value(val)]);
    }

    /// Fresh temp holding a 32-bit constant (sugar for `temp_new` + movi).
    pub fn const_i32(&mut self, val: u32) -> Result<TempIdx> {
        let t = self.temp_new(Type::I32, false)?;
        self.gen_movi(Type::I32, t, val as u64);
        Ok(t)
    }

    /// Fresh temp holding a 64-bit constant.
    pub fn const_i64(&mut self, val: u64) -> Result<TempIdx> {
        let t = self.temp_new(Type::I64, false)?;
        self.gen_movi(Type::I64, t, val);
        Ok(t)
    }

    // -- Arithmetic / logic / shifts --

    pub fn gen_add(&mut self, ty: Type, d: TempIdx, a: TempIdx, b: TempIdx) {
        self.emit_binary(Opcode::Add, ty, d, a, b);
    }

    pub fn gen_sub(&mut self, ty: Type, d: TempIdx, a: TempIdx, b: TempIdx) {
        self.emit_binary(Opcode::Sub, ty, d, a, b);
    }

    pub fn gen_mul(&mut self, ty: Type, d: TempIdx, a: TempIdx, b: TempIdx) {
        self.emit_binary(Opcode::Mul, ty, d, a, b);
    }

    pub fn gen_divs(&mut self, ty: Type, d: TempIdx, a: TempIdx, b: TempIdx) {
        self.emit_binary(Opcode::DivS, ty, d, a, b);
    }

    pub fn gen_divu(&mut self, ty: Type, d: TempIdx, a: TempIdx, b: TempIdx) {
        self.emit_binary(Opcode::DivU, ty, d, a, b);
    }

    pub fn gen_rems(&mut self, ty: Type, d: TempIdx, a: TempIdx, b: TempIdx) {
        self.emit_binary(Opcode::RemS, ty, d, a, b);
    }

    pub fn gen_remu(&mut self, ty: Type, d: TempIdx, a: TempIdx, b: TempIdx) {
        self.emit_binary(Opcode::RemU, ty, d, a, b);
    }

    pub fn gen_neg(&mut self, ty: Type, d: TempIdx, s: TempIdx) {
        self.emit_unary(Opcode::Neg, ty, d, s);
    }

    pub fn gen_not(&mut self, ty: Type, d: TempIdx, s: TempIdx) {
        self.emit_unary(Opcode::Not, ty, d, s);
    }

    pub fn gen_and(&mut self, ty: Type, d: TempIdx, a: TempIdx, b: TempIdx) {
        self.emit_binary(Opcode::And, ty, d, a, b);
    }

    pub fn gen_or(&mut self, ty: Type, d: TempIdx, a: TempIdx, b: TempIdx) {
        self.emit_binary(Opcode::Or, ty, d, a, b);
    }

    pub fn gen_xor(&mut self, ty: Type, d: TempIdx, a: TempIdx, b: TempIdx) {
        self.emit_binary(Opcode::Xor, ty, d, a, b);
    }

    pub fn gen_andc(&mut self, ty: Type, d: TempIdx, a: TempIdx, b: TempIdx) {
        self.emit_binary(Opcode::AndC, ty, d, a, b);
    }

    pub fn gen_orc(&mut self, ty: Type, d: TempIdx, a: TempIdx, b: TempIdx) {
        self.emit_binary(Opcode::OrC, ty, d, a, b);
    }

    pub fn gen_shl(&mut self, ty: Type, d: TempIdx, a: TempIdx, b: TempIdx) {
        self.emit_binary(Opcode::Shl, ty, d, a, b);
    }

    pub fn gen_shr(&mut self, ty: Type, d: TempIdx, a: TempIdx, b: TempIdx) {
        self.emit_binary(Opcode::Shr, ty, d, a, b);
    }

    pub fn gen_sar(&mut self, ty: Type, d: TempIdx, a: TempIdx, b: TempIdx) {
        self.emit_binary(Opcode::Sar, ty, d, a, b);
    }

    pub fn gen_rotl(&mut self, ty: Type, d: TempIdx, a: TempIdx, b: TempIdx) {
        self.emit_binary(Opcode::RotL, ty, d, a, b);
    }

    pub fn gen_rotr(&mut self, ty: Type, d: TempIdx, a: TempIdx, b: TempIdx) {
        self.emit_binary(Opcode::RotR, ty, d, a, b);
    }

    // -- Widening / double-word arithmetic --

    pub fn gen_muluh(&mut self, ty: Type, d: TempIdx, a: TempIdx, b: TempIdx) {
        self.emit_binary(Opcode::MulUH, ty, d, a, b);
    }

    pub fn gen_mulsh(&mut self, ty: Type, d: TempIdx, a: TempIdx, b: TempIdx) {
        self.emit_binary(Opcode::MulSH, ty, d, a, b);
    }

    pub fn gen_mulu2(&mut self, ty: Type, dl: TempIdx, dh: TempIdx, a: TempIdx, b: TempIdx) {
        self.emit(Opcode::MulU2, ty, &[dl.into(), dh.into(), a.into(), b.into()]);
    }

    pub fn gen_muls2(&mut self, ty: Type, dl: TempIdx, dh: TempIdx, a: TempIdx, b: TempIdx) {
        self.emit(Opcode::MulS2, ty, &[dl.into(), dh.into(), a.into(), b.into()]);
    }

    #[allow(clippy::too_many_arguments)]
    pub fn gen_add2(
        &mut self,
        ty: Type,
        dl: TempIdx,
        dh: TempIdx,
        al: TempIdx,
        ah: TempIdx,
        bl: TempIdx,
        bh: TempIdx,
    ) {
        self.emit(
            Opcode::Add2,
            ty,
            &[dl.into(), dh.into(), al.into(), ah.into(), bl.into(), bh.into()],
        );
    }

    #[allow(clippy::too_many_arguments)]
    pub fn gen_sub2(
        &mut self,
        ty: Type,
        dl: TempIdx,
        dh: TempIdx,
        al: TempIdx,
        ah: TempIdx,
        bl: TempIdx,
        bh: TempIdx,
    ) {
        self.emit(
            Opcode::Sub2,
            ty,
            &[dl.into(), dh.into(), al.into(), ah.into(), bl.into(), bh.into()],
        );
    }

    // -- Type conversion --

    /// Sign-extend i32 -> i64.
    pub fn gen_ext_i32_i64(&mut self, d: TempIdx, s: TempIdx) {
        self.emit_unary(Opcode::ExtI32I64, Type::I64, d, s);
    }

    /// Zero-extend i32 -> i64.
    pub fn gen_extu_i32_i64(&mut self, d: TempIdx, s: TempIdx) {
        self.emit_unary(Opcode::ExtUI32I64, Type::I64, d, s);
    }

    /// Truncate i64 -> i32 (low half).
    pub fn gen_extrl_i64_i32(&mut self, d: TempIdx, s: TempIdx) {
        self.emit_unary(Opcode::ExtrlI64I32, Type::I32, d, s);
    }

    /// Extract i64 -> i32 (high half).
    pub fn gen_extrh_i64_i32(&mut self, d: TempIdx, s: TempIdx) {
        self.emit_unary(Opcode::ExtrhI64I32, Type::I32, d, s);
    }

    // -- Conditions --

    pub fn gen_setcond(&mut self, ty: Type, d: TempIdx, a: TempIdx, b: TempIdx, cond: Cond) {
        self.emit(
            Opcode::SetCond,
            ty,
            &[d.into(), a.into(), b.into(), Arg::value(cond as u64)],
        );
    }

    pub fn gen_brcond(&mut self, ty: Type, a: TempIdx, b: TempIdx, cond: Cond, label: u32) {
        self.emit(
            Opcode::BrCond,
            ty,
            &[a.into(), b.into(), Arg::value(cond as u64), Arg::label(label)],
        );
    }

    /// 64-bit conditional branch on a 32-bit host, on split halves.
    #[allow(clippy::too_many_arguments)]
    pub fn gen_brcond2(
        &mut self,
        al: TempIdx,
        ah: TempIdx,
        bl: TempIdx,
        bh: TempIdx,
        cond: Cond,
        label: u32,
    ) {
        self.emit(
            Opcode::BrCond2,
            Type::I32,
            &[
                al.into(),
                ah.into(),
                bl.into(),
                bh.into(),
                Arg::value(cond as u64),
                Arg::label(label),
            ],
        );
    }

    /// 64-bit setcond on a 32-bit host, on split halves.
    #[allow(clippy::too_many_arguments)]
    pub fn gen_setcond2(
        &mut self,
        d: TempIdx,
        al: TempIdx,
        ah: TempIdx,
        bl: TempIdx,
        bh: TempIdx,
        cond: Cond,
    ) {
        self.emit(
            Opcode::SetCond2,
            Type::I32,
            &[
                d.into(),
                al.into(),
                ah.into(),
                bl.into(),
                bh.into(),
                Arg::value(cond as u64),
            ],
        );
    }

    // -- Host memory access --

    fn emit_ld(&mut self, opc: Opcode, ty: Type, d: TempIdx, base: TempIdx, offset: i64) {
        self.emit(opc, ty, &[d.into(), base.into(), Arg::value(offset as u64)]);
    }

    fn emit_st(&mut self, opc: Opcode, ty: Type, s: TempIdx, base: TempIdx, offset: i64) {
        self.emit(opc, ty, &[s.into(), base.into(), Arg::value(offset as u64)]);
    }

    pub fn gen_ld(&mut self, ty: Type, d: TempIdx, base: TempIdx, offset: i64) {
        self.emit_ld(Opcode::Ld, ty, d, base, offset);
    }

    pub fn gen_ld8u(&mut self, ty: Type, d: TempIdx, base: TempIdx, offset: i64) {
        self.emit_ld(Opcode::Ld8U, ty, d, base, offset);
    }

    pub fn gen_ld8s(&mut self, ty: Type, d: TempIdx, base: TempIdx, offset: i64) {
        self.emit_ld(Opcode::Ld8S, ty, d, base, offset);
    }

    pub fn gen_ld16u(&mut self, ty: Type, d: TempIdx, base: TempIdx, offset: i64) {
        self.emit_ld(Opcode::Ld16U, ty, d, base, offset);
    }

    pub fn gen_ld16s(&mut self, ty: Type, d: TempIdx, base: TempIdx, offset: i64) {
        self.emit_ld(Opcode::Ld16S, ty, d, base, offset);
    }

    pub fn gen_ld32u(&mut self, ty: Type, d: TempIdx, base: TempIdx, offset: i64) {
        self.emit_ld(Opcode::Ld32U, ty, d, base, offset);
    }

    pub fn gen_ld32s(&mut self, ty: Type, d: TempIdx, base: TempIdx, offset: i64) {
        self.emit_ld(Opcode::Ld32S, ty, d, base, offset);
    }

    pub fn gen_st(&mut self, ty: Type, s: TempIdx, base: TempIdx, offset: i64) {
        self.emit_st(Opcode::St, ty, s, base, offset);
    }

    pub fn gen_st8(&mut self, ty: Type, s: TempIdx, base: TempIdx, offset: i64) {
        self.emit_st(Opcode::St8, ty, s, base, offset);
    }

    pub fn gen_st16(&mut self, ty: Type, s: TempIdx, base: TempIdx, offset: i64) {
        self.emit_st(Opcode::St16, ty, s, base, offset);
    }

    pub fn gen_st32(&mut self, ty: Type, s: TempIdx, base: TempIdx, offset: i64) {
        self.emit_st(Opcode::St32, ty, s, base, offset);
    }

    // -- Guest memory access --

    pub fn gen_guest_ld(&mut self, ty: Type, d: TempIdx, addr: TempIdx, memop: u32) {
        self.emit(
            Opcode::GuestLd,
            ty,
            &[d.into(), addr.into(), Arg::value(memop as u64)],
        );
    }

    pub fn gen_guest_st(&mut self, ty: Type, val: TempIdx, addr: TempIdx, memop: u32) {
        self.emit(
            Opcode::GuestSt,
            ty,
            &[val.into(), addr.into(), Arg::value(memop as u64)],
        );
    }

    // -- Control flow --

    pub fn gen_br(&mut self, label: u32) {
        self.emit(Opcode::Br, self.host().word_type(), &[Arg::label(label)]);
    }

    /// Place a label: emits the `set_label` op and marks the label
    /// present in the stream.
    pub fn gen_set_label(&mut self, label: u32) {
        assert!(!self.label(label).present, "label placed twice");
        self.label_mut(label).present = true;
        let ty = self.host().word_type();
        self.emit(Opcode::SetLabel, ty, &[Arg::label(label)]);
    }

    pub fn gen_exit_tb(&mut self, val: u64) {
        self.emit(Opcode::ExitTb, self.host().word_type(), &[Arg::value(val)]);
    }

    pub fn gen_goto_tb(&mut self, slot: u32) {
        let ty = self.host().word_type();
        self.emit(Opcode::GotoTb, ty, &[Arg::value(slot as u64)]);
    }

    pub fn gen_goto_ptr(&mut self, ptr: TempIdx) {
        self.emit(Opcode::GotoPtr, self.host().word_type(), &[ptr.into()]);
    }

    pub fn gen_discard(&mut self, ty: Type, t: TempIdx) {
        self.emit(Opcode::Discard, ty, &[t.into()]);
    }

    pub fn gen_insn_start(&mut self, pc: u64) {
        let ty = self.host().word_type();
        self.emit(
            Opcode::InsnStart,
            ty,
            &[Arg::value(pc & 0xffff_ffff), Arg::value(pc >> 32)],
        );
    }

    // -- Call lowering --

    /// Emit a helper call as a single `call` op with ABI-correct argument
    /// layout.
    ///
    /// `sizemask` describes operand widths with the packed encoding used
    /// by helper registries: bit 0 set means the return value is 64-bit;
    /// for argument `i`, bit `(i+1)*2` set means 64-bit and bit
    /// `(i+1)*2 + 1` set means sign-extended when widened.
    ///
    /// On 32-bit hosts every 64-bit argument is split into two 32-bit
    /// halves in host endian order, padded to an aligned register pair
    /// with `Arg::DUMMY` when the ABI demands it; a 64-bit return takes
    /// two return slots. On hosts that require widened sub-word
    /// arguments, explicit extension ops are emitted in front of the
    /// call and the scratch temps are released afterwards.
    pub fn gen_call(
        &mut self,
        func: u64,
        flags: CallFlags,
        ret: Option<TempIdx>,
        args: &[TempIdx],
        sizemask: u64,
    ) -> Result<()> {
        let host = *self.host();
        let mut args: Vec<TempIdx> = args.to_vec();
        let mut scratch: Vec<TempIdx> = Vec::new();

        let arg_is_64 = |i: usize| sizemask & (1u64 << ((i + 1) * 2)) != 0;
        let arg_is_signed = |i: usize| sizemask & (2u64 << ((i + 1) * 2)) != 0;

        if host.reg_bits == 64 && host.extend_args {
            // Widen sub-word arguments before the call.
            for i in 0..args.len() {
                if !arg_is_64(i) {
                    let t = self.temp_new(Type::I64, false)?;
                    if arg_is_signed(i) {
                        self.gen_ext_i32_i64(t, args[i]);
                    } else {
                        self.gen_extu_i32_i64(t, args[i]);
                    }
                    args[i] = t;
                    scratch.push(t);
                }
            }
        }

        let mut slots: Vec<Arg> = Vec::with_capacity(MAX_OP_ARGS);

        let nb_rets: u8 = match ret {
            Some(r) if host.reg_bits < 64 && sizemask & 1 != 0 => {
                if host.big_endian {
                    slots.push(Arg::temp(r.high_half()));
                    slots.push(Arg::temp(r));
                } else {
                    slots.push(Arg::temp(r));
                    slots.push(Arg::temp(r.high_half()));
                }
                2
            }
            Some(r) => {
                slots.push(Arg::temp(r));
                1
            }
            None => 0,
        };

        let mut real_args: u8 = 0;
        for (i, &a) in args.iter().enumerate() {
            if host.reg_bits < 64 && arg_is_64(i) {
                if host.call_align_args && real_args & 1 != 0 {
                    slots.push(Arg::DUMMY);
                    real_args += 1;
                }
                if host.big_endian {
                    slots.push(Arg::temp(a.high_half()));
                    slots.push(Arg::temp(a));
                } else {
                    slots.push(Arg::temp(a));
                    slots.push(Arg::temp(a.high_half()));
                }
                real_args += 2;
                continue;
            }
            slots.push(Arg::temp(a));
            real_args += 1;
        }
        slots.push(Arg::value(func));
        slots.push(Arg::value(flags.bits() as u64));
        assert!(slots.len() <= MAX_OP_ARGS, "call argument vector overflow");

        let oi = self.emit(Opcode::Call, host.word_type(), &slots);
        let op = self.ops.get_mut(oi);
        op.callo = nb_rets;
        op.calli = real_args;

        for t in scratch {
            self.temp_free(t);
        }
        Ok(())
    }
}
