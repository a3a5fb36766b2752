use tcgen_backend::liveness::{liveness_pass_1, liveness_pass_2};
use tcgen_core::{CallFlags, Context, LifeData, Opcode, Type};

use crate::host::{setup_32, setup_64, ENV_REG};

fn state_buf(ctx: &Context) -> Vec<u8> {
    vec![0; (ctx.nb_temps() + ctx.nb_indirects()) as usize]
}

fn opcodes(ctx: &Context) -> Vec<Opcode> {
    let mut out = Vec::new();
    let mut oi = ctx.ops.first();
    while oi != 0 {
        out.push(ctx.ops.get(oi).opc);
        oi = ctx.ops.get(oi).next;
    }
    out
}

fn lives(ctx: &Context) -> Vec<LifeData> {
    let mut out = Vec::new();
    let mut oi = ctx.ops.first();
    while oi != 0 {
        out.push(ctx.ops.get(oi).life);
        oi = ctx.ops.get(oi).next;
    }
    out
}

/// An op computing into an unused temp is deleted outright.
#[test]
fn dead_add_is_removed() {
    let (tr, mut ctx) = setup_64();
    let env = ctx.global_reg_new(Type::I64, ENV_REG, "env").unwrap();
    let g0 = ctx.global_mem_new(Type::I64, env, 0, "g0").unwrap();
    let g1 = ctx.global_mem_new(Type::I64, env, 8, "g1").unwrap();

    let t = ctx.temp_new(Type::I64, false).unwrap();
    ctx.gen_add(Type::I64, t, g0, g1);
    ctx.gen_exit_tb(0);

    let mut state = state_buf(&ctx);
    liveness_pass_1(&mut ctx, &mut state, tr.target());

    assert_eq!(opcodes(&ctx), vec![Opcode::ExitTb]);
}

#[test]
fn dead_movi_is_removed() {
    let (tr, mut ctx) = setup_64();
    let t = ctx.const_i64(42).unwrap();
    let _ = t;
    ctx.gen_exit_tb(0);

    let mut state = state_buf(&ctx);
    liveness_pass_1(&mut ctx, &mut state, tr.target());
    assert_eq!(opcodes(&ctx), vec![Opcode::ExitTb]);
}

/// add2 whose high output is unused becomes a plain add, and the loads
/// feeding the high halves die with it.
#[test]
fn add2_narrows_when_high_is_dead() {
    let (tr, mut ctx) = setup_32();
    let env = ctx.global_reg_new(Type::I32, ENV_REG, "env").unwrap();

    let a = ctx.temp_new(Type::I64, false).unwrap();
    let b = ctx.temp_new(Type::I64, false).unwrap();
    let d = ctx.temp_new(Type::I64, false).unwrap();
    let (al, ah) = (a, a.high_half());
    let (bl, bh) = (b, b.high_half());
    let (dl, dh) = (d, d.high_half());

    ctx.gen_ld(Type::I32, al, env, 0);
    ctx.gen_ld(Type::I32, ah, env, 4);
    ctx.gen_ld(Type::I32, bl, env, 8);
    ctx.gen_ld(Type::I32, bh, env, 12);
    ctx.gen_add2(Type::I32, dl, dh, al, ah, bl, bh);
    ctx.gen_st(Type::I32, dl, env, 16);
    ctx.gen_exit_tb(0);

    let mut state = state_buf(&ctx);
    liveness_pass_1(&mut ctx, &mut state, tr.target());

    assert_eq!(
        opcodes(&ctx),
        vec![Opcode::Ld, Opcode::Ld, Opcode::Add, Opcode::St, Opcode::ExitTb]
    );

    // Find the rewritten op and check the compacted args.
    let mut oi = ctx.ops.first();
    while ctx.ops.get(oi).opc != Opcode::Add {
        oi = ctx.ops.get(oi).next;
    }
    let add = ctx.ops.get(oi);
    assert_eq!(add.args[0].as_temp(), dl);
    assert_eq!(add.args[1].as_temp(), al);
    assert_eq!(add.args[2].as_temp(), bl);
}

#[test]
fn add2_with_both_outputs_dead_is_removed() {
    let (tr, mut ctx) = setup_32();
    let env = ctx.global_reg_new(Type::I32, ENV_REG, "env").unwrap();
    let a = ctx.temp_new(Type::I64, false).unwrap();
    let d = ctx.temp_new(Type::I64, false).unwrap();

    ctx.gen_ld(Type::I32, a, env, 0);
    ctx.gen_ld(Type::I32, a.high_half(), env, 4);
    ctx.gen_add2(
        Type::I32,
        d,
        d.high_half(),
        a,
        a.high_half(),
        a,
        a.high_half(),
    );
    ctx.gen_exit_tb(0);

    let mut state = state_buf(&ctx);
    liveness_pass_1(&mut ctx, &mut state, tr.target());
    assert_eq!(opcodes(&ctx), vec![Opcode::ExitTb]);
}

/// mulu2 with a dead high half is a plain mul; with a dead low half it
/// becomes muluh when the target has it.
#[test]
fn mul2_narrowing_picks_the_live_half() {
    let (tr, mut ctx) = setup_64();
    let env = ctx.global_reg_new(Type::I64, ENV_REG, "env").unwrap();

    let a = ctx.temp_new(Type::I64, false).unwrap();
    let b = ctx.temp_new(Type::I64, false).unwrap();
    let lo = ctx.temp_new(Type::I64, false).unwrap();
    let hi = ctx.temp_new(Type::I64, false).unwrap();

    ctx.gen_ld(Type::I64, a, env, 0);
    ctx.gen_ld(Type::I64, b, env, 8);
    ctx.gen_mulu2(Type::I64, lo, hi, a, b);
    ctx.gen_st(Type::I64, hi, env, 16);
    ctx.gen_exit_tb(0);

    let mut state = state_buf(&ctx);
    liveness_pass_1(&mut ctx, &mut state, tr.target());

    assert!(opcodes(&ctx).contains(&Opcode::MulUH));
    let mut oi = ctx.ops.first();
    while ctx.ops.get(oi).opc != Opcode::MulUH {
        oi = ctx.ops.get(oi).next;
    }
    let op = ctx.ops.get(oi);
    assert_eq!(op.args[0].as_temp(), hi);
    assert_eq!(op.args[1].as_temp(), a);
    assert_eq!(op.args[2].as_temp(), b);
}

#[test]
fn muls2_keeps_wide_form_without_mulsh() {
    // The 32-bit profile has no mulsh.
    let (tr, mut ctx) = setup_32();
    let env = ctx.global_reg_new(Type::I32, ENV_REG, "env").unwrap();

    let a = ctx.temp_new(Type::I32, false).unwrap();
    let b = ctx.temp_new(Type::I32, false).unwrap();
    let lo = ctx.temp_new(Type::I32, false).unwrap();
    let hi = ctx.temp_new(Type::I32, false).unwrap();

    ctx.gen_ld(Type::I32, a, env, 0);
    ctx.gen_ld(Type::I32, b, env, 4);
    ctx.gen_muls2(Type::I32, lo, hi, a, b);
    ctx.gen_st(Type::I32, hi, env, 8);
    ctx.gen_exit_tb(0);

    let mut state = state_buf(&ctx);
    liveness_pass_1(&mut ctx, &mut state, tr.target());

    let opcs = opcodes(&ctx);
    assert!(opcs.contains(&Opcode::MulS2), "{opcs:?}");
    // The dead low output is only flagged, not compacted away.
    let mut oi = ctx.ops.first();
    while ctx.ops.get(oi).opc != Opcode::MulS2 {
        oi = ctx.ops.get(oi).next;
    }
    assert!(ctx.ops.get(oi).life.is_dead(0));
    assert!(!ctx.ops.get(oi).life.is_dead(1));
}

#[test]
fn pure_call_with_dead_results_is_removed() {
    let (tr, mut ctx) = setup_64();
    let ret = ctx.temp_new(Type::I64, false).unwrap();
    ctx.gen_call(
        0x9000,
        CallFlags::NO_SIDE_EFFECTS
            | CallFlags::NO_READ_GLOBALS
            | CallFlags::NO_WRITE_GLOBALS,
        Some(ret),
        &[],
        1,
    )
    .unwrap();
    ctx.gen_exit_tb(0);

    let mut state = state_buf(&ctx);
    liveness_pass_1(&mut ctx, &mut state, tr.target());
    assert_eq!(opcodes(&ctx), vec![Opcode::ExitTb]);
}

#[test]
fn call_life_bits_and_global_state() {
    let (tr, mut ctx) = setup_64();
    let env = ctx.global_reg_new(Type::I64, ENV_REG, "env").unwrap();
    let g0 = ctx.global_mem_new(Type::I64, env, 0, "g0").unwrap();

    let ret = ctx.temp_new(Type::I64, false).unwrap();
    ctx.gen_call(0x9000, CallFlags::empty(), Some(ret), &[g0], 1 | (1 << 2)).unwrap();
    ctx.gen_st(Type::I64, ret, env, 8);
    ctx.gen_exit_tb(0);

    let mut state = state_buf(&ctx);
    liveness_pass_1(&mut ctx, &mut state, tr.target());

    let mut oi = ctx.ops.first();
    while ctx.ops.get(oi).opc != Opcode::Call {
        oi = ctx.ops.get(oi).next;
    }
    let call = ctx.ops.get(oi);
    assert!(!call.life.is_dead(0), "result is read by the store");
    assert!(call.life.is_dead(1), "g0's value dies into the helper");
}

#[test]
fn discard_kills_the_definition() {
    let (tr, mut ctx) = setup_64();
    let env = ctx.global_reg_new(Type::I64, ENV_REG, "env").unwrap();
    let t = ctx.temp_new(Type::I64, false).unwrap();

    ctx.gen_ld(Type::I64, t, env, 0);
    ctx.gen_discard(Type::I64, t);
    ctx.gen_exit_tb(0);

    let mut state = state_buf(&ctx);
    liveness_pass_1(&mut ctx, &mut state, tr.target());
    assert_eq!(opcodes(&ctx), vec![Opcode::Discard, Opcode::ExitTb]);
}

/// Running pass 1 twice over an unchanged stream yields identical
/// annotations.
#[test]
fn pass_1_is_idempotent() {
    let (tr, mut ctx) = setup_64();
    let env = ctx.global_reg_new(Type::I64, ENV_REG, "env").unwrap();
    let g0 = ctx.global_mem_new(Type::I64, env, 0, "g0").unwrap();
    let g1 = ctx.global_mem_new(Type::I64, env, 8, "g1").unwrap();

    let l = ctx.gen_label().unwrap();
    let t = ctx.temp_new(Type::I64, false).unwrap();
    ctx.gen_set_label(l);
    ctx.gen_add(Type::I64, t, g0, g1);
    ctx.gen_mov(Type::I64, g0, t);
    let dead = ctx.temp_new(Type::I64, false).unwrap();
    ctx.gen_mul(Type::I64, dead, g1, g1);
    ctx.gen_brcond(Type::I64, g0, g1, tcgen_core::Cond::Lt, l);
    ctx.gen_exit_tb(0);

    let mut state = state_buf(&ctx);
    liveness_pass_1(&mut ctx, &mut state, tr.target());
    let first_ops = opcodes(&ctx);
    let first_lives = lives(&ctx);

    liveness_pass_1(&mut ctx, &mut state, tr.target());
    assert_eq!(opcodes(&ctx), first_ops);
    assert_eq!(lives(&ctx), first_lives);
}

/// Pass 2 rewrites every reference to an indirect global into its shadow
/// and reaches a fixpoint.
#[test]
fn indirect_globals_are_lowered() {
    let (tr, mut ctx) = setup_64();
    let env = ctx.global_reg_new(Type::I64, ENV_REG, "env").unwrap();
    let ptr = ctx.global_mem_new(Type::I64, env, 0x10, "ptr").unwrap();
    let g = ctx.global_mem_new(Type::I64, ptr, 0, "g").unwrap();
    assert_eq!(ctx.nb_indirects(), 1);

    let t = ctx.temp_new(Type::I64, false).unwrap();
    ctx.gen_add(Type::I64, t, g, g);
    ctx.gen_mov(Type::I64, g, t);
    ctx.gen_exit_tb(0);

    let mut state = state_buf(&ctx);
    liveness_pass_1(&mut ctx, &mut state, tr.target());
    assert!(liveness_pass_2(&mut ctx, &mut state).unwrap());

    // The load of the shadow sits in front of the add, the store behind
    // the mov.
    assert_eq!(
        opcodes(&ctx),
        vec![Opcode::Ld, Opcode::Add, Opcode::Mov, Opcode::St, Opcode::ExitTb]
    );

    // No argument slot refers to the indirect global any more.
    let mut oi = ctx.ops.first();
    while oi != 0 {
        let op = ctx.ops.get(oi);
        for i in 0..op.nb_oargs() + op.nb_iargs() {
            assert_ne!(op.args[i].as_temp(), g, "op still references g");
        }
        oi = op.next;
    }

    // The inserted accesses go through the pointer global's home.
    let first = ctx.ops.get(ctx.ops.first());
    assert_eq!(first.args[1].as_temp(), ptr);
    assert_eq!(first.args[2].raw(), 0);

    // Second run: nothing left to do.
    liveness_pass_1(&mut ctx, &mut state, tr.target());
    assert!(!liveness_pass_2(&mut ctx, &mut state).unwrap());
}

#[test]
fn direct_globals_are_untouched_by_pass_2() {
    let (tr, mut ctx) = setup_64();
    let env = ctx.global_reg_new(Type::I64, ENV_REG, "env").unwrap();
    let g0 = ctx.global_mem_new(Type::I64, env, 0, "g0").unwrap();

    let t = ctx.temp_new(Type::I64, false).unwrap();
    ctx.gen_add(Type::I64, t, g0, g0);
    ctx.gen_mov(Type::I64, g0, t);
    ctx.gen_exit_tb(0);

    let mut state = state_buf(&ctx);
    liveness_pass_1(&mut ctx, &mut state, tr.target());
    assert!(!liveness_pass_2(&mut ctx, &mut state).unwrap());
}
