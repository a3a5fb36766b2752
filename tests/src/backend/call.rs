use tcgen_core::{CallFlags, Context, Error, HostLayout, Opcode, Type};

use crate::host::{code_buf, setup_64, HostOp, RecordingHost, ENV_REG, STACK_REG};
use tcgen_backend::Translator;

fn layout_32(big_endian: bool) -> HostLayout {
    HostLayout {
        reg_bits: 32,
        big_endian,
        call_align_args: true,
        extend_args: false,
    }
}

fn last_op(ctx: &Context) -> &tcgen_core::Op {
    ctx.ops.get(ctx.ops.last())
}

/// On a 32-bit host a 64-bit argument is split into endian-ordered
/// halves, padded to an aligned register pair.
#[test]
fn split_64bit_arg_with_alignment_padding() {
    let mut ctx = Context::with_layout(layout_32(false));
    let x = ctx.temp_new(Type::I32, false).unwrap();
    let y = ctx.temp_new(Type::I64, false).unwrap();

    ctx.gen_call(0xbeef, CallFlags::empty(), None, &[x, y], 1 << 4).unwrap();

    let op = last_op(&ctx);
    assert_eq!(op.opc, Opcode::Call);
    assert_eq!(op.callo, 0);
    assert_eq!(op.calli, 4);
    assert_eq!(op.args[0].as_temp(), x);
    assert!(op.args[1].is_dummy(), "pair alignment padding");
    assert_eq!(op.args[2].as_temp(), y);
    assert_eq!(op.args[3].as_temp(), y.high_half());
    assert_eq!(op.args[4].raw(), 0xbeef);
    assert_eq!(op.args[5].raw(), 0);
}

#[test]
fn split_64bit_arg_big_endian_order() {
    let mut ctx = Context::with_layout(layout_32(true));
    let x = ctx.temp_new(Type::I32, false).unwrap();
    let y = ctx.temp_new(Type::I64, false).unwrap();

    ctx.gen_call(0xbeef, CallFlags::empty(), None, &[x, y], 1 << 4).unwrap();

    let op = last_op(&ctx);
    assert_eq!(op.args[2].as_temp(), y.high_half());
    assert_eq!(op.args[3].as_temp(), y);
}

#[test]
fn wide_return_takes_two_slots_on_32bit() {
    let mut ctx = Context::with_layout(layout_32(false));
    let r = ctx.temp_new(Type::I64, false).unwrap();

    ctx.gen_call(0xbeef, CallFlags::empty(), Some(r), &[], 1).unwrap();

    let op = last_op(&ctx);
    assert_eq!(op.callo, 2);
    assert_eq!(op.calli, 0);
    assert_eq!(op.args[0].as_temp(), r);
    assert_eq!(op.args[1].as_temp(), r.high_half());
}

/// Hosts that want widened sub-word arguments get explicit extension ops
/// in front of the call; the scratch temps are recycled.
#[test]
fn sub_word_args_are_extended_when_required() {
    let layout = HostLayout {
        extend_args: true,
        ..HostLayout::default()
    };
    let mut ctx = Context::with_layout(layout);
    let a = ctx.temp_new(Type::I32, false).unwrap();
    let b = ctx.temp_new(Type::I32, false).unwrap();

    // a signed, b unsigned.
    ctx.gen_call(0xbeef, CallFlags::empty(), None, &[a, b], 2 << 2).unwrap();

    let mut opcs = Vec::new();
    let mut oi = ctx.ops.first();
    while oi != 0 {
        opcs.push(ctx.ops.get(oi).opc);
        oi = ctx.ops.get(oi).next;
    }
    assert_eq!(opcs, vec![Opcode::ExtI32I64, Opcode::ExtUI32I64, Opcode::Call]);

    let op = last_op(&ctx);
    assert_ne!(op.args[0].as_temp(), a, "argument replaced by the widened temp");
    assert_ne!(op.args[1].as_temp(), b);

    // The widened scratch temps were freed for reuse.
    let before = ctx.nb_temps();
    ctx.temp_new(Type::I64, false).unwrap();
    ctx.temp_new(Type::I64, false).unwrap();
    assert_eq!(ctx.nb_temps(), before, "scratch temps recycled");
}

/// Full lowering: six register arguments, one stack argument, and a
/// return value in the first ABI output register.
#[test]
fn call_lowering_places_register_and_stack_args() {
    let (tr, mut ctx) = setup_64();
    let env = ctx.global_reg_new(Type::I64, ENV_REG, "env").unwrap();

    let args: Vec<_> = (0..7u64)
        .map(|i| {
            let t = ctx.temp_new(Type::I64, false).unwrap();
            ctx.gen_movi(Type::I64, t, i);
            t
        })
        .collect();
    let ret = ctx.temp_new(Type::I64, false).unwrap();

    let mut sizemask = 1u64;
    for i in 0..7 {
        sizemask |= 1 << ((i + 1) * 2);
    }
    ctx.gen_call(0xfeed, CallFlags::empty(), Some(ret), &args, sizemask).unwrap();
    ctx.gen_st(Type::I64, ret, env, 0);
    ctx.gen_exit_tb(0);

    let mut buf = code_buf();
    tr.translate(&mut ctx, &mut buf).unwrap();

    let host = tr.host();
    let events = host.events();

    // The first six arguments land in the ABI registers.
    for i in 0..6u64 {
        assert!(
            events
                .iter()
                .any(|e| matches!(e, HostOp::Movi { dst, val, .. } if *dst == i as u8 && *val == i)),
            "argument {i} materialised in its ABI register"
        );
    }
    // The seventh goes to the outgoing stack slot.
    let stack_store = events
        .iter()
        .position(|e| matches!(e, HostOp::St { base: STACK_REG, offset: 0, .. }))
        .expect("stack argument stored");
    let call = events
        .iter()
        .position(|e| matches!(e, HostOp::Call { target: 0xfeed }))
        .unwrap();
    assert!(stack_store < call);

    // The result comes back in the first output register and reaches
    // the CPU state.
    let store = events
        .iter()
        .position(|e| matches!(e, HostOp::Op { opc: Opcode::St, .. }))
        .unwrap();
    assert!(call < store);
}

/// Needing more outgoing stack space than the target reserves aborts
/// the TB.
#[test]
fn call_stack_overflow_is_detected() {
    let mut host = RecordingHost::new_64();
    host.desc.static_call_args_size = 0;
    let tr = Translator::new(host).unwrap();
    let mut ctx = Context::new();
    tr.init_context(&mut ctx).unwrap();
    let env = ctx.global_reg_new(Type::I64, ENV_REG, "env").unwrap();

    let args: Vec<_> = (0..7u64)
        .map(|i| {
            let t = ctx.temp_new(Type::I64, false).unwrap();
            ctx.gen_movi(Type::I64, t, i);
            t
        })
        .collect();
    let mut sizemask = 0u64;
    for i in 0..7 {
        sizemask |= 1 << ((i + 1) * 2);
    }
    ctx.gen_call(0xfeed, CallFlags::empty(), None, &args, sizemask).unwrap();
    ctx.gen_st(Type::I64, args[0], env, 0);
    ctx.gen_exit_tb(0);

    let mut buf = code_buf();
    assert_eq!(
        tr.translate(&mut ctx, &mut buf),
        Err(Error::CallStackOverflow { needed: 16, reserved: 0 })
    );
}

/// Dummy padding slots are invisible to liveness and lowering.
#[test]
fn dummy_args_pass_through_lowering() {
    let host = RecordingHost::new_32();
    let tr = Translator::new(host).unwrap();
    let mut ctx = Context::new();
    tr.init_context(&mut ctx).unwrap();
    let env = ctx.global_reg_new(Type::I32, ENV_REG, "env").unwrap();

    let x = ctx.temp_new(Type::I32, false).unwrap();
    let y = ctx.temp_new(Type::I64, false).unwrap();
    ctx.gen_ld(Type::I32, x, env, 0);
    ctx.gen_ld(Type::I32, y, env, 4);
    ctx.gen_ld(Type::I32, y.high_half(), env, 8);
    ctx.gen_call(0xbeef, CallFlags::empty(), None, &[x, y], 1 << 4).unwrap();
    ctx.gen_exit_tb(0);

    let mut buf = code_buf();
    tr.translate(&mut ctx, &mut buf).unwrap();

    assert_eq!(
        tr.host().count(|e| matches!(e, HostOp::Call { target: 0xbeef })),
        1
    );
}
