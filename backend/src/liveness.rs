use tcgen_core::{Arg, CallFlags, Context, LifeData, OpFlags, Opcode, Result, TempIdx};

use crate::host::TargetDesc;

/// Per-temp liveness state bits. `DEAD` means no later op reads the
/// value; `MEM` means the value is still wanted in memory further down
/// the stream (so the defining op must sync it).
pub const TS_DEAD: u8 = 1;
pub const TS_MEM: u8 = 2;

/// End-of-TB state: every temp dead, globals additionally pending in
/// memory.
fn la_func_end(ctx: &Context, temp_state: &mut [u8]) {
    let nb_globals = ctx.nb_globals() as usize;
    let nb_temps = ctx.nb_temps() as usize;
    for s in &mut temp_state[..nb_temps] {
        *s = TS_DEAD;
    }
    for s in &mut temp_state[..nb_globals] {
        *s |= TS_MEM;
    }
}

/// End-of-basic-block state: registers no longer carry values, so
/// globals and locals must be back in memory and everything else dies.
fn la_bb_end(ctx: &Context, temp_state: &mut [u8]) {
    let nb_globals = ctx.nb_globals() as usize;
    let nb_temps = ctx.nb_temps() as usize;
    for s in &mut temp_state[..nb_globals] {
        *s = TS_DEAD | TS_MEM;
    }
    for i in nb_globals..nb_temps {
        temp_state[i] = if ctx.temp(TempIdx(i as u32)).is_local() {
            TS_DEAD | TS_MEM
        } else {
            TS_DEAD
        };
    }
}

/// Shared keep-path: record per-arg dead/sync bits for an op that stays,
/// and propagate state upwards. `nb_oargs`/`nb_iargs` are passed in
/// because wide-op narrowing and calls override the static counts.
fn record_life(
    ctx: &mut Context,
    temp_state: &mut [u8],
    oi: u32,
    nb_oargs: usize,
    nb_iargs: usize,
) -> LifeData {
    let nb_globals = ctx.nb_globals() as usize;
    let (flags, args) = {
        let op = ctx.ops.get(oi);
        (op.opc.def().flags, op.args)
    };
    let mut life = LifeData::default();

    // Outputs are defined here, so predecessors see them dead.
    for i in 0..nb_oargs {
        let a = args[i].raw() as usize;
        if temp_state[a] & TS_DEAD != 0 {
            life.set_dead(i);
        }
        if temp_state[a] & TS_MEM != 0 {
            life.set_sync(i);
        }
        temp_state[a] = TS_DEAD;
    }

    if flags.contains(OpFlags::BB_END) {
        la_bb_end(ctx, temp_state);
    } else if flags.contains(OpFlags::SIDE_EFFECTS) {
        // The op may fault; globals must be readable from memory.
        for s in &mut temp_state[..nb_globals] {
            *s |= TS_MEM;
        }
    }

    for i in nb_oargs..nb_oargs + nb_iargs {
        let a = args[i].raw() as usize;
        if temp_state[a] & TS_DEAD != 0 {
            life.set_dead(i);
        }
    }
    for i in nb_oargs..nb_oargs + nb_iargs {
        // Inputs are live for every preceding op.
        temp_state[args[i].raw() as usize] &= !TS_DEAD;
    }

    life
}

/// Backward liveness analysis.
///
/// Walks the op list from tail to head, marking per-arg "dies here" and
/// "sync to memory here" bits, deleting ops whose outputs are all dead,
/// and narrowing double-word arithmetic whose high (or, for multiplies,
/// low) result is unused.
pub fn liveness_pass_1(ctx: &mut Context, temp_state: &mut [u8], target: &TargetDesc) {
    let nb_temps = ctx.nb_temps() as usize;
    assert!(temp_state.len() >= nb_temps);

    la_func_end(ctx, temp_state);

    let mut oi = ctx.ops.last();
    while oi != 0 {
        let oi_prev = ctx.ops.get(oi).prev;
        let opc = ctx.ops.get(oi).opc;

        match opc {
            Opcode::Nop | Opcode::InsnStart => {}

            Opcode::Discard => {
                let a = ctx.ops.get(oi).args[0].raw() as usize;
                temp_state[a] = TS_DEAD;
                ctx.ops.get_mut(oi).life = LifeData::default();
            }

            Opcode::Call => {
                let op = ctx.ops.get(oi);
                let nb_oargs = op.callo as usize;
                let nb_iargs = op.calli as usize;
                let args = op.args;
                let call_flags =
                    CallFlags::from_bits_truncate(args[nb_oargs + nb_iargs + 1].raw() as u32);

                // Pure helpers go away when nothing uses their results.
                if call_flags.contains(CallFlags::NO_SIDE_EFFECTS)
                    && (0..nb_oargs).all(|i| temp_state[args[i].raw() as usize] == TS_DEAD)
                {
                    ctx.ops.remove(oi);
                    oi = oi_prev;
                    continue;
                }

                let mut life = LifeData::default();
                for (i, arg) in args.iter().enumerate().take(nb_oargs) {
                    let a = arg.raw() as usize;
                    if temp_state[a] & TS_DEAD != 0 {
                        life.set_dead(i);
                    }
                    if temp_state[a] & TS_MEM != 0 {
                        life.set_sync(i);
                    }
                    temp_state[a] = TS_DEAD;
                }

                let nb_globals = ctx.nb_globals() as usize;
                if !call_flags
                    .intersects(CallFlags::NO_WRITE_GLOBALS | CallFlags::NO_READ_GLOBALS)
                {
                    // Helper may write globals: they go back to memory.
                    for s in &mut temp_state[..nb_globals] {
                        *s = TS_DEAD | TS_MEM;
                    }
                } else if !call_flags.contains(CallFlags::NO_READ_GLOBALS) {
                    // Helper may read globals: sync them before the call.
                    for s in &mut temp_state[..nb_globals] {
                        *s |= TS_MEM;
                    }
                }

                for (i, arg) in args
                    .iter()
                    .enumerate()
                    .take(nb_oargs + nb_iargs)
                    .skip(nb_oargs)
                {
                    if !arg.is_dummy() && temp_state[arg.raw() as usize] & TS_DEAD != 0 {
                        life.set_dead(i);
                    }
                }
                for arg in args.iter().take(nb_oargs + nb_iargs).skip(nb_oargs) {
                    if !arg.is_dummy() {
                        temp_state[arg.raw() as usize] &= !TS_DEAD;
                    }
                }

                ctx.ops.get_mut(oi).life = life;
            }

            Opcode::Add2 | Opcode::Sub2 => {
                let args = ctx.ops.get(oi).args;
                let life;
                if temp_state[args[1].raw() as usize] == TS_DEAD {
                    if temp_state[args[0].raw() as usize] == TS_DEAD {
                        ctx.ops.remove(oi);
                        oi = oi_prev;
                        continue;
                    }
                    // High result unused: narrow to the single-word op,
                    // compacting args in place.
                    let narrow = if opc == Opcode::Add2 { Opcode::Add } else { Opcode::Sub };
                    let op = ctx.ops.get_mut(oi);
                    op.opc = narrow;
                    op.args[1] = op.args[2];
                    op.args[2] = op.args[4];
                    op.nargs = 3;
                    life = record_life(ctx, temp_state, oi, 1, 2);
                } else {
                    life = record_life(ctx, temp_state, oi, 2, 4);
                }
                ctx.ops.get_mut(oi).life = life;
            }

            Opcode::MulU2 | Opcode::MulS2 => {
                let args = ctx.ops.get(oi).args;
                let (high_opc, have_high) = if opc == Opcode::MulU2 {
                    (Opcode::MulUH, target.has_muluh)
                } else {
                    (Opcode::MulSH, target.has_mulsh)
                };
                let life;
                if temp_state[args[1].raw() as usize] == TS_DEAD {
                    if temp_state[args[0].raw() as usize] == TS_DEAD {
                        ctx.ops.remove(oi);
                        oi = oi_prev;
                        continue;
                    }
                    // High half unused: plain multiply.
                    let op = ctx.ops.get_mut(oi);
                    op.opc = Opcode::Mul;
                    op.args[1] = op.args[2];
                    op.args[2] = op.args[3];
                    op.nargs = 3;
                    life = record_life(ctx, temp_state, oi, 1, 2);
                } else if temp_state[args[0].raw() as usize] == TS_DEAD && have_high {
                    // Low half unused and the target can compute the
                    // high half directly.
                    let op = ctx.ops.get_mut(oi);
                    op.opc = high_opc;
                    op.args[0] = op.args[1];
                    op.args[1] = op.args[2];
                    op.args[2] = op.args[3];
                    op.nargs = 3;
                    life = record_life(ctx, temp_state, oi, 1, 2);
                } else {
                    life = record_life(ctx, temp_state, oi, 2, 2);
                }
                ctx.ops.get_mut(oi).life = life;
            }

            _ => {
                let def = opc.def();
                let nb_oargs = def.nb_oargs as usize;
                let nb_iargs = def.nb_iargs as usize;
                let args = ctx.ops.get(oi).args;

                // An op without side effects whose outputs are all dead
                // is removed. nb_oargs == 0 implies side effects.
                if !def.flags.contains(OpFlags::SIDE_EFFECTS)
                    && nb_oargs != 0
                    && (0..nb_oargs).all(|i| temp_state[args[i].raw() as usize] == TS_DEAD)
                {
                    ctx.ops.remove(oi);
                } else {
                    let life = record_life(ctx, temp_state, oi, nb_oargs, nb_iargs);
                    ctx.ops.get_mut(oi).life = life;
                }
            }
        }

        oi = oi_prev;
    }
}

/// Forward pass converting indirect globals to direct temps.
///
/// Each indirect global gets a shadow direct temp. Reads load the shadow
/// from the global's memory home when it is not already live; writes
/// store it back when pass 1 flagged a sync. Returns whether any op was
/// rewritten; if so, pass 1 must run again so the life bits describe the
/// new stream.
pub fn liveness_pass_2(ctx: &mut Context, temp_state: &mut [u8]) -> Result<bool> {
    let nb_globals = ctx.nb_globals() as usize;
    let mut changes = false;

    // Shadow temp per indirect global; slot 0 is a global, so index 0
    // doubles as "none".
    // SAFETY: the slice lives until the context's next func_start; arena
    // chunk storage never moves, and the liveness state buffer was
    // allocated separately so nothing overlaps.
    let dir_temps: &mut [u32] = unsafe { ctx.arena_mut().alloc_u32s(nb_globals) };
    for (i, dir) in dir_temps.iter_mut().enumerate() {
        let t = ctx.temp(TempIdx(i as u32));
        if t.indirect {
            let (ty, base_ty) = (t.ty, t.base_type);
            *dir = ctx.temp_new_shadow(ty, base_ty)?.0;
        }
    }

    for s in &mut temp_state[..nb_globals] {
        *s = TS_DEAD;
    }

    let mut oi = ctx.ops.first();
    while oi != 0 {
        let op = ctx.ops.get(oi).clone();
        let oi_next = op.next;
        let nb_oargs = op.nb_oargs();
        let nb_iargs = op.nb_iargs();
        let life = op.life;

        // Non-call ops behave like calls with flags implied by their
        // own: a BB end saves globals, a side-effecting op syncs them,
        // anything else leaves them alone.
        let call_flags = if op.opc == Opcode::Call {
            CallFlags::from_bits_truncate(op.args[nb_oargs + nb_iargs + 1].raw() as u32)
        } else {
            let flags = op.opc.def().flags;
            if flags.contains(OpFlags::BB_END) {
                CallFlags::empty()
            } else if flags.contains(OpFlags::SIDE_EFFECTS) {
                CallFlags::NO_WRITE_GLOBALS
            } else {
                CallFlags::NO_READ_GLOBALS | CallFlags::NO_WRITE_GLOBALS
            }
        };

        // Make input shadows available. The unsigned compare also skips
        // dummy call slots.
        for i in nb_oargs..nb_oargs + nb_iargs {
            let argv = op.args[i].raw();
            if (argv as usize) < nb_globals {
                let g = argv as usize;
                let dir = dir_temps[g];
                if dir != 0 && temp_state[g] == TS_DEAD {
                    let its = ctx.temp(TempIdx(g as u32));
                    let (ty, base, offset) =
                        (its.ty, its.mem_base.unwrap(), its.mem_offset);
                    let li = ctx.ops.insert_before(oi, Opcode::Ld, ty);
                    let lop = ctx.ops.get_mut(li);
                    lop.args[0] = Arg::temp(TempIdx(dir));
                    lop.args[1] = Arg::temp(base);
                    lop.args[2] = Arg::value(offset as u64);
                    lop.nargs = 3;
                    // Loaded, but still synced with memory.
                    temp_state[g] = TS_MEM;
                }
            }
        }

        // Rewrite inputs to the shadows and track deaths so a later read
        // reloads.
        for i in nb_oargs..nb_oargs + nb_iargs {
            let argv = op.args[i].raw();
            if (argv as usize) < nb_globals {
                let g = argv as usize;
                let dir = dir_temps[g];
                if dir != 0 {
                    ctx.ops.get_mut(oi).args[i] = Arg::temp(TempIdx(dir));
                    changes = true;
                    if life.is_dead(i) {
                        temp_state[g] = TS_DEAD;
                    }
                }
            }
        }

        // Pass 1 must have put indirect globals in the state the op's
        // global handling expects.
        if call_flags.contains(CallFlags::NO_READ_GLOBALS) {
            // Nothing to check.
        } else if call_flags.contains(CallFlags::NO_WRITE_GLOBALS) {
            for (g, &dir) in dir_temps.iter().enumerate() {
                debug_assert!(dir == 0 || temp_state[g] != 0);
            }
        } else {
            for (g, &dir) in dir_temps.iter().enumerate() {
                debug_assert!(dir == 0 || temp_state[g] == TS_DEAD);
            }
        }

        // Outputs become available in their shadows.
        for i in 0..nb_oargs {
            let argv = op.args[i].raw();
            if (argv as usize) >= nb_globals {
                continue;
            }
            let g = argv as usize;
            let dir = dir_temps[g];
            if dir == 0 {
                continue;
            }
            ctx.ops.get_mut(oi).args[i] = Arg::temp(TempIdx(dir));
            changes = true;

            // Live and modified.
            temp_state[g] = 0;

            if life.is_sync(i) {
                let its = ctx.temp(TempIdx(g as u32));
                let (ty, base, offset) = (its.ty, its.mem_base.unwrap(), its.mem_offset);
                let si = ctx.ops.insert_after(oi, Opcode::St, ty);
                let sop = ctx.ops.get_mut(si);
                sop.args[0] = Arg::temp(TempIdx(dir));
                sop.args[1] = Arg::temp(base);
                sop.args[2] = Arg::value(offset as u64);
                sop.nargs = 3;
                temp_state[g] = TS_MEM;
            }
            if life.is_dead(i) {
                temp_state[g] = TS_DEAD;
            }
        }

        oi = oi_next;
    }

    Ok(changes)
}
