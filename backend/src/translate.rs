use tcgen_core::{Context, Result};
use tracing::trace;

use crate::code_buffer::CodeBuffer;
use crate::constraint::ConstraintTable;
use crate::host::{HostEmitter, TargetDesc};
use crate::liveness::{liveness_pass_1, liveness_pass_2};
use crate::regalloc::RegAlloc;

/// Default spill area size configured by `init_context`.
const SPILL_FRAME_SIZE: usize = 1024;

/// The per-target code generation pipeline: constraint table built once
/// from the host backend, then any number of TBs lowered through it.
pub struct Translator<H: HostEmitter> {
    host: H,
    constraints: ConstraintTable,
}

impl<H: HostEmitter> Translator<H> {
    /// Parse the target's constraint strings. Fails when a present
    /// opcode has no (or an incomplete) constraint definition.
    pub fn new(host: H) -> Result<Self> {
        let constraints = ConstraintTable::build(&host)?;
        Ok(Self { host, constraints })
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn target(&self) -> &TargetDesc {
        self.host.target()
    }

    /// Configure a context for this target: host layout, reserved
    /// registers, and a spill frame above the outgoing call-argument
    /// area (unless the caller already placed one).
    pub fn init_context(&self, ctx: &mut Context) -> Result<()> {
        let target = self.host.target();
        ctx.set_host_layout(target.layout);
        ctx.reserved_regs = ctx.reserved_regs.union(target.reserved_regs);
        if ctx.frame_temp().is_none() {
            let start = target.call_stack_offset + target.static_call_args_size as i64;
            ctx.set_frame(target.call_stack_reg, start, SPILL_FRAME_SIZE as i64)?;
        }
        Ok(())
    }

    /// Lower the context's op list to host code appended at the buffer's
    /// current offset. Returns the number of bytes emitted.
    ///
    /// On [`tcgen_core::Error::BufferFull`] the op list is intact and
    /// internally consistent: pass 1 is idempotent and pass 2 has
    /// reached its fixpoint, so the caller retries by providing a larger
    /// (or freshly rewound) buffer and calling `translate` again with
    /// the same context. Every other error discards the TB.
    ///
    /// The buffer is left writable; the caller seals it with
    /// [`CodeBuffer::set_executable`] before dispatching, which is also
    /// the icache-flush point on hosts that need one.
    pub fn translate(&self, ctx: &mut Context, buf: &mut CodeBuffer) -> Result<usize> {
        let target = self.host.target();

        if tracing::enabled!(tracing::Level::TRACE) {
            trace!("OP:\n{}", ctx.dump_ops());
        }

        // Pass 2 adds at most one shadow temp per indirect global.
        let state_len = (ctx.nb_temps() + ctx.nb_indirects()) as usize;
        // SAFETY: the buffer lives in the context's arena until the next
        // func_start; nothing else allocates an overlapping region.
        let temp_state = unsafe { ctx.arena_mut().alloc_bytes(state_len) };

        liveness_pass_1(ctx, temp_state, target);

        if ctx.nb_indirects() > 0 {
            if tracing::enabled!(tracing::Level::TRACE) {
                trace!("OP before indirect lowering:\n{}", ctx.dump_ops());
            }
            // Replace indirect globals with direct temps; the inserted
            // loads and stores need life bits of their own.
            if liveness_pass_2(ctx, temp_state)? {
                liveness_pass_1(ctx, temp_state, target);
            }
        }

        if tracing::enabled!(tracing::Level::TRACE) {
            trace!("OP after liveness:\n{}", ctx.dump_ops());
        }

        let start = buf.offset();
        RegAlloc::new(ctx, &self.host, &self.constraints, buf).run()?;
        Ok(buf.offset() - start)
    }
}
