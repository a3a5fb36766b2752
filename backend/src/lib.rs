pub mod code_buffer;
pub mod constraint;
pub mod host;
pub mod liveness;
pub mod regalloc;
pub mod translate;

pub use code_buffer::CodeBuffer;
pub use constraint::{ArgConstraint, ConstraintTable, OpConstraint};
pub use host::{HostEmitter, RelocRequest, TargetDesc};
pub use regalloc::RegAlloc;
pub use translate::Translator;
