pub mod arena;
pub mod context;
pub mod dump;
pub mod error;
pub mod ir_builder;
pub mod label;
pub mod op;
pub mod opcode;
pub mod temp;
pub mod types;

pub use arena::Arena;
pub use context::{Context, MAX_LABELS, MAX_TEMPS};
pub use error::{Error, Result};
pub use label::{Label, Reloc, RelocKind};
pub use op::{Arg, LifeData, Op, OpList, MAX_OP_ARGS};
pub use opcode::{CallFlags, OpDef, OpFlags, Opcode, NB_OPS, OPCODE_DEFS};
pub use temp::{Temp, TempIdx, TempKind};
pub use types::{Cond, HostLayout, RegSet, TempBitSet, TempVal, Type, TYPE_COUNT};
