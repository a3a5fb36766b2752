use thiserror::Error;

/// Failures raised while lowering one translation block.
///
/// Every variant except [`Error::BufferFull`] is fatal for the current TB:
/// the caller discards the partially generated code and falls back (for
/// instance to an interpreter). `BufferFull` is the retryable case: the
/// op list and context are left in a state where translation can simply be
/// run again into a larger buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    #[error("too many temporaries in translation context")]
    TooManyTemps,

    #[error("too many labels in translation block")]
    TooManyLabels,

    #[error("spill frame exhausted")]
    FrameOverflow,

    #[error("call stack argument area exceeded ({needed} > {reserved} bytes)")]
    CallStackOverflow { needed: usize, reserved: usize },

    #[error("no constraint definition for opcode `{0}`")]
    MissingConstraint(&'static str),

    #[error("invalid constraint character {ch:?} for opcode `{op}`")]
    BadConstraint { op: &'static str, ch: char },

    #[error("label {0} bound twice")]
    LabelRedefined(u32),

    #[error("no admissible host register for allocation")]
    RegAllocStarved,

    #[error("code buffer high-water mark crossed; retry with a larger buffer")]
    BufferFull,

    #[error("relocation target out of range")]
    RelocOutOfRange,
}

pub type Result<T> = std::result::Result<T, Error>;
