use thiserror::Error;

/// Errors reported by the arena, the pools and the facade.
///
/// Misuse (double release, mismatched sizes, stale addresses) is not an
/// error: it is undefined behaviour and only caught by debug assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    /// The host denied the request and no recovery hook produced a block.
    #[error("out of memory: host denied a request for {requested} bytes")]
    OutOfMemory { requested: usize },
    /// A pool cannot be built for this entity size.
    #[error("entity size {0} cannot be pooled")]
    InvalidEntitySize(usize),
}

/// Errors raised while building or validating a [`crate::Config`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("alignment {0} is not a power of two of at most {max}", max = crate::frame::SLOT_ALIGN)]
    Alignment(usize),
    #[error(
        "cutoff {cutoff} at alignment {alignment} needs more than {max} size classes",
        max = crate::config::MAX_SIZE_CLASSES
    )]
    Cutoff { cutoff: usize, alignment: usize },
    #[error("{name} must be non-zero")]
    Zero { name: &'static str },
    #[error("{var}: cannot parse {value:?} as a size")]
    Parse { var: &'static str, value: String },
}
