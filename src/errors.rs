use crate::class_file::Constant;

/// Errors the writer can surface to its caller
///
/// Only recoverable conditions are represented here: capacity limits of the binary format and
/// malformed caller input. Invariant violations inside the writer (an unresolved label at
/// finalization, a negative computed stack height) indicate a bug in the emitting logic and
/// panic instead, since continuing would produce a corrupt artifact.
#[derive(Debug)]
pub enum Error {
    /// The constant pool cannot hold another entry (index space is 16 bits)
    ConstantPoolOverflow { constant: Constant },

    /// Method bytecode grew past the 65535-byte limit addressable by branch offsets and frames
    MethodCodeOverflow { length: usize },

    /// Computed or declared `max_stack`/`max_locals` does not fit in 16 bits
    MethodMaxOverflow { computed: u32 },

    /// A required name was empty or structurally invalid
    InvalidName(String),

    /// A field or method descriptor did not parse
    InvalidDescriptor(String),

    /// Two different frames were declared for the same bytecode offset
    ConflictingFrames { offset: u32 },

    IoError(std::io::Error),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::IoError(err)
    }
}
