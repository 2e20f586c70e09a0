//! Bytecode emission: labels, the instruction surface, stack accounting, and branch widening

mod frame;
mod label;
mod method_body;
mod widen;

pub mod opcodes;

pub use frame::DeclaredFrame;
pub use label::{Edge, ForwardRef, Label, LabelId, LabelStatus};
pub use method_body::{ComputeMode, LoadableWidth, MethodBody};
