//! Binary structures of the class file format
//!
//! Everything here serializes itself through the [`Serialize`] trait, big-endian, exactly as the
//! [class file format][0] prescribes. The one stateful piece is the [`ConstantPool`], which
//! deduplicates entries as they are interned.
//!
//! [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html

mod access_flags;
mod attribute;
mod constants;
mod field;
mod method;
mod serialize;
mod version;

pub use access_flags::*;
pub use attribute::*;
pub use constants::*;
pub use field::*;
pub use method::*;
pub use serialize::*;
pub use version::*;
