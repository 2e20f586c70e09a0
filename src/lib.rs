//! Writer for JVM class files
//!
//! This crate produces class files the way an assembler would: a deduplicating [constant
//! pool](class_file::ConstantPool), an instruction-level emission API with
//! [labels](code::LabelId) for jump targets, computed `max_stack`/`max_locals`, compressed
//! `StackMapTable` frames, and automatic rewriting of branches whose 16-bit offsets overflow.
//! It does not read or verify class files.
//!
//! ```
//! use classforge::builder::ClassBuilder;
//! use classforge::class_file::{ClassAccessFlags, MethodAccessFlags, Version};
//! use classforge::code::{opcodes, ComputeMode};
//!
//! # fn main() -> Result<(), classforge::errors::Error> {
//! let mut builder = ClassBuilder::new(
//!     Version::JAVA8,
//!     ComputeMode::MaxsOnly,
//!     ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
//!     "demo/CountDown",
//!     Some("java/lang/Object"),
//! )?;
//!
//! // static int countDown(int n) { while (n != 0) n--; return n; }
//! let mut body = builder.start_method(
//!     MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
//!     "countDown",
//!     "(I)I",
//! )?;
//! let top = body.fresh_label();
//! let done = body.fresh_label();
//! body.place_label(top);
//! body.push_var_insn(opcodes::ILOAD, 0);
//! body.push_jump(opcodes::IFEQ, done);
//! body.push_iinc(0, -1);
//! body.push_jump(opcodes::GOTO, top);
//! body.place_label(done);
//! body.push_var_insn(opcodes::ILOAD, 0);
//! body.push_insn(opcodes::IRETURN);
//! builder.finish_method(body, 0, 0, &[])?;
//!
//! let class_file = builder.into_bytes()?;
//! assert_eq!(&class_file[0..4], &[0xCA, 0xFE, 0xBA, 0xBE]);
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod class_file;
pub mod code;
pub mod descriptors;
pub mod errors;
