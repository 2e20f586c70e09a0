//! Scenario tests driving the public API the way a compiler front end would

use byteorder::{BigEndian, ByteOrder};

use classforge::builder::ClassBuilder;
use classforge::class_file::{
    ClassAccessFlags, ConstantPool, FieldAccessFlags, MethodAccessFlags, StackMapFrame,
    VerificationType, Version,
};
use classforge::code::{opcodes, ComputeMode, MethodBody};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn builder(compute: ComputeMode) -> ClassBuilder {
    ClassBuilder::new(
        Version::JAVA8,
        compute,
        ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
        "demo/Subject",
        Some("java/lang/Object"),
    )
    .unwrap()
}

fn start(builder: &mut ClassBuilder, name: &str, descriptor: &str) -> MethodBody {
    builder
        .start_method(
            MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
            name,
            descriptor,
        )
        .unwrap()
}

/// static void countDown(int n, int step) { do { n -= step; } while (n != 0); }
#[test]
fn countdown_loop() {
    init_logging();
    let mut builder = builder(ComputeMode::MaxsOnly);
    let mut body = start(&mut builder, "countDown", "(II)V");

    let loop_top = body.fresh_label();
    body.place_label(loop_top);
    body.push_var_insn(opcodes::ILOAD, 0);
    body.push_var_insn(opcodes::ILOAD, 1);
    body.push_insn(opcodes::ISUB);
    body.push_var_insn(opcodes::ISTORE, 0);
    body.push_var_insn(opcodes::ILOAD, 0);
    body.push_jump(opcodes::IFNE, loop_top);
    body.push_insn(opcodes::RETURN);

    let code = body.finish(0, 0, builder.constants()).unwrap();
    assert_eq!(code.max_stack, 2);
    assert_eq!(code.max_locals, 2);

    let bytes = &code.code_array.0;
    // loop: iload_0 iload_1 isub istore_0 iload_0 ifne(-5) | return
    assert_eq!(bytes.len(), 9);
    assert_eq!(bytes[5], opcodes::IFNE);
    // A conditional branch back to the method's first instruction: 0 minus its own position
    assert_eq!(BigEndian::read_i16(&bytes[6..8]), -5);
    assert_eq!(bytes[8], opcodes::RETURN);
}

/// Forward references from branches and switch tables all patch to the placed offsets
#[test]
fn forward_references_patch() {
    init_logging();
    let mut builder = builder(ComputeMode::MaxsOnly);
    let mut body = start(&mut builder, "dispatch", "(I)V");

    let hit = body.fresh_label();
    let default = body.fresh_label();

    body.push_var_insn(opcodes::ILOAD, 0);
    body.push_lookup_switch(default, &[(5, hit)]);
    body.place_label(hit);
    body.push_insn(opcodes::RETURN);
    body.place_label(default);
    body.push_insn(opcodes::RETURN);

    let code = body.finish(0, 0, builder.constants()).unwrap();
    let bytes = &code.code_array.0;

    // Opcode at 1, padding to 4, then default / npairs / (key, offset)
    assert_eq!(bytes[1], opcodes::LOOKUPSWITCH);
    assert_eq!(BigEndian::read_i32(&bytes[8..12]), 1);
    assert_eq!(BigEndian::read_i32(&bytes[12..16]), 5);
    let default_at = 1 + BigEndian::read_i32(&bytes[4..8]) as usize;
    let hit_at = 1 + BigEndian::read_i32(&bytes[16..20]) as usize;
    assert_eq!(hit_at, 20);
    assert_eq!(default_at, 21);
    assert_eq!(bytes[hit_at], opcodes::RETURN);
    assert_eq!(bytes[default_at], opcodes::RETURN);
}

/// A branch over more than 32767 bytes of code is rewritten to its wide form
#[test]
fn oversized_branch_is_widened() {
    init_logging();
    let mut builder = builder(ComputeMode::MaxsOnly);
    let mut body = start(&mut builder, "far", "()V");

    let end = body.fresh_label();
    body.push_jump(opcodes::GOTO, end);
    for _ in 0..40_000 {
        body.push_insn(opcodes::NOP);
    }
    body.place_label(end);
    body.push_insn(opcodes::RETURN);

    let code = body.finish(0, 0, builder.constants()).unwrap();
    let bytes = &code.code_array.0;
    assert_eq!(bytes.len(), 40_008);
    assert_eq!(&bytes[..3], &[opcodes::NOP, opcodes::NOP, opcodes::GOTO_W]);
    // goto_w at 2 reaches the return at the re-based label position
    let offset = BigEndian::read_i32(&bytes[3..7]);
    assert_eq!(offset, 40_005);
    assert_eq!(bytes[2 + offset as usize], opcodes::RETURN);
}

/// Interning the same class repeatedly yields one entry and one index
#[test]
fn class_interning_dedupes() {
    init_logging();
    let mut pool = ConstantPool::new();

    let foo_first = pool.intern_class("Foo").unwrap();
    let foo_second = pool.intern_class("Foo").unwrap();
    let foo_third = pool.intern_class("Foo").unwrap();
    let bar = pool.intern_class("Bar").unwrap();

    assert_eq!(foo_first, foo_second);
    assert_eq!(foo_first, foo_third);
    assert_ne!(foo_first, bar);
    // "Foo", Class(Foo), "Bar", Class(Bar)
    assert_eq!(pool.entry_count(), 4);
}

/// The stack fixed point settles on cyclic control flow
#[test]
fn fixed_point_on_a_loop_with_live_stack() {
    init_logging();
    let mut builder = builder(ComputeMode::MaxsOnly);
    let mut body = start(&mut builder, "sum", "()V");

    let check = body.fresh_label();
    let exit = body.fresh_label();

    body.push_insn(opcodes::ICONST_0);
    body.place_label(check);
    body.push_insn(opcodes::DUP);
    body.push_jump(opcodes::IFEQ, exit);
    body.push_insn(opcodes::ICONST_1);
    body.push_insn(opcodes::IADD);
    body.push_jump(opcodes::GOTO, check);
    body.place_label(exit);
    body.push_insn(opcodes::POP);
    body.push_insn(opcodes::RETURN);

    let code = body.finish(0, 0, builder.constants()).unwrap();
    // One accumulator riding the loop, plus the dup for the test
    assert_eq!(code.max_stack, 2);
}

/// Declared frames come out as compact `StackMapTable` encodings
#[test]
fn declared_frames_compress() {
    init_logging();
    let mut builder = builder(ComputeMode::Frames);
    let mut body = start(&mut builder, "choose", "(Z)I");

    let otherwise = body.fresh_label();
    body.push_var_insn(opcodes::ILOAD, 0);
    body.push_jump(opcodes::IFEQ, otherwise);
    body.push_insn(opcodes::ICONST_1);
    body.push_insn(opcodes::IRETURN);
    body.place_label(otherwise);
    body.declare_frame(vec![VerificationType::Integer], vec![]);
    body.push_insn(opcodes::ICONST_0);
    body.push_insn(opcodes::IRETURN);

    let code = body.finish(0, 0, builder.constants()).unwrap();
    assert_eq!(code.max_stack, 1);

    // Only the StackMapTable attribute is attached, holding one same_frame at offset 6
    assert_eq!(code.attributes.len(), 1);
    assert_eq!(code.attributes[0].info, vec![0, 1, 6]);

    // Round-trip through the frame model for good measure
    let mut expected = vec![];
    use classforge::class_file::Serialize;
    StackMapFrame::Same { offset_delta: 6 }
        .serialize(&mut expected)
        .unwrap();
    assert_eq!(&code.attributes[0].info[2..], &expected[..]);
}

/// A complete class with interfaces, fields and methods serializes coherently
#[test]
fn whole_class_assembles() {
    init_logging();
    let mut builder = builder(ComputeMode::MaxsOnly);
    builder.source_file("Subject.java").unwrap();
    builder.add_interface("java/lang/Runnable").unwrap();

    let answer = builder.constants().intern_integer(42).unwrap();
    builder
        .add_field(
            FieldAccessFlags::PUBLIC | FieldAccessFlags::STATIC | FieldAccessFlags::FINAL,
            "ANSWER",
            "I",
            Some(answer),
        )
        .unwrap();

    let mut body = builder
        .start_method(MethodAccessFlags::PUBLIC, "run", "()V")
        .unwrap();
    let marker = body.fresh_label();
    body.line_number(13, marker);
    body.place_label(marker);
    body.push_insn(opcodes::RETURN);
    builder
        .finish_method(body, 0, 0, &["java/io/IOException"])
        .unwrap();

    let bytes = builder.into_bytes().unwrap();
    assert_eq!(&bytes[0..4], &[0xCA, 0xFE, 0xBA, 0xBE]);
    for needle in [
        &b"demo/Subject"[..],
        b"java/lang/Runnable",
        b"ANSWER",
        b"ConstantValue",
        b"SourceFile",
        b"Subject.java",
        b"LineNumberTable",
        b"Exceptions",
        b"java/io/IOException",
        b"Code",
    ] {
        assert!(
            bytes.windows(needle.len()).any(|window| window == needle),
            "missing {:?} in serialized class",
            String::from_utf8_lossy(needle),
        );
    }
}
