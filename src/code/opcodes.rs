//! Opcode constants and the compile-time per-opcode lookup tables
//!
//! Two `const` tables drive the generic machinery: [`SHAPE`] tells the buffer scanner how to step
//! over an instruction's operands, and [`STACK_DELTA`] gives the operand-stack height change of
//! every instruction whose effect does not depend on a pool entry. Instructions with a
//! pool-dependent effect (field access, invokes, `multianewarray`) are sized by their caller from
//! the descriptor.

#![allow(missing_docs)]

pub const NOP: u8 = 0;
pub const ACONST_NULL: u8 = 1;
pub const ICONST_M1: u8 = 2;
pub const ICONST_0: u8 = 3;
pub const ICONST_1: u8 = 4;
pub const ICONST_2: u8 = 5;
pub const ICONST_3: u8 = 6;
pub const ICONST_4: u8 = 7;
pub const ICONST_5: u8 = 8;
pub const LCONST_0: u8 = 9;
pub const LCONST_1: u8 = 10;
pub const FCONST_0: u8 = 11;
pub const FCONST_1: u8 = 12;
pub const FCONST_2: u8 = 13;
pub const DCONST_0: u8 = 14;
pub const DCONST_1: u8 = 15;
pub const BIPUSH: u8 = 16;
pub const SIPUSH: u8 = 17;
pub const LDC: u8 = 18;
pub const LDC_W: u8 = 19;
pub const LDC2_W: u8 = 20;
pub const ILOAD: u8 = 21;
pub const LLOAD: u8 = 22;
pub const FLOAD: u8 = 23;
pub const DLOAD: u8 = 24;
pub const ALOAD: u8 = 25;
pub const IALOAD: u8 = 46;
pub const LALOAD: u8 = 47;
pub const FALOAD: u8 = 48;
pub const DALOAD: u8 = 49;
pub const AALOAD: u8 = 50;
pub const BALOAD: u8 = 51;
pub const CALOAD: u8 = 52;
pub const SALOAD: u8 = 53;
pub const ISTORE: u8 = 54;
pub const LSTORE: u8 = 55;
pub const FSTORE: u8 = 56;
pub const DSTORE: u8 = 57;
pub const ASTORE: u8 = 58;
pub const IASTORE: u8 = 79;
pub const LASTORE: u8 = 80;
pub const FASTORE: u8 = 81;
pub const DASTORE: u8 = 82;
pub const AASTORE: u8 = 83;
pub const BASTORE: u8 = 84;
pub const CASTORE: u8 = 85;
pub const SASTORE: u8 = 86;
pub const POP: u8 = 87;
pub const POP2: u8 = 88;
pub const DUP: u8 = 89;
pub const DUP_X1: u8 = 90;
pub const DUP_X2: u8 = 91;
pub const DUP2: u8 = 92;
pub const DUP2_X1: u8 = 93;
pub const DUP2_X2: u8 = 94;
pub const SWAP: u8 = 95;
pub const IADD: u8 = 96;
pub const LADD: u8 = 97;
pub const FADD: u8 = 98;
pub const DADD: u8 = 99;
pub const ISUB: u8 = 100;
pub const LSUB: u8 = 101;
pub const FSUB: u8 = 102;
pub const DSUB: u8 = 103;
pub const IMUL: u8 = 104;
pub const LMUL: u8 = 105;
pub const FMUL: u8 = 106;
pub const DMUL: u8 = 107;
pub const IDIV: u8 = 108;
pub const LDIV: u8 = 109;
pub const FDIV: u8 = 110;
pub const DDIV: u8 = 111;
pub const IREM: u8 = 112;
pub const LREM: u8 = 113;
pub const FREM: u8 = 114;
pub const DREM: u8 = 115;
pub const INEG: u8 = 116;
pub const LNEG: u8 = 117;
pub const FNEG: u8 = 118;
pub const DNEG: u8 = 119;
pub const ISHL: u8 = 120;
pub const LSHL: u8 = 121;
pub const ISHR: u8 = 122;
pub const LSHR: u8 = 123;
pub const IUSHR: u8 = 124;
pub const LUSHR: u8 = 125;
pub const IAND: u8 = 126;
pub const LAND: u8 = 127;
pub const IOR: u8 = 128;
pub const LOR: u8 = 129;
pub const IXOR: u8 = 130;
pub const LXOR: u8 = 131;
pub const IINC: u8 = 132;
pub const I2L: u8 = 133;
pub const I2F: u8 = 134;
pub const I2D: u8 = 135;
pub const L2I: u8 = 136;
pub const L2F: u8 = 137;
pub const L2D: u8 = 138;
pub const F2I: u8 = 139;
pub const F2L: u8 = 140;
pub const F2D: u8 = 141;
pub const D2I: u8 = 142;
pub const D2L: u8 = 143;
pub const D2F: u8 = 144;
pub const I2B: u8 = 145;
pub const I2C: u8 = 146;
pub const I2S: u8 = 147;
pub const LCMP: u8 = 148;
pub const FCMPL: u8 = 149;
pub const FCMPG: u8 = 150;
pub const DCMPL: u8 = 151;
pub const DCMPG: u8 = 152;
pub const IFEQ: u8 = 153;
pub const IFNE: u8 = 154;
pub const IFLT: u8 = 155;
pub const IFGE: u8 = 156;
pub const IFGT: u8 = 157;
pub const IFLE: u8 = 158;
pub const IF_ICMPEQ: u8 = 159;
pub const IF_ICMPNE: u8 = 160;
pub const IF_ICMPLT: u8 = 161;
pub const IF_ICMPGE: u8 = 162;
pub const IF_ICMPGT: u8 = 163;
pub const IF_ICMPLE: u8 = 164;
pub const IF_ACMPEQ: u8 = 165;
pub const IF_ACMPNE: u8 = 166;
pub const GOTO: u8 = 167;
pub const JSR: u8 = 168;
pub const RET: u8 = 169;
pub const TABLESWITCH: u8 = 170;
pub const LOOKUPSWITCH: u8 = 171;
pub const IRETURN: u8 = 172;
pub const LRETURN: u8 = 173;
pub const FRETURN: u8 = 174;
pub const DRETURN: u8 = 175;
pub const ARETURN: u8 = 176;
pub const RETURN: u8 = 177;
pub const GETSTATIC: u8 = 178;
pub const PUTSTATIC: u8 = 179;
pub const GETFIELD: u8 = 180;
pub const PUTFIELD: u8 = 181;
pub const INVOKEVIRTUAL: u8 = 182;
pub const INVOKESPECIAL: u8 = 183;
pub const INVOKESTATIC: u8 = 184;
pub const INVOKEINTERFACE: u8 = 185;
pub const INVOKEDYNAMIC: u8 = 186;
pub const NEW: u8 = 187;
pub const NEWARRAY: u8 = 188;
pub const ANEWARRAY: u8 = 189;
pub const ARRAYLENGTH: u8 = 190;
pub const ATHROW: u8 = 191;
pub const CHECKCAST: u8 = 192;
pub const INSTANCEOF: u8 = 193;
pub const MONITORENTER: u8 = 194;
pub const MONITOREXIT: u8 = 195;
pub const WIDE: u8 = 196;
pub const MULTIANEWARRAY: u8 = 197;
pub const IFNULL: u8 = 198;
pub const IFNONNULL: u8 = 199;
pub const GOTO_W: u8 = 200;
pub const JSR_W: u8 = 201;

/// How the operands of an instruction are laid out after the opcode byte
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OpShape {
    /// Fixed number of operand bytes
    Fixed(u8),

    /// Signed 16-bit relative branch offset (`goto`, `jsr`, `if*`)
    Branch,

    /// Signed 32-bit relative branch offset (`goto_w`, `jsr_w`)
    BranchWide,

    /// Variable length: alignment padding, default, low/high bounds, jump table
    TableSwitch,

    /// Variable length: alignment padding, default, match count, match/offset pairs
    LookupSwitch,

    /// Prefix modifying the next opcode (2-byte local index; 6 total bytes for `wide iinc`)
    Wide,
}

const fn shape_of(opcode: u8) -> OpShape {
    match opcode {
        BIPUSH | NEWARRAY => OpShape::Fixed(1),
        LDC => OpShape::Fixed(1),
        ILOAD | LLOAD | FLOAD | DLOAD | ALOAD => OpShape::Fixed(1),
        ISTORE | LSTORE | FSTORE | DSTORE | ASTORE => OpShape::Fixed(1),
        RET => OpShape::Fixed(1),
        SIPUSH | LDC_W | LDC2_W | IINC => OpShape::Fixed(2),
        GETSTATIC | PUTSTATIC | GETFIELD | PUTFIELD => OpShape::Fixed(2),
        INVOKEVIRTUAL | INVOKESPECIAL | INVOKESTATIC => OpShape::Fixed(2),
        NEW | ANEWARRAY | CHECKCAST | INSTANCEOF => OpShape::Fixed(2),
        MULTIANEWARRAY => OpShape::Fixed(3),
        INVOKEINTERFACE | INVOKEDYNAMIC => OpShape::Fixed(4),
        IFEQ | IFNE | IFLT | IFGE | IFGT | IFLE => OpShape::Branch,
        IF_ICMPEQ | IF_ICMPNE | IF_ICMPLT | IF_ICMPGE | IF_ICMPGT | IF_ICMPLE => OpShape::Branch,
        IF_ACMPEQ | IF_ACMPNE | GOTO | JSR | IFNULL | IFNONNULL => OpShape::Branch,
        GOTO_W | JSR_W => OpShape::BranchWide,
        TABLESWITCH => OpShape::TableSwitch,
        LOOKUPSWITCH => OpShape::LookupSwitch,
        WIDE => OpShape::Wide,
        _ => OpShape::Fixed(0),
    }
}

/// Operand layout by opcode
pub const SHAPE: [OpShape; 202] = {
    let mut table = [OpShape::Fixed(0); 202];
    let mut opcode = 0;
    while opcode < 202 {
        table[opcode] = shape_of(opcode as u8);
        opcode += 1;
    }
    table
};

const fn stack_delta_of(opcode: u8) -> i8 {
    match opcode {
        ACONST_NULL | ICONST_M1 | ICONST_0 | ICONST_1 | ICONST_2 | ICONST_3 | ICONST_4
        | ICONST_5 | FCONST_0 | FCONST_1 | FCONST_2 | BIPUSH | SIPUSH | LDC | LDC_W => 1,
        LCONST_0 | LCONST_1 | DCONST_0 | DCONST_1 | LDC2_W => 2,
        ILOAD | FLOAD | ALOAD => 1,
        LLOAD | DLOAD => 2,
        IALOAD | FALOAD | AALOAD | BALOAD | CALOAD | SALOAD => -1,
        LALOAD | DALOAD => 0,
        ISTORE | FSTORE | ASTORE => -1,
        LSTORE | DSTORE => -2,
        IASTORE | FASTORE | AASTORE | BASTORE | CASTORE | SASTORE => -3,
        LASTORE | DASTORE => -4,
        POP => -1,
        POP2 => -2,
        DUP | DUP_X1 | DUP_X2 => 1,
        DUP2 | DUP2_X1 | DUP2_X2 => 2,
        SWAP => 0,
        IADD | FADD | ISUB | FSUB | IMUL | FMUL | IDIV | FDIV | IREM | FREM => -1,
        LADD | DADD | LSUB | DSUB | LMUL | DMUL | LDIV | DDIV | LREM | DREM => -2,
        INEG | LNEG | FNEG | DNEG => 0,
        ISHL | ISHR | IUSHR | LSHL | LSHR | LUSHR => -1,
        IAND | IOR | IXOR => -1,
        LAND | LOR | LXOR => -2,
        IINC => 0,
        I2F | I2B | I2C | I2S | F2I | L2D | D2L => 0,
        I2L | I2D | F2L | F2D => 1,
        L2I | L2F | D2I | D2F => -1,
        LCMP | DCMPL | DCMPG => -3,
        FCMPL | FCMPG => -1,
        IFEQ | IFNE | IFLT | IFGE | IFGT | IFLE | IFNULL | IFNONNULL => -1,
        IF_ICMPEQ | IF_ICMPNE | IF_ICMPLT | IF_ICMPGE | IF_ICMPGT | IF_ICMPLE | IF_ACMPEQ
        | IF_ACMPNE => -2,
        GOTO | GOTO_W | RET => 0,
        JSR | JSR_W => 1,
        TABLESWITCH | LOOKUPSWITCH => -1,
        IRETURN | FRETURN | ARETURN | ATHROW => -1,
        LRETURN | DRETURN => -2,
        RETURN => 0,
        NEW => 1,
        NEWARRAY | ANEWARRAY | ARRAYLENGTH => 0,
        CHECKCAST | INSTANCEOF => 0,
        MONITORENTER | MONITOREXIT => -1,
        // Pool-dependent instructions; the emitter computes the real effect from the descriptor
        GETSTATIC | PUTSTATIC | GETFIELD | PUTFIELD => 0,
        INVOKEVIRTUAL | INVOKESPECIAL | INVOKESTATIC | INVOKEINTERFACE | INVOKEDYNAMIC => 0,
        MULTIANEWARRAY => 0,
        _ => 0,
    }
}

/// Operand-stack height change by opcode (pool-dependent instructions read 0 here)
pub const STACK_DELTA: [i8; 202] = {
    let mut table = [0i8; 202];
    let mut opcode = 0;
    while opcode < 202 {
        table[opcode] = stack_delta_of(opcode as u8);
        opcode += 1;
    }
    table
};

/// Negate the condition of an `if*` opcode (`ifeq` becomes `ifne`, `iflt` becomes `ifge`, ...)
pub const fn negate_condition(opcode: u8) -> u8 {
    if opcode == IFNULL || opcode == IFNONNULL {
        opcode ^ 1
    } else {
        ((opcode + 1) ^ 1) - 1
    }
}

/// Is this a conditional 16-bit branch (everything in [`OpShape::Branch`] except `goto`/`jsr`)?
pub const fn is_conditional_branch(opcode: u8) -> bool {
    matches!(opcode, IFEQ..=IF_ACMPNE | IFNULL | IFNONNULL)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn condition_negation_round_trips() {
        let conditionals = [
            IFEQ, IFNE, IFLT, IFGE, IFGT, IFLE, IF_ICMPEQ, IF_ICMPNE, IF_ICMPLT, IF_ICMPGE,
            IF_ICMPGT, IF_ICMPLE, IF_ACMPEQ, IF_ACMPNE, IFNULL, IFNONNULL,
        ];
        for opcode in conditionals {
            let negated = negate_condition(opcode);
            assert_ne!(opcode, negated);
            assert_eq!(negate_condition(negated), opcode);
            assert!(is_conditional_branch(negated));
        }
    }

    #[test]
    fn negation_pairs() {
        assert_eq!(negate_condition(IFEQ), IFNE);
        assert_eq!(negate_condition(IFLT), IFGE);
        assert_eq!(negate_condition(IFGT), IFLE);
        assert_eq!(negate_condition(IF_ICMPLT), IF_ICMPGE);
        assert_eq!(negate_condition(IFNULL), IFNONNULL);
    }

    #[test]
    fn branch_shapes() {
        assert_eq!(SHAPE[GOTO as usize], OpShape::Branch);
        assert_eq!(SHAPE[GOTO_W as usize], OpShape::BranchWide);
        assert_eq!(SHAPE[TABLESWITCH as usize], OpShape::TableSwitch);
        assert_eq!(SHAPE[INVOKEINTERFACE as usize], OpShape::Fixed(4));
        assert_eq!(SHAPE[NOP as usize], OpShape::Fixed(0));
    }

    #[test]
    fn fixed_stack_deltas() {
        assert_eq!(STACK_DELTA[DUP as usize], 1);
        assert_eq!(STACK_DELTA[LCONST_0 as usize], 2);
        assert_eq!(STACK_DELTA[LASTORE as usize], -4);
        assert_eq!(STACK_DELTA[LCMP as usize], -3);
        assert_eq!(STACK_DELTA[RETURN as usize], 0);
    }
}
