//! Rewriting of 16-bit branches whose offsets overflowed
//!
//! Branch operands are 16-bit almost everywhere, so a method longer than 32KB can end up with
//! jumps that do not fit. When that happens the whole code array is rebuilt once: every
//! overflowing branch is replaced by a wide form and every position-dependent value (label
//! positions, other branch operands, switch tables, frame offsets) is re-based.
//!
//! Replacements are padded to insert a multiple of 4 bytes so the alignment padding inside
//! `tableswitch`/`lookupswitch` keeps its length:
//!
//! - `goto` / `jsr` (3 bytes) become `nop nop goto_w` / `nop nop jsr_w` (7 bytes)
//! - `if*` (3 bytes) becomes `nop nop nop, if<!cond> +8, goto_w` (11 bytes)
//!
//! Widening one branch moves code and can push other branches over the limit, so marking is
//! iterated to a fixed point before the single rebuild. Distances are always computed from label
//! positions, never read back from the buffer: an overflowed operand is stored wrapped and would
//! decode to the wrong target.

use crate::class_file::VerificationType;
use crate::code::frame::DeclaredFrame;
use crate::code::label::{Label, LabelId, LabelStatus};
use crate::code::opcodes::{self, OpShape};

/// A branch instruction with a 16-bit offset operand, recorded at emission
#[derive(Debug)]
pub(crate) struct NarrowBranch {
    /// Offset of the opcode byte
    pub at: u32,
    pub target: LabelId,
}

/// A switch instruction, recorded at emission so the rebuild can re-emit it
#[derive(Debug)]
pub(crate) enum SwitchSite {
    Table {
        at: u32,
        default: LabelId,
        low: i32,
        targets: Vec<LabelId>,
    },
    Lookup {
        at: u32,
        default: LabelId,
        pairs: Vec<(i32, LabelId)>,
    },
}

impl SwitchSite {
    fn at(&self) -> u32 {
        match self {
            SwitchSite::Table { at, .. } | SwitchSite::Lookup { at, .. } => *at,
        }
    }

    /// Length of the instruction in the original code array, padding included
    fn old_len(&self) -> u32 {
        let at = self.at();
        let padding = 3 - at % 4;
        match self {
            SwitchSite::Table { targets, .. } => 1 + padding + 12 + 4 * targets.len() as u32,
            SwitchSite::Lookup { pairs, .. } => 1 + padding + 8 + 8 * pairs.len() as u32,
        }
    }
}

/// Grown size of a widened branch replacing a 3-byte original
fn growth(opcode: u8) -> u32 {
    if opcodes::is_conditional_branch(opcode) {
        8
    } else {
        4
    }
}

/// Rebuild `code` with every overflowing branch in wide form
///
/// Mutates label positions and declared frame offsets to their re-based values and returns the
/// new code array. `branches` and `switches` must be sorted by position, which emission order
/// guarantees. All labels must be resolved.
pub(crate) fn widen_branches(
    code: &[u8],
    labels: &mut [Label],
    branches: &[NarrowBranch],
    switches: &[SwitchSite],
    frames: &mut [DeclaredFrame],
) -> Vec<u8> {
    let mut wide = vec![false; branches.len()];

    // Re-base an old offset against the branches currently marked wide. Insertions at a branch
    // site sit before the branch's own opcode, so a position at the site itself does not move.
    let remap = |wide: &[bool], position: u32| -> u32 {
        let mut shifted = position;
        for (branch, marked) in branches.iter().zip(wide) {
            if branch.at >= position {
                break;
            }
            if *marked {
                shifted += growth(code[branch.at as usize]);
            }
        }
        shifted
    };

    let mut changed = true;
    while changed {
        changed = false;
        for (index, branch) in branches.iter().enumerate() {
            if wide[index] {
                continue;
            }
            let source = remap(&wide, branch.at) as i64;
            let target = remap(&wide, labels[branch.target.index()].position()) as i64;
            if i16::try_from(target - source).is_err() {
                log::debug!("widening branch at {}", branch.at);
                wide[index] = true;
                changed = true;
            }
        }
    }

    let mut new_code: Vec<u8> = Vec::with_capacity(code.len() + 64);
    let mut branch_index = 0;
    let mut switch_index = 0;
    let mut old_pos: u32 = 0;

    while (old_pos as usize) < code.len() {
        let opcode = code[old_pos as usize];
        let new_pos = new_code.len() as u32;

        if branch_index < branches.len() && branches[branch_index].at == old_pos {
            let target_old = labels[branches[branch_index].target.index()].position();
            let target = remap(&wide, target_old) as i64;

            if wide[branch_index] {
                if opcodes::is_conditional_branch(opcode) {
                    // new_pos..+3 nops, +3 inverted branch over the goto_w, +6 goto_w
                    new_code.extend_from_slice(&[opcodes::NOP, opcodes::NOP, opcodes::NOP]);
                    new_code.push(opcodes::negate_condition(opcode));
                    new_code.extend_from_slice(&8i16.to_be_bytes());
                    new_code.push(opcodes::GOTO_W);
                    let offset = (target - (new_pos as i64 + 6)) as i32;
                    new_code.extend_from_slice(&offset.to_be_bytes());
                } else {
                    new_code.extend_from_slice(&[opcodes::NOP, opcodes::NOP]);
                    new_code.push(if opcode == opcodes::JSR {
                        opcodes::JSR_W
                    } else {
                        opcodes::GOTO_W
                    });
                    let offset = (target - (new_pos as i64 + 2)) as i32;
                    new_code.extend_from_slice(&offset.to_be_bytes());
                }
            } else {
                new_code.push(opcode);
                let offset = (target - new_pos as i64) as i16;
                new_code.extend_from_slice(&offset.to_be_bytes());
            }

            branch_index += 1;
            old_pos += 3;
            continue;
        }

        if switch_index < switches.len() && switches[switch_index].at() == old_pos {
            let site = &switches[switch_index];
            let base = new_pos as i64;
            let offset_to = |label: LabelId| -> i32 {
                (remap(&wide, labels[label.index()].position()) as i64 - base) as i32
            };

            new_code.push(opcode);
            while new_code.len() % 4 != 0 {
                new_code.push(0);
            }
            match site {
                SwitchSite::Table {
                    default,
                    low,
                    targets,
                    ..
                } => {
                    new_code.extend_from_slice(&offset_to(*default).to_be_bytes());
                    new_code.extend_from_slice(&low.to_be_bytes());
                    let high = low + targets.len() as i32 - 1;
                    new_code.extend_from_slice(&high.to_be_bytes());
                    for target in targets {
                        new_code.extend_from_slice(&offset_to(*target).to_be_bytes());
                    }
                }
                SwitchSite::Lookup { default, pairs, .. } => {
                    new_code.extend_from_slice(&offset_to(*default).to_be_bytes());
                    new_code.extend_from_slice(&(pairs.len() as i32).to_be_bytes());
                    for (key, target) in pairs {
                        new_code.extend_from_slice(&key.to_be_bytes());
                        new_code.extend_from_slice(&offset_to(*target).to_be_bytes());
                    }
                }
            }

            old_pos += site.old_len();
            switch_index += 1;
            continue;
        }

        let len = match opcodes::SHAPE[opcode as usize] {
            OpShape::Fixed(operands) => 1 + operands as u32,
            OpShape::Wide => {
                if code[old_pos as usize + 1] == opcodes::IINC {
                    6
                } else {
                    4
                }
            }
            shape => unreachable!("unrecorded {:?} instruction at {}", shape, old_pos),
        };
        new_code.extend_from_slice(&code[old_pos as usize..(old_pos + len) as usize]);
        old_pos += len;
    }

    for label in labels.iter_mut() {
        if label.status.contains(LabelStatus::RESOLVED) {
            label.position = remap(&wide, label.position);
        }
    }
    for frame in frames.iter_mut() {
        frame.offset = remap(&wide, frame.offset);
        // `Uninitialized` operands are bytecode offsets of `new` instructions and move too
        for entry in frame.locals.iter_mut().chain(frame.stack.iter_mut()) {
            if let VerificationType::Uninitialized(at) = entry {
                *at = remap(&wide, *at as u32) as u16;
            }
        }
    }

    new_code
}

#[cfg(test)]
mod test {
    use super::*;
    use byteorder::{BigEndian, ByteOrder};

    fn label_at(position: u32) -> Label {
        let mut label = Label::new();
        label.status |= LabelStatus::RESOLVED;
        label.position = position;
        label
    }

    #[test]
    fn in_range_branches_are_left_narrow() {
        // 0: goto 6; 3: nop x3; 6: return
        let mut code = vec![opcodes::GOTO, 0, 6];
        code.extend_from_slice(&[opcodes::NOP, opcodes::NOP, opcodes::NOP, opcodes::RETURN]);
        let mut labels = vec![label_at(6)];
        let branches = vec![NarrowBranch {
            at: 0,
            target: LabelId(0),
        }];

        let rebuilt = widen_branches(&code, &mut labels, &branches, &[], &mut []);
        assert_eq!(rebuilt, code);
        assert_eq!(labels[0].position, 6);
    }

    #[test]
    fn far_goto_becomes_goto_w() {
        // 0: goto END; 3: 0x8000 nops; END: return
        let mut code = vec![opcodes::GOTO, 0, 0];
        code.extend(std::iter::repeat(opcodes::NOP).take(0x8000));
        let end = code.len() as u32;
        code.push(opcodes::RETURN);
        let mut labels = vec![label_at(end)];
        let branches = vec![NarrowBranch {
            at: 0,
            target: LabelId(0),
        }];

        let rebuilt = widen_branches(&code, &mut labels, &branches, &[], &mut []);
        assert_eq!(rebuilt.len(), code.len() + 4);
        assert_eq!(&rebuilt[..3], &[opcodes::NOP, opcodes::NOP, opcodes::GOTO_W]);
        // goto_w sits at 2; the label moved by the 4 inserted bytes
        assert_eq!(labels[0].position, end + 4);
        assert_eq!(BigEndian::read_i32(&rebuilt[3..7]), (end + 4 - 2) as i32);
        assert_eq!(rebuilt[labels[0].position as usize], opcodes::RETURN);
    }

    #[test]
    fn far_conditional_is_inverted_over_a_goto_w() {
        let mut code = vec![opcodes::IFEQ, 0, 0];
        code.extend(std::iter::repeat(opcodes::NOP).take(0x8000));
        let end = code.len() as u32;
        code.push(opcodes::RETURN);
        let mut labels = vec![label_at(end)];
        let branches = vec![NarrowBranch {
            at: 0,
            target: LabelId(0),
        }];

        let rebuilt = widen_branches(&code, &mut labels, &branches, &[], &mut []);
        assert_eq!(rebuilt.len(), code.len() + 8);
        assert_eq!(&rebuilt[..3], &[opcodes::NOP, opcodes::NOP, opcodes::NOP]);
        assert_eq!(rebuilt[3], opcodes::IFNE);
        assert_eq!(BigEndian::read_i16(&rebuilt[4..6]), 8);
        assert_eq!(rebuilt[6], opcodes::GOTO_W);
        assert_eq!(BigEndian::read_i32(&rebuilt[7..11]), (end + 8 - 6) as i32);
    }

    #[test]
    fn widening_one_branch_can_force_another() {
        // Branch at 4 overflows on its own. It sits between the branch at 0 and that branch's
        // target END, so growing it pushes END out of the first branch's 16-bit range.
        //
        // 0: goto END; 3: nop; 4: goto FAR; nops...; END at 32766; FAR at 32778 (return)
        let mut code = vec![opcodes::GOTO, 0, 0, opcodes::NOP, opcodes::GOTO, 0, 0];
        code.extend(std::iter::repeat(opcodes::NOP).take(32771));
        code.push(opcodes::RETURN);
        let (end, far) = (32766u32, 32778u32);
        assert_eq!(code[far as usize], opcodes::RETURN);

        let mut labels = vec![label_at(end), label_at(far)];
        let branches = vec![
            NarrowBranch {
                at: 0,
                target: LabelId(0),
            },
            NarrowBranch {
                at: 4,
                target: LabelId(1),
            },
        ];

        let rebuilt = widen_branches(&code, &mut labels, &branches, &[], &mut []);
        // 32778 - 4 overflows outright; the 4 inserted bytes then put END at 32770, out of reach
        // of the first goto, so both end up wide.
        assert_eq!(rebuilt.len(), code.len() + 8);
        assert_eq!(rebuilt[2], opcodes::GOTO_W);
        assert_eq!(labels[0].position, end + 8);
        assert_eq!(labels[1].position, far + 8);
        assert_eq!(rebuilt[labels[1].position as usize], opcodes::RETURN);
    }

    #[test]
    fn uninitialized_operands_are_re_based() {
        // 0: goto END; 3: new #7; 6: 0x8000 nops; END: return
        let mut code = vec![opcodes::GOTO, 0, 0, opcodes::NEW, 0, 7];
        code.extend(std::iter::repeat(opcodes::NOP).take(0x8000));
        let end = code.len() as u32;
        code.push(opcodes::RETURN);
        let mut labels = vec![label_at(end)];
        let branches = vec![NarrowBranch {
            at: 0,
            target: LabelId(0),
        }];
        let mut frames = vec![DeclaredFrame {
            offset: 6,
            locals: vec![],
            stack: vec![VerificationType::Uninitialized(3)],
        }];

        let rebuilt = widen_branches(&code, &mut labels, &branches, &[], &mut frames);
        // The goto grew by 4, moving the `new` from 3 to 7
        assert_eq!(rebuilt[7], opcodes::NEW);
        assert_eq!(frames[0].offset, 10);
        assert_eq!(frames[0].stack, vec![VerificationType::Uninitialized(7)]);
    }

    #[test]
    fn switch_tables_are_re_based() {
        // 0: goto far; 3: tableswitch over one key; then filler and targets
        let mut code = vec![opcodes::GOTO, 0, 0];
        code.push(opcodes::TABLESWITCH);
        // at 3, padding to 4
        while code.len() % 4 != 0 {
            code.push(0);
        }
        code.extend_from_slice(&[0u8; 12]); // default, low, high (rewritten from the record)
        code.extend_from_slice(&[0u8; 4]); // one table entry
        let switch_end = code.len() as u32;
        code.extend(std::iter::repeat(opcodes::NOP).take(0x8000));
        let end = code.len() as u32;
        code.push(opcodes::RETURN);

        let mut labels = vec![label_at(end), label_at(switch_end)];
        let branches = vec![NarrowBranch {
            at: 0,
            target: LabelId(0),
        }];
        let switches = vec![SwitchSite::Table {
            at: 3,
            default: LabelId(1),
            low: 7,
            targets: vec![LabelId(0)],
        }];

        let rebuilt = widen_branches(&code, &mut labels, &branches, &switches, &mut []);
        assert_eq!(rebuilt.len(), code.len() + 4);

        // Switch moved from 3 to 7; padding stays 0 bytes long either way
        let switch_at = 7usize;
        assert_eq!(rebuilt[switch_at], opcodes::TABLESWITCH);
        let operands = switch_at + 1;
        assert_eq!(
            BigEndian::read_i32(&rebuilt[operands..operands + 4]),
            (labels[1].position - switch_at as u32) as i32,
        );
        assert_eq!(BigEndian::read_i32(&rebuilt[operands + 4..operands + 8]), 7);
        assert_eq!(BigEndian::read_i32(&rebuilt[operands + 8..operands + 12]), 7);
        assert_eq!(
            BigEndian::read_i32(&rebuilt[operands + 12..operands + 16]),
            (labels[0].position - switch_at as u32) as i32,
        );
    }
}
