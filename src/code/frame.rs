//! Stack map frame compression
//!
//! Frames are declared in full (complete locals and stack type lists) and only compressed when
//! the method body is finalized, by diffing each frame against the previous stored one and
//! picking the most compact of the `StackMapTable` encodings.

use crate::class_file::{StackMapFrame, VerificationType};
use crate::errors::Error;

/// A frame as declared by the front end: full type lists at a bytecode offset
///
/// `Long` and `Double` appear once per value (the trailing phantom slot is implicit, matching the
/// attribute encoding, not the variable indexing).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredFrame {
    pub offset: u32,
    pub locals: Vec<VerificationType>,
    pub stack: Vec<VerificationType>,
}

/// Compress declared frames into `StackMapTable` entries
///
/// `initial_locals` is the implicit frame at offset 0 derived from the method descriptor; it is
/// the diffing baseline and is never itself emitted. Frames are sorted by offset. Declaring two
/// identical frames at one offset collapses them; two different frames at one offset is
/// [`Error::ConflictingFrames`].
pub(crate) fn compress_frames(
    initial_locals: Vec<VerificationType>,
    mut frames: Vec<DeclaredFrame>,
) -> Result<Vec<StackMapFrame>, Error> {
    frames.sort_by_key(|frame| frame.offset);

    let mut compressed: Vec<StackMapFrame> = Vec::with_capacity(frames.len());
    let mut previous_locals = initial_locals;
    let mut previous: Option<DeclaredFrame> = None;

    for frame in frames {
        if let Some(prev) = &previous {
            if prev.offset == frame.offset {
                if *prev == frame {
                    continue;
                }
                return Err(Error::ConflictingFrames {
                    offset: frame.offset,
                });
            }
        }

        let offset_delta = match &previous {
            None => frame.offset as u16,
            Some(prev) => (frame.offset - prev.offset - 1) as u16,
        };

        let entry = diff_frame(&previous_locals, &frame, offset_delta);
        log::trace!("stack map frame at {}: {:?}", frame.offset, entry);
        compressed.push(entry);

        previous_locals = frame.locals.clone();
        previous = Some(frame);
    }

    Ok(compressed)
}

fn diff_frame(
    previous_locals: &[VerificationType],
    frame: &DeclaredFrame,
    offset_delta: u16,
) -> StackMapFrame {
    let locals = &frame.locals;
    let stack = &frame.stack;

    if stack.is_empty() {
        if locals == previous_locals {
            return StackMapFrame::Same { offset_delta };
        }

        // Chopped: a strict prefix of the previous locals, at most 3 shorter
        if locals.len() < previous_locals.len()
            && previous_locals.len() - locals.len() <= 3
            && *locals == previous_locals[..locals.len()]
        {
            return StackMapFrame::Chop {
                offset_delta,
                chopped: (previous_locals.len() - locals.len()) as u8,
            };
        }

        // Appended: previous locals plus at most 3 extra
        if locals.len() > previous_locals.len()
            && locals.len() - previous_locals.len() <= 3
            && locals[..previous_locals.len()] == *previous_locals
        {
            return StackMapFrame::Append {
                offset_delta,
                locals: locals[previous_locals.len()..].to_vec(),
            };
        }
    } else if stack.len() == 1 && locals == previous_locals {
        return StackMapFrame::SameLocalsOneStack {
            offset_delta,
            stack: stack[0],
        };
    }

    StackMapFrame::Full {
        offset_delta,
        locals: locals.clone(),
        stack: stack.clone(),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::class_file::{ClassConstantIndex, ConstantIndex};

    fn frame(offset: u32, locals: Vec<VerificationType>, stack: Vec<VerificationType>) -> DeclaredFrame {
        DeclaredFrame {
            offset,
            locals,
            stack,
        }
    }

    #[test]
    fn same_and_one_stack_item() {
        let initial = vec![VerificationType::Integer];
        let frames = vec![
            frame(8, vec![VerificationType::Integer], vec![]),
            frame(20, vec![VerificationType::Integer], vec![VerificationType::Float]),
        ];
        let compressed = compress_frames(initial, frames).unwrap();
        assert_eq!(
            compressed,
            vec![
                StackMapFrame::Same { offset_delta: 8 },
                StackMapFrame::SameLocalsOneStack {
                    offset_delta: 11,
                    stack: VerificationType::Float,
                },
            ],
        );
    }

    #[test]
    fn chop_and_append() {
        let initial = vec![
            VerificationType::Integer,
            VerificationType::Long,
            VerificationType::Float,
        ];
        let frames = vec![
            frame(4, vec![VerificationType::Integer], vec![]),
            frame(
                9,
                vec![VerificationType::Integer, VerificationType::Double],
                vec![],
            ),
        ];
        let compressed = compress_frames(initial, frames).unwrap();
        assert_eq!(
            compressed,
            vec![
                StackMapFrame::Chop {
                    offset_delta: 4,
                    chopped: 2,
                },
                StackMapFrame::Append {
                    offset_delta: 4,
                    locals: vec![VerificationType::Double],
                },
            ],
        );
    }

    #[test]
    fn unrelated_locals_force_full() {
        let initial = vec![VerificationType::Integer];
        let frames = vec![frame(
            3,
            vec![VerificationType::Object(ClassConstantIndex(ConstantIndex(7)))],
            vec![VerificationType::Null, VerificationType::Integer],
        )];
        let compressed = compress_frames(initial, frames).unwrap();
        assert_eq!(
            compressed,
            vec![StackMapFrame::Full {
                offset_delta: 3,
                locals: vec![VerificationType::Object(ClassConstantIndex(ConstantIndex(7)))],
                stack: vec![VerificationType::Null, VerificationType::Integer],
            }],
        );
    }

    #[test]
    fn duplicate_declarations_collapse() {
        let frames = vec![
            frame(6, vec![], vec![]),
            frame(6, vec![], vec![]),
        ];
        let compressed = compress_frames(vec![], frames).unwrap();
        assert_eq!(compressed.len(), 1);
    }

    #[test]
    fn conflicting_declarations_error() {
        let frames = vec![
            frame(6, vec![], vec![]),
            frame(6, vec![VerificationType::Integer], vec![]),
        ];
        match compress_frames(vec![], frames) {
            Err(Error::ConflictingFrames { offset: 6 }) => (),
            other => panic!("expected conflicting frames error, got {:?}", other),
        }
    }

    #[test]
    fn first_delta_is_absolute_then_gapped() {
        let frames = vec![frame(0, vec![], vec![]), frame(1, vec![], vec![])];
        let compressed = compress_frames(vec![], frames).unwrap();
        assert_eq!(
            compressed,
            vec![
                StackMapFrame::Same { offset_delta: 0 },
                StackMapFrame::Same { offset_delta: 0 },
            ],
        );
    }
}
