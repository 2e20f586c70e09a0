//! Labels, forward references, and the control-flow graph threaded through them
//!
//! A [`Label`] marks a bytecode position that may be referred to before it is known. Labels live
//! in an arena owned by the method body and are handled through copyable [`LabelId`] indices.
//! Every label doubles as the start of a basic block once the body is in graph mode: it carries
//! the block's relative stack effect, its outgoing edges, and its slot in the ordered block chain.

use byteorder::{BigEndian, ByteOrder};

/// Index into a method body's label arena
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct LabelId(pub(crate) u32);

impl LabelId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

bitflags::bitflags! {
    /// Lifecycle and role bits of a label
    pub struct LabelStatus: u16 {
        /// Introduced only to carry debug information (line numbers)
        const DEBUG = 0x01;

        /// Position is known; `position` is valid
        const RESOLVED = 0x02;

        /// Something jumps here (so the label cannot be elided from the chain)
        const TARGET = 0x04;

        /// A stack map frame is recorded at this label
        const STORE = 0x08;

        /// Reached by the stack fixed point
        const REACHABLE = 0x10;

        /// The block starting here ends with a `jsr`
        const ENDS_WITH_JSR = 0x20;

        /// The block starting here ends with a `ret`
        const ENDS_WITH_RET = 0x40;

        /// Entry block of a subroutine (a `jsr` target)
        const SUBROUTINE_START = 0x80;

        /// Scratch bit for the subroutine traversal
        const VISITED = 0x100;
    }
}

/// A branch operand emitted before its target was resolved
///
/// `source` is the offset the branch is relative to (the opcode byte, or the switch opcode for
/// switch defaults) and `patch` is where the placeholder operand sits in the code buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardRef {
    /// 16-bit signed offset slot
    Narrow { source: u32, patch: u32 },

    /// 32-bit signed offset slot (`goto_w`, `jsr_w`, switch table entries)
    Wide { source: u32, patch: u32 },
}

/// Outgoing control-flow edge of a basic block
#[derive(Debug, Clone, Copy)]
pub enum Edge {
    /// Ordinary transfer: the successor's input stack is this block's input plus `delta`
    Normal { delta: i32, target: LabelId },

    /// Transfer into an exception handler, whose input stack is exactly the thrown value
    Exception { target: LabelId },
}

/// A bytecode position that can be targeted before it is placed
#[derive(Debug)]
pub struct Label {
    pub status: LabelStatus,

    /// Bytecode offset, meaningful only once `RESOLVED` is set
    pub position: u32,

    /// Patches to drain when the label resolves
    pub forward_refs: Vec<ForwardRef>,

    /// Bit per subroutine this block belongs to
    pub subroutines: Vec<u32>,

    /// Absolute stack height at block entry, -1 until the fixed point visits the block
    pub input_stack: i32,

    /// Largest stack height inside the block, relative to its input
    pub output_stack_max: u16,

    /// Net stack change across the block (fallthrough delta)
    pub output_stack_delta: i32,

    /// Following block in emission order
    pub next_block: Option<LabelId>,

    /// Canonical block this label was folded into, when it resolved at a position that already
    /// had a block (frame computation mode only)
    pub redirect: Option<LabelId>,

    pub edges: Vec<Edge>,

    /// Line number recorded at this label, if any
    pub line: Option<u16>,
}

impl Label {
    pub(crate) fn new() -> Label {
        Label {
            status: LabelStatus::empty(),
            position: 0,
            forward_refs: vec![],
            subroutines: vec![],
            input_stack: -1,
            output_stack_max: 0,
            output_stack_delta: 0,
            next_block: None,
            redirect: None,
            edges: vec![],
            line: None,
        }
    }

    /// Resolved bytecode offset
    ///
    /// Panics if the label has not been placed. That is always a bug in the caller (a jump to a
    /// label that was never passed to `place_label`).
    pub fn position(&self) -> u32 {
        assert!(
            self.status.contains(LabelStatus::RESOLVED),
            "position of unresolved label"
        );
        self.position
    }

    pub(crate) fn add_forward_ref(&mut self, forward_ref: ForwardRef) {
        self.forward_refs.push(forward_ref);
    }

    /// Fix the label at `position` and patch every queued forward reference
    ///
    /// Narrow slots whose offset no longer fits in an `i16` are written wrapped; the return value
    /// reports whether that happened so the caller can schedule a widening pass. Called exactly
    /// once per label.
    pub(crate) fn resolve(&mut self, position: u32, code: &mut [u8]) -> bool {
        assert!(
            !self.status.contains(LabelStatus::RESOLVED),
            "label resolved twice"
        );
        self.status |= LabelStatus::RESOLVED;
        self.position = position;

        let mut overflowed = false;
        for forward_ref in self.forward_refs.drain(..) {
            match forward_ref {
                ForwardRef::Narrow { source, patch } => {
                    let offset = position as i64 - source as i64;
                    if i16::try_from(offset).is_err() {
                        overflowed = true;
                    }
                    let patch = patch as usize;
                    BigEndian::write_i16(&mut code[patch..patch + 2], offset as i16);
                }
                ForwardRef::Wide { source, patch } => {
                    let offset = (position as i64 - source as i64) as i32;
                    let patch = patch as usize;
                    BigEndian::write_i32(&mut code[patch..patch + 4], offset);
                }
            }
        }
        overflowed
    }

    pub(crate) fn in_subroutine(&self, subroutine: u16) -> bool {
        let word = (subroutine / 32) as usize;
        word < self.subroutines.len() && self.subroutines[word] & (1 << (subroutine % 32)) != 0
    }

    pub(crate) fn add_to_subroutine(&mut self, subroutine: u16) {
        let word = (subroutine / 32) as usize;
        if self.subroutines.len() <= word {
            self.subroutines.resize(word + 1, 0);
        }
        self.subroutines[word] |= 1 << (subroutine % 32);
    }
}

/// Mark every block reachable from `start` as belonging to subroutine `subroutine`
///
/// The traversal does not descend through a `jsr` into a nested subroutine's entry block; that
/// block is the start of its own subroutine and gets its own marking pass.
pub(crate) fn mark_subroutine(labels: &mut [Label], start: LabelId, subroutine: u16) {
    let mut worklist = vec![start];
    while let Some(block) = worklist.pop() {
        let block = block.index();
        if labels[block].in_subroutine(subroutine) {
            continue;
        }
        labels[block].add_to_subroutine(subroutine);

        let ends_with_jsr = labels[block].status.contains(LabelStatus::ENDS_WITH_JSR);
        for edge_index in 0..labels[block].edges.len() {
            let target = match labels[block].edges[edge_index] {
                Edge::Normal { target, .. } | Edge::Exception { target } => target,
            };
            if ends_with_jsr
                && labels[target.index()]
                    .status
                    .contains(LabelStatus::SUBROUTINE_START)
            {
                continue;
            }
            worklist.push(target);
        }
    }
}

/// Least-fixed-point computation of the maximum operand stack height
///
/// Seeds the entry block with input height 0 and propagates along edges until the inputs stop
/// growing. Heights are monotone and capped at `u16::MAX`, so the loop terminates. Returns the
/// maximum of `input + output_stack_max` over every visited block.
pub(crate) fn compute_max_stack(labels: &mut [Label], entry: LabelId) -> u32 {
    let cap = u16::MAX as i32;

    labels[entry.index()].input_stack = 0;
    let mut worklist = vec![entry];
    let mut max_stack = 0u32;

    while let Some(block) = worklist.pop() {
        let block = block.index();
        labels[block].status |= LabelStatus::REACHABLE;
        let input = labels[block].input_stack;

        let block_max = input + labels[block].output_stack_max as i32;
        if block_max as u32 > max_stack {
            max_stack = block_max as u32;
        }

        for edge_index in 0..labels[block].edges.len() {
            let (candidate, target) = match labels[block].edges[edge_index] {
                Edge::Normal { delta, target } => (input + delta, target),
                Edge::Exception { target } => (1, target),
            };
            assert!(candidate >= 0, "operand stack underflow across branch");
            let candidate = candidate.min(cap);
            if candidate > labels[target.index()].input_stack {
                labels[target.index()].input_stack = candidate;
                worklist.push(target);
            }
        }

        log::trace!(
            "stack fixed point: block at {} input {} block max {}",
            labels[block].position,
            input,
            block_max,
        );
    }

    max_stack
}

#[cfg(test)]
mod test {
    use super::*;

    fn arena(n: usize) -> Vec<Label> {
        (0..n).map(|_| Label::new()).collect()
    }

    #[test]
    fn forward_refs_patch_on_resolve() {
        let mut code = vec![0u8; 16];
        let mut label = Label::new();
        label.add_forward_ref(ForwardRef::Narrow { source: 0, patch: 1 });
        label.add_forward_ref(ForwardRef::Wide { source: 3, patch: 4 });

        let overflowed = label.resolve(12, &mut code);
        assert!(!overflowed);
        assert_eq!(label.position(), 12);
        assert_eq!(BigEndian::read_i16(&code[1..3]), 12);
        assert_eq!(BigEndian::read_i32(&code[4..8]), 9);
        assert!(label.forward_refs.is_empty());
    }

    #[test]
    fn narrow_overflow_is_reported() {
        let mut code = vec![0u8; 0x9000];
        let mut label = Label::new();
        label.add_forward_ref(ForwardRef::Narrow { source: 0, patch: 1 });
        assert!(label.resolve(0x8000, &mut code));
    }

    #[test]
    #[should_panic(expected = "unresolved label")]
    fn unresolved_position_panics() {
        Label::new().position();
    }

    #[test]
    fn fixed_point_on_a_cycle() {
        // 0 -> 1 (delta 2), 1 -> 0 (delta -2), 1 -> 2 (delta -1)
        let mut labels = arena(3);
        labels[0].output_stack_max = 2;
        labels[0].edges.push(Edge::Normal { delta: 2, target: LabelId(1) });
        labels[1].output_stack_max = 1;
        labels[1].edges.push(Edge::Normal { delta: -2, target: LabelId(0) });
        labels[1].edges.push(Edge::Normal { delta: -1, target: LabelId(2) });
        labels[2].output_stack_max = 0;

        let max_stack = compute_max_stack(&mut labels, LabelId(0));
        assert_eq!(max_stack, 3);
        assert_eq!(labels[0].input_stack, 0);
        assert_eq!(labels[1].input_stack, 2);
        assert_eq!(labels[2].input_stack, 1);
    }

    #[test]
    fn exception_edges_seed_height_one() {
        let mut labels = arena(2);
        labels[0].output_stack_max = 5;
        labels[0].edges.push(Edge::Exception { target: LabelId(1) });
        labels[1].output_stack_max = 2;

        let max_stack = compute_max_stack(&mut labels, LabelId(0));
        assert_eq!(labels[1].input_stack, 1);
        assert_eq!(max_stack, 5);
    }

    #[test]
    fn subroutine_marking_stops_at_nested_entries() {
        let mut labels = arena(4);
        labels[0].edges.push(Edge::Normal { delta: 0, target: LabelId(1) });
        labels[1].status |= LabelStatus::ENDS_WITH_JSR;
        labels[1].edges.push(Edge::Normal { delta: 1, target: LabelId(2) });
        labels[1].edges.push(Edge::Normal { delta: 0, target: LabelId(3) });
        labels[2].status |= LabelStatus::SUBROUTINE_START;

        mark_subroutine(&mut labels, LabelId(0), 0);
        assert!(labels[0].in_subroutine(0));
        assert!(labels[1].in_subroutine(0));
        assert!(!labels[2].in_subroutine(0));
        assert!(labels[3].in_subroutine(0));
    }

    #[test]
    fn subroutine_bitset_spans_words() {
        let mut label = Label::new();
        label.add_to_subroutine(37);
        assert!(label.in_subroutine(37));
        assert!(!label.in_subroutine(5));
        assert_eq!(label.subroutines.len(), 2);
    }
}
