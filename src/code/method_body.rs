//! Bytecode emission for one method body
//!
//! [`MethodBody`] is an append-only code buffer plus the bookkeeping needed to finish it: a label
//! arena, the basic-block chain and edges for the stack fixed point, exception handler ranges,
//! declared stack map frames, and the branch records the widening pass feeds on.
//!
//! Instructions are written in one pass. Backward jumps encode their offset immediately; forward
//! jumps queue a patch on the target label. Dead code after an unconditional transfer is emitted
//! without a current block, so it never contributes to the computed maxima.

use crate::class_file::{
    BytecodeArray, ClassConstantIndex, Code, ConstantIndex, ConstantPool, ExceptionHandler,
    FieldRefConstantIndex, InvokeDynamicConstantIndex, LineNumber, LineNumberTable,
    MethodAccessFlags, MethodRefConstantIndex, StackMapTable, VerificationType,
};
use crate::code::frame::{compress_frames, DeclaredFrame};
use crate::code::label::{
    compute_max_stack, mark_subroutine, Edge, ForwardRef, Label, LabelId, LabelStatus,
};
use crate::code::opcodes::{self, OpShape};
use crate::code::widen::{widen_branches, NarrowBranch, SwitchSite};
use crate::descriptors;
use crate::errors::Error;

/// What the writer computes on behalf of the caller when a body is finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputeMode {
    /// Compute `max_stack`/`max_locals` and compress declared stack map frames
    Frames,

    /// Compute `max_stack`/`max_locals` only
    MaxsOnly,

    /// Trust the caller's declared maxima; no graph is built
    PassThrough,
}

/// Width of a loadable constant, selecting between `ldc`/`ldc_w` and `ldc2_w`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadableWidth {
    /// `int`, `float`, `String`, `Class`, method types and handles
    One,

    /// `long` and `double`
    Two,
}

struct HandlerSpec {
    start: LabelId,
    end: LabelId,
    handler: LabelId,
    catch_type: Option<ClassConstantIndex>,
}

pub struct MethodBody {
    compute: ComputeMode,

    pub(crate) access_flags: MethodAccessFlags,
    pub(crate) method_name: String,
    pub(crate) descriptor: String,
    this_class: String,
    is_static: bool,
    is_constructor: bool,

    code: Vec<u8>,
    labels: Vec<Label>,

    /// Last block in the ordered chain (the entry block is always `LabelId(0)`)
    chain_tail: LabelId,

    /// Block currently receiving instructions, `None` in dead code and in pass-through mode
    current_block: Option<LabelId>,

    /// Stack height relative to the current block's input
    current_stack: i32,

    /// Running maximum of touched local slots (`u32` so `wide` forms near the top cannot wrap)
    max_locals: u32,

    handlers: Vec<HandlerSpec>,
    frames: Vec<DeclaredFrame>,
    lines: Vec<(LabelId, u16)>,

    branches: Vec<NarrowBranch>,
    switches: Vec<SwitchSite>,

    /// Subroutine entries in bit order
    subroutine_starts: Vec<LabelId>,

    /// One entry per `jsr`: the subroutine entered and the block after the `jsr`
    jsr_followers: Vec<(LabelId, LabelId)>,

    /// Blocks ending in `ret`
    ret_blocks: Vec<LabelId>,

    /// Some 16-bit branch operand overflowed and was stored wrapped
    needs_widening: bool,
}

impl MethodBody {
    pub(crate) fn new(
        compute: ComputeMode,
        this_class: &str,
        access_flags: MethodAccessFlags,
        method_name: &str,
        descriptor: &str,
    ) -> MethodBody {
        let mut entry = Label::new();
        entry.status |= LabelStatus::RESOLVED;

        let is_static = access_flags.contains(MethodAccessFlags::STATIC);
        let receiver = if is_static { 0 } else { 1 };
        MethodBody {
            compute,
            access_flags,
            method_name: method_name.to_owned(),
            descriptor: descriptor.to_owned(),
            this_class: this_class.to_owned(),
            is_static,
            is_constructor: method_name == "<init>",
            code: vec![],
            labels: vec![entry],
            chain_tail: LabelId(0),
            current_block: if compute == ComputeMode::PassThrough {
                None
            } else {
                Some(LabelId(0))
            },
            current_stack: 0,
            max_locals: descriptors::argument_slots(descriptor) as u32 + receiver,
            handlers: vec![],
            frames: vec![],
            lines: vec![],
            branches: vec![],
            switches: vec![],
            subroutine_starts: vec![],
            jsr_followers: vec![],
            ret_blocks: vec![],
            needs_widening: false,
        }
    }

    fn graph_active(&self) -> bool {
        self.compute != ComputeMode::PassThrough
    }

    /// Offset the next instruction will be written at
    pub fn current_offset(&self) -> u32 {
        self.code.len() as u32
    }

    pub fn fresh_label(&mut self) -> LabelId {
        let id = LabelId(self.labels.len() as u32);
        self.labels.push(Label::new());
        id
    }

    /// Fix `label` at the current offset and patch its pending forward references
    ///
    /// Starts a new basic block, except for pure line-number labels (which never split a block)
    /// and, under [`ComputeMode::Frames`], for labels landing on a block that begins at this very
    /// offset (those fold into it).
    pub fn place_label(&mut self, label: LabelId) {
        let position = self.current_offset();
        let overflowed = self.labels[label.index()].resolve(position, &mut self.code);
        self.needs_widening |= overflowed;

        if !self.graph_active() {
            return;
        }

        let status = self.labels[label.index()].status;
        if status.contains(LabelStatus::DEBUG) && !status.contains(LabelStatus::TARGET) {
            return;
        }

        if self.compute == ComputeMode::Frames {
            let tail = self.chain_tail;
            if self.current_block == Some(tail) && self.labels[tail.index()].position == position {
                self.labels[label.index()].redirect = Some(tail);
                let merged =
                    status & (LabelStatus::TARGET | LabelStatus::SUBROUTINE_START);
                self.labels[tail.index()].status |= merged;
                return;
            }
        }

        self.start_block(label, true);
    }

    /// Record that `line` starts at `label`
    ///
    /// A label used only for line numbers stays out of the block chain.
    pub fn line_number(&mut self, line: u16, label: LabelId) {
        if !self.labels[label.index()]
            .status
            .contains(LabelStatus::RESOLVED)
        {
            self.labels[label.index()].status |= LabelStatus::DEBUG;
        }
        self.labels[label.index()].line = Some(line);
        self.lines.push((label, line));
    }

    /// Cover `start..end` with `handler`; `None` catches everything (`finally` ranges)
    pub fn exception_handler(
        &mut self,
        start: LabelId,
        end: LabelId,
        handler: LabelId,
        catch_type: Option<ClassConstantIndex>,
    ) {
        for label in [start, end, handler] {
            self.labels[label.index()].status |= LabelStatus::TARGET;
        }
        self.handlers.push(HandlerSpec {
            start,
            end,
            handler,
            catch_type,
        });
    }

    /// Declare the full frame at the current offset (frame computation mode only)
    pub fn declare_frame(&mut self, locals: Vec<VerificationType>, stack: Vec<VerificationType>) {
        assert!(
            self.compute == ComputeMode::Frames,
            "frame declared outside of frame computation mode"
        );
        self.frames.push(DeclaredFrame {
            offset: self.current_offset(),
            locals,
            stack,
        });
    }

    /// No-operand instruction
    pub fn push_insn(&mut self, opcode: u8) {
        debug_assert!(matches!(
            opcodes::SHAPE[opcode as usize],
            OpShape::Fixed(0)
        ));
        self.code.push(opcode);
        self.apply_stack(opcodes::STACK_DELTA[opcode as usize] as i32);
        if matches!(opcode, opcodes::IRETURN..=opcodes::RETURN | opcodes::ATHROW) {
            self.end_block_dead();
        }
    }

    /// Local variable load, store or `ret`, in the shortest encoding
    pub fn push_var_insn(&mut self, opcode: u8, var: u16) {
        self.apply_stack(opcodes::STACK_DELTA[opcode as usize] as i32);

        let compact = match opcode {
            opcodes::ILOAD..=opcodes::ALOAD if var < 4 => {
                Some(26 + (opcode - opcodes::ILOAD) * 4 + var as u8)
            }
            opcodes::ISTORE..=opcodes::ASTORE if var < 4 => {
                Some(59 + (opcode - opcodes::ISTORE) * 4 + var as u8)
            }
            _ => None,
        };
        match compact {
            Some(compact) => self.code.push(compact),
            None if var <= u8::MAX as u16 => {
                self.code.push(opcode);
                self.code.push(var as u8);
            }
            None => {
                self.code.push(opcodes::WIDE);
                self.code.push(opcode);
                self.push_u16(var);
            }
        }

        let wide_value = matches!(
            opcode,
            opcodes::LLOAD | opcodes::DLOAD | opcodes::LSTORE | opcodes::DSTORE
        );
        self.use_local(var, wide_value);

        if opcode == opcodes::RET {
            if let Some(block) = self.current_block {
                self.labels[block.index()].status |= LabelStatus::ENDS_WITH_RET;
                self.ret_blocks.push(block);
            }
            self.end_block_dead();
        }
    }

    /// `bipush`, `sipush` or `newarray`
    pub fn push_int_insn(&mut self, opcode: u8, operand: i32) {
        self.code.push(opcode);
        match opcode {
            opcodes::BIPUSH => self.code.push(operand as i8 as u8),
            opcodes::SIPUSH => self.push_u16(operand as i16 as u16),
            opcodes::NEWARRAY => self.code.push(operand as u8),
            _ => panic!("not an int-operand instruction: {}", opcode),
        }
        self.apply_stack(opcodes::STACK_DELTA[opcode as usize] as i32);
    }

    /// `iinc`, switching to the `wide` form when either operand overflows the short one
    pub fn push_iinc(&mut self, var: u16, delta: i16) {
        if var <= u8::MAX as u16 && i8::try_from(delta).is_ok() {
            self.code.push(opcodes::IINC);
            self.code.push(var as u8);
            self.code.push(delta as i8 as u8);
        } else {
            self.code.push(opcodes::WIDE);
            self.code.push(opcodes::IINC);
            self.push_u16(var);
            self.push_u16(delta as u16);
        }
        self.use_local(var, false);
    }

    /// Load a constant: `ldc` or `ldc_w` for one-slot values, `ldc2_w` for two-slot ones
    pub fn push_ldc(&mut self, index: ConstantIndex, width: LoadableWidth) {
        match width {
            LoadableWidth::One => {
                if index.0 <= u8::MAX as u16 {
                    self.code.push(opcodes::LDC);
                    self.code.push(index.0 as u8);
                } else {
                    self.code.push(opcodes::LDC_W);
                    self.push_u16(index.0);
                }
                self.apply_stack(1);
            }
            LoadableWidth::Two => {
                self.code.push(opcodes::LDC2_W);
                self.push_u16(index.0);
                self.apply_stack(2);
            }
        }
    }

    /// `new`, `anewarray`, `checkcast` or `instanceof`
    pub fn push_type_insn(&mut self, opcode: u8, class: ClassConstantIndex) {
        self.code.push(opcode);
        self.push_u16(ConstantIndex::from(class).0);
        self.apply_stack(opcodes::STACK_DELTA[opcode as usize] as i32);
    }

    /// Field access; the descriptor drives the stack effect
    pub fn push_field_insn(
        &mut self,
        opcode: u8,
        field: FieldRefConstantIndex,
        descriptor: &str,
    ) {
        self.code.push(opcode);
        self.push_u16(ConstantIndex::from(field).0);
        let slots = descriptors::field_slots(descriptor);
        let delta = match opcode {
            opcodes::GETSTATIC => slots,
            opcodes::PUTSTATIC => -slots,
            opcodes::GETFIELD => slots - 1,
            opcodes::PUTFIELD => -slots - 1,
            _ => panic!("not a field instruction: {}", opcode),
        };
        self.apply_stack(delta);
    }

    /// Method invocation; the descriptor drives the stack effect
    pub fn push_method_insn(
        &mut self,
        opcode: u8,
        method: MethodRefConstantIndex,
        descriptor: &str,
    ) {
        self.code.push(opcode);
        self.push_u16(ConstantIndex::from(method).0);

        let mut delta = descriptors::invoke_stack_delta(descriptor);
        if opcode != opcodes::INVOKESTATIC {
            delta -= 1;
        }
        if opcode == opcodes::INVOKEINTERFACE {
            // Historical count operand: receiver plus argument slots, then a zero byte
            self.code
                .push((descriptors::argument_slots(descriptor) + 1) as u8);
            self.code.push(0);
        }
        self.apply_stack(delta);
    }

    pub fn push_invoke_dynamic(&mut self, index: InvokeDynamicConstantIndex, descriptor: &str) {
        self.code.push(opcodes::INVOKEDYNAMIC);
        self.push_u16(ConstantIndex::from(index).0);
        self.code.push(0);
        self.code.push(0);
        self.apply_stack(descriptors::invoke_stack_delta(descriptor));
    }

    pub fn push_multianewarray(&mut self, class: ClassConstantIndex, dimensions: u8) {
        assert!(dimensions >= 1, "multianewarray needs at least one dimension");
        self.code.push(opcodes::MULTIANEWARRAY);
        self.push_u16(ConstantIndex::from(class).0);
        self.code.push(dimensions);
        self.apply_stack(1 - dimensions as i32);
    }

    /// `goto`, `jsr` or a conditional branch to `target`
    ///
    /// Backward offsets are encoded immediately; forward ones leave a patch on the label. Either
    /// way the jump is recorded so an overflowing offset can be widened at the end.
    pub fn push_jump(&mut self, opcode: u8, target: LabelId) {
        debug_assert!(matches!(opcodes::SHAPE[opcode as usize], OpShape::Branch));
        let at = self.current_offset();

        if self.graph_active() {
            self.labels[target.index()].status |= LabelStatus::TARGET;
            if opcode == opcodes::JSR {
                self.note_subroutine_start(target);
            }
            if let Some(block) = self.current_block {
                let delta = match opcode {
                    opcodes::GOTO => self.current_stack,
                    opcodes::JSR => {
                        self.labels[block.index()].status |= LabelStatus::ENDS_WITH_JSR;
                        self.current_stack + 1
                    }
                    _ => {
                        self.apply_stack(opcodes::STACK_DELTA[opcode as usize] as i32);
                        self.current_stack
                    }
                };
                self.labels[block.index()]
                    .edges
                    .push(Edge::Normal { delta, target });
            }
        }

        self.code.push(opcode);
        if self.labels[target.index()]
            .status
            .contains(LabelStatus::RESOLVED)
        {
            let offset = self.labels[target.index()].position as i64 - at as i64;
            if i16::try_from(offset).is_err() {
                self.needs_widening = true;
            }
            self.push_u16(offset as i16 as u16);
        } else {
            self.labels[target.index()].add_forward_ref(ForwardRef::Narrow {
                source: at,
                patch: at + 1,
            });
            self.push_u16(0);
        }
        self.branches.push(NarrowBranch { at, target });

        match opcode {
            opcodes::GOTO => self.end_block_dead(),
            opcodes::JSR if self.graph_active() => {
                // The block after a jsr is entered through ret only, never by fallthrough
                let follower = self.fresh_label();
                self.labels[follower.index()].status |= LabelStatus::RESOLVED;
                self.labels[follower.index()].position = self.current_offset();
                self.start_block(follower, false);
                self.jsr_followers.push((target, follower));
            }
            _ => {}
        }
    }

    pub fn push_table_switch(
        &mut self,
        low: i32,
        high: i32,
        default: LabelId,
        targets: &[LabelId],
    ) {
        assert_eq!(
            targets.len() as i64,
            high as i64 - low as i64 + 1,
            "tableswitch needs one target per key"
        );
        let at = self.current_offset();
        self.apply_stack(-1);
        self.add_switch_edges(default, targets.iter().copied());

        self.code.push(opcodes::TABLESWITCH);
        while self.code.len() % 4 != 0 {
            self.code.push(0);
        }
        self.push_switch_offset(at, default);
        self.push_i32(low);
        self.push_i32(high);
        for target in targets {
            self.push_switch_offset(at, *target);
        }

        self.switches.push(SwitchSite::Table {
            at,
            default,
            low,
            targets: targets.to_vec(),
        });
        self.end_block_dead();
    }

    pub fn push_lookup_switch(&mut self, default: LabelId, pairs: &[(i32, LabelId)]) {
        assert!(
            pairs.windows(2).all(|pair| pair[0].0 < pair[1].0),
            "lookupswitch keys must be sorted and distinct"
        );
        let at = self.current_offset();
        self.apply_stack(-1);
        self.add_switch_edges(default, pairs.iter().map(|(_, target)| *target));

        self.code.push(opcodes::LOOKUPSWITCH);
        while self.code.len() % 4 != 0 {
            self.code.push(0);
        }
        self.push_switch_offset(at, default);
        self.push_i32(pairs.len() as i32);
        for (key, target) in pairs {
            self.push_i32(*key);
            self.push_switch_offset(at, *target);
        }

        self.switches.push(SwitchSite::Lookup {
            at,
            default,
            pairs: pairs.to_vec(),
        });
        self.end_block_dead();
    }

    /// Seal the body: run the stack fixed point, widen overflowed branches, compress frames, and
    /// assemble the `Code` attribute
    ///
    /// The declared maxima are used only in [`ComputeMode::PassThrough`]; otherwise the computed
    /// values win.
    pub fn finish(
        mut self,
        declared_max_stack: u16,
        declared_max_locals: u16,
        pool: &mut ConstantPool,
    ) -> Result<Code, Error> {
        for label in &self.labels {
            let dangling = !label.forward_refs.is_empty()
                || (label.status.contains(LabelStatus::TARGET)
                    && !label.status.contains(LabelStatus::RESOLVED));
            assert!(!dangling, "jump to a label that was never placed");
        }

        let computed_max_stack = if self.graph_active() {
            Some(self.run_fixed_point())
        } else {
            None
        };

        if self.needs_widening {
            log::debug!(
                "widening branches in {}-byte method body",
                self.code.len()
            );
            let widened = widen_branches(
                &self.code,
                &mut self.labels,
                &self.branches,
                &self.switches,
                &mut self.frames,
            );
            self.code = widened;
        }

        if self.code.len() > u16::MAX as usize {
            return Err(Error::MethodCodeOverflow {
                length: self.code.len(),
            });
        }

        let (max_stack, max_locals) = match computed_max_stack {
            None => (declared_max_stack, declared_max_locals),
            Some(stack) => {
                if stack > u16::MAX as u32 {
                    return Err(Error::MethodMaxOverflow { computed: stack });
                }
                if self.max_locals > u16::MAX as u32 {
                    return Err(Error::MethodMaxOverflow {
                        computed: self.max_locals,
                    });
                }
                (stack as u16, self.max_locals as u16)
            }
        };

        let exception_table = self
            .handlers
            .iter()
            .map(|handler| ExceptionHandler {
                start_pc: self.labels[handler.start.index()].position() as u16,
                end_pc: self.labels[handler.end.index()].position() as u16,
                handler_pc: self.labels[handler.handler.index()].position() as u16,
                catch_type: handler.catch_type,
            })
            .collect();

        let mut attributes = vec![];
        if !self.lines.is_empty() {
            let table = self
                .lines
                .iter()
                .map(|(label, line)| LineNumber {
                    start_pc: self.labels[label.index()].position() as u16,
                    line_number: *line,
                })
                .collect();
            attributes.push(pool.make_attribute(LineNumberTable(table))?);
        }
        if self.compute == ComputeMode::Frames && !self.frames.is_empty() {
            let initial = self.initial_locals(pool)?;
            let compressed = compress_frames(initial, std::mem::take(&mut self.frames))?;
            attributes.push(pool.make_attribute(StackMapTable(compressed))?);
        }

        Ok(Code {
            max_stack,
            max_locals,
            code_array: BytecodeArray(self.code),
            exception_table,
            attributes,
        })
    }

    /// Wire up exception and subroutine edges, then compute `max_stack`
    fn run_fixed_point(&mut self) -> u32 {
        self.end_block_dead();

        // Jump targets fold into other blocks in frame mode; route everything through the
        // canonical block before traversing
        for index in 0..self.labels.len() {
            for edge_index in 0..self.labels[index].edges.len() {
                let target = match self.labels[index].edges[edge_index] {
                    Edge::Normal { target, .. } | Edge::Exception { target } => target,
                };
                let resolved = canonical(&self.labels, target);
                if resolved != target {
                    match &mut self.labels[index].edges[edge_index] {
                        Edge::Normal { target, .. } | Edge::Exception { target } => {
                            *target = resolved
                        }
                    }
                }
            }
        }

        // Blocks covered by a handler can transfer to it at any point
        for handler_index in 0..self.handlers.len() {
            let start = canonical(&self.labels, self.handlers[handler_index].start);
            let end = canonical(&self.labels, self.handlers[handler_index].end);
            let target = canonical(&self.labels, self.handlers[handler_index].handler);

            let mut block = Some(start);
            while let Some(covered) = block {
                if covered == end {
                    break;
                }
                self.labels[covered.index()]
                    .edges
                    .push(Edge::Exception { target });
                block = self.labels[covered.index()].next_block;
            }
        }

        // Subroutine membership, then a `ret` edge to the follower of every calling `jsr`
        let mut starts: Vec<LabelId> = vec![];
        for start in &self.subroutine_starts {
            let start = canonical(&self.labels, *start);
            if !starts.contains(&start) {
                starts.push(start);
            }
        }
        for (bit, start) in starts.iter().enumerate() {
            self.labels[start.index()].status |= LabelStatus::SUBROUTINE_START;
            mark_subroutine(&mut self.labels, *start, bit as u16);
        }
        let jsr_followers = self.jsr_followers.clone();
        for ret_block in self.ret_blocks.clone() {
            for (jsr_target, follower) in jsr_followers.iter().copied() {
                let jsr_target = canonical(&self.labels, jsr_target);
                let bit = starts
                    .iter()
                    .position(|start| *start == jsr_target)
                    .expect("jsr target is a subroutine start") as u16;
                if self.labels[ret_block.index()].in_subroutine(bit) {
                    let delta = self.labels[ret_block.index()].output_stack_delta;
                    let target = canonical(&self.labels, follower);
                    self.labels[ret_block.index()]
                        .edges
                        .push(Edge::Normal { delta, target });
                }
            }
        }

        compute_max_stack(&mut self.labels, LabelId(0))
    }

    /// Locals of the implicit frame at offset 0, derived from the method descriptor
    fn initial_locals(&self, pool: &mut ConstantPool) -> Result<Vec<VerificationType>, Error> {
        let mut locals = vec![];
        if !self.is_static {
            locals.push(if self.is_constructor {
                VerificationType::UninitializedThis
            } else {
                VerificationType::Object(pool.intern_class(&self.this_class)?)
            });
        }
        locals.extend(descriptors::argument_verification_types(
            &self.descriptor,
            pool,
        )?);
        Ok(locals)
    }

    fn start_block(&mut self, label: LabelId, fallthrough: bool) {
        if let Some(block) = self.current_block {
            self.labels[block.index()].output_stack_delta = self.current_stack;
            if fallthrough {
                self.labels[block.index()].edges.push(Edge::Normal {
                    delta: self.current_stack,
                    target: label,
                });
            }
        }
        let tail = self.chain_tail;
        self.labels[tail.index()].next_block = Some(label);
        self.chain_tail = label;
        self.current_block = Some(label);
        self.current_stack = 0;
    }

    fn end_block_dead(&mut self) {
        if let Some(block) = self.current_block {
            self.labels[block.index()].output_stack_delta = self.current_stack;
        }
        self.current_block = None;
        self.current_stack = 0;
    }

    fn apply_stack(&mut self, delta: i32) {
        if let Some(block) = self.current_block {
            self.current_stack += delta;
            let label = &mut self.labels[block.index()];
            if self.current_stack > label.output_stack_max as i32 {
                label.output_stack_max = self.current_stack.min(u16::MAX as i32) as u16;
            }
        }
    }

    fn use_local(&mut self, var: u16, wide_value: bool) {
        let limit = var as u32 + if wide_value { 2 } else { 1 };
        if limit > self.max_locals {
            self.max_locals = limit;
        }
    }

    fn note_subroutine_start(&mut self, target: LabelId) {
        if !self.labels[target.index()]
            .status
            .contains(LabelStatus::SUBROUTINE_START)
        {
            self.labels[target.index()].status |= LabelStatus::SUBROUTINE_START;
            self.subroutine_starts.push(target);
        }
    }

    fn add_switch_edges(&mut self, default: LabelId, targets: impl Iterator<Item = LabelId>) {
        if !self.graph_active() {
            return;
        }
        self.labels[default.index()].status |= LabelStatus::TARGET;
        let block = self.current_block;
        if let Some(block) = block {
            let delta = self.current_stack;
            self.labels[block.index()]
                .edges
                .push(Edge::Normal {
                    delta,
                    target: default,
                });
        }
        for target in targets {
            self.labels[target.index()].status |= LabelStatus::TARGET;
            if let Some(block) = block {
                let delta = self.current_stack;
                self.labels[block.index()]
                    .edges
                    .push(Edge::Normal { delta, target });
            }
        }
    }

    fn push_switch_offset(&mut self, at: u32, target: LabelId) {
        if self.labels[target.index()]
            .status
            .contains(LabelStatus::RESOLVED)
        {
            let offset = self.labels[target.index()].position as i64 - at as i64;
            self.push_i32(offset as i32);
        } else {
            let patch = self.current_offset();
            self.labels[target.index()]
                .add_forward_ref(ForwardRef::Wide { source: at, patch });
            self.push_i32(0);
        }
    }

    fn push_u16(&mut self, value: u16) {
        self.code.extend_from_slice(&value.to_be_bytes());
    }

    fn push_i32(&mut self, value: i32) {
        self.code.extend_from_slice(&value.to_be_bytes());
    }
}

/// Follow redirects to the block a label was folded into
fn canonical(labels: &[Label], mut id: LabelId) -> LabelId {
    while let Some(next) = labels[id.index()].redirect {
        id = next;
    }
    id
}
