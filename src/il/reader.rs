//! Stack-to-tree import of a raw method body.
//!
//! The external decoder hands over a flat list of `(offset, opcode)` pairs plus
//! the exception regions. [`read_function`] turns that into a [`Function`]:
//!
//! - basic blocks are split at offset 0, at branch targets, after terminators
//!   and at region boundaries,
//! - the evaluation stack is simulated: every produced value is stored into a
//!   fresh stack slot (`stloc S_n(value)`) and consumers read `ldloc S_n`,
//! - values still on the stack at a block boundary are copied into the entry
//!   slots of the successor,
//! - every `try`/`finally` region becomes a [`InstructionKind::TryFinally`] with
//!   its own containers, placed in a wrapper block of the enclosing region.
//!
//! Stack slots are cleaned up later by inlining and dead store removal; the
//! reader makes no attempt to produce nested expressions itself.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::Arc,
};

use strum::IntoStaticStr;

use crate::{
    il::{
        patterns::infer_type, BinaryNumericOperator, CallKind, ComparisonKind, ContainerKind,
        Function, ILRange, InstrId, InstructionKind, VarId, VariableKind,
    },
    typesystem::{Field, MethodReference, Parameter, PrimitiveKind, Sign, StackType, Type},
    utils::LongSet,
    Error, Result,
};

/// The subset of CIL opcodes the reader understands.
///
/// Branch operands are absolute target offsets.
#[derive(Debug, Clone, PartialEq, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum OpCode {
    /// `nop`
    Nop,
    /// `ldarg n`
    LdArg(u16),
    /// `ldarga n`
    LdArgA(u16),
    /// `starg n`
    StArg(u16),
    /// `ldloc n`
    LdLoc(u16),
    /// `ldloca n`
    LdLocA(u16),
    /// `stloc n`
    StLoc(u16),
    /// `ldnull`
    LdNull,
    /// `ldc.i4 n`
    LdcI4(i32),
    /// `ldc.i8 n`
    LdcI8(i64),
    /// `ldc.r8 n`
    LdcR8(f64),
    /// `ldstr s`
    LdStr(String),
    /// `dup`
    Dup,
    /// `pop`
    Pop,
    /// Arithmetic and bitwise operators; `check_overflow` selects the `.ovf`
    /// forms, `sign` the `.un` forms.
    Binary {
        /// Operator.
        op: BinaryNumericOperator,
        /// `.ovf`
        check_overflow: bool,
        /// `.un` yields [`Sign::Unsigned`].
        sign: Sign,
    },
    /// `ceq`
    Ceq,
    /// `cgt` / `cgt.un`
    Cgt(Sign),
    /// `clt` / `clt.un`
    Clt(Sign),
    /// `conv.*`
    Conv {
        /// Target type.
        target: PrimitiveKind,
        /// `conv.ovf.*`
        check_overflow: bool,
        /// `.un`: interpret the input as unsigned.
        sign: Sign,
    },
    /// `br`
    Br(u32),
    /// `brtrue`
    BrTrue(u32),
    /// `brfalse`
    BrFalse(u32),
    /// `beq`, `bne.un`, `blt`, ...: compare the two top values and branch.
    BranchCompare {
        /// Comparison.
        kind: ComparisonKind,
        /// Signedness of ordered comparisons.
        sign: Sign,
        /// Target.
        target: u32,
    },
    /// `switch`
    Switch(Vec<u32>),
    /// `leave`
    Leave(u32),
    /// `endfinally`
    EndFinally,
    /// `ret`
    Ret,
    /// `throw`
    Throw,
    /// `call`
    Call(Arc<MethodReference>),
    /// `callvirt`
    CallVirt(Arc<MethodReference>),
    /// `newobj`
    NewObj(Arc<MethodReference>),
    /// `ldfld`
    LdFld(Arc<Field>),
    /// `ldflda`
    LdFlda(Arc<Field>),
    /// `stfld`
    StFld(Arc<Field>),
    /// `ldsfld`
    LdsFld(Arc<Field>),
    /// `ldsflda`
    LdsFlda(Arc<Field>),
    /// `stsfld`
    StsFld(Arc<Field>),
    /// `ldobj`
    LdObj(Type),
    /// `stobj`
    StObj(Type),
    /// `ldelema`
    LdElema(Type),
    /// `isinst`
    IsInst(Type),
    /// `unbox.any`
    UnboxAny(Type),
}

impl OpCode {
    fn is_terminator(&self) -> bool {
        matches!(
            self,
            OpCode::Br(_)
                | OpCode::Switch(_)
                | OpCode::Leave(_)
                | OpCode::EndFinally
                | OpCode::Ret
                | OpCode::Throw
        )
    }

    fn branch_targets(&self) -> Vec<u32> {
        match self {
            OpCode::Br(t) | OpCode::BrTrue(t) | OpCode::BrFalse(t) | OpCode::Leave(t) => vec![*t],
            OpCode::BranchCompare { target, .. } => vec![*target],
            OpCode::Switch(targets) => targets.clone(),
            _ => Vec::new(),
        }
    }

    fn ends_block(&self) -> bool {
        self.is_terminator()
            || matches!(
                self,
                OpCode::BrTrue(_) | OpCode::BrFalse(_) | OpCode::BranchCompare { .. }
            )
    }
}

/// One decoded instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct RawInstruction {
    /// Byte offset of the opcode.
    pub offset: u32,
    /// Opcode with operand.
    pub op: OpCode,
}

impl RawInstruction {
    /// Creates an instruction at `offset`.
    #[must_use]
    pub fn new(offset: u32, op: OpCode) -> Self {
        RawInstruction { offset, op }
    }
}

/// A `try`/`finally` region; all ranges are half-open byte offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionRegion {
    /// First byte of the protected block.
    pub try_start: u32,
    /// One past the protected block.
    pub try_end: u32,
    /// First byte of the handler.
    pub handler_start: u32,
    /// One past the handler.
    pub handler_end: u32,
}

/// A method body as delivered by the decoder.
#[derive(Debug, Clone, Default)]
pub struct RawMethodBody {
    /// Display name of the method.
    pub name: String,
    /// Type of `this` for instance methods.
    pub this_type: Option<Type>,
    /// Declared parameters, excluding `this`.
    pub parameters: Vec<Parameter>,
    /// Declared local types, by index.
    pub locals: Vec<Type>,
    /// Declared return type.
    pub return_type: Type,
    /// Decoded instructions in offset order.
    pub instructions: Vec<RawInstruction>,
    /// Total size of the IL stream in bytes.
    pub code_size: u32,
    /// `try`/`finally` regions, any nesting order.
    pub exception_regions: Vec<ExceptionRegion>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScopeKind {
    Body,
    Try(usize),
    Finally,
}

#[derive(Debug)]
struct Scope {
    start: u32,
    end: u32,
    kind: ScopeKind,
    parent: Option<usize>,
    container: InstrId,
}

/// State of one protected region while reading.
#[derive(Debug)]
struct RegionState {
    try_finally: InstrId,
    wrapper: Option<InstrId>,
    leave_target: Option<u32>,
}

struct Reader<'a> {
    body: &'a RawMethodBody,
    function: Function,
    arguments: Vec<VarId>,
    locals: Vec<VarId>,
    scopes: Vec<Scope>,
    regions: Vec<RegionState>,
    blocks: BTreeMap<u32, InstrId>,
    entry_stacks: HashMap<u32, Vec<VarId>>,
    next_slot: usize,
}

/// Reads one method body into a [`Function`].
///
/// # Arguments
///
/// * `body` - The decoded method body
///
/// # Errors
///
/// Returns [`Error::Malformed`] for stack underflow, inconsistent stack heights,
/// branches into another region or to a non-instruction offset, unknown
/// argument or local indices, and control falling off the end of a region.
/// Returns [`Error::NotSupported`] for leaves that cross more than one region.
pub fn read_function(body: &RawMethodBody) -> Result<Function> {
    let mut reader = Reader::new(body);
    reader.declare_variables();
    reader.build_scopes()?;
    reader.create_blocks()?;
    reader.translate()?;
    reader.place_blocks()?;
    log::debug!(
        "read {}: {} blocks, {} variables",
        body.name,
        reader.blocks.len(),
        reader.function.variable_count()
    );
    Ok(reader.function)
}

impl<'a> Reader<'a> {
    fn new(body: &'a RawMethodBody) -> Self {
        Reader {
            body,
            function: Function::new(body.name.clone(), body.return_type.clone()),
            arguments: Vec::new(),
            locals: Vec::new(),
            scopes: Vec::new(),
            regions: Vec::new(),
            blocks: BTreeMap::new(),
            entry_stacks: HashMap::new(),
            next_slot: 0,
        }
    }

    fn declare_variables(&mut self) {
        let mut index = 0u16;
        if let Some(this_type) = &self.body.this_type {
            let this = self
                .function
                .add_variable(VariableKind::This, this_type.clone(), "this", Some(0));
            self.arguments.push(this);
            index += 1;
        }
        for parameter in &self.body.parameters {
            let var = self.function.add_variable(
                VariableKind::Parameter,
                parameter.ty.clone(),
                parameter.name.clone(),
                Some(index),
            );
            self.arguments.push(var);
            index += 1;
        }
        for (i, ty) in self.body.locals.iter().enumerate() {
            let var = self.function.add_variable(
                VariableKind::Local,
                ty.clone(),
                format!("V_{}", i),
                u16::try_from(i).ok(),
            );
            self.locals.push(var);
        }
    }

    fn build_scopes(&mut self) -> Result<()> {
        let body_container = self.function.body();
        self.scopes.push(Scope {
            start: 0,
            end: self.body.code_size,
            kind: ScopeKind::Body,
            parent: None,
            container: body_container,
        });

        // Outer regions first so parents exist before children.
        let mut regions: Vec<(usize, &ExceptionRegion)> =
            self.body.exception_regions.iter().enumerate().collect();
        regions.sort_by_key(|(_, r)| (r.try_start, std::cmp::Reverse(r.handler_end)));

        for (_, region) in regions {
            if region.try_start >= region.try_end || region.handler_start >= region.handler_end {
                return Err(malformed_error!(
                    "empty exception region at IL_{:04x}",
                    region.try_start
                ));
            }
            let parent = self.innermost_scope(region.try_start);
            let parent_scope = &self.scopes[parent];
            if region.try_end > parent_scope.end || region.handler_end > parent_scope.end {
                return Err(malformed_error!(
                    "exception region at IL_{:04x} overlaps its enclosing region",
                    region.try_start
                ));
            }

            let region_index = self.regions.len();
            let try_container = self.function.create_container(ContainerKind::Normal);
            let finally_container = self.function.create_container(ContainerKind::Normal);
            let try_finally = self.function.create(InstructionKind::TryFinally {
                try_block: try_container,
                finally_block: finally_container,
            });
            self.regions.push(RegionState {
                try_finally,
                wrapper: None,
                leave_target: None,
            });

            self.scopes.push(Scope {
                start: region.try_start,
                end: region.try_end,
                kind: ScopeKind::Try(region_index),
                parent: Some(parent),
                container: try_container,
            });
            self.scopes.push(Scope {
                start: region.handler_start,
                end: region.handler_end,
                kind: ScopeKind::Finally,
                parent: Some(parent),
                container: finally_container,
            });
        }
        Ok(())
    }

    fn innermost_scope(&self, offset: u32) -> usize {
        self.scopes
            .iter()
            .enumerate()
            .filter(|(_, s)| s.start <= offset && offset < s.end)
            .min_by_key(|(_, s)| s.end - s.start)
            .map_or(0, |(i, _)| i)
    }

    fn create_blocks(&mut self) -> Result<()> {
        let offsets: BTreeSet<u32> = self.body.instructions.iter().map(|i| i.offset).collect();
        let mut starts = BTreeSet::new();
        if let Some(first) = self.body.instructions.first() {
            starts.insert(first.offset);
        }
        for scope in &self.scopes[1..] {
            starts.insert(scope.start);
            if scope.end < self.body.code_size {
                starts.insert(scope.end);
            }
        }
        for (i, inst) in self.body.instructions.iter().enumerate() {
            for target in inst.op.branch_targets() {
                if !offsets.contains(&target) {
                    return Err(malformed_error!(
                        "branch at IL_{:04x} targets IL_{:04x}, which is not an instruction",
                        inst.offset,
                        target
                    ));
                }
                starts.insert(target);
            }
            if inst.op.ends_block() {
                if let Some(next) = self.body.instructions.get(i + 1) {
                    starts.insert(next.offset);
                }
            }
        }

        for start in starts {
            if !offsets.contains(&start) {
                return Err(malformed_error!(
                    "region boundary IL_{:04x} is not an instruction",
                    start
                ));
            }
            let block = self.function.create_block_with_label(start);
            self.blocks.insert(start, block);
        }

        // Wrapper labels come after all IL offsets, keeping labels unique.
        for region in 0..self.regions.len() {
            let wrapper = self.function.create_block();
            self.function
                .push_instruction(wrapper, self.regions[region].try_finally)?;
            self.regions[region].wrapper = Some(wrapper);
        }
        Ok(())
    }

    fn block_end(&self, start: u32) -> u32 {
        self.blocks
            .range(start + 1..)
            .next()
            .map_or(self.body.code_size, |(offset, _)| *offset)
    }

    fn instruction_end(&self, index: usize) -> u32 {
        self.body
            .instructions
            .get(index + 1)
            .map_or(self.body.code_size, |next| next.offset)
    }

    fn translate(&mut self) -> Result<()> {
        let starts: Vec<u32> = self.blocks.keys().copied().collect();
        let mut index = 0;
        for start in starts {
            let end = self.block_end(start);
            let block = self.blocks[&start];
            let scope = self.innermost_scope(start);
            let mut stack = self.entry_stacks.entry(start).or_default().clone();

            while index < self.body.instructions.len() && self.body.instructions[index].offset < start {
                index += 1;
            }
            let mut terminated = false;
            while index < self.body.instructions.len() && self.body.instructions[index].offset < end {
                let range = ILRange::new(self.body.instructions[index].offset, self.instruction_end(index));
                terminated = self.translate_instruction(index, range, block, scope, &mut stack)?;
                index += 1;
            }
            if !terminated {
                if end >= self.scopes[scope].end {
                    return Err(malformed_error!(
                        "control falls off the end of a region after IL_{:04x}",
                        start
                    ));
                }
                self.emit_branch(block, scope, end, &stack, ILRange::default())?;
            }
        }
        Ok(())
    }

    /// `brtrue`/`brfalse` on an object reference test against null.
    fn branch_condition(&mut self, value: InstrId, negate: bool, range: ILRange) -> InstrId {
        if self.function.result_type(value) == StackType::O {
            let null = self.function.create(InstructionKind::LdNull);
            let kind = if negate {
                ComparisonKind::Equality
            } else {
                ComparisonKind::Inequality
            };
            return self.function.create_at(
                InstructionKind::Comp {
                    kind,
                    sign: Sign::None,
                    left: value,
                    right: null,
                },
                range,
            );
        }
        if negate {
            self.function
                .create_at(InstructionKind::LogicNot(value), range)
        } else {
            value
        }
    }

    fn new_slot(&mut self, ty: Type) -> VarId {
        let name = format!("S_{}", self.next_slot);
        self.next_slot += 1;
        self.function
            .add_variable(VariableKind::StackSlot, ty, name, None)
    }

    fn push_value(
        &mut self,
        block: InstrId,
        value: InstrId,
        stack: &mut Vec<VarId>,
    ) -> Result<()> {
        let ty = infer_type(&self.function, value);
        let slot = self.new_slot(ty);
        let store = self.function.create(InstructionKind::StLoc {
            variable: slot,
            value,
        });
        self.function.push_instruction(block, store)?;
        stack.push(slot);
        Ok(())
    }

    fn pop(&mut self, stack: &mut Vec<VarId>, offset: u32) -> Result<InstrId> {
        let slot = stack
            .pop()
            .ok_or_else(|| malformed_error!("stack underflow at IL_{:04x}", offset))?;
        Ok(self.function.create(InstructionKind::LdLoc(slot)))
    }

    fn pop_many(&mut self, stack: &mut Vec<VarId>, count: usize, offset: u32) -> Result<Vec<InstrId>> {
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            values.push(self.pop(stack, offset)?);
        }
        values.reverse();
        Ok(values)
    }

    fn argument(&self, index: u16, offset: u32) -> Result<VarId> {
        self.arguments
            .get(usize::from(index))
            .copied()
            .ok_or_else(|| malformed_error!("unknown argument {} at IL_{:04x}", index, offset))
    }

    fn local(&self, index: u16, offset: u32) -> Result<VarId> {
        self.locals
            .get(usize::from(index))
            .copied()
            .ok_or_else(|| malformed_error!("unknown local {} at IL_{:04x}", index, offset))
    }

    /// Resolves a branch from `scope` to `target`: a block of the same region, or
    /// the wrapper block when entering a protected region at its first instruction.
    fn resolve_target(&self, scope: usize, target: u32, offset: u32) -> Result<InstrId> {
        let target_scope = self.innermost_scope(target);
        if target_scope == scope {
            return self
                .blocks
                .get(&target)
                .copied()
                .ok_or_else(|| malformed_error!("no block at IL_{:04x}", target));
        }
        let entered = &self.scopes[target_scope];
        if let ScopeKind::Try(region) = entered.kind {
            if entered.parent == Some(scope) && entered.start == target {
                if let Some(wrapper) = self.regions[region].wrapper {
                    return Ok(wrapper);
                }
            }
        }
        Err(malformed_error!(
            "branch at IL_{:04x} into another region (IL_{:04x})",
            offset,
            target
        ))
    }

    /// Copies the live stack into the successor's entry slots and emits `br`.
    fn emit_branch(
        &mut self,
        block: InstrId,
        scope: usize,
        target: u32,
        stack: &[VarId],
        range: ILRange,
    ) -> Result<()> {
        self.emit_stack_copies(block, target, stack, range.start)?;
        let target_block = self.resolve_target(scope, target, range.start)?;
        let branch = self
            .function
            .create_at(InstructionKind::Branch { target: target_block }, range);
        self.function.push_instruction(block, branch)
    }

    fn emit_stack_copies(
        &mut self,
        block: InstrId,
        target: u32,
        stack: &[VarId],
        offset: u32,
    ) -> Result<()> {
        let entry = match self.entry_stacks.get(&target) {
            Some(entry) => entry.clone(),
            None => {
                let entry: Vec<VarId> = stack
                    .iter()
                    .map(|v| {
                        let ty = self.function.variable(*v).ty.clone();
                        self.new_slot(ty)
                    })
                    .collect();
                self.entry_stacks.insert(target, entry.clone());
                entry
            }
        };
        if entry.len() != stack.len() {
            return Err(malformed_error!(
                "stack height {} at IL_{:04x} does not match {} at IL_{:04x}",
                stack.len(),
                offset,
                entry.len(),
                target
            ));
        }
        for (source, destination) in stack.iter().zip(entry) {
            let load = self.function.create(InstructionKind::LdLoc(*source));
            let copy = self.function.create(InstructionKind::StLoc {
                variable: destination,
                value: load,
            });
            self.function.push_instruction(block, copy)?;
        }
        Ok(())
    }

    /// Translates one opcode; returns `true` if it ended the block.
    #[allow(clippy::too_many_lines)]
    fn translate_instruction(
        &mut self,
        index: usize,
        range: ILRange,
        block: InstrId,
        scope: usize,
        stack: &mut Vec<VarId>,
    ) -> Result<bool> {
        let offset = range.start;
        let body: &'a RawMethodBody = self.body;
        let op = &body.instructions[index].op;
        log::trace!("IL_{:04x}: {}", offset, <&'static str>::from(op));
        let kind = match op {
            OpCode::Nop => return Ok(false),
            OpCode::LdArg(i) => InstructionKind::LdLoc(self.argument(*i, offset)?),
            OpCode::LdArgA(i) => InstructionKind::LdLoca(self.argument(*i, offset)?),
            OpCode::LdLoc(i) => InstructionKind::LdLoc(self.local(*i, offset)?),
            OpCode::LdLocA(i) => InstructionKind::LdLoca(self.local(*i, offset)?),
            OpCode::StArg(i) | OpCode::StLoc(i) => {
                let variable = if matches!(op, OpCode::StArg(_)) {
                    self.argument(*i, offset)?
                } else {
                    self.local(*i, offset)?
                };
                let value = self.pop(stack, offset)?;
                let store = self
                    .function
                    .create_at(InstructionKind::StLoc { variable, value }, range);
                self.function.push_instruction(block, store)?;
                return Ok(false);
            }
            OpCode::LdNull => InstructionKind::LdNull,
            OpCode::LdcI4(v) => InstructionKind::LdcI4(*v),
            OpCode::LdcI8(v) => InstructionKind::LdcI8(*v),
            OpCode::LdcR8(v) => InstructionKind::LdcF(*v),
            OpCode::LdStr(s) => InstructionKind::LdStr(s.clone()),
            OpCode::Dup => {
                let top = *stack
                    .last()
                    .ok_or_else(|| malformed_error!("dup on empty stack at IL_{:04x}", offset))?;
                InstructionKind::LdLoc(top)
            }
            OpCode::Pop => {
                self.pop(stack, offset)?;
                return Ok(false);
            }
            OpCode::Binary {
                op,
                check_overflow,
                sign,
            } => {
                let right = self.pop(stack, offset)?;
                let left = self.pop(stack, offset)?;
                InstructionKind::BinaryNumeric {
                    op: *op,
                    left,
                    right,
                    check_overflow: *check_overflow,
                    sign: *sign,
                }
            }
            OpCode::Ceq | OpCode::Cgt(_) | OpCode::Clt(_) => {
                let (kind, sign) = match op {
                    OpCode::Cgt(sign) => (ComparisonKind::GreaterThan, *sign),
                    OpCode::Clt(sign) => (ComparisonKind::LessThan, *sign),
                    _ => (ComparisonKind::Equality, Sign::None),
                };
                let right = self.pop(stack, offset)?;
                let left = self.pop(stack, offset)?;
                InstructionKind::Comp {
                    kind,
                    sign,
                    left,
                    right,
                }
            }
            OpCode::Conv {
                target,
                check_overflow,
                sign,
            } => InstructionKind::Conv {
                argument: self.pop(stack, offset)?,
                target: *target,
                check_overflow: *check_overflow,
                sign: *sign,
            },
            OpCode::Br(target) => {
                let target = *target;
                self.emit_branch(block, scope, target, stack, range)?;
                return Ok(true);
            }
            OpCode::BrTrue(target) | OpCode::BrFalse(target) => {
                let value = self.pop(stack, offset)?;
                let negate = matches!(op, OpCode::BrFalse(_));
                let condition = self.branch_condition(value, negate, range);
                self.emit_conditional(block, scope, *target, condition, stack, range)?;
                return Ok(true);
            }
            OpCode::BranchCompare { kind, sign, target } => {
                let right = self.pop(stack, offset)?;
                let left = self.pop(stack, offset)?;
                let condition = self.function.create_at(
                    InstructionKind::Comp {
                        kind: *kind,
                        sign: *sign,
                        left,
                        right,
                    },
                    range,
                );
                self.emit_conditional(block, scope, *target, condition, stack, range)?;
                return Ok(true);
            }
            OpCode::Switch(targets) => {
                let value = self.pop(stack, offset)?;
                let mut by_target: BTreeMap<u32, Vec<i64>> = BTreeMap::new();
                for (case, target) in targets.iter().enumerate() {
                    by_target.entry(*target).or_default().push(case as i64);
                }
                let mut sections = Vec::new();
                for (target, cases) in by_target {
                    self.emit_stack_copies(block, target, stack, offset)?;
                    let target_block = self.resolve_target(scope, target, offset)?;
                    let branch = self
                        .function
                        .create(InstructionKind::Branch { target: target_block });
                    sections.push(self.function.create(InstructionKind::SwitchSection {
                        labels: LongSet::from_values(cases),
                        body: branch,
                    }));
                }
                let fallthrough = range.end;
                self.emit_stack_copies(block, fallthrough, stack, offset)?;
                let default_block = self.resolve_target(scope, fallthrough, offset)?;
                let default_branch = self
                    .function
                    .create(InstructionKind::Branch { target: default_block });
                let covered = LongSet::range(0, targets.len() as i64 - 1);
                sections.push(self.function.create(InstructionKind::SwitchSection {
                    labels: covered.invert(),
                    body: default_branch,
                }));
                let switch = self
                    .function
                    .create_at(InstructionKind::Switch { value, sections }, range);
                self.function.push_instruction(block, switch)?;
                return Ok(true);
            }
            OpCode::Leave(target) => {
                let target = *target;
                stack.clear();
                self.emit_leave(block, scope, target, range)?;
                return Ok(true);
            }
            OpCode::EndFinally => {
                if self.scopes[scope].kind != ScopeKind::Finally {
                    return Err(malformed_error!(
                        "endfinally outside a finally handler at IL_{:04x}",
                        offset
                    ));
                }
                let container = self.scopes[scope].container;
                let nop = self.function.create(InstructionKind::Nop);
                let leave = self.function.create_at(
                    InstructionKind::Leave {
                        target: container,
                        value: nop,
                    },
                    range,
                );
                self.function.push_instruction(block, leave)?;
                return Ok(true);
            }
            OpCode::Ret => {
                if self.scopes[scope].kind != ScopeKind::Body {
                    return Err(malformed_error!(
                        "ret inside a protected region at IL_{:04x}",
                        offset
                    ));
                }
                let value = if matches!(self.body.return_type, Type::Void) {
                    self.function.create(InstructionKind::Nop)
                } else {
                    self.pop(stack, offset)?
                };
                let body = self.function.body();
                let leave = self
                    .function
                    .create_at(InstructionKind::Leave { target: body, value }, range);
                self.function.push_instruction(block, leave)?;
                return Ok(true);
            }
            OpCode::Throw => {
                let value = self.pop(stack, offset)?;
                let throw = self.function.create_at(InstructionKind::Throw(value), range);
                self.function.push_instruction(block, throw)?;
                return Ok(true);
            }
            OpCode::Call(method) | OpCode::CallVirt(method) | OpCode::NewObj(method) => {
                let method = Arc::clone(method);
                let kind = match op {
                    OpCode::Call(_) => CallKind::Call,
                    OpCode::CallVirt(_) => CallKind::CallVirt,
                    _ => CallKind::NewObj,
                };
                let count = if kind == CallKind::NewObj {
                    method.signature.parameters.len()
                } else {
                    method.argument_count()
                };
                let arguments = self.pop_many(stack, count, offset)?;
                let returns_void =
                    kind != CallKind::NewObj && matches!(method.signature.return_type, Type::Void);
                let call = self.function.create_at(
                    InstructionKind::Call {
                        kind,
                        method,
                        arguments,
                    },
                    range,
                );
                if returns_void {
                    self.function.push_instruction(block, call)?;
                } else {
                    self.push_value(block, call, stack)?;
                }
                return Ok(false);
            }
            OpCode::LdFld(field) | OpCode::LdsFld(field) => {
                let field = Arc::clone(field);
                let ty = field.ty.clone();
                let address = if matches!(op, OpCode::LdFld(_)) {
                    let target = self.pop(stack, offset)?;
                    self.function
                        .create_at(InstructionKind::LdFlda { target, field }, range)
                } else {
                    self.function
                        .create_at(InstructionKind::LdsFlda { field }, range)
                };
                InstructionKind::LdObj {
                    target: address,
                    ty,
                }
            }
            OpCode::LdFlda(field) => {
                let field = Arc::clone(field);
                InstructionKind::LdFlda {
                    target: self.pop(stack, offset)?,
                    field,
                }
            }
            OpCode::LdsFlda(field) => InstructionKind::LdsFlda {
                field: Arc::clone(field),
            },
            OpCode::StFld(field) | OpCode::StsFld(field) => {
                let field = Arc::clone(field);
                let ty = field.ty.clone();
                let value = self.pop(stack, offset)?;
                let address = if matches!(op, OpCode::StFld(_)) {
                    let target = self.pop(stack, offset)?;
                    self.function
                        .create_at(InstructionKind::LdFlda { target, field }, range)
                } else {
                    self.function
                        .create_at(InstructionKind::LdsFlda { field }, range)
                };
                let store = self.function.create_at(
                    InstructionKind::StObj {
                        target: address,
                        value,
                        ty,
                    },
                    range,
                );
                self.function.push_instruction(block, store)?;
                return Ok(false);
            }
            OpCode::LdObj(ty) => {
                let ty = ty.clone();
                InstructionKind::LdObj {
                    target: self.pop(stack, offset)?,
                    ty,
                }
            }
            OpCode::StObj(ty) => {
                let ty = ty.clone();
                let value = self.pop(stack, offset)?;
                let target = self.pop(stack, offset)?;
                let store = self
                    .function
                    .create_at(InstructionKind::StObj { target, value, ty }, range);
                self.function.push_instruction(block, store)?;
                return Ok(false);
            }
            OpCode::LdElema(ty) => {
                let ty = ty.clone();
                let index = self.pop(stack, offset)?;
                let array = self.pop(stack, offset)?;
                InstructionKind::LdElema { array, index, ty }
            }
            OpCode::IsInst(ty) => {
                let ty = ty.clone();
                InstructionKind::IsInst {
                    argument: self.pop(stack, offset)?,
                    ty,
                }
            }
            OpCode::UnboxAny(ty) => {
                let ty = ty.clone();
                InstructionKind::UnboxAny {
                    argument: self.pop(stack, offset)?,
                    ty,
                }
            }
        };
        let value = self.function.create_at(kind, range);
        self.push_value(block, value, stack)?;
        Ok(false)
    }

    /// `if (condition) br target` followed by the fall-through branch.
    fn emit_conditional(
        &mut self,
        block: InstrId,
        scope: usize,
        target: u32,
        condition: InstrId,
        stack: &[VarId],
        range: ILRange,
    ) -> Result<()> {
        self.emit_stack_copies(block, target, stack, range.start)?;
        let target_block = self.resolve_target(scope, target, range.start)?;
        let branch = self
            .function
            .create(InstructionKind::Branch { target: target_block });
        let nop = self.function.create(InstructionKind::Nop);
        let branch_if = self.function.create_at(
            InstructionKind::IfInstruction {
                condition,
                true_inst: branch,
                false_inst: nop,
            },
            range,
        );
        self.function.push_instruction(block, branch_if)?;
        if range.end >= self.scopes[scope].end {
            return Err(malformed_error!(
                "conditional branch at IL_{:04x} falls off its region",
                range.start
            ));
        }
        self.emit_branch(block, scope, range.end, stack, ILRange::default())
    }

    /// `leave target`: a branch inside the region, or leaving the region and
    /// continuing at `target` in the enclosing one.
    fn emit_leave(&mut self, block: InstrId, scope: usize, target: u32, range: ILRange) -> Result<()> {
        let target_scope = self.innermost_scope(target);
        if target_scope == scope {
            return self.emit_branch(block, scope, target, &[], range);
        }
        let current = &self.scopes[scope];
        let ScopeKind::Try(region) = current.kind else {
            return Err(malformed_error!(
                "leave at IL_{:04x} outside a protected region",
                range.start
            ));
        };
        if current.parent != Some(target_scope) {
            return Err(Error::NotSupported(format!(
                "leave at IL_{:04x} crosses more than one region",
                range.start
            )));
        }
        match self.regions[region].leave_target {
            Some(existing) if existing != target => {
                return Err(Error::NotSupported(format!(
                    "protected region left to IL_{:04x} and IL_{:04x}",
                    existing, target
                )))
            }
            _ => self.regions[region].leave_target = Some(target),
        }
        let container = current.container;
        let nop = self.function.create(InstructionKind::Nop);
        let leave = self.function.create_at(
            InstructionKind::Leave {
                target: container,
                value: nop,
            },
            range,
        );
        self.function.push_instruction(block, leave)
    }

    /// Moves every block into the container of its region, in offset order, and
    /// completes the wrapper blocks of protected regions.
    fn place_blocks(&mut self) -> Result<()> {
        let mut placement: Vec<Vec<(u32, InstrId)>> = vec![Vec::new(); self.scopes.len()];
        for (&start, &block) in &self.blocks {
            placement[self.innermost_scope(start)].push((start, block));
        }
        for scope in &self.scopes {
            if let ScopeKind::Try(region) = scope.kind {
                if let Some(wrapper) = self.regions[region].wrapper {
                    placement[scope.parent.unwrap_or(0)].push((scope.start, wrapper));
                }
            }
        }

        for region in 0..self.regions.len() {
            let Some(target) = self.regions[region].leave_target else {
                continue;
            };
            let Some(parent) = self
                .scopes
                .iter()
                .find(|s| s.kind == ScopeKind::Try(region))
                .and_then(|s| s.parent)
            else {
                continue;
            };
            let Some(wrapper) = self.regions[region].wrapper else {
                continue;
            };
            let target_block = self.resolve_target(parent, target, target)?;
            let branch = self
                .function
                .create(InstructionKind::Branch { target: target_block });
            self.function.push_instruction(wrapper, branch)?;
        }

        for (scope_index, mut blocks) in placement.into_iter().enumerate() {
            blocks.sort_by_key(|(start, _)| *start);
            let container = self.scopes[scope_index].container;
            for (_, block) in blocks {
                self.function.add_block(container, block)?;
            }
        }
        Ok(())
    }
}
