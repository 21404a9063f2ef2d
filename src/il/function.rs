//! The per-function instruction arena and its mutation API.
//!
//! # Architecture
//!
//! A [`Function`] owns every instruction and variable of one method body.
//! Instructions live in a flat arena addressed by [`InstrId`]; the tree shape
//! is expressed through child ids stored in each [`InstructionKind`] and a
//! parent back-link in every node.
//!
//! All structural edits go through the methods in this module
//! ([`Function::replace_child`], [`Function::set_instruction`], ...). Each edit
//! updates, as one step:
//!
//! - the parent links of the old and the new child,
//! - the cached [`InstructionFlags`] of the edited node and its ancestors,
//! - the use lists of every variable read, written or address-taken inside the
//!   attached or detached subtree,
//! - the incoming-edge counters of branch targets.
//!
//! Only instructions reachable from the body container count as *connected*.
//! Detached subtrees stay in the arena (ids are never reused) but contribute
//! nothing to variable counts, so they can be rebuilt and re-attached freely.

use crate::{
    il::{
        BlockKind, ContainerKind, ILRange, InstrId, Instruction, InstructionFlags,
        InstructionKind, VarId, Variable, VariableKind,
    },
    typesystem::{StackType, Type},
    Error, Result,
};

/// One method body in instruction-tree form.
#[derive(Debug, Clone)]
pub struct Function {
    name: String,
    return_type: Type,
    instructions: Vec<Instruction>,
    variables: Vec<Variable>,
    body: InstrId,
    next_label: u32,
}

impl Function {
    /// Creates a function whose body is an empty block container.
    #[must_use]
    pub fn new(name: impl Into<String>, return_type: Type) -> Self {
        let mut function = Function {
            name: name.into(),
            return_type,
            instructions: Vec::new(),
            variables: Vec::new(),
            body: InstrId(0),
            next_label: 0,
        };
        let body = function.create(InstructionKind::BlockContainer {
            blocks: Vec::new(),
            kind: ContainerKind::Normal,
        });
        function.body = body;
        function.instructions[body.index()].connected = true;
        function
    }

    /// Display name of the function.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared return type.
    #[must_use]
    pub fn return_type(&self) -> &Type {
        &self.return_type
    }

    /// The root container.
    #[must_use]
    pub fn body(&self) -> InstrId {
        self.body
    }

    /// Number of arena slots, including detached instructions.
    #[must_use]
    pub fn arena_size(&self) -> usize {
        self.instructions.len()
    }

    // ---------------------------------------------------------------------
    // Variables
    // ---------------------------------------------------------------------

    /// Adds a variable and returns its id.
    pub fn add_variable(
        &mut self,
        kind: VariableKind,
        ty: Type,
        name: impl Into<String>,
        index: Option<u16>,
    ) -> VarId {
        let id = VarId(self.variables.len() as u32);
        self.variables
            .push(Variable::new(kind, ty, name.into(), index));
        id
    }

    /// Adds a compiler-introduced stack slot named after its id.
    pub fn add_stack_slot(&mut self, ty: Type) -> VarId {
        let name = format!("S_{}", self.variables.len());
        self.add_variable(VariableKind::StackSlot, ty, name, None)
    }

    /// Returns the variable `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` does not belong to this function.
    #[must_use]
    pub fn variable(&self, id: VarId) -> &Variable {
        &self.variables[id.index()]
    }

    /// Mutable access to the declared properties of a variable.
    pub fn variable_mut(&mut self, id: VarId) -> &mut Variable {
        &mut self.variables[id.index()]
    }

    /// Iterates all variables.
    pub fn variables(&self) -> impl Iterator<Item = (VarId, &Variable)> + '_ {
        self.variables
            .iter()
            .enumerate()
            .map(|(i, v)| (VarId(i as u32), v))
    }

    /// Number of variables.
    #[must_use]
    pub fn variable_count(&self) -> usize {
        self.variables.len()
    }

    // ---------------------------------------------------------------------
    // Node accessors
    // ---------------------------------------------------------------------

    /// The kind of instruction `id`.
    #[must_use]
    pub fn kind(&self, id: InstrId) -> &InstructionKind {
        &self.instructions[id.index()].kind
    }

    /// The parent of `id`, `None` for the body and for detached roots.
    #[must_use]
    pub fn parent(&self, id: InstrId) -> Option<InstrId> {
        self.instructions[id.index()].parent
    }

    /// IL offsets `id` was read from.
    #[must_use]
    pub fn range(&self, id: InstrId) -> ILRange {
        self.instructions[id.index()].range
    }

    /// Sets the IL offsets of `id`.
    pub fn set_range(&mut self, id: InstrId, range: ILRange) {
        self.instructions[id.index()].range = range;
    }

    /// Cached semantic flags of the subtree rooted at `id`.
    #[must_use]
    pub fn flags(&self, id: InstrId) -> InstructionFlags {
        self.instructions[id.index()].flags
    }

    /// Returns `true` if the subtree at `id` has no observable effect.
    #[must_use]
    pub fn is_pure(&self, id: InstrId) -> bool {
        self.flags(id).is_pure()
    }

    /// Returns `true` if `id` is attached to the body.
    #[must_use]
    pub fn is_connected(&self, id: InstrId) -> bool {
        self.instructions[id.index()].connected
    }

    /// Children of `id` in evaluation order.
    #[must_use]
    pub fn children(&self, id: InstrId) -> Vec<InstrId> {
        self.kind(id).children()
    }

    /// Position of `id` among its parent's children.
    #[must_use]
    pub fn child_index(&self, id: InstrId) -> Option<usize> {
        let parent = self.parent(id)?;
        self.children(parent).iter().position(|&c| c == id)
    }

    /// Evaluation-stack type of the value produced by `id`.
    #[must_use]
    pub fn result_type(&self, id: InstrId) -> StackType {
        match self.kind(id) {
            InstructionKind::LdcI4(_) | InstructionKind::Comp { .. } | InstructionKind::LogicNot(_) => {
                StackType::I4
            }
            InstructionKind::LdcI8(_) => StackType::I8,
            InstructionKind::LdcF(_) => StackType::F,
            InstructionKind::LdStr(_) | InstructionKind::LdNull | InstructionKind::IsInst { .. } => {
                StackType::O
            }
            InstructionKind::LdLoc(v) | InstructionKind::StLoc { variable: v, .. } => {
                self.variable(*v).ty.stack_type()
            }
            InstructionKind::LdLoca(_)
            | InstructionKind::LdFlda { .. }
            | InstructionKind::LdsFlda { .. }
            | InstructionKind::LdElema { .. } => StackType::Ref,
            InstructionKind::LdObj { ty, .. }
            | InstructionKind::StObj { ty, .. }
            | InstructionKind::UnboxAny { ty, .. }
            | InstructionKind::CompoundAssignment { ty, .. } => ty.stack_type(),
            InstructionKind::BinaryNumeric {
                op, left, right, ..
            } => {
                let l = self.result_type(*left);
                if op.is_shift() {
                    return l;
                }
                let r = self.result_type(*right);
                match (l, r) {
                    (StackType::F, _) | (_, StackType::F) => StackType::F,
                    (StackType::I8, _) | (_, StackType::I8) => StackType::I8,
                    (StackType::I | StackType::Ref, _) | (_, StackType::I | StackType::Ref) => {
                        StackType::I
                    }
                    _ => l,
                }
            }
            InstructionKind::Conv { target, .. } => target.stack_type(),
            InstructionKind::Call { kind, method, .. } => match kind {
                crate::il::CallKind::NewObj => method.declaring_type.stack_type(),
                _ => method.signature.return_type.stack_type(),
            },
            InstructionKind::IfInstruction { true_inst, .. } => self.result_type(*true_inst),
            InstructionKind::Block {
                final_instruction, ..
            } => final_instruction.map_or(StackType::Void, |f| self.result_type(f)),
            InstructionKind::Nop
            | InstructionKind::Branch { .. }
            | InstructionKind::Leave { .. }
            | InstructionKind::Throw(_)
            | InstructionKind::BlockContainer { .. }
            | InstructionKind::TryFinally { .. }
            | InstructionKind::Using { .. }
            | InstructionKind::Switch { .. }
            | InstructionKind::SwitchSection { .. } => StackType::Void,
        }
    }

    // ---------------------------------------------------------------------
    // Creation
    // ---------------------------------------------------------------------

    /// Creates a detached instruction without IL origin.
    ///
    /// The children referenced by `kind` must be detached; they become owned
    /// by the new instruction.
    pub fn create(&mut self, kind: InstructionKind) -> InstrId {
        self.create_at(kind, ILRange::default())
    }

    /// Creates a detached instruction with the given IL origin.
    pub fn create_at(&mut self, kind: InstructionKind, range: ILRange) -> InstrId {
        let id = InstrId(self.instructions.len() as u32);
        let children = kind.children();
        self.instructions.push(Instruction::new(kind, range));
        for child in children {
            debug_assert!(
                self.instructions[child.index()].parent.is_none(),
                "child {:?} already owned",
                child
            );
            self.instructions[child.index()].parent = Some(id);
        }
        if let InstructionKind::Block { label, .. } = self.kind(id) {
            self.next_label = self.next_label.max(label.saturating_add(1));
        }
        let flags = self.compute_flags(id);
        self.instructions[id.index()].flags = flags;
        id
    }

    /// Creates an empty control-flow block with a fresh label.
    pub fn create_block(&mut self) -> InstrId {
        self.create_block_of_kind(BlockKind::ControlFlow)
    }

    /// Creates an empty block of the given kind with a fresh label.
    pub fn create_block_of_kind(&mut self, kind: BlockKind) -> InstrId {
        let label = self.next_label;
        self.create(InstructionKind::Block {
            instructions: Vec::new(),
            final_instruction: None,
            kind,
            label,
            incoming_edges: 0,
        })
    }

    /// Creates an empty control-flow block with the given label.
    pub fn create_block_with_label(&mut self, label: u32) -> InstrId {
        self.create(InstructionKind::Block {
            instructions: Vec::new(),
            final_instruction: None,
            kind: BlockKind::ControlFlow,
            label,
            incoming_edges: 0,
        })
    }

    /// Creates an empty container of the given kind.
    pub fn create_container(&mut self, kind: ContainerKind) -> InstrId {
        self.create(InstructionKind::BlockContainer {
            blocks: Vec::new(),
            kind,
        })
    }

    /// Deep-copies the subtree at `id` into a new detached subtree.
    ///
    /// Branch targets and variables are shared with the original.
    pub fn clone_subtree(&mut self, id: InstrId) -> InstrId {
        let mut kind = self.kind(id).clone();
        let originals = kind.children();
        let copies: Vec<InstrId> = originals.iter().map(|&c| self.clone_subtree(c)).collect();
        for (slot, copy) in kind.children_mut().into_iter().zip(copies) {
            *slot = copy;
        }
        let range = self.range(id);
        self.create_at(kind, range)
    }

    // ---------------------------------------------------------------------
    // Structural edits
    // ---------------------------------------------------------------------

    /// Replaces the child `old` of `parent` with the detached instruction `new`.
    ///
    /// `old` becomes a detached root.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AnalysisFailed`] if `old` is not a child of `parent` or
    /// `new` is still owned by another instruction.
    pub fn replace_child(&mut self, parent: InstrId, old: InstrId, new: InstrId) -> Result<()> {
        if old == new {
            return Ok(());
        }
        self.ensure_detached(new)?;

        let slot = self.instructions[parent.index()]
            .kind
            .children_mut()
            .into_iter()
            .find(|slot| **slot == old);
        match slot {
            Some(slot) => *slot = new,
            None => {
                return Err(Error::AnalysisFailed(format!(
                    "{:?} is not a child of {:?}",
                    old, parent
                )))
            }
        }

        self.release(old);
        self.adopt(parent, new);
        self.update_flags(parent);
        Ok(())
    }

    /// Replaces `old` in its parent with `new`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AnalysisFailed`] if `old` has no parent or `new` is owned.
    pub fn replace_with(&mut self, old: InstrId, new: InstrId) -> Result<()> {
        let parent = self.parent(old).ok_or_else(|| {
            Error::AnalysisFailed(format!("{:?} has no parent to be replaced in", old))
        })?;
        self.replace_child(parent, old, new)
    }

    /// Takes `id` out of its parent, leaving a `nop` in its slot, and returns it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AnalysisFailed`] if `id` has no parent.
    pub fn detach(&mut self, id: InstrId) -> Result<InstrId> {
        let nop = self.create(InstructionKind::Nop);
        self.replace_with(id, nop)?;
        Ok(id)
    }

    /// Instructions of a block (empty for non-blocks).
    #[must_use]
    pub fn block_instructions(&self, block: InstrId) -> &[InstrId] {
        match self.kind(block) {
            InstructionKind::Block { instructions, .. } => instructions,
            _ => &[],
        }
    }

    /// Final instruction of a block.
    #[must_use]
    pub fn block_final(&self, block: InstrId) -> Option<InstrId> {
        match self.kind(block) {
            InstructionKind::Block {
                final_instruction, ..
            } => *final_instruction,
            _ => None,
        }
    }

    /// Label of a block.
    #[must_use]
    pub fn block_label(&self, block: InstrId) -> Option<u32> {
        match self.kind(block) {
            InstructionKind::Block { label, .. } => Some(*label),
            _ => None,
        }
    }

    /// Inserts the detached `inst` at `index` in `block`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AnalysisFailed`] if `block` is not a block, `index` is
    /// out of range, or `inst` is owned.
    pub fn insert_instruction(&mut self, block: InstrId, index: usize, inst: InstrId) -> Result<()> {
        self.ensure_detached(inst)?;
        let list = self.block_list_mut(block)?;
        if index > list.len() {
            return Err(Error::AnalysisFailed(format!(
                "insert position {} beyond block length {}",
                index,
                list.len()
            )));
        }
        list.insert(index, inst);
        self.adopt(block, inst);
        self.update_flags(block);
        Ok(())
    }

    /// Appends the detached `inst` to `block`.
    ///
    /// # Errors
    ///
    /// Same as [`Function::insert_instruction`].
    pub fn push_instruction(&mut self, block: InstrId, inst: InstrId) -> Result<()> {
        let len = self.block_instructions(block).len();
        self.insert_instruction(block, len, inst)
    }

    /// Removes and returns the instruction at `index` of `block`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AnalysisFailed`] if `block` is not a block or `index` is out of range.
    pub fn remove_instruction(&mut self, block: InstrId, index: usize) -> Result<InstrId> {
        let list = self.block_list_mut(block)?;
        if index >= list.len() {
            return Err(Error::AnalysisFailed(format!(
                "remove position {} beyond block length {}",
                index,
                list.len()
            )));
        }
        let removed = list.remove(index);
        self.release(removed);
        self.update_flags(block);
        Ok(removed)
    }

    /// Replaces the instruction at `index` of `block` with the detached `inst`;
    /// returns the old one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AnalysisFailed`] on an invalid position or an owned `inst`.
    pub fn set_instruction(&mut self, block: InstrId, index: usize, inst: InstrId) -> Result<InstrId> {
        let old = *self
            .block_instructions(block)
            .get(index)
            .ok_or_else(|| Error::AnalysisFailed(format!("no instruction at position {}", index)))?;
        self.replace_child(block, old, inst)?;
        Ok(old)
    }

    /// Sets or clears the final instruction of `block`; returns the previous one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AnalysisFailed`] if `block` is not a block or `inst` is owned.
    pub fn set_final_instruction(
        &mut self,
        block: InstrId,
        inst: Option<InstrId>,
    ) -> Result<Option<InstrId>> {
        if let Some(inst) = inst {
            self.ensure_detached(inst)?;
        }
        let previous = match &mut self.instructions[block.index()].kind {
            InstructionKind::Block {
                final_instruction, ..
            } => std::mem::replace(final_instruction, inst),
            _ => return Err(Error::AnalysisFailed(format!("{:?} is not a block", block))),
        };
        if let Some(previous) = previous {
            self.release(previous);
        }
        if let Some(inst) = inst {
            self.adopt(block, inst);
        }
        self.update_flags(block);
        Ok(previous)
    }

    /// Blocks of a container (empty for non-containers).
    #[must_use]
    pub fn container_blocks(&self, container: InstrId) -> &[InstrId] {
        match self.kind(container) {
            InstructionKind::BlockContainer { blocks, .. } => blocks,
            _ => &[],
        }
    }

    /// Entry block of a container.
    #[must_use]
    pub fn entry_block(&self, container: InstrId) -> Option<InstrId> {
        self.container_blocks(container).first().copied()
    }

    /// Appends the detached `block` to `container`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AnalysisFailed`] if `container` is not a container or `block` is owned.
    pub fn add_block(&mut self, container: InstrId, block: InstrId) -> Result<()> {
        self.ensure_detached(block)?;
        match &mut self.instructions[container.index()].kind {
            InstructionKind::BlockContainer { blocks, .. } => blocks.push(block),
            _ => {
                return Err(Error::AnalysisFailed(format!(
                    "{:?} is not a block container",
                    container
                )))
            }
        }
        self.adopt(container, block);
        self.update_flags(container);
        Ok(())
    }

    /// Removes and returns the block at `index` of `container`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AnalysisFailed`] on an invalid position.
    pub fn remove_block(&mut self, container: InstrId, index: usize) -> Result<InstrId> {
        let removed = match &mut self.instructions[container.index()].kind {
            InstructionKind::BlockContainer { blocks, .. } if index < blocks.len() => {
                blocks.remove(index)
            }
            _ => {
                return Err(Error::AnalysisFailed(format!(
                    "no block {} in {:?}",
                    index, container
                )))
            }
        };
        self.release(removed);
        self.update_flags(container);
        Ok(removed)
    }

    /// Incoming control-flow edges of `block`: attached branches plus the implicit
    /// entry edge if it is the entry block of its container.
    #[must_use]
    pub fn incoming_edge_count(&self, block: InstrId) -> u32 {
        let branches = match self.kind(block) {
            InstructionKind::Block { incoming_edges, .. } => *incoming_edges,
            _ => 0,
        };
        let is_entry = self
            .parent(block)
            .and_then(|c| self.entry_block(c))
            .is_some_and(|entry| entry == block);
        branches + u32::from(is_entry)
    }

    // ---------------------------------------------------------------------
    // Traversal
    // ---------------------------------------------------------------------

    /// `id` and all its descendants in pre-order.
    #[must_use]
    pub fn descendants(&self, id: InstrId) -> Vec<InstrId> {
        let mut result = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            result.push(current);
            let children = self.children(current);
            stack.extend(children.into_iter().rev());
        }
        result
    }

    /// `id` and all its descendants in post-order (children before parents).
    #[must_use]
    pub fn descendants_postorder(&self, id: InstrId) -> Vec<InstrId> {
        let mut result = Vec::new();
        let mut stack = vec![(id, false)];
        while let Some((current, expanded)) = stack.pop() {
            if expanded {
                result.push(current);
                continue;
            }
            stack.push((current, true));
            for child in self.children(current).into_iter().rev() {
                stack.push((child, false));
            }
        }
        result
    }

    /// Iterates the proper ancestors of `id`, innermost first.
    pub fn ancestors(&self, id: InstrId) -> impl Iterator<Item = InstrId> + '_ {
        std::iter::successors(self.parent(id), move |&p| self.parent(p))
    }

    /// Returns `true` if `id` equals `ancestor` or lies inside it.
    #[must_use]
    pub fn is_descendant_of(&self, id: InstrId, ancestor: InstrId) -> bool {
        id == ancestor || self.ancestors(id).any(|a| a == ancestor)
    }

    /// All connected block containers, outermost first.
    #[must_use]
    pub fn containers(&self) -> Vec<InstrId> {
        self.descendants(self.body)
            .into_iter()
            .filter(|&id| matches!(self.kind(id), InstructionKind::BlockContainer { .. }))
            .collect()
    }

    /// The innermost container enclosing `id`.
    #[must_use]
    pub fn enclosing_container(&self, id: InstrId) -> Option<InstrId> {
        self.ancestors(id)
            .find(|&a| matches!(self.kind(a), InstructionKind::BlockContainer { .. }))
    }

    // ---------------------------------------------------------------------
    // Internal bookkeeping
    // ---------------------------------------------------------------------

    fn ensure_detached(&self, id: InstrId) -> Result<()> {
        match self.parent(id) {
            Some(owner) => Err(Error::AnalysisFailed(format!(
                "{:?} is still owned by {:?}",
                id, owner
            ))),
            None if id == self.body => {
                Err(Error::AnalysisFailed("the body cannot be re-parented".into()))
            }
            None => Ok(()),
        }
    }

    fn block_list_mut(&mut self, block: InstrId) -> Result<&mut Vec<InstrId>> {
        match &mut self.instructions[block.index()].kind {
            InstructionKind::Block { instructions, .. } => Ok(instructions),
            _ => Err(Error::AnalysisFailed(format!("{:?} is not a block", block))),
        }
    }

    fn adopt(&mut self, parent: InstrId, child: InstrId) {
        self.instructions[child.index()].parent = Some(parent);
        if self.is_connected(parent) {
            self.connect(child);
        }
    }

    fn release(&mut self, child: InstrId) {
        self.instructions[child.index()].parent = None;
        if self.is_connected(child) {
            self.disconnect(child);
        }
    }

    fn connect(&mut self, root: InstrId) {
        for id in self.descendants(root) {
            let node = &mut self.instructions[id.index()];
            if node.connected {
                continue;
            }
            node.connected = true;
            match node.kind {
                InstructionKind::LdLoc(v) => self.variables[v.index()].loads.push(id),
                InstructionKind::LdLoca(v) => self.variables[v.index()].addresses.push(id),
                InstructionKind::StLoc { variable, .. } | InstructionKind::Using { variable, .. } => {
                    self.variables[variable.index()].stores.push(id);
                }
                InstructionKind::Branch { target } => {
                    if let InstructionKind::Block { incoming_edges, .. } =
                        &mut self.instructions[target.index()].kind
                    {
                        *incoming_edges += 1;
                    }
                }
                _ => {}
            }
        }
    }

    fn disconnect(&mut self, root: InstrId) {
        for id in self.descendants(root) {
            let node = &mut self.instructions[id.index()];
            if !node.connected {
                continue;
            }
            node.connected = false;
            match node.kind {
                InstructionKind::LdLoc(v) => self.variables[v.index()].loads.retain(|&x| x != id),
                InstructionKind::LdLoca(v) => {
                    self.variables[v.index()].addresses.retain(|&x| x != id);
                }
                InstructionKind::StLoc { variable, .. } | InstructionKind::Using { variable, .. } => {
                    self.variables[variable.index()].stores.retain(|&x| x != id);
                }
                InstructionKind::Branch { target } => {
                    if let InstructionKind::Block { incoming_edges, .. } =
                        &mut self.instructions[target.index()].kind
                    {
                        *incoming_edges = incoming_edges.saturating_sub(1);
                    }
                }
                _ => {}
            }
        }
    }

    fn compute_flags(&self, id: InstrId) -> InstructionFlags {
        let kind = self.kind(id);
        let unreachable = InstructionFlags::END_POINT_UNREACHABLE;
        let child_union = |children: &[InstrId]| {
            children
                .iter()
                .fold(InstructionFlags::empty(), |acc, c| acc | self.flags(*c))
        };

        let mut flags = kind.direct_flags();
        match kind {
            InstructionKind::Block { instructions, .. } => {
                flags |= child_union(&kind.children()) - unreachable;
                if instructions
                    .last()
                    .is_some_and(|last| self.flags(*last).contains(unreachable))
                {
                    flags |= unreachable;
                }
            }
            InstructionKind::IfInstruction {
                condition,
                true_inst,
                false_inst,
            } => {
                flags |= child_union(&[*condition, *true_inst, *false_inst]) - unreachable;
                if self.flags(*condition).contains(unreachable)
                    || (self.flags(*true_inst).contains(unreachable)
                        && self.flags(*false_inst).contains(unreachable))
                {
                    flags |= unreachable;
                }
            }
            InstructionKind::Switch { value, sections } => {
                flags |= child_union(&kind.children()) - unreachable;
                if !sections.is_empty()
                    && sections
                        .iter()
                        .all(|s| self.flags(*s).contains(unreachable))
                    || self.flags(*value).contains(unreachable)
                {
                    flags |= unreachable;
                }
            }
            InstructionKind::SwitchSection { body, .. } => flags |= self.flags(*body),
            InstructionKind::BlockContainer { .. }
            | InstructionKind::TryFinally { .. }
            | InstructionKind::Using { .. } => {
                flags |= child_union(&kind.children()) - unreachable;
            }
            _ => flags |= child_union(&kind.children()),
        }
        flags
    }

    fn update_flags(&mut self, start: InstrId) {
        let mut current = Some(start);
        while let Some(id) = current {
            let flags = self.compute_flags(id);
            if flags == self.instructions[id.index()].flags && id != start {
                break;
            }
            self.instructions[id.index()].flags = flags;
            current = self.parent(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::il::CallKind;
    use crate::typesystem::{MethodReference, Token};
    use std::sync::Arc;

    fn function_with_block() -> (Function, InstrId) {
        let mut f = Function::new("test", Type::Void);
        let block = f.create_block();
        let body = f.body();
        f.add_block(body, block).unwrap();
        (f, block)
    }

    #[test]
    fn test_variable_counts_follow_connection() {
        let (mut f, block) = function_with_block();
        let v = f.add_variable(VariableKind::Local, Type::INT32, "x", Some(0));
        let w = f.add_variable(VariableKind::Local, Type::INT32, "y", Some(1));

        let load = f.create(InstructionKind::LdLoc(v));
        let store = f.create(InstructionKind::StLoc {
            variable: w,
            value: load,
        });
        assert_eq!(f.variable(v).load_count(), 0);

        f.push_instruction(block, store).unwrap();
        assert_eq!(f.variable(v).load_count(), 1);
        assert_eq!(f.variable(w).store_instructions(), &[store]);
        assert!(f.is_connected(load));

        let removed = f.remove_instruction(block, 0).unwrap();
        assert_eq!(removed, store);
        assert_eq!(f.variable(v).load_count(), 0);
        assert!(f.variable(w).store_instructions().is_empty());
        assert!(!f.is_connected(load));
    }

    #[test]
    fn test_flags_propagate_to_ancestors() {
        let (mut f, block) = function_with_block();
        let v = f.add_variable(VariableKind::StackSlot, Type::INT32, "S_0", None);
        let one = f.create(InstructionKind::LdcI4(1));
        let store = f.create(InstructionKind::StLoc {
            variable: v,
            value: one,
        });
        f.push_instruction(block, store).unwrap();
        assert!(!f.is_pure(block));
        assert!(f.flags(f.body()).contains(InstructionFlags::MAY_WRITE_LOCALS));

        let method = Arc::new(MethodReference::new(
            Token(0x0600_0001),
            Type::Unknown,
            "M",
            false,
            vec![],
            Type::INT32,
        ));
        let call = f.create(InstructionKind::Call {
            kind: CallKind::Call,
            method,
            arguments: vec![],
        });
        f.replace_with(one, call).unwrap();
        assert!(f.flags(block).contains(InstructionFlags::SIDE_EFFECT));
        assert!(f.parent(one).is_none());
    }

    #[test]
    fn test_replace_rejects_owned_instruction() {
        let (mut f, block) = function_with_block();
        let a = f.create(InstructionKind::LdcI4(1));
        let not = f.create(InstructionKind::LogicNot(a));
        f.push_instruction(block, not).unwrap();
        let b = f.create(InstructionKind::LdcI4(2));
        let other = f.create(InstructionKind::LogicNot(b));

        assert!(matches!(f.replace_with(a, b), Err(Error::AnalysisFailed(_))));
        assert!(f.is_connected(a));
        let _ = other;
    }

    #[test]
    fn test_branch_updates_incoming_edges() {
        let (mut f, entry) = function_with_block();
        let target = f.create_block();
        let body = f.body();
        f.add_block(body, target).unwrap();
        assert_eq!(f.incoming_edge_count(entry), 1);
        assert_eq!(f.incoming_edge_count(target), 0);

        let br = f.create(InstructionKind::Branch { target });
        f.push_instruction(entry, br).unwrap();
        assert_eq!(f.incoming_edge_count(target), 1);
        assert!(f.flags(entry).contains(InstructionFlags::END_POINT_UNREACHABLE));

        f.remove_instruction(entry, 0).unwrap();
        assert_eq!(f.incoming_edge_count(target), 0);
    }

    #[test]
    fn test_detach_leaves_nop() {
        let (mut f, block) = function_with_block();
        let v = f.add_variable(VariableKind::Local, Type::INT32, "x", Some(0));
        let value = f.create(InstructionKind::LdcI4(3));
        let store = f.create(InstructionKind::StLoc { variable: v, value });
        f.push_instruction(block, store).unwrap();

        let taken = f.detach(value).unwrap();
        assert_eq!(taken, value);
        let InstructionKind::StLoc { value: slot, .. } = f.kind(store) else {
            panic!("expected stloc");
        };
        assert_eq!(f.kind(*slot), &InstructionKind::Nop);
        assert!(f.parent(value).is_none());
    }

    #[test]
    fn test_clone_subtree_is_detached_copy() {
        let (mut f, block) = function_with_block();
        let v = f.add_variable(VariableKind::Local, Type::INT32, "x", Some(0));
        let load = f.create(InstructionKind::LdLoc(v));
        let not = f.create(InstructionKind::LogicNot(load));
        f.push_instruction(block, not).unwrap();

        let copy = f.clone_subtree(not);
        assert_ne!(copy, not);
        assert!(f.parent(copy).is_none());
        assert_eq!(f.variable(v).load_count(), 1);
        f.push_instruction(block, copy).unwrap();
        assert_eq!(f.variable(v).load_count(), 2);
    }
}
