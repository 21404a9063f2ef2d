//! Instruction tree to statement tree conversion.
//!
//! Containers are flattened into statement lists in block order:
//!
//! ```text
//! container blocks          statements
//! ─────────────────         ──────────────────────────────
//! entry:  ...; br B1        ...            (br to next block elided)
//! B1:     ...; br B3        IL_0010: ...   (label only if it is a goto target)
//! loop entry (continue)     while (true) { ... }
//! leave body(v)             return v;
//! leave loop                break;
//! leave other container     goto IL_0020_end;
//! ```
//!
//! Expressions go through [`ExpressionBuilder`]; every statement records the
//! instruction it came from so sequence points can be derived from the tree.

use std::collections::BTreeSet;

use crate::{
    ast::{
        expression_builder::ExpressionBuilder,
        syntax::{
            BinaryOperator, BlockStatement, CaseLabel, Expression, ExpressionKind, Literal,
            Statement, StatementKind, SwitchSection, UnaryOperator,
        },
    },
    il::{
        patterns::{match_branch, match_nop},
        BlockKind, ContainerKind, Function, InstrId, InstructionKind,
    },
    typesystem::TypeSystem,
};

/// Sections with more labels than this are rendered as `default:`.
const MAX_CASE_LABELS: u128 = 64;

/// Where a statement sits while its container is converted.
#[derive(Debug, Clone, Copy)]
struct Scope {
    /// The container whose block holds the statement.
    container: InstrId,
    /// Target of `break` and `continue`.
    innermost_loop: Option<InstrId>,
    /// Last instruction of the container's last block.
    at_end: bool,
}

/// Builds the statement tree of one function.
pub struct StatementBuilder<'a> {
    f: &'a Function,
    ts: &'a dyn TypeSystem,
    expressions: ExpressionBuilder<'a>,
    /// Blocks some `goto` jumps to.
    goto_targets: BTreeSet<InstrId>,
    /// Containers left from the middle, which need an end label.
    exited: BTreeSet<InstrId>,
}

impl<'a> StatementBuilder<'a> {
    /// Creates a builder for `f`.
    #[must_use]
    pub fn new(f: &'a Function, ts: &'a dyn TypeSystem) -> Self {
        let goto_targets = f
            .descendants(f.body())
            .into_iter()
            .filter_map(|inst| match_branch(f, inst).map(|target| (inst, target)))
            .filter(|&(inst, target)| !is_fallthrough(f, inst, target) && !is_loop_entry(f, target))
            .map(|(_, target)| target)
            .collect();
        StatementBuilder {
            f,
            ts,
            expressions: ExpressionBuilder::new(f, ts),
            goto_targets,
            exited: BTreeSet::new(),
        }
    }

    /// Converts the function body.
    #[must_use]
    pub fn build(mut self) -> BlockStatement {
        let statements = self.convert_container(self.f.body(), None);
        log::trace!(
            "{}: {} statements, {} goto targets",
            self.f.name(),
            statements.len(),
            self.goto_targets.len()
        );
        BlockStatement::new(statements)
    }

    fn convert_container(&mut self, container: InstrId, enclosing_loop: Option<InstrId>) -> Vec<Statement> {
        let f = self.f;
        let innermost_loop = if is_loop(f, container) {
            Some(container)
        } else {
            enclosing_loop
        };
        let blocks = f.container_blocks(container);
        let mut out = Vec::new();
        for (i, &block) in blocks.iter().enumerate() {
            if self.goto_targets.contains(&block) {
                out.push(Statement::new(StatementKind::Label(block_label(f, block)), Vec::new()));
            }
            let instructions = f.block_instructions(block);
            for (j, &inst) in instructions.iter().enumerate() {
                let last_in_block = j + 1 == instructions.len();
                if last_in_block
                    && match_branch(f, inst).is_some_and(|t| blocks.get(i + 1) == Some(&t))
                {
                    continue;
                }
                let scope = Scope {
                    container,
                    innermost_loop,
                    at_end: last_in_block && i + 1 == blocks.len(),
                };
                self.convert_statement(inst, scope, &mut out);
            }
        }
        if !is_loop(f, container) && self.exited.remove(&container) {
            out.push(Statement::new(StatementKind::Label(end_label(f, container)), Vec::new()));
        }
        out
    }

    /// Statements of an `if` branch or switch section.
    fn convert_embedded(&mut self, inst: InstrId, scope: Scope) -> BlockStatement {
        let scope = Scope {
            at_end: false,
            ..scope
        };
        let mut out = Vec::new();
        match self.f.kind(inst) {
            InstructionKind::Block {
                kind: BlockKind::ControlFlow,
                instructions,
                ..
            } => {
                for &statement in instructions {
                    self.convert_statement(statement, scope, &mut out);
                }
            }
            _ => self.convert_statement(inst, scope, &mut out),
        }
        BlockStatement::new(out)
    }

    fn convert_statement(&mut self, inst: InstrId, scope: Scope, out: &mut Vec<Statement>) {
        let f = self.f;
        let statement = |kind| Statement::new(kind, vec![inst]);
        match f.kind(inst) {
            InstructionKind::Nop => {}
            InstructionKind::Branch { target } => {
                let target = *target;
                if is_loop_entry(f, target) && f.parent(target) == scope.innermost_loop {
                    // A trailing `continue` is implied by the loop.
                    if !(scope.at_end && f.parent(target) == Some(scope.container)) {
                        out.push(statement(StatementKind::Continue));
                    }
                } else {
                    out.push(statement(StatementKind::Goto(block_label(f, target))));
                }
            }
            InstructionKind::Leave { target, value } => {
                let (target, value) = (*target, *value);
                if target == scope.container
                    && scope.at_end
                    && !is_loop(f, target)
                    && match_nop(f, value)
                {
                    return;
                }
                if target == f.body() {
                    let value = (!match_nop(f, value)).then(|| {
                        self.expressions
                            .convert(value)
                            .convert_to(f.return_type(), self.ts)
                            .expression
                    });
                    out.push(statement(StatementKind::Return(value)));
                } else if Some(target) == scope.innermost_loop {
                    out.push(statement(StatementKind::Break));
                } else {
                    self.exited.insert(target);
                    out.push(statement(StatementKind::Goto(end_label(f, target))));
                }
            }
            InstructionKind::IfInstruction {
                condition,
                true_inst,
                false_inst,
            } => {
                let condition = self.expressions.convert_condition(*condition).expression;
                let true_block = self.convert_embedded(*true_inst, scope);
                let false_block =
                    (!match_nop(f, *false_inst)).then(|| self.convert_embedded(*false_inst, scope));
                out.push(statement(StatementKind::If {
                    condition,
                    true_block,
                    false_block,
                }));
            }
            InstructionKind::BlockContainer { kind, .. } => {
                let body = BlockStatement::new(self.convert_container(inst, scope.innermost_loop));
                match kind {
                    ContainerKind::Loop => {
                        let lp = loop_statement(inst, body);
                        let lp = for_statement(lp, out);
                        out.push(lp);
                        if self.exited.remove(&inst) {
                            out.push(Statement::new(
                                StatementKind::Label(end_label(f, inst)),
                                Vec::new(),
                            ));
                        }
                    }
                    ContainerKind::Normal => out.push(statement(StatementKind::Block(body))),
                }
            }
            InstructionKind::TryFinally {
                try_block,
                finally_block,
            } => {
                let try_block =
                    BlockStatement::new(self.convert_container(*try_block, scope.innermost_loop));
                let finally_block = BlockStatement::new(
                    self.convert_container(*finally_block, scope.innermost_loop),
                );
                out.push(statement(StatementKind::TryFinally {
                    try_block,
                    finally_block,
                }));
            }
            InstructionKind::Using {
                variable,
                resource,
                body,
            } => {
                let var = f.variable(*variable);
                let value = self.expressions.convert(*resource).convert_to(&var.ty, self.ts);
                let resource = Expression::assignment(
                    None,
                    Expression::identifier(var.name.clone()),
                    value.expression,
                );
                let body = BlockStatement::new(self.convert_container(*body, scope.innermost_loop));
                out.push(statement(StatementKind::Using { resource, body }));
            }
            InstructionKind::Switch { value, sections } => {
                let expression = self.expressions.convert(*value).expression;
                let sections = sections
                    .iter()
                    .filter_map(|&section| match f.kind(section) {
                        InstructionKind::SwitchSection { labels, body } => {
                            let labels = if labels.count() > MAX_CASE_LABELS {
                                vec![CaseLabel::Default]
                            } else {
                                labels.values().map(CaseLabel::Value).collect()
                            };
                            Some((labels, *body))
                        }
                        _ => None,
                    })
                    .collect::<Vec<_>>()
                    .into_iter()
                    .map(|(labels, body)| SwitchSection {
                        labels,
                        statements: self.convert_embedded(body, scope).statements,
                    })
                    .collect();
                out.push(statement(StatementKind::Switch {
                    expression,
                    sections,
                }));
            }
            InstructionKind::Throw(argument) => {
                let exception = self.expressions.convert(*argument).expression;
                out.push(statement(StatementKind::Throw(exception)));
            }
            InstructionKind::Block {
                kind: BlockKind::ControlFlow,
                ..
            } => {
                let body = self.convert_embedded(inst, scope);
                out.push(statement(StatementKind::Block(body)));
            }
            _ => {
                let mut expression = self.expressions.convert(inst).expression;
                match &mut expression.kind {
                    ExpressionKind::Error(message) => log::debug!("{}: {}", f.name(), message),
                    // The value is unused, so `++x` reads as `x++`.
                    ExpressionKind::Increment { postfix, .. } => *postfix = true,
                    _ => {}
                }
                out.push(Statement::expression(expression));
            }
        }
    }
}

/// `while (true) { if (c) break; S }`  -->  `while (!c) { S }`
fn loop_statement(inst: InstrId, mut body: BlockStatement) -> Statement {
    match take_exit_test(&mut body.statements) {
        Some((condition, check)) => {
            let mut instructions = vec![inst];
            instructions.extend(check);
            Statement::new(
                StatementKind::While {
                    condition: negate(condition),
                    body,
                },
                instructions,
            )
        }
        None => Statement::new(
            StatementKind::While {
                condition: Expression::literal(Literal::Boolean(true)),
                body,
            },
            vec![inst],
        ),
    }
}

/// Removes a leading `if (c) break;` and returns `c` with the instructions of the `if`.
fn take_exit_test(statements: &mut Vec<Statement>) -> Option<(Expression, Vec<InstrId>)> {
    let StatementKind::If {
        true_block,
        false_block: None,
        ..
    } = &statements.first()?.kind
    else {
        return None;
    };
    if !matches!(
        true_block.statements.as_slice(),
        [Statement {
            kind: StatementKind::Break,
            ..
        }]
    ) {
        return None;
    }
    match statements.remove(0) {
        Statement {
            kind: StatementKind::If { condition, .. },
            instructions,
            ..
        } => Some((condition, instructions)),
        _ => None,
    }
}

/// `x = a; while (c(x)) { S; x = b }`  -->  `for (x = a; c(x); x = b) { S }`
///
/// Takes the initializer from the end of `out`. Leaves the loop alone if it
/// does not have that shape or if its body continues, since a `continue` in
/// a `for` would run the iterator.
fn for_statement(lp: Statement, out: &mut Vec<Statement>) -> Statement {
    if !is_counting_loop(&lp, out) {
        return lp;
    }
    let (condition, mut body, mut instructions) = match lp {
        Statement {
            kind: StatementKind::While { condition, body },
            instructions,
            ..
        } => (condition, body, instructions),
        other => return other,
    };
    let (Some(initializer), Some(iterator)) = (out.pop(), body.statements.pop()) else {
        return Statement::new(StatementKind::While { condition, body }, instructions);
    };
    // The `for` keeps the loop container; the exit test goes to the condition clause.
    let clause = instructions.split_off(instructions.len().min(1));
    Statement::new(
        StatementKind::For {
            initializers: vec![initializer],
            condition: Some(Box::new(Statement::new(
                StatementKind::Expression(condition),
                clause,
            ))),
            iterators: vec![iterator],
            body,
        },
        instructions,
    )
}

fn is_counting_loop(lp: &Statement, out: &[Statement]) -> bool {
    let StatementKind::While { condition, body } = &lp.kind else {
        return false;
    };
    if matches!(condition.kind, ExpressionKind::Primitive(Literal::Boolean(true))) {
        return false;
    }
    let Some(variable) = out.last().and_then(assigned_variable) else {
        return false;
    };
    body.statements
        .last()
        .is_some_and(|last| updated_variable(last) == Some(variable))
        && mentions(condition, variable)
        && !continues(&body.statements)
}

/// `x = v;` as a statement: the name of `x`.
fn assigned_variable(statement: &Statement) -> Option<&str> {
    match &statement.kind {
        StatementKind::Expression(Expression {
            kind: ExpressionKind::Assignment { op: None, left, .. },
            ..
        }) => identifier(left),
        _ => None,
    }
}

/// `x = v;`, `x op= v;`, `x++;` or `x--;` as a statement: the name of `x`.
fn updated_variable(statement: &Statement) -> Option<&str> {
    match &statement.kind {
        StatementKind::Expression(Expression {
            kind:
                ExpressionKind::Assignment { left: target, .. }
                | ExpressionKind::Increment {
                    operand: target, ..
                },
            ..
        }) => identifier(target),
        _ => None,
    }
}

fn identifier(expression: &Expression) -> Option<&str> {
    match &expression.kind {
        ExpressionKind::Identifier(name) => Some(name),
        _ => None,
    }
}

fn mentions(expression: &Expression, name: &str) -> bool {
    identifier(expression) == Some(name)
        || expression.children().into_iter().any(|child| mentions(child, name))
}

/// Returns `true` if a `continue` in `statements` targets the enclosing loop.
fn continues(statements: &[Statement]) -> bool {
    statements.iter().any(|statement| match &statement.kind {
        StatementKind::Continue => true,
        StatementKind::Block(block) | StatementKind::Using { body: block, .. } => {
            continues(&block.statements)
        }
        StatementKind::If {
            true_block,
            false_block,
            ..
        } => {
            continues(&true_block.statements)
                || false_block.as_ref().is_some_and(|b| continues(&b.statements))
        }
        StatementKind::TryFinally {
            try_block,
            finally_block,
        } => continues(&try_block.statements) || continues(&finally_block.statements),
        StatementKind::Switch { sections, .. } => {
            sections.iter().any(|section| continues(&section.statements))
        }
        _ => false,
    })
}

/// `!c`, with comparisons and double negations folded.
fn negate(condition: Expression) -> Expression {
    let Expression {
        kind,
        mut instructions,
    } = condition;
    match kind {
        ExpressionKind::Unary {
            op: UnaryOperator::Not,
            operand,
        } => {
            let mut operand = *operand;
            operand.instructions.append(&mut instructions);
            operand
        }
        ExpressionKind::Binary {
            op: op @ (BinaryOperator::Equality | BinaryOperator::Inequality),
            left,
            right,
        } => {
            let op = if op == BinaryOperator::Equality {
                BinaryOperator::Inequality
            } else {
                BinaryOperator::Equality
            };
            Expression {
                kind: ExpressionKind::Binary { op, left, right },
                instructions,
            }
        }
        kind => Expression::unary(UnaryOperator::Not, Expression { kind, instructions }),
    }
}

fn is_loop(f: &Function, container: InstrId) -> bool {
    matches!(
        f.kind(container),
        InstructionKind::BlockContainer {
            kind: ContainerKind::Loop,
            ..
        }
    )
}

/// Returns `true` if `block` is the entry of a loop container.
fn is_loop_entry(f: &Function, block: InstrId) -> bool {
    f.parent(block)
        .is_some_and(|container| is_loop(f, container) && f.entry_block(container) == Some(block))
}

/// Returns `true` for `br next` at the end of the block preceding `target`.
fn is_fallthrough(f: &Function, branch: InstrId, target: InstrId) -> bool {
    let Some(block) = f.parent(branch) else {
        return false;
    };
    if f.block_instructions(block).last() != Some(&branch) {
        return false;
    }
    let Some(container) = f.parent(block) else {
        return false;
    };
    let blocks = f.container_blocks(container);
    blocks
        .iter()
        .position(|&b| b == block)
        .and_then(|i| blocks.get(i + 1))
        == Some(&target)
}

fn block_label(f: &Function, block: InstrId) -> String {
    format!("IL_{:04x}", f.block_label(block).unwrap_or(0))
}

fn end_label(f: &Function, container: InstrId) -> String {
    let entry = f
        .entry_block(container)
        .and_then(|block| f.block_label(block))
        .unwrap_or(0);
    format!("IL_{:04x}_end", entry)
}
