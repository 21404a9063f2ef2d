//! Source mapping for a finished statement tree.
//!
//! Statements are visited post-order. Each statement opens one sequence point
//! that claims the IL ranges of its instructions and their instruction-tree
//! descendants, skipping instructions a nested statement already claimed. A
//! point that claims nothing with an IL origin is dropped.
//!
//! A point covers the contiguous run of claimed IL starting at its lowest
//! offset, so it never spans code that belongs to a nested point.

use std::collections::BTreeSet;

use crate::{
    ast::syntax::{BlockStatement, Expression, Statement, StatementKind, TextSpan},
    il::{Function, ILRange, InstrId},
};

/// Line number marking a hidden sequence point.
pub const HIDDEN_LINE: u32 = 0xFEEFEE;

/// Maps an IL offset to a source range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequencePoint {
    /// Offset in the method's IL stream.
    pub il_offset: u32,
    /// End of the contiguous claimed IL run starting at `il_offset` (exclusive).
    pub il_end: u32,
    /// Starting line in the source file.
    pub start_line: u32,
    /// Starting column in the source file.
    pub start_col: u16,
    /// Ending line in the source file.
    pub end_line: u32,
    /// Ending column in the source file.
    pub end_col: u16,
    /// True if this is a hidden sequence point (start_line == 0xFEEFEE).
    pub is_hidden: bool,
}

impl SequencePoint {
    fn new(range: ILRange, span: Option<TextSpan>) -> Self {
        match span {
            Some(span) => SequencePoint {
                il_offset: range.start,
                il_end: range.end,
                start_line: span.start.line,
                start_col: clamp_column(span.start.column),
                end_line: span.end.line,
                end_col: clamp_column(span.end.column),
                is_hidden: false,
            },
            None => SequencePoint {
                il_offset: range.start,
                il_end: range.end,
                start_line: HIDDEN_LINE,
                start_col: 0,
                end_line: HIDDEN_LINE,
                end_col: 0,
                is_hidden: true,
            },
        }
    }
}

fn clamp_column(column: u32) -> u16 {
    u16::try_from(column).unwrap_or(u16::MAX)
}

/// Collection of sequence points for a method, ordered by IL offset.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SequencePoints(pub Vec<SequencePoint>);

impl SequencePoints {
    /// Returns the sequence point for a given IL offset, if any.
    pub fn find_by_il_offset(&self, il_offset: u32) -> Option<&SequencePoint> {
        self.0.iter().find(|sp| sp.il_offset == il_offset)
    }

    /// Number of points.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if there are no points.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates the points in offset order.
    pub fn iter(&self) -> impl Iterator<Item = &SequencePoint> {
        self.0.iter()
    }
}

/// Builds [`SequencePoints`] for one function.
pub struct SequencePointBuilder<'a> {
    f: &'a Function,
    claimed: BTreeSet<InstrId>,
    points: Vec<SequencePoint>,
}

impl<'a> SequencePointBuilder<'a> {
    /// Walks `body` and returns its points sorted by offset.
    #[must_use]
    pub fn build(f: &'a Function, body: &BlockStatement) -> SequencePoints {
        let mut builder = SequencePointBuilder {
            f,
            claimed: BTreeSet::new(),
            points: Vec::new(),
        };
        builder.block(body);
        let mut points = builder.points;
        points.sort_by_key(|point| (point.il_offset, point.il_end));
        log::trace!("{}: {} sequence points", f.name(), points.len());
        SequencePoints(points)
    }

    fn block(&mut self, block: &BlockStatement) {
        for statement in &block.statements {
            self.statement(statement);
        }
    }

    fn statement(&mut self, statement: &Statement) {
        let mut roots = statement.instructions.clone();
        match &statement.kind {
            StatementKind::Expression(e)
            | StatementKind::Throw(e)
            | StatementKind::Return(Some(e))
            | StatementKind::If { condition: e, .. }
            | StatementKind::While { condition: e, .. }
            | StatementKind::Using { resource: e, .. } => collect_instructions(e, &mut roots),
            StatementKind::Return(None)
            | StatementKind::Block(_)
            | StatementKind::Label(_)
            | StatementKind::Goto(_)
            | StatementKind::Break
            | StatementKind::Continue
            | StatementKind::TryFinally { .. }
            | StatementKind::For { .. }
            | StatementKind::Switch { .. } => {}
        }

        match &statement.kind {
            StatementKind::Block(block)
            | StatementKind::While { body: block, .. }
            | StatementKind::Using { body: block, .. } => self.block(block),
            StatementKind::If {
                true_block,
                false_block,
                ..
            } => {
                self.block(true_block);
                if let Some(false_block) = false_block {
                    self.block(false_block);
                }
            }
            StatementKind::TryFinally {
                try_block,
                finally_block,
            } => {
                self.block(try_block);
                self.block(finally_block);
            }
            StatementKind::For {
                initializers,
                condition,
                iterators,
                body,
            } => {
                for clause in initializers.iter().chain(condition.as_deref()).chain(iterators) {
                    self.statement(clause);
                }
                self.block(body);
            }
            StatementKind::Switch {
                expression,
                sections,
            } => {
                for section in sections {
                    for statement in &section.statements {
                        self.statement(statement);
                    }
                }
                let mut governing = Vec::new();
                collect_instructions(expression, &mut governing);
                self.open(&governing, statement.span);
            }
            _ => {}
        }

        self.open(&roots, statement.span);
    }

    /// Claims `roots` and their descendants; emits a point if any has an IL range.
    fn open(&mut self, roots: &[InstrId], span: Option<TextSpan>) {
        let mut ranges = Vec::new();
        for &root in roots {
            for inst in self.f.descendants(root) {
                if self.claimed.insert(inst) {
                    let range = self.f.range(inst);
                    if !range.is_empty() {
                        ranges.push(range);
                    }
                }
            }
        }
        if let Some(range) = leading_run(ranges) {
            self.points.push(SequencePoint::new(range, span));
        }
    }
}

/// The lowest range extended by every range that touches it.
fn leading_run(mut ranges: Vec<ILRange>) -> Option<ILRange> {
    ranges.sort_by_key(|range| range.start);
    let (&first, rest) = ranges.split_first()?;
    let mut run = first;
    for range in rest {
        if range.start > run.end {
            break;
        }
        run.end = run.end.max(range.end);
    }
    Some(run)
}

fn collect_instructions(expression: &Expression, out: &mut Vec<InstrId>) {
    out.extend_from_slice(&expression.instructions);
    for child in expression.children() {
        collect_instructions(child, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ast::{
            assign_positions,
            syntax::{ExpressionKind, TextLocation},
            StatementBuilder,
        },
        il::InstructionKind,
        test::FunctionBuilder,
        typesystem::{SimpleTypeSystem, Type},
    };

    #[test]
    fn test_one_point_per_statement_with_offsets() {
        let ts = SimpleTypeSystem::new();
        let mut b = FunctionBuilder::new("m", Type::INT32);
        let x = b.local("x", Type::INT32);
        let one = b.ldc(1);
        b.stloc(x, one);
        let load = b.ldloc(x);
        b.ret(Some(load));
        let (f, _) = b.finish();

        let mut body = StatementBuilder::new(&f, &ts).build();
        assign_positions(&mut body);
        let points = SequencePointBuilder::build(&f, &body);
        assert_eq!(points.len(), 2);
        // ldc at 0, stloc at 1
        let first = points.find_by_il_offset(0).unwrap();
        assert_eq!(first.il_end, 2);
        assert_eq!(first.start_line, 2);
        assert!(!first.is_hidden);
        let second = points.find_by_il_offset(2).unwrap();
        assert_eq!(second.start_line, 3);
    }

    #[test]
    fn test_unpositioned_statements_are_hidden() {
        let ts = SimpleTypeSystem::new();
        let mut b = FunctionBuilder::new("m", Type::Void);
        let call = b.call_static("Work", vec![], Type::Void, vec![]);
        b.push(call);
        let (f, _) = b.finish();

        let body = StatementBuilder::new(&f, &ts).build();
        let points = SequencePointBuilder::build(&f, &body);
        assert_eq!(points.len(), 1);
        assert!(points.0[0].is_hidden);
        assert_eq!(points.0[0].start_line, HIDDEN_LINE);
    }

    #[test]
    fn test_nested_statements_claim_first() {
        let ts = SimpleTypeSystem::new();
        let mut b = FunctionBuilder::new("m", Type::Void);
        let p = b.param("p", Type::BOOLEAN);
        let work = b.call_static("Work", vec![], Type::Void, vec![]);
        let then = b.block_of(vec![work]);
        let cond = b.ldloc(p);
        let check = b.if_then(cond, then);
        b.push(check);
        let (f, _) = b.finish();

        let mut body = StatementBuilder::new(&f, &ts).build();
        assign_positions(&mut body);
        let points = SequencePointBuilder::build(&f, &body);
        assert_eq!(points.len(), 2);
        // The call keeps its own offset; the `if` claims the condition and itself.
        let call_offset = f.range(work).start;
        let inner = points.find_by_il_offset(call_offset).unwrap();
        assert_eq!(inner.start_line, 4);
        let outer = points.find_by_il_offset(f.range(cond).start).unwrap();
        assert_eq!(outer.start_line, 2);
        assert_eq!(outer.il_end, f.range(check).end);
    }

    #[test]
    fn test_statements_without_il_are_dropped() {
        let ts = SimpleTypeSystem::new();
        let mut b = FunctionBuilder::new("m", Type::Void);
        let nop = b.f.create(InstructionKind::Nop);
        let constant = b.f.create(InstructionKind::LdcI4(7));
        b.push(nop);
        b.push(constant);
        let (f, _) = b.finish();

        let body = StatementBuilder::new(&f, &ts).build();
        assert_eq!(body.statements.len(), 1);
        assert_eq!(SequencePointBuilder::build(&f, &body).len(), 0);
    }

    #[test]
    fn test_outer_point_stops_at_nested_code() {
        // ldloc p (0) | call Work (1) | if (2)
        let ts = SimpleTypeSystem::new();
        let mut b = FunctionBuilder::new("m", Type::Void);
        let p = b.param("p", Type::BOOLEAN);
        let cond = b.ldloc(p);
        let work = b.call_static("Work", vec![], Type::Void, vec![]);
        let then = b.block_of(vec![work]);
        let check = b.if_then(cond, then);
        b.push(check);
        let (f, _) = b.finish();

        let mut body = StatementBuilder::new(&f, &ts).build();
        assign_positions(&mut body);
        let points = SequencePointBuilder::build(&f, &body);
        assert_eq!(points.len(), 2);
        let outer = points.find_by_il_offset(0).unwrap();
        assert_eq!(outer.il_end, 1);
        assert_eq!(outer.start_line, 2);
        let inner = points.find_by_il_offset(1).unwrap();
        assert_eq!(inner.il_end, 2);
        assert!(points.iter().all(|p| p.il_offset < p.il_end));
    }

    #[test]
    fn test_leading_run_merges_touching_ranges() {
        let ranges = vec![
            ILRange::new(6, 8),
            ILRange::new(2, 4),
            ILRange::new(4, 5),
            ILRange::new(3, 4),
        ];
        assert_eq!(leading_run(ranges), Some(ILRange::new(2, 5)));
        assert_eq!(leading_run(Vec::new()), None);
    }

    #[test]
    fn test_for_clauses_claim_before_body() {
        let mut b = FunctionBuilder::new("m", Type::Void);
        let i = b.local("i", Type::INT32);
        let shared = b.ldloc(i);
        let (f, _) = b.finish();

        let at = |line| {
            Some(TextSpan {
                start: TextLocation::new(line, 1),
                end: TextLocation::new(line, 10),
            })
        };
        let mut condition = Statement::new(
            StatementKind::Expression(
                Expression::new(ExpressionKind::Identifier("i".into())).with_instruction(shared),
            ),
            Vec::new(),
        );
        condition.span = at(2);
        let mut inner = Statement::new(StatementKind::Expression(Expression::identifier("i")), vec![shared]);
        inner.span = at(4);
        let mut lp = Statement::new(
            StatementKind::For {
                initializers: Vec::new(),
                condition: Some(Box::new(condition)),
                iterators: Vec::new(),
                body: BlockStatement::new(vec![inner]),
            },
            Vec::new(),
        );
        lp.span = at(2);

        let points = SequencePointBuilder::build(&f, &BlockStatement::new(vec![lp]));
        assert_eq!(points.len(), 1);
        assert_eq!(points.0[0].il_offset, f.range(shared).start);
        assert_eq!(points.0[0].start_line, 2);
    }
}
