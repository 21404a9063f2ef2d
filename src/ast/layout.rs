//! Deterministic line and column positions for a statement tree.
//!
//! The layout mirrors the way the tree would be printed with Allman braces
//! and four-space indentation. The body's opening brace is line 1:
//!
//! ```text
//! 1  {
//! 2      x = 1;
//! 3      if (x != 0)
//! 4      {
//! 5          Work();
//! 6      }
//! 7      return x;
//! 8  }
//! ```
//!
//! Simple statements span their text including the `;`. Compound statements
//! span their header line only; `for` clauses get spans on the header line.

use crate::ast::syntax::{BlockStatement, Statement, StatementKind, TextLocation, TextSpan};

const INDENT: u32 = 4;

/// Assigns a [`TextSpan`] to every statement in `body`.
pub fn assign_positions(body: &mut BlockStatement) {
    let mut layout = Layout { line: 1 };
    layout.block(body, 0);
}

struct Layout {
    /// Next free line.
    line: u32,
}

impl Layout {
    /// `{ statements }` with the braces at `depth`.
    fn block(&mut self, block: &mut BlockStatement, depth: u32) {
        self.line += 1;
        for statement in &mut block.statements {
            self.statement(statement, depth + 1);
        }
        self.line += 1;
    }

    /// Takes one line at `depth` for `text`.
    fn span_line(&mut self, text: &str, depth: u32) -> TextSpan {
        let column = depth * INDENT + 1;
        let span = span_on(self.line, column, text);
        self.line += 1;
        span
    }

    fn statement(&mut self, statement: &mut Statement, depth: u32) {
        let header = header_text(&statement.kind);
        statement.span = Some(self.span_line(&header, depth));
        match &mut statement.kind {
            StatementKind::Block(block) => {
                // The header is the block's own brace.
                self.line -= 1;
                self.block(block, depth);
            }
            StatementKind::While { body: block, .. } | StatementKind::Using { body: block, .. } => {
                self.block(block, depth);
            }
            StatementKind::If {
                true_block,
                false_block,
                ..
            } => {
                self.block(true_block, depth);
                if let Some(false_block) = false_block {
                    self.line += 1;
                    self.block(false_block, depth);
                }
            }
            StatementKind::TryFinally {
                try_block,
                finally_block,
            } => {
                self.block(try_block, depth);
                self.line += 1;
                self.block(finally_block, depth);
            }
            StatementKind::For {
                initializers,
                condition,
                iterators,
                body,
            } => {
                let line = self.line - 1;
                let mut column = depth * INDENT + 1 + "for (".len() as u32;
                for (i, init) in initializers.iter_mut().enumerate() {
                    if i > 0 {
                        column += ", ".len() as u32;
                    }
                    column = place_clause(init, line, column);
                }
                column += "; ".len() as u32;
                if let Some(condition) = condition {
                    column = place_clause(condition, line, column);
                }
                column += "; ".len() as u32;
                for (i, iterator) in iterators.iter_mut().enumerate() {
                    if i > 0 {
                        column += ", ".len() as u32;
                    }
                    column = place_clause(iterator, line, column);
                }
                self.block(body, depth);
            }
            StatementKind::Switch { sections, .. } => {
                self.line += 1;
                for section in sections {
                    // One line per case label.
                    self.line += section.labels.len() as u32;
                    for statement in &mut section.statements {
                        self.statement(statement, depth + 2);
                    }
                }
                self.line += 1;
            }
            StatementKind::Expression(_)
            | StatementKind::Label(_)
            | StatementKind::Goto(_)
            | StatementKind::Break
            | StatementKind::Continue
            | StatementKind::Return(_)
            | StatementKind::Throw(_) => {}
        }
    }
}

fn span_on(line: u32, column: u32, text: &str) -> TextSpan {
    TextSpan {
        start: TextLocation::new(line, column),
        end: TextLocation::new(line, column + text.chars().count() as u32),
    }
}

/// Positions a `for` clause at `column`; returns the column after it.
fn place_clause(clause: &mut Statement, line: u32, column: u32) -> u32 {
    let span = span_on(line, column, &clause_text(clause));
    clause.span = Some(span);
    span.end.column
}

/// The text of a `for` clause, without terminator.
fn clause_text(statement: &Statement) -> String {
    match &statement.kind {
        StatementKind::Expression(e) => e.to_string(),
        _ => header_text(&statement.kind),
    }
}

/// The first line of a statement as it would be printed.
fn header_text(kind: &StatementKind) -> String {
    match kind {
        StatementKind::Expression(e) => format!("{};", e),
        StatementKind::Block(_) => "{".to_string(),
        StatementKind::Label(name) => format!("{}:", name),
        StatementKind::Goto(name) => format!("goto {};", name),
        StatementKind::If { condition, .. } => format!("if ({})", condition),
        StatementKind::While { condition, .. } => format!("while ({})", condition),
        StatementKind::For {
            initializers,
            condition,
            iterators,
            ..
        } => {
            let join = |statements: &[Statement]| {
                statements
                    .iter()
                    .map(clause_text)
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            format!(
                "for ({}; {}; {})",
                join(initializers),
                condition.as_deref().map(clause_text).unwrap_or_default(),
                join(iterators)
            )
        }
        StatementKind::Break => "break;".to_string(),
        StatementKind::Continue => "continue;".to_string(),
        StatementKind::Return(None) => "return;".to_string(),
        StatementKind::Return(Some(value)) => format!("return {};", value),
        StatementKind::Throw(value) => format!("throw {};", value),
        StatementKind::Using { resource, .. } => format!("using ({})", resource),
        StatementKind::TryFinally { .. } => "try".to_string(),
        StatementKind::Switch { expression, .. } => format!("switch ({})", expression),
    }
}
