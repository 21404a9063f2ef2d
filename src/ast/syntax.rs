//! The reconstructed statement tree.
//!
//! Every node records the ids of the instructions it was built from, so
//! consumers (printers, the sequence point builder) can map source constructs
//! back to IL offsets through the owning [`crate::il::Function`].
//!
//! The tree is plain owned data: statements own their nested statements and
//! expressions, and instruction ids are non-owning back-references.

use std::fmt;

use crate::{
    il::{BinaryNumericOperator, ComparisonKind, InstrId},
    typesystem::Type,
};

/// A 1-based line and column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TextLocation {
    /// Line, starting at 1.
    pub line: u32,
    /// Column, starting at 1.
    pub column: u32,
}

impl TextLocation {
    /// Creates a location.
    #[must_use]
    pub fn new(line: u32, column: u32) -> Self {
        TextLocation { line, column }
    }
}

/// Start (inclusive) and end (exclusive) of a statement's text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextSpan {
    /// First character.
    pub start: TextLocation,
    /// One past the last character.
    pub end: TextLocation,
}

/// A literal value.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// `int`
    Int32(i32),
    /// `long`
    Int64(i64),
    /// `double`
    Float(f64),
    /// `bool`
    Boolean(bool),
    /// `string`
    String(String),
}

/// Prefix operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOperator {
    /// `!`
    Not,
    /// `~`
    BitNot,
    /// `-`
    Minus,
    /// `*`
    Dereference,
}

/// Infix operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOperator {
    /// `+`
    Add,
    /// `-`
    Subtract,
    /// `*`
    Multiply,
    /// `/`
    Divide,
    /// `%`
    Modulus,
    /// `&`
    BitwiseAnd,
    /// `|`
    BitwiseOr,
    /// `^`
    ExclusiveOr,
    /// `<<`
    ShiftLeft,
    /// `>>`
    ShiftRight,
    /// `==`
    Equality,
    /// `!=`
    Inequality,
    /// `<`
    LessThan,
    /// `<=`
    LessThanOrEqual,
    /// `>`
    GreaterThan,
    /// `>=`
    GreaterThanOrEqual,
}

impl BinaryOperator {
    /// The operator token.
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOperator::Add => "+",
            BinaryOperator::Subtract => "-",
            BinaryOperator::Multiply => "*",
            BinaryOperator::Divide => "/",
            BinaryOperator::Modulus => "%",
            BinaryOperator::BitwiseAnd => "&",
            BinaryOperator::BitwiseOr => "|",
            BinaryOperator::ExclusiveOr => "^",
            BinaryOperator::ShiftLeft => "<<",
            BinaryOperator::ShiftRight => ">>",
            BinaryOperator::Equality => "==",
            BinaryOperator::Inequality => "!=",
            BinaryOperator::LessThan => "<",
            BinaryOperator::LessThanOrEqual => "<=",
            BinaryOperator::GreaterThan => ">",
            BinaryOperator::GreaterThanOrEqual => ">=",
        }
    }

    fn precedence(self) -> u8 {
        match self {
            BinaryOperator::Multiply | BinaryOperator::Divide | BinaryOperator::Modulus => {
                PRECEDENCE_MULTIPLICATIVE
            }
            BinaryOperator::Add | BinaryOperator::Subtract => PRECEDENCE_ADDITIVE,
            BinaryOperator::ShiftLeft | BinaryOperator::ShiftRight => PRECEDENCE_SHIFT,
            BinaryOperator::LessThan
            | BinaryOperator::LessThanOrEqual
            | BinaryOperator::GreaterThan
            | BinaryOperator::GreaterThanOrEqual => PRECEDENCE_RELATIONAL,
            BinaryOperator::Equality | BinaryOperator::Inequality => PRECEDENCE_EQUALITY,
            BinaryOperator::BitwiseAnd => PRECEDENCE_BITWISE_AND,
            BinaryOperator::ExclusiveOr => PRECEDENCE_EXCLUSIVE_OR,
            BinaryOperator::BitwiseOr => PRECEDENCE_BITWISE_OR,
        }
    }
}

impl From<BinaryNumericOperator> for BinaryOperator {
    fn from(op: BinaryNumericOperator) -> Self {
        match op {
            BinaryNumericOperator::Add => BinaryOperator::Add,
            BinaryNumericOperator::Sub => BinaryOperator::Subtract,
            BinaryNumericOperator::Mul => BinaryOperator::Multiply,
            BinaryNumericOperator::Div => BinaryOperator::Divide,
            BinaryNumericOperator::Rem => BinaryOperator::Modulus,
            BinaryNumericOperator::BitAnd => BinaryOperator::BitwiseAnd,
            BinaryNumericOperator::BitOr => BinaryOperator::BitwiseOr,
            BinaryNumericOperator::BitXor => BinaryOperator::ExclusiveOr,
            BinaryNumericOperator::ShiftLeft => BinaryOperator::ShiftLeft,
            BinaryNumericOperator::ShiftRight => BinaryOperator::ShiftRight,
        }
    }
}

impl From<ComparisonKind> for BinaryOperator {
    fn from(kind: ComparisonKind) -> Self {
        match kind {
            ComparisonKind::Equality => BinaryOperator::Equality,
            ComparisonKind::Inequality => BinaryOperator::Inequality,
            ComparisonKind::LessThan => BinaryOperator::LessThan,
            ComparisonKind::LessThanOrEqual => BinaryOperator::LessThanOrEqual,
            ComparisonKind::GreaterThan => BinaryOperator::GreaterThan,
            ComparisonKind::GreaterThanOrEqual => BinaryOperator::GreaterThanOrEqual,
        }
    }
}

const PRECEDENCE_ASSIGNMENT: u8 = 1;
const PRECEDENCE_BITWISE_OR: u8 = 6;
const PRECEDENCE_EXCLUSIVE_OR: u8 = 7;
const PRECEDENCE_BITWISE_AND: u8 = 8;
const PRECEDENCE_EQUALITY: u8 = 9;
const PRECEDENCE_RELATIONAL: u8 = 10;
const PRECEDENCE_SHIFT: u8 = 11;
const PRECEDENCE_ADDITIVE: u8 = 12;
const PRECEDENCE_MULTIPLICATIVE: u8 = 13;
const PRECEDENCE_UNARY: u8 = 14;
const PRECEDENCE_PRIMARY: u8 = 15;

/// The closed set of expression shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum ExpressionKind {
    /// A literal.
    Primitive(Literal),
    /// `null`
    Null,
    /// `this`
    This,
    /// `base`, the receiver of a non-virtual call on `this`.
    Base,
    /// A local or parameter name.
    Identifier(String),
    /// A type used as the target of a static member access.
    TypeReference(Type),
    /// `ref e`
    Direction(Box<Expression>),
    /// `op e`
    Unary {
        /// Operator.
        op: UnaryOperator,
        /// Operand.
        operand: Box<Expression>,
    },
    /// `left op right`
    Binary {
        /// Operator.
        op: BinaryOperator,
        /// Left operand.
        left: Box<Expression>,
        /// Right operand.
        right: Box<Expression>,
    },
    /// `left = right`, or `left op= right` for compound assignments.
    Assignment {
        /// `None` for plain assignment.
        op: Option<BinaryOperator>,
        /// Assigned location.
        left: Box<Expression>,
        /// Assigned value.
        right: Box<Expression>,
    },
    /// `++e`, `e++`, `--e` or `e--`.
    Increment {
        /// `true` for `++`, `false` for `--`.
        increment: bool,
        /// `true` if the expression evaluates to the old value.
        postfix: bool,
        /// Updated location.
        operand: Box<Expression>,
    },
    /// `(T)e`
    Cast {
        /// Target type.
        ty: Type,
        /// Converted value.
        expression: Box<Expression>,
    },
    /// `e as T`
    As {
        /// Tested value.
        expression: Box<Expression>,
        /// Target type.
        ty: Type,
    },
    /// `e is T`
    Is {
        /// Tested value.
        expression: Box<Expression>,
        /// Tested type.
        ty: Type,
    },
    /// `checked(e)`
    Checked(Box<Expression>),
    /// `target.name`
    MemberReference {
        /// Object or type.
        target: Box<Expression>,
        /// Member name.
        name: String,
    },
    /// `target(arguments)`, where `target` is usually a member reference.
    Invocation {
        /// Called member.
        target: Box<Expression>,
        /// Arguments, excluding the receiver.
        arguments: Vec<Expression>,
    },
    /// `new T(arguments)`
    ObjectCreate {
        /// Created type.
        ty: Type,
        /// Constructor arguments.
        arguments: Vec<Expression>,
    },
    /// `target[index]`
    Index {
        /// Array.
        target: Box<Expression>,
        /// Element index.
        index: Box<Expression>,
    },
    /// Placeholder for an instruction that has no expression form.
    Error(String),
}

/// An expression with the instructions it was built from.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    /// Shape.
    pub kind: ExpressionKind,
    /// Originating instructions.
    pub instructions: Vec<InstrId>,
}

impl Expression {
    /// Creates an expression without originating instructions.
    #[must_use]
    pub fn new(kind: ExpressionKind) -> Self {
        Expression {
            kind,
            instructions: Vec::new(),
        }
    }

    /// `name`
    #[must_use]
    pub fn identifier(name: impl Into<String>) -> Self {
        Self::new(ExpressionKind::Identifier(name.into()))
    }

    /// A literal.
    #[must_use]
    pub fn literal(value: Literal) -> Self {
        Self::new(ExpressionKind::Primitive(value))
    }

    /// `op operand`
    #[must_use]
    pub fn unary(op: UnaryOperator, operand: Expression) -> Self {
        Self::new(ExpressionKind::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    /// `left op right`
    #[must_use]
    pub fn binary(op: BinaryOperator, left: Expression, right: Expression) -> Self {
        Self::new(ExpressionKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    /// `left = right` or `left op= right`.
    #[must_use]
    pub fn assignment(op: Option<BinaryOperator>, left: Expression, right: Expression) -> Self {
        Self::new(ExpressionKind::Assignment {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    /// `target.name`
    #[must_use]
    pub fn member(target: Expression, name: impl Into<String>) -> Self {
        Self::new(ExpressionKind::MemberReference {
            target: Box::new(target),
            name: name.into(),
        })
    }

    /// Adds an originating instruction.
    #[must_use]
    pub fn with_instruction(mut self, inst: InstrId) -> Self {
        self.instructions.push(inst);
        self
    }

    /// Direct sub-expressions in evaluation order.
    #[must_use]
    pub fn children(&self) -> Vec<&Expression> {
        match &self.kind {
            ExpressionKind::Primitive(_)
            | ExpressionKind::Null
            | ExpressionKind::This
            | ExpressionKind::Base
            | ExpressionKind::Identifier(_)
            | ExpressionKind::TypeReference(_)
            | ExpressionKind::Error(_) => Vec::new(),
            ExpressionKind::Direction(inner)
            | ExpressionKind::Checked(inner)
            | ExpressionKind::Unary { operand: inner, .. }
            | ExpressionKind::Increment { operand: inner, .. }
            | ExpressionKind::Cast {
                expression: inner, ..
            }
            | ExpressionKind::As {
                expression: inner, ..
            }
            | ExpressionKind::Is {
                expression: inner, ..
            }
            | ExpressionKind::MemberReference { target: inner, .. } => vec![inner],
            ExpressionKind::Binary { left, right, .. }
            | ExpressionKind::Assignment { left, right, .. } => vec![left, right],
            ExpressionKind::Index { target, index } => vec![target, index],
            ExpressionKind::Invocation { target, arguments } => std::iter::once(&**target)
                .chain(arguments.iter())
                .collect(),
            ExpressionKind::ObjectCreate { arguments, .. } => arguments.iter().collect(),
        }
    }

    /// Returns `true` for [`ExpressionKind::Error`] anywhere in the tree.
    #[must_use]
    pub fn contains_error(&self) -> bool {
        matches!(self.kind, ExpressionKind::Error(_))
            || self.children().into_iter().any(Expression::contains_error)
    }

    fn precedence(&self) -> u8 {
        match &self.kind {
            ExpressionKind::Binary { op, .. } => op.precedence(),
            ExpressionKind::Assignment { .. } => PRECEDENCE_ASSIGNMENT,
            ExpressionKind::As { .. } | ExpressionKind::Is { .. } => PRECEDENCE_RELATIONAL,
            ExpressionKind::Unary { .. }
            | ExpressionKind::Cast { .. }
            | ExpressionKind::Direction(_) => PRECEDENCE_UNARY,
            ExpressionKind::Increment { postfix: false, .. } => PRECEDENCE_UNARY,
            _ => PRECEDENCE_PRIMARY,
        }
    }
}

/// Writes `e`, parenthesized if it binds looser than `min`.
fn write_operand(f: &mut fmt::Formatter<'_>, e: &Expression, min: u8) -> fmt::Result {
    if e.precedence() < min {
        write!(f, "({})", e)
    } else {
        write!(f, "{}", e)
    }
}

fn write_arguments(f: &mut fmt::Formatter<'_>, arguments: &[Expression]) -> fmt::Result {
    for (i, argument) in arguments.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", argument)?;
    }
    Ok(())
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Int32(v) => write!(f, "{}", v),
            Literal::Int64(v) => write!(f, "{}L", v),
            Literal::Float(v) => write!(f, "{:?}", v),
            Literal::Boolean(v) => write!(f, "{}", v),
            Literal::String(v) => write!(f, "{:?}", v),
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ExpressionKind::Primitive(value) => write!(f, "{}", value),
            ExpressionKind::Null => f.write_str("null"),
            ExpressionKind::This => f.write_str("this"),
            ExpressionKind::Base => f.write_str("base"),
            ExpressionKind::Identifier(name) => f.write_str(name),
            ExpressionKind::TypeReference(ty) => write!(f, "{}", ty),
            ExpressionKind::Direction(inner) => {
                f.write_str("ref ")?;
                write_operand(f, inner, PRECEDENCE_UNARY)
            }
            ExpressionKind::Unary { op, operand } => {
                f.write_str(match op {
                    UnaryOperator::Not => "!",
                    UnaryOperator::BitNot => "~",
                    UnaryOperator::Minus => "-",
                    UnaryOperator::Dereference => "*",
                })?;
                write_operand(f, operand, PRECEDENCE_UNARY)
            }
            ExpressionKind::Binary { op, left, right } => {
                let precedence = op.precedence();
                write_operand(f, left, precedence)?;
                write!(f, " {} ", op.symbol())?;
                write_operand(f, right, precedence + 1)
            }
            ExpressionKind::Assignment { op, left, right } => {
                write_operand(f, left, PRECEDENCE_UNARY)?;
                match op {
                    Some(op) => write!(f, " {}= ", op.symbol())?,
                    None => f.write_str(" = ")?,
                }
                write_operand(f, right, PRECEDENCE_ASSIGNMENT)
            }
            ExpressionKind::Increment {
                increment,
                postfix,
                operand,
            } => {
                let token = if *increment { "++" } else { "--" };
                if *postfix {
                    write_operand(f, operand, PRECEDENCE_PRIMARY)?;
                    f.write_str(token)
                } else {
                    f.write_str(token)?;
                    write_operand(f, operand, PRECEDENCE_UNARY)
                }
            }
            ExpressionKind::Cast { ty, expression } => {
                write!(f, "({})", ty)?;
                write_operand(f, expression, PRECEDENCE_UNARY)
            }
            ExpressionKind::As { expression, ty } => {
                write_operand(f, expression, PRECEDENCE_RELATIONAL + 1)?;
                write!(f, " as {}", ty)
            }
            ExpressionKind::Is { expression, ty } => {
                write_operand(f, expression, PRECEDENCE_RELATIONAL + 1)?;
                write!(f, " is {}", ty)
            }
            ExpressionKind::Checked(inner) => write!(f, "checked({})", inner),
            ExpressionKind::MemberReference { target, name } => {
                write_operand(f, target, PRECEDENCE_PRIMARY)?;
                write!(f, ".{}", name)
            }
            ExpressionKind::Invocation { target, arguments } => {
                write_operand(f, target, PRECEDENCE_PRIMARY)?;
                f.write_str("(")?;
                write_arguments(f, arguments)?;
                f.write_str(")")
            }
            ExpressionKind::ObjectCreate { ty, arguments } => {
                write!(f, "new {}(", ty)?;
                write_arguments(f, arguments)?;
                f.write_str(")")
            }
            ExpressionKind::Index { target, index } => {
                write_operand(f, target, PRECEDENCE_PRIMARY)?;
                write!(f, "[{}]", index)
            }
            ExpressionKind::Error(message) => write!(f, "/* {} */", message),
        }
    }
}

/// A label of a switch section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaseLabel {
    /// `case value:`
    Value(i64),
    /// `default:`
    Default,
}

/// One `case ...: statements` group of a switch.
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchSection {
    /// Labels selecting this section.
    pub labels: Vec<CaseLabel>,
    /// Body.
    pub statements: Vec<Statement>,
}

/// `{ statements }`
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BlockStatement {
    /// Statements in order.
    pub statements: Vec<Statement>,
}

impl BlockStatement {
    /// Creates a block.
    #[must_use]
    pub fn new(statements: Vec<Statement>) -> Self {
        BlockStatement { statements }
    }

    /// Number of statements, counting nested statements.
    #[must_use]
    pub fn statement_count(&self) -> usize {
        self.statements.iter().map(Statement::statement_count).sum()
    }
}

/// The closed set of statement shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum StatementKind {
    /// `e;`
    Expression(Expression),
    /// A nested block.
    Block(BlockStatement),
    /// `name:`
    Label(String),
    /// `goto name;`
    Goto(String),
    /// `if (condition) { .. } else { .. }`
    If {
        /// Condition.
        condition: Expression,
        /// Taken branch.
        true_block: BlockStatement,
        /// Else branch, if any.
        false_block: Option<BlockStatement>,
    },
    /// `while (condition) { .. }`
    While {
        /// Loop condition.
        condition: Expression,
        /// Body.
        body: BlockStatement,
    },
    /// `for (initializers; condition; iterators) { .. }`
    For {
        /// Initializer statements.
        initializers: Vec<Statement>,
        /// Condition, as an expression statement.
        condition: Option<Box<Statement>>,
        /// Iterator statements.
        iterators: Vec<Statement>,
        /// Body.
        body: BlockStatement,
    },
    /// `break;`
    Break,
    /// `continue;`
    Continue,
    /// `return;` or `return value;`
    Return(Option<Expression>),
    /// `throw value;`
    Throw(Expression),
    /// `using (resource) { .. }`
    Using {
        /// Resource acquisition, usually an assignment to the resource variable.
        resource: Expression,
        /// Body.
        body: BlockStatement,
    },
    /// `try { .. } finally { .. }`
    TryFinally {
        /// Protected block.
        try_block: BlockStatement,
        /// Handler.
        finally_block: BlockStatement,
    },
    /// `switch (expression) { sections }`
    Switch {
        /// Governing expression.
        expression: Expression,
        /// Sections.
        sections: Vec<SwitchSection>,
    },
}

/// A statement with its originating instructions and layout position.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    /// Shape.
    pub kind: StatementKind,
    /// Originating instructions, in addition to those of nested expressions.
    pub instructions: Vec<InstrId>,
    /// Position assigned by [`crate::ast::assign_positions`]; compound
    /// statements span their header line.
    pub span: Option<TextSpan>,
}

impl Statement {
    /// Creates an unpositioned statement.
    #[must_use]
    pub fn new(kind: StatementKind, instructions: Vec<InstrId>) -> Self {
        Statement {
            kind,
            instructions,
            span: None,
        }
    }

    /// `e;`
    #[must_use]
    pub fn expression(expression: Expression) -> Self {
        Self::new(StatementKind::Expression(expression), Vec::new())
    }

    /// 1 plus the number of nested statements.
    #[must_use]
    pub fn statement_count(&self) -> usize {
        1 + match &self.kind {
            StatementKind::Block(block)
            | StatementKind::While { body: block, .. }
            | StatementKind::Using { body: block, .. } => block.statement_count(),
            StatementKind::If {
                true_block,
                false_block,
                ..
            } => {
                true_block.statement_count()
                    + false_block.as_ref().map_or(0, BlockStatement::statement_count)
            }
            StatementKind::For {
                initializers,
                condition,
                iterators,
                body,
            } => {
                initializers
                    .iter()
                    .chain(condition.as_deref())
                    .chain(iterators)
                    .map(Statement::statement_count)
                    .sum::<usize>()
                    + body.statement_count()
            }
            StatementKind::TryFinally {
                try_block,
                finally_block,
            } => try_block.statement_count() + finally_block.statement_count(),
            StatementKind::Switch { sections, .. } => sections
                .iter()
                .flat_map(|s| &s.statements)
                .map(Statement::statement_count)
                .sum(),
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ident(name: &str) -> Expression {
        Expression::identifier(name)
    }

    #[test]
    fn test_binary_parenthesizes_looser_operands() {
        let sum = Expression::binary(BinaryOperator::Add, ident("a"), ident("b"));
        let product = Expression::binary(BinaryOperator::Multiply, sum, ident("c"));
        assert_eq!(product.to_string(), "(a + b) * c");

        let right = Expression::binary(BinaryOperator::Subtract, ident("b"), ident("c"));
        let diff = Expression::binary(BinaryOperator::Subtract, ident("a"), right);
        assert_eq!(diff.to_string(), "a - (b - c)");
    }

    #[test]
    fn test_negated_type_test() {
        let is = Expression::new(ExpressionKind::Is {
            expression: Box::new(ident("x")),
            ty: Type::OBJECT,
        });
        assert_eq!(
            Expression::unary(UnaryOperator::Not, is).to_string(),
            "!(x is object)"
        );
    }

    #[test]
    fn test_compound_and_increment() {
        let count = Expression::member(Expression::identifier("c"), "Count");
        let compound = Expression::assignment(
            Some(BinaryOperator::Add),
            count.clone(),
            Expression::literal(Literal::Int32(2)),
        );
        assert_eq!(compound.to_string(), "c.Count += 2");

        let post = Expression::new(ExpressionKind::Increment {
            increment: false,
            postfix: true,
            operand: Box::new(count),
        });
        assert_eq!(post.to_string(), "c.Count--");
    }

    #[test]
    fn test_statement_count_includes_nested() {
        let inner = Statement::expression(ident("a"));
        let using = Statement::new(
            StatementKind::Using {
                resource: ident("r"),
                body: BlockStatement::new(vec![inner.clone(), inner]),
            },
            Vec::new(),
        );
        let body = BlockStatement::new(vec![using, Statement::new(StatementKind::Break, vec![])]);
        assert_eq!(body.statement_count(), 4);
    }

    #[test]
    fn test_children_follow_evaluation_order() {
        let call = Expression::new(ExpressionKind::Invocation {
            target: Box::new(Expression::member(ident("o"), "M")),
            arguments: vec![ident("x"), ident("y")],
        });
        assert_eq!(call.children().len(), 3);
        assert_eq!(call.to_string(), "o.M(x, y)");
        assert!(!call.contains_error());
    }
}
