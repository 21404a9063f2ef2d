//! C# syntax tree built from the transformed instruction tree.
//!
//! # Key Components
//!
//! - [`ExpressionBuilder`] - Instructions to typed expressions with casts
//! - [`StatementBuilder`] - Containers and blocks to statements, labels and loops
//! - [`assign_positions`] - Line and column layout of the statement tree
//! - [`SequencePointBuilder`] - Statement tree back to IL offsets
//!
//! Every node records the instructions it was built from; sequence points
//! are derived from those records after layout.

mod converted;
mod expression_builder;
mod layout;
mod sequence_points;
mod statement_builder;
pub mod syntax;

pub use converted::{ConversionKind, ConvertedExpression, Provenance};
pub use expression_builder::ExpressionBuilder;
pub use layout::assign_positions;
pub use sequence_points::{SequencePoint, SequencePointBuilder, SequencePoints, HIDDEN_LINE};
pub use statement_builder::StatementBuilder;
pub use syntax::{
    BlockStatement, CaseLabel, Expression, ExpressionKind, Statement, StatementKind, TextLocation,
    TextSpan,
};
