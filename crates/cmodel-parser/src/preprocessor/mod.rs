//! Preprocessor handling
//!
//! Conditional compilation over the token stream. No macro expansion and no
//! include resolution: the parser only needs to know which branches of
//! `#if` chains are active for a given macro table.

pub mod evaluator;
pub mod expr;
pub mod macros;

pub use evaluator::PreprocessorEvaluator;
pub use expr::{ConditionError, ConditionExpr};
pub use macros::{MacroDefinition, MacroError, MacroTable};
