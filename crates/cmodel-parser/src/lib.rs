//! cmodel Parser
//!
//! Token-based extraction of declarations from C/C++ sources, without a
//! full grammar and without macro expansion. Malformed input degrades to
//! best-effort models plus diagnostics.
//!
//! ## Modules
//!
//! - `tokenizer` - Lossless lexer producing typed tokens
//! - `preprocessor` - `#if` chain evaluation over a frozen macro table
//! - `structure` - Brace-balanced spans of aggregates, functions and statements
//! - `declarations` - Spans to structs, enums, typedefs, functions and globals
//! - `anonymous` - Lifting of inline struct/union bodies into named entities
//! - `pipeline` - Per-file parser tying the stages together
//! - `cache` - Per-parser compiled patterns and content cache
//! - `project` - File discovery and parallel project parsing using rayon
//! - `diagnostics` - Recoverable problems reported alongside a model

pub mod anonymous;
pub mod cache;
pub mod declarations;
pub mod diagnostics;
pub mod pipeline;
pub mod preprocessor;
pub mod project;
pub mod structure;
pub mod tokenizer;

pub use anonymous::AnonymousTypedefProcessor;
pub use cache::{CacheStats, ParserCache};
pub use diagnostics::{Diagnostic, DiagnosticKind};
pub use pipeline::CParser;
pub use preprocessor::{MacroDefinition, MacroTable, PreprocessorEvaluator};
pub use project::{discover_files, ProgressEvent, ProgressPhase, ProjectParser};
pub use structure::StructureFinder;
pub use tokenizer::{filter_significant, tokenize, Token, TokenKind, Tokenizer};

#[cfg(test)]
mod tests;
