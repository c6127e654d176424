//! Conditional compilation
//!
//! Walks a token stream and keeps only the tokens of active branches.
//! Each `#if`/`#ifdef`/`#ifndef` opens a frame; `#elif`/`#else` switch the
//! top frame and `#endif` closes it. A token survives iff every open frame
//! is taken.

use tracing::{debug, warn};

use super::expr::ConditionExpr;
use super::macros::MacroTable;
use crate::diagnostics::{DiagnosticKind, Diagnostics};
use crate::tokenizer::Token;

/// One open conditional
#[derive(Debug, Clone, Copy)]
struct Frame {
    /// Whether the enclosing region is active
    parent_active: bool,
    /// Whether the current branch is taken
    taken: bool,
    /// Whether any branch of this conditional was taken
    any_taken: bool,
    line: usize,
}

impl Frame {
    fn active(&self) -> bool {
        self.parent_active && self.taken
    }
}

/// Evaluates conditional directives against a fixed macro table
#[derive(Debug, Clone, Default)]
pub struct PreprocessorEvaluator {
    macros: MacroTable,
}

impl PreprocessorEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_macros(macros: MacroTable) -> Self {
        Self { macros }
    }

    /// Add a definition. Only meaningful before parsing starts; the parser
    /// shares the evaluator read-only afterwards.
    pub fn add_define(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.macros.define(name, value);
    }

    pub fn macros(&self) -> &MacroTable {
        &self.macros
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.macros.is_defined(name)
    }

    /// Evaluate an `#if` expression. Expressions that cannot be parsed are
    /// logged and count as false.
    pub fn evaluate_condition(&self, expression: &str) -> bool {
        match ConditionExpr::parse(expression).and_then(|e| e.eval(&self.macros)) {
            Ok(value) => value != 0,
            Err(e) => {
                warn!("Cannot evaluate condition '{}': {}", expression, e);
                false
            }
        }
    }

    /// Keep the tokens of active branches, dropping conditional directives
    pub fn filter_tokens(&self, tokens: &[Token]) -> Vec<Token> {
        let mut diagnostics = Diagnostics::new();
        self.filter_tokens_with_diagnostics(tokens, &mut diagnostics)
    }

    /// Like [`Self::filter_tokens`], recording recovered problems
    pub fn filter_tokens_with_diagnostics(
        &self,
        tokens: &[Token],
        diagnostics: &mut Diagnostics,
    ) -> Vec<Token> {
        let mut frames: Vec<Frame> = Vec::new();
        let mut kept = Vec::with_capacity(tokens.len());

        for token in tokens {
            let active = frames.last().map_or(true, Frame::active);

            let Some((name, rest)) = token.directive() else {
                if active {
                    kept.push(token.clone());
                }
                continue;
            };

            match name {
                "if" | "ifdef" | "ifndef" => {
                    let taken = active && self.condition(name, rest, token.line, diagnostics);
                    frames.push(Frame {
                        parent_active: active,
                        taken,
                        any_taken: taken,
                        line: token.line,
                    });
                }
                "elif" | "elifdef" | "elifndef" => {
                    let Some(frame) = frames.last().copied() else {
                        diagnostics.report(
                            DiagnosticKind::DanglingEndif,
                            token.line,
                            format!("#{} without #if", name),
                        );
                        continue;
                    };
                    let taken = frame.parent_active
                        && !frame.any_taken
                        && self.condition(name, rest, token.line, diagnostics);
                    if let Some(top) = frames.last_mut() {
                        top.taken = taken;
                        top.any_taken |= taken;
                    }
                }
                "else" => match frames.last_mut() {
                    Some(top) => {
                        top.taken = top.parent_active && !top.any_taken;
                        top.any_taken = true;
                    }
                    None => diagnostics.report(
                        DiagnosticKind::DanglingEndif,
                        token.line,
                        "#else without #if",
                    ),
                },
                "endif" => {
                    if frames.pop().is_none() {
                        diagnostics.report(
                            DiagnosticKind::DanglingEndif,
                            token.line,
                            "#endif without #if",
                        );
                    }
                }
                _ => {
                    if active {
                        kept.push(token.clone());
                    }
                }
            }
        }

        for frame in &frames {
            warn!("Conditional opened at line {} is never closed", frame.line);
        }
        debug!("Kept {} of {} tokens", kept.len(), tokens.len());
        kept
    }

    /// Whether the branch introduced by directive `name` is taken
    fn condition(
        &self,
        name: &str,
        rest: &str,
        line: usize,
        diagnostics: &mut Diagnostics,
    ) -> bool {
        match name {
            "ifdef" | "elifdef" => self.is_defined(first_word(rest)),
            "ifndef" | "elifndef" => !self.is_defined(first_word(rest)),
            _ => match ConditionExpr::parse(rest).and_then(|e| e.eval(&self.macros)) {
                Ok(value) => value != 0,
                Err(e) => {
                    diagnostics.report(
                        DiagnosticKind::UnresolvedCondition,
                        line,
                        format!("cannot evaluate '{}': {}", rest, e),
                    );
                    false
                }
            },
        }
    }
}

fn first_word(text: &str) -> &str {
    text.split_whitespace().next().unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::{filter_significant, tokenize};

    fn surviving(source: &str, evaluator: &PreprocessorEvaluator) -> Vec<String> {
        let tokens = tokenize(source);
        filter_significant(&evaluator.filter_tokens(&tokens))
            .into_iter()
            .map(|t| t.value)
            .collect()
    }

    #[test]
    fn test_evaluate_condition() {
        let mut evaluator = PreprocessorEvaluator::new();
        evaluator.add_define("FOO", "1");
        evaluator.add_define("BAR", "2");
        assert!(evaluator.evaluate_condition("FOO == 1"));
        assert!(evaluator.evaluate_condition("BAR > FOO"));
        assert!(!evaluator.evaluate_condition("!FOO"));
        assert!(evaluator.evaluate_condition("defined(BAR)"));
        assert!(!evaluator.evaluate_condition("FOO +"));
    }

    #[test]
    fn test_defined_and_equality_follow_macro_table() {
        let mut evaluator = PreprocessorEvaluator::new();
        evaluator.add_define("A", "1");
        assert!(evaluator.evaluate_condition("defined(A)"));
        assert!(evaluator.evaluate_condition("A==1"));

        let empty = PreprocessorEvaluator::new();
        assert!(!empty.evaluate_condition("defined(A)"));
        assert!(!empty.evaluate_condition("A==1"));
    }

    #[test]
    fn test_if_else_chain() {
        let mut evaluator = PreprocessorEvaluator::new();
        evaluator.add_define("MODE", "2");
        let source = "#if MODE == 1\nint a;\n#elif MODE == 2\nint b;\n#else\nint c;\n#endif\n";
        assert_eq!(surviving(source, &evaluator), vec!["int", "b", ";"]);
    }

    #[test]
    fn test_ifdef_ifndef() {
        let mut evaluator = PreprocessorEvaluator::new();
        evaluator.add_define("HAVE_X", "");
        let source = "#ifdef HAVE_X\nint x;\n#endif\n#ifndef HAVE_X\nint y;\n#endif\n";
        assert_eq!(surviving(source, &evaluator), vec!["int", "x", ";"]);
    }

    #[test]
    fn test_nested_untaken_region() {
        let mut evaluator = PreprocessorEvaluator::new();
        evaluator.add_define("INNER", "1");
        let source = "#if 0\n#if INNER\nint a;\n#else\nint b;\n#endif\n#endif\nint c;\n";
        assert_eq!(surviving(source, &evaluator), vec!["int", "c", ";"]);
    }

    #[test]
    fn test_only_first_true_branch_taken() {
        let evaluator = PreprocessorEvaluator::new();
        let source = "#if 1\nint a;\n#elif 1\nint b;\n#else\nint c;\n#endif\n";
        assert_eq!(surviving(source, &evaluator), vec!["int", "a", ";"]);
    }

    #[test]
    fn test_other_directives_follow_region() {
        let evaluator = PreprocessorEvaluator::new();
        let source = "#include <a.h>\n#if 0\n#include <b.h>\n#endif\n";
        assert_eq!(surviving(source, &evaluator), vec!["#include <a.h>"]);
    }

    #[test]
    fn test_source_defines_do_not_enable_branches() {
        let evaluator = PreprocessorEvaluator::new();
        let source = "#define A 1\n#if A\nint x;\n#endif\n";
        assert_eq!(surviving(source, &evaluator), vec!["#define A 1"]);
    }

    #[test]
    fn test_recovery_diagnostics() {
        let evaluator = PreprocessorEvaluator::new();
        let tokens = tokenize("#endif\n#if (\nint a;\n#endif\nint b;\n");
        let mut diagnostics = Diagnostics::new();
        let kept = evaluator.filter_tokens_with_diagnostics(&tokens, &mut diagnostics);
        let values: Vec<String> = filter_significant(&kept).into_iter().map(|t| t.value).collect();
        assert_eq!(values, vec!["int", "b", ";"]);
        assert_eq!(diagnostics.count(DiagnosticKind::DanglingEndif), 1);
        assert_eq!(diagnostics.count(DiagnosticKind::UnresolvedCondition), 1);
    }
}
