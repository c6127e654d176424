//! Structure finding
//!
//! Locates the spans of file-scope definitions in a significant token
//! stream: aggregate bodies, functions and the statements between them.
//! Nothing here interprets declarations; see [`crate::declarations`].
//!
//! `extern "C" { ... }` and `namespace x { ... }` blocks are transparent:
//! their contents count as file scope.

use crate::diagnostics::{DiagnosticKind, Diagnostics};
use crate::tokenizer::{Token, TokenKind};

/// Names that look like calls but only decorate a declaration
const ATTRIBUTE_LIKE: &[&str] = &[
    "__attribute__",
    "__attribute",
    "__declspec",
    "__asm__",
    "__asm",
    "asm",
    "alignas",
    "_Alignas",
    "__typeof__",
    "typeof",
    "decltype",
];

/// Kind of a braced type definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateKind {
    Struct,
    Union,
    Enum,
}

impl AggregateKind {
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "struct" => Some(AggregateKind::Struct),
            "union" => Some(AggregateKind::Union),
            "enum" => Some(AggregateKind::Enum),
            _ => None,
        }
    }

    pub fn keyword(&self) -> &'static str {
        match self {
            AggregateKind::Struct => "struct",
            AggregateKind::Union => "union",
            AggregateKind::Enum => "enum",
        }
    }
}

/// A `struct`/`union`/`enum` definition with a body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeSpan {
    pub kind: AggregateKind,
    /// Index of the keyword
    pub start: usize,
    /// Index of `{`
    pub body_start: usize,
    /// Index of the matching `}`
    pub end: usize,
    /// Tag name, `None` for anonymous definitions
    pub tag: Option<String>,
}

/// A function definition or prototype
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSpan {
    /// First token of the declaration, start of the return type
    pub start: usize,
    /// First token of the (possibly qualified) name
    pub name_start: usize,
    /// Index of `(` opening the parameter list
    pub params_open: usize,
    /// Index of the matching `)`
    pub params_close: usize,
    /// Last token of the declarator. Past `params_close` only when the
    /// function returns a function pointer: `int (*get(int id))(void)`.
    pub declarator_end: usize,
    /// Last token: `;` for prototypes, `}` for definitions
    pub end: usize,
    pub name: String,
    pub is_declaration: bool,
}

/// Inclusive token range of one file-scope statement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Statement {
    pub start: usize,
    pub end: usize,
}

/// Finds definition spans over a significant token stream
pub struct StructureFinder<'a> {
    tokens: &'a [Token],
    /// Block depth of each token, transparent blocks not counted
    depths: Vec<usize>,
    /// Parenthesis depth of each file-scope token
    parens: Vec<usize>,
    /// Braces that open or close a transparent block
    transparent: Vec<bool>,
    types: Vec<TypeSpan>,
    diagnostics: Diagnostics,
}

impl<'a> StructureFinder<'a> {
    pub fn new(tokens: &'a [Token]) -> Self {
        let (depths, transparent) = scope_depths(tokens);
        let parens = paren_depths(tokens, &depths, &transparent);
        let mut finder = Self {
            tokens,
            depths,
            parens,
            transparent,
            types: Vec::new(),
            diagnostics: Diagnostics::new(),
        };
        finder.types = finder.scan_types();
        finder
    }

    /// Structs at file scope, as `(start, end, tag)` spans
    pub fn find_structs(&self) -> Vec<TypeSpan> {
        self.types_of(AggregateKind::Struct)
    }

    pub fn find_unions(&self) -> Vec<TypeSpan> {
        self.types_of(AggregateKind::Union)
    }

    pub fn find_enums(&self) -> Vec<TypeSpan> {
        self.types_of(AggregateKind::Enum)
    }

    /// All aggregate definitions in source order
    pub fn type_spans(&self) -> &[TypeSpan] {
        &self.types
    }

    /// Definition whose keyword lies inside `statement`
    pub fn type_span_in(&self, statement: &Statement) -> Option<&TypeSpan> {
        self.types
            .iter()
            .find(|s| s.start >= statement.start && s.end <= statement.end)
    }

    /// Problems found while scanning
    pub fn take_diagnostics(&mut self) -> Diagnostics {
        std::mem::take(&mut self.diagnostics)
    }

    fn types_of(&self, kind: AggregateKind) -> Vec<TypeSpan> {
        self.types.iter().filter(|s| s.kind == kind).cloned().collect()
    }

    fn scan_types(&mut self) -> Vec<TypeSpan> {
        let mut spans = Vec::new();
        let mut i = 0;
        while i < self.tokens.len() {
            let token = &self.tokens[i];
            // Bodies inside parameter lists belong to the declaration
            if self.depths[i] == 0 && self.parens[i] == 0 && token.kind == TokenKind::Keyword {
                if let Some(kind) = AggregateKind::from_keyword(&token.value) {
                    if let Some(span) = self.type_span_at(i, kind) {
                        i = span.end + 1;
                        spans.push(span);
                        continue;
                    }
                }
            }
            i += 1;
        }
        spans
    }

    fn type_span_at(&mut self, start: usize, kind: AggregateKind) -> Option<TypeSpan> {
        let tokens = self.tokens;
        let mut j = start + 1;
        if kind == AggregateKind::Enum
            && tokens
                .get(j)
                .is_some_and(|t| t.is_keyword("class") || t.is_keyword("struct"))
        {
            j += 1;
        }
        j = skip_attributes(tokens, j);
        let tag = match tokens.get(j) {
            Some(t) if t.is_identifier() => {
                j += 1;
                Some(t.value.clone())
            }
            _ => None,
        };
        j = skip_attributes(tokens, j);
        if tokens.get(j).is_some_and(|t| t.is_punct(":")) {
            while j < tokens.len() && !tokens[j].is_punct("{") && !tokens[j].is_punct(";") {
                j += 1;
            }
        }
        if !tokens.get(j).is_some_and(|t| t.is_punct("{")) {
            return None;
        }

        match matching_close(tokens, j) {
            Some(end) => Some(TypeSpan {
                kind,
                start,
                body_start: j,
                end,
                tag,
            }),
            None => {
                self.diagnostics.report(
                    DiagnosticKind::UnbalancedSpan,
                    tokens[start].line,
                    format!(
                        "{} {} has no closing brace",
                        kind.keyword(),
                        tag.as_deref().unwrap_or("<anonymous>")
                    ),
                );
                None
            }
        }
    }

    /// File-scope statements in source order. A statement ends at `;`, or
    /// at the `}` closing a function body.
    pub fn statements(&self) -> Vec<Statement> {
        let tokens = self.tokens;
        let mut statements = Vec::new();
        let mut start: Option<usize> = None;
        let mut block_ends_statement = false;

        for (i, token) in tokens.iter().enumerate() {
            if self.depths[i] != 0 {
                continue;
            }
            if self.transparent[i] {
                start = None;
                continue;
            }
            if token.kind == TokenKind::Preprocessor && start.is_none() {
                continue;
            }
            let s = match start {
                Some(s) => s,
                None => {
                    start = Some(i);
                    block_ends_statement = false;
                    i
                }
            };

            if self.parens[i] > 0 {
                continue;
            }
            if token.is_punct(";") {
                statements.push(Statement { start: s, end: i });
                start = None;
            } else if token.is_punct("{") {
                block_ends_statement = !opens_type_or_initializer(tokens, s, i);
            } else if token.is_punct("}") && block_ends_statement {
                statements.push(Statement { start: s, end: i });
                start = None;
            }
        }
        if let Some(s) = start {
            statements.push(Statement {
                start: s,
                end: tokens.len() - 1,
            });
        }
        statements
    }

    /// Functions at file scope, definitions and prototypes alike
    pub fn find_functions(&self) -> Vec<FunctionSpan> {
        self.statements()
            .iter()
            .filter_map(|st| self.function_in(st))
            .collect()
    }

    /// Interpret `statement` as a function, if it is one
    pub fn function_in(&self, statement: &Statement) -> Option<FunctionSpan> {
        let tokens = self.tokens;
        let Statement { start, end } = *statement;
        if tokens[start].is_keyword("typedef") {
            return None;
        }

        let mut k = start;
        let open = loop {
            if k > end {
                return None;
            }
            let t = &tokens[k];
            if t.is_punct("=") || t.is_punct("{") {
                return None;
            }
            if ATTRIBUTE_LIKE.contains(&t.value.as_str()) {
                k = skip_attributes(tokens, k);
                continue;
            }
            if t.is_punct("(") {
                break k;
            }
            k += 1;
        };

        let (name_index, params_open, declarator_end) =
            if tokens.get(open + 1).is_some_and(|t| t.is_punct("*")) {
                self.pointer_returning(open, end)?
            } else {
                let close = matching_close(tokens, open).filter(|&c| c <= end)?;
                (open.checked_sub(1)?, open, close)
            };
        if !tokens[name_index].is_identifier() {
            return None;
        }
        let floor = if params_open == open { start } else { open };
        let mut name_start = name_index;
        while name_start >= floor + 2
            && tokens[name_start - 1].is_punct("::")
            && tokens[name_start - 2].is_identifier()
        {
            name_start -= 2;
        }
        if name_start <= start {
            return None;
        }

        let close = matching_close(tokens, params_open).filter(|&c| c <= declarator_end)?;
        let mut after = declarator_end + 1;
        while after <= end {
            let t = &tokens[after];
            if ATTRIBUTE_LIKE.contains(&t.value.as_str()) {
                after = skip_attributes(tokens, after);
            } else if t.is_identifier() || t.is_keyword("const") || t.is_keyword("noexcept") {
                after += 1;
            } else {
                break;
            }
        }

        let is_declaration = match tokens.get(after) {
            Some(t) if t.is_punct(";") && after == end => true,
            Some(t) if t.is_punct("{") && tokens[end].is_punct("}") => false,
            _ => return None,
        };

        let name = tokens[name_start..=name_index]
            .iter()
            .map(|t| t.value.as_str())
            .collect();
        Some(FunctionSpan {
            start,
            name_start,
            params_open,
            params_close: close,
            declarator_end,
            end,
            name,
            is_declaration,
        })
    }

    /// `(name, params_open, declarator_end)` for a declarator group such as
    /// `(*get_handler(int id))(void)` opened at `open`
    fn pointer_returning(&self, open: usize, end: usize) -> Option<(usize, usize, usize)> {
        let tokens = self.tokens;
        let group_close = matching_close(tokens, open).filter(|&c| c <= end)?;
        let name_index = (open + 2..group_close)
            .find(|&i| tokens[i].is_identifier() && tokens[i + 1].is_punct("("))?;

        let mut declarator_end = group_close;
        while tokens
            .get(declarator_end + 1)
            .is_some_and(|t| t.is_punct("(") || t.is_punct("["))
        {
            declarator_end = matching_close(tokens, declarator_end + 1).filter(|&c| c <= end)?;
        }
        Some((name_index, name_index + 1, declarator_end))
    }
}

/// Block depth per token. `{` carries the depth outside its block, `}` the
/// depth after closing it.
fn scope_depths(tokens: &[Token]) -> (Vec<usize>, Vec<bool>) {
    let mut depths = Vec::with_capacity(tokens.len());
    let mut transparent = vec![false; tokens.len()];
    let mut open_blocks: Vec<bool> = Vec::new();
    let mut depth = 0usize;

    for (i, token) in tokens.iter().enumerate() {
        if token.is_punct("{") {
            depths.push(depth);
            let is_transparent = opens_transparent_block(tokens, i);
            if is_transparent {
                transparent[i] = true;
            } else {
                depth += 1;
            }
            open_blocks.push(is_transparent);
        } else if token.is_punct("}") {
            match open_blocks.pop() {
                Some(true) => transparent[i] = true,
                Some(false) => depth = depth.saturating_sub(1),
                None => {}
            }
            depths.push(depth);
        } else {
            depths.push(depth);
        }
    }
    (depths, transparent)
}

/// Parenthesis depth of each token at block depth zero. Like braces, `(`
/// carries the depth outside its group and `)` the depth after closing it.
/// A file-scope `;` or a transparent brace resets the count.
fn paren_depths(tokens: &[Token], depths: &[usize], transparent: &[bool]) -> Vec<usize> {
    let mut parens = Vec::with_capacity(tokens.len());
    let mut depth = 0usize;
    for (i, token) in tokens.iter().enumerate() {
        if depths[i] != 0 {
            parens.push(depth);
            continue;
        }
        if transparent[i] || token.is_punct(";") {
            depth = 0;
            parens.push(0);
        } else if token.is_punct("(") {
            parens.push(depth);
            depth += 1;
        } else if token.is_punct(")") {
            depth = depth.saturating_sub(1);
            parens.push(depth);
        } else {
            parens.push(depth);
        }
    }
    parens
}

fn opens_transparent_block(tokens: &[Token], brace: usize) -> bool {
    let prev = |n: usize| brace.checked_sub(n).map(|i| &tokens[i]);
    match (prev(2), prev(1)) {
        (Some(a), Some(b)) if a.is_keyword("extern") && b.kind == TokenKind::String => true,
        (_, Some(b)) if b.is_keyword("namespace") => true,
        (Some(a), Some(b)) if a.is_keyword("namespace") && b.is_identifier() => true,
        _ => false,
    }
}

/// Whether the `{` at `brace` opens an aggregate body or an initializer
/// rather than a function body. An aggregate keyword only counts outside
/// parentheses, and not when a parameter list follows it.
fn opens_type_or_initializer(tokens: &[Token], start: usize, brace: usize) -> bool {
    let head = &tokens[start..brace];
    if head.iter().any(|t| t.is_punct("=")) {
        return true;
    }
    let mut depth = 0usize;
    let mut aggregate = false;
    let mut i = 0;
    while i < head.len() {
        let next = skip_attributes(head, i);
        if next != i {
            i = next;
            continue;
        }
        let t = &head[i];
        if t.is_punct("(") {
            if aggregate && depth == 0 {
                return false;
            }
            depth += 1;
        } else if t.is_punct(")") {
            depth = depth.saturating_sub(1);
        } else if depth == 0
            && t.kind == TokenKind::Keyword
            && AggregateKind::from_keyword(&t.value).is_some()
        {
            aggregate = true;
        }
        i += 1;
    }
    aggregate
}

/// Index of the bracket closing the one at `open`
pub fn matching_close(tokens: &[Token], open: usize) -> Option<usize> {
    let (open_text, close_text) = match tokens.get(open)?.value.as_str() {
        "{" => ("{", "}"),
        "(" => ("(", ")"),
        "[" => ("[", "]"),
        _ => return None,
    };
    let mut depth = 0usize;
    for (i, token) in tokens.iter().enumerate().skip(open) {
        if token.kind != TokenKind::Punctuation {
            continue;
        }
        if token.value == open_text {
            depth += 1;
        } else if token.value == close_text {
            depth -= 1;
            if depth == 0 {
                return Some(i);
            }
        }
    }
    None
}

/// Skip `__attribute__((...))` style decorations starting at `index`
pub fn skip_attributes(tokens: &[Token], mut index: usize) -> usize {
    while let Some(token) = tokens.get(index) {
        if !ATTRIBUTE_LIKE.contains(&token.value.as_str()) {
            break;
        }
        index += 1;
        while tokens.get(index).is_some_and(|t| t.is_keyword("volatile")) {
            index += 1;
        }
        if tokens.get(index).is_some_and(|t| t.is_punct("(")) {
            match matching_close(tokens, index) {
                Some(close) => index = close + 1,
                None => return tokens.len(),
            }
        }
    }
    index
}
