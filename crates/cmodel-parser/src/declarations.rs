//! Declaration parsers
//!
//! Turn token spans found by [`crate::structure`] into model records.
//! Declarations are split into a base type and a list of declarators:
//!
//! ```text
//! static const char *name[4] = { 0 }, c;
//! ^^^^^^ ^^^^^^^^^^ ^^^^^^^^^^^^^^^^^^  ^
//! storage   base       declarator       declarator
//! ```

use cmodel_core::{Alias, EnumValue, Field, Function, Struct};
use indexmap::IndexMap;
use tracing::debug;

use thiserror::Error;

use crate::diagnostics::{DiagnosticKind, Diagnostics};
use crate::structure::{matching_close, skip_attributes, AggregateKind, FunctionSpan};
use crate::tokenizer::{Token, TokenKind};

/// Storage and inline specifiers dropped from type text
const STORAGE_SPECIFIERS: &[&str] = &[
    "static",
    "extern",
    "register",
    "inline",
    "__inline",
    "__inline__",
    "__forceinline",
    "_Thread_local",
    "__thread",
    "thread_local",
    "mutable",
    "constexpr",
    "_Noreturn",
    "virtual",
    "explicit",
];

/// Why a declaration could not be split into type and declarators
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeclError {
    #[error("empty declaration")]
    Empty,

    #[error("unbalanced {0}")]
    Unbalanced(&'static str),

    #[error("no declarator name")]
    NoName,

    #[error("no base type")]
    NoBaseType,

    #[error("function pointer without a type")]
    UntypedFunctionPointer,

    #[error("function pointer without a name")]
    UnnamedFunctionPointer,

    #[error("unexpected tokens before '{0}'")]
    UnexpectedTokens(String),

    #[error("typedef without a name")]
    UnnamedTypedef,

    #[error("declaration without a name")]
    NoDeclarators,
}

const QUALIFIERS: &[&str] = &["const", "volatile", "restrict", "__restrict", "_Atomic"];

fn is_qualifier(token: &Token) -> bool {
    QUALIFIERS.contains(&token.value.as_str())
}

fn is_pointer_token(token: &Token) -> bool {
    token.kind == TokenKind::Punctuation && matches!(token.value.as_str(), "*" | "&" | "&&")
}

/// Join tokens into readable source text: `char *`, `int[10]`,
/// `void (*)(int)`, `struct { int a; }`.
pub fn render_tokens(tokens: &[Token]) -> String {
    let mut out = String::new();
    for (i, token) in tokens.iter().enumerate() {
        if i > 0 && needs_space(tokens, i) {
            out.push(' ');
        }
        out.push_str(&token.value);
    }
    out
}

fn needs_space(tokens: &[Token], i: usize) -> bool {
    let prev = &tokens[i - 1];
    let cur = &tokens[i];
    let p = prev.value.as_str();
    let c = cur.value.as_str();
    let prev_punct = prev.kind == TokenKind::Punctuation;
    let cur_punct = cur.kind == TokenKind::Punctuation;

    if prev_punct && matches!(p, "(" | "[" | "." | "->" | "::" | "~" | "!") {
        return false;
    }
    if cur_punct && matches!(c, ")" | "]" | "," | ";" | "[" | "." | "->" | "::") {
        return false;
    }
    if cur_punct && c == "(" {
        let pointer_follows = tokens
            .get(i + 1)
            .is_some_and(|n| n.is_punct("*") || n.is_punct("^"));
        return pointer_follows || !(prev.is_identifier() || prev.is_punct(")"));
    }
    if prev_punct && p == "*" {
        return !(cur.is_identifier() || cur.is_punct("*"));
    }
    if prev_punct && matches!(p, "-" | "+" | "&") {
        // No space after a unary operator
        let unary = i < 2 || {
            let before = &tokens[i - 2];
            before.kind == TokenKind::Punctuation && !matches!(before.value.as_str(), ")" | "]")
        };
        return !unary;
    }
    true
}

/// Nesting depth tracker over `()`, `[]` and `{}`
fn nesting_delta(token: &Token) -> isize {
    if token.kind != TokenKind::Punctuation {
        return 0;
    }
    match token.value.as_str() {
        "(" | "[" | "{" => 1,
        ")" | "]" | "}" => -1,
        _ => 0,
    }
}

/// Position of the first top-level token matching `pred`
fn top_level_position(tokens: &[Token], pred: impl Fn(&Token) -> bool) -> Option<usize> {
    let mut depth = 0isize;
    for (i, token) in tokens.iter().enumerate() {
        if depth == 0 && pred(token) {
            return Some(i);
        }
        depth += nesting_delta(token);
    }
    None
}

/// Split at top-level `separator` punctuation
pub fn split_top_level<'t>(tokens: &'t [Token], separator: &str) -> Vec<&'t [Token]> {
    let mut parts = Vec::new();
    let mut depth = 0isize;
    let mut start = 0;
    for (i, token) in tokens.iter().enumerate() {
        if depth == 0 && token.is_punct(separator) {
            parts.push(&tokens[start..i]);
            start = i + 1;
        }
        depth += nesting_delta(token);
    }
    parts.push(&tokens[start..]);
    parts
}

/// Index of the `[` matching the `]` at `close`
fn matching_open_bracket(tokens: &[Token], close: usize) -> Option<usize> {
    let mut depth = 0usize;
    for i in (0..=close).rev() {
        if tokens[i].is_punct("]") {
            depth += 1;
        } else if tokens[i].is_punct("[") {
            depth -= 1;
            if depth == 0 {
                return Some(i);
            }
        }
    }
    None
}

/// Drop directive tokens and attribute decorations
fn clean(tokens: &[Token]) -> Vec<Token> {
    let mut out = Vec::with_capacity(tokens.len());
    let mut i = 0;
    while i < tokens.len() {
        let next = skip_attributes(tokens, i);
        if next != i {
            i = next;
            continue;
        }
        if tokens[i].kind != TokenKind::Preprocessor {
            out.push(tokens[i].clone());
        }
        i += 1;
    }
    out
}

/// One declarator of a declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declarator {
    pub name: String,
    /// `*`, `&` and qualifiers between the base type and the name
    pointer: Vec<Token>,
    /// Contents of each `[...]` suffix
    arrays: Vec<Vec<Token>>,
    /// Function pointer signature with the name removed, e.g. `(*)(int)`
    function_suffix: Option<Vec<Token>>,
    bit_width: Option<Vec<Token>>,
    value: Option<Vec<Token>>,
}

impl Declarator {
    /// A bare name: no pointer, array or function suffix
    pub fn is_plain(&self) -> bool {
        self.pointer.is_empty()
            && self.arrays.is_empty()
            && self.function_suffix.is_none()
            && self.bit_width.is_none()
    }

    /// Full type text given the rendered base type
    pub fn type_text(&self, base: &str) -> String {
        let mut text = base.to_string();
        if let Some(suffix) = &self.function_suffix {
            if !self.pointer.is_empty() {
                text.push(' ');
                text.push_str(&render_tokens(&self.pointer));
            }
            text.push(' ');
            text.push_str(&render_tokens(suffix));
            return text;
        }
        if !self.pointer.is_empty() {
            text.push(' ');
            text.push_str(&render_tokens(&self.pointer));
        }
        for dim in &self.arrays {
            text.push('[');
            text.push_str(&render_tokens(dim));
            text.push(']');
        }
        if let Some(width) = &self.bit_width {
            text.push_str(" : ");
            text.push_str(&render_tokens(width));
        }
        text
    }

    pub fn to_field(&self, base: &str, is_static: bool) -> Field {
        Field {
            name: self.name.clone(),
            type_name: self.type_text(base),
            is_pointer: self.function_suffix.is_some()
                || self.pointer.iter().any(|t| t.is_punct("*")),
            is_array: !self.arrays.is_empty(),
            array_size: self
                .arrays
                .first()
                .filter(|dim| !dim.is_empty())
                .map(|dim| render_tokens(dim)),
            value: self.value.as_deref().map(render_tokens),
            is_static,
        }
    }
}

/// A declaration split into base type and declarators
#[derive(Debug, Clone)]
pub struct Declaration {
    /// Base type tokens, storage specifiers removed
    pub base: Vec<Token>,
    pub is_static: bool,
    pub declarators: Vec<Declarator>,
}

impl Declaration {
    /// The aggregate body in the base type, if the declaration defines one
    pub fn body_range(&self) -> Option<(usize, usize)> {
        let open = top_level_position(&self.base, |t| t.is_punct("{"))?;
        let close = matching_close(&self.base, open)?;
        Some((open, close))
    }

    pub fn base_text(&self) -> String {
        render_tokens(&self.base)
    }

    /// Fields for each declarator, with `base` replacing the base type text
    pub fn fields(&self, base: &str) -> Vec<Field> {
        self.declarators
            .iter()
            .map(|d| d.to_field(base, self.is_static))
            .collect()
    }
}

/// Split a declaration (without the trailing `;`) into its parts
pub fn parse_declaration(tokens: &[Token]) -> Result<Declaration, DeclError> {
    let mut is_static = false;
    let tokens: Vec<Token> = clean(tokens)
        .into_iter()
        .filter(|t| {
            if t.kind != TokenKind::Keyword && t.kind != TokenKind::Identifier {
                return true;
            }
            if t.value == "static" {
                is_static = true;
            }
            !STORAGE_SPECIFIERS.contains(&t.value.as_str())
        })
        .collect();
    if tokens.is_empty() {
        return Err(DeclError::Empty);
    }

    let chunks = split_top_level(&tokens, ",");
    let (base, first) = split_base_declarator(chunks[0])?;
    let mut declarators = Vec::with_capacity(chunks.len());
    if !first.is_empty() {
        declarators.push(parse_declarator(first)?);
    }
    for chunk in &chunks[1..] {
        declarators.push(parse_declarator(chunk)?);
    }

    Ok(Declaration {
        base: base.to_vec(),
        is_static,
        declarators,
    })
}

/// Find where the base type ends in the first declaration chunk
fn split_base_declarator(chunk: &[Token]) -> Result<(&[Token], &[Token]), DeclError> {
    let init = top_level_position(chunk, |t| t.is_punct("=")).unwrap_or(chunk.len());

    // Aggregate body in the base type
    if let Some(open) = top_level_position(&chunk[..init], |t| t.is_punct("{")) {
        let close = matching_close(chunk, open).ok_or(DeclError::Unbalanced("body"))?;
        return Ok(chunk.split_at(close + 1));
    }

    // Function pointer declarator
    let pointer_group = (0..init).find(|&i| {
        chunk[i].is_punct("(")
            && chunk
                .get(i + 1)
                .is_some_and(|n| n.is_punct("*") || n.is_punct("^") || n.is_punct("&"))
    });
    if let Some(open) = pointer_group {
        if open == 0 {
            return Err(DeclError::UntypedFunctionPointer);
        }
        return Ok(chunk.split_at(open));
    }

    let mut end = top_level_position(&chunk[..init], |t| t.is_punct(":")).unwrap_or(init);
    while end > 0 && chunk[end - 1].is_punct("]") {
        end = matching_open_bracket(chunk, end - 1).ok_or(DeclError::Unbalanced("brackets"))?;
    }
    let name_index = end
        .checked_sub(1)
        .filter(|&i| chunk[i].is_identifier())
        .ok_or(DeclError::NoName)?;

    let mut start = name_index;
    while start > 0 && (is_pointer_token(&chunk[start - 1]) || is_qualifier(&chunk[start - 1])) {
        start -= 1;
    }
    while start < name_index && is_qualifier(&chunk[start]) {
        start += 1;
    }

    let base = &chunk[..start];
    let valid = base.iter().any(|t| !is_qualifier(t))
        && !base
            .last()
            .is_some_and(|t| AggregateKind::from_keyword(&t.value).is_some());
    if !valid {
        return Err(DeclError::NoBaseType);
    }
    Ok(chunk.split_at(start))
}

/// Parse `*name[3] = value`, `(*name)(args)` and similar
pub fn parse_declarator(tokens: &[Token]) -> Result<Declarator, DeclError> {
    let (decl, value) = match top_level_position(tokens, |t| t.is_punct("=")) {
        Some(eq) => (&tokens[..eq], Some(tokens[eq + 1..].to_vec())),
        None => (tokens, None),
    };
    let (decl, bit_width) = match top_level_position(decl, |t| t.is_punct(":")) {
        Some(colon) => (&decl[..colon], Some(decl[colon + 1..].to_vec())),
        None => (decl, None),
    };

    let group = top_level_position(decl, |t| t.is_punct("("));
    if let Some(open) = group.filter(|&o| {
        decl.get(o + 1)
            .is_some_and(|n| n.is_punct("*") || n.is_punct("^") || n.is_punct("&"))
    }) {
        let close = matching_close(decl, open).ok_or(DeclError::Unbalanced("parentheses"))?;
        let inner = &decl[open + 1..close];
        let name_pos = inner
            .iter()
            .position(Token::is_identifier)
            .ok_or(DeclError::UnnamedFunctionPointer)?;

        let mut suffix = Vec::with_capacity(decl.len() - open);
        suffix.push(decl[open].clone());
        suffix.extend(inner[..name_pos].iter().cloned());
        suffix.extend(inner[name_pos + 1..].iter().cloned());
        suffix.push(decl[close].clone());
        suffix.extend(decl[close + 1..].iter().cloned());

        return Ok(Declarator {
            name: inner[name_pos].value.clone(),
            pointer: decl[..open].to_vec(),
            arrays: array_groups(&inner[name_pos + 1..]),
            function_suffix: Some(suffix),
            bit_width,
            value,
        });
    }

    let mut end = decl.len();
    while end > 0 && decl[end - 1].is_punct("]") {
        end = matching_open_bracket(decl, end - 1).ok_or(DeclError::Unbalanced("brackets"))?;
    }
    let name_index = end
        .checked_sub(1)
        .filter(|&i| decl[i].is_identifier())
        .ok_or(DeclError::NoName)?;
    let pointer = &decl[..name_index];
    if !pointer.iter().all(|t| is_pointer_token(t) || is_qualifier(t)) {
        return Err(DeclError::UnexpectedTokens(decl[name_index].value.clone()));
    }

    Ok(Declarator {
        name: decl[name_index].value.clone(),
        pointer: pointer.to_vec(),
        arrays: array_groups(&decl[end..]),
        function_suffix: None,
        bit_width,
        value,
    })
}

/// Contents of consecutive `[...]` groups
fn array_groups(tokens: &[Token]) -> Vec<Vec<Token>> {
    let mut groups = Vec::new();
    let mut i = 0;
    while i < tokens.len() && tokens[i].is_punct("[") {
        let Some(close) = matching_close(tokens, i) else {
            break;
        };
        groups.push(tokens[i + 1..close].to_vec());
        i = close + 1;
    }
    groups
}

/// Fields of a struct or union body (the tokens between the braces).
/// Nested aggregate bodies are kept as type text for the anonymous
/// processor; unnamed members get an empty name.
pub fn parse_struct_fields(body: &[Token], diagnostics: &mut Diagnostics) -> Vec<Field> {
    let mut fields = Vec::new();
    for statement in split_top_level(body, ";") {
        let mut statement = clean(statement);
        if statement.len() >= 2
            && (statement[0].is_keyword("public")
                || statement[0].is_keyword("private")
                || statement[0].is_keyword("protected"))
            && statement[1].is_punct(":")
        {
            statement.drain(..2);
        }
        if statement.is_empty()
            || statement[0].is_keyword("static_assert")
            || statement[0].is_keyword("_Static_assert")
            || statement[0].is_keyword("using")
            || statement[0].is_keyword("friend")
        {
            continue;
        }

        match parse_declaration(&statement) {
            Ok(decl) => {
                let base = decl.base_text();
                if decl.declarators.is_empty() {
                    if decl.body_range().is_some() {
                        fields.push(Field {
                            name: String::new(),
                            type_name: base,
                            is_pointer: false,
                            is_array: false,
                            array_size: None,
                            value: None,
                            is_static: decl.is_static,
                        });
                    }
                    continue;
                }
                fields.extend(decl.fields(&base));
            }
            Err(reason) => diagnostics.report(
                DiagnosticKind::AmbiguousDeclaration,
                statement[0].line,
                format!("skipped member '{}': {}", render_tokens(&statement), reason),
            ),
        }
    }
    fields
}

/// Enumerators of an enum body
pub fn parse_enum_values(body: &[Token]) -> Vec<EnumValue> {
    split_top_level(body, ",")
        .into_iter()
        .filter_map(|item| {
            let item = clean(item);
            let name = item.first().filter(|t| t.is_identifier())?;
            let value = item
                .iter()
                .position(|t| t.is_punct("="))
                .map(|eq| render_tokens(&item[eq + 1..]));
            Some(EnumValue::new(name.value.clone(), value))
        })
        .collect()
}

/// Build a function from a span found by the structure finder
pub fn parse_function(tokens: &[Token], span: &FunctionSpan) -> Function {
    let mut is_static = false;
    // `int (*get(int id))(void)` returns `int (*)(void)`
    let mut head = tokens[span.start..span.name_start].to_vec();
    head.extend_from_slice(&tokens[span.params_close + 1..=span.declarator_end]);
    let return_tokens: Vec<Token> = clean(&head)
        .into_iter()
        .filter(|t| {
            if t.is_keyword("static") {
                is_static = true;
            }
            !STORAGE_SPECIFIERS.contains(&t.value.as_str())
        })
        .collect();

    let params = &tokens[span.params_open + 1..span.params_close];
    let chunks = split_top_level(params, ",");
    let parameters = if chunks.len() == 1 && is_void_list(chunks[0]) {
        Vec::new()
    } else {
        chunks.into_iter().filter_map(parse_parameter).collect()
    };

    debug!("Found function: {}", span.name);
    Function {
        name: span.name.clone(),
        return_type: render_tokens(&return_tokens),
        parameters,
        is_static,
        is_declaration: span.is_declaration,
    }
}

fn is_void_list(tokens: &[Token]) -> bool {
    tokens.is_empty() || (tokens.len() == 1 && tokens[0].is_keyword("void"))
}

/// One parameter; `None` for an empty slot
pub fn parse_parameter(tokens: &[Token]) -> Option<Field> {
    let tokens: Vec<Token> = clean(tokens)
        .into_iter()
        .filter(|t| !t.is_keyword("register"))
        .collect();
    if tokens.is_empty() {
        return None;
    }
    if tokens.len() == 1 && tokens[0].is_punct("...") {
        return Some(Field::new("...", "..."));
    }

    let named = split_base_declarator(&tokens).and_then(|(base, decl)| {
        let declarator = parse_declarator(decl)?;
        Ok(declarator.to_field(&render_tokens(base), false))
    });
    Some(named.unwrap_or_else(|_| Field::new("unnamed", render_tokens(&tokens))))
}

/// What a `typedef` statement declares
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypedefDecl {
    /// `typedef struct Tag Name;` or the plain name after a body: names an
    /// aggregate rather than introducing an alias
    Aggregate {
        kind: AggregateKind,
        tag: Option<String>,
        name: String,
    },
    Alias(Alias),
}

/// Parse a `typedef` statement. `body_name` replaces the text of an
/// aggregate body in alias types, e.g. `Foo *` for `typedef struct {...} *FooPtr`.
pub fn parse_typedef(
    tokens: &[Token],
    body_name: Option<&str>,
) -> Result<Vec<TypedefDecl>, DeclError> {
    let tokens = match tokens.first() {
        Some(t) if t.is_keyword("typedef") => &tokens[1..],
        _ => tokens,
    };
    let tokens = match tokens.last() {
        Some(t) if t.is_punct(";") => &tokens[..tokens.len() - 1],
        _ => tokens,
    };

    let decl = parse_declaration(tokens)?;
    if decl.declarators.is_empty() {
        return Err(DeclError::UnnamedTypedef);
    }

    let aggregate = aggregate_head(&decl.base);
    let base = match (decl.body_range(), body_name) {
        (Some(_), Some(name)) => name.to_string(),
        _ => decl.base_text(),
    };

    Ok(decl
        .declarators
        .iter()
        .map(|d| match &aggregate {
            Some((kind, tag)) if d.is_plain() => TypedefDecl::Aggregate {
                kind: *kind,
                tag: tag.clone(),
                name: d.name.clone(),
            },
            _ => TypedefDecl::Alias(Alias {
                name: d.name.clone(),
                original_type: d.type_text(&base),
            }),
        })
        .collect())
}

/// `struct Tag`, `struct Tag { ... }` or `struct { ... }` as a base type
fn aggregate_head(base: &[Token]) -> Option<(AggregateKind, Option<String>)> {
    let mut i = 0;
    while base.get(i).is_some_and(is_qualifier) {
        i += 1;
    }
    let kind = AggregateKind::from_keyword(&base.get(i)?.value)?;
    let tag = base
        .get(i + 1)
        .filter(|t| t.is_identifier())
        .map(|t| t.value.clone());
    let rest = i + 1 + tag.is_some() as usize;
    let tail_ok = match base.get(rest) {
        None => tag.is_some(),
        Some(t) => t.is_punct("{") && matching_close(base, rest) == Some(base.len() - 1),
    };
    tail_ok.then_some((kind, tag))
}

/// Fields declared by a file-scope statement. `base_override` replaces the
/// base type text, used when the statement defines an aggregate inline.
pub fn parse_global_field(
    tokens: &[Token],
    base_override: Option<&str>,
) -> Result<Vec<Field>, DeclError> {
    let tokens = match tokens.last() {
        Some(t) if t.is_punct(";") => &tokens[..tokens.len() - 1],
        _ => tokens,
    };
    let decl = parse_declaration(tokens)?;
    if decl.declarators.is_empty() {
        return Err(DeclError::NoDeclarators);
    }
    let base = base_override.map_or_else(|| decl.base_text(), str::to_string);
    Ok(decl.fields(&base))
}

/// Move each function into the struct whose name is the longest
/// case-insensitive prefix of the function name. Returns the functions no
/// struct claimed, in order.
pub fn associate_functions(
    structs: &mut IndexMap<String, Struct>,
    functions: Vec<Function>,
) -> Vec<Function> {
    let prefixes: Vec<String> = structs.keys().map(|k| k.to_lowercase()).collect();
    let mut remaining = Vec::new();

    for function in functions {
        let lower = function.name.to_lowercase();
        let mut best: Option<usize> = None;
        for (i, prefix) in prefixes.iter().enumerate() {
            if prefix.is_empty() || !lower.starts_with(prefix.as_str()) {
                continue;
            }
            if best.map_or(true, |b| prefix.len() > prefixes[b].len()) {
                best = Some(i);
            }
        }
        match best.and_then(|i| structs.get_index_mut(i)) {
            Some((name, s)) => {
                debug!("Associated {} with struct {}", function.name, name);
                s.functions.push(function);
            }
            None => remaining.push(function),
        }
    }
    remaining
}
