//! Per-file parsing pipeline
//!
//! [`CParser`] runs tokenizer, conditional filtering, structure finding,
//! declaration parsing and anonymous extraction over one file at a time.
//! Every call starts from fresh per-file state; only the content cache
//! survives between calls.

use cmodel_core::{Aggregate, Alias, Config, Enum, Error, FileModel, Function, Result};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::anonymous::{unique_name, AnonymousTypedefProcessor};
use crate::cache::{hash_content, CacheStats, ParserCache, Patterns};
use crate::declarations::{
    associate_functions, parse_enum_values, parse_function, parse_global_field,
    parse_struct_fields, parse_typedef, render_tokens, DeclError, TypedefDecl,
};
use crate::diagnostics::{Diagnostic, DiagnosticKind, Diagnostics};
use crate::preprocessor::{MacroTable, PreprocessorEvaluator};
use crate::structure::{skip_attributes, AggregateKind, Statement, StructureFinder, TypeSpan};
use crate::tokenizer::{filter_significant, Token, TokenKind, Tokenizer};

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];
pub(crate) const DEFAULT_CACHE_CAPACITY: usize = 100;

/// Single-file C/C++ parser. Not meant to be shared between threads; give
/// each worker its own instance over a shared evaluator.
pub struct CParser {
    evaluator: Arc<PreprocessorEvaluator>,
    cache: ParserCache,
    anonymous: AnonymousTypedefProcessor,
    diagnostics: Vec<Diagnostic>,
}

impl CParser {
    pub fn new() -> Self {
        Self::with_evaluator(Arc::new(PreprocessorEvaluator::new()))
    }

    /// Parser over a frozen macro table
    pub fn with_evaluator(evaluator: Arc<PreprocessorEvaluator>) -> Self {
        Self::with_cache_capacity(evaluator, DEFAULT_CACHE_CAPACITY)
    }

    pub fn with_cache_capacity(evaluator: Arc<PreprocessorEvaluator>, capacity: usize) -> Self {
        let cache = ParserCache::new(capacity);
        let anonymous = AnonymousTypedefProcessor::new(cache.patterns().aggregate_body.clone());
        Self {
            evaluator,
            cache,
            anonymous,
            diagnostics: Vec::new(),
        }
    }

    /// Parser configured with the config's macro table and cache capacity
    pub fn from_config(config: &Config) -> Self {
        let evaluator = PreprocessorEvaluator::with_macros(MacroTable::from(&config.defines));
        Self::with_cache_capacity(Arc::new(evaluator), config.cache_capacity)
    }

    pub fn evaluator(&self) -> &Arc<PreprocessorEvaluator> {
        &self.evaluator
    }

    /// Diagnostics of the most recent parse
    pub fn last_diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Drop every cached model; hit and miss counts are kept
    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    /// Read, decode and parse one file
    pub fn parse_file(&mut self, path: &Path) -> Result<FileModel> {
        let bytes = fs::read(path).map_err(|e| Error::FileRead {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let (source, encoding) = decode(&bytes);
        let key = path.to_string_lossy().replace('\\', "/");
        let hash = hash_content(&source);

        if let Some(model) = self.cache.get(&key, hash) {
            debug!("Cache hit: {}", key);
            self.diagnostics.clear();
            return Ok(model);
        }

        let (mut model, diagnostics) = self.parse_source_with_diagnostics(&source, &key);
        model.encoding_used = encoding.to_string();
        if !diagnostics.is_empty() {
            debug!("{}: {} diagnostics", key, diagnostics.len());
        }
        self.cache.insert(&key, hash, model.clone());
        Ok(model)
    }

    /// Parse source text already in memory
    pub fn parse_source(&mut self, source: &str, path: &str) -> FileModel {
        self.parse_source_with_diagnostics(source, path).0
    }

    /// Parse source text, also returning the problems recovered from
    pub fn parse_source_with_diagnostics(
        &mut self,
        source: &str,
        path: &str,
    ) -> (FileModel, Vec<Diagnostic>) {
        let (raw, mut diagnostics) = Tokenizer::new(source).run();
        let active = self
            .evaluator
            .filter_tokens_with_diagnostics(&raw, &mut diagnostics);
        let tokens = filter_significant(&active);

        let mut file = FileModel::new(path, "utf-8");
        collect_directives(&tokens, self.cache.patterns(), &mut file);

        let mut finder = StructureFinder::new(&tokens);
        diagnostics.extend(finder.take_diagnostics());

        let mut assembler = Assembler {
            tokens: &tokens,
            finder: &finder,
            file,
            diagnostics,
            functions: Vec::new(),
            forward_typedefs: Vec::new(),
            anonymous_count: 0,
        };
        for statement in finder.statements() {
            assembler.statement(statement);
        }
        let (mut file, mut diagnostics) = assembler.finish();

        self.anonymous.process(&mut file, &mut diagnostics);
        if let Err(e) = file.validate() {
            warn!("{}", e);
        }

        debug!(
            "Parsed {}: {} structs, {} unions, {} enums, {} functions, {} globals",
            path,
            file.structs.len(),
            file.unions.len(),
            file.enums.len(),
            file.functions.len(),
            file.globals.len()
        );
        self.diagnostics = diagnostics.into_vec();
        (file, self.diagnostics.clone())
    }
}

impl Default for CParser {
    fn default() -> Self {
        Self::new()
    }
}

/// UTF-8 (BOM stripped), else ISO-8859-1 which maps every byte
fn decode(bytes: &[u8]) -> (String, &'static str) {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(text) => (text.to_string(), "utf-8"),
        Err(_) => (bytes.iter().map(|&b| b as char).collect(), "iso-8859-1"),
    }
}

/// Record `#include` targets and `#define` signatures of active directives
fn collect_directives(tokens: &[Token], patterns: &Patterns, file: &mut FileModel) {
    for (name, rest) in tokens.iter().filter_map(Token::directive) {
        match name {
            "include" => {
                if let Some(target) = patterns.include_target(rest) {
                    file.includes.insert(target.to_string());
                }
            }
            "define" => {
                if let Some(signature) = patterns.macro_signature(rest) {
                    file.macros.push(signature);
                }
            }
            _ => {}
        }
    }
}

/// Statements that declare nothing the model records
fn is_skipped(statement: &[Token]) -> bool {
    let first = &statement[0];
    if ["class", "template", "using", "namespace", "friend", "static_assert", "_Static_assert"]
        .iter()
        .any(|kw| first.is_keyword(kw))
    {
        return true;
    }
    // Forward declaration: `struct Foo;`
    statement.len() == 3
        && AggregateKind::from_keyword(&first.value).is_some()
        && statement[1].is_identifier()
        && statement[2].is_punct(";")
}

/// `typedef <kind> <tag> <name>;` awaiting its definition
struct ForwardTypedef {
    kind: AggregateKind,
    tag: String,
    name: String,
    line: usize,
}

/// Whether the tokens after an inline body name anything besides attributes
fn has_declarator(tail: &[Token]) -> bool {
    let mut i = 0;
    while i < tail.len() {
        let next = skip_attributes(tail, i);
        if next != i {
            i = next;
            continue;
        }
        if tail[i].is_identifier() {
            return true;
        }
        i += 1;
    }
    false
}

/// Mutable state of one file's assembly
struct Assembler<'a> {
    tokens: &'a [Token],
    finder: &'a StructureFinder<'a>,
    file: FileModel,
    diagnostics: Diagnostics,
    functions: Vec<Function>,
    /// `typedef struct Tag Name;` seen before or without the definition
    forward_typedefs: Vec<ForwardTypedef>,
    anonymous_count: usize,
}

impl<'a> Assembler<'a> {
    fn statement(&mut self, statement: Statement) {
        let tokens = self.tokens;
        let slice = &tokens[statement.start..=statement.end];
        if slice.len() == 1 && slice[0].is_punct(";") {
            return;
        }

        if let Some(span) = self.finder.function_in(&statement) {
            self.functions.push(parse_function(tokens, &span));
            return;
        }
        if let Some(span) = self.finder.type_span_in(&statement).cloned() {
            self.type_definition(statement, &span);
            return;
        }
        if slice[0].is_keyword("typedef") {
            self.typedef(slice);
            return;
        }
        if is_skipped(slice) {
            return;
        }

        match parse_global_field(slice, None) {
            Ok(fields) => {
                for field in &fields {
                    debug!("Found global: {} {}", field.type_name, field.name);
                }
                self.file.globals.extend(fields);
            }
            Err(reason) => self.ambiguous(slice, &reason),
        }
    }

    /// A statement containing a `struct`/`union`/`enum` body
    fn type_definition(&mut self, statement: Statement, span: &TypeSpan) {
        let tokens = self.tokens;
        let slice = &tokens[statement.start..=statement.end];
        let is_typedef = slice[0].is_keyword("typedef");
        let line = slice[0].line;

        let typedefs = if is_typedef {
            match parse_typedef(slice, None) {
                Ok(decls) => decls,
                Err(reason) => {
                    self.ambiguous(slice, &reason);
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };
        let first_plain = typedefs.iter().find_map(|d| match d {
            TypedefDecl::Aggregate { name, .. } => Some(name.clone()),
            TypedefDecl::Alias(_) => None,
        });

        let name = match (&span.tag, first_plain) {
            (Some(tag), _) => tag.clone(),
            (None, Some(name)) => name,
            (None, None) => {
                self.anonymous_count += 1;
                let base = format!("anonymous_{}_{}", span.kind.keyword(), self.anonymous_count);
                unique_name(&self.file, &base)
            }
        };
        if self.tag_taken(&name) {
            self.diagnostics.report(
                DiagnosticKind::AmbiguousDeclaration,
                tokens[span.start].line,
                format!("{} {} is defined more than once", span.kind.keyword(), name),
            );
            return;
        }

        let body = &tokens[span.body_start + 1..span.end];
        match span.kind {
            AggregateKind::Enum => {
                let values = parse_enum_values(body);
                debug!("Found enum: {} ({} values)", name, values.len());
                self.file.enums.insert(
                    name.clone(),
                    Enum {
                        name: name.clone(),
                        values,
                        typedef_name: None,
                    },
                );
            }
            kind => {
                let fields = parse_struct_fields(body, &mut self.diagnostics);
                debug!("Found {}: {} ({} fields)", kind.keyword(), name, fields.len());
                let aggregate = Aggregate::new(name.as_str(), fields);
                match kind {
                    AggregateKind::Union => self.file.unions.insert(name.clone(), aggregate),
                    _ => self.file.structs.insert(name.clone(), aggregate),
                };
            }
        }

        // How later declarators refer to the entity
        let reference = match &span.tag {
            Some(tag) => format!("{} {}", span.kind.keyword(), tag),
            None => name.clone(),
        };

        if is_typedef {
            let decls = parse_typedef(slice, Some(reference.as_str())).unwrap_or_default();
            for decl in decls {
                match decl {
                    TypedefDecl::Aggregate { name: alias, .. } => {
                        if !self.set_typedef_name(span.kind, &name, &alias) && alias != name {
                            let alias = Alias {
                                name: alias,
                                original_type: reference.clone(),
                            };
                            self.add_alias(alias, line);
                        }
                    }
                    TypedefDecl::Alias(alias) => self.add_alias(alias, line),
                }
            }
            return;
        }

        let tail = &tokens[span.end + 1..=statement.end];
        if has_declarator(tail) {
            match parse_global_field(slice, Some(reference.as_str())) {
                Ok(fields) => self.file.globals.extend(fields),
                Err(reason) => self.ambiguous(slice, &reason),
            }
        }
    }

    /// A `typedef` without a body
    fn typedef(&mut self, slice: &[Token]) {
        let decls = match parse_typedef(slice, None) {
            Ok(decls) => decls,
            Err(reason) => return self.ambiguous(slice, &reason),
        };
        for decl in decls {
            match decl {
                TypedefDecl::Aggregate {
                    kind,
                    tag: Some(tag),
                    name,
                } => self.forward_typedefs.push(ForwardTypedef {
                    kind,
                    tag,
                    name,
                    line: slice[0].line,
                }),
                TypedefDecl::Aggregate { tag: None, .. } => {}
                TypedefDecl::Alias(alias) => self.add_alias(alias, slice[0].line),
            }
        }
    }

    fn add_alias(&mut self, alias: Alias, line: usize) {
        if self.file.aliases.contains_key(&alias.name) {
            self.diagnostics.report(
                DiagnosticKind::AmbiguousDeclaration,
                line,
                format!("typedef {} is declared more than once", alias.name),
            );
            return;
        }
        debug!("Found typedef: {} = {}", alias.name, alias.original_type);
        self.file.aliases.insert(alias.name.clone(), alias);
    }

    /// Attach `typedef_name` if the entity has none yet
    fn set_typedef_name(&mut self, kind: AggregateKind, name: &str, typedef_name: &str) -> bool {
        let slot = match kind {
            AggregateKind::Struct => self.file.structs.get_mut(name).map(|s| &mut s.typedef_name),
            AggregateKind::Union => self.file.unions.get_mut(name).map(|u| &mut u.typedef_name),
            AggregateKind::Enum => self.file.enums.get_mut(name).map(|e| &mut e.typedef_name),
        };
        match slot {
            Some(slot) if slot.is_none() => {
                *slot = Some(typedef_name.to_string());
                true
            }
            _ => false,
        }
    }

    fn tag_taken(&self, name: &str) -> bool {
        self.file.structs.contains_key(name)
            || self.file.unions.contains_key(name)
            || self.file.enums.contains_key(name)
    }

    fn ambiguous(&mut self, slice: &[Token], reason: &DeclError) {
        let text: Vec<Token> = slice
            .iter()
            .filter(|t| t.kind != TokenKind::Preprocessor)
            .cloned()
            .collect();
        let mut text = render_tokens(&text);
        if text.len() > 80 {
            let mut cut = 80;
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            text.truncate(cut);
            text.push_str("...");
        }
        self.diagnostics.report(
            DiagnosticKind::AmbiguousDeclaration,
            slice[0].line,
            format!("dropped '{}': {}", text, reason),
        );
    }

    fn finish(mut self) -> (FileModel, Diagnostics) {
        for forward in std::mem::take(&mut self.forward_typedefs) {
            let ForwardTypedef {
                kind,
                tag,
                name,
                line,
            } = forward;
            if self.set_typedef_name(kind, &tag, &name) {
                continue;
            }
            if name == tag && self.tag_taken(&tag) {
                continue;
            }
            let alias = Alias {
                name,
                original_type: format!("{} {}", kind.keyword(), tag),
            };
            self.add_alias(alias, line);
        }

        let functions = std::mem::take(&mut self.functions);
        self.file.functions = associate_functions(&mut self.file.structs, functions);
        (self.file, self.diagnostics)
    }
}
