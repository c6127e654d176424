//! Anonymous aggregate extraction
//!
//! Struct and union bodies written inline in a field type or an alias
//! (`struct { int a; } nested;`) are lifted into named entities of their
//! own, and the type text is rewritten to refer to them. Lifted entities
//! are processed again, so nesting of any depth is flattened.

use cmodel_core::{Aggregate, FileModel};
use regex::Regex;
use std::collections::{HashMap, VecDeque};
use tracing::debug;

use crate::declarations::{parse_struct_fields, render_tokens};
use crate::diagnostics::{DiagnosticKind, Diagnostics};
use crate::structure::{matching_close, AggregateKind};
use crate::tokenizer::{filter_significant, tokenize, Token, TokenKind};

/// Lifts inline struct/union bodies into named entities
pub struct AnonymousTypedefProcessor {
    aggregate_body: Regex,
}

impl AnonymousTypedefProcessor {
    pub fn new(aggregate_body: Regex) -> Self {
        Self { aggregate_body }
    }

    /// Process every alias, struct field and union field of `file`
    pub fn process(&self, file: &mut FileModel, diagnostics: &mut Diagnostics) {
        let mut counters: HashMap<String, usize> = HashMap::new();

        let alias_names: Vec<String> = file.aliases.keys().cloned().collect();
        let mut worklist: VecDeque<(AggregateKind, String)> = VecDeque::new();
        for name in alias_names {
            let Some(original) = file.aliases.get(&name).map(|a| a.original_type.clone()) else {
                continue;
            };
            if !self.aggregate_body.is_match(&original) {
                continue;
            }
            let (rewritten, created) =
                self.extract(file, &name, &original, None, &mut counters, diagnostics);
            if let Some(alias) = file.aliases.get_mut(&name) {
                alias.original_type = rewritten;
            }
            worklist.extend(created);
        }

        worklist.extend(file.structs.keys().map(|k| (AggregateKind::Struct, k.clone())));
        worklist.extend(file.unions.keys().map(|k| (AggregateKind::Union, k.clone())));

        while let Some((kind, parent)) = worklist.pop_front() {
            let Some(mut fields) = aggregate_mut(file, kind, &parent).map(|a| a.fields.clone())
            else {
                continue;
            };
            let mut changed = false;
            for field in &mut fields {
                if !self.aggregate_body.is_match(&field.type_name) {
                    continue;
                }
                let field_name = Some(field.name.as_str()).filter(|n| !n.is_empty());
                let (rewritten, created) = self.extract(
                    file,
                    &parent,
                    &field.type_name,
                    field_name,
                    &mut counters,
                    diagnostics,
                );
                if field.name.is_empty() {
                    if let Some((_, first)) = created.first() {
                        field.name = first.clone();
                    }
                }
                field.type_name = rewritten;
                changed = true;
                worklist.extend(created);
            }
            if changed {
                if let Some(aggregate) = aggregate_mut(file, kind, &parent) {
                    aggregate.fields = fields;
                }
            }
        }
    }

    /// Lift every aggregate body out of `type_text`, returning the rewritten
    /// text and the entities created.
    fn extract(
        &self,
        file: &mut FileModel,
        parent: &str,
        type_text: &str,
        field_name: Option<&str>,
        counters: &mut HashMap<String, usize>,
        diagnostics: &mut Diagnostics,
    ) -> (String, Vec<(AggregateKind, String)>) {
        let mut tokens = filter_significant(&tokenize(type_text));
        let mut created = Vec::new();

        while let Some((start, kind, tag, open)) = find_body(&tokens) {
            let Some(close) = matching_close(&tokens, open) else {
                diagnostics.report(
                    DiagnosticKind::UnbalancedSpan,
                    0,
                    format!("unbalanced body in type of {}: {}", parent, type_text),
                );
                break;
            };

            let mut replacement = Vec::new();
            let name = match tag {
                Some(tag) => {
                    replacement.push(Token::new(TokenKind::Keyword, kind.keyword(), 0, 0));
                    tag
                }
                None => {
                    let base = match field_name.filter(|_| created.is_empty()) {
                        Some(field) => format!("{}_{}", parent, field),
                        None => {
                            let n = counters.entry(parent.to_string()).or_insert(0);
                            *n += 1;
                            format!("{}_anonymous_{}_{}", parent, kind.keyword(), n)
                        }
                    };
                    unique_name(file, &base)
                }
            };
            replacement.push(Token::new(TokenKind::Identifier, name.as_str(), 0, 0));

            if !file.has_type_name(&name) {
                let fields = parse_struct_fields(&tokens[open + 1..close], diagnostics);
                let aggregate = Aggregate::new(name.as_str(), fields);
                match kind {
                    AggregateKind::Union => file.unions.insert(name.clone(), aggregate),
                    _ => file.structs.insert(name.clone(), aggregate),
                };
                file.add_anonymous_relationship(parent, &name);
                debug!("Extracted {} {} from {}", kind.keyword(), name, parent);
                created.push((kind, name));
            }

            tokens.splice(start..=close, replacement);
        }

        (render_tokens(&tokens), created)
    }
}

/// `(keyword index, kind, tag, brace index)` of the first aggregate body
fn find_body(tokens: &[Token]) -> Option<(usize, AggregateKind, Option<String>, usize)> {
    tokens.iter().enumerate().find_map(|(i, t)| {
        if t.kind != TokenKind::Keyword {
            return None;
        }
        let kind = AggregateKind::from_keyword(&t.value).filter(|k| *k != AggregateKind::Enum)?;
        match tokens.get(i + 1) {
            Some(n) if n.is_punct("{") => Some((i, kind, None, i + 1)),
            Some(n) if n.is_identifier() && tokens.get(i + 2).is_some_and(|b| b.is_punct("{")) => {
                Some((i, kind, Some(n.value.clone()), i + 2))
            }
            _ => None,
        }
    })
}

fn aggregate_mut<'f>(
    file: &'f mut FileModel,
    kind: AggregateKind,
    name: &str,
) -> Option<&'f mut Aggregate> {
    match kind {
        AggregateKind::Union => file.unions.get_mut(name),
        _ => file.structs.get_mut(name),
    }
}

/// `base`, or `base_2`, `base_3`, ... if already taken in `file`
pub fn unique_name(file: &FileModel, base: &str) -> String {
    if !file.has_type_name(base) {
        return base.to_string();
    }
    (2..)
        .map(|n| format!("{}_{}", base, n))
        .find(|candidate| !file.has_type_name(candidate))
        .unwrap_or_else(|| base.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Patterns;
    use cmodel_core::{Alias, Field};
    use pretty_assertions::assert_eq;

    fn processor() -> AnonymousTypedefProcessor {
        AnonymousTypedefProcessor::new(Patterns::compile().aggregate_body)
    }

    fn field(name: &str, type_name: &str) -> Field {
        Field::new(name, type_name)
    }

    #[test]
    fn test_named_field_body() {
        let mut file = FileModel::new("a.c", "utf-8");
        file.structs.insert(
            "S".into(),
            Aggregate::new("S", vec![field("nested", "struct { int a; }")]),
        );

        processor().process(&mut file, &mut Diagnostics::new());

        assert_eq!(file.structs["S"].fields[0].type_name, "S_nested");
        assert_eq!(file.structs["S_nested"].fields, vec![field("a", "int")]);
        assert_eq!(file.anonymous_relationships["S"], vec!["S_nested".to_string()]);
        assert!(file.validate().is_ok());
    }

    #[test]
    fn test_unnamed_member_and_recursion() {
        let mut file = FileModel::new("a.c", "utf-8");
        file.structs.insert(
            "Packet".into(),
            Aggregate::new(
                "Packet",
                vec![field("", "union { int raw; struct { short lo; short hi; } parts; }")],
            ),
        );

        processor().process(&mut file, &mut Diagnostics::new());

        let union_name = "Packet_anonymous_union_1";
        assert_eq!(file.structs["Packet"].fields[0].name, union_name);
        assert_eq!(file.structs["Packet"].fields[0].type_name, union_name);
        let inner = &file.unions[union_name];
        assert_eq!(inner.fields[1].type_name, format!("{}_parts", union_name));
        assert!(file
            .structs
            .contains_key(&format!("{}_parts", union_name)));
        assert_eq!(
            file.anonymous_relationships[union_name],
            vec![format!("{}_parts", union_name)]
        );
    }

    #[test]
    fn test_alias_bodies_use_counter() {
        let mut file = FileModel::new("a.c", "utf-8");
        file.aliases.insert(
            "handler_t".into(),
            Alias {
                name: "handler_t".into(),
                original_type: "void (*)(struct { int id; } *, struct { int len; } *)".into(),
            },
        );

        processor().process(&mut file, &mut Diagnostics::new());

        assert_eq!(
            file.aliases["handler_t"].original_type,
            "void (*)(handler_t_anonymous_struct_1 *, handler_t_anonymous_struct_2 *)"
        );
        assert_eq!(file.anonymous_relationships["handler_t"].len(), 2);
    }

    #[test]
    fn test_name_collision_gets_suffix() {
        let mut file = FileModel::new("a.c", "utf-8");
        file.structs.insert("S_inner".into(), Aggregate::new("S_inner", vec![]));
        file.structs.insert(
            "S".into(),
            Aggregate::new("S", vec![field("inner", "struct { char c; }")]),
        );

        processor().process(&mut file, &mut Diagnostics::new());

        assert_eq!(file.structs["S"].fields[0].type_name, "S_inner_2");
        assert!(file.structs.contains_key("S_inner_2"));
    }
}
