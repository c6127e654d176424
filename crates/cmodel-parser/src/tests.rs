//! Scenario tests for the cmodel parser
//!
//! Whole-file inputs run through [`CParser`], checking the resulting
//! models rather than individual stages.

use super::*;
use cmodel_core::{Field, FileModel, ProjectModel};
use pretty_assertions::assert_eq;
use std::sync::Arc;

fn parse(source: &str) -> FileModel {
    CParser::new().parse_source(source, "test.c")
}

fn parser_with(defines: &[(&str, &str)]) -> CParser {
    let mut evaluator = PreprocessorEvaluator::new();
    for (name, value) in defines {
        evaluator.add_define(*name, *value);
    }
    CParser::with_evaluator(Arc::new(evaluator))
}

fn global_names(file: &FileModel) -> Vec<&str> {
    file.globals.iter().map(|g| g.name.as_str()).collect()
}

/// A plain struct definition
#[test]
fn test_struct_definition() {
    let file = parse("struct Point { int x; int y; };");

    assert_eq!(file.structs.len(), 1);
    let point = &file.structs["Point"];
    assert_eq!(point.fields, vec![Field::new("x", "int"), Field::new("y", "int")]);
    assert_eq!(point.typedef_name, None);
}

/// An anonymous struct named by its typedef produces no alias
#[test]
fn test_typedef_anonymous_struct() {
    let file = parse("typedef struct { int a; } Foo;");

    let foo = &file.structs["Foo"];
    assert_eq!(foo.typedef_name.as_deref(), Some("Foo"));
    assert_eq!(foo.fields, vec![Field::new("a", "int")]);
    assert!(file.aliases.is_empty());
}

/// Conditional declarations follow the macro table, not source defines
#[test]
fn test_conditional_global() {
    let source = "#define A 1\n#if A\nint enabled_var;\n#endif\n";

    let enabled = parser_with(&[("A", "1")]).parse_source(source, "cond.c");
    assert_eq!(global_names(&enabled), vec!["enabled_var"]);
    assert_eq!(enabled.macros, vec!["A".to_string()]);

    let disabled = CParser::new().parse_source(source, "cond.c");
    assert!(disabled.globals.is_empty());
}

/// A top-level function pointer is a global, not a function
#[test]
fn test_function_pointer_global() {
    let file = parse("void (*cb)(int);");

    assert!(file.functions.is_empty());
    assert_eq!(file.globals.len(), 1);
    let cb = &file.globals[0];
    assert_eq!(cb.name, "cb");
    assert!(cb.is_pointer);
    assert_eq!(cb.type_name, "void (*)(int)");
}

/// Nested anonymous struct lifted into its own entity
#[test]
fn test_nested_anonymous_struct() {
    let file = parse("struct S { struct { int a; } nested; };");

    assert_eq!(file.structs["S"].fields[0].name, "nested");
    assert_eq!(file.structs["S"].fields[0].type_name, "S_nested");
    assert_eq!(file.structs["S_nested"].fields, vec![Field::new("a", "int")]);
    assert_eq!(file.anonymous_relationships["S"], vec!["S_nested".to_string()]);
}

/// Anonymous nesting is flattened to full depth
#[test]
fn test_deep_anonymous_nesting() {
    let file = parse(
        r#"
struct Outer {
    union {
        struct {
            int deep;
        } level2;
        int flat;
    } level1;
};
"#,
    );

    assert_eq!(file.structs["Outer"].fields[0].type_name, "Outer_level1");
    let level1 = &file.unions["Outer_level1"];
    assert_eq!(level1.fields[0].type_name, "Outer_level1_level2");
    assert_eq!(level1.fields[1], Field::new("flat", "int"));
    assert_eq!(
        file.structs["Outer_level1_level2"].fields,
        vec![Field::new("deep", "int")]
    );
    assert_eq!(file.anonymous_relationships["Outer"], vec!["Outer_level1".to_string()]);
    assert_eq!(
        file.anonymous_relationships["Outer_level1"],
        vec!["Outer_level1_level2".to_string()]
    );
}

/// Parsing the same input twice gives identical models
#[test]
fn test_idempotent_parse() {
    let source = r#"
typedef struct {
    struct { int lo; int hi; } range;
    union { int i; float f; };
} Sample;
struct { char tag; } loose;
static const int table[] = { 1, 2, 3 };
"#;
    let mut parser = CParser::new();
    let first = parser.parse_source(source, "same.c");
    let second = parser.parse_source(source, "same.c");
    let fresh = CParser::new().parse_source(source, "same.c");

    assert_eq!(first, second);
    assert_eq!(first, fresh);
    assert_eq!(
        first.anonymous_relationships["Sample"],
        vec!["Sample_range".to_string(), "Sample_anonymous_union_1".to_string()]
    );
}

/// Every span found has balanced braces
#[test]
fn test_spans_are_brace_balanced() {
    let source = r#"
struct A { struct { int x; } inner; };
enum E { ONE = 1, TWO = (1 << 1) };
int work(int n) { if (n) { return 1; } return 0; }
union U { int i; char c[4]; };
"#;
    let tokens = filter_significant(&tokenize(source));
    let finder = StructureFinder::new(&tokens);
    let balance = |start: usize, end: usize| {
        let opens = tokens[start..=end].iter().filter(|t| t.is_punct("{")).count();
        let closes = tokens[start..=end].iter().filter(|t| t.is_punct("}")).count();
        (opens, closes)
    };

    assert_eq!(finder.type_spans().len(), 3);
    for span in finder.type_spans() {
        let (opens, closes) = balance(span.start, span.end);
        assert_eq!(opens, closes);
    }
    for function in finder.find_functions() {
        let (opens, closes) = balance(function.start, function.end);
        assert_eq!(opens, closes);
    }
}

/// Includes and macros inside disabled branches are not reported
#[test]
fn test_includes_and_macros() {
    let source = r#"
#include <stdio.h>
#include "config.h"
#ifdef DEBUG
#include "debug.h"
#define TRACE(fmt, ...) printf(fmt, __VA_ARGS__)
#endif
#define MAX(a, b) \
    ((a) > (b) ? (a) : (b))
#define BUFFER_SIZE 256
"#;
    let file = parse(source);

    let includes: Vec<&str> = file.includes.iter().map(String::as_str).collect();
    assert_eq!(includes, vec!["stdio.h", "config.h"]);
    assert_eq!(file.macros, vec!["MAX(a, b)".to_string(), "BUFFER_SIZE".to_string()]);

    let debug = parser_with(&[("DEBUG", "")]).parse_source(source, "test.c");
    assert!(debug.includes.contains("debug.h"));
    assert_eq!(debug.macros[0], "TRACE(fmt, ...)");
}

/// `#elif` chains pick exactly one branch
#[test]
fn test_elif_chain() {
    let source = r#"
#if VERSION >= 2
int v2_api;
#elif defined(LEGACY)
int legacy_api;
#else
int fallback_api;
#endif
"#;
    let legacy = parser_with(&[("VERSION", "1"), ("LEGACY", "1")]).parse_source(source, "v.c");
    assert_eq!(global_names(&legacy), vec!["legacy_api"]);

    let modern = parser_with(&[("VERSION", "3"), ("LEGACY", "1")]).parse_source(source, "v.c");
    assert_eq!(global_names(&modern), vec!["v2_api"]);

    let bare = parse(source);
    assert_eq!(global_names(&bare), vec!["fallback_api"]);
}

/// Struct with function pointer members and its methods
#[test]
fn test_ops_structure() {
    let source = r#"
struct file_ops {
    int (*open)(const char *path, int flags);
    void (*close)(int fd);
    unsigned mode : 3;
};

int file_ops_register(struct file_ops *ops, ...);
static void helper(void) {}
"#;
    let file = parse(source);
    let ops = &file.structs["file_ops"];

    assert_eq!(ops.fields[0].name, "open");
    assert_eq!(ops.fields[0].type_name, "int (*)(const char *path, int flags)");
    assert!(ops.fields[0].is_pointer);
    assert_eq!(ops.fields[2].type_name, "unsigned : 3");

    assert_eq!(ops.functions.len(), 1);
    let register = &ops.functions[0];
    assert!(register.is_declaration);
    assert_eq!(register.parameters[0].type_name, "struct file_ops *");
    assert_eq!(register.parameters[1], Field::new("...", "..."));

    assert_eq!(file.functions[0].name, "helper");
    assert!(file.functions[0].is_static);
    assert!(file.functions[0].parameters.is_empty());
}

/// Enum values keep their initializer text
#[test]
fn test_enum_values() {
    let file = parse("enum color { RED, GREEN = 5, BLUE = GREEN + 1 };");
    let values: Vec<(&str, Option<&str>)> = file.enums["color"]
        .values
        .iter()
        .map(|v| (v.name.as_str(), v.value.as_deref()))
        .collect();
    assert_eq!(
        values,
        vec![("RED", None), ("GREEN", Some("5")), ("BLUE", Some("GREEN + 1"))]
    );
}

/// Globals with storage classes, arrays and initializers
#[test]
fn test_globals() {
    let file = parse(
        r#"
static int counter = 0;
extern const char *names[8];
unsigned long long big = 1ULL << 40, small;
"#,
    );
    let counter = &file.globals[0];
    assert!(counter.is_static);
    assert_eq!(counter.value.as_deref(), Some("0"));

    let names = &file.globals[1];
    assert_eq!(names.type_name, "const char *[8]");
    assert!(names.is_pointer && names.is_array);
    assert_eq!(names.array_size.as_deref(), Some("8"));

    assert_eq!(global_names(&file)[2..].to_vec(), vec!["big", "small"]);
    assert_eq!(file.globals[3].type_name, "unsigned long long");
}

/// Recovered problems are reported, never fatal
#[test]
fn test_diagnostics_for_malformed_input() {
    let mut parser = CParser::new();

    let (file, diagnostics) =
        parser.parse_source_with_diagnostics("#endif\nint kept;\n", "dangling.c");
    assert_eq!(global_names(&file), vec!["kept"]);
    assert!(diagnostics.iter().any(|d| d.kind == DiagnosticKind::DanglingEndif));

    let (file, diagnostics) =
        parser.parse_source_with_diagnostics("int a;\nstruct Broken { int b;\n", "broken.c");
    assert!(file.structs.is_empty());
    assert_eq!(global_names(&file), vec!["a"]);
    assert!(diagnostics.iter().any(|d| d.kind == DiagnosticKind::UnbalancedSpan));

    let (file, diagnostics) =
        parser.parse_source_with_diagnostics("int a;\n/* never closed", "comment.c");
    assert_eq!(global_names(&file), vec!["a"]);
    assert!(diagnostics.iter().any(|d| d.kind == DiagnosticKind::TokenizeRecovery));
}

/// C++ namespaces are transparent and qualified names are kept
#[test]
fn test_cpp_namespace() {
    let file = parse(
        r#"
namespace net {
int port;
int Server::start(int backlog) { return backlog; }
class Client { int fd; };
}
"#,
    );
    assert_eq!(global_names(&file), vec!["port"]);
    assert_eq!(file.functions.len(), 1);
    assert_eq!(file.functions[0].name, "Server::start");
}

/// Files that are not UTF-8 fall back to a single-byte encoding
#[test]
fn test_parse_file_latin1_and_cache() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("legacy.c");
    std::fs::write(&path, b"/* \xE9t\xE9 */\nint temperature;\n").unwrap();

    let mut parser = CParser::new();
    let file = parser.parse_file(&path).unwrap();
    assert_eq!(file.encoding_used, "iso-8859-1");
    assert_eq!(global_names(&file), vec!["temperature"]);

    let again = parser.parse_file(&path).unwrap();
    assert_eq!(file, again);
    assert_eq!(parser.cache_stats().hits, 1);

    let missing = parser.parse_file(&dir.path().join("missing.c"));
    assert!(matches!(missing, Err(cmodel_core::Error::FileRead { .. })));
}

/// The project model survives a JSON round trip
#[test]
fn test_model_round_trip() {
    let mut model = ProjectModel::new("demo", vec!["src".to_string()]);
    let file = parse(
        r#"
#include <stdint.h>
typedef struct { struct { uint8_t r, g, b; } rgb; } pixel_t;
typedef uint32_t color_t;
pixel_t *pixel_new(void);
"#,
    );
    model.add_file("pixel.h", file);

    let json = model.to_json().unwrap();
    let restored = ProjectModel::from_json(&json).unwrap();
    assert_eq!(restored, model);
    assert!(restored.validate().is_ok());
}
