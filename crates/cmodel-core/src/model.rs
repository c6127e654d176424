//! Semantic model produced by the parser
//!
//! Every record here is plain data: the parser builds a [`FileModel`] per
//! translation unit and moves it into a [`ProjectModel`]. Downstream tools
//! only rely on the JSON shape of these types.

use chrono::{DateTime, Utc};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

/// A struct/union member, function parameter or global variable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    /// Free-form type text as written in the source
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub is_pointer: bool,
    #[serde(default)]
    pub is_array: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub array_size: Option<String>,
    /// Initializer text after `=`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default)]
    pub is_static: bool,
}

impl Field {
    /// Create a field, deriving pointer and array markers from the type text
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        let type_name = type_name.into();
        let is_pointer = type_name.contains('*');
        let array_size = trailing_array_size(&type_name);
        Self {
            name: name.into(),
            is_pointer,
            is_array: array_size.is_some(),
            array_size: array_size.filter(|s| !s.is_empty()),
            type_name,
            value: None,
            is_static: false,
        }
    }

    /// Attach an initializer
    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// Mark as `static`
    pub fn with_static(mut self, is_static: bool) -> Self {
        self.is_static = is_static;
        self
    }
}

/// Returns the text between the last `[` and a trailing `]`, if the type
/// text ends in an array suffix.
fn trailing_array_size(type_name: &str) -> Option<String> {
    let trimmed = type_name.trim_end();
    if !trimmed.ends_with(']') {
        return None;
    }
    let open = trimmed.rfind('[')?;
    Some(trimmed[open + 1..trimmed.len() - 1].trim().to_string())
}

/// Function definition or prototype
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub return_type: String,
    #[serde(default)]
    pub parameters: Vec<Field>,
    #[serde(default)]
    pub is_static: bool,
    /// True for a prototype without a body
    #[serde(default)]
    pub is_declaration: bool,
}

/// Shared shape of `struct` and `union` definitions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aggregate {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<Field>,
    /// Functions associated by name prefix
    #[serde(default)]
    pub functions: Vec<Function>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typedef_name: Option<String>,
}

impl Aggregate {
    pub fn new(name: impl Into<String>, fields: Vec<Field>) -> Self {
        Self {
            name: name.into(),
            fields,
            functions: Vec::new(),
            typedef_name: None,
        }
    }
}

pub type Struct = Aggregate;
pub type Union = Aggregate;

/// One enumerator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumValue {
    pub name: String,
    /// Raw text after `=`, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl EnumValue {
    pub fn new(name: impl Into<String>, value: Option<String>) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Enum definition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enum {
    pub name: String,
    #[serde(default)]
    pub values: Vec<EnumValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typedef_name: Option<String>,
}

/// A typedef that does not introduce a new aggregate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alias {
    pub name: String,
    pub original_type: String,
}

/// Directed include edge, `depth` hops away from the root file
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IncludeRelation {
    pub source_file: String,
    pub included_file: String,
    pub depth: usize,
}

/// Kind of a type declaration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeclKind {
    Struct,
    Union,
    Enum,
    Alias,
}

/// Closed set of type declarations found in a file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TypeDecl {
    Struct(Struct),
    Union(Union),
    Enum(Enum),
    Alias(Alias),
}

/// Common view over the type declarations of a file
pub trait TypeDeclaration {
    fn name(&self) -> &str;
    fn kind(&self) -> DeclKind;
    fn typedef_name(&self) -> Option<&str>;
}

impl TypeDeclaration for Enum {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> DeclKind {
        DeclKind::Enum
    }

    fn typedef_name(&self) -> Option<&str> {
        self.typedef_name.as_deref()
    }
}

impl TypeDeclaration for Alias {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> DeclKind {
        DeclKind::Alias
    }

    fn typedef_name(&self) -> Option<&str> {
        None
    }
}

impl TypeDeclaration for TypeDecl {
    fn name(&self) -> &str {
        match self {
            TypeDecl::Struct(s) | TypeDecl::Union(s) => &s.name,
            TypeDecl::Enum(e) => &e.name,
            TypeDecl::Alias(a) => &a.name,
        }
    }

    fn kind(&self) -> DeclKind {
        match self {
            TypeDecl::Struct(_) => DeclKind::Struct,
            TypeDecl::Union(_) => DeclKind::Union,
            TypeDecl::Enum(_) => DeclKind::Enum,
            TypeDecl::Alias(_) => DeclKind::Alias,
        }
    }

    fn typedef_name(&self) -> Option<&str> {
        match self {
            TypeDecl::Struct(s) | TypeDecl::Union(s) => s.typedef_name.as_deref(),
            TypeDecl::Enum(e) => e.typedef_name.as_deref(),
            TypeDecl::Alias(_) => None,
        }
    }
}

/// Everything extracted from one source file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileModel {
    pub file_path: String,
    pub encoding_used: String,
    #[serde(default)]
    pub structs: IndexMap<String, Struct>,
    #[serde(default)]
    pub enums: IndexMap<String, Enum>,
    #[serde(default)]
    pub unions: IndexMap<String, Union>,
    #[serde(default)]
    pub functions: Vec<Function>,
    #[serde(default)]
    pub globals: Vec<Field>,
    /// Header names as written in `#include`
    #[serde(default)]
    pub includes: IndexSet<String>,
    #[serde(default)]
    pub macros: Vec<String>,
    #[serde(default)]
    pub aliases: IndexMap<String, Alias>,
    #[serde(default)]
    pub include_relations: Vec<IncludeRelation>,
    /// Parent name -> synthesized anonymous children, in extraction order
    #[serde(default)]
    pub anonymous_relationships: IndexMap<String, Vec<String>>,
}

impl FileModel {
    pub fn new(file_path: impl Into<String>, encoding_used: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            encoding_used: encoding_used.into(),
            ..Default::default()
        }
    }

    /// File name component of `file_path`
    pub fn name(&self) -> &str {
        file_name_of(&self.file_path)
    }

    /// Whether any struct, union, enum or alias already uses `name`
    pub fn has_type_name(&self, name: &str) -> bool {
        self.structs.contains_key(name)
            || self.unions.contains_key(name)
            || self.enums.contains_key(name)
            || self.aliases.contains_key(name)
    }

    /// All type declarations as tagged variants, grouped by kind
    pub fn type_decls(&self) -> Vec<TypeDecl> {
        let mut decls = Vec::with_capacity(
            self.structs.len() + self.unions.len() + self.enums.len() + self.aliases.len(),
        );
        decls.extend(self.structs.values().cloned().map(TypeDecl::Struct));
        decls.extend(self.unions.values().cloned().map(TypeDecl::Union));
        decls.extend(self.enums.values().cloned().map(TypeDecl::Enum));
        decls.extend(self.aliases.values().cloned().map(TypeDecl::Alias));
        decls
    }

    /// Look up a type declaration by name
    pub fn type_decl(&self, name: &str) -> Option<TypeDecl> {
        if let Some(s) = self.structs.get(name) {
            return Some(TypeDecl::Struct(s.clone()));
        }
        if let Some(u) = self.unions.get(name) {
            return Some(TypeDecl::Union(u.clone()));
        }
        if let Some(e) = self.enums.get(name) {
            return Some(TypeDecl::Enum(e.clone()));
        }
        self.aliases.get(name).cloned().map(TypeDecl::Alias)
    }

    /// Record an anonymous child under `parent`
    pub fn add_anonymous_relationship(&mut self, parent: &str, child: &str) {
        self.anonymous_relationships
            .entry(parent.to_string())
            .or_default()
            .push(child.to_string());
    }

    /// Check the structural invariants of a single file
    pub fn validate(&self) -> Result<()> {
        for (key, s) in self.structs.iter().chain(self.unions.iter()) {
            if key != &s.name {
                return Err(Error::Invariant(format!(
                    "{}: entry '{}' is keyed as '{}'",
                    self.file_path, s.name, key
                )));
            }
        }
        for (key, e) in &self.enums {
            if key != &e.name {
                return Err(Error::Invariant(format!(
                    "{}: enum '{}' is keyed as '{}'",
                    self.file_path, e.name, key
                )));
            }
        }
        for (parent, children) in &self.anonymous_relationships {
            for child in children {
                if !self.structs.contains_key(child) && !self.unions.contains_key(child) {
                    return Err(Error::Invariant(format!(
                        "{}: anonymous child '{}' of '{}' does not exist",
                        self.file_path, child, parent
                    )));
                }
            }
        }
        Ok(())
    }
}

fn file_name_of(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

/// Project-wide model: one [`FileModel`] per parsed file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectModel {
    pub project_name: String,
    pub source_roots: Vec<String>,
    /// Relative path -> file model
    #[serde(default)]
    pub files: IndexMap<String, FileModel>,
    #[serde(default)]
    pub global_includes: IndexSet<String>,
    pub created_at: DateTime<Utc>,
}

impl ProjectModel {
    pub fn new(project_name: impl Into<String>, source_roots: Vec<String>) -> Self {
        Self {
            project_name: project_name.into(),
            source_roots,
            files: IndexMap::new(),
            global_includes: IndexSet::new(),
            created_at: Utc::now(),
        }
    }

    /// Take ownership of a parsed file and merge its includes
    pub fn add_file(&mut self, key: impl Into<String>, file: FileModel) {
        self.global_includes.extend(file.includes.iter().cloned());
        self.files.insert(key.into(), file);
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Deserialize from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Write the model as JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Read a model previously written by [`ProjectModel::save`]
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_json(&content)
    }

    /// Fill every file's `include_relations` by following includes through
    /// the project's own files, up to `max_depth` hops.
    pub fn compute_include_relations(&mut self, max_depth: usize) {
        let mut includes_by_name: HashMap<String, Vec<String>> = HashMap::new();
        for file in self.files.values() {
            includes_by_name
                .entry(file.name().to_string())
                .or_default()
                .extend(file.includes.iter().cloned());
        }

        for file in self.files.values_mut() {
            file.include_relations = include_closure(file, &includes_by_name, max_depth);
        }
    }

    /// Check the invariants of every file
    pub fn validate(&self) -> Result<()> {
        self.files.values().try_for_each(FileModel::validate)
    }
}

fn include_closure(
    root: &FileModel,
    includes_by_name: &HashMap<String, Vec<String>>,
    max_depth: usize,
) -> Vec<IncludeRelation> {
    let mut relations = Vec::new();
    if max_depth == 0 {
        return relations;
    }

    let mut visited: HashSet<String> = HashSet::new();
    visited.insert(root.name().to_string());
    let mut queue: VecDeque<(String, String, usize)> = root
        .includes
        .iter()
        .map(|inc| (root.name().to_string(), inc.clone(), 1))
        .collect();

    while let Some((source, included, depth)) = queue.pop_front() {
        relations.push(IncludeRelation {
            source_file: source,
            included_file: included.clone(),
            depth,
        });

        let header = file_name_of(&included).to_string();
        if depth >= max_depth || !visited.insert(header.clone()) {
            continue;
        }
        if let Some(next) = includes_by_name.get(&header) {
            for inc in next {
                queue.push_back((header.clone(), inc.clone(), depth + 1));
            }
        }
    }

    relations
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_file(path: &str, includes: &[&str]) -> FileModel {
        let mut file = FileModel::new(path, "utf-8");
        for inc in includes {
            file.includes.insert(inc.to_string());
        }
        file
    }

    #[test]
    fn test_field_derives_markers() {
        let ptr = Field::new("next", "struct node *");
        assert!(ptr.is_pointer);
        assert!(!ptr.is_array);

        let arr = Field::new("buf", "char[32]");
        assert!(arr.is_array);
        assert_eq!(arr.array_size.as_deref(), Some("32"));

        let flex = Field::new("data", "uint8_t[]");
        assert!(flex.is_array);
        assert_eq!(flex.array_size, None);
    }

    #[test]
    fn test_project_round_trip() {
        let mut file = sample_file("src/main.c", &["stdio.h", "util.h"]);
        let mut point = Struct::new("Point", vec![Field::new("x", "int"), Field::new("y", "int")]);
        point.typedef_name = Some("point_t".into());
        file.structs.insert("Point".into(), point);
        file.enums.insert(
            "Color".into(),
            Enum {
                name: "Color".into(),
                values: vec![
                    EnumValue::new("RED", Some("1".into())),
                    EnumValue::new("GREEN", None),
                ],
                typedef_name: None,
            },
        );
        file.globals
            .push(Field::new("counter", "int").with_value("0").with_static(true));
        file.aliases.insert(
            "handle_t".into(),
            Alias {
                name: "handle_t".into(),
                original_type: "void *".into(),
            },
        );
        file.macros.push("MAX(a, b)".into());

        let mut project = ProjectModel::new("demo", vec!["src".into()]);
        project.add_file("main.c", file);

        let json = project.to_json().unwrap();
        let back = ProjectModel::from_json(&json).unwrap();
        assert_eq!(back, project);
    }

    #[test]
    fn test_field_serializes_type_key() {
        let json = serde_json::to_value(Field::new("x", "int")).unwrap();
        assert_eq!(json["type"], "int");
        assert!(json.get("type_name").is_none());
    }

    #[test]
    fn test_type_decl_tagging() {
        let decl = TypeDecl::Alias(Alias {
            name: "u8".into(),
            original_type: "unsigned char".into(),
        });
        let json = serde_json::to_value(&decl).unwrap();
        assert_eq!(json["kind"], "alias");
        let back: TypeDecl = serde_json::from_value(json).unwrap();
        assert_eq!(back, decl);
        assert_eq!(back.kind(), DeclKind::Alias);
        assert_eq!(back.name(), "u8");
    }

    #[test]
    fn test_global_includes_union() {
        let mut project = ProjectModel::new("demo", vec![]);
        project.add_file("a.c", sample_file("a.c", &["a.h", "common.h"]));
        project.add_file("b.c", sample_file("b.c", &["common.h", "b.h"]));

        let includes: Vec<&str> = project.global_includes.iter().map(String::as_str).collect();
        assert_eq!(includes, vec!["a.h", "common.h", "b.h"]);
    }

    #[test]
    fn test_include_relations_depth() {
        let mut project = ProjectModel::new("demo", vec![]);
        project.add_file("main.c", sample_file("main.c", &["a.h"]));
        project.add_file("a.h", sample_file("a.h", &["b.h"]));
        project.add_file("b.h", sample_file("b.h", &["c.h"]));

        project.compute_include_relations(2);
        let main = &project.files["main.c"];
        assert_eq!(
            main.include_relations,
            vec![
                IncludeRelation {
                    source_file: "main.c".into(),
                    included_file: "a.h".into(),
                    depth: 1,
                },
                IncludeRelation {
                    source_file: "a.h".into(),
                    included_file: "b.h".into(),
                    depth: 2,
                },
            ]
        );

        project.compute_include_relations(0);
        assert!(project.files["main.c"].include_relations.is_empty());
    }

    #[test]
    fn test_include_relations_cycle() {
        let mut project = ProjectModel::new("demo", vec![]);
        project.add_file("a.h", sample_file("a.h", &["b.h"]));
        project.add_file("b.h", sample_file("b.h", &["a.h"]));

        project.compute_include_relations(10);
        assert_eq!(project.files["a.h"].include_relations.len(), 2);
    }

    #[test]
    fn test_validate_dangling_anonymous_child() {
        let mut file = sample_file("x.c", &[]);
        file.add_anonymous_relationship("S", "S_missing");
        assert!(file.validate().is_err());

        file.structs
            .insert("S_missing".into(), Struct::new("S_missing", vec![]));
        assert!(file.validate().is_ok());
    }
}
