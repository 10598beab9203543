use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;
use tree_sitter::{InputEdit, Language, Parser, Point, Query, QueryCursor, Tree};
// For tree-sitter 0.24, we need StreamingIterator
use streaming_iterator::StreamingIterator;

use super::parser::CstParser;
use super::path_key::PathKey;
use crate::constants::DEFAULT_MAX_PARSE_BYTES;
use crate::utils::ParseError;

/// Grammars we can build trees for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LanguageKind {
    Rust,
    Python,
    JavaScript,
    TypeScript,
    Tsx,
    Go,
    Java,
    Cpp,
}

impl LanguageKind {
    pub const ALL: [LanguageKind; 8] = [
        LanguageKind::Rust,
        LanguageKind::Python,
        LanguageKind::JavaScript,
        LanguageKind::TypeScript,
        LanguageKind::Tsx,
        LanguageKind::Go,
        LanguageKind::Java,
        LanguageKind::Cpp,
    ];

    /// Detect language from file extension
    pub fn from_extension(extension: &str) -> Option<Self> {
        let language = match extension {
            "rs" => LanguageKind::Rust,
            "py" | "pyi" => LanguageKind::Python,
            "js" | "mjs" | "cjs" | "jsx" => LanguageKind::JavaScript,
            "ts" | "mts" | "cts" => LanguageKind::TypeScript,
            "tsx" => LanguageKind::Tsx,
            "go" => LanguageKind::Go,
            "java" => LanguageKind::Java,
            "cpp" | "cc" | "cxx" | "hpp" | "hh" | "h" => LanguageKind::Cpp,
            _ => return None,
        };
        Some(language)
    }

    pub fn grammar(self) -> Language {
        match self {
            LanguageKind::Rust => tree_sitter_rust::LANGUAGE.into(),
            LanguageKind::Python => tree_sitter_python::LANGUAGE.into(),
            LanguageKind::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
            LanguageKind::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            LanguageKind::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
            LanguageKind::Go => tree_sitter_go::LANGUAGE.into(),
            LanguageKind::Java => tree_sitter_java::LANGUAGE.into(),
            LanguageKind::Cpp => tree_sitter_cpp::LANGUAGE.into(),
        }
    }

    /// Definitions worth showing a completion model
    fn outline_query(self) -> &'static str {
        match self {
            LanguageKind::Rust => {
                r#"
                (function_item name: (identifier) @function.name)
                (struct_item name: (type_identifier) @struct.name)
                (enum_item name: (type_identifier) @enum.name)
                (trait_item name: (type_identifier) @trait.name)
                (use_declaration argument: (_) @import.path)
                "#
            },
            LanguageKind::Python => {
                r#"
                (function_definition name: (identifier) @function.name)
                (class_definition name: (identifier) @class.name)
                (import_statement name: (dotted_name) @import.name)
                (import_from_statement module_name: (dotted_name) @import.module)
                "#
            },
            LanguageKind::JavaScript => {
                r#"
                (function_declaration name: (identifier) @function.name)
                (class_declaration name: (identifier) @class.name)
                (method_definition name: (property_identifier) @method.name)
                (import_statement source: (string) @import.source)
                "#
            },
            LanguageKind::TypeScript | LanguageKind::Tsx => {
                r#"
                (function_declaration name: (_) @function.name)
                (class_declaration name: (_) @class.name)
                (method_definition name: (_) @method.name)
                (interface_declaration name: (_) @trait.name)
                (type_alias_declaration name: (_) @type.name)
                (import_statement source: (_) @import.source)
                "#
            },
            LanguageKind::Go => {
                r#"
                (function_declaration name: (identifier) @function.name)
                (method_declaration name: (field_identifier) @method.name)
                (type_spec name: (type_identifier) @type.name)
                (import_spec path: (_) @import.path)
                "#
            },
            LanguageKind::Java => {
                r#"
                (class_declaration name: (identifier) @class.name)
                (interface_declaration name: (identifier) @trait.name)
                (method_declaration name: (identifier) @method.name)
                (import_declaration) @import.decl
                "#
            },
            LanguageKind::Cpp => {
                r#"
                (function_definition
                  declarator: (function_declarator declarator: (_) @function.name))
                (class_specifier name: (_) @class.name)
                (struct_specifier name: (_) @struct.name)
                (preproc_include path: (_) @import.path)
                "#
            },
        }
    }
}

/// Symbol types we extract from code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolKind {
    Function,
    Class,
    Method,
    Interface,
    Type,
    Import,
}

/// A definition found in a cached tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub line: usize,
}

/// A parsed file: the tree plus the exact source it was built from
#[derive(Debug, Clone)]
pub struct SyntaxTree {
    language: LanguageKind,
    tree: Tree,
    source: Arc<str>,
}

impl SyntaxTree {
    pub fn language(&self) -> LanguageKind {
        self.language
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether the tree contains error or missing nodes
    pub fn has_error(&self) -> bool {
        self.tree.root_node().has_error()
    }

    pub fn root_kind(&self) -> &'static str {
        self.tree.root_node().kind()
    }
}

/// Tree-sitter based code parser
pub struct TreeSitterParser {
    max_file_size: usize,
    queries: HashMap<LanguageKind, Query>,
}

impl Default for TreeSitterParser {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PARSE_BYTES)
    }
}

impl TreeSitterParser {
    pub fn new(max_file_size: usize) -> Self {
        let mut queries = HashMap::new();
        for language in LanguageKind::ALL {
            match Query::new(&language.grammar(), language.outline_query()) {
                Ok(query) => {
                    queries.insert(language, query);
                },
                Err(e) => warn!("Outline query unavailable for {:?}: {}", language, e),
            }
        }

        Self {
            max_file_size,
            queries,
        }
    }

    /// Parse `content`, reusing `previous` when it was built for the same grammar
    pub fn parse_source(
        &self,
        key: &PathKey,
        content: &str,
        previous: Option<&SyntaxTree>,
    ) -> Result<SyntaxTree, ParseError> {
        let extension = key.extension().unwrap_or_default();
        let language = LanguageKind::from_extension(extension)
            .ok_or_else(|| ParseError::UnsupportedLanguage(key.to_string()))?;

        if content.len() > self.max_file_size {
            return Err(ParseError::TooLarge {
                size: content.len(),
                limit: self.max_file_size,
            });
        }
        if content.contains('\0') {
            return Err(ParseError::Failed(format!("{} looks like binary content", key)));
        }

        let mut parser = Parser::new();
        parser
            .set_language(&language.grammar())
            .map_err(|e| ParseError::Language(e.to_string()))?;

        let old_tree = previous
            .filter(|previous| previous.language == language)
            .map(|previous| {
                let mut old = previous.tree.clone();
                old.edit(&diff_edit(&previous.source, content));
                old
            });

        let tree = parser
            .parse(content, old_tree.as_ref())
            .ok_or(ParseError::Cancelled)?;

        Ok(SyntaxTree {
            language,
            tree,
            source: Arc::from(content),
        })
    }

    /// Extract the definitions contained in a tree
    pub fn outline(&self, syntax: &SyntaxTree) -> Vec<Symbol> {
        let Some(query) = self.queries.get(&syntax.language) else {
            return Vec::new();
        };

        let source = syntax.source.as_bytes();
        let mut symbols = Vec::new();
        let mut cursor = QueryCursor::new();

        let mut matches = cursor.matches(query, syntax.tree.root_node(), source);
        while let Some(m) = matches.next() {
            for capture in m.captures {
                let capture_name = query.capture_names()[capture.index as usize];
                let kind = match capture_name.split('.').next() {
                    Some("function") => SymbolKind::Function,
                    Some("class") | Some("struct") => SymbolKind::Class,
                    Some("method") => SymbolKind::Method,
                    Some("trait") => SymbolKind::Interface,
                    Some("enum") | Some("type") => SymbolKind::Type,
                    Some("import") => SymbolKind::Import,
                    _ => continue,
                };

                let Ok(name) = capture.node.utf8_text(source) else {
                    continue;
                };
                symbols.push(Symbol {
                    name: name.trim().to_string(),
                    kind,
                    line: capture.node.start_position().row + 1,
                });
            }
        }

        symbols.sort_by_key(|symbol| symbol.line);
        symbols
    }
}

impl CstParser for TreeSitterParser {
    type Tree = SyntaxTree;

    fn parse(
        &self,
        key: &PathKey,
        content: &str,
        previous: Option<&SyntaxTree>,
    ) -> Result<SyntaxTree, ParseError> {
        self.parse_source(key, content, previous)
    }
}

/// Describe the change from `old` to `new` as one edit over the differing span
fn diff_edit(old: &str, new: &str) -> InputEdit {
    let old_bytes = old.as_bytes();
    let new_bytes = new.as_bytes();

    let mut prefix = old_bytes
        .iter()
        .zip(new_bytes)
        .take_while(|(a, b)| a == b)
        .count();
    while !new.is_char_boundary(prefix) || !old.is_char_boundary(prefix) {
        prefix -= 1;
    }

    let max_suffix = old.len().min(new.len()) - prefix;
    let mut suffix = old_bytes
        .iter()
        .rev()
        .zip(new_bytes.iter().rev())
        .take(max_suffix)
        .take_while(|(a, b)| a == b)
        .count();
    while !old.is_char_boundary(old.len() - suffix) || !new.is_char_boundary(new.len() - suffix)
    {
        suffix -= 1;
    }

    let old_end_byte = old.len() - suffix;
    let new_end_byte = new.len() - suffix;

    InputEdit {
        start_byte: prefix,
        old_end_byte,
        new_end_byte,
        start_position: point_at(old, prefix),
        old_end_position: point_at(old, old_end_byte),
        new_end_position: point_at(new, new_end_byte),
    }
}

fn point_at(text: &str, byte: usize) -> Point {
    let before = &text.as_bytes()[..byte];
    let row = before.iter().filter(|b| **b == b'\n').count();
    let column = match before.iter().rposition(|b| *b == b'\n') {
        Some(newline) => byte - newline - 1,
        None => byte,
    };
    Point { row, column }
}
