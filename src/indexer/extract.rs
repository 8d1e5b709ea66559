use serde::{Deserialize, Serialize};

/// Bumped whenever extraction output changes shape or meaning, so cached
/// extractions from older builds are re-parsed.
pub const EXTRACTOR_VERSION: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    Function,
    Method,
    Class,
}

impl SymbolKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SymbolKind::Function => "function",
            SymbolKind::Method => "method",
            SymbolKind::Class => "class",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "function" => Some(SymbolKind::Function),
            "method" => Some(SymbolKind::Method),
            "class" => Some(SymbolKind::Class),
            _ => None,
        }
    }

    pub fn is_callable(self) -> bool {
        matches!(self, SymbolKind::Function | SymbolKind::Method)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolInput {
    pub kind: SymbolKind,
    pub name: String,
    pub qualname: String,
    /// Qualified name of the enclosing symbol; `None` at module level.
    pub parent: Option<String>,
    pub start_line: i64,
    pub end_line: i64,
    pub start_byte: i64,
    pub end_byte: i64,
    pub signature: Option<String>,
    pub docstring: Option<String>,
    /// Base class expressions, verbatim (classes only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bases: Vec<String>,
    pub complexity: i64,
}

/// Lexical shape of a call expression's callee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum CallTarget {
    /// `name(...)`
    Name { name: String },
    /// `a.b.name(...)` where the receiver is a dotted identifier path.
    Attribute { receiver: String, attr: String },
    /// `super().name(...)`
    Super { attr: String },
    /// Anything else: subscripts, calls on call results, lambdas.
    Dynamic,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSiteInput {
    /// Qualified name of the symbol whose body contains the call.
    pub caller: String,
    /// Callee expression text, verbatim.
    pub callee_text: String,
    pub target: CallTarget,
    pub line: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportKind {
    /// `import a.b` binds `a`; `import a.b as x` binds `x`.
    Module,
    /// `from m import n [as k]`.
    From,
    /// `from m import *`.
    Star,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportInput {
    /// Qualified name of the enclosing function, or the module name.
    pub scope: String,
    /// Bound local name; empty for star imports.
    pub alias: String,
    /// Absolute dotted path the alias refers to.
    pub target: String,
    pub kind: ImportKind,
    pub line: i64,
}

/// A name bound by assignment, annotation or parameter inside a scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingInput {
    /// Qualified name of the binding scope (function, class for `self.x`, or module).
    pub scope: String,
    /// Local name, or `self.attr` for instance attributes.
    pub name: String,
    /// Annotation or constructor expression; `None` when the type is unknowable.
    pub type_expr: Option<String>,
    pub line: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedFile {
    pub module: String,
    pub symbols: Vec<SymbolInput>,
    pub calls: Vec<CallSiteInput>,
    pub imports: Vec<ImportInput>,
    pub bindings: Vec<BindingInput>,
    /// Call sites outside any symbol body (module-level code); not graph edges.
    pub module_level_calls: usize,
}

/// Module identity of a source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo {
    pub name: String,
    /// True for `__init__.py`: relative imports resolve against the module itself.
    pub is_package: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseFailure {
    pub message: String,
}

impl std::fmt::Display for ParseFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

pub trait LanguageExtractor {
    fn module_info(&self, rel_path: &str) -> ModuleInfo;
    fn extract(
        &mut self,
        source: &str,
        module: &ModuleInfo,
    ) -> std::result::Result<ExtractedFile, ParseFailure>;
}
