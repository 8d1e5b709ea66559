use crate::indexer::extract::{
    BindingInput, CallSiteInput, CallTarget, ExtractedFile, ImportInput, ImportKind,
    LanguageExtractor, ModuleInfo, ParseFailure, SymbolInput, SymbolKind,
};
use crate::metrics;
use std::collections::HashMap;
use std::path::Path;
use tree_sitter::{Node, Parser};

#[derive(Clone, Copy, PartialEq, Eq)]
enum ScopeKind {
    Class,
    Function,
}

#[derive(Clone)]
struct Scope {
    qualname: String,
    kind: ScopeKind,
}

pub struct PythonExtractor {
    parser: Parser,
}

impl PythonExtractor {
    pub fn new() -> crate::Result<Self> {
        let mut parser = Parser::new();
        let language = tree_sitter_python::LANGUAGE;
        parser.set_language(&language.into())?;
        Ok(Self { parser })
    }
}

impl LanguageExtractor for PythonExtractor {
    fn module_info(&self, rel_path: &str) -> ModuleInfo {
        let is_package = Path::new(rel_path).file_name().and_then(|s| s.to_str())
            == Some("__init__.py");
        ModuleInfo {
            name: module_name_from_rel_path(rel_path),
            is_package,
        }
    }

    fn extract(
        &mut self,
        source: &str,
        module: &ModuleInfo,
    ) -> Result<ExtractedFile, ParseFailure> {
        let tree = self.parser.parse(source, None).ok_or_else(|| ParseFailure {
            message: "parser produced no tree".to_string(),
        })?;
        let root = tree.root_node();
        if root.has_error() {
            let line = first_error_line(root).unwrap_or(1);
            return Err(ParseFailure {
                message: format!("syntax error near line {line}"),
            });
        }

        let mut walker = Walker {
            source,
            module: module.name.clone(),
            base_package: base_package_parts(&module.name, module.is_package),
            scopes: Vec::new(),
            seen: HashMap::new(),
            output: ExtractedFile {
                module: module.name.clone(),
                ..Default::default()
            },
        };
        walker.walk_children(root);
        Ok(walker.output)
    }
}

pub fn module_name_from_rel_path(rel_path: &str) -> String {
    let path = Path::new(rel_path);
    let mut parts: Vec<String> = path
        .components()
        .filter_map(|comp| comp.as_os_str().to_str().map(|s| s.to_string()))
        .collect();
    if parts.is_empty() {
        return "__init__".to_string();
    }
    let file = parts.pop().unwrap_or_default();
    let stem = Path::new(&file)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(&file)
        .to_string();
    if stem != "__init__" {
        parts.push(stem);
    }
    if parts.is_empty() {
        "__init__".to_string()
    } else {
        parts.join(".")
    }
}

struct Walker<'s> {
    source: &'s str,
    module: String,
    base_package: Vec<String>,
    scopes: Vec<Scope>,
    seen: HashMap<String, usize>,
    output: ExtractedFile,
}

impl<'s> Walker<'s> {
    fn walk(&mut self, node: Node<'_>) {
        match node.kind() {
            "decorated_definition" => {
                let mut cursor = node.walk();
                for child in node.named_children(&mut cursor) {
                    if child.kind() == "decorator" {
                        self.walk(child);
                    }
                }
                if let Some(definition) = node.child_by_field_name("definition") {
                    self.definition(definition, node);
                }
            }
            "function_definition" | "class_definition" => self.definition(node, node),
            "import_statement" | "import_from_statement" => self.imports(node),
            "call" => {
                self.call(node);
                self.walk_children(node);
            }
            "assignment" => {
                self.assignment(node);
                self.walk_children(node);
            }
            "for_statement" => {
                if let Some(left) = node.child_by_field_name("left") {
                    for name in target_identifiers(left, self.source) {
                        self.bind(self.scope_qualname(), name, None, line_of(left));
                    }
                }
                self.walk_children(node);
            }
            _ => self.walk_children(node),
        }
    }

    fn walk_children(&mut self, node: Node<'_>) {
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            self.walk(child);
        }
    }

    fn definition(&mut self, node: Node<'_>, span_node: Node<'_>) {
        match node.kind() {
            "function_definition" => self.function(node, span_node),
            "class_definition" => self.class(node, span_node),
            _ => self.walk(node),
        }
    }

    fn function(&mut self, node: Node<'_>, span_node: Node<'_>) {
        let Some(name) = node
            .child_by_field_name("name")
            .map(|n| node_text(n, self.source))
            .filter(|name| !name.is_empty())
        else {
            return;
        };
        let in_class = self.scopes.last().map(|s| s.kind) == Some(ScopeKind::Class);
        let kind = if in_class {
            SymbolKind::Method
        } else {
            SymbolKind::Function
        };
        let parent = self.scopes.last().map(|s| s.qualname.clone());
        let qualname = self.unique_qualname(&name);
        let body = node.child_by_field_name("body");

        // Default values and annotations evaluate in the enclosing scope.
        let parameters = node.child_by_field_name("parameters");
        if let Some(parameters) = parameters {
            self.walk_children(parameters);
        }

        self.push_symbol(SymbolInput {
            kind,
            name,
            qualname: qualname.clone(),
            parent,
            start_line: line_of(span_node),
            end_line: end_line_of(span_node),
            start_byte: span_node.start_byte() as i64,
            end_byte: span_node.end_byte() as i64,
            signature: extract_signature(node, self.source),
            docstring: body.and_then(|body| extract_docstring(body, self.source)),
            bases: Vec::new(),
            complexity: body.map(metrics::body_complexity).unwrap_or(1),
        });

        self.scopes.push(Scope {
            qualname: qualname.clone(),
            kind: ScopeKind::Function,
        });
        if let Some(parameters) = parameters {
            self.parameters(parameters, &qualname, in_class);
        }
        if let Some(body) = body {
            self.walk_children(body);
        }
        self.scopes.pop();
    }

    fn class(&mut self, node: Node<'_>, span_node: Node<'_>) {
        let Some(name) = node
            .child_by_field_name("name")
            .map(|n| node_text(n, self.source))
            .filter(|name| !name.is_empty())
        else {
            return;
        };
        let parent = self.scopes.last().map(|s| s.qualname.clone());
        let qualname = self.unique_qualname(&name);
        let body = node.child_by_field_name("body");

        let mut bases = Vec::new();
        if let Some(superclasses) = node.child_by_field_name("superclasses") {
            let mut cursor = superclasses.walk();
            for child in superclasses.named_children(&mut cursor) {
                if child.kind() == "keyword_argument" {
                    continue;
                }
                let base = node_text(child, self.source);
                if !base.is_empty() {
                    bases.push(base);
                }
            }
            self.walk_children(superclasses);
        }

        self.push_symbol(SymbolInput {
            kind: SymbolKind::Class,
            name,
            qualname: qualname.clone(),
            parent,
            start_line: line_of(span_node),
            end_line: end_line_of(span_node),
            start_byte: span_node.start_byte() as i64,
            end_byte: span_node.end_byte() as i64,
            signature: None,
            docstring: body.and_then(|body| extract_docstring(body, self.source)),
            bases,
            complexity: body.map(metrics::body_complexity).unwrap_or(1),
        });

        self.scopes.push(Scope {
            qualname,
            kind: ScopeKind::Class,
        });
        if let Some(body) = body {
            self.walk_children(body);
        }
        self.scopes.pop();
    }

    fn parameters(&mut self, parameters: Node<'_>, scope: &str, is_method: bool) {
        let mut cursor = parameters.walk();
        for (index, param) in parameters.named_children(&mut cursor).enumerate() {
            let (name, type_expr) = match param.kind() {
                "identifier" => (node_text(param, self.source), None),
                "typed_parameter" => {
                    let name = param
                        .named_child(0)
                        .filter(|n| n.kind() == "identifier")
                        .map(|n| node_text(n, self.source));
                    let Some(name) = name else { continue };
                    let ty = param
                        .child_by_field_name("type")
                        .map(|n| node_text(n, self.source));
                    (name, ty)
                }
                "default_parameter" | "typed_default_parameter" => {
                    let Some(name) = param
                        .child_by_field_name("name")
                        .map(|n| node_text(n, self.source))
                    else {
                        continue;
                    };
                    let ty = param
                        .child_by_field_name("type")
                        .map(|n| node_text(n, self.source));
                    (name, ty)
                }
                "list_splat_pattern" | "dictionary_splat_pattern" => {
                    let Some(name) = param.named_child(0).map(|n| node_text(n, self.source))
                    else {
                        continue;
                    };
                    (name, None)
                }
                _ => continue,
            };
            if is_method && index == 0 && (name == "self" || name == "cls") {
                continue;
            }
            self.bind(scope.to_string(), name, type_expr, line_of(param));
        }
    }

    fn call(&mut self, node: Node<'_>) {
        let Some(owner) = self.scopes.last().map(|s| s.qualname.clone()) else {
            self.output.module_level_calls += 1;
            return;
        };
        let Some(function) = node.child_by_field_name("function") else {
            return;
        };
        let callee_text = node_text(function, self.source);
        if callee_text.is_empty() {
            return;
        }
        let target = classify_callee(function, self.source);
        self.output.calls.push(CallSiteInput {
            caller: owner,
            callee_text,
            target,
            line: line_of(node),
        });
    }

    fn assignment(&mut self, node: Node<'_>) {
        let Some(left) = node.child_by_field_name("left") else {
            return;
        };
        let annotation = node
            .child_by_field_name("type")
            .map(|n| node_text(n, self.source));
        let constructed = node
            .child_by_field_name("right")
            .filter(|right| right.kind() == "call")
            .and_then(|right| right.child_by_field_name("function"))
            .and_then(|function| dotted_path(function, self.source));
        let line = line_of(node);

        match left.kind() {
            "identifier" => {
                let type_expr = annotation.or(constructed);
                let name = node_text(left, self.source);
                self.bind(self.scope_qualname(), name, type_expr, line);
            }
            "attribute" => {
                let object = left.child_by_field_name("object");
                let attr = left.child_by_field_name("attribute");
                let (Some(object), Some(attr)) = (object, attr) else {
                    return;
                };
                if object.kind() != "identifier" || node_text(object, self.source) != "self" {
                    return;
                }
                let Some(class_scope) = self.enclosing_class_of_method() else {
                    return;
                };
                let forwarded = node
                    .child_by_field_name("right")
                    .filter(|right| right.kind() == "identifier")
                    .and_then(|right| self.local_type(&node_text(right, self.source)));
                let name = format!("self.{}", node_text(attr, self.source));
                self.bind(class_scope, name, annotation.or(constructed).or(forwarded), line);
            }
            _ => {
                for name in target_identifiers(left, self.source) {
                    self.bind(self.scope_qualname(), name, None, line);
                }
            }
        }
    }

    fn imports(&mut self, node: Node<'_>) {
        let scope = self.scope_qualname();
        let line = line_of(node);
        let mut cursor = node.walk();
        if node.kind() == "import_statement" {
            for name in node.children_by_field_name("name", &mut cursor) {
                match name.kind() {
                    "dotted_name" => {
                        let target = node_text(name, self.source);
                        let alias = target.split('.').next().unwrap_or_default().to_string();
                        self.push_import(&scope, alias.clone(), alias, ImportKind::Module, line);
                    }
                    "aliased_import" => {
                        let target = name
                            .child_by_field_name("name")
                            .map(|n| node_text(n, self.source));
                        let alias = name
                            .child_by_field_name("alias")
                            .map(|n| node_text(n, self.source));
                        if let (Some(target), Some(alias)) = (target, alias) {
                            self.push_import(&scope, alias, target, ImportKind::Module, line);
                        }
                    }
                    _ => {}
                }
            }
            return;
        }

        let Some(module_node) = node.child_by_field_name("module_name") else {
            return;
        };
        let raw_module = node_text(module_node, self.source);
        let Some(base) = absolutize_module(&raw_module, &self.base_package) else {
            return;
        };
        let join = |item: &str| {
            if base.is_empty() {
                item.to_string()
            } else {
                format!("{base}.{item}")
            }
        };

        let mut has_wildcard = false;
        let mut walk_cursor = node.walk();
        for child in node.named_children(&mut walk_cursor) {
            if child.kind() == "wildcard_import" {
                has_wildcard = true;
            }
        }
        if has_wildcard {
            if !base.is_empty() {
                self.push_import(&scope, String::new(), base.clone(), ImportKind::Star, line);
            }
            return;
        }

        for name in node.children_by_field_name("name", &mut cursor) {
            let (item, alias) = match name.kind() {
                "dotted_name" => {
                    let item = node_text(name, self.source);
                    (item.clone(), item)
                }
                "aliased_import" => {
                    let item = name
                        .child_by_field_name("name")
                        .map(|n| node_text(n, self.source));
                    let alias = name
                        .child_by_field_name("alias")
                        .map(|n| node_text(n, self.source));
                    match (item, alias) {
                        (Some(item), Some(alias)) => (item, alias),
                        _ => continue,
                    }
                }
                _ => continue,
            };
            self.push_import(&scope, alias, join(&item), ImportKind::From, line);
        }
    }

    fn push_import(&mut self, scope: &str, alias: String, target: String, kind: ImportKind, line: i64) {
        self.output.imports.push(ImportInput {
            scope: scope.to_string(),
            alias,
            target,
            kind,
            line,
        });
    }

    fn bind(&mut self, scope: String, name: String, type_expr: Option<String>, line: i64) {
        if name.is_empty() {
            return;
        }
        self.output.bindings.push(BindingInput {
            scope,
            name,
            type_expr,
            line,
        });
    }

    fn push_symbol(&mut self, symbol: SymbolInput) {
        self.output.symbols.push(symbol);
    }

    /// Declared type of a name already bound in the current scope, when every
    /// binding so far agrees on it.
    fn local_type(&self, name: &str) -> Option<String> {
        let scope = self.scope_qualname();
        let mut types = self
            .output
            .bindings
            .iter()
            .filter(|b| b.scope == scope && b.name == name)
            .map(|b| b.type_expr.clone());
        let first = types.next()??;
        types
            .all(|ty| ty.as_deref() == Some(first.as_str()))
            .then_some(first)
    }

    /// Innermost binding scope: enclosing function or class, else the module.
    fn scope_qualname(&self) -> String {
        self.scopes
            .last()
            .map(|s| s.qualname.clone())
            .unwrap_or_else(|| self.module.clone())
    }

    /// Class owning the method currently being walked, if the innermost scope is a method.
    fn enclosing_class_of_method(&self) -> Option<String> {
        let len = self.scopes.len();
        if len < 2 {
            return None;
        }
        let (outer, inner) = (&self.scopes[len - 2], &self.scopes[len - 1]);
        if inner.kind == ScopeKind::Function && outer.kind == ScopeKind::Class {
            Some(outer.qualname.clone())
        } else {
            None
        }
    }

    /// Qualified name for a new definition; redefinitions get a `#n` suffix.
    fn unique_qualname(&mut self, name: &str) -> String {
        let container = self.scope_qualname();
        let base = format!("{container}.{name}");
        let count = self.seen.entry(base.clone()).or_insert(0);
        *count += 1;
        if *count == 1 {
            base
        } else {
            format!("{base}#{count}")
        }
    }
}

fn classify_callee(function: Node<'_>, source: &str) -> CallTarget {
    match function.kind() {
        "identifier" => CallTarget::Name {
            name: node_text(function, source),
        },
        "attribute" => {
            let object = function.child_by_field_name("object");
            let attr = function
                .child_by_field_name("attribute")
                .map(|n| node_text(n, source));
            let (Some(object), Some(attr)) = (object, attr) else {
                return CallTarget::Dynamic;
            };
            if is_super_call(object, source) {
                return CallTarget::Super { attr };
            }
            match dotted_path(object, source) {
                Some(receiver) => CallTarget::Attribute { receiver, attr },
                None => CallTarget::Dynamic,
            }
        }
        _ => CallTarget::Dynamic,
    }
}

fn is_super_call(node: Node<'_>, source: &str) -> bool {
    node.kind() == "call"
        && node
            .child_by_field_name("function")
            .map(|f| f.kind() == "identifier" && node_text(f, source) == "super")
            .unwrap_or(false)
}

/// `a`, `a.b`, `a.b.c` with whitespace removed; `None` for any other expression.
fn dotted_path(node: Node<'_>, source: &str) -> Option<String> {
    match node.kind() {
        "identifier" => Some(node_text(node, source)),
        "attribute" => {
            let object = dotted_path(node.child_by_field_name("object")?, source)?;
            let attr = node.child_by_field_name("attribute")?;
            if attr.kind() != "identifier" {
                return None;
            }
            Some(format!("{object}.{}", node_text(attr, source)))
        }
        _ => None,
    }
}

fn target_identifiers(node: Node<'_>, source: &str) -> Vec<String> {
    match node.kind() {
        "identifier" => vec![node_text(node, source)],
        "pattern_list" | "tuple_pattern" | "list_pattern" | "tuple" | "list" => {
            let mut out = Vec::new();
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                out.extend(target_identifiers(child, source));
            }
            out
        }
        _ => Vec::new(),
    }
}

fn first_error_line(node: Node<'_>) -> Option<i64> {
    if node.is_error() || node.is_missing() {
        return Some(line_of(node));
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.has_error() {
            if let Some(line) = first_error_line(child) {
                return Some(line);
            }
        }
    }
    None
}

fn line_of(node: Node<'_>) -> i64 {
    node.start_position().row as i64 + 1
}

fn end_line_of(node: Node<'_>) -> i64 {
    node.end_position().row as i64 + 1
}

fn node_text(node: Node<'_>, source: &str) -> String {
    let start = node.start_byte();
    let end = node.end_byte();
    source.get(start..end).unwrap_or("").trim().to_string()
}

fn extract_signature(node: Node<'_>, source: &str) -> Option<String> {
    let params = node
        .child_by_field_name("parameters")
        .map(|n| node_text(n, source));
    let return_type = node
        .child_by_field_name("return_type")
        .map(|n| node_text(n, source));
    match (params, return_type) {
        (Some(p), Some(r)) => Some(format!("{p} -> {r}")),
        (Some(p), None) => Some(p),
        _ => None,
    }
}

fn extract_docstring(node: Node<'_>, source: &str) -> Option<String> {
    let mut cursor = node.walk();
    let mut children = node.named_children(&mut cursor);
    let first = children.next()?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let string_node = first.named_child(0)?;
    if string_node.kind() != "string" {
        return None;
    }
    let raw = node_text(string_node, source);
    unquote_string_literal(&raw).or(Some(raw))
}

fn unquote_string_literal(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let mut idx = 0;
    for (offset, ch) in trimmed.char_indices() {
        if ch.is_ascii_alphabetic() {
            idx = offset + ch.len_utf8();
        } else {
            break;
        }
    }
    let rest = &trimmed[idx..];
    for quote in ["'''", "\"\"\""] {
        if rest.starts_with(quote) && rest.ends_with(quote) && rest.len() >= 6 {
            return Some(rest[3..rest.len() - 3].trim().to_string());
        }
    }
    for quote in ['"', '\''] {
        if rest.starts_with(quote) && rest.ends_with(quote) && rest.len() >= 2 {
            return Some(rest[1..rest.len() - 1].to_string());
        }
    }
    None
}

fn base_package_parts(module: &str, is_package: bool) -> Vec<String> {
    let parts: Vec<&str> = module.split('.').filter(|part| !part.is_empty()).collect();
    if parts == ["__init__"] {
        return Vec::new();
    }
    let keep = if is_package {
        parts.len()
    } else {
        parts.len().saturating_sub(1)
    };
    parts[..keep].iter().map(|part| part.to_string()).collect()
}

/// Absolute dotted module for an import's module text. Relative imports walk up
/// from `base_package`; an empty string means the repository root package.
fn absolutize_module(candidate: &str, base_package: &[String]) -> Option<String> {
    let trimmed = candidate.trim();
    if trimmed.is_empty() {
        return None;
    }
    if !trimmed.starts_with('.') {
        return Some(trimmed.to_string());
    }
    let dot_count = trimmed.chars().take_while(|ch| *ch == '.').count();
    let rest = &trimmed[dot_count..];
    let up = dot_count - 1;
    if up > base_package.len() {
        return None;
    }
    let mut parts: Vec<String> = base_package.to_vec();
    parts.truncate(base_package.len() - up);
    for segment in rest.split('.').filter(|part| !part.is_empty()) {
        parts.push(segment.to_string());
    }
    Some(parts.join("."))
}
