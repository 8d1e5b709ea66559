use crate::indexer::extract::{CallTarget, ExtractedFile, ImportKind, SymbolKind};
use crate::model::Resolution;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Bounds re-export chains and inheritance walks.
const MAX_PATH_DEPTH: usize = 8;
const MAX_MRO_DEPTH: usize = 16;

/// One edge per extracted call site, in extraction order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEdge {
    pub caller: String,
    pub callee: Option<String>,
    /// Raw callee text; set exactly when `callee` is `None`.
    pub unresolved_name: Option<String>,
    pub line: i64,
    pub resolution: Option<Resolution>,
}

impl ResolvedEdge {
    pub fn is_resolved(&self) -> bool {
        self.callee.is_some()
    }
}

#[derive(Debug)]
struct SymbolRecord {
    kind: SymbolKind,
    parent: Option<String>,
    module: String,
}

/// What a dotted path names.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Symbol(String),
    Module(String),
}

/// How the head of a name is bound in the caller's scope chain.
#[derive(Debug)]
enum Head {
    Def(String),
    Import(String),
    Binding { scope: String, name: String },
    Ambiguous,
    Missing,
}

pub struct Resolver {
    symbols: HashMap<String, SymbolRecord>,
    modules: HashSet<String>,
    children: HashMap<(String, String), Vec<String>>,
    imports: HashMap<(String, String), BTreeSet<String>>,
    star_imports: HashMap<String, Vec<String>>,
    bindings: HashMap<(String, String), Vec<Option<String>>>,
    bases: HashMap<String, Vec<String>>,
}

impl Resolver {
    pub fn new(files: &[ExtractedFile]) -> Self {
        let mut resolver = Self {
            symbols: HashMap::new(),
            modules: HashSet::new(),
            children: HashMap::new(),
            imports: HashMap::new(),
            star_imports: HashMap::new(),
            bindings: HashMap::new(),
            bases: HashMap::new(),
        };

        for file in files {
            resolver.modules.insert(file.module.clone());
            for symbol in &file.symbols {
                let scope = symbol.parent.clone().unwrap_or_else(|| file.module.clone());
                resolver
                    .children
                    .entry((scope, symbol.name.clone()))
                    .or_default()
                    .push(symbol.qualname.clone());
                resolver.symbols.insert(
                    symbol.qualname.clone(),
                    SymbolRecord {
                        kind: symbol.kind,
                        parent: symbol.parent.clone(),
                        module: file.module.clone(),
                    },
                );
            }
            for import in &file.imports {
                match import.kind {
                    ImportKind::Star => resolver
                        .star_imports
                        .entry(import.scope.clone())
                        .or_default()
                        .push(import.target.clone()),
                    ImportKind::Module | ImportKind::From => {
                        resolver
                            .imports
                            .entry((import.scope.clone(), import.alias.clone()))
                            .or_default()
                            .insert(import.target.clone());
                    }
                }
            }
            for binding in &file.bindings {
                resolver
                    .bindings
                    .entry((binding.scope.clone(), binding.name.clone()))
                    .or_default()
                    .push(binding.type_expr.clone());
            }
        }

        // Bases resolve against the scope enclosing the class statement.
        let mut bases = HashMap::new();
        for file in files {
            for symbol in file.symbols.iter().filter(|s| s.kind == SymbolKind::Class) {
                let chain = resolver.scope_chain_from(symbol.parent.as_deref(), &file.module);
                let resolved: Vec<String> = symbol
                    .bases
                    .iter()
                    .filter_map(|base| resolver.resolve_dotted(&chain, base))
                    .filter(|qualname| resolver.kind_of(qualname) == Some(SymbolKind::Class))
                    .collect();
                bases.insert(symbol.qualname.clone(), resolved);
            }
        }
        resolver.bases = bases;
        resolver
    }

    /// Resolve every call site of every file.
    pub fn resolve_all(&self, files: &[ExtractedFile]) -> Vec<ResolvedEdge> {
        let mut edges = Vec::new();
        for file in files {
            for call in &file.calls {
                let resolved = self.resolve_call(&call.caller, &call.target);
                let edge = match resolved {
                    Some((callee, resolution)) => ResolvedEdge {
                        caller: call.caller.clone(),
                        callee: Some(callee),
                        unresolved_name: None,
                        line: call.line,
                        resolution: Some(resolution),
                    },
                    None => ResolvedEdge {
                        caller: call.caller.clone(),
                        callee: None,
                        unresolved_name: Some(call.callee_text.clone()),
                        line: call.line,
                        resolution: None,
                    },
                };
                edges.push(edge);
            }
        }
        edges
    }

    pub fn resolve_call(&self, caller: &str, target: &CallTarget) -> Option<(String, Resolution)> {
        let module = self.symbols.get(caller)?.module.clone();
        let chain = self.scope_chain_from(Some(caller), &module);
        match target {
            CallTarget::Name { name } => match self.lookup_head(&chain, name) {
                Head::Def(qualname) => Some((qualname, Resolution::Scope)),
                Head::Import(path) => match self.resolve_path(&path, 0)? {
                    Target::Symbol(qualname) => Some((qualname, Resolution::Import)),
                    Target::Module(_) => None,
                },
                _ => None,
            },
            CallTarget::Attribute { receiver, attr } => {
                self.resolve_attribute(caller, &chain, receiver, attr)
            }
            CallTarget::Super { attr } => {
                let class = self.enclosing_class(caller)?;
                let bases = self.bases.get(&class)?;
                let mut visited = HashSet::new();
                visited.insert(class.clone());
                bases
                    .iter()
                    .find_map(|base| self.method_in_class(base, attr, &mut visited, 0))
                    .map(|qualname| (qualname, Resolution::Receiver))
            }
            CallTarget::Dynamic => None,
        }
    }

    fn resolve_attribute(
        &self,
        caller: &str,
        chain: &[String],
        receiver: &str,
        attr: &str,
    ) -> Option<(String, Resolution)> {
        let mut parts = receiver.split('.');
        let head = parts.next()?;
        let middle: Vec<&str> = parts.collect();

        if head == "self" || head == "cls" {
            let class = self.enclosing_class(caller)?;
            let owner = match middle.as_slice() {
                [] => class,
                [field] => {
                    let module = &self.symbols.get(&class)?.module;
                    let class_chain = self.scope_chain_from(Some(class.as_str()), module);
                    self.class_of_binding(&class, &format!("self.{field}"), &class_chain)?
                }
                _ => return None,
            };
            let mut visited = HashSet::new();
            return self
                .method_in_class(&owner, attr, &mut visited, 0)
                .map(|qualname| (qualname, Resolution::Receiver));
        }

        let mut path = vec![head.to_string()];
        path.extend(middle.iter().map(|part| part.to_string()));
        path.push(attr.to_string());

        match self.lookup_head(chain, head) {
            Head::Def(qualname) => {
                path[0] = qualname;
                match self.resolve_path(&path.join("."), 0)? {
                    Target::Symbol(qualname) => Some((qualname, Resolution::Scope)),
                    Target::Module(_) => None,
                }
            }
            Head::Import(target) => {
                path[0] = target;
                match self.resolve_path(&path.join("."), 0)? {
                    Target::Symbol(qualname) => Some((qualname, Resolution::Import)),
                    Target::Module(_) => None,
                }
            }
            Head::Binding { scope, name } => {
                let binding_chain = self.scope_chain_for(&scope);
                let mut owner = self.class_of_binding(&scope, &name, &binding_chain)?;
                for field in &middle {
                    let module = &self.symbols.get(&owner)?.module;
                    let class_chain = self.scope_chain_from(Some(owner.as_str()), module);
                    owner = self.class_of_binding(&owner, &format!("self.{field}"), &class_chain)?;
                }
                let mut visited = HashSet::new();
                self.method_in_class(&owner, attr, &mut visited, 0)
                    .map(|qualname| (qualname, Resolution::Receiver))
            }
            Head::Ambiguous | Head::Missing => None,
        }
    }

    /// Scopes visible from `start` innermost first: `start` itself, enclosing
    /// functions (class bodies are skipped), then the module.
    fn scope_chain_from(&self, start: Option<&str>, module: &str) -> Vec<String> {
        let mut chain = Vec::new();
        if let Some(start) = start {
            chain.push(start.to_string());
            let mut current = self.symbols.get(start).and_then(|s| s.parent.clone());
            while let Some(scope) = current {
                let record = self.symbols.get(&scope);
                if record.map(|r| r.kind) != Some(SymbolKind::Class) {
                    chain.push(scope.clone());
                }
                current = record.and_then(|r| r.parent.clone());
            }
        }
        chain.push(module.to_string());
        chain
    }

    fn scope_chain_for(&self, scope: &str) -> Vec<String> {
        match self.symbols.get(scope) {
            Some(record) => self.scope_chain_from(Some(scope), &record.module),
            None => vec![scope.to_string()],
        }
    }

    /// First scope in `chain` that binds `name`. A scope binding it through
    /// more than one mechanism, or through several definitions or import
    /// targets, stops the walk as ambiguous.
    fn lookup_head(&self, chain: &[String], name: &str) -> Head {
        for scope in chain {
            let key = (scope.clone(), name.to_string());
            let defs = self.children.get(&key);
            let imports = self.imports.get(&key);
            let bound = self.bindings.contains_key(&key);
            let mechanisms =
                defs.is_some() as usize + imports.is_some() as usize + bound as usize;
            if mechanisms == 0 {
                continue;
            }
            if mechanisms > 1 {
                return Head::Ambiguous;
            }
            if let Some(defs) = defs {
                return match defs.as_slice() {
                    [only] => Head::Def(only.clone()),
                    _ => Head::Ambiguous,
                };
            }
            if let Some(imports) = imports {
                return match imports.len() {
                    1 => imports
                        .iter()
                        .next()
                        .map(|target| Head::Import(target.clone()))
                        .unwrap_or(Head::Missing),
                    _ => Head::Ambiguous,
                };
            }
            return Head::Binding {
                scope: scope.clone(),
                name: name.to_string(),
            };
        }

        let mut candidates = BTreeSet::new();
        for scope in chain {
            for star in self.star_imports.get(scope).into_iter().flatten() {
                let path = format!("{star}.{name}");
                if self.resolve_path(&path, 0).is_some() {
                    candidates.insert(path);
                }
            }
        }
        match candidates.len() {
            0 => Head::Missing,
            1 => candidates
                .into_iter()
                .next()
                .map(Head::Import)
                .unwrap_or(Head::Missing),
            _ => Head::Ambiguous,
        }
    }

    /// Symbol a dotted expression names from inside `chain`, if any.
    fn resolve_dotted(&self, chain: &[String], expr: &str) -> Option<String> {
        let expr = expr.trim();
        if expr.is_empty() || !expr.split('.').all(is_identifier) {
            return None;
        }
        let (head, rest) = match expr.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (expr, None),
        };
        let base = match self.lookup_head(chain, head) {
            Head::Def(qualname) => qualname,
            Head::Import(target) => target,
            _ => return None,
        };
        let path = match rest {
            Some(rest) => format!("{base}.{rest}"),
            None => base,
        };
        match self.resolve_path(&path, 0)? {
            Target::Symbol(qualname) => Some(qualname),
            Target::Module(_) => None,
        }
    }

    /// Follow an absolute dotted path through modules, symbols, package
    /// re-exports, star imports and inherited members.
    fn resolve_path(&self, path: &str, depth: usize) -> Option<Target> {
        if depth > MAX_PATH_DEPTH {
            return None;
        }
        if self.symbols.contains_key(path) {
            return Some(Target::Symbol(path.to_string()));
        }
        if self.modules.contains(path) {
            return Some(Target::Module(path.to_string()));
        }
        let parts: Vec<&str> = path.split('.').collect();

        for split in (1..parts.len()).rev() {
            let module = parts[..split].join(".");
            if !self.modules.contains(&module) {
                continue;
            }
            let name = parts[split];
            let rest = &parts[split + 1..];
            let key = (module.clone(), name.to_string());
            if let Some(targets) = self.imports.get(&key) {
                if targets.len() != 1 {
                    return None;
                }
                let target = targets.iter().next()?;
                let mut next = vec![target.as_str()];
                next.extend_from_slice(rest);
                return self.resolve_path(&next.join("."), depth + 1);
            }
            let mut found = BTreeSet::new();
            for star in self.star_imports.get(&module).into_iter().flatten() {
                let mut next = vec![star.as_str()];
                next.extend_from_slice(&parts[split..]);
                if let Some(target) = self.resolve_path(&next.join("."), depth + 1) {
                    found.insert(target_key(&target));
                }
            }
            if found.len() == 1 {
                let only = found.into_iter().next()?;
                return self.resolve_path(&only, depth + 1);
            }
            break;
        }

        // `Class.member` where the member is inherited.
        let (owner, member) = path.rsplit_once('.')?;
        match self.resolve_path(owner, depth + 1)? {
            Target::Symbol(class) if self.kind_of(&class) == Some(SymbolKind::Class) => {
                let mut visited = HashSet::new();
                self.method_in_class(&class, member, &mut visited, 0)
                    .map(Target::Symbol)
            }
            _ => None,
        }
    }

    /// Member `name` of `class` or, depth first in declaration order, of its bases.
    fn method_in_class(
        &self,
        class: &str,
        name: &str,
        visited: &mut HashSet<String>,
        depth: usize,
    ) -> Option<String> {
        if depth > MAX_MRO_DEPTH || !visited.insert(class.to_string()) {
            return None;
        }
        if let Some(members) = self.children.get(&(class.to_string(), name.to_string())) {
            return match members.as_slice() {
                [only] => Some(only.clone()),
                _ => None,
            };
        }
        for base in self.bases.get(class).into_iter().flatten() {
            if let Some(found) = self.method_in_class(base, name, visited, depth + 1) {
                return Some(found);
            }
        }
        None
    }

    /// Class every binding of `name` in `scope` agrees on.
    fn class_of_binding(&self, scope: &str, name: &str, chain: &[String]) -> Option<String> {
        let types = self.bindings.get(&(scope.to_string(), name.to_string()))?;
        let mut agreed: Option<String> = None;
        for type_expr in types {
            let normalized = normalize_type_expr(type_expr.as_deref()?)?;
            match &agreed {
                Some(existing) if *existing != normalized => return None,
                Some(_) => {}
                None => agreed = Some(normalized),
            }
        }
        let class = self.resolve_dotted(chain, &agreed?)?;
        (self.kind_of(&class) == Some(SymbolKind::Class)).then_some(class)
    }

    /// Class owning the nearest enclosing method of `qualname`.
    fn enclosing_class(&self, qualname: &str) -> Option<String> {
        let mut current = Some(qualname.to_string());
        while let Some(name) = current {
            let record = self.symbols.get(&name)?;
            if record.kind == SymbolKind::Method {
                return record.parent.clone();
            }
            current = record.parent.clone();
        }
        None
    }

    fn kind_of(&self, qualname: &str) -> Option<SymbolKind> {
        self.symbols.get(qualname).map(|s| s.kind)
    }
}

fn target_key(target: &Target) -> String {
    match target {
        Target::Symbol(name) | Target::Module(name) => name.clone(),
    }
}

fn is_identifier(part: &str) -> bool {
    let mut chars = part.chars();
    match chars.next() {
        Some(first) if first.is_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|ch| ch.is_alphanumeric() || ch == '_')
}

/// Reduce an annotation or constructor expression to a dotted class path.
/// `"X"`, `Optional[X]` and `X | None` become `X`; any other generic is opaque.
pub fn normalize_type_expr(raw: &str) -> Option<String> {
    let mut expr: String = raw.chars().filter(|ch| !ch.is_whitespace()).collect();
    for quote in ['"', '\''] {
        if expr.len() >= 2 && expr.starts_with(quote) && expr.ends_with(quote) {
            expr = expr[1..expr.len() - 1].to_string();
        }
    }
    for prefix in ["Optional[", "typing.Optional["] {
        if let Some(inner) = expr.strip_prefix(prefix).and_then(|s| s.strip_suffix(']')) {
            expr = inner.to_string();
        }
    }
    if expr.contains('|') {
        let parts: Vec<&str> = expr.split('|').filter(|part| *part != "None").collect();
        match parts.as_slice() {
            [only] => expr = only.to_string(),
            _ => return None,
        }
    }
    if expr.is_empty() || !expr.split('.').all(is_identifier) {
        return None;
    }
    Some(expr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::extract::LanguageExtractor;
    use crate::indexer::python::PythonExtractor;

    fn extract_all(files: &[(&str, &str)]) -> Vec<ExtractedFile> {
        let mut extractor = PythonExtractor::new().unwrap();
        files
            .iter()
            .map(|(path, source)| {
                let module = extractor.module_info(path);
                extractor.extract(source, &module).unwrap()
            })
            .collect()
    }

    fn edges_of(files: &[(&str, &str)]) -> Vec<ResolvedEdge> {
        let extracted = extract_all(files);
        Resolver::new(&extracted).resolve_all(&extracted)
    }

    fn callee_of<'a>(edges: &'a [ResolvedEdge], caller: &str, line: i64) -> &'a ResolvedEdge {
        edges
            .iter()
            .find(|e| e.caller == caller && e.line == line)
            .unwrap_or_else(|| panic!("no edge from {caller} at line {line}: {edges:?}"))
    }

    #[test]
    fn normalizes_type_expressions() {
        assert_eq!(normalize_type_expr("\"Repo\"").as_deref(), Some("Repo"));
        assert_eq!(normalize_type_expr("Optional[db.Conn]").as_deref(), Some("db.Conn"));
        assert_eq!(normalize_type_expr("Conn | None").as_deref(), Some("Conn"));
        assert_eq!(normalize_type_expr("list[Conn]"), None);
        assert_eq!(normalize_type_expr("A | B"), None);
    }

    #[test]
    fn same_file_and_imported_functions() {
        let edges = edges_of(&[
            ("a.py", "from b import g\n\ndef f():\n    g()\n    local()\n\ndef local():\n    pass\n"),
            ("b.py", "def g():\n    pass\n"),
        ]);
        let g = callee_of(&edges, "a.f", 4);
        assert_eq!(g.callee.as_deref(), Some("b.g"));
        assert_eq!(g.resolution, Some(Resolution::Import));
        let local = callee_of(&edges, "a.f", 5);
        assert_eq!(local.callee.as_deref(), Some("a.local"));
        assert_eq!(local.resolution, Some(Resolution::Scope));
    }

    #[test]
    fn unknown_names_stay_unresolved_verbatim() {
        let edges = edges_of(&[("a.py", "def f():\n    h()\n    print('x')\n")]);
        assert_eq!(edges.len(), 2);
        assert!(edges.iter().all(|e| !e.is_resolved()));
        assert_eq!(edges[0].unresolved_name.as_deref(), Some("h"));
        assert_eq!(edges[1].unresolved_name.as_deref(), Some("print"));
    }

    #[test]
    fn methods_are_not_visible_as_bare_names() {
        let source = "class A:\n    def helper(self):\n        pass\n\n    def run(self):\n        helper()\n        self.helper()\n";
        let edges = edges_of(&[("m.py", source)]);
        assert!(!callee_of(&edges, "m.A.run", 6).is_resolved());
        let via_self = callee_of(&edges, "m.A.run", 7);
        assert_eq!(via_self.callee.as_deref(), Some("m.A.helper"));
        assert_eq!(via_self.resolution, Some(Resolution::Receiver));
    }

    #[test]
    fn inherited_and_super_methods() {
        let edges = edges_of(&[
            ("base.py", "class Base:\n    def save(self):\n        pass\n"),
            (
                "child.py",
                "from base import Base\n\nclass Child(Base):\n    def save(self):\n        super().save()\n\n    def run(self):\n        self.save()\n",
            ),
        ]);
        let sup = edges
            .iter()
            .find(|e| e.caller == "child.Child.save" && e.line == 5 && e.is_resolved())
            .unwrap();
        assert_eq!(sup.callee.as_deref(), Some("base.Base.save"));
        assert_eq!(
            callee_of(&edges, "child.Child.run", 8).callee.as_deref(),
            Some("child.Child.save")
        );
    }

    #[test]
    fn typed_receivers_and_attributes() {
        let edges = edges_of(&[
            ("store.py", "class Store:\n    def get(self, key):\n        pass\n"),
            (
                "svc.py",
                r#"from store import Store

class Service:
    def __init__(self, store: Store):
        self.store = store

    def fetch(self, key):
        return self.store.get(key)

def direct(s: "Store"):
    s.get(1)

def built():
    s = Store()
    s.get(2)

def untyped(s):
    s.get(3)
"#,
            ),
        ]);
        assert_eq!(callee_of(&edges, "svc.Service.fetch", 8).callee.as_deref(), Some("store.Store.get"));
        assert_eq!(callee_of(&edges, "svc.direct", 11).callee.as_deref(), Some("store.Store.get"));
        let built: Vec<_> = edges.iter().filter(|e| e.caller == "svc.built").collect();
        assert_eq!(built[0].callee.as_deref(), Some("store.Store"));
        assert_eq!(built[1].callee.as_deref(), Some("store.Store.get"));
        assert!(!callee_of(&edges, "svc.untyped", 18).is_resolved());
    }

    #[test]
    fn disagreeing_bindings_stay_unresolved() {
        let source = "class A:\n    def go(self):\n        pass\n\nclass B:\n    def go(self):\n        pass\n\ndef f(flag):\n    x = A()\n    x = B()\n    x.go()\n";
        let edges = edges_of(&[("m.py", source)]);
        assert!(!callee_of(&edges, "m.f", 12).is_resolved());
    }

    #[test]
    fn name_bound_twice_in_scope_is_ambiguous() {
        let source = "from other import g\n\ndef g():\n    pass\n\ndef f():\n    g()\n";
        let edges = edges_of(&[("m.py", source), ("other.py", "def g():\n    pass\n")]);
        assert!(!callee_of(&edges, "m.f", 7).is_resolved());
    }

    #[test]
    fn package_reexports_and_star_imports() {
        let edges = edges_of(&[
            ("pkg/__init__.py", "from .impl import run\n"),
            ("pkg/impl.py", "def run():\n    pass\n"),
            ("util.py", "def helper():\n    pass\n"),
            ("main.py", "import pkg\nfrom util import *\n\ndef main():\n    pkg.run()\n    helper()\n"),
        ]);
        let run = callee_of(&edges, "main.main", 5);
        assert_eq!(run.callee.as_deref(), Some("pkg.impl.run"));
        assert_eq!(run.resolution, Some(Resolution::Import));
        assert_eq!(callee_of(&edges, "main.main", 6).callee.as_deref(), Some("util.helper"));
    }

    #[test]
    fn nested_functions_see_enclosing_scope() {
        let source = "def outer():\n    def inner():\n        pass\n    def sibling():\n        inner()\n    sibling()\n";
        let edges = edges_of(&[("m.py", source)]);
        assert_eq!(callee_of(&edges, "m.outer.sibling", 5).callee.as_deref(), Some("m.outer.inner"));
        assert_eq!(callee_of(&edges, "m.outer", 6).callee.as_deref(), Some("m.outer.sibling"));
    }

    #[test]
    fn cyclic_bases_terminate() {
        let source = "class A(B):\n    pass\n\nclass B(A):\n    def run(self):\n        self.missing()\n";
        let edges = edges_of(&[("m.py", source)]);
        assert!(!callee_of(&edges, "m.B.run", 6).is_resolved());
    }
}
