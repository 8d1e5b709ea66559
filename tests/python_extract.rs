use ttmm::indexer::extract::{CallTarget, ImportKind, LanguageExtractor, SymbolKind};
use ttmm::indexer::python::{PythonExtractor, module_name_from_rel_path};

#[test]
fn module_name_from_path() {
    assert_eq!(module_name_from_rel_path("foo.py"), "foo");
    assert_eq!(module_name_from_rel_path("pkg/__init__.py"), "pkg");
    assert_eq!(module_name_from_rel_path("pkg/sub/mod.py"), "pkg.sub.mod");
    assert_eq!(module_name_from_rel_path("__init__.py"), "__init__");
}

#[test]
fn extract_symbols_calls_and_imports() {
    let source = r#"
"""module doc"""
import os, sys as system
from pkg import mod, util as u

class Base:
    pass

class Foo(Base):
    """Foo doc"""
    def method(self, x):
        "method doc"
        return helper(x)

def helper(a, b=1):
    return a + b

helper(1, 2)
"#;
    let mut extractor = PythonExtractor::new().unwrap();
    let module = extractor.module_info("pkg/mod.py");
    let extracted = extractor.extract(source, &module).unwrap();

    let names: Vec<_> = extracted
        .symbols
        .iter()
        .map(|s| (s.kind, s.qualname.as_str()))
        .collect();
    assert_eq!(
        names,
        vec![
            (SymbolKind::Class, "pkg.mod.Base"),
            (SymbolKind::Class, "pkg.mod.Foo"),
            (SymbolKind::Method, "pkg.mod.Foo.method"),
            (SymbolKind::Function, "pkg.mod.helper"),
        ]
    );

    let foo = &extracted.symbols[1];
    assert_eq!(foo.bases, vec!["Base".to_string()]);
    assert_eq!(foo.docstring.as_deref(), Some("Foo doc"));
    let method = &extracted.symbols[2];
    assert_eq!(method.parent.as_deref(), Some("pkg.mod.Foo"));
    assert_eq!(method.docstring.as_deref(), Some("method doc"));

    assert_eq!(extracted.calls.len(), 1);
    assert_eq!(extracted.calls[0].caller, "pkg.mod.Foo.method");
    assert_eq!(
        extracted.calls[0].target,
        CallTarget::Name {
            name: "helper".to_string()
        }
    );
    assert_eq!(extracted.module_level_calls, 1);

    let imports: Vec<_> = extracted
        .imports
        .iter()
        .map(|i| (i.alias.as_str(), i.target.as_str(), i.kind))
        .collect();
    assert!(imports.contains(&("os", "os", ImportKind::Module)));
    assert!(imports.contains(&("system", "sys", ImportKind::Module)));
    assert!(imports.contains(&("mod", "pkg.mod", ImportKind::From)));
    assert!(imports.contains(&("u", "pkg.util", ImportKind::From)));
}

#[test]
fn syntax_errors_are_reported_not_panicked() {
    let mut extractor = PythonExtractor::new().unwrap();
    let module = extractor.module_info("broken.py");
    let failure = extractor
        .extract("def ok():\n    pass\n\ndef broken(:\n    pass\n", &module)
        .unwrap_err();
    assert!(failure.message.contains("syntax error"), "{failure}");
}

#[test]
fn empty_file_has_no_symbols() {
    let mut extractor = PythonExtractor::new().unwrap();
    let module = extractor.module_info("empty.py");
    let extracted = extractor.extract("", &module).unwrap();
    assert_eq!(extracted.module, "empty");
    assert!(extracted.symbols.is_empty());
    assert!(extracted.calls.is_empty());
}

#[test]
fn nested_functions_are_distinct_symbols() {
    let source = r#"
def outer():
    def inner():
        return 1
    return inner()
"#;
    let mut extractor = PythonExtractor::new().unwrap();
    let module = extractor.module_info("m.py");
    let extracted = extractor.extract(source, &module).unwrap();
    let inner = extracted
        .symbols
        .iter()
        .find(|s| s.qualname == "m.outer.inner")
        .unwrap();
    assert_eq!(inner.kind, SymbolKind::Function);
    assert_eq!(inner.parent.as_deref(), Some("m.outer"));
    assert_eq!(extracted.calls[0].caller, "m.outer");
}
