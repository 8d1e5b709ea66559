use ttmm::indexer::extract::LanguageExtractor;
use ttmm::indexer::python::PythonExtractor;
use ttmm::metrics;

fn complexity_of(source: &str, qualname: &str) -> i64 {
    let mut extractor = PythonExtractor::new().unwrap();
    let module = extractor.module_info("mod.py");
    let extracted = extractor.extract(source, &module).unwrap();
    extracted
        .symbols
        .iter()
        .find(|s| s.qualname == qualname)
        .unwrap_or_else(|| panic!("missing symbol {qualname}"))
        .complexity
}

#[test]
fn python_complexity_counts() {
    let source = r#"
def func(x, y):
    if x and y:
        return 1
    elif x:
        return 2
    return 3
"#;
    assert_eq!(complexity_of(source, "mod.func"), 4);
}

#[test]
fn straight_line_function_is_one() {
    let source = r#"
def func(x):
    y = x + 1
    return y
"#;
    assert_eq!(complexity_of(source, "mod.func"), 1);
}

#[test]
fn loops_handlers_and_comprehensions_count() {
    let source = r#"
def func(items):
    total = 0
    for item in items:
        try:
            total += int(item)
        except ValueError:
            continue
    while total > 100:
        total -= 1
    return [i for i in items if i] if total else []
"#;
    // for, except, while, for_in_clause, if_clause, conditional_expression
    assert_eq!(complexity_of(source, "mod.func"), 7);
}

#[test]
fn nested_definitions_do_not_inflate_the_parent() {
    let source = r#"
def outer(x):
    def inner(y):
        if y:
            return 1
        return 0
    if x:
        return inner(x)
    return 0
"#;
    assert_eq!(complexity_of(source, "mod.outer"), 2);
    assert_eq!(complexity_of(source, "mod.outer.inner"), 2);
}

#[test]
fn churn_is_square_root_of_change_count() {
    assert_eq!(metrics::churn_score(0), 0.0);
    assert_eq!(metrics::churn_score(9), 3.0);
    assert_eq!(metrics::churn_score(-4), 0.0);
}
