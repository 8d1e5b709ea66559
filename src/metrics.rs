use tree_sitter::Node;

/// Node kinds that open an independent path through a Python body.
const DECISION_KINDS: &[&str] = &[
    "if_statement",
    "elif_clause",
    "for_statement",
    "while_statement",
    "except_clause",
    "except_group_clause",
    "boolean_operator",
    "conditional_expression",
    "for_in_clause",
    "if_clause",
    "case_clause",
];

/// Definitions nested inside a body are symbols of their own and carry
/// their own complexity.
const NESTED_DEFINITION_KINDS: &[&str] = &["function_definition", "class_definition"];

/// Cyclomatic-style complexity of a definition body: 1 plus every decision
/// point, excluding nested function and class definitions.
pub fn body_complexity(body: Node<'_>) -> i64 {
    1 + count_decisions(body)
}

fn count_decisions(node: Node<'_>) -> i64 {
    let mut count = 0;
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        if NESTED_DEFINITION_KINDS.contains(&child.kind()) {
            continue;
        }
        if DECISION_KINDS.contains(&child.kind()) {
            count += 1;
        }
        count += count_decisions(child);
    }
    count
}

/// Square-root dampened churn: ten times the commits is roughly three times
/// the churn, so one outlier file cannot swamp files that change steadily.
pub fn churn_score(change_count: i64) -> f64 {
    (change_count.max(0) as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tree_sitter::Parser;

    fn complexity_of_first_function(source: &str) -> i64 {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_python::LANGUAGE.into())
            .unwrap();
        let tree = parser.parse(source, None).unwrap();
        let root = tree.root_node();
        let mut cursor = root.walk();
        let func = root
            .named_children(&mut cursor)
            .find(|node| node.kind() == "function_definition")
            .unwrap();
        body_complexity(func.child_by_field_name("body").unwrap())
    }

    #[test]
    fn straight_line_code_is_one() {
        assert_eq!(complexity_of_first_function("def f():\n    return 1\n"), 1);
    }

    #[test]
    fn counts_branches_loops_and_handlers() {
        let source = r#"
def f(items):
    for item in items:
        if item and item.ok:
            continue
    while False:
        pass
    try:
        pass
    except ValueError:
        pass
    except KeyError:
        pass
    return [x for x in items if x]
"#;
        // for, if, and, while, 2x except, comprehension for + if
        assert_eq!(complexity_of_first_function(source), 9);
    }

    #[test]
    fn nested_definitions_are_excluded() {
        let source = r#"
def outer(x):
    def inner(y):
        if y:
            return 1
        return 2
    return inner(x) if x else None
"#;
        assert_eq!(complexity_of_first_function(source), 2);
    }

    #[test]
    fn churn_is_dampened_and_non_negative() {
        assert_eq!(churn_score(0), 0.0);
        assert_eq!(churn_score(-3), 0.0);
        assert_eq!(churn_score(16), 4.0);
        assert!(churn_score(100) < 100.0);
    }
}
