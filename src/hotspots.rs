use crate::model::Hotspot;
use std::cmp::Ordering;

/// Hotspot score of a symbol. Pure in (complexity, churn): re-ranking never
/// needs a re-index.
pub fn hotspot_score(complexity: i64, churn: f64) -> f64 {
    complexity.max(0) as f64 * (1.0 + churn.max(0.0).sqrt())
}

/// Score and order candidate rows: score descending, then qualified name.
/// The sort is stable, so identical rows keep store order.
pub fn rank(mut rows: Vec<Hotspot>, top_k: usize) -> Vec<Hotspot> {
    for row in rows.iter_mut() {
        row.score = hotspot_score(row.complexity, row.churn);
    }
    rows.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.qualified_name.cmp(&b.qualified_name))
    });
    rows.truncate(top_k);
    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(name: &str, complexity: i64, churn: f64) -> Hotspot {
        Hotspot {
            qualified_name: name.to_string(),
            file: "m.py".to_string(),
            line: 1,
            complexity,
            churn,
            score: 0.0,
        }
    }

    #[test]
    fn score_is_monotonic_in_both_inputs() {
        let base = hotspot_score(3, 4.0);
        assert_eq!(base, 9.0);
        assert!(hotspot_score(4, 4.0) > base);
        assert!(hotspot_score(3, 9.0) > base);
        assert_eq!(hotspot_score(2, 0.0), 2.0);
        assert_eq!(hotspot_score(0, 100.0), 0.0);
    }

    #[test]
    fn negative_inputs_are_clamped() {
        assert_eq!(hotspot_score(-5, -1.0), 0.0);
    }

    #[test]
    fn ranks_by_score_then_name() {
        let ranked = rank(
            vec![
                row("m.b", 2, 0.0),
                row("m.a", 2, 0.0),
                row("m.big", 10, 1.0),
                row("m.small", 1, 0.0),
            ],
            3,
        );
        let names: Vec<_> = ranked.iter().map(|h| h.qualified_name.as_str()).collect();
        assert_eq!(names, vec!["m.big", "m.a", "m.b"]);
        assert_eq!(ranked[0].score, 20.0);
    }
}
