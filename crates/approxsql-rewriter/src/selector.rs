//! Chooses which registered sample stands in for each base table.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use approxsql_common::{SampleCatalog, SampleKind, SampleParam, SampleTypePreference, TableName};
use approxsql_ir::{Expr, Relation};

/// Chosen sample per base table. Empty means the query runs exactly.
pub type SampleSelection = BTreeMap<TableName, SampleParam>;

/// Relative distance from the preferred ratio that still counts as a match.
pub const PREFERRED_BAND: f64 = 0.2;

const DISTANCE_EPSILON: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq)]
pub struct TableCandidates {
    pub table: TableName,
    /// Compatible samples, sorted by physical sample name.
    pub samples: Vec<SampleParam>,
}

/// Per-table candidates of one query.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CandidateSet {
    pub tables: Vec<TableCandidates>,
    /// Tables that have samples, none of which fits the query.
    pub blocked: Vec<TableName>,
}

/// Lexicographic score of one combination of per-table choices.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectionScore {
    pub in_band: usize,
    pub distance: f64,
    pub columns: usize,
}

impl SelectionScore {
    fn compare(&self, other: &SelectionScore) -> Ordering {
        self.in_band
            .cmp(&other.in_band)
            .then_with(|| {
                if (self.distance - other.distance).abs() <= DISTANCE_EPSILON {
                    Ordering::Equal
                } else if self.distance < other.distance {
                    Ordering::Greater
                } else {
                    Ordering::Less
                }
            })
            .then_with(|| other.columns.cmp(&self.columns))
    }

    pub fn is_better_than(&self, other: &SelectionScore) -> bool {
        self.compare(other) == Ordering::Greater
    }
}

/// Bare column names the query groups by, lower-cased.
pub fn group_by_columns(relation: &Relation) -> Vec<String> {
    relation
        .group_by_exprs()
        .iter()
        .filter_map(Expr::column_name)
        .map(str::to_lowercase)
        .collect()
}

fn is_compatible(sample: &SampleParam, group_by: &[String]) -> bool {
    match sample.kind {
        SampleKind::Stratified => sample
            .columns
            .iter()
            .all(|c| group_by.iter().any(|g| g.eq_ignore_ascii_case(c))),
        SampleKind::Uniform | SampleKind::Universe => true,
    }
}

pub fn candidates(
    relation: &Relation,
    catalog: &dyn SampleCatalog,
    preference: SampleTypePreference,
) -> CandidateSet {
    let group_by = group_by_columns(relation);
    let mut set = CandidateSet::default();
    let mut seen: Vec<&TableName> = Vec::new();

    for table in relation.base_tables() {
        if seen.contains(&table) {
            continue;
        }
        seen.push(table);

        let registered = catalog.samples_for(table);
        if registered.is_empty() {
            continue;
        }
        let mut samples: Vec<SampleParam> = registered
            .into_iter()
            .filter(|s| preference.allows(s.kind) && is_compatible(s, &group_by))
            .collect();
        if samples.is_empty() {
            set.blocked.push(table.clone());
            continue;
        }
        samples.sort_by_key(|s| s.sample_table.to_string());
        samples.dedup_by(|a, b| a.sample_table == b.sample_table);
        set.tables.push(TableCandidates {
            table: table.clone(),
            samples,
        });
    }
    set
}

pub fn score(choice: &[&SampleParam], preferred_ratio: f64) -> SelectionScore {
    let band = PREFERRED_BAND * preferred_ratio;
    choice.iter().fold(
        SelectionScore {
            in_band: 0,
            distance: 0.0,
            columns: 0,
        },
        |acc, sample| {
            let distance = (sample.ratio - preferred_ratio).abs();
            SelectionScore {
                in_band: acc.in_band + usize::from(distance <= band + DISTANCE_EPSILON),
                distance: acc.distance + distance,
                columns: acc.columns + sample.columns.len(),
            }
        },
    )
}

/// Argmax over the cross-product of per-table candidates. Ties keep the
/// first-seen combination.
pub fn choose_best(set: &CandidateSet, preferred_ratio: f64) -> SampleSelection {
    if !set.blocked.is_empty() || set.tables.is_empty() {
        return SampleSelection::new();
    }

    let mut indices = vec![0usize; set.tables.len()];
    let mut best: Option<(SelectionScore, Vec<usize>)> = None;
    loop {
        let choice: Vec<&SampleParam> = set
            .tables
            .iter()
            .zip(&indices)
            .map(|(t, &i)| &t.samples[i])
            .collect();
        let current = score(&choice, preferred_ratio);
        if best
            .as_ref()
            .is_none_or(|(best_score, _)| current.is_better_than(best_score))
        {
            best = Some((current, indices.clone()));
        }

        let mut position = indices.len();
        loop {
            if position == 0 {
                return match best {
                    Some((_, chosen)) => set
                        .tables
                        .iter()
                        .zip(chosen)
                        .map(|(t, i)| (t.table.clone(), t.samples[i].clone()))
                        .collect(),
                    None => SampleSelection::new(),
                };
            }
            position -= 1;
            indices[position] += 1;
            if indices[position] < set.tables[position].samples.len() {
                break;
            }
            indices[position] = 0;
        }
    }
}

/// Candidate generation followed by reduction.
pub fn select_samples(
    relation: &Relation,
    catalog: &dyn SampleCatalog,
    preference: SampleTypePreference,
    preferred_ratio: f64,
) -> SampleSelection {
    let set = candidates(relation, catalog, preference);
    if !set.blocked.is_empty() {
        log::debug!(
            "no compatible sample for {}; running exactly",
            set.blocked
                .iter()
                .map(|t| t.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
        return SampleSelection::new();
    }
    let selection = choose_best(&set, preferred_ratio);
    for (table, sample) in &selection {
        log::debug!("selected {} for {}", sample.sample_table, table);
    }
    selection
}

#[cfg(test)]
mod tests {
    use approxsql_common::{InMemoryCatalog, SampleSizeInfo};
    use approxsql_ir::AliasGenerator;
    use proptest::prelude::*;

    use super::*;

    fn sample(table: &str, kind: SampleKind, columns: &[&str], ratio: f64) -> SampleParam {
        SampleParam::new(
            TableName::bare(table),
            kind,
            columns.iter().map(|c| c.to_string()).collect(),
            ratio,
            None,
        )
        .unwrap()
    }

    fn catalog(samples: &[SampleParam]) -> InMemoryCatalog {
        samples.iter().fold(InMemoryCatalog::new(), |c, s| {
            c.with_sample(s.clone(), SampleSizeInfo::new(1_000, 100_000))
        })
    }

    fn relation(sql: &str) -> Relation {
        approxsql_parser::parse_and_build(sql, &mut AliasGenerator::default()).unwrap()
    }

    #[test]
    fn test_preferred_ratio_wins_over_registration_order() {
        let samples = [
            sample("orders", SampleKind::Uniform, &[], 0.01),
            sample("orders", SampleKind::Uniform, &[], 0.05),
        ];
        let chosen = select_samples(
            &relation("SELECT SUM(amount) FROM orders"),
            &catalog(&samples),
            SampleTypePreference::Any,
            0.05,
        );
        assert_eq!(chosen[&TableName::bare("orders")].ratio, 0.05);
    }

    #[test]
    fn test_band_then_general_sample() {
        let stratified = sample("orders", SampleKind::Stratified, &["status"], 0.01);
        let uniform = sample("orders", SampleKind::Uniform, &[], 0.01);
        let chosen = select_samples(
            &relation("SELECT status, COUNT(*) FROM orders GROUP BY status"),
            &catalog(&[stratified, uniform.clone()]),
            SampleTypePreference::Any,
            0.01,
        );
        assert_eq!(chosen[&TableName::bare("orders")], uniform);
    }

    #[test]
    fn test_stratified_needs_group_by_superset() {
        let stratified = sample("orders", SampleKind::Stratified, &["status", "region"], 0.01);
        let set = candidates(
            &relation("SELECT status, COUNT(*) FROM orders GROUP BY status"),
            &catalog(std::slice::from_ref(&stratified)),
            SampleTypePreference::Any,
        );
        assert_eq!(set.blocked, vec![TableName::bare("orders")]);
        assert!(choose_best(&set, 0.01).is_empty());

        let set = candidates(
            &relation("SELECT region, status, COUNT(*) FROM orders GROUP BY REGION, status"),
            &catalog(&[stratified]),
            SampleTypePreference::Any,
        );
        assert!(set.blocked.is_empty());
        assert_eq!(set.tables[0].samples.len(), 1);
    }

    #[test]
    fn test_tables_without_samples_run_exactly() {
        let samples = [sample("lineitem", SampleKind::Uniform, &[], 0.01)];
        let chosen = select_samples(
            &relation("SELECT COUNT(*) FROM lineitem l, nation n WHERE l.nk = n.nk"),
            &catalog(&samples),
            SampleTypePreference::Any,
            0.01,
        );
        assert_eq!(chosen.len(), 1);
        assert!(chosen.contains_key(&TableName::bare("lineitem")));
    }

    #[test]
    fn test_type_preference_filters() {
        let samples = [
            sample("orders", SampleKind::Uniform, &[], 0.01),
            sample("orders", SampleKind::Universe, &["custkey"], 0.01),
        ];
        let chosen = select_samples(
            &relation("SELECT COUNT(*) FROM orders"),
            &catalog(&samples),
            SampleTypePreference::Universe,
            0.01,
        );
        assert_eq!(chosen[&TableName::bare("orders")].kind, SampleKind::Universe);
    }

    #[test]
    fn test_out_of_band_picks_nearest() {
        let samples = [
            sample("t", SampleKind::Uniform, &[], 0.5),
            sample("t", SampleKind::Uniform, &[], 0.1),
        ];
        let chosen = select_samples(
            &relation("SELECT COUNT(*) FROM t"),
            &catalog(&samples),
            SampleTypePreference::Any,
            0.01,
        );
        assert_eq!(chosen[&TableName::bare("t")].ratio, 0.1);
    }

    #[test]
    fn test_score_ordering() {
        let a = sample("t", SampleKind::Uniform, &[], 0.011);
        let b = sample("t", SampleKind::Universe, &["k"], 0.011);
        let far = sample("t", SampleKind::Uniform, &[], 0.1);
        assert!(score(&[&a], 0.01).is_better_than(&score(&[&b], 0.01)));
        assert!(score(&[&b], 0.01).is_better_than(&score(&[&far], 0.01)));
        assert!(!score(&[&a], 0.01).is_better_than(&score(&[&a], 0.01)));
    }

    /// Samples over `orders` and `customer`, in registration order and shuffled.
    fn registration_orders() -> impl Strategy<Value = (Vec<SampleParam>, Vec<SampleParam>)> {
        proptest::collection::vec(1u32..100, 1..6).prop_flat_map(|ratios| {
            let samples: Vec<SampleParam> = ratios
                .iter()
                .flat_map(|r| {
                    let ratio = *r as f64 / 100.0;
                    vec![
                        sample("orders", SampleKind::Uniform, &[], ratio),
                        sample("customer", SampleKind::Universe, &["custkey"], ratio),
                    ]
                })
                .collect();
            (Just(samples.clone()), Just(samples).prop_shuffle())
        })
    }

    proptest! {
        #[test]
        fn prop_selection_ignores_catalog_order(
            (samples, shuffled) in registration_orders(),
            preferred in 1u32..100,
        ) {
            let query = relation(
                "SELECT COUNT(*) FROM orders o, customer c WHERE o.custkey = c.custkey",
            );
            let preferred = preferred as f64 / 100.0;
            let forward = select_samples(&query, &catalog(&samples), SampleTypePreference::Any, preferred);
            let reordered = select_samples(&query, &catalog(&shuffled), SampleTypePreference::Any, preferred);
            prop_assert_eq!(forward, reordered);
        }
    }
}
