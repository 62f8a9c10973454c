//! Searcher - splits a condition map into index and column scans.

use std::collections::HashSet;

use crate::common::{Error, Result, RowId};
use crate::index::{compare_bytes, Index};
use crate::table::{Column, Conditions};

/// What one step of a search plan scans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanStep {
    /// Tree search on the named index.
    Index(String),
    /// Linear scan of the named column.
    Column(String),
}

enum Target<'t> {
    Index(&'t Index),
    Column(&'t Column),
    /// A step that resolved no target. Unreachable through
    /// [`Searcher::new`], which rejects unknown columns up front.
    #[cfg_attr(not(test), allow(dead_code))]
    Nothing,
}

struct Step<'t> {
    conditions: Conditions,
    target: Target<'t>,
}

/// Conjunctive equality search over a table.
///
/// # Planning
/// ```text
/// conditions {A, B, C}
///     │
///     ├─ step 1: index covering the most of them, all its columns present
///     │          (ties: first index in table order)
///     ├─ step 2: next best index over what is left, or
///     │          the first remaining column in table order
///     └─ ...     until every condition is consumed
/// ```
/// Steps are kept in a `Vec`; each holds only the conditions it consumes.
///
/// # Execution
/// Runs from the last step back to the first. Each step's rows are
/// intersected with the rows of the steps after it, so the result is the
/// logical AND of every condition. A step with no target would union
/// instead.
pub struct Searcher<'t> {
    columns: &'t [Column],
    steps: Vec<Step<'t>>,
}

impl<'t> Searcher<'t> {
    /// Plan a search.
    ///
    /// # Errors
    /// `Error::UnresolvableCondition` if `conditions` is empty or names a
    /// column the table does not have.
    pub fn new(
        conditions: &Conditions,
        columns: &'t [Column],
        indices: &'t [Index],
    ) -> Result<Self> {
        if conditions.is_empty() {
            return Err(Error::UnresolvableCondition(
                "search needs at least one condition".into(),
            ));
        }

        let mut unknown: Vec<&String> = conditions
            .keys()
            .filter(|name| !columns.iter().any(|c| c.name() == name.as_str()))
            .collect();
        unknown.sort();
        if let Some(name) = unknown.first() {
            return Err(Error::UnresolvableCondition(format!(
                "no column named '{}'",
                name
            )));
        }

        let mut remaining = conditions.clone();
        let mut steps = Vec::new();

        while !remaining.is_empty() {
            let step = match best_index(&remaining, indices) {
                Some(index) => {
                    let consumed = index
                        .columns()
                        .iter()
                        .filter_map(|name| remaining.remove_entry(name))
                        .collect();
                    Step {
                        conditions: consumed,
                        target: Target::Index(index),
                    }
                }
                None => {
                    let column = columns
                        .iter()
                        .find(|c| remaining.contains_key(c.name()))
                        .ok_or_else(|| {
                            Error::UnresolvableCondition("condition matches no column".into())
                        })?;
                    let consumed = remaining.remove_entry(column.name()).into_iter().collect();
                    Step {
                        conditions: consumed,
                        target: Target::Column(column),
                    }
                }
            };
            steps.push(step);
        }

        let searcher = Self { columns, steps };
        tracing::debug!(plan = ?searcher.plan(), "search planned");
        Ok(searcher)
    }

    /// The scans this search will run, in plan order.
    pub fn plan(&self) -> Vec<PlanStep> {
        self.steps
            .iter()
            .filter_map(|step| match step.target {
                Target::Index(index) => Some(PlanStep::Index(index.name().to_string())),
                Target::Column(column) => Some(PlanStep::Column(column.name().to_string())),
                Target::Nothing => None,
            })
            .collect()
    }

    /// Run the plan. Row ordinals come back sorted.
    pub fn search(&self) -> Result<Vec<RowId>> {
        let mut rest: Option<HashSet<RowId>> = None;

        for step in self.steps.iter().rev() {
            let found = self.scan(step)?;
            rest = Some(match rest {
                None => found,
                Some(rest) => combine(found, rest, step.target.is_nothing()),
            });
        }

        let mut rows: Vec<RowId> = rest.unwrap_or_default().into_iter().collect();
        rows.sort();
        Ok(rows)
    }

    fn scan(&self, step: &Step<'t>) -> Result<HashSet<RowId>> {
        match step.target {
            Target::Index(index) => Ok(index
                .search(self.columns, &step.conditions)?
                .into_iter()
                .collect()),
            Target::Column(column) => column_scan(column, &step.conditions),
            Target::Nothing => Ok(HashSet::new()),
        }
    }
}

impl Target<'_> {
    fn is_nothing(&self) -> bool {
        matches!(self, Target::Nothing)
    }
}

/// Index covering the most conditions; every column of the index must have
/// a condition. The first index wins a tie.
fn best_index<'t>(conditions: &Conditions, indices: &'t [Index]) -> Option<&'t Index> {
    let mut best: Option<(&Index, usize)> = None;

    for index in indices {
        let covered = index.columns().len();
        let usable = covered > 0 && index.columns().iter().all(|c| conditions.contains_key(c));
        if !usable {
            continue;
        }
        if best.map_or(true, |(_, count)| covered > count) {
            best = Some((index, covered));
        }
    }

    best.map(|(index, _)| index)
}

fn column_scan(column: &Column, conditions: &Conditions) -> Result<HashSet<RowId>> {
    let mut found = HashSet::new();
    let Some(value) = conditions.get(column.name()) else {
        return Ok(found);
    };
    let wanted = column.encode(value)?;

    for row in (0..column.cell_count()).map(RowId::new) {
        let stored = column.read_bytes(row)?;
        if compare_bytes(&stored, &wanted).is_eq() {
            found.insert(row);
        }
    }
    Ok(found)
}

fn combine(found: HashSet<RowId>, rest: HashSet<RowId>, union: bool) -> HashSet<RowId> {
    if union {
        found.union(&rest).copied().collect()
    } else {
        found.intersection(&rest).copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::IndexOptions;
    use crate::storage::MemoryStorage;
    use crate::value::{BincodeCodec, Value, ValueCodec};
    use std::sync::Arc;

    struct Fixture {
        columns: Vec<Column>,
        indices: Vec<Index>,
    }

    /// Columns `A` (i % 2), `B` (i % 3), `C` (i); 12 rows.
    fn fixture(storage: &MemoryStorage, indexed: &[(&str, &[&str])]) -> Fixture {
        let codec: Arc<dyn ValueCodec> = Arc::new(BincodeCodec);
        let mut columns: Vec<Column> = ["A", "B", "C"]
            .iter()
            .map(|n| Column::create(storage, "T", n, 0, codec.clone()).unwrap())
            .collect();
        for i in 0..12i64 {
            columns[0].insert(&Value::Int(i % 2)).unwrap();
            columns[1].insert(&Value::Int(i % 3)).unwrap();
            columns[2].insert(&Value::Int(i)).unwrap();
        }

        let indices = indexed
            .iter()
            .map(|(name, cols)| {
                let cols: Vec<String> = cols.iter().map(|c| c.to_string()).collect();
                Index::create(storage, "T", name, &cols, &columns, IndexOptions::default().degree(2))
                    .unwrap()
            })
            .collect();

        Fixture { columns, indices }
    }

    fn conditions(pairs: &[(&str, i64)]) -> Conditions {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Value::Int(*v)))
            .collect()
    }

    fn rows(ids: impl IntoIterator<Item = u32>) -> Vec<RowId> {
        ids.into_iter().map(RowId::new).collect()
    }

    #[test]
    fn test_empty_conditions_rejected() {
        let storage = MemoryStorage::new();
        let f = fixture(&storage, &[]);
        let err = Searcher::new(&Conditions::new(), &f.columns, &f.indices).err();
        assert!(matches!(err, Some(Error::UnresolvableCondition(_))));
    }

    #[test]
    fn test_unknown_column_rejected() {
        let storage = MemoryStorage::new();
        let f = fixture(&storage, &[]);
        let err = Searcher::new(&conditions(&[("A", 1), ("Z", 0)]), &f.columns, &f.indices).err();
        assert!(matches!(err, Some(Error::UnresolvableCondition(msg)) if msg.contains('Z')));
    }

    #[test]
    fn test_column_scans_in_table_order() {
        let storage = MemoryStorage::new();
        let f = fixture(&storage, &[]);
        let searcher =
            Searcher::new(&conditions(&[("B", 0), ("A", 1)]), &f.columns, &f.indices).unwrap();

        assert_eq!(
            searcher.plan(),
            vec![PlanStep::Column("A".into()), PlanStep::Column("B".into())]
        );
        assert_eq!(searcher.search().unwrap(), rows([3, 9]));
    }

    #[test]
    fn test_widest_index_wins() {
        let storage = MemoryStorage::new();
        let f = fixture(&storage, &[("IX_A", &["A"]), ("IX_AB", &["A", "B"])]);
        let searcher =
            Searcher::new(&conditions(&[("A", 0), ("B", 2)]), &f.columns, &f.indices).unwrap();

        assert_eq!(searcher.plan(), vec![PlanStep::Index("IX_AB".into())]);
        assert_eq!(searcher.search().unwrap(), rows([2, 8]));
    }

    #[test]
    fn test_index_missing_a_column_is_skipped() {
        let storage = MemoryStorage::new();
        let f = fixture(&storage, &[("IX_AB", &["A", "B"]), ("IX_C", &["C"])]);
        let searcher =
            Searcher::new(&conditions(&[("A", 1), ("C", 5)]), &f.columns, &f.indices).unwrap();

        assert_eq!(
            searcher.plan(),
            vec![PlanStep::Index("IX_C".into()), PlanStep::Column("A".into())]
        );
        assert_eq!(searcher.search().unwrap(), rows([5]));
    }

    #[test]
    fn test_tie_goes_to_first_index() {
        let storage = MemoryStorage::new();
        let f = fixture(&storage, &[("IX_B", &["B"]), ("IX_A", &["A"])]);
        let searcher =
            Searcher::new(&conditions(&[("A", 1), ("B", 1)]), &f.columns, &f.indices).unwrap();

        assert_eq!(
            searcher.plan(),
            vec![PlanStep::Index("IX_B".into()), PlanStep::Index("IX_A".into())]
        );
        assert_eq!(searcher.search().unwrap(), rows([1, 7]));
    }

    #[test]
    fn test_no_match_is_empty() {
        let storage = MemoryStorage::new();
        let f = fixture(&storage, &[("IX_C", &["C"])]);
        let searcher =
            Searcher::new(&conditions(&[("C", 4), ("A", 1)]), &f.columns, &f.indices).unwrap();
        assert!(searcher.search().unwrap().is_empty());
    }

    #[test]
    fn test_step_without_target_unions() {
        let storage = MemoryStorage::new();
        let f = fixture(&storage, &[]);

        let searcher = Searcher {
            columns: &f.columns,
            steps: vec![
                Step {
                    conditions: Conditions::new(),
                    target: Target::Nothing,
                },
                Step {
                    conditions: conditions(&[("C", 3)]),
                    target: Target::Column(&f.columns[2]),
                },
            ],
        };

        assert_eq!(searcher.plan(), vec![PlanStep::Column("C".into())]);
        assert_eq!(searcher.search().unwrap(), rows([3]));
    }

    #[test]
    fn test_combine() {
        let a: HashSet<RowId> = rows([1, 2, 3]).into_iter().collect();
        let b: HashSet<RowId> = rows([2, 3, 4]).into_iter().collect();

        let mut and: Vec<RowId> = combine(a.clone(), b.clone(), false).into_iter().collect();
        and.sort();
        assert_eq!(and, rows([2, 3]));

        let mut or: Vec<RowId> = combine(a, b, true).into_iter().collect();
        or.sort();
        assert_eq!(or, rows([1, 2, 3, 4]));
    }
}
