//! Fold-routed scoring of a record table into a keyed prediction table.

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, info, warn};

use super::{CvError, FoldEnsemble, FoldId};
use crate::dataset::{RecordKey, RecordTable};
use crate::ml::Predictor;

/// How the scores in a table were produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scoring {
    /// Every record was scored by the model that excluded its fold.
    CrossFold,
    /// A single holdout model scored every record, including its own training records.
    /// Scores of those records are optimistic.
    Holdout,
}

/// Row order of a [`PredictionTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOrder {
    /// Ascending fold id, then input position.
    Aggregation,
    /// Reindexed to an externally supplied key sequence.
    Canonical,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PredictionRow {
    pub key: RecordKey,
    pub fold: FoldId,
    pub scores: Vec<f64>,
    /// Values of the passthrough columns, in table column order.
    pub passthrough: Vec<f64>,
}

/// Predictions keyed by record identity; at most one row per key.
#[derive(Debug, Clone)]
pub struct PredictionTable {
    key_columns: Vec<String>,
    score_columns: Vec<String>,
    passthrough_columns: Vec<String>,
    scoring: Scoring,
    order: RowOrder,
    rows: Vec<PredictionRow>,
    index: HashMap<RecordKey, usize>,
}

impl PredictionTable {
    pub fn new(
        key_columns: Vec<String>,
        n_outputs: usize,
        passthrough_columns: Vec<String>,
        scoring: Scoring,
    ) -> Self {
        Self {
            key_columns,
            score_columns: score_column_names(n_outputs),
            passthrough_columns,
            scoring,
            order: RowOrder::Aggregation,
            rows: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Append a row; a repeated key is a data error.
    pub fn push(&mut self, row: PredictionRow) -> Result<(), CvError> {
        if row.scores.len() != self.score_columns.len() {
            return Err(CvError::SchemaMismatch {
                fold: row.fold,
                detail: format!(
                    "model produced {} scores, table expects {}",
                    row.scores.len(),
                    self.score_columns.len()
                ),
            });
        }
        if row.passthrough.len() != self.passthrough_columns.len() {
            return Err(CvError::InternalConsistency(format!(
                "row {} carries {} passthrough values, table expects {}",
                row.key,
                row.passthrough.len(),
                self.passthrough_columns.len()
            )));
        }
        if self.index.contains_key(&row.key) {
            return Err(CvError::Data(format!(
                "record key {} appears more than once",
                row.key
            )));
        }
        self.index.insert(row.key.clone(), self.rows.len());
        self.rows.push(row);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[PredictionRow] {
        &self.rows
    }

    pub fn get(&self, key: &RecordKey) -> Option<&PredictionRow> {
        self.index.get(key).map(|&pos| &self.rows[pos])
    }

    pub fn position(&self, key: &RecordKey) -> Option<usize> {
        self.index.get(key).copied()
    }

    pub fn keys(&self) -> impl Iterator<Item = &RecordKey> {
        self.rows.iter().map(|row| &row.key)
    }

    pub fn key_columns(&self) -> &[String] {
        &self.key_columns
    }

    /// `pred` for single-output models, `pred_class_{k}` otherwise.
    pub fn score_columns(&self) -> &[String] {
        &self.score_columns
    }

    pub fn passthrough_columns(&self) -> &[String] {
        &self.passthrough_columns
    }

    pub fn scoring(&self) -> Scoring {
        self.scoring
    }

    pub fn order(&self) -> RowOrder {
        self.order
    }

    /// Rebuild the rows in the order given by `positions`, a permutation of row positions.
    pub(super) fn reorder(&mut self, positions: &[usize], order: RowOrder) {
        let rows: Vec<PredictionRow> = positions.iter().map(|&pos| self.rows[pos].clone()).collect();
        self.index = rows
            .iter()
            .enumerate()
            .map(|(pos, row)| (row.key.clone(), pos))
            .collect();
        self.rows = rows;
        self.order = order;
    }
}

fn score_column_names(n_outputs: usize) -> Vec<String> {
    if n_outputs == 1 {
        vec!["pred".to_string()]
    } else {
        (0..n_outputs).map(|k| format!("pred_class_{k}")).collect()
    }
}

/// Score every record of `table` with the model its fold id routes to.
///
/// `fold_ids` must be aligned with the table rows. Features are looked up by name, so the
/// input may order its columns differently from the models. `passthrough` columns are
/// copied through unchanged.
pub fn aggregate<M: Predictor>(
    table: &RecordTable,
    fold_ids: &[FoldId],
    ensemble: &FoldEnsemble<M>,
    passthrough: &[String],
) -> Result<PredictionTable, CvError> {
    if fold_ids.len() != table.len() {
        return Err(CvError::InternalConsistency(format!(
            "{} fold ids for {} records",
            fold_ids.len(),
            table.len()
        )));
    }
    let n_outputs = ensemble_outputs(ensemble)?;
    let passthrough_index = passthrough
        .iter()
        .map(|name| {
            table.column_index(name).ok_or_else(|| {
                CvError::Configuration(format!("passthrough column {name} is not in the input"))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut by_fold: BTreeMap<FoldId, Vec<usize>> = BTreeMap::new();
    for (row, &fold) in fold_ids.iter().enumerate() {
        by_fold.entry(fold).or_default().push(row);
    }

    let scoring = ensemble.scoring();
    if scoring == Scoring::Holdout {
        warn!(
            "Scoring {} records with a single holdout model; scores of its training records are optimistic",
            table.len()
        );
    }

    let mut predictions = PredictionTable::new(
        table.key_names().to_vec(),
        n_outputs,
        passthrough.to_vec(),
        scoring,
    );
    let mut features = Vec::new();
    for (fold, rows) in by_fold {
        let routed = ensemble.route(fold)?;
        let feature_index = resolve_features(table, &routed.model, fold)?;
        debug!(fold = fold.0, records = rows.len(), "scoring fold");
        for row in rows {
            features.clear();
            features.extend(feature_index.iter().map(|&col| table.value(row, col)));
            predictions.push(PredictionRow {
                key: table.key(row).clone(),
                fold,
                scores: routed.model.predict_row(&features),
                passthrough: passthrough_index
                    .iter()
                    .map(|&col| table.value(row, col))
                    .collect(),
            })?;
        }
    }
    info!(
        "Aggregated {} predictions from {} models",
        predictions.len(),
        ensemble.len()
    );
    Ok(predictions)
}

fn ensemble_outputs<M: Predictor>(ensemble: &FoldEnsemble<M>) -> Result<usize, CvError> {
    let mut models = ensemble.models();
    let first = models.next().ok_or(CvError::MissingModel(FoldId(0)))?;
    let n_outputs = first.model.n_outputs();
    for other in models {
        if other.model.n_outputs() != n_outputs {
            return Err(CvError::SchemaMismatch {
                fold: other.excluded_fold,
                detail: format!(
                    "model produces {} scores while fold {} produces {n_outputs}",
                    other.model.n_outputs(),
                    first.excluded_fold
                ),
            });
        }
    }
    Ok(n_outputs)
}

fn resolve_features<M: Predictor>(
    table: &RecordTable,
    model: &M,
    fold: FoldId,
) -> Result<Vec<usize>, CvError> {
    model
        .feature_names()
        .iter()
        .map(|name| {
            table.column_index(name).ok_or_else(|| CvError::SchemaMismatch {
                fold,
                detail: format!("feature {name} is absent from the input"),
            })
        })
        .collect()
}
