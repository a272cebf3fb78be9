//! Deterministic fold assignment from a grouping feature.

use tracing::{debug, info};

use super::{CvError, FoldId};
use crate::dataset::{RecordTable, integral_value};

/// Maximum allowed `stdev(counts) / mean(counts)` across folds.
pub const MAX_FOLD_IMBALANCE: f64 = 0.05;

/// Whether fold sizes are checked after assignment (training only).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceCheck {
    Enforce,
    Skip,
}

/// Fold id for a single grouping value: `value mod n_splits`.
pub fn fold_for_value(value: f64, n_splits: usize) -> Result<FoldId, CvError> {
    if n_splits == 0 {
        return Err(CvError::Configuration(
            "n_splits should be a positive integer, got 0".to_string(),
        ));
    }
    let Some(group) = integral_value(value) else {
        return Err(CvError::Data(format!(
            "grouping value {value} is not an integer"
        )));
    };
    let fold = group.rem_euclid(n_splits as i64);
    Ok(FoldId(fold as u32))
}

/// Assign a fold id to every record of `table`.
///
/// With `n_splits == 1` every record lands in fold `0` and the grouping feature is not read.
pub fn assign_folds(
    table: &RecordTable,
    grouping_feature: &str,
    n_splits: usize,
    balance: BalanceCheck,
) -> Result<Vec<FoldId>, CvError> {
    if n_splits == 0 {
        return Err(CvError::Configuration(
            "n_splits should be a positive integer, got 0".to_string(),
        ));
    }
    if n_splits == 1 {
        return Ok(vec![FoldId(0); table.len()]);
    }
    let values = table.column(grouping_feature).ok_or_else(|| {
        CvError::Configuration(format!(
            "grouping feature {grouping_feature} is not present in the input"
        ))
    })?;

    let fold_ids = values
        .iter()
        .enumerate()
        .map(|(row, &value)| {
            fold_for_value(value, n_splits).map_err(|err| match err {
                CvError::Data(_) => CvError::Data(format!(
                    "grouping feature {grouping_feature} holds non-integral value {value} for record {}",
                    table.key(row)
                )),
                other => other,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let counts = fold_counts(&fold_ids, n_splits);
    debug!(?counts, "fold sizes for {grouping_feature}");
    if balance == BalanceCheck::Enforce {
        check_balance(&counts)?;
        info!(
            "Split {} records into {n_splits} folds over values of {grouping_feature}",
            table.len()
        );
    }
    Ok(fold_ids)
}

/// Number of records per fold id in `0..n_splits`, empty folds included.
pub fn fold_counts(fold_ids: &[FoldId], n_splits: usize) -> Vec<usize> {
    let mut counts = vec![0usize; n_splits];
    for fold in fold_ids {
        if let Some(count) = counts.get_mut(fold.index()) {
            *count += 1;
        }
    }
    counts
}

/// Population standard deviation of `counts` divided by their mean.
pub fn relative_imbalance(counts: &[usize]) -> f64 {
    if counts.is_empty() {
        return 0.0;
    }
    let n = counts.len() as f64;
    let mean = counts.iter().map(|&c| c as f64).sum::<f64>() / n;
    if mean == 0.0 {
        return 0.0;
    }
    let variance = counts
        .iter()
        .map(|&c| {
            let diff = c as f64 - mean;
            diff * diff
        })
        .sum::<f64>()
        / n;
    variance.sqrt() / mean
}

/// Reject fold sizes whose relative deviation exceeds [`MAX_FOLD_IMBALANCE`].
pub fn check_balance(counts: &[usize]) -> Result<(), CvError> {
    let ratio = relative_imbalance(counts);
    if ratio > MAX_FOLD_IMBALANCE {
        return Err(CvError::ImbalancedSplit {
            ratio,
            limit: MAX_FOLD_IMBALANCE,
            counts: counts.to_vec(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grouped_table(groups: Vec<f64>) -> RecordTable {
        let mut table = RecordTable::with_row_keys(groups.len());
        table.push_column("evt", groups).unwrap();
        table
    }

    #[test]
    fn fold_is_grouping_value_mod_n() {
        let table = grouped_table(vec![0.0, 1.0, 2.0, 3.0, 7.0, 12.0]);
        let folds = assign_folds(&table, "evt", 3, BalanceCheck::Skip).unwrap();
        let raw: Vec<u32> = folds.iter().map(|f| f.0).collect();
        assert_eq!(raw, vec![0, 1, 2, 0, 1, 0]);
    }

    #[test]
    fn negative_groups_use_euclidean_remainder() {
        assert_eq!(fold_for_value(-1.0, 4).unwrap(), FoldId(3));
    }

    #[test]
    fn zero_splits_is_configuration_error() {
        let table = grouped_table(vec![1.0]);
        let err = assign_folds(&table, "evt", 0, BalanceCheck::Skip).unwrap_err();
        assert!(matches!(err, CvError::Configuration(_)));
    }

    #[test]
    fn fractional_group_is_data_error() {
        let table = grouped_table(vec![1.0, 2.5]);
        let err = assign_folds(&table, "evt", 2, BalanceCheck::Skip).unwrap_err();
        assert!(matches!(err, CvError::Data(_)));
    }

    #[test]
    fn missing_grouping_column_is_configuration_error() {
        let table = grouped_table(vec![1.0]);
        let err = assign_folds(&table, "run", 2, BalanceCheck::Skip).unwrap_err();
        assert!(matches!(err, CvError::Configuration(_)));
    }

    #[test]
    fn single_split_assigns_zero_without_grouping_column() {
        let table = RecordTable::with_row_keys(3);
        let folds = assign_folds(&table, "absent", 1, BalanceCheck::Enforce).unwrap();
        assert_eq!(folds, vec![FoldId(0); 3]);
    }

    #[test]
    fn balance_check_thresholds() {
        assert!(matches!(
            check_balance(&[1000, 1000, 50]),
            Err(CvError::ImbalancedSplit { .. })
        ));
        assert!(check_balance(&[980, 1010, 1000]).is_ok());
    }

    #[test]
    fn empty_fold_counts_towards_imbalance() {
        let table = grouped_table((0..40).map(|i| (i % 3) as f64).collect());
        let err = assign_folds(&table, "evt", 4, BalanceCheck::Enforce).unwrap_err();
        match err {
            CvError::ImbalancedSplit { counts, .. } => assert_eq!(counts[3], 0),
            other => panic!("unexpected error {other:?}"),
        }
    }
}
