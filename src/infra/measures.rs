// ============================================================
// Layer 6 — Supervised Measurer
// ============================================================
// Aggregate statistics over (target, class probabilities) pairs.
// The predicted class of an entry is the argmax of its probs.
//
//   acc       — fraction of correct predictions
//   precision — macro average of tp / (tp + fp)
//   recall    — macro average of tp / (tp + fn)
//   f1        — macro average of 2pr / (p + r)
//   mcll      — multi-class log loss, -mean ln p[target]
//   cmdiag    — per-class recall (normalised confusion diagonal)
//   cmfull    — row-normalised confusion matrix [target][pred]
//   labels    — class names, emitted alongside cmdiag / cmfull
//   eval_loss — passed through from the evaluator (masked-LM)
//
// iteration and train_loss are always echoed from the records.
//
// Classes absent from both targets and predictions contribute 0
// to the macro averages.

use crate::domain::measure::{EvalRecords, Measure, Measures};
use crate::domain::traits::Measurer;

/// Floor applied to probabilities before taking logs
const LOG_EPS: f64 = 1e-15;

#[derive(Debug, Clone, Copy, Default)]
pub struct SupervisedMeasurer;

impl SupervisedMeasurer {
    fn confusion(records: &EvalRecords, nclasses: usize) -> Vec<Vec<f64>> {
        let mut cm = vec![vec![0.0; nclasses]; nclasses];
        for e in &records.entries {
            cm[e.target][argmax(&e.probs)] += 1.0;
        }
        cm
    }
}

impl Measurer for SupervisedMeasurer {
    fn measure(&self, records: &EvalRecords, requested: &[String]) -> Measures {
        let mut out = Measures::new();
        out.insert("iteration".to_string(), Measure::Scalar(records.iteration as f64));
        out.insert("train_loss".to_string(), Measure::Scalar(records.train_loss));
        if let Some(loss) = records.eval_loss {
            out.insert("eval_loss".to_string(), Measure::Scalar(loss));
        }
        if records.entries.is_empty() {
            return out;
        }

        let nclasses = records
            .entries
            .iter()
            .map(|e| e.probs.len().max(e.target + 1))
            .fold(records.nclasses, usize::max);
        let cm    = Self::confusion(records, nclasses);
        let total = records.entries.len() as f64;

        let row_sum = |c: usize| cm[c].iter().sum::<f64>();
        let col_sum = |c: usize| cm.iter().map(|row| row[c]).sum::<f64>();
        let ratio   = |a: f64, b: f64| if b > 0.0 { a / b } else { 0.0 };

        let recalls:    Vec<f64> = (0..nclasses).map(|c| ratio(cm[c][c], row_sum(c))).collect();
        let precisions: Vec<f64> = (0..nclasses).map(|c| ratio(cm[c][c], col_sum(c))).collect();
        let f1s: Vec<f64> = precisions
            .iter()
            .zip(&recalls)
            .map(|(&p, &r)| ratio(2.0 * p * r, p + r))
            .collect();
        let mean = |v: &[f64]| v.iter().sum::<f64>() / nclasses as f64;

        let mut with_labels = false;
        for name in requested {
            let value = match name.as_str() {
                "acc"       => Measure::Scalar((0..nclasses).map(|c| cm[c][c]).sum::<f64>() / total),
                "precision" => Measure::Scalar(mean(&precisions)),
                "recall"    => Measure::Scalar(mean(&recalls)),
                "f1"        => Measure::Scalar(mean(&f1s)),
                "mcll" => {
                    let ll: f64 = records
                        .entries
                        .iter()
                        .map(|e| e.probs.get(e.target).copied().unwrap_or(0.0).max(LOG_EPS).ln())
                        .sum();
                    Measure::Scalar(-ll / total)
                }
                "cmdiag" => {
                    with_labels = true;
                    Measure::Vector(recalls.clone())
                }
                "cmfull" => {
                    with_labels = true;
                    Measure::Matrix(
                        (0..nclasses)
                            .map(|c| cm[c].iter().map(|&v| ratio(v, row_sum(c))).collect())
                            .collect(),
                    )
                }
                "labels" => continue,
                other => {
                    tracing::warn!("Unknown measure '{}' ignored", other);
                    continue;
                }
            };
            out.insert(name.clone(), value);
        }

        if with_labels {
            let mut names = records.clnames.clone();
            names.extend((names.len()..nclasses).map(|i| i.to_string()));
            names.truncate(nclasses);
            out.insert("labels".to_string(), Measure::Labels(names));
        }
        out
    }
}

fn argmax(probs: &[f64]) -> usize {
    probs
        .iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |best, (i, &p)| if p > best.1 { (i, p) } else { best })
        .0
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::measure::EvalEntry;
    use approx::assert_abs_diff_eq;

    fn records() -> EvalRecords {
        // targets 0,0,1,1 ; predictions 0,1,1,1
        let entries = vec![
            EvalEntry { target: 0, probs: vec![0.9, 0.1] },
            EvalEntry { target: 0, probs: vec![0.4, 0.6] },
            EvalEntry { target: 1, probs: vec![0.2, 0.8] },
            EvalEntry { target: 1, probs: vec![0.3, 0.7] },
        ];
        EvalRecords {
            tested:   entries.len(),
            entries,
            nclasses: 2,
            clnames:  vec!["neg".into(), "pos".into()],
            ..EvalRecords::default()
        }
    }

    fn req(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn scalar(m: &Measures, name: &str) -> f64 {
        m[name].as_scalar().unwrap()
    }

    #[test]
    fn test_accuracy_and_macro_scores() {
        let m = SupervisedMeasurer.measure(&records(), &req(&["acc", "precision", "recall", "f1"]));
        assert_abs_diff_eq!(scalar(&m, "acc"),       0.75,  epsilon = 1e-12);
        // precision: class0 1/1, class1 2/3
        assert_abs_diff_eq!(scalar(&m, "precision"), (1.0 + 2.0 / 3.0) / 2.0, epsilon = 1e-12);
        // recall: class0 1/2, class1 2/2
        assert_abs_diff_eq!(scalar(&m, "recall"),    0.75,  epsilon = 1e-12);
        assert!(!m.contains_key("labels"));
    }

    #[test]
    fn test_log_loss() {
        let m = SupervisedMeasurer.measure(&records(), &req(&["mcll"]));
        let expected = -(0.9f64.ln() + 0.4f64.ln() + 0.8f64.ln() + 0.7f64.ln()) / 4.0;
        assert_abs_diff_eq!(scalar(&m, "mcll"), expected, epsilon = 1e-12);
    }

    #[test]
    fn test_confusion_artifacts_carry_labels() {
        let m = SupervisedMeasurer.measure(&records(), &req(&["cmdiag", "cmfull"]));
        assert_eq!(m["cmdiag"], Measure::Vector(vec![0.5, 1.0]));
        assert_eq!(m["cmfull"], Measure::Matrix(vec![vec![0.5, 0.5], vec![0.0, 1.0]]));
        assert_eq!(m["labels"], Measure::Labels(vec!["neg".into(), "pos".into()]));
    }

    #[test]
    fn test_eval_loss_only_without_entries() {
        let r = EvalRecords { eval_loss: Some(2.5), ..EvalRecords::default() };
        let m = SupervisedMeasurer.measure(&r, &req(&["acc"]));
        assert_eq!(m.len(), 3);
        assert_eq!(scalar(&m, "eval_loss"), 2.5);
        assert!(!m.contains_key("acc"));
    }

    #[test]
    fn test_run_metadata_echoed() {
        let r = EvalRecords { iteration: 12, train_loss: 0.375, ..records() };
        let m = SupervisedMeasurer.measure(&r, &req(&["acc"]));
        assert_eq!(scalar(&m, "iteration"), 12.0);
        assert_eq!(scalar(&m, "train_loss"), 0.375);
    }
}
