//! Label transfer from a reference to a query through anchors.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use atacama_core::{AtacamaError, Result, Summarizable};
use atacama_ml::{knn_across, DistanceMetric};

use crate::embedding::{ensure_same_cells, Embedding};
use crate::sc_anchor::AnchorSet;

/// Configuration for [`transfer_labels`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct TransferConfig {
    /// Nearest anchors that vote for each query cell.
    pub k_weight: usize,
    /// Bandwidth of the Gaussian applied to the combined anchor weights.
    pub sd_weight: f64,
    /// Query embedding dimensions used for distances; `None` uses all.
    pub dims: Option<Vec<usize>>,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            k_weight: 50,
            sd_weight: 1.0,
            dims: None,
        }
    }
}

/// Predicted label for one query cell.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LabelPrediction {
    pub cell_id: String,
    pub label: String,
    /// Margin between the best and second-best label scores, in `[0, 1]`.
    pub confidence: f64,
    /// Score of the predicted label, in `[0, 1]`.
    pub max_score: f64,
}

/// One prediction per query cell plus the full label score matrix.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LabelTransferResult {
    predictions: Vec<LabelPrediction>,
    /// Labels reachable through anchors, sorted.
    labels: Vec<String>,
    /// Row-major `n_query × labels.len()`, rows sum to 1.
    scores: Vec<f64>,
}

impl LabelTransferResult {
    /// Predictions in query cell order.
    pub fn predictions(&self) -> &[LabelPrediction] {
        &self.predictions
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.predictions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predictions.is_empty()
    }

    /// Score of every label for query cell `cell`, in [`Self::labels`] order.
    pub fn scores(&self, cell: usize) -> &[f64] {
        let n = self.labels.len();
        &self.scores[cell * n..(cell + 1) * n]
    }

    /// Query cell ID → (label, confidence).
    pub fn to_map(&self) -> BTreeMap<String, (String, f64)> {
        self.predictions
            .iter()
            .map(|p| (p.cell_id.clone(), (p.label.clone(), p.confidence)))
            .collect()
    }
}

impl Summarizable for LabelTransferResult {
    fn summary(&self) -> String {
        let mean_conf = if self.predictions.is_empty() {
            0.0
        } else {
            self.predictions.iter().map(|p| p.confidence).sum::<f64>()
                / self.predictions.len() as f64
        };
        format!(
            "LabelTransfer: {} query cells, {} labels, mean confidence {:.3}",
            self.predictions.len(),
            self.labels.len(),
            mean_conf
        )
    }
}

/// Predict a reference label for every query cell.
///
/// Each query cell takes its `k_weight` nearest anchors, measured to the
/// anchors' query-side cells in `query_embedding`. An anchor at distance
/// `d` gets `(1 − d / d_max) · anchor.weight`, where `d_max` is the
/// distance to the farthest of those anchors; weights are passed through
/// `1 − exp(−w / (2 / sd_weight)²)` and normalized. A cell whose weights
/// all vanish splits its vote evenly among the anchors tied at the smallest
/// distance. Label scores are the summed weights; the best label wins, ties
/// going to the lexicographically smallest label.
///
/// # Errors
///
/// [`AtacamaError::InvalidInput`] for an empty anchor set or an anchored
/// reference cell without a label; [`AtacamaError::ShapeMismatch`] if the
/// query embedding does not list the anchor set's query cells in order.
pub fn transfer_labels(
    anchors: &AnchorSet,
    reference_labels: &BTreeMap<String, String>,
    query_embedding: &Embedding,
    config: &TransferConfig,
) -> Result<LabelTransferResult> {
    if anchors.is_empty() {
        return Err(AtacamaError::InvalidInput(
            "cannot transfer labels without anchors".into(),
        ));
    }
    if config.k_weight == 0 {
        return Err(AtacamaError::InvalidInput("k_weight must be at least 1".into()));
    }
    if !config.sd_weight.is_finite() || config.sd_weight <= 0.0 {
        return Err(AtacamaError::InvalidInput(format!(
            "sd_weight must be positive, got {}",
            config.sd_weight
        )));
    }
    ensure_same_cells("query embedding", anchors.query_ids(), query_embedding.cell_ids())?;
    let restricted = query_embedding.select_dims(config.dims.as_deref())?;

    let anchor_labels: Vec<&str> = anchors
        .anchors()
        .iter()
        .map(|a| {
            let id = &anchors.reference_ids()[a.reference];
            reference_labels.get(id).map(String::as_str).ok_or_else(|| {
                AtacamaError::InvalidInput(format!("reference cell '{id}' has no label"))
            })
        })
        .collect::<Result<_>>()?;
    let labels: Vec<String> = anchor_labels
        .iter()
        .copied()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(String::from)
        .collect();
    let label_index: BTreeMap<&str, usize> = labels
        .iter()
        .enumerate()
        .map(|(i, l)| (l.as_str(), i))
        .collect();
    let anchor_label: Vec<usize> = anchor_labels.iter().map(|l| label_index[l]).collect();

    let query_rows = restricted.rows();
    let anchor_rows: Vec<&[f64]> = anchors
        .anchors()
        .iter()
        .map(|a| restricted.row(a.query))
        .collect();
    let nearest = knn_across(
        &query_rows,
        &anchor_rows,
        config.k_weight,
        DistanceMetric::Euclidean,
    )?;

    let bandwidth = (2.0 / config.sd_weight).powi(2);
    let n_labels = labels.len();
    let mut scores = vec![0.0; query_rows.len() * n_labels];
    let mut predictions = Vec::with_capacity(query_rows.len());

    for (i, list) in nearest.iter().enumerate() {
        let d_max = list.last().map_or(0.0, |&(_, d)| d);
        let mut weights: Vec<f64> = list
            .iter()
            .map(|&(a, d)| {
                let closeness = if d_max > 0.0 { 1.0 - d / d_max } else { 1.0 };
                let w = closeness * anchors.anchors()[a].weight;
                1.0 - (-w / bandwidth).exp()
            })
            .collect();
        let total: f64 = weights.iter().sum();
        if total > 0.0 {
            weights.iter_mut().for_each(|w| *w /= total);
        } else {
            // Every anchor sits at d_max: share the vote among the nearest ones.
            let d_min = list.first().map_or(0.0, |&(_, d)| d);
            let tied = list.iter().take_while(|&&(_, d)| d <= d_min).count();
            for (k, w) in weights.iter_mut().enumerate() {
                *w = if k < tied { 1.0 / tied as f64 } else { 0.0 };
            }
        }

        let row = &mut scores[i * n_labels..(i + 1) * n_labels];
        for (&(a, _), &w) in list.iter().zip(&weights) {
            row[anchor_label[a]] += w;
        }

        let mut best = 0;
        for l in 1..n_labels {
            if row[l] > row[best] {
                best = l;
            }
        }
        let second = (0..n_labels)
            .filter(|&l| l != best)
            .map(|l| row[l])
            .fold(0.0, f64::max);
        let max_score = row[best].clamp(0.0, 1.0);
        predictions.push(LabelPrediction {
            cell_id: restricted.cell_ids()[i].clone(),
            label: labels[best].clone(),
            confidence: (max_score - second).clamp(0.0, 1.0),
            max_score,
        });
    }

    debug!(
        n_query = predictions.len(),
        n_anchors = anchors.len(),
        n_labels,
        "transferred labels"
    );
    Ok(LabelTransferResult {
        predictions,
        labels,
        scores,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sc_anchor::tests::{lsi_embedding, two_type_counts};
    use crate::sc_anchor::{find_anchors, Anchor, AnchorConfig};

    fn ids(prefix: &str, n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{prefix}{i}")).collect()
    }

    fn line_query(values: Vec<f64>) -> Embedding {
        let n = values.len();
        Embedding::new("lsi", ids("q", n), values, 1).unwrap()
    }

    fn anchor(reference: usize, query: usize) -> Anchor {
        Anchor {
            reference,
            query,
            score: 1.0,
            weight: 1.0,
        }
    }

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|&(c, l)| (c.to_string(), l.to_string()))
            .collect()
    }

    #[test]
    fn nearest_anchor_label_wins() {
        let query = line_query(vec![0.0, 0.2, 10.0, 10.2]);
        let set = AnchorSet::new(ids("r", 2), ids("q", 4), vec![anchor(0, 0), anchor(1, 2)]).unwrap();
        let cfg = TransferConfig {
            k_weight: 2,
            ..Default::default()
        };
        let result =
            transfer_labels(&set, &labels(&[("r0", "B"), ("r1", "T")]), &query, &cfg).unwrap();
        let predicted: Vec<&str> = result.predictions().iter().map(|p| p.label.as_str()).collect();
        assert_eq!(predicted, vec!["B", "B", "T", "T"]);
        assert!((result.predictions()[1].confidence - 1.0).abs() < 1e-12);
        assert_eq!(result.labels(), &["B".to_string(), "T".to_string()]);
        for i in 0..4 {
            assert!((result.scores(i).iter().sum::<f64>() - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn ties_go_to_smallest_label() {
        let query = line_query(vec![0.0, -1.0, 1.0, 5.0]);
        let set = AnchorSet::new(
            ids("r", 3),
            ids("q", 4),
            vec![anchor(0, 1), anchor(1, 2), anchor(2, 3)],
        )
        .unwrap();
        let cfg = TransferConfig {
            k_weight: 3,
            ..Default::default()
        };
        let result = transfer_labels(
            &set,
            &labels(&[("r0", "b"), ("r1", "a"), ("r2", "c")]),
            &query,
            &cfg,
        )
        .unwrap();
        let p = &result.predictions()[0];
        assert_eq!(p.label, "a");
        assert!(p.confidence.abs() < 1e-12);
        assert!((p.max_score - 0.5).abs() < 1e-12);
    }

    #[test]
    fn vanished_weights_follow_nearest_anchor() {
        // One anchor per query cell: d_max equals d, so every weight is 0.
        let query = line_query(vec![0.0, 3.0, 7.0]);
        let set = AnchorSet::new(ids("r", 1), ids("q", 3), vec![anchor(0, 0)]).unwrap();
        let result = transfer_labels(
            &set,
            &labels(&[("r0", "x")]),
            &query,
            &TransferConfig::default(),
        )
        .unwrap();
        assert_eq!(result.len(), 3);
        for p in result.predictions() {
            assert_eq!(p.label, "x");
            assert!((p.confidence - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn tied_anchors_split_the_vote() {
        // Both anchors land on q0; q1 sees them at the same distance.
        let query = line_query(vec![0.0, 5.0]);
        let set = AnchorSet::new(ids("r", 2), ids("q", 2), vec![anchor(0, 0), anchor(1, 0)]).unwrap();
        let cfg = TransferConfig {
            k_weight: 2,
            ..Default::default()
        };
        let result =
            transfer_labels(&set, &labels(&[("r0", "x"), ("r1", "y")]), &query, &cfg).unwrap();
        for (i, p) in result.predictions().iter().enumerate() {
            assert_eq!(p.label, "x");
            assert!(p.confidence.abs() < 1e-12, "cell {i} confidence {}", p.confidence);
            assert!((p.max_score - 0.5).abs() < 1e-12);
            assert_eq!(result.scores(i), &[0.5, 0.5]);
        }
    }

    #[test]
    fn errors() {
        let query = line_query(vec![0.0, 1.0]);
        let empty = AnchorSet::new(ids("r", 1), ids("q", 2), vec![]).unwrap();
        let cfg = TransferConfig::default();
        assert!(transfer_labels(&empty, &labels(&[("r0", "x")]), &query, &cfg).is_err());

        let set = AnchorSet::new(ids("r", 1), ids("q", 2), vec![anchor(0, 0)]).unwrap();
        assert!(matches!(
            transfer_labels(&set, &BTreeMap::new(), &query, &cfg),
            Err(AtacamaError::InvalidInput(_))
        ));

        let other = Embedding::new("lsi", ids("z", 2), vec![0.0, 1.0], 1).unwrap();
        assert!(matches!(
            transfer_labels(&set, &labels(&[("r0", "x")]), &other, &cfg),
            Err(AtacamaError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn covers_every_query_cell() {
        let (ref_raw, ref_types) = two_type_counts("r", 20, 0, 30, 11);
        let (query_raw, query_types) = two_type_counts("q", 15, 5, 30, 12);
        let reference = lsi_embedding(&ref_raw, 5);
        let query = lsi_embedding(&query_raw, 5);
        let config = AnchorConfig {
            n_components: 5,
            k_filter: Some(10),
            k_score: 10,
            ..Default::default()
        };
        let anchors = find_anchors(&reference, &ref_raw, &query, &query_raw, &config).unwrap();
        let names = ["alpha", "beta"];
        let reference_labels: BTreeMap<String, String> = ref_raw
            .cell_ids()
            .iter()
            .zip(&ref_types)
            .map(|(id, &t)| (id.clone(), names[t].to_string()))
            .collect();

        let cfg = TransferConfig {
            k_weight: 8,
            ..Default::default()
        };
        let result = transfer_labels(&anchors, &reference_labels, &query, &cfg).unwrap();
        assert_eq!(result.len(), query_raw.n_cells());
        let mut correct = 0;
        for (p, &t) in result.predictions().iter().zip(&query_types) {
            assert!((0.0..=1.0).contains(&p.confidence));
            if p.label == names[t] {
                correct += 1;
            }
        }
        assert!(correct >= 27, "{correct} of 30 correct");
        assert_eq!(result.to_map().len(), 30);
    }
}
