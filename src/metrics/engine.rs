use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use serde::{Deserialize, Deserializer, Serialize};

use crate::data::Batch;
use crate::error::{Result, SegError};
use crate::metrics::ari::adjusted_rand_index;
use crate::metrics::confusion::{drc_sums, ConfusionMatrix};
use crate::metrics::segcover::average_segcover;
use crate::network::model::{Mode, ModeGuard, SegmentationModel};
use crate::util::format_time;

/// Scores the engine knows how to compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Metric {
    PixelAccuracy,
    Iou,
    MeanIou,
    DrcIou,
    DrcDice,
    Ari,
    Msc,
}

impl Metric {
    pub const ALL: [Metric; 7] = [
        Metric::PixelAccuracy,
        Metric::Iou,
        Metric::MeanIou,
        Metric::DrcIou,
        Metric::DrcDice,
        Metric::Ari,
        Metric::Msc,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Metric::PixelAccuracy => "pACC",
            Metric::Iou => "IoU",
            Metric::MeanIou => "mIoU",
            Metric::DrcIou => "DRC_IoU",
            Metric::DrcDice => "DRC_DICE",
            Metric::Ari => "ARI",
            Metric::Msc => "MSC",
        }
    }

    /// Parses every name, failing on the first unknown one.
    pub fn parse_all<S: AsRef<str>>(names: &[S]) -> Result<Vec<Metric>> {
        names.iter().map(|n| n.as_ref().parse()).collect()
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Metric {
    type Err = SegError;

    fn from_str(s: &str) -> Result<Self> {
        Metric::ALL
            .into_iter()
            .find(|m| m.name() == s)
            .ok_or_else(|| SegError::UnsupportedMetric(s.to_string()))
    }
}

/// Outcome of one evaluation pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricResultBundle {
    #[serde(deserialize_with = "nullable_scores")]
    pub results: BTreeMap<String, f64>,
    pub metrics: Vec<String>,
    pub total_time: f64,
    pub total_time_str: String,
}

impl MetricResultBundle {
    pub fn get(&self, metric: &str) -> Option<f64> {
        self.results.get(metric).copied()
    }
}

/// serde_json writes non-finite floats as `null`; read those back as NaN.
pub(crate) fn nullable_scores<'de, D>(deserializer: D) -> std::result::Result<BTreeMap<String, f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<String, Option<f64>>::deserialize(deserializer)?;
    Ok(raw.into_iter().map(|(k, v)| (k, v.unwrap_or(f64::NAN))).collect())
}

/// Runs `model` over every batch and scores its hard predictions.
///
/// The model is switched to eval mode for the pass and its previous mode is
/// restored on return, including when a batch fails. `DRC_IoU` and
/// `DRC_DICE` are always reported; everything else only when requested.
pub fn evaluate<M, I, S>(model: &mut M, batches: I, metrics: &[S]) -> Result<MetricResultBundle>
where
    M: SegmentationModel + ?Sized,
    I: IntoIterator<Item = Result<Batch>>,
    S: AsRef<str>,
{
    let start = Instant::now();
    let requested = Metric::parse_all(metrics)?;
    let wants = |m: Metric| requested.contains(&m);

    let mut model = ModeGuard::new(model, Mode::Eval);
    let mut confusion = ConfusionMatrix::new(model.num_classes());
    let mut iou_sum = 0.0;
    let mut dice_sum = 0.0;
    let mut count = 0usize;
    let mut ari = Vec::new();
    let mut msc = Vec::new();

    for batch in batches {
        let batch = batch?;
        let pred = model.predict(&batch.images)?;
        let gt = &batch.masks;
        confusion.accumulate(&pred, gt)?;

        let (iou, dice) = drc_sums(&pred, gt);
        iou_sum += iou;
        dice_sum += dice;
        count += pred.n;

        if wants(Metric::Ari) {
            ari.push(adjusted_rand_index(&gt.data, &pred.data));
        }
        if wants(Metric::Msc) {
            msc.push(average_segcover(gt, &pred).mean);
        }
    }
    drop(model);

    let mut results = BTreeMap::new();
    if wants(Metric::PixelAccuracy) {
        results.insert(Metric::PixelAccuracy.to_string(), confusion.pixel_accuracy());
    }
    if wants(Metric::Iou) || wants(Metric::MeanIou) {
        let iou = confusion.iou_per_class();
        if wants(Metric::Iou) {
            results.insert(Metric::Iou.to_string(), iou.get(1).copied().unwrap_or(f64::NAN));
        }
        if wants(Metric::MeanIou) {
            results.insert(Metric::MeanIou.to_string(), mean(&iou));
        }
    }
    results.insert(Metric::DrcIou.to_string(), iou_sum / count as f64);
    results.insert(Metric::DrcDice.to_string(), dice_sum / count as f64);
    if wants(Metric::Ari) {
        results.insert(Metric::Ari.to_string(), mean(&ari));
    }
    if wants(Metric::Msc) {
        results.insert(Metric::Msc.to_string(), mean(&msc));
    }

    let total_time = start.elapsed().as_secs_f64();
    Ok(MetricResultBundle {
        results,
        metrics: metrics.iter().map(|m| m.as_ref().to_string()).collect(),
        total_time,
        total_time_str: format_time(total_time),
    })
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}
