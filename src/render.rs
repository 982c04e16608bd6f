use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use crate::schema::HistoryDocument;

/// Identity of a plotted metric.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct MetricKey {
    pub name: String,
    pub unit: String,
}

/// One `BenchmarkRun` projected for charting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Point {
    pub date: u64,
    pub commit_id: String,
    #[serde(flatten)]
    pub metric: MetricKey,
    pub value: f64,
}

/// All points of one metric, in ingest order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Series {
    #[serde(flatten)]
    pub metric: MetricKey,
    pub points: Vec<(u64, f64)>,
}

/// Project a suite into one point per benchmark run.
///
/// Points follow stored entry order and, within an entry, declared bench
/// order. An unknown suite renders as no points.
pub fn render(doc: &HistoryDocument, suite: &str) -> Vec<Point> {
    let Some(entries) = doc.suite(suite) else {
        return Vec::new();
    };

    entries
        .iter()
        .flat_map(|entry| {
            entry.benches.iter().map(move |bench| Point {
                date: entry.date,
                commit_id: entry.commit.id.clone(),
                metric: MetricKey {
                    name: bench.name.clone(),
                    unit: bench.unit.clone(),
                },
                value: bench.value_f64(),
            })
        })
        .collect()
}

/// Group rendered points per metric, metrics in first-seen order.
pub fn series(points: &[Point]) -> Vec<Series> {
    let mut index: HashMap<&MetricKey, usize> = HashMap::new();
    let mut out: Vec<Series> = Vec::new();

    for p in points {
        let slot = *index.entry(&p.metric).or_insert_with(|| {
            out.push(Series {
                metric: p.metric.clone(),
                points: Vec::new(),
            });
            out.len() - 1
        });
        out[slot].points.push((p.date, p.value));
    }
    out
}

/// Render every suite of the document.
pub fn render_all(doc: &HistoryDocument) -> BTreeMap<String, Vec<Point>> {
    doc.entries
        .par_iter()
        .map(|(name, _)| (name.clone(), render(doc, name)))
        .collect()
}
