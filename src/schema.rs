use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;

/// One measured metric of one benchmark execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkRun {
    pub name: String,
    /// Kept as the JSON number that was read so integer values stay integers.
    pub value: Number,
    pub unit: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<String>,

    #[serde(flatten)]
    pub unknown: Map<String, Value>,
}

impl BenchmarkRun {
    pub fn new(name: impl Into<String>, value: Number, unit: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value,
            unit: unit.into(),
            range: None,
            extra: None,
            unknown: Map::new(),
        }
    }

    pub fn with_extra(mut self, extra: impl Into<String>) -> Self {
        self.extra = Some(extra.into());
        self
    }

    pub fn value_f64(&self) -> f64 {
        // Every serde_json::Number without arbitrary_precision converts.
        self.value.as_f64().unwrap_or(f64::NAN)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    pub email: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(flatten)]
    pub unknown: Map<String, Value>,
}

impl Person {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: name.into(),
            username: None,
            unknown: Map::new(),
        }
    }
}

/// Identity of the code state that was benchmarked.
///
/// Field order matches the order consumers of the persisted script expect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitRecord {
    pub author: Person,
    pub committer: Person,
    /// `false` marks a record produced by a merge bot rather than a genuine commit.
    #[serde(default)]
    pub distinct: bool,
    pub id: String,
    pub message: String,
    pub timestamp: String,
    pub tree_id: String,
    pub url: String,

    #[serde(flatten)]
    pub unknown: Map<String, Value>,
}

/// One benchmark harness invocation tied to one commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub commit: CommitRecord,
    /// Ingestion time in epoch milliseconds. Not `commit.timestamp`.
    pub date: u64,
    pub tool: String,
    /// Declared metric order, never sorted.
    pub benches: Vec<BenchmarkRun>,

    #[serde(flatten)]
    pub unknown: Map<String, Value>,
}

impl Entry {
    pub fn new(commit: CommitRecord, date: u64, tool: impl Into<String>, benches: Vec<BenchmarkRun>) -> Self {
        Self {
            commit,
            date,
            tool: tool.into(),
            benches,
            unknown: Map::new(),
        }
    }
}

/// Entries of one suite in ingest order.
pub type Suite = Vec<Entry>;

/// Top-level persisted object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryDocument {
    pub last_update: u64,
    pub repo_url: String,
    pub entries: BTreeMap<String, Suite>,

    #[serde(flatten)]
    pub unknown: Map<String, Value>,
}

impl HistoryDocument {
    pub fn new(repo_url: impl Into<String>) -> Self {
        Self {
            last_update: 0,
            repo_url: repo_url.into(),
            entries: BTreeMap::new(),
            unknown: Map::new(),
        }
    }

    /// Append `entry` to the end of `suite`, creating the suite if needed.
    ///
    /// Existing entries are never touched; `last_update` only moves forward.
    pub fn append(&mut self, suite: &str, entry: Entry) {
        self.last_update = self.last_update.max(entry.date);
        self.entries.entry(suite.to_string()).or_default().push(entry);
    }

    pub fn suite(&self, name: &str) -> Option<&[Entry]> {
        self.entries.get(name).map(Vec::as_slice)
    }

    pub fn entry_count(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::entry;
    use super::*;

    #[test]
    fn append_creates_suite_and_tracks_last_update() {
        let mut doc = HistoryDocument::new("https://example.invalid/repo");
        doc.append("S1", entry("a", 1000, "X", 100));

        assert_eq!(doc.suite("S1").map(<[Entry]>::len), Some(1));
        assert_eq!(doc.last_update, 1000);
    }

    #[test]
    fn last_update_never_moves_backwards() {
        let mut doc = HistoryDocument::new("r");
        doc.append("S1", entry("a", 2000, "X", 1));
        doc.append("S1", entry("b", 1500, "X", 2));

        assert_eq!(doc.last_update, 2000);
        let ids: Vec<&str> = doc.suite("S1").unwrap().iter().map(|e| e.commit.id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
    }

    #[test]
    fn append_leaves_other_suites_alone() {
        let mut doc = HistoryDocument::new("r");
        doc.append("S1", entry("a", 1000, "X", 1));
        let before = doc.entries["S1"].clone();

        doc.append("S2", entry("b", 2000, "Y", 2));

        assert_eq!(doc.entries["S1"], before);
        assert_eq!(doc.entries["S2"].len(), 1);
        assert_eq!(doc.entry_count(), 2);
    }

    #[test]
    fn field_names_match_persisted_layout() {
        let mut doc = HistoryDocument::new("r");
        doc.append("S1", entry("a", 1000, "X", 100));
        let v = serde_json::to_value(&doc).unwrap();

        assert_eq!(v["lastUpdate"], 1000);
        assert_eq!(v["repoUrl"], "r");
        let e = &v["entries"]["S1"][0];
        assert_eq!(e["commit"]["tree_id"], "b2ed61664e0b68613dc0ae063baafe02520c112b");
        assert_eq!(e["tool"], "go");
        assert_eq!(e["benches"][0]["value"], 100);
        assert_eq!(e["benches"][0]["extra"], "1 times\n2 procs");
        assert!(e["benches"][0].get("range").is_none());
    }
}
