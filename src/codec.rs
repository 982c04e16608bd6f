//! Encoding of a [`HistoryDocument`] as the script consumed by the static
//! dashboard page.
//!
//! # Format
//!
//! ```text
//! window.BENCHMARK_DATA = {
//!   "lastUpdate": 1696025833936,
//!   "repoUrl": "...",
//!   "entries": { "<suite>": [ <entry>, ... ] }
//! }
//! ```
//!
//! The JSON body is pretty-printed with two-space indentation and carries no
//! trailing semicolon. Decoding also accepts a trailing `;` and a bare JSON
//! object.

use std::fs;
use std::path::Path;

use crate::error::{CorruptDataError, Error, StorageError};
use crate::schema::HistoryDocument;

/// Global variable the dashboard script reads.
pub const DEFAULT_VARIABLE: &str = "window.BENCHMARK_DATA";

pub fn encode(doc: &HistoryDocument, variable: &str) -> serde_json::Result<Vec<u8>> {
    let json = serde_json::to_string_pretty(doc)?;
    let mut out = String::with_capacity(variable.len() + 3 + json.len());
    out.push_str(variable);
    out.push_str(" = ");
    out.push_str(&json);
    Ok(out.into_bytes())
}

pub fn decode(bytes: &[u8], variable: &str) -> Result<HistoryDocument, CorruptDataError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| CorruptDataError::new(format!("not valid UTF-8: {e}")))?;
    let body = json_body(text, variable)?;

    serde_json::from_str(body).map_err(|e| CorruptDataError::new(e.to_string()))
}

/// Load a history file without going through a store.
pub fn read_file(path: &Path, variable: &str) -> Result<HistoryDocument, Error> {
    let bytes = fs::read(path).map_err(StorageError::Io)?;
    Ok(decode(&bytes, variable)?)
}

fn json_body<'a>(text: &'a str, variable: &str) -> Result<&'a str, CorruptDataError> {
    let text = text.trim();
    if text.starts_with('{') {
        return Ok(text);
    }

    let rest = text
        .strip_prefix(variable)
        .and_then(|r| r.trim_start().strip_prefix('='))
        .ok_or_else(|| CorruptDataError::new(format!("expected assignment to `{variable}`")))?;

    let rest = rest.trim();
    Ok(rest.strip_suffix(';').map(str::trim_end).unwrap_or(rest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::fixtures;

    const FLUENTD: &str = r#"window.BENCHMARK_DATA = {
  "lastUpdate": 1696025833936,
  "repoUrl": "https://github.com/aws/shim-loggers-for-containerd",
  "entries": {
    "Benchmark for fluentd": [
      {
        "commit": {
          "author": {
            "email": "ningziwe@amazon.com",
            "name": "Ziwen Ning",
            "username": "ningziwen"
          },
          "committer": {
            "email": "noreply@github.com",
            "name": "GitHub",
            "username": "web-flow"
          },
          "distinct": true,
          "id": "d03a1489d3c2d44645260123e40e106ea89a4977",
          "message": "ci: add basic benchmarking (#82)\n\nSigned-off-by: Ziwen Ning <ningziwe@amazon.com>",
          "timestamp": "2023-09-29T15:15:33-07:00",
          "tree_id": "b2ed61664e0b68613dc0ae063baafe02520c112b",
          "url": "https://github.com/aws/shim-loggers-for-containerd/commit/d03a1489d3c2d44645260123e40e106ea89a4977"
        },
        "date": 1696025833179,
        "tool": "go",
        "benches": [
          {
            "name": "BenchmarkFluentd - ns/op",
            "value": 9327039149,
            "unit": "ns/op",
            "extra": "1 times\n2 procs"
          },
          {
            "name": "BenchmarkFluentd - B/op",
            "value": 40993112,
            "unit": "B/op",
            "extra": "1 times\n2 procs"
          },
          {
            "name": "BenchmarkFluentd - allocs/op",
            "value": 73526,
            "unit": "allocs/op",
            "extra": "1 times\n2 procs"
          }
        ]
      }
    ]
  }
}"#;

    #[test]
    fn decodes_dashboard_script() {
        let doc = decode(FLUENTD.as_bytes(), DEFAULT_VARIABLE).unwrap();

        assert_eq!(doc.last_update, 1696025833936);
        assert_eq!(doc.repo_url, "https://github.com/aws/shim-loggers-for-containerd");
        let suite = doc.suite("Benchmark for fluentd").unwrap();
        assert_eq!(suite.len(), 1);
        assert_eq!(suite[0].date, 1696025833179);
        let names: Vec<&str> = suite[0].benches.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(
            names,
            [
                "BenchmarkFluentd - ns/op",
                "BenchmarkFluentd - B/op",
                "BenchmarkFluentd - allocs/op"
            ]
        );
    }

    #[test]
    fn reencoding_is_byte_identical() {
        let doc = decode(FLUENTD.as_bytes(), DEFAULT_VARIABLE).unwrap();
        let bytes = encode(&doc, DEFAULT_VARIABLE).unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), FLUENTD);
    }

    #[test]
    fn persisted_document_loads_back_equal() {
        let mut doc = HistoryDocument::new("https://example.invalid/repo");
        doc.append("S1", fixtures::entry("a", 1000, "X", 100));
        doc.append("S1", fixtures::entry("b", 2000, "X", 90));
        doc.append("S2", fixtures::entry("b", 2000, "Y", 7));

        let bytes = encode(&doc, DEFAULT_VARIABLE).unwrap();
        assert_eq!(decode(&bytes, DEFAULT_VARIABLE).unwrap(), doc);
    }

    #[test]
    fn accepts_bare_json_and_trailing_semicolon() {
        let bare = FLUENTD.strip_prefix("window.BENCHMARK_DATA = ").unwrap();
        assert!(decode(bare.as_bytes(), DEFAULT_VARIABLE).is_ok());

        let with_semicolon = format!("\n{FLUENTD};\n");
        assert!(decode(with_semicolon.as_bytes(), DEFAULT_VARIABLE).is_ok());
    }

    #[test]
    fn custom_variable_name() {
        let doc = HistoryDocument::new("r");
        let bytes = encode(&doc, "var BENCH").unwrap();
        assert!(bytes.starts_with(b"var BENCH = {"));
        assert_eq!(decode(&bytes, "var BENCH").unwrap(), doc);
        assert!(decode(&bytes, DEFAULT_VARIABLE).is_err());
    }

    #[test]
    fn missing_entries_is_corrupt() {
        let text = r#"window.BENCHMARK_DATA = {"lastUpdate": 1, "repoUrl": "r"}"#;
        let err = decode(text.as_bytes(), DEFAULT_VARIABLE).unwrap_err();
        assert!(err.reason.contains("entries"), "{}", err.reason);
    }

    #[test]
    fn non_numeric_value_is_corrupt() {
        let text = FLUENTD.replace("\"value\": 73526", "\"value\": \"73526\"");
        assert!(decode(text.as_bytes(), DEFAULT_VARIABLE).is_err());
    }

    #[test]
    fn unknown_fields_survive_round_trip() {
        let text = FLUENTD
            .replace("\"tool\": \"go\",", "\"tool\": \"go\",\n        \"runner\": \"ubuntu-22.04\",")
            .replace(
                "\"unit\": \"allocs/op\",",
                "\"unit\": \"allocs/op\",\n            \"stddev\": 12.5,",
            );
        let doc = decode(text.as_bytes(), DEFAULT_VARIABLE).unwrap();
        let entry = &doc.suite("Benchmark for fluentd").unwrap()[0];
        assert_eq!(entry.unknown["runner"], "ubuntu-22.04");
        assert_eq!(entry.benches[2].unknown["stddev"], 12.5);

        let again = decode(&encode(&doc, DEFAULT_VARIABLE).unwrap(), DEFAULT_VARIABLE).unwrap();
        assert_eq!(again, doc);
    }

    #[test]
    fn garbage_is_corrupt() {
        assert!(decode(b"\xff\xfe", DEFAULT_VARIABLE).is_err());
        assert!(decode(b"const x = 1", DEFAULT_VARIABLE).is_err());
        assert!(decode(b"window.BENCHMARK_DATA = {", DEFAULT_VARIABLE).is_err());
    }
}
