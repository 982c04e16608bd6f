//! Translate `go test -bench` output into benchmark runs.
//!
//! ```text
//! pkg: github.com/aws/shim-loggers-for-containerd/benchmark/fluentd
//! BenchmarkFluentd-2   	       1	9327039149 ns/op	40993112 B/op	   73526 allocs/op
//! ```
//!
//! A line with several metrics becomes one run per metric, named
//! `"<name> - <unit>"`, in the order Go printed them. `extra` records the
//! iteration count and GOMAXPROCS. When the output covers more than one
//! package, the package is appended to every name.

use serde_json::Number;

use crate::schema::BenchmarkRun;

struct Line<'a> {
    package: Option<&'a str>,
    name: &'a str,
    procs: Option<&'a str>,
    iterations: &'a str,
    metrics: Vec<(Number, &'a str)>,
}

pub fn parse(output: &str) -> Vec<BenchmarkRun> {
    let mut package = None;
    let mut packages: Vec<&str> = Vec::new();
    let mut lines = Vec::new();

    for raw in output.lines() {
        let line = raw.trim();
        if let Some(pkg) = line.strip_prefix("pkg:") {
            let pkg = pkg.trim();
            if !packages.contains(&pkg) {
                packages.push(pkg);
            }
            package = Some(pkg);
            continue;
        }
        if let Some(mut parsed) = parse_line(line) {
            parsed.package = package;
            lines.push(parsed);
        }
    }

    let tag_package = packages.len() > 1;
    let mut runs = Vec::new();
    for line in lines {
        let mut name = line.name.to_string();
        if let (true, Some(pkg)) = (tag_package, line.package) {
            name = format!("{name} ({pkg})");
        }

        let mut extra = format!("{} times", line.iterations);
        if let Some(procs) = line.procs {
            extra.push_str(&format!("\n{procs} procs"));
        }

        let single = line.metrics.len() == 1;
        for (value, unit) in line.metrics {
            let run_name = if single {
                name.clone()
            } else {
                format!("{name} - {unit}")
            };
            runs.push(BenchmarkRun::new(run_name, value, unit).with_extra(extra.clone()));
        }
    }
    runs
}

fn parse_line(line: &str) -> Option<Line<'_>> {
    if !line.starts_with("Benchmark") {
        return None;
    }

    let mut fields = line.split_whitespace();
    let (name, procs) = split_procs(fields.next()?);
    let iterations = fields.next()?;
    iterations.parse::<u64>().ok()?;

    let rest: Vec<&str> = fields.collect();
    if rest.is_empty() || rest.len() % 2 != 0 {
        return None;
    }
    let metrics = rest
        .chunks(2)
        .map(|pair| parse_number(pair[0]).map(|v| (v, pair[1])))
        .collect::<Option<Vec<_>>>()?;

    Some(Line {
        package: None,
        name,
        procs,
        iterations,
        metrics,
    })
}

/// `BenchmarkFoo-8` is `BenchmarkFoo` run with GOMAXPROCS=8.
fn split_procs(token: &str) -> (&str, Option<&str>) {
    match token.rsplit_once('-') {
        Some((name, procs))
            if !name.is_empty() && !procs.is_empty() && procs.bytes().all(|b| b.is_ascii_digit()) =>
        {
            (name, Some(procs))
        }
        _ => (token, None),
    }
}

fn parse_number(s: &str) -> Option<Number> {
    if let Ok(v) = s.parse::<u64>() {
        return Some(v.into());
    }
    if let Ok(v) = s.parse::<i64>() {
        return Some(v.into());
    }
    s.parse::<f64>().ok().and_then(Number::from_f64)
}
