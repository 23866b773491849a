/// Snapshot rendering for the monitoring agent.
use crate::config::OutputFormat;
use crate::metrics::Snapshot;
use std::fmt::Write;

/// Render `snapshot` in the requested format. `epoch` stamps TSV lines.
pub fn render(
    snapshot: &Snapshot,
    format: OutputFormat,
    prefix: &str,
    epoch: i64,
) -> Result<String, serde_json::Error> {
    match format {
        OutputFormat::Tsv => Ok(render_tsv(snapshot, prefix, epoch)),
        OutputFormat::Json => {
            let mut json = serde_json::to_string(snapshot)?;
            json.push('\n');
            Ok(json)
        }
    }
}

/// One `<prefix>.<group>.<metric>\t<value>\t<epoch>` line per entry.
pub fn render_tsv(snapshot: &Snapshot, prefix: &str, epoch: i64) -> String {
    let mut out = String::new();
    for (key, value) in snapshot.iter() {
        // Writing to a String cannot fail
        let _ = writeln!(
            out,
            "{prefix}.{}.{}\t{value:.6}\t{epoch}",
            key.group().name(),
            key.name()
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::CollectingSink;
    use crate::ltsv;
    use crate::metrics::{aggregate, FieldKeys};
    use std::io::Cursor;

    fn snapshot(input: &str, trust: bool) -> Snapshot {
        let reader = ltsv::Reader::new(Cursor::new(input.as_bytes().to_vec()));
        aggregate(reader, &FieldKeys::default(), trust, &mut CollectingSink::default()).unwrap()
    }

    #[test]
    fn test_tsv_lines() {
        let s = snapshot("status:200\treqtime:0.25\n", false);
        let out = render_tsv(&s, "accesslog", 1_700_000_000);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(
            lines,
            vec![
                "accesslog.access_rate.2xx_percentage\t100.000000\t1700000000",
                "accesslog.access_rate.3xx_percentage\t0.000000\t1700000000",
                "accesslog.access_rate.4xx_percentage\t0.000000\t1700000000",
                "accesslog.access_rate.404_percentage\t0.000000\t1700000000",
                "accesslog.access_rate.5xx_percentage\t0.000000\t1700000000",
                "accesslog.access_rate.503_percentage\t0.000000\t1700000000",
                "accesslog.latency.average\t0.250000\t1700000000",
                "accesslog.latency.min\t0.250000\t1700000000",
                "accesslog.latency.max\t0.250000\t1700000000",
                "accesslog.latency.90_percentile\t0.250000\t1700000000",
                "accesslog.latency.95_percentile\t0.250000\t1700000000",
                "accesslog.latency.99_percentile\t0.250000\t1700000000",
            ]
        );
    }

    #[test]
    fn test_tsv_counts_use_prefix() {
        let s = snapshot("status:503\treqtime:1\n", true);
        let out = render_tsv(&s, "nginx", 1);
        assert!(out.starts_with("nginx.access_num.total_count\t1.000000\t1\n"));
        assert!(out.contains("nginx.access_num.503_count\t1.000000\t1\n"));
    }

    #[test]
    fn test_json_object() {
        let s = snapshot("status:200\treqtime:0.5\tupstream_cache_status:MISS\n", true);
        let out = render(&s, OutputFormat::Json, "ignored", 0).unwrap();
        assert!(out.ends_with('\n'));
        let v: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(v["total_count"], 1.0);
        assert_eq!(v["MISS_percentage"], 100.0);
        assert_eq!(v["99_percentile"], 0.5);
        assert_eq!(v.as_object().unwrap().len(), s.len());
    }

    #[test]
    fn test_empty_snapshot_renders_nothing() {
        let s = snapshot("", false);
        assert_eq!(render(&s, OutputFormat::Tsv, "accesslog", 0).unwrap(), "");
        assert_eq!(render(&s, OutputFormat::Json, "accesslog", 0).unwrap(), "{}\n");
    }
}
