//! Unbound statistics exporter.
//!
//! Speaks the remote-control protocol (`UBCT1 stats_noreset`) over the
//! local control socket and translates the `key=value` lines it gets back
//! into Prometheus text exposition. Keys are matched against a fixed table;
//! anything unrecognized is dropped.
//!
//! Unbound only reports a recursion-time average, so the histogram sum is
//! reconstructed as `average * count`. That is an approximation and may not
//! be monotonic across scrapes.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

const NAMESPACE: &str = "unbound_nodecache";

const STATS_COMMAND: &[u8] = b"UBCT1 stats_noreset\n";

const SCRAPE_TIMEOUT: Duration = Duration::from_secs(5);

const RECURSION_AVG_KEY: &str = "total.recursion.time.avg";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
}

impl MetricKind {
    fn as_str(self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
        }
    }
}

struct StatDef {
    name: &'static str,
    help: &'static str,
    kind: MetricKind,
    label: Option<&'static str>,
    pattern: &'static str,
}

const fn stat(
    name: &'static str,
    help: &'static str,
    kind: MetricKind,
    label: Option<&'static str>,
    pattern: &'static str,
) -> StatDef {
    StatDef { name, help, kind, label, pattern }
}

use MetricKind::{Counter, Gauge};

const STAT_DEFS: &[StatDef] = &[
    stat("answer_rcodes_total", "Total number of answers to queries, from cache or from recursion, by response code.", Counter, Some("rcode"), r"^num\.answer\.rcode\.(\w+)$"),
    stat("answers_bogus", "Total number of answers that were bogus.", Counter, None, r"^num\.answer\.bogus$"),
    stat("answers_secure_total", "Total number of answers that were secure.", Counter, None, r"^num\.answer\.secure$"),
    stat("cache_hits_total", "Total number of queries that were successfully answered using a cache lookup.", Counter, Some("thread"), r"^thread(\d+)\.num\.cachehits$"),
    stat("cache_misses_total", "Total number of cache queries that needed recursive processing.", Counter, Some("thread"), r"^thread(\d+)\.num\.cachemiss$"),
    stat("memory_caches_bytes", "Memory in bytes in use by caches.", Gauge, Some("cache"), r"^mem\.cache\.(\w+)$"),
    stat("memory_modules_bytes", "Memory in bytes in use by modules.", Gauge, Some("module"), r"^mem\.mod\.(\w+)$"),
    stat("memory_sbrk_bytes", "Memory in bytes allocated through sbrk.", Gauge, None, r"^mem\.total\.sbrk$"),
    stat("prefetches_total", "Total number of cache prefetches performed.", Counter, Some("thread"), r"^thread(\d+)\.num\.prefetch$"),
    stat("queries_total", "Total number of queries received.", Counter, Some("thread"), r"^thread(\d+)\.num\.queries$"),
    stat("expired_total", "Total number of expired entries served.", Counter, Some("thread"), r"^thread(\d+)\.num\.expired$"),
    stat("query_classes_total", "Total number of queries with a given query class.", Counter, Some("class"), r"^num\.query\.class\.(\w+)$"),
    stat("query_flags_total", "Total number of queries that had a given flag set in the header.", Counter, Some("flag"), r"^num\.query\.flags\.(\w+)$"),
    stat("query_ipv6_total", "Total number of queries that were made using IPv6 towards the Unbound server.", Counter, None, r"^num\.query\.ipv6$"),
    stat("query_opcodes_total", "Total number of queries with a given query opcode.", Counter, Some("opcode"), r"^num\.query\.opcode\.(\w+)$"),
    stat("query_tcp_total", "Total number of queries that were made using TCP towards the Unbound server.", Counter, None, r"^num\.query\.tcp$"),
    stat("query_tls_total", "Total number of queries that were made using TCP TLS towards the Unbound server.", Counter, None, r"^num\.query\.tls$"),
    stat("query_types_total", "Total number of queries with a given query type.", Counter, Some("type"), r"^num\.query\.type\.(\w+)$"),
    stat("request_list_current_all", "Current size of the request list, including internally generated queries.", Gauge, Some("thread"), r"^thread(\d+)\.requestlist\.current\.all$"),
    stat("request_list_current_user", "Current size of the request list, only counting the requests from client queries.", Gauge, Some("thread"), r"^thread(\d+)\.requestlist\.current\.user$"),
    stat("request_list_exceeded_total", "Number of queries that were dropped because the request list was full.", Counter, Some("thread"), r"^thread(\d+)\.requestlist\.exceeded$"),
    stat("request_list_overwritten_total", "Total number of requests in the request list that were overwritten by newer entries.", Counter, Some("thread"), r"^thread(\d+)\.requestlist\.overwritten$"),
    stat("recursive_replies_total", "Total number of replies sent to queries that needed recursive processing.", Counter, Some("thread"), r"^thread(\d+)\.num\.recursivereplies$"),
    stat("rrset_bogus_total", "Total number of rrsets marked bogus by the validator.", Counter, None, r"^num\.rrset\.bogus$"),
    stat("time_elapsed_seconds", "Time since last statistics printout in seconds.", Counter, None, r"^time\.elapsed$"),
    stat("time_now_seconds", "Current time in seconds since 1970.", Gauge, None, r"^time\.now$"),
    stat("time_up_seconds_total", "Uptime since server boot in seconds.", Counter, None, r"^time\.up$"),
    stat("unwanted_queries_total", "Total number of queries that were refused or dropped because they failed the access control settings.", Counter, None, r"^unwanted\.queries$"),
    stat("unwanted_replies_total", "Total number of replies that were unwanted or unsolicited.", Counter, None, r"^unwanted\.replies$"),
    stat("recursion_time_seconds_avg", "Average time it took to answer queries that needed recursive processing (does not include in-cache requests).", Gauge, None, r"^total\.recursion\.time\.avg$"),
    stat("recursion_time_seconds_median", "The median of the time it took to answer queries that needed recursive processing.", Gauge, None, r"^total\.recursion\.time\.median$"),
    stat("msg_cache_count", "The Number of Messages cached", Gauge, None, r"^msg\.cache\.count$"),
    stat("rrset_cache_count", "The Number of rrset cached", Gauge, None, r"^rrset\.cache\.count$"),
];

struct CompiledStat {
    def: &'static StatDef,
    regex: Regex,
}

static STATS: LazyLock<Vec<CompiledStat>> = LazyLock::new(|| {
    STAT_DEFS
        .iter()
        .filter_map(|def| match Regex::new(def.pattern) {
            Ok(regex) => Some(CompiledStat { def, regex }),
            Err(e) => {
                tracing::error!(metric = def.name, error = %e, "Invalid statistics pattern");
                None
            }
        })
        .collect()
});

static HISTOGRAM_KEY: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^histogram\.\d+\.\d+\.to\.(\d+\.\d+)$").ok());

#[derive(Debug, Error)]
pub enum StatsError {
    #[error("{0:?} is not a valid key-value pair")]
    InvalidLine(String),

    #[error("invalid value in {line:?}")]
    InvalidValue { line: String },

    #[error("control socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out talking to the control socket")]
    Timeout,
}

/// One translated statistic.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub name: &'static str,
    pub kind: MetricKind,
    pub label: Option<(&'static str, String)>,
    pub value: f64,
}

/// Cumulative response-time histogram.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Histogram {
    /// Upper bound and cumulative count, ascending.
    pub buckets: Vec<(f64, u64)>,
    pub count: u64,
    pub sum: f64,
}

/// Everything recovered from one statistics dump.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolverStats {
    pub samples: Vec<Sample>,
    pub histogram: Histogram,
}

impl ResolverStats {
    /// Find the first sample with this name and label value.
    pub fn get(&self, name: &str, label_value: Option<&str>) -> Option<f64> {
        self.samples
            .iter()
            .find(|s| s.name == name && s.label.as_ref().map(|(_, v)| v.as_str()) == label_value)
            .map(|s| s.value)
    }

    /// Render in Prometheus text format, grouped by metric.
    ///
    /// Written by hand: the Prometheus exporter has no way to publish
    /// externally sourced samples or precomputed histogram buckets.
    pub fn render(&self, out: &mut String) {
        for def in STAT_DEFS {
            let mut samples = self.samples.iter().filter(|s| s.name == def.name).peekable();
            if samples.peek().is_none() {
                continue;
            }

            let _ = writeln!(out, "# HELP {NAMESPACE}_{} {}", def.name, def.help);
            let _ = writeln!(out, "# TYPE {NAMESPACE}_{} {}", def.name, def.kind.as_str());
            for sample in samples {
                match &sample.label {
                    Some((key, value)) => {
                        let _ = writeln!(out, "{NAMESPACE}_{}{{{key}=\"{value}\"}} {}", sample.name, sample.value);
                    }
                    None => {
                        let _ = writeln!(out, "{NAMESPACE}_{} {}", sample.name, sample.value);
                    }
                }
            }
        }

        let name = format!("{NAMESPACE}_response_time_seconds");
        let _ = writeln!(out, "# HELP {name} Query response time in seconds.");
        let _ = writeln!(out, "# TYPE {name} histogram");
        for (le, count) in &self.histogram.buckets {
            let _ = writeln!(out, "{name}_bucket{{le=\"{le}\"}} {count}");
        }
        let _ = writeln!(out, "{name}_bucket{{le=\"+Inf\"}} {}", self.histogram.count);
        let _ = writeln!(out, "{name}_sum {}", self.histogram.sum);
        let _ = writeln!(out, "{name}_count {}", self.histogram.count);
    }
}

/// Translate a statistics dump.
pub fn parse_stats(text: &str) -> Result<ResolverStats, StatsError> {
    let mut samples = Vec::new();
    let mut buckets: BTreeMap<u64, (f64, u64)> = BTreeMap::new();
    let mut count = 0u64;
    let mut avg = 0f64;

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let fields: Vec<&str> = line.split('=').collect();
        let &[key, raw] = fields.as_slice() else {
            return Err(StatsError::InvalidLine(line.to_string()));
        };
        let invalid = || StatsError::InvalidValue { line: line.to_string() };

        for stat in STATS.iter() {
            let Some(caps) = stat.regex.captures(key) else {
                continue;
            };
            let value: f64 = raw.parse().map_err(|_| invalid())?;
            let label = match (stat.def.label, caps.get(1)) {
                (Some(name), Some(m)) => Some((name, m.as_str().to_string())),
                _ => None,
            };
            samples.push(Sample {
                name: stat.def.name,
                kind: stat.def.kind,
                label,
                value,
            });
            break;
        }

        let bucket = HISTOGRAM_KEY
            .as_ref()
            .and_then(|re| re.captures(key))
            .and_then(|caps| caps.get(1));
        if let Some(end) = bucket {
            let end: f64 = end.as_str().parse().map_err(|_| invalid())?;
            let value: u64 = raw.parse().map_err(|_| invalid())?;
            // f64 is not Ord; bucket bounds are non-negative so the bit
            // pattern orders the same way.
            buckets.insert(end.to_bits(), (end, value));
            count += value;
        } else if key == RECURSION_AVG_KEY {
            avg = raw.parse().map_err(|_| invalid())?;
        }
    }

    let mut cumulative = 0u64;
    let buckets = buckets
        .into_values()
        .map(|(end, value)| {
            cumulative += value;
            (end, cumulative)
        })
        .collect();

    Ok(ResolverStats {
        samples,
        histogram: Histogram {
            buckets,
            count,
            sum: avg * count as f64,
        },
    })
}

/// Pulls statistics from the Unbound control socket on every scrape.
pub struct UnboundExporter {
    socket: PathBuf,
}

impl UnboundExporter {
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self { socket: socket.into() }
    }

    pub async fn collect(&self) -> Result<ResolverStats, StatsError> {
        let text = tokio::time::timeout(SCRAPE_TIMEOUT, self.read_dump())
            .await
            .map_err(|_| StatsError::Timeout)??;
        parse_stats(&text)
    }

    async fn read_dump(&self) -> Result<String, StatsError> {
        let mut stream = UnixStream::connect(&self.socket).await?;
        stream.write_all(STATS_COMMAND).await?;

        let mut lines = BufReader::new(stream).lines();
        let mut text = String::new();
        while let Some(line) = lines.next_line().await? {
            text.push_str(&line);
            text.push('\n');
        }
        Ok(text)
    }

    /// Scrape and render, including the `up` gauge.
    pub async fn scrape(&self) -> String {
        let mut out = String::new();
        let up = match self.collect().await {
            Ok(stats) => {
                stats.render(&mut out);
                1
            }
            Err(e) => {
                tracing::error!(socket = %self.socket.display(), error = %e, "Failed to scrape socket");
                0
            }
        };

        let _ = writeln!(out, "# HELP {NAMESPACE}_up Whether scraping Unbound's metrics was successful.");
        let _ = writeln!(out, "# TYPE {NAMESPACE}_up gauge");
        let _ = writeln!(out, "{NAMESPACE}_up {up}");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_queries_translated() {
        let stats = parse_stats("thread0.num.queries=42\n").unwrap();
        assert_eq!(
            stats.samples,
            vec![Sample {
                name: "queries_total",
                kind: MetricKind::Counter,
                label: Some(("thread", "0".to_string())),
                value: 42.0,
            }]
        );
    }

    #[test]
    fn test_unrecognized_key_ignored() {
        let stats = parse_stats("some.future.key=7\nnum.query.tcp=3\n").unwrap();
        assert_eq!(stats.samples.len(), 1);
        assert_eq!(stats.get("query_tcp_total", None), Some(3.0));
    }

    #[test]
    fn test_malformed_line_is_error() {
        assert!(matches!(
            parse_stats("thread0.num.queries\n"),
            Err(StatsError::InvalidLine(_))
        ));
        assert!(matches!(
            parse_stats("a=b=c\n"),
            Err(StatsError::InvalidLine(_))
        ));
        assert!(matches!(
            parse_stats("num.query.tcp=lots\n"),
            Err(StatsError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_histogram_is_cumulative_with_approximate_sum() {
        let dump = "\
histogram.000000.000128.to.000000.000256=4
histogram.000000.000000.to.000000.000001=2
histogram.000000.000256.to.000000.000512=0
total.recursion.time.avg=0.5
";
        let stats = parse_stats(dump).unwrap();

        assert_eq!(stats.histogram.count, 6);
        assert_eq!(
            stats.histogram.buckets,
            vec![(0.000001, 2), (0.000256, 6), (0.000512, 6)]
        );
        assert!((stats.histogram.sum - 3.0).abs() < f64::EPSILON);
        assert_eq!(stats.get("recursion_time_seconds_avg", None), Some(0.5));
    }

    #[test]
    fn test_render_groups_by_metric() {
        let stats = parse_stats("thread0.num.queries=42\nthread1.num.queries=8\n").unwrap();
        let mut out = String::new();
        stats.render(&mut out);

        assert_eq!(out.matches("# TYPE unbound_nodecache_queries_total counter").count(), 1);
        assert!(out.contains("unbound_nodecache_queries_total{thread=\"0\"} 42\n"));
        assert!(out.contains("unbound_nodecache_queries_total{thread=\"1\"} 8\n"));
        assert!(out.contains("unbound_nodecache_response_time_seconds_count 0\n"));
    }

    #[tokio::test]
    async fn test_scrape_reports_down_without_socket() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = UnboundExporter::new(dir.path().join("missing.sock"));
        let out = exporter.scrape().await;
        assert!(out.ends_with("unbound_nodecache_up 0\n"));
    }
}
