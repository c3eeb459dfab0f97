//! Refresh orchestration.
//!
//! The `Collector` owns the statistics source, the memory probe, the
//! classifier (with its node map) and the metric registry. It is the only
//! writer of the registry; callers serialize `refresh()` and reads of the
//! registry behind a single lock.

use std::collections::HashSet;
use std::fmt;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::collector::procfs::MemoryProbe;
use crate::collector::traits::{FileSystem, STATS_PREFIX, SourceError, StatsSource};
use crate::namespace::{ClassifyError, Classifier};
use crate::nodemap::{NODELIST_PREFIX, NodeMap, NodeMapError};
use crate::registry::{Registry, RegistryError};
use crate::stats::{LineError, StatLine, parse_line, parse_output};

/// Error type for collection failures.
#[derive(Debug)]
pub enum CollectError {
    /// The statistics source failed; nothing was applied.
    Source(SourceError),
    /// The nodelist could not be joined into a node map.
    NodeMap(NodeMapError),
}

impl fmt::Display for CollectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectError::Source(e) => write!(f, "{}", e),
            CollectError::NodeMap(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for CollectError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CollectError::Source(e) => Some(e),
            CollectError::NodeMap(e) => Some(e),
        }
    }
}

impl From<SourceError> for CollectError {
    fn from(e: SourceError) -> Self {
        CollectError::Source(e)
    }
}

impl From<NodeMapError> for CollectError {
    fn from(e: NodeMapError) -> Self {
        CollectError::NodeMap(e)
    }
}

/// Outcome of one successful refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    /// Non-blank lines received, plus the synthetic memory record.
    pub lines: usize,
    /// Lines written to the registry.
    pub applied: usize,
    /// Lines dropped (malformed, unclassifiable or rejected by the registry).
    pub skipped: usize,
    pub duration: Duration,
}

/// Lists the nodelist from `source` and joins it into a node map.
///
/// Runs once at startup; any failure here must stop the process.
pub fn resolve_node_map<S: StatsSource>(source: &S) -> Result<NodeMap, CollectError> {
    let output = source.list(NODELIST_PREFIX)?;
    let nodes = NodeMap::resolve(&parse_output(&output))?;
    debug!(nodes = nodes.len(), "node map resolved");
    Ok(nodes)
}

/// Pulls statistics on demand and keeps the registry current.
pub struct Collector<S: StatsSource, F: FileSystem> {
    source: S,
    probe: MemoryProbe<F>,
    classifier: Classifier,
    registry: Registry,
    /// Failure tokens already reported at warn level. A token is a metric
    /// name, namespace, node slot or line shape, never a raw key (ipcs keys
    /// embed a pid and a connection pointer).
    reported: HashSet<String>,
    last_error: Option<String>,
}

impl<S: StatsSource, F: FileSystem> Collector<S, F> {
    /// Creates a collector, resolving the node map from `source`.
    ///
    /// # Arguments
    /// * `source` - Statistics source (cmapctl or mock)
    /// * `probe` - Memory probe for the daemon process
    /// * `hostname` - Value of the `hostname` label on every metric
    pub fn new(
        source: S,
        probe: MemoryProbe<F>,
        hostname: impl Into<String>,
    ) -> Result<Self, CollectError> {
        let nodes = resolve_node_map(&source)?;
        Ok(Self::with_classifier(
            source,
            probe,
            Classifier::new(hostname, nodes),
        ))
    }

    /// Creates a collector around an already built classifier.
    pub fn with_classifier(source: S, probe: MemoryProbe<F>, classifier: Classifier) -> Self {
        Self {
            source,
            probe,
            classifier,
            registry: Registry::new(),
            reported: HashSet::new(),
            last_error: None,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    /// Error message of the last refresh, cleared on success.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Runs one full refresh pass.
    ///
    /// The complete listing is fetched before anything is applied: if the
    /// source fails, the registry keeps its previous contents. Per-line
    /// failures skip only that line.
    pub fn refresh(&mut self) -> Result<RefreshSummary, CollectError> {
        let start = Instant::now();

        let output = match self.source.list(STATS_PREFIX) {
            Ok(output) => output,
            Err(e) => {
                self.last_error = Some(e.to_string());
                return Err(e.into());
            }
        };

        let mut summary = RefreshSummary::default();
        let mut lines = Vec::new();
        for raw in output.lines() {
            match parse_line(raw) {
                Ok(Some(line)) => lines.push(line),
                Ok(None) => {}
                Err(e) => {
                    summary.lines += 1;
                    summary.skipped += 1;
                    let key = raw.split_whitespace().next().unwrap_or_default();
                    self.report(malformed_token(&e), key, &e);
                }
            }
        }
        lines.push(self.probe.sample());
        summary.lines += lines.len();

        for line in &lines {
            if self.apply(line) {
                summary.applied += 1;
            } else {
                summary.skipped += 1;
            }
        }

        summary.duration = start.elapsed();

        self.last_error = None;
        Ok(summary)
    }

    /// Renders the registry in the text exposition format.
    pub fn render(&self) -> Result<String, RegistryError> {
        self.registry.render()
    }

    fn apply(&mut self, line: &StatLine) -> bool {
        let key = match self.classifier.classify(&line.key) {
            Ok(key) => key,
            Err(ClassifyError::UnknownNamespace(ns)) => {
                let first = self.reported.insert(format!("namespace:{}", ns));
                if first {
                    warn!(namespace = %ns, key = %line.key, "skipping unknown namespace");
                } else {
                    debug!(namespace = %ns, key = %line.key, "skipping unknown namespace");
                }
                return false;
            }
            Err(e) => {
                let token = match &e {
                    ClassifyError::UnknownNode { slot, .. } => format!("node:{}", slot),
                    _ => format!("short:{}", Classifier::namespace_of(&line.key).as_str()),
                };
                self.report(token, &line.key, &e);
                return false;
            }
        };

        match self
            .registry
            .upsert(&key.name, &key.labels, line.value_type, &line.value)
        {
            Ok(()) => true,
            Err(e) => {
                self.report(format!("metric:{}", key.name), &line.key, &e);
                false
            }
        }
    }

    /// Logs a per-line failure at warn the first time `token` fails, debug after.
    fn report(&mut self, token: String, key: &str, err: &dyn fmt::Display) {
        if self.reported.insert(token) {
            warn!(key, error = %err, "skipping stat line");
        } else {
            debug!(key, error = %err, "skipping stat line");
        }
    }
}

fn malformed_token(err: &LineError) -> String {
    match err {
        LineError::UnknownType { tag, .. } => format!("type:{}", tag),
        LineError::MissingType(_) | LineError::MissingValue(_) => "malformed".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::mock::{MockFs, MockSource};
    use crate::registry::{MetricKind, Payload};
    use crate::stats::SampleValue;

    const NODELIST: &str = "\
nodelist.node.0.name (str) = alpha
nodelist.node.0.nodeid (u32) = 1
nodelist.node.1.name (str) = beta
nodelist.node.1.nodeid (u32) = 2
";

    const STATS: &str = "\
stats.knet.handle.tx_uncompressed_packets (u64) = 10
stats.knet.node1.link0.latency_ave (u32) = 120
stats.knet.node2.link0.latency_ave (u32) = 80
stats.srp.rx_data (u64) = 1000
stats.pg.msg_reserved (u32) = 1
stats.ipcs.global.active (u64) = 2
stats.ipcs.service0.3022.0x55d1f0c2a4b0.procname (str) = corosync-cmapctl
stats.ipcs.service0.3022.0x55d1f0c2a4b0.dispatched (u64) = 4
";

    fn probe() -> MemoryProbe<MockFs> {
        let mut fs = MockFs::new();
        fs.add_process(812, "corosync", Some(100));
        MemoryProbe::new(fs, "/proc")
    }

    fn collector(source: &MockSource) -> Collector<MockSource, MockFs> {
        Collector::new(source.clone(), probe(), "local").unwrap()
    }

    fn gauge(c: &Collector<MockSource, MockFs>, name: &str, label: Option<(&str, &str)>) -> Option<SampleValue> {
        c.registry()
            .snapshot()
            .into_iter()
            .filter(|s| s.name == name)
            .filter(|s| label.is_none_or(|(n, v)| s.labels.get(n) == Some(v)))
            .find_map(|s| match s.value {
                Payload::Gauge(v) => Some(v),
                Payload::Info(_) => None,
            })
    }

    #[test]
    fn test_new_resolves_node_map_once() {
        let source = MockSource::new()
            .with_output(NODELIST_PREFIX, NODELIST)
            .with_output(STATS_PREFIX, STATS);
        let mut c = collector(&source);
        c.refresh().unwrap();
        c.refresh().unwrap();

        assert_eq!(c.classifier().nodes().get("node2"), Some("beta"));
        assert_eq!(source.calls(), vec!["nodelist.node", "stats", "stats"]);
    }

    #[test]
    fn test_new_fails_on_incomplete_nodelist() {
        let source = MockSource::new()
            .with_output(NODELIST_PREFIX, "nodelist.node.0.name (str) = alpha\n");
        let err = Collector::new(source, probe(), "local").err().unwrap();
        assert!(matches!(err, CollectError::NodeMap(NodeMapError::MissingNodeId { .. })));
    }

    #[test]
    fn test_new_fails_when_source_is_down() {
        let source = MockSource::new();
        let err = Collector::new(source, probe(), "local").err().unwrap();
        assert!(matches!(err, CollectError::Source(_)));
    }

    #[test]
    fn test_refresh_populates_registry() {
        let source = MockSource::new()
            .with_output(NODELIST_PREFIX, NODELIST)
            .with_output(STATS_PREFIX, STATS);
        let mut c = collector(&source);
        let summary = c.refresh().unwrap();

        assert_eq!(summary.lines, 9);
        assert_eq!(summary.applied, 9);
        assert_eq!(summary.skipped, 0);

        assert_eq!(
            gauge(&c, "knet_latency_ave", Some(("node", "alpha"))),
            Some(SampleValue::U32(120))
        );
        assert_eq!(
            gauge(&c, "knet_latency_ave", Some(("node", "beta"))),
            Some(SampleValue::U32(80))
        );
        assert_eq!(gauge(&c, "srp_rx_data", None), Some(SampleValue::U64(1000)));
        assert_eq!(
            gauge(&c, "corosync_rss", None),
            Some(SampleValue::U64(100 * 1024))
        );
        assert_eq!(
            c.registry().kind_of("ipcs_procname"),
            Some(MetricKind::Info)
        );
        assert_eq!(
            gauge(&c, "ipcs_dispatched", Some(("service", "service0"))),
            Some(SampleValue::U64(4))
        );
    }

    #[test]
    fn test_failed_refresh_keeps_previous_values() {
        let source = MockSource::new()
            .with_output(NODELIST_PREFIX, NODELIST)
            .with_output(STATS_PREFIX, STATS);
        let mut c = collector(&source);
        c.refresh().unwrap();
        let before = c.registry().snapshot();

        source.set_failure(STATS_PREFIX, "cmap connection lost");
        assert!(matches!(c.refresh(), Err(CollectError::Source(_))));
        assert_eq!(c.registry().snapshot(), before);
        assert_eq!(
            c.last_error(),
            Some("statistics unavailable: cmap connection lost")
        );

        source.set_output(STATS_PREFIX, STATS);
        c.refresh().unwrap();
        assert_eq!(c.last_error(), None);
    }

    #[test]
    fn test_bad_lines_are_skipped_individually() {
        let source = MockSource::new()
            .with_output(NODELIST_PREFIX, NODELIST)
            .with_output(
                STATS_PREFIX,
                "stats.srp.rx_data (u64) = 1\n\
                 stats.srp.tx_data (u64) = not-a-number\n\
                 stats.schedmiss.0.timestamp (u64) = 5\n\
                 stats.knet.node9.link0.up (u8) = 1\n\
                 this is not a stat line\n\
                 stats.pg.msg_reserved (u32) = 3\n",
            );
        let mut c = collector(&source);
        let summary = c.refresh().unwrap();

        assert_eq!(summary.lines, 7);
        assert_eq!(summary.applied, 3);
        assert_eq!(summary.skipped, 4);
        assert_eq!(gauge(&c, "pg_msg_reserved", None), Some(SampleValue::U32(3)));
        assert_eq!(c.registry().kind_of("srp_tx_data"), None);
    }

    #[test]
    fn test_failure_reports_are_bounded_across_connections() {
        let scrape = |pid: u32| {
            format!(
                "stats.ipcs.service0.{pid}.0x{pid:x}.dispatched (u64) = n/a\n\
                 stats.ipcs.service0.{pid}.0x{pid:x}.flow_control (u32) = n/a\n\
                 stats.knet.node9.link{pid}.up (u8) = 1\n\
                 stats.pg.flag{pid} (bogus) = 1\n\
                 stats.srp.broken{pid}\n"
            )
        };
        let source = MockSource::new()
            .with_output(NODELIST_PREFIX, NODELIST)
            .with_output(STATS_PREFIX, scrape(100));
        let mut c = collector(&source);

        let summary = c.refresh().unwrap();
        assert_eq!(summary.skipped, 5);
        let tokens = c.reported.len();
        assert_eq!(tokens, 5);

        for pid in [200, 300, 400] {
            source.set_output(STATS_PREFIX, scrape(pid));
            assert_eq!(c.refresh().unwrap().skipped, 5);
        }
        assert_eq!(c.reported.len(), tokens);
        assert!(c.reported.contains("metric:ipcs_dispatched"));
        assert!(c.reported.contains("node:node9"));
        assert!(c.reported.contains("type:bogus"));
        assert!(c.reported.contains("malformed"));
    }

    #[test]
    fn test_sequential_refreshes_overwrite() {
        let source = MockSource::new()
            .with_output(NODELIST_PREFIX, NODELIST)
            .with_output(STATS_PREFIX, "stats.srp.rx_data (u64) = 1\n");
        let mut c = collector(&source);
        c.refresh().unwrap();

        source.set_output(STATS_PREFIX, "stats.srp.rx_data (u64) = 2\n");
        c.refresh().unwrap();

        let samples: Vec<_> = c
            .registry()
            .snapshot()
            .into_iter()
            .filter(|s| s.name == "srp_rx_data")
            .collect();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].value, Payload::Gauge(SampleValue::U64(2)));
    }

    #[test]
    fn test_type_change_is_rejected() {
        let source = MockSource::new()
            .with_output(NODELIST_PREFIX, NODELIST)
            .with_output(STATS_PREFIX, "stats.srp.rx_data (u64) = 1\n");
        let mut c = collector(&source);
        c.refresh().unwrap();

        source.set_output(STATS_PREFIX, "stats.srp.rx_data (str) = one\n");
        let summary = c.refresh().unwrap();
        assert_eq!(summary.skipped, 1);
        assert_eq!(c.registry().kind_of("srp_rx_data"), Some(MetricKind::Gauge));
        assert_eq!(gauge(&c, "srp_rx_data", None), Some(SampleValue::U64(1)));
    }

    #[test]
    fn test_render_after_refresh() {
        let source = MockSource::new()
            .with_output(NODELIST_PREFIX, NODELIST)
            .with_output(STATS_PREFIX, STATS);
        let mut c = collector(&source);
        c.refresh().unwrap();

        let text = c.render().unwrap();
        assert!(text.contains("# TYPE knet_latency_ave gauge"));
        assert!(text.contains("# TYPE ipcs_procname_info gauge"));
        assert!(text.contains("corosync_rss{hostname=\"local\"} 102400"));
    }
}
