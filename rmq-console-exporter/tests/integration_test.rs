//! Integration tests for the queue exporter.
//!
//! These tests drive the full flow from a command's output to the HTTP metrics
//! endpoint, using `sh` scripts in place of `rabbitmqctl`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use rmq_console_collector::{
    CollectError, Collector, Filter, FilterHandle, JsonQueueParser, LineParser, MetricSet,
    MetricsSource, ParseError, SingleFlightGuard, queue_labels,
};
use rmq_console_exporter::{ConfigWatcher, HttpServer, QueueExporter, Scrape, SharedExporter};

const QUEUES: &str = r#"printf '%s\n' \
'[' \
'{"name":"orders.dev","state":"running","messages_ready":3,"message_bytes_ready":288,"messages_unacknowledged":0,"message_bytes_unacknowledged":0,"memory":34764,"consumers":1,"consumer_utilisation":1.0,"head_message_timestamp":""}' \
',{"name":"billing.prod","state":"idle","messages_ready":0,"message_bytes_ready":0,"messages_unacknowledged":2,"message_bytes_unacknowledged":64,"memory":34668,"consumers":0,"consumer_utilisation":"","head_message_timestamp":""}' \
']'"#;

/// JSON parsing of a `sh -c` script's output.
#[derive(Debug)]
struct ShellJsonParser {
    arguments: Vec<String>,
    inner: JsonQueueParser,
}

impl ShellJsonParser {
    fn new(script: &str) -> Self {
        Self {
            arguments: vec!["-c".to_string(), script.to_string()],
            inner: JsonQueueParser::new(),
        }
    }
}

impl LineParser for ShellJsonParser {
    fn command(&self) -> &str {
        "sh"
    }

    fn arguments(&self) -> &[String] {
        &self.arguments
    }

    fn parse(&self, line: &str, filter: &Filter) -> Result<Option<MetricSet>, ParseError> {
        self.inner.parse(line, filter)
    }
}

/// Answers after a delay, to keep a scrape in flight.
struct SlowSource(Duration);

#[async_trait]
impl MetricsSource for SlowSource {
    fn name(&self) -> &str {
        "slow"
    }

    async fn collect(&self) -> Result<Vec<MetricSet>, CollectError> {
        tokio::time::sleep(self.0).await;
        let mut builder = MetricSet::builder();
        builder.metric("consumers", 4.0, queue_labels("slow", "running"));
        Ok(vec![builder.build()])
    }
}

fn shell_exporter(script: &str, filter: FilterHandle) -> SharedExporter {
    let collector = Collector::new(
        Arc::new(ShellJsonParser::new(script)),
        filter,
        Duration::from_secs(10),
        64,
    );
    Arc::new(QueueExporter::new(
        vec![Arc::new(collector)],
        "rmq_",
        Arc::new(SingleFlightGuard::new()),
    ))
}

/// Start a server on a random port.
async fn start_server(
    exporter: SharedExporter,
) -> (SocketAddr, watch::Sender<bool>, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let server = HttpServer::new(exporter, addr, "/metrics".to_string());
    let handle = tokio::spawn(async move {
        let _ = server.serve(listener, shutdown_rx).await;
    });

    (addr, shutdown_tx, handle)
}

async fn get(addr: SocketAddr, path: &str) -> (u16, String) {
    let response = reqwest::Client::new()
        .get(format!("http://{}{}", addr, path))
        .send()
        .await
        .unwrap();
    let status = response.status().as_u16();
    (status, response.text().await.unwrap())
}

#[tokio::test]
async fn test_http_server_metrics_endpoint() {
    let exporter = shell_exporter(QUEUES, FilterHandle::default());
    let (addr, shutdown_tx, handle) = start_server(exporter).await;

    let (status, body) = get(addr, "/metrics").await;

    assert_eq!(status, 200);
    assert!(body.contains("# TYPE rmq_messages_ready gauge"));
    assert!(body.contains("rmq_messages_ready{entity=\"orders.dev\",state=\"running\"} 3\n"));
    assert!(body.contains("rmq_message_bytes_unacknowledged{entity=\"billing.prod\",state=\"idle\"} 64\n"));
    assert!(body.contains("rmq_consumer_utilisation{entity=\"orders.dev\",state=\"running\"} 1\n"));
    // empty utilisation is dropped, not exported as zero
    assert!(!body.contains("rmq_consumer_utilisation{entity=\"billing.prod\""));
    assert!(body.contains("rmq_command_runtime{command_executed=\"sh -c "));
    assert!(body.contains("rmq_exporter_scrapes_total 1\n"));

    shutdown_tx.send(true).unwrap();
    let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
}

#[tokio::test]
async fn test_filter_limits_exported_queues() {
    let filter = FilterHandle::new(Filter::new(&[r"^.*\.dev$"]).unwrap());
    let exporter = shell_exporter(QUEUES, filter);

    let scrape = exporter.scrape().await;
    let body = exporter.render(scrape.metric_sets());

    assert!(body.contains("entity=\"orders.dev\""));
    assert!(!body.contains("billing.prod"));
    // queue set plus the status set
    assert_eq!(scrape.metric_sets().len(), 2);
}

#[tokio::test]
async fn test_failed_collection_still_serves() {
    let exporter = shell_exporter("echo 'Error: unable to connect to node' >&2; exit 69", FilterHandle::default());
    let (addr, shutdown_tx, handle) = start_server(exporter).await;

    let (status, body) = get(addr, "/metrics").await;
    assert_eq!(status, 200);
    assert!(!body.contains("rmq_memory"));
    assert!(body.contains("rmq_exporter_collection_failures_total 1\n"));

    let (status, _) = get(addr, "/ready").await;
    assert_eq!(status, 503);

    shutdown_tx.send(true).unwrap();
    let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
}

#[tokio::test]
async fn test_ready_after_successful_scrape() {
    let exporter = shell_exporter(QUEUES, FilterHandle::default());
    let (addr, shutdown_tx, handle) = start_server(exporter).await;

    assert_eq!(get(addr, "/ready").await.0, 503);
    assert_eq!(get(addr, "/metrics").await.0, 200);
    assert_eq!(get(addr, "/ready").await.0, 200);
    assert_eq!(get(addr, "/health").await.0, 200);

    shutdown_tx.send(true).unwrap();
    let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
}

#[tokio::test]
async fn test_overlapping_scrapes_are_skipped() {
    let exporter = Arc::new(QueueExporter::new(
        vec![Arc::new(SlowSource(Duration::from_millis(300)))],
        "rmq_",
        Arc::new(SingleFlightGuard::new()),
    ));

    let (first, second) = tokio::join!(exporter.scrape(), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        exporter.scrape().await
    });

    assert!(matches!(first, Scrape::Collected { failures: 0, .. }));
    assert!(matches!(second, Scrape::Skipped));

    let stats = exporter.stats();
    assert_eq!(stats.scrapes, 1);
    assert_eq!(stats.skipped_scrapes, 1);

    // released once the first scrape finished
    assert!(matches!(exporter.scrape().await, Scrape::Collected { .. }));
}

#[tokio::test]
async fn test_guard_shared_between_exporters() {
    let guard = Arc::new(SingleFlightGuard::new());
    let slow = QueueExporter::new(
        vec![Arc::new(SlowSource(Duration::from_millis(300)))],
        "rmq_",
        guard.clone(),
    );
    let other = QueueExporter::new(
        vec![Arc::new(SlowSource(Duration::from_millis(1)))],
        "other_",
        guard,
    );

    let (first, second) = tokio::join!(slow.scrape(), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        other.scrape().await
    });

    assert!(matches!(first, Scrape::Collected { .. }));
    assert!(matches!(second, Scrape::Skipped));
}

#[tokio::test]
async fn test_reloaded_filter_applies_to_next_scrape() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json5");
    std::fs::write(&path, r#"{ filters: { queues: ["^orders"] } }"#).unwrap();

    let filter = FilterHandle::new(Filter::new(&["^orders"]).unwrap());
    let exporter = shell_exporter(QUEUES, filter.clone());
    let mut watcher = ConfigWatcher::new(&path, filter, Duration::from_secs(1));

    let body = exporter.render(exporter.scrape().await.metric_sets());
    assert!(!body.contains("billing.prod"));

    std::fs::write(&path, r#"{ filters: { queues: ["^billing"] } }"#).unwrap();
    let file = std::fs::File::options().write(true).open(&path).unwrap();
    file.set_modified(std::time::SystemTime::now() + Duration::from_secs(10))
        .unwrap();
    assert!(watcher.check().unwrap());

    let body = exporter.render(exporter.scrape().await.metric_sets());
    assert!(body.contains("entity=\"billing.prod\""));
    assert!(!body.contains("orders.dev"));
}
