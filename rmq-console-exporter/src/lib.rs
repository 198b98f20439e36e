//! Prometheus exporter for RabbitMQ queue statistics.
//!
//! Each scrape of the metrics endpoint runs `rabbitmqctl list_queues`, parses the
//! output and answers with the queue gauges in Prometheus text format.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │   rabbitmqctl   │────>│    Collector    │────>│   HTTP Server   │
//! │  (list_queues)  │     │ (parse, filter) │     │   (/metrics)    │
//! └─────────────────┘     └─────────────────┘     └─────────────────┘
//!                                  ^
//!                          ┌───────┴───────┐
//!                          │ ConfigWatcher │
//!                          │ (filter rules)│
//!                          └───────────────┘
//! ```
//!
//! # Usage
//!
//! ```bash
//! rmq-console-exporter --config config.json5
//! rmq-console-exporter --create-config
//! ```
//!
//! # Configuration
//!
//! See [`config::ExporterConfig`] for configuration options.

pub mod config;
pub mod exporter;
pub mod http;
pub mod reload;
pub mod wizard;

pub use config::ExporterConfig;
pub use exporter::{ExporterStats, QueueExporter, Scrape, SharedExporter};
pub use http::HttpServer;
pub use reload::ConfigWatcher;
pub use wizard::ConfigWizard;
