// src/logger.rs
use std::{path::PathBuf, sync::OnceLock};

use anyhow::Result;
use opentelemetry::{global, metrics::Counter};
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::{LogExporter, MetricExporter, Protocol, WithExportConfig};
use opentelemetry_sdk::{Resource, logs::SdkLoggerProvider, metrics::SdkMeterProvider};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*};

pub const SERVICE_NAME: &str = "mqtt-relay";
pub const LOG_FILE_NAME: &str = "mqtt_relay.log";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct LogConfig {
    /// `EnvFilter` directive, e.g. `info` or `mqtt_relay=debug`.
    pub log_level: String,
    /// When set, a daily rolling plain-text log is written here as well.
    pub log_dir: Option<PathBuf>,
    /// OTLP/HTTP collector for logs and metrics.
    pub otel_endpoint: Option<String>,
}

impl LogConfig {
    pub fn new(log_level: impl Into<String>, log_dir: Option<PathBuf>, otel_endpoint: Option<String>) -> Self {
        Self { log_level: log_level.into(), log_dir, otel_endpoint }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::new("info", None, None)
    }
}

/// Providers that must be flushed before the process exits.
pub struct Telemetry {
    logger_provider: Option<SdkLoggerProvider>,
    meter_provider: Option<SdkMeterProvider>,
}

impl Telemetry {
    pub fn shutdown(self) {
        if let Some(provider) = self.logger_provider {
            if let Err(e) = provider.shutdown() {
                warn!("log provider shutdown failed: {}", e);
            }
        }
        if let Some(provider) = self.meter_provider {
            if let Err(e) = provider.shutdown() {
                warn!("meter provider shutdown failed: {}", e);
            }
        }
    }
}

/// Installs the global subscriber: stdout always, a rolling file when
/// `log_dir` is set, and the OTLP log bridge plus meter provider when
/// `otel_endpoint` is set. Call once, before any session starts, so the
/// relay counters bind to the real meter provider.
pub fn init_tracing(config: &LogConfig) -> Result<Telemetry> {
    let logger_provider = config.otel_endpoint.as_deref().map(init_logs).transpose()?;
    let meter_provider = config.otel_endpoint.as_deref().map(init_metrics).transpose()?;

    let otel_layer = logger_provider.as_ref().map(|provider| OpenTelemetryTracingBridge::new(provider));

    let file_layer = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = RollingFileAppender::new(Rotation::DAILY, dir, LOG_FILE_NAME);
            Some(fmt::layer().with_writer(appender).with_ansi(false))
        }
        None => None,
    };

    Registry::default()
        .with(filter_for(&config.log_level)?)
        .with(fmt::layer().with_thread_names(true))
        .with(file_layer)
        .with(otel_layer)
        .try_init()?;

    if let Some(provider) = &meter_provider {
        global::set_meter_provider(provider.clone());
    }
    if let Some(endpoint) = &config.otel_endpoint {
        info!("exporting logs and metrics to {}", endpoint);
    }

    Ok(Telemetry { logger_provider, meter_provider })
}

/// The exporter's own HTTP stack must never feed back into the bridge.
fn filter_for(log_level: &str) -> Result<EnvFilter> {
    Ok(EnvFilter::try_new(log_level)?
        .add_directive("hyper=off".parse()?)
        .add_directive("tonic=off".parse()?)
        .add_directive("h2=off".parse()?)
        .add_directive("reqwest=off".parse()?))
}

static RESOURCE: OnceLock<Resource> = OnceLock::new();
fn get_resource() -> Resource {
    RESOURCE
        .get_or_init(|| Resource::builder().with_service_name(SERVICE_NAME).build())
        .clone()
}

fn init_logs(endpoint: &str) -> Result<SdkLoggerProvider> {
    let exporter = LogExporter::builder()
        .with_http()
        .with_protocol(Protocol::HttpBinary)
        .with_endpoint(endpoint)
        .build()?;
    Ok(SdkLoggerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(get_resource())
        .build())
}

fn init_metrics(endpoint: &str) -> Result<SdkMeterProvider> {
    let exporter = MetricExporter::builder()
        .with_http()
        .with_protocol(Protocol::HttpBinary)
        .with_endpoint(endpoint)
        .build()?;
    Ok(SdkMeterProvider::builder()
        .with_periodic_exporter(exporter)
        .with_resource(get_resource())
        .build())
}

/// Relay counters. Without an OTLP endpoint they record into the no-op
/// global provider.
pub struct RelayMetrics {
    pub sessions_started: Counter<u64>,
    pub broker_connects: Counter<u64>,
    pub broker_faults: Counter<u64>,
    pub messages_relayed: Counter<u64>,
}

static METRICS: OnceLock<RelayMetrics> = OnceLock::new();

pub fn metrics() -> &'static RelayMetrics {
    METRICS.get_or_init(|| {
        let meter = global::meter("mqtt_relay");
        RelayMetrics {
            sessions_started: meter
                .u64_counter("relay_sessions_started")
                .with_description("Client sessions started")
                .build(),
            broker_connects: meter
                .u64_counter("relay_broker_connects")
                .with_description("Successful broker connections")
                .build(),
            broker_faults: meter
                .u64_counter("relay_broker_faults")
                .with_description("Broker connections lost or refused")
                .build(),
            messages_relayed: meter
                .u64_counter("relay_messages_relayed")
                .with_description("Message events delivered to clients")
                .build(),
        }
    })
}
