//! Telemetry configuration. Only distributed tracing is exported; logs go to stdout.

use std::{collections::BTreeMap, time::Duration};

use duration_str::deserialize_duration;
use serde::Deserialize;
use url::Url;

/// Telemetry configuration for observability
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct TelemetryConfig {
    /// Service name for telemetry identification
    service_name: Option<String>,

    /// Custom resource attributes to attach to all telemetry
    resource_attributes: BTreeMap<String, String>,

    /// Exporters shared by all signals
    exporters: ExportersConfig,

    /// Tracing-specific configuration
    tracing: TracingConfig,
}

impl TelemetryConfig {
    /// Get the service name
    pub fn service_name(&self) -> Option<&str> {
        self.service_name.as_deref()
    }

    /// Get the resource attributes
    pub fn resource_attributes(&self) -> &BTreeMap<String, String> {
        &self.resource_attributes
    }

    /// Get the tracing configuration
    pub fn tracing(&self) -> &TracingConfig {
        &self.tracing
    }

    /// OTLP exporter for traces, if one is enabled.
    pub fn traces_otlp_config(&self) -> Option<&OtlpExporterConfig> {
        let exporters = self.tracing.exporters.as_ref().unwrap_or(&self.exporters);
        exporters.otlp.enabled.then_some(&exporters.otlp)
    }
}

/// Tracing configuration
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct TracingConfig {
    /// Whether spans are collected and exported.
    pub enabled: bool,

    /// Override global exporters for traces (optional)
    exporters: Option<ExportersConfig>,
}

/// Exporters configuration for telemetry
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct ExportersConfig {
    /// OTLP exporter configuration
    pub otlp: OtlpExporterConfig,
}

/// OTLP exporter configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OtlpExporterConfig {
    /// Whether this exporter is enabled
    pub enabled: bool,

    /// OTLP endpoint URL
    pub endpoint: Url,

    /// Protocol to use (grpc or http)
    pub protocol: OtlpProtocol,

    /// Request timeout
    #[serde(deserialize_with = "deserialize_duration")]
    pub timeout: Duration,

    /// Delay between two span batches
    #[serde(deserialize_with = "deserialize_duration")]
    pub report_interval: Duration,
}

impl Default for OtlpExporterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: Url::parse("http://localhost:4317").expect("default URL should be valid"),
            protocol: OtlpProtocol::default(),
            timeout: Duration::from_secs(60),
            report_interval: Duration::from_secs(5),
        }
    }
}

/// OTLP protocol selection
#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OtlpProtocol {
    /// gRPC protocol (default)
    #[default]
    Grpc,
    /// HTTP/protobuf protocol
    Http,
}
