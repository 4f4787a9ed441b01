//! Command line and environment configuration

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use koli_common::telemetry::{LogFormat, TelemetryConfig};

/// Service name reported in logs, traces and metrics
pub const SERVICE_NAME: &str = "koli-operator";

/// Log line format accepted on the command line
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormatArg {
    /// One JSON object per line
    #[default]
    Json,
    /// Human readable
    Text,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Json => LogFormat::Json,
            LogFormatArg::Text => LogFormat::Text,
        }
    }
}

/// Koli - controllers for the Koli application platform
#[derive(Parser, Debug, Clone)]
#[command(name = "koli-operator", version, about, long_about = None)]
pub struct Cli {
    /// Print the CRD manifests as YAML and exit
    #[arg(long)]
    pub crd: bool,

    /// Path to a kubeconfig; in-cluster configuration when unset
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Domain used for default app routes; empty disables them
    #[arg(long, env = "KOLI_DEFAULT_DOMAIN", default_value = "")]
    pub default_domain: String,

    /// Workers per controller
    #[arg(long, env = "KOLI_WORKERS", default_value_t = 1, value_parser = clap::value_parser!(u16).range(1..))]
    pub workers: u16,

    /// Log line format
    #[arg(long, env = "KOLI_LOG_FORMAT", value_enum, default_value_t = LogFormatArg::Json)]
    pub log_format: LogFormatArg,

    /// OTLP collector endpoint for traces and metrics
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,
}

/// Settings the running operator needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Explicit kubeconfig path
    pub kubeconfig: Option<PathBuf>,
    /// Domain for default routes; `None` disables them
    pub default_domain: Option<String>,
    /// Workers per controller, at least one
    pub workers: usize,
}

impl Cli {
    /// Runtime settings for the controllers
    pub fn operator_config(&self) -> OperatorConfig {
        let domain = self.default_domain.trim();
        OperatorConfig {
            kubeconfig: self.kubeconfig.clone(),
            default_domain: (!domain.is_empty()).then(|| domain.to_string()),
            workers: usize::from(self.workers),
        }
    }

    /// Settings for [`koli_common::telemetry::init_telemetry`]
    pub fn telemetry_config(&self) -> TelemetryConfig {
        TelemetryConfig {
            service_name: SERVICE_NAME.to_string(),
            otlp_endpoint: self.otlp_endpoint.clone().filter(|e| !e.is_empty()),
            log_format: self.log_format.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["koli-operator"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).expect("valid arguments")
    }

    #[test]
    fn empty_domain_disables_default_routes() {
        let cli = parse(&["--default-domain", ""]);
        assert_eq!(cli.operator_config().default_domain, None);

        let cli = parse(&["--default-domain", "apps.example.com"]);
        assert_eq!(
            cli.operator_config().default_domain.as_deref(),
            Some("apps.example.com")
        );
    }

    #[test]
    fn workers_default_to_one_and_reject_zero() {
        assert_eq!(parse(&[]).operator_config().workers, 1);
        assert_eq!(parse(&["--workers", "4"]).operator_config().workers, 4);
        assert!(Cli::try_parse_from(["koli-operator", "--workers", "0"]).is_err());
    }

    #[test]
    fn log_format_maps_to_telemetry() {
        let cli = parse(&["--log-format", "text"]);
        assert_eq!(cli.telemetry_config().log_format, LogFormat::Text);
        assert_eq!(cli.telemetry_config().service_name, SERVICE_NAME);
    }
}
