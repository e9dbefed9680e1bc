//! Connection options shared by every subcommand.

pub mod duration;

use anyhow::Context;
use clap::Parser;
use kafka_reconcile_consumer::ConsumerConfig;
use schema_registry::DEFAULT_REGISTRY_TOPIC;
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
pub struct ClusterOpts {
    /// Kafka bootstrap servers (comma-separated)
    #[arg(long, default_value = "localhost:9092", env = "KAFKA_BOOTSTRAP_SERVERS")]
    pub bootstrap_servers: String,

    /// Schema registry base URL
    #[arg(long, env = "SCHEMA_REGISTRY_URL")]
    pub registry_url: Option<String>,

    /// Compacted topic the schema registry stores its state in
    #[arg(long, default_value = DEFAULT_REGISTRY_TOPIC)]
    pub registry_topic: String,

    /// Timeout for admin operations and registry calls ("30s", "5m", "300")
    #[arg(long, default_value = "30s")]
    pub operation_timeout: String,

    /// Extra Kafka client property (key=value), e.g. security settings
    #[arg(long = "kafka-property", value_name = "KEY=VALUE")]
    pub kafka_properties: Vec<String>,
}

impl ClusterOpts {
    pub fn timeout(&self) -> anyhow::Result<Duration> {
        let timeout = duration::parse_duration(&self.operation_timeout)?;
        if timeout.is_zero() {
            anyhow::bail!("Operation timeout must be positive: {}", self.operation_timeout);
        }
        Ok(timeout)
    }

    pub fn properties(&self) -> anyhow::Result<BTreeMap<String, String>> {
        self.kafka_properties
            .iter()
            .map(|prop| {
                let (key, value) = prop
                    .split_once('=')
                    .with_context(|| format!("Invalid Kafka property (expected key=value): {prop}"))?;
                let key = key.trim();
                if key.is_empty() {
                    anyhow::bail!("Invalid Kafka property (empty key): {prop}");
                }
                Ok((key.to_string(), value.to_string()))
            })
            .collect()
    }

    pub fn consumer_config(&self) -> anyhow::Result<ConsumerConfig> {
        Ok(ConsumerConfig {
            brokers: self.bootstrap_servers.clone(),
            metadata_timeout: self.timeout()?,
            properties: self.properties()?,
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(props: &[&str]) -> ClusterOpts {
        ClusterOpts {
            bootstrap_servers: "broker:9092".to_string(),
            registry_url: None,
            registry_topic: DEFAULT_REGISTRY_TOPIC.to_string(),
            operation_timeout: "2m".to_string(),
            kafka_properties: props.iter().map(|p| p.to_string()).collect(),
        }
    }

    #[test]
    fn test_properties_parse() {
        let props = opts(&["security.protocol=SASL_SSL", "sasl.jaas.config=a=b"])
            .properties()
            .unwrap();
        assert_eq!(props["security.protocol"], "SASL_SSL");
        // Only the first '=' separates key and value
        assert_eq!(props["sasl.jaas.config"], "a=b");
    }

    #[test]
    fn test_properties_reject_malformed() {
        assert!(opts(&["no-separator"]).properties().is_err());
        assert!(opts(&["=value"]).properties().is_err());
    }

    #[test]
    fn test_consumer_config_from_opts() {
        let config = opts(&[]).consumer_config().unwrap();
        assert_eq!(config.brokers, "broker:9092");
        assert_eq!(config.metadata_timeout, Duration::from_secs(120));
        assert_eq!(config.auto_offset_reset, "earliest");
    }

    #[test]
    fn test_cli_defaults() {
        let parsed = ClusterOpts::try_parse_from(["test"]).unwrap();
        assert_eq!(parsed.registry_topic, "_schemas");
        assert_eq!(parsed.timeout().unwrap(), Duration::from_secs(30));
    }
}
