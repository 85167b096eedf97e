use std::net::SocketAddr;

pub const LOG_ENV: &str = "BACKCAST_LOG";

/// `BACKCAST_LOG` wins over the configured level. Logs go to stderr so
/// command output on stdout stays machine readable.
pub fn init_tracing(log_level: &str, log_format: &str) -> Result<(), String> {
    let filter = std::env::var(LOG_ENV).unwrap_or_else(|_| log_level.to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_new(filter)
        .map_err(|err| format!("invalid log filter: {err}"))?;

    let format = log_format.trim().to_lowercase();
    let result = if format == "json" {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .json()
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .try_init()
    };
    result.map_err(|err| format!("failed to install tracing subscriber: {err}"))
}

#[cfg(feature = "prometheus")]
pub fn init_metrics(metrics_addr: Option<&str>) -> Result<Option<SocketAddr>, String> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    let Some(raw) = metrics_addr else {
        return Ok(None);
    };
    let addr: SocketAddr = raw
        .parse()
        .map_err(|err| format!("invalid --metrics-addr (expected host:port): {err}"))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|err| format!("failed to install prometheus exporter: {err}"))?;

    tracing::info!(metrics_addr = %addr, "prometheus metrics exporter enabled");
    Ok(Some(addr))
}

#[cfg(not(feature = "prometheus"))]
pub fn init_metrics(metrics_addr: Option<&str>) -> Result<Option<SocketAddr>, String> {
    if metrics_addr.is_some() {
        return Err("metrics exporter requires backcast-cli feature `prometheus`".to_string());
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::init_metrics;

    #[test]
    fn no_metrics_addr_is_a_no_op() {
        assert_eq!(init_metrics(None), Ok(None));
    }

    #[cfg(feature = "prometheus")]
    #[test]
    fn malformed_metrics_addr_is_rejected() {
        let err = init_metrics(Some("not-an-address")).expect_err("bad addr");
        assert!(err.contains("--metrics-addr"));
    }
}
