//! Message synthesis for metric alerts (spec §4.2 closing paragraph).

use crate::config::MetricKind;

/// Synthesize the default alert message for a metric observation. Callers
/// (evaluators) may override with a pre-built message instead.
pub fn synthesize(resource_type: &str, metric: MetricKind, value: f64) -> String {
    match metric {
        MetricKind::DiskRead | MetricKind::DiskWrite | MetricKind::NetworkIn | MetricKind::NetworkOut => {
            format!("{resource_type} {} at {:.1} MB/s", metric.as_str(), value)
        }
        MetricKind::Temperature => {
            format!("{resource_type} {} at {:.1}°C", metric.as_str(), value)
        }
        _ => format!("{resource_type} {} at {:.1}%", metric.as_str(), value),
    }
}

/// Convert a bytes/sec rate (as reported by pollers) to MB/s for display and
/// threshold comparison (spec §4.2, §4.4).
pub fn bytes_per_sec_to_mb_per_sec(bytes_per_sec: f64) -> f64 {
    bytes_per_sec / (1024.0 * 1024.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_message() {
        assert_eq!(synthesize("guest", MetricKind::Cpu, 91.25), "guest cpu at 91.2%");
    }

    #[test]
    fn rate_message_converts_units() {
        let mb = bytes_per_sec_to_mb_per_sec(10.0 * 1024.0 * 1024.0);
        assert_eq!(synthesize("node", MetricKind::NetworkIn, mb), "node networkIn at 10.0 MB/s");
    }

    #[test]
    fn temperature_message() {
        assert_eq!(synthesize("node", MetricKind::Temperature, 72.3), "node temperature at 72.3°C");
    }
}
