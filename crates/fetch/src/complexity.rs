use std::collections::HashMap;
use std::sync::Mutex;

/// Process-wide memory of hosts that have historically taken long to crawl.
/// The extractor marks a host after a slow pass; the orchestrator consults
/// it to start future requests for that host at the complex timeout preset.
///
/// Uses std::sync::Mutex because the lock is never held across await
/// points.
#[derive(Default)]
pub struct SiteComplexity {
    hosts: Mutex<HashMap<String, bool>>,
}

impl SiteComplexity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_complex(&self, host: &str) {
        let mut hosts = self.hosts.lock().expect("site complexity lock poisoned");
        let previous = hosts.insert(host.to_ascii_lowercase(), true);

        if previous != Some(true) {
            tracing::info!(host = %host, "Host marked as complex, future timeouts raised");
            metrics::gauge!("crawl.complex_hosts").set(hosts.values().filter(|&&c| c).count() as f64);
        }
    }

    pub fn is_complex(&self, host: &str) -> bool {
        self.hosts
            .lock()
            .expect("site complexity lock poisoned")
            .get(&host.to_ascii_lowercase())
            .copied()
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_host_is_simple() {
        let complexity = SiteComplexity::new();
        assert!(!complexity.is_complex("acme.example"));
    }

    #[test]
    fn test_mark_and_lookup_case_insensitive() {
        let complexity = SiteComplexity::new();
        complexity.mark_complex("ACME.example");
        assert!(complexity.is_complex("acme.example"));
        assert!(complexity.is_complex("Acme.Example"));
        assert!(!complexity.is_complex("other.example"));
    }
}
