//! Mirror probing and ranking.
//!
//! Every candidate gets one HEAD request, all in flight at once, each bounded
//! by the probe timeout. Unreachable candidates are dropped. Reachable ones
//! are ordered by latency, with candidates whose recorded success rate is
//! below the cutoff moved behind all the others.

use super::stats::MirrorStatsStore;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;

#[derive(Debug, Clone, PartialEq)]
pub struct ProbeResult {
    pub url: String,
    pub latency: Option<Duration>,
    pub error: Option<String>,
}

impl ProbeResult {
    pub fn reachable(&self) -> bool {
        self.latency.is_some()
    }
}

/// Probe `urls` concurrently. Results come back in input order.
pub async fn probe_all(client: &reqwest::Client, urls: &[String], timeout: Duration) -> Vec<ProbeResult> {
    let mut set = JoinSet::new();
    for (index, url) in urls.iter().enumerate() {
        let client = client.clone();
        let url = url.clone();
        set.spawn(async move { (index, probe_one(&client, url, timeout).await) });
    }

    let mut results: Vec<Option<ProbeResult>> = vec![None; urls.len()];
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, result)) => results[index] = Some(result),
            Err(e) => tracing::warn!(error = %e, "Mirror probe task failed"),
        }
    }

    results
        .into_iter()
        .zip(urls)
        .map(|(result, url)| {
            result.unwrap_or_else(|| ProbeResult {
                url: url.clone(),
                latency: None,
                error: Some("probe task aborted".into()),
            })
        })
        .collect()
}

async fn probe_one(client: &reqwest::Client, url: String, timeout: Duration) -> ProbeResult {
    let started = Instant::now();
    let outcome = tokio::time::timeout(timeout, client.head(&url).send()).await;
    let (latency, error) = match outcome {
        Ok(Ok(response)) if response.status().is_success() => (Some(started.elapsed()), None),
        Ok(Ok(response)) => (None, Some(format!("HTTP {}", response.status()))),
        Ok(Err(e)) => (None, Some(e.to_string())),
        Err(_) => (None, Some(format!("no response within {:?}", timeout))),
    };
    match &error {
        None => tracing::debug!(mirror = %url, latency_ms = started.elapsed().as_millis() as u64, "Mirror reachable"),
        Some(e) => tracing::debug!(mirror = %url, error = %e, "Mirror excluded"),
    }
    ProbeResult { url, latency, error }
}

/// Order reachable probes for transfer. Falls back to the probe order when
/// nothing was reachable, so a flaky probe never blocks a download outright.
pub fn rank(probes: &[ProbeResult], stats: &MirrorStatsStore, min_success_rate: f64) -> Vec<String> {
    let mut reachable: Vec<(bool, Duration, usize, &str)> = probes
        .iter()
        .enumerate()
        .filter_map(|(i, p)| {
            let latency = p.latency?;
            let flaky = stats.success_rate(&p.url) < min_success_rate;
            if flaky {
                tracing::info!(mirror = %p.url, "Mirror deprioritized by recorded failures");
            }
            Some((flaky, latency, i, p.url.as_str()))
        })
        .collect();

    if reachable.is_empty() {
        tracing::warn!(candidates = probes.len(), "No mirror answered the probe, trying all in listed order");
        return probes.iter().map(|p| p.url.clone()).collect();
    }

    reachable.sort();
    reachable.into_iter().map(|(_, _, _, url)| url.to_string()).collect()
}
