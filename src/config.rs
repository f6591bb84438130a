use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;

use crate::scenario::Scenario;

const DEFAULT_PARALLELISM: [usize; 2] = [1, 10];
const DEFAULT_REQUESTS: u64 = 100_000;
const DEFAULT_STOP_TIMEOUT_MS: u64 = 1000;

/// Compares HTTP client and server throughput over a fake connection, TCP
/// loopback and in-memory pipes.
#[derive(Debug, Clone, Parser)]
#[command(name = "loopback-bench", version)]
pub struct BenchConfig {
    /// Scenario to run; may be repeated. Runs every scenario when omitted.
    #[arg(long = "scenario", value_enum)]
    pub scenarios: Vec<Scenario>,

    /// Parallelism multipliers to sweep. Each run spawns
    /// `available cores * parallelism` workers.
    #[arg(long, value_delimiter = ',', default_values_t = DEFAULT_PARALLELISM)]
    pub parallelism: Vec<usize>,

    /// Requests issued per run, shared by all workers.
    #[arg(long, default_value_t = DEFAULT_REQUESTS)]
    pub requests: u64,

    /// Address the TCP benchmark server binds to.
    #[arg(long, default_value = "127.0.0.1:0")]
    pub tcp_addr: SocketAddr,

    /// How long a benchmark server may take to stop after a run.
    #[arg(long, default_value_t = DEFAULT_STOP_TIMEOUT_MS)]
    pub stop_timeout_ms: u64,
}

impl BenchConfig {
    pub fn scenarios(&self) -> Vec<Scenario> {
        if self.scenarios.is_empty() {
            Scenario::ALL.to_vec()
        } else {
            self.scenarios.clone()
        }
    }

    /// Every (scenario, parallelism) combination, scenario-major.
    pub fn runs(&self) -> Vec<RunOptions> {
        self.scenarios()
            .into_iter()
            .flat_map(|scenario| {
                self.parallelism.iter().map(move |&parallelism| RunOptions {
                    scenario,
                    parallelism,
                    requests: self.requests,
                    tcp_addr: self.tcp_addr,
                    stop_timeout: Duration::from_millis(self.stop_timeout_ms),
                })
            })
            .collect()
    }
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            scenarios: Vec::new(),
            parallelism: DEFAULT_PARALLELISM.to_vec(),
            requests: DEFAULT_REQUESTS,
            tcp_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            stop_timeout_ms: DEFAULT_STOP_TIMEOUT_MS,
        }
    }
}

/// Settings for a single benchmark run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub scenario: Scenario,
    pub parallelism: usize,
    pub requests: u64,
    pub tcp_addr: SocketAddr,
    pub stop_timeout: Duration,
}

impl RunOptions {
    pub fn new(scenario: Scenario, parallelism: usize, requests: u64) -> Self {
        let defaults = BenchConfig::default();
        Self {
            scenario,
            parallelism,
            requests,
            tcp_addr: defaults.tcp_addr,
            stop_timeout: Duration::from_millis(defaults.stop_timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_parser() {
        let parsed = BenchConfig::parse_from(["loopback-bench"]);
        let defaults = BenchConfig::default();

        assert_eq!(parsed.parallelism, defaults.parallelism);
        assert_eq!(parsed.requests, defaults.requests);
        assert_eq!(parsed.tcp_addr, defaults.tcp_addr);
        assert_eq!(parsed.stop_timeout_ms, defaults.stop_timeout_ms);
        assert_eq!(parsed.scenarios(), Scenario::ALL.to_vec());
    }

    #[test]
    fn test_parse_scenarios_and_parallelism() {
        let config = BenchConfig::parse_from([
            "loopback-bench",
            "--scenario",
            "fake-conn",
            "--scenario",
            "inmemory-big-response",
            "--parallelism",
            "1,1000",
            "--requests",
            "50",
        ]);

        assert_eq!(
            config.scenarios(),
            vec![Scenario::FakeConn, Scenario::InmemoryBigResponse]
        );
        let runs = config.runs();
        assert_eq!(runs.len(), 4);
        assert_eq!(runs[1].scenario, Scenario::FakeConn);
        assert_eq!(runs[1].parallelism, 1000);
        assert!(runs.iter().all(|run| run.requests == 50));
    }

    #[test]
    fn test_rejects_unknown_scenario() {
        assert!(BenchConfig::try_parse_from(["loopback-bench", "--scenario", "nope"]).is_err());
    }
}
