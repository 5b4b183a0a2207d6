use config::Config as CConfig;
use tokio::time::Duration;

use crate::device::PowerBounds;
use crate::population::IntervalPolicy;

/// Runtime configuration, loaded from a TOML file with every field
/// defaulted so the file itself is optional.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: String,
    pub host: String,
    pub port: u16,
    pub device_count: usize,
    pub min_power: f64,
    pub max_power: f64,
    pub walk_step: f64,
    pub interval_min_ms: u64,
    pub interval_max_ms: u64,
    pub read_timeout_ms: u64,
    /// 0 means run until cancelled.
    pub run_duration_secs: u64,
}

impl Config {
    pub fn new(path: &str) -> anyhow::Result<Self> {
        let mut c = CConfig::new();
        c.merge(config::File::with_name(path).required(false))?;
        let config: Self = c.try_into()?;
        std::env::set_var("RUST_LOG", &config.log_level);
        Ok(config)
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn bounds(&self) -> PowerBounds {
        PowerBounds::new(self.min_power, self.max_power)
    }

    pub fn interval(&self) -> IntervalPolicy {
        if self.interval_min_ms >= self.interval_max_ms {
            IntervalPolicy::Fixed(Duration::from_millis(self.interval_min_ms))
        } else {
            IntervalPolicy::Jittered {
                min: Duration::from_millis(self.interval_min_ms),
                max: Duration::from_millis(self.interval_max_ms),
            }
        }
    }

    pub fn run_duration(&self) -> Option<Duration> {
        if self.run_duration_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.run_duration_secs))
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            host: "127.0.0.1".to_string(),
            port: 8080,
            device_count: num_cpus::get() * 25,
            min_power: 10.0,
            max_power: 1000.0,
            walk_step: 25.0,
            interval_min_ms: 1,
            interval_max_ms: 10,
            read_timeout_ms: 5_000,
            run_duration_secs: 0,
        }
    }
}
