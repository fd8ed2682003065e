//! fleetops.toml configuration parser.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ConfigError, ConfigResult};
use crate::types::{PollBudget, Region, TierLadder};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    /// Module name; namespaces tags, the lock file and cooldown markers.
    #[serde(default)]
    pub module: String,
    #[serde(default)]
    pub regions: Vec<Region>,
    /// Full health check URL, e.g. `https://api.example.com/.devops/health`.
    #[serde(default)]
    pub health_check_url: String,
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    #[serde(default = "default_tiers")]
    pub instance_tiers: Vec<String>,
    #[serde(default)]
    pub launch: LaunchConfig,
    pub accelerator: Option<AcceleratorConfig>,
    pub dns: Option<DnsConfig>,
    #[serde(default)]
    pub timings: TimingsConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    pub autoscale: Option<AutoscaleConfig>,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LaunchConfig {
    pub template: Option<String>,
    pub startup_script: Option<String>,
    pub startup_script_region: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceleratorConfig {
    pub arns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsConfig {
    /// Record prefix; `*` for a wildcard record.
    pub subdomain: String,
    #[serde(default = "default_ttl")]
    pub ttl: u32,
    pub zones: Vec<DnsZone>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsZone {
    pub zone_id: String,
    pub domain: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingsConfig {
    pub pre_operation_pause: String,
    pub endpoint_health_interval: String,
    pub endpoint_health_attempts: u32,
    pub propagation_interval: String,
    pub propagation_attempts: u32,
    pub app_ready_interval: String,
    pub app_ready_attempts: u32,
    pub instance_running_interval: String,
    pub instance_running_attempts: u32,
    pub lock_confirm_interval: String,
    pub lock_confirm_attempts: u32,
}

impl Default for TimingsConfig {
    fn default() -> Self {
        Self {
            pre_operation_pause: "5s".to_string(),
            endpoint_health_interval: "5s".to_string(),
            endpoint_health_attempts: 60,
            propagation_interval: "5s".to_string(),
            propagation_attempts: 60,
            app_ready_interval: "5s".to_string(),
            app_ready_attempts: 30,
            instance_running_interval: "1s".to_string(),
            instance_running_attempts: 60,
            lock_confirm_interval: "1s".to_string(),
            lock_confirm_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub interval: String,
    pub fail_threshold: u32,
    pub max_rounds: u32,
    pub probe_timeout: String,
    pub connect_timeout: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: "30s".to_string(),
            fail_threshold: 3,
            max_rounds: 10,
            probe_timeout: "5s".to_string(),
            connect_timeout: "3s".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoscaleConfig {
    /// Below this per-node CPU average a node counts as low-load.
    pub low_threshold: f64,
    /// Above this region-wide CPU average the region scales up.
    pub high_threshold: f64,
    #[serde(default = "default_metric_period")]
    pub metric_period: String,
    #[serde(default = "default_scale_up_cooldown")]
    pub scale_up_cooldown: String,
    #[serde(default = "default_scale_down_cooldown")]
    pub scale_down_cooldown: String,
    #[serde(default)]
    pub region_min_nodes: HashMap<Region, u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    pub webhook_url: Option<String>,
    pub timeout: String,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout: "10s".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[default]
    Sim,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub kind: ProviderKind,
    #[serde(default = "default_sim_state")]
    pub state_file: PathBuf,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::Sim,
            state_file: default_sim_state(),
        }
    }
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("/tmp")
}

fn default_tiers() -> Vec<String> {
    vec![
        "t4g.small".to_string(),
        "c6g.xlarge".to_string(),
        "c6g.2xlarge".to_string(),
    ]
}

fn default_ttl() -> u32 {
    300
}

fn default_metric_period() -> String {
    "60s".to_string()
}

fn default_scale_up_cooldown() -> String {
    "5m".to_string()
}

fn default_scale_down_cooldown() -> String {
    "30m".to_string()
}

fn default_sim_state() -> PathBuf {
    PathBuf::from("fleetops-sim.json")
}

// ── Resolved settings ─────────────────────────────────────────────

/// Polling budgets and pauses used by controller operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    pub pre_operation_pause: Duration,
    pub endpoint_health: PollBudget,
    pub propagation: PollBudget,
    pub app_ready: PollBudget,
    pub instance_running: PollBudget,
    pub lock_confirm: PollBudget,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            pre_operation_pause: Duration::from_secs(5),
            endpoint_health: PollBudget::new(Duration::from_secs(5), 60),
            propagation: PollBudget::new(Duration::from_secs(5), 60),
            app_ready: PollBudget::new(Duration::from_secs(5), 30),
            instance_running: PollBudget::new(Duration::from_secs(1), 60),
            lock_confirm: PollBudget::new(Duration::from_secs(1), 5),
        }
    }
}

/// Monitoring-mode probe settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    pub interval: Duration,
    pub fail_threshold: u32,
    pub max_rounds: u32,
    pub probe_timeout: Duration,
    pub connect_timeout: Duration,
}

/// Autoscale thresholds and cooldown windows.
#[derive(Debug, Clone, PartialEq)]
pub struct AutoscalePolicy {
    pub low_threshold: f64,
    pub high_threshold: f64,
    pub metric_period: Duration,
    pub scale_up_cooldown: Duration,
    pub scale_down_cooldown: Duration,
    pub region_min_nodes: HashMap<Region, u32>,
}

impl AutoscalePolicy {
    /// Minimum node count kept in a region by scale-in. Defaults to 1.
    pub fn min_nodes(&self, region: &str) -> u32 {
        self.region_min_nodes.get(region).copied().unwrap_or(1)
    }
}

/// Parsed health check URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheckUrl {
    url: Url,
}

impl HealthCheckUrl {
    pub fn parse(raw: &str) -> ConfigResult<Self> {
        let url = Url::parse(raw).map_err(|_| ConfigError::HealthCheckUrl(raw.to_string()))?;
        let has_host = url.host_str().is_some_and(|h| !h.is_empty());
        let has_path = !url.path().is_empty() && url.path() != "/";
        if !has_host || !has_path || url.port_or_known_default().is_none() {
            return Err(ConfigError::HealthCheckUrl(raw.to_string()));
        }
        Ok(Self { url })
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    pub fn path(&self) -> &str {
        self.url.path()
    }

    pub fn port(&self) -> u16 {
        self.url.port_or_known_default().unwrap_or(80)
    }
}

impl FleetConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate.
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: FleetConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.module.trim().is_empty() {
            return Err(ConfigError::Missing("module"));
        }
        if self.regions.is_empty() {
            return Err(ConfigError::Missing("regions"));
        }
        if self.health_check_url.trim().is_empty() {
            return Err(ConfigError::Missing("health_check_url"));
        }
        HealthCheckUrl::parse(&self.health_check_url)?;

        if self.instance_tiers.is_empty() {
            return Err(ConfigError::Missing("instance_tiers"));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = self.instance_tiers.iter().find(|t| !seen.insert(t.as_str())) {
            return Err(ConfigError::Invalid(format!("duplicate instance tier {dup}")));
        }

        if let Some(acc) = &self.accelerator
            && acc.arns.is_empty()
        {
            return Err(ConfigError::Missing("accelerator.arns"));
        }
        if let Some(dns) = &self.dns {
            if dns.subdomain.trim().is_empty() {
                return Err(ConfigError::Missing("dns.subdomain"));
            }
            if dns.zones.is_empty() {
                return Err(ConfigError::Missing("dns.zones"));
            }
        }

        self.timings()?;
        self.monitor_settings()?;
        if let Some(policy) = self.autoscale_policy()?
            && policy.low_threshold >= policy.high_threshold
        {
            return Err(ConfigError::Invalid(format!(
                "autoscale.low_threshold ({}) must be below autoscale.high_threshold ({})",
                policy.low_threshold, policy.high_threshold
            )));
        }
        Ok(())
    }

    pub fn health_check(&self) -> ConfigResult<HealthCheckUrl> {
        HealthCheckUrl::parse(&self.health_check_url)
    }

    pub fn tier_ladder(&self) -> TierLadder {
        TierLadder::new(self.instance_tiers.clone())
    }

    pub fn timings(&self) -> ConfigResult<Timings> {
        let t = &self.timings;
        Ok(Timings {
            pre_operation_pause: field_duration("timings.pre_operation_pause", &t.pre_operation_pause)?,
            endpoint_health: PollBudget::new(
                field_duration("timings.endpoint_health_interval", &t.endpoint_health_interval)?,
                t.endpoint_health_attempts,
            ),
            propagation: PollBudget::new(
                field_duration("timings.propagation_interval", &t.propagation_interval)?,
                t.propagation_attempts,
            ),
            app_ready: PollBudget::new(
                field_duration("timings.app_ready_interval", &t.app_ready_interval)?,
                t.app_ready_attempts,
            ),
            instance_running: PollBudget::new(
                field_duration("timings.instance_running_interval", &t.instance_running_interval)?,
                t.instance_running_attempts,
            ),
            lock_confirm: PollBudget::new(
                field_duration("timings.lock_confirm_interval", &t.lock_confirm_interval)?,
                t.lock_confirm_attempts,
            ),
        })
    }

    pub fn monitor_settings(&self) -> ConfigResult<MonitorSettings> {
        let m = &self.monitor;
        Ok(MonitorSettings {
            interval: field_duration("monitor.interval", &m.interval)?,
            fail_threshold: m.fail_threshold.max(1),
            max_rounds: m.max_rounds,
            probe_timeout: field_duration("monitor.probe_timeout", &m.probe_timeout)?,
            connect_timeout: field_duration("monitor.connect_timeout", &m.connect_timeout)?,
        })
    }

    /// Autoscale policy, if `[autoscale]` is configured.
    pub fn autoscale_policy(&self) -> ConfigResult<Option<AutoscalePolicy>> {
        let Some(a) = &self.autoscale else {
            return Ok(None);
        };
        Ok(Some(AutoscalePolicy {
            low_threshold: a.low_threshold,
            high_threshold: a.high_threshold,
            metric_period: field_duration("autoscale.metric_period", &a.metric_period)?,
            scale_up_cooldown: field_duration("autoscale.scale_up_cooldown", &a.scale_up_cooldown)?,
            scale_down_cooldown: field_duration(
                "autoscale.scale_down_cooldown",
                &a.scale_down_cooldown,
            )?,
            region_min_nodes: a.region_min_nodes.clone(),
        }))
    }

    pub fn notify_timeout(&self) -> ConfigResult<Duration> {
        field_duration("notify.timeout", &self.notify.timeout)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.state_dir.join(format!("fleetops-{}-op.lock", self.module))
    }
}

fn field_duration(field: &'static str, value: &str) -> ConfigResult<Duration> {
    parse_duration(value).ok_or_else(|| ConfigError::Duration {
        field,
        value: value.to_string(),
    })
}

/// Parse a duration string like "5s", "500ms", "2m". A bare number is seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else if let Some(hours) = s.strip_suffix('h') {
        hours.parse::<u64>().ok().map(|h| Duration::from_secs(h * 3600))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
module = "api"
regions = ["us-west-2"]
health_check_url = "https://api.example.com/.devops/health"
"#;

    #[test]
    fn parse_minimal_applies_defaults() {
        let config = FleetConfig::from_toml_str(MINIMAL).unwrap();
        assert_eq!(config.module, "api");
        assert_eq!(config.instance_tiers.len(), 3);
        assert_eq!(config.state_dir, PathBuf::from("/tmp"));
        assert_eq!(config.timings().unwrap(), Timings::default());
        assert_eq!(
            config.lock_path(),
            PathBuf::from("/tmp/fleetops-api-op.lock")
        );
    }

    #[test]
    fn missing_module_is_rejected() {
        let err = FleetConfig::from_toml_str(
            r#"
regions = ["us-west-2"]
health_check_url = "https://api.example.com/health"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Missing("module")));
    }

    #[test]
    fn health_check_url_needs_host_and_path() {
        assert!(HealthCheckUrl::parse("https://api.example.com").is_err());
        assert!(HealthCheckUrl::parse("not a url").is_err());

        let url = HealthCheckUrl::parse("https://api.example.com/.devops/health").unwrap();
        assert_eq!(url.host(), "api.example.com");
        assert_eq!(url.path(), "/.devops/health");
        assert_eq!(url.port(), 443);
    }

    #[test]
    fn dns_section_requires_zones() {
        let toml_str = format!(
            "{MINIMAL}\n[dns]\nsubdomain = \"*\"\nzones = []\n"
        );
        let err = FleetConfig::from_toml_str(&toml_str).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("dns.zones")));
    }

    #[test]
    fn autoscale_thresholds_must_be_ordered() {
        let toml_str = format!(
            "{MINIMAL}\n[autoscale]\nlow_threshold = 80.0\nhigh_threshold = 20.0\n"
        );
        assert!(matches!(
            FleetConfig::from_toml_str(&toml_str),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn autoscale_policy_defaults() {
        let toml_str = format!(
            "{MINIMAL}\n[autoscale]\nlow_threshold = 10.0\nhigh_threshold = 70.0\n\n[autoscale.region_min_nodes]\nus-west-2 = 2\n"
        );
        let config = FleetConfig::from_toml_str(&toml_str).unwrap();
        let policy = config.autoscale_policy().unwrap().unwrap();
        assert_eq!(policy.scale_up_cooldown, Duration::from_secs(300));
        assert_eq!(policy.scale_down_cooldown, Duration::from_secs(1800));
        assert_eq!(policy.min_nodes("us-west-2"), 2);
        assert_eq!(policy.min_nodes("eu-west-1"), 1);
    }

    #[test]
    fn bad_timing_is_rejected() {
        let toml_str = format!(
            "{MINIMAL}\n[timings]\npre_operation_pause = \"soon\"\nendpoint_health_interval = \"5s\"\nendpoint_health_attempts = 60\npropagation_interval = \"5s\"\npropagation_attempts = 60\napp_ready_interval = \"5s\"\napp_ready_attempts = 30\ninstance_running_interval = \"1s\"\ninstance_running_attempts = 60\nlock_confirm_interval = \"1s\"\nlock_confirm_attempts = 5\n"
        );
        assert!(matches!(
            FleetConfig::from_toml_str(&toml_str),
            Err(ConfigError::Duration { .. })
        ));
    }

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("5s"), Some(Duration::from_secs(5)));
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("10"), Some(Duration::from_secs(10)));
        assert_eq!(parse_duration("abc"), None);
    }

    #[test]
    fn from_file_reads_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleetops.toml");
        std::fs::write(&path, MINIMAL).unwrap();
        let config = FleetConfig::from_file(&path).unwrap();
        assert_eq!(config.regions, vec!["us-west-2".to_string()]);
    }
}
