//! Autoscaler — CPU-driven scaling with cooldown windows.
//!
//! Each pass lists the fleet through [`ScaleActions`], evaluates every
//! region's load and acts on the decision. The actual scaling is performed
//! by the controller; this module owns only the policy and the markers.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use fleetops_controller::notify::paragraphs;
use fleetops_core::{AutoscalePolicy, Datapoint, MetricSource, MetricWindow, Node, Notifier, Region};
use fleetops_state::{ActionClass, CooldownStore};
use tracing::{debug, error, info, warn};

use crate::actions::ScaleActions;

/// Datapoints fetched per node, in metric periods.
const WINDOW_PERIODS: u32 = 12;

/// Most recent datapoints averaged per node.
const RECENT_SAMPLES: usize = 6;

/// What a region's load calls for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDecision {
    ScaleUp,
    /// Every node is under the low threshold.
    Shrink,
    NoChange,
}

/// Load of one region.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegionLoad {
    pub average: f64,
    pub nodes: usize,
    pub low_load: usize,
}

impl RegionLoad {
    /// Aggregate per-node averages. Nodes averaging zero count towards the
    /// region size but never as low-load.
    pub fn from_averages(averages: &[f64], low_threshold: f64) -> Self {
        let nodes = averages.len();
        let total: f64 = averages.iter().sum();
        let low_load = averages.iter().filter(|&&a| a > 0.0 && a < low_threshold).count();
        Self {
            average: if nodes == 0 { 0.0 } else { total / nodes as f64 },
            nodes,
            low_load,
        }
    }

    pub fn all_low(&self) -> bool {
        self.nodes > 0 && self.low_load == self.nodes
    }

    pub fn decide(&self, policy: &AutoscalePolicy) -> ScaleDecision {
        if self.average > policy.high_threshold {
            ScaleDecision::ScaleUp
        } else if self.all_low() {
            ScaleDecision::Shrink
        } else {
            ScaleDecision::NoChange
        }
    }
}

/// Mean of the most recent samples, newest first. Zero without data.
pub fn node_average(mut points: Vec<Datapoint>) -> f64 {
    if points.is_empty() {
        return 0.0;
    }
    points.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    let recent = &points[..points.len().min(RECENT_SAMPLES)];
    recent.iter().map(|p| p.value).sum::<f64>() / recent.len() as f64
}

/// The autoscaler evaluates CPU load per region and scales regions up,
/// down or in.
pub struct Autoscaler {
    actions: Arc<dyn ScaleActions>,
    metrics: Arc<dyn MetricSource>,
    notifier: Arc<dyn Notifier>,
    cooldowns: CooldownStore,
    policy: AutoscalePolicy,
}

impl Autoscaler {
    pub fn new(
        actions: Arc<dyn ScaleActions>,
        metrics: Arc<dyn MetricSource>,
        notifier: Arc<dyn Notifier>,
        cooldowns: CooldownStore,
        policy: AutoscalePolicy,
    ) -> Self {
        Self {
            actions,
            metrics,
            notifier,
            cooldowns,
            policy,
        }
    }

    /// Load of one region over the trailing metric window.
    pub async fn region_load(&self, region: &str, nodes: &[Node], now: DateTime<Utc>) -> RegionLoad {
        let window = MetricWindow::trailing(now, self.policy.metric_period, WINDOW_PERIODS);
        let mut averages = Vec::with_capacity(nodes.len());
        for node in nodes {
            let Some(id) = node.id() else {
                warn!(%region, %node, "node has no id, no metrics to read");
                averages.push(0.0);
                continue;
            };
            let points = match self.metrics.query(region, id, window).await {
                Ok(points) => points,
                Err(e) => {
                    error!(%region, %id, error = %e, "failed to read cpu metrics");
                    Vec::new()
                }
            };
            averages.push(node_average(points));
        }
        RegionLoad::from_averages(&averages, self.policy.low_threshold)
    }

    /// Evaluate every region once and act on the decisions. Scaling and
    /// cooldown marker failures are logged per region, and scaling outcomes
    /// are reported through the notifier; only listing the fleet can fail
    /// the pass.
    pub async fn run_once(&self) -> anyhow::Result<Vec<(Region, ScaleDecision)>> {
        let fleet = self.actions.fleet_nodes().await?;
        let mut decisions = Vec::with_capacity(fleet.len());

        for (region, nodes) in &fleet {
            if nodes.is_empty() {
                continue;
            }
            let load = self.region_load(region, nodes, Utc::now()).await;
            let decision = load.decide(&self.policy);
            debug!(
                %region,
                average = load.average,
                nodes = load.nodes,
                low_load = load.low_load,
                ?decision,
                "region load evaluated"
            );

            match decision {
                ScaleDecision::ScaleUp => self.scale_up(region, &load).await,
                ScaleDecision::Shrink => self.shrink(region, &load).await,
                ScaleDecision::NoChange => {}
            }
            decisions.push((region.clone(), decision));
        }
        Ok(decisions)
    }

    /// Whether `class` is out of its cooldown window. An unreadable marker
    /// counts as still cooling down.
    fn cooled_down(&self, region: &str, class: ActionClass, window: Duration) -> bool {
        match self.cooldowns.elapsed(class, window, Utc::now()) {
            Ok(elapsed) => {
                if !elapsed {
                    debug!(%region, ?class, ?window, "cooling down");
                }
                elapsed
            }
            Err(e) => {
                error!(%region, ?class, error = %e, "cannot read cooldown marker, skipping");
                false
            }
        }
    }

    fn mark(&self, region: &str, class: ActionClass) {
        if let Err(e) = self.cooldowns.record(class, Utc::now()) {
            error!(%region, ?class, error = %e, "failed to write cooldown marker");
        }
    }

    async fn scale_up(&self, region: &str, load: &RegionLoad) {
        if !self.cooled_down(region, ActionClass::ScaleUp, self.policy.scale_up_cooldown) {
            return;
        }
        info!(
            %region,
            average = load.average,
            nodes = load.nodes,
            threshold = self.policy.high_threshold,
            "high cpu load, scaling up"
        );
        let headline = format!(
            "<strong>nodes in {region} are on high load, current avg. cpu {:.2}%, total nodes: {}</strong>",
            load.average, load.nodes
        );
        match self.actions.scale_up(region).await {
            Ok(message) => {
                self.mark(region, ActionClass::ScaleUp);
                info!(%region, %message, "scale up succeeded");
                self.notify(
                    &format!("High cpu load {:.2}% in {region}, scale up succeeded", load.average),
                    &[headline, "Scale up succeeded".to_string()],
                )
                .await;
            }
            Err(e) => {
                error!(%region, error = %e, "scale up failed");
                self.notify(
                    &format!("High cpu load {:.2}% in {region}, scale up failed", load.average),
                    &[headline, format!("Scale up failed, message: {e}")],
                )
                .await;
            }
        }
    }

    async fn shrink(&self, region: &str, load: &RegionLoad) {
        let cooldown = self.policy.scale_down_cooldown;
        let headline = format!(
            "<strong>nodes in {region} are on low load, current avg. cpu {:.2}%</strong>",
            load.average
        );

        let instance_type = match self.actions.instance_type(region).await {
            Ok(t) => Some(t),
            Err(e) => {
                warn!(%region, error = %e, "cannot read instance type, skipping scale down");
                None
            }
        };
        let tiers = self.actions.tiers();
        let can_shrink_tier = instance_type
            .as_deref()
            .is_some_and(|t| tiers.position(t).is_some() && !tiers.is_smallest(t));
        let mut scaled_down = false;
        if can_shrink_tier && self.cooled_down(region, ActionClass::ScaleSmall, cooldown) {
            info!(%region, average = load.average, threshold = self.policy.low_threshold, "low cpu load, scaling down");
            match self.actions.scale_down(region).await {
                Ok(message) => {
                    scaled_down = true;
                    self.mark(region, ActionClass::ScaleSmall);
                    info!(%region, %message, "scale down succeeded");
                    self.notify(
                        "Low cpu load, scale down succeeded",
                        &[headline.clone(), "Scale down succeeded".to_string()],
                    )
                    .await;
                }
                Err(e) => {
                    error!(%region, error = %e, "scale down failed");
                    self.notify(
                        "Low cpu load, scale down failed",
                        &[headline.clone(), format!("Scale down failed, message: {e}")],
                    )
                    .await;
                }
            }
        }

        // A scale-down in this pass holds off the scale-in, marker or not.
        let min_nodes = self.policy.min_nodes(region) as usize;
        if !scaled_down && load.nodes > min_nodes && self.cooled_down(region, ActionClass::ScaleSmall, cooldown) {
            info!(%region, nodes = load.nodes, min_nodes, "low cpu load, scaling in");
            match self.actions.scale_in(region, 1).await {
                Ok(message) => {
                    self.mark(region, ActionClass::ScaleSmall);
                    info!(%region, %message, "scale in succeeded");
                    self.notify(
                        "Low cpu load, scale in succeeded",
                        &[headline, "Scale in succeeded".to_string()],
                    )
                    .await;
                }
                Err(e) => {
                    error!(%region, error = %e, "scale in failed");
                    self.notify(
                        "Low cpu load, scale in failed",
                        &[headline, format!("Scale in failed, message: {e}")],
                    )
                    .await;
                }
            }
        }
    }

    async fn notify(&self, subject: &str, lines: &[String]) {
        if let Err(e) = self.notifier.send_alert(subject, &paragraphs(lines)).await {
            error!(%subject, error = %e, "failed to send alert");
        }
    }

    /// Run the autoscaler loop.
    pub async fn run(&self, interval: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), "autoscaler started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.run_once().await {
                        error!(error = %e, "autoscaler evaluation failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("autoscaler shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, HashMap};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use fleetops_core::{ProviderResult, TierLadder};

    struct FakeFleet {
        nodes: BTreeMap<Region, Vec<Node>>,
        instance_type: String,
        tiers: TierLadder,
        fail: bool,
        calls: Mutex<Vec<String>>,
    }

    impl FakeFleet {
        fn new(region: &str, count: usize, instance_type: &str) -> Self {
            let nodes = (0..count).map(|i| Node::from_id(format!("i-{i}"))).collect();
            Self {
                nodes: BTreeMap::from([(region.to_string(), nodes)]),
                instance_type: instance_type.to_string(),
                tiers: TierLadder::new(vec!["small".into(), "medium".into(), "large".into()]),
                fail: false,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn act(&self, call: String) -> anyhow::Result<String> {
            self.calls.lock().unwrap().push(call.clone());
            if self.fail {
                anyhow::bail!("{call} exploded");
            }
            Ok(format!("{call} done"))
        }
    }

    #[async_trait]
    impl ScaleActions for FakeFleet {
        async fn fleet_nodes(&self) -> anyhow::Result<BTreeMap<Region, Vec<Node>>> {
            Ok(self.nodes.clone())
        }

        async fn instance_type(&self, _region: &str) -> anyhow::Result<String> {
            Ok(self.instance_type.clone())
        }

        fn tiers(&self) -> &TierLadder {
            &self.tiers
        }

        async fn scale_up(&self, region: &str) -> anyhow::Result<String> {
            self.act(format!("up {region}"))
        }

        async fn scale_down(&self, region: &str) -> anyhow::Result<String> {
            self.act(format!("down {region}"))
        }

        async fn scale_in(&self, region: &str, amount: u32) -> anyhow::Result<String> {
            self.act(format!("in {region} {amount}"))
        }
    }

    /// Every node of a region reports the same value, or per-node values.
    struct FakeMetrics {
        per_node: HashMap<String, f64>,
        default: Option<f64>,
    }

    #[async_trait]
    impl MetricSource for FakeMetrics {
        async fn query(&self, _region: &str, node_id: &str, window: MetricWindow) -> ProviderResult<Vec<Datapoint>> {
            let Some(value) = self.per_node.get(node_id).copied().or(self.default) else {
                return Ok(Vec::new());
            };
            Ok((0..12)
                .map(|i| Datapoint {
                    timestamp: window.end - chrono::Duration::minutes(i),
                    value,
                })
                .collect())
        }
    }

    #[derive(Default)]
    struct Alerts(Mutex<Vec<String>>);

    #[async_trait]
    impl Notifier for Alerts {
        async fn send_alert(&self, subject: &str, _html: &str) -> anyhow::Result<()> {
            self.0.lock().unwrap().push(subject.to_string());
            Ok(())
        }
    }

    fn policy() -> AutoscalePolicy {
        AutoscalePolicy {
            low_threshold: 10.0,
            high_threshold: 70.0,
            metric_period: Duration::from_secs(60),
            scale_up_cooldown: Duration::from_secs(300),
            scale_down_cooldown: Duration::from_secs(1800),
            region_min_nodes: HashMap::new(),
        }
    }

    fn uniform(cpu: f64) -> Arc<FakeMetrics> {
        Arc::new(FakeMetrics {
            per_node: HashMap::new(),
            default: Some(cpu),
        })
    }

    fn scaler(
        fleet: Arc<FakeFleet>,
        metrics: Arc<FakeMetrics>,
        alerts: Arc<Alerts>,
        dir: &std::path::Path,
    ) -> Autoscaler {
        Autoscaler::new(fleet, metrics, alerts, CooldownStore::new(dir, "api"), policy())
    }

    fn point(minutes_ago: i64, value: f64) -> Datapoint {
        Datapoint {
            timestamp: Utc::now() - chrono::Duration::minutes(minutes_ago),
            value,
        }
    }

    #[test]
    fn node_average_uses_the_six_newest_points() {
        let mut points: Vec<Datapoint> = (0..6).map(|i| point(i, 50.0)).collect();
        points.extend((6..12).map(|i| point(i, 0.0)));
        points.reverse();
        assert_eq!(node_average(points), 50.0);
        assert_eq!(node_average(vec![point(0, 4.0), point(1, 8.0)]), 6.0);
        assert_eq!(node_average(Vec::new()), 0.0);
    }

    #[test]
    fn zero_load_nodes_are_not_low_load() {
        let load = RegionLoad::from_averages(&[5.0, 0.0], 10.0);
        assert_eq!(load.low_load, 1);
        assert!(!load.all_low());
        assert_eq!(load.average, 2.5);

        let load = RegionLoad::from_averages(&[5.0, 9.9], 10.0);
        assert!(load.all_low());
        assert_eq!(load.decide(&policy()), ScaleDecision::Shrink);
    }

    #[test]
    fn high_average_wins_over_low_nodes() {
        let load = RegionLoad::from_averages(&[150.0, 5.0], 10.0);
        assert_eq!(load.decide(&policy()), ScaleDecision::ScaleUp);
        let load = RegionLoad::from_averages(&[70.0, 70.0], 10.0);
        assert_eq!(load.decide(&policy()), ScaleDecision::NoChange);
    }

    #[tokio::test]
    async fn scale_up_respects_cooldown() {
        let dir = tempfile::tempdir().unwrap();
        let fleet = Arc::new(FakeFleet::new("us-west-2", 2, "small"));
        let alerts = Arc::new(Alerts::default());
        let scaler = scaler(fleet.clone(), uniform(90.0), alerts.clone(), dir.path());

        let first = scaler.run_once().await.unwrap();
        assert_eq!(first, vec![("us-west-2".to_string(), ScaleDecision::ScaleUp)]);
        scaler.run_once().await.unwrap();

        assert_eq!(fleet.calls(), vec!["up us-west-2"]);
        let alerts = alerts.0.lock().unwrap().clone();
        assert_eq!(alerts, vec!["High cpu load 90.00% in us-west-2, scale up succeeded"]);
    }

    #[tokio::test]
    async fn failed_scale_up_leaves_the_marker_alone() {
        let dir = tempfile::tempdir().unwrap();
        let mut fleet = FakeFleet::new("us-west-2", 2, "small");
        fleet.fail = true;
        let fleet = Arc::new(fleet);
        let alerts = Arc::new(Alerts::default());
        let scaler = scaler(fleet.clone(), uniform(90.0), alerts.clone(), dir.path());

        scaler.run_once().await.unwrap();
        scaler.run_once().await.unwrap();

        assert_eq!(fleet.calls(), vec!["up us-west-2", "up us-west-2"]);
        assert!(alerts.0.lock().unwrap().iter().all(|s| s.ends_with("scale up failed")));
        let store = CooldownStore::new(dir.path(), "api");
        assert_eq!(store.last(ActionClass::ScaleUp).unwrap(), None);
    }

    #[tokio::test]
    async fn scale_down_blocks_scale_in_in_the_same_pass() {
        let dir = tempfile::tempdir().unwrap();
        let fleet = Arc::new(FakeFleet::new("us-west-2", 3, "medium"));
        let alerts = Arc::new(Alerts::default());
        let scaler = scaler(fleet.clone(), uniform(3.0), alerts.clone(), dir.path());

        scaler.run_once().await.unwrap();

        assert_eq!(fleet.calls(), vec!["down us-west-2"]);
        assert_eq!(alerts.0.lock().unwrap().clone(), vec!["Low cpu load, scale down succeeded"]);
    }

    #[tokio::test]
    async fn smallest_tier_scales_in_down_to_the_minimum() {
        let dir = tempfile::tempdir().unwrap();
        let fleet = Arc::new(FakeFleet::new("us-west-2", 2, "small"));
        let alerts = Arc::new(Alerts::default());
        let scaler = scaler(fleet.clone(), uniform(3.0), alerts.clone(), dir.path());

        scaler.run_once().await.unwrap();
        assert_eq!(fleet.calls(), vec!["in us-west-2 1"]);

        let single = Arc::new(FakeFleet::new("us-west-2", 1, "small"));
        let other = tempfile::tempdir().unwrap();
        let scaler = Autoscaler::new(
            single.clone(),
            uniform(3.0),
            alerts,
            CooldownStore::new(other.path(), "api"),
            policy(),
        );
        scaler.run_once().await.unwrap();
        assert!(single.calls().is_empty());
    }

    #[tokio::test]
    async fn nodes_without_data_block_shrinking() {
        let dir = tempfile::tempdir().unwrap();
        let fleet = Arc::new(FakeFleet::new("us-west-2", 2, "medium"));
        let metrics = Arc::new(FakeMetrics {
            per_node: HashMap::from([("i-0".to_string(), 3.0)]),
            default: None,
        });
        let scaler = scaler(fleet.clone(), metrics, Arc::new(Alerts::default()), dir.path());

        let decisions = scaler.run_once().await.unwrap();
        assert_eq!(decisions[0].1, ScaleDecision::NoChange);
        assert!(fleet.calls().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unwritable_marker_still_alerts_and_moves_on() {
        let dir = tempfile::tempdir().unwrap();
        let store = CooldownStore::new(dir.path(), "api");
        // Reads see no marker, writes fail.
        std::os::unix::fs::symlink(dir.path().join("gone/marker"), store.marker_path(ActionClass::ScaleUp)).unwrap();

        let mut fleet = FakeFleet::new("us-west-2", 2, "small");
        fleet
            .nodes
            .insert("eu-west-1".to_string(), vec![Node::from_id("i-eu")]);
        let fleet = Arc::new(fleet);
        let alerts = Arc::new(Alerts::default());
        let scaler = scaler(fleet.clone(), uniform(90.0), alerts.clone(), dir.path());

        let decisions = scaler.run_once().await.unwrap();

        assert_eq!(decisions.len(), 2);
        assert_eq!(fleet.calls(), vec!["up eu-west-1", "up us-west-2"]);
        let alerts = alerts.0.lock().unwrap().clone();
        assert_eq!(alerts.len(), 2);
        assert!(alerts.iter().all(|s| s.ends_with("scale up succeeded")));
    }

    #[tokio::test]
    async fn unreadable_marker_skips_only_that_action() {
        let dir = tempfile::tempdir().unwrap();
        let store = CooldownStore::new(dir.path(), "api");
        std::fs::create_dir_all(store.marker_path(ActionClass::ScaleSmall)).unwrap();

        let mut fleet = FakeFleet::new("us-west-2", 2, "medium");
        fleet
            .nodes
            .insert("eu-west-1".to_string(), vec![Node::from_id("i-eu")]);
        let fleet = Arc::new(fleet);
        let metrics = Arc::new(FakeMetrics {
            per_node: HashMap::from([("i-eu".to_string(), 95.0)]),
            default: Some(3.0),
        });
        let scaler = scaler(fleet.clone(), metrics, Arc::new(Alerts::default()), dir.path());

        let decisions = scaler.run_once().await.unwrap();

        assert_eq!(
            decisions,
            vec![
                ("eu-west-1".to_string(), ScaleDecision::ScaleUp),
                ("us-west-2".to_string(), ScaleDecision::Shrink),
            ]
        );
        assert_eq!(fleet.calls(), vec!["up eu-west-1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let fleet = Arc::new(FakeFleet::new("us-west-2", 2, "small"));
        let scaler = scaler(fleet.clone(), uniform(50.0), Arc::new(Alerts::default()), dir.path());
        let (tx, rx) = tokio::sync::watch::channel(false);

        let handle = tokio::spawn(async move { scaler.run(Duration::from_secs(60), rx).await });
        tokio::time::sleep(Duration::from_secs(150)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();
        assert!(fleet.calls().is_empty());
    }
}
