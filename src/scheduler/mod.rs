//! Scheduler module for polling targets and publishing their status.

mod cadence;

pub use cadence::*;

use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinSet;

use crate::archive::Registry;
use crate::config::{Config, TargetConfig};
use crate::links::ConnectLinks;
use crate::probe::{Poller, ServerQuery, SteamDirectory};
use crate::publish::{publish_status, PublishError, Publisher};
use crate::status::{
    alert_embed, classify, consecutive_failures, evaluate_alert, evaluate_pings, mentions,
    render_history, render_ping_activity, resolved_embed, status_embed, unavailable_embed,
    AlertPolicy, AlertTransition, Classification, PingPolicy,
};

/// Errors that end one target's pipeline for the current tick.
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("publish failed: {0}")]
    Publish(#[from] PublishError),
    #[error("unknown target {0}")]
    UnknownTarget(String),
}

/// Drives the tick loop.
pub struct Scheduler<Q, D, P> {
    inner: Arc<Inner<Q, D, P>>,
}

impl<Q, D, P> Clone for Scheduler<Q, D, P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct Inner<Q, D, P> {
    config: Arc<Config>,
    registry: Arc<Registry>,
    poller: Poller<Q, D>,
    publisher: P,
    links: Arc<ConnectLinks>,
    cadence: Cadence,
    pings: PingPolicy,
    alerts: AlertPolicy,
    /// Set once shutdown starts; publishes hold the read side
    stopped: RwLock<bool>,
}

/// State derived under the registry lock, used after it is released.
struct TargetUpdate {
    classification: Classification,
    groups: Vec<String>,
    ping_activity: Option<String>,
    history: String,
    alert: AlertTransition,
    last_name: Option<String>,
}

impl<Q: ServerQuery, D: SteamDirectory, P: Publisher> Scheduler<Q, D, P> {
    pub fn new(
        config: Arc<Config>,
        registry: Arc<Registry>,
        poller: Poller<Q, D>,
        publisher: P,
        links: Arc<ConnectLinks>,
    ) -> Self {
        let cadence = Cadence::from_config(&config);
        let pings = PingPolicy {
            hysteresis: config.ping_hysteresis,
            cooldown: config.ping_cooldown(),
        };
        let alerts = AlertPolicy {
            threshold: config.alert.threshold,
            decay_rate: config.alert.decay_rate,
        };
        Self {
            inner: Arc::new(Inner {
                config,
                registry,
                poller,
                publisher,
                links,
                cadence,
                pings,
                alerts,
                stopped: RwLock::new(false),
            }),
        }
    }

    /// Run ticks forever: one immediately, then on every tick boundary.
    pub async fn run(&self) {
        tracing::info!(
            "Starting scheduler with {} targets, tick every {:?}",
            self.inner.config.servers.len(),
            self.inner.config.tick_duration()
        );

        loop {
            if *self.inner.stopped.read().await {
                break;
            }
            let tick = self.inner.cadence.tick_at(Utc::now());
            self.run_tick(tick).await;

            let delay = self.inner.cadence.until_next(Utc::now());
            tokio::time::sleep(delay).await;
        }
    }

    /// Process every target concurrently and wait for all of them.
    pub async fn run_tick(&self, tick: Tick) {
        tracing::debug!(
            "Tick {} (append: {}, reset: {})",
            tick.index,
            tick.force_append,
            tick.reset
        );

        let mut set = JoinSet::new();
        for index in 0..self.inner.config.servers.len() {
            let inner = self.inner.clone();
            set.spawn(async move {
                let target = &inner.config.servers[index];
                let result = inner.handle_target(target, tick).await;
                (target.url_path.clone(), result)
            });
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((key, Err(e))) => tracing::error!("Failed to update {}: {}", key, e),
                Err(e) => tracing::error!("Target task failed: {}", e),
            }
        }

        self.inner.registry.publish_snapshot(tick.start);

        if tick.reset {
            self.inner.registry.reset();
        }
    }

    /// Replace every status message with an "unavailable" notice.
    ///
    /// Waits for in-flight publishes, and no tick publishes afterwards.
    pub async fn shutdown(&self) {
        let mut stopped = self.inner.stopped.write().await;
        *stopped = true;
        let now = Utc::now();
        for target in &self.inner.config.servers {
            let embed = unavailable_embed(target, now);
            if let Err(e) = publish_status(&self.inner.publisher, &target.channel_id, "", &embed).await {
                tracing::error!("Failed to post shutdown notice for {}: {}", target.url_path, e);
            }
        }
    }
}

impl<Q: ServerQuery, D: SteamDirectory, P: Publisher> Inner<Q, D, P> {
    async fn handle_target(&self, target: &TargetConfig, tick: Tick) -> Result<(), SchedulerError> {
        let key = target.url_path.as_str();

        if *self.stopped.read().await || !self.registry.should_sample(key, tick.force_append) {
            tracing::trace!("Skipping {} on tick {}", key, tick.index);
            return Ok(());
        }

        let sample = self.poller.poll(target).await;
        let now = sample.time;
        self.registry.record(key, sample.clone(), tick.force_append);

        let update = self
            .registry
            .with_target(key, |state| {
                let samples = state.archive.samples();
                let classification = classify(samples, target.supports_direct_connect, state.archive.limit());
                let groups = evaluate_pings(&mut state.watchers, &sample, now, &self.pings);
                let alert = evaluate_alert(&mut state.alert, samples, &self.alerts);
                TargetUpdate {
                    ping_activity: (!state.watchers.is_empty())
                        .then(|| render_ping_activity(&state.watchers, now, &self.pings)),
                    history: render_history(samples, target.graph_density, now),
                    last_name: consecutive_failures(samples).1.map(|i| i.name.clone()),
                    classification,
                    groups,
                    alert,
                }
            })
            .ok_or_else(|| SchedulerError::UnknownTarget(key.to_string()))?;

        let url = if !update.classification.allow_connections {
            None
        } else if update.classification.is_relay {
            match &sample.endpoint {
                Some(endpoint) => self.links.relay_link(endpoint).await,
                None => None,
            }
        } else {
            Some(self.links.direct_link(key))
        };

        let stopped = self.stopped.read().await;
        if *stopped {
            tracing::debug!("Not publishing {} during shutdown", key);
            return Ok(());
        }

        let alerted = self.notify_alert(target, &update, now).await;

        let embed = status_embed(
            target,
            &update.classification,
            Some(&sample),
            update.ping_activity,
            update.history,
            url,
            now,
        );
        if !update.groups.is_empty() {
            tracing::info!("Pinging {} group(s) for {}", update.groups.len(), key);
        }
        publish_status(&self.publisher, &target.channel_id, &mentions(&update.groups), &embed).await?;

        alerted
    }

    async fn notify_alert(
        &self,
        target: &TargetConfig,
        update: &TargetUpdate,
        now: DateTime<Utc>,
    ) -> Result<(), SchedulerError> {
        let key = target.url_path.as_str();
        let last_name = update.last_name.as_deref();

        match update.alert {
            AlertTransition::NoChange => Ok(()),
            AlertTransition::Raise => {
                tracing::warn!(
                    "Outage alert raised for {} after {} failed polls",
                    key,
                    update.classification.consecutive_failures
                );
                let Some(channel) = &self.config.alert.channel_id else {
                    return Ok(());
                };
                let embed = alert_embed(target, last_name, update.classification.consecutive_failures, now);
                let message = self.publisher.send(channel, None, &embed).await?;
                self.registry.with_target(key, |state| state.alert.message = Some(message));
                Ok(())
            }
            AlertTransition::Clear => {
                tracing::info!("Outage alert cleared for {}", key);
                let Some(channel) = &self.config.alert.channel_id else {
                    return Ok(());
                };
                let embed = resolved_embed(target, last_name, now);
                let held = self
                    .registry
                    .with_target(key, |state| state.alert.message.take())
                    .flatten();
                match held {
                    Some(message) => self.publisher.edit(&message, &embed).await?,
                    None => {
                        self.publisher.send(channel, None, &embed).await?;
                    }
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::fixtures;
    use crate::config::PingConfig;
    use crate::probe::fake::{FakeDirectory, FakeQuery};
    use crate::publish::memory::{MemoryPublisher, Op};
    use chrono::TimeZone;
    use std::time::Duration;

    type TestScheduler = Scheduler<FakeQuery, FakeDirectory, MemoryPublisher>;

    fn target(ip: &str, url_path: &str, channel: &str) -> TargetConfig {
        serde_json::from_value(serde_json::json!({
            "ip": ip,
            "port": 27015,
            "url_path": url_path,
            "channel_id": channel,
            "description": "Test description",
        }))
        .unwrap()
    }

    fn config(servers: Vec<TargetConfig>) -> Config {
        Config {
            connect_url_base: "https://example.com/tf2".to_string(),
            servers,
            ..Default::default()
        }
    }

    fn scheduler(cfg: Config, query: FakeQuery, publisher: MemoryPublisher) -> (TestScheduler, Arc<Registry>) {
        let registry = Arc::new(Registry::from_config(&cfg));
        let links = Arc::new(ConnectLinks::new(&cfg).unwrap());
        let poller = Poller::new(query, FakeDirectory::default()).with_jitter(Duration::ZERO);
        let scheduler = Scheduler::new(Arc::new(cfg), registry.clone(), poller, publisher, links);
        (scheduler, registry)
    }

    fn tick(index: i64, force_append: bool) -> Tick {
        Tick {
            index,
            start: Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
            force_append,
            reset: false,
        }
    }

    fn publisher(s: &TestScheduler) -> &MemoryPublisher {
        &s.inner.publisher
    }

    #[tokio::test]
    async fn test_tick_publishes_status() {
        let query = FakeQuery::default();
        query.script("203.0.113.7:27015", vec![Some(fixtures::info(6, 0, 24))]);
        let (s, registry) = scheduler(
            config(vec![target("203.0.113.7", "main", "chan-a")]),
            query,
            MemoryPublisher::default(),
        );

        s.run_tick(tick(0, true)).await;

        let ops = publisher(&s).ops_for("chan-a");
        let [Op::Send { content, embed, .. }] = &ops[..] else {
            panic!("expected one send, got {:?}", ops);
        };
        assert_eq!(content, &None);
        assert_eq!(embed.title, "Test Server");
        assert_eq!(embed.url.as_deref(), Some("https://example.com/tf2/main"));

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.target("main").unwrap().results.len(), 1);
        assert_eq!(snapshot.last_update, Some(tick(0, true).start));
        assert_eq!(
            registry.endpoint("main"),
            Some(crate::archive::Endpoint::new("203.0.113.7", 27015))
        );

        s.run_tick(tick(1, true)).await;
        assert!(matches!(publisher(&s).ops_for("chan-a")[1], Op::Edit { .. }));
        assert_eq!(registry.archive("main").len(), 2);
    }

    #[tokio::test]
    async fn test_failure_is_isolated() {
        let query = FakeQuery::default();
        query.script("203.0.113.7:27015", vec![Some(fixtures::info(6, 0, 24))]);
        query.script("203.0.113.8:27015", vec![Some(fixtures::info(3, 0, 24))]);
        let (s, registry) = scheduler(
            config(vec![
                target("203.0.113.7", "broken", "chan-a"),
                target("203.0.113.8", "healthy", "chan-b"),
            ]),
            query,
            MemoryPublisher::failing_on("chan-a"),
        );

        s.run_tick(tick(0, true)).await;

        assert!(publisher(&s).ops_for("chan-a").is_empty());
        assert_eq!(publisher(&s).ops_for("chan-b").len(), 1);
        // The sample is kept even though publishing failed
        assert_eq!(registry.snapshot().targets.len(), 2);
    }

    #[tokio::test]
    async fn test_idle_target_waits_for_forced_tick() {
        let query = FakeQuery::default();
        query.script("203.0.113.7:27015", vec![Some(fixtures::info(0, 0, 24))]);
        let (s, registry) = scheduler(
            config(vec![target("203.0.113.7", "main", "chan-a")]),
            query,
            MemoryPublisher::default(),
        );

        s.run_tick(tick(0, true)).await;
        s.run_tick(tick(1, false)).await;
        s.run_tick(tick(2, false)).await;
        assert_eq!(publisher(&s).ops().len(), 1);

        s.run_tick(tick(3, true)).await;
        assert_eq!(publisher(&s).ops().len(), 2);
        assert_eq!(registry.archive("main").len(), 2);
    }

    #[tokio::test]
    async fn test_ping_mentions_trigger_repost() {
        let query = FakeQuery::default();
        query.script("203.0.113.7:27015", vec![Some(fixtures::info(2, 0, 24)), Some(fixtures::info(8, 0, 24))]);
        let mut t = target("203.0.113.7", "main", "chan-a");
        t.pings = vec![PingConfig { threshold: 5, role: "555".to_string() }];
        let (s, _) = scheduler(config(vec![t]), query, MemoryPublisher::default());

        s.run_tick(tick(0, true)).await;
        s.run_tick(tick(1, true)).await;

        let ops = publisher(&s).ops_for("chan-a");
        assert_eq!(ops.len(), 3);
        assert!(matches!(&ops[1], Op::Delete { .. }));
        let Op::Send { content, embed, .. } = &ops[2] else {
            panic!("expected a new message");
        };
        assert_eq!(content.as_deref(), Some("<@&555>"));
        assert!(embed.fields.iter().any(|f| f.name == "Activity Pings:"));
    }

    #[tokio::test]
    async fn test_alert_raised_then_resolved() {
        let query = FakeQuery::default();
        query.script(
            "203.0.113.7:27015",
            vec![None, None, Some(fixtures::info(4, 0, 24)), Some(fixtures::info(4, 0, 24))],
        );
        let mut cfg = config(vec![target("203.0.113.7", "main", "chan-a")]);
        cfg.alert.channel_id = Some("alerts".to_string());
        cfg.alert.threshold = 2;
        cfg.alert.decay_rate = 1.0;
        let (s, registry) = scheduler(cfg, query, MemoryPublisher::default());

        s.run_tick(tick(0, true)).await;
        assert!(publisher(&s).ops_for("alerts").is_empty());

        s.run_tick(tick(1, true)).await;
        let ops = publisher(&s).ops_for("alerts");
        let [Op::Send { embed, .. }] = &ops[..] else {
            panic!("expected an alert, got {:?}", ops);
        };
        assert!(embed.title.starts_with("Outage"));
        assert!(registry.with_target("main", |t| t.alert.alerting).unwrap());

        s.run_tick(tick(2, true)).await;
        assert_eq!(publisher(&s).ops_for("alerts").len(), 1);

        s.run_tick(tick(3, true)).await;
        let ops = publisher(&s).ops_for("alerts");
        assert_eq!(ops.len(), 2);
        let Op::Edit { embed, .. } = &ops[1] else {
            panic!("expected the alert to be edited");
        };
        assert!(embed.title.starts_with("Resolved"));
        assert!(registry.with_target("main", |t| t.alert.message.is_none()).unwrap());
    }

    #[tokio::test]
    async fn test_reset_after_snapshot() {
        let query = FakeQuery::default();
        query.script("203.0.113.7:27015", vec![Some(fixtures::info(6, 0, 24))]);
        let (s, registry) = scheduler(
            config(vec![target("203.0.113.7", "main", "chan-a")]),
            query,
            MemoryPublisher::default(),
        );

        let mut t = tick(0, true);
        t.reset = true;
        s.run_tick(t).await;

        assert_eq!(registry.snapshot().targets.len(), 1);
        assert!(registry.archive("main").is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_posts_unavailable() {
        let (s, _) = scheduler(
            config(vec![target("203.0.113.7", "main", "chan-a")]),
            FakeQuery::default(),
            MemoryPublisher::default(),
        );

        s.shutdown().await;

        let ops = publisher(&s).ops_for("chan-a");
        let [Op::Send { embed, .. }] = &ops[..] else {
            panic!("expected one send");
        };
        assert_eq!(embed.title, "Server status unavailable");
    }

    #[tokio::test]
    async fn test_nothing_published_after_shutdown() {
        let query = FakeQuery::default();
        query.script("203.0.113.7:27015", vec![Some(fixtures::info(6, 0, 24))]);
        let (s, registry) = scheduler(
            config(vec![target("203.0.113.7", "main", "chan-a")]),
            query,
            MemoryPublisher::default(),
        );

        s.run_tick(tick(0, true)).await;
        s.shutdown().await;
        s.run_tick(tick(1, true)).await;

        let ops = publisher(&s).ops_for("chan-a");
        assert_eq!(ops.len(), 2);
        let Op::Edit { embed, .. } = ops.last().unwrap() else {
            panic!("expected the status message to be edited");
        };
        assert_eq!(embed.title, "Server status unavailable");
        assert_eq!(registry.archive("main").len(), 1, "no polling after shutdown");
    }

    #[tokio::test]
    async fn test_run_exits_after_shutdown() {
        let (s, _) = scheduler(
            config(vec![target("203.0.113.7", "main", "chan-a")]),
            FakeQuery::default(),
            MemoryPublisher::default(),
        );

        s.shutdown().await;
        tokio::time::timeout(Duration::from_secs(1), s.run())
            .await
            .expect("run loop should stop");
    }
}
