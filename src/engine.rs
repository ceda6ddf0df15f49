//! Wires the collaborators together and owns every long-lived loop

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::cache::{Cache, MemoryBackend};
use crate::config::{CacheConfig, Config, Seed, StorageConfig};
use crate::duty::{DutyRoster, StaticDutyRoster};
use crate::error::{EngineError, EngineResult};
use crate::models::ProbingRule;
use crate::notify::{CardRenderer, NotificationDispatcher, SubscriptionDispatcher, TemplateRenderer};
use crate::probing::{ProberRegistry, ProbingConsumer, ProbingSupervisor};
use crate::senders::SenderRegistry;
use crate::store::{ConfigStore, HistoryBackend, MemoryHistory, MemoryStore};
use crate::supervisor::FaultCenterSupervisor;

/// Periodic deletion of old history rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retention {
    pub days: u32,
    pub interval: Duration,
}

/// Everything the engine is built from
pub struct EngineParts {
    pub cache: Cache,
    pub store: Arc<dyn ConfigStore>,
    pub history: Arc<dyn HistoryBackend>,
    pub senders: Arc<SenderRegistry>,
    pub renderer: Arc<dyn TemplateRenderer>,
    pub duty: Arc<dyn DutyRoster>,
    pub probers: ProberRegistry,
    pub subscription_concurrency: usize,
    pub retention: Option<Retention>,
}

pub struct Engine {
    cache: Cache,
    store: Arc<dyn ConfigStore>,
    history: Arc<dyn HistoryBackend>,
    dispatcher: Arc<NotificationDispatcher>,
    fault_centers: FaultCenterSupervisor,
    probing: ProbingSupervisor,
    consumers: ProbingConsumer,
    retention: Option<Retention>,
    shutdown: CancellationToken,
}

impl Engine {
    pub fn from_parts(parts: EngineParts) -> Self {
        let EngineParts {
            cache,
            store,
            history,
            senders,
            renderer,
            duty,
            probers,
            subscription_concurrency,
            retention,
        } = parts;

        let subscriptions = Arc::new(SubscriptionDispatcher::new(
            store.clone(),
            senders.clone(),
            renderer.clone(),
            subscription_concurrency,
        ));
        let dispatcher = Arc::new(NotificationDispatcher::new(
            cache.clone(),
            store.clone(),
            history.clone(),
            senders,
            renderer,
            duty,
            subscriptions,
        ));

        let fault_centers = FaultCenterSupervisor::new(
            cache.clone(),
            store.clone(),
            history.clone(),
            dispatcher.clone(),
        );
        let probing = ProbingSupervisor::new(cache.clone(), store.clone(), history.clone(), probers);
        let consumers = ProbingConsumer::new(cache.clone(), store.clone(), dispatcher.clone());

        Self {
            cache,
            store,
            history,
            dispatcher,
            fault_centers,
            probing,
            consumers,
            retention,
            shutdown: CancellationToken::new(),
        }
    }

    /// Build the engine described by a config file and load its seed
    #[instrument(skip_all)]
    pub async fn from_config(config: &Config) -> EngineResult<Self> {
        let cache = match &config.cache {
            CacheConfig::Memory => Cache::new(Arc::new(MemoryBackend::new())),
            #[cfg(feature = "redis-cache")]
            CacheConfig::Redis { url } => {
                Cache::new(Arc::new(crate::cache::redis::RedisBackend::new(url)?))
            }
            #[cfg(not(feature = "redis-cache"))]
            CacheConfig::Redis { .. } => {
                return Err(EngineError::Config(
                    "redis cache requested but the redis-cache feature is disabled".to_string(),
                ));
            }
        };

        let (history, retention) = open_history(config.storage.as_ref()).await?;
        let senders = SenderRegistry::with_defaults(config.smtp.as_ref())?;

        let engine = Self::from_parts(EngineParts {
            cache,
            store: Arc::new(MemoryStore::new()),
            history,
            senders: Arc::new(senders),
            renderer: Arc::new(CardRenderer::with_templates(config.seed.templates.clone())),
            duty: Arc::new(StaticDutyRoster::new(config.seed.duty_rosters.clone())),
            probers: ProberRegistry::with_defaults(),
            subscription_concurrency: config.subscription_concurrency,
            retention,
        });
        engine.seed(&config.seed).await?;

        Ok(engine)
    }

    /// Load configuration objects into the store and publish silences
    pub async fn seed(&self, seed: &Seed) -> EngineResult<()> {
        for center in &seed.fault_centers {
            self.store.upsert_fault_center(center.clone()).await?;
        }
        for notice in &seed.notices {
            self.store.upsert_notice(notice.clone()).await?;
        }
        for silence in &seed.silences {
            self.store.save_silence(silence).await?;
            self.cache.push_silence(silence).await?;
        }
        for rule in &seed.probing_rules {
            self.store.upsert_probing_rule(rule.clone()).await?;
        }
        for subscription in &seed.subscriptions {
            self.store.upsert_subscription(subscription.clone()).await?;
        }

        debug!(
            "seeded {} fault center(s), {} notice(s), {} silence(s), {} probing rule(s)",
            seed.fault_centers.len(),
            seed.notices.len(),
            seed.silences.len(),
            seed.probing_rules.len()
        );
        Ok(())
    }

    /// Start every supervisor and the retention loop
    pub async fn start(&self) -> EngineResult<()> {
        self.fault_centers.restart_all_consumers().await?;
        self.probing.start_all().await?;
        self.consumers.start_all().await?;

        if let Some(retention) = self.retention {
            tokio::spawn(run_retention(
                self.history.clone(),
                retention,
                self.shutdown.clone(),
            ));
        }

        info!("alerting engine started");
        Ok(())
    }

    /// Persist a probing rule and (re)start both of its loops
    pub async fn submit_probing_rule(&self, rule: ProbingRule) -> EngineResult<()> {
        self.store.upsert_probing_rule(rule.clone()).await?;
        self.probing.restart(rule.clone());
        self.consumers.restart(rule);
        Ok(())
    }

    pub fn stop_probing_rule(&self, tenant_id: &str, rule_id: &str) {
        self.probing.stop(tenant_id, rule_id);
        self.consumers.stop(tenant_id, rule_id);
    }

    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.fault_centers.stop_all();
        self.probing.stop_all();
        self.consumers.stop_all();

        if let Err(e) = self.history.close().await {
            warn!("failed to close history backend: {}", e);
        }
        info!("alerting engine stopped");
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn store(&self) -> &Arc<dyn ConfigStore> {
        &self.store
    }

    pub fn history(&self) -> &Arc<dyn HistoryBackend> {
        &self.history
    }

    pub fn dispatcher(&self) -> &Arc<NotificationDispatcher> {
        &self.dispatcher
    }

    pub fn fault_centers(&self) -> &FaultCenterSupervisor {
        &self.fault_centers
    }

    pub fn probing(&self) -> &ProbingSupervisor {
        &self.probing
    }

    pub fn consumers(&self) -> &ProbingConsumer {
        &self.consumers
    }
}

async fn open_history(
    storage: Option<&StorageConfig>,
) -> EngineResult<(Arc<dyn HistoryBackend>, Option<Retention>)> {
    match storage {
        None | Some(StorageConfig::None) => {
            debug!("using in-memory history");
            Ok((Arc::new(MemoryHistory::new()), None))
        }
        #[cfg(feature = "storage-sqlite")]
        Some(StorageConfig::Sqlite {
            path,
            retention_days,
            cleanup_interval_hours,
        }) => {
            let history = crate::store::sqlite::SqliteHistory::new(path).await?;
            let retention = Retention {
                days: *retention_days,
                interval: Duration::from_secs(u64::from((*cleanup_interval_hours).max(1)) * 3600),
            };
            Ok((Arc::new(history), Some(retention)))
        }
        #[cfg(not(feature = "storage-sqlite"))]
        Some(StorageConfig::Sqlite { .. }) => Err(EngineError::Config(
            "sqlite storage requested but the storage-sqlite feature is disabled".to_string(),
        )),
    }
}

async fn run_retention(
    history: Arc<dyn HistoryBackend>,
    retention: Retention,
    shutdown: CancellationToken,
) {
    debug!("retention cleanup enabled: {} days", retention.days);

    let mut ticker = interval(retention.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let cutoff = Utc::now() - chrono::Duration::days(i64::from(retention.days));
                match history.cleanup_before(cutoff).await {
                    Ok(deleted) => debug!("retention cleanup removed {} row(s)", deleted),
                    Err(e) => error!("retention cleanup failed: {}", e),
                }
            }
        }
    }
}
