//! Collaborator seams: the authoritative event store and the campaign/creative
//! configuration store, plus in-memory implementations used by tests and the
//! standalone server.

use crate::error::{OptimizerError, OptimizerResult};
use crate::types::{Campaign, Creative, Event, EventType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use serde::Deserialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// Count query against the event store. `creative_id = None` counts the
/// whole campaign.
#[derive(Debug, Clone, PartialEq)]
pub struct EventQuery {
    pub campaign_id: String,
    pub creative_id: Option<String>,
    pub event_type: EventType,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl EventQuery {
    pub fn creative(
        campaign_id: impl Into<String>,
        creative_id: impl Into<String>,
        event_type: EventType,
        since: DateTime<Utc>,
    ) -> Self {
        Self {
            campaign_id: campaign_id.into(),
            creative_id: Some(creative_id.into()),
            event_type,
            since: Some(since),
            until: None,
        }
    }

    pub fn campaign(
        campaign_id: impl Into<String>,
        event_type: EventType,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            campaign_id: campaign_id.into(),
            creative_id: None,
            event_type,
            since,
            until,
        }
    }

    fn matches(&self, event: &Event) -> bool {
        event.event_type == self.event_type
            && event.campaign_id == self.campaign_id
            && self
                .creative_id
                .as_ref()
                .map_or(true, |id| *id == event.creative_id)
            && self.since.map_or(true, |since| event.occurred_at >= since)
            && self.until.map_or(true, |until| event.occurred_at <= until)
    }
}

/// Append-only store of impression/click/conversion events. Authoritative
/// over every cached aggregate.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn count_events(&self, query: &EventQuery) -> OptimizerResult<u64>;

    async fn append_event(&self, event: Event) -> OptimizerResult<()>;
}

/// Campaign and creative configuration owned by an external system.
#[async_trait]
pub trait CampaignStore: Send + Sync {
    async fn get_campaign(&self, campaign_id: &str) -> OptimizerResult<Campaign>;

    async fn list_campaigns(&self) -> OptimizerResult<Vec<Campaign>>;

    async fn get_active_creatives(&self, campaign_id: &str) -> OptimizerResult<Vec<Creative>>;

    async fn update_creative_weight(&self, creative_id: &str, weight: u32) -> OptimizerResult<()>;

    async fn set_creative_active(&self, creative_id: &str, active: bool) -> OptimizerResult<()>;

    async fn set_campaign_ab_test_enabled(
        &self,
        campaign_id: &str,
        enabled: bool,
    ) -> OptimizerResult<()>;
}

/// Run a collaborator call under a bounded timeout. Elapsed calls surface as
/// `DataUnavailable` so callers can fall back to cached or zeroed data.
pub async fn with_timeout<T, F>(timeout: Duration, operation: &str, fut: F) -> OptimizerResult<T>
where
    F: Future<Output = OptimizerResult<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => {
            metrics::counter!("store.timeouts", "operation" => operation.to_string()).increment(1);
            Err(OptimizerError::DataUnavailable(format!(
                "{operation} timed out after {}ms",
                timeout.as_millis()
            )))
        }
    }
}

// ─── In-memory event store ──────────────────────────────────────────────────

/// Event store held in process memory, sharded by campaign.
///
/// Availability and latency can be toggled to simulate an unreachable or slow
/// backend.
#[derive(Default)]
pub struct InMemoryEventStore {
    events: DashMap<String, Vec<Event>>,
    offline: AtomicBool,
    latency_ms: AtomicU64,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Synchronous bulk insert for seeding fixtures.
    pub fn insert(&self, event: Event) {
        self.events
            .entry(event.campaign_id.clone())
            .or_default()
            .push(event);
    }

    /// Seed `count` identical events.
    pub fn insert_many(
        &self,
        event_type: EventType,
        creative_id: &str,
        campaign_id: &str,
        occurred_at: DateTime<Utc>,
        count: u64,
    ) {
        let mut entry = self.events.entry(campaign_id.to_string()).or_default();
        for _ in 0..count {
            entry.push(Event::new(event_type, creative_id, campaign_id, occurred_at));
        }
    }

    pub fn len(&self) -> usize {
        self.events.iter().map(|e| e.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn simulate_backend(&self) -> OptimizerResult<()> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(OptimizerError::DataUnavailable(
                "event store offline".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn count_events(&self, query: &EventQuery) -> OptimizerResult<u64> {
        self.simulate_backend().await?;
        let count = self
            .events
            .get(&query.campaign_id)
            .map(|events| events.iter().filter(|e| query.matches(e)).count())
            .unwrap_or(0);
        Ok(count as u64)
    }

    async fn append_event(&self, event: Event) -> OptimizerResult<()> {
        self.simulate_backend().await?;
        self.insert(event);
        Ok(())
    }
}

// ─── In-memory campaign store ───────────────────────────────────────────────

#[derive(Default)]
pub struct InMemoryCampaignStore {
    campaigns: DashMap<String, Campaign>,
    creatives: DashMap<String, Creative>,
    failing_writes: DashSet<String>,
    offline: AtomicBool,
}

impl InMemoryCampaignStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_campaign(&self, campaign: Campaign) {
        self.campaigns.insert(campaign.id.clone(), campaign);
    }

    pub fn upsert_creative(&self, creative: Creative) {
        self.creatives.insert(creative.id.clone(), creative);
    }

    pub fn creative(&self, creative_id: &str) -> Option<Creative> {
        self.creatives.get(creative_id).map(|c| c.clone())
    }

    pub fn campaign(&self, campaign_id: &str) -> Option<Campaign> {
        self.campaigns.get(campaign_id).map(|c| c.clone())
    }

    /// Make every write for this creative fail.
    pub fn fail_writes_for(&self, creative_id: impl Into<String>) {
        self.failing_writes.insert(creative_id.into());
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> OptimizerResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(OptimizerError::DataUnavailable(
                "campaign store offline".to_string(),
            ));
        }
        Ok(())
    }

    fn check_writable(&self, creative_id: &str) -> OptimizerResult<()> {
        self.check_online()?;
        if self.failing_writes.contains(creative_id) {
            return Err(OptimizerError::DataUnavailable(format!(
                "write rejected for creative {creative_id}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl CampaignStore for InMemoryCampaignStore {
    async fn get_campaign(&self, campaign_id: &str) -> OptimizerResult<Campaign> {
        self.check_online()?;
        self.campaign(campaign_id)
            .ok_or_else(|| OptimizerError::campaign_not_found(campaign_id))
    }

    async fn list_campaigns(&self) -> OptimizerResult<Vec<Campaign>> {
        self.check_online()?;
        let mut campaigns: Vec<Campaign> = self.campaigns.iter().map(|c| c.clone()).collect();
        campaigns.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(campaigns)
    }

    async fn get_active_creatives(&self, campaign_id: &str) -> OptimizerResult<Vec<Creative>> {
        self.check_online()?;
        if !self.campaigns.contains_key(campaign_id) {
            return Err(OptimizerError::campaign_not_found(campaign_id));
        }
        let mut creatives: Vec<Creative> = self
            .creatives
            .iter()
            .filter(|c| c.campaign_id == campaign_id && c.active)
            .map(|c| c.clone())
            .collect();
        creatives.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(creatives)
    }

    async fn update_creative_weight(&self, creative_id: &str, weight: u32) -> OptimizerResult<()> {
        self.check_writable(creative_id)?;
        let mut creative = self
            .creatives
            .get_mut(creative_id)
            .ok_or_else(|| OptimizerError::creative_not_found(creative_id))?;
        creative.weight = weight;
        Ok(())
    }

    async fn set_creative_active(&self, creative_id: &str, active: bool) -> OptimizerResult<()> {
        self.check_writable(creative_id)?;
        let mut creative = self
            .creatives
            .get_mut(creative_id)
            .ok_or_else(|| OptimizerError::creative_not_found(creative_id))?;
        creative.active = active;
        Ok(())
    }

    async fn set_campaign_ab_test_enabled(
        &self,
        campaign_id: &str,
        enabled: bool,
    ) -> OptimizerResult<()> {
        self.check_online()?;
        let mut campaign = self
            .campaigns
            .get_mut(campaign_id)
            .ok_or_else(|| OptimizerError::campaign_not_found(campaign_id))?;
        campaign.ab_test_enabled = enabled;
        Ok(())
    }
}

// ─── Fixtures ───────────────────────────────────────────────────────────────

/// JSON seed document for the in-memory stores.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreFixtures {
    #[serde(default)]
    pub campaigns: Vec<Campaign>,
    #[serde(default)]
    pub creatives: Vec<Creative>,
    #[serde(default)]
    pub events: Vec<Event>,
}

impl StoreFixtures {
    pub fn from_json(json: &str) -> OptimizerResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn apply(self, campaigns: &InMemoryCampaignStore, events: &InMemoryEventStore) {
        for campaign in self.campaigns {
            campaigns.upsert_campaign(campaign);
        }
        for creative in self.creatives {
            campaigns.upsert_creative(creative);
        }
        for event in self.events {
            events.insert(event);
        }
    }
}
