//! Dashboard metrics: automated leads per channel, the most common client
//! preferences and the brokers currently holding leads.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tracing::warn;

use enleve_shared::backend::{AttendanceQuery, ChangeEvent, ChangeKind};
use enleve_shared::constants::{PREFERENCE_SAMPLE, TABLE_ATTENDANCE, TOP_PREFERENCES};
use enleve_shared::models::ClientPreference;
use enleve_shared::types::{AttendanceStatus, Channel, UserId};

use crate::commands::BrokerSummary;
use crate::error::Result;
use crate::events::{Notice, MSG_LOAD_FAILED, MSG_NEW_LEAD};
use crate::state::AppState;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChannelCounts {
    pub whatsapp: u64,
    pub instagram: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreferenceCount {
    pub value: String,
    pub category: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveBroker {
    pub broker: BrokerSummary,
    pub active_leads: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DashboardSnapshot {
    pub automated: ChannelCounts,
    pub top_preferences: Vec<PreferenceCount>,
    pub active_brokers: Vec<ActiveBroker>,
}

/// Group preferences by display value, most frequent first. Ties keep the
/// order in which values were first seen, and each group keeps the category
/// of its first row.
pub fn top_preferences(rows: &[ClientPreference], limit: usize) -> Vec<PreferenceCount> {
    let mut groups: Vec<PreferenceCount> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for row in rows {
        let value = row.display_value();
        match index.get(&value) {
            Some(&i) => groups[i].count += 1,
            None => {
                index.insert(value.clone(), groups.len());
                groups.push(PreferenceCount {
                    value,
                    category: row.category.clone(),
                    count: 1,
                });
            }
        }
    }

    // sort_by is stable
    groups.sort_by(|a, b| b.count.cmp(&a.count));
    groups.truncate(limit);
    groups
}

/// Notice for a lead that just entered the waiting queue.
pub fn new_lead_notice(event: &ChangeEvent) -> Option<Notice> {
    if event.table != TABLE_ATTENDANCE || event.kind != ChangeKind::Insert {
        return None;
    }
    if event.column_str("status") != Some(AttendanceStatus::EmEspera.as_str()) {
        return None;
    }
    let name = event.column_str("cliente_nome").unwrap_or("");
    Some(Notice::info(MSG_NEW_LEAD).with_description(format!("Cliente: {name}")))
}

pub struct Dashboard {
    state: Arc<AppState>,
}

impl Dashboard {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    pub async fn load(&self) -> Result<DashboardSnapshot> {
        let result = self.fetch().await;
        if let Err(ref e) = result {
            warn!(error = %e, "dashboard load failed");
            self.state.notify(Notice::failure(e, MSG_LOAD_FAILED));
        }
        result
    }

    async fn fetch(&self) -> Result<DashboardSnapshot> {
        self.state.session.require_user().await?;
        let (automated, top_preferences, active_brokers) = futures::try_join!(
            self.channel_counts(),
            self.top_preferences(),
            self.active_brokers(),
        )?;
        Ok(DashboardSnapshot {
            automated,
            top_preferences,
            active_brokers,
        })
    }

    /// Announce new waiting leads.
    pub fn announce(&self, event: &ChangeEvent) {
        if let Some(notice) = new_lead_notice(event) {
            self.state.notify(notice);
        }
    }

    pub async fn channel_counts(&self) -> Result<ChannelCounts> {
        let backend = self.state.backend();
        let automated = AttendanceQuery::with_status(AttendanceStatus::Automatizado);
        let whatsapp_q = automated.clone().channel(Channel::WhatsApp);
        let instagram_q = automated.channel(Channel::Instagram);
        let (whatsapp, instagram) = futures::try_join!(
            backend.count_attendances(&whatsapp_q),
            backend.count_attendances(&instagram_q),
        )?;
        Ok(ChannelCounts {
            whatsapp,
            instagram,
        })
    }

    pub async fn top_preferences(&self) -> Result<Vec<PreferenceCount>> {
        let rows = self
            .state
            .backend()
            .list_preferences(PREFERENCE_SAMPLE)
            .await?;
        Ok(top_preferences(&rows, TOP_PREFERENCES))
    }

    /// Brokers with at least one lead in Com Corretor, busiest first.
    pub async fn active_brokers(&self) -> Result<Vec<ActiveBroker>> {
        let backend = self.state.backend();
        let assigned = backend
            .list_attendances(&AttendanceQuery::with_status(AttendanceStatus::ComCorretor))
            .await?;

        let mut counts: HashMap<UserId, usize> = HashMap::new();
        for broker in assigned.iter().filter_map(|a| a.assigned_broker) {
            *counts.entry(broker).or_default() += 1;
        }
        if counts.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<UserId> = counts.keys().copied().collect();
        let profiles = backend.list_profiles(&ids).await?;
        let counts = &counts;
        let mut active: Vec<ActiveBroker> = join_all(profiles.iter().map(|profile| async move {
            ActiveBroker {
                broker: BrokerSummary::resolve(backend, profile).await,
                active_leads: counts.get(&profile.id).copied().unwrap_or(0),
            }
        }))
        .await;

        active.sort_by(|a, b| b.active_leads.cmp(&a.active_leads));
        Ok(active)
    }
}
