use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::lead::LeadId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CampaignId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageChannel {
    Email,
    Whatsapp,
}

impl MessageChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Whatsapp => "whatsapp",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "email" => Some(Self::Email),
            "whatsapp" => Some(Self::Whatsapp),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub name: String,
    pub project_name: String,
    pub message_channel: MessageChannel,
    pub offer_details: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Campaign {
    pub fn offer(&self) -> Option<&str> {
        self.offer_details.as_deref().map(str::trim).filter(|offer| !offer.is_empty())
    }
}

/// A campaign to launch and the leads it goes out to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCampaign {
    pub name: String,
    pub project_name: String,
    pub message_channel: MessageChannel,
    #[serde(default)]
    pub offer_details: Option<String>,
    pub lead_ids: Vec<LeadId>,
}

/// Dashboard counters for one campaign.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignMetrics {
    pub campaign_id: String,
    pub total_leads: u64,
    pub contacted: u64,
    pub responded: u64,
    pub goals_sealed: u64,
    pub visits_sealed: u64,
    pub calls_sealed: u64,
}

impl CampaignMetrics {
    /// Share of contacted leads that replied, in percent.
    pub fn response_rate(&self) -> f64 {
        if self.contacted == 0 {
            return 0.0;
        }
        self.responded as f64 * 100.0 / self.contacted as f64
    }
}
