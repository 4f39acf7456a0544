use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeadId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    NotConnected,
    Connected,
    VisitScheduled,
    VisitDoneNotPurchased,
    Purchased,
    NotInterested,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotConnected => "not_connected",
            Self::Connected => "connected",
            Self::VisitScheduled => "visit_scheduled",
            Self::VisitDoneNotPurchased => "visit_done_not_purchased",
            Self::Purchased => "purchased",
            Self::NotInterested => "not_interested",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "not_connected" => Some(Self::NotConnected),
            "connected" => Some(Self::Connected),
            "visit_scheduled" => Some(Self::VisitScheduled),
            "visit_done_not_purchased" => Some(Self::VisitDoneNotPurchased),
            "purchased" => Some(Self::Purchased),
            "not_interested" => Some(Self::NotInterested),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub id: LeadId,
    pub crm_id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone_number: Option<String>,
    pub project_enquired: String,
    pub unit_type: String,
    pub status: LeadStatus,
    pub budget_min: Option<Decimal>,
    pub budget_max: Option<Decimal>,
    pub family_size: Option<u32>,
    pub location_preference: Option<String>,
    pub purchase_motive: Option<String>,
    pub financing_readiness: Option<String>,
    pub last_conversation_summary: Option<String>,
    pub last_conversation_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Lead {
    pub fn full_name(&self) -> String {
        [self.first_name.trim(), self.last_name.trim()]
            .into_iter()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Human-readable budget band, e.g. `450000 - 520000` or `Not specified`.
    pub fn budget_range(&self) -> String {
        match (self.budget_min, self.budget_max) {
            (Some(min), Some(max)) => format!("{min} - {max}"),
            (Some(min), None) => format!("from {min}"),
            (None, Some(max)) => format!("up to {max}"),
            (None, None) => "Not specified".to_string(),
        }
    }
}

/// Shortlist criteria for campaign recipients. Empty lists and `None` are unset.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeadFilter {
    pub project_names: Vec<String>,
    pub unit_types: Vec<String>,
    pub status: Option<LeadStatus>,
    pub last_conversation_from: Option<NaiveDate>,
    pub last_conversation_to: Option<NaiveDate>,
    pub budget_min: Option<Decimal>,
    pub budget_max: Option<Decimal>,
}

impl LeadFilter {
    /// Fewer set fields than this are rejected before any lead is read.
    pub const MINIMUM_FILTERS: usize = 2;

    pub fn active_filters(&self) -> usize {
        [
            !self.project_names.is_empty(),
            !self.unit_types.is_empty(),
            self.status.is_some(),
            self.last_conversation_from.is_some(),
            self.last_conversation_to.is_some(),
            self.budget_min.is_some(),
            self.budget_max.is_some(),
        ]
        .into_iter()
        .filter(|set| *set)
        .count()
    }

    pub fn has_budget(&self) -> bool {
        self.budget_min.is_some() || self.budget_max.is_some()
    }

    pub fn matches(&self, lead: &Lead) -> bool {
        let listed = |values: &[String], value: &str| {
            values.is_empty() || values.iter().any(|candidate| candidate == value)
        };
        listed(&self.project_names, &lead.project_enquired)
            && listed(&self.unit_types, &lead.unit_type)
            && self.status.as_ref().map_or(true, |status| *status == lead.status)
            && self
                .last_conversation_from
                .map_or(true, |from| lead.last_conversation_date.is_some_and(|date| date >= from))
            && self
                .last_conversation_to
                .map_or(true, |to| lead.last_conversation_date.is_some_and(|date| date <= to))
            && self.budget_overlaps(lead)
    }

    /// Leads with no budget at all pass; otherwise both bounds must be known
    /// and the bands must overlap.
    fn budget_overlaps(&self, lead: &Lead) -> bool {
        if !self.has_budget() {
            return true;
        }
        match (lead.budget_min, lead.budget_max) {
            (None, None) => true,
            (Some(lead_min), Some(lead_max)) => {
                self.budget_max.map_or(true, |max| lead_min <= max)
                    && self.budget_min.map_or(true, |min| lead_max >= min)
            }
            _ => false,
        }
    }
}
