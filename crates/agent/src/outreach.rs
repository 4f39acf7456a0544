use std::sync::Arc;

use tera::Context;
use tracing::{info, warn};

use nurture_core::domain::campaign::Campaign;
use nurture_core::domain::conversation::{MessageMetadata, RouteTaken};
use nurture_core::domain::knowledge::{Passage, ProjectScope};
use nurture_core::domain::lead::Lead;
use nurture_core::errors::CapabilityError;

use crate::capabilities::Retriever;
use crate::llm::{complete_with_retry, LlmClient, ModelHint};
use crate::prompts::{Prompt, PromptLibrary};
use crate::rag::context_block;
use crate::reply::ReplyDraft;

const NOT_SPECIFIED: &str = "Not specified";

/// Writes the personalised opening message of a campaign conversation.
pub struct OutreachComposer<R: ?Sized, L: ?Sized> {
    retriever: Arc<R>,
    llm: Arc<L>,
    prompts: Arc<PromptLibrary>,
    top_k: usize,
    max_retries: u32,
}

impl<R, L> OutreachComposer<R, L>
where
    R: Retriever + ?Sized,
    L: LlmClient + ?Sized,
{
    pub fn new(
        retriever: Arc<R>,
        llm: Arc<L>,
        prompts: Arc<PromptLibrary>,
        top_k: usize,
        max_retries: u32,
    ) -> Self {
        Self { retriever, llm, prompts, top_k, max_retries }
    }

    pub async fn compose(&self, lead: &Lead, campaign: &Campaign) -> ReplyDraft {
        let mut metadata = MessageMetadata::default();
        let scope = ProjectScope::new(campaign.project_name.clone());

        let query = selling_points_query(lead, campaign);
        let passages = match self.retriever.retrieve(&query, &scope, self.top_k).await {
            Ok(passages) => passages,
            Err(error) => {
                warn!(
                    event_name = "agent.outreach.retrieval_unavailable",
                    error = %error,
                    "composing without brochure context"
                );
                metadata.record_failure(error.note());
                Vec::new()
            }
        };
        metadata.passage_ids = passages.iter().map(|passage| passage.source_id.clone()).collect();

        let generated = match self.render_prompt(lead, campaign, &passages) {
            Ok(prompt) => {
                complete_with_retry(&*self.llm, &prompt, ModelHint::Responder, self.max_retries)
                    .await
            }
            Err(error) => Err(error),
        };
        let text = match generated {
            Ok(text) => {
                info!(
                    event_name = "agent.outreach.composed",
                    lead_id = %lead.id.0,
                    channel = campaign.message_channel.as_str(),
                    "outreach message generated"
                );
                text
            }
            Err(error) => {
                warn!(
                    event_name = "agent.outreach.generation_failed",
                    error = %error,
                    "using templated opener"
                );
                metadata.record_failure(error.note());
                metadata.template_fallback = true;
                templated_opener(lead, campaign)
            }
        };

        ReplyDraft { text, route: RouteTaken::None, metadata }
    }

    fn render_prompt(
        &self,
        lead: &Lead,
        campaign: &Campaign,
        passages: &[Passage],
    ) -> Result<String, CapabilityError> {
        let optional =
            |value: &Option<String>| value.clone().unwrap_or_else(|| NOT_SPECIFIED.to_string());

        let mut context = Context::new();
        context.insert("channel", campaign.message_channel.as_str());
        context.insert("lead_name", &lead.first_name);
        context.insert(
            "family_size",
            &lead
                .family_size
                .map(|size| size.to_string())
                .unwrap_or_else(|| NOT_SPECIFIED.to_string()),
        );
        context.insert("budget_range", &lead.budget_range());
        context.insert("unit_type", &lead.unit_type);
        context.insert("location_preference", &optional(&lead.location_preference));
        context.insert("purchase_motive", &optional(&lead.purchase_motive));
        context.insert("financing_readiness", &optional(&lead.financing_readiness));
        context.insert(
            "last_conversation_date",
            &lead
                .last_conversation_date
                .map(|date| date.format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| NOT_SPECIFIED.to_string()),
        );
        context.insert("last_conversation_summary", &optional(&lead.last_conversation_summary));
        context.insert("project_name", &campaign.project_name);
        context.insert("offer_details", campaign.offer().unwrap_or("[omit offer]"));
        context.insert("project_context", &context_block(passages));
        self.prompts.render(Prompt::Outreach, &context)
    }
}

fn selling_points_query(lead: &Lead, campaign: &Campaign) -> String {
    format!(
        "Key selling points for {} relevant to {} and budget {}",
        campaign.project_name,
        lead.unit_type,
        lead.budget_range()
    )
}

fn templated_opener(lead: &Lead, campaign: &Campaign) -> String {
    let mut text = format!(
        "Hi {}, thanks for your interest in {}. We have {} homes that match what you enquired \
         about.",
        lead.first_name, campaign.project_name, lead.unit_type
    );
    if let Some(offer) = campaign.offer() {
        text.push_str(&format!(" {offer}"));
    }
    text.push_str(" Would you like to book a property viewing or a quick call this week?");
    text
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;

    use nurture_core::domain::campaign::{Campaign, CampaignId, MessageChannel};
    use nurture_core::domain::knowledge::{Passage, ProjectScope};
    use nurture_core::domain::lead::{Lead, LeadId, LeadStatus};
    use nurture_core::errors::CapabilityError;

    use super::OutreachComposer;
    use crate::capabilities::Retriever;
    use crate::llm::{LlmClient, ModelHint};
    use crate::prompts::PromptLibrary;

    struct Brochure {
        queries: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Retriever for Brochure {
        async fn retrieve(
            &self,
            query: &str,
            _scope: &ProjectScope,
            _k: usize,
        ) -> Result<Vec<Passage>, CapabilityError> {
            self.queries.lock().expect("queries").push(query.to_string());
            Ok(vec![Passage {
                text: "Corner 2 bed homes with river views.".into(),
                score: 0.8,
                source_id: "brochure-3".into(),
            }])
        }
    }

    struct Recording {
        prompts: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl LlmClient for Recording {
        async fn complete(
            &self,
            prompt: &str,
            _hint: ModelHint,
        ) -> Result<String, CapabilityError> {
            self.prompts.lock().expect("prompts").push(prompt.to_string());
            if self.fail {
                Err(CapabilityError::Generation("quota exceeded".into()))
            } else {
                Ok("Hi Jordan, river-view 2 bed homes are ready at Altura.".into())
            }
        }
    }

    fn lead() -> Lead {
        let at = Utc.with_ymd_and_hms(2026, 10, 1, 9, 0, 0).single().expect("timestamp");
        Lead {
            id: LeadId("lead-001".into()),
            crm_id: "CRM-001".into(),
            first_name: "Jordan".into(),
            last_name: "Miles".into(),
            email: "jordan@example.com".into(),
            phone_number: None,
            project_enquired: "Altura Residences".into(),
            unit_type: "2 bed".into(),
            status: LeadStatus::NotConnected,
            budget_min: Some(Decimal::new(450_000, 0)),
            budget_max: Some(Decimal::new(520_000, 0)),
            family_size: Some(3),
            location_preference: None,
            purchase_motive: Some("upsizing".into()),
            financing_readiness: None,
            last_conversation_summary: None,
            last_conversation_date: None,
            created_at: at,
            updated_at: at,
        }
    }

    fn campaign(offer: Option<&str>) -> Campaign {
        Campaign {
            id: CampaignId("camp-altura-001".into()),
            name: "Altura Autumn Launch".into(),
            project_name: "Altura Residences".into(),
            message_channel: MessageChannel::Whatsapp,
            offer_details: offer.map(str::to_string),
            created_at: Utc.with_ymd_and_hms(2026, 10, 1, 9, 0, 0).single().expect("timestamp"),
        }
    }

    #[tokio::test]
    async fn prompt_carries_profile_offer_and_selling_points() {
        let retriever = Arc::new(Brochure { queries: Mutex::new(Vec::new()) });
        let llm = Arc::new(Recording { prompts: Mutex::new(Vec::new()), fail: false });
        let composer = OutreachComposer::new(
            retriever.clone(),
            llm.clone(),
            Arc::new(PromptLibrary::new()),
            4,
            1,
        );

        let draft =
            composer.compose(&lead(), &campaign(Some("Stamp duty paid until November"))).await;

        assert_eq!(draft.text, "Hi Jordan, river-view 2 bed homes are ready at Altura.");
        assert_eq!(draft.metadata.passage_ids, vec!["brochure-3".to_string()]);
        assert_eq!(
            retriever.queries.lock().expect("queries").as_slice(),
            ["Key selling points for Altura Residences relevant to 2 bed and budget 450000 - 520000"
                .to_string()]
        );
        let prompts = llm.prompts.lock().expect("prompts");
        assert!(prompts[0].contains("Stamp duty paid until November"));
        assert!(prompts[0].contains("Corner 2 bed homes with river views."));
        assert!(prompts[0].contains("whatsapp"));
    }

    #[tokio::test]
    async fn generation_failure_falls_back_to_templated_opener() {
        let retriever = Arc::new(Brochure { queries: Mutex::new(Vec::new()) });
        let llm = Arc::new(Recording { prompts: Mutex::new(Vec::new()), fail: true });
        let composer =
            OutreachComposer::new(retriever, llm.clone(), Arc::new(PromptLibrary::new()), 4, 1);

        let draft = composer.compose(&lead(), &campaign(None)).await;

        assert!(
            draft.text.starts_with("Hi Jordan, thanks for your interest in Altura Residences.")
        );
        assert!(draft.text.ends_with("book a property viewing or a quick call this week?"));
        assert!(draft.metadata.template_fallback);
        assert_eq!(llm.prompts.lock().expect("prompts").len(), 2);
        assert!(llm.prompts.lock().expect("prompts")[0].contains("[omit offer]"));
    }
}
