//! Conversation runtime for lead nurture campaigns.
//!
//! An inbound reply is checked for visit or call intent first. Replies that
//! carry a goal seal the conversation; everything else is routed to either the
//! brochure retrieval branch or the listings SQL branch and answered there.
//!
//! The LLM only writes text and SQL. Routing fallbacks, goal detection, slot
//! parsing and every state change are deterministic.
//!
//! - `runtime` - `AgentRuntime`, the single entry point
//! - `conversation` - state machine wrapper and goal reply wording
//! - `router` - classifier with keyword fallback
//! - `rag`, `t2sql`, `outreach` - reply generation per branch

pub mod capabilities;
pub mod classifier;
pub mod conversation;
pub mod goal;
pub mod llm;
pub mod locks;
pub mod outreach;
pub mod prompts;
pub mod rag;
pub mod reply;
pub mod retrieval;
pub mod router;
pub mod runtime;
pub mod slot;
pub mod t2sql;

pub use runtime::{
    AgentRuntime, CampaignLaunch, Capabilities, OutreachOutcome, RuntimeSettings, Stores,
};
