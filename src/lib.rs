//! Asynchronous human-in-the-loop executor.
//!
//! Bridges an upstream orchestrator with a single-operator Telegram chat:
//! the orchestrator posts an execution request, the operator answers by
//! button or free-form text/voice, and the decision is delivered back
//! through a webhook callback. Unanswered executions time out.

pub mod callback;
pub mod config;
pub mod executions;
pub mod http;
pub mod i18n;
pub mod telegram;
