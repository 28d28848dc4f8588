//! Messenger agent: direct question answering.

use async_trait::async_trait;

use super::{settle, wrong_input, Agent, AgentContext};
use crate::domain::errors::InvocationError;
use crate::domain::models::{AgentInput, AgentOutput, AgentResult, AgentRole};

const SYSTEM: &str = "Answer the user's question directly and concisely. When report context is \
given, ground the answer in it and say so when it does not cover the question.";

/// Answers user questions and drafts revision instructions.
pub struct MessengerAgent;

impl MessengerAgent {
    async fn answer(
        &self,
        ctx: &AgentContext,
        question: &str,
        context: Option<&str>,
    ) -> Result<AgentResult, InvocationError> {
        let prompt = match context {
            Some(context) => format!("Report context:\n{context}\n\nQuestion:\n{question}"),
            None => format!("Question:\n{question}"),
        };
        let answer = ctx.complete(SYSTEM, prompt).await?;
        let answer = answer.trim();
        if answer.is_empty() {
            return Err(InvocationError::retryable("empty answer"));
        }
        Ok(AgentResult::Terminal(AgentOutput::Answer(answer.to_string())))
    }
}

#[async_trait]
impl Agent for MessengerAgent {
    fn role(&self) -> AgentRole {
        AgentRole::Messenger
    }

    async fn invoke(&self, ctx: &AgentContext, input: AgentInput) -> AgentResult {
        match &input {
            AgentInput::Message { question, context } => {
                settle(self.answer(ctx, question, context.as_deref()).await)
            }
            other => wrong_input(self.role(), other),
        }
    }
}
