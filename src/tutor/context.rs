//! Context payload for the reasoning service.

use crate::catalog::Problem;
use crate::config::types::{ExecutionResult, ExecutionStatus};
use crate::tutor::session::{Exchange, Role};
use serde::{Deserialize, Serialize};

const SOCRATIC_INSTRUCTIONS: &str = "\
You are an experienced programming tutor helping a student with their C++ code.
- Use the Socratic method: ask one question or give one hint at a time so the student discovers the answer on their own. Never give the answer, even if the student gives up and asks for it.
- Do not edit the student's code or write new code for them. Point to where in their existing code they should look; quoting a short part of their own code is fine.
- Stay with concepts taught in introductory programming classes and prefer the C++ standard library and built-in features over external libraries.
- Keep the reply short and end with a question for the student.";

const GROUNDING_PREAMBLE: &str = "\
The reference solution below is for your understanding only. Never quote it, paraphrase it line by line, or reveal its structure.";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Everything the tutor knows about the current submission
#[derive(Clone, Debug)]
pub struct HintContext<'a> {
    pub problem: &'a Problem,
    pub source: &'a str,
    pub result: &'a ExecutionResult,
    pub prior_output: Option<&'a str>,
    pub history: &'a [Exchange],
}

impl HintContext<'_> {
    /// System instructions, then the prior conversation, then this submission.
    pub fn to_messages(&self) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.history.len() + 2);
        messages.push(ChatMessage::new(ChatRole::System, self.system_prompt()));

        for exchange in self.history {
            let role = match exchange.role {
                Role::Learner => ChatRole::User,
                Role::Tutor => ChatRole::Assistant,
            };
            messages.push(ChatMessage::new(role, exchange.text.clone()));
        }

        messages.push(ChatMessage::new(ChatRole::User, self.submission_prompt()));
        messages
    }

    fn system_prompt(&self) -> String {
        format!(
            "{}\n\n{}\n```cpp\n{}\n```",
            SOCRATIC_INSTRUCTIONS, GROUNDING_PREAMBLE, self.problem.reference_solution
        )
    }

    fn submission_prompt(&self) -> String {
        let mut prompt = format!(
            "The question I am solving ({}):\n{}\n\nHere is my C++ code:\n```cpp\n{}\n```\n",
            self.problem.title, self.problem.prompt, self.source
        );

        match self.result.status {
            ExecutionStatus::CompileError => {
                prompt.push_str("\nIt does not compile. The compiler says:\n");
                prompt.push_str(&fenced(&self.result.stderr));
            }
            status => {
                prompt.push_str(&format!("\nWhen I run it the result is: {}\n", status));
                prompt.push_str("Output I see:\n");
                prompt.push_str(&fenced(&self.result.stdout));
                if !self.result.stderr.trim().is_empty() {
                    prompt.push_str("Error output:\n");
                    prompt.push_str(&fenced(&self.result.stderr));
                }
            }
        }

        if let Some(case) = self.problem.first_case() {
            prompt.push_str(&format!(
                "For the input\n{}I expect to see:\n{}",
                fenced(&case.input),
                fenced(&case.expected_output)
            ));
        }

        if let Some(prior) = self.prior_output.filter(|p| !p.trim().is_empty()) {
            prompt.push_str("Earlier I saw this output:\n");
            prompt.push_str(&fenced(prior));
        }

        prompt.push_str("\nGive me one Socratic question or hint to guide my thinking.");
        prompt
    }
}

fn fenced(text: &str) -> String {
    format!("```\n{}\n```\n", text.trim_end())
}
