//! Generation, summarization, and the bounded agent loop.
//!
//! Generation and summarization are single-shot: assemble context, build
//! one prompt, issue one backend call, return the result. A backend
//! failure surfaces directly; there is no silent fallback.
//!
//! The agent mode is an explicit state machine over
//! [`AgentState`] — `Thinking → ToolCall → Thinking → … → Done | Failed` —
//! rather than free-form recursion, which keeps the step ceiling,
//! cancellation, and replay straightforward. Each transition appends an
//! [`AgentStep`]; the step sequence lives for one task invocation and is
//! returned with the outcome.
//!
//! Agent responses must be a single JSON directive:
//!
//! ```json
//! { "action": "tool", "tool": "search", "input": "how is auth handled" }
//! { "action": "final", "answer": "..." }
//! ```
//!
//! A malformed directive triggers one corrective re-prompt before the task
//! fails.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::assemble::{assemble, PassageOrdering, DEFAULT_TEMPLATE};
use crate::config::GenerationConfig;
use crate::error::{ContextError, Result};
use crate::models::{ContextBlock, QueryFilters};
use crate::retrieve::{RetrievalRequest, Retriever};

/// A service that turns a prompt into a completion.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    fn model(&self) -> &str;
    async fn generate(&self, prompt: &str) -> Result<String>;
}

// ============ Ollama backend ============

/// Generation backend using a local Ollama instance's `/api/generate`.
pub struct OllamaGenerator {
    url: String,
    model: String,
    client: reqwest::Client,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ContextError::Config(format!("generation client: {}", e)))?;
        Ok(Self {
            url: config.url.clone(),
            model: config.model.clone(),
            client,
        })
    }
}

#[async_trait]
impl GenerationBackend for OllamaGenerator {
    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
        });

        let resp = self
            .client
            .post(format!("{}/api/generate", self.url))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ContextError::Generation {
                model: self.model.clone(),
                reason: format!("connection error (is Ollama running at {}?): {}", self.url, e),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(ContextError::Generation {
                model: self.model.clone(),
                reason: format!("backend error {}: {}", status, body_text),
            });
        }

        let json: serde_json::Value = resp.json().await.map_err(|e| ContextError::Generation {
            model: self.model.clone(),
            reason: format!("invalid response body: {}", e),
        })?;
        json.get("response")
            .and_then(|r| r.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| ContextError::Generation {
                model: self.model.clone(),
                reason: "invalid response: missing response field".to_string(),
            })
    }
}

// ============ Mock backend ============

/// Scripted generation backend for tests: pops queued responses in order.
/// Clones share the script and the call log.
#[derive(Clone)]
pub struct MockGenerator {
    responses: Arc<Mutex<VecDeque<String>>>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl MockGenerator {
    pub fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(
                responses.into_iter().map(|s| s.to_string()).collect(),
            )),
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Prompts the backend has seen, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationBackend for MockGenerator {
    fn model(&self) -> &str {
        "mock-generate"
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ContextError::Generation {
                model: "mock-generate".to_string(),
                reason: "script exhausted".to_string(),
            })
    }
}

// ============ Prompts ============

/// Question-answering prompt. The model is told to decline gracefully when
/// the context carries nothing relevant instead of inventing an answer.
const ANSWER_TEMPLATE: &str = "You are an expert in answering questions about documents.\n\
Here are the relevant document passages:\n{context}\n\n\
Here is the question: {question}\n\n\
If there is no related data in the passages, reply that you cannot relate \
the question to the documents provided. Otherwise answer from the passages \
and cite the source locators you used.";

const SUMMARY_TEMPLATE: &str = "Summarize the following content. The summary \
shall reflect what the content is intended to convey:\n\n{context}";

// ============ Results ============

/// Result of a single-shot generation or summarization call.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationOutput {
    pub text: String,
    /// Origin locators of the passages that fed the prompt.
    pub sources: Vec<String>,
}

/// One recorded agent transition.
#[derive(Debug, Clone, Serialize)]
pub struct AgentStep {
    pub step: usize,
    pub action: String,
    pub observation: String,
    pub done: bool,
}

/// Final agent result with the full step trace.
#[derive(Debug, Clone, Serialize)]
pub struct AgentOutcome {
    pub answer: String,
    pub steps: Vec<AgentStep>,
    pub sources: Vec<String>,
}

/// Agent loop states.
enum AgentState {
    Thinking,
    ToolCall { tool: String, input: String },
    Done { answer: String },
    Failed { reason: String },
}

enum Directive {
    Final { answer: String },
    Tool { tool: String, input: String },
}

// ============ Orchestrator ============

/// Retrieval knobs shared by the orchestrator entry points.
#[derive(Debug, Clone)]
pub struct AskOptions {
    pub top_k: usize,
    pub token_budget: usize,
    pub filters: QueryFilters,
    /// Per-backend-call deadline. On expiry the in-flight call is abandoned
    /// and [`ContextError::Timeout`] is surfaced.
    pub timeout: Option<Duration>,
}

impl AskOptions {
    pub fn new(top_k: usize, token_budget: usize) -> Self {
        Self {
            top_k,
            token_budget,
            filters: QueryFilters::default(),
            timeout: None,
        }
    }
}

/// Drives the generation backend over retrieved context.
pub struct Orchestrator {
    retriever: Arc<Retriever>,
    backend: Arc<dyn GenerationBackend>,
}

impl Orchestrator {
    pub fn new(retriever: Arc<Retriever>, backend: Arc<dyn GenerationBackend>) -> Self {
        Self { retriever, backend }
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    /// Single-shot question answering over retrieved context, ordered by
    /// relevance.
    pub async fn answer(&self, question: &str, opts: &AskOptions) -> Result<GenerationOutput> {
        let mut req = RetrievalRequest::new(question, opts.top_k, opts.token_budget)
            .with_filters(opts.filters.clone());
        if let Some(t) = opts.timeout {
            req = req.with_timeout(t);
        }
        let result = self.retriever.retrieve(&req).await?;
        let block = assemble(
            &result,
            DEFAULT_TEMPLATE,
            PassageOrdering::Relevance,
            opts.token_budget,
        );

        let prompt = ANSWER_TEMPLATE
            .replace("{context}", &block.joined())
            .replace("{question}", question);
        let text = self.generate(&prompt, opts.timeout).await?;
        Ok(GenerationOutput {
            text,
            sources: block.sources(),
        })
    }

    /// Single-shot summarization of an already-assembled block. The caller
    /// assembles with [`PassageOrdering::SourcePosition`] so the backend
    /// reads the material sequentially.
    pub async fn summarize_block(
        &self,
        block: &ContextBlock,
        timeout: Option<Duration>,
    ) -> Result<GenerationOutput> {
        let prompt = SUMMARY_TEMPLATE.replace("{context}", &block.joined());
        let text = self.generate(&prompt, timeout).await?;
        Ok(GenerationOutput {
            text,
            sources: block.sources(),
        })
    }

    /// Bounded agent loop. Terminates on a final answer, the step ceiling
    /// ([`ContextError::MaxStepsExceeded`]), or caller cancellation
    /// (dropping the future / an outer timeout).
    pub async fn run_agent(
        &self,
        task: &str,
        max_steps: usize,
        opts: &AskOptions,
    ) -> Result<AgentOutcome> {
        let mut steps: Vec<AgentStep> = Vec::new();
        let mut sources: Vec<String> = Vec::new();
        let mut state = AgentState::Thinking;
        let mut reprompted = false;
        let mut needs_correction = false;
        let mut step_no = 0usize;

        loop {
            state = match state {
                AgentState::Thinking => {
                    step_no += 1;
                    if step_no > max_steps {
                        return Err(ContextError::MaxStepsExceeded {
                            limit: max_steps,
                            step: step_no,
                        });
                    }
                    let prompt = agent_prompt(task, &steps, needs_correction);
                    let response = self.generate(&prompt, opts.timeout).await?;
                    match parse_directive(&response) {
                        Ok(Directive::Final { answer }) => AgentState::Done { answer },
                        Ok(Directive::Tool { tool, input }) => {
                            needs_correction = false;
                            AgentState::ToolCall { tool, input }
                        }
                        Err(reason) if !reprompted => {
                            // One corrective re-prompt, then the task fails.
                            reprompted = true;
                            needs_correction = true;
                            steps.push(AgentStep {
                                step: step_no,
                                action: "invalid_directive".to_string(),
                                observation: reason,
                                done: false,
                            });
                            AgentState::Thinking
                        }
                        Err(reason) => AgentState::Failed { reason },
                    }
                }
                AgentState::ToolCall { tool, input } => {
                    let observation = self.execute_tool(&tool, &input, opts, &mut sources).await?;
                    tracing::debug!(step = step_no, tool = %tool, "agent tool call");
                    steps.push(AgentStep {
                        step: step_no,
                        action: format!("{}: {}", tool, input),
                        observation,
                        done: false,
                    });
                    AgentState::Thinking
                }
                AgentState::Done { answer } => {
                    steps.push(AgentStep {
                        step: step_no,
                        action: "final".to_string(),
                        observation: answer.clone(),
                        done: true,
                    });
                    return Ok(AgentOutcome {
                        answer,
                        steps,
                        sources,
                    });
                }
                AgentState::Failed { reason } => {
                    return Err(ContextError::AgentResponse(reason));
                }
            };
        }
    }

    async fn execute_tool(
        &self,
        tool: &str,
        input: &str,
        opts: &AskOptions,
        sources: &mut Vec<String>,
    ) -> Result<String> {
        match tool {
            "search" => {
                let mut req = RetrievalRequest::new(input, opts.top_k, opts.token_budget)
                    .with_filters(opts.filters.clone());
                if let Some(t) = opts.timeout {
                    req = req.with_timeout(t);
                }
                let result = self.retriever.retrieve(&req).await?;
                if result.is_empty() {
                    return Ok("no matching context found".to_string());
                }
                let block = assemble(
                    &result,
                    DEFAULT_TEMPLATE,
                    PassageOrdering::Relevance,
                    opts.token_budget,
                );
                for origin in block.sources() {
                    if !sources.contains(&origin) {
                        sources.push(origin);
                    }
                }
                Ok(block.joined())
            }
            "answer" => {
                let output = self.answer(input, opts).await?;
                for origin in output.sources {
                    if !sources.contains(&origin) {
                        sources.push(origin);
                    }
                }
                Ok(output.text)
            }
            other => Ok(format!(
                "unknown tool '{}'; available tools: search, answer",
                other
            )),
        }
    }

    async fn generate(&self, prompt: &str, timeout: Option<Duration>) -> Result<String> {
        match timeout {
            Some(deadline) => tokio::time::timeout(deadline, self.backend.generate(prompt))
                .await
                .map_err(|_| ContextError::Timeout {
                    seconds: deadline.as_secs(),
                })?,
            None => self.backend.generate(prompt).await,
        }
    }
}

fn agent_prompt(task: &str, steps: &[AgentStep], needs_correction: bool) -> String {
    let mut prompt = String::new();
    prompt.push_str(
        "You are an agent working on a task over an indexed document collection.\n\
         Respond with exactly one JSON object and nothing else. Either request a tool:\n\
         {\"action\": \"tool\", \"tool\": \"search\", \"input\": \"<query>\"}\n\
         or finish the task:\n\
         {\"action\": \"final\", \"answer\": \"<answer>\"}\n\
         Available tools: search (retrieve relevant passages), answer \
         (answer a question using retrieved context).\n\n",
    );
    prompt.push_str(&format!("Task: {}\n", task));

    if !steps.is_empty() {
        prompt.push_str("\nSteps so far:\n");
        for step in steps {
            prompt.push_str(&format!(
                "{}. action: {}\n   observation: {}\n",
                step.step, step.action, step.observation
            ));
        }
    }

    if needs_correction {
        prompt.push_str(
            "\nYour previous reply was not a valid directive. Respond with a \
             single JSON object in the format above, with no surrounding text.\n",
        );
    }
    prompt
}

/// Parse a backend response into a directive. Tolerates prose around the
/// JSON object by falling back to the outermost brace span.
fn parse_directive(response: &str) -> std::result::Result<Directive, String> {
    let value = serde_json::from_str::<serde_json::Value>(response.trim())
        .ok()
        .or_else(|| {
            let start = response.find('{')?;
            let end = response.rfind('}')?;
            serde_json::from_str(&response[start..=end]).ok()
        })
        .ok_or_else(|| "response contains no JSON object".to_string())?;

    match value.get("action").and_then(|a| a.as_str()) {
        Some("final") => {
            let answer = value
                .get("answer")
                .and_then(|a| a.as_str())
                .ok_or_else(|| "final directive is missing the answer field".to_string())?;
            Ok(Directive::Final {
                answer: answer.to_string(),
            })
        }
        Some("tool") => {
            let tool = value
                .get("tool")
                .and_then(|t| t.as_str())
                .ok_or_else(|| "tool directive is missing the tool field".to_string())?;
            let input = value
                .get("input")
                .and_then(|i| i.as_str())
                .unwrap_or_default();
            Ok(Directive::Tool {
                tool: tool.to_string(),
                input: input.to_string(),
            })
        }
        Some(other) => Err(format!("unknown action '{}'", other)),
        None => Err("directive is missing the action field".to_string()),
    }
}
