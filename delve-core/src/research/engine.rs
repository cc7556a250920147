//! Research engine: drives query generation, web research, summarization and
//! reflection in a bounded loop, then finalizes the report.

use super::clock::{Clock, SystemClock};
use super::dialogue::DialogueMode;
use super::progress::{
    CallbackReporter, ProgressChannel, ProgressEvent, ProgressKind, ProgressReporter,
    RoutingDecision,
};
use super::prompts::{
    self, GeneratedQuery, QUERY_TASK, RETRY_TURN, ReflectionOutcome, SUMMARIZER_INSTRUCTIONS,
};
use super::sources::{dedupe_and_merge, format_for_prompt};
use super::state::{ResearchPhase, ResearchResult, ResearchState};
use crate::brain::{LlmProvider, parse_structured};
use crate::config::ResearchOptions;
use crate::error::{ResearchError, ResearchStep};
use crate::search::SearchProvider;
use crate::types::{CompletionRequest, CompletionResponse, Message, ResponseSchema};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// The research orchestrator.
///
/// Holds only immutable collaborators and options, so one engine can serve
/// any number of concurrent sessions.
pub struct ResearchEngine {
    llm: Arc<dyn LlmProvider>,
    search: Arc<dyn SearchProvider>,
    clock: Arc<dyn Clock>,
    options: ResearchOptions,
    temperature: f32,
}

impl ResearchEngine {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        search: Arc<dyn SearchProvider>,
        options: ResearchOptions,
    ) -> Self {
        Self {
            llm,
            search,
            clock: Arc::new(SystemClock),
            options,
            temperature: 0.7,
        }
    }

    /// Replace the time source used for event timestamps and the prompt date.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn options(&self) -> &ResearchOptions {
        &self.options
    }

    /// Research `topic`, reporting every transition to `reporter`.
    ///
    /// Returns no partial result: any fatal step error or cancellation ends
    /// the session with an error and without a `ResearchComplete` event.
    pub async fn run(
        &self,
        topic: &str,
        reporter: Arc<dyn ProgressReporter>,
        cancel: CancellationToken,
    ) -> Result<ResearchResult, ResearchError> {
        self.execute(topic, reporter, cancel)
            .await
            .map(ResearchState::into_result)
    }

    /// Like [`run`](Self::run) with a plain synchronous observer.
    pub async fn run_with_callback<F>(
        &self,
        topic: &str,
        callback: F,
        cancel: CancellationToken,
    ) -> Result<ResearchResult, ResearchError>
    where
        F: Fn(&ProgressEvent) + Send + Sync + 'static,
    {
        self.run(topic, Arc::new(CallbackReporter::new(callback)), cancel)
            .await
    }

    /// Run a session and hand back its full final state.
    pub async fn execute(
        &self,
        topic: &str,
        reporter: Arc<dyn ProgressReporter>,
        cancel: CancellationToken,
    ) -> Result<ResearchState, ResearchError> {
        let state = ResearchState::new(topic);
        info!(
            session = %state.id,
            topic = %topic,
            loops = self.options.max_research_loops,
            model = self.llm.model_name(),
            "Starting research session"
        );

        let mut session = Session {
            engine: self,
            state,
            progress: ProgressChannel::new(reporter, self.clock.clone(), cancel.clone()),
            cancel,
        };

        match session.drive().await {
            Ok(()) => {
                let state = session.state;
                info!(
                    session = %state.id,
                    loops = state.loop_count,
                    sources = state.sources_gathered.len(),
                    tokens = state.usage.total(),
                    "Research session complete"
                );
                Ok(state)
            }
            Err(ResearchError::Cancelled) => {
                info!(session = %session.state.id, phase = %session.state.phase, "Research session cancelled");
                Err(ResearchError::Cancelled)
            }
            Err(e) => {
                error!(session = %session.state.id, phase = %session.state.phase, error = %e, "Research session failed");
                Err(e)
            }
        }
    }
}

/// Per-run working set: the engine's collaborators plus this run's state.
struct Session<'e> {
    engine: &'e ResearchEngine,
    state: ResearchState,
    progress: ProgressChannel,
    cancel: CancellationToken,
}

impl Session<'_> {
    async fn drive(&mut self) -> Result<(), ResearchError> {
        self.generate_query(DialogueMode::Fresh).await?;

        let budget = self.engine.options.loop_budget();
        while self.state.loop_count < budget {
            self.progress
                .emit(ProgressKind::Routing {
                    decision: RoutingDecision::Continue,
                    loop_count: self.state.loop_count,
                })
                .await?;
            self.web_research().await?;
            self.summarize().await?;
            self.reflect(DialogueMode::Fresh).await?;
            self.state.loop_count += 1;
        }

        self.progress
            .emit(ProgressKind::Routing {
                decision: RoutingDecision::Finalize,
                loop_count: self.state.loop_count,
            })
            .await?;
        self.finalize().await?;

        self.state.transition(ResearchPhase::Complete);
        self.progress
            .emit(ProgressKind::ResearchComplete {
                summary: self.state.running_summary.clone(),
                sources: self.state.sources_gathered.clone(),
                images: self.state.images.clone(),
            })
            .await
    }

    fn ensure_active(&self) -> Result<(), ResearchError> {
        if self.cancel.is_cancelled() {
            Err(ResearchError::Cancelled)
        } else {
            Ok(())
        }
    }

    async fn generate_query(&mut self, mode: DialogueMode) -> Result<(), ResearchError> {
        let engine = self.engine;
        let dialogue = &mut self.state.query_dialogue;
        if mode == DialogueMode::Retry && !dialogue.is_empty() {
            dialogue.continue_with(RETRY_TURN);
        } else {
            let system = prompts::query_writer_instructions(engine.clock.now(), &self.state.topic);
            dialogue.start_fresh(system, QUERY_TASK);
        }

        let messages = self.state.query_dialogue.messages().to_vec();
        let (query, reply): (GeneratedQuery, _) = self
            .complete_structured(
                ResearchStep::QueryGeneration,
                messages,
                prompts::generated_query_schema(),
            )
            .await?;
        self.state.query_dialogue.record_reply(reply);

        debug!(session = %self.state.id, query = %query.query, "Generated search query");
        self.state.search_query = query.query;
        self.state.query_rationale = query.rationale;
        self.progress
            .emit(ProgressKind::QueryGeneration {
                query: self.state.search_query.clone(),
                rationale: self.state.query_rationale.clone(),
            })
            .await
    }

    /// Search until results arrive or the retry budget is spent.
    async fn web_research(&mut self) -> Result<(), ResearchError> {
        let engine = self.engine;
        let options = &engine.options;

        let response = loop {
            self.ensure_active()?;
            self.state.transition(ResearchPhase::WebResearching);
            let response = engine
                .search
                .search(
                    &self.state.search_query,
                    options.max_source_count_per_search,
                    &self.cancel,
                )
                .await
                .map_err(ResearchError::search)?;

            if !response.is_empty() {
                break response;
            }
            if self.state.search_retry_count >= options.max_search_retry_attempts {
                warn!(
                    session = %self.state.id,
                    query = %self.state.search_query,
                    attempts = self.state.search_retry_count,
                    "Search retries exhausted; continuing with no results"
                );
                break response;
            }

            self.progress
                .emit(ProgressKind::Routing {
                    decision: RoutingDecision::RetrySearch,
                    loop_count: self.state.search_retry_count,
                })
                .await?;
            self.state.search_retry_count += 1;
            self.state.transition(ResearchPhase::RetryingSearch);
            if self.state.running_summary.is_empty() {
                self.generate_query(DialogueMode::Retry).await?;
            } else {
                self.reflect(DialogueMode::Retry).await?;
            }
        };

        self.state.search_retry_count = 0;
        let fresh = dedupe_and_merge(&response.items, &self.state.sources_gathered);
        debug!(
            session = %self.state.id,
            results = response.items.len(),
            new_sources = fresh.len(),
            "Web research complete"
        );
        self.state.sources_gathered.extend(fresh);
        self.state
            .web_research_results
            .push(format_for_prompt(&response.items, options.max_characters_per_source));
        self.state.images.extend(response.images.iter().cloned());

        self.progress
            .emit(ProgressKind::WebResearch {
                sources: response.items,
                images: response.images,
            })
            .await
    }

    async fn summarize(&mut self) -> Result<(), ResearchError> {
        self.state.transition(ResearchPhase::Summarizing);
        let recent = self.state.latest_results();
        let task = if self.state.running_summary.is_empty() {
            prompts::create_summary_task(recent, &self.state.topic)
        } else {
            prompts::extend_summary_task(&self.state.running_summary, recent, &self.state.topic)
        };
        let messages = vec![Message::system(SUMMARIZER_INSTRUCTIONS), Message::user(task)];

        let response = self
            .complete(ResearchStep::Summarize, messages, None)
            .await?;
        let summary = response.text().trim().to_string();
        self.state.running_summary = summary.clone();
        self.state.summaries_gathered.push(summary.clone());

        self.progress
            .emit(ProgressKind::Summarize { summary })
            .await
    }

    async fn reflect(&mut self, mode: DialogueMode) -> Result<(), ResearchError> {
        if mode == DialogueMode::Fresh {
            self.state.transition(ResearchPhase::Reflecting);
        }
        let dialogue = &mut self.state.reflection_dialogue;
        if mode == DialogueMode::Retry && !dialogue.is_empty() {
            dialogue.continue_with(RETRY_TURN);
        } else {
            dialogue.start_fresh(
                prompts::reflection_instructions(&self.state.topic),
                prompts::reflection_task(&self.state.running_summary),
            );
        }

        let messages = self.state.reflection_dialogue.messages().to_vec();
        let (outcome, reply): (ReflectionOutcome, _) = self
            .complete_structured(ResearchStep::Reflection, messages, prompts::reflection_schema())
            .await?;
        self.state.reflection_dialogue.record_reply(reply);

        debug!(session = %self.state.id, gap = %outcome.knowledge_gap, "Reflection produced follow-up query");
        self.state.search_query = outcome.follow_up_query;
        self.state.knowledge_gap = outcome.knowledge_gap;
        self.progress
            .emit(ProgressKind::Reflection {
                query: self.state.search_query.clone(),
                knowledge_gap: self.state.knowledge_gap.clone(),
            })
            .await
    }

    async fn finalize(&mut self) -> Result<(), ResearchError> {
        self.state.transition(ResearchPhase::Finalizing);
        self.progress.emit(ProgressKind::Finalize).await?;

        if !self.engine.options.enable_summary_consolidation {
            return Ok(());
        }
        match self.consolidate().await {
            Ok(report) => {
                self.state.running_summary = report;
                Ok(())
            }
            Err(ResearchError::Cancelled) => Err(ResearchError::Cancelled),
            Err(e) => {
                warn!(session = %self.state.id, error = %e, "Summary consolidation failed; keeping last summary");
                self.progress
                    .emit(ProgressKind::Error {
                        message: e.to_string(),
                    })
                    .await
            }
        }
    }

    async fn consolidate(&mut self) -> Result<String, ResearchError> {
        let instructions = prompts::finalize_instructions(&self.state.summaries_gathered)
            .ok_or(ResearchError::NothingToConsolidate)?;
        let messages = vec![
            Message::system(instructions),
            Message::user(prompts::finalize_task(&self.state.topic)),
        ];
        let response = self
            .complete(ResearchStep::Finalize, messages, None)
            .await?;
        Ok(response.text().trim().to_string())
    }

    /// One completion call. Anything but a normal stop is an error.
    async fn complete(
        &mut self,
        step: ResearchStep,
        messages: Vec<Message>,
        schema: Option<ResponseSchema>,
    ) -> Result<CompletionResponse, ResearchError> {
        self.ensure_active()?;
        let request = CompletionRequest {
            messages,
            response_schema: schema,
            temperature: self.engine.temperature,
            ..Default::default()
        };
        debug!(
            session = %self.state.id,
            step = %step,
            messages = request.messages.len(),
            "Requesting completion"
        );

        let response = self
            .engine
            .llm
            .complete(request, &self.cancel)
            .await
            .map_err(|e| ResearchError::completion(step, e))?;
        self.state.usage.accumulate(&response.usage);

        if !response.finish_reason.is_stop() {
            return Err(ResearchError::AbnormalFinish {
                step,
                reason: response.finish_reason.to_string(),
            });
        }
        Ok(response)
    }

    /// A completion whose text must parse as `T`. Returns the value and the
    /// assistant message for the dialogue.
    ///
    /// The schema is only sent to providers that accept one; the prompts
    /// already ask for JSON, so the reply is parsed the same way either way.
    async fn complete_structured<T: DeserializeOwned>(
        &mut self,
        step: ResearchStep,
        messages: Vec<Message>,
        schema: ResponseSchema,
    ) -> Result<(T, Message), ResearchError> {
        let schema = self
            .engine
            .llm
            .supports_structured_output()
            .then_some(schema);
        let response = self.complete(step, messages, schema).await?;
        let parsed = parse_structured::<T>(response.text()).map_err(|e| {
            ResearchError::MalformedResponse {
                step,
                message: e.to_string(),
            }
        })?;
        Ok((parsed, response.message))
    }
}
