//! The agent loop: a bounded state machine around two suspension
//! points, the completion call and the SQL execution.
//!
//! Every completion response is classified into exactly one action and
//! every SQL execution returns a value, so the loop is total: each
//! state has a defined transition for every input, and the iteration
//! and wall-clock caps guarantee termination independent of model
//! behavior.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use autoquery_core::config::AgentConfig;
use autoquery_core::{
    Action, AgentAnswer, CompletionClient, ConversationTurn, PromptContext, QueryError, RunError,
    RunStatus, SchemaContext, SqlExecutor, SqlStep, TranscriptEntry,
};

/// Consecutive warehouse-unavailable results tolerated before the run
/// fails. Connection failures are not model-correctable, so they get a
/// fixed budget instead of burning the whole iteration cap.
const WAREHOUSE_RETRIES: u32 = 3;

const MALFORMED_PREVIEW: usize = 80;

pub struct AgentLoop<C, E> {
    completion: C,
    executor: E,
    budgets: AgentConfig,
    completion_retries: u32,
}

enum LoopVerdict {
    Answered(String),
    Failed(RunError),
    Exhausted,
}

impl<C, E> AgentLoop<C, E>
where
    C: CompletionClient,
    E: SqlExecutor,
{
    pub fn new(completion: C, executor: E, budgets: AgentConfig, completion_retries: u32) -> Self {
        Self { completion, executor, budgets, completion_retries }
    }

    /// Runs one question to a terminal state. The history slice is the
    /// caller's snapshot; the run never writes back to the store.
    pub async fn ask(
        &self,
        question: &str,
        schema: &SchemaContext,
        history: &[ConversationTurn],
    ) -> AgentAnswer {
        let transcript: Arc<Mutex<Vec<TranscriptEntry>>> = Arc::default();
        let started = Instant::now();

        info!(event_name = "agent.run.started", question_chars = question.len(), "agent run started");

        // The run budget is the single cancellation mechanism: when it
        // fires the in-flight call is dropped and whatever the
        // transcript holds so far grounds the exhausted answer.
        let run_budget = Duration::from_secs(self.budgets.max_run_secs.max(1));
        let verdict = match tokio::time::timeout(
            run_budget,
            self.drive(question, schema, history, Arc::clone(&transcript)),
        )
        .await
        {
            Ok(verdict) => verdict,
            Err(_elapsed) => {
                warn!(
                    event_name = "agent.run.time_budget_exceeded",
                    max_run_secs = self.budgets.max_run_secs,
                    "run exceeded its wall-clock budget"
                );
                LoopVerdict::Exhausted
            }
        };

        let entries = lock_entries(&transcript).clone();
        let sql_trail: Vec<SqlStep> = entries.iter().map(|entry| entry.step.clone()).collect();

        let answer = match verdict {
            LoopVerdict::Answered(text) => {
                AgentAnswer { text, status: RunStatus::Answered, sql_trail }
            }
            LoopVerdict::Failed(error) => AgentAnswer {
                text: error.user_message().to_string(),
                status: RunStatus::Failed,
                sql_trail,
            },
            LoopVerdict::Exhausted => AgentAnswer {
                text: synthesize_exhausted_answer(&entries),
                status: RunStatus::Exhausted,
                sql_trail,
            },
        };

        info!(
            event_name = "agent.run.finished",
            status = answer.status.as_str(),
            steps = answer.sql_trail.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "agent run finished"
        );
        answer
    }

    async fn drive(
        &self,
        question: &str,
        schema: &SchemaContext,
        history: &[ConversationTurn],
        transcript: Arc<Mutex<Vec<TranscriptEntry>>>,
    ) -> LoopVerdict {
        let mut iteration_count = 0u32;
        let mut malformed_count = 0u32;
        let mut consecutive_unavailable = 0u32;
        let mut corrections: Vec<String> = Vec::new();

        loop {
            if iteration_count >= self.budgets.max_iterations {
                return LoopVerdict::Exhausted;
            }

            let snapshot = lock_entries(&transcript).clone();
            let context = PromptContext {
                question,
                schema,
                history,
                transcript: &snapshot,
                corrections: &corrections,
            };

            let action = match self.propose_with_retry(&context).await {
                Ok(action) => action,
                Err(error) => return LoopVerdict::Failed(error),
            };

            // A response that parsed as an action means the corrective
            // feedback did its job; stale corrections must not keep
            // echoing into later prompts.
            if !matches!(action, Action::Malformed { .. }) {
                corrections.clear();
            }

            match action {
                // A final answer is accepted even with zero SQL steps;
                // greetings and out-of-scope questions need no query.
                Action::FinalAnswer { text } => return LoopVerdict::Answered(text),

                Action::Malformed { raw } => {
                    malformed_count += 1;
                    warn!(
                        event_name = "agent.run.malformed_response",
                        attempt = malformed_count,
                        "completion response did not parse as an action"
                    );
                    if malformed_count > self.budgets.malformed_retries {
                        return LoopVerdict::Failed(RunError::MalformedExhausted {
                            attempts: malformed_count,
                        });
                    }
                    corrections.push(format!(
                        "Your previous response could not be interpreted. It began: `{}`. \
                         Reply with exactly one line starting with `SQL:` or `ANSWER:`.",
                        preview(&raw)
                    ));
                }

                Action::RunSql { statement } => {
                    let step_started = Instant::now();
                    let outcome = self.executor.execute(&statement, self.budgets.row_limit).await;
                    let duration_ms = step_started.elapsed().as_millis() as u64;
                    iteration_count += 1;

                    match outcome {
                        Ok(result) => {
                            consecutive_unavailable = 0;
                            info!(
                                event_name = "agent.run.step_succeeded",
                                iteration = iteration_count,
                                rows = result.row_count,
                                duration_ms,
                                "sql step succeeded"
                            );
                            lock_entries(&transcript).push(TranscriptEntry {
                                step: SqlStep::succeeded(&statement, result.row_count, duration_ms),
                                observation: result.render(),
                            });
                        }
                        Err(error) => {
                            let model_correctable = error.is_model_correctable();
                            if matches!(error, QueryError::Unavailable(_)) {
                                consecutive_unavailable += 1;
                            } else {
                                consecutive_unavailable = 0;
                            }
                            warn!(
                                event_name = "agent.run.step_failed",
                                iteration = iteration_count,
                                error = %error,
                                "sql step failed"
                            );

                            // Engine errors go back verbatim so the
                            // model can fix the next attempt; pure
                            // infrastructure failures do not.
                            let observation = if model_correctable {
                                error.to_string()
                            } else {
                                "The warehouse was temporarily unavailable. The query itself \
                                 was not evaluated."
                                    .to_string()
                            };
                            lock_entries(&transcript).push(TranscriptEntry {
                                step: SqlStep::failed(&statement, error.to_string(), duration_ms),
                                observation,
                            });

                            if consecutive_unavailable > WAREHOUSE_RETRIES {
                                return LoopVerdict::Failed(RunError::WarehouseUnreachable);
                            }
                        }
                    }
                }
            }
        }
    }

    /// Retries `CompletionError`s that are worth retrying, up to the
    /// configured budget, then surfaces a terminal run failure.
    async fn propose_with_retry(
        &self,
        context: &PromptContext<'_>,
    ) -> Result<Action, RunError> {
        let max_attempts = self.completion_retries.saturating_add(1);
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            match self.completion.propose(context).await {
                Ok(action) => return Ok(action),
                Err(error) => {
                    warn!(
                        event_name = "agent.run.completion_error",
                        attempt = attempts,
                        error = %error,
                        "completion call failed"
                    );
                    if attempts >= max_attempts || !error.is_retryable() {
                        return Err(RunError::CompletionExhausted { attempts });
                    }
                }
            }
        }
    }
}

fn lock_entries(transcript: &Mutex<Vec<TranscriptEntry>>) -> MutexGuard<'_, Vec<TranscriptEntry>> {
    transcript.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Best-effort answer for a run that hit its iteration or time budget.
/// Only the most recent successful result grounds the text.
fn synthesize_exhausted_answer(entries: &[TranscriptEntry]) -> String {
    let base = "I could not fully resolve this question within the allotted steps.";
    match entries.iter().rev().find(|entry| entry.step.is_success()) {
        Some(entry) => format!(
            "{base} The last successful query was `{}` and returned:\n{}",
            entry.step.statement, entry.observation
        ),
        None => base.to_string(),
    }
}

fn preview(raw: &str) -> String {
    let single_line = raw.lines().next().unwrap_or_default();
    single_line.chars().take(MALFORMED_PREVIEW).collect()
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;

    use autoquery_core::config::AgentConfig;
    use autoquery_core::{
        Action, CompletionClient, CompletionError, PromptContext, QueryError, QueryResult,
        RunStatus, SchemaContext, SqlExecutor,
    };

    use super::AgentLoop;

    fn budgets(max_iterations: u32) -> AgentConfig {
        AgentConfig {
            max_iterations,
            max_run_secs: 60,
            row_limit: 10,
            max_history_turns: 10,
            malformed_retries: 3,
        }
    }

    fn schema() -> SchemaContext {
        SchemaContext::default()
    }

    /// Replays a fixed script of completion outcomes, then reports
    /// itself malformed if called beyond the script.
    struct ScriptedCompletion {
        script: Mutex<VecDeque<Result<Action, CompletionError>>>,
        seen_observations: Mutex<Vec<Vec<String>>>,
        seen_corrections: Mutex<Vec<Vec<String>>>,
    }

    impl ScriptedCompletion {
        fn new(script: Vec<Result<Action, CompletionError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                seen_observations: Mutex::new(Vec::new()),
                seen_corrections: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CompletionClient for ScriptedCompletion {
        async fn propose(&self, context: &PromptContext<'_>) -> Result<Action, CompletionError> {
            self.seen_observations.lock().unwrap().push(
                context.transcript.iter().map(|entry| entry.observation.clone()).collect(),
            );
            self.seen_corrections.lock().unwrap().push(context.corrections.to_vec());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(Action::Malformed { raw: "script exhausted".to_string() }))
        }
    }

    /// Repeats one completion outcome forever.
    struct RepeatingCompletion(Result<Action, CompletionError>);

    #[async_trait]
    impl CompletionClient for RepeatingCompletion {
        async fn propose(&self, _context: &PromptContext<'_>) -> Result<Action, CompletionError> {
            self.0.clone()
        }
    }

    /// Sleeps before every reply; used to trip the run budget.
    struct SleepyCompletion(Duration);

    #[async_trait]
    impl CompletionClient for SleepyCompletion {
        async fn propose(&self, _context: &PromptContext<'_>) -> Result<Action, CompletionError> {
            tokio::time::sleep(self.0).await;
            Ok(Action::FinalAnswer { text: "too late".to_string() })
        }
    }

    /// Returns a fixed single-row result and asserts the row cap the
    /// loop passes down matches the configured one.
    struct FixedExecutor {
        expected_row_limit: u32,
    }

    #[async_trait]
    impl SqlExecutor for FixedExecutor {
        async fn execute(
            &self,
            _statement: &str,
            row_limit: u32,
        ) -> Result<QueryResult, QueryError> {
            assert_eq!(row_limit, self.expected_row_limit, "loop must pass the configured cap");
            Ok(QueryResult {
                columns: vec!["count".to_string()],
                rows: vec![json!([8])],
                row_count: 1,
            })
        }
    }

    struct FailingExecutor {
        message: &'static str,
    }

    #[async_trait]
    impl SqlExecutor for FailingExecutor {
        async fn execute(
            &self,
            _statement: &str,
            _row_limit: u32,
        ) -> Result<QueryResult, QueryError> {
            Err(QueryError::Execution(self.message.to_string()))
        }
    }

    struct UnavailableExecutor;

    #[async_trait]
    impl SqlExecutor for UnavailableExecutor {
        async fn execute(
            &self,
            _statement: &str,
            _row_limit: u32,
        ) -> Result<QueryResult, QueryError> {
            Err(QueryError::Unavailable("connection refused".to_string()))
        }
    }

    fn run_sql(statement: &str) -> Result<Action, CompletionError> {
        Ok(Action::RunSql { statement: statement.to_string() })
    }

    fn final_answer(text: &str) -> Result<Action, CompletionError> {
        Ok(Action::FinalAnswer { text: text.to_string() })
    }

    #[tokio::test]
    async fn count_question_answers_with_one_successful_step() {
        let completion = ScriptedCompletion::new(vec![
            run_sql("SELECT COUNT(*) FROM vehicles"),
            final_answer("There are 8 vehicles in the database."),
        ]);
        let agent =
            AgentLoop::new(completion, FixedExecutor { expected_row_limit: 10 }, budgets(15), 2);

        let answer = agent.ask("How many vehicles are in the database?", &schema(), &[]).await;

        assert_eq!(answer.status, RunStatus::Answered);
        assert_eq!(answer.text, "There are 8 vehicles in the database.");
        assert_eq!(answer.sql_trail.len(), 1);
        assert!(answer.sql_trail[0].error_message.is_none());
        assert_eq!(answer.sql_trail[0].rows_returned, Some(1));
    }

    #[tokio::test]
    async fn final_answer_with_zero_queries_is_accepted() {
        let completion = ScriptedCompletion::new(vec![final_answer(
            "Hello! Ask me about vehicles, dealerships, or sales.",
        )]);
        let agent =
            AgentLoop::new(completion, FixedExecutor { expected_row_limit: 10 }, budgets(15), 2);

        let answer = agent.ask("hi there", &schema(), &[]).await;

        assert_eq!(answer.status, RunStatus::Answered);
        assert!(answer.sql_trail.is_empty());
    }

    #[tokio::test]
    async fn persistent_query_errors_exhaust_the_iteration_cap() {
        let max_iterations = 4;
        let completion =
            RepeatingCompletion(run_sql("SELECT * FROM nonexistent"));
        let agent = AgentLoop::new(
            completion,
            FailingExecutor { message: "no such table: nonexistent" },
            budgets(max_iterations),
            2,
        );

        let answer = agent.ask("what is in nonexistent?", &schema(), &[]).await;

        assert_eq!(answer.status, RunStatus::Exhausted);
        assert_eq!(answer.sql_trail.len(), max_iterations as usize);
        for step in &answer.sql_trail {
            assert!(step.error_message.is_some());
            assert!(step.rows_returned.is_none());
        }
        assert!(answer.text.contains("allotted steps"));
    }

    #[tokio::test]
    async fn malformed_responses_fail_after_the_retry_budget_with_zero_steps() {
        let completion =
            RepeatingCompletion(Ok(Action::Malformed { raw: "¯\\_(ツ)_/¯".to_string() }));
        let agent =
            AgentLoop::new(completion, FixedExecutor { expected_row_limit: 10 }, budgets(15), 2);

        let answer = agent.ask("anything", &schema(), &[]).await;

        assert_eq!(answer.status, RunStatus::Failed);
        assert!(answer.sql_trail.is_empty());
        assert!(answer.text.contains("rephrase"));
    }

    #[tokio::test]
    async fn unreachable_completion_service_fails_the_run_with_zero_steps() {
        let completion =
            RepeatingCompletion(Err(CompletionError::Unavailable("dns failure".to_string())));
        let agent =
            AgentLoop::new(completion, FixedExecutor { expected_row_limit: 10 }, budgets(15), 2);

        let answer = agent.ask("anything", &schema(), &[]).await;

        assert_eq!(answer.status, RunStatus::Failed);
        assert!(answer.sql_trail.is_empty());
        assert!(answer.text.contains("temporarily unavailable"));
    }

    #[tokio::test]
    async fn query_errors_are_fed_back_verbatim() {
        let completion = ScriptedCompletion::new(vec![
            run_sql("SELECT * FROM zorp"),
            final_answer("That table does not exist."),
        ]);
        let agent = AgentLoop::new(
            completion,
            FailingExecutor { message: "no such table: zorp" },
            budgets(15),
            2,
        );

        let answer = agent.ask("what is in zorp?", &schema(), &[]).await;
        assert_eq!(answer.status, RunStatus::Answered);

        let observations = agent.completion.seen_observations.lock().unwrap();
        // First call saw an empty transcript; the second saw the error.
        assert!(observations[0].is_empty());
        assert!(observations[1].iter().any(|text| text.contains("no such table: zorp")));
    }

    #[tokio::test]
    async fn malformed_recovery_feeds_a_correction_and_still_answers() {
        let completion = ScriptedCompletion::new(vec![
            Ok(Action::Malformed { raw: "thinking out loud...".to_string() }),
            run_sql("SELECT COUNT(*) FROM vehicles"),
            final_answer("8 vehicles."),
        ]);
        let agent =
            AgentLoop::new(completion, FixedExecutor { expected_row_limit: 10 }, budgets(15), 2);

        let answer = agent.ask("how many vehicles?", &schema(), &[]).await;

        assert_eq!(answer.status, RunStatus::Answered);
        assert_eq!(answer.sql_trail.len(), 1);

        let corrections = agent.completion.seen_corrections.lock().unwrap();
        assert!(corrections[1].iter().any(|text| text.contains("could not be interpreted")));
    }

    #[tokio::test]
    async fn corrections_stop_once_the_model_recovers() {
        let completion = ScriptedCompletion::new(vec![
            Ok(Action::Malformed { raw: "thinking out loud...".to_string() }),
            run_sql("SELECT COUNT(*) FROM vehicles"),
            run_sql("SELECT COUNT(*) FROM customers"),
            final_answer("8 vehicles, 6 customers."),
        ]);
        let agent =
            AgentLoop::new(completion, FixedExecutor { expected_row_limit: 10 }, budgets(15), 2);

        let answer = agent.ask("count everything", &schema(), &[]).await;
        assert_eq!(answer.status, RunStatus::Answered);

        let corrections = agent.completion.seen_corrections.lock().unwrap();
        assert!(corrections[1].iter().any(|text| text.contains("could not be interpreted")));
        // Once a response parsed, later prompts carry no stale feedback.
        assert!(corrections[2].is_empty());
        assert!(corrections[3].is_empty());
    }

    #[tokio::test]
    async fn unreachable_warehouse_fails_without_burning_the_whole_iteration_cap() {
        let completion = RepeatingCompletion(run_sql("SELECT COUNT(*) FROM vehicles"));
        let agent = AgentLoop::new(completion, UnavailableExecutor, budgets(15), 2);

        let answer = agent.ask("how many vehicles?", &schema(), &[]).await;

        assert_eq!(answer.status, RunStatus::Failed);
        assert!(answer.text.contains("database is currently unreachable"));
        assert!(answer.sql_trail.len() < 15, "should stop well before the iteration cap");
    }

    #[tokio::test(start_paused = true)]
    async fn wall_clock_budget_synthesizes_an_exhausted_answer() {
        let completion = SleepyCompletion(Duration::from_secs(600));
        let mut config = budgets(15);
        config.max_run_secs = 5;
        let agent =
            AgentLoop::new(completion, FixedExecutor { expected_row_limit: 10 }, config, 2);

        let answer = agent.ask("slow question", &schema(), &[]).await;

        assert_eq!(answer.status, RunStatus::Exhausted);
        assert!(answer.sql_trail.is_empty());
        assert!(answer.text.contains("allotted steps"));
    }

    #[tokio::test]
    async fn exhausted_answer_is_grounded_in_the_most_recent_success() {
        let completion = ScriptedCompletion::new(vec![
            run_sql("SELECT COUNT(*) FROM vehicles"),
            run_sql("SELECT COUNT(*) FROM customers"),
        ]);
        let agent =
            AgentLoop::new(completion, FixedExecutor { expected_row_limit: 10 }, budgets(2), 2);

        let answer = agent.ask("count everything", &schema(), &[]).await;

        assert_eq!(answer.status, RunStatus::Exhausted);
        assert_eq!(answer.sql_trail.len(), 2);
        assert!(answer.text.contains("SELECT COUNT(*) FROM customers"));
    }

    #[tokio::test]
    async fn identical_questions_with_deterministic_stubs_produce_identical_trails() {
        let script = || {
            ScriptedCompletion::new(vec![
                run_sql("SELECT COUNT(*) FROM vehicles"),
                final_answer("8 vehicles."),
            ])
        };

        let first = AgentLoop::new(script(), FixedExecutor { expected_row_limit: 10 }, budgets(15), 2)
            .ask("how many vehicles?", &schema(), &[])
            .await;
        let second = AgentLoop::new(script(), FixedExecutor { expected_row_limit: 10 }, budgets(15), 2)
            .ask("how many vehicles?", &schema(), &[])
            .await;

        let statements = |answer: &autoquery_core::AgentAnswer| {
            answer.sql_trail.iter().map(|step| step.statement.clone()).collect::<Vec<_>>()
        };
        assert_eq!(statements(&first), statements(&second));
        assert_eq!(first.text, second.text);
    }
}
