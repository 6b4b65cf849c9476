//! Background AI feedback for submitted answer sets.
//!
//! A submission hands a `FeedbackJob` to `FeedbackService::dispatch`, which
//! spawns it on a `TaskTracker` and returns immediately. The job resolves the
//! session's scenario, looks up the scenario's questions, asks the completion
//! client for feedback on every free-text answer (bounded retries under one
//! deadline per question) and writes the resulting map onto the response row.
//!
//! Failures never reach the submitter. Per-question failures become sentinel
//! entries; lookup or store failures abort the job and are logged.

use std::{
  collections::{BTreeMap, HashMap},
  future::Future,
  sync::Arc,
  time::Duration,
};

use serde_json::{Map, Value};
use thiserror::Error;
use tokio::time::{sleep, timeout, timeout_at, Instant};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, info_span, instrument, warn, Instrument};
use uuid::Uuid;

use crate::config::{Prompts, RetrySettings};
use crate::data::{DataError, Db, ExerciseQuestion, QuestionType};
use crate::gemini::{AiError, CompletionClient};
use crate::util::{fill_template, json_type_name, trunc_for_log};

pub const FEEDBACK_FAILED: &str = "Error: Could not generate feedback at this time.";
pub const NO_FEEDBACK: &str = "No specific feedback generated.";

/// Question id (as submitted) → feedback text.
pub type FeedbackMap = BTreeMap<String, String>;

#[derive(Debug, Clone)]
pub struct FeedbackJob {
  pub response_id: Uuid,
  pub session_id: Uuid,
  pub raw_answers: Map<String, Value>,
}

/// Upper bound for the shared per-question deadline.
pub const MAX_DEADLINE: Duration = Duration::from_secs(3600);

/// Per-question AI call policy. All attempts share one deadline; the wait
/// before attempt `n + 1` is `backoff_step * n`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
  pub max_attempts: u32,
  pub deadline: Duration,
  pub backoff_step: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self::from(&RetrySettings::default())
  }
}

impl From<&RetrySettings> for RetryPolicy {
  fn from(s: &RetrySettings) -> Self {
    Self {
      max_attempts: s.max_attempts.max(1),
      deadline: Duration::from_secs(s.deadline_secs).min(MAX_DEADLINE),
      backoff_step: Duration::from_secs(s.backoff_step_secs).min(MAX_DEADLINE),
    }
  }
}

/// The persistence the pipeline needs, kept narrow so tests can fake it.
pub trait FeedbackStore: Send + Sync + 'static {
  fn scenario_for_session(&self, session_id: Uuid) -> impl Future<Output = Result<Uuid, DataError>> + Send;

  fn questions_for_scenario(
    &self,
    scenario_id: Uuid,
  ) -> impl Future<Output = Result<HashMap<Uuid, ExerciseQuestion>, DataError>> + Send;

  fn store_feedback(&self, response_id: Uuid, feedback: &FeedbackMap) -> impl Future<Output = Result<(), DataError>> + Send;
}

impl FeedbackStore for Db {
  async fn scenario_for_session(&self, session_id: Uuid) -> Result<Uuid, DataError> {
    self.scenario_id_for_session(session_id).await
  }

  async fn questions_for_scenario(&self, scenario_id: Uuid) -> Result<HashMap<Uuid, ExerciseQuestion>, DataError> {
    self.questions_by_scenario(scenario_id).await
  }

  async fn store_feedback(&self, response_id: Uuid, feedback: &FeedbackMap) -> Result<(), DataError> {
    self.add_feedback(response_id, feedback).await
  }
}

#[derive(Debug, Error)]
pub enum FeedbackError {
  #[error("could not resolve scenario for session: {0}")]
  SessionLookup(#[source] DataError),
  #[error("could not fetch scenario questions: {0}")]
  QuestionLookup(#[source] DataError),
  #[error("could not store feedback: {0}")]
  Store(#[source] DataError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackOutcome {
  /// No completion client configured; nothing was looked up.
  AiDisabled,
  /// No free-text answers; the response row was left untouched.
  NothingToGrade,
  /// Feedback map with this many entries was written.
  Stored(usize),
}

/// Why an answer entry produced no prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Skip {
  InvalidId,
  UnknownQuestion,
  NotFreeText,
  NonStringAnswer(&'static str),
}

pub struct FeedbackPipeline<S, C> {
  store: S,
  client: Option<C>,
  prompts: Prompts,
  policy: RetryPolicy,
}

impl<S: FeedbackStore, C: CompletionClient> FeedbackPipeline<S, C> {
  pub fn new(store: S, client: Option<C>, prompts: Prompts, policy: RetryPolicy) -> Self {
    Self { store, client, prompts, policy }
  }

  pub fn ai_enabled(&self) -> bool {
    self.client.is_some()
  }

  #[instrument(level = "info", skip(self, job), fields(response_id = %job.response_id, session_id = %job.session_id, answers = job.raw_answers.len()))]
  pub async fn generate_and_store(&self, job: &FeedbackJob) -> Result<FeedbackOutcome, FeedbackError> {
    let Some(client) = &self.client else {
      warn!(target: "feedback", "Gemini API key is not configured; skipping AI feedback generation");
      return Ok(FeedbackOutcome::AiDisabled);
    };

    let scenario_id = self
      .store
      .scenario_for_session(job.session_id)
      .await
      .map_err(FeedbackError::SessionLookup)?;
    let questions = self
      .store
      .questions_for_scenario(scenario_id)
      .await
      .map_err(FeedbackError::QuestionLookup)?;

    let feedback = collect_feedback(client, &self.prompts, &self.policy, &questions, job).await;
    if feedback.is_empty() {
      debug!(target: "feedback", %scenario_id, "no free-text answers to grade");
      return Ok(FeedbackOutcome::NothingToGrade);
    }

    self
      .store
      .store_feedback(job.response_id, &feedback)
      .await
      .map_err(FeedbackError::Store)?;
    info!(target: "feedback", entries = feedback.len(), "AI feedback stored");
    Ok(FeedbackOutcome::Stored(feedback.len()))
  }
}

/// One sequential pass over the submitted answers.
async fn collect_feedback<C: CompletionClient>(
  client: &C,
  prompts: &Prompts,
  policy: &RetryPolicy,
  questions: &HashMap<Uuid, ExerciseQuestion>,
  job: &FeedbackJob,
) -> FeedbackMap {
  let mut feedback = FeedbackMap::new();
  for (key, answer) in &job.raw_answers {
    match prompt_for_answer(prompts, questions, key, answer) {
      Ok(prompt) => {
        let text = complete_with_retry(client, &prompt, policy)
          .instrument(info_span!(target: "feedback", "question", question_id = %key))
          .await;
        feedback.insert(key.clone(), text);
      }
      Err(Skip::NotFreeText) => {}
      Err(Skip::InvalidId) => {
        warn!(target: "feedback", question_id = %trunc_for_log(key, 64), "answer key is not a question id; skipped")
      }
      Err(Skip::UnknownQuestion) => {
        warn!(target: "feedback", question_id = %key, "answer refers to a question outside this scenario; skipped")
      }
      Err(Skip::NonStringAnswer(kind)) => {
        warn!(target: "feedback", question_id = %key, answer_type = kind, "free-text answer is not a string; skipped")
      }
    }
  }
  feedback
}

fn prompt_for_answer(
  prompts: &Prompts,
  questions: &HashMap<Uuid, ExerciseQuestion>,
  key: &str,
  answer: &Value,
) -> Result<String, Skip> {
  let id = Uuid::parse_str(key).map_err(|_| Skip::InvalidId)?;
  let question = questions.get(&id).ok_or(Skip::UnknownQuestion)?;
  if question.kind != QuestionType::FreeText {
    return Err(Skip::NotFreeText);
  }
  let answer = answer.as_str().ok_or(Skip::NonStringAnswer(json_type_name(answer)))?;
  Ok(build_prompt(prompts, &question.question, question.prompt_guidance.as_deref(), answer))
}

/// Assemble the grading prompt. Guidance is only mentioned when non-empty.
pub fn build_prompt(prompts: &Prompts, question: &str, guidance: Option<&str>, answer: &str) -> String {
  let mut prompt = fill_template(&prompts.question_template, &[("question", question)]);
  if let Some(g) = guidance.filter(|g| !g.is_empty()) {
    prompt.push_str(&fill_template(&prompts.guidance_template, &[("guidance", g)]));
  }
  prompt.push_str(&fill_template(&prompts.answer_template, &[("answer", answer)]));
  prompt.push_str(&fill_template(&prompts.instruction_template, &[("language", &prompts.language)]));
  prompt
}

/// Ask for feedback under `policy`, folding failures into the sentinels.
pub async fn complete_with_retry<C: CompletionClient>(client: &C, prompt: &str, policy: &RetryPolicy) -> String {
  let now = Instant::now();
  let deadline = now.checked_add(policy.deadline).unwrap_or(now + MAX_DEADLINE);
  match attempt_until(client, prompt, policy, deadline).await {
    Ok(text) if text.trim().is_empty() => NO_FEEDBACK.to_string(),
    Ok(text) => text,
    Err(e) => {
      error!(target: "feedback", error = %e, "Failed to generate feedback after retries");
      FEEDBACK_FAILED.to_string()
    }
  }
}

async fn attempt_until<C: CompletionClient>(
  client: &C,
  prompt: &str,
  policy: &RetryPolicy,
  deadline: Instant,
) -> Result<String, AiError> {
  let mut attempt: u32 = 1;
  loop {
    let result = timeout_at(deadline, client.generate(prompt, deadline))
      .await
      .unwrap_or(Err(AiError::DeadlineExceeded));
    let err = match result {
      Ok(text) => return Ok(text),
      Err(e) => e,
    };

    error!(target: "feedback", attempt, max_attempts = policy.max_attempts, error = %err, "Error generating feedback from Gemini");
    if err.is_deadline_exceeded() || attempt >= policy.max_attempts {
      return Err(err);
    }
    if timeout_at(deadline, sleep(policy.backoff_step.saturating_mul(attempt))).await.is_err() {
      return Err(AiError::DeadlineExceeded);
    }
    attempt += 1;
  }
}

/// Owns the pipeline and every job spawned from it.
pub struct FeedbackService<S, C> {
  pipeline: Arc<FeedbackPipeline<S, C>>,
  jobs: TaskTracker,
}

impl<S: FeedbackStore, C: CompletionClient> FeedbackService<S, C> {
  pub fn new(pipeline: FeedbackPipeline<S, C>) -> Self {
    Self { pipeline: Arc::new(pipeline), jobs: TaskTracker::new() }
  }

  pub fn ai_enabled(&self) -> bool {
    self.pipeline.ai_enabled()
  }

  /// Fire and forget. The job's errors are logged, never returned.
  pub fn dispatch(&self, job: FeedbackJob) {
    let pipeline = Arc::clone(&self.pipeline);
    let span = info_span!(target: "feedback", "feedback_job", response_id = %job.response_id);
    self.jobs.spawn(
      async move {
        match pipeline.generate_and_store(&job).await {
          Ok(outcome) => debug!(target: "feedback", ?outcome, "feedback job finished"),
          Err(e) => error!(
            target: "feedback",
            response_id = %job.response_id,
            session_id = %job.session_id,
            error = %e,
            "Failed to generate or store AI feedback"
          ),
        }
      }
      .instrument(span),
    );
  }

  pub fn in_flight(&self) -> usize {
    self.jobs.len()
  }

  /// Stop accepting jobs and wait up to `grace` for the running ones.
  /// Returns false if some were still running when the grace ran out.
  pub async fn drain(&self, grace: Duration) -> bool {
    self.jobs.close();
    match timeout(grace, self.jobs.wait()).await {
      Ok(()) => {
        info!(target: "feedback", "all feedback jobs finished");
        true
      }
      Err(_) => {
        warn!(target: "feedback", abandoned = self.jobs.len(), ?grace, "shutdown grace elapsed; abandoning feedback jobs");
        false
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::Utc;
  use serde_json::json;
  use std::collections::VecDeque;
  use std::sync::Mutex;

  enum Step {
    Reply(&'static str),
    Fail,
    Deadline,
    Hang,
  }

  #[derive(Clone, Default)]
  struct ScriptedClient {
    steps: Arc<Mutex<VecDeque<Step>>>,
    calls: Arc<Mutex<Vec<Instant>>>,
  }

  impl ScriptedClient {
    fn new(steps: Vec<Step>) -> Self {
      Self { steps: Arc::new(Mutex::new(steps.into())), calls: Arc::default() }
    }

    fn calls(&self) -> Vec<Instant> {
      self.calls.lock().unwrap().clone()
    }
  }

  impl CompletionClient for ScriptedClient {
    async fn generate(&self, _prompt: &str, _deadline: Instant) -> Result<String, AiError> {
      self.calls.lock().unwrap().push(Instant::now());
      let step = self.steps.lock().unwrap().pop_front().unwrap_or(Step::Reply("Bra jobbat."));
      match step {
        Step::Reply(text) => Ok(text.to_string()),
        Step::Fail => Err(AiError::Http { status: 503, message: "overloaded".into() }),
        Step::Deadline => Err(AiError::DeadlineExceeded),
        Step::Hang => std::future::pending().await,
      }
    }
  }

  #[derive(Clone, Default)]
  struct FakeStore {
    scenario: Option<Uuid>,
    questions: HashMap<Uuid, ExerciseQuestion>,
    lookups: Arc<Mutex<usize>>,
    writes: Arc<Mutex<Vec<(Uuid, FeedbackMap)>>>,
  }

  impl FakeStore {
    fn with_questions(questions: Vec<ExerciseQuestion>) -> Self {
      Self {
        scenario: Some(Uuid::new_v4()),
        questions: questions.into_iter().map(|q| (q.id, q)).collect(),
        ..Default::default()
      }
    }

    fn writes(&self) -> Vec<(Uuid, FeedbackMap)> {
      self.writes.lock().unwrap().clone()
    }

    fn lookups(&self) -> usize {
      *self.lookups.lock().unwrap()
    }
  }

  impl FeedbackStore for FakeStore {
    async fn scenario_for_session(&self, _session_id: Uuid) -> Result<Uuid, DataError> {
      *self.lookups.lock().unwrap() += 1;
      self.scenario.ok_or(DataError::RecordNotFound)
    }

    async fn questions_for_scenario(&self, _scenario_id: Uuid) -> Result<HashMap<Uuid, ExerciseQuestion>, DataError> {
      *self.lookups.lock().unwrap() += 1;
      Ok(self.questions.clone())
    }

    async fn store_feedback(&self, response_id: Uuid, feedback: &FeedbackMap) -> Result<(), DataError> {
      self.writes.lock().unwrap().push((response_id, feedback.clone()));
      Ok(())
    }
  }

  fn question(kind: QuestionType, guidance: Option<&str>) -> ExerciseQuestion {
    ExerciseQuestion {
      id: Uuid::new_v4(),
      exercise_id: Uuid::new_v4(),
      kind,
      question: "Vem står bakom källan?".into(),
      options: Vec::new(),
      prompt_guidance: guidance.map(str::to_string),
      created_at: Utc::now(),
      updated_at: Utc::now(),
    }
  }

  fn job(answers: Value) -> FeedbackJob {
    let Value::Object(raw_answers) = answers else { panic!("answers must be an object") };
    FeedbackJob { response_id: Uuid::new_v4(), session_id: Uuid::new_v4(), raw_answers }
  }

  fn pipeline(store: &FakeStore, client: Option<ScriptedClient>) -> FeedbackPipeline<FakeStore, ScriptedClient> {
    FeedbackPipeline::new(store.clone(), client, Prompts::default(), RetryPolicy::default())
  }

  #[tokio::test(start_paused = true)]
  async fn only_known_free_text_answers_get_feedback() {
    let free = question(QuestionType::FreeText, None);
    let tf = question(QuestionType::TrueFalse, None);
    let mc = question(QuestionType::MultipleChoice, None);
    let store = FakeStore::with_questions(vec![free.clone(), tf.clone(), mc.clone()]);
    let client = ScriptedClient::new(vec![Step::Reply("Tydligt resonemang.")]);
    let stranger = Uuid::new_v4().to_string();

    let j = job(json!({
      free.id.to_string(): "Avsändaren är en myndighet.",
      tf.id.to_string(): true,
      mc.id.to_string(): Uuid::new_v4().to_string(),
      stranger: "okänd fråga",
      "not-a-uuid": "x",
    }));
    let outcome = pipeline(&store, Some(client.clone())).generate_and_store(&j).await.unwrap();

    assert_eq!(outcome, FeedbackOutcome::Stored(1));
    let writes = store.writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].0, j.response_id);
    assert_eq!(writes[0].1, FeedbackMap::from([(free.id.to_string(), "Tydligt resonemang.".to_string())]));
    assert_eq!(client.calls().len(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn no_free_text_answers_means_no_write() {
    let tf = question(QuestionType::TrueFalse, None);
    let free = question(QuestionType::FreeText, None);
    let store = FakeStore::with_questions(vec![tf.clone(), free.clone()]);
    let client = ScriptedClient::new(vec![]);

    let j = job(json!({ tf.id.to_string(): false, free.id.to_string(): 42 }));
    let outcome = pipeline(&store, Some(client.clone())).generate_and_store(&j).await.unwrap();

    assert_eq!(outcome, FeedbackOutcome::NothingToGrade);
    assert!(store.writes().is_empty());
    assert!(client.calls().is_empty());
  }

  #[tokio::test(start_paused = true)]
  async fn disabled_ai_touches_nothing() {
    let free = question(QuestionType::FreeText, None);
    let store = FakeStore::with_questions(vec![free.clone()]);

    let j = job(json!({ free.id.to_string(): "svar" }));
    let outcome = pipeline(&store, None).generate_and_store(&j).await.unwrap();

    assert_eq!(outcome, FeedbackOutcome::AiDisabled);
    assert_eq!(store.lookups(), 0);
    assert!(store.writes().is_empty());
  }

  #[tokio::test(start_paused = true)]
  async fn unresolvable_session_aborts_without_write() {
    let store = FakeStore::default();
    let any_question = Uuid::new_v4().to_string();
    let j = job(json!({ any_question: "svar" }));
    let err = pipeline(&store, Some(ScriptedClient::new(vec![]))).generate_and_store(&j).await.unwrap_err();

    assert!(matches!(err, FeedbackError::SessionLookup(DataError::RecordNotFound)));
    assert!(store.writes().is_empty());
  }

  #[tokio::test(start_paused = true)]
  async fn deadline_exceeded_is_not_retried() {
    let client = ScriptedClient::new(vec![Step::Deadline, Step::Reply("never")]);
    let text = complete_with_retry(&client, "p", &RetryPolicy::default()).await;

    assert_eq!(text, FEEDBACK_FAILED);
    assert_eq!(client.calls().len(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn transient_failure_is_retried_after_backoff() {
    let policy = RetryPolicy::default();
    let client = ScriptedClient::new(vec![Step::Fail, Step::Reply("Andra försöket.")]);
    let text = complete_with_retry(&client, "p", &policy).await;

    assert_eq!(text, "Andra försöket.");
    let calls = client.calls();
    assert_eq!(calls.len(), 2);
    let gap = calls[1] - calls[0];
    assert!(gap >= Duration::from_secs(2));
    assert!(gap < policy.deadline);
  }

  #[tokio::test(start_paused = true)]
  async fn exhausted_attempts_record_failure_sentinel() {
    let client = ScriptedClient::new(vec![Step::Fail, Step::Fail, Step::Reply("too late")]);
    let text = complete_with_retry(&client, "p", &RetryPolicy::default()).await;

    assert_eq!(text, FEEDBACK_FAILED);
    assert_eq!(client.calls().len(), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn hung_call_is_cut_at_the_shared_deadline() {
    let policy = RetryPolicy::default();
    let client = ScriptedClient::new(vec![Step::Hang]);
    let started = Instant::now();
    let text = complete_with_retry(&client, "p", &policy).await;

    assert_eq!(text, FEEDBACK_FAILED);
    assert_eq!(client.calls().len(), 1);
    assert_eq!(started.elapsed(), policy.deadline);
  }

  #[tokio::test(start_paused = true)]
  async fn backoff_wait_is_bounded_by_deadline() {
    let policy = RetryPolicy { max_attempts: 2, deadline: Duration::from_secs(1), backoff_step: Duration::from_secs(2) };
    let client = ScriptedClient::new(vec![Step::Fail, Step::Reply("unreachable")]);
    let started = Instant::now();
    let text = complete_with_retry(&client, "p", &policy).await;

    assert_eq!(text, FEEDBACK_FAILED);
    assert_eq!(client.calls().len(), 1);
    assert_eq!(started.elapsed(), policy.deadline);
  }

  #[tokio::test(start_paused = true)]
  async fn blank_completion_records_no_feedback_sentinel() {
    let client = ScriptedClient::new(vec![Step::Reply("  \n")]);
    assert_eq!(complete_with_retry(&client, "p", &RetryPolicy::default()).await, NO_FEEDBACK);
  }

  #[test]
  fn prompt_mentions_guidance_only_when_present() {
    let prompts = Prompts::default();
    let with = build_prompt(&prompts, "Är källan trovärdig?", Some("Nämn avsändaren"), "Ja");
    assert!(with.contains("\"Är källan trovärdig?\""));
    assert!(with.contains("Consider the following guidance when evaluating the answer: \"Nämn avsändaren\""));
    assert!(with.contains("The student's answer was: \"Ja\""));
    assert!(with.ends_with("in Swedish"));

    let without = build_prompt(&prompts, "Q", Some(""), "A");
    assert!(!without.contains("guidance"));
  }

  #[test]
  fn retry_policy_never_drops_below_one_attempt() {
    let p = RetryPolicy::from(&RetrySettings { max_attempts: 0, deadline_secs: 5, backoff_step_secs: 1 });
    assert_eq!(p.max_attempts, 1);
    assert_eq!(p.deadline, Duration::from_secs(5));
  }

  #[test]
  fn retry_policy_clamps_oversized_durations() {
    let p = RetryPolicy::from(&RetrySettings { max_attempts: 3, deadline_secs: u64::MAX, backoff_step_secs: u64::MAX });
    assert_eq!(p.deadline, MAX_DEADLINE);
    assert_eq!(p.backoff_step, MAX_DEADLINE);
  }

  #[tokio::test(start_paused = true)]
  async fn unbounded_policy_still_ends_at_max_deadline() {
    let policy = RetryPolicy { max_attempts: u32::MAX, deadline: Duration::MAX, backoff_step: Duration::MAX };
    let client = ScriptedClient::new(vec![Step::Fail, Step::Fail]);
    let started = Instant::now();
    let text = complete_with_retry(&client, "p", &policy).await;

    assert_eq!(text, FEEDBACK_FAILED);
    assert_eq!(client.calls().len(), 1);
    assert_eq!(started.elapsed(), MAX_DEADLINE);
  }

  #[tokio::test(start_paused = true)]
  async fn service_drains_dispatched_jobs() {
    let free = question(QuestionType::FreeText, None);
    let store = FakeStore::with_questions(vec![free.clone()]);
    let service = FeedbackService::new(pipeline(&store, Some(ScriptedClient::new(vec![Step::Fail]))));

    service.dispatch(job(json!({ free.id.to_string(): "svar" })));
    assert!(service.drain(Duration::from_secs(30)).await);
    assert_eq!(service.in_flight(), 0);
    assert_eq!(store.writes()[0].1[&free.id.to_string()], "Bra jobbat.");
  }

  #[tokio::test(start_paused = true)]
  async fn drain_gives_up_after_grace() {
    let free = question(QuestionType::FreeText, None);
    let store = FakeStore::with_questions(vec![free.clone()]);
    let service = FeedbackService::new(pipeline(&store, Some(ScriptedClient::new(vec![Step::Hang]))));

    service.dispatch(job(json!({ free.id.to_string(): "svar" })));
    assert!(!service.drain(Duration::from_secs(1)).await);
    assert_eq!(service.in_flight(), 1);
    assert!(store.writes().is_empty());
  }
}
