use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use pipewright_engine::{
    BackendError, ContentGenerator, DocumentSource, DollarBraceTemplates, EngineConfig, FunctionError, FunctionRegistry, ImageContent,
    Libraries, LlmPromptContent, ObjectSchema, PageContent, PipeRunError, PipelineContext, RecordingTracker, RunFailureCategory,
    StuffContent, TrackerEvent, WorkingMemory, dry_run_all, dry_run_pipe, execute_pipeline,
};
use pipewright_types::{BundleBlueprint, ValidationReactionConfig};
use serde_json::{Value, json};

fn load_fixture() -> Libraries {
    let bundle: BundleBlueprint = serde_yaml::from_str(include_str!("data/review_bundle.yaml")).expect("parse review bundle");
    let mut libraries = Libraries::new();
    libraries
        .load_bundle(&bundle, &DollarBraceTemplates, &ValidationReactionConfig::default())
        .expect("load review bundle");
    libraries
}

fn inputs(libraries: &Libraries, value: Value) -> WorkingMemory {
    WorkingMemory::from_json_inputs(libraries.concepts(), Some("review"), &value).expect("valid inputs")
}

/// Answers every call and counts them. Text answers are delayed by `delay_for`.
#[derive(Debug, Default)]
struct ScriptedGenerator {
    calls: AtomicUsize,
    slow_reviews: Vec<(&'static str, u64)>,
}

impl ScriptedGenerator {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn delay_for(&self, text: &str) -> Duration {
        let millis = self
            .slow_reviews
            .iter()
            .find(|(review, _)| text.contains(review))
            .map(|(_, millis)| *millis)
            .unwrap_or(0);
        Duration::from_millis(millis)
    }
}

#[async_trait]
impl ContentGenerator for ScriptedGenerator {
    async fn generate_text(&self, prompt: &LlmPromptContent) -> Result<String, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let user_text = prompt.user_text.clone().unwrap_or_default();
        tokio::time::sleep(self.delay_for(&user_text)).await;
        Ok(format!("summary of {user_text}"))
    }

    async fn generate_object(&self, _prompt: &LlmPromptContent, _schema: &ObjectSchema) -> Result<Value, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(json!({ "label": "positive", "score": 0.9 }))
    }

    async fn generate_objects(
        &self,
        prompt: &LlmPromptContent,
        schema: &ObjectSchema,
        _count: Option<usize>,
    ) -> Result<Vec<Value>, BackendError> {
        Ok(vec![self.generate_object(prompt, schema).await?])
    }

    async fn generate_images(&self, _prompt: &str, _count: usize) -> Result<Vec<ImageContent>, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Vec::new())
    }

    async fn extract_pages(&self, _document: &DocumentSource, _page_views: bool) -> Result<Vec<PageContent>, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Vec::new())
    }
}

fn text_of(content: &StuffContent) -> String {
    content.render_text()
}

#[tokio::test]
async fn batch_keeps_input_order_when_items_finish_out_of_order() {
    let libraries = load_fixture();
    let memory = inputs(
        &libraries,
        json!({ "reviews": { "concept": "Review[]", "content": ["first", "second", "third"] } }),
    );
    let backend = Arc::new(ScriptedGenerator {
        slow_reviews: vec![("first", 80), ("third", 30)],
        ..ScriptedGenerator::default()
    });
    let ctx = Arc::new(PipelineContext::new(libraries).with_backend(backend.clone()));

    let output = execute_pipeline(ctx, "summarize_all", memory).await.expect("batch run");
    let StuffContent::List { items } = &output.main_stuff().expect("main stuff").content else {
        panic!("batch output should be a list");
    };
    let texts: Vec<String> = items.iter().map(text_of).collect();
    assert_eq!(
        texts,
        vec!["summary of Summarize: first", "summary of Summarize: second", "summary of Summarize: third"]
    );
    assert_eq!(backend.calls(), 3);
}

#[tokio::test]
async fn batch_step_inside_a_sequence_stores_the_list_under_its_result_name() {
    let libraries = load_fixture();
    let memory = inputs(&libraries, json!({ "reviews": { "concept": "Review[]", "content": ["a", "b"] } }));
    let ctx = Arc::new(PipelineContext::new(libraries).with_backend(Arc::new(ScriptedGenerator::default())));

    let output = execute_pipeline(ctx, "summarize_each", memory).await.expect("sequence run");
    assert_eq!(output.main_stuff_name(), Some("summaries"));
    let summaries = output.working_memory.get_list("summaries").expect("summaries list");
    assert_eq!(summaries.len(), 2);
}

#[tokio::test]
async fn dry_runs_never_reach_the_backend() {
    let libraries = load_fixture();
    let backend = Arc::new(ScriptedGenerator::default());
    let ctx = Arc::new(PipelineContext::new(libraries).with_backend(backend.clone()));

    let output = dry_run_pipe(ctx.clone(), "full_flow").await.expect("dry run of full_flow");
    assert!(output.main_stuff().is_ok(), "dry run should produce a main stuff");

    let report = dry_run_all(ctx).await;
    assert!(report.is_success(), "dry run failures: {:?}", report.failures);
    assert_eq!(backend.calls(), 0, "dry runs must not call the content generator");
}

#[tokio::test]
async fn sequence_exposes_every_step_result() {
    let libraries = load_fixture();
    let memory = inputs(&libraries, json!({ "review": { "concept": "Review", "content": "great product" } }));
    let ctx = Arc::new(PipelineContext::new(libraries).with_backend(Arc::new(ScriptedGenerator::default())));

    let output = execute_pipeline(ctx, "full_flow", memory).await.expect("sequence run");
    assert_eq!(output.main_stuff_name(), Some("reply"));
    assert_eq!(text_of(&output.main_stuff().expect("main").content), "Thanks for: great product");
    let sentiment = output.working_memory.get_structured("sentiment").expect("sentiment record");
    assert_eq!(sentiment.get("label"), Some(&json!("positive")));
}

#[tokio::test]
async fn parallel_combines_branch_outputs_into_one_record() {
    let libraries = load_fixture();
    let memory = inputs(&libraries, json!({ "review": { "concept": "Review", "content": "late delivery" } }));
    let ctx = Arc::new(PipelineContext::new(libraries));

    let output = execute_pipeline(ctx, "triage_parallel", memory).await.expect("parallel run");
    let triage = output.working_memory.get_structured("main").expect("combined record");
    assert_eq!(triage.get("reply"), Some(&json!("Thanks for: late delivery")));
    assert_eq!(triage.get("tag"), Some(&json!("Tag: late delivery")));
}

#[tokio::test]
async fn parallel_fails_when_one_branch_fails() {
    let libraries = load_fixture();
    let memory = inputs(&libraries, json!({ "review": { "concept": "Review", "content": "meh" } }));
    let functions = FunctionRegistry::new().with_function("explode", |_memory: &WorkingMemory| {
        Err(FunctionError {
            message: "boom".to_string(),
        })
    });
    let ctx = Arc::new(PipelineContext::new(libraries).with_functions(functions));

    let error = execute_pipeline(ctx, "race", memory).await.expect_err("race should fail");
    assert!(
        matches!(error.root_cause(), PipeRunError::Function { function_name, .. } if function_name == "explode"),
        "unexpected error: {error}"
    );
    assert_eq!(error.category(), RunFailureCategory::Backend);
}

#[tokio::test]
async fn condition_routes_continues_and_records_events() {
    let libraries = load_fixture();
    let tracker = Arc::new(RecordingTracker::new());
    let ctx = Arc::new(PipelineContext::new(libraries.clone()).with_tracker(tracker.clone()));

    let happy = inputs(&libraries, json!({ "mood": "happy", "review": { "concept": "Review", "content": "love it" } }));
    let output = execute_pipeline(ctx.clone(), "route_by_mood", happy).await.expect("happy route");
    assert_eq!(text_of(&output.main_stuff().expect("main").content), "Thanks for: love it");

    let events = tracker.events();
    assert!(
        events.iter().any(|event| matches!(event, TrackerEvent::ChoiceStep { chosen, .. } if chosen == "draft_reply")),
        "events: {events:?}"
    );
    assert!(events.iter().any(|event| matches!(event, TrackerEvent::PipeStep { pipe_code, .. } if pipe_code == "draft_reply")));

    let neutral = inputs(&libraries, json!({ "mood": "neutral", "review": { "concept": "Review", "content": "fine" } }));
    let output = execute_pipeline(ctx, "route_by_mood", neutral).await.expect("continue route");
    assert_eq!(output.main_stuff_name(), None, "continue leaves the memory untouched");
    assert!(output.working_memory.contains("review"));
}

#[tokio::test]
async fn condition_fail_outcome_raises() {
    let libraries = load_fixture();
    let memory = inputs(&libraries, json!({ "mood": "unknown" }));
    let ctx = Arc::new(PipelineContext::new(libraries));

    let error = execute_pipeline(ctx, "loop_check", memory).await.expect_err("fail outcome");
    assert!(
        matches!(error.root_cause(), PipeRunError::ConditionFailed { evaluated, .. } if evaluated == "unknown"),
        "unexpected error: {error}"
    );
    assert_eq!(error.pipe_stack(), ["loop_check".to_string()]);
}

#[tokio::test]
async fn self_routing_condition_hits_the_stack_limit() {
    let libraries = load_fixture();
    let memory = inputs(&libraries, json!({ "mood": "again" }));
    let config = EngineConfig {
        max_stack_depth: 5,
        ..EngineConfig::default()
    };
    let ctx = Arc::new(PipelineContext::new(libraries).with_config(config));

    let error = execute_pipeline(ctx, "loop_check", memory).await.expect_err("runaway recursion");
    assert_eq!(error.category(), RunFailureCategory::StackDepth, "unexpected error: {error}");
    assert!(matches!(error.root_cause(), PipeRunError::StackOverflow { limit: 5, .. }));
}

#[tokio::test]
async fn missing_inputs_are_reported_together() {
    let libraries = load_fixture();
    let ctx = Arc::new(PipelineContext::new(libraries));

    let error = execute_pipeline(ctx, "route_by_mood", WorkingMemory::new()).await.expect_err("no inputs");
    let PipeRunError::MissingInputs(missing) = error.root_cause() else {
        panic!("expected missing inputs, got {error}");
    };
    assert_eq!(missing.missing_variables, vec!["mood".to_string(), "review".to_string()]);
}

#[tokio::test]
async fn input_concept_mismatch_is_rejected() {
    let libraries = load_fixture();
    let memory = inputs(&libraries, json!({ "review": 42 }));
    let ctx = Arc::new(PipelineContext::new(libraries));

    let error = execute_pipeline(ctx, "draft_reply", memory).await.expect_err("number is not a review");
    assert!(matches!(error.root_cause(), PipeRunError::InputConceptMismatch { .. }), "unexpected error: {error}");
}

#[tokio::test]
async fn runs_are_bounded_by_the_configured_timeout() {
    let libraries = load_fixture();
    let memory = inputs(&libraries, json!({ "review": { "concept": "Review", "content": "slow one" } }));
    let backend = Arc::new(ScriptedGenerator {
        slow_reviews: vec![("slow one", 30_000)],
        ..ScriptedGenerator::default()
    });
    let config = EngineConfig {
        run_timeout_secs: Some(1),
        ..EngineConfig::default()
    };
    let ctx = Arc::new(PipelineContext::new(libraries).with_backend(backend).with_config(config));

    let error = execute_pipeline(ctx, "summarize", memory).await.expect_err("timeout");
    assert_eq!(error.category(), RunFailureCategory::Timeout);
}

#[tokio::test]
async fn fixed_output_count_must_match_what_the_backend_returns() {
    let libraries = load_fixture();
    let memory = inputs(&libraries, json!({ "review": { "concept": "Review", "content": "so-so" } }));
    // ScriptedGenerator answers one object whatever count is asked for.
    let ctx = Arc::new(PipelineContext::new(libraries).with_backend(Arc::new(ScriptedGenerator::default())));

    let error = execute_pipeline(ctx.clone(), "three_moods", memory).await.expect_err("one object for nb_output 3");
    assert_eq!(error.category(), RunFailureCategory::Backend, "unexpected error: {error}");
    assert!(
        matches!(error.root_cause(), PipeRunError::Backend { pipe_code, source } if pipe_code == "three_moods" && source.to_string().contains("expected 3 results, got 1")),
        "unexpected error: {error}"
    );

    let output = dry_run_pipe(ctx, "three_moods").await.expect("dry run honours the count");
    let StuffContent::List { items } = &output.main_stuff().expect("main stuff").content else {
        panic!("nb_output should produce a list");
    };
    assert_eq!(items.len(), 3);
}

#[tokio::test]
async fn parallel_branch_with_batch_settings_runs_once_per_item() {
    let libraries = load_fixture();
    let memory = inputs(
        &libraries,
        json!({ "reviews": { "concept": "Review[]", "content": ["slow", "quick"] }, "mood": "calm" }),
    );
    let backend = Arc::new(ScriptedGenerator {
        slow_reviews: vec![("slow", 40)],
        ..ScriptedGenerator::default()
    });
    let ctx = Arc::new(PipelineContext::new(libraries).with_backend(backend.clone()));

    let output = execute_pipeline(ctx.clone(), "summaries_and_mood", memory).await.expect("parallel run");
    let texts: Vec<String> = output
        .working_memory
        .get_list("summaries")
        .expect("summaries list")
        .iter()
        .map(text_of)
        .collect();
    assert_eq!(texts, vec!["summary of Summarize: slow", "summary of Summarize: quick"]);
    assert_eq!(output.working_memory.get_text("mood_line").expect("mood line"), "Mood is calm");
    assert_eq!(backend.calls(), 2);

    let dry = dry_run_pipe(ctx, "summaries_and_mood").await.expect("dry run of batched branch");
    assert!(dry.working_memory.get_list("summaries").is_ok(), "dry run should store the batched list");
}

#[tokio::test]
async fn sequence_step_reads_a_name_written_by_a_parallel_step() {
    let libraries = load_fixture();
    let memory = inputs(&libraries, json!({ "review": { "concept": "Review", "content": "works well" } }));
    let ctx = Arc::new(PipelineContext::new(libraries));

    let output = execute_pipeline(ctx, "draft_then_polish", memory).await.expect("sequence run");
    assert_eq!(output.main_stuff_name(), Some("final"));
    assert_eq!(text_of(&output.main_stuff().expect("main").content), "Final: Thanks for: works well");
    assert_eq!(output.working_memory.get_text("tag").expect("tag"), "Tag: works well");
}

#[tokio::test]
async fn condition_aliases_the_evaluated_value() {
    let libraries = load_fixture();
    let memory = inputs(&libraries, json!({ "mood": "neutral", "review": { "concept": "Review", "content": "it is ok" } }));
    let ctx = Arc::new(PipelineContext::new(libraries));

    let output = execute_pipeline(ctx, "alias_mood", memory).await.expect("continue route");
    assert_eq!(output.working_memory.aliases().get("neutral").map(String::as_str), Some("review"));
    assert_eq!(output.working_memory.get_text("neutral").expect("aliased review"), "it is ok");
}
