//! Per-query orchestration: assemble, then fine-tune export, batch export, or live scoring.
//!
//! Usage:
//! ```bash
//! ambibench run --construction-type subject_location --format arrow --queries 20
//! ```

use std::path::PathBuf;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, trace};

use crate::config::{RunConfig, RunMode};
use crate::draws::DrawSource;
use crate::format::{
    cumulative_batch, finetuning_pair, format_prompt, with_clarifying_assertion, PromptCompletion,
};
use crate::gateway::{BatchRequestRecord, CompletionRequest, LogprobGateway, ProviderError, BATCH_DEFAULT_MODEL};
use crate::lexicon::{Lexicon, LexiconError};
use crate::persist::{append_csv_rows, prompt_hash, JsonlWriter, PersistError, SolutionRow};
use crate::prompt::{Prompt, PromptError};
use crate::scoring::{join_results, label_rows, ResultRow, ScoreAccumulator};

// =============================================================================
// Types
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("prompt assembly failed: {0}")]
    Prompt(#[from] PromptError),
    #[error("scoring call failed: {0}")]
    Provider(#[from] ProviderError),
    #[error("persistence failed: {0}")]
    Persist(#[from] PersistError),
    #[error("lexicon error: {0}")]
    Lexicon(#[from] LexiconError),
    #[error("live mode needs a gateway")]
    MissingGateway,
}

/// Where each mode appends its output. Unset paths are not written.
#[derive(Debug, Clone, Default)]
pub struct OutputPaths {
    pub finetuning_jsonl: Option<PathBuf>,
    pub batch_requests_jsonl: Option<PathBuf>,
    pub batch_solutions_csv: Option<PathBuf>,
    pub results_csv: Option<PathBuf>,
}

/// Everything one run produced, in query order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineOutput {
    pub prompts: Vec<Prompt>,
    pub finetuning_pairs: Vec<PromptCompletion>,
    pub batch_requests: Vec<BatchRequestRecord>,
    pub solutions: Vec<SolutionRow>,
    pub rows: Vec<ResultRow>,
}

pub struct QueryPipeline<'a> {
    config: RunConfig,
    lexicon: &'a Lexicon,
    outputs: OutputPaths,
    batch_model: String,
}

impl QueryPipeline<'static> {
    pub fn new(config: RunConfig) -> Self {
        Self {
            config,
            lexicon: Lexicon::builtin(),
            outputs: OutputPaths::default(),
            batch_model: BATCH_DEFAULT_MODEL.to_string(),
        }
    }
}

impl<'a> QueryPipeline<'a> {
    pub fn with_lexicon<'b>(self, lexicon: &'b Lexicon) -> QueryPipeline<'b> {
        QueryPipeline {
            config: self.config,
            lexicon,
            outputs: self.outputs,
            batch_model: self.batch_model,
        }
    }

    pub fn outputs(mut self, outputs: OutputPaths) -> Self {
        self.outputs = outputs;
        self
    }

    pub fn batch_model(mut self, model: impl Into<String>) -> Self {
        self.batch_model = model.into();
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Run `config.queries` prompts.
    ///
    /// Rows are appended to the configured files as each prompt completes, so
    /// a failing call leaves earlier output and the accumulator untouched.
    pub async fn run<D: DrawSource + ?Sized>(
        &self,
        draws: &mut D,
        gateway: Option<&dyn LogprobGateway>,
        accumulator: &mut ScoreAccumulator,
    ) -> Result<PipelineOutput, PipelineError> {
        self.config.validate().map_err(PromptError::from)?;
        if self.config.mode == RunMode::Live && gateway.is_none() {
            return Err(PipelineError::MissingGateway);
        }

        let start = Instant::now();
        let mut output = PipelineOutput::default();
        let mut finetuning_sink = match &self.outputs.finetuning_jsonl {
            Some(path) if self.config.mode == RunMode::Finetuning => Some(JsonlWriter::open(path)?),
            _ => None,
        };
        let mut batch_sink = match &self.outputs.batch_requests_jsonl {
            Some(path) if self.config.mode == RunMode::BatchExport => Some(JsonlWriter::open(path)?),
            _ => None,
        };

        for query in 0..self.config.queries {
            let prompt = Prompt::assemble_with_lexicon(&self.config, self.lexicon, draws)?;
            debug!(
                query,
                examples = prompt.examples.len(),
                salient_task = ?prompt.salient_task(),
                "prompt ready"
            );
            trace!(preview = %prompt.render_preview());

            match self.config.mode {
                RunMode::Finetuning => {
                    let mut pair = finetuning_pair(&prompt, self.config.needs_instruction);
                    pair.prompt = self.framed(pair.prompt);
                    if let Some(sink) = finetuning_sink.as_mut() {
                        sink.append(&pair)?;
                    }
                    output.finetuning_pairs.push(pair);
                }
                RunMode::BatchExport => {
                    self.export_batch(&prompt, batch_sink.as_mut(), &mut output)?;
                }
                RunMode::Live => {
                    if query > 0 && !self.config.inter_call_delay.is_zero() {
                        tokio::time::sleep(self.config.inter_call_delay).await;
                    }
                    let gateway = gateway.ok_or(PipelineError::MissingGateway)?;
                    let rows = self.score(&prompt, gateway, accumulator).await?;
                    if let Some(path) = &self.outputs.results_csv {
                        append_csv_rows(path, &rows)?;
                    }
                    output.rows.extend(rows);
                }
            }
            output.prompts.push(prompt);
        }

        if let Some(sink) = finetuning_sink.as_mut() {
            sink.flush()?;
        }
        if let Some(sink) = batch_sink.as_mut() {
            sink.flush()?;
        }

        info!(
            construction_type = %self.config.construction_type,
            format = %self.config.format,
            mode = ?self.config.mode,
            queries = self.config.queries,
            rows = output.rows.len(),
            mean_accuracy = ?accumulator.mean_accuracy(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "batch complete"
        );
        Ok(output)
    }

    fn framed(&self, text: String) -> String {
        with_clarifying_assertion(text, self.config.clarifying_assertion)
    }

    fn export_batch(
        &self,
        prompt: &Prompt,
        sink: Option<&mut JsonlWriter>,
        output: &mut PipelineOutput,
    ) -> Result<(), PipelineError> {
        let mut batch = cumulative_batch(prompt, self.config.needs_instruction);
        batch.prompts = batch.prompts.into_iter().map(|p| self.framed(p)).collect();
        let requests: Vec<BatchRequestRecord> = batch
            .prompts
            .iter()
            .map(|p| BatchRequestRecord::for_prompt(&self.batch_model, p.as_str(), prompt.format_type))
            .collect();
        let solutions: Vec<SolutionRow> = batch
            .prompts
            .iter()
            .zip(batch.solutions)
            .enumerate()
            .map(|(index, (p, solution))| SolutionRow {
                index,
                solution,
                prompt_hash: prompt_hash(p),
            })
            .collect();

        if let Some(sink) = sink {
            for request in &requests {
                sink.append(request)?;
            }
        }
        if let Some(path) = &self.outputs.batch_solutions_csv {
            append_csv_rows(path, &solutions)?;
        }

        output.batch_requests.extend(requests);
        output.solutions.extend(solutions);
        Ok(())
    }

    async fn score(
        &self,
        prompt: &Prompt,
        gateway: &dyn LogprobGateway,
        accumulator: &mut ScoreAccumulator,
    ) -> Result<Vec<ResultRow>, PipelineError> {
        let text = self.framed(format_prompt(prompt, self.config.needs_instruction));
        let request = CompletionRequest::scoring(&self.config.model, text);
        let response = gateway.score_prompt(&request).await?;

        let scored = label_rows(&response.tokens, self.config.needs_instruction, accumulator);
        if scored.len() != prompt.examples.len() {
            debug!(
                labels = scored.len(),
                examples = prompt.examples.len(),
                "label rows do not match examples; joining the overlap"
            );
        }
        Ok(join_results(&prompt.examples, &scored))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;
    use crate::config::ConfigError;
    use crate::instruction::CLARIFYING_ASSERTION;
    use crate::construction::{ConstructionType, FormatType};
    use crate::gateway::{CompletionResponse, TokenAlternative, TokenLogprob};

    /// Echoes a label token for every example line, always favouring `X`.
    struct EchoGateway {
        calls: AtomicUsize,
        fail_on: Option<usize>,
    }

    impl EchoGateway {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_on: None,
            }
        }
    }

    #[async_trait]
    impl LogprobGateway for EchoGateway {
        async fn score_prompt(
            &self,
            req: &CompletionRequest,
        ) -> Result<CompletionResponse, ProviderError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_on == Some(call) {
                return Err(ProviderError::provider("echo", "boom"));
            }
            let tokens = req
                .prompt
                .lines()
                .filter_map(|line| line.strip_prefix('>'))
                .map(|label| TokenLogprob {
                    token: label.to_string(),
                    logprob: -0.1,
                    top_alternatives: vec![
                        TokenAlternative {
                            token: "X".into(),
                            logprob: -0.1,
                        },
                        TokenAlternative {
                            token: "Y".into(),
                            logprob: -2.5,
                        },
                    ],
                })
                .collect();
            Ok(CompletionResponse {
                tokens,
                model: Some(req.model.clone()),
                latency: Duration::from_millis(1),
            })
        }
    }

    fn live_config() -> RunConfig {
        RunConfig::new(ConstructionType::SubjectLocation, FormatType::Arrow)
            .ambiguous_examples(true)
            .shots(2)
            .queries(3)
    }

    #[tokio::test]
    async fn live_rows_join_examples() {
        let pipeline = QueryPipeline::new(live_config());
        let gateway = EchoGateway::new();
        let mut acc = ScoreAccumulator::new();
        let mut rng = StdRng::seed_from_u64(1);

        let out = pipeline.run(&mut rng, Some(&gateway), &mut acc).await.unwrap();
        assert_eq!(out.prompts.len(), 3);
        assert_eq!(out.rows.len(), 12);
        assert_eq!(acc.len(), 12);
        for row in &out.rows {
            assert_eq!(row.accurate, row.active_task_label);
        }
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn failure_keeps_accumulator_and_written_rows() {
        let dir = tempfile::tempdir().unwrap();
        let csv = dir.path().join("results.csv");
        let pipeline = QueryPipeline::new(live_config()).outputs(OutputPaths {
            results_csv: Some(csv.clone()),
            ..OutputPaths::default()
        });
        let gateway = EchoGateway {
            calls: AtomicUsize::new(0),
            fail_on: Some(1),
        };
        let mut acc = ScoreAccumulator::new();
        let mut rng = StdRng::seed_from_u64(2);

        let err = pipeline.run(&mut rng, Some(&gateway), &mut acc).await.unwrap_err();
        assert!(matches!(err, PipelineError::Provider(_)));
        assert_eq!(acc.len(), 4);
        let text = std::fs::read_to_string(&csv).unwrap();
        assert_eq!(text.lines().count(), 5);
    }

    #[tokio::test]
    async fn live_without_gateway_is_an_error() {
        let pipeline = QueryPipeline::new(live_config());
        let mut acc = ScoreAccumulator::new();
        let mut rng = StdRng::seed_from_u64(3);
        assert!(matches!(
            pipeline.run(&mut rng, None, &mut acc).await,
            Err(PipelineError::MissingGateway)
        ));
    }

    #[tokio::test]
    async fn finetuning_mode_writes_pairs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ft").join("pairs.jsonl");
        let config = RunConfig::new(ConstructionType::PropnNegation, FormatType::Qa)
            .salient_task("propn")
            .shots(4)
            .queries(5)
            .finetuning(false)
            .mode(RunMode::Finetuning);
        let pipeline = QueryPipeline::new(config).outputs(OutputPaths {
            finetuning_jsonl: Some(path.clone()),
            ..OutputPaths::default()
        });
        let mut acc = ScoreAccumulator::new();
        let mut rng = StdRng::seed_from_u64(4);

        let out = pipeline.run(&mut rng, None, &mut acc).await.unwrap();
        assert_eq!(out.finetuning_pairs.len(), 5);
        assert!(out
            .finetuning_pairs
            .iter()
            .all(|p| p.completion == " X" || p.completion == " Y"));
        assert!(acc.is_empty());

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 5);
        let first: PromptCompletion = serde_json::from_str(text.lines().next().unwrap()).unwrap();
        assert!(first.prompt.ends_with("\nA:"));
    }

    #[tokio::test]
    async fn finetuning_flag_alone_never_queries() {
        let config = RunConfig::new(ConstructionType::SubjectLocation, FormatType::Arrow)
            .ambiguous_examples(true)
            .finetuning(false);
        let gateway = EchoGateway::new();
        let mut acc = ScoreAccumulator::new();
        let mut rng = StdRng::seed_from_u64(8);

        let out = QueryPipeline::new(config.clone())
            .run(&mut rng, Some(&gateway), &mut acc)
            .await
            .unwrap();
        assert_eq!(out.finetuning_pairs.len(), 1);
        assert!(matches!(out.finetuning_pairs[0].completion.as_str(), "X" | "Y"));
        assert!(out.rows.is_empty());
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 0);

        let forced_live = QueryPipeline::new(config.mode(RunMode::Live))
            .run(&mut rng, Some(&gateway), &mut acc)
            .await;
        assert!(matches!(
            forced_live,
            Err(PipelineError::Prompt(PromptError::Config(
                ConfigError::FinetuningMode(RunMode::Live)
            )))
        ));
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn clarifying_assertion_leads_every_output() {
        let mut acc = ScoreAccumulator::new();
        let mut rng = StdRng::seed_from_u64(12);

        let ft = RunConfig::new(ConstructionType::SubjectLocation, FormatType::Arrow)
            .ambiguous_examples(true)
            .clarifying_assertion(true)
            .finetuning(false);
        let out = QueryPipeline::new(ft).run(&mut rng, None, &mut acc).await.unwrap();
        assert!(out.finetuning_pairs[0].prompt.starts_with(CLARIFYING_ASSERTION));

        let export = RunConfig::new(ConstructionType::SubjectLocation, FormatType::Arrow)
            .ambiguous_examples(true)
            .clarifying_assertion(true)
            .mode(RunMode::BatchExport);
        let out = QueryPipeline::new(export).run(&mut rng, None, &mut acc).await.unwrap();
        assert!(out
            .batch_requests
            .iter()
            .all(|r| r.prompt.starts_with(CLARIFYING_ASSERTION)));

        // The preamble carries no label rows, so scoring is unchanged.
        let gateway = EchoGateway::new();
        let out = QueryPipeline::new(live_config().clarifying_assertion(true))
            .run(&mut rng, Some(&gateway), &mut acc)
            .await
            .unwrap();
        assert_eq!(out.rows.len(), 12);
    }

    #[tokio::test]
    async fn batch_export_is_cumulative() {
        let dir = tempfile::tempdir().unwrap();
        let requests = dir.path().join("batch.jsonl");
        let solutions = dir.path().join("solutions.csv");
        let config = RunConfig::new(ConstructionType::ReligiousPronoun, FormatType::Arrow)
            .salient_task("pronoun")
            .shots(3)
            .queries(2)
            .instruction(true)
            .mode(RunMode::BatchExport);
        let pipeline = QueryPipeline::new(config).outputs(OutputPaths {
            batch_requests_jsonl: Some(requests.clone()),
            batch_solutions_csv: Some(solutions.clone()),
            ..OutputPaths::default()
        });
        let mut acc = ScoreAccumulator::new();
        let mut rng = StdRng::seed_from_u64(5);

        let out = pipeline.run(&mut rng, None, &mut acc).await.unwrap();
        assert_eq!(out.batch_requests.len(), 6);
        assert!(out.batch_requests.iter().all(|r| r.max_tokens == 1 && r.model == "t0pp"));
        assert!(out.batch_requests[0].prompt.starts_with("Output 'X'"));
        assert!(out.batch_requests[1].prompt.len() > out.batch_requests[0].prompt.len());

        assert_eq!(std::fs::read_to_string(&requests).unwrap().lines().count(), 6);
        assert_eq!(std::fs::read_to_string(&solutions).unwrap().lines().count(), 7);
    }
}
