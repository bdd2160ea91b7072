#![forbid(unsafe_code)]

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Local;
use clap::{Args, Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;

use ambibench::config::{RunConfig, RunMode};
use ambibench::construction::{ConstructionType, FormatType};
use ambibench::dataset::{Dataset, DatasetConfig};
use ambibench::format::{format_prompt, with_clarifying_assertion};
use ambibench::gateway::{CompletionsAdapter, LogprobGateway};
use ambibench::lexicon::Lexicon;
use ambibench::persist::{results_csv_path, timestamped_path, JsonlWriter};
use ambibench::pipeline::{OutputPaths, QueryPipeline};
use ambibench::prompt::Prompt;
use ambibench::report::{build_report, render_report_markdown};
use ambibench::scoring::{ResultRow, ScoreAccumulator};
use ambibench::suite::{run_suite, Suite, SuiteOptions};

#[derive(Parser)]
#[command(name = "ambibench", version, about = "Ambiguous few-shot prompt harness")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a prompt/completion dataset as JSON
    Generate {
        /// Salient tasks to generate for (subject, location, religious, pronoun, propn, negation)
        #[arg(long = "task", default_values_t = vec!["location".to_string()])]
        tasks: Vec<String>,
        #[arg(long, default_value = "qa")]
        format: FormatType,
        #[arg(long, default_value_t = 1)]
        shots: usize,
        #[arg(long, default_value_t = 10)]
        queries: usize,
        #[arg(long, default_value_t = 50)]
        prob_of_ambiguous: u32,
        #[arg(long)]
        needs_instruction: bool,
        #[arg(long)]
        needs_informative: bool,
        #[arg(long)]
        include_ambiguous_examples: bool,
        #[arg(long, default_value = "for_finetuning")]
        out_dir: PathBuf,
        /// Category data to use instead of the built-in lexicon
        #[arg(long)]
        lexicon: Option<PathBuf>,
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Assemble one prompt and print it
    Show {
        #[command(flatten)]
        run: RunArgs,
        /// Print the literal model input instead of the preview
        #[arg(long)]
        formatted: bool,
    },
    /// Assemble prompts and score, export, or build fine-tuning pairs
    Run {
        #[command(flatten)]
        run: RunArgs,
        /// Scored rows as JSON lines (live mode)
        #[arg(long)]
        out: Option<PathBuf>,
        /// Directory for mode-specific output files
        #[arg(long, default_value = ".")]
        output_root: PathBuf,
    },
    /// Run a predefined test matrix
    Suite {
        /// two_feature, two_set, finetuning_baseline or finetuned_set
        #[arg(long)]
        suite: Suite,
        #[command(flatten)]
        run: RunArgs,
        #[arg(long, default_value = ".")]
        output_root: PathBuf,
        #[arg(long, default_value_t = 60)]
        pause_secs: u64,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Summarise scored rows by salient task and format
    Report {
        /// JSON lines written by `run --out` or `suite --out`
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Args)]
struct RunArgs {
    /// JSON run config; flags below are ignored when set
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, default_value = "subject_location")]
    construction_type: ConstructionType,
    #[arg(long, default_value = "arrow")]
    format: FormatType,
    #[arg(long, default_value_t = 1)]
    shots: usize,
    #[arg(long, default_value_t = 1)]
    queries: usize,
    #[arg(long, default_value_t = 50)]
    prob_of_ambiguous: u32,
    #[arg(long)]
    needs_instruction: bool,
    #[arg(long)]
    needs_informative: bool,
    #[arg(long)]
    include_ambiguous_examples: bool,
    /// Lead each prompt with a request to ask a clarifying question
    #[arg(long)]
    clarifying_assertion: bool,
    #[arg(long)]
    for_finetuning: bool,
    #[arg(long)]
    finetuning_control: bool,
    #[arg(long)]
    salient_task: Option<String>,
    /// live, finetuning or batch_export. Defaults to finetuning with
    /// --for-finetuning, live otherwise
    #[arg(long, value_parser = parse_mode)]
    mode: Option<RunMode>,
    #[arg(long, default_value = "text-davinci-003")]
    model: String,
    /// Pause between live calls, in milliseconds
    #[arg(long, default_value_t = 0)]
    delay_ms: u64,
    #[arg(long)]
    seed: Option<u64>,
}

fn parse_mode(s: &str) -> Result<RunMode, String> {
    match s {
        "live" => Ok(RunMode::Live),
        "finetuning" => Ok(RunMode::Finetuning),
        "batch_export" | "batch-export" => Ok(RunMode::BatchExport),
        other => Err(format!("unknown mode: {other}")),
    }
}

impl RunArgs {
    fn to_config(&self) -> Result<RunConfig, Box<dyn std::error::Error>> {
        if let Some(path) = &self.config {
            return Ok(RunConfig::from_json_file(path)?);
        }
        let config = RunConfig {
            construction_type: self.construction_type,
            format: self.format,
            shots: self.shots,
            queries: self.queries,
            prob_of_ambiguous: self.prob_of_ambiguous,
            needs_instruction: self.needs_instruction,
            needs_informative: self.needs_informative,
            include_ambiguous_examples: self.include_ambiguous_examples,
            clarifying_assertion: self.clarifying_assertion,
            for_finetuning: self.for_finetuning,
            finetuning_control: self.finetuning_control,
            salient_task: self.salient_task.clone(),
            mode: self.mode.unwrap_or(if self.for_finetuning {
                RunMode::Finetuning
            } else {
                RunMode::Live
            }),
            model: self.model.clone(),
            inter_call_delay: Duration::from_millis(self.delay_ms),
            rng_seed: self.seed,
        };
        config.validate()?;
        Ok(config)
    }
}

fn rng_for(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

fn write_rows(path: &Path, rows: &[ResultRow]) -> Result<(), Box<dyn std::error::Error>> {
    let mut writer = JsonlWriter::open(path)?;
    for row in rows {
        writer.append(row)?;
    }
    writer.flush()?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Generate {
            tasks,
            format,
            shots,
            queries,
            prob_of_ambiguous,
            needs_instruction,
            needs_informative,
            include_ambiguous_examples,
            out_dir,
            lexicon,
            seed,
        } => {
            let config = DatasetConfig {
                construction_format: format,
                n_shots: shots,
                n_queries: queries,
                prob_of_ambiguous,
                needs_instruction,
                needs_informative,
                include_ambiguous_examples,
                construction_types: tasks,
            };
            let custom = match lexicon {
                Some(path) => Some(Lexicon::from_path(path)?),
                None => None,
            };
            let lexicon = custom.as_ref().unwrap_or_else(|| Lexicon::builtin());

            let mut dataset = Dataset::new(config, Local::now());
            dataset.generate(lexicon, &mut rng_for(seed))?;
            let path = dataset.save(&out_dir)?;
            println!("wrote {} examples to {}", dataset.examples.len(), path.display());
        }
        Commands::Show { run, formatted } => {
            let config = run.to_config()?;
            let prompt = Prompt::assemble(&config, &mut rng_for(config.rng_seed))?;
            if formatted {
                let text = format_prompt(&prompt, config.needs_instruction);
                println!("{}", with_clarifying_assertion(text, config.clarifying_assertion));
            } else {
                println!("{}", prompt.render_preview());
            }
        }
        Commands::Run {
            run,
            out,
            output_root,
        } => {
            let config = run.to_config()?;
            let adapter = match config.mode {
                RunMode::Live => Some(CompletionsAdapter::from_env()?),
                _ => None,
            };
            let gateway = adapter.as_ref().map(|a| a as &dyn LogprobGateway);

            let outputs = match config.mode {
                RunMode::Live => OutputPaths {
                    results_csv: Some(results_csv_path(
                        &output_root,
                        &config.model,
                        config.construction_type,
                        config.format,
                        config.shots,
                        0,
                    )),
                    ..OutputPaths::default()
                },
                RunMode::Finetuning => OutputPaths {
                    finetuning_jsonl: Some(timestamped_path(
                        output_root.join("for_finetuning"),
                        Local::now(),
                        "test.jsonl",
                    )),
                    ..OutputPaths::default()
                },
                RunMode::BatchExport => OutputPaths {
                    batch_requests_jsonl: Some(output_root.join("batch").join("requests.jsonl")),
                    batch_solutions_csv: Some(output_root.join("batch").join("solutions.csv")),
                    ..OutputPaths::default()
                },
            };

            let mut rng = rng_for(config.rng_seed);
            let mut accumulator = ScoreAccumulator::new();
            let pipeline = QueryPipeline::new(config).outputs(outputs);
            let output = pipeline.run(&mut rng, gateway, &mut accumulator).await?;

            if let Some(path) = &out {
                write_rows(path, &output.rows)?;
            }
            match pipeline.config().mode {
                RunMode::Live => print!("{}", render_report_markdown(&build_report(&output.rows))),
                RunMode::Finetuning => {
                    println!("{} fine-tuning pairs", output.finetuning_pairs.len())
                }
                RunMode::BatchExport => {
                    println!("{} batch requests", output.batch_requests.len())
                }
            }
        }
        Commands::Suite {
            suite,
            run,
            output_root,
            pause_secs,
            out,
        } => {
            let base = run.to_config()?;
            let adapter = match suite {
                Suite::TwoFeature | Suite::FinetunedSet if base.mode == RunMode::Live => {
                    Some(CompletionsAdapter::from_env()?)
                }
                _ => None,
            };
            let gateway = adapter.as_ref().map(|a| a as &dyn LogprobGateway);
            let options = SuiteOptions {
                pause_between_batches: Duration::from_secs(pause_secs),
                output_root: Some(output_root),
            };

            let mut rng = rng_for(base.rng_seed);
            let mut accumulator = ScoreAccumulator::new();
            let output =
                run_suite(suite, &base, &options, &mut rng, gateway, &mut accumulator).await?;

            if let Some(path) = &out {
                write_rows(path, &output.rows)?;
            }
            if !output.rows.is_empty() {
                print!("{}", render_report_markdown(&build_report(&output.rows)));
            }
            println!(
                "{suite}: {} prompts, {} rows, {} fine-tuning pairs, {} batch requests",
                output.prompts.len(),
                output.rows.len(),
                output.finetuning_pairs.len(),
                output.batch_requests.len()
            );
        }
        Commands::Report { input, out } => {
            let file = std::fs::File::open(&input)?;
            let mut rows = Vec::new();
            for line in io::BufReader::new(file).lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                rows.push(serde_json::from_str::<ResultRow>(&line)?);
            }
            let markdown = render_report_markdown(&build_report(&rows));
            match out {
                Some(path) => {
                    let mut f = std::fs::File::create(path)?;
                    f.write_all(markdown.as_bytes())?;
                }
                None => print!("{markdown}"),
            }
        }
    }

    Ok(())
}
