use std::time::Duration;

use ambibench::config::{RunConfig, RunMode};
use ambibench::construction::{ConstructionType, FormatType};
use ambibench::gateway::{CompletionsAdapter, LogprobGateway};
use ambibench::pipeline::{OutputPaths, PipelineError, QueryPipeline};
use ambibench::scoring::ScoreAccumulator;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::json;
use tempfile::tempdir;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Three label rows, the last one leaning towards `Y`.
fn echoed_logprobs() -> serde_json::Value {
    json!({
        "model": "davinci-002",
        "choices": [{
            "text": "",
            "logprobs": {
                "tokens": ["The", " critic", "\n", ">", "X", "\n", ">", "Y", "\n", ">", "X"],
                "token_logprobs": [null, -5.0, -1.0, -0.1, -0.2, -1.0, -0.1, -0.4, -1.0, -0.1, -1.2],
                "top_logprobs": [
                    null,
                    {" critic": -5.0},
                    {"\n": -1.0},
                    {">": -0.1},
                    {"X": -0.2, "Y": -1.9},
                    {"\n": -1.0},
                    {">": -0.1},
                    {"Y": -0.4, "X": -1.2},
                    {"\n": -1.0},
                    {">": -0.1},
                    {"Y": -0.5, "X": -1.2, " X": -3.0}
                ]
            }
        }]
    })
}

fn live_config(queries: usize) -> RunConfig {
    RunConfig::new(ConstructionType::SubjectLocation, FormatType::Arrow)
        .shots(1)
        .queries(queries)
        .ambiguous_examples(true)
        .mode(RunMode::Live)
        .model("davinci-002")
        .seed(11)
}

#[tokio::test]
async fn live_run_scores_every_query_and_appends_csv() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/completions"))
        .and(body_partial_json(json!({ "model": "davinci-002", "echo": true })))
        .respond_with(ResponseTemplate::new(200).set_body_json(echoed_logprobs()))
        .expect(2)
        .mount(&server)
        .await;

    let adapter =
        CompletionsAdapter::with_config("sk-test", server.uri(), Duration::from_secs(5)).unwrap();
    let gateway: &dyn LogprobGateway = &adapter;

    let dir = tempdir().unwrap();
    let csv = dir.path().join("davinci-002").join("results.csv");
    let pipeline = QueryPipeline::new(live_config(2)).outputs(OutputPaths {
        results_csv: Some(csv.clone()),
        ..OutputPaths::default()
    });

    let mut rng = StdRng::seed_from_u64(11);
    let mut acc = ScoreAccumulator::new();
    let output = pipeline.run(&mut rng, Some(gateway), &mut acc).await.unwrap();

    assert_eq!(output.prompts.len(), 2);
    // Two seeds and one query per prompt, three label rows per response.
    assert!(output.prompts.iter().all(|p| p.examples.len() == 3));
    assert_eq!(output.rows.len(), 6);
    assert_eq!(acc.len(), 6);
    // Rows 1 and 2 of each prompt pick their own label; row 3 does not.
    assert_eq!(acc.accuracies(), &[1, 1, 0, 1, 1, 0]);

    let salient = output.prompts[0].salient_task();
    assert!(salient.is_some());
    assert!(output.rows[..3].iter().all(|r| r.salient_task == salient));

    let text = std::fs::read_to_string(&csv).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 1 + 6);
    assert!(lines[0].starts_with("construction_type,"));
}

#[tokio::test]
async fn live_run_stops_on_provider_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/completions"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "1"))
        .mount(&server)
        .await;

    let adapter =
        CompletionsAdapter::with_config("sk-test", server.uri(), Duration::from_secs(5)).unwrap();

    let mut rng = StdRng::seed_from_u64(3);
    let mut acc = ScoreAccumulator::new();
    let err = QueryPipeline::new(live_config(3))
        .run(&mut rng, Some(&adapter as &dyn LogprobGateway), &mut acc)
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Provider(_)));
    assert!(acc.is_empty());
}
