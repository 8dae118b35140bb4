// The runners must report failures on their output and return normally.

use sbk_model_tester::runners::{DirectRunner, PipelineRunner, RunnerKind, TesterConfig};
use sbk_model_tester::DeviceMap;

fn unreachable_model() -> TesterConfig {
    TesterConfig {
        model_id: "bad id/with spaces".to_string(),
        device_map: DeviceMap::Cpu,
        ..Default::default()
    }
}

#[tokio::test]
async fn both_runners_report_errors_with_their_label() -> anyhow::Result<()> {
    let mut out = Vec::new();
    PipelineRunner::new(unreachable_model()).run(&mut out).await?;
    DirectRunner::new(unreachable_model()).run(&mut out).await?;

    let out = String::from_utf8(out)?;
    let lines: Vec<&str> = out.lines().filter(|l| l.starts_with("Error")).collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("Error in pipeline: "));
    assert!(lines[1].starts_with("Error in direct loading: "));
    Ok(())
}

#[tokio::test]
#[ignore = "downloads a gated checkpoint"]
async fn enabled_runners_print_a_response() -> anyhow::Result<()> {
    let config = TesterConfig::default();
    let mut out = Vec::new();
    for kind in RunnerKind::ENABLED {
        kind.run(&config, &mut out).await?;
    }

    let out = String::from_utf8(out)?;
    let response = out
        .lines()
        .find_map(|l| l.strip_prefix("Response: "))
        .unwrap_or_default();
    assert!(!response.trim().is_empty(), "{out}");
    Ok(())
}
