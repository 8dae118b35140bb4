use sbk_model_tester::runners::{RunnerKind, TesterConfig};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Diagnostics on stderr so stdout carries only the banner and responses.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::WARN.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .try_init();

    println!("Welcome to SBK AI Model Tester");
    println!("-------------------------------");
    println!("This program will attempt to run Llama-3.2-3B-Instruct locally.");
    println!("Make sure you have run 'hf auth login' as requested.");

    let config = TesterConfig::default();
    let mut stdout = std::io::stdout();
    for kind in RunnerKind::ENABLED {
        if let Err(e) = kind.run(&config, &mut stdout).await {
            tracing::error!(runner = ?kind, error = %e, "failed to write runner output");
        }
    }
}
