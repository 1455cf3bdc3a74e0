use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use aves_detect::output::{ResultSummary, load_results};
use aves_detect::{Args, ClassNames, Command, OnnxDetector, load_class_mapping, run};

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    match args.command {
        Command::Detect(detect) => {
            let config = detect.into_config()?;
            tracing::debug!("{config:#?}");
            let detector = OnnxDetector::from_config(&config)?;
            run(&config, &detector)?;
        }
        Command::Summary { dir, labels } => {
            let names = match labels {
                Some(path) => load_class_mapping(&path)?,
                None => ClassNames::coco(),
            };
            let results = load_results(&dir)?;
            print!("{}", ResultSummary::from_results(&results, &names));
        }
    }
    Ok(())
}
