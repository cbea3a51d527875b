use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dx_core::{PredictionRequest, ServerConfig, ServiceConfig};
use dx_inference::{create_source, hash_file, Classifier, ModelLoader};
use dx_web::AppState;
use image::ImageFormat;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Binary medical image classifier", long_about = None)]
pub struct Cli {
    #[command(flatten)]
    service: ServiceConfig,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the REST API
    Serve {
        #[command(flatten)]
        server: ServerConfig,
    },
    /// Classify image files and print one JSON result per image
    Predict {
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// Download the model artifacts into the cache
    Fetch,
    /// Load the model and print its metadata
    Meta,
}

fn build_classifier(service: &ServiceConfig) -> Result<Arc<Classifier>> {
    let loader = ModelLoader::from_config(service.loader.clone())?;
    Ok(Arc::new(Classifier::new(Arc::new(loader), service.limits)))
}

fn content_type_for(path: &Path) -> Option<String> {
    ImageFormat::from_path(path)
        .ok()
        .map(|format| format.to_mime_type().to_string())
}

async fn serve(service: &ServiceConfig, server: &ServerConfig) -> Result<()> {
    let classifier = build_classifier(service)?;

    if server.warm {
        let loader = Arc::clone(classifier.loader());
        tokio::spawn(async move {
            match loader.ensure_ready().await {
                Ok(model) => info!("🔥 Model warmed up ({})", model.short_sha()),
                Err(e) => warn!("⚠️ Warm start failed, will retry on first request: {}", e),
            }
        });
    }

    dx_web::serve(AppState::new(classifier), server).await
}

async fn predict(service: &ServiceConfig, images: &[PathBuf]) -> Result<()> {
    let classifier = build_classifier(service)?;
    let mut failed = 0usize;

    for path in images {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        let request = PredictionRequest::new(bytes, content_type_for(path));

        let line = match classifier.predict(request).await {
            Ok(result) => json!({ "image": path, "result": result }),
            Err(e) => {
                error!("❌ {}: {}", path.display(), e);
                failed += 1;
                json!({ "image": path, "error": e.to_string() })
            }
        };
        println!("{}", serde_json::to_string_pretty(&line)?);
    }

    if failed > 0 {
        anyhow::bail!("{} of {} images could not be classified", failed, images.len());
    }
    Ok(())
}

async fn fetch(service: &ServiceConfig) -> Result<()> {
    let config = &service.loader;
    let source = create_source(config)?;
    info!("📥 Fetching artifacts from {}", source.describe());

    let model = source.fetch(&config.hf_filename).await?;
    let sha256 = hash_file(&model)?;
    let assets = match config.assets_filename() {
        Some(name) => Some(source.fetch(name).await?),
        None => None,
    };

    info!("✅ Model cached at {} ({})", model.display(), &sha256[..8]);
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "model": model,
            "assets": assets,
            "sha256": sha256,
        }))?
    );
    Ok(())
}

async fn meta(service: &ServiceConfig) -> Result<()> {
    let classifier = build_classifier(service)?;
    let model = classifier.loader().ensure_ready().await?;
    println!("{}", serde_json::to_string_pretty(&model.meta())?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Serve { server } => serve(&cli.service, server).await,
        Commands::Predict { images } => predict(&cli.service, images).await,
        Commands::Fetch => fetch(&cli.service).await,
        Commands::Meta => meta(&cli.service).await,
    }
}
