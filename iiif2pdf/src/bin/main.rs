use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::fs::File;
use tokio::io::BufWriter;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use iiif2pdf::config;
use iiif2pdf::fetch::FetchOptions;
use iiif2pdf::pipeline::{self, ConvertOptions, CoverPageSource, ManifestSource, MessageCode, Notification};

#[derive(Parser)]
#[command(name = "iiif2pdf", about = "Streams a IIIF Presentation manifest into a searchable PDF")]
struct Opts {
    #[arg(long, default_value = "config.toml")]
    config_path: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Runs the full conversion and writes a PDF.
    Convert {
        #[arg(long)]
        manifest: String,
        #[arg(long)]
        output: PathBuf,
        #[arg(long)]
        ppi: Option<f64>,
        #[arg(long)]
        cover: Option<PathBuf>,
        #[arg(long)]
        concurrency: Option<usize>,
        #[arg(long)]
        language: Option<String>,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        author: Option<String>,
    },
    /// Estimates the output size without writing a PDF.
    Estimate {
        #[arg(long)]
        manifest: String,
    },
}

#[tokio::main]
async fn main() {
    use tracing_subscriber::layer::SubscriberExt as _;
    use tracing_subscriber::util::SubscriberInitExt as _;
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();
    config::init(opts.config_path).await;
    let cfg = config::current().await;

    let cancellation = CancellationToken::new();
    {
        let cancellation = cancellation.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("received interrupt, cancelling conversion");
            cancellation.cancel();
        });
    }

    match opts.command {
        Command::Convert { manifest, output, ppi, cover, concurrency, language, title, author } => {
            let cover_page = match cover {
                Some(path) => match tokio::fs::read(&path).await {
                    Ok(bytes) => Some(CoverPageSource::Bytes(bytes)),
                    Err(e) => {
                        error!("failed to read cover page {}: {}", path.display(), e);
                        std::process::exit(1);
                    }
                },
                None => None,
            };

            let options = ConvertOptions {
                ppi_override: ppi,
                language,
                canvas_filter: Arc::new(|_| true),
                scale_factor: 1.0,
                concurrency: concurrency.unwrap_or(cfg.default_concurrency),
                cover_page,
                cancellation,
                fetch_options: FetchOptions {
                    max_retries: cfg.default_max_retries,
                    user_agent: cfg.user_agent.clone(),
                    timeout: cfg.http_timeout(),
                },
                embed_hidden_text_font: true,
                embed_srgb_output_intent: true,
                title,
                author,
            };

            let file = match File::create(&output).await {
                Ok(f) => f,
                Err(e) => {
                    error!("failed to create output file {}: {}", output.display(), e);
                    std::process::exit(1);
                }
            };
            let sink = BufWriter::new(file);

            let result = pipeline::convert(
                ManifestSource::Url(manifest),
                sink,
                options,
                |progress| {
                    let stage = match progress.message_code {
                        Some(MessageCode::GenerateCoverPage) => "cover",
                        Some(MessageCode::GeneratePages) => "pages",
                        Some(MessageCode::Finishing) => "finishing",
                        None => "working",
                    };
                    info!(
                        "{}: {}/{} pages, {} bytes written",
                        stage, progress.pages_written, progress.total_pages, progress.bytes_written
                    );
                },
                |notification| match notification {
                    Notification::ImageDownloadFailure { canvas_index, cause } => {
                        error!("canvas {}: image download failed: {}", canvas_index, cause);
                    }
                    Notification::OcrDownloadFailure { canvas_index, cause } => {
                        error!("canvas {}: OCR download failed: {}", canvas_index, cause);
                    }
                },
            )
            .await;

            match result {
                Ok(report) => {
                    info!(
                        "done: {} pages written ({} from cover), {} partial failures",
                        report.pages_written, report.cover_pages_written, report.failures.len()
                    );
                }
                Err(e) => {
                    error!("conversion failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Command::Estimate { manifest } => {
            let options = ConvertOptions {
                concurrency: cfg.default_concurrency,
                cancellation,
                fetch_options: FetchOptions {
                    max_retries: cfg.default_max_retries,
                    user_agent: cfg.user_agent.clone(),
                    timeout: cfg.http_timeout(),
                },
                ..ConvertOptions::default()
            };
            match pipeline::estimate(ManifestSource::Url(manifest), &options).await {
                Ok(bytes) => println!("estimated size: {} bytes", bytes),
                Err(e) => {
                    error!("estimation failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
    }
}
