use anyhow::{Context, Result};
use chunkfetch::config::Settings;
use chunkfetch::notify::{CompletionEvent, Notifier};
use chunkfetch::observer::ConsoleObserver;
use chunkfetch::{Args, Downloader, JobOutcome, utils};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Prints the completion event below the progress bar.
struct ConsoleNotifier {
    pb: ProgressBar,
}

impl Notifier for ConsoleNotifier {
    fn notify(&self, event: &CompletionEvent) {
        let icon = if event.success { "✅" } else { "❌" };
        self.pb
            .println(format!("{} {}: {}", icon, event.title, event.body));
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Interrupt {
    /// Let workers stop and save their progress.
    Pause,
    /// Already pausing; exit without waiting.
    Quit,
}

fn on_interrupt(token: &CancellationToken) -> Interrupt {
    if token.is_cancelled() {
        Interrupt::Quit
    } else {
        token.cancel();
        Interrupt::Pause
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    let settings = Settings::load(args.config.as_deref()).context("Failed to load settings")?;
    init_logging(&settings.log_level);

    let mut settings = settings;
    if let Some(threads) = args.threads {
        settings.threads = threads;
    }
    if let Some(max_retries) = args.max_retries {
        settings.max_retries = max_retries;
    }
    if args.insecure {
        settings.verify_tls = false;
    }

    let filename = args
        .output
        .clone()
        .unwrap_or_else(|| utils::get_filename_from_url(&args.url));
    let mut output_path = PathBuf::from(
        args.dir
            .clone()
            .or(settings.default_dir.clone())
            .unwrap_or_else(|| ".".to_string()),
    );
    output_path.push(&filename);

    let job = settings.to_job(&args.url, output_path, args.proxy);

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::with_template(
            "{msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})",
        )?
        .progress_chars("=>-"),
    );
    pb.set_message(filename.clone());

    let cancel_token = CancellationToken::new();
    let signal_token = cancel_token.clone();
    let signal_pb = pb.clone();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            match on_interrupt(&signal_token) {
                Interrupt::Pause => signal_pb
                    .println("🛑 Received Ctrl+C. Pausing download, run again to resume..."),
                Interrupt::Quit => {
                    signal_pb.println("🛑 Received Ctrl+C again. Quitting now.");
                    std::process::exit(130);
                }
            }
        }
    });

    let downloader = Downloader::new(job)
        .with_observer(Arc::new(ConsoleObserver { pb: pb.clone() }))
        .with_notifier(Arc::new(ConsoleNotifier { pb: pb.clone() }))
        .with_cancel_token(cancel_token);

    let outcome = downloader.run().await;
    pb.abandon();

    match outcome? {
        JobOutcome::Done { .. } => Ok(ExitCode::SUCCESS),
        JobOutcome::PartiallyFailed { .. } => Ok(ExitCode::from(2)),
    }
}
