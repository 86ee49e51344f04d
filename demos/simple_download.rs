use chunkfetch::observer::ConsoleObserver;
use chunkfetch::{DownloadJob, Downloader, JobOutcome, utils};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_target(false).init();

    // Configuration
    let url = "https://proof.ovh.net/files/10Mb.dat";
    let chunks = 4;
    let output_dir = ".";

    println!("Starting example download...");
    println!("URL: {}", url);

    // 1. Prepare Paths and Filename
    let filename = utils::get_filename_from_url(url);
    let mut output_path = PathBuf::from(output_dir);
    output_path.push(&filename);

    // 2. Describe the job
    let job = DownloadJob::new(url, output_path.clone()).with_chunks(chunks);

    // 3. Setup UI (Progress Bar)
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::with_template("{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")?
            .progress_chars("=>-"),
    );
    pb.set_message(filename);

    // 4. Run it. Interrupting and re-running this example resumes the download.
    let outcome = Downloader::new(job)
        .with_observer(Arc::new(ConsoleObserver { pb }))
        .run()
        .await?;

    match outcome {
        JobOutcome::Done { path, size } => {
            println!("✅ Download completed successfully: {} ({} bytes)", path.display(), size)
        }
        JobOutcome::PartiallyFailed { unfinished, .. } => {
            eprintln!("Chunks {:?} did not finish, run again to resume", unfinished)
        }
    }
    Ok(())
}
