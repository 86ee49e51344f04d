use clap::Parser;
use std::path::PathBuf;

/// A resumable, parallel file downloader.
///
/// The file is split into byte ranges that are fetched concurrently, with
/// optional proxy rotation. Interrupted downloads resume where they stopped
/// when run again with the same arguments.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// The URL of the file to download.
    #[arg(short, long)]
    pub url: String,

    /// The name of the output file. Defaults to the last segment of the URL path.
    #[arg(short, long)]
    pub output: Option<String>,

    /// The directory to save the file in. Defaults to the current directory.
    #[arg(short = 'd', long)]
    pub dir: Option<String>,

    /// The number of chunks, downloaded concurrently.
    #[arg(short = 't', long)]
    pub threads: Option<usize>,

    /// Route every chunk through the configured proxy pool.
    #[arg(short = 'p', long)]
    pub proxy: bool,

    /// Disable TLS certificate verification.
    #[arg(short = 'k', long)]
    pub insecure: bool,

    /// Attempts per chunk before the cooldown.
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Extra config file layered over the user config.
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_short_flags() {
        let args = Args::parse_from([
            "chunkfetch",
            "-u",
            "https://example.com/a.iso",
            "-t",
            "8",
            "-p",
            "-k",
        ]);
        assert_eq!(args.url, "https://example.com/a.iso");
        assert_eq!(args.threads, Some(8));
        assert!(args.proxy);
        assert!(args.insecure);
        assert!(args.output.is_none());
    }

    #[test]
    fn url_is_required() {
        assert!(Args::try_parse_from(["chunkfetch", "-t", "4"]).is_err());
    }
}
