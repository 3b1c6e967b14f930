use anyhow::{Context, Result, anyhow};
use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "rput",
    version,
    about = "Upload a directory tree to S3, skipping files whose key already exists",
    long_about = "`rput` mirrors a local directory into an S3 bucket. Every object already stored under the destination prefix is listed first, then the tree is walked and each regular file whose key is missing is uploaded by a pool of workers. Existing objects are never overwritten or compared.

Without --do nothing is written: every decision is still made, counted and logged.

EXAMPLES:
    # See what would be uploaded
    rput --from /data/photos --bucket my-bucket --prefix photos/

    # Upload with 16 workers, logging to a file
    rput -f /data/photos -b my-bucket -k photos/ -c 16 --do --logs /var/log/rput.json

    # Upload to an S3-compatible endpoint
    rput -f /data -b backup --endpoint-url http://localhost:9000 --force-path-style --do"
)]
struct Args {
    // Upload options
    /// Directory to upload
    #[arg(short = 'f', long, value_name = "PATH", help_heading = "Upload options")]
    from: Option<std::path::PathBuf>,

    /// Destination bucket
    #[arg(short = 'b', long, value_name = "NAME", help_heading = "Upload options")]
    bucket: Option<String>,

    /// Prepended verbatim to every relative path to form the object key
    #[arg(
        short = 'k',
        long,
        default_value = "",
        value_name = "PREFIX",
        help_heading = "Upload options"
    )]
    prefix: String,

    /// Number of upload workers
    #[arg(
        short = 'c',
        long = "con",
        default_value = "4",
        value_name = "N",
        help_heading = "Upload options"
    )]
    concurrency: usize,

    /// Actually upload; without it the run is a dry-run
    #[arg(long = "do", help_heading = "Upload options")]
    execute: bool,

    // S3 connection
    /// Custom endpoint, for S3-compatible stores
    #[arg(long, value_name = "URL", help_heading = "S3 connection")]
    endpoint_url: Option<String>,

    /// Region, overrides the one from the environment or profile
    #[arg(long, value_name = "REGION", help_heading = "S3 connection")]
    region: Option<String>,

    /// Address buckets as `endpoint/bucket` instead of `bucket.endpoint`
    #[arg(long, help_heading = "S3 connection")]
    force_path_style: bool,

    // Progress & output
    /// Don't show the progress line
    #[arg(short = 's', long, help_heading = "Progress & output")]
    suppress: bool,

    /// Where to write JSON log records: stdout, stderr or a file path
    #[arg(
        long,
        default_value = "stdout",
        value_name = "TARGET",
        help_heading = "Progress & output"
    )]
    logs: common::LogTarget,

    /// Print summary at the end
    #[arg(long, help_heading = "Progress & output")]
    summary: bool,

    /// Verbose level: -v DEBUG / -vv TRACE (default: INFO)
    #[arg(
        short = 'v',
        long = "verbose",
        action = clap::ArgAction::Count,
        help_heading = "Progress & output"
    )]
    verbose: u8,

    /// Quiet mode, don't report errors on stderr
    #[arg(short = 'q', long = "quiet", help_heading = "Progress & output")]
    quiet: bool,

    // Performance & throttling
    /// Maximum number of files open for upload at once (0 = no limit)
    #[arg(long, value_name = "N", help_heading = "Performance & throttling")]
    max_open_files: Option<usize>,

    /// Throttle the number of upload requests per second, 0 means no throttle
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Performance & throttling"
    )]
    ops_throttle: usize,

    /// Maximum number of directories listed by separate tasks at once (0 = walk inline)
    #[arg(
        long,
        default_value = "64",
        value_name = "N",
        help_heading = "Performance & throttling"
    )]
    walk_width: usize,

    /// Maximum number of listing pages being recorded at once
    #[arg(
        long,
        default_value = "16",
        value_name = "N",
        help_heading = "Performance & throttling"
    )]
    list_width: usize,

    // Advanced settings
    /// Number of worker threads (0 = number of CPU cores)
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_workers: usize,

    /// Number of blocking worker threads (0 = Tokio default of 512)
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_blocking_threads: usize,
}

async fn async_main(args: Args) -> Result<common::push::Summary> {
    let from = args.from.ok_or_else(|| anyhow!("--from is required"))?;
    let bucket = args.bucket.ok_or_else(|| anyhow!("--bucket is required"))?;
    if args.concurrency == 0 {
        return Err(anyhow!("--con must be at least 1"));
    }
    let root = std::path::absolute(&from)
        .with_context(|| format!("cannot resolve source directory {:?}", &from))?;
    let metadata = tokio::fs::metadata(&root)
        .await
        .with_context(|| format!("cannot access source directory {:?}", &root))?;
    if !metadata.is_dir() {
        return Err(anyhow!("source {:?} is not a directory", &root));
    }
    let dry_run = !args.execute;
    tracing::info!(
        root = %root.display(),
        bucket = %bucket,
        prefix = %args.prefix,
        concurrency = args.concurrency,
        dry_run,
        "starting"
    );
    if !args.suppress {
        eprintln!(
            "Starting: from=`{}`, bucket=`{}`, prefix=`{}`, con=`{}`, dry-run=`{}`",
            root.display(),
            bucket,
            args.prefix,
            args.concurrency,
            dry_run
        );
    }
    let options = remote::s3::ConnectOptions {
        endpoint_url: args.endpoint_url,
        region: args.region,
        force_path_style: args.force_path_style,
    };
    let store = std::sync::Arc::new(remote::s3::S3Store::connect(&bucket, &options).await);
    let settings = common::push::Settings {
        root,
        prefix: args.prefix,
        concurrency: args.concurrency,
        dry_run,
        suppress_progress: args.suppress,
        walk_width: args.walk_width,
        list_width: args.list_width,
    };
    let summary = common::push::push(store, settings).await?;
    Ok(summary)
}

fn main() -> Result<()> {
    let args = Args::parse();
    let output = common::OutputConfig {
        quiet: args.quiet,
        verbose: args.verbose,
        print_summary: args.summary,
    };
    let runtime = common::RuntimeConfig {
        max_workers: args.max_workers,
        max_blocking_threads: args.max_blocking_threads,
    };
    let throttle = common::ThrottleConfig {
        max_open_files: args.max_open_files,
        ops_throttle: args.ops_throttle,
    };
    let logging = common::LoggingConfig {
        target: args.logs.clone(),
    };
    let func = move || async_main(args);
    let res = common::run(output, runtime, throttle, logging, func);
    if res.is_none() {
        std::process::exit(1);
    }
    Ok(())
}
