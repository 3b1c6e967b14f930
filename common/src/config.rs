//! Configuration types for runtime and execution settings

/// Runtime configuration for tokio and thread pools
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeConfig {
    /// Number of worker threads (0 = number of CPU cores)
    pub max_workers: usize,
    /// Number of blocking threads (0 = tokio default of 512)
    pub max_blocking_threads: usize,
}

/// Throttling configuration for resource control
#[derive(Debug, Clone, Copy, Default)]
pub struct ThrottleConfig {
    /// Maximum number of local files opened for upload at once (None or 0 = no limit)
    pub max_open_files: Option<usize>,
    /// Remote write requests per second (0 = no throttle)
    pub ops_throttle: usize,
}

/// Output configuration
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputConfig {
    /// Don't print errors to stderr
    pub quiet: bool,
    /// Verbosity level: 0=INFO, 1=DEBUG, 2+=TRACE
    pub verbose: u8,
    /// Print summary statistics at the end
    pub print_summary: bool,
}

impl OutputConfig {
    pub fn level(&self) -> tracing::Level {
        match self.verbose {
            0 => tracing::Level::INFO,
            1 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        }
    }

    /// Prints an error line on stderr unless quiet. Returns whether anything was printed.
    pub fn report(&self, msg: &dyn std::fmt::Display) -> bool {
        if self.quiet {
            return false;
        }
        eprintln!("{msg}");
        true
    }
}

/// Where structured log records are written
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LogTarget {
    #[default]
    Stdout,
    Stderr,
    /// Created if missing, appended to otherwise
    File(std::path::PathBuf),
}

impl std::str::FromStr for LogTarget {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "" => Err(anyhow::anyhow!("log target cannot be empty")),
            "stdout" => Ok(Self::Stdout),
            "stderr" => Ok(Self::Stderr),
            path => Ok(Self::File(std::path::PathBuf::from(path))),
        }
    }
}

impl std::fmt::Display for LogTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Stdout => write!(f, "stdout"),
            Self::Stderr => write!(f, "stderr"),
            Self::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Structured logging configuration
#[derive(Debug, Clone, Default)]
pub struct LoggingConfig {
    pub target: LogTarget,
}
