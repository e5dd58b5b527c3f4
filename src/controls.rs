//! Crawl policy knobs and the command-line arguments that build them.

use clap::Args;
use std::time::Duration;

/// Default user agent sent with every fetch.
pub const DEFAULT_USER_AGENT: &str = "fastindex/0.1 (+https://github.com/fastindex/fastindex)";

/// Tunable knobs that bound crawl behavior.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CrawlControls {
    page_budget: usize,
    max_links_per_page: usize,
    politeness_delay: Duration,
    fetch_timeout: Duration,
    obey_robots: bool,
    user_agent: String,
}

impl CrawlControls {
    /// Constructs a new set of crawl controls.
    pub fn new(
        page_budget: usize,
        max_links_per_page: usize,
        politeness_delay: Duration,
        fetch_timeout: Duration,
        obey_robots: bool,
        user_agent: impl Into<String>,
    ) -> Self {
        Self {
            page_budget,
            max_links_per_page,
            politeness_delay,
            fetch_timeout,
            obey_robots,
            user_agent: user_agent.into(),
        }
    }

    /// Maximum pages fetched by one site exploration.
    pub fn page_budget(&self) -> usize {
        self.page_budget
    }

    /// Maximum number of queueable links taken from each page.
    pub fn max_links_per_page(&self) -> usize {
        self.max_links_per_page
    }

    /// Time to wait between successive fetches.
    pub fn politeness_delay(&self) -> Duration {
        self.politeness_delay
    }

    /// Per-fetch transport timeout.
    pub fn fetch_timeout(&self) -> Duration {
        self.fetch_timeout
    }

    /// Whether site explorations honor robots.txt.
    pub fn obey_robots(&self) -> bool {
        self.obey_robots
    }

    /// User agent presented to sites and matched against robots.txt groups.
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Copy with a different politeness delay.
    pub fn with_politeness_delay(mut self, delay: Duration) -> Self {
        self.politeness_delay = delay;
        self
    }
}

impl Default for CrawlControls {
    fn default() -> Self {
        Self {
            page_budget: 500,
            max_links_per_page: 256,
            politeness_delay: Duration::from_millis(250),
            fetch_timeout: Duration::from_secs(100),
            obey_robots: true,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// Crawl arguments shared by binaries that run crawl jobs.
#[derive(Args, Debug, Clone)]
pub struct CrawlArgs {
    /// Maximum pages fetched per site exploration
    #[arg(long, env = "FASTINDEX_PAGE_BUDGET", default_value_t = 500)]
    pub page_budget: usize,

    /// Milliseconds to wait between fetches
    #[arg(long, env = "FASTINDEX_POLITENESS_MS", default_value_t = 250)]
    pub politeness_ms: u64,

    /// Seconds before a single fetch times out
    #[arg(long, env = "FASTINDEX_FETCH_TIMEOUT_SECS", default_value_t = 100)]
    pub fetch_timeout_secs: u64,

    /// Maximum links captured per page
    #[arg(long, env = "FASTINDEX_MAX_LINKS", default_value_t = 256)]
    pub max_links_per_page: usize,

    /// Honor robots.txt during site explorations
    #[arg(
        long,
        env = "FASTINDEX_OBEY_ROBOTS",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub obey_robots: bool,

    /// User agent sent with every fetch
    #[arg(long, env = "FASTINDEX_USER_AGENT", default_value = DEFAULT_USER_AGENT)]
    pub user_agent: String,
}

impl CrawlArgs {
    /// Converts the parsed arguments into `CrawlControls`.
    pub fn build_controls(&self) -> CrawlControls {
        CrawlControls::new(
            self.page_budget.max(1),
            self.max_links_per_page,
            Duration::from_millis(self.politeness_ms),
            Duration::from_secs(self.fetch_timeout_secs.max(1)),
            self.obey_robots,
            self.user_agent.clone(),
        )
    }
}
