//! The collaborators a step needs to check and change the host.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::config::NetworkConfig;
use crate::error::Result;
use crate::exec::CommandRunner;
use crate::net::{Fetcher, GITHUB_API, ReleaseClient, RetryPolicy};
use crate::system::{Apt, Git, PackageManager};
use crate::workspace::ScratchSpace;

pub struct Toolbox {
    pub runner: Arc<dyn CommandRunner>,
    pub packages: Arc<dyn PackageManager>,
    pub git: Git,
    pub fetcher: Fetcher,
    pub releases: ReleaseClient,
    pub scratch: Arc<ScratchSpace>,
}

impl Toolbox {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        network: &NetworkConfig,
        token: Option<String>,
        scratch: Arc<ScratchSpace>,
    ) -> Result<Self> {
        let timeout = Duration::from_millis(network.timeout_ms);
        let retry = RetryPolicy {
            attempts: network.attempts.max(1),
            initial_backoff: Duration::from_millis(network.backoff_ms),
            max_backoff: Duration::from_millis(network.max_backoff_ms),
        };
        Ok(Self {
            packages: Arc::new(Apt::new(runner.clone())),
            git: Git::new(runner.clone()),
            fetcher: Fetcher::new(timeout, retry)?,
            releases: ReleaseClient::new(network.github_api.clone(), token, timeout)?,
            runner,
            scratch,
        })
    }

    /// Toolbox over a test runner with short timeouts and no retries,
    /// scratch space under `root`
    pub fn for_tests<R: CommandRunner + 'static>(runner: Arc<R>, root: &Path) -> Result<Self> {
        Self::for_tests_with_api(runner, root, GITHUB_API)
    }

    pub fn for_tests_with_api<R: CommandRunner + 'static>(
        runner: Arc<R>,
        root: &Path,
        api_base: &str,
    ) -> Result<Self> {
        let network = NetworkConfig {
            timeout_ms: 5000,
            attempts: 1,
            backoff_ms: 10,
            max_backoff_ms: 10,
            github_api: api_base.to_string(),
            ..Default::default()
        };
        let scratch = Arc::new(ScratchSpace::new(root.join("scratch")));
        Self::new(runner, &network, None, scratch)
    }
}
