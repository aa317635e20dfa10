//! Package management through apt-get and dpkg-query.

use async_trait::async_trait;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::error::Result;
use crate::exec::{CommandRunner, CommandSpec};

/// Where a package comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageSource {
    /// The configured APT sources
    Default,
    /// A backports suite, e.g. `trixie-backports`
    Backports(String),
    /// A `.deb` downloaded from a URL
    Deb(String),
}

/// A package to install; "latest" from its source is implied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageSpec {
    pub name: String,
    pub source: PackageSource,
}

impl PackageSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: PackageSource::Default,
        }
    }

    pub fn backports(name: impl Into<String>, suite: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: PackageSource::Backports(suite.into()),
        }
    }

    pub fn deb(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: PackageSource::Deb(url.into()),
        }
    }
}

impl fmt::Display for PackageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            PackageSource::Default => write!(f, "{}", self.name),
            PackageSource::Backports(suite) => write!(f, "{} ({})", self.name, suite),
            PackageSource::Deb(url) => write!(f, "{} ({})", self.name, url),
        }
    }
}

/// The package database and installer
#[async_trait]
pub trait PackageManager: Send + Sync {
    /// True when the package is installed, whatever its version
    async fn is_installed(&self, name: &str) -> Result<bool>;

    /// Refresh the package index
    async fn update_index(&self) -> Result<()>;

    /// Install packages from their repository sources (not `.deb` URLs)
    async fn install(&self, packages: &[PackageSpec]) -> Result<()>;

    /// Remove the packages that are installed; others are ignored
    async fn remove(&self, names: &[String]) -> Result<()>;

    /// Install a local `.deb` file, pulling its dependencies
    async fn install_deb(&self, path: &Path) -> Result<()>;
}

/// `PackageManager` backed by apt-get/dpkg-query
pub struct Apt {
    runner: Arc<dyn CommandRunner>,
}

impl Apt {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    fn apt_get(&self) -> CommandSpec {
        CommandSpec::new("apt-get")
            .env("DEBIAN_FRONTEND", "noninteractive")
            .elevated()
    }
}

#[async_trait]
impl PackageManager for Apt {
    async fn is_installed(&self, name: &str) -> Result<bool> {
        let spec = CommandSpec::new("dpkg-query").args(["-W", "-f=${Status}", name]);
        let output = self.runner.run(&spec).await?;
        // dpkg-query exits 1 for unknown packages
        Ok(output.success() && output.stdout.contains("install ok installed"))
    }

    async fn update_index(&self) -> Result<()> {
        self.runner.run_checked(&self.apt_get().arg("update")).await?;
        Ok(())
    }

    async fn install(&self, packages: &[PackageSpec]) -> Result<()> {
        let mut default = Vec::new();
        let mut backports: Vec<(&str, Vec<&str>)> = Vec::new();
        for pkg in packages {
            match &pkg.source {
                PackageSource::Default => default.push(pkg.name.as_str()),
                PackageSource::Backports(suite) => {
                    match backports.iter_mut().find(|(s, _)| *s == suite.as_str()) {
                        Some((_, names)) => names.push(pkg.name.as_str()),
                        None => backports.push((suite.as_str(), vec![pkg.name.as_str()])),
                    }
                }
                PackageSource::Deb(url) => {
                    log::warn!("skipping {} from {}: .deb sources are installed by fetch", pkg.name, url);
                }
            }
        }

        if !default.is_empty() {
            let spec = self.apt_get().args(["install", "-y"]).args(default);
            self.runner.run_checked(&spec).await?;
        }
        for (suite, names) in backports {
            let spec = self.apt_get().args(["install", "-y", "-t", suite]).args(names);
            self.runner.run_checked(&spec).await?;
        }
        Ok(())
    }

    async fn remove(&self, names: &[String]) -> Result<()> {
        let mut installed = Vec::new();
        for name in names {
            if self.is_installed(name).await? {
                installed.push(name.as_str());
            }
        }
        if installed.is_empty() {
            log::info!("nothing to remove");
            return Ok(());
        }
        self.runner
            .run_checked(&self.apt_get().args(["purge", "-y"]).args(installed))
            .await?;
        self.runner
            .run_checked(&self.apt_get().args(["autoremove", "-y"]))
            .await?;
        Ok(())
    }

    async fn install_deb(&self, path: &Path) -> Result<()> {
        // apt-get only treats the argument as a file when it contains a slash
        let arg = if path.is_absolute() {
            path.display().to_string()
        } else {
            format!("./{}", path.display())
        };
        self.runner
            .run_checked(&self.apt_get().args(["install", "-y"]).arg(arg))
            .await?;
        Ok(())
    }
}
