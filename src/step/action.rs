//! Step actions and how they are carried out.

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use crate::error::{ProvisionError, Result};
use crate::exec::CommandSpec;
use crate::net::{AssetSelector, verify_sha256};
use crate::system::{PackageSource, PackageSpec};
use crate::toolbox::Toolbox;

/// A third-party APT repository with its signing key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AptRepository {
    pub name: String,
    pub key_url: String,
    /// Where the key ends up, referenced by `signed-by=`
    pub keyring: PathBuf,
    pub list_file: PathBuf,
    /// The complete `deb ...` line
    pub entry: String,
    /// The key is ASCII-armored and must go through `gpg --dearmor`
    pub dearmor: bool,
}

/// A script published by a vendor, run as an opaque installer.
///
/// The script is downloaded to scratch space first and run from disk with an
/// explicit interpreter, so the source URL is logged and a failed download is
/// retried instead of half-piped into a shell.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VendorInstaller {
    pub name: String,
    pub url: String,
    pub interpreter: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub elevated: bool,
}

#[derive(Debug, Clone)]
pub enum Action {
    /// `apt-get update`
    UpdateIndex,
    Install(Vec<PackageSpec>),
    /// Purge whichever of these packages are installed
    Remove(Vec<String>),
    /// Run commands in order, stopping at the first failure
    Run(Vec<CommandSpec>),
    /// `mkdir -p` as the current user
    CreateDirs(Vec<PathBuf>),
    /// Append a line unless the file already has it
    AppendLine {
        path: PathBuf,
        line: String,
        elevated: bool,
    },
    AddRepository(AptRepository),
    /// Install the `.deb` asset of a GitHub repository's latest release
    ReleaseDeb { repo: String, selector: AssetSelector },
    GitClone {
        url: String,
        dest: PathBuf,
        depth: Option<u32>,
        branch: Option<String>,
    },
    VendorInstaller(VendorInstaller),
    Sequence(Vec<Action>),
}

impl Action {
    /// Human-readable plan lines, used by dry runs and `--list`
    pub fn describe(&self) -> Vec<String> {
        match self {
            Action::UpdateIndex => vec!["apt-get update".to_string()],
            Action::Install(pkgs) => {
                let names: Vec<String> = pkgs.iter().map(|p| p.to_string()).collect();
                vec![format!("install {}", names.join(", "))]
            }
            Action::Remove(names) => vec![format!("purge (if installed) {}", names.join(", "))],
            Action::Run(cmds) => cmds.iter().map(|c| c.to_string()).collect(),
            Action::CreateDirs(dirs) => dirs.iter().map(|d| format!("mkdir -p {}", d.display())).collect(),
            Action::AppendLine { path, line, .. } => {
                vec![format!("append {:?} to {}", line, path.display())]
            }
            Action::AddRepository(repo) => vec![
                format!("fetch key {} -> {}", repo.key_url, repo.keyring.display()),
                format!("write {}: {}", repo.list_file.display(), repo.entry),
            ],
            Action::ReleaseDeb { repo, selector } => {
                vec![format!("install latest {} release asset matching '{}'", repo, selector.pattern)]
            }
            Action::GitClone { url, dest, .. } => vec![format!("git clone {} {}", url, dest.display())],
            Action::VendorInstaller(v) => {
                vec![format!("run vendor installer {} ({} {})", v.name, v.interpreter, v.url)]
            }
            Action::Sequence(actions) => actions.iter().flat_map(|a| a.describe()).collect(),
        }
    }

    pub fn execute<'a>(&'a self, tools: &'a Toolbox) -> BoxFuture<'a, Result<()>> {
        async move {
            match self {
                Action::UpdateIndex => tools.packages.update_index().await,
                Action::Install(pkgs) => install(tools, pkgs).await,
                Action::Remove(names) => tools.packages.remove(names).await,
                Action::Run(cmds) => {
                    for cmd in cmds {
                        tools.runner.run_checked(cmd).await?;
                    }
                    Ok(())
                }
                Action::CreateDirs(dirs) => {
                    for dir in dirs {
                        tokio::fs::create_dir_all(dir).await?;
                    }
                    Ok(())
                }
                Action::AppendLine { path, line, elevated } => append_line(tools, path, line, *elevated).await,
                Action::AddRepository(repo) => add_repository(tools, repo).await,
                Action::ReleaseDeb { repo, selector } => release_deb(tools, repo, selector).await,
                Action::GitClone {
                    url,
                    dest,
                    depth,
                    branch,
                } => {
                    tools.git.clone_repo(url, dest, *depth, branch.as_deref()).await?;
                    Ok(())
                }
                Action::VendorInstaller(vendor) => vendor_install(tools, vendor).await,
                Action::Sequence(actions) => {
                    for action in actions {
                        action.execute(tools).await?;
                    }
                    Ok(())
                }
            }
        }
        .boxed()
    }
}

async fn install(tools: &Toolbox, pkgs: &[PackageSpec]) -> Result<()> {
    let (debs, repo): (Vec<&PackageSpec>, Vec<&PackageSpec>) =
        pkgs.iter().partition(|p| matches!(p.source, PackageSource::Deb(_)));

    if !repo.is_empty() {
        let repo: Vec<PackageSpec> = repo.into_iter().cloned().collect();
        tools.packages.install(&repo).await?;
    }
    for pkg in debs {
        if let PackageSource::Deb(url) = &pkg.source {
            let dir = tools.scratch.create_dir(&pkg.name)?;
            let dest = dir.join(format!("{}.deb", pkg.name));
            tools.fetcher.fetch(url, &dest).await?;
            tools.packages.install_deb(&dest).await?;
        }
    }
    Ok(())
}

async fn release_deb(tools: &Toolbox, repo: &str, selector: &AssetSelector) -> Result<()> {
    let asset = tools.releases.latest_release_asset(repo, selector).await?;
    let dir = tools.scratch.create_dir(repo.rsplit('/').next().unwrap_or(repo))?;
    let dest = dir.join(&asset.name);
    tools.fetcher.fetch(&asset.browser_download_url, &dest).await?;
    if let Some(sha) = asset.sha256() {
        verify_sha256(&dest, sha).await?;
    }
    tools.packages.install_deb(&dest).await
}

async fn add_repository(tools: &Toolbox, repo: &AptRepository) -> Result<()> {
    let dir = tools.scratch.create_dir(&repo.name)?;
    let key = dir.join("key");
    tools.fetcher.fetch(&repo.key_url, &key).await?;

    let keyring = repo.keyring.display().to_string();
    let key_cmd = if repo.dearmor {
        CommandSpec::new("gpg")
            .args(["--batch", "--yes", "--dearmor", "-o", keyring.as_str()])
            .arg(key.display().to_string())
    } else {
        CommandSpec::new("install")
            .args(["-D", "-m", "0644"])
            .arg(key.display().to_string())
            .arg(&keyring)
    };
    tools.runner.run_checked(&key_cmd.elevated()).await?;

    // The list file is rewritten whole, so re-applying never duplicates the entry
    let list = dir.join("list");
    tokio::fs::write(&list, format!("{}\n", repo.entry)).await?;
    let list_cmd = CommandSpec::new("install")
        .args(["-D", "-m", "0644"])
        .arg(list.display().to_string())
        .arg(repo.list_file.display().to_string())
        .elevated();
    tools.runner.run_checked(&list_cmd).await?;
    Ok(())
}

async fn append_line(tools: &Toolbox, path: &Path, line: &str, elevated: bool) -> Result<()> {
    let existing = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };
    if existing.lines().any(|l| l.trim() == line.trim()) {
        log::info!("{} already has {:?}", path.display(), line);
        return Ok(());
    }

    let mut text = String::new();
    if !existing.is_empty() && !existing.ends_with('\n') {
        text.push('\n');
    }
    text.push_str(line);
    text.push('\n');

    if elevated {
        let dir = tools.scratch.create_dir("append")?;
        let staged = dir.join("line");
        tokio::fs::write(&staged, &text).await?;
        let cmd = CommandSpec::new("sh")
            .args(["-c", "cat \"$1\" >> \"$2\"", "sh"])
            .arg(staged.display().to_string())
            .arg(path.display().to_string())
            .elevated();
        tools.runner.run_checked(&cmd).await?;
    } else {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(text.as_bytes()).await?;
        file.flush().await?;
    }
    Ok(())
}

async fn vendor_install(tools: &Toolbox, vendor: &VendorInstaller) -> Result<()> {
    if vendor.interpreter.trim().is_empty() {
        return Err(ProvisionError::Config(format!(
            "vendor installer '{}' has no interpreter",
            vendor.name
        )));
    }
    let dir = tools.scratch.create_dir(&vendor.name)?;
    let script = dir.join("installer");
    tools.fetcher.fetch(&vendor.url, &script).await?;
    log::info!(
        "running vendor installer '{}' from {} with {}{}",
        vendor.name,
        vendor.url,
        vendor.interpreter,
        if vendor.elevated { " as root" } else { "" }
    );

    let mut cmd = CommandSpec::new(&vendor.interpreter)
        .arg(script.display().to_string())
        .args(vendor.args.iter().cloned());
    cmd.env = vendor.env.clone();
    cmd.elevated = vendor.elevated;
    tools.runner.run_checked(&cmd).await?;
    Ok(())
}
