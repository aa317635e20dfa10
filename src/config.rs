use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::net::{GITHUB_API, TieBreak};
use crate::step::{Stage, VendorInstaller};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default filter for the diagnostic log; `--verbose` and `RUST_LOG` override it
    pub log_level: Option<String>,
    pub paths: PathsConfig,
    pub network: NetworkConfig,
    pub stages: StagesConfig,
    pub manifest: Manifest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub home: PathBuf,
    /// Scratch downloads, the run log and the lock file live here
    pub downloads: PathBuf,
    pub log_file: String,
    pub lock_file: String,
    /// Locale definitions `locale-gen` reads
    pub locale_gen: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        let downloads = dirs::download_dir().unwrap_or_else(|| home.join("Downloads"));
        Self {
            home,
            downloads,
            log_file: "provisr.log".to_string(),
            lock_file: "provisr.lock".to_string(),
            locale_gen: PathBuf::from("/etc/locale.gen"),
        }
    }
}

impl PathsConfig {
    pub fn log_path(&self) -> PathBuf {
        self.downloads.join(&self.log_file)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.downloads.join(&self.lock_file)
    }

    /// Expand a leading `~` to the configured home directory
    pub fn expand(&self, path: &str) -> PathBuf {
        if path == "~" {
            self.home.clone()
        } else if let Some(rest) = path.strip_prefix("~/") {
            self.home.join(rest)
        } else {
            PathBuf::from(path)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Per-attempt timeout for downloads and API calls
    pub timeout_ms: u64,
    /// Total attempts per download
    pub attempts: u32,
    pub backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub github_api: String,
    /// Environment variable holding an optional GitHub token
    pub github_token_env: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 120000,
            attempts: 3,
            backoff_ms: 2000,
            max_backoff_ms: 30000,
            github_api: GITHUB_API.to_string(),
            github_token_env: "GITHUB_TOKEN".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StagesConfig {
    pub virtualization: bool,
    pub kernel: bool,
    pub disabled: Vec<Stage>,
}

impl Default for StagesConfig {
    fn default() -> Self {
        Self {
            virtualization: false,
            kernel: true,
            disabled: Vec::new(),
        }
    }
}

/// Declarative description of what a provisioned desktop looks like
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Manifest {
    /// Account that gets shells, groups and dotfiles; defaults to `$USER`
    pub user: Option<String>,
    pub remove: Vec<String>,
    pub packages: Vec<String>,
    pub backports: Option<BackportsConfig>,
    pub repositories: Vec<RepositoryConfig>,
    pub releases: Vec<ReleaseConfig>,
    pub debs: Vec<DebConfig>,
    pub neovim: Option<NeovimConfig>,
    pub shell: ShellConfig,
    pub vendor_installers: Vec<VendorConfig>,
    pub dotfiles: Option<DotfilesConfig>,
    pub gnome: GnomeConfig,
    pub locales: Vec<String>,
    pub virtualization: VirtualizationConfig,
    pub extra_steps: Vec<ExtraStepConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackportsConfig {
    pub suite: String,
    pub packages: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    pub name: String,
    pub key_url: String,
    /// Source line; `{keyring}` is replaced with the keyring path
    pub entry: String,
    pub dearmor: bool,
    pub packages: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReleaseConfig {
    pub repo: String,
    pub pattern: String,
    /// Package name the .deb installs, used to skip when present
    pub package: String,
    pub tie_break: TieBreak,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DebConfig {
    pub package: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NeovimConfig {
    pub repo: String,
    pub branch: String,
    pub src_dir: String,
    pub build_type: String,
    pub build_deps: Vec<String>,
    pub binary: PathBuf,
}

impl Default for NeovimConfig {
    fn default() -> Self {
        Self {
            repo: "https://github.com/neovim/neovim".to_string(),
            branch: "stable".to_string(),
            src_dir: "~/.local/src/neovim".to_string(),
            build_type: "Release".to_string(),
            build_deps: ["ninja-build", "gettext", "cmake", "unzip", "curl", "build-essential"]
                .into_iter()
                .map(String::from)
                .collect(),
            binary: PathBuf::from("/usr/local/bin/nvim"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    /// Login shell to switch the user to, e.g. `/usr/bin/zsh`
    pub login_shell: Option<String>,
    pub packages: Vec<String>,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            login_shell: Some("/usr/bin/zsh".to_string()),
            packages: vec!["zsh".to_string(), "fish".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VendorConfig {
    #[serde(flatten)]
    pub installer: VendorInstaller,
    pub stage: Stage,
    /// Skip when this path exists (`~` expands to home)
    pub creates: Option<String>,
    /// Skip when this package is installed
    pub package: Option<String>,
    pub follow_up: Option<String>,
}

impl Default for VendorConfig {
    fn default() -> Self {
        Self {
            installer: VendorInstaller::default(),
            stage: Stage::Extra,
            creates: None,
            package: None,
            follow_up: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DotfilesConfig {
    pub repo: String,
    pub branch: Option<String>,
    pub dest: String,
    /// Stow packages (top-level directories of the repo)
    pub packages: Vec<String>,
}

impl Default for DotfilesConfig {
    fn default() -> Self {
        Self {
            repo: String::new(),
            branch: None,
            dest: "~/.dotfiles".to_string(),
            packages: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GnomeConfig {
    pub packages: Vec<String>,
    /// Extension UUIDs to enable
    pub extensions: Vec<String>,
}

impl Default for GnomeConfig {
    fn default() -> Self {
        Self {
            packages: vec![
                "gnome-shell-extension-appindicator".to_string(),
                "gnome-shell-extension-dashtodock".to_string(),
                "gnome-tweaks".to_string(),
            ],
            extensions: vec![
                "appindicatorsupport@rgcjonas.gmail.com".to_string(),
                "dash-to-dock@micxgx.gmail.com".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VirtualizationConfig {
    pub packages: Vec<String>,
    pub groups: Vec<String>,
    pub service: String,
}

impl Default for VirtualizationConfig {
    fn default() -> Self {
        Self {
            packages: [
                "qemu-system-x86",
                "qemu-utils",
                "libvirt-daemon-system",
                "libvirt-clients",
                "virt-manager",
                "bridge-utils",
                "ovmf",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            groups: vec!["libvirt".to_string(), "kvm".to_string()],
            service: "libvirtd".to_string(),
        }
    }
}

/// A free-form step expressed as data
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtraStepConfig {
    pub name: String,
    pub description: Option<String>,
    pub stage: Stage,
    pub commands: Vec<crate::exec::CommandSpec>,
    pub creates: Option<String>,
    pub fatal: bool,
    pub follow_up: Option<String>,
}

impl Default for ExtraStepConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            description: None,
            stage: Stage::Extra,
            commands: Vec::new(),
            creates: None,
            fatal: false,
            follow_up: None,
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn vendor(name: &str, url: &str, stage: Stage) -> VendorConfig {
    VendorConfig {
        installer: VendorInstaller {
            name: name.to_string(),
            url: url.to_string(),
            interpreter: "sh".to_string(),
            ..Default::default()
        },
        stage,
        ..Default::default()
    }
}

impl Default for Manifest {
    fn default() -> Self {
        let mut oh_my_zsh = vendor(
            "oh-my-zsh",
            "https://raw.githubusercontent.com/ohmyzsh/ohmyzsh/master/tools/install.sh",
            Stage::Shell,
        );
        oh_my_zsh.installer.args = strings(&["--unattended"]);
        oh_my_zsh.installer.env = BTreeMap::from([
            ("RUNZSH".to_string(), "no".to_string()),
            ("CHSH".to_string(), "no".to_string()),
            ("KEEP_ZSHRC".to_string(), "yes".to_string()),
        ]);
        oh_my_zsh.creates = Some("~/.oh-my-zsh".to_string());

        let mut starship = vendor("starship", "https://starship.rs/install.sh", Stage::Shell);
        starship.installer.args = strings(&["--yes"]);
        starship.installer.elevated = true;
        starship.creates = Some("/usr/local/bin/starship".to_string());

        let mut liquorix = vendor("liquorix-kernel", "https://liquorix.net/install-liquorix.sh", Stage::Kernel);
        liquorix.installer.interpreter = "bash".to_string();
        liquorix.installer.elevated = true;
        liquorix.package = Some("linux-image-liquorix-amd64".to_string());
        liquorix.follow_up = Some("Reboot to boot the Liquorix kernel".to_string());

        Self {
            user: None,
            remove: strings(&[
                "gnome-2048",
                "aisleriot",
                "five-or-more",
                "four-in-a-row",
                "gnome-chess",
                "gnome-klotski",
                "gnome-mahjongg",
                "gnome-mines",
                "gnome-nibbles",
                "gnome-robots",
                "gnome-sudoku",
                "gnome-tetravex",
                "hitori",
                "iagno",
                "lightsoff",
                "quadrapassel",
                "swell-foop",
                "tali",
                "evolution",
                "rhythmbox",
            ]),
            packages: strings(&[
                "build-essential",
                "curl",
                "wget",
                "git",
                "gpg",
                "stow",
                "htop",
                "tmux",
                "fzf",
                "unzip",
                "jq",
                "ca-certificates",
                "apt-transport-https",
                "flatpak",
                "fonts-firacode",
            ]),
            backports: None,
            repositories: vec![
                RepositoryConfig {
                    name: "brave-browser".to_string(),
                    key_url: "https://brave-browser-apt-release.s3.brave.com/brave-browser-archive-keyring.gpg"
                        .to_string(),
                    entry: "deb [arch=amd64 signed-by={keyring}] https://brave-browser-apt-release.s3.brave.com/ stable main"
                        .to_string(),
                    dearmor: false,
                    packages: strings(&["brave-browser"]),
                },
                RepositoryConfig {
                    name: "vscode".to_string(),
                    key_url: "https://packages.microsoft.com/keys/microsoft.asc".to_string(),
                    entry: "deb [arch=amd64 signed-by={keyring}] https://packages.microsoft.com/repos/code stable main"
                        .to_string(),
                    dearmor: true,
                    packages: strings(&["code"]),
                },
            ],
            releases: vec![
                ReleaseConfig {
                    repo: "sharkdp/bat".to_string(),
                    pattern: "bat_*_amd64.deb".to_string(),
                    package: "bat".to_string(),
                    tie_break: TieBreak::Reject,
                },
                ReleaseConfig {
                    repo: "sharkdp/fd".to_string(),
                    pattern: "fd_*_amd64.deb".to_string(),
                    package: "fd".to_string(),
                    tie_break: TieBreak::Reject,
                },
                ReleaseConfig {
                    repo: "BurntSushi/ripgrep".to_string(),
                    pattern: "ripgrep_*_amd64.deb".to_string(),
                    package: "ripgrep".to_string(),
                    tie_break: TieBreak::Reject,
                },
                ReleaseConfig {
                    repo: "dandavison/delta".to_string(),
                    pattern: "git-delta_*_amd64.deb".to_string(),
                    package: "git-delta".to_string(),
                    tie_break: TieBreak::Reject,
                },
            ],
            debs: Vec::new(),
            neovim: Some(NeovimConfig::default()),
            shell: ShellConfig::default(),
            vendor_installers: vec![oh_my_zsh, starship, liquorix],
            dotfiles: None,
            gnome: GnomeConfig::default(),
            locales: strings(&["en_US.UTF-8 UTF-8"]),
            virtualization: VirtualizationConfig::default(),
            extra_steps: Vec::new(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            paths: PathsConfig::default(),
            network: NetworkConfig::default(),
            stages: StagesConfig::default(),
            manifest: Manifest::default(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let project_name = env!("CARGO_PKG_NAME");
        let mut candidates = Vec::new();
        // Primary location: ~/.config/<project>/<project>.yml
        if let Some(config_dir) = dirs::config_dir() {
            candidates.push(config_dir.join(project_name).join(format!("{}.yml", project_name)));
        }
        // Fallback location: ./<project>.yml
        candidates.push(PathBuf::from(format!("{}.yml", project_name)));

        Self::load_first(&candidates)
    }

    /// Load the first candidate that exists. A file that exists but cannot be
    /// read or parsed is an error, never a silent switch to the defaults.
    fn load_first(candidates: &[PathBuf]) -> Result<Self> {
        for candidate in candidates {
            if candidate.exists() {
                return Self::load_from_file(candidate)
                    .context(format!("Failed to load config from {}", candidate.display()));
            }
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Filter for the diagnostic log when `RUST_LOG` is unset
    pub fn log_filter(&self, verbose: bool) -> &str {
        if verbose {
            "debug"
        } else {
            self.log_level.as_deref().filter(|l| !l.trim().is_empty()).unwrap_or("info")
        }
    }

    /// The account being provisioned.
    ///
    /// Without `manifest.user` this is the invoking account, the same one whose
    /// `$HOME` backs `paths.home`. Runs under `sudo` are refused by the host
    /// check, so `SUDO_USER` never names a different target.
    pub fn user(&self) -> Option<String> {
        self.manifest
            .user
            .clone()
            .or_else(|| std::env::var("USER").ok())
            .filter(|u| !u.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.network.attempts, 3);
        assert_eq!(config.network.github_api, "https://api.github.com");
        assert!(!config.stages.virtualization);
        assert!(config.stages.kernel);
        assert!(config.paths.log_path().ends_with("provisr.log"));
        assert!(config.manifest.packages.contains(&"stow".to_string()));
        assert_eq!(config.manifest.vendor_installers.len(), 3);
    }

    #[test]
    fn test_expand_home() {
        let paths = PathsConfig {
            home: PathBuf::from("/home/alice"),
            ..Default::default()
        };
        assert_eq!(paths.expand("~"), PathBuf::from("/home/alice"));
        assert_eq!(paths.expand("~/.oh-my-zsh"), PathBuf::from("/home/alice/.oh-my-zsh"));
        assert_eq!(paths.expand("/usr/local/bin"), PathBuf::from("/usr/local/bin"));
        assert_eq!(paths.expand("~other"), PathBuf::from("~other"));
    }

    #[test]
    fn test_load_partial_yaml_keeps_defaults() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("provisr.yml");
        fs::write(
            &file,
            r#"
paths:
  downloads: /tmp/dl
network:
  attempts: 5
stages:
  virtualization: true
  disabled: [desktop, kernel]
manifest:
  user: alice
  packages: [git, stow]
  releases:
    - repo: sharkdp/bat
      pattern: "*_amd64.deb"
      package: bat
      tie_break: shortest-name
  vendor_installers:
    - name: rustup
      url: https://sh.rustup.rs
      interpreter: sh
      args: ["-y"]
      stage: extra
      creates: ~/.cargo/bin/rustup
  extra_steps:
    - name: flathub
      stage: desktop
      commands:
        - program: flatpak
          args: [remote-add, --if-not-exists, flathub, https://dl.flathub.org/repo/flathub.flatpakrepo]
          elevated: true
"#,
        )
        .unwrap();

        let config = Config::load(Some(&file)).unwrap();
        assert_eq!(config.paths.downloads, PathBuf::from("/tmp/dl"));
        assert_eq!(config.paths.lock_path(), PathBuf::from("/tmp/dl/provisr.lock"));
        assert_eq!(config.network.attempts, 5);
        assert_eq!(config.network.timeout_ms, 120000);
        assert!(config.stages.virtualization);
        assert_eq!(config.stages.disabled, vec![Stage::Desktop, Stage::Kernel]);
        assert_eq!(config.manifest.user.as_deref(), Some("alice"));
        assert_eq!(config.manifest.packages, vec!["git", "stow"]);
        assert_eq!(config.manifest.releases[0].tie_break, TieBreak::ShortestName);

        let rustup = &config.manifest.vendor_installers[0];
        assert_eq!(rustup.installer.name, "rustup");
        assert_eq!(rustup.installer.args, vec!["-y"]);
        assert!(!rustup.installer.elevated);
        assert_eq!(rustup.creates.as_deref(), Some("~/.cargo/bin/rustup"));

        let flathub = &config.manifest.extra_steps[0];
        assert_eq!(flathub.stage, Stage::Desktop);
        assert!(flathub.commands[0].elevated);
        assert_eq!(flathub.commands[0].args.len(), 4);

        // Untouched sections keep their defaults
        assert!(!config.manifest.remove.is_empty());
        assert_eq!(config.manifest.gnome.extensions.len(), 2);
    }

    #[test]
    fn test_load_invalid_yaml_fails() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("bad.yml");
        fs::write(&file, "stages: [not, a, map]").unwrap();
        assert!(Config::load(Some(&file)).is_err());
    }

    #[test]
    fn test_load_first_picks_existing_candidate() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("absent.yml");
        let present = dir.path().join("provisr.yml");
        fs::write(&present, "network:\n  attempts: 7\n").unwrap();

        let config = Config::load_first(&[missing, present]).unwrap();
        assert_eq!(config.network.attempts, 7);
    }

    #[test]
    fn test_load_first_malformed_file_is_an_error() {
        let dir = tempdir().unwrap();
        let broken = dir.path().join("provisr.yml");
        let later = dir.path().join("later.yml");
        fs::write(&broken, "manifest:\n  packages: {oops").unwrap();
        fs::write(&later, "network:\n  attempts: 7\n").unwrap();

        let err = Config::load_first(&[broken.clone(), later]).unwrap_err();
        assert!(format!("{:#}", err).contains(&broken.display().to_string()));
    }

    #[test]
    fn test_load_first_without_files_uses_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::load_first(&[dir.path().join("absent.yml")]).unwrap();
        assert_eq!(config.network.attempts, 3);
    }

    #[test]
    fn test_log_filter() {
        let mut config = Config::default();
        assert_eq!(config.log_filter(false), "info");
        config.log_level = Some("warn".to_string());
        assert_eq!(config.log_filter(false), "warn");
        assert_eq!(config.log_filter(true), "debug");
        config.log_level = None;
        assert_eq!(config.log_filter(false), "info");
    }

    #[test]
    fn test_user_prefers_manifest() {
        let mut config = Config::default();
        config.manifest.user = Some("bob".to_string());
        assert_eq!(config.user().as_deref(), Some("bob"));
    }
}
