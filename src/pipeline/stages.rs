//! Step definitions for each stage, built from the manifest.

use std::path::PathBuf;

use crate::config::{Config, ExtraStepConfig, VendorConfig};
use crate::exec::CommandSpec;
use crate::net::AssetSelector;
use crate::step::{Action, AptRepository, Predicate, Stage, Step};
use crate::system::PackageSpec;

const KEYRING_DIR: &str = "/usr/share/keyrings";
const SOURCES_DIR: &str = "/etc/apt/sources.list.d";

pub(crate) struct StageBuilder<'a> {
    config: &'a Config,
    user: Option<String>,
}

impl<'a> StageBuilder<'a> {
    pub(crate) fn new(config: &'a Config) -> Self {
        Self {
            config,
            user: config.user(),
        }
    }

    pub(crate) fn steps(&self, stage: Stage) -> Vec<Step> {
        let mut steps = match stage {
            Stage::Prepare => self.prepare(),
            Stage::Cleanup => self.cleanup(),
            Stage::Base => self.base(),
            Stage::Repositories => self.repositories(),
            Stage::Releases => self.releases(),
            Stage::Editor => self.editor(),
            Stage::Shell => self.shell(),
            Stage::Dotfiles => self.dotfiles(),
            Stage::Desktop => self.desktop(),
            Stage::Virtualization => self.virtualization(),
            Stage::Kernel | Stage::Extra => Vec::new(),
        };
        let manifest = &self.config.manifest;
        steps.extend(
            manifest
                .vendor_installers
                .iter()
                .filter(|v| v.stage == stage)
                .map(|v| self.vendor(v)),
        );
        steps.extend(manifest.extra_steps.iter().filter(|e| e.stage == stage).map(|e| self.extra(e)));
        steps
    }

    fn expand(&self, path: &str) -> PathBuf {
        self.config.paths.expand(path)
    }

    fn prepare(&self) -> Vec<Step> {
        let home = &self.config.paths.home;
        let dirs = vec![
            self.config.paths.downloads.clone(),
            home.join(".local").join("bin"),
            home.join(".local").join("src"),
            home.join(".config"),
        ];
        let exists = Predicate::All(dirs.iter().cloned().map(Predicate::PathExists).collect());
        vec![
            Step::new("prepare-directories", Stage::Prepare, Action::CreateDirs(dirs))
                .describe("Create working directories")
                .skip_when(exists)
                .fatal(),
        ]
    }

    fn cleanup(&self) -> Vec<Step> {
        let remove = &self.config.manifest.remove;
        if remove.is_empty() {
            return Vec::new();
        }
        vec![
            Step::new("remove-default-apps", Stage::Cleanup, Action::Remove(remove.clone()))
                .describe("Remove preinstalled applications")
                .skip_when(Predicate::packages_absent(remove.iter().cloned())),
        ]
    }

    fn base(&self) -> Vec<Step> {
        let manifest = &self.config.manifest;
        let mut steps = vec![
            Step::new("apt-update", Stage::Base, Action::UpdateIndex)
                .describe("Refresh the package index")
                .fatal(),
        ];

        if !manifest.packages.is_empty() {
            steps.push(
                Step::new("base-packages", Stage::Base, install_all(&manifest.packages))
                    .describe("Install base packages")
                    .skip_when(Predicate::packages_installed(manifest.packages.iter().cloned())),
            );
        }

        if let Some(backports) = &manifest.backports
            && !backports.packages.is_empty()
        {
            let pkgs = backports
                .packages
                .iter()
                .map(|p| PackageSpec::backports(p, &backports.suite))
                .collect();
            steps.push(
                Step::new("backports-packages", Stage::Base, Action::Install(pkgs))
                    .describe(format!("Install packages from {}", backports.suite))
                    .skip_when(Predicate::packages_installed(backports.packages.iter().cloned())),
            );
        }

        for deb in &manifest.debs {
            steps.push(
                Step::new(
                    format!("deb-{}", deb.package),
                    Stage::Base,
                    Action::Install(vec![PackageSpec::deb(&deb.package, &deb.url)]),
                )
                .describe(format!("Install {} from {}", deb.package, deb.url))
                .skip_when(Predicate::PackageInstalled(deb.package.clone())),
            );
        }

        if !manifest.locales.is_empty() {
            let locale_gen = self.config.paths.locale_gen.clone();
            let mut actions: Vec<Action> = manifest
                .locales
                .iter()
                .map(|l| Action::AppendLine {
                    path: locale_gen.clone(),
                    line: l.clone(),
                    elevated: true,
                })
                .collect();
            actions.push(Action::Run(vec![CommandSpec::new("locale-gen").elevated()]));
            steps.push(
                Step::new("locales", Stage::Base, Action::Sequence(actions))
                    .describe("Generate locales")
                    .skip_when(Predicate::All(
                        manifest
                            .locales
                            .iter()
                            .flat_map(|l| {
                                let mut checks = vec![Predicate::file_contains(&locale_gen, l)];
                                if let Some(name) = generated_locale_name(l) {
                                    checks.push(Predicate::CommandOutputContains {
                                        command: CommandSpec::new("locale").arg("-a"),
                                        word: name,
                                    });
                                }
                                checks
                            })
                            .collect(),
                    )),
            );
        }
        steps
    }

    fn repositories(&self) -> Vec<Step> {
        self.config
            .manifest
            .repositories
            .iter()
            .map(|r| {
                let keyring = PathBuf::from(KEYRING_DIR).join(format!("{}-archive-keyring.gpg", r.name));
                let list_file = PathBuf::from(SOURCES_DIR).join(format!("{}.list", r.name));
                let repo = AptRepository {
                    name: r.name.clone(),
                    key_url: r.key_url.clone(),
                    entry: r.entry.replace("{keyring}", &keyring.display().to_string()),
                    keyring,
                    list_file: list_file.clone(),
                    dearmor: r.dearmor,
                };
                let mut done = vec![Predicate::file_contains(&list_file, &repo.entry)];
                let mut actions = vec![Action::AddRepository(repo)];
                if !r.packages.is_empty() {
                    done.push(Predicate::packages_installed(r.packages.iter().cloned()));
                    actions.push(Action::UpdateIndex);
                    actions.push(install_all(&r.packages));
                }
                Step::new(format!("repo-{}", r.name), Stage::Repositories, Action::Sequence(actions))
                    .describe(format!("Add the {} repository", r.name))
                    .skip_when(Predicate::All(done))
            })
            .collect()
    }

    fn releases(&self) -> Vec<Step> {
        self.config
            .manifest
            .releases
            .iter()
            .map(|r| {
                Step::new(
                    format!("release-{}", r.package),
                    Stage::Releases,
                    Action::ReleaseDeb {
                        repo: r.repo.clone(),
                        selector: AssetSelector::new(&r.pattern).tie_break(r.tie_break),
                    },
                )
                .describe(format!("Install {} from the latest {} release", r.package, r.repo))
                .skip_when(Predicate::PackageInstalled(r.package.clone()))
            })
            .collect()
    }

    fn editor(&self) -> Vec<Step> {
        let Some(nvim) = &self.config.manifest.neovim else {
            return Vec::new();
        };
        let src = self.expand(&nvim.src_dir);
        let mut steps = Vec::new();
        if !nvim.build_deps.is_empty() {
            steps.push(
                Step::new("neovim-build-deps", Stage::Editor, install_all(&nvim.build_deps))
                    .describe("Install Neovim build dependencies")
                    .skip_when(Predicate::packages_installed(nvim.build_deps.iter().cloned())),
            );
        }
        let build = Action::Sequence(vec![
            Action::GitClone {
                url: nvim.repo.clone(),
                dest: src.clone(),
                depth: Some(1),
                branch: Some(nvim.branch.clone()),
            },
            Action::Run(vec![
                CommandSpec::new("make")
                    .arg(format!("CMAKE_BUILD_TYPE={}", nvim.build_type))
                    .cwd(&src),
                CommandSpec::new("make").arg("install").cwd(&src).elevated(),
            ]),
        ]);
        steps.push(
            Step::new("neovim", Stage::Editor, build)
                .describe(format!("Build Neovim ({}) from source", nvim.branch))
                .skip_when(Predicate::PathExists(nvim.binary.clone())),
        );
        steps
    }

    fn shell(&self) -> Vec<Step> {
        let shell = &self.config.manifest.shell;
        let mut steps = Vec::new();
        if !shell.packages.is_empty() {
            steps.push(
                Step::new("shell-packages", Stage::Shell, install_all(&shell.packages))
                    .describe("Install shells")
                    .skip_when(Predicate::packages_installed(shell.packages.iter().cloned())),
            );
        }
        if let Some(login) = &shell.login_shell {
            match &self.user {
                Some(user) => {
                    let current = CommandSpec::new("sh").args(["-c", "getent passwd \"$1\" | cut -d: -f7", "sh", user.as_str()]);
                    steps.push(
                        Step::new(
                            "login-shell",
                            Stage::Shell,
                            Action::Run(vec![CommandSpec::new("chsh").args(["-s", login.as_str(), user.as_str()]).elevated()]),
                        )
                        .describe(format!("Make {} the login shell of {}", login, user))
                        .skip_when(Predicate::CommandOutputContains {
                            command: current,
                            word: login.clone(),
                        })
                        .follow_up("Log out and back in to start the new login shell"),
                    );
                }
                None => log::warn!("no user to change the login shell for; skipping login-shell"),
            }
        }
        steps
    }

    fn dotfiles(&self) -> Vec<Step> {
        let Some(dotfiles) = &self.config.manifest.dotfiles else {
            return Vec::new();
        };
        if dotfiles.repo.is_empty() {
            return Vec::new();
        }
        let dest = self.expand(&dotfiles.dest);
        let mut steps = vec![
            Step::new(
                "dotfiles-clone",
                Stage::Dotfiles,
                Action::GitClone {
                    url: dotfiles.repo.clone(),
                    dest: dest.clone(),
                    depth: None,
                    branch: dotfiles.branch.clone(),
                },
            )
            .describe("Clone dotfiles")
            .skip_when(Predicate::PathExists(dest.join(".git"))),
        ];
        if !dotfiles.packages.is_empty() {
            // --restow re-links in place, so repeated runs leave the same links
            let stow = CommandSpec::new("stow")
                .arg("--restow")
                .arg("-d")
                .arg(dest.display().to_string())
                .arg("-t")
                .arg(self.config.paths.home.display().to_string())
                .args(dotfiles.packages.iter().cloned());
            steps.push(
                Step::new("dotfiles-link", Stage::Dotfiles, Action::Run(vec![stow]))
                    .describe(format!("Link dotfiles: {}", dotfiles.packages.join(", "))),
            );
        }
        steps
    }

    fn desktop(&self) -> Vec<Step> {
        let gnome = &self.config.manifest.gnome;
        let mut steps = Vec::new();
        if !gnome.packages.is_empty() {
            steps.push(
                Step::new("gnome-packages", Stage::Desktop, install_all(&gnome.packages))
                    .describe("Install GNOME extensions and tools")
                    .skip_when(Predicate::packages_installed(gnome.packages.iter().cloned())),
            );
        }
        for uuid in &gnome.extensions {
            steps.push(
                Step::new(
                    format!("gnome-extension-{}", uuid),
                    Stage::Desktop,
                    Action::Run(vec![CommandSpec::new("gnome-extensions").args(["enable", uuid.as_str()])]),
                )
                .describe(format!("Enable GNOME extension {}", uuid))
                .skip_when(Predicate::CommandOutputContains {
                    command: CommandSpec::new("gnome-extensions").args(["list", "--enabled"]),
                    word: uuid.clone(),
                }),
            );
        }
        steps
    }

    fn virtualization(&self) -> Vec<Step> {
        let virt = &self.config.manifest.virtualization;
        let mut steps = Vec::new();
        if !virt.packages.is_empty() {
            steps.push(
                Step::new("virtualization-packages", Stage::Virtualization, install_all(&virt.packages))
                    .describe("Install QEMU/KVM and libvirt")
                    .skip_when(Predicate::packages_installed(virt.packages.iter().cloned())),
            );
        }
        if !virt.service.is_empty() {
            steps.push(
                Step::new(
                    "virtualization-service",
                    Stage::Virtualization,
                    Action::Run(vec![
                        CommandSpec::new("systemctl")
                            .args(["enable", "--now", virt.service.as_str()])
                            .elevated(),
                    ]),
                )
                .describe(format!("Enable {}", virt.service))
                .skip_when(Predicate::CommandSucceeds(
                    CommandSpec::new("systemctl").args(["is-enabled", "--quiet", virt.service.as_str()]),
                )),
            );
        }
        match (&self.user, virt.groups.is_empty()) {
            (_, true) => {}
            (Some(user), false) => {
                let groups = virt.groups.join(",");
                let member = |group: &String| Predicate::CommandOutputContains {
                    command: CommandSpec::new("id").args(["-nG", user.as_str()]),
                    word: group.clone(),
                };
                steps.push(
                    Step::new(
                        "virtualization-groups",
                        Stage::Virtualization,
                        Action::Run(vec![
                            CommandSpec::new("usermod")
                                .args(["-aG", groups.as_str(), user.as_str()])
                                .elevated(),
                        ]),
                    )
                    .describe(format!("Add {} to {}", user, virt.groups.join(", ")))
                    .skip_when(Predicate::All(virt.groups.iter().map(member).collect()))
                    .follow_up(format!(
                        "Log out and back in for membership in {} to apply",
                        virt.groups.join(", ")
                    )),
                );
            }
            (None, false) => log::warn!("no user to add to virtualization groups; skipping"),
        }
        steps
    }

    fn vendor(&self, vendor: &VendorConfig) -> Step {
        let mut done = Vec::new();
        if let Some(path) = &vendor.creates {
            done.push(Predicate::PathExists(self.expand(path)));
        }
        if let Some(package) = &vendor.package {
            done.push(Predicate::PackageInstalled(package.clone()));
        }
        let mut step = Step::new(
            format!("vendor-{}", vendor.installer.name),
            vendor.stage,
            Action::VendorInstaller(vendor.installer.clone()),
        )
        .describe(format!("Run the {} installer", vendor.installer.name));
        if !done.is_empty() {
            step = step.skip_when(Predicate::All(done));
        }
        if let Some(note) = &vendor.follow_up {
            step = step.follow_up(note);
        }
        step
    }

    fn extra(&self, extra: &ExtraStepConfig) -> Step {
        let mut step = Step::new(&extra.name, extra.stage, Action::Run(extra.commands.clone()));
        if let Some(description) = &extra.description {
            step = step.describe(description);
        }
        if let Some(path) = &extra.creates {
            step = step.skip_when(Predicate::PathExists(self.expand(path)));
        }
        if extra.fatal {
            step = step.fatal();
        }
        if let Some(note) = &extra.follow_up {
            step = step.follow_up(note);
        }
        step
    }
}

fn install_all(names: &[String]) -> Action {
    Action::Install(names.iter().map(PackageSpec::new).collect())
}

/// Name `locale -a` lists for a `locale.gen` entry: `en_US.UTF-8 UTF-8`
/// becomes `en_US.utf8`
fn generated_locale_name(entry: &str) -> Option<String> {
    let name = entry.split_whitespace().next()?;
    Some(match name.split_once('.') {
        Some((lang, codeset)) => {
            let codeset: String = codeset
                .chars()
                .filter(|c| c.is_ascii_alphanumeric())
                .map(|c| c.to_ascii_lowercase())
                .collect();
            format!("{}.{}", lang, codeset)
        }
        None => name.to_string(),
    })
}
