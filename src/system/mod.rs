//! Host collaborators: package manager, git, prerequisite checks.

pub mod packages;
pub mod prereq;
pub mod vcs;

pub use packages::{Apt, PackageManager, PackageSource, PackageSpec};
pub use prereq::{HostCheck, REQUIRED_COMMANDS, acquire_sudo, find_in_path};
pub use vcs::{CloneOutcome, Git};
