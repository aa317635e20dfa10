//! Idempotency predicates.
//!
//! A predicate answers "is this step's goal state already in place?". It only
//! reads. Evaluation errors never escape [`Predicate::is_satisfied`]: they are
//! logged and count as "not satisfied", so the (idempotent) action runs.

use futures::FutureExt;
use futures::future::BoxFuture;
use std::fmt;
use std::io::ErrorKind;
use std::path::PathBuf;

use crate::error::Result;
use crate::exec::CommandSpec;
use crate::toolbox::Toolbox;

#[derive(Debug, Clone)]
pub enum Predicate {
    /// The package database reports the package installed (any version)
    PackageInstalled(String),
    /// A file or directory exists
    PathExists(PathBuf),
    /// The file has a line equal to `marker` (surrounding whitespace ignored)
    FileContains { path: PathBuf, marker: String },
    /// A read-only query command exits 0
    CommandSucceeds(CommandSpec),
    /// A read-only query command prints `word` as a whitespace-separated token
    CommandOutputContains { command: CommandSpec, word: String },
    All(Vec<Predicate>),
    Any(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    /// Every package in `names` is installed
    pub fn packages_installed<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Predicate::All(names.into_iter().map(|n| Predicate::PackageInstalled(n.into())).collect())
    }

    /// None of the packages in `names` is installed
    pub fn packages_absent<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Predicate::Not(Box::new(Predicate::Any(
            names.into_iter().map(|n| Predicate::PackageInstalled(n.into())).collect(),
        )))
    }

    pub fn file_contains(path: impl Into<PathBuf>, marker: impl Into<String>) -> Self {
        Predicate::FileContains {
            path: path.into(),
            marker: marker.into(),
        }
    }

    /// Evaluate, failing closed: any error means "not satisfied"
    pub async fn is_satisfied(&self, tools: &Toolbox) -> bool {
        match self.evaluate(tools).await {
            Ok(satisfied) => satisfied,
            Err(e) => {
                log::warn!("predicate '{}' could not be evaluated, assuming not satisfied: {}", self, e);
                false
            }
        }
    }

    /// Evaluate and surface errors. `Not` propagates errors rather than
    /// inverting them, so failing closed holds through combinators.
    pub fn evaluate<'a>(&'a self, tools: &'a Toolbox) -> BoxFuture<'a, Result<bool>> {
        async move {
            match self {
                Predicate::PackageInstalled(name) => tools.packages.is_installed(name).await,
                Predicate::PathExists(path) => Ok(tokio::fs::try_exists(path).await?),
                Predicate::FileContains { path, marker } => {
                    match tokio::fs::read_to_string(path).await {
                        Ok(content) => Ok(content.lines().any(|l| l.trim() == marker.trim())),
                        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
                        Err(e) => Err(e.into()),
                    }
                }
                Predicate::CommandSucceeds(command) => Ok(tools.runner.run(command).await?.success()),
                Predicate::CommandOutputContains { command, word } => {
                    let output = tools.runner.run(command).await?;
                    Ok(output.success() && output.stdout.split_whitespace().any(|t| t == word))
                }
                Predicate::All(preds) => {
                    for p in preds {
                        if !p.evaluate(tools).await? {
                            return Ok(false);
                        }
                    }
                    Ok(true)
                }
                Predicate::Any(preds) => {
                    for p in preds {
                        if p.evaluate(tools).await? {
                            return Ok(true);
                        }
                    }
                    Ok(false)
                }
                Predicate::Not(inner) => Ok(!inner.evaluate(tools).await?),
            }
        }
        .boxed()
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::PackageInstalled(name) => write!(f, "installed({})", name),
            Predicate::PathExists(path) => write!(f, "exists({})", path.display()),
            Predicate::FileContains { path, marker } => {
                write!(f, "contains({}, {:?})", path.display(), marker)
            }
            Predicate::CommandSucceeds(cmd) => write!(f, "succeeds({})", cmd),
            Predicate::CommandOutputContains { command, word } => {
                write!(f, "output({}) has {:?}", command, word)
            }
            Predicate::All(preds) => write_list(f, "all", preds),
            Predicate::Any(preds) => write_list(f, "any", preds),
            Predicate::Not(inner) => write!(f, "not({})", inner),
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, name: &str, preds: &[Predicate]) -> fmt::Result {
    write!(f, "{}(", name)?;
    for (i, p) in preds.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", p)?;
    }
    write!(f, ")")
}
