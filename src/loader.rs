//! Page Loader: gets the page under test into the tab with the host API mock
//! already in place.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use chromiumoxide::Page;
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use url::Url;

use crate::error::{HarnessError, Result};
use crate::mock::MockSpec;
use crate::server::StaticServer;

/// Where the page under test comes from. Paths are relative to the pages
/// directory given to [`PageLoader::new`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PageSource {
    /// Navigate straight to the file, no server involved.
    File { path: PathBuf },
    /// Copy `entry` and `assets` into a scratch directory and serve it over
    /// loopback HTTP. An empty `assets` list copies the whole pages directory.
    Served {
        entry: PathBuf,
        #[serde(default)]
        assets: Vec<PathBuf>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        port: Option<u16>,
    },
}

impl PageSource {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File { path: path.into() }
    }

    pub fn served(entry: impl Into<PathBuf>, assets: &[&str]) -> Self {
        Self::Served {
            entry: entry.into(),
            assets: assets.iter().map(PathBuf::from).collect(),
            port: None,
        }
    }

    fn relative_paths(&self) -> Vec<&Path> {
        match self {
            Self::File { path } => vec![path.as_path()],
            Self::Served { entry, assets, .. } => std::iter::once(entry.as_path())
                .chain(assets.iter().map(PathBuf::as_path))
                .collect(),
        }
    }
}

pub struct PageLoader {
    pages_dir: PathBuf,
    source: PageSource,
    mock: MockSpec,
    scratch_dir: Option<PathBuf>,
}

impl PageLoader {
    pub fn new(pages_dir: impl Into<PathBuf>, source: PageSource, mock: MockSpec) -> Self {
        Self {
            pages_dir: pages_dir.into(),
            source,
            mock,
            scratch_dir: None,
        }
    }

    /// Stage served pages under `dir` instead of the system temp dir.
    pub fn with_scratch_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.scratch_dir = dir;
        self
    }

    /// Stage the assets and start the server if needed. Runs before the
    /// browser is launched so asset problems fail fast.
    pub async fn prepare(self) -> Result<PreparedPage> {
        self.mock.validate()?;
        for path in self.source.relative_paths() {
            ensure_relative(path)?;
        }

        match &self.source {
            PageSource::File { path } => {
                let entry = self.pages_dir.join(path);
                if !entry.is_file() {
                    return Err(HarnessError::MissingAsset { path: entry });
                }
                let entry = entry.canonicalize()?;
                let base = entry.parent().unwrap_or(Path::new("/")).to_path_buf();
                let urls = PageUrls {
                    entry: file_url(&entry)?,
                    base: directory_url(&base)?,
                };
                log::debug!("loading {} from disk", urls.entry);
                Ok(PreparedPage {
                    urls,
                    mock: self.mock,
                    server: None,
                    staging: None,
                })
            }
            PageSource::Served {
                entry,
                assets,
                port,
            } => {
                let pages_dir = self.pages_dir.clone();
                let scratch_dir = self.scratch_dir.clone();
                let files: Vec<PathBuf> = std::iter::once(entry).chain(assets.iter()).cloned().collect();
                let staging = tokio::task::spawn_blocking(move || {
                    stage_pages(&pages_dir, scratch_dir.as_deref(), &files)
                })
                .await
                .map_err(|e| HarnessError::Io(std::io::Error::other(e)))??;

                let server = StaticServer::start(staging.path(), port.unwrap_or(0)).await?;
                let entry = entry.to_string_lossy().replace('\\', "/");
                let urls = PageUrls {
                    entry: server.url(&entry),
                    base: server.url(""),
                };
                log::debug!(
                    "staged pages in {} and serving {}",
                    staging.path().display(),
                    urls.entry
                );
                Ok(PreparedPage {
                    urls,
                    mock: self.mock,
                    server: Some(server),
                    staging: Some(staging),
                })
            }
        }
    }
}

/// Entry and base URL of a prepared page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageUrls {
    pub entry: String,
    pub base: String,
}

impl PageUrls {
    /// The entry page, or a sibling of it.
    pub fn resolve(&self, path: Option<&str>) -> String {
        match path {
            None => self.entry.clone(),
            Some(path) => format!("{}{}", self.base, path.trim_start_matches('/')),
        }
    }
}

/// A page ready to load: assets staged, server (if any) accepting
/// connections. The scratch directory is removed on drop as well as on
/// [`PreparedPage::release`].
pub struct PreparedPage {
    urls: PageUrls,
    mock: MockSpec,
    server: Option<StaticServer>,
    staging: Option<TempDir>,
}

impl PreparedPage {
    pub fn urls(&self) -> &PageUrls {
        &self.urls
    }

    pub fn staging_dir(&self) -> Option<&Path> {
        self.staging.as_ref().map(TempDir::path)
    }

    /// Install the mock, then navigate. The mock script is registered for
    /// every new document, so later navigations keep it too.
    pub async fn load(&self, page: &Page, timeout: Duration) -> Result<()> {
        self.mock.install(page).await?;
        navigate(page, &self.urls.entry, timeout).await
    }

    /// Stop the server and remove the scratch directory. Problems are
    /// returned rather than raised so the rest of teardown still runs.
    pub async fn release(mut self) -> Vec<String> {
        let mut problems = Vec::new();
        if let Some(server) = self.server.take() {
            if let Err(err) = server.shutdown().await {
                problems.push(err);
            }
        }
        if let Some(staging) = self.staging.take() {
            let path = staging.path().to_path_buf();
            match tokio::task::spawn_blocking(move || staging.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => problems.push(format!("removing {}: {err}", path.display())),
                Err(err) => problems.push(format!("removing {}: {err}", path.display())),
            }
        }
        problems
    }
}

/// Navigate `page` to `url`, bounded by `timeout`.
pub async fn navigate(page: &Page, url: &str, timeout: Duration) -> Result<()> {
    match tokio::time::timeout(timeout, page.goto(url)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(err)) => Err(HarnessError::browser(&format!("navigating to {url}"), err)),
        Err(_) => Err(HarnessError::Browser(format!(
            "TimeoutError: navigating to {url} failed: timeout {}ms exceeded",
            timeout.as_millis()
        ))),
    }
}

fn ensure_relative(path: &Path) -> Result<()> {
    let escapes = path
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes || path.as_os_str().is_empty() {
        return Err(HarnessError::InvalidScenario(format!(
            "page path '{}' must be relative to the pages directory",
            path.display()
        )));
    }
    Ok(())
}

/// Copy `files[0]` (the entry) and the designated assets into a fresh
/// scratch directory. Only the entry given means the whole pages directory.
fn stage_pages(pages_dir: &Path, scratch_dir: Option<&Path>, files: &[PathBuf]) -> Result<TempDir> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("pagecheck-pages-");
    let staging = match scratch_dir {
        Some(dir) => {
            fs::create_dir_all(dir)?;
            builder.tempdir_in(dir)?
        }
        None => builder.tempdir()?,
    };
    match files {
        [entry] => {
            if !pages_dir.join(entry).is_file() {
                return Err(HarnessError::MissingAsset {
                    path: pages_dir.join(entry),
                });
            }
            copy_dir(pages_dir, staging.path())?;
        }
        _ => {
            for relative in files {
                stage_file(pages_dir, staging.path(), relative)?;
            }
        }
    }
    Ok(staging)
}

fn stage_file(pages_dir: &Path, staging: &Path, relative: &Path) -> Result<()> {
    let source = pages_dir.join(relative);
    if !source.is_file() {
        return Err(HarnessError::MissingAsset { path: source });
    }
    let target = staging.join(relative);
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(&source, &target)?;
    Ok(())
}

fn copy_dir(from: &Path, to: &Path) -> Result<()> {
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// `file://` URL for an absolute path, percent-encoded so `#`, `?` and `%`
/// in directory names stay part of the path.
pub fn file_url(path: &Path) -> Result<String> {
    Url::from_file_path(path)
        .map(String::from)
        .map_err(|()| HarnessError::InvalidScenario(format!("not an absolute path: {}", path.display())))
}

fn directory_url(path: &Path) -> Result<String> {
    Url::from_directory_path(path)
        .map(String::from)
        .map_err(|()| HarnessError::InvalidScenario(format!("not an absolute path: {}", path.display())))
}
