use std::path::{Path, PathBuf};
use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::error::CdpError;
use chromiumoxide::fetcher::{BrowserFetcher, BrowserFetcherOptions};
use chromiumoxide::Page;
use futures::StreamExt;
use tempfile::TempDir;

use crate::error::{HarnessError, Result};

const LAUNCH_TIMEOUT: Duration = Duration::from_secs(30);
const PAGE_CREATE_TIMEOUT: Duration = Duration::from_secs(10);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Find the Chrome or Edge binary on the system.
pub fn find_chrome_binary() -> Result<PathBuf> {
    // Check well-known paths first
    if let Some(candidate) = chrome_candidates().into_iter().find(|c| c.exists()) {
        return Ok(candidate);
    }

    // Fallback to PATH search
    for name in [
        "google-chrome-stable",
        "google-chrome",
        "chromium",
        "chromium-browser",
        "microsoft-edge",
    ] {
        if let Ok(path) = which::which(name) {
            return Ok(path);
        }
    }

    Err(HarnessError::Browser(
        "could not find Chrome or Edge binary; install Chrome, pass --chrome, or use --fetch-chromium"
            .to_string(),
    ))
}

#[cfg(target_os = "macos")]
fn chrome_candidates() -> Vec<PathBuf> {
    vec![
        PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome"),
        PathBuf::from("/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge"),
        PathBuf::from("/Applications/Chromium.app/Contents/MacOS/Chromium"),
    ]
}

#[cfg(target_os = "windows")]
fn chrome_candidates() -> Vec<PathBuf> {
    let program_files =
        std::env::var("PROGRAMFILES").unwrap_or_else(|_| "C:\\Program Files".to_string());
    let program_files_x86 = std::env::var("PROGRAMFILES(X86)")
        .unwrap_or_else(|_| "C:\\Program Files (x86)".to_string());
    vec![
        PathBuf::from(&program_files).join("Google\\Chrome\\Application\\chrome.exe"),
        PathBuf::from(&program_files_x86).join("Google\\Chrome\\Application\\chrome.exe"),
        PathBuf::from(&program_files).join("Microsoft\\Edge\\Application\\msedge.exe"),
        PathBuf::from(&program_files_x86).join("Microsoft\\Edge\\Application\\msedge.exe"),
    ]
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn chrome_candidates() -> Vec<PathBuf> {
    vec![
        PathBuf::from("/usr/bin/google-chrome-stable"),
        PathBuf::from("/usr/bin/google-chrome"),
        PathBuf::from("/usr/bin/chromium-browser"),
        PathBuf::from("/usr/bin/chromium"),
    ]
}

/// Download a Chromium build into `cache_dir` (skipped when already cached)
/// and return its executable.
pub async fn fetch_chromium(cache_dir: &Path) -> Result<PathBuf> {
    tokio::fs::create_dir_all(cache_dir).await?;
    let options = BrowserFetcherOptions::builder()
        .with_path(cache_dir)
        .build()
        .map_err(|e| HarnessError::Browser(format!("invalid fetcher options: {e}")))?;
    let info = BrowserFetcher::new(options)
        .fetch()
        .await
        .map_err(|e| HarnessError::Browser(format!("failed to fetch Chromium: {e}")))?;
    log::info!("using fetched Chromium at {}", info.executable_path.display());
    Ok(info.executable_path)
}

/// Default download location for `fetch_chromium`.
pub fn default_fetch_dir() -> PathBuf {
    std::env::temp_dir().join("pagecheck-chromium")
}

#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub chrome_path: PathBuf,
    pub headed: bool,
    /// Label used in log lines from the handler loop.
    pub label: String,
    /// Parent of the throwaway profile; the system temp dir when unset.
    pub scratch_dir: Option<PathBuf>,
}

/// One browser process with its own throwaway profile.
pub struct BrowserSession {
    browser: Browser,
    handler: tokio::task::JoinHandle<()>,
    profile: Option<TempDir>,
    label: String,
}

impl BrowserSession {
    /// Launch Chrome/Edge against a fresh profile directory.
    ///
    /// The chromiumoxide event handler loop runs on a spawned task for the
    /// life of the session.
    pub async fn launch(options: LaunchOptions) -> Result<Self> {
        let mut profile = tempfile::Builder::new();
        profile.prefix("pagecheck-profile-");
        let profile = match &options.scratch_dir {
            Some(dir) => {
                tokio::fs::create_dir_all(dir).await?;
                profile.tempdir_in(dir)?
            }
            None => profile.tempdir()?,
        };

        let mut builder = BrowserConfig::builder()
            .chrome_executable(&options.chrome_path)
            .user_data_dir(profile.path())
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-extensions")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .launch_timeout(LAUNCH_TIMEOUT);
        if options.headed {
            builder = builder.with_head();
        }
        let config = builder
            .build()
            .map_err(|e| HarnessError::Browser(format!("failed to build browser config: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| HarnessError::browser("launching browser", e))?;

        let label = options.label.clone();
        let handler = tokio::spawn(async move {
            log::debug!("[{label}] handler loop starting");
            let mut count = 0u64;
            loop {
                match handler.next().await {
                    Some(Ok(())) => count += 1,
                    Some(Err(err)) => match &err {
                        // Fatal: underlying transport or process is gone.
                        CdpError::Ws(_)
                        | CdpError::Io(_)
                        | CdpError::ChannelSendError(_)
                        | CdpError::LaunchExit(_, _)
                        | CdpError::LaunchTimeout(_)
                        | CdpError::LaunchIo(_, _) => {
                            log::debug!("[{label}] fatal handler error after {count} events: {err}");
                            break;
                        }
                        _ => {
                            log::debug!("[{label}] non-fatal handler error after {count} events: {err}");
                        }
                    },
                    None => {
                        log::debug!("[{label}] handler stream ended after {count} events");
                        break;
                    }
                }
            }
        });

        log::info!(
            "[{}] launched {} ({})",
            options.label,
            options.chrome_path.display(),
            if options.headed { "headed" } else { "headless" }
        );
        Ok(Self {
            browser,
            handler,
            profile: Some(profile),
            label: options.label,
        })
    }

    /// Get the tab the scenario drives.
    ///
    /// Chromium usually starts with a tab already open; attach to it rather
    /// than creating a new target.
    pub async fn open_page(&mut self) -> Result<Page> {
        self.browser
            .fetch_targets()
            .await
            .map_err(|e| HarnessError::browser("fetching targets", e))?;

        let existing = self
            .browser
            .pages()
            .await
            .map_err(|e| HarnessError::browser("listing pages", e))?;
        if let Some(page) = existing.into_iter().next() {
            return Ok(page);
        }

        match tokio::time::timeout(PAGE_CREATE_TIMEOUT, self.browser.new_page("about:blank")).await
        {
            Ok(Ok(page)) => Ok(page),
            Ok(Err(err)) => Err(HarnessError::browser("creating initial page", err)),
            Err(_) => Err(HarnessError::Browser(format!(
                "timed out after {}s creating initial page (about:blank)",
                PAGE_CREATE_TIMEOUT.as_secs()
            ))),
        }
    }

    /// Shut the browser down: graceful close, bounded wait, then kill.
    /// Returns the problems hit along the way instead of failing, so the
    /// remaining teardown still runs.
    pub async fn close(mut self) -> Vec<String> {
        let mut problems = Vec::new();

        match tokio::time::timeout(CLOSE_TIMEOUT, self.browser.close()).await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => problems.push(format!("browser close: {err}")),
            Err(_) => problems.push(format!(
                "browser close: no reply after {}s",
                CLOSE_TIMEOUT.as_secs()
            )),
        }

        let exited = matches!(
            tokio::time::timeout(CLOSE_TIMEOUT, self.browser.wait()).await,
            Ok(Ok(_))
        );
        if !exited {
            problems.push(format!(
                "browser did not exit within {}s; killed",
                CLOSE_TIMEOUT.as_secs()
            ));
            if let Some(Err(err)) = self.browser.kill().await {
                problems.push(format!("browser kill: {err}"));
            }
        }

        if tokio::time::timeout(CLOSE_TIMEOUT, &mut self.handler)
            .await
            .is_err()
        {
            self.handler.abort();
        }

        if let Some(profile) = self.profile.take() {
            let path = profile.path().to_path_buf();
            match tokio::task::spawn_blocking(move || profile.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => problems.push(format!("removing profile {}: {err}", path.display())),
                Err(err) => problems.push(format!("removing profile {}: {err}", path.display())),
            }
        }

        for problem in &problems {
            log::warn!("[{}] teardown: {problem}", self.label);
        }
        problems
    }
}
