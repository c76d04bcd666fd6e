use std::path::{Path, PathBuf};

use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, Result};
use crate::mock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Screenshot,
    Text,
    HostCalls,
}

impl ArtifactKind {
    fn extension(self) -> &'static str {
        match self {
            Self::Screenshot => "png",
            Self::Text => "txt",
            Self::HostCalls => "json",
        }
    }
}

/// One piece of evidence written to disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub checkpoint: String,
    pub kind: ArtifactKind,
    pub path: PathBuf,
    pub bytes: u64,
}

/// Writes checkpoint evidence under `<results>/<scenario>/`.
#[derive(Debug)]
pub struct EvidenceRecorder {
    dir: PathBuf,
    artifacts: Vec<Artifact>,
}

impl EvidenceRecorder {
    pub fn new(results_dir: &Path, scenario: &str) -> Result<Self> {
        let dir = results_dir.join(sanitize_name(scenario));
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            artifacts: Vec::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Everything written so far, in capture order.
    pub fn artifacts(&self) -> &[Artifact] {
        &self.artifacts
    }

    pub async fn screenshot(
        &mut self,
        page: &Page,
        checkpoint: &str,
        full_page: bool,
    ) -> Result<&Artifact> {
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .full_page(full_page)
            .build();
        let png = page
            .screenshot(params)
            .await
            .map_err(|e| HarnessError::browser(&format!("screenshot '{checkpoint}'"), e))?;
        self.write(checkpoint, ArtifactKind::Screenshot, &png).await
    }

    /// Record the `textContent` of the first element matching `selector`.
    pub async fn text(&mut self, page: &Page, selector: &str, checkpoint: &str) -> Result<String> {
        let selector_js = serde_json::to_string(selector)?;
        let expression = format!(
            "(() => {{ const el = document.querySelector({selector_js}); return el ? el.textContent : null; }})()"
        );
        let text: Option<String> = page
            .evaluate(expression)
            .await
            .map_err(|e| HarnessError::browser(&format!("reading text of {selector}"), e))?
            .into_value()
            .map_err(|e| HarnessError::browser(&format!("reading text of {selector}"), e))?;
        let text = text.ok_or_else(|| {
            HarnessError::step(
                format!("extract_text '{checkpoint}'"),
                format!("no element matches {selector}"),
            )
        })?;
        self.write_text(checkpoint, &text).await?;
        Ok(text)
    }

    pub async fn write_text(&mut self, checkpoint: &str, text: &str) -> Result<&Artifact> {
        self.write(checkpoint, ArtifactKind::Text, text.as_bytes())
            .await
    }

    /// Record every host API call the page made so far.
    pub async fn host_calls(&mut self, page: &Page, checkpoint: &str) -> Result<&Artifact> {
        let raw: String = page
            .evaluate(mock::calls_expression())
            .await
            .map_err(|e| HarnessError::browser("reading host API calls", e))?
            .into_value()
            .map_err(|e| HarnessError::browser("reading host API calls", e))?;
        let calls: serde_json::Value = serde_json::from_str(&raw)?;
        let pretty = serde_json::to_vec_pretty(&calls)?;
        self.write(checkpoint, ArtifactKind::HostCalls, &pretty).await
    }

    async fn write(&mut self, checkpoint: &str, kind: ArtifactKind, data: &[u8]) -> Result<&Artifact> {
        let name = sanitize_name(checkpoint);
        let path = self.dir.join(format!("{name}.{}", kind.extension()));
        tokio::fs::write(&path, data).await?;
        log::info!("saved {} ({} bytes)", path.display(), data.len());
        self.artifacts.push(Artifact {
            checkpoint: name,
            kind,
            path,
            bytes: data.len() as u64,
        });
        let index = self.artifacts.len() - 1;
        Ok(&self.artifacts[index])
    }
}

/// Keep `[A-Za-z0-9._-]`, replace anything else with `_`.
pub fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "checkpoint".to_string()
    } else {
        cleaned.to_string()
    }
}
