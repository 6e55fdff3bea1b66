//! Converges a file of declared resources, in declaration order.

use std::path::Path;

use anyhow::{Context, Result};
use dockhand_reconcile::{
    ConvergenceResult, DeclaredResource, ImageResult, ParseError, ResourceFile,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::executor::ActionExecutor;
use crate::images::ImageConverger;

/// Result for one declared resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Container(ConvergenceResult),
    Image(ImageResult),
    /// The declaration itself could not be resolved; nothing was attempted.
    Invalid { name: String, error: ParseError },
}

impl Outcome {
    pub fn name(&self) -> String {
        match self {
            Self::Container(result) => result.name.clone(),
            Self::Image(result) => result.image.to_string(),
            Self::Invalid { name, .. } => name.clone(),
        }
    }

    pub fn changed(&self) -> bool {
        match self {
            Self::Container(result) => result.changed,
            Self::Image(result) => result.changed,
            Self::Invalid { .. } => false,
        }
    }

    pub fn is_ok(&self) -> bool {
        match self {
            Self::Container(result) => result.is_ok(),
            Self::Image(result) => result.error.is_none(),
            Self::Invalid { .. } => false,
        }
    }

    /// Flattened view for output.
    pub fn report(&self) -> OutcomeReport {
        match self {
            Self::Container(result) => OutcomeReport {
                kind: "container",
                name: result.name.clone(),
                action: result.action.to_string(),
                changed: result.changed,
                state: Some(result.final_state.to_string()),
                image_id: None,
                error: result.error.as_ref().map(ToString::to_string),
                error_kind: result.error.as_ref().map(|e| e.kind().to_string()),
            },
            Self::Image(result) => OutcomeReport {
                kind: "image",
                name: result.image.to_string(),
                action: result.action.as_str().to_string(),
                changed: result.changed,
                state: None,
                image_id: result.image_id.clone(),
                error: result.error.as_ref().map(ToString::to_string),
                error_kind: result.error.as_ref().map(|e| e.kind().to_string()),
            },
            Self::Invalid { name, error } => OutcomeReport {
                kind: "invalid",
                name: name.clone(),
                action: "-".to_string(),
                changed: false,
                state: None,
                image_id: None,
                error: Some(error.to_string()),
                error_kind: Some("parse".to_string()),
            },
        }
    }
}

/// Serializable summary of an [`Outcome`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutcomeReport {
    pub kind: &'static str,
    pub name: String,
    pub action: String,
    pub changed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
}

/// Load a resource file from disk.
pub fn load_file(path: &Path) -> Result<ResourceFile> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read resource file {}", path.display()))?;
    parse_file(&contents).with_context(|| format!("invalid resource file {}", path.display()))
}

pub fn parse_file(contents: &str) -> Result<ResourceFile> {
    Ok(toml::from_str(contents)?)
}

/// Converges declared resources one at a time.
pub struct Converger {
    executor: ActionExecutor,
    images: ImageConverger,
}

impl Converger {
    pub fn new(executor: ActionExecutor, images: ImageConverger) -> Self {
        Self { executor, images }
    }

    /// Converge every resource in order. A failed resource does not stop
    /// the ones after it.
    pub async fn converge_all(&self, file: &ResourceFile) -> Vec<Outcome> {
        let mut outcomes = Vec::with_capacity(file.resource.len());
        for resource in &file.resource {
            outcomes.push(self.converge(resource).await);
        }

        let failed = outcomes.iter().filter(|o| !o.is_ok()).count();
        let changed = outcomes.iter().filter(|o| o.changed()).count();
        info!(
            resources = outcomes.len(),
            changed,
            failed,
            "Convergence pass complete"
        );
        outcomes
    }

    pub async fn converge(&self, resource: &DeclaredResource) -> Outcome {
        match resource {
            DeclaredResource::Container(declared) => match declared.resolve() {
                Ok(request) => Outcome::Container(self.executor.converge(&request).await),
                Err(error) => {
                    warn!(name = %declared.name, error = %error, "Invalid container declaration");
                    Outcome::Invalid {
                        name: declared.name.clone(),
                        error,
                    }
                }
            },
            DeclaredResource::Image(declared) => match declared.resolve() {
                Ok(request) => Outcome::Image(self.images.converge(&request).await),
                Err(error) => {
                    warn!(name = %declared.name, error = %error, "Invalid image declaration");
                    Outcome::Invalid {
                        name: declared.name.clone(),
                        error,
                    }
                }
            },
        }
    }
}
