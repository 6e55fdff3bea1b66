//! Image converger for declared image resources.

use std::sync::Arc;

use dockhand_reconcile::{ImageAction, ImageRequest, ImageResult, ParseError, ReconcileError};
use tracing::{debug, info, warn};

use crate::runtime::Runtime;

/// Pulls and builds declared images.
#[derive(Clone)]
pub struct ImageConverger {
    runtime: Arc<dyn Runtime>,
}

impl ImageConverger {
    pub fn new(runtime: Arc<dyn Runtime>) -> Self {
        Self { runtime }
    }

    /// Converge one declared image.
    pub async fn converge(&self, request: &ImageRequest) -> ImageResult {
        info!(image = %request.image, action = request.action.as_str(), "Converging image");

        let mut changed = false;
        let outcome = self.apply(request, &mut changed).await;
        match outcome {
            Ok(image_id) => ImageResult {
                image: request.image.clone(),
                action: request.action,
                changed,
                image_id,
                error: None,
            },
            Err(err) => {
                warn!(image = %request.image, error = %err, "Image convergence failed");
                ImageResult {
                    image: request.image.clone(),
                    action: request.action,
                    changed,
                    image_id: None,
                    error: Some(err),
                }
            }
        }
    }

    async fn apply(
        &self,
        request: &ImageRequest,
        changed: &mut bool,
    ) -> Result<Option<String>, ReconcileError> {
        let reference = request.image.to_string();
        let before = self
            .runtime
            .inspect_image(&reference)
            .await?
            .map(|image| image.id);

        match request.action {
            ImageAction::PullIfMissing | ImageAction::BuildIfMissing if before.is_some() => {
                debug!(image = %request.image, "Image already present");
                return Ok(before);
            }
            ImageAction::Pull | ImageAction::PullIfMissing => {
                self.runtime.pull(&request.image).await?;
                info!(image = %request.image, "Pulled image");
            }
            ImageAction::Build | ImageAction::BuildIfMissing => {
                let source = request.source.as_deref().ok_or(ParseError::Empty {
                    property: "source",
                })?;
                let id = self.runtime.build(source, &request.image).await?;
                info!(image = %request.image, id = %id, "Built image");
            }
        }

        let after = self
            .runtime
            .inspect_image(&reference)
            .await?
            .map(|image| image.id);
        *changed = after != before;
        Ok(after)
    }
}
