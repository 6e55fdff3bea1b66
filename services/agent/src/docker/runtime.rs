//! `Runtime` implementation backed by the Docker Engine API.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use dockhand_reconcile::{ContainerSpec, ImageRef};
use tracing::{debug, info};

use super::api::{encode_query, DockerApiError, DockerClient};
use super::types::{
    ContainerInspect, CreateContainerRequest, CreateContainerResponse, ImageInspect,
};
use crate::runtime::{ContainerDetails, ImageDetails, Runtime, RuntimeError};

/// Docker Engine runtime.
pub struct DockerRuntime {
    client: DockerClient,
}

impl DockerRuntime {
    /// Create a runtime for the engine listening on `socket_path`.
    pub fn new<P: AsRef<Path>>(socket_path: P) -> Self {
        Self {
            client: DockerClient::new(socket_path),
        }
    }

    pub fn socket_path(&self) -> &str {
        self.client.socket_path()
    }
}

/// Package a build context directory as an uncompressed tar stream.
pub fn pack_context(dir: &Path) -> io::Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    builder.follow_symlinks(false);
    builder.append_dir_all(".", dir)?;
    builder.into_inner()
}

async fn pack_context_blocking(dir: PathBuf) -> Result<Vec<u8>, DockerApiError> {
    let packed = tokio::task::spawn_blocking(move || pack_context(&dir))
        .await
        .map_err(io::Error::other)??;
    Ok(packed)
}

fn container_path(id: &str, action: &str) -> String {
    format!("/containers/{}/{}", encode_query(id), action)
}

#[async_trait]
impl Runtime for DockerRuntime {
    async fn inspect(&self, name: &str) -> Result<Option<ContainerDetails>, RuntimeError> {
        let inspect: Option<ContainerInspect> = self
            .client
            .get_optional(&container_path(name, "json"))
            .await?;
        Ok(inspect.map(ContainerInspect::into_details))
    }

    async fn inspect_image(&self, image: &str) -> Result<Option<ImageDetails>, RuntimeError> {
        let inspect: Option<ImageInspect> = self
            .client
            .get_optional(&format!("/images/{}/json", encode_query(image)))
            .await?;
        Ok(inspect.map(ImageInspect::into_details))
    }

    async fn create(
        &self,
        name: &str,
        spec: &ContainerSpec,
        labels: &BTreeMap<String, String>,
    ) -> Result<String, RuntimeError> {
        let body = CreateContainerRequest::from_spec(spec, labels);
        let path = format!("/containers/create?name={}", encode_query(name));
        match self
            .client
            .post_json::<_, CreateContainerResponse>(&path, &body)
            .await
        {
            Ok(response) => {
                debug!(name = %name, id = %response.id, "Docker created container");
                Ok(response.id)
            }
            Err(err) if err.status() == Some(409) => {
                Err(RuntimeError::NameConflict(name.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn start(&self, id: &str) -> Result<(), RuntimeError> {
        Ok(self.client.post_empty(&container_path(id, "start")).await?)
    }

    async fn stop(&self, id: &str, timeout: Duration) -> Result<(), RuntimeError> {
        let path = format!("{}?t={}", container_path(id, "stop"), timeout.as_secs());
        Ok(self.client.post_empty(&path).await?)
    }

    async fn restart(&self, id: &str, timeout: Duration) -> Result<(), RuntimeError> {
        let path = format!("{}?t={}", container_path(id, "restart"), timeout.as_secs());
        Ok(self.client.post_empty(&path).await?)
    }

    async fn kill(&self, id: &str, signal: &str) -> Result<(), RuntimeError> {
        let path = format!("{}?signal={}", container_path(id, "kill"), encode_query(signal));
        Ok(self.client.post_empty(&path).await?)
    }

    async fn pause(&self, id: &str) -> Result<(), RuntimeError> {
        Ok(self.client.post_empty(&container_path(id, "pause")).await?)
    }

    async fn unpause(&self, id: &str) -> Result<(), RuntimeError> {
        Ok(self.client.post_empty(&container_path(id, "unpause")).await?)
    }

    async fn remove(&self, id: &str, force: bool, volumes: bool) -> Result<(), RuntimeError> {
        let path = format!("/containers/{}?force={}&v={}", encode_query(id), force, volumes);
        Ok(self.client.delete(&path).await?)
    }

    async fn rename(&self, id: &str, new_name: &str) -> Result<(), RuntimeError> {
        let path = format!("{}?name={}", container_path(id, "rename"), encode_query(new_name));
        match self.client.post_empty(&path).await {
            Err(err) if err.status() == Some(409) => {
                Err(RuntimeError::NameConflict(new_name.to_string()))
            }
            result => Ok(result?),
        }
    }

    async fn pull(&self, image: &ImageRef) -> Result<(), RuntimeError> {
        let mut path = format!(
            "/images/create?fromImage={}&tag={}",
            encode_query(&image.repo),
            encode_query(&image.tag)
        );
        if let Some(digest) = &image.digest {
            path = format!(
                "/images/create?fromImage={}",
                encode_query(&format!("{}@{}", image.repo, digest))
            );
        }

        info!(image = %image, "Pulling image");
        let lines = self.client.post_stream(&path, Vec::new(), None).await?;
        if let Some(status) = lines.iter().rev().find_map(|l| l.status.as_deref()) {
            debug!(image = %image, status = %status, "Pull finished");
        }
        Ok(())
    }

    async fn build(&self, context: &Path, image: &ImageRef) -> Result<String, RuntimeError> {
        let archive = pack_context_blocking(context.to_path_buf()).await?;
        info!(
            image = %image,
            context = %context.display(),
            bytes = archive.len(),
            "Building image"
        );

        let path = format!("/build?t={}&rm=true", encode_query(&image.to_string()));
        let lines = self
            .client
            .post_stream(&path, archive, Some("application/x-tar"))
            .await?;

        if let Some(id) = lines.iter().rev().find_map(|l| l.aux.as_ref()?.id.clone()) {
            return Ok(id);
        }

        // Older engines only report the ID in the stream text.
        match self.inspect_image(&image.to_string()).await? {
            Some(details) => Ok(details.id),
            None => Err(RuntimeError::rejected(
                500,
                format!("build of {image} reported no image"),
            )),
        }
    }
}
