//! Heat-map publishing backends.

pub mod server;
pub mod upload;

pub use server::LocalHeatmapServer;
pub use upload::HttpUploadPublisher;

use crate::compare::interface::{CompareError, HeatmapPublisher};
use crate::config::{PublishConfig, PublishProvider};
use std::sync::Arc;

/// Build the configured publisher. The local server only listens when a
/// `serve_port` is configured.
pub async fn build_publisher(
    config: &PublishConfig,
    max_retries: u32,
) -> Result<Arc<dyn HeatmapPublisher>, CompareError> {
    match config.provider {
        PublishProvider::Local => {
            let dir = config.output_dir();
            let mut server = LocalHeatmapServer::new(&dir).map_err(|e| {
                CompareError::Publish(format!("cannot create {}: {}", dir.display(), e))
            })?;
            if let Some(port) = config.serve_port {
                server.start(port).await?;
            }
            Ok(Arc::new(server))
        }
        PublishProvider::HttpUpload => {
            let url = config
                .upload_url
                .clone()
                .filter(|u| !u.is_empty())
                .ok_or_else(|| {
                    CompareError::InvalidParameter("http_upload requires upload_url".to_string())
                })?;
            let publisher = HttpUploadPublisher::new(url, config.upload_preset.clone(), max_retries)
                .map_err(|e| CompareError::Publish(format!("cannot build upload client: {}", e)))?;
            Ok(Arc::new(publisher))
        }
    }
}
