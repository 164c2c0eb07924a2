use async_trait::async_trait;
use futures::stream::BoxStream;

use super::error::LaunchError;
use super::model::{BuildSpec, ContainerPlan, ContainerSnapshot, LogChunk, LogOptions};

pub type LogStream = BoxStream<'static, Result<LogChunk, LaunchError>>;

/// Seam between launcher logic and the container engine.
#[async_trait]
pub trait ContainerRuntime {
    async fn image_present(&self, image: &str) -> Result<bool, LaunchError>;

    async fn pull_image(&self, image: &str) -> Result<String, LaunchError>;

    /// Build `build.context` and tag the result, returning the image id.
    /// The context directory and dockerfile path are already absolute.
    async fn build_image(&self, build: &BuildSpec, tag: &str) -> Result<String, LaunchError>;

    /// Exact-name lookup, including stopped containers.
    async fn find_container(&self, name: &str) -> Result<Option<ContainerSnapshot>, LaunchError>;

    async fn create_container(&self, plan: &ContainerPlan) -> Result<String, LaunchError>;

    async fn start_container(&self, id: &str) -> Result<(), LaunchError>;

    async fn remove_container(&self, name_or_id: &str) -> Result<(), LaunchError>;

    async fn container_logs(&self, name: &str, options: LogOptions) -> Result<LogStream, LaunchError>;
}
