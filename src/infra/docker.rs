use std::collections::HashMap;

use async_trait::async_trait;
use bollard::{
    container::{
        Config, CreateContainerOptions, ListContainersOptions, LogOutput, LogsOptions,
        RemoveContainerOptions, StartContainerOptions,
    },
    image::{BuildImageOptions, CreateImageOptions},
    secret::{BuildInfo, BuildInfoAux, ContainerSummary, CreateImageInfo, HostConfig, PortBinding},
    Docker,
};
use bytes::{BufMut, BytesMut};
use flate2::{write::GzEncoder, Compression};
use futures::{Stream, StreamExt, TryStreamExt};
use log::{debug, info};
use map_macro::hash_map;

use crate::domain::error::LaunchError;
use crate::domain::model::{BindMount, BuildSpec, ContainerPlan, ContainerSnapshot, LogChunk, LogOptions};
use crate::domain::port::{ContainerRuntime, LogStream};
use crate::domain::LAUNCH_ID_LABEL;

pub struct DockerContainerRuntime {
    pub docker: Docker,
}

#[async_trait]
impl ContainerRuntime for DockerContainerRuntime {
    async fn image_present(&self, image: &str) -> Result<bool, LaunchError> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(err) if is_not_found(&err) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn pull_image(&self, image: &str) -> Result<String, LaunchError> {
        let reference = pull_reference(image);
        self.docker
            .create_image(
                Some(CreateImageOptions {
                    from_image: reference.as_str(),
                    ..Default::default()
                }),
                None,
                None,
            )
            .try_collect::<Vec<CreateImageInfo>>()
            .await
            .map_err(|err| LaunchError::ImagePull {
                image: reference.clone(),
                message: err.to_string(),
            })?;
        self.docker
            .inspect_image(&reference)
            .await?
            .id
            .ok_or_else(|| LaunchError::ImagePull {
                image: reference,
                message: "daemon did not report an image id".to_string(),
            })
    }

    async fn build_image(&self, build: &BuildSpec, tag: &str) -> Result<String, LaunchError> {
        let tar_gz = BytesMut::new().writer();
        let enc = GzEncoder::new(tar_gz, Compression::default());
        let mut tar = tar::Builder::new(enc);
        tar.append_dir_all(".", &build.context)?;
        let tar_gz = tar.into_inner()?.finish()?;

        info!("Build image {}", tag);
        let progress = self.docker.build_image(
            BuildImageOptions {
                dockerfile: build.dockerfile.as_str(),
                t: tag,
                version: bollard::image::BuilderVersion::BuilderBuildKit,
                pull: true,
                session: Some("dockhand-build".into()),
                ..Default::default()
            },
            None,
            Some(tar_gz.into_inner().freeze()),
        );
        drain_build_progress(progress, tag).await
    }

    async fn find_container(&self, name: &str) -> Result<Option<ContainerSnapshot>, LaunchError> {
        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions {
                all: true,
                filters: hash_map! {
                    "name".to_string() => vec![name.to_string()]
                },
                ..Default::default()
            }))
            .await?;
        // The name filter matches substrings, keep exact matches only.
        Ok(containers
            .into_iter()
            .find(|summary| {
                summary
                    .names
                    .as_deref()
                    .unwrap_or_default()
                    .iter()
                    .any(|entry| entry.trim_start_matches('/') == name)
            })
            .map(snapshot_from_summary))
    }

    async fn create_container(&self, plan: &ContainerPlan) -> Result<String, LaunchError> {
        let (options, config) = container_config(plan);
        let created = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|err| {
                if is_conflict(&err) {
                    LaunchError::NameConflict(plan.name.clone())
                } else {
                    err.into()
                }
            })?;
        Ok(created.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), LaunchError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn remove_container(&self, name_or_id: &str) -> Result<(), LaunchError> {
        self.docker
            .remove_container(
                name_or_id,
                Some(RemoveContainerOptions {
                    force: true,
                    v: true,
                    ..Default::default()
                }),
            )
            .await?;
        Ok(())
    }

    async fn container_logs(&self, name: &str, options: LogOptions) -> Result<LogStream, LaunchError> {
        let tail = options
            .tail
            .map(|lines| lines.to_string())
            .unwrap_or_else(|| "all".to_string());
        let stream = self
            .docker
            .logs(
                name,
                Some(LogsOptions::<String> {
                    follow: options.follow,
                    stdout: true,
                    stderr: true,
                    tail,
                    ..Default::default()
                }),
            )
            .filter_map(|item| {
                let chunk = match item {
                    Ok(LogOutput::StdOut { message }) => Some(Ok(LogChunk::Stdout(message))),
                    Ok(LogOutput::Console { message }) => Some(Ok(LogChunk::Stdout(message))),
                    Ok(LogOutput::StdErr { message }) => Some(Ok(LogChunk::Stderr(message))),
                    Ok(LogOutput::StdIn { .. }) => None,
                    Err(err) => Some(Err(LaunchError::from(err))),
                };
                std::future::ready(chunk)
            });
        Ok(stream.boxed())
    }
}

fn container_config(plan: &ContainerPlan) -> (CreateContainerOptions<String>, Config<String>) {
    let mut exposed_ports = HashMap::new();
    let mut port_bindings = HashMap::new();
    for mapping in &plan.ports {
        exposed_ports.insert(format!("{}/tcp", mapping.container), HashMap::new());
        port_bindings.insert(
            format!("{}/tcp", mapping.container),
            Some(vec![PortBinding {
                host_ip: None,
                host_port: Some(mapping.host.to_string()),
            }]),
        );
    }
    let binds: Vec<String> = plan.binds.iter().map(bind_argument).collect();
    let config = Config {
        image: Some(plan.image.clone()),
        cmd: plan.command.clone(),
        env: Some(plan.env.clone()),
        exposed_ports: Some(exposed_ports),
        labels: Some(plan.labels.iter().cloned().collect()),
        host_config: Some(HostConfig {
            port_bindings: Some(port_bindings),
            binds: if binds.is_empty() { None } else { Some(binds) },
            ..Default::default()
        }),
        ..Default::default()
    };
    let options = CreateContainerOptions {
        name: plan.name.clone(),
        platform: None,
    };
    (options, config)
}

async fn drain_build_progress<S>(mut progress: S, tag: &str) -> Result<String, LaunchError>
where
    S: Stream<Item = Result<BuildInfo, bollard::errors::Error>> + Unpin,
{
    let mut image_id = None;
    while let Some(step) = progress.next().await {
        let step = step.map_err(|err| build_error(tag, err.to_string()))?;
        if let Some(message) = step.error {
            return Err(build_error(tag, message));
        }
        if let Some(chunk) = step.stream {
            debug!("Build => {}", chunk.trim_end());
        }
        match step.aux {
            Some(BuildInfoAux::BuildKit(response)) => {
                for vertex in response.vertexes {
                    if !vertex.error.is_empty() {
                        return Err(build_error(tag, vertex.error));
                    }
                    if vertex.completed.is_some() {
                        info!("Build => {}", vertex.name);
                    }
                }
            }
            Some(BuildInfoAux::Default(id)) => image_id = id.id,
            None => {}
        }
    }
    image_id.ok_or_else(|| {
        build_error(tag, "build finished but the daemon did not report an image id".to_string())
    })
}

// An untagged reference would make the engine pull every tag of the
// repository.
fn pull_reference(image: &str) -> String {
    if image.contains('@') {
        return image.to_string();
    }
    let name = image.rsplit('/').next().unwrap_or(image);
    if name.contains(':') {
        image.to_string()
    } else {
        format!("{image}:latest")
    }
}

fn bind_argument(mount: &BindMount) -> String {
    if mount.read_only {
        format!("{}:{}:ro", mount.source.display(), mount.target)
    } else {
        format!("{}:{}", mount.source.display(), mount.target)
    }
}

fn snapshot_from_summary(summary: ContainerSummary) -> ContainerSnapshot {
    let labels = summary.labels.unwrap_or_default();
    ContainerSnapshot {
        id: summary.id.unwrap_or_default(),
        name: summary
            .names
            .and_then(|names| names.first().cloned())
            .map(|name| name.trim_start_matches('/').to_string())
            .unwrap_or_default(),
        image: summary.image.unwrap_or_default(),
        state: summary.state.unwrap_or_else(|| "unknown".to_string()),
        launch_id: labels.get(LAUNCH_ID_LABEL).cloned(),
    }
}

fn build_error(image: &str, message: String) -> LaunchError {
    LaunchError::Build {
        image: image.to_string(),
        message,
    }
}

fn is_not_found(err: &bollard::errors::Error) -> bool {
    matches!(
        err,
        bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }
    )
}

fn is_conflict(err: &bollard::errors::Error) -> bool {
    matches!(
        err,
        bollard::errors::Error::DockerResponseServerError { status_code: 409, .. }
    )
}
