use std::{collections::HashMap, path::Path, pin::pin};

use bollard::{
	container::{
		Config,
		CreateContainerOptions,
		InspectContainerOptions,
		ListContainersOptions,
		RemoveContainerOptions,
		StartContainerOptions,
		StopContainerOptions,
	},
	errors::Error as DockerError,
	image::{BuildImageOptions, CreateImageOptions},
	models::{
		EndpointSettings,
		HostConfig,
		Ipam,
		IpamConfig,
		PortBinding as DockerPortBinding,
		RestartPolicy,
		RestartPolicyNameEnum,
	},
	network::{ConnectNetworkOptions, CreateNetworkOptions, InspectNetworkOptions},
	system::EventsOptions,
	Docker,
};
use futures::{Stream, StreamExt, TryStreamExt};

use crate::prelude::*;

/// The number of bytes in a GB, as Docker takes memory limits in bytes
const BYTES_PER_GB: i64 = 1024 * 1024 * 1024;
/// The number of nano CPUs in a CPU core
const NANO_CPUS_PER_CORE: f64 = 1_000_000_000.0;

/// A [`ContainerRuntime`] talking to the local Docker engine
#[derive(Debug, Clone)]
pub struct DockerRuntime {
	docker: Docker,
}

/// Maps a `404` from the engine to [`None`]
fn not_found_as_none<T>(result: Result<T, DockerError>) -> Result<Option<T>, ErrorType> {
	match result {
		Ok(value) => Ok(Some(value)),
		Err(DockerError::DockerResponseServerError {
			status_code: 404, ..
		}) => Ok(None),
		Err(err) => Err(err.into()),
	}
}

/// Collects the address of an endpoint on every network it is attached to
fn network_addresses(
	networks: Option<HashMap<String, EndpointSettings>>,
) -> HashMap<String, String> {
	networks
		.unwrap_or_default()
		.into_iter()
		.filter_map(|(network, endpoint)| {
			endpoint
				.ip_address
				.filter(|address| !address.is_empty())
				.map(|address| (network, address))
		})
		.collect()
}

impl ContainerRuntime for DockerRuntime {
	const NAME: &'static str = "docker";

	async fn connect(_settings: &RunnerSettings) -> Result<Self, ErrorType> {
		let docker = Docker::connect_with_defaults()?;
		let version = docker.version().await?;
		info!(
			"Connected to Docker engine {}",
			version.version.unwrap_or_default()
		);

		Ok(Self { docker })
	}

	async fn list_containers(&self) -> Result<Vec<ContainerDetails>, ErrorType> {
		let containers = self
			.docker
			.list_containers(Some(ListContainersOptions::<String> {
				all: true,
				..Default::default()
			}))
			.await?;

		Ok(containers
			.into_iter()
			.map(|container| ContainerDetails {
				id: container.id.unwrap_or_default(),
				name: container
					.names
					.unwrap_or_default()
					.first()
					.map(|name| name.trim_start_matches('/').to_string())
					.unwrap_or_default(),
				labels: container.labels.unwrap_or_default(),
				running: container.state.as_deref() == Some("running"),
				network_addresses: network_addresses(
					container
						.network_settings
						.and_then(|settings| settings.networks),
				),
			})
			.collect())
	}

	async fn inspect_container(
		&self,
		name_or_id: &str,
	) -> Result<Option<ContainerDetails>, ErrorType> {
		let Some(container) = not_found_as_none(
			self.docker
				.inspect_container(name_or_id, None::<InspectContainerOptions>)
				.await,
		)?
		else {
			return Ok(None);
		};

		Ok(Some(ContainerDetails {
			id: container.id.unwrap_or_default(),
			name: container
				.name
				.map(|name| name.trim_start_matches('/').to_string())
				.unwrap_or_default(),
			labels: container
				.config
				.and_then(|config| config.labels)
				.unwrap_or_default(),
			running: container
				.state
				.and_then(|state| state.running)
				.unwrap_or(false),
			network_addresses: network_addresses(
				container
					.network_settings
					.and_then(|settings| settings.networks),
			),
		}))
	}

	#[instrument(skip(self, options), fields(container = %options.name))]
	async fn create_container(&self, options: ContainerRunOptions) -> Result<String, ErrorType> {
		let mut networks = options.networks.into_iter();
		let first_network = networks.next();

		let exposed_ports = options
			.ports
			.iter()
			.map(|port| (format!("{}/tcp", port.container), HashMap::new()))
			.collect::<HashMap<_, _>>();
		let port_bindings = options
			.ports
			.iter()
			.map(|port| {
				(
					format!("{}/tcp", port.container),
					Some(vec![DockerPortBinding {
						host_ip: None,
						host_port: Some(port.host.to_string()),
					}]),
				)
			})
			.collect::<HashMap<_, _>>();

		let created = self
			.docker
			.create_container(
				Some(CreateContainerOptions {
					name: options.name.clone(),
					platform: None,
				}),
				Config {
					image: Some(options.image),
					env: Some(options.env),
					labels: Some(options.labels),
					cmd: (!options.command.is_empty()).then_some(options.command),
					exposed_ports: (!exposed_ports.is_empty()).then_some(exposed_ports),
					host_config: Some(HostConfig {
						nano_cpus: options
							.cpu
							.map(|cpu| (cpu * NANO_CPUS_PER_CORE) as i64),
						memory: options
							.memory_gb
							.map(|memory| i64::from(memory) * BYTES_PER_GB),
						binds: (!options.binds.is_empty()).then_some(options.binds),
						port_bindings: (!port_bindings.is_empty()).then_some(port_bindings),
						network_mode: first_network,
						restart_policy: Some(RestartPolicy {
							name: Some(RestartPolicyNameEnum::UNLESS_STOPPED),
							maximum_retry_count: None,
						}),
						..Default::default()
					}),
					..Default::default()
				},
			)
			.await?;
		for warning in &created.warnings {
			warn!("{warning}");
		}

		for network in networks {
			self.connect_network(&network, &created.id).await?;
		}

		debug!("Created container `{}`", created.id);
		Ok(created.id)
	}

	async fn start_container(&self, id: &str) -> Result<(), ErrorType> {
		self.docker
			.start_container(id, None::<StartContainerOptions<String>>)
			.await?;
		Ok(())
	}

	async fn stop_container(&self, id: &str) -> Result<(), ErrorType> {
		match self
			.docker
			.stop_container(id, None::<StopContainerOptions>)
			.await
		{
			Ok(()) => Ok(()),
			// Not modified: the container is already stopped
			Err(DockerError::DockerResponseServerError {
				status_code: 304, ..
			}) => Ok(()),
			Err(err) => Err(err.into()),
		}
	}

	async fn remove_container(&self, id: &str, force: bool) -> Result<(), ErrorType> {
		self.docker
			.remove_container(
				id,
				Some(RemoveContainerOptions {
					force,
					..Default::default()
				}),
			)
			.await?;
		Ok(())
	}

	#[instrument(skip(self))]
	async fn create_network(
		&self,
		name: &str,
		subnet: Option<&str>,
		gateway: Option<&str>,
	) -> Result<String, ErrorType> {
		let ipam = match subnet {
			Some(subnet) => Ipam {
				config: Some(vec![IpamConfig {
					subnet: Some(subnet.to_string()),
					gateway: gateway.map(str::to_string),
					..Default::default()
				}]),
				..Default::default()
			},
			None => Ipam::default(),
		};

		self.docker
			.create_network(CreateNetworkOptions {
				name: name.to_string(),
				driver: "bridge".to_string(),
				attachable: true,
				ipam,
				..Default::default()
			})
			.await?;

		self.inspect_network(name)
			.await?
			.map(|network| network.id)
			.ok_or_else(|| ErrorType::upstream(format!("network `{name}` vanished after creation")))
	}

	async fn inspect_network(&self, name: &str) -> Result<Option<NetworkDetails>, ErrorType> {
		let Some(network) = not_found_as_none(
			self.docker
				.inspect_network(name, None::<InspectNetworkOptions<String>>)
				.await,
		)?
		else {
			return Ok(None);
		};

		let ipam_config = network
			.ipam
			.and_then(|ipam| ipam.config)
			.and_then(|config| config.into_iter().next());

		Ok(Some(NetworkDetails {
			id: network.id.unwrap_or_default(),
			name: network.name.unwrap_or_else(|| name.to_string()),
			subnet: ipam_config.as_ref().and_then(|config| config.subnet.clone()),
			gateway: ipam_config.and_then(|config| config.gateway),
		}))
	}

	async fn remove_network(&self, name: &str) -> Result<(), ErrorType> {
		self.docker.remove_network(name).await?;
		Ok(())
	}

	async fn connect_network(&self, network: &str, container: &str) -> Result<(), ErrorType> {
		self.docker
			.connect_network(
				network,
				ConnectNetworkOptions {
					container: container.to_string(),
					endpoint_config: EndpointSettings::default(),
				},
			)
			.await?;
		Ok(())
	}

	#[instrument(skip(self, options), fields(tag = %options.tag))]
	async fn build_image(&self, context_dir: &Path, options: BuildOptions) -> Result<(), ErrorType> {
		let context_dir = context_dir.to_path_buf();
		let context = tokio::task::spawn_blocking(move || -> Result<Vec<u8>, ErrorType> {
			let mut archive = tar::Builder::new(Vec::new());
			archive.follow_symlinks(false);
			archive.append_dir_all(".", &context_dir)?;
			Ok(archive.into_inner()?)
		})
		.await??;
		debug!("Sending a {} byte build context", context.len());

		let mut build = pin!(self.docker.build_image(
			BuildImageOptions {
				dockerfile: options.dockerfile,
				t: options.tag.clone(),
				buildargs: options.build_args,
				rm: true,
				forcerm: true,
				..Default::default()
			},
			None,
			Some(context.into()),
		));

		while let Some(info) = build.try_next().await? {
			if let Some(error) = info.error {
				return Err(ErrorType::upstream(format!(
					"build of `{}` failed: {error}",
					options.tag
				)));
			}
			if let Some(line) = info.stream.as_deref().map(str::trim_end) {
				if !line.is_empty() {
					trace!("{line}");
				}
			}
		}

		info!("Built image `{}`", options.tag);
		Ok(())
	}

	async fn pull_image(&self, image: &str) -> Result<(), ErrorType> {
		self.docker
			.create_image(
				Some(CreateImageOptions {
					from_image: image.to_string(),
					..Default::default()
				}),
				None,
				None,
			)
			.try_for_each(|info| async move {
				if let Some(status) = info.status {
					trace!("{status}");
				}
				Ok(())
			})
			.await?;
		Ok(())
	}

	fn container_events(&self) -> impl Stream<Item = Result<RuntimeEvent, ErrorType>> + Send + 'static {
		self.docker
			.events(Some(EventsOptions::<String> {
				filters: HashMap::from([("type".to_string(), vec!["container".to_string()])]),
				..Default::default()
			}))
			.map(|message| -> Result<RuntimeEvent, ErrorType> {
				let message = message?;
				let actor = message.actor.unwrap_or_default();
				Ok(RuntimeEvent {
					container_id: actor.id.unwrap_or_default(),
					action: message.action.as_deref().unwrap_or_default().into(),
					attributes: actor.attributes.unwrap_or_default(),
				})
			})
	}
}
