use tokio::fs;

use super::AppState;
use crate::prelude::*;

/// Where the proxy container reads route documents from
const PROXY_CONFIG_DIR: &str = "/etc/traefik/dynamic";
/// Where the proxy container keeps its ACME certificates
const PROXY_ACME_DIR: &str = "/var/lib/traefik";

impl<R, V, S> AppState<R, V, S>
where
	R: ContainerRuntime,
	V: VersionControl,
	S: NamespaceStore,
{
	/// Creates the network shared by the reverse proxy and every app
	/// container, unless it already exists
	#[instrument(skip(self))]
	pub async fn ensure_ingress_network(&self) -> Result<(), ErrorType> {
		let network = &self.config.proxy.ingress_network;
		if self.runtime.inspect_network(network).await?.is_some() {
			debug!("Ingress network `{network}` exists");
			return Ok(());
		}

		self.runtime.create_network(network, None, None).await?;
		info!("Created ingress network `{network}`");

		Ok(())
	}

	/// Makes sure the reverse proxy container is running on the ingress
	/// network. An existing container is started if it is stopped and left
	/// alone otherwise. A missing one is pulled and created, publishing ports
	/// 80 and 443 and watching the route document directory.
	///
	/// Does nothing when the proxy is not managed by the engine.
	#[instrument(skip(self))]
	pub async fn ensure_proxy(&self) -> Result<(), ErrorType> {
		let proxy = &self.config.proxy;
		if !proxy.managed {
			debug!("The proxy is not managed, skipping");
			return Ok(());
		}

		if let Some(container) = self.runtime.inspect_container(&proxy.container_name).await? {
			if container.running {
				debug!("Proxy container `{}` is running", container.name);
			} else {
				info!("Starting stopped proxy container `{}`", container.name);
				self.runtime.start_container(&container.id).await?;
			}
			return Ok(());
		}

		// Bind mounts need an absolute host path
		fs::create_dir_all(&proxy.config_dir).await?;
		let config_dir = fs::canonicalize(&proxy.config_dir).await?;

		self.runtime.pull_image(&proxy.image).await?;
		let id = self
			.runtime
			.run_container(
				ContainerRunOptions::builder()
					.name(proxy.container_name.clone())
					.image(proxy.image.clone())
					.networks(vec![proxy.ingress_network.clone()])
					.ports(vec![
						PortBinding {
							host: 80,
							container: 80,
						},
						PortBinding {
							host: 443,
							container: 443,
						},
					])
					.binds(vec![
						format!("{}:{PROXY_CONFIG_DIR}:ro", config_dir.display()),
						format!("{}:{PROXY_ACME_DIR}", proxy.acme_volume),
					])
					.command(proxy_command(proxy))
					.build(),
			)
			.await?;
		info!(
			"Proxy container `{}` is running as {id}",
			proxy.container_name
		);

		Ok(())
	}
}

/// The arguments the proxy is started with
fn proxy_command(proxy: &ProxySettings) -> Vec<String> {
	let mut command = vec![
		format!("--providers.file.directory={PROXY_CONFIG_DIR}"),
		"--providers.file.watch=true".to_string(),
		"--providers.providersThrottleDuration=2s".to_string(),
		"--entrypoints.web.address=:80".to_string(),
		format!("--entrypoints.{}.address=:443", proxy.entry_point),
		"--ping=true".to_string(),
	];

	if proxy.tls {
		command.push(format!(
			"--entrypoints.web.http.redirections.entrypoint.to={}",
			proxy.entry_point
		));
	}

	if let Some(email) = &proxy.acme_email {
		let resolver = format!("--certificatesresolvers.{}.acme", proxy.cert_resolver);
		command.extend([
			format!("{resolver}.email={email}"),
			format!("{resolver}.storage={PROXY_ACME_DIR}/acme.json"),
			format!("{resolver}.tlschallenge=true"),
		]);
	}

	command
}
