use std::{
	collections::HashSet,
	ffi::OsStr,
	io::ErrorKind as IoErrorKind,
	path::PathBuf,
};

use tokio::fs;

use crate::{prelude::*, store::write_atomically};

/// The extension of route documents. The proxy ignores the `.tmp` files
/// written on the way.
const DOCUMENT_EXTENSION: &str = "yml";

/// Derives the routes of one deployed app version. Every URL of the app gets a
/// router, a service and, when the route has a path, a middleware stripping
/// that path before the request reaches the container.
///
/// The proxy merges every document into one configuration, so names carry the
/// namespace as well as `{app}_{version}_{port}`.
pub struct ProxyRouteBuilder<'a> {
	settings: &'a ProxySettings,
}

impl<'a> ProxyRouteBuilder<'a> {
	pub fn new(settings: &'a ProxySettings) -> Self {
		Self { settings }
	}

	/// Builds the routes of a version of an app whose container is reachable
	/// at `address` on the ingress network. Every version except
	/// [`LATEST_VERSION`] is served under `/<version>`.
	///
	/// [`LATEST_VERSION`]: constants::LATEST_VERSION
	pub fn build(&self, identity: &RuntimeIdentity, app: &AppSpec, address: &str) -> ProxyRouteSet {
		let mut routes = ProxyRouteSet::default();

		for url in &app.urls {
			let (host, path) = split_host(&url.host);
			let mut prefix = path.trim_end_matches('/').to_string();
			if identity.version != constants::LATEST_VERSION {
				prefix.push('/');
				prefix.push_str(&identity.version);
			}

			let name = format!(
				"{}_{}_{}_{}",
				identity.namespace, app.name, identity.version, url.port
			);
			let router_name = format!("app-{name}");
			let service_name = format!("svc-{name}");

			let mut router = Router {
				rule: format!(r#"Host("{host}")"#),
				service: service_name.clone(),
				entry_points: vec![self.settings.entry_point.clone()],
				middlewares: vec![],
				tls: self.settings.tls.then(|| RouterTls {
					cert_resolver: self.settings.cert_resolver.clone(),
				}),
			};

			if !prefix.is_empty() {
				let middleware_name = format!("mw-strip-{name}");
				router.rule = format!(r#"{} && Path("{prefix}")"#, router.rule);
				router.middlewares.push(middleware_name.clone());
				routes.http.middlewares.insert(
					middleware_name,
					Middleware {
						strip_prefix: StripPrefix {
							prefixes: vec![prefix],
						},
					},
				);
			}

			routes.http.routers.insert(router_name, router);
			routes.http.services.insert(
				service_name,
				Service {
					load_balancer: LoadBalancer {
						servers: vec![Server {
							url: format!("http://{address}:{}", url.port),
						}],
					},
				},
			);
		}

		routes
	}
}

/// Splits `example.com/api` into `example.com` and `/api`
fn split_host(host: &str) -> (&str, &str) {
	match host.find('/') {
		Some(index) => host.split_at(index),
		None => (host, ""),
	}
}

/// Writes route documents into the directory the proxy watches, one per
/// deployed app version
#[derive(Debug, Clone)]
pub struct ProxyConfigWriter {
	config_dir: PathBuf,
}

impl ProxyConfigWriter {
	pub fn new(config_dir: impl Into<PathBuf>) -> Self {
		Self {
			config_dir: config_dir.into(),
		}
	}

	/// The path of the route document of an app version
	pub fn document_path(&self, identity: &RuntimeIdentity) -> PathBuf {
		self.config_dir.join(format!(
			"{}.{DOCUMENT_EXTENSION}",
			identity.route_document_name()
		))
	}

	/// Writes the route document of an app version, replacing any previous one
	#[instrument(skip(self, routes))]
	pub async fn write(
		&self,
		identity: &RuntimeIdentity,
		routes: &ProxyRouteSet,
	) -> Result<(), ErrorType> {
		fs::create_dir_all(&self.config_dir).await?;

		let content = serde_yaml::to_string(routes)?;
		write_atomically(&self.document_path(identity), content.as_bytes()).await?;

		debug!("Wrote {} routes", routes.http.routers.len());
		Ok(())
	}

	/// Removes the route document of an app version. Returns whether there was
	/// one to remove.
	#[instrument(skip(self))]
	pub async fn remove(&self, identity: &RuntimeIdentity) -> Result<bool, ErrorType> {
		match fs::remove_file(self.document_path(identity)).await {
			Ok(()) => Ok(true),
			Err(err) if err.kind() == IoErrorKind::NotFound => Ok(false),
			Err(err) => Err(err.into()),
		}
	}

	/// Removes the route document of every app version not in `live`. Files
	/// that are not route documents are left alone. Returns how many documents
	/// were removed.
	#[instrument(skip_all)]
	pub async fn retain(&self, live: &HashSet<RuntimeIdentity>) -> Result<usize, ErrorType> {
		let keep = live
			.iter()
			.map(|identity| self.document_path(identity))
			.collect::<HashSet<_>>();

		let mut entries = match fs::read_dir(&self.config_dir).await {
			Ok(entries) => entries,
			Err(err) if err.kind() == IoErrorKind::NotFound => return Ok(0),
			Err(err) => return Err(err.into()),
		};

		let mut removed = 0;
		while let Some(entry) = entries.next_entry().await? {
			let path = entry.path();
			if path.extension().and_then(OsStr::to_str) != Some(DOCUMENT_EXTENSION) ||
				keep.contains(&path)
			{
				continue;
			}

			fs::remove_file(&path).await?;
			debug!("Removed {}", path.display());
			removed += 1;
		}

		Ok(removed)
	}
}
