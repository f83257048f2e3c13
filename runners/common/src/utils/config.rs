use std::{
	fmt::{Display, Formatter},
	net::SocketAddr,
	path::PathBuf,
	time::Duration,
};

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

/// The configuration for the runner.
///
/// Environment variables are split on `_` into nested keys, so multi-word
/// fields also accept their lowercase single-word form (e.g.
/// `BERTH_DATADIR` sets `dataDir`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerSettings {
	/// The environment the application is running in. This is set at runtime
	/// based on an environment variable and if the application is compiled with
	/// debug mode.
	pub environment: RunningEnvironment,
	/// The address the webhook server listens on
	#[serde(alias = "bindaddress")]
	pub bind_address: SocketAddr,
	/// The directory namespaces and app working copies are stored in
	#[serde(alias = "datadir")]
	pub data_dir: PathBuf,
	/// How namespace subnets are allocated
	#[serde(default)]
	pub network: NetworkSettings,
	/// Where and how proxy route documents are written
	#[serde(default)]
	pub proxy: ProxySettings,
	/// How app images are built
	#[serde(default)]
	pub build: BuildSettings,
	/// Deadlines for long running operations
	#[serde(default)]
	pub timeouts: TimeoutSettings,
	/// Access to private git repositories
	#[serde(default)]
	pub git: GitSettings,
	/// Registration of push webhooks on app repositories
	#[serde(default)]
	pub webhook: WebhookSettings,
}

impl RunnerSettings {
	/// Get the runner settings from the environment.
	pub fn parse(name: &str) -> Result<Self, ConfigError> {
		let env = if cfg!(debug_assertions) {
			"dev".to_string()
		} else {
			std::env::var("BERTH_ENV").unwrap_or_else(|_| "prod".into())
		};

		match env.as_ref() {
			"prod" | "production" => Config::builder()
				.add_source(File::with_name("config").required(false))
				.add_source(File::with_name(&format!("config.{}", name)).required(false))
				.add_source(File::with_name(name).required(false))
				.set_default("environment", "production")?,
			"dev" | "development" => Config::builder()
				.add_source(
					File::with_name(&format!(
						concat!(env!("CARGO_MANIFEST_DIR"), "/../../config/runner.{}",),
						name
					))
					.required(true),
				)
				.set_default("environment", "development")?,
			unknown => {
				return Err(ConfigError::Message(format!(
					"unknown running environment `{unknown}`"
				)));
			}
		}
		.add_source(
			Environment::with_prefix("BERTH")
				.separator("_")
				.ignore_empty(true),
		)
		.build()?
		.try_deserialize()
	}
}

/// The environment the application is running in
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum RunningEnvironment {
	/// The application is running in development mode
	Development,
	/// The application is running in production mode
	Production,
}

impl Display for RunningEnvironment {
	fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
		write!(
			formatter,
			"{}",
			match self {
				RunningEnvironment::Development => "Development",
				RunningEnvironment::Production => "Production",
			}
		)
	}
}

/// How namespace subnets are allocated
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSettings {
	/// The /16 every namespace gets a /24 out of, as its first two octets
	pub base: String,
}

impl Default for NetworkSettings {
	fn default() -> Self {
		Self {
			base: "172.30".to_string(),
		}
	}
}

/// Where and how proxy route documents are written
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProxySettings {
	/// The directory the proxy watches for dynamic configuration
	#[serde(alias = "configdir")]
	pub config_dir: PathBuf,
	/// The network shared by the proxy and every app container
	#[serde(alias = "ingressnetwork")]
	pub ingress_network: String,
	/// The entry point routers listen on
	#[serde(alias = "entrypoint")]
	pub entry_point: String,
	/// The resolver TLS certificates are obtained from
	#[serde(alias = "certresolver")]
	pub cert_resolver: String,
	/// Whether routers terminate TLS
	pub tls: bool,
	/// Whether the engine runs the proxy container itself. Turn this off when
	/// the proxy is run some other way.
	pub managed: bool,
	/// The image of the proxy container
	pub image: String,
	/// The name of the proxy container
	#[serde(alias = "containername")]
	pub container_name: String,
	/// The email ACME certificates are requested with. Without one, the proxy
	/// gets no certificate resolver.
	#[serde(alias = "acmeemail")]
	pub acme_email: Option<String>,
	/// The volume ACME certificates are stored in
	#[serde(alias = "acmevolume")]
	pub acme_volume: String,
}

impl Default for ProxySettings {
	fn default() -> Self {
		Self {
			config_dir: PathBuf::from("/etc/traefik/dynamic"),
			ingress_network: "berth-ingress".to_string(),
			entry_point: "websecure".to_string(),
			cert_resolver: "letsencrypt".to_string(),
			tls: true,
			managed: true,
			image: "traefik:v3.6".to_string(),
			container_name: "berth-traefik".to_string(),
			acme_email: None,
			acme_volume: "berth-traefik-acme".to_string(),
		}
	}
}

/// How app images are built
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildSettings {
	/// The directory holding `Dockerfile.<platform>` build templates
	#[serde(alias = "templatesdir")]
	pub templates_dir: PathBuf,
}

impl Default for BuildSettings {
	fn default() -> Self {
		Self {
			templates_dir: PathBuf::from("build-templates"),
		}
	}
}

/// Deadlines for long running operations, in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TimeoutSettings {
	/// The deadline of every clone, fetch, checkout and remote listing
	#[serde(alias = "gitsecs")]
	pub git_secs: u64,
	/// The deadline of an image build
	#[serde(alias = "buildsecs")]
	pub build_secs: u64,
}

impl TimeoutSettings {
	pub fn git(&self) -> Duration {
		Duration::from_secs(self.git_secs)
	}

	pub fn build(&self) -> Duration {
		Duration::from_secs(self.build_secs)
	}
}

impl Default for TimeoutSettings {
	fn default() -> Self {
		Self {
			git_secs: 5 * 60,
			build_secs: 30 * 60,
		}
	}
}

/// Where push webhooks are registered. Webhooks are only registered when the
/// engine has a public URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebhookSettings {
	/// The URL git providers reach the webhook endpoint at, e.g.
	/// `https://deploy.example.com`
	#[serde(alias = "publicurl")]
	pub public_url: Option<String>,
	/// The base URL of the GitHub API
	#[serde(alias = "githubapi")]
	pub github_api: String,
	/// The base URL of the Gitee API
	#[serde(alias = "giteeapi")]
	pub gitee_api: String,
	/// The base URL of the GitLab API. Defaults to `https://<host>/api/v4`
	/// for the host of each repository.
	#[serde(alias = "gitlabapi")]
	pub gitlab_api: Option<String>,
}

impl Default for WebhookSettings {
	fn default() -> Self {
		Self {
			public_url: None,
			github_api: "https://api.github.com".to_string(),
			gitee_api: "https://gitee.com/api/v5".to_string(),
			gitlab_api: None,
		}
	}
}

/// Access to private git repositories
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitSettings {
	/// Tokens used for apps that do not carry their own
	#[serde(default)]
	pub credentials: Vec<GitCredentialConfig>,
}

/// A token for the repositories on a host, optionally only those of one owner
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitCredentialConfig {
	/// The host the token is for, e.g. `github.com`
	pub host: String,
	/// The user or group the token is restricted to
	#[serde(default)]
	pub owner: Option<String>,
	pub token: String,
}

impl std::fmt::Debug for GitCredentialConfig {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("GitCredentialConfig")
			.field("host", &self.host)
			.field("owner", &self.owner)
			.finish_non_exhaustive()
	}
}
