//! In-memory fakes of the capabilities the engine is built on, and fixtures
//! shared by the tests of every module.

use std::{
	collections::{BTreeMap, HashMap},
	path::{Path, PathBuf},
	sync::{Arc, Mutex},
};

use axum::{
	body::Bytes,
	extract::State,
	response::{IntoResponse, Response},
	Json,
	Router,
};
use futures::{channel::mpsc, stream, Stream, StreamExt};
use hmac::{Hmac, Mac};
use http::{HeaderMap, Method, StatusCode, Uri};
use serde_json::{json, Value};
use sha2::Sha256;
use time::OffsetDateTime;

use crate::{prelude::*, vcs::GitCredentials};

/// The head of `main` on the fake remote
pub const COMMIT_MAIN: &str = "deadbeefcafebabe0000000000000000000000aa";
/// The head of `dev` on the fake remote
pub const COMMIT_DEV: &str = "0badc0de00000000000000000000000000000bb";
/// The commit `v1.0.0` points to on the fake remote
pub const COMMIT_V1: &str = "1111111000000000000000000000000000000cc";

/// The ingress network used by [`settings`]
pub const INGRESS_NETWORK: &str = "berth-ingress";

pub fn namespace(name: &str, subnet: &str) -> Namespace {
	let gateway = subnet.replace(".0/24", ".1");
	Namespace {
		name: name.to_string(),
		network: models::utils::namespace_network_name(name),
		network_id: format!("net-{name}"),
		subnet: subnet.to_string(),
		gateway,
		created_at: OffsetDateTime::UNIX_EPOCH,
		apps: vec![],
		databases: vec![],
		redis: vec![],
	}
}

pub fn app(namespace: &str, name: &str) -> AppSpec {
	AppSpec {
		namespace: namespace.to_string(),
		name: name.to_string(),
		cpu: 1.0,
		memory: 1,
		repo: "https://github.com/acme/web.git".to_string(),
		token: None,
		platform: String::new(),
		trigger: Trigger {
			trigger_type: GitRefType::Branch,
			rule: "main".to_string(),
		},
		envs: vec![EnvVar {
			key: "RUST_LOG".to_string(),
			value: "info".to_string(),
		}],
		urls: vec![AppUrl {
			host: "api.example.com".to_string(),
			port: 8080,
		}],
		secret: "s3cret".to_string(),
		deploy: vec![],
	}
}

/// Settings pointing every directory into `dir`
pub fn settings(dir: &Path) -> RunnerSettings {
	RunnerSettings {
		environment: RunningEnvironment::Development,
		bind_address: "127.0.0.1:0".parse().unwrap(),
		data_dir: dir.join("data"),
		network: NetworkSettings::default(),
		proxy: ProxySettings {
			config_dir: dir.join("proxy"),
			ingress_network: INGRESS_NETWORK.to_string(),
			..Default::default()
		},
		build: BuildSettings {
			templates_dir: dir.join("templates"),
		},
		timeouts: TimeoutSettings::default(),
		git: GitSettings::default(),
		webhook: WebhookSettings::default(),
	}
}

/// Signs a webhook payload the way GitHub does
pub fn sign_github(secret: &str, payload: &[u8]) -> String {
	let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
	mac.update(payload);
	format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// A git provider's hooks API, served on a local port. Every request is
/// recorded, listing returns the hooks created so far and every other request
/// succeeds.
#[derive(Debug, Clone, Default)]
pub struct FakeProviderApi {
	state: Arc<Mutex<FakeProviderState>>,
}

#[derive(Debug, Default)]
struct FakeProviderState {
	rejecting: bool,
	hooks: Vec<Value>,
	requests: Vec<ProviderRequest>,
}

/// A request received by [`FakeProviderApi`]
#[derive(Debug, Clone)]
pub struct ProviderRequest {
	pub method: Method,
	/// The path, still percent-encoded
	pub path: String,
	pub query: Option<String>,
	pub headers: HeaderMap,
	pub body: Option<Value>,
}

impl ProviderRequest {
	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers
			.get(name)
			.and_then(|value| value.to_str().ok())
	}
}

impl FakeProviderApi {
	/// An API answering every request with `403 Forbidden`
	pub fn rejecting() -> Self {
		let api = Self::default();
		api.state.lock().unwrap().rejecting = true;
		api
	}

	/// Serves the API on a random local port, returning its base URL
	pub async fn serve(&self) -> String {
		let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
		let address = listener.local_addr().unwrap();
		let router = Router::new()
			.fallback(handle_provider_request)
			.with_state(self.clone());
		tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
		format!("http://{address}")
	}

	pub fn requests(&self) -> Vec<ProviderRequest> {
		self.state.lock().unwrap().requests.clone()
	}
}

async fn handle_provider_request(
	State(api): State<FakeProviderApi>,
	method: Method,
	uri: Uri,
	headers: HeaderMap,
	body: Bytes,
) -> Response {
	let body = serde_json::from_slice::<Value>(&body).ok();
	let mut state = api.state.lock().unwrap();
	state.requests.push(ProviderRequest {
		method: method.clone(),
		path: uri.path().to_string(),
		query: uri.query().map(str::to_string),
		headers,
		body: body.clone(),
	});

	if state.rejecting {
		return StatusCode::FORBIDDEN.into_response();
	}

	if method == Method::GET {
		Json(state.hooks.clone()).into_response()
	} else if method == Method::POST {
		let mut hook = body.unwrap_or_default();
		hook["id"] = json!(state.hooks.len() + 1);
		state.hooks.push(hook.clone());
		(StatusCode::CREATED, Json(hook)).into_response()
	} else {
		Json(body.unwrap_or_default()).into_response()
	}
}

/// A remote repository that is never contacted
#[derive(Debug, Clone, Default)]
pub struct FakeVcs {
	state: Arc<Mutex<FakeVcsState>>,
}

#[derive(Debug, Default)]
struct FakeVcsState {
	listings: usize,
	clones: Vec<PathBuf>,
	fetches: Vec<PathBuf>,
	checkouts: Vec<String>,
}

impl FakeVcs {
	/// How many times the remote's references were listed
	pub fn remote_listings(&self) -> usize {
		self.state.lock().unwrap().listings
	}

	pub fn clones(&self) -> Vec<PathBuf> {
		self.state.lock().unwrap().clones.clone()
	}

	pub fn fetches(&self) -> Vec<PathBuf> {
		self.state.lock().unwrap().fetches.clone()
	}

	pub fn checkouts(&self) -> Vec<String> {
		self.state.lock().unwrap().checkouts.clone()
	}
}

impl VersionControl for FakeVcs {
	async fn list_remote_refs(
		&self,
		_url: &str,
		_credentials: Option<&GitCredentials>,
	) -> Result<RemoteRefs, ErrorType> {
		self.state.lock().unwrap().listings += 1;
		Ok(RemoteRefs {
			refs: vec![
				("refs/heads/main".to_string(), COMMIT_MAIN.to_string()),
				("refs/heads/dev".to_string(), COMMIT_DEV.to_string()),
				("refs/tags/v1.0.0".to_string(), COMMIT_V1.to_string()),
			],
			head: Some("refs/heads/main".to_string()),
		})
	}

	async fn clone_repo(
		&self,
		_url: &str,
		path: &Path,
		_credentials: Option<&GitCredentials>,
	) -> Result<(), ErrorType> {
		std::fs::create_dir_all(path.join(".git"))?;
		std::fs::write(path.join("Dockerfile"), "FROM scratch\n")?;
		self.state.lock().unwrap().clones.push(path.to_path_buf());
		Ok(())
	}

	async fn fetch(
		&self,
		path: &Path,
		_credentials: Option<&GitCredentials>,
	) -> Result<(), ErrorType> {
		self.state.lock().unwrap().fetches.push(path.to_path_buf());
		Ok(())
	}

	async fn checkout(&self, _path: &Path, commit: &str) -> Result<(), ErrorType> {
		self.state.lock().unwrap().checkouts.push(commit.to_string());
		Ok(())
	}
}

/// A container engine that only keeps books
#[derive(Debug, Clone)]
pub struct FakeRuntime {
	state: Arc<Mutex<FakeRuntimeState>>,
	events: mpsc::UnboundedSender<RuntimeEvent>,
	event_receiver: Arc<Mutex<Option<mpsc::UnboundedReceiver<RuntimeEvent>>>>,
}

#[derive(Debug, Default)]
struct FakeRuntimeState {
	next_id: usize,
	containers: BTreeMap<String, ContainerDetails>,
	networks: BTreeMap<String, NetworkDetails>,
	builds: Vec<BuildOptions>,
	created: Vec<ContainerRunOptions>,
	calls: Vec<String>,
}

impl Default for FakeRuntime {
	fn default() -> Self {
		let (events, event_receiver) = mpsc::unbounded();
		Self {
			state: Default::default(),
			events,
			event_receiver: Arc::new(Mutex::new(Some(event_receiver))),
		}
	}
}

impl FakeRuntime {
	/// Emits an event on the stream returned by
	/// [`ContainerRuntime::container_events`]
	pub fn emit(&self, container_id: &str, action: &str, attributes: HashMap<String, String>) {
		self.events
			.unbounded_send(RuntimeEvent {
				container_id: container_id.to_string(),
				action: action.into(),
				attributes,
			})
			.unwrap();
	}

	/// Ends the event stream
	pub fn close_events(&self) {
		self.events.close_channel();
	}

	/// Adds a container that was not created through the runtime, e.g. one
	/// started by hand
	pub fn insert_container(&self, details: ContainerDetails) {
		self.state
			.lock()
			.unwrap()
			.containers
			.insert(details.id.clone(), details);
	}

	/// Every container that currently exists
	pub fn containers(&self) -> Vec<ContainerDetails> {
		self.state
			.lock()
			.unwrap()
			.containers
			.values()
			.cloned()
			.collect()
	}

	/// The options of every container created, in order
	pub fn created(&self) -> Vec<ContainerRunOptions> {
		self.state.lock().unwrap().created.clone()
	}

	pub fn builds(&self) -> Vec<BuildOptions> {
		self.state.lock().unwrap().builds.clone()
	}

	pub fn has_network(&self, name: &str) -> bool {
		self.state.lock().unwrap().networks.contains_key(name)
	}

	/// Every mutating call made, e.g. `stop c1`
	pub fn calls(&self) -> Vec<String> {
		self.state.lock().unwrap().calls.clone()
	}
}

impl ContainerRuntime for FakeRuntime {
	const NAME: &'static str = "fake";

	async fn connect(_settings: &RunnerSettings) -> Result<Self, ErrorType> {
		Ok(Self::default())
	}

	async fn list_containers(&self) -> Result<Vec<ContainerDetails>, ErrorType> {
		Ok(self.containers())
	}

	async fn inspect_container(
		&self,
		name_or_id: &str,
	) -> Result<Option<ContainerDetails>, ErrorType> {
		Ok(self
			.state
			.lock()
			.unwrap()
			.containers
			.values()
			.find(|container| container.id == name_or_id || container.name == name_or_id)
			.cloned())
	}

	async fn create_container(&self, options: ContainerRunOptions) -> Result<String, ErrorType> {
		let mut state = self.state.lock().unwrap();
		if state
			.containers
			.values()
			.any(|container| container.name == options.name)
		{
			return Err(ErrorType::upstream(format!(
				"container name `{}` is already in use",
				options.name
			)));
		}

		state.next_id += 1;
		let id = format!("c{}", state.next_id);
		let address = format!("172.18.0.{}", state.next_id + 1);
		state.calls.push(format!("create {}", options.name));
		state.created.push(options.clone());
		state.containers.insert(
			id.clone(),
			ContainerDetails {
				id: id.clone(),
				name: options.name,
				labels: options.labels,
				running: false,
				network_addresses: options
					.networks
					.into_iter()
					.map(|network| (network, address.clone()))
					.collect(),
			},
		);

		Ok(id)
	}

	async fn start_container(&self, id: &str) -> Result<(), ErrorType> {
		let mut state = self.state.lock().unwrap();
		state.calls.push(format!("start {id}"));
		if let Some(container) = state.containers.get_mut(id) {
			container.running = true;
		}
		Ok(())
	}

	async fn stop_container(&self, id: &str) -> Result<(), ErrorType> {
		let mut state = self.state.lock().unwrap();
		state.calls.push(format!("stop {id}"));
		if let Some(container) = state.containers.get_mut(id) {
			container.running = false;
		}
		Ok(())
	}

	async fn remove_container(&self, id: &str, force: bool) -> Result<(), ErrorType> {
		let mut state = self.state.lock().unwrap();
		state.calls.push(format!("remove {id}"));
		match state.containers.get(id) {
			Some(container) if container.running && !force => Err(ErrorType::upstream(
				format!("container `{id}` is running"),
			)),
			_ => {
				state.containers.remove(id);
				Ok(())
			}
		}
	}

	async fn create_network(
		&self,
		name: &str,
		subnet: Option<&str>,
		gateway: Option<&str>,
	) -> Result<String, ErrorType> {
		let mut state = self.state.lock().unwrap();
		state.calls.push(format!("create network {name}"));
		let id = format!("net-{name}");
		state.networks.insert(
			name.to_string(),
			NetworkDetails {
				id: id.clone(),
				name: name.to_string(),
				subnet: subnet.map(str::to_string),
				gateway: gateway.map(str::to_string),
			},
		);
		Ok(id)
	}

	async fn inspect_network(&self, name: &str) -> Result<Option<NetworkDetails>, ErrorType> {
		Ok(self.state.lock().unwrap().networks.get(name).cloned())
	}

	async fn remove_network(&self, name: &str) -> Result<(), ErrorType> {
		let mut state = self.state.lock().unwrap();
		state.calls.push(format!("remove network {name}"));
		state.networks.remove(name);
		Ok(())
	}

	async fn connect_network(&self, network: &str, container: &str) -> Result<(), ErrorType> {
		let mut state = self.state.lock().unwrap();
		state.calls.push(format!("connect {network} {container}"));
		Ok(())
	}

	async fn build_image(&self, _context_dir: &Path, options: BuildOptions) -> Result<(), ErrorType> {
		self.state.lock().unwrap().builds.push(options);
		Ok(())
	}

	async fn pull_image(&self, image: &str) -> Result<(), ErrorType> {
		self.state.lock().unwrap().calls.push(format!("pull {image}"));
		Ok(())
	}

	fn container_events(&self) -> impl Stream<Item = Result<RuntimeEvent, ErrorType>> + Send + 'static {
		match self.event_receiver.lock().unwrap().take() {
			Some(receiver) => receiver.map(Ok).boxed(),
			None => stream::empty().boxed(),
		}
	}
}
