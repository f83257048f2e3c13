use std::{net::SocketAddr, sync::Arc};

use tokio::{net::TcpListener, task};
use tokio_util::sync::CancellationToken;
use tracing::{level_filters::LevelFilter, Dispatch, Level};
use tracing_subscriber::{
	fmt::{format::FmtSpan, Layer as FmtLayer},
	layer::SubscriberExt,
	Layer,
};

use crate::prelude::*;

/// The runner wires the engine to a container runtime: it serves the webhook
/// endpoint, runs the reconciler over the runtime's container events and
/// stops both when the process is asked to exit.
pub struct Runner<R>
where
	R: ContainerRuntime,
{
	/// The app state for the runner. This contains the capability handles and
	/// the configuration for the runner.
	state: AppState<R, GitClient, FileNamespaceStore>,
}

impl<R> Runner<R>
where
	R: ContainerRuntime,
{
	/// Initializes and runs the runner. This function will parse the settings,
	/// set up the global default subscriber and connect to the container
	/// runtime, then serve webhooks and reconcile proxy routes until the exit
	/// signal is received.
	pub async fn run() {
		let runner = Self::init().await;
		let state = runner.state;

		state
			.ensure_ingress_network()
			.await
			.expect("Failed to create the ingress network");
		state
			.ensure_proxy()
			.await
			.expect("Failed to start the proxy container");

		let cancel = CancellationToken::new();
		let reconciler = Reconciler::new(
			state.runtime.clone(),
			state.store.clone(),
			state.config.proxy.clone(),
		);
		let reconciler_task = task::spawn(reconciler.run(cancel.clone()));
		debug!("Reconciler started");

		let tcp_listener = TcpListener::bind(state.config.bind_address)
			.await
			.expect("Failed to bind the webhook listener");
		info!(
			"Listening for webhooks on http://{}",
			tcp_listener
				.local_addr()
				.expect("Failed to get the local address")
		);

		let router = setup_routes(
			state.store.clone(),
			Arc::new(SpawnDeployDispatcher::new(state.clone())),
		);
		if let Err(err) = axum::serve(
			tcp_listener,
			router.into_make_service_with_connect_info::<SocketAddr>(),
		)
		.with_graceful_shutdown(exit_signal())
		.await
		{
			error!("Webhook server failed: {err}");
		}

		info!("Server stopped. Waiting for the reconciler to exit");
		cancel.cancel();
		_ = reconciler_task.await;
		info!("Runner stopped");
	}

	/// Initialize the runner. This function will parse the settings, set up
	/// the global default subscriber and connect to the container runtime.
	async fn init() -> Self {
		let config = RunnerSettings::parse(R::NAME).expect("Failed to parse settings");

		tracing::dispatcher::set_global_default(Dispatch::new(
			tracing_subscriber::registry().with(
				FmtLayer::new()
					.with_span_events(FmtSpan::NONE)
					.event_format(
						tracing_subscriber::fmt::format()
							.with_ansi(true)
							.with_file(false)
							.without_time()
							.compact(),
					)
					.with_filter(
						tracing_subscriber::filter::Targets::new()
							.with_target(format!("{}_runner", R::NAME), LevelFilter::TRACE)
							.with_target(env!("CARGO_PKG_NAME"), LevelFilter::TRACE)
							.with_target("models", LevelFilter::TRACE),
					)
					.with_filter(LevelFilter::from_level(
						if config.environment == RunningEnvironment::Development {
							Level::TRACE
						} else {
							Level::DEBUG
						},
					)),
			),
		))
		.expect("Failed to set global default subscriber");

		info!("Starting {} runner in {}", R::NAME, config.environment);

		let runtime = R::connect(&config)
			.await
			.expect("Failed to connect to the container runtime");
		let store = FileNamespaceStore::new(&config.data_dir);

		Self {
			state: AppState::new(runtime, GitClient, store, config),
		}
	}
}

/// Listen for the exit signal and stop the runner when the signal is received.
#[tracing::instrument]
async fn exit_signal() {
	let ctrl_c = async {
		tokio::signal::ctrl_c()
			.await
			.expect("Failed to listen for SIGINT")
	};

	#[cfg(unix)]
	let terminate = async {
		tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
			.expect("failed to install signal handler")
			.recv()
			.await;
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		_ = ctrl_c => (),
		_ = terminate => (),
	}
	info!("Shutdown signal received, shutting down server gracefully");
}
