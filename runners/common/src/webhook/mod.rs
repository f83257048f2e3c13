use std::sync::Arc;

use axum::{
	body::Bytes,
	extract::{Path, State},
	response::{IntoResponse, Response},
	routing::{get, post},
	Router,
};
use http::{HeaderMap, StatusCode};

use crate::{prelude::*, service::is_valid_name};

/// Provider detection and payload normalization
mod provider;
/// Registration of push hooks through the providers' APIs
mod register;
/// Whether a push satisfies an app's trigger
mod trigger;
/// Signature and token verification
mod verify;

pub use self::{provider::*, register::*, trigger::*, verify::*};

/// The state shared by the webhook handlers
struct WebhookState<S>
where
	S: NamespaceStore,
{
	store: S,
	dispatcher: Arc<dyn DeployDispatcher>,
}

impl<S> Clone for WebhookState<S>
where
	S: NamespaceStore,
{
	fn clone(&self) -> Self {
		Self {
			store: self.store.clone(),
			dispatcher: self.dispatcher.clone(),
		}
	}
}

/// Sets up the webhook routes. Apps are looked up in the store, and every
/// push matching an app's trigger is handed to the dispatcher.
#[instrument(skip(store, dispatcher))]
pub fn setup_routes<S>(store: S, dispatcher: Arc<dyn DeployDispatcher>) -> Router
where
	S: NamespaceStore,
{
	Router::new()
		.route("/webhook/health", get(|| async { "ok" }))
		.route("/webhook/git/*path", post(git_webhook::<S>))
		.with_state(WebhookState { store, dispatcher })
}

/// Handles a push webhook for `/webhook/git/{namespace}/{app}`
async fn git_webhook<S>(
	State(state): State<WebhookState<S>>,
	Path(path): Path<String>,
	headers: HeaderMap,
	body: Bytes,
) -> Response
where
	S: NamespaceStore,
{
	let segments = path
		.trim_matches('/')
		.split('/')
		.collect::<Vec<_>>();
	let &[namespace, app] = segments.as_slice() else {
		return (StatusCode::BAD_REQUEST, "namespace and app are required").into_response();
	};
	if namespace.is_empty() || app.is_empty() {
		return (StatusCode::BAD_REQUEST, "namespace and app are required").into_response();
	}
	if !is_valid_name(namespace) || !is_valid_name(app) {
		return (StatusCode::BAD_REQUEST, "invalid namespace or app name").into_response();
	}

	let Some(provider) = detect_provider(&headers) else {
		return (StatusCode::BAD_REQUEST, "unknown git provider").into_response();
	};

	let app = match find_app(&state.store, namespace, app).await {
		Ok(app) => app,
		Err(err) => {
			if err.kind() != ErrorKind::NotFound {
				error!("Failed to look up `{namespace}/{app}`: {err}");
			}
			return (err.default_status_code(), err.message()).into_response();
		}
	};

	if let Err(err) = verify_webhook(provider, &headers, &body, &app.secret) {
		warn!("Rejected {provider} webhook for `{namespace}/{}`", app.name);
		return (err.default_status_code(), err.message()).into_response();
	}

	if is_ping(provider, &headers) {
		info!("Received ping from {provider} for `{namespace}/{}`", app.name);
		return (StatusCode::OK, "ok").into_response();
	}

	let event = match normalize(provider, &body) {
		Ok(Some(event)) => event,
		Ok(None) => return (StatusCode::OK, "ok").into_response(),
		Err(err) => {
			warn!("Ignoring unreadable {provider} payload: {err}");
			return (StatusCode::OK, "ok").into_response();
		}
	};

	if matches(&app.trigger, &event) {
		info!(
			"Push to `{}` of {} triggers a deployment of `{namespace}/{}`",
			event.ref_name, event.repo, app.name
		);
		state
			.dispatcher
			.dispatch(namespace.to_string(), app.name, selector_for(&event));
	} else {
		debug!(
			"Push to `{}` does not match the trigger of `{namespace}/{}`",
			event.ref_name, app.name
		);
	}

	(StatusCode::OK, "ok").into_response()
}

async fn find_app<S>(store: &S, namespace: &str, app: &str) -> Result<AppSpec, ErrorType>
where
	S: NamespaceStore,
{
	store
		.load(namespace)
		.await?
		.ok_or_else(|| ErrorType::NamespaceNotFound(namespace.to_string()))?
		.remove_app(app)
		.ok_or_else(|| ErrorType::AppNotFound(app.to_string()))
}
