use std::{collections::HashMap, path::Path};

use crate::prelude::*;

/// The build argument carrying the ports the app listens on, space separated
pub const APP_PORT_ARG: &str = "APP_PORT";

/// Resolves the build arguments an app's image is built with. Implementations
/// may look into the checked out working copy, e.g. to read a build manifest.
pub trait BuildArgResolver: Send + Sync {
	fn resolve(&self, app: &AppSpec, working_copy: &Path)
		-> Result<HashMap<String, String>, ErrorType>;
}

/// Passes the app's ports as [`APP_PORT_ARG`], and nothing else
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultBuildArgs;

impl BuildArgResolver for DefaultBuildArgs {
	fn resolve(
		&self,
		app: &AppSpec,
		_working_copy: &Path,
	) -> Result<HashMap<String, String>, ErrorType> {
		let ports = app
			.urls
			.iter()
			.map(|url| url.port.to_string())
			.collect::<Vec<_>>()
			.join(" ");

		Ok(HashMap::from([(APP_PORT_ARG.to_string(), ports)]))
	}
}
