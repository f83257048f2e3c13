use serde::{Deserialize, Serialize};

use crate::GitRefType;

/// The specification of an app. An app is bound to a git repository and is
/// rebuilt and redeployed whenever a push matching its [`Trigger`] arrives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSpec {
	/// The namespace this app belongs to
	pub namespace: String,
	/// The name of the app, unique within its namespace
	pub name: String,
	/// The number of CPU cores the container is limited to
	pub cpu: f64,
	/// The memory limit of the container, in GB
	pub memory: u32,
	/// The git repository the app is built from
	pub repo: String,
	/// The access token used for the git repository, if any. When this is not
	/// set, a token configured for the repository's host is used instead
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub token: Option<String>,
	/// The build template the app is built with. An empty platform means the
	/// repository's own `Dockerfile` is used
	#[serde(default)]
	pub platform: String,
	/// The rule deciding which git pushes trigger a deployment
	pub trigger: Trigger,
	/// The environment variables passed to the container, in order
	#[serde(default)]
	pub envs: Vec<EnvVar>,
	/// The URLs the app is exposed on, in order
	#[serde(default)]
	pub urls: Vec<AppUrl>,
	/// The secret webhooks are verified against
	pub secret: String,
	/// Every version ever deployed, including the rolling "latest" record
	#[serde(default)]
	pub deploy: Vec<DeployRecord>,
}

impl AppSpec {
	/// The name of the container running the given version of this app
	pub fn container_name(&self, version: &str) -> String {
		format!("{}_{}", self.name, version)
	}

	/// The image tag the given version of this app is built as
	pub fn image_tag(&self, version: &str) -> String {
		format!("{}:{}", self.name, version)
	}

	/// Finds the deploy record for the given version
	pub fn find_deployment(&self, version: &str) -> Option<&DeployRecord> {
		self.deploy.iter().find(|record| record.version == version)
	}

	/// Records a deployment. Any earlier record of the same version is dropped,
	/// so the log only ever holds one record per version.
	pub fn record_deployment(&mut self, record: DeployRecord) {
		self.deploy.retain(|existing| existing.version != record.version);
		self.deploy.push(record);
	}
}

/// The rule deciding which git pushes trigger a deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trigger {
	/// Whether branch pushes or tag pushes trigger the app
	#[serde(rename = "type")]
	pub trigger_type: GitRefType,
	/// A branch name for branch triggers, a glob pattern for tag triggers
	pub rule: String,
}

/// An environment variable passed to the app's container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
	pub key: String,
	pub value: String,
}

/// A rule exposing one container port on a host (optionally with a path)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppUrl {
	/// The external host, optionally followed by a path, e.g.
	/// `api.example.com` or `example.com/api`
	pub host: String,
	/// The port inside the container
	pub port: u16,
}

/// A single deployed version of an app
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployRecord {
	/// The ID of the container running this version
	pub container_id: String,
	/// The version tag. Either a short commit hash or [`LATEST_VERSION`]
	///
	/// [`LATEST_VERSION`]: crate::utils::constants::LATEST_VERSION
	pub version: String,
	/// The full commit hash this version was built from
	#[serde(default)]
	pub commit: String,
	/// The path the version is reachable under
	pub url: String,
}

#[cfg(test)]
mod tests {
	use serde_test::{assert_tokens, Token};

	use super::*;

	fn app() -> AppSpec {
		AppSpec {
			namespace: "team-a".into(),
			name: "web".into(),
			cpu: 1.0,
			memory: 1,
			repo: "https://github.com/acme/web.git".into(),
			token: None,
			platform: String::new(),
			trigger: Trigger {
				trigger_type: GitRefType::Branch,
				rule: "main".into(),
			},
			envs: vec![],
			urls: vec![],
			secret: "s3cret".into(),
			deploy: vec![],
		}
	}

	fn record(container_id: &str, version: &str) -> DeployRecord {
		DeployRecord {
			container_id: container_id.into(),
			version: version.into(),
			commit: String::new(),
			url: format!("/{version}"),
		}
	}

	#[test]
	fn recording_a_version_replaces_the_previous_record() {
		let mut app = app();
		app.record_deployment(record("c1", "deadbee"));
		app.record_deployment(record("c2", "latest"));
		app.record_deployment(record("c3", "deadbee"));

		assert_eq!(app.deploy.len(), 2);
		assert_eq!(app.find_deployment("deadbee").unwrap().container_id, "c3");
		assert_eq!(app.find_deployment("latest").unwrap().container_id, "c2");
	}

	#[test]
	fn names_are_derived_from_app_and_version() {
		let app = app();
		assert_eq!(app.container_name("deadbee"), "web_deadbee");
		assert_eq!(app.image_tag("latest"), "web:latest");
	}

	#[test]
	fn trigger_wire_format() {
		assert_tokens(
			&Trigger {
				trigger_type: GitRefType::Tag,
				rule: "v*".into(),
			},
			&[
				Token::Struct {
					name: "Trigger",
					len: 2,
				},
				Token::Str("type"),
				Token::UnitVariant {
					name: "GitRefType",
					variant: "tag",
				},
				Token::Str("rule"),
				Token::Str("v*"),
				Token::StructEnd,
			],
		);
	}

	#[test]
	fn deploy_record_wire_format() {
		assert_tokens(
			&record("abc", "latest"),
			&[
				Token::Struct {
					name: "DeployRecord",
					len: 4,
				},
				Token::Str("containerId"),
				Token::Str("abc"),
				Token::Str("version"),
				Token::Str("latest"),
				Token::Str("commit"),
				Token::Str(""),
				Token::Str("url"),
				Token::Str("/latest"),
				Token::StructEnd,
			],
		);
	}
}
