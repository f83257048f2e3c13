use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::AppSpec;

/// An isolated network domain containing apps, databases and redis
/// instances. Each namespace is backed by exactly one private bridge network
/// with its own /24 subnet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Namespace {
	/// The name of the namespace
	pub name: String,
	/// The name of the runtime network backing this namespace
	pub network: String,
	/// The ID of the runtime network backing this namespace
	pub network_id: String,
	/// The /24 subnet allocated to the namespace, e.g. `172.30.1.0/24`
	pub subnet: String,
	/// The gateway of the subnet, e.g. `172.30.1.1`
	pub gateway: String,
	/// When the namespace was created
	#[serde(with = "time::serde::rfc3339")]
	pub created_at: OffsetDateTime,
	/// The apps in this namespace
	#[serde(default)]
	pub apps: Vec<AppSpec>,
	/// The databases in this namespace
	#[serde(default)]
	pub databases: Vec<DatabaseSpec>,
	/// The redis instances in this namespace
	#[serde(default)]
	pub redis: Vec<RedisSpec>,
}

impl Namespace {
	/// Finds an app by name
	pub fn find_app(&self, name: &str) -> Option<&AppSpec> {
		self.apps.iter().find(|app| app.name == name)
	}

	/// Finds an app by name, mutably
	pub fn find_app_mut(&mut self, name: &str) -> Option<&mut AppSpec> {
		self.apps.iter_mut().find(|app| app.name == name)
	}

	/// Removes an app by name, returning it if it existed
	pub fn remove_app(&mut self, name: &str) -> Option<AppSpec> {
		let index = self.apps.iter().position(|app| app.name == name)?;
		Some(self.apps.remove(index))
	}
}

/// A database owned by a namespace. Provisioning is handled outside the
/// engine. Only its definition is persisted with the namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseSpec {
	pub name: String,
	pub db_type: String,
	pub db_name: String,
	pub username: String,
	pub password: String,
	pub cpu: f64,
	pub memory: f64,
	#[serde(default)]
	pub container_id: String,
	#[serde(default)]
	pub remote: bool,
}

/// A redis instance owned by a namespace. Provisioning is handled outside the
/// engine. Only its definition is persisted with the namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedisSpec {
	pub name: String,
	pub version: String,
	pub password: String,
	pub cpu: f64,
	pub memory: f64,
	#[serde(default)]
	pub aof: bool,
	#[serde(default)]
	pub eviction: String,
	#[serde(default)]
	pub container_id: String,
}
