use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::utils::constants::labels;

/// The business identity of a managed container. Containers carry this only
/// as runtime labels; this type is the one place those labels are written and
/// read.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeIdentity {
	/// The namespace the container's app belongs to
	pub namespace: String,
	/// The name of the app
	pub app: String,
	/// The deployed version, a short commit hash or `latest`
	pub version: String,
}

impl RuntimeIdentity {
	/// Encodes the identity as container labels
	pub fn to_labels(&self) -> HashMap<String, String> {
		[
			(labels::NAMESPACE, &self.namespace),
			(labels::APP, &self.app),
			(labels::VERSION, &self.version),
		]
		.into_iter()
		.map(|(key, value)| (key.to_string(), value.clone()))
		.collect()
	}

	/// Decodes the identity from container labels. Returns [`None`] unless all
	/// three labels are present and non-empty, which means the container is not
	/// managed by Berth.
	pub fn from_labels(container_labels: &HashMap<String, String>) -> Option<Self> {
		let get = |key: &str| {
			container_labels
				.get(key)
				.filter(|value| !value.is_empty())
				.cloned()
		};

		Some(Self {
			namespace: get(labels::NAMESPACE)?,
			app: get(labels::APP)?,
			version: get(labels::VERSION)?,
		})
	}

	/// The name of the proxy route document for this identity. One document
	/// exists per app+version while its container is live.
	pub fn route_document_name(&self) -> String {
		format!("{}_{}_{}", self.namespace, self.app, self.version)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn identity() -> RuntimeIdentity {
		RuntimeIdentity {
			namespace: "team-a".into(),
			app: "web".into(),
			version: "deadbee".into(),
		}
	}

	#[test]
	fn labels_round_trip() {
		let labels = identity().to_labels();
		assert_eq!(labels.len(), 3);
		assert_eq!(RuntimeIdentity::from_labels(&labels), Some(identity()));
	}

	#[test]
	fn missing_or_empty_label_is_unmanaged() {
		let mut labels = identity().to_labels();
		labels.insert(labels::VERSION.to_string(), String::new());
		assert_eq!(RuntimeIdentity::from_labels(&labels), None);

		labels.remove(labels::VERSION);
		assert_eq!(RuntimeIdentity::from_labels(&labels), None);
	}

	#[test]
	fn unrelated_labels_are_ignored() {
		let mut labels = identity().to_labels();
		labels.insert("com.docker.compose.project".into(), "other".into());
		assert_eq!(RuntimeIdentity::from_labels(&labels), Some(identity()));
	}
}
