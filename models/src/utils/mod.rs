/// All the constants used in the application.
/// Constants are used to avoid hardcoding values, since that might introduce
/// typos.
pub mod constants {
	/// The version alias that always points to the most recent deployment
	pub const LATEST_VERSION: &str = "latest";
	/// The number of characters of a commit hash used as a version
	pub const SHORT_VERSION_LEN: usize = 7;
	/// The prefix of the runtime network backing a namespace
	pub const NAMESPACE_NETWORK_PREFIX: &str = "berth_";
	/// The commit hash providers send when a reference is deleted
	pub const ZERO_COMMIT: &str = "0000000000000000000000000000000000000000";

	/// The labels every managed container carries
	pub mod labels {
		/// The namespace the container belongs to
		pub const NAMESPACE: &str = "berth.namespace";
		/// The app the container runs
		pub const APP: &str = "berth.app";
		/// The version of the app the container runs
		pub const VERSION: &str = "berth.version";
	}
}

/// Returns the name of the runtime network backing the given namespace
pub fn namespace_network_name(namespace: &str) -> String {
	format!("{}{}", constants::NAMESPACE_NETWORK_PREFIX, namespace)
}
