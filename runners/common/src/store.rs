use std::{
	future::Future,
	io::ErrorKind as IoErrorKind,
	path::{Path, PathBuf},
};

use tokio::fs;

use crate::prelude::*;

/// The name of the document a namespace is persisted as, inside its own
/// directory
const NAMESPACE_DOCUMENT: &str = "namespace.json";

/// The one place namespaces (and the apps and deploy logs they own) are read
/// from and written to
pub trait NamespaceStore: Clone + Send + Sync + 'static {
	/// Lists every namespace
	fn list(&self) -> impl Future<Output = Result<Vec<Namespace>, ErrorType>> + Send;

	/// Loads a namespace by name. Returns [`None`] if it does not exist.
	fn load(&self, name: &str) -> impl Future<Output = Result<Option<Namespace>, ErrorType>> + Send;

	/// Creates or replaces a namespace. A reader never observes a partially
	/// written namespace.
	fn save(&self, namespace: &Namespace) -> impl Future<Output = Result<(), ErrorType>> + Send;

	/// Removes a namespace, and everything stored alongside it. Removing a
	/// namespace that does not exist is not an error.
	fn remove(&self, name: &str) -> impl Future<Output = Result<(), ErrorType>> + Send;
}

/// A [`NamespaceStore`] keeping one JSON document per namespace at
/// `<dataDir>/namespace/<name>/namespace.json`
#[derive(Debug, Clone)]
pub struct FileNamespaceStore {
	/// The `<dataDir>/namespace` directory
	root: PathBuf,
}

impl FileNamespaceStore {
	/// Creates a store rooted at the given data directory
	pub fn new(data_dir: impl AsRef<Path>) -> Self {
		Self {
			root: data_dir.as_ref().join("namespace"),
		}
	}

	/// The directory everything belonging to a namespace lives in
	pub fn namespace_dir(&self, name: &str) -> PathBuf {
		self.root.join(name)
	}

	fn document_path(&self, name: &str) -> PathBuf {
		self.namespace_dir(name).join(NAMESPACE_DOCUMENT)
	}
}

impl NamespaceStore for FileNamespaceStore {
	async fn list(&self) -> Result<Vec<Namespace>, ErrorType> {
		let mut entries = match fs::read_dir(&self.root).await {
			Ok(entries) => entries,
			Err(err) if err.kind() == IoErrorKind::NotFound => return Ok(vec![]),
			Err(err) => return Err(err.into()),
		};

		let mut namespaces = Vec::new();
		while let Some(entry) = entries.next_entry().await? {
			if !entry.file_type().await?.is_dir() {
				continue;
			}
			let Some(name) = entry.file_name().to_str().map(str::to_string) else {
				warn!("Skipping namespace directory with a non UTF-8 name");
				continue;
			};
			if let Some(namespace) = self.load(&name).await? {
				namespaces.push(namespace);
			}
		}
		namespaces.sort_by(|a, b| a.name.cmp(&b.name));

		Ok(namespaces)
	}

	async fn load(&self, name: &str) -> Result<Option<Namespace>, ErrorType> {
		let content = match fs::read(self.document_path(name)).await {
			Ok(content) => content,
			Err(err) if err.kind() == IoErrorKind::NotFound => return Ok(None),
			Err(err) => return Err(err.into()),
		};

		Ok(Some(serde_json::from_slice(&content)?))
	}

	#[instrument(skip(self, namespace), fields(namespace = %namespace.name))]
	async fn save(&self, namespace: &Namespace) -> Result<(), ErrorType> {
		let dir = self.namespace_dir(&namespace.name);
		fs::create_dir_all(&dir).await?;

		let content = serde_json::to_vec_pretty(namespace)?;
		write_atomically(&dir.join(NAMESPACE_DOCUMENT), &content).await?;

		trace!("Namespace saved");
		Ok(())
	}

	#[instrument(skip(self))]
	async fn remove(&self, name: &str) -> Result<(), ErrorType> {
		match fs::remove_dir_all(self.namespace_dir(name)).await {
			Ok(()) => Ok(()),
			Err(err) if err.kind() == IoErrorKind::NotFound => Ok(()),
			Err(err) => Err(err.into()),
		}
	}
}

/// Writes a file by writing a sibling temporary file and renaming it over the
/// destination, so readers see either the old or the new content
pub(crate) async fn write_atomically(path: &Path, content: &[u8]) -> Result<(), ErrorType> {
	let mut temp_name = path.file_name().unwrap_or_default().to_os_string();
	temp_name.push(".tmp");
	let temp_path = path.with_file_name(temp_name);

	fs::write(&temp_path, content).await?;
	fs::rename(&temp_path, path).await?;

	Ok(())
}
