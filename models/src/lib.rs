#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::missing_docs_in_private_items)]
#![cfg_attr(
	debug_assertions,
	allow(unused_variables, dead_code, unused_mut),
	allow(missing_docs, clippy::missing_docs_in_private_items)
)]

//! The data model shared by the Berth engine and its runners: namespaces,
//! apps and their deployments, git references, the labels identifying a
//! managed container and the proxy route documents.

pub mod utils;

pub mod prelude {
	pub use crate::{utils::constants, ErrorKind, ErrorType};
}

mod app;
mod error;
mod git;
mod identity;
mod namespace;
mod route;

pub use self::{app::*, error::*, git::*, identity::*, namespace::*, route::*};
