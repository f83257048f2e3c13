use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A dynamic configuration document for the reverse proxy, describing the
/// routes of a single deployed app version. The proxy watches a directory of
/// these documents and reloads whenever one is created or removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyRouteSet {
	/// The HTTP section of the document
	pub http: HttpRoutes,
}

/// The routers, services and middlewares of a [`ProxyRouteSet`]. Each map is
/// keyed by a name that is unique across all documents the proxy loads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpRoutes {
	/// Maps an incoming request rule to a service
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub routers: BTreeMap<String, Router>,
	/// The upstream servers requests are forwarded to
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub services: BTreeMap<String, Service>,
	/// Request rewrites applied between a router and its service
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub middlewares: BTreeMap<String, Middleware>,
}

/// A router, matching requests by a rule and sending them to a service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Router {
	/// The match rule, e.g. `Host("example.com") && Path("/api/deadbee")`
	pub rule: String,
	/// The name of the service matched requests are forwarded to
	pub service: String,
	/// The entry points the router listens on
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub entry_points: Vec<String>,
	/// The names of the middlewares applied, in order
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub middlewares: Vec<String>,
	/// TLS settings, when the router terminates TLS
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub tls: Option<RouterTls>,
}

/// TLS settings of a [`Router`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterTls {
	/// The resolver certificates are obtained from
	pub cert_resolver: String,
}

/// A service, balancing requests across a set of servers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
	pub load_balancer: LoadBalancer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancer {
	pub servers: Vec<Server>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
	/// The upstream URL, e.g. `http://172.31.0.5:8080`
	pub url: String,
}

/// A request rewrite. Only prefix stripping is used, so that an app served
/// under `/<path>/<version>` sees requests rooted at `/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Middleware {
	pub strip_prefix: StripPrefix,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StripPrefix {
	pub prefixes: Vec<String>,
}

impl ProxyRouteSet {
	/// Whether the document routes nothing
	pub fn is_empty(&self) -> bool {
		self.http.routers.is_empty()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn wire_format_uses_proxy_field_names() {
		let mut routes = ProxyRouteSet::default();
		routes.http.routers.insert(
			"app-web_latest_80".into(),
			Router {
				rule: r#"Host("example.com")"#.into(),
				service: "svc-web_latest_80".into(),
				entry_points: vec!["websecure".into()],
				middlewares: vec![],
				tls: Some(RouterTls {
					cert_resolver: "letsencrypt".into(),
				}),
			},
		);
		routes.http.services.insert(
			"svc-web_latest_80".into(),
			Service {
				load_balancer: LoadBalancer {
					servers: vec![Server {
						url: "http://172.31.0.2:80".into(),
					}],
				},
			},
		);

		let value = serde_json::to_value(&routes).unwrap();
		let router = &value["http"]["routers"]["app-web_latest_80"];
		assert_eq!(router["entryPoints"][0], "websecure");
		assert_eq!(router["tls"]["certResolver"], "letsencrypt");
		assert!(router.get("middlewares").is_none());
		assert!(value["http"].get("middlewares").is_none());
		assert_eq!(
			value["http"]["services"]["svc-web_latest_80"]["loadBalancer"]["servers"][0]["url"],
			"http://172.31.0.2:80"
		);
	}
}
