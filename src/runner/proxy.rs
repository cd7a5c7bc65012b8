//! Handle to the credential-injecting egress proxy.
//!
//! The proxy itself is an external collaborator: it is already running on
//! a private Docker network when the orchestrator starts, holds the real
//! registry credentials, and injects them into outbound requests. The
//! updater container only ever sees the proxy. This handle carries the
//! three facts the runner needs to wire a container to it.

/// Connection details for the egress proxy.
#[derive(Debug, Clone)]
pub struct ProxyHandle {
    /// URL the container's `HTTP_PROXY`/`HTTPS_PROXY` point at.
    pub proxy_url: String,
    /// PEM certificate the container must trust for TLS interception.
    pub ca_cert_pem: String,
    /// Docker network the container is attached to instead of the default
    /// bridge; its only route out is through the proxy.
    pub network_mode: String,
}
