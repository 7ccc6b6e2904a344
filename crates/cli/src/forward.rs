//! Port-forward sessions.
//!
//! Turns a batch of `local:remote` specs into concurrent tunnels against a
//! single target pod. Each tunnel is an independent task bridging a local
//! TCP listener to the pod via the API server's websocket port-forward;
//! one tunnel failing never tears down its siblings. The session blocks
//! until the process is terminated.

use std::fmt;
use std::net::TcpListener as StdTcpListener;

use k8s_openapi::api::core::v1::Pod;
use kube::api::Api;
use kube::Client;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::ui;

/// One aligned local:remote tunnel definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortPair {
    pub local: u16,
    pub remote: u16,
}

impl fmt::Display for PortPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.local, self.remote)
    }
}

/// Parse raw `local:remote` specs. Malformed entries are dropped with a
/// diagnostic and never abort the batch; an empty local field resolves to
/// an OS-assigned ephemeral port, exactly once, here.
#[must_use]
pub fn parse_port_specs(specs: &[String]) -> Vec<PortPair> {
    let mut pairs = Vec::new();
    for raw in specs {
        match parse_one(raw) {
            Ok(pair) => pairs.push(pair),
            Err(err) => {
                warn!(spec = %raw, "dropping port spec");
                ui::print_warning(&format!("{err}, skipped"));
            }
        }
    }
    pairs
}

fn parse_one(raw: &str) -> Result<PortPair> {
    let fields: Vec<&str> = raw.split(':').collect();
    if fields.len() < 2 {
        return Err(Error::PortSpec(raw.to_string()));
    }
    let local = if fields[0].is_empty() {
        ephemeral_port()?
    } else {
        parse_port(fields[0]).ok_or_else(|| Error::PortSpec(raw.to_string()))?
    };
    let remote = parse_port(fields[1]).ok_or_else(|| Error::PortSpec(raw.to_string()))?;
    Ok(PortPair { local, remote })
}

fn parse_port(field: &str) -> Option<u16> {
    match field.parse::<u16>() {
        Ok(0) | Err(_) => None,
        Ok(port) => Some(port),
    }
}

/// Ask the OS for a currently unused local port.
fn ephemeral_port() -> Result<u16> {
    let listener = StdTcpListener::bind(("127.0.0.1", 0))?;
    Ok(listener.local_addr()?.port())
}

/// Select the forwarding target from a workload's pod listing: the first
/// pod, deterministically.
pub fn select_target_pod(workload: &str, pods: &[Pod]) -> Result<(String, String)> {
    let first = pods
        .first()
        .ok_or_else(|| Error::NoPodsFound(workload.to_string()))?;
    let name = first
        .metadata
        .name
        .clone()
        .ok_or_else(|| Error::NoPodsFound(workload.to_string()))?;
    let namespace = first.metadata.namespace.clone().unwrap_or_default();
    Ok((name, namespace))
}

/// The operator-facing description of what a session forwards.
#[must_use]
pub fn forwarding_summary(pod: &str, pairs: &[PortPair]) -> String {
    let lines: Vec<String> = pairs
        .iter()
        .map(|pair| format!("127.0.0.1:{} -> {}:{}", pair.local, pod, pair.remote))
        .collect();
    lines.join("\n")
}

/// A foreground forwarding session against a single pod.
pub struct ForwardSession {
    client: Client,
    pod_name: String,
    namespace: String,
    pairs: Vec<PortPair>,
}

impl ForwardSession {
    #[must_use]
    pub fn new(client: Client, pod_name: String, namespace: String, pairs: Vec<PortPair>) -> Self {
        Self {
            client,
            pod_name,
            namespace,
            pairs,
        }
    }

    /// Open every tunnel and block until the process is terminated.
    ///
    /// # Errors
    ///
    /// Returns an error when there are no pairs to forward; individual
    /// tunnel failures are reported and the rest keep running.
    pub async fn run(self) -> Result<()> {
        if self.pairs.is_empty() {
            return Err(Error::Configuration("no valid port specs to forward".into()));
        }

        ui::print_info(&format!(
            "forwarding to pod {} in {}",
            self.pod_name, self.namespace
        ));
        ui::print_info(&forwarding_summary(&self.pod_name, &self.pairs));

        let api: Api<Pod> = Api::namespaced(self.client.clone(), &self.namespace);
        let mut handles = Vec::new();
        for pair in self.pairs.clone() {
            let api = api.clone();
            let pod = self.pod_name.clone();
            handles.push(tokio::spawn(async move {
                if let Err(err) = serve_tunnel(api, pod, pair).await {
                    warn!(%pair, %err, "tunnel terminated");
                    ui::print_warning(&format!("tunnel {pair} terminated: {err}"));
                }
            }));
        }

        // Tunnels live until the process goes away.
        tokio::signal::ctrl_c().await?;
        info!("port-forward cancelled, releasing tunnels");
        for handle in &handles {
            handle.abort();
        }
        Ok(())
    }
}

/// Accept local connections forever, bridging each one to the pod.
async fn serve_tunnel(api: Api<Pod>, pod: String, pair: PortPair) -> Result<()> {
    let listener = TcpListener::bind(("127.0.0.1", pair.local)).await?;
    info!(%pair, pod = %pod, "tunnel listening");
    loop {
        let (mut local_conn, peer) = listener.accept().await?;
        debug!(%peer, %pair, "accepted connection");
        let api = api.clone();
        let pod = pod.clone();
        tokio::spawn(async move {
            if let Err(err) = forward_connection(&api, &pod, pair.remote, &mut local_conn).await {
                warn!(%pair, %err, "connection closed with error");
            }
        });
    }
}

async fn forward_connection(
    api: &Api<Pod>,
    pod: &str,
    remote: u16,
    local_conn: &mut TcpStream,
) -> Result<()> {
    let mut forwarder = api.portforward(pod, &[remote]).await?;
    let mut upstream = forwarder.take_stream(remote).ok_or_else(|| {
        Error::Configuration(format!("remote port {remote} not offered by forwarder"))
    })?;
    tokio::io::copy_bidirectional(local_conn, &mut upstream).await?;
    drop(upstream);
    if let Err(err) = forwarder.join().await {
        debug!(%err, "forwarder closed with error");
    }
    Ok(())
}
