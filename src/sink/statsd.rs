//! Immediate statsd emission
//!
//! Points are encoded as statsd lines and sent as one datagram per `emit`.
//! Tagged points use the configured tag scheme; hierarchical points carry
//! their dimensions in the key and are sent as plain counters and timings.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};

use super::MetricSink;
use crate::config::TagScheme;
use crate::error::SinkError;
use crate::instrumentation::{Dimensions, MetricKind, MetricPoint};
use crate::telemetry;

const SINK_NAME: &str = "statsd";

/// Fire-and-forget datagram delivery.
pub trait DatagramTransport: Send + Sync {
    fn send(&self, payload: &str) -> Result<(), SinkError>;
}

/// Non-blocking UDP socket connected to the statsd agent.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    target: SocketAddr,
}

impl UdpTransport {
    pub fn connect(host: &str, port: u16) -> Result<Self, SinkError> {
        let target = (host, port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| SinkError::Unresolved(format!("{}:{}", host, port)))?;

        let bind = if target.is_ipv4() {
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
        } else {
            SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
        };

        let socket = UdpSocket::bind(bind)?;
        socket.set_nonblocking(true)?;
        socket.connect(target)?;

        Ok(Self { socket, target })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }
}

impl DatagramTransport for UdpTransport {
    fn send(&self, payload: &str) -> Result<(), SinkError> {
        self.socket.send(payload.as_bytes())?;
        Ok(())
    }
}

/// Statsd sink for the tagged and hierarchical styles.
pub struct StatsdSink<T = UdpTransport> {
    transport: T,
    prefix: Option<String>,
    scheme: TagScheme,
}

impl<T: DatagramTransport> StatsdSink<T> {
    pub fn new(transport: T, prefix: Option<&str>, scheme: TagScheme) -> Self {
        Self {
            transport,
            prefix: prefix.map(str::to_string),
            scheme,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Encode one point as a statsd line.
    pub fn encode(&self, point: &MetricPoint) -> String {
        let key = match &self.prefix {
            Some(prefix) => sanitise_key(&format!("{}.{}", prefix, point.key())),
            None => sanitise_key(point.key()),
        };
        let value = format!("{}|{}", point.value, type_suffix(point.kind));

        match (&point.dimensions, self.scheme) {
            (Dimensions::Tags(tags), TagScheme::Datadog) if !tags.is_empty() => {
                let tags: Vec<String> = tags
                    .iter()
                    .map(|(k, v)| format!("{}:{}", k, escape_tag_value(v)))
                    .collect();
                format!("{}:{}|#{}", key, value, tags.join(","))
            }
            (Dimensions::Tags(tags), TagScheme::Graphite) if !tags.is_empty() => {
                let tags: String = tags
                    .iter()
                    .map(|(k, v)| format!(";{}={}", k, escape_tag_value(v)))
                    .collect();
                format!("{}{}:{}", key, tags, value)
            }
            _ => format!("{}:{}", key, value),
        }
    }
}

impl<T: DatagramTransport> MetricSink for StatsdSink<T> {
    fn emit(&self, points: Vec<MetricPoint>) {
        if points.is_empty() {
            return;
        }

        let payload = points
            .iter()
            .map(|point| self.encode(point))
            .collect::<Vec<_>>()
            .join("\n");

        match self.transport.send(&payload) {
            Ok(()) => {
                tracing::debug!("Sent {} statsd point(s)", points.len());
                telemetry::record_points_emitted(SINK_NAME, points.len());
            }
            Err(e) => {
                let data = serde_json::to_string(&points).unwrap_or_else(|_| payload.clone());
                tracing::error!("{} - data : {}", e, data);
                telemetry::record_emit_error(SINK_NAME);
            }
        }
    }
}

fn type_suffix(kind: MetricKind) -> &'static str {
    match kind {
        MetricKind::Counter => "c",
        MetricKind::Timing => "ms",
    }
}

/// Every non-word character other than `.` becomes `_`, then lowercase.
pub fn sanitise_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c == '.' || c == '_' || c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Replace characters that would break the statsd line structure.
fn escape_tag_value(value: &str) -> String {
    value
        .chars()
        .map(|c| match c {
            '|' | ',' | '#' | ';' | '=' | '\n' | '\r' => '_',
            c => c,
        })
        .collect()
}
