//! Metric points and the per-style point builder.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::lifecycle::{CompletionOutcome, RequestObservation};
use crate::config::{BackendConfig, BackendStyle};

/// Metric names as constants for consistency
pub mod names {
    pub const REQUEST_DURATION: &str = "request_duration";
    pub const RESPONSE_CODE: &str = "response_code";
    pub const RESPONSE_TIME: &str = "response_time";
}

/// Tag keys
pub mod tags {
    pub const PATH: &str = "path";
    pub const METHOD: &str = "method";
    pub const STATUS_CODE: &str = "status_code";
    pub const HOST: &str = "host";
    pub const SERVICE: &str = "service";
    pub const APPLICATION: &str = "application";
}

/// Value of the `service` tag on tagged points.
pub const SERVICE_NAME: &str = "apigateway";

/// Path key used by the hierarchical style for `/`.
pub const ROOT_PATH_KEY: &str = "root";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Timing,
}

/// How a point carries its dimensions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimensions {
    Tags(BTreeMap<String, String>),
    /// Fully encoded dotted key, dimensions included.
    Key(String),
}

/// One datum for a metrics backend. Built and handed off immediately.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricPoint {
    pub name: String,
    pub kind: MetricKind,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    pub dimensions: Dimensions,
}

impl MetricPoint {
    pub fn tag(&self, key: &str) -> Option<&str> {
        match &self.dimensions {
            Dimensions::Tags(tags) => tags.get(key).map(String::as_str),
            Dimensions::Key(_) => None,
        }
    }

    pub fn tags(&self) -> Option<&BTreeMap<String, String>> {
        match &self.dimensions {
            Dimensions::Tags(tags) => Some(tags),
            Dimensions::Key(_) => None,
        }
    }

    /// The key a statsd backend should see: the encoded key for
    /// hierarchical points, the bare name otherwise.
    pub fn key(&self) -> &str {
        match &self.dimensions {
            Dimensions::Key(key) => key,
            Dimensions::Tags(_) => &self.name,
        }
    }
}

/// Turns a finished request into backend-specific points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PointBuilder {
    Tagged,
    Hierarchical,
    Line {
        measurement: String,
        application: String,
    },
}

impl PointBuilder {
    pub fn from_config(backend: &BackendConfig) -> Self {
        match backend.style {
            BackendStyle::Tagged => PointBuilder::Tagged,
            BackendStyle::Hierarchical => PointBuilder::Hierarchical,
            BackendStyle::Line => PointBuilder::Line {
                measurement: backend.measurement.clone(),
                application: backend.application.clone(),
            },
        }
    }

    /// Build the points for one request. `path` is already sanitized.
    ///
    /// The hierarchical style needs a status code for every key, so it
    /// yields nothing for errored or aborted requests.
    pub fn build(
        &self,
        observation: &RequestObservation,
        outcome: &CompletionOutcome,
        path: &str,
    ) -> Vec<MetricPoint> {
        match self {
            PointBuilder::Tagged => {
                let mut tags = request_tags(observation, outcome, path);
                tags.insert(tags::SERVICE.to_string(), SERVICE_NAME.to_string());
                vec![timing(names::REQUEST_DURATION, outcome, Dimensions::Tags(tags))]
            }
            PointBuilder::Hierarchical => {
                let Some(status) = outcome.status() else {
                    return Vec::new();
                };
                let status = status.as_u16();
                let path_key = path_key(path);

                vec![
                    counter(
                        names::RESPONSE_CODE,
                        outcome,
                        format!("{}.{}", names::RESPONSE_CODE, status),
                    ),
                    counter(
                        names::RESPONSE_CODE,
                        outcome,
                        format!("{}.{}.{}", names::RESPONSE_CODE, path_key, status),
                    ),
                    timing(
                        names::RESPONSE_TIME,
                        outcome,
                        Dimensions::Key(format!("{}.{}", names::RESPONSE_TIME, path_key)),
                    ),
                ]
            }
            PointBuilder::Line {
                measurement,
                application,
            } => {
                let mut tags = request_tags(observation, outcome, path);
                tags.insert(tags::APPLICATION.to_string(), application.clone());
                vec![timing(measurement, outcome, Dimensions::Tags(tags))]
            }
        }
    }
}

fn request_tags(
    observation: &RequestObservation,
    outcome: &CompletionOutcome,
    path: &str,
) -> BTreeMap<String, String> {
    let mut tags = BTreeMap::new();
    tags.insert(tags::PATH.to_string(), path.to_string());
    tags.insert(tags::METHOD.to_string(), observation.method.clone());
    tags.insert(tags::HOST.to_string(), observation.host.clone());
    if let Some(status) = outcome.status() {
        tags.insert(tags::STATUS_CODE.to_string(), status.as_u16().to_string());
    }
    tags
}

fn timing(name: &str, outcome: &CompletionOutcome, dimensions: Dimensions) -> MetricPoint {
    MetricPoint {
        name: name.to_string(),
        kind: MetricKind::Timing,
        value: outcome.elapsed_millis(),
        timestamp: outcome.finished_at,
        dimensions,
    }
}

fn counter(name: &str, outcome: &CompletionOutcome, key: String) -> MetricPoint {
    MetricPoint {
        name: name.to_string(),
        kind: MetricKind::Counter,
        value: 1.0,
        timestamp: outcome.finished_at,
        dimensions: Dimensions::Key(key),
    }
}

/// Dotted form of a path for hierarchical keys: `/users/_id_` becomes
/// `users._id_`, `/` becomes `root`.
pub fn path_key(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        ROOT_PATH_KEY.to_string()
    } else {
        segments.join(".")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrumentation::lifecycle::Terminal;
    use crate::instrumentation::timer::RequestTimer;
    use http::StatusCode;
    use std::time::Duration;

    fn observation() -> RequestObservation {
        RequestObservation {
            start: RequestTimer::start(),
            path: "/users/42".to_string(),
            method: "GET".to_string(),
            host: "api.example.com".to_string(),
        }
    }

    fn outcome(terminal: Terminal) -> CompletionOutcome {
        CompletionOutcome {
            terminal,
            elapsed: Duration::from_micros(12_500),
            finished_at: Utc::now(),
        }
    }

    #[test]
    fn test_tagged_point() {
        let points = PointBuilder::Tagged.build(
            &observation(),
            &outcome(Terminal::Completed(StatusCode::OK)),
            "/users/_id_",
        );

        assert_eq!(points.len(), 1);
        let point = &points[0];
        assert_eq!(point.name, "request_duration");
        assert_eq!(point.kind, MetricKind::Timing);
        assert_eq!(point.value, 12.5);
        assert_eq!(point.tag("path"), Some("/users/_id_"));
        assert_eq!(point.tag("method"), Some("GET"));
        assert_eq!(point.tag("status_code"), Some("200"));
        assert_eq!(point.tag("host"), Some("api.example.com"));
        assert_eq!(point.tag("service"), Some("apigateway"));
        assert_eq!(point.tags().map(|t| t.len()), Some(5));
    }

    #[test]
    fn test_tagged_point_without_status() {
        let points = PointBuilder::Tagged.build(&observation(), &outcome(Terminal::Aborted), "/x");
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].tag("status_code"), None);
        assert_eq!(points[0].tags().map(|t| t.len()), Some(4));
    }

    #[test]
    fn test_hierarchical_points() {
        let points = PointBuilder::Hierarchical.build(
            &observation(),
            &outcome(Terminal::Completed(StatusCode::NOT_FOUND)),
            "/users/_id_",
        );

        let keys: Vec<&str> = points.iter().map(MetricPoint::key).collect();
        assert_eq!(
            keys,
            vec![
                "response_code.404",
                "response_code.users._id_.404",
                "response_time.users._id_",
            ]
        );
        assert_eq!(points[0].kind, MetricKind::Counter);
        assert_eq!(points[0].value, 1.0);
        assert_eq!(points[2].kind, MetricKind::Timing);
        assert_eq!(points[2].value, 12.5);
    }

    #[test]
    fn test_hierarchical_skips_without_status() {
        let builder = PointBuilder::Hierarchical;
        assert!(builder.build(&observation(), &outcome(Terminal::Errored), "/a").is_empty());
        assert!(builder.build(&observation(), &outcome(Terminal::Aborted), "/a").is_empty());
    }

    #[test]
    fn test_line_point() {
        let builder = PointBuilder::from_config(&BackendConfig {
            style: BackendStyle::Line,
            application: "checkout".to_string(),
            ..Default::default()
        });
        let out = outcome(Terminal::Completed(StatusCode::CREATED));
        let points = builder.build(&observation(), &out, "/orders");

        assert_eq!(points.len(), 1);
        assert_eq!(points[0].name, "requests");
        assert_eq!(points[0].tag("application"), Some("checkout"));
        assert_eq!(points[0].tag("status_code"), Some("201"));
        assert_eq!(points[0].tag("service"), None);
        assert_eq!(points[0].timestamp, out.finished_at);
    }

    #[test]
    fn test_path_key() {
        assert_eq!(path_key("/"), "root");
        assert_eq!(path_key(""), "root");
        assert_eq!(path_key("/users/_id_/orders/"), "users._id_.orders");
    }
}
