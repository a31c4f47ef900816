//! Line-protocol encoding and the HTTP batch writer for the buffered sink.
//!
//! `requests,application=default,host=api.example.com,method=GET,path=/users/_id_,status_code=200 duration=12.5 1700000000000000000`

use std::time::Duration;

use futures::future::BoxFuture;

use super::buffered::BatchWriter;
use crate::config::BackendConfig;
use crate::error::SinkError;
use crate::instrumentation::{Dimensions, MetricKind, MetricPoint};

const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Encode one point as a line-protocol record.
pub fn encode_point(point: &MetricPoint) -> String {
    let mut line = escape(&point.name, &[',', ' ']);

    match &point.dimensions {
        Dimensions::Tags(tags) => {
            // Empty tag values are rejected by the backend, so they are left out.
            for (key, value) in tags.iter().filter(|(_, v)| !v.is_empty()) {
                line.push(',');
                line.push_str(&escape(key, &[',', '=', ' ']));
                line.push('=');
                line.push_str(&escape(value, &[',', '=', ' ']));
            }
        }
        Dimensions::Key(key) => {
            line.push_str(",key=");
            line.push_str(&escape(key, &[',', '=', ' ']));
        }
    }

    let field = match point.kind {
        MetricKind::Timing => format!("duration={}", point.value),
        MetricKind::Counter => format!("count={}i", point.value as i64),
    };

    let timestamp = point.timestamp.timestamp_nanos_opt().unwrap_or_default();
    format!("{} {} {}", line, field, timestamp)
}

pub fn encode_batch(points: &[MetricPoint]) -> String {
    points.iter().map(encode_point).collect::<Vec<_>>().join("\n")
}

fn escape(value: &str, special: &[char]) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if special.contains(&c) || c == '\\' {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Writes batches to a line-protocol HTTP endpoint (`/write`).
#[derive(Debug, Clone)]
pub struct HttpLineWriter {
    client: reqwest::Client,
    url: String,
    database: String,
    username: Option<String>,
    password: Option<String>,
}

impl HttpLineWriter {
    pub fn from_config(backend: &BackendConfig) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder().timeout(WRITE_TIMEOUT).build()?;

        Ok(Self {
            client,
            url: format!("http://{}:{}/write", backend.host, backend.port()),
            database: backend.database.clone(),
            username: backend.username.clone(),
            password: backend.password.clone(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl BatchWriter for HttpLineWriter {
    fn write_batch<'a>(&'a self, batch: &'a [MetricPoint]) -> BoxFuture<'a, Result<(), SinkError>> {
        Box::pin(async move {
            let mut request = self
                .client
                .post(&self.url)
                .query(&[("db", self.database.as_str()), ("precision", "ns")])
                .body(encode_batch(batch));

            if let Some(username) = &self.username {
                request = request.basic_auth(username, self.password.as_ref());
            }

            let response = request.send().await?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(SinkError::Rejected {
                    status: status.as_u16(),
                    body,
                });
            }

            tracing::debug!("Wrote {} line-protocol point(s) to {}", batch.len(), self.url);
            Ok(())
        })
    }
}
