//! MaxCompute (ODPS) client over the REST API.
//!
//! A SQL statement runs as an instance: it is submitted, polled until its task
//! finishes, and the task result is read back as CSV. The CSV channel carries
//! no type metadata, so every column is reported as `STRING` and `\N` marks a
//! NULL.
//!
//! DSNs use the ODPS driver form:
//! `http://<access_id>:<access_key>@service.<region>.maxcompute.aliyun.com/api?project=<project>`

use super::executor::{cancellable, collect_rows};
use super::{DatabaseBackend, DatabaseClient, QueryResult, Row, Value};
use crate::error::{ExplorerError, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use hmac::{Hmac, Mac};
use reqwest::{header, Method, StatusCode};
use sha1::Sha1;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

type HmacSha1 = Hmac<Sha1>;

/// Delay between instance status polls.
const POLL_INTERVAL_MS: u64 = 500;

/// Per-request HTTP timeout. Long-running SQL is handled by polling, not by
/// holding a request open.
const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Type name reported for every MaxCompute column.
const CSV_COLUMN_TYPE: &str = "STRING";

/// NULL marker in MaxCompute CSV output.
const NULL_MARKER: &str = "\\N";

/// Parsed MaxCompute connection string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaxComputeDsn {
    pub access_id: String,
    pub access_key: String,
    /// Service endpoint without credentials or query, e.g.
    /// `http://service.cn-hangzhou.maxcompute.aliyun.com/api`.
    pub endpoint: String,
    pub project: String,
}

impl MaxComputeDsn {
    /// Parses a DSN of the form
    /// `http://<id>:<key>@<host>/api?project=<project>`.
    pub fn parse(dsn: &str) -> Result<Self> {
        let url = Url::parse(dsn)
            .map_err(|e| ExplorerError::dial(format!("Invalid MaxCompute DSN: {e}")))?;

        if url.username().is_empty() {
            return Err(ExplorerError::dial("MaxCompute DSN is missing the access id"));
        }
        let access_key = url
            .password()
            .ok_or_else(|| ExplorerError::dial("MaxCompute DSN is missing the access key"))?;
        let project = url
            .query_pairs()
            .find(|(k, _)| k == "project")
            .map(|(_, v)| v.into_owned())
            .filter(|p| !p.is_empty())
            .ok_or_else(|| ExplorerError::dial("MaxCompute DSN is missing the project parameter"))?;
        let host = url
            .host_str()
            .ok_or_else(|| ExplorerError::dial("MaxCompute DSN is missing the host"))?;

        let mut endpoint = format!("{}://{}", url.scheme(), host);
        if let Some(port) = url.port() {
            endpoint.push_str(&format!(":{port}"));
        }
        endpoint.push_str(url.path().trim_end_matches('/'));

        Ok(Self {
            access_id: url.username().to_string(),
            access_key: access_key.to_string(),
            endpoint,
            project,
        })
    }
}

/// MaxCompute database client.
pub struct MaxComputeClient {
    http: reqwest::Client,
    dsn: MaxComputeDsn,
    poll_interval: Duration,
}

impl MaxComputeClient {
    /// Parses `dsn` and checks that the project is reachable with the given
    /// credentials before returning.
    pub async fn connect(dsn: &str) -> Result<Self> {
        let dsn = MaxComputeDsn::parse(dsn)?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| ExplorerError::dial(format!("Failed to build HTTP client: {e}")))?;

        let client = Self {
            http,
            dsn,
            poll_interval: Duration::from_millis(POLL_INTERVAL_MS),
        };

        let resource = client.project_resource("");
        let response = client
            .send(Method::GET, &resource, &[], None)
            .await
            .map_err(|e| match e {
                ExplorerError::Query(msg) => {
                    ExplorerError::dial(format!("Cannot reach MaxCompute: {msg}"))
                }
                other => other,
            })?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ExplorerError::dial(format!(
                "MaxCompute rejected project '{}' ({status}): {}",
                client.dsn.project,
                error_message(&body)
            )));
        }

        debug!("Connected to MaxCompute project {}", client.dsn.project);
        Ok(client)
    }

    /// `/projects/<project><suffix>`, relative to the endpoint.
    fn project_resource(&self, suffix: &str) -> String {
        format!("/projects/{}{}", self.dsn.project, suffix)
    }

    /// Sends a signed request. `query` values may be empty for flag-style
    /// parameters such as `?taskstatus`.
    async fn send(
        &self,
        method: Method,
        resource: &str,
        query: &[(&str, &str)],
        body: Option<String>,
    ) -> Result<reqwest::Response> {
        let date = chrono::Utc::now()
            .format("%a, %d %b %Y %H:%M:%S GMT")
            .to_string();
        let content_type = if body.is_some() { "application/xml" } else { "" };
        let canonical_resource = canonical_resource(resource, query);
        let signature = sign(
            &self.dsn.access_key,
            &canonical_string(method.as_str(), content_type, &date, &canonical_resource),
        )?;

        let mut request = self
            .http
            .request(method, format!("{}{}", self.dsn.endpoint, canonical_resource))
            .header(header::DATE, date)
            .header(
                header::AUTHORIZATION,
                format!("ODPS {}:{}", self.dsn.access_id, signature),
            );
        if let Some(body) = body {
            request = request
                .header(header::CONTENT_TYPE, content_type)
                .body(body);
        }
        request
            .send()
            .await
            .map_err(|e| ExplorerError::query(format!("MaxCompute request failed: {e}")))
    }

    /// Sends a request and returns the body, mapping failures to query errors.
    async fn call(
        &self,
        method: Method,
        resource: &str,
        query: &[(&str, &str)],
        body: Option<String>,
    ) -> Result<(StatusCode, header::HeaderMap, String)> {
        let response = self.send(method, resource, query, body).await?;
        let status = response.status();
        let headers = response.headers().clone();
        let text = response
            .text()
            .await
            .map_err(|e| ExplorerError::query(format!("Failed to read MaxCompute response: {e}")))?;

        if !status.is_success() {
            return Err(ExplorerError::query(format!(
                "MaxCompute returned {status}: {}",
                error_message(&text)
            )));
        }
        Ok((status, headers, text))
    }

    /// Submits `sql` as a new instance and returns the instance id.
    async fn submit(&self, sql: &str) -> Result<String> {
        let resource = self.project_resource("/instances");
        let (_, headers, _) = self
            .call(Method::POST, &resource, &[], Some(sql_job_xml(sql)))
            .await?;

        headers
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|location| location.trim_end_matches('/').rsplit('/').next())
            .filter(|id| !id.is_empty())
            .map(String::from)
            .ok_or_else(|| ExplorerError::query("MaxCompute did not return an instance location"))
    }

    /// Polls the instance until its tasks finish, then reads the CSV result.
    async fn wait_for_result(&self, instance: &str) -> Result<String> {
        let resource = self.project_resource(&format!("/instances/{instance}"));

        loop {
            let (_, _, body) = self
                .call(Method::GET, &resource, &[("taskstatus", "")], None)
                .await?;

            match task_state(&body) {
                TaskState::Running => tokio::time::sleep(self.poll_interval).await,
                TaskState::Succeeded => break,
                TaskState::Failed => {
                    let (_, _, result) = self
                        .call(Method::GET, &resource, &[("result", "")], None)
                        .await?;
                    return Err(ExplorerError::query(
                        task_result(&result).unwrap_or_else(|| "MaxCompute task failed".to_string()),
                    ));
                }
            }
        }

        let (_, _, result) = self
            .call(Method::GET, &resource, &[("result", "")], None)
            .await?;
        Ok(task_result(&result).unwrap_or_default())
    }

    /// Asks the service to stop an instance. Failures are only logged.
    async fn terminate(&self, instance: &str) {
        let resource = self.project_resource(&format!("/instances/{instance}"));
        let body = r#"<?xml version="1.0" encoding="utf-8"?><Instance><Status>Terminated</Status></Instance>"#;
        match self
            .send(Method::PUT, &resource, &[], Some(body.to_string()))
            .await
        {
            Ok(response) if response.status().is_success() => {
                debug!("Terminated MaxCompute instance {instance}");
            }
            Ok(response) => warn!(
                "Failed to terminate MaxCompute instance {instance}: {}",
                response.status()
            ),
            Err(e) => warn!("Failed to terminate MaxCompute instance {instance}: {e}"),
        }
    }
}

#[async_trait]
impl DatabaseClient for MaxComputeClient {
    fn backend(&self) -> DatabaseBackend {
        DatabaseBackend::MaxCompute
    }

    async fn execute_query(&self, sql: &str, cancel: &CancellationToken) -> Result<QueryResult> {
        let start = Instant::now();

        let instance = cancellable(cancel, self.submit(sql)).await?;
        debug!("Submitted MaxCompute instance {instance}");

        let csv = tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                self.terminate(&instance).await;
                return Err(ExplorerError::cancelled());
            }
            csv = self.wait_for_result(&instance) => csv?,
        };

        let mut records = parse_csv(&csv).into_iter();
        let column_names: Vec<String> = records
            .next()
            .unwrap_or_default()
            .into_iter()
            .map(|field| field.text)
            .collect();
        let result = QueryResult {
            sql: sql.to_string(),
            column_types: vec![CSV_COLUMN_TYPE.to_string(); column_names.len()],
            column_names,
            records: Vec::new(),
        };

        let rows = futures::stream::iter(records.map(Ok));
        let result = collect_rows(result, rows, cancel, convert_record).await?;

        debug!(
            "MaxCompute instance {instance} returned {} rows in {:?}",
            result.row_count(),
            start.elapsed()
        );
        Ok(result)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Converts one CSV record into a row. Only a bare `\N` is NULL; a quoted
/// `"\N"` is the two-character string.
fn convert_record(record: &Vec<CsvField>) -> Row {
    record
        .iter()
        .map(|field| {
            if !field.quoted && field.text == NULL_MARKER {
                Value::Null
            } else {
                Value::String(field.text.clone())
            }
        })
        .collect()
}

/// Aggregate state of an instance's tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskState {
    Running,
    Succeeded,
    Failed,
}

/// Reads the task statuses from a `?taskstatus` response.
fn task_state(xml: &str) -> TaskState {
    let tasks = tag_contents(xml, "Tasks").into_iter().next().unwrap_or("");
    let statuses: Vec<String> = tag_contents(tasks, "Status")
        .into_iter()
        .map(|s| s.trim().to_lowercase())
        .collect();

    if statuses
        .iter()
        .any(|s| s == "failed" || s == "cancelled")
    {
        TaskState::Failed
    } else if !statuses.is_empty() && statuses.iter().all(|s| s == "success") {
        TaskState::Succeeded
    } else {
        TaskState::Running
    }
}

/// Extracts the first task's `<Result>` text from a `?result` response.
fn task_result(xml: &str) -> Option<String> {
    tag_contents(xml, "Result")
        .into_iter()
        .next()
        .map(|raw| match raw.trim().strip_prefix("<![CDATA[") {
            Some(rest) => rest.strip_suffix("]]>").unwrap_or(rest).to_string(),
            None => xml_unescape(raw),
        })
}

/// Pulls a readable message out of an error response body.
fn error_message(body: &str) -> String {
    tag_contents(body, "Message")
        .into_iter()
        .next()
        .map(xml_unescape)
        .unwrap_or_else(|| body.trim().to_string())
}

/// Returns the inner text of every `<tag ...>...</tag>` element, in order.
/// Nested elements with the same name are not supported.
fn tag_contents<'a>(xml: &'a str, tag: &str) -> Vec<&'a str> {
    let open = format!("<{tag}");
    let close = format!("</{tag}>");
    let mut found = Vec::new();
    let mut rest = xml;

    while let Some(start) = rest.find(&open) {
        let after_name = &rest[start + open.len()..];
        // Skip longer names sharing the prefix, e.g. <Tasks> when looking for <Task>.
        if !after_name.starts_with('>') && !after_name.starts_with(char::is_whitespace) {
            rest = after_name;
            continue;
        }
        let Some(gt) = after_name.find('>') else { break };
        let body = &after_name[gt + 1..];
        let Some(end) = body.find(&close) else { break };
        found.push(&body[..end]);
        rest = &body[end + close.len()..];
    }

    found
}

fn xml_unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Builds the instance XML for an anonymous SQL task.
fn sql_job_xml(sql: &str) -> String {
    let mut statement = sql.trim_end().to_string();
    if !statement.ends_with(';') {
        statement.push(';');
    }
    let statement = statement.replace("]]>", "]]]]><![CDATA[>");

    format!(
        concat!(
            r#"<?xml version="1.0" encoding="utf-8"?>"#,
            "<Instance><Job><Priority>9</Priority><Tasks><SQL>",
            "<Name>AnonymousSQLTask</Name>",
            "<Config><Property><Name>settings</Name>",
            r#"<Value>{{"odps.sql.select.output.format":"csv"}}</Value>"#,
            "</Property></Config>",
            "<Query><![CDATA[{}]]></Query>",
            "</SQL></Tasks><DAG><RunMode>Sequence</RunMode></DAG></Job></Instance>"
        ),
        statement
    )
}

/// Resource part of the string to sign: path plus sorted query parameters,
/// with flag parameters written as a bare key.
fn canonical_resource(resource: &str, query: &[(&str, &str)]) -> String {
    if query.is_empty() {
        return resource.to_string();
    }
    let mut pairs: Vec<&(&str, &str)> = query.iter().collect();
    pairs.sort();
    let params: Vec<String> = pairs
        .iter()
        .map(|(k, v)| {
            if v.is_empty() {
                k.to_string()
            } else {
                format!("{k}={v}")
            }
        })
        .collect();
    format!("{resource}?{}", params.join("&"))
}

/// String to sign: method, Content-MD5 (unused), Content-Type, Date, resource.
fn canonical_string(method: &str, content_type: &str, date: &str, resource: &str) -> String {
    format!("{method}\n\n{content_type}\n{date}\n{resource}")
}

/// Base64 HMAC-SHA1 of `canonical` under `access_key`.
fn sign(access_key: &str, canonical: &str) -> Result<String> {
    let mut mac = HmacSha1::new_from_slice(access_key.as_bytes())
        .map_err(|e| ExplorerError::query(format!("Cannot sign MaxCompute request: {e}")))?;
    mac.update(canonical.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// One CSV field and whether any part of it was quoted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct CsvField {
    text: String,
    quoted: bool,
}

/// Parses RFC 4180 CSV: quoted fields, doubled quotes, embedded newlines,
/// LF or CRLF line endings. A trailing newline does not produce a record.
fn parse_csv(text: &str) -> Vec<Vec<CsvField>> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = CsvField::default();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    field.text.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                _ => field.text.push(c),
            }
            continue;
        }

        match c {
            '"' => {
                in_quotes = true;
                field.quoted = true;
            }
            ',' => record.push(std::mem::take(&mut field)),
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                record.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut record));
            }
            _ => field.text.push(c),
        }
    }

    if field != CsvField::default() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }

    records
}
