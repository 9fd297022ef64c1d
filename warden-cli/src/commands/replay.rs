//! `warden replay` command handler
//!
//! Feeds recorded requests through a real pipeline: every JSON line becomes
//! one execution context, each present field is published to its address,
//! and the pipeline is stopped at the end so the final flush reaches the
//! collector.

use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

use warden_appsec::{
    Address, AppSec, AppSecBuilder, AppSecConfig, HttpTransport, RuleLoader, Transport,
};
use warden_core::pipeline::Pipeline;

use crate::cli::ReplayArgs;
use crate::commands::load_config_or_default;
use crate::error::CliError;
use crate::output::{OutputWriter, Render};

/// One recorded request. Absent fields are simply not published.
#[derive(Debug, Default, Deserialize)]
pub struct RecordedRequest {
    pub method: Option<String>,
    pub url: Option<String>,
    pub headers: Option<Map<String, Value>>,
    pub client_ip: Option<String>,
    pub client_port: Option<u16>,
    pub user_agent: Option<String>,
    pub query: Option<Value>,
    pub cookies: Option<Value>,
    pub response_status: Option<u16>,
}

impl RecordedRequest {
    /// Address values in publish order.
    ///
    /// Header names are lowercased, `cookie` is moved out of the headers and
    /// the user agent falls back to the `user-agent` header.
    pub fn into_addresses(self) -> Vec<(Address, Value)> {
        let mut values = Vec::new();

        let mut cookie_header = None;
        let mut header_user_agent = None;
        if let Some(headers) = self.headers {
            let mut lowered = Map::with_capacity(headers.len());
            for (name, value) in headers {
                let name = name.to_ascii_lowercase();
                match name.as_str() {
                    "cookie" => cookie_header = value.as_str().map(str::to_owned),
                    "user-agent" => {
                        header_user_agent = value.as_str().map(str::to_owned);
                        lowered.insert(name, value);
                    }
                    _ => {
                        lowered.insert(name, value);
                    }
                }
            }
            values.push((Address::HttpHeaders, Value::Object(lowered)));
        }

        if let Some(method) = self.method {
            values.push((Address::HttpMethod, Value::String(method)));
        }
        if let Some(url) = self.url {
            values.push((Address::HttpUrl, Value::String(url)));
        }
        if let Some(ip) = self.client_ip {
            values.push((Address::HttpClientIp, Value::String(ip)));
        }
        if let Some(port) = self.client_port {
            values.push((Address::HttpClientPort, Value::from(port)));
        }
        if let Some(user_agent) = self.user_agent.or(header_user_agent) {
            values.push((Address::HttpUserAgent, Value::String(user_agent)));
        }
        if let Some(query) = self.query {
            values.push((Address::HttpQuery, query));
        }
        match (self.cookies, cookie_header) {
            (Some(cookies), _) => values.push((Address::HttpCookies, cookies)),
            (None, Some(header)) => values.push((Address::HttpCookies, parse_cookie_header(&header))),
            (None, None) => {}
        }
        if let Some(status) = self.response_status {
            values.push((Address::HttpResponseStatus, Value::from(status)));
        }

        values
    }
}

/// `a=1; b=2` -> `{"a": "1", "b": "2"}`
fn parse_cookie_header(header: &str) -> Value {
    let cookies = header
        .split(';')
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            let name = name.trim();
            (!name.is_empty()).then(|| (name.to_owned(), Value::String(value.trim().to_owned())))
        })
        .collect::<Map<_, _>>();
    Value::Object(cookies)
}

/// Parse a JSON Lines document. Blank lines are ignored.
pub fn parse_requests(content: &str) -> Result<Vec<RecordedRequest>, CliError> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line)
                .map_err(|e| CliError::Command(format!("line {}: invalid request: {e}", idx + 1)))
        })
        .collect()
}

/// Execute the `replay` command.
pub async fn execute(
    args: ReplayArgs,
    config_path: &Path,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let mut config = load_config_or_default(config_path).await?;
    if let Some(url) = args.collector {
        config.appsec.collector_url = url;
    }
    if let Some(rules) = args.rules {
        config.appsec.rules_path = rules.display().to_string();
    }
    let appsec_config = AppSecConfig::from_core(&config.appsec);

    let content = tokio::fs::read_to_string(&args.requests).await?;
    let requests = parse_requests(&content)?;
    let rules = RuleLoader::load_path(&appsec_config.rules_path).await?;

    info!(
        requests = requests.len(),
        rules = rules.len(),
        collector = %appsec_config.collector_url,
        "replaying recorded requests"
    );

    let transport =
        HttpTransport::with_timeout(&appsec_config.collector_url, appsec_config.request_timeout)?;
    let appsec = AppSecBuilder::new()
        .config(appsec_config)
        .rules(rules)
        .transport(transport)
        .build()?;

    let report = replay(appsec, requests).await?;
    writer.render(&report)?;

    if report.batches_failed > 0 {
        return Err(CliError::Transport(format!(
            "{} batch(es) could not be delivered",
            report.batches_failed
        )));
    }
    Ok(())
}

/// Run the requests through the pipeline and stop it.
pub async fn replay<T: Transport>(
    mut appsec: AppSec<T>,
    requests: Vec<RecordedRequest>,
) -> Result<ReplayReport, CliError> {
    appsec.start().await?;

    let mut report = ReplayReport {
        requests: requests.len(),
        rules_installed: appsec.rule_count(),
        ..ReplayReport::default()
    };

    for (idx, request) in requests.into_iter().enumerate() {
        let mut ctx = appsec.new_context();
        for (address, value) in request.into_addresses() {
            if let Err(e) = appsec.publish(&mut ctx, address, value) {
                warn!(request = idx + 1, error = %e, "publish rejected");
                report.publish_errors += 1;
            }
        }
        // let the flush timer run between requests
        tokio::task::yield_now().await;
    }

    appsec.stop().await?;

    let backlog = appsec.reporter().backlog();
    let scheduler = appsec.scheduler();
    report.events_detected = backlog.total_received();
    report.events_dropped = backlog.dropped_count() + scheduler.events_dropped();
    report.events_sent = scheduler.events_sent();
    report.batches_sent = scheduler.batches_sent();
    report.batches_failed = scheduler.batches_failed();
    Ok(report)
}

#[derive(Debug, Default, Serialize)]
pub struct ReplayReport {
    pub requests: usize,
    pub rules_installed: usize,
    pub publish_errors: usize,
    pub events_detected: u64,
    pub events_dropped: u64,
    pub events_sent: u64,
    pub batches_sent: u64,
    pub batches_failed: u64,
}

impl Render for ReplayReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        writeln!(w, "Replay Summary")?;
        writeln!(w, "  Requests:        {}", self.requests)?;
        writeln!(w, "  Rules installed: {}", self.rules_installed)?;
        writeln!(w, "  Publish errors:  {}", self.publish_errors)?;
        writeln!(
            w,
            "  Detected:        {}",
            self.events_detected.to_string().yellow()
        )?;
        writeln!(w, "  Sent:            {}", self.events_sent.to_string().green())?;
        writeln!(w, "  Dropped:         {}", self.events_dropped.to_string().red())?;
        writeln!(
            w,
            "  Batches:         {} sent, {} failed",
            self.batches_sent, self.batches_failed
        )
    }
}
