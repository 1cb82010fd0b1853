//! Periodic network report for the POS API host: traceroute, DNS and HTTPS timing.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::fmt::Write as _;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

pub const DEFAULT_HOST: &str = "tmgposapi.themall.co.th";
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(15 * 60);
pub const FIRST_RUN_DELAY: Duration = Duration::from_secs(10);
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq)]
pub struct DnsTiming {
    pub elapsed: Duration,
    pub addresses: Vec<SocketAddr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpTiming {
    pub status: u16,
    pub headers: Duration,
    pub total: Duration,
    pub bytes: usize,
}

/// Everything collected for one run. Failed checks keep their error text.
#[derive(Debug, Clone)]
pub struct Report {
    pub generated: DateTime<Local>,
    pub host: String,
    pub traceroute: Result<String, String>,
    pub dns: Result<DnsTiming, String>,
    pub http: Result<HttpTiming, String>,
}

pub fn report_file_name(computer: &str, at: DateTime<Local>) -> String {
    format!("{}_{}.txt", computer, at.format("%Y-%m-%d_%H-%M-%S"))
}

pub fn computer_name() -> String {
    sysinfo::System::host_name().unwrap_or_else(|| "UNKNOWN".to_string())
}

fn millis(duration: Duration) -> String {
    format!("{:.3} ms", duration.as_secs_f64() * 1000.0)
}

impl Report {
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "COMPREHENSIVE NETWORK DIAGNOSTIC REPORT");
        let _ = writeln!(out, "Generated at: {}", self.generated.format("%Y-%m-%d %H:%M:%S"));
        let _ = writeln!(out, "Target Host:  {}", self.host);
        let _ = writeln!(out, "{}\n", "=".repeat(60));

        let _ = writeln!(out, "===== 1. TRACEROUTE TO VIEW NETWORK PATH =====");
        match &self.traceroute {
            Ok(text) => out.push_str(text.trim_end()),
            Err(e) => {
                let _ = write!(out, "Traceroute failed: {}", e);
            }
        }
        out.push_str("\n\n");

        let _ = writeln!(out, "===== 2. DNS LATENCY & RESOLUTION TEST =====");
        match &self.dns {
            Ok(dns) => {
                let _ = writeln!(out, "Resolution Time: {}", millis(dns.elapsed));
                for addr in &dns.addresses {
                    let _ = writeln!(out, "Address:         {}", addr.ip());
                }
            }
            Err(e) => {
                let _ = writeln!(out, "DNS resolution failed: {}", e);
            }
        }
        out.push('\n');

        let _ = writeln!(out, "===== 3. CURL API CONNECTION TIMING =====");
        match &self.http {
            Ok(http) => {
                let _ = writeln!(out, "HTTP Status:      {}", http.status);
                let _ = writeln!(out, "Time to Headers:  {}", millis(http.headers));
                let _ = writeln!(out, "Total Time:       {}", millis(http.total));
                let _ = writeln!(out, "Body Size:        {} bytes", http.bytes);
            }
            Err(e) => {
                let _ = writeln!(out, "HTTPS request failed: {}", e);
            }
        }
        out
    }

    /// Writes the rendered report into `folder` and returns its path.
    pub fn write_to(&self, folder: &Path, computer: &str) -> Result<PathBuf> {
        fs::create_dir_all(folder)
            .with_context(|| format!("Failed to create log folder: {}", folder.display()))?;
        let path = folder.join(report_file_name(computer, self.generated));
        fs::write(&path, self.render())
            .with_context(|| format!("Failed to write report: {}", path.display()))?;
        Ok(path)
    }
}

pub async fn traceroute(host: &str) -> Result<String, String> {
    #[cfg(windows)]
    let mut cmd = {
        let mut cmd = tokio::process::Command::new("tracert");
        cmd.creation_flags(0x0800_0000);
        cmd
    };
    #[cfg(not(windows))]
    let mut cmd = tokio::process::Command::new("traceroute");

    let output = cmd.arg(host).output().await.map_err(|e| e.to_string())?;
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        text.push_str(&stderr);
    }
    Ok(text)
}

pub async fn resolve(host: &str) -> Result<DnsTiming, String> {
    let start = Instant::now();
    let addresses: Vec<SocketAddr> = tokio::net::lookup_host((host, 443))
        .await
        .map_err(|e| e.to_string())?
        .collect();
    Ok(DnsTiming {
        elapsed: start.elapsed(),
        addresses,
    })
}

pub async fn time_https(client: &reqwest::Client, url: &str) -> Result<HttpTiming, String> {
    let start = Instant::now();
    let response = client.get(url).send().await.map_err(|e| e.to_string())?;
    let headers = start.elapsed();
    let status = response.status().as_u16();
    let body = response.bytes().await.map_err(|e| e.to_string())?;
    Ok(HttpTiming {
        status,
        headers,
        total: start.elapsed(),
        bytes: body.len(),
    })
}

pub fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .context("Failed to build HTTP client")
}

pub async fn run_diagnostics(client: &reqwest::Client, host: &str) -> Report {
    let generated = Local::now();
    tracing::info!("Running diagnostics for {}", host);

    let traceroute = traceroute(host).await;
    let dns = resolve(host).await;
    let http = time_https(client, &format!("https://{}", host)).await;

    if let Err(e) = &http {
        tracing::warn!("HTTPS timing failed: {}", e);
    }
    Report {
        generated,
        host: host.to_string(),
        traceroute,
        dns,
        http,
    }
}
