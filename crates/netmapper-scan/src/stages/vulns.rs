//! Exploit database correlation.
//!
//! Each open port is turned into a search query (its fingerprint when one
//! exists, otherwise the product named in the service description) and
//! looked up with `searchsploit -j`. Every matching exploit becomes one
//! vulnerability finding on the host.

use std::sync::Arc;

use netmapper_core::HostRecord;
use serde::Deserialize;

use crate::config::ScanConfig;
use crate::error::Result;
use crate::layout::RunLayout;
use crate::runner::{CommandRunner, ToolCommand};
use crate::stages::{Stage, Transcript};

#[derive(Debug, Deserialize)]
struct SearchsploitOutput {
    #[serde(rename = "RESULTS_EXPLOIT", default)]
    exploits: Vec<ExploitEntry>,
}

#[derive(Debug, Deserialize)]
struct ExploitEntry {
    #[serde(rename = "Title")]
    title: String,
    #[serde(rename = "EDB-ID", default)]
    edb_id: Option<serde_json::Value>,
}

impl ExploitEntry {
    fn edb_id(&self) -> Option<String> {
        match self.edb_id.as_ref()? {
            serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// A matched exploit title and its database id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExploitMatch {
    pub title: String,
    pub edb_id: Option<String>,
}

/// Parse `searchsploit -j` output. Anything that is not the expected JSON
/// yields no matches.
pub fn parse_searchsploit(output: &str) -> Vec<ExploitMatch> {
    match serde_json::from_str::<SearchsploitOutput>(output.trim()) {
        Ok(parsed) => parsed
            .exploits
            .into_iter()
            .map(|e| ExploitMatch {
                edb_id: e.edb_id(),
                title: e.title,
            })
            .collect(),
        Err(e) => {
            if !output.trim().is_empty() {
                tracing::debug!(error = %e, "Unparseable searchsploit output");
            }
            Vec::new()
        }
    }
}

/// Search query for a port, as `{product} {version}` terms.
///
/// A fingerprint is used when it already has that shape (web and database
/// matches do). Otherwise the query comes from the product in the service
/// description's parentheses, cut after its first version-like word, so
/// `ssh (OpenSSH 7.2p2 Ubuntu 4ubuntu2.8)` searches for `OpenSSH 7.2p2`.
pub fn exploit_query(record: &HostRecord, port: u16, service: &str) -> Option<String> {
    if let Some(fingerprint) = record.fingerprints.get(&port) {
        if is_product_version(fingerprint) {
            return Some(fingerprint.clone());
        }
    }
    let start = service.find('(')?;
    let end = service.rfind(')')?;
    let product = service.get(start + 1..end)?;

    let mut terms = Vec::new();
    for word in product.split_whitespace() {
        terms.push(word);
        if starts_with_digit(word) {
            break;
        }
    }
    (!terms.is_empty()).then(|| terms.join(" "))
}

fn is_product_version(fingerprint: &str) -> bool {
    if fingerprint.contains(['(', ')']) {
        return false;
    }
    let words: Vec<&str> = fingerprint.split_whitespace().collect();
    words.len() >= 2 && words.last().is_some_and(|v| starts_with_digit(v))
}

fn starts_with_digit(word: &str) -> bool {
    word.chars().next().is_some_and(|c| c.is_ascii_digit())
}

pub fn format_finding(query: &str, port: u16, exploit: &ExploitMatch) -> String {
    match &exploit.edb_id {
        Some(id) => format!("{query} (port {port}): {} [EDB-{id}]", exploit.title),
        None => format!("{query} (port {port}): {}", exploit.title),
    }
}

pub struct VulnerabilityStage<R> {
    runner: Arc<R>,
    config: Arc<ScanConfig>,
    layout: RunLayout,
}

impl<R: CommandRunner> VulnerabilityStage<R> {
    pub fn new(runner: Arc<R>, config: Arc<ScanConfig>, layout: RunLayout) -> Self {
        Self {
            runner,
            config,
            layout,
        }
    }
}

impl<R: CommandRunner> Stage for VulnerabilityStage<R> {
    fn name(&self) -> &'static str {
        "vulnerability"
    }

    async fn process(&self, mut record: HostRecord) -> Result<HostRecord> {
        let ip = record.ip().to_string();
        let queries: Vec<(u16, String)> = record
            .open_services()
            .filter_map(|(port, service)| exploit_query(&record, port, service).map(|q| (port, q)))
            .collect();

        if queries.is_empty() {
            tracing::debug!(host = %ip, "No identifiable services to correlate");
            return Ok(record);
        }

        let dir = self.layout.ensure_host_dir(&ip)?;
        let mut transcript = Transcript::create(
            &dir.join("vulnerabilities.txt"),
            &format!("Vulnerability check for {ip}"),
        )?;

        let mut added = 0usize;
        for (port, query) in queries {
            let search = ToolCommand::new(&self.config.searchsploit_path)
                .arg("-j")
                .args(query.split_whitespace());
            let output = self.runner.run(&search).await;
            let matches = parse_searchsploit(&output);

            transcript.line(&format!("PORT {port}: {query}"))?;
            if matches.is_empty() {
                transcript.line("  no known exploits\n")?;
                continue;
            }
            for exploit in &matches {
                let finding = format_finding(&query, port, exploit);
                transcript.line(&format!("  {finding}"))?;
                if record.add_vulnerability(finding) {
                    added += 1;
                }
            }
            transcript.line("")?;
        }

        if added > 0 {
            tracing::warn!(host = %ip, findings = added, "Potential vulnerabilities found");
        } else {
            tracing::info!(host = %ip, "No known exploits matched");
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::testing::ScriptedRunner;

    const SEARCHSPLOIT_JSON: &str = r#"{
        "SEARCH": "OpenSSH 7.2",
        "DB_PATH_EXPLOIT": "/usr/share/exploitdb",
        "RESULTS_EXPLOIT": [
            {"Title": "OpenSSH 7.2 - Denial of Service", "EDB-ID": "40888", "Path": "/x/40888.txt"},
            {"Title": "OpenSSH 7.2p2 - Username Enumeration",
             "EDB-ID": "40136", "Path": "/x/40136.py"}
        ],
        "RESULTS_SHELLCODE": []
    }"#;

    #[test]
    fn test_parse_searchsploit() {
        let matches = parse_searchsploit(SEARCHSPLOIT_JSON);
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[1].title, "OpenSSH 7.2p2 - Username Enumeration");
        assert_eq!(matches[1].edb_id.as_deref(), Some("40136"));

        assert!(parse_searchsploit("").is_empty());
        assert!(parse_searchsploit("not json").is_empty());
        assert!(parse_searchsploit(r#"{"RESULTS_EXPLOIT": []}"#).is_empty());
    }

    #[test]
    fn test_exploit_query_prefers_fingerprint() {
        let mut record = HostRecord::new("10.0.0.1");
        record.add_open_port(80, "http (Apache httpd 2.4.41)");
        record.add_open_port(22, "ssh (OpenSSH 7.2)");
        record.add_open_port(25, "smtp");
        record.fingerprints.insert(80, "Apache 2.4.41".to_string());

        assert_eq!(
            exploit_query(&record, 80, "http (Apache httpd 2.4.41)").as_deref(),
            Some("Apache 2.4.41")
        );
        assert_eq!(
            exploit_query(&record, 22, "ssh (OpenSSH 7.2)").as_deref(),
            Some("OpenSSH 7.2")
        );
        assert_eq!(exploit_query(&record, 25, "smtp"), None);
    }

    #[test]
    fn test_banner_fingerprint_falls_back_to_service_product() {
        let service = "ssh (OpenSSH 7.2p2 Ubuntu 4ubuntu2.8)";
        let mut record = HostRecord::new("10.0.0.1");
        record.add_open_port(22, service);
        record.add_open_port(3306, "mysql (MySQL)");
        record.fingerprints.insert(22, "SSH 2.0 (OpenSSH_7.2p2)".to_string());

        assert_eq!(exploit_query(&record, 22, service).as_deref(), Some("OpenSSH 7.2p2"));
        assert_eq!(exploit_query(&record, 3306, "mysql (MySQL)").as_deref(), Some("MySQL"));
        assert_eq!(exploit_query(&record, 8080, "http ()"), None);
    }

    #[tokio::test]
    async fn test_findings_recorded_once() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new(|_| SEARCHSPLOIT_JSON.to_string()));
        let stage = VulnerabilityStage::new(
            runner.clone(),
            Arc::new(ScanConfig::default()),
            RunLayout::new(tmp.path()),
        );

        let mut record = HostRecord::new("10.0.0.2");
        record.add_open_port(22, "ssh (OpenSSH 7.2)");
        record.add_open_port(25, "smtp");

        let record = stage.process(record).await.unwrap();
        assert_eq!(
            record.vulnerabilities(),
            &[
                "OpenSSH 7.2 (port 22): OpenSSH 7.2 - Denial of Service [EDB-40888]",
                "OpenSSH 7.2 (port 22): OpenSSH 7.2p2 - Username Enumeration [EDB-40136]",
            ]
        );
        assert!(record.is_vulnerable());

        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].args, vec!["-j", "OpenSSH", "7.2"]);

        let again = stage.process(record.clone()).await.unwrap();
        assert_eq!(again.vulnerabilities().len(), 2);

        let text =
            fs::read_to_string(tmp.path().join("hosts/10.0.0.2/vulnerabilities.txt")).unwrap();
        assert!(text.contains("PORT 22: OpenSSH 7.2"));
    }

    #[tokio::test]
    async fn test_no_queries_no_artifact() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::silent());
        let stage = VulnerabilityStage::new(
            runner.clone(),
            Arc::new(ScanConfig::default()),
            RunLayout::new(tmp.path()),
        );

        let mut record = HostRecord::new("10.0.0.3");
        record.add_open_port(8081, "unknown");
        let out = stage.process(record).await.unwrap();

        assert!(!out.is_vulnerable());
        assert!(runner.calls().is_empty());
        assert!(!tmp.path().join("hosts/10.0.0.3").exists());
    }
}
