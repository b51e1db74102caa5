//! End-to-end pipeline runs against a scripted tool runner.

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use netmapper_core::TargetDescriptor;
use netmapper_scan::config::ScanConfig;
use netmapper_scan::layout::RunLayout;
use netmapper_scan::pipeline::{Interrupt, Pipeline, PipelineOutcome};
use netmapper_scan::report;
use netmapper_scan::runner::{CommandRunner, ToolCommand};

/// Plays the part of nmap, curl, searchsploit, hydra and medusa for a tiny
/// lab of two hosts.
#[derive(Default)]
struct LabRunner {
    calls: Mutex<Vec<ToolCommand>>,
}

const WEB_HOST_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<nmaprun scanner="nmap" args="nmap -sS -sV -sC -O 10.0.0.1">
<host><status state="up" reason="echo-reply"/>
<address addr="10.0.0.1" addrtype="ipv4"/>
<ports>
<port protocol="tcp" portid="22"><state state="open" reason="syn-ack"/><service name="ssh" product="OpenSSH" version="7.2"/></port>
<port protocol="tcp" portid="80"><state state="open" reason="syn-ack"/><service name="http" product="nginx" version="1.18.0"/></port>
</ports>
<os><osmatch name="Linux 4.15" accuracy="95"/></os>
</host>
</nmaprun>"#;

const QUIET_HOST_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<nmaprun scanner="nmap" args="nmap -sS -sV -sC -O 10.0.0.2">
<host><status state="up" reason="echo-reply"/>
<address addr="10.0.0.2" addrtype="ipv4"/>
<ports>
<port protocol="tcp" portid="443"><state state="closed" reason="reset"/><service name="https"/></port>
</ports>
</host>
</nmaprun>"#;

const SEARCHSPLOIT_SSH: &str = r#"{"SEARCH": "OpenSSH 7.2", "RESULTS_EXPLOIT": [
    {"Title": "OpenSSH 7.2p2 - Username Enumeration", "EDB-ID": "40136"}
], "RESULTS_SHELLCODE": []}"#;

impl LabRunner {
    fn calls(&self) -> Vec<ToolCommand> {
        self.calls.lock().unwrap().clone()
    }

    fn respond(command: &ToolCommand) -> String {
        let target = command.args.last().map(String::as_str).unwrap_or("");
        match command.program.as_str() {
            "nmap" if command.flag_value("-oX").is_some() => {
                if target == "10.0.0.3" {
                    panic!("nmap crashed on 10.0.0.3");
                }
                let xml = match target {
                    "10.0.0.1" => WEB_HOST_XML,
                    "10.0.0.2" => QUIET_HOST_XML,
                    _ => return String::new(),
                };
                fs::write(command.flag_value("-oX").unwrap(), xml).unwrap();
                String::new()
            }
            "curl" => "HTTP/1.1 200 OK\r\nServer: nginx/1.18.0\r\n\r\n".to_string(),
            "nmap" => "22/tcp open ssh\n|_banner: SSH-2.0-OpenSSH_7.2p2\n".to_string(),
            "searchsploit" if command.args == ["-j", "OpenSSH", "7.2"] => {
                SEARCHSPLOIT_SSH.to_string()
            }
            "searchsploit" => r#"{"RESULTS_EXPLOIT": []}"#.to_string(),
            "hydra" if target.starts_with("ssh://") => {
                "[22][ssh] host: 10.0.0.1   login: admin   password: admin\n".to_string()
            }
            _ => String::new(),
        }
    }
}

impl CommandRunner for LabRunner {
    async fn run(&self, command: &ToolCommand) -> String {
        self.calls.lock().unwrap().push(command.clone());
        Self::respond(command)
    }
}

fn pipeline(root: &Path, runner: Arc<LabRunner>) -> Pipeline<LabRunner> {
    let config = ScanConfig {
        threads: 2,
        batch_size: 2,
        ..Default::default()
    };
    Pipeline::new(runner, config, RunLayout::new(root), Interrupt::new())
}

#[tokio::test]
async fn full_run_over_explicit_hosts() {
    let tmp = tempfile::tempdir().unwrap();
    let runner = Arc::new(LabRunner::default());
    let p = pipeline(tmp.path(), runner.clone());

    let target = TargetDescriptor::resolve("10.0.0.1, 10.0.0.2").unwrap();
    let outcome = p.run(target).await.unwrap();
    let PipelineOutcome::Completed {
        run,
        report: report_path,
        interrupted,
    } = outcome
    else {
        panic!("expected a completed run");
    };
    assert!(!interrupted);

    assert_eq!(run.live_hosts, vec!["10.0.0.1", "10.0.0.2"]);
    assert_eq!(run.hosts.addresses(), &["10.0.0.1", "10.0.0.2"]);

    let web = run.hosts.get("10.0.0.1").unwrap();
    assert_eq!(web.ports(), &[22, 80]);
    assert_eq!(web.services(), &["ssh (OpenSSH 7.2)", "http (nginx 1.18.0)"]);
    assert_eq!(web.os, "Linux 4.15 (accuracy: 95%)");
    assert_eq!(web.fingerprints.get(&80).map(String::as_str), Some("nginx 1.18.0"));
    assert_eq!(
        web.fingerprints.get(&22).map(String::as_str),
        Some("SSH 2.0 (OpenSSH_7.2p2)")
    );
    assert_eq!(web.weak_credentials(), &["Weak SSH credentials: admin/admin"]);
    assert_eq!(
        web.vulnerabilities(),
        &["OpenSSH 7.2 (port 22): OpenSSH 7.2p2 - Username Enumeration [EDB-40136]"]
    );
    assert!(web.is_vulnerable());

    let quiet = run.hosts.get("10.0.0.2").unwrap();
    assert!(quiet.ports().is_empty());
    assert_eq!(quiet.os, "Unknown");

    assert_eq!(run.vulnerable_hosts, vec!["10.0.0.1"]);

    // Explicit lists skip the discovery probes entirely.
    assert!(!runner.calls().iter().any(|c| c.program == "masscan" || c.has_arg("-sn")));

    let reloaded = report::load_json(&report_path).unwrap();
    assert_eq!(reloaded.hosts.addresses(), run.hosts.addresses());
    assert_eq!(reloaded.vulnerable_hosts, run.vulnerable_hosts);
    assert_eq!(reloaded.hosts.get("10.0.0.1"), Some(web));

    let host_dir = tmp.path().join("hosts/10.0.0.1");
    for artifact in [
        "nmap_scan.xml",
        "summary.txt",
        "service_fingerprints.txt",
        "vulnerabilities.txt",
        "credential_check.txt",
    ] {
        assert!(host_dir.join(artifact).exists(), "missing {artifact}");
    }
    assert!(tmp.path().join("hosts/10.0.0.2/summary.txt").exists());
    assert!(tmp.path().join("report.html").exists());
    assert_eq!(
        fs::read_to_string(tmp.path().join("discovery/live_hosts.txt")).unwrap(),
        "10.0.0.1\n10.0.0.2\n"
    );
}

#[tokio::test]
async fn empty_network_aborts_cleanly() {
    let tmp = tempfile::tempdir().unwrap();
    let runner = Arc::new(LabRunner::default());
    let p = pipeline(tmp.path(), runner.clone());

    let outcome = p
        .run(TargetDescriptor::resolve("10.0.0.0/30").unwrap())
        .await
        .unwrap();

    assert!(matches!(outcome, PipelineOutcome::AbortedNoHosts));
    assert!(!tmp.path().join("hosts").exists());

    let programs: Vec<String> = runner.calls().into_iter().map(|c| c.program).collect();
    assert_eq!(programs, vec!["masscan", "nmap"]);
}

#[tokio::test]
async fn crashed_worker_still_leaves_a_record() {
    let tmp = tempfile::tempdir().unwrap();
    let runner = Arc::new(LabRunner::default());
    let p = pipeline(tmp.path(), runner);

    let target = TargetDescriptor::resolve("10.0.0.3,10.0.0.1,10.0.0.2").unwrap();
    let PipelineOutcome::Completed { run, .. } = p.run(target).await.unwrap() else {
        panic!("expected a completed run");
    };

    assert_eq!(run.hosts.len(), 3);
    let crashed = run.hosts.get("10.0.0.3").unwrap();
    assert!(crashed.ports().is_empty());
    assert_eq!(crashed.os, "Unknown");

    // Siblings in the same batch were unaffected.
    assert_eq!(run.hosts.get("10.0.0.1").unwrap().ports(), &[22, 80]);
    assert_eq!(run.vulnerable_hosts, vec!["10.0.0.1"]);
}

#[tokio::test]
async fn repeated_explicit_address_is_scanned_once() {
    let tmp = tempfile::tempdir().unwrap();
    let runner = Arc::new(LabRunner::default());
    let p = pipeline(tmp.path(), runner.clone());

    let target = TargetDescriptor::resolve("10.0.0.1,10.0.0.1").unwrap();
    let PipelineOutcome::Completed { run, .. } = p.run(target).await.unwrap() else {
        panic!("expected a completed run");
    };

    assert_eq!(run.live_hosts, vec!["10.0.0.1"]);
    assert_eq!(run.hosts.addresses(), &["10.0.0.1"]);
    let full_scans = runner.calls().iter().filter(|c| c.has_arg("-p-")).count();
    assert_eq!(full_scans, 1);
}
