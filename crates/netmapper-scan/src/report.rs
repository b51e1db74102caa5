//! Run reports.
//!
//! `report.json` is the machine-readable serialization of the whole
//! [`ScanRun`]. It is rewritten after every stage so an interrupted run
//! still leaves a usable checkpoint. `report.html` is a static rendering of
//! the same data, produced once at the end.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use netmapper_core::ScanRun;

use crate::error::Result;
use crate::layout::RunLayout;

/// Refresh the vulnerable-host list and write `report.json`.
pub fn write_json(layout: &RunLayout, run: &mut ScanRun) -> Result<PathBuf> {
    run.refresh_vulnerable_hosts();
    let path = layout.report_json();
    write_replacing(&path, run.to_json()?.as_bytes())?;
    Ok(path)
}

pub fn write_html(layout: &RunLayout, run: &ScanRun) -> Result<PathBuf> {
    let path = layout.report_html();
    write_replacing(&path, render_html(run).as_bytes())?;
    Ok(path)
}

/// Write both report forms.
pub fn write_reports(layout: &RunLayout, run: &mut ScanRun) -> Result<PathBuf> {
    let json = write_json(layout, run)?;
    write_html(layout, run)?;
    tracing::info!(path = %json.display(), "Report written");
    Ok(json)
}

/// Load a previously written `report.json`.
pub fn load_json(path: &Path) -> Result<ScanRun> {
    let text = fs::read_to_string(path)?;
    Ok(ScanRun::from_json(&text)?)
}

// Readers never see a half-written report.
fn write_replacing(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

pub fn render_html(run: &ScanRun) -> String {
    let mut out = String::new();
    let target = escape(&run.target.to_string());

    let _ = write!(
        out,
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n\
         <title>Network scan report: {target}</title>\n\
         <style>\n\
         body {{ font-family: sans-serif; margin: 2em; }}\n\
         table {{ border-collapse: collapse; }}\n\
         td, th {{ border: 1px solid #ccc; padding: 4px 8px; text-align: left; }}\n\
         .vulnerable {{ color: #b00; }}\n\
         </style>\n</head>\n<body>\n\
         <h1>Network scan report</h1>\n\
         <p>Target: {target}<br>Run: {}<br>Started: {}</p>\n",
        run.run_id,
        run.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
    );

    let _ = write!(
        out,
        "<h2>Summary</h2>\n<ul>\n<li>Live hosts: {}</li>\n<li>Scanned hosts: {}</li>\n\
         <li>Vulnerable hosts: {}</li>\n</ul>\n",
        run.live_hosts.len(),
        run.hosts.len(),
        run.vulnerable_hosts.len(),
    );

    for record in run.hosts.iter() {
        let class = if record.is_vulnerable() { " class=\"vulnerable\"" } else { "" };
        let _ = write!(
            out,
            "<h2{class}>{}</h2>\n<p>OS: {}</p>\n",
            escape(record.ip()),
            escape(&record.os),
        );

        if record.ports().is_empty() {
            out.push_str("<p>No open ports found.</p>\n");
        } else {
            out.push_str("<table>\n<tr><th>Port</th><th>Service</th><th>Fingerprint</th></tr>\n");
            for (port, service) in record.open_services() {
                let fingerprint = record.fingerprints.get(&port).map(String::as_str).unwrap_or("");
                let _ = writeln!(
                    out,
                    "<tr><td>{port}</td><td>{}</td><td>{}</td></tr>",
                    escape(service),
                    escape(fingerprint),
                );
            }
            out.push_str("</table>\n");
        }

        list_section(&mut out, "Vulnerabilities", record.vulnerabilities());
        list_section(&mut out, "Weak credentials", record.weak_credentials());
    }

    out.push_str("</body>\n</html>\n");
    out
}

fn list_section(out: &mut String, title: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    let _ = writeln!(out, "<h3>{title}</h3>\n<ul>");
    for item in items {
        let _ = writeln!(out, "<li>{}</li>", escape(item));
    }
    out.push_str("</ul>\n");
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use netmapper_core::{HostRecord, TargetDescriptor};

    use super::*;

    fn sample_run() -> ScanRun {
        let mut run = ScanRun::new(TargetDescriptor::resolve("10.0.0.0/24").unwrap());
        run.live_hosts = vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()];

        let mut a = HostRecord::new("10.0.0.1");
        a.add_open_port(80, "http (Apache httpd 2.4.41)");
        a.fingerprints.insert(80, "Apache 2.4.41".to_string());
        a.add_vulnerability("Apache 2.4.41 (port 80): <mod_x> overflow [EDB-1]");
        run.hosts.upsert(a);
        run.hosts.upsert(HostRecord::new("10.0.0.2"));
        run
    }

    #[test]
    fn test_json_checkpoint_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = RunLayout::new(tmp.path());
        let mut run = sample_run();

        let path = write_json(&layout, &mut run).unwrap();
        assert_eq!(run.vulnerable_hosts, vec!["10.0.0.1"]);
        assert!(!tmp.path().join("report.json.tmp").exists());

        let loaded = load_json(&path).unwrap();
        assert_eq!(loaded.run_id, run.run_id);
        assert_eq!(loaded.hosts.addresses(), run.hosts.addresses());
        assert_eq!(loaded.hosts.get("10.0.0.1"), run.hosts.get("10.0.0.1"));
        assert_eq!(loaded.vulnerable_hosts, vec!["10.0.0.1"]);
    }

    #[test]
    fn test_html_escapes_tool_output() {
        let html = render_html(&sample_run());
        assert!(html.contains("&lt;mod_x&gt; overflow"));
        assert!(!html.contains("<mod_x>"));
        assert!(html.contains("<h2 class=\"vulnerable\">10.0.0.1</h2>"));
        assert!(html.contains("No open ports found."));
        assert!(html.contains("<td>Apache 2.4.41</td>"));
    }
}
