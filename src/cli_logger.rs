use anyhow::Result;
use diagscope::{OverviewReport, ProfileStatus};
use serde::Serialize;
use serde_json::Value;

pub struct CliLogger {
    json: bool,
    no_color: bool,
}

impl CliLogger {
    pub fn new(json: bool, no_color: bool) -> Self {
        Self { json, no_color }
    }

    pub fn print_serialized<T: Serialize>(&self, value: &T) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string(value)?);
            return Ok(());
        }

        let rendered = render_value(&serde_json::to_value(value)?, 0);
        println!("{rendered}");
        Ok(())
    }

    pub fn print_overview(&self, report: &OverviewReport) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string(report)?);
            return Ok(());
        }

        let state_style = match report.agent.state.to_ascii_lowercase().as_str() {
            "healthy" => self.style(&report.agent.state, "32;1"),
            "degraded" | "configuring" | "starting" => self.style(&report.agent.state, "33;1"),
            _ => self.style(&report.agent.state, "31;1"),
        };

        let mut out = String::new();
        out.push_str(&format!(
            "{} {} {}\n",
            self.style("diagscope", "36;1"),
            self.style(&report.bundle, "37;1"),
            state_style
        ));
        out.push_str(&format!("{} {}\n", self.style("bundle", "90"), report.bundle_id));
        out.push_str(&format!("{} {}\n", self.style("digest", "90"), report.digest));
        out.push_str(&format!(
            "{} {} commit={} built={}\n",
            self.style("version", "90"),
            report.version.version.as_deref().unwrap_or(diagscope::NOT_AVAILABLE),
            report.version.commit.as_deref().unwrap_or(diagscope::NOT_AVAILABLE),
            report.version.build_time.as_deref().unwrap_or(diagscope::NOT_AVAILABLE),
        ));
        if !report.agent.message.is_empty() {
            out.push_str(&format!("{} {}\n", self.style("message", "90"), report.agent.message));
        }
        if let Some(fleet) = &report.agent.fleet_state {
            out.push_str(&format!("{} {fleet}\n", self.style("fleet", "90")));
        }
        out.push_str(&format!(
            "{} healthy={} total={}\n",
            self.style("components", "90"),
            report.agent.healthy_components(),
            report.agent.components.len()
        ));
        out.push_str(&format!(
            "{} files={} lines={} dropped={}\n",
            self.style("logs", "90"),
            report.logs.files,
            report.logs.lines,
            report.logs.dropped_lines
        ));

        out.push_str(&format!("{}\n", self.style("profiles", "33;1")));
        for profile in &report.profiles {
            out.push_str(&format!("  - {}\n", self.profile_line(profile)));
        }

        if !report.agent.parse_errors.is_empty() {
            out.push_str(&format!("{}\n", self.style("parse errors", "31;1")));
            for err in &report.agent.parse_errors {
                out.push_str(&format!("  - {err}\n"));
            }
        }

        println!("{}", out.trim_end());
        Ok(())
    }

    fn profile_line(&self, profile: &ProfileStatus) -> String {
        let status = if profile.parsed {
            self.style("ok", "32")
        } else {
            self.style("missing", "90")
        };
        match &profile.error {
            Some(err) if !profile.parsed => {
                format!("{} [{}] {}: {err}", profile.file, profile.kind.label(), status)
            }
            _ => format!("{} [{}] {}", profile.file, profile.kind.label(), status),
        }
    }

    pub fn print_error(&self, msg: &str) {
        if self.json {
            let out = serde_json::json!({
                "status": "error",
                "code": "error",
                "message": msg,
            });
            println!("{out}");
            return;
        }
        eprintln!("{} {msg}", self.style("error", "31;1"));
    }

    fn style(&self, text: &str, ansi: &str) -> String {
        if self.no_color {
            return text.to_string();
        }
        format!("\x1b[{ansi}m{text}\x1b[0m")
    }
}

fn render_value(value: &Value, indent: usize) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(v) => v.to_string(),
        Value::Number(v) => v.to_string(),
        Value::String(v) => v.clone(),
        Value::Array(items) => render_array(items, indent),
        Value::Object(map) => render_object(map, indent),
    }
}

fn render_array(items: &[Value], indent: usize) -> String {
    if items.is_empty() {
        return "[]".to_string();
    }

    let pad = " ".repeat(indent);
    let mut out = String::new();
    for item in items {
        match item {
            Value::Object(_) | Value::Array(_) => {
                out.push_str(&format!("{pad}-\n{}\n", render_value(item, indent + 2)));
            }
            _ => out.push_str(&format!("{pad}- {}\n", render_value(item, indent + 2))),
        }
    }
    out.trim_end().to_string()
}

fn render_object(map: &serde_json::Map<String, Value>, indent: usize) -> String {
    if map.is_empty() {
        return "{}".to_string();
    }

    let pad = " ".repeat(indent);
    let mut out = String::new();
    for (key, value) in map {
        match value {
            Value::Object(_) | Value::Array(_) => {
                out.push_str(&format!("{pad}{key}:\n{}\n", render_value(value, indent + 2)));
            }
            _ => out.push_str(&format!("{pad}{key}: {}\n", render_value(value, indent + 2))),
        }
    }
    out.trim_end().to_string()
}
