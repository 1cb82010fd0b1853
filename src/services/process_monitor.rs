//! Watches a fixed set of process names and reports start/stop transitions.

use std::collections::{BTreeMap, HashSet};
use sysinfo::System;

pub const DEFAULT_TARGETS: [&str; 2] = ["msedge.exe", "notepad.exe"];

const NO_EVENT_NOTE: &str =
    " (No specific crash event found in Windows Logs - maybe forced closed or clean exit)";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessTransition {
    Started(String),
    Stopped(String),
}

/// Last known running state per target. Every target starts out stopped.
#[derive(Debug, Clone)]
pub struct ProcessWatch {
    running: BTreeMap<String, bool>,
}

impl ProcessWatch {
    pub fn new<I, S>(targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            running: targets
                .into_iter()
                .map(|name| (name.as_ref().to_lowercase(), false))
                .collect(),
        }
    }

    pub fn targets(&self) -> impl Iterator<Item = &str> {
        self.running.keys().map(String::as_str)
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.running.get(&name.to_lowercase()).copied().unwrap_or(false)
    }

    /// Compare against the lowercase names currently running and record the changes.
    pub fn observe(&mut self, names: &HashSet<String>) -> Vec<ProcessTransition> {
        let mut transitions = Vec::new();
        for (name, was_running) in self.running.iter_mut() {
            let now_running = names.contains(name);
            if now_running == *was_running {
                continue;
            }
            *was_running = now_running;
            transitions.push(if now_running {
                ProcessTransition::Started(name.clone())
            } else {
                ProcessTransition::Stopped(name.clone())
            });
        }
        transitions
    }
}

/// Lowercase names of every process currently running.
pub fn running_process_names(system: &mut System) -> HashSet<String> {
    system.refresh_processes();
    system
        .processes()
        .values()
        .map(|process| process.name().to_lowercase())
        .collect()
}

fn event_log_query(name: &str) -> String {
    format!(
        "Get-EventLog -LogName Application -EntryType Error -After (Get-Date).AddMinutes(-2) \
         | Where-Object {{ $_.Message -like \"*{}*\" }} \
         | Select-Object -First 1 \
         | Format-List TimeGenerated, EventID, Message, Source",
        name
    )
}

fn describe_event_output(stdout: &str) -> String {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        NO_EVENT_NOTE.to_string()
    } else {
        format!("\n[CRASH DETAILS DETECTED FROM WINDOWS EVENT LOG]:\n{}", trimmed)
    }
}

/// Most recent Application error mentioning `name` from the last two minutes.
#[cfg(windows)]
pub fn crash_details(name: &str) -> String {
    let output = crate::bridge::hidden_command("powershell")
        .args(["-NoProfile", "-Command", &event_log_query(name)])
        .output();
    match output {
        Ok(output) => describe_event_output(&String::from_utf8_lossy(&output.stdout)),
        Err(e) => format!(" (Failed to fetch details: {})", e),
    }
}

#[cfg(not(windows))]
pub fn crash_details(name: &str) -> String {
    tracing::debug!("Skipping event log query: {}", event_log_query(name));
    " (Crash details are only available from the Windows event log)".to_string()
}

/// Log one transition the way the kiosk log reads.
pub fn log_transition(transition: &ProcessTransition) {
    match transition {
        ProcessTransition::Started(name) => tracing::info!("Process STARTED: {}", name),
        ProcessTransition::Stopped(name) => {
            tracing::warn!("Process STOPPED/CRASHED: {}{}", name, crash_details(name));
            tracing::info!("{}", "-".repeat(50));
        }
    }
}
