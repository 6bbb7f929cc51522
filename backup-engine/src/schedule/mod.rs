//! Registration of recurring backup runs with the OS task scheduler.
//!
//! The engine only builds a [`ScheduledTask`]; handing it to the scheduler
//! goes through [`ScheduleRegistrar`]. A failed registration never affects
//! the backup it was requested with.

pub mod trigger;

use crate::utils::errors::{EngineError, Result};
use std::path::PathBuf;
use std::process::Command;
use tracing::{debug, info};

pub use trigger::Trigger;

/// Flags that only concern registration and are dropped from the scheduled
/// invocation
const REGISTRATION_FLAGS: [&str; 2] = ["--register-schedule", "--trigger"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledTask {
    pub name: String,
    pub program: PathBuf,
    pub arguments: Vec<String>,
    pub trigger: Trigger,
}

impl ScheduledTask {
    pub fn for_set(set: &str, program: PathBuf, arguments: Vec<String>, trigger: Trigger) -> Self {
        Self {
            name: format!("BackupEngine-{}", set),
            program,
            arguments,
            trigger,
        }
    }

    /// Full command line the scheduler will run
    pub fn invocation(&self) -> String {
        std::iter::once(self.program.display().to_string())
            .chain(self.arguments.iter().cloned())
            .map(|arg| quote(&arg))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Re-serialize command line arguments for a scheduled run: the program name
/// and the registration flags (with their values) are removed.
pub fn scheduled_arguments(args: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(args.len());
    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        if arg == "--trigger" {
            iter.next();
            continue;
        }
        if REGISTRATION_FLAGS
            .iter()
            .any(|flag| arg == flag || arg.starts_with(&format!("{}=", flag)))
        {
            continue;
        }
        out.push(arg.clone());
    }
    out
}

fn quote(arg: &str) -> String {
    if arg.is_empty() || arg.contains([' ', '\t', '"']) {
        format!("\"{}\"", arg.replace('"', "\\\""))
    } else {
        arg.to_string()
    }
}

pub trait ScheduleRegistrar: Send + Sync {
    fn register(&self, task: &ScheduledTask) -> Result<()>;
}

/// Registers tasks through `schtasks.exe`
#[derive(Debug, Default, Clone)]
pub struct SchtasksRegistrar;

impl SchtasksRegistrar {
    /// Arguments passed to `schtasks`
    pub fn arguments(task: &ScheduledTask) -> Vec<String> {
        let mut args: Vec<String> = ["/Create", "/F", "/TN"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        args.push(task.name.clone());
        args.push("/TR".into());
        args.push(task.invocation());
        args.extend(task.trigger.schtasks_arguments());
        args
    }
}

impl ScheduleRegistrar for SchtasksRegistrar {
    fn register(&self, task: &ScheduledTask) -> Result<()> {
        let args = Self::arguments(task);
        debug!("schtasks {:?}", args);

        let output = Command::new("schtasks")
            .args(&args)
            .output()
            .map_err(|e| EngineError::ScheduleRegistration(format!("cannot run schtasks: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            return Err(EngineError::ScheduleRegistration(format!(
                "schtasks exited with {}: {}",
                output.status,
                if stderr.trim().is_empty() { stdout.trim() } else { stderr.trim() }
            )));
        }

        info!("Registered scheduled task {} ({})", task.name, task.trigger);
        Ok(())
    }
}
