//! Conversion options
//!
//! Defaults can be overridden from the environment:
//!
//! - `IMGCONV_TIMEOUT_SECS`: seconds before a converter is killed, `0` waits forever
//! - `IMGCONV_DIAGNOSTICS`: `strict` or `exit-status`
//! - `IMGCONV_RETAIN_INPUT`: `0`/`false` to stop keeping fed bytes for recovery

use crate::format::DEFAULT_SNIFF_LIMIT;
use std::time::Duration;
use tracing::warn;

pub const ENV_TIMEOUT_SECS: &str = "IMGCONV_TIMEOUT_SECS";
pub const ENV_DIAGNOSTICS: &str = "IMGCONV_DIAGNOSTICS";
pub const ENV_RETAIN_INPUT: &str = "IMGCONV_RETAIN_INPUT";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// When stderr output from a converter counts as failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiagnosticsPolicy {
    /// Non-zero exit or any non-blank stderr fails the conversion. Tools
    /// that warn on every run will fail here; that is accepted over
    /// silently passing a broken image through.
    #[default]
    Strict,
    /// Only a non-zero exit fails. Stderr is still logged.
    ExitStatus,
}

impl DiagnosticsPolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "strict" => Some(DiagnosticsPolicy::Strict),
            "exit-status" | "exit_status" | "lenient" => Some(DiagnosticsPolicy::ExitStatus),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConvertOptions {
    /// Upper bound on one converter run. `None` waits indefinitely.
    pub timeout: Option<Duration>,
    pub diagnostics: DiagnosticsPolicy,
    /// Keep a copy of every byte fed to the converter so a failed run can
    /// still hand back the complete input.
    pub retain_input: bool,
    /// Bytes inspected for format detection.
    pub sniff_limit: usize,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            timeout: Some(DEFAULT_TIMEOUT),
            diagnostics: DiagnosticsPolicy::Strict,
            retain_input: true,
            sniff_limit: DEFAULT_SNIFF_LIMIT,
        }
    }
}

impl ConvertOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults, overridden by any `IMGCONV_*` variables that parse.
    pub fn from_env() -> Self {
        Self::default().apply_env(|key| std::env::var(key).ok())
    }

    fn apply_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(raw) = lookup(ENV_TIMEOUT_SECS) {
            match raw.trim().parse::<u64>() {
                Ok(0) => self.timeout = None,
                Ok(secs) => self.timeout = Some(Duration::from_secs(secs)),
                Err(_) => warn!(var = ENV_TIMEOUT_SECS, value = %raw, "Ignoring unparsable timeout"),
            }
        }

        if let Some(raw) = lookup(ENV_DIAGNOSTICS) {
            match DiagnosticsPolicy::parse(&raw) {
                Some(policy) => self.diagnostics = policy,
                None => warn!(var = ENV_DIAGNOSTICS, value = %raw, "Ignoring unknown diagnostics policy"),
            }
        }

        if let Some(raw) = lookup(ENV_RETAIN_INPUT) {
            match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => self.retain_input = true,
                "0" | "false" | "no" | "off" => self.retain_input = false,
                _ => warn!(var = ENV_RETAIN_INPUT, value = %raw, "Ignoring unparsable flag"),
            }
        }

        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_diagnostics(mut self, policy: DiagnosticsPolicy) -> Self {
        self.diagnostics = policy;
        self
    }

    pub fn with_retain_input(mut self, retain: bool) -> Self {
        self.retain_input = retain;
        self
    }

    pub fn with_sniff_limit(mut self, limit: usize) -> Self {
        self.sniff_limit = limit.max(1);
        self
    }
}
