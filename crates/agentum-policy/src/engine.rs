use crate::pattern::{ToolCall, compile_pattern};
use crate::profile::PermissionProfile;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;

/// Outcome of a permission query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    /// `interrupt` instructs the agent host to abort the run; set after
    /// the same call has been denied too many times (loop prevention).
    Deny { interrupt: bool },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

/// Runtime decision function for one session, built from a profile
/// snapshot and the live workspace path.
///
/// Decision order is fixed: disabled tools deny, pre-approved tools allow,
/// then the deny list, then the allow list, then default deny. Deny-first
/// gives explicit prohibitions precedence over broad allows like
/// `Bash(*)`. Anything unparseable or uncompilable is a deny (fail-closed).
pub struct PermissionEngine {
    profile: PermissionProfile,
    deny_patterns: Vec<Option<Regex>>,
    allow_patterns: Vec<Option<Regex>>,
    denial_counts: Mutex<HashMap<String, u32>>,
}

impl PermissionEngine {
    pub fn new(profile: PermissionProfile, workspace: &str) -> Self {
        let deny_patterns = profile
            .deny
            .iter()
            .map(|p| compile_pattern(p, workspace))
            .collect();
        let allow_patterns = profile
            .allow
            .iter()
            .map(|p| compile_pattern(p, workspace))
            .collect();

        Self {
            profile,
            deny_patterns,
            allow_patterns,
            denial_counts: Mutex::new(HashMap::new()),
        }
    }

    /// Evaluate a call of the form `ToolName(argument...)`.
    pub fn evaluate(&self, tool_call: &str) -> Decision {
        let Some(call) = ToolCall::parse(tool_call) else {
            return self.deny(tool_call);
        };

        if self.in_category(&self.profile.tools.disabled, call.tool) {
            return self.deny(tool_call);
        }
        if self.in_category(&self.profile.tools.pre_approved, call.tool) {
            return Decision::Allow;
        }

        // Deny scan precedes allow scan, both in declared order. A deny
        // entry that failed to compile is ignored for matching but the
        // default-deny floor below still applies.
        for pattern in self.deny_patterns.iter().flatten() {
            if pattern.is_match(tool_call) {
                return self.deny(tool_call);
            }
        }

        for pattern in self.allow_patterns.iter().flatten() {
            if pattern.is_match(tool_call) {
                return Decision::Allow;
            }
        }

        self.deny(tool_call)
    }

    /// Convenience wrapper for callers that only need the boolean.
    pub fn is_allowed(&self, tool_call: &str) -> bool {
        self.evaluate(tool_call).is_allowed()
    }

    /// True iff the tool-name prefix routes through an interactive
    /// confirmation before execution.
    pub fn needs_confirmation(&self, tool_call: &str) -> bool {
        ToolCall::parse(tool_call)
            .map(|call| self.in_category(&self.profile.tools.permission_checked, call.tool))
            .unwrap_or(false)
    }

    fn in_category(&self, category: &[String], tool: &str) -> bool {
        category.iter().any(|t| t == tool)
    }

    fn deny(&self, tool_call: &str) -> Decision {
        let fingerprint = call_fingerprint(tool_call);
        let mut counts = self.denial_counts.lock().expect("denial counter poisoned");
        let count = counts.entry(fingerprint).or_insert(0);
        *count += 1;
        Decision::Deny {
            interrupt: *count > self.profile.denial_interrupt_threshold,
        }
    }
}

fn call_fingerprint(tool_call: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tool_call.as_bytes());
    format!("{:x}", hasher.finalize())
}
