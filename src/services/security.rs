use crate::errors::ToolError;
use once_cell::sync::Lazy;
use regex::Regex;

/// Hard-refusal patterns. A match anywhere in the normalized command fails
/// the call before any connection is attempted.
static BLOCKLIST: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"\brm\s+-[rRf]+.*\s+/(\s|$)", "recursive deletion of the filesystem root"),
        (r"\bmkfs(\.|\s)", "filesystem creation"),
        (r"\bdd\s+[^|;]*\bof=/dev/", "raw write to a block device"),
        (r":\(\)\s*\{\s*:\s*\|\s*:", "fork bomb"),
        (r"^(shutdown|reboot|halt|poweroff)\b", "host shutdown or reboot"),
        (r"\b(wipefs|blkdiscard)\b", "disk wipe"),
        (r"\bshred\s+[^|;]*/dev/", "disk wipe"),
    ]
    .iter()
    .map(|(pattern, reason)| (Regex::new(pattern).expect("blocklist pattern"), *reason))
    .collect()
});

/// Soft patterns. Execution proceeds; the result carries the reasons.
static WARNLIST: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"^sudo\b", "privilege escalation via sudo"),
        (r"\bchmod\s+777\b", "world-writable permissions"),
        (r"\bkill\s+-9\b", "forced process kill"),
        (
            r"^(apt|apt-get|yum|dnf|pacman|apk|zypper)\b",
            "package management",
        ),
        (
            r"^(rm|rmdir|mv|dd|truncate|chown|chgrp)\b",
            "destructive file operation",
        ),
        (r"^(systemctl|service)\b", "service state change"),
        (r"^(iptables|nft|ufw|firewall-cmd)\b", "firewall change"),
        (
            r"^(useradd|userdel|usermod|groupadd|groupdel|groupmod)\b",
            "account modification",
        ),
    ]
    .iter()
    .map(|(pattern, reason)| (Regex::new(pattern).expect("warnlist pattern"), *reason))
    .collect()
});

/// `VAR=value` prefixes are transparent to classification.
static ENV_ASSIGNMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*=\S*\s+").expect("env assignment pattern"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Allowed,
    Warn(Vec<String>),
    Blocked(String),
}

pub struct SafetyGate {
    allowlist_only: bool,
    allowlist: Vec<Regex>,
}

impl SafetyGate {
    pub fn new(allowlist_only: bool, allowlist_patterns: &[String]) -> Result<Self, ToolError> {
        let mut allowlist = Vec::with_capacity(allowlist_patterns.len());
        for pattern in allowlist_patterns {
            let anchored = format!(r"^(?:{})\b", pattern);
            let compiled = Regex::new(&anchored).map_err(|err| {
                ToolError::config(format!("Invalid allowlist pattern {:?}: {}", pattern, err))
            })?;
            allowlist.push(compiled);
        }
        Ok(Self {
            allowlist_only,
            allowlist,
        })
    }

    /// Strips leading whitespace and environment assignments so that
    /// `FOO=1 sudo x` classifies on `sudo`.
    fn normalize(command: &str) -> String {
        let mut rest = command.trim_start();
        while let Some(found) = ENV_ASSIGNMENT.find(rest) {
            rest = rest[found.end()..].trim_start();
        }
        rest.trim_end().to_string()
    }

    pub fn classify(&self, command: &str) -> Classification {
        let normalized = Self::normalize(command);
        if normalized.is_empty() {
            return Classification::Allowed;
        }

        if self.allowlist_only {
            let permitted = self.allowlist.iter().any(|re| re.is_match(&normalized));
            if !permitted {
                return Classification::Blocked("command is not in the allowlist".to_string());
            }
            return Classification::Allowed;
        }

        for (re, reason) in BLOCKLIST.iter() {
            if re.is_match(&normalized) {
                return Classification::Blocked(reason.to_string());
            }
        }

        let warnings: Vec<String> = WARNLIST
            .iter()
            .filter(|(re, _)| re.is_match(&normalized))
            .map(|(_, reason)| reason.to_string())
            .collect();
        if warnings.is_empty() {
            Classification::Allowed
        } else {
            Classification::Warn(warnings)
        }
    }

    /// Gate wrapper used on the execution path: blocked commands fail,
    /// otherwise the warnings travel with the result.
    pub fn check(&self, command: &str) -> Result<Vec<String>, ToolError> {
        match self.classify(command) {
            Classification::Blocked(reason) => Err(ToolError::safety_blocked(format!(
                "Command refused: {}",
                reason
            ))
            .with_details(serde_json::json!({"command": command.trim()}))),
            Classification::Warn(warnings) => Ok(warnings),
            Classification::Allowed => Ok(Vec::new()),
        }
    }

    /// Scripts are warn-only: commands inside may be guarded by conditionals,
    /// so a blocklist match cannot be judged line by line.
    pub fn scan_script(&self, script: &str) -> Vec<String> {
        let mut warnings = Vec::new();
        for line in script.lines() {
            match self.classify(line) {
                Classification::Warn(mut reasons) => warnings.append(&mut reasons),
                Classification::Blocked(reason) => warnings.push(reason),
                Classification::Allowed => {}
            }
        }
        warnings.sort();
        warnings.dedup();
        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> SafetyGate {
        SafetyGate::new(false, &[]).expect("gate")
    }

    #[test]
    fn blocklist_fixtures_are_blocked() {
        let gate = gate();
        for cmd in [
            "rm -rf /",
            "rm -Rf /",
            "rm -rf --no-preserve-root /",
            "mkfs.ext4 /dev/sda1",
            "mkfs /dev/sdb",
            "dd if=/dev/zero of=/dev/sda",
            ":(){ :|:& };:",
            "shutdown -h now",
            "reboot",
            "halt",
            "wipefs -a /dev/sda",
        ] {
            assert!(
                matches!(gate.classify(cmd), Classification::Blocked(_)),
                "expected blocked: {}",
                cmd
            );
        }
    }

    #[test]
    fn warnlist_fixtures_warn_but_allow() {
        let gate = gate();
        for cmd in [
            "sudo systemctl restart nginx",
            "chmod 777 /tmp/x",
            "kill -9 1234",
            "apt install nginx",
            "rm stale.log",
            "systemctl stop cron",
        ] {
            assert!(
                matches!(gate.classify(cmd), Classification::Warn(_)),
                "expected warn: {}",
                cmd
            );
        }
    }

    #[test]
    fn plain_reads_are_allowed() {
        let gate = gate();
        for cmd in ["ls -la /etc", "cat /etc/hostname", "grep -r foo .", "uname -a"] {
            assert_eq!(gate.classify(cmd), Classification::Allowed, "cmd: {}", cmd);
        }
    }

    #[test]
    fn classification_is_idempotent_under_whitespace() {
        let gate = gate();
        assert_eq!(gate.classify("  rm -rf /  "), gate.classify("rm -rf /"));
        assert_eq!(gate.classify("\tsudo ls"), gate.classify("sudo ls"));
    }

    #[test]
    fn env_assignments_are_stripped_before_classification() {
        let gate = gate();
        assert!(matches!(
            gate.classify("LANG=C sudo ls"),
            Classification::Warn(_)
        ));
        assert!(matches!(
            gate.classify("A=1 B=2 shutdown now"),
            Classification::Blocked(_)
        ));
    }

    #[test]
    fn rm_inside_deeper_path_is_not_blocked() {
        let gate = gate();
        assert!(matches!(
            gate.classify("rm -rf /tmp/build"),
            Classification::Warn(_)
        ));
    }

    #[test]
    fn allowlist_mode_inverts_policy() {
        let patterns: Vec<String> = ["ls", "cat", "grep"].iter().map(|s| s.to_string()).collect();
        let gate = SafetyGate::new(true, &patterns).expect("gate");
        assert_eq!(gate.classify("ls -la"), Classification::Allowed);
        assert!(matches!(gate.classify("touch /tmp/x"), Classification::Blocked(_)));
        // even commands that would only warn in the default mode are refused
        assert!(matches!(gate.classify("sudo ls"), Classification::Blocked(_)));
    }

    #[test]
    fn check_surfaces_safety_blocked() {
        let gate = gate();
        let err = gate.check("rm -rf /").unwrap_err();
        assert_eq!(err.kind, crate::errors::ToolErrorKind::SafetyBlocked);
        let warnings = gate.check("sudo ls").unwrap();
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn script_scan_collects_deduplicated_warnings() {
        let gate = gate();
        let script = "set -e\nsudo apt update\nsudo apt install -y jq\nls\n";
        let warnings = gate.scan_script(script);
        assert!(warnings.contains(&"privilege escalation via sudo".to_string()));
        assert_eq!(
            warnings.iter().filter(|w| w.contains("sudo")).count(),
            1,
            "warnings must be deduplicated"
        );
    }
}
