//! Command risk classification.
//!
//! Maps a full command line to a [`RiskLevel`] plus a human-readable reason.
//! Side-effect-free: classification never touches the filesystem or spawns a
//! process. Ported from the dangerous/safe command detection idiom in
//! `command_safety::dangerous_commands` and `command_safety::safe_command_registry`,
//! generalized to the four-level risk model this engine uses instead of a
//! boolean allow/deny.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::risk::RiskLevel;

/// Result of classifying a single command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub risk: RiskLevel,
    pub reason: String,
}

impl Classification {
    fn new(risk: RiskLevel, reason: impl Into<String>) -> Self {
        Self {
            risk,
            reason: reason.into(),
        }
    }
}

/// Regexes for command lines that must never execute, under any policy.
static FORBIDDEN_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"rm\s+(-\w*r\w*f\w*|-\w*f\w*r\w*)\s+/\s*$",
        r"rm\s+(-\w*r\w*f\w*|-\w*f\w*r\w*)\s+/\s",
        r"rm\s+(-\w*r\w*f\w*|-\w*f\w*r\w*)\s+\*\s*$",
        r"rm\s+(-\w*r\w*f\w*|-\w*f\w*r\w*)\s+~\s*$",
        r":\(\)\s*\{\s*:\|\s*:&\s*\}\s*;\s*:",
        r"dd\s+if=.*\s+of=/dev/",
        r"\bmkfs(\.\w+)?\b",
        r"\bfdisk\b",
        r">\s*/dev/sd\w*",
        r"chmod\s+(-R\s+)?777\s+/\s*$",
        r"(curl|wget)\b.*\|\s*(sh|bash|zsh)\b",
        r"\beval\s*\(",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("static forbidden pattern must compile"))
    .collect()
});

/// Read-only inspection, read-only VCS, package inspection, identity,
/// process/disk info, and search tools. Matches exact base command, a
/// documented-prefix entry, or a user-typed prefix of the entry (so `git`
/// matches the stored entry `git status`).
const SAFE_COMMANDS: &[&str] = &[
    "ls", "cat", "head", "tail", "less", "wc", "stat", "du", "find", "which",
    "git status", "git log", "git diff", "git show", "git branch", "git remote",
    "git blame", "git describe", "git tag -l",
    "pip list", "pip show", "npm list", "npm outdated", "npm audit",
    "pwd", "whoami", "hostname", "date", "uptime", "uname", "env", "printenv",
    "ps", "pgrep", "lsof", "df", "free",
    "grep", "rg", "ag",
];

const MODERATE_COMMANDS: &[&str] = &[
    "git add", "git commit", "git checkout", "git stash", "git fetch", "git pull",
    "git merge", "git rebase", "git branch -d", "git branch -m", "git tag",
    "pip install", "pip uninstall", "npm install", "npm uninstall",
    "touch", "mkdir", "cp", "mv",
    "make", "cargo build", "cargo test", "cargo run", "pytest",
    "npm run", "npm test", "npm build",
];

const DANGEROUS_COMMANDS: &[&str] = &[
    "shred", "truncate",
    "git push", "git reset --hard", "git clean", "git branch -D", "git rebase -i",
    "chmod", "chown", "chgrp",
    "sudo", "su",
    "mysql", "psql", "mongo", "redis-cli",
    "docker rm", "docker rmi", "docker system prune",
];

fn command_set_matches(entry: &str, input: &str) -> bool {
    input == entry
        || input
            .strip_prefix(entry)
            .is_some_and(|rest| rest.starts_with(char::is_whitespace))
        || entry
            .strip_prefix(input)
            .is_some_and(|rest| rest.starts_with(char::is_whitespace))
}

fn matches_any(set: &[&str], input: &str) -> Option<&'static str> {
    set.iter().find(|entry| command_set_matches(entry, input)).copied()
}

fn matches_any_owned(set: &[String], input: &str) -> Option<String> {
    set.iter()
        .find(|entry| command_set_matches(entry.as_str(), input))
        .cloned()
}

/// Split a full command line on pipes, substitutions, redirects, `&&`/`||`,
/// and `;`, returning the trimmed first segment and its leading word (the
/// "base command").
fn first_segment(line: &str) -> (String, String) {
    let boundary = line
        .find(['|', ';', '\u{0}'])
        .into_iter()
        .chain(line.find("&&"))
        .chain(line.find("||"))
        .chain(line.find('>'))
        .chain(line.find('<'))
        .chain(line.find("$("))
        .chain(line.find('`'))
        .min();

    let segment = match boundary {
        Some(idx) => &line[..idx],
        None => line,
    };
    let segment = segment.trim().to_string();
    let base = segment
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_string();
    (segment, base)
}

fn has_flag(line: &str, short: &[char], long: &[&str]) -> bool {
    shell_words::split(line)
        .unwrap_or_default()
        .iter()
        .any(|token| {
            if let Some(stripped) = token.strip_prefix("--") {
                long.contains(&stripped)
            } else if let Some(stripped) = token.strip_prefix('-') {
                !stripped.starts_with('-') && stripped.chars().any(|c| short.contains(&c))
            } else {
                false
            }
        })
}

/// Classify a full command line, optionally consulting a project's
/// extra allow/block sets. Pure function: first matching rule wins.
pub fn classify(
    command: &str,
    extra_allowed: &[String],
    extra_blocked: &[String],
) -> Classification {
    let trimmed = command.trim();
    if trimmed.is_empty() {
        return Classification::new(RiskLevel::Moderate, "empty command defaults to moderate");
    }

    if FORBIDDEN_PATTERNS.iter().any(|re| re.is_match(trimmed)) {
        return Classification::new(
            RiskLevel::Forbidden,
            format!("FORBIDDEN: command matches a known-destructive pattern: {trimmed}"),
        );
    }

    let (segment, base) = first_segment(trimmed);

    let blocked_match = matches_any_owned(extra_blocked, &segment);
    let allowed_match = matches_any_owned(extra_allowed, &segment);

    if let Some(entry) = blocked_match {
        if allowed_match.is_some() {
            return Classification::new(RiskLevel::Forbidden, "blocked wins".to_string());
        }
        return Classification::new(
            RiskLevel::Forbidden,
            format!("project blocklist match: {entry}"),
        );
    }

    if let Some(entry) = allowed_match {
        return Classification::new(RiskLevel::Safe, format!("project allowlist match: {entry}"));
    }

    if let Some(entry) = matches_any(SAFE_COMMANDS, &segment) {
        return Classification::new(RiskLevel::Safe, format!("safe command match: {entry}"));
    }

    if let Some(entry) = matches_any(MODERATE_COMMANDS, &segment) {
        return Classification::new(RiskLevel::Moderate, format!("moderate command match: {entry}"));
    }

    if let Some(entry) = matches_any(DANGEROUS_COMMANDS, &segment) {
        return Classification::new(
            RiskLevel::Dangerous,
            format!("dangerous command match: {entry}"),
        );
    }

    if base == "rm" || base == "rmdir" {
        if has_flag(&segment, &['r', 'f'], &["recursive", "force"]) {
            return Classification::new(RiskLevel::Dangerous, format!("{base} with -r or -f flag"));
        }
        return Classification::new(RiskLevel::Moderate, format!("plain {base} of a single file"));
    }

    if base == "sed" || base == "awk" {
        return if has_flag(&segment, &['i'], &["in-place"]) {
            Classification::new(RiskLevel::Moderate, format!("{base} -i edits files in place"))
        } else {
            Classification::new(RiskLevel::Safe, format!("{base} without -i is read-only"))
        };
    }

    if trimmed
        .split_whitespace()
        .any(|token| token == "sudo")
    {
        return Classification::new(RiskLevel::Dangerous, "command invokes sudo");
    }

    Classification::new(RiskLevel::Moderate, "unrecognized command defaults to moderate")
}
