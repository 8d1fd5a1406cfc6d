//! `yacht check` command implementation.
//!
//! Loads `yacht.yaml` and its policy file the same way `yacht serve` does,
//! then reports:
//! - Errors that would stop the agent from starting (unset password
//!   variables, an unbuildable ruleset)
//! - Warnings about settings that weaken the write barrier
//! - A summary of how every classified table resolves

use anyhow::{Context, Result, bail};
use std::net::SocketAddr;
use std::path::Path;

use yacht_core::{DefaultPosture, TableClass, YachtConfig};
use yacht_policy::{Ruleset, SYSTEM_SCHEMAS};

// ============================================================================
// Check Result Types
// ============================================================================

/// Severity level for check results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    /// The agent would refuse to start.
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "INFO"),
            Severity::Warning => write!(f, "WARN"),
            Severity::Error => write!(f, "ERROR"),
        }
    }
}

/// A single check finding.
#[derive(Debug, Clone)]
pub struct CheckFinding {
    pub severity: Severity,
    /// Category of the check that produced this finding.
    pub category: &'static str,
    pub message: String,
    /// Location within the configuration (e.g. "backend.password").
    pub location: Option<String>,
}

impl CheckFinding {
    fn new(severity: Severity, category: &'static str, message: impl Into<String>) -> Self {
        Self {
            severity,
            category,
            message: message.into(),
            location: None,
        }
    }

    fn error(category: &'static str, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, category, message)
    }

    fn warning(category: &'static str, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, category, message)
    }

    fn info(category: &'static str, message: impl Into<String>) -> Self {
        Self::new(Severity::Info, category, message)
    }

    fn at(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

/// Results from running all checks.
#[derive(Debug, Default)]
pub struct CheckResults {
    pub findings: Vec<CheckFinding>,
}

impl CheckResults {
    fn push(&mut self, finding: CheckFinding) {
        self.findings.push(finding);
    }

    pub fn has_errors(&self) -> bool {
        self.count(Severity::Error) > 0
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.findings.iter().filter(|f| f.severity == severity).count()
    }

    /// Print human-readable summary, most severe first.
    pub fn print_summary(&self) {
        let mut findings: Vec<_> = self.findings.iter().collect();
        findings.sort_by(|a, b| b.severity.cmp(&a.severity).then(a.category.cmp(b.category)));

        if !findings.is_empty() {
            println!();
            println!("{}", "─".repeat(60));
        }
        for finding in findings {
            let location = finding
                .location
                .as_ref()
                .map(|l| format!(" [{l}]"))
                .unwrap_or_default();
            println!(
                "  {:<5} [{}]{}: {}",
                finding.severity, finding.category, location, finding.message
            );
        }

        println!();
        println!("{}", "═".repeat(60));
        let errors = self.count(Severity::Error);
        let warnings = self.count(Severity::Warning);
        if errors == 0 && warnings == 0 {
            println!("✅ All checks passed!");
        } else {
            println!("Summary: {errors} error(s), {warnings} warning(s)");
        }
    }
}

// ============================================================================
// Checks
// ============================================================================

/// Run every check against an already loaded configuration.
pub fn check_config(config: &YachtConfig) -> CheckResults {
    let mut results = CheckResults::default();
    check_policy(config, &mut results);
    check_credentials(config, &mut results);
    check_exposure(config, &mut results);
    check_audit(config, &mut results);
    results
}

fn check_policy(config: &YachtConfig, results: &mut CheckResults) {
    let policy = &config.policy;

    let classifications = match policy.classifications() {
        Ok(classifications) => classifications,
        Err(e) => {
            results.push(CheckFinding::error("policy", e.to_string()));
            return;
        }
    };

    if classifications.is_empty() {
        results.push(CheckFinding::warning(
            "policy",
            "no tables are classified; every write falls to the default posture",
        ));
    }

    if policy.default_posture == DefaultPosture::Allow {
        results.push(
            CheckFinding::warning("policy", "writes to unclassified tables are allowed")
                .at("default_posture"),
        );
    }

    if policy.allow_ddl {
        results.push(
            CheckFinding::warning("policy", "schema changes are evaluated like writes")
                .at("allow_ddl"),
        );
    }

    if policy.mooring {
        results.push(CheckFinding::info("policy", "agent starts moored").at("mooring"));
    }

    for (name, class) in &classifications {
        let schema = name.split_once('.').map(|(schema, _)| schema);
        if *class == TableClass::Writable && schema.is_some_and(|s| SYSTEM_SCHEMAS.contains(&s)) {
            results.push(
                CheckFinding::warning(
                    "policy",
                    format!("{name} is in a system schema and stays immutable"),
                )
                .at(format!("tables.{name}")),
            );
        }
    }
}

fn check_credentials(config: &YachtConfig, results: &mut CheckResults) {
    if let Err(e) = config.backend.resolve_password() {
        results.push(CheckFinding::error("credentials", e.to_string()).at("backend.password_env"));
    }
    if config.backend.password.is_some() {
        results.push(
            CheckFinding::warning("credentials", "backend password is stored in the config file")
                .at("backend.password"),
        );
    }

    for (idx, client) in config.clients.iter().enumerate() {
        if let Err(e) = client.secret() {
            results.push(CheckFinding::error("credentials", e.to_string()).at(format!("clients[{idx}]")));
        }
        if client.password.is_some() {
            results.push(
                CheckFinding::info(
                    "credentials",
                    format!(
                        "client '{}' uses a clear-text password; password_hash avoids storing it",
                        client.username
                    ),
                )
                .at(format!("clients[{idx}].password")),
            );
        }
    }
}

fn check_exposure(config: &YachtConfig, results: &mut CheckResults) {
    if !is_loopback(&config.proxy.listen_addr) {
        results.push(
            CheckFinding::info(
                "network",
                format!("proxy listens on {}, beyond this host", config.proxy.bind_address()),
            )
            .at("proxy.listen_addr"),
        );
    }

    if config.control.enabled {
        match config.control.listen_addr.parse::<SocketAddr>() {
            Ok(addr) if addr.ip().is_loopback() => {}
            Ok(addr) => results.push(
                CheckFinding::warning(
                    "network",
                    format!("control API on {addr} is reachable from other hosts"),
                )
                .at("control.listen_addr"),
            ),
            Err(_) => results.push(
                CheckFinding::error(
                    "network",
                    format!("'{}' is not a socket address", config.control.listen_addr),
                )
                .at("control.listen_addr"),
            ),
        }
    }
}

fn check_audit(config: &YachtConfig, results: &mut CheckResults) {
    if !config.audit.enabled {
        results.push(
            CheckFinding::warning("audit", "audit records are disabled").at("audit.enabled"),
        );
    } else if config.audit.file.is_none() {
        results.push(CheckFinding::info("audit", "audit records go to stdout only").at("audit.file"));
    }

    if config.audit.log_statements {
        results.push(
            CheckFinding::info("audit", "statement text, including literals, is recorded")
                .at("audit.log_statements"),
        );
    }
}

fn is_loopback(host: &str) -> bool {
    host == "localhost"
        || host
            .parse::<std::net::IpAddr>()
            .map(|ip| ip.is_loopback())
            .unwrap_or(false)
}

// ============================================================================
// Main Check Runner
// ============================================================================

pub fn run(config_path: &Path) -> Result<()> {
    println!("🔍 Checking Yacht configuration...");
    println!();

    let config = YachtConfig::load_with_context(config_path).context("Failed to load configuration")?;

    if let Some(policy_file) = &config.policy_file {
        println!("  📋 Policy file: {}", policy_file.display());
    } else {
        println!("  📋 Policy: inline");
    }

    let results = check_config(&config);

    if let Ok(ruleset) = Ruleset::from_config(&config.policy, 1) {
        print_classifications(&ruleset);
    }

    results.print_summary();

    if results.has_errors() {
        bail!(
            "Configuration check failed with {} error(s)",
            results.count(Severity::Error)
        );
    }
    Ok(())
}

fn print_classifications(ruleset: &Ruleset) {
    let entries = ruleset.entries();
    let immutable: Vec<_> = entries
        .iter()
        .filter(|(_, class)| *class == TableClass::Immutable)
        .map(|(name, _)| name.as_str())
        .collect();
    let writable: Vec<_> = entries
        .iter()
        .filter(|(_, class)| *class == TableClass::Writable)
        .map(|(name, _)| name.as_str())
        .collect();

    println!("  📊 Default posture: {:?}", ruleset.default_posture());
    println!("  🔒 Immutable ({}): {}", immutable.len(), immutable.join(", "));
    println!("  ✏️  Writable ({}): {}", writable.len(), writable.join(", "));
    println!("  🛡️  Always immutable schemas: {}", SYSTEM_SCHEMAS.join(", "));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(yaml: &str) -> YachtConfig {
        YachtConfig::from_yaml(yaml).unwrap()
    }

    fn categories(results: &CheckResults, severity: Severity) -> Vec<(&'static str, String)> {
        results
            .findings
            .iter()
            .filter(|f| f.severity == severity)
            .map(|f| (f.category, f.location.clone().unwrap_or_default()))
            .collect()
    }

    const HARDENED: &str = r#"
clients:
  - username: wordpress
    password_hash: "*6BB4837EB74329105EE4568DDA7DC67ED2CA2AD9"
backend:
  username: yacht
audit:
  file: audit.jsonl
policy:
  default_posture: deny
  tables:
    wp_users: immutable
    wp_posts: writable
"#;

    #[test]
    fn test_hardened_config_has_no_warnings() {
        let results = check_config(&load(HARDENED));
        assert!(!results.has_errors());
        assert_eq!(results.count(Severity::Warning), 0);
    }

    #[test]
    fn test_permissive_policy_is_flagged() {
        let yaml = r#"
clients:
  - username: wordpress
    password: secret
backend:
  password: hunter2
audit:
  enabled: false
policy:
  default_posture: allow
  allow_ddl: true
"#;
        let results = check_config(&load(yaml));
        let warnings = categories(&results, Severity::Warning);

        assert!(warnings.contains(&("policy", String::new())));
        assert!(warnings.contains(&("policy", "default_posture".to_string())));
        assert!(warnings.contains(&("policy", "allow_ddl".to_string())));
        assert!(warnings.contains(&("credentials", "backend.password".to_string())));
        assert!(warnings.contains(&("audit", "audit.enabled".to_string())));
        assert!(!results.has_errors());
    }

    #[test]
    fn test_unset_password_variable_is_an_error() {
        let yaml = r#"
clients:
  - username: wordpress
    password_env: YACHT_CHECK_TEST_UNSET_CLIENT
backend:
  password_env: YACHT_CHECK_TEST_UNSET_BACKEND
policy:
  tables:
    wp_users: immutable
"#;
        let results = check_config(&load(yaml));
        let errors = categories(&results, Severity::Error);
        assert_eq!(
            errors,
            vec![
                ("credentials", "backend.password_env".to_string()),
                ("credentials", "clients[0]".to_string()),
            ]
        );
    }

    #[test]
    fn test_control_api_exposure() {
        let yaml = format!("{HARDENED}control:\n  listen_addr: \"0.0.0.0:3308\"\n");
        let results = check_config(&load(&yaml));
        assert_eq!(
            categories(&results, Severity::Warning),
            vec![("network", "control.listen_addr".to_string())]
        );

        let yaml = format!("{HARDENED}control:\n  listen_addr: \"not an address\"\n");
        assert!(check_config(&load(&yaml)).has_errors());

        let yaml = format!("{HARDENED}control:\n  enabled: false\n  listen_addr: \"0.0.0.0:3308\"\n");
        assert_eq!(check_config(&load(&yaml)).count(Severity::Warning), 0);
    }

    #[test]
    fn test_writable_system_table_is_flagged() {
        let yaml = r#"
clients:
  - username: wordpress
    password_hash: "*6BB4837EB74329105EE4568DDA7DC67ED2CA2AD9"
audit:
  file: audit.jsonl
policy:
  tables:
    mysql.user: writable
"#;
        let results = check_config(&load(yaml));
        assert_eq!(
            categories(&results, Severity::Warning),
            vec![("policy", "tables.mysql.user".to_string())]
        );
    }

    #[test]
    fn test_run_fails_on_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("yacht.yaml");
        std::fs::write(
            &path,
            "clients:\n  - username: wordpress\n    password: secret\nbackend:\n  password_env: YACHT_CHECK_TEST_UNSET_RUN\n",
        )
        .unwrap();
        assert!(run(&path).is_err());

        std::fs::write(&path, HARDENED).unwrap();
        run(&path).unwrap();
    }
}
