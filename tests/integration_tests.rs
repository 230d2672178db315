//! Integration tests for the phasegate CLI
//!
//! These tests drive the binary end to end against temporary projects.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

const REQUIREMENT: &str = "Customers can pay by card\nCustomers receive an email receipt";

/// Helper to create a phasegate Command
fn phasegate() -> Command {
    cargo_bin_cmd!("phasegate")
}

/// Helper to create a temporary project directory
fn create_temp_project() -> TempDir {
    TempDir::new().unwrap()
}

/// Helper to initialize a phasegate project in a temp directory
fn init_project(dir: &TempDir) {
    phasegate()
        .current_dir(dir.path())
        .args(["init", "--name", "storefront", "--requirement", REQUIREMENT])
        .assert()
        .success();
}

/// Write `.phasegate/phasegate.toml` before init so init keeps it.
fn write_config(dir: &TempDir, content: &str) {
    let state_dir = dir.path().join(".phasegate");
    fs::create_dir_all(&state_dir).unwrap();
    fs::write(state_dir.join("phasegate.toml"), content).unwrap();
}

/// A shell worker that drains its request and reports completed work.
const SHELL_WORKER: &str = r#"
[delegation]
max_attempts = 1
backoff_base_ms = 1
backoff_max_ms = 1

[[workers]]
role = "backend"
task_types = ["coding"]
concurrency = 1
command = '''cat > /dev/null; echo '{"status":"completed","content":"Checkout endpoint delivered"}' '''
"#;

fn implement_task(key: &str, trace: &str) -> String {
    format!(
        "\n[[phases.tasks]]\nphase = 5\nkey = \"{key}\"\nrole = \"backend\"\ntask_type = \"coding\"\n\
         content = \"Build the checkout endpoint\"\ncomplexity = 4\ntrace = {trace}\n"
    )
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_phasegate_help() {
        phasegate()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("authorize"));
    }

    #[test]
    fn test_phasegate_version() {
        phasegate().arg("--version").assert().success();
    }

    #[test]
    fn test_init_creates_structure() {
        let dir = create_temp_project();

        phasegate()
            .current_dir(dir.path())
            .args(["init", "--name", "storefront", "--requirement", REQUIREMENT])
            .assert()
            .success()
            .stdout(predicate::str::contains("Initialized phasegate project 'storefront'"));

        assert!(dir.path().join(".phasegate").exists());
        assert!(dir.path().join(".phasegate/audit/runs").exists());
        assert!(dir.path().join(".phasegate/logs").exists());
        assert!(dir.path().join(".phasegate/phasegate.toml").exists());
        assert!(dir.path().join(".phasegate/roadmap.json").exists());
    }

    #[test]
    fn test_init_requires_requirement() {
        let dir = create_temp_project();

        phasegate()
            .current_dir(dir.path())
            .arg("init")
            .assert()
            .failure()
            .stderr(predicate::str::contains("--requirement"));

        assert!(!dir.path().join(".phasegate/roadmap.json").exists());
    }

    #[test]
    fn test_init_reads_requirement_file() {
        let dir = create_temp_project();
        fs::write(dir.path().join("REQUIREMENT.txt"), REQUIREMENT).unwrap();

        phasegate()
            .current_dir(dir.path())
            .args(["init", "--requirement-file", "REQUIREMENT.txt", "--part", "checkout", "--part", "receipts"])
            .assert()
            .success()
            .stdout(predicate::str::contains("2 part(s)"));

        phasegate()
            .current_dir(dir.path())
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("2 scope entries"))
            .stdout(predicate::str::contains("checkout"))
            .stdout(predicate::str::contains("receipts"));
    }

    #[test]
    fn test_second_init_keeps_locked_requirement() {
        let dir = create_temp_project();
        init_project(&dir);
        let before = fs::read_to_string(dir.path().join(".phasegate/roadmap.json")).unwrap();

        phasegate()
            .current_dir(dir.path())
            .args(["init", "--requirement", "Something else entirely"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("already initialized"));

        let after = fs::read_to_string(dir.path().join(".phasegate/roadmap.json")).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_status_uninitialized() {
        let dir = create_temp_project();

        phasegate()
            .current_dir(dir.path())
            .arg("status")
            .assert()
            .failure()
            .stderr(predicate::str::contains("not initialized"));
    }

    #[test]
    fn test_status_initialized() {
        let dir = create_temp_project();
        init_project(&dir);

        phasegate()
            .current_dir(dir.path())
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("Project:     storefront"))
            .stdout(predicate::str::contains("part-01"))
            .stdout(predicate::str::contains("not-started"))
            .stdout(predicate::str::contains("Budget: 0/25"));
    }

    #[test]
    fn test_status_unknown_part() {
        let dir = create_temp_project();
        init_project(&dir);

        phasegate()
            .current_dir(dir.path())
            .args(["status", "--part", "7"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Unknown part part-07"));
    }
}

// =============================================================================
// Configuration Tests
// =============================================================================

mod configuration {
    use super::*;

    #[test]
    fn test_config_show_defaults() {
        let dir = create_temp_project();

        phasegate()
            .current_dir(dir.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("using defaults"))
            .stdout(predicate::str::contains("max_cycles = 3"))
            .stdout(predicate::str::contains("P10 Prepare"));
    }

    #[test]
    fn test_config_init_creates_toml() {
        let dir = create_temp_project();

        phasegate()
            .current_dir(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created phasegate.toml"));

        let content = fs::read_to_string(dir.path().join(".phasegate/phasegate.toml")).unwrap();
        assert!(content.contains("[[workers]]"));

        phasegate()
            .current_dir(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("already exists"));
    }

    #[test]
    fn test_config_validate_no_config() {
        let dir = create_temp_project();

        phasegate()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Using defaults (valid)"));
    }

    #[test]
    fn test_config_validate_reports_warnings() {
        let dir = create_temp_project();
        write_config(
            &dir,
            r#"
[[gates.definitions]]
phase = 8
name = "user-value"
validators = ["user_value"]
rule = "dual_approval"
"#,
        );

        phasegate()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("uses dual_approval but lists 1 validators"))
            .stdout(predicate::str::contains("undeclared validator 'user_value'"));
    }

    #[test]
    fn test_config_show_phase_overrides_and_gates() {
        let dir = create_temp_project();
        write_config(
            &dir,
            r#"
[phases.overrides."impl*"]
timeout_secs = 42

[[validators]]
role = "qa_lead"
command = "true"

[[gates.definitions]]
phase = 6
name = "verification"
validators = ["qa_lead"]
"#,
        );

        phasegate()
            .current_dir(dir.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("timeout     42s"))
            .stdout(predicate::str::contains("verification (all_must_pass)"))
            .stdout(predicate::str::contains("qa_lead"));
    }

    #[test]
    fn test_malformed_config_is_reported() {
        let dir = create_temp_project();
        write_config(&dir, "[budget\ndefault_points = ");

        phasegate()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .failure();
    }
}

// =============================================================================
// Running Parts
// =============================================================================

mod running {
    use super::*;

    #[test]
    fn test_run_without_tasks_completes() {
        let dir = create_temp_project();
        init_project(&dir);

        phasegate()
            .current_dir(dir.path())
            .arg("run")
            .assert()
            .success()
            .stdout(predicate::str::contains("completed"));

        phasegate()
            .current_dir(dir.path())
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("completed at P10 Prepare"));
    }

    #[test]
    fn test_run_step_advances_one_phase() {
        let dir = create_temp_project();
        init_project(&dir);

        phasegate()
            .current_dir(dir.path())
            .args(["run", "--step"])
            .assert()
            .success()
            .stdout(predicate::str::contains("advanced from P0 Initialization to P1 Research"));

        phasegate()
            .current_dir(dir.path())
            .args(["status", "--part", "part-01"])
            .assert()
            .success()
            .stdout(predicate::str::contains("in-progress at P1 Research"));
    }

    #[test]
    fn test_run_with_shell_worker() {
        let dir = create_temp_project();
        write_config(&dir, &format!("{SHELL_WORKER}{}", implement_task("checkout-api", "[1]")));
        init_project(&dir);

        phasegate()
            .current_dir(dir.path())
            .args(["run", "--part", "1"])
            .assert()
            .success()
            .stdout(predicate::str::contains("completed"));

        phasegate()
            .current_dir(dir.path())
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("Budget: 4/25"));

        let journal = fs::read_to_string(dir.path().join(".phasegate/knowledge.jsonl")).unwrap();
        assert!(journal.contains("Checkout endpoint delivered"));
    }

    #[test]
    fn test_task_outcomes_are_reported() {
        let dir = create_temp_project();
        write_config(&dir, &format!("{SHELL_WORKER}{}", implement_task("checkout-api", "[1]")));
        init_project(&dir);

        phasegate()
            .current_dir(dir.path())
            .arg("tasks")
            .assert()
            .success()
            .stdout(predicate::str::contains("No tasks planned yet"));

        phasegate().current_dir(dir.path()).arg("run").assert().success();

        phasegate()
            .current_dir(dir.path())
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains(
                "Tasks:  1 dispatched, 1 completed, 0 failed (100% success)",
            ));

        phasegate()
            .current_dir(dir.path())
            .args(["tasks", "--part", "1"])
            .assert()
            .success()
            .stdout(predicate::str::contains("P5 Implement"))
            .stdout(predicate::str::contains("checkout-api"))
            .stdout(predicate::str::contains("completed"));
    }

    #[test]
    fn test_history_and_gates_after_run() {
        let dir = create_temp_project();
        init_project(&dir);

        phasegate()
            .current_dir(dir.path())
            .arg("history")
            .assert()
            .success()
            .stdout(predicate::str::contains("No transitions recorded yet"));
        phasegate()
            .current_dir(dir.path())
            .arg("gates")
            .assert()
            .success()
            .stdout(predicate::str::contains("No gate evaluations recorded yet"));

        phasegate().current_dir(dir.path()).arg("run").assert().success();

        phasegate()
            .current_dir(dir.path())
            .args(["history", "-n", "1"])
            .assert()
            .success()
            .stdout(predicate::str::contains("all phases passed"))
            .stdout(predicate::str::contains("earlier transition(s) not shown"));
        phasegate()
            .current_dir(dir.path())
            .arg("gates")
            .assert()
            .success()
            .stdout(predicate::str::contains("gate 'completeness'"))
            .stdout(predicate::str::contains("P10 Prepare"));
    }

    #[test]
    fn test_audit_runs_recorded() {
        let dir = create_temp_project();
        init_project(&dir);

        phasegate()
            .current_dir(dir.path())
            .args(["audit", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No audit runs recorded yet"));
        phasegate()
            .current_dir(dir.path())
            .args(["audit", "show"])
            .assert()
            .failure();

        phasegate().current_dir(dir.path()).args(["run", "--step"]).assert().success();

        phasegate()
            .current_dir(dir.path())
            .arg("audit")
            .assert()
            .success()
            .stdout(predicate::str::contains("advanced from P0 Initialization to P1 Research"));
        phasegate()
            .current_dir(dir.path())
            .args(["audit", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"run_id\""))
            .stdout(predicate::str::contains("\"gate_evaluated\""));
    }
}

// =============================================================================
// Halts and Authorizations
// =============================================================================

mod authorizations {
    use super::*;

    fn scope_project() -> TempDir {
        let dir = create_temp_project();
        write_config(&dir, &format!("{SHELL_WORKER}{}", implement_task("loyalty-points", "[9]")));
        init_project(&dir);
        dir
    }

    #[test]
    fn test_scope_halt_and_authorization() {
        let dir = scope_project();

        phasegate()
            .current_dir(dir.path())
            .arg("run")
            .assert()
            .success()
            .stdout(predicate::str::contains("halted"))
            .stdout(predicate::str::contains("phasegate authorize scope --part 1 --task loyalty-points"));

        phasegate()
            .current_dir(dir.path())
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("suspended"))
            .stdout(predicate::str::contains("Scope incidents: 1"));

        phasegate()
            .current_dir(dir.path())
            .args([
                "authorize", "scope", "--part", "1", "--task", "loyalty-points", "--id", "auth-1", "--by", "product",
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains("Authorization recorded"));

        phasegate()
            .current_dir(dir.path())
            .arg("run")
            .assert()
            .success()
            .stdout(predicate::str::contains("completed"));

        phasegate()
            .current_dir(dir.path())
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("Authorizations: 1"));
    }

    #[test]
    fn test_duplicate_authorization_id_rejected() {
        let dir = scope_project();
        phasegate().current_dir(dir.path()).arg("run").assert().success();

        let grant = [
            "authorize", "scope", "--part", "1", "--task", "gift-cards", "--id", "auth-1", "--by", "product",
        ];
        phasegate().current_dir(dir.path()).args(grant).assert().success();
        phasegate().current_dir(dir.path()).arg("run").assert().success();
        phasegate()
            .current_dir(dir.path())
            .args(grant)
            .assert()
            .failure()
            .stderr(predicate::str::contains("auth-1"));
    }

    #[test]
    fn test_revert_returns_to_plan() {
        let dir = scope_project();
        phasegate().current_dir(dir.path()).arg("run").assert().success();

        phasegate()
            .current_dir(dir.path())
            .args(["revert", "--part", "1"])
            .assert()
            .success()
            .stdout(predicate::str::contains("rolled-back(P2 Plan)"));
    }

    #[test]
    fn test_authorize_requires_matching_halt() {
        let dir = create_temp_project();
        init_project(&dir);

        phasegate()
            .current_dir(dir.path())
            .args(["authorize", "budget", "--part", "1", "--id", "ovr-1", "--by", "finance"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("part-01 is not suspended for budget-exceeded"));

        phasegate()
            .current_dir(dir.path())
            .args(["authorize", "escalation", "--part", "1", "--id", "esc-1", "--by", "lead"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("escalated"));

        phasegate()
            .current_dir(dir.path())
            .args(["revert", "--part", "1"])
            .assert()
            .failure();
    }

    #[test]
    fn test_clarify_requires_text() {
        let dir = create_temp_project();
        init_project(&dir);

        phasegate()
            .current_dir(dir.path())
            .args(["clarify", "--part", "1"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("--text or --file"));

        phasegate()
            .current_dir(dir.path())
            .args(["clarify", "--part", "1", "--text", "The processor account is acct-42"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("not suspended for clarification"));
    }

    #[test]
    fn test_budget_halt_via_cli() {
        let dir = create_temp_project();
        write_config(&dir, &format!("{SHELL_WORKER}{}", implement_task("checkout-api", "[1]")));
        phasegate()
            .current_dir(dir.path())
            .args(["init", "--requirement", REQUIREMENT, "--budget", "3"])
            .assert()
            .success();

        phasegate()
            .current_dir(dir.path())
            .arg("run")
            .assert()
            .success()
            .stdout(predicate::str::contains("halted"))
            .stdout(predicate::str::contains("phasegate authorize budget --part 1"));

        phasegate()
            .current_dir(dir.path())
            .args([
                "authorize", "budget", "--part", "1", "--id", "ovr-1", "--by", "finance", "--reason", "checkout first",
            ])
            .assert()
            .success();

        phasegate().current_dir(dir.path()).arg("run").assert().success();

        phasegate()
            .current_dir(dir.path())
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("Budget: 4/3"))
            .stdout(predicate::str::contains("overridden"))
            .stdout(predicate::str::contains("1 point(s) over allocation under 1 override(s)"));
    }
}

// =============================================================================
// Global Flags
// =============================================================================

mod global_flags {
    use super::*;

    #[test]
    fn test_project_dir_flag() {
        let dir = create_temp_project();
        let dir_arg = dir.path().to_str().unwrap();

        phasegate()
            .args(["--project-dir", dir_arg, "init", "--requirement", REQUIREMENT])
            .assert()
            .success();

        phasegate()
            .args(["--project-dir", dir_arg, "status"])
            .assert()
            .success()
            .stdout(predicate::str::contains("part-01"));
    }

    #[test]
    fn test_verbose_flag() {
        let dir = create_temp_project();
        init_project(&dir);

        phasegate()
            .current_dir(dir.path())
            .args(["--verbose", "status"])
            .assert()
            .success();
    }

    #[test]
    fn test_json_log_format() {
        let dir = create_temp_project();
        init_project(&dir);

        phasegate()
            .current_dir(dir.path())
            .args(["--log-format", "json", "run", "--step"])
            .assert()
            .success()
            .stderr(predicate::str::contains("\"level\":\"INFO\""));
    }
}
