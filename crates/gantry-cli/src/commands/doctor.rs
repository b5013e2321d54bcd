use super::{EXIT_FAILURE, EXIT_SUCCESS};
use gantry_core::{Workspace, WorkspaceLock};
use gantry_runtime::{check_engine_prereqs, command_exists, format_missing, select_engine};
use gantry_schema::WorkerConfig;

pub fn run(config: &WorkerConfig, json_output: bool) -> Result<u8, String> {
    let mut checks: Vec<Check> = Vec::new();
    let mut all_pass = true;

    check_engine(config, &mut checks, &mut all_pass);
    check_source_tools(&mut checks);
    check_workspace(config, &mut checks, &mut all_pass);
    match &config.server {
        Some(server) => checks.push(Check::info(
            "server",
            &format!("Reporting stage status to {}", server.url),
        )),
        None => checks.push(Check::info(
            "server",
            "No server configured (stage status is not reported)",
        )),
    }

    print_results(&checks, all_pass, json_output)
}

fn check_engine(config: &WorkerConfig, checks: &mut Vec<Check>, all_pass: &mut bool) {
    let missing: Vec<_> = check_engine_prereqs(&config.engine)
        .into_iter()
        .filter(|m| m.name != "git")
        .collect();
    if !missing.is_empty() {
        *all_pass = false;
        checks.push(Check::fail(
            "engine_binary",
            &format!("Missing prerequisites: {}", format_missing(&missing)),
        ));
        return;
    }

    match select_engine(&config.engine) {
        Ok(engine) if engine.available() => checks.push(Check::pass(
            "engine",
            &format!("Container engine '{}' is available", config.engine),
        )),
        Ok(_) => {
            *all_pass = false;
            checks.push(Check::fail(
                "engine",
                &format!("Container engine '{}' is installed but not responding", config.engine),
            ));
        }
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail("engine", &format!("Unknown engine: {e}")));
        }
    }
}

fn check_source_tools(checks: &mut Vec<Check>) {
    if command_exists("git") {
        checks.push(Check::pass("git", "git found (github, gitlab and git sources)"));
    } else {
        checks.push(Check::warn(
            "git",
            "git not found: github, gitlab and git sources cannot be checked out",
        ));
    }
    if command_exists("svn") {
        checks.push(Check::pass("svn", "svn found (svn sources)"));
    } else {
        checks.push(Check::info("svn", "svn not found: svn sources are unavailable"));
    }
}

fn check_workspace(config: &WorkerConfig, checks: &mut Vec<Check>, all_pass: &mut bool) {
    let workspace = Workspace::new(&config.workspace);
    let root = workspace.root();
    let writable = std::fs::create_dir_all(root).and_then(|()| tempfile::tempfile_in(root));
    match writable {
        Ok(_) => checks.push(Check::pass(
            "workspace",
            &format!("Workspace {} is writable", root.display()),
        )),
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail(
                "workspace",
                &format!("Workspace {} is not writable: {e}", root.display()),
            ));
            return;
        }
    }

    match WorkspaceLock::try_acquire(&workspace.lock_path()) {
        Ok(Some(_)) => checks.push(Check::pass("workspace_lock", "Workspace lock is free")),
        Ok(None) => checks.push(Check::warn(
            "workspace_lock",
            "Workspace lock is held by another worker",
        )),
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail(
                "workspace_lock",
                &format!("Cannot check workspace lock: {e}"),
            ));
        }
    }
}

fn print_results(checks: &[Check], all_pass: bool, json_output: bool) -> Result<u8, String> {
    if json_output {
        let json = serde_json::json!({
            "healthy": all_pass,
            "checks": checks.iter().map(|c| serde_json::json!({
                "name": c.name,
                "status": c.status,
                "message": c.message,
            })).collect::<Vec<_>>(),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&json).map_err(|e| e.to_string())?
        );
    } else {
        println!("Gantry Doctor\n");
        for check in checks {
            let icon = match check.status {
                "pass" => "✓",
                "fail" => "✗",
                "warn" => "⚠",
                _ => "ℹ",
            };
            println!("  {icon} {}", check.message);
        }
        println!();
        if all_pass {
            println!("All checks passed.");
        } else {
            println!("Some checks failed. See above for details.");
        }
    }
    Ok(if all_pass { EXIT_SUCCESS } else { EXIT_FAILURE })
}

struct Check {
    name: &'static str,
    status: &'static str,
    message: String,
}

impl Check {
    fn new(name: &'static str, status: &'static str, message: &str) -> Self {
        Self {
            name,
            status,
            message: message.to_owned(),
        }
    }

    fn pass(name: &'static str, message: &str) -> Self {
        Self::new(name, "pass", message)
    }

    fn fail(name: &'static str, message: &str) -> Self {
        Self::new(name, "fail", message)
    }

    fn warn(name: &'static str, message: &str) -> Self {
        Self::new(name, "warn", message)
    }

    fn info(name: &'static str, message: &str) -> Self {
        Self::new(name, "info", message)
    }
}
