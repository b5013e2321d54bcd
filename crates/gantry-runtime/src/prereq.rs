use std::fmt;
use std::process::Command;

/// A missing prerequisite with actionable install instructions.
#[derive(Debug)]
pub struct MissingPrereq {
    pub name: &'static str,
    pub purpose: &'static str,
    pub install_hint: &'static str,
}

impl fmt::Display for MissingPrereq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  - {}: {} (install: {})",
            self.name, self.purpose, self.install_hint
        )
    }
}

pub fn command_exists(name: &str) -> bool {
    Command::new("which")
        .arg(name)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Check the host tools a worker needs for the given engine.
/// An empty list means every prerequisite is met.
pub fn check_engine_prereqs(engine: &str) -> Vec<MissingPrereq> {
    let mut missing = Vec::new();

    match engine {
        "docker" if !command_exists("docker") => missing.push(MissingPrereq {
            name: "docker",
            purpose: "building images and running stage containers",
            install_hint: "https://docs.docker.com/engine/install/",
        }),
        "podman" if !command_exists("podman") => missing.push(MissingPrereq {
            name: "podman",
            purpose: "building images and running stage containers",
            install_hint:
                "zypper install podman | apt install podman | dnf install podman | pacman -S podman",
        }),
        _ => {}
    }

    if !command_exists("git") {
        missing.push(MissingPrereq {
            name: "git",
            purpose: "checking out git, GitHub and GitLab sources",
            install_hint: "zypper install git | apt install git | dnf install git | pacman -S git",
        });
    }

    missing
}

/// Format a list of missing prerequisites into a user-friendly error message.
pub fn format_missing(missing: &[MissingPrereq]) -> String {
    use std::fmt::Write as _;
    let mut msg = String::from("missing prerequisites:\n");
    for m in missing {
        let _ = writeln!(msg, "{m}");
    }
    msg.push_str("\nGantry requires these tools to execute pipeline stages.");
    msg
}
