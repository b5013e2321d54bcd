use crate::{redact, ScmError, SourceCredentials, SourceProvider};
use gantry_schema::SourceDescriptor;
use std::path::Path;
use std::process::Command;
use tracing::debug;

/// Subversion checkout. The ref is a revision number or `HEAD`.
pub struct SvnProvider {
    binary: String,
}

impl Default for SvnProvider {
    fn default() -> Self {
        Self {
            binary: "svn".to_owned(),
        }
    }
}

impl SvnProvider {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }
}

pub(crate) fn checkout_args(
    url: &str,
    dest: &Path,
    revision: Option<&str>,
    credentials: &SourceCredentials,
) -> Vec<String> {
    let mut args = vec![
        "checkout".to_owned(),
        "--non-interactive".to_owned(),
        "--quiet".to_owned(),
        "--no-auth-cache".to_owned(),
    ];
    if let Some(user) = &credentials.username {
        args.push("--username".to_owned());
        args.push(user.clone());
    }
    if let Some(secret) = credentials.password.as_ref().or(credentials.token.as_ref()) {
        args.push("--password".to_owned());
        args.push(secret.clone());
    }
    match revision.filter(|r| !r.is_empty()) {
        Some(rev) => args.push(format!("{url}@{rev}")),
        None => args.push(url.to_owned()),
    }
    args.push(dest.to_string_lossy().into_owned());
    args
}

impl SourceProvider for SvnProvider {
    fn name(&self) -> &'static str {
        "svn"
    }

    fn checkout(
        &self,
        descriptor: &SourceDescriptor,
        dest: &Path,
        git_ref: Option<&str>,
        credentials: &SourceCredentials,
    ) -> Result<(), ScmError> {
        if descriptor.url.trim().is_empty() {
            return Err(ScmError::InvalidUrl(descriptor.url.clone()));
        }
        debug!("svn checkout {} into {}", descriptor.url, dest.display());
        let output = Command::new(&self.binary)
            .args(checkout_args(&descriptor.url, dest, git_ref, credentials))
            .output()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ScmError::ToolUnavailable("svn")
                } else {
                    ScmError::Io(e)
                }
            })?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = redact(String::from_utf8_lossy(&output.stderr).trim(), credentials);
        if stderr.contains("E160006") || stderr.contains("No such revision") {
            return Err(ScmError::InvalidRef(git_ref.unwrap_or_default().to_owned()));
        }
        Err(ScmError::CommandFailed {
            tool: "svn",
            action: "checkout",
            stderr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revision_appended_as_peg() {
        let args = checkout_args(
            "https://svn.example.com/repo/trunk",
            Path::new("/ws"),
            Some("1234"),
            &SourceCredentials::anonymous(),
        );
        assert_eq!(
            args,
            vec![
                "checkout",
                "--non-interactive",
                "--quiet",
                "--no-auth-cache",
                "https://svn.example.com/repo/trunk@1234",
                "/ws"
            ]
        );
    }

    #[test]
    fn login_passed_when_present() {
        let creds = SourceCredentials {
            username: Some("ci".to_owned()),
            token: Some("tok".to_owned()),
            ..SourceCredentials::default()
        };
        let args = checkout_args("svn://host/r", Path::new("/ws"), None, &creds);
        let pos = args.iter().position(|a| a == "--username").unwrap();
        assert_eq!(args[pos + 1], "ci");
        let pos = args.iter().position(|a| a == "--password").unwrap();
        assert_eq!(args[pos + 1], "tok");
        assert_eq!(args[args.len() - 2], "svn://host/r");
    }

    #[test]
    fn missing_binary_reported() {
        let descriptor =
            SourceDescriptor::new(gantry_schema::SourceKind::Svn, "svn://host/r");
        let dest = tempfile::tempdir().unwrap();
        let err = SvnProvider::new()
            .with_binary("/nonexistent/gantry-svn")
            .checkout(&descriptor, dest.path(), None, &SourceCredentials::anonymous())
            .unwrap_err();
        assert!(matches!(err, ScmError::ToolUnavailable("svn")));
    }
}
