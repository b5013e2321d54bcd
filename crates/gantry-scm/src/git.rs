use crate::{redact, ScmError, SourceCredentials, SourceProvider};
use gantry_schema::{SourceDescriptor, SourceKind};
use std::path::Path;
use std::process::{Command, Output};
use tracing::debug;

/// Git checkout for GitHub, GitLab and plain git remotes.
///
/// The event token is injected into https URLs as basic-auth userinfo; the
/// remote URL is reset to its plain form once the checkout is done so the
/// token never persists in `.git/config`.
pub struct GitProvider {
    flavor: SourceKind,
    binary: String,
}

impl GitProvider {
    pub fn github() -> Self {
        Self::for_kind(SourceKind::Github)
    }

    pub fn gitlab() -> Self {
        Self::for_kind(SourceKind::Gitlab)
    }

    pub fn generic() -> Self {
        Self::for_kind(SourceKind::Git)
    }

    fn for_kind(flavor: SourceKind) -> Self {
        Self {
            flavor,
            binary: "git".to_owned(),
        }
    }

    #[must_use]
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    fn run(
        &self,
        action: &'static str,
        args: &[&str],
        credentials: &SourceCredentials,
    ) -> Result<Output, ScmError> {
        debug!("git {action}");
        let output = Command::new(&self.binary)
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .output()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ScmError::ToolUnavailable("git")
                } else {
                    ScmError::Io(e)
                }
            })?;
        if output.status.success() {
            return Ok(output);
        }
        let stderr = redact(String::from_utf8_lossy(&output.stderr).trim(), credentials);
        Err(ScmError::CommandFailed {
            tool: "git",
            action,
            stderr,
        })
    }

    /// Userinfo injected into https URLs, if any credentials apply.
    fn userinfo(&self, credentials: &SourceCredentials) -> Option<(String, String)> {
        if let Some(token) = &credentials.token {
            let user = match self.flavor {
                SourceKind::Github => "x-access-token".to_owned(),
                SourceKind::Gitlab => "oauth2".to_owned(),
                _ => credentials
                    .username
                    .clone()
                    .unwrap_or_else(|| "git".to_owned()),
            };
            return Some((user, token.clone()));
        }
        match (&credentials.username, &credentials.password) {
            (Some(user), Some(password)) => Some((user.clone(), password.clone())),
            _ => None,
        }
    }
}

/// Percent-encode everything outside the RFC 3986 unreserved set.
pub(crate) fn encode_userinfo(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~') {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

/// `https://host/path` with `user:secret@` spliced in. Non-http URLs are returned unchanged.
pub(crate) fn authenticated_url(url: &str, userinfo: Option<(String, String)>) -> String {
    let Some((user, secret)) = userinfo else {
        return url.to_owned();
    };
    for scheme in ["https://", "http://"] {
        if let Some(rest) = url.strip_prefix(scheme) {
            let (authority, path) = rest.split_once('/').unwrap_or((rest, ""));
            // any userinfo already present is replaced
            let host = authority.rsplit_once('@').map_or(authority, |(_, h)| h);
            let mut out = format!(
                "{scheme}{}:{}@{host}",
                encode_userinfo(&user),
                encode_userinfo(&secret)
            );
            if rest.contains('/') {
                out.push('/');
                out.push_str(path);
            }
            return out;
        }
    }
    url.to_owned()
}

impl SourceProvider for GitProvider {
    fn name(&self) -> &'static str {
        self.flavor.as_str()
    }

    fn checkout(
        &self,
        descriptor: &SourceDescriptor,
        dest: &Path,
        git_ref: Option<&str>,
        credentials: &SourceCredentials,
    ) -> Result<(), ScmError> {
        if descriptor.url.trim().is_empty() || descriptor.url.starts_with('-') {
            return Err(ScmError::InvalidUrl(descriptor.url.clone()));
        }
        if let Some(r) = git_ref.filter(|r| r.starts_with('-')) {
            return Err(ScmError::InvalidRef(r.to_owned()));
        }
        let remote = authenticated_url(&descriptor.url, self.userinfo(credentials));
        let dest_str = dest.to_string_lossy();
        debug!("cloning {} into {}", descriptor.url, dest.display());

        self.run(
            "clone",
            &["clone", "--quiet", "--", &remote, &dest_str],
            credentials,
        )
        .map_err(|e| match e {
            ScmError::CommandFailed { ref stderr, .. }
                if stderr.contains("not found") || stderr.contains("does not exist") =>
            {
                ScmError::NotFound(descriptor.url.clone())
            }
            other => other,
        })?;

        if let Some(r) = git_ref.filter(|r| !r.is_empty()) {
            debug!("checking out {r}");
            self.run(
                "fetch",
                &["-C", &dest_str, "fetch", "--quiet", "--", "origin", r],
                credentials,
            )
            .map_err(|e| match e {
                ScmError::CommandFailed { ref stderr, .. }
                    if stderr.contains("couldn't find remote ref")
                        || stderr.contains("not our ref") =>
                {
                    ScmError::InvalidRef(r.to_owned())
                }
                other => other,
            })?;
            self.run(
                "checkout",
                &["-C", &dest_str, "checkout", "--quiet", "--force", "FETCH_HEAD"],
                credentials,
            )?;
        }

        if remote != descriptor.url {
            self.run(
                "remote set-url",
                &["-C", &dest_str, "remote", "set-url", "origin", &descriptor.url],
                credentials,
            )?;
        }
        Ok(())
    }
}
