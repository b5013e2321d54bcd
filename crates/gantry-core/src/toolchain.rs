use gantry_schema::{BuildTool, BuildToolKind};

/// How the package stage provisions and caches one build tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Toolchain {
    pub kind: BuildToolKind,
    /// File in the workspace root that marks a project of this tool.
    pub manifest: &'static str,
    /// Dependency resolution, run before the unit tests.
    pub provision: &'static str,
    /// Dependency cache directory inside the builder container.
    pub cache_path: &'static str,
}

pub fn toolchain(kind: BuildToolKind) -> Toolchain {
    let (manifest, provision, cache_path) = match kind {
        BuildToolKind::Maven => (
            "pom.xml",
            "mvn -B -q dependency:go-offline",
            "/root/.m2/repository",
        ),
        BuildToolKind::Gradle => (
            "build.gradle",
            "gradle --no-daemon -q dependencies",
            "/root/.gradle/caches",
        ),
        BuildToolKind::Npm => (
            "package.json",
            "npm install --no-audit --no-fund",
            "/root/.npm",
        ),
        BuildToolKind::Cargo => ("Cargo.toml", "cargo fetch", "/usr/local/cargo/registry"),
        BuildToolKind::Go => ("go.mod", "go mod download", "/go/pkg/mod"),
    };
    Toolchain {
        kind,
        manifest,
        provision,
        cache_path,
    }
}

impl Toolchain {
    /// Provisioning is skipped when the project has no manifest for the tool.
    pub fn provision_commands(&self) -> Vec<String> {
        vec![format!(
            "if [ -f {} ]; then {}; fi",
            self.manifest, self.provision
        )]
    }
}

/// Cache directory name for a tool: `<name>-<first 16 hex of blake3(name, version)>`.
pub fn cache_key(tool: &BuildTool) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(tool.name.as_str().as_bytes());
    hasher.update(b"\0");
    hasher.update(tool.version.as_bytes());
    let hex = hasher.finalize().to_hex();
    format!("{}-{}", tool.name, &hex.as_str()[..16])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(name: BuildToolKind, version: &str) -> BuildTool {
        BuildTool {
            name,
            version: version.to_owned(),
            cache_dependency: true,
        }
    }

    #[test]
    fn maven_provisioning_is_guarded_on_pom() {
        let cmds = toolchain(BuildToolKind::Maven).provision_commands();
        assert_eq!(
            cmds,
            vec!["if [ -f pom.xml ]; then mvn -B -q dependency:go-offline; fi"]
        );
    }

    #[test]
    fn every_tool_has_a_cache_path() {
        for kind in [
            BuildToolKind::Maven,
            BuildToolKind::Gradle,
            BuildToolKind::Npm,
            BuildToolKind::Cargo,
            BuildToolKind::Go,
        ] {
            let chain = toolchain(kind);
            assert!(chain.cache_path.starts_with('/'));
            assert_eq!(chain.kind, kind);
        }
    }

    #[test]
    fn cache_key_depends_on_name_and_version() {
        let a = cache_key(&tool(BuildToolKind::Maven, "1.0"));
        assert_eq!(a, cache_key(&tool(BuildToolKind::Maven, "1.0")));
        assert_ne!(a, cache_key(&tool(BuildToolKind::Maven, "1.1")));
        assert_ne!(a, cache_key(&tool(BuildToolKind::Gradle, "1.0")));
        assert!(a.starts_with("maven-"));
        assert_eq!(a.len(), "maven-".len() + 16);
    }
}
