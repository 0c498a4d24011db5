use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{DeployError, DeployResult};
use crate::fs::FileSystem;

pub const DEFAULT_API_HOST: &str = "https://api.supabase.io";
pub const DEFAULT_RELEASE_HOST: &str = "https://github.com";
pub const DENO_VERSION: &str = "1.30.3";

pub const SUPABASE_DIR: &str = "supabase";
pub const FUNCTIONS_DIR: &str = "supabase/functions";
pub const CONFIG_PATH: &str = "supabase/config.toml";
pub const PROJECT_REF_PATH: &str = "supabase/.temp/project-ref";
pub const FALLBACK_IMPORT_MAP_PATH: &str = "supabase/functions/import_map.json";

/// Project configuration loaded from supabase/config.toml
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Project identifier used by local tooling
    #[serde(default)]
    pub project_id: Option<String>,

    /// Per-function settings, keyed by slug
    #[serde(default)]
    pub functions: BTreeMap<String, FunctionConfig>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct FunctionConfig {
    /// Require a valid JWT in the Authorization header
    pub verify_jwt: Option<bool>,

    /// Import map for this function, relative to the supabase directory
    pub import_map: Option<String>,
}

impl ProjectConfig {
    /// Load config from `<workdir>/supabase/config.toml`, returning default if the file doesn't exist
    pub fn load(fs: &dyn FileSystem, workdir: &Path) -> DeployResult<Self> {
        let path = workdir.join(CONFIG_PATH);
        if !fs.exists(&path) {
            return Ok(Self::default());
        }

        let content = fs.read_to_string(&path)?;
        toml::from_str(&content).map_err(|source| DeployError::Config { path, source })
    }

    /// Per-function `verify_jwt`, if configured
    pub fn verify_jwt(&self, slug: &str) -> Option<bool> {
        self.functions.get(slug).and_then(|f| f.verify_jwt)
    }

    /// Per-function import map, resolved against the supabase directory
    pub fn import_map(&self, slug: &str, workdir: &Path) -> Option<PathBuf> {
        self.functions
            .get(slug)
            .and_then(|f| f.import_map.as_deref())
            .map(|p| workdir.join(SUPABASE_DIR).join(p))
    }
}

/// Settings shared by every deploy in one invocation
#[derive(Debug, Clone)]
pub struct DeploySettings {
    /// Project root containing the supabase directory
    pub workdir: PathBuf,
}

impl DeploySettings {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn functions_dir(&self) -> PathBuf {
        self.workdir.join(FUNCTIONS_DIR)
    }

    pub fn fallback_import_map(&self) -> PathBuf {
        self.workdir.join(FALLBACK_IMPORT_MAP_PATH)
    }

    /// Join relative paths onto the working directory
    pub fn absolute(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workdir.join(path)
        }
    }
}

/// Installer settings for the bundler toolchain
#[derive(Debug, Clone)]
pub struct ToolchainSettings {
    /// Where the deno executable lives
    pub deno_path: PathBuf,

    /// Pinned deno release
    pub version: String,

    /// Base URL serving `/denoland/deno/releases/download/...`
    pub release_host: String,
}

impl Default for ToolchainSettings {
    fn default() -> Self {
        Self {
            deno_path: default_deno_path(),
            version: DENO_VERSION.to_string(),
            release_host: DEFAULT_RELEASE_HOST.to_string(),
        }
    }
}

/// Get the CLI home directory (~/.supabase)
pub fn supabase_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".supabase")
}

pub fn default_deno_path() -> PathBuf {
    let name = if cfg!(windows) { "deno.exe" } else { "deno" };
    supabase_home().join(name)
}

pub fn access_token_path() -> PathBuf {
    supabase_home().join("access-token")
}

/// Resolve the access token (flag/env -> `token_path`)
pub fn resolve_access_token(
    fs: &dyn FileSystem,
    token_path: &Path,
    explicit: Option<String>,
) -> DeployResult<String> {
    if let Some(token) = explicit.filter(|t| !t.trim().is_empty()) {
        return Ok(token.trim().to_string());
    }

    if !fs.exists(token_path) {
        return Err(DeployError::MissingAccessToken);
    }
    let content = fs.read_to_string(token_path)?;
    match content.trim() {
        "" => Err(DeployError::MissingAccessToken),
        token => Ok(token.to_string()),
    }
}

/// Resolve the project ref (flag/env -> supabase/.temp/project-ref)
pub fn resolve_project_ref(
    fs: &dyn FileSystem,
    workdir: &Path,
    explicit: Option<String>,
) -> DeployResult<String> {
    if let Some(project_ref) = explicit.filter(|r| !r.trim().is_empty()) {
        return Ok(project_ref.trim().to_string());
    }

    let path = workdir.join(PROJECT_REF_PATH);
    if !fs.exists(&path) {
        return Err(DeployError::MissingProjectRef);
    }
    let content = fs.read_to_string(&path)?;
    match content.trim() {
        "" => Err(DeployError::MissingProjectRef),
        project_ref => Ok(project_ref.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemFs;

    #[test]
    fn missing_config_uses_defaults() {
        let fs = MemFs::new();
        let cfg = ProjectConfig::load(&fs, Path::new("/project")).unwrap();
        assert!(cfg.functions.is_empty());
        assert_eq!(cfg.verify_jwt("test-func"), None);
    }

    #[test]
    fn reads_per_function_settings() {
        let fs = MemFs::new();
        fs.write(
            Path::new("/project/supabase/config.toml"),
            br#"
project_id = "demo"

[functions.test-func]
verify_jwt = false
import_map = "./functions/custom.json"
"#,
            0o644,
        )
        .unwrap();

        let cfg = ProjectConfig::load(&fs, Path::new("/project")).unwrap();
        assert_eq!(cfg.project_id.as_deref(), Some("demo"));
        assert_eq!(cfg.verify_jwt("test-func"), Some(false));
        assert_eq!(cfg.verify_jwt("other"), None);
        assert_eq!(
            cfg.import_map("test-func", Path::new("/project")),
            Some(PathBuf::from("/project/supabase/./functions/custom.json"))
        );
    }

    #[test]
    fn malformed_config_is_config_error() {
        let fs = MemFs::new();
        fs.write(Path::new("/project/supabase/config.toml"), b"[functions", 0o644)
            .unwrap();
        let err = ProjectConfig::load(&fs, Path::new("/project")).unwrap_err();
        match &err {
            DeployError::Config { path, .. } => {
                assert_eq!(path, Path::new("/project/supabase/config.toml"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn project_ref_prefers_explicit_value() {
        let fs = MemFs::new();
        fs.write(Path::new("/project/supabase/.temp/project-ref"), b"linked\n", 0o644)
            .unwrap();

        let explicit =
            resolve_project_ref(&fs, Path::new("/project"), Some("flag".to_string())).unwrap();
        assert_eq!(explicit, "flag");
        let linked = resolve_project_ref(&fs, Path::new("/project"), None).unwrap();
        assert_eq!(linked, "linked");
    }

    #[test]
    fn project_ref_missing_or_blank_is_reported() {
        let fs = MemFs::new();
        let err = resolve_project_ref(&fs, Path::new("/project"), None).unwrap_err();
        assert!(matches!(err, DeployError::MissingProjectRef));

        fs.write(Path::new("/project/supabase/.temp/project-ref"), b"  \n", 0o644)
            .unwrap();
        let err = resolve_project_ref(&fs, Path::new("/project"), None).unwrap_err();
        assert!(matches!(err, DeployError::MissingProjectRef));
    }

    #[test]
    fn access_token_falls_back_to_file() {
        let fs = MemFs::new();
        let token_path = Path::new("/home/user/.supabase/access-token");

        let err = resolve_access_token(&fs, token_path, None).unwrap_err();
        assert!(matches!(err, DeployError::MissingAccessToken));

        fs.write(token_path, b"sbp_from_file\n", 0o600).unwrap();
        assert_eq!(
            resolve_access_token(&fs, token_path, None).unwrap(),
            "sbp_from_file"
        );
        assert_eq!(
            resolve_access_token(&fs, token_path, Some(" sbp_flag ".to_string())).unwrap(),
            "sbp_flag"
        );
        assert_eq!(
            resolve_access_token(&fs, token_path, Some("   ".to_string())).unwrap(),
            "sbp_from_file"
        );
    }

    #[test]
    fn blank_access_token_file_is_missing() {
        let fs = MemFs::new();
        let token_path = Path::new("/home/user/.supabase/access-token");
        fs.write(token_path, b"\n", 0o600).unwrap();

        let err = resolve_access_token(&fs, token_path, None).unwrap_err();
        assert!(matches!(err, DeployError::MissingAccessToken));
    }

    #[test]
    fn relative_paths_join_workdir() {
        let settings = DeploySettings::new("/project");
        assert_eq!(
            settings.absolute(Path::new("import_map.json")),
            PathBuf::from("/project/import_map.json")
        );
        assert_eq!(
            settings.absolute(Path::new("/abs/map.json")),
            PathBuf::from("/abs/map.json")
        );
        assert_eq!(
            settings.fallback_import_map(),
            PathBuf::from("/project/supabase/functions/import_map.json")
        );
    }
}
