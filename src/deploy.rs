//! Reconciling local functions with their remote counterparts.
//!
//! Each function goes through validate, bundle, probe and upsert in that
//! order. A batch runs functions one at a time and stops at the first error;
//! functions deployed before the failure stay deployed.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::api::{CreateFunctionParams, FunctionResponse, FunctionsApi, UpdateFunctionParams};
use crate::bundler::{BundleArtifact, Bundler, DenoBundler};
use crate::config::{DeploySettings, ProjectConfig};
use crate::error::{DeployError, DeployResult};
use crate::fs::FileSystem;
use crate::functions::discover_slugs;
use crate::slug::FunctionSlug;
use crate::toolchain::Installer;

/// What the platform reported for a slug.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteFunctionState {
    NotFound,
    Found { id: String },
    /// Any other answer to the existence check.
    Unexpected { status: StatusCode, body: String },
}

/// The single write a deploy performs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertAction {
    Create,
    Update { id: String },
}

impl UpsertAction {
    /// Decide between create and update. An unexpected probe result is an
    /// error, never a create.
    pub fn from_state(state: RemoteFunctionState) -> DeployResult<Self> {
        match state {
            RemoteFunctionState::NotFound => Ok(Self::Create),
            RemoteFunctionState::Found { id } => Ok(Self::Update { id }),
            RemoteFunctionState::Unexpected { status, body } => {
                Err(DeployError::UnexpectedStatus { status, body })
            }
        }
    }
}

/// Inputs for deploying one function.
#[derive(Debug, Clone, Default)]
pub struct DeploySpec {
    pub slug: String,
    /// Defaults to `supabase/functions/<slug>/index.ts`.
    pub entrypoint_path: Option<PathBuf>,
    /// Must exist when given. Defaults to `supabase/functions/import_map.json`.
    pub import_map_path: Option<PathBuf>,
    /// Overrides `[functions.<slug>] verify_jwt` from config.toml.
    pub verify_jwt: Option<bool>,
}

impl DeploySpec {
    pub fn new(slug: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            ..Self::default()
        }
    }

    pub fn with_entrypoint(mut self, path: impl Into<PathBuf>) -> Self {
        self.entrypoint_path = Some(path.into());
        self
    }

    pub fn with_import_map(mut self, path: impl Into<PathBuf>) -> Self {
        self.import_map_path = Some(path.into());
        self
    }

    pub fn with_verify_jwt(mut self, verify_jwt: Option<bool>) -> Self {
        self.verify_jwt = verify_jwt;
        self
    }
}

/// Overrides shared by every function in a batch.
#[derive(Debug, Clone, Default)]
pub struct BatchOverrides {
    pub verify_jwt: Option<bool>,
    pub import_map_path: Option<PathBuf>,
}

impl BatchOverrides {
    fn spec_for(&self, slug: &str) -> DeploySpec {
        DeploySpec {
            slug: slug.to_string(),
            entrypoint_path: None,
            import_map_path: self.import_map_path.clone(),
            verify_jwt: self.verify_jwt,
        }
    }
}

/// Resolved request metadata for one function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionMetadata {
    pub slug: FunctionSlug,
    pub entrypoint_uri: String,
    pub import_map_uri: String,
    pub verify_jwt: bool,
}

impl FunctionMetadata {
    fn create_params(&self) -> CreateFunctionParams {
        CreateFunctionParams {
            slug: self.slug.to_string(),
            name: self.slug.to_string(),
            verify_jwt: self.verify_jwt,
            import_map_path: self.import_map_uri.clone(),
            entrypoint_path: self.entrypoint_uri.clone(),
        }
    }

    fn update_params(&self) -> UpdateFunctionParams {
        UpdateFunctionParams {
            verify_jwt: self.verify_jwt,
            import_map_path: self.import_map_uri.clone(),
            entrypoint_path: self.entrypoint_uri.clone(),
        }
    }
}

/// A function that reached the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployedFunction {
    pub slug: FunctionSlug,
    pub action: UpsertAction,
}

fn file_uri(path: &Path) -> String {
    format!("file://{}", path.display())
}

/// Resolve `verify_jwt`: flag, then config, then `true`.
pub fn resolve_verify_jwt(flag: Option<bool>, configured: Option<bool>) -> bool {
    flag.or(configured).unwrap_or(true)
}

async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> DeployResult<T>
where
    F: Future<Output = DeployResult<T>>,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => {
            warn!("request cancelled");
            Err(DeployError::Cancelled)
        }
        result = fut => result,
    }
}

/// Look up a function by slug.
///
/// Transport failures are returned as errors; every HTTP answer is
/// classified into a [`RemoteFunctionState`].
#[instrument(skip(api, slug, cancel), fields(slug = %slug))]
pub async fn probe_function(
    api: &dyn FunctionsApi,
    project_ref: &str,
    slug: &FunctionSlug,
    cancel: &CancellationToken,
) -> DeployResult<RemoteFunctionState> {
    let response = cancellable(cancel, api.get_function(project_ref, slug.as_str())).await?;

    let state = match response.status {
        StatusCode::NOT_FOUND => RemoteFunctionState::NotFound,
        StatusCode::OK => match serde_json::from_str::<FunctionResponse>(&response.body) {
            Ok(function) => RemoteFunctionState::Found { id: function.id },
            Err(e) => {
                debug!(error = %e, "existence check returned an unreadable payload");
                RemoteFunctionState::Unexpected {
                    status: response.status,
                    body: response.body,
                }
            }
        },
        status => RemoteFunctionState::Unexpected {
            status,
            body: response.body,
        },
    };
    debug!(?state, "probed function");
    Ok(state)
}

/// Issue the create or update implied by `state`, consuming the artifact.
#[instrument(skip(api, state, meta, artifact, cancel), fields(slug = %meta.slug))]
pub async fn upsert_function(
    api: &dyn FunctionsApi,
    project_ref: &str,
    state: RemoteFunctionState,
    meta: &FunctionMetadata,
    artifact: BundleArtifact,
    cancel: &CancellationToken,
) -> DeployResult<UpsertAction> {
    let action = UpsertAction::from_state(state)?;

    match &action {
        UpsertAction::Create => {
            let params = meta.create_params();
            let response = cancellable(
                cancel,
                api.create_function(project_ref, &params, artifact.into_bytes()),
            )
            .await?;
            if !response.status.is_success() {
                return Err(DeployError::CreateFailed {
                    status: response.status,
                    body: response.body,
                });
            }
            info!("created function");
        }
        UpsertAction::Update { id } => {
            let params = meta.update_params();
            let response = cancellable(
                cancel,
                api.update_function(project_ref, meta.slug.as_str(), &params, artifact.into_bytes()),
            )
            .await?;
            if !response.status.is_success() {
                return Err(DeployError::UpdateFailed {
                    status: response.status,
                    body: response.body,
                });
            }
            info!(%id, "updated function");
        }
    }

    Ok(action)
}

pub struct Deployer {
    fs: Arc<dyn FileSystem>,
    api: Arc<dyn FunctionsApi>,
    settings: DeploySettings,
}

impl Deployer {
    pub fn new(fs: Arc<dyn FileSystem>, api: Arc<dyn FunctionsApi>, settings: DeploySettings) -> Self {
        Self { fs, api, settings }
    }

    /// Resolve request metadata for `spec`, validating the slug first.
    pub fn resolve(&self, spec: &DeploySpec) -> DeployResult<FunctionMetadata> {
        let slug = FunctionSlug::parse(&spec.slug)?;
        let config = ProjectConfig::load(self.fs.as_ref(), &self.settings.workdir)?;

        let entrypoint = match &spec.entrypoint_path {
            Some(path) => self.settings.absolute(path),
            None => self
                .settings
                .functions_dir()
                .join(slug.as_str())
                .join("index.ts"),
        };

        let explicit_import_map = spec
            .import_map_path
            .as_deref()
            .map(|p| self.settings.absolute(p))
            .or_else(|| config.import_map(slug.as_str(), &self.settings.workdir));
        let import_map = match explicit_import_map {
            Some(path) => {
                if !self.fs.exists(&path) {
                    return Err(DeployError::ImportMapNotFound {
                        source: std::io::Error::from(std::io::ErrorKind::NotFound),
                        path,
                    });
                }
                path
            }
            None => self.settings.fallback_import_map(),
        };

        let verify_jwt = resolve_verify_jwt(spec.verify_jwt, config.verify_jwt(slug.as_str()));

        Ok(FunctionMetadata {
            slug,
            entrypoint_uri: file_uri(&entrypoint),
            import_map_uri: file_uri(&import_map),
            verify_jwt,
        })
    }

    /// Deploy a single function: validate, bundle, probe, then create or update.
    #[instrument(skip_all, fields(slug = %spec.slug, project = %project_ref))]
    pub async fn deploy_one(
        &self,
        bundler: &dyn Bundler,
        project_ref: &str,
        spec: &DeploySpec,
        cancel: &CancellationToken,
    ) -> DeployResult<DeployedFunction> {
        let meta = self.resolve(spec)?;
        debug!(?meta, "resolved function");

        let artifact = bundler
            .bundle(&meta.entrypoint_uri, &meta.import_map_uri, cancel)
            .await?;
        if artifact.is_empty() {
            warn!("bundler produced an empty artifact");
        }
        info!(bytes = artifact.len(), "bundled function");

        let state = probe_function(self.api.as_ref(), project_ref, &meta.slug, cancel).await?;
        let action =
            upsert_function(self.api.as_ref(), project_ref, state, &meta, artifact, cancel).await?;

        Ok(DeployedFunction {
            slug: meta.slug,
            action,
        })
    }

    /// Deploy `slugs` in order with an already prepared bundler.
    ///
    /// The first failure stops the batch and is returned as
    /// [`DeployError::Batch`], naming the failed slug and the functions
    /// deployed before it.
    pub async fn deploy_each(
        &self,
        bundler: &dyn Bundler,
        slugs: &[String],
        project_ref: &str,
        overrides: &BatchOverrides,
        cancel: &CancellationToken,
    ) -> DeployResult<Vec<DeployedFunction>> {
        let mut deployed = Vec::with_capacity(slugs.len());
        for slug in slugs {
            let result = if cancel.is_cancelled() {
                Err(DeployError::Cancelled)
            } else {
                let spec = overrides.spec_for(slug);
                self.deploy_one(bundler, project_ref, &spec, cancel).await
            };
            match result {
                Ok(function) => deployed.push(function),
                Err(source) => {
                    warn!(%slug, deployed = deployed.len(), error = %source, "batch stopped");
                    return Err(DeployError::Batch {
                        slug: slug.clone(),
                        deployed,
                        source: Box::new(source),
                    });
                }
            }
        }
        Ok(deployed)
    }

    /// Install the toolchain once, then deploy every slug in order.
    #[instrument(skip_all, fields(project = %project_ref, count = slugs.len()))]
    pub async fn deploy_all(
        &self,
        installer: &Installer,
        slugs: &[String],
        project_ref: &str,
        overrides: &BatchOverrides,
        cancel: &CancellationToken,
    ) -> DeployResult<Vec<DeployedFunction>> {
        let toolchain = installer.ensure_installed(self.fs.as_ref(), cancel).await?;
        let bundler = DenoBundler::new(toolchain);
        self.deploy_each(&bundler, slugs, project_ref, overrides, cancel)
            .await
    }

    /// Deploy `slugs`, or every function under `supabase/functions` when empty.
    pub async fn run(
        &self,
        installer: &Installer,
        slugs: Vec<String>,
        project_ref: &str,
        overrides: &BatchOverrides,
        cancel: &CancellationToken,
    ) -> DeployResult<Vec<DeployedFunction>> {
        let slugs = if slugs.is_empty() {
            discover_slugs(self.fs.as_ref(), &self.settings.functions_dir())?
        } else {
            slugs
        };
        if slugs.is_empty() {
            return Err(DeployError::NoFunctions);
        }

        self.deploy_all(installer, &slugs, project_ref, overrides, cancel)
            .await
    }
}
