//! Backend session launcher
//!
//! Ties a [`BackendProfile`] to a running backend: spawn (or attach),
//! resolve the template for the workspace, handshake, and tear everything
//! down again in order.

use lsp_types::{Location, Position};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::ToSocketAddrs;
use tracing::{debug, info, warn};

use crate::backend::config::SessionConfig;
use crate::backend::content::{MatchedLines, lines_around};
use crate::backend::error::BackendError;
use crate::backend::profile::BackendProfile;
use crate::io::transport::{StreamTransport, Transport};
use crate::io::{ChildProcessManager, ProcessManager, StopMode};
use crate::lsp::client::LspClient;
use crate::lsp::error::SessionError;
use crate::lsp::session::Session;
use crate::template::{ResolveContext, ResolvedParameters, path_from_uri, resolve};

/// Grace period between SIGTERM and SIGKILL when the backend ignores `exit`
const TERMINATE_GRACE: Duration = Duration::from_secs(2);

/// A negotiated session with a running backend
pub struct BackendSession {
    profile: Arc<BackendProfile>,
    root: PathBuf,
    /// Absent when attached to a backend we did not spawn
    process: Option<ChildProcessManager>,
    client: LspClient,
    initialize_result: Value,
    started_at: Instant,
}

impl BackendSession {
    /// Spawn the profile's backend in `root` and complete the handshake
    ///
    /// If this returns Ok the session is `Ready`. On failure the spawned
    /// process is killed.
    pub async fn start(
        profile: BackendProfile,
        config: SessionConfig,
        root: impl AsRef<Path>,
    ) -> Result<Self, BackendError> {
        let root = workspace_root(root.as_ref())?;
        let params = resolve(profile.template(), &ResolveContext::for_workspace(&root))?;

        info!("Starting {} backend in {}", profile.name(), root.display());
        let mut process = ChildProcessManager::new(
            profile.command().to_string(),
            profile.args().to_vec(),
            Some(root.clone()),
        );
        let backend = profile.name().to_string();
        process.on_stderr_line(move |line| {
            debug!(target: "backend", backend = backend.as_str(), "{}", line);
        });
        process.start().await?;

        let transport = match process.create_stdio_transport() {
            Ok(transport) => transport,
            Err(e) => {
                process.kill_sync();
                return Err(e.into());
            }
        };

        match Self::negotiate(profile, config, root, transport, params).await {
            Ok(mut session) => {
                session.process = Some(process);
                Ok(session)
            }
            Err(e) => {
                warn!("Backend handshake failed, killing process: {}", e);
                process.kill_sync();
                Err(e)
            }
        }
    }

    /// Attach to a backend already listening on a TCP socket
    pub async fn attach<A: ToSocketAddrs>(
        profile: BackendProfile,
        config: SessionConfig,
        root: impl AsRef<Path>,
        addr: A,
    ) -> Result<Self, BackendError> {
        let root = workspace_root(root.as_ref())?;
        let params = resolve(profile.template(), &ResolveContext::for_workspace(&root))?;

        info!("Attaching to {} backend over TCP", profile.name());
        let transport = StreamTransport::connect_tcp(addr).await?;
        Self::negotiate(profile, config, root, transport, params).await
    }

    async fn negotiate<T>(
        profile: BackendProfile,
        config: SessionConfig,
        root: PathBuf,
        transport: T,
        params: ResolvedParameters,
    ) -> Result<Self, BackendError>
    where
        T: Transport + 'static,
    {
        let profile = Arc::new(profile);
        let config = with_profile_requirements(config, &profile);

        let session = Session::new(transport, config);
        let settings = Arc::clone(&profile);
        session.on_request("workspace/configuration", move |params| {
            settings.configuration_reply(params)
        });

        let initialize_result = session.initialize(params).await?;
        if let Some(server) = initialize_result.get("serverInfo") {
            info!("Connected to {}", server);
        }

        Ok(Self {
            profile,
            root,
            process: None,
            client: LspClient::new(session),
            initialize_result,
            started_at: Instant::now(),
        })
    }

    pub fn client(&self) -> &LspClient {
        &self.client
    }

    pub fn session(&self) -> &Session {
        self.client.session()
    }

    pub fn profile(&self) -> &BackendProfile {
        &self.profile
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The backend's full `InitializeResult`
    pub fn initialize_result(&self) -> &Value {
        &self.initialize_result
    }

    /// `serverInfo.name`, when the backend reported one
    pub fn server_name(&self) -> Option<&str> {
        self.initialize_result
            .get("serverInfo")?
            .get("name")?
            .as_str()
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Full text of a workspace file; relative paths are taken from the root
    pub fn file_content(&self, path: impl AsRef<Path>) -> Result<String, BackendError> {
        let path = self.root.join(path);
        std::fs::read_to_string(&path).map_err(|source| BackendError::FileRead { path, source })
    }

    /// A line of a workspace file with up to `before`/`after` neighbours
    pub fn content_around_line(
        &self,
        path: impl AsRef<Path>,
        line: u32,
        before: u32,
        after: u32,
    ) -> Result<MatchedLines, BackendError> {
        let path = path.as_ref();
        let text = self.file_content(path)?;
        lines_around(path, &text, line, before, after).ok_or_else(|| {
            BackendError::LineOutOfRange {
                path: path.to_path_buf(),
                line,
            }
        })
    }

    /// References to the symbol at `position` in a workspace file
    ///
    /// The file is opened for the duration of the request. Locations inside
    /// the profile's ignored directories are dropped.
    pub async fn references(
        &self,
        path: impl AsRef<Path>,
        position: Position,
        include_declaration: bool,
    ) -> Result<Vec<Location>, BackendError> {
        let file = self.root.join(path);
        let uri = self.client.open_file(&file, self.profile.language_id())?;
        let result = self
            .client
            .references(&uri, position, include_declaration)
            .await;
        if let Err(e) = self.client.close_document(&uri) {
            debug!("Could not close {}: {}", uri.as_str(), e);
        }

        let locations = result?
            .into_iter()
            .filter(|location| match self.relative_path(location) {
                Some(relative) if self.profile.is_ignored_path(&relative) => {
                    debug!("Ignoring reference in {}", relative.display());
                    false
                }
                _ => true,
            })
            .collect();
        Ok(locations)
    }

    /// Like [`references`](Self::references), with the source lines around each one
    pub async fn references_with_content(
        &self,
        path: impl AsRef<Path>,
        position: Position,
        before: u32,
        after: u32,
    ) -> Result<Vec<MatchedLines>, BackendError> {
        let locations = self.references(path, position, true).await?;
        locations
            .iter()
            .map(|location| {
                let file = self.relative_path(location).or_else(|| path_from_uri(&location.uri));
                let file = file.ok_or_else(|| {
                    SessionError::InvalidUri(location.uri.as_str().to_string())
                })?;
                self.content_around_line(file, location.range.start.line, before, after)
            })
            .collect()
    }

    /// Path of a location relative to the workspace root, if it lies inside it
    fn relative_path(&self, location: &Location) -> Option<PathBuf> {
        let path = path_from_uri(&location.uri)?;
        path.strip_prefix(&self.root).ok().map(Path::to_path_buf)
    }

    /// Orderly shutdown, then make sure the process is gone
    pub async fn close(mut self) -> Result<(), BackendError> {
        info!("Closing {} session", self.profile.name());

        if let Err(e) = self.client.shutdown().await {
            warn!("LSP shutdown error: {}", e);
        }

        let Some(process) = self.process.as_mut() else {
            return Ok(());
        };

        let shutdown_timeout = self.client.session().config().shutdown_timeout;
        if process.is_running() && !process.wait_for_exit(shutdown_timeout).await {
            debug!("Backend still running after exit, terminating");
            if let Err(e) = process.stop(StopMode::Graceful).await {
                // Exited between the check and the signal
                debug!("Terminate skipped: {}", e);
            } else if !process.wait_for_exit(TERMINATE_GRACE).await {
                warn!("Backend ignored SIGTERM, killing");
                process.kill_sync();
            }
        }

        info!("{} session closed", self.profile.name());
        Ok(())
    }
}

impl Drop for BackendSession {
    fn drop(&mut self) {
        if let Some(process) = self.process.as_mut() {
            process.kill_sync();
        }
    }
}

fn workspace_root(root: &Path) -> Result<PathBuf, BackendError> {
    let invalid = |source| BackendError::InvalidWorkspaceRoot {
        path: root.to_path_buf(),
        source,
    };
    let root = root.canonicalize().map_err(invalid)?;
    if !root.is_dir() {
        return Err(invalid(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "Workspace root is not a directory",
        )));
    }
    Ok(root)
}

/// Merge the profile's required capabilities into the session config
fn with_profile_requirements(mut config: SessionConfig, profile: &BackendProfile) -> SessionConfig {
    for capability in profile.required_capabilities() {
        if !config.required_capabilities.contains(capability) {
            config.required_capabilities.push(capability.clone());
        }
    }
    config
}
