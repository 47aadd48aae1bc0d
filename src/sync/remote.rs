use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use super::config::ConfigRewrite;
use super::{Result, SyncError};
use crate::builds::BuildStore;
use crate::transfer::{RequestBody, TransferClient, TransferError, TransferRequest, endpoints};
use crate::types::{ProjectName, ProjectRef};

/// Brings a remote project in line with its local definition.
///
/// Borrowed per publish; holds no state between builds.
pub struct RemoteSync<'a> {
    client: &'a TransferClient,
    store: &'a dyn BuildStore,
    rewrite: ConfigRewrite,
    cancel: &'a CancellationToken,
}

impl<'a> RemoteSync<'a> {
    pub fn new(
        client: &'a TransferClient,
        store: &'a dyn BuildStore,
        rewrite: ConfigRewrite,
        cancel: &'a CancellationToken,
    ) -> Self {
        RemoteSync {
            client,
            store,
            rewrite,
            cancel,
        }
    }

    /// Synchronizes the remote definition of `project`.
    ///
    /// A child project is never created or updated here. Only its parent's
    /// existence is verified, since the parent's own publish owns creation and
    /// sibling builds must not race to create it.
    #[instrument(skip_all, fields(project = %project.name))]
    pub async fn synchronize(&self, project: &ProjectRef) -> Result<()> {
        self.ensure_reachable().await?;

        if let Some(parent) = project.parent() {
            if !self.project_exists(&parent).await? {
                return Err(SyncError::ParentMissing {
                    project: project.name.clone(),
                    parent,
                });
            }
            debug!(%parent, "Parent project exists on remote");
            return Ok(());
        }

        self.create_or_update(project).await?;
        self.synchronize_items(project).await
    }

    /// Returns whether `project` exists on the remote.
    ///
    /// Statuses below 300 mean yes, 400 and 404 mean no. Anything else is an
    /// ambiguous answer and fails.
    pub async fn project_exists(&self, project: &ProjectName) -> Result<bool> {
        let url = endpoints::project(self.client.base(), project)?;
        let response = self.client.probe(url, self.cancel).await?;
        match response.status {
            s if s < 300 => Ok(true),
            400 | 404 => Ok(false),
            _ => Err(TransferError::ServerStatus(Box::new(response.into_exchange())).into()),
        }
    }

    async fn ensure_reachable(&self) -> Result<()> {
        self.client
            .execute(TransferRequest::get(self.client.base().clone()), self.cancel)
            .await?;
        Ok(())
    }

    async fn create_or_update(&self, project: &ProjectRef) -> Result<()> {
        let body = RequestBody::json(self.remote_config(&project.name)?);

        let request = if self.project_exists(&project.name).await? {
            info!(project = %project.name, "Updating remote project configuration");
            TransferRequest::post(
                endpoints::config_accept(self.client.base(), &project.name)?,
                body,
            )
        } else {
            info!(project = %project.name, "Creating remote project");
            TransferRequest::post(
                endpoints::create_item(self.client.base(), &project.name)?,
                body,
            )
        };

        self.client.execute(request, self.cancel).await?;
        Ok(())
    }

    /// Synchronizes every sub-item of `project`, parents before children.
    ///
    /// Recurses into any project that has items, whatever its kind.
    async fn synchronize_items(&self, project: &ProjectRef) -> Result<()> {
        let mut pending = vec![project.clone()];

        while let Some(current) = pending.pop() {
            for item in &current.items {
                let child = current.name.child(item);
                debug!(project = %current.name, %item, "Synchronizing child project");

                let url = endpoints::module_accept(self.client.base(), &current.name, item)?;
                let body = RequestBody::json(self.remote_config(&child)?);
                self.client
                    .execute(TransferRequest::post(url, body), self.cancel)
                    .await?;

                if let Some(child) = self.store.project(&child)?
                    && child.has_items()
                {
                    pending.push(child);
                }
            }
        }

        Ok(())
    }

    fn remote_config(&self, project: &ProjectName) -> Result<Vec<u8>> {
        let config = self.store.project_config(project)?;
        serde_json::to_vec(&self.rewrite.apply(&config)).map_err(|e| SyncError::Encode {
            project: project.clone(),
            source: e,
        })
    }
}
