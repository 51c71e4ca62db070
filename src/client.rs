//! Gmail filter client

use crate::action::BulkJob;
use crate::config::AccountConfig;
use crate::connection::ImapSession;
use crate::error::{Error, Result};
use crate::executor::{ExecutionOptions, ExecutionReport, Executor, Query};
use crate::folder::{FolderInfo, FolderPattern, resolve};
use crate::rule::Rule;
use crate::session::MailSession;
use tracing::{info, warn};

/// Applies filter rules and bulk jobs to a Gmail account over IMAP
pub struct FilterClient {
    config: AccountConfig,
}

impl FilterClient {
    #[must_use]
    pub const fn new(config: AccountConfig) -> Self {
        Self { config }
    }

    /// List all folders with their attributes
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or LIST command fails.
    pub async fn list_folders(&self) -> Result<Vec<FolderInfo>> {
        let mut session = ImapSession::connect(&self.config).await?;
        let folders = session.list_folders().await;
        session.logout().await.ok();
        folders
    }

    /// Run compiled rules over every folder matching `patterns`
    ///
    /// # Errors
    ///
    /// Returns an error if the options are invalid, the connection or
    /// LIST fails, no folder matches, or a search comes back empty under
    /// `fail_if_empty`.
    pub async fn apply_filters(
        &self,
        rules: &[Rule],
        patterns: &[FolderPattern],
        options: ExecutionOptions,
    ) -> Result<ExecutionReport> {
        let queries: Vec<Query> = rules.iter().cloned().map(Query::from).collect();
        info!("Applying {} rules", queries.len());
        self.execute(&queries, patterns, options).await
    }

    /// Run a single free-form job over every folder matching `patterns`
    ///
    /// # Errors
    ///
    /// See [`FilterClient::apply_filters`].
    pub async fn bulk(
        &self,
        job: &BulkJob,
        patterns: &[FolderPattern],
        options: ExecutionOptions,
    ) -> Result<ExecutionReport> {
        if job.actions().is_empty() {
            warn!("Bulk job has no actions, only counting matches");
        }
        self.execute(&[Query::from(job)], patterns, options).await
    }

    async fn execute(
        &self,
        queries: &[Query],
        patterns: &[FolderPattern],
        options: ExecutionOptions,
    ) -> Result<ExecutionReport> {
        options.validate()?;

        let mut session = ImapSession::connect(&self.config).await?;
        let result = run(&mut session, queries, patterns, options).await;
        session.logout().await.ok();
        result
    }
}

/// Resolve folders, check the options against them, then execute.
pub async fn run<S: MailSession>(
    session: &mut S,
    queries: &[Query],
    patterns: &[FolderPattern],
    options: ExecutionOptions,
) -> Result<ExecutionReport> {
    options.validate()?;

    let all_folders = session.list_folders().await?;
    let folders = resolve(&all_folders, patterns);
    if folders.is_empty() {
        return Err(Error::NoMatchingFolders);
    }
    if options.fail_if_empty && folders.len() > 1 {
        return Err(Error::InvalidOptions(format!(
            "--fail-if-empty requires exactly one folder, {} matched",
            folders.len()
        )));
    }
    info!("Processing folders: {}", folders.join(", "));

    Executor::new(session, options).run(&folders, queries).await
}
