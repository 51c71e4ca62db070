//! Batch execution of queries against folders
//!
//! For every folder the executor selects it, runs each query's search,
//! splits the matches into chunks and applies the query's actions to
//! every chunk in order. Failures are recorded in the report and never
//! stop the remaining chunks, queries or folders. The one fatal case is
//! an empty search under [`ExecutionOptions::fail_if_empty`].

use crate::action::{Action, BulkJob, INBOX_LABEL};
use crate::config::DEFAULT_CHUNK_SIZE;
use crate::error::{Error, Result};
use crate::flag::Flag;
use crate::rule::Rule;
use crate::session::{MailSession, MessageSummary, Uid};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Run-time switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionOptions {
    /// Maximum UIDs per request.
    pub chunk_size: usize,
    /// Treat a search without matches as fatal.
    pub fail_if_empty: bool,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            fail_if_empty: false,
        }
    }
}

impl ExecutionOptions {
    /// Check what can be checked without a server.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOptions`] for a zero chunk size.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::InvalidOptions("chunk size must be at least 1".into()));
        }
        Ok(())
    }
}

/// What to search for and what to do with the matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    /// A compiled filter rule, searched with its Gmail query.
    Rule(Rule),
    /// A free-form job; no query means every message.
    Bulk {
        query: Option<String>,
        actions: Vec<Action>,
    },
}

enum Search<'a> {
    All,
    Raw(&'a str),
    /// Nothing to search for.
    Nothing,
}

impl Query {
    /// How this query is searched. Gmail treats an empty `X-GM-RAW` as
    /// "match everything". A rule whose compiled query is blank is
    /// therefore deliberately never sent, unlike a plain filter run that
    /// passes the empty query through, and ends up `Skipped`. Bulk jobs
    /// without a query still search `ALL`.
    fn search(&self) -> Search<'_> {
        match self {
            Self::Rule(rule) if rule.query.trim().is_empty() => Search::Nothing,
            Self::Rule(rule) => Search::Raw(&rule.query),
            Self::Bulk { query: None, .. } => Search::All,
            Self::Bulk {
                query: Some(q), ..
            } => Search::Raw(q),
        }
    }

    #[must_use]
    pub fn actions(&self) -> &[Action] {
        match self {
            Self::Rule(rule) => &rule.actions,
            Self::Bulk { actions, .. } => actions,
        }
    }

    /// The query as shown in logs and reports.
    #[must_use]
    pub fn describe(&self) -> String {
        match self.search() {
            Search::All => "ALL".to_string(),
            Search::Raw(q) => q.to_string(),
            Search::Nothing => String::new(),
        }
    }
}

impl From<Rule> for Query {
    fn from(rule: Rule) -> Self {
        Self::Rule(rule)
    }
}

impl From<&BulkJob> for Query {
    fn from(job: &BulkJob) -> Self {
        Self::Bulk {
            query: job.query.clone(),
            actions: job.actions(),
        }
    }
}

/// Result of one action on one chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Applied,
    Failed(String),
    Skipped(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionReport {
    pub action: Action,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkReport {
    pub uids: Vec<Uid>,
    pub actions: Vec<ActionReport>,
    /// Envelopes fetched by [`Action::Show`].
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<MessageSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryState {
    /// The search matched nothing.
    Empty,
    /// Matches were processed; see the chunk outcomes.
    Processed,
    SearchFailed(String),
    /// Not searched at all.
    Skipped(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryReport {
    pub query: String,
    pub matched: usize,
    pub state: QueryState,
    pub chunks: Vec<ChunkReport>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FolderState {
    Selected { exists: u32 },
    SelectFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FolderReport {
    pub folder: String,
    pub state: FolderState,
    pub queries: Vec<QueryReport>,
}

/// Everything a run did, folder by folder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionReport {
    pub folders: Vec<FolderReport>,
}

impl ExecutionReport {
    /// Messages matched over all folders and queries.
    #[must_use]
    pub fn matched(&self) -> usize {
        self.queries().map(|q| q.matched).sum()
    }

    /// Number of failed selects, searches and actions.
    #[must_use]
    pub fn failures(&self) -> usize {
        let selects = self
            .folders
            .iter()
            .filter(|f| matches!(f.state, FolderState::SelectFailed(_)))
            .count();
        let searches = self
            .queries()
            .filter(|q| matches!(q.state, QueryState::SearchFailed(_)))
            .count();
        let actions = self
            .queries()
            .flat_map(|q| &q.chunks)
            .flat_map(|c| &c.actions)
            .filter(|a| matches!(a.outcome, Outcome::Failed(_)))
            .count();
        selects + searches + actions
    }

    fn queries(&self) -> impl Iterator<Item = &QueryReport> {
        self.folders.iter().flat_map(|f| &f.queries)
    }
}

/// Drives a [`MailSession`] through a list of folders and queries.
pub struct Executor<'a, S: MailSession> {
    session: &'a mut S,
    options: ExecutionOptions,
}

impl<'a, S: MailSession> Executor<'a, S> {
    pub const fn new(session: &'a mut S, options: ExecutionOptions) -> Self {
        Self { session, options }
    }

    /// Run every query in every folder, in order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOptions`] for invalid options and
    /// [`Error::NoMatchingMessages`] when a search is empty under
    /// `fail_if_empty`. Everything else is recorded in the report.
    pub async fn run(&mut self, folders: &[String], queries: &[Query]) -> Result<ExecutionReport> {
        self.options.validate()?;

        let mut report = ExecutionReport::default();
        for folder in folders {
            report.folders.push(self.run_folder(folder, queries).await?);
        }
        Ok(report)
    }

    /// Run every query in one folder.
    ///
    /// # Errors
    ///
    /// See [`Executor::run`].
    pub async fn run_folder(&mut self, folder: &str, queries: &[Query]) -> Result<FolderReport> {
        self.options.validate()?;

        let status = match self.session.select_folder(folder).await {
            Ok(status) => status,
            Err(e) => {
                warn!("Unable to select {}: {}", folder, e);
                return Ok(FolderReport {
                    folder: folder.to_string(),
                    state: FolderState::SelectFailed(e.to_string()),
                    queries: Vec::new(),
                });
            }
        };
        info!("Processing {} ({} messages)", folder, status.exists);

        let mut reports = Vec::with_capacity(queries.len());
        for query in queries {
            reports.push(self.run_query(folder, query).await?);
        }

        Ok(FolderReport {
            folder: folder.to_string(),
            state: FolderState::Selected {
                exists: status.exists,
            },
            queries: reports,
        })
    }

    async fn run_query(&mut self, folder: &str, query: &Query) -> Result<QueryReport> {
        let description = query.describe();
        let mut report = QueryReport {
            query: description.clone(),
            matched: 0,
            state: QueryState::Processed,
            chunks: Vec::new(),
        };

        let search = match query.search() {
            Search::Nothing => {
                warn!("Skipping rule without search terms: {:?}", query.actions());
                report.state = QueryState::Skipped("no search terms".into());
                return Ok(report);
            }
            Search::All => self.session.search(None).await,
            Search::Raw(q) => self.session.search(Some(q)).await,
        };

        let uids = match search {
            Ok(uids) => uids,
            Err(e) => {
                warn!("Search '{}' failed in {}: {}", description, folder, e);
                report.state = QueryState::SearchFailed(e.to_string());
                return Ok(report);
            }
        };

        if uids.is_empty() {
            if self.options.fail_if_empty {
                return Err(Error::NoMatchingMessages(format!(
                    "No messages in {folder} match '{description}'"
                )));
            }
            info!("No messages in {} match '{}'", folder, description);
            report.state = QueryState::Empty;
            return Ok(report);
        }

        info!("{} messages in {} match '{}'", uids.len(), folder, description);
        report.matched = uids.len();

        for chunk in uids.chunks(self.options.chunk_size) {
            report
                .chunks
                .push(self.run_chunk(folder, chunk, query.actions()).await);
        }
        Ok(report)
    }

    async fn run_chunk(&mut self, folder: &str, uids: &[Uid], actions: &[Action]) -> ChunkReport {
        let mut report = ChunkReport {
            uids: uids.to_vec(),
            actions: Vec::with_capacity(actions.len()),
            messages: Vec::new(),
        };

        let (first, last) = match (uids.first(), uids.last()) {
            (Some(first), Some(last)) => (*first, *last),
            _ => return report,
        };

        for action in actions {
            info!("{} messages {}...{} in {}", action, first, last, folder);
            let outcome = match self.apply(action, uids, &mut report.messages).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(
                        "{} failed for messages {}...{} in {}: {}",
                        action.kind(),
                        first,
                        last,
                        folder,
                        e
                    );
                    Outcome::Failed(e.to_string())
                }
            };
            report.actions.push(ActionReport {
                action: action.clone(),
                outcome,
            });
        }
        report
    }

    async fn apply(
        &mut self,
        action: &Action,
        uids: &[Uid],
        messages: &mut Vec<MessageSummary>,
    ) -> Result<Outcome> {
        match action {
            Action::AddLabels(labels) => self.session.add_labels(uids, labels).await?,
            Action::RemoveLabels(labels) => self.session.remove_labels(uids, labels).await?,
            Action::AddFlags(flags) => self.session.add_flags(uids, flags).await?,
            Action::RemoveFlags(flags) => self.session.remove_flags(uids, flags).await?,
            Action::MarkAsRead => self.session.add_flags(uids, &[Flag::Seen]).await?,
            Action::Archive => {
                self.session
                    .remove_labels(uids, &[INBOX_LABEL.to_string()])
                    .await?;
            }
            Action::Show => {
                let summaries = self.session.fetch_summaries(uids).await?;
                debug!("Fetched {} summaries", summaries.len());
                messages.extend(summaries);
            }
            Action::Trash => {
                self.session.delete_messages(uids).await?;
                self.session.expunge().await?;
            }
            Action::Unsupported { key, value } => {
                warn!("Unsupported action {}={}, skipping", key, value);
                return Ok(Outcome::Skipped(format!("unsupported action {key}")));
            }
        }
        Ok(Outcome::Applied)
    }
}
