//! Gmail filter rule engine
//!
//! Converts Gmail's filter export (Atom XML) to and from a flat TOML
//! rule list, compiles rules into Gmail search queries plus typed
//! actions, and applies them to an account over IMAP using Gmail's
//! `X-GM-RAW` search and `X-GM-LABELS` extensions.
//!
//! ```no_run
//! use gmailfilters::{
//!     CompileOptions, Config, ExecutionOptions, FilterClient, FolderPattern, RuleFile, compile,
//! };
//!
//! # async fn run() -> gmailfilters::Result<()> {
//! let config = Config::load(None)?;
//! let client = FilterClient::new(config.account("default")?.clone());
//!
//! let rules = RuleFile::load("filters.toml".as_ref())?;
//! let compiled = compile(&rules.filters, &CompileOptions::default());
//! let patterns = FolderPattern::parse_all::<&str>(&[]);
//!
//! let report = client
//!     .apply_filters(&compiled, &patterns, ExecutionOptions::default())
//!     .await?;
//! println!("{} messages matched", report.matched());
//! # Ok(())
//! # }
//! ```

mod action;
mod client;
mod config;
mod connection;
mod error;
mod executor;
mod flag;
mod folder;
mod rule;
mod session;
mod transcode;

pub use action::{Action, BulkJob, Change, INBOX_LABEL};
pub use client::{FilterClient, run};
pub use config::{AccountConfig, Config, DEFAULT_ACCOUNT, DEFAULT_CHUNK_SIZE, Security};
pub use connection::ImapSession;
pub use error::{Error, Result};
pub use executor::{
    ActionReport, ChunkReport, ExecutionOptions, ExecutionReport, Executor, FolderReport,
    FolderState, Outcome, Query, QueryReport, QueryState,
};
pub use flag::Flag;
pub use folder::{DEFAULT_PATTERN, FolderInfo, FolderPattern, resolve};
pub use rule::{CompileOptions, FlatRule, PropValue, Rule, RuleFile, compile};
pub use session::{FolderStatus, MailSession, MessageSummary, Uid};
pub use transcode::{Collapse, ExportDocument, FilterEntry, same_condition, to_export, to_flat};
