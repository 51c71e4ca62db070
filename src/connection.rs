//! IMAP connection and TLS helpers
//!
//! [`ImapSession`] is the [`MailSession`] used against real servers.
//! It speaks implicit TLS, STARTTLS or plain IMAP depending on the
//! account and talks Gmail's `X-GM-RAW` / `X-GM-LABELS` extensions.

use crate::config::{AccountConfig, Security};
use crate::error::{Error, Result};
use crate::flag::Flag;
use crate::folder::{FolderInfo, NOSELECT};
use crate::session::{
    FolderStatus, MailSession, MessageSummary, RawSearch, Uid, decode_name, encode_name,
    flag_list, label_list, raw_search, uid_set,
};
use async_imap::types::{Fetch, NameAttribute};
use futures::io::{AsyncRead, AsyncWrite};
use futures::{AsyncWriteExt, StreamExt};
use imap_proto::types::{Address, MailboxDatum, Response, Status};
use rustls::pki_types::ServerName;
use std::fmt::Debug;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_util::compat::TokioAsyncReadCompatExt;
use tracing::{debug, info};

/// Transport under an IMAP session, TLS or not.
pub trait ImapStream: AsyncRead + AsyncWrite + Unpin + Send + Debug {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + Debug> ImapStream for T {}

type Session = async_imap::Session<Box<dyn ImapStream>>;

/// Build a TLS connector.
///
/// Certificates are checked against the Mozilla root set unless the
/// account opts out, as local IMAP proxies usually present
/// self-signed certificates.
fn tls_connector(accept_invalid_certs: bool) -> TlsConnector {
    let config = if accept_invalid_certs {
        rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(DangerousVerifier))
            .with_no_client_auth()
    } else {
        let roots = rustls::RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.into(),
        };
        rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth()
    };
    TlsConnector::from(Arc::new(config))
}

async fn tls_handshake(
    config: &AccountConfig,
    tcp_stream: TcpStream,
) -> Result<tokio_rustls::client::TlsStream<TcpStream>> {
    let connector = tls_connector(config.accept_invalid_certs);
    let server_name = ServerName::try_from(config.host.clone())
        .map_err(|e| Error::Tls(format!("Invalid server name: {e}")))?;

    connector
        .connect(server_name, tcp_stream)
        .await
        .map_err(|e| Error::Tls(e.to_string()))
}

/// A logged-in IMAP session.
pub struct ImapSession {
    session: Session,
}

impl ImapSession {
    /// Open a session for `config` and log in.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the TCP connection fails,
    /// [`Error::Tls`] if STARTTLS or the handshake fails and
    /// [`Error::Imap`] if the server rejects the login.
    pub async fn connect(config: &AccountConfig) -> Result<Self> {
        let addr = format!("{}:{}", config.host, config.port());
        debug!("Connecting to IMAP server at {} ({:?})", addr, config.security());

        let tcp_stream = TcpStream::connect(&addr).await?;

        let client = match config.security() {
            Security::Tls => {
                let tls_stream = tls_handshake(config, tcp_stream).await?;
                greeted(Box::new(tls_stream.compat())).await?
            }
            Security::StartTls => {
                let mut client = async_imap::Client::new(tcp_stream.compat());
                client
                    .run_command_and_check_ok("STARTTLS", None)
                    .await
                    .map_err(|e| Error::Tls(format!("STARTTLS failed: {e}")))?;

                let inner = client.into_inner().into_inner();
                let tls_stream = tls_handshake(config, inner).await?;
                let stream: Box<dyn ImapStream> = Box::new(tls_stream.compat());
                async_imap::Client::new(stream)
            }
            Security::Plain => greeted(Box::new(tcp_stream.compat())).await?,
        };

        let session = client
            .login(&config.username, &config.password)
            .await
            .map_err(|(e, _)| Error::Imap(format!("Login failed: {e}")))?;

        info!("Connected to IMAP server as {}", config.username);
        Ok(Self { session })
    }

    async fn store(&mut self, uids: &[Uid], query: &str) -> Result<()> {
        let updates: Vec<_> = self
            .session
            .uid_store(uid_set(uids), query)
            .await
            .map_err(|e| Error::Imap(format!("Store failed: {e}")))?
            .collect()
            .await;

        for update in updates {
            update.map_err(|e| Error::Imap(format!("Store failed: {e}")))?;
        }
        Ok(())
    }

    /// `UID SEARCH CHARSET UTF-8 X-GM-RAW {n}` followed by the query as
    /// a synchronising literal, the same handshake `APPEND` uses.
    async fn search_literal(&mut self, command: &str, data: &str) -> Result<Vec<Uid>> {
        let id = self
            .session
            .run_command(format!("UID SEARCH {command}"))
            .await
            .map_err(search_failed)?;

        loop {
            let Some(response) = self.session.read_response().await? else {
                return Err(search_failed("connection closed"));
            };
            match response.parsed() {
                Response::Continue { .. } => break,
                Response::Done {
                    tag, information, ..
                } if *tag == id => {
                    return Err(search_failed(information.as_deref().unwrap_or("rejected")));
                }
                _ => {}
            }
        }

        let stream = self.session.get_mut();
        stream.write_all(data.as_bytes()).await?;
        stream.write_all(b"\r\n").await?;
        stream.flush().await?;

        let mut uids = Vec::new();
        loop {
            let Some(response) = self.session.read_response().await? else {
                return Err(search_failed("connection closed"));
            };
            match response.parsed() {
                Response::MailboxData(MailboxDatum::Search(found)) => uids.extend(found),
                Response::Done {
                    tag,
                    status,
                    information,
                    ..
                } if *tag == id => {
                    if *status == Status::Ok {
                        return Ok(uids);
                    }
                    return Err(search_failed(information.as_deref().unwrap_or("rejected")));
                }
                _ => {}
            }
        }
    }
}

/// Wrap a fresh stream and consume the server greeting.
async fn greeted(stream: Box<dyn ImapStream>) -> Result<async_imap::Client<Box<dyn ImapStream>>> {
    let mut client = async_imap::Client::new(stream);
    client
        .read_response()
        .await
        .map_err(|e| Error::Imap(format!("Failed to read server greeting: {e}")))?;
    Ok(client)
}

impl MailSession for ImapSession {
    async fn list_folders(&mut self) -> Result<Vec<FolderInfo>> {
        let names: Vec<_> = self
            .session
            .list(Some(""), Some("*"))
            .await
            .map_err(|e| Error::Imap(format!("List folders failed: {e}")))?
            .collect()
            .await;

        let mut folders = Vec::new();
        for item in names {
            let name = item.map_err(|e| Error::Imap(format!("List folders failed: {e}")))?;
            let attributes: Vec<String> = name
                .attributes()
                .iter()
                .filter_map(attribute_name)
                .collect();
            folders.push(FolderInfo {
                attributes,
                delimiter: name.delimiter().map(ToString::to_string),
                name: decode_name(name.name()),
            });
        }

        debug!("Listed {} folders", folders.len());
        Ok(folders)
    }

    async fn select_folder(&mut self, name: &str) -> Result<FolderStatus> {
        let mailbox = self
            .session
            .select(encode_name(name))
            .await
            .map_err(|e| Error::Imap(format!("Failed to select {name}: {e}")))?;
        Ok(FolderStatus {
            exists: mailbox.exists,
        })
    }

    async fn search(&mut self, query: Option<&str>) -> Result<Vec<Uid>> {
        let criteria = match query.map(raw_search) {
            None => "ALL".to_string(),
            Some(RawSearch::Quoted(criteria)) => criteria,
            Some(RawSearch::Literal { command, data }) => {
                let mut uids = self.search_literal(&command, data).await?;
                uids.sort_unstable();
                uids.dedup();
                return Ok(uids);
            }
        };
        let found = self
            .session
            .uid_search(&criteria)
            .await
            .map_err(|e| Error::Imap(format!("Search failed: {e}")))?;

        let mut uids: Vec<Uid> = found.into_iter().collect();
        uids.sort_unstable();
        Ok(uids)
    }

    async fn fetch_summaries(&mut self, uids: &[Uid]) -> Result<Vec<MessageSummary>> {
        if uids.is_empty() {
            return Ok(Vec::new());
        }

        let fetches: Vec<_> = self
            .session
            .uid_fetch(uid_set(uids), "(UID ENVELOPE)")
            .await
            .map_err(|e| Error::Imap(format!("Fetch failed: {e}")))?
            .collect()
            .await;

        let mut summaries = Vec::new();
        for fetch in fetches {
            let fetch = fetch.map_err(|e| Error::Imap(format!("Fetch error: {e}")))?;
            if let Some(summary) = summarize(&fetch) {
                summaries.push(summary);
            }
        }
        summaries.sort_by_key(|s| s.uid);
        Ok(summaries)
    }

    async fn add_flags(&mut self, uids: &[Uid], flags: &[Flag]) -> Result<()> {
        self.store(uids, &format!("+FLAGS.SILENT {}", flag_list(flags)))
            .await
    }

    async fn remove_flags(&mut self, uids: &[Uid], flags: &[Flag]) -> Result<()> {
        self.store(uids, &format!("-FLAGS.SILENT {}", flag_list(flags)))
            .await
    }

    async fn add_labels(&mut self, uids: &[Uid], labels: &[String]) -> Result<()> {
        self.store(uids, &format!("+X-GM-LABELS.SILENT {}", label_list(labels)))
            .await
    }

    async fn remove_labels(&mut self, uids: &[Uid], labels: &[String]) -> Result<()> {
        self.store(uids, &format!("-X-GM-LABELS.SILENT {}", label_list(labels)))
            .await
    }

    async fn delete_messages(&mut self, uids: &[Uid]) -> Result<()> {
        self.add_flags(uids, &[Flag::Deleted]).await
    }

    async fn expunge(&mut self) -> Result<()> {
        let expunged: Vec<_> = self
            .session
            .expunge()
            .await
            .map_err(|e| Error::Imap(format!("Expunge failed: {e}")))?
            .collect()
            .await;

        let count = expunged.into_iter().filter(std::result::Result::is_ok).count();
        debug!("Expunged {} messages", count);
        Ok(())
    }

    async fn logout(&mut self) -> Result<()> {
        self.session
            .logout()
            .await
            .map_err(|e| Error::Imap(format!("Logout failed: {e}")))
    }
}

fn search_failed(reason: impl std::fmt::Display) -> Error {
    Error::Imap(format!("Search failed: {reason}"))
}

/// Attribute as written on the wire, e.g. `\Noselect` or `\All`.
/// `None` for attributes this version of `imap-proto` adds later.
fn attribute_name(attribute: &NameAttribute<'_>) -> Option<String> {
    let name = match attribute {
        NameAttribute::NoSelect => NOSELECT,
        NameAttribute::NoInferiors => "\\Noinferiors",
        NameAttribute::Marked => "\\Marked",
        NameAttribute::Unmarked => "\\Unmarked",
        NameAttribute::All => "\\All",
        NameAttribute::Archive => "\\Archive",
        NameAttribute::Drafts => "\\Drafts",
        NameAttribute::Flagged => "\\Flagged",
        NameAttribute::Junk => "\\Junk",
        NameAttribute::Sent => "\\Sent",
        NameAttribute::Trash => "\\Trash",
        NameAttribute::Extension(s) if s.starts_with('\\') => return Some(s.to_string()),
        NameAttribute::Extension(s) => return Some(format!("\\{s}")),
        _ => return None,
    };
    Some(name.to_string())
}

fn summarize(fetch: &Fetch) -> Option<MessageSummary> {
    let uid = fetch.uid?;
    let Some(envelope) = fetch.envelope() else {
        return Some(MessageSummary {
            uid,
            ..MessageSummary::default()
        });
    };

    Some(MessageSummary {
        uid,
        subject: envelope.subject.as_deref().map(lossy).unwrap_or_default(),
        from: addresses(envelope.from.as_deref()),
        reply_to: addresses(envelope.reply_to.as_deref()),
        to: addresses(envelope.to.as_deref()),
        cc: addresses(envelope.cc.as_deref()),
        message_id: envelope.message_id.as_deref().map(lossy),
    })
}

fn addresses(list: Option<&[Address<'_>]>) -> Vec<String> {
    list.map(|addrs| {
        addrs
            .iter()
            .map(|a| format_address(a.name.as_deref(), a.mailbox.as_deref(), a.host.as_deref()))
            .collect()
    })
    .unwrap_or_default()
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).to_string()
}

fn format_address(name: Option<&[u8]>, mailbox: Option<&[u8]>, host: Option<&[u8]>) -> String {
    let mailbox = mailbox.map(lossy).unwrap_or_default();
    let address = match host.map(lossy) {
        Some(host) if !host.is_empty() => format!("{mailbox}@{host}"),
        _ => mailbox,
    };

    match name {
        Some(name) => format!("{} <{address}>", lossy(name)),
        None => address,
    }
}

/// Certificate verifier that accepts all certificates
/// (for local proxies with self-signed certs).
#[derive(Debug)]
struct DangerousVerifier;

impl rustls::client::danger::ServerCertVerifier for DangerousVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}
