//! CAPABILITY command handler.
//!
//! Advertises a Gmail-like capability list. `STARTTLS` is only offered
//! while the connection is still in plaintext, as RFC 3501 Section
//! 6.2.1 requires.

use crate::fake_imap::io::write_line;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

const CAPABILITIES: &str = "IMAP4rev1 UIDPLUS SPECIAL-USE X-GM-EXT-1";

/// Handle the CAPABILITY command.
pub async fn handle_capability<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    secure: bool,
    stream: &mut BufReader<S>,
) {
    let line = if secure {
        format!("* CAPABILITY {CAPABILITIES}\r\n")
    } else {
        format!("* CAPABILITY {CAPABILITIES} STARTTLS\r\n")
    };
    let _ = write_line(stream, &line).await;
    let resp = format!("{tag} OK Thats all she wrote!\r\n");
    let _ = write_line(stream, &resp).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    async fn run(tag: &str, secure: bool) -> String {
        let (client, server) = tokio::io::duplex(1024);
        let mut stream = BufReader::new(server);

        handle_capability(tag, secure, &mut stream).await;
        drop(stream);

        let mut buf = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut BufReader::new(client), &mut buf)
            .await
            .unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[tokio::test]
    async fn advertises_gmail_extension() {
        let output = run("A1", true).await;
        assert!(output.contains("X-GM-EXT-1"));
        assert!(!output.contains("STARTTLS"));
        assert!(output.contains("A1 OK"));
    }

    #[tokio::test]
    async fn offers_starttls_in_plaintext() {
        let output = run("A2", false).await;
        assert!(output.contains(" STARTTLS\r\n"));
    }
}
