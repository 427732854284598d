//! Line-oriented command input.

use std::future::Future;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::session::{parse_command, GameSession};

/// Why the input loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEnd {
    Eof,
    Interrupted,
}

/// Submit every line of `input` to the session until it ends or `shutdown`
/// resolves.
///
/// `shutdown` is polled as one future for the whole loop, so a signal that
/// arrives while a line is being handled is not lost.
pub async fn run_input<R, S>(
    session: &GameSession,
    input: R,
    shutdown: S,
) -> std::io::Result<InputEnd>
where
    R: AsyncBufRead + Unpin,
    S: Future,
{
    tokio::pin!(shutdown);
    let mut lines = input.lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    tracing::info!("Input closed");
                    return Ok(InputEnd::Eof);
                };
                match parse_command(&line) {
                    None => {}
                    Some(Ok(command)) => {
                        if let Err(e) = session.submit(command) {
                            tracing::error!(error = %e, "Failed to send command");
                        }
                    }
                    Some(Err(e)) => tracing::warn!(error = %e, "Ignoring malformed JSON line"),
                }
            }
            _ = &mut shutdown => {
                tracing::info!("Interrupted");
                return Ok(InputEnd::Interrupted);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::session::{Identity, MockOutbox};

    fn session(outbox: MockOutbox) -> GameSession {
        GameSession::new(
            Arc::new(outbox),
            Identity {
                code: "ABCD".to_string(),
                name: "Tim".to_string(),
            },
        )
    }

    #[tokio::test]
    async fn test_lines_are_submitted_until_eof() {
        let mut outbox = MockOutbox::new();
        outbox
            .expect_send_message()
            .withf(|kind, data| kind == "addname" && *data == json!("Abraham Lincoln"))
            .times(1)
            .returning(|_, _| Ok(()));
        outbox
            .expect_send_message()
            .withf(|kind, data| kind == "start" && data.is_null())
            .times(1)
            .returning(|_, _| Ok(()));
        let session = session(outbox);

        let input: &[u8] = b"addname Abraham Lincoln\n\n{broken\nstart\n";
        let end = run_input(&session, input, std::future::pending::<()>())
            .await
            .unwrap();

        assert_eq!(end, InputEnd::Eof);
        assert!(session.progress().loading);
    }

    #[tokio::test]
    async fn test_shutdown_stops_loop_while_input_is_open() {
        let session = session(MockOutbox::new());
        let (_writer, reader) = tokio::io::duplex(64);
        let shutdown = tokio::time::sleep(std::time::Duration::from_millis(20));

        let end = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            run_input(&session, tokio::io::BufReader::new(reader), shutdown),
        )
        .await
        .expect("loop stops on shutdown")
        .unwrap();

        assert_eq!(end, InputEnd::Interrupted);
        assert!(!session.progress().joined);
    }
}
