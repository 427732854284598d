//! Game session driven by the channel.
//!
//! Interprets the envelopes the game server pushes, keeps the little state a
//! headless player needs, and re-announces the player after a reconnection.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use hatgame_channel::{ChannelClient, Envelope, Inbound, SendError};
use serde::Serialize;
use serde_json::Value;

/// Stage the server reports before the game has been started.
pub const PREGAME_STAGE: &str = "pregame";

/// Outbound side of the channel as seen by the session.
#[cfg_attr(test, mockall::automock)]
pub trait Outbox: Send + Sync {
    /// Send a `{type, data}` envelope. `Value::Null` data is omitted.
    fn send_message(&self, kind: &str, data: Value) -> Result<(), SendError>;

    /// Send a JSON value as-is.
    fn send_raw(&self, value: Value) -> Result<(), SendError>;
}

impl Outbox for ChannelClient {
    fn send_message(&self, kind: &str, data: Value) -> Result<(), SendError> {
        ChannelClient::send_message(self, kind, data)
    }

    fn send_raw(&self, value: Value) -> Result<(), SendError> {
        self.send(value)
    }
}

/// Who this player is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub code: String,
    pub name: String,
}

/// What the session has learned from the server so far.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Progress {
    pub joined: bool,
    /// Waiting for the first state after a join or start
    pub loading: bool,
    pub stage: Option<String>,
    /// Name to describe while giving clues
    pub current_name: Option<String>,
    pub steal_check: bool,
    pub start_turn_ready: bool,
    pub notification: Option<Value>,
    pub last_error: Option<Value>,
    /// Latest full game state
    pub game: Option<Value>,
}

impl Progress {
    pub fn game_started(&self) -> bool {
        self.stage.as_deref().is_some_and(|stage| stage != PREGAME_STAGE)
    }
}

/// A line typed by the user.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// `<type> [data]`; data is JSON when it parses, a plain string otherwise
    Message { kind: String, data: Value },
    /// A line starting with `{`, sent verbatim as JSON
    Raw(Value),
}

/// Parse one input line. Blank lines yield `None`.
pub fn parse_command(line: &str) -> Option<Result<Command, serde_json::Error>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    if line.starts_with('{') {
        return Some(serde_json::from_str(line).map(Command::Raw));
    }

    let (kind, rest) = match line.split_once(char::is_whitespace) {
        Some((kind, rest)) => (kind, rest.trim()),
        None => (line, ""),
    };
    let data = if rest.is_empty() {
        Value::Null
    } else {
        serde_json::from_str(rest).unwrap_or_else(|_| Value::String(rest.to_string()))
    };
    Some(Ok(Command::Message {
        kind: kind.to_string(),
        data,
    }))
}

pub struct GameSession {
    outbox: Arc<dyn Outbox>,
    identity: Identity,
    progress: Mutex<Progress>,
}

impl GameSession {
    pub fn new(outbox: Arc<dyn Outbox>, identity: Identity) -> Self {
        Self {
            outbox,
            identity,
            progress: Mutex::new(Progress::default()),
        }
    }

    fn progress_mut(&self) -> MutexGuard<'_, Progress> {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn progress(&self) -> Progress {
        self.progress_mut().clone()
    }

    /// Ask the server to add this player to the game.
    pub fn join(&self) -> Result<(), SendError> {
        let data = serde_json::to_value(&self.identity)?;
        self.outbox.send_message("join", data)?;

        let mut progress = self.progress_mut();
        progress.joined = true;
        progress.loading = true;
        Ok(())
    }

    /// Hook for the channel's reconnection event.
    ///
    /// The server forgets the socket once it drops, so a player that is part
    /// of a running game has to join again.
    pub fn on_reconnect(&self) {
        let rejoin = {
            let progress = self.progress_mut();
            progress.joined && progress.game_started()
        };
        if !rejoin {
            tracing::debug!("Reconnected before the game started, nothing to restore");
            return;
        }

        tracing::info!(code = %self.identity.code, "Reconnected, joining again");
        if let Err(e) = self.join() {
            tracing::error!(error = %e, "Failed to re-send join");
        }
    }

    /// Handle one inbound frame.
    pub fn handle(&self, inbound: Inbound) {
        match inbound {
            Inbound::Envelope(envelope) => self.handle_envelope(envelope),
            Inbound::Text(text) => tracing::debug!(text = %text, "Ignoring non-envelope text"),
            Inbound::Binary(bytes) => {
                tracing::debug!(len = bytes.len(), "Ignoring binary frame")
            }
        }
    }

    fn handle_envelope(&self, envelope: Envelope) {
        let Envelope { kind, data } = envelope;
        match kind.as_str() {
            "ping" => {
                if let Err(e) = self.outbox.send_message("pong", Value::Null) {
                    tracing::error!(error = %e, "Failed to answer ping");
                }
            }
            "state" => self.apply_state(data),
            "error" => {
                tracing::warn!(error = %data, "Server reported an error");
                self.progress_mut().last_error = Some(data);
            }
            "name" => {
                tracing::info!(name = %data, "New name to describe");
                self.progress_mut().current_name = data.as_str().map(str::to_string);
            }
            "stealcheck" => {
                tracing::info!("Steal attempt needs confirmation");
                self.progress_mut().steal_check = true;
            }
            "startcheck" => {
                tracing::info!(notification = %data, "Ready to start turn");
                let mut progress = self.progress_mut();
                progress.start_turn_ready = true;
                progress.notification = Some(data);
            }
            "notification" => {
                tracing::info!(notification = %data, "Notification");
                self.progress_mut().notification = Some(data);
            }
            "playsound" => tracing::debug!(sound = %data, "Sound cue"),
            _ => tracing::debug!(kind = %kind, "Unhandled message type"),
        }
    }

    fn apply_state(&self, game: Value) {
        let stage = game
            .get("stage")
            .and_then(Value::as_str)
            .map(str::to_string);

        let mut progress = self.progress_mut();
        progress.loading = false;
        if progress.stage.is_some() && progress.stage != stage {
            tracing::info!(
                from = progress.stage.as_deref().unwrap_or_default(),
                to = stage.as_deref().unwrap_or_default(),
                "Stage changed"
            );
            progress.current_name = None;
        }
        progress.stage = stage;
        progress.game = Some(game);
    }

    /// Send a user command.
    pub fn submit(&self, command: Command) -> Result<(), SendError> {
        match command {
            Command::Raw(value) => self.outbox.send_raw(value),
            Command::Message { kind, data } => {
                match kind.as_str() {
                    "join" => return self.join(),
                    "start" => self.progress_mut().loading = true,
                    "startturn" => self.progress_mut().start_turn_ready = false,
                    "stealyes" | "stealno" => {
                        let mut progress = self.progress_mut();
                        progress.steal_check = false;
                        progress.current_name = None;
                    }
                    _ => {}
                }
                self.outbox.send_message(&kind, data)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use hatgame_channel::testing::ScriptedTransport;
    use hatgame_channel::{ChannelConfig, Frame, RetryConfig};
    use mockall::predicate::eq;
    use serde_json::json;

    use super::*;

    fn identity() -> Identity {
        Identity {
            code: "ABCD".to_string(),
            name: "Tim".to_string(),
        }
    }

    fn envelope(kind: &str, data: Value) -> Inbound {
        Inbound::Envelope(Envelope {
            kind: kind.to_string(),
            data,
        })
    }

    #[test]
    fn test_parse_command_variants() {
        assert!(parse_command("   ").is_none());
        assert_eq!(
            parse_command("start").unwrap().unwrap(),
            Command::Message {
                kind: "start".to_string(),
                data: Value::Null
            }
        );
        assert_eq!(
            parse_command("addname Abraham Lincoln").unwrap().unwrap(),
            Command::Message {
                kind: "addname".to_string(),
                data: json!("Abraham Lincoln")
            }
        );
        assert_eq!(
            parse_command("namesperplayer 5").unwrap().unwrap(),
            Command::Message {
                kind: "namesperplayer".to_string(),
                data: json!(5)
            }
        );
        assert_eq!(
            parse_command(r#"{"type":"reset"}"#).unwrap().unwrap(),
            Command::Raw(json!({"type": "reset"}))
        );
        assert!(parse_command("{not json").unwrap().is_err());
    }

    #[test]
    fn test_ping_is_answered_with_pong() {
        let mut outbox = MockOutbox::new();
        outbox
            .expect_send_message()
            .withf(|kind, data| kind == "pong" && data.is_null())
            .times(1)
            .returning(|_, _| Ok(()));

        let session = GameSession::new(Arc::new(outbox), identity());
        session.handle(envelope("ping", Value::Null));
    }

    #[test]
    fn test_join_sends_code_and_name() {
        let mut outbox = MockOutbox::new();
        outbox
            .expect_send_message()
            .with(eq("join"), eq(json!({"code": "ABCD", "name": "Tim"})))
            .times(1)
            .returning(|_, _| Ok(()));

        let session = GameSession::new(Arc::new(outbox), identity());
        session.join().unwrap();

        let progress = session.progress();
        assert!(progress.joined);
        assert!(progress.loading);
    }

    #[test]
    fn test_state_updates_stage_and_clears_name_on_change() {
        let session = GameSession::new(Arc::new(MockOutbox::new()), identity());

        session.handle(envelope("state", json!({"stage": "pregame"})));
        session.handle(envelope("name", json!("Napoleon")));
        assert_eq!(
            session.progress().current_name.as_deref(),
            Some("Napoleon")
        );

        session.handle(envelope("state", json!({"stage": "setup"})));
        let progress = session.progress();
        assert_eq!(progress.stage.as_deref(), Some("setup"));
        assert!(progress.current_name.is_none());
        assert!(!progress.loading);
        assert!(progress.game_started());
    }

    #[test]
    fn test_reconnect_rejoins_only_a_started_game() {
        let mut outbox = MockOutbox::new();
        outbox
            .expect_send_message()
            .withf(|kind, _| kind == "join")
            .times(2)
            .returning(|_, _| Ok(()));

        let session = GameSession::new(Arc::new(outbox), identity());
        session.join().unwrap();

        // Still in the lobby: nothing to restore
        session.handle(envelope("state", json!({"stage": "pregame"})));
        session.on_reconnect();

        session.handle(envelope("state", json!({"stage": "playing"})));
        session.on_reconnect();
    }

    #[test]
    fn test_reconnect_without_join_sends_nothing() {
        let session = GameSession::new(Arc::new(MockOutbox::new()), identity());
        session.handle(envelope("state", json!({"stage": "playing"})));
        session.on_reconnect();
    }

    #[test]
    fn test_startcheck_sets_ready_and_notification() {
        let mut outbox = MockOutbox::new();
        outbox
            .expect_send_message()
            .withf(|kind, data| kind == "startturn" && data.is_null())
            .times(1)
            .returning(|_, _| Ok(()));
        let session = GameSession::new(Arc::new(outbox), identity());

        session.handle(envelope("startcheck", json!("Your turn")));
        let progress = session.progress();
        assert!(progress.start_turn_ready);
        assert_eq!(progress.notification, Some(json!("Your turn")));

        session
            .submit(parse_command("startturn").unwrap().unwrap())
            .unwrap();
        assert!(!session.progress().start_turn_ready);
    }

    #[test]
    fn test_steal_answer_clears_check() {
        let mut outbox = MockOutbox::new();
        outbox
            .expect_send_message()
            .withf(|kind, _| kind == "stealno")
            .times(1)
            .returning(|_, _| Ok(()));
        let session = GameSession::new(Arc::new(outbox), identity());

        session.handle(envelope("stealcheck", Value::Null));
        assert!(session.progress().steal_check);

        session
            .submit(parse_command("stealno").unwrap().unwrap())
            .unwrap();
        assert!(!session.progress().steal_check);
    }

    #[test]
    fn test_raw_command_bypasses_envelope() {
        let mut outbox = MockOutbox::new();
        outbox
            .expect_send_raw()
            .with(eq(json!({"type": "reset"})))
            .times(1)
            .returning(|_| Ok(()));
        let session = GameSession::new(Arc::new(outbox), identity());

        session
            .submit(Command::Raw(json!({"type": "reset"})))
            .unwrap();
    }

    #[test]
    fn test_error_and_unknown_messages_are_recorded_or_ignored() {
        let session = GameSession::new(Arc::new(MockOutbox::new()), identity());
        session.handle(envelope("error", json!("Game not found")));
        session.handle(envelope("confetti", json!({})));
        session.handle(Inbound::Text("hello".to_string()));

        assert_eq!(session.progress().last_error, Some(json!("Game not found")));
    }

    #[tokio::test]
    async fn test_session_over_channel_rejoins_after_drop() {
        let transport = Arc::new(ScriptedTransport::new());
        let endpoint = hatgame_channel::endpoint_from_origin("http://localhost:8080", "/game")
            .unwrap();
        let config = ChannelConfig::new(endpoint)
            .with_retry(RetryConfig::fixed(Duration::from_millis(20)))
            .with_send_poll_interval(Duration::from_millis(10));
        let client = ChannelClient::with_transport(config, transport.clone());

        let session = Arc::new(GameSession::new(Arc::new(client.clone()), identity()));
        let handler = session.clone();
        client.set_on_message(move |msg| handler.handle(msg)).await;
        let hook = session.clone();
        client.set_on_reconnect(move || hook.on_reconnect()).await;

        client.connect().await.unwrap();
        let mut peer = transport.next_peer().await;
        session.join().unwrap();
        let join = peer.expect_frame(Duration::from_secs(1)).await;
        assert_eq!(
            join,
            Frame::Text(r#"{"type":"join","data":{"code":"ABCD","name":"Tim"}}"#.to_string())
        );

        peer.send_text(r#"{"type":"state","data":{"stage":"playing"}}"#);
        peer.send_text(r#"{"type":"ping"}"#);
        assert_eq!(
            peer.expect_frame(Duration::from_secs(1)).await,
            Frame::Text(r#"{"type":"pong"}"#.to_string())
        );

        peer.drop_connection();
        let mut peer = transport.next_peer().await;
        let rejoin = peer.expect_frame(Duration::from_secs(1)).await;
        assert_eq!(rejoin, join);

        client.close(1000, "bye");
    }
}
