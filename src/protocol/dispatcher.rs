use crate::core::packet::Command;
use crate::error::{ProtocolError, Result};
use crate::protocol::message::Visibility;
use crate::transport::peer::InboundMessage;
use crate::transport::tcp::TcpTransport;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

type HandlerFn = dyn Fn(&InboundMessage) -> Result<Option<Vec<u8>>> + Send + Sync + 'static;

/// Routes inbound messages to one handler per command.
///
/// A handler returns the reply payload to send back, if any. [`dispatch`]
/// only hands that payload to the caller; [`route`] also sends it to the
/// peer the message came from.
///
/// [`dispatch`]: Dispatcher::dispatch
/// [`route`]: Dispatcher::route
pub struct Dispatcher {
    handlers: Arc<RwLock<HashMap<Command, Box<HandlerFn>>>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register `handler` for `command`, replacing any previous one.
    pub fn register<F>(&self, command: Command, handler: F) -> Result<()>
    where
        F: Fn(&InboundMessage) -> Result<Option<Vec<u8>>> + Send + Sync + 'static,
    {
        let mut handlers = self
            .handlers
            .write()
            .map_err(|_| ProtocolError::LockPoisoned)?;

        handlers.insert(command, Box::new(handler));
        Ok(())
    }

    pub fn is_registered(&self, command: Command) -> bool {
        self.handlers
            .read()
            .map(|handlers| handlers.contains_key(&command))
            .unwrap_or(false)
    }

    pub fn dispatch(&self, msg: &InboundMessage) -> Result<Option<Vec<u8>>> {
        let handlers = self
            .handlers
            .read()
            .map_err(|_| ProtocolError::LockPoisoned)?;

        handlers
            .get(&msg.command)
            .ok_or_else(|| {
                ProtocolError::UnexpectedMessage(format!("no handler for {}", msg.command))
            })
            .and_then(|handler| handler(msg))
    }

    /// Dispatch `msg` and send any reply back over `transport`.
    ///
    /// Message replies keep the visibility of the request. Returns whether a
    /// reply was queued.
    pub async fn route(&self, transport: &TcpTransport, msg: &InboundMessage) -> Result<bool> {
        let Some(reply) = self.dispatch(msg)? else {
            return Ok(false);
        };
        let peer = transport
            .peer(&msg.peer)?
            .ok_or(ProtocolError::ConnectionClosed)?;

        match (msg.command, msg.visibility) {
            (Command::MessageSend, Visibility::Private) => peer.send_private(&reply).await?,
            (Command::MessageSend, Visibility::Public) => peer.send_public(&reply).await?,
            (command, _) => peer.send(command, &reply).await?,
        }
        Ok(true)
    }
}

impl Clone for Dispatcher {
    fn clone(&self) -> Self {
        Self {
            handlers: Arc::clone(&self.handlers),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn message(command: Command, payload: &[u8]) -> InboundMessage {
        InboundMessage {
            peer: "127.0.0.1:7000".parse().unwrap(),
            sender: "addr".into(),
            command,
            visibility: Visibility::Public,
            payload: payload.to_vec(),
            authenticated: false,
        }
    }

    #[test]
    fn test_routes_by_command() {
        let dispatcher = Dispatcher::new();
        dispatcher
            .register(Command::MessageSend, |msg| Ok(Some(msg.payload.to_ascii_uppercase())))
            .unwrap();
        dispatcher.register(Command::PeerInfo, |_| Ok(None)).unwrap();

        assert_eq!(
            dispatcher.dispatch(&message(Command::MessageSend, b"ping")).unwrap(),
            Some(b"PING".to_vec())
        );
        assert_eq!(dispatcher.dispatch(&message(Command::PeerInfo, b"x")).unwrap(), None);
    }

    #[test]
    fn test_unregistered_command() {
        let dispatcher = Dispatcher::new();
        assert!(!dispatcher.is_registered(Command::Stream));
        assert!(matches!(
            dispatcher.dispatch(&message(Command::Stream, b"")),
            Err(ProtocolError::UnexpectedMessage(_))
        ));
    }

    #[test]
    fn test_clones_share_handlers() {
        let dispatcher = Dispatcher::new();
        let other = dispatcher.clone();
        other.register(Command::PeerInfo, |_| Ok(None)).unwrap();
        assert!(dispatcher.is_registered(Command::PeerInfo));
    }
}
