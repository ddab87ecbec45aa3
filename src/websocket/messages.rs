use serde::{Deserialize, Serialize};

use crate::models::{Price, Symbol};

/// Server-to-client socket messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsMessage {
    /// Welcome notification sent on register
    Connected {
        message: String,
        symbols: Vec<Symbol>,
    },
    /// Subscription confirmation
    Subscribed { symbol: Symbol },
    /// Selected tick for a subscribed symbol
    PriceUpdate {
        symbol: Symbol,
        price: f64,
        change_percent: f64,
        timestamp: i64,
    },
    /// Idle probe / keepalive reply
    Keepalive,
    /// Error notification for this client only
    Error { message: String },
}

impl WsMessage {
    pub fn connected() -> Self {
        WsMessage::Connected {
            message: "connected to price stream".to_string(),
            symbols: Symbol::all(),
        }
    }

    pub fn price_update(price: &Price) -> Self {
        WsMessage::PriceUpdate {
            symbol: price.symbol,
            price: price.price,
            change_percent: price.change_percent,
            timestamp: price.timestamp,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        WsMessage::Error {
            message: message.into(),
        }
    }
}

/// Client-to-server socket commands
///
/// Subscribe/unsubscribe carry one symbol or a list; anything else in
/// the `type` field fails to decode and produces an `error` reply.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe {
        #[serde(default)]
        symbol: Option<String>,
        #[serde(default)]
        symbols: Option<Vec<String>>,
    },
    Unsubscribe {
        #[serde(default)]
        symbol: Option<String>,
        #[serde(default)]
        symbols: Option<Vec<String>>,
    },
    Keepalive,
}

impl ClientMessage {
    /// Flatten the one-or-many symbol fields
    pub fn requested_symbols(&self) -> Vec<String> {
        let (one, many) = match self {
            ClientMessage::Subscribe { symbol, symbols }
            | ClientMessage::Unsubscribe { symbol, symbols } => (symbol, symbols),
            ClientMessage::Keepalive => return Vec::new(),
        };

        let mut out = Vec::new();
        if let Some(s) = one {
            out.push(s.clone());
        }
        if let Some(list) = many {
            out.extend(list.iter().cloned());
        }
        out
    }
}
