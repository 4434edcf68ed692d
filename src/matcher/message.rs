//! Inbound message boundary
//!
//! Raw stream payloads are parsed once into a closed enum. Anything the
//! matcher cannot interpret becomes `Unclassified` and is counted, never
//! propagated as an error.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Instant;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    /// Program logs of one transaction
    Logs {
        signature: String,
        slot: u64,
        token_mint: Option<String>,
        lines: Vec<String>,
    },
    /// A single decoded instruction
    Instruction {
        signature: String,
        slot: u64,
        token_mint: Option<String>,
        program: String,
        instruction: String,
        amount: Option<u64>,
    },
    Unclassified,
}

impl InboundEvent {
    /// Accepts `logsNotification` results (`{context: {slot}, value: {signature, logs}}`)
    /// as well as flat objects. A `token_mint` (or `mint`) field routes the event.
    pub fn from_json(payload: &Value) -> Self {
        let body = payload.get("value").unwrap_or(payload);
        let slot = payload
            .pointer("/context/slot")
            .or_else(|| body.get("slot"))
            .or_else(|| payload.get("slot"))
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let token_mint = ["token_mint", "mint"]
            .iter()
            .find_map(|k| payload.get(*k).or_else(|| body.get(*k)))
            .and_then(Value::as_str)
            .map(str::to_string);
        let signature = match body.get("signature").and_then(Value::as_str) {
            Some(s) => s.to_string(),
            None => return InboundEvent::Unclassified,
        };

        if let Some(logs) = body.get("logs").and_then(Value::as_array) {
            let lines: Vec<String> = logs.iter().filter_map(Value::as_str).map(str::to_string).collect();
            if lines.is_empty() {
                return InboundEvent::Unclassified;
            }
            return InboundEvent::Logs {
                signature,
                slot,
                token_mint,
                lines,
            };
        }

        if let Some(instruction) = body.get("instruction").and_then(Value::as_str) {
            let amount = body.get("amount").and_then(|a| {
                a.as_u64()
                    .or_else(|| a.as_str().and_then(|s| s.parse::<u64>().ok()))
            });
            return InboundEvent::Instruction {
                signature,
                slot,
                token_mint,
                program: body
                    .get("program")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                instruction: instruction.to_string(),
                amount,
            };
        }

        InboundEvent::Unclassified
    }

    pub fn is_classified(&self) -> bool {
        !matches!(self, InboundEvent::Unclassified)
    }

    pub fn signature(&self) -> Option<&str> {
        match self {
            InboundEvent::Logs { signature, .. } | InboundEvent::Instruction { signature, .. } => Some(signature),
            InboundEvent::Unclassified => None,
        }
    }

    pub fn slot(&self) -> u64 {
        match self {
            InboundEvent::Logs { slot, .. } | InboundEvent::Instruction { slot, .. } => *slot,
            InboundEvent::Unclassified => 0,
        }
    }

    pub fn token_mint(&self) -> Option<&str> {
        match self {
            InboundEvent::Logs { token_mint, .. } | InboundEvent::Instruction { token_mint, .. } => {
                token_mint.as_deref()
            }
            InboundEvent::Unclassified => None,
        }
    }

    /// Text the rules run against: one log line per line, or a synthetic
    /// `Instruction:` line for decoded instructions
    pub fn text(&self) -> String {
        match self {
            InboundEvent::Logs { lines, .. } => lines.join("\n"),
            InboundEvent::Instruction {
                program,
                instruction,
                amount,
                ..
            } => match amount {
                Some(amount) => format!("Program {} Instruction: {} amount_in={}", program, instruction, amount),
                None => format!("Program {} Instruction: {}", program, instruction),
            },
            InboundEvent::Unclassified => String::new(),
        }
    }
}

/// Queue tier, most urgent first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessagePriority {
    Critical = 0,
    High = 1,
    Normal = 2,
    Low = 3,
}

impl MessagePriority {
    pub const ALL: [MessagePriority; 4] = [
        MessagePriority::Critical,
        MessagePriority::High,
        MessagePriority::Normal,
        MessagePriority::Low,
    ];

    pub fn assign(protected: bool, keyword_hit: bool) -> Self {
        match (protected, keyword_hit) {
            (true, true) => MessagePriority::Critical,
            (true, false) => MessagePriority::High,
            (false, true) => MessagePriority::Normal,
            (false, false) => MessagePriority::Low,
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for MessagePriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessagePriority::Critical => "critical",
            MessagePriority::High => "high",
            MessagePriority::Normal => "normal",
            MessagePriority::Low => "low",
        };
        f.write_str(s)
    }
}

/// Queued unit of work
#[derive(Debug, Clone)]
pub struct LogMessage {
    pub id: u64,
    pub event: InboundEvent,
    pub priority: MessagePriority,
    pub enqueued_at: Instant,
}
