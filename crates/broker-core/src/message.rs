// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The [`Message`] envelope participants exchange through their mailboxes.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::BrokerError;

/// Either a live session id or the reserved participant `user`.
pub type Participant = String;

pub const USER_PARTICIPANT: &str = "user";

/// Message kinds a client may enqueue directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    PromptRequest,
    PromptResponse,
    QueryRequest,
    QueryResponse,
    ReviewRequest,
    ReviewResponse,
    ApprovalRequest,
    ApprovalResponse,
    StatusUpdate,
}

impl MessageType {
    /// True for the single one-shot, log-style type the mail loop auto-routes
    /// into the sender's chat log and auto-completes (see [`crate::manager`]).
    pub fn is_log_type(&self) -> bool {
        matches!(self, Self::StatusUpdate)
    }

    fn parse(raw: &str) -> Result<Self, BrokerError> {
        match raw {
            "PROMPT_REQUEST" => Ok(Self::PromptRequest),
            "PROMPT_RESPONSE" => Ok(Self::PromptResponse),
            "QUERY_REQUEST" => Ok(Self::QueryRequest),
            "QUERY_RESPONSE" => Ok(Self::QueryResponse),
            "REVIEW_REQUEST" => Ok(Self::ReviewRequest),
            "REVIEW_RESPONSE" => Ok(Self::ReviewResponse),
            "APPROVAL_REQUEST" => Ok(Self::ApprovalRequest),
            "APPROVAL_RESPONSE" => Ok(Self::ApprovalResponse),
            "STATUS_UPDATE" => Ok(Self::StatusUpdate),
            "ERROR_REPORT" => Err(BrokerError::invalid_argument(
                "ERROR_REPORT is deprecated, use STATUS_UPDATE",
            )),
            "LOG_INFO" => Err(BrokerError::invalid_argument(
                "LOG_INFO is deprecated, use STATUS_UPDATE",
            )),
            "LOG_ERROR" => Err(BrokerError::invalid_argument(
                "LOG_ERROR is deprecated, use STATUS_UPDATE",
            )),
            "LEGACY_PROMPT" => Err(BrokerError::invalid_argument(
                "LEGACY_PROMPT is deprecated, use PROMPT_REQUEST",
            )),
            other => Err(BrokerError::invalid_argument(format!("unknown message type {other}"))),
        }
    }
}

/// An immutable message exchanged between participants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub from: Participant,
    pub to: Participant,
    #[serde(rename = "type")]
    pub message_type_raw: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    pub timestamp: u64,
    #[serde(default)]
    pub retries: u32,
}

impl Message {
    /// Validate and normalize `message_type_raw`, returning the typed kind.
    pub fn message_type(&self) -> Result<MessageType, BrokerError> {
        MessageType::parse(&self.message_type_raw)
    }

    /// Fill in `from`/`id`/`timestamp` for a message a client just submitted,
    /// as `AddToOutbox` does for every write.
    pub fn prepare_outbound(mut self, from: &str, now_unix_secs: u64) -> Result<Self, BrokerError> {
        self.message_type()?;
        if self.from.is_empty() {
            self.from = from.to_owned();
        }
        if self.id.is_empty() {
            self.id = Uuid::new_v4().to_string();
        }
        if self.timestamp == 0 {
            self.timestamp = now_unix_secs;
        }
        Ok(self)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[path = "message_tests.rs"]
mod tests;
