//! JSON shapes exchanged with the node's `/v2` API.
//!
//! Field aliases cover the older node versions that named things differently.
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub job_message: JobMessage,
    #[serde(alias = "sender_identity")]
    pub sender: String,
    #[serde(default)]
    pub sender_subidentity: String,
    #[serde(default)]
    pub inbox: String,
    pub node_api_data: NodeApiData,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JobMessage {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub fs_files_paths: Vec<String>,
    #[serde(default)]
    pub job_filenames: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeApiData {
    #[serde(alias = "hash")]
    pub node_message_hash: String,
    #[serde(alias = "scheduled_time")]
    pub node_timestamp: String,
    #[serde(default, alias = "parent_message_hash")]
    pub parent_hash: Option<String>,
}

/// `last_messages` answers with a flat list, `last_messages_with_branches`
/// with one group per position in the history.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RemotePage {
    Flat(Vec<ChatMessage>),
    Branched(Vec<Vec<ChatMessage>>),
}

#[derive(Debug, Serialize)]
pub(crate) struct LastMessagesRequest<'a> {
    pub inbox_name: &'a str,
    pub limit: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset_key: Option<&'a str>,
}

#[derive(Debug, Serialize)]
pub(crate) struct JobMessageRequest<'a> {
    pub job_message: OutgoingJobMessage<'a>,
}

#[derive(Debug, Serialize)]
pub(crate) struct OutgoingJobMessage<'a> {
    pub job_id: &'a str,
    pub content: &'a str,
    pub parent: Option<&'a str>,
    pub fs_files_paths: Vec<&'a str>,
    pub job_filenames: Vec<&'a str>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct JobMessageResponse {
    pub inbox: String,
    pub message_id: String,
    #[serde(default)]
    pub parent_message_id: Option<String>,
    pub scheduled_time: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct RetryMessageRequest<'a> {
    pub message_id: &'a str,
    pub inbox_name: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct ForkJobRequest<'a> {
    pub job_id: &'a str,
    pub message_id: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ForkJobResponse {
    pub job_id: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct InboxRequest<'a> {
    pub inbox_name: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct UpdateInboxNameRequest<'a> {
    pub inbox_name: &'a str,
    pub custom_name: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct JobRequest<'a> {
    pub job_id: &'a str,
}
