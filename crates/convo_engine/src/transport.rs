use std::time::Duration;

use async_trait::async_trait;
use convo_core::{Cursor, InboxId, JobId, MessageHash, SendReceipt, SendRequest};
use convo_logging::convo_debug;
use reqwest::header::CONTENT_TYPE;
use serde::de::DeserializeOwned;
use serde::Serialize;
use url::Url;

use crate::fetch::{non_empty, parse_timestamp};
use crate::wire::{
    ForkJobRequest, ForkJobResponse, InboxRequest, JobMessageRequest, JobMessageResponse,
    JobRequest, LastMessagesRequest, OutgoingJobMessage, RemotePage, RetryMessageRequest,
    UpdateInboxNameRequest,
};
use crate::{TransportError, TransportFailureKind};

#[derive(Debug, Clone)]
pub struct TransportSettings {
    pub node_address: Url,
    pub api_token: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    /// Ask for branch-grouped pages instead of the flat list.
    pub use_branches: bool,
}

impl TransportSettings {
    pub fn new(node_address: Url, api_token: impl Into<String>) -> Self {
        Self {
            node_address,
            api_token: api_token.into(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            use_branches: false,
        }
    }
}

/// The remote job service. Implementations perform no retries.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch_messages(
        &self,
        inbox: &InboxId,
        cursor: Option<&Cursor>,
        limit: usize,
    ) -> Result<RemotePage, TransportError>;

    async fn send_message(&self, request: &SendRequest) -> Result<SendReceipt, TransportError>;

    async fn retry_message(
        &self,
        inbox: &InboxId,
        message_id: &MessageHash,
    ) -> Result<SendReceipt, TransportError>;

    /// Returns the id of the newly created job.
    async fn fork_job(&self, job_id: &JobId, message_id: &MessageHash)
        -> Result<JobId, TransportError>;

    async fn kill_job(&self, inbox: &InboxId) -> Result<(), TransportError>;

    async fn rename_inbox(&self, inbox: &InboxId, name: &str) -> Result<(), TransportError>;

    async fn remove_job(&self, job_id: &JobId) -> Result<(), TransportError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    settings: TransportSettings,
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(settings: TransportSettings) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .build()
            .map_err(|err| TransportError::new(TransportFailureKind::Network, err.to_string()))?;
        Ok(Self { settings, client })
    }

    fn endpoint(&self, name: &str) -> Result<Url, TransportError> {
        self.settings
            .node_address
            .join(&format!("v2/{name}"))
            .map_err(|err| TransportError::new(TransportFailureKind::InvalidUrl, err.to_string()))
    }

    async fn post(&self, name: &str, body: &impl Serialize) -> Result<Vec<u8>, TransportError> {
        let url = self.endpoint(name)?;
        let body = serde_json::to_vec(body).map_err(|err| TransportError::decode(err.to_string()))?;
        convo_debug!("POST {url}");

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.settings.api_token)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::new(
                TransportFailureKind::HttpStatus(status.as_u16()),
                status.to_string(),
            ));
        }
        let bytes = response.bytes().await.map_err(map_reqwest_error)?;
        Ok(bytes.to_vec())
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        name: &str,
        body: &impl Serialize,
    ) -> Result<T, TransportError> {
        let bytes = self.post(name, body).await?;
        serde_json::from_slice(&bytes).map_err(|err| TransportError::decode(err.to_string()))
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn fetch_messages(
        &self,
        inbox: &InboxId,
        cursor: Option<&Cursor>,
        limit: usize,
    ) -> Result<RemotePage, TransportError> {
        let endpoint = if self.settings.use_branches {
            "last_messages_with_branches"
        } else {
            "last_messages"
        };
        let request = LastMessagesRequest {
            inbox_name: inbox.as_str(),
            limit,
            offset_key: cursor.map(Cursor::as_str),
        };
        self.post_json(endpoint, &request).await
    }

    async fn send_message(&self, request: &SendRequest) -> Result<SendReceipt, TransportError> {
        let (fs_files_paths, job_filenames) = request.attachments.iter().fold(
            (Vec::new(), Vec::new()),
            |(mut paths, mut names), attachment| {
                match attachment.path.as_deref() {
                    Some(path) => paths.push(path),
                    None => names.push(attachment.name.as_str()),
                }
                (paths, names)
            },
        );
        let body = JobMessageRequest {
            job_message: OutgoingJobMessage {
                job_id: request.job_id.as_str(),
                content: &request.content,
                parent: request.parent.as_ref().map(MessageHash::as_str),
                fs_files_paths,
                job_filenames,
            },
        };
        let response: JobMessageResponse = self.post_json("job_message", &body).await?;
        receipt_from(response)
    }

    async fn retry_message(
        &self,
        inbox: &InboxId,
        message_id: &MessageHash,
    ) -> Result<SendReceipt, TransportError> {
        let body = RetryMessageRequest {
            message_id: message_id.as_str(),
            inbox_name: inbox.as_str(),
        };
        let response: JobMessageResponse = self.post_json("retry_message", &body).await?;
        receipt_from(response)
    }

    async fn fork_job(
        &self,
        job_id: &JobId,
        message_id: &MessageHash,
    ) -> Result<JobId, TransportError> {
        let body = ForkJobRequest {
            job_id: job_id.as_str(),
            message_id: message_id.as_str(),
        };
        let response: ForkJobResponse = self.post_json("fork_job_messages", &body).await?;
        JobId::new(response.job_id).map_err(|err| TransportError::decode(err.to_string()))
    }

    async fn kill_job(&self, inbox: &InboxId) -> Result<(), TransportError> {
        let body = InboxRequest {
            inbox_name: inbox.as_str(),
        };
        self.post("stop_llm", &body).await.map(drop)
    }

    async fn rename_inbox(&self, inbox: &InboxId, name: &str) -> Result<(), TransportError> {
        let body = UpdateInboxNameRequest {
            inbox_name: inbox.as_str(),
            custom_name: name,
        };
        self.post("update_smart_inbox_name", &body).await.map(drop)
    }

    async fn remove_job(&self, job_id: &JobId) -> Result<(), TransportError> {
        let body = JobRequest {
            job_id: job_id.as_str(),
        };
        self.post("remove_job", &body).await.map(drop)
    }
}

fn receipt_from(response: JobMessageResponse) -> Result<SendReceipt, TransportError> {
    let decode = |err: convo_core::IdentityError| TransportError::decode(err.to_string());
    Ok(SendReceipt {
        message_id: MessageHash::parse(&response.message_id).map_err(decode)?,
        parent_message_id: non_empty(response.parent_message_id.as_deref())
            .map(MessageHash::parse)
            .transpose()
            .map_err(decode)?,
        inbox: InboxId::parse(&response.inbox).map_err(decode)?,
        scheduled_time: parse_timestamp(&response.scheduled_time)?,
    })
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        return TransportError::new(TransportFailureKind::Timeout, err.to_string());
    }
    TransportError::new(TransportFailureKind::Network, err.to_string())
}
