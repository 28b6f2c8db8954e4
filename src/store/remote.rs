use async_trait::async_trait;
use reqwest::{ Client, RequestBuilder, Response, StatusCode };
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{ ErrorBody, MessagingError, Result };
use crate::models::{ ConversationRef, ConversationSummary, Cursor, Group, Message, Page, Target };
use crate::store::MessageStore;

#[derive(Serialize)]
struct SendBody<'a> {
    content: &'a str,
}

#[derive(Serialize)]
struct PageQuery<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    cursor: Option<&'a str>,
    limit: usize,
}

/// Store adapter that talks to a running messaging server over its HTTP API. Every call is
/// made on behalf of the session owner, so only that user's view is reachable.
pub struct RemoteMessageStore {
    http: Client,
    base_url: String,
    token: String,
    user_id: String,
}

impl RemoteMessageStore {
    pub fn new(base_url: &str, token: &str, user_id: &str) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            user_id: user_id.to_string(),
        }
    }

    fn messages_url(&self, target: &Target) -> String {
        match target {
            Target::Direct(user_id) => format!("{}/api/messages/direct/{}", self.base_url, user_id),
            Target::Group(group_id) => format!("{}/api/messages/group/{}", self.base_url, group_id),
        }
    }

    fn ensure_self(&self, user_id: &str) -> Result<()> {
        if user_id == self.user_id {
            Ok(())
        } else {
            Err(MessagingError::NotAParticipant(user_id.to_string()))
        }
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.bearer_auth(&self.token)
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<T>().await?);
        }
        Err(Self::error_from(status, response).await)
    }

    async fn error_from(status: StatusCode, response: Response) -> MessagingError {
        match response.json::<ErrorBody>().await {
            Ok(body) => body.into_error(),
            Err(_) if status.is_server_error() => MessagingError::StoreUnavailable(status.to_string()),
            Err(_) => MessagingError::Internal(format!("unexpected response status {}", status)),
        }
    }

    async fn send(&self, target: Target, content: &str) -> Result<Message> {
        let request = self.http.post(self.messages_url(&target)).json(&(SendBody { content }));
        let response = self.authorized(request).send().await?;
        Self::decode(response).await
    }

    async fn page(&self, target: Target, cursor: Option<&Cursor>, limit: usize) -> Result<Page> {
        let query = PageQuery { cursor: cursor.map(Cursor::as_str), limit };
        let request = self.http.get(self.messages_url(&target)).query(&query);
        let response = self.authorized(request).send().await?;
        Self::decode(response).await
    }
}

#[async_trait]
impl MessageStore for RemoteMessageStore {
    async fn append_direct_message(
        &self,
        sender_id: &str,
        receiver_id: &str,
        content: &str
    ) -> Result<Message> {
        self.ensure_self(sender_id)?;
        self.send(Target::Direct(receiver_id.to_string()), content).await
    }

    async fn append_group_message(
        &self,
        sender_id: &str,
        group_id: &str,
        content: &str
    ) -> Result<Message> {
        self.ensure_self(sender_id)?;
        self.send(Target::Group(group_id.to_string()), content).await
    }

    async fn page_direct_messages(
        &self,
        user_a: &str,
        user_b: &str,
        cursor: Option<&Cursor>,
        limit: usize
    ) -> Result<Page> {
        let target = ConversationRef::direct(user_a, user_b)
            .target_for(&self.user_id)
            .ok_or_else(|| MessagingError::NotAParticipant(self.user_id.clone()))?;
        self.page(target, cursor, limit).await
    }

    async fn page_group_messages(
        &self,
        group_id: &str,
        cursor: Option<&Cursor>,
        limit: usize
    ) -> Result<Page> {
        self.page(Target::Group(group_id.to_string()), cursor, limit).await
    }

    async fn list_conversations_for(&self, user_id: &str) -> Result<Vec<ConversationSummary>> {
        self.ensure_self(user_id)?;
        let request = self.http.get(format!("{}/api/conversations", self.base_url));
        let response = self.authorized(request).send().await?;
        Self::decode(response).await
    }

    async fn mark_read(&self, conversation: &ConversationRef, reader_id: &str) -> Result<()> {
        self.ensure_self(reader_id)?;
        let target = conversation
            .target_for(reader_id)
            .ok_or_else(|| MessagingError::NotAParticipant(reader_id.to_string()))?;
        let request = self.http.post(format!("{}/read", self.messages_url(&target)));
        let response = self.authorized(request).send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(Self::error_from(status, response).await)
        }
    }

    async fn get_group(&self, group_id: &str) -> Result<Option<Group>> {
        let request = self.http.get(format!("{}/api/groups/{}", self.base_url, group_id));
        let response = self.authorized(request).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::decode(response).await.map(Some)
    }
}
