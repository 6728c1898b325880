//! Gmail-shaped HTTP implementation of [`MailProvider`]

use log::debug;

use super::api::{HistoryResponse, ListMessagesResponse, ProfileResponse, RawMessage};
use super::{
    ChangeEvent, ChangeFeed, CredentialSession, ListScope, MailProvider, MessageIdPage, Profile,
    ProviderError,
};
use crate::models::{Checkpoint, MessageId};

/// Gmail REST implementation of the provider interface
pub struct GmailProvider {
    session: CredentialSession,
    base_url: String,
}

impl GmailProvider {
    /// Gmail API base URL
    const BASE_URL: &'static str = "https://gmail.googleapis.com/gmail/v1";

    /// Maximum page size accepted by messages.list
    const MAX_PAGE_SIZE: usize = 500;

    pub fn new(session: CredentialSession) -> Self {
        Self {
            session,
            base_url: Self::BASE_URL.to_string(),
        }
    }

    /// Point the provider at a different base URL (tests, proxies)
    pub fn with_base_url(session: CredentialSession, base_url: impl Into<String>) -> Self {
        Self {
            session,
            base_url: base_url.into(),
        }
    }

    /// Fetch one page of the change feed
    fn history_page(
        &self,
        checkpoint: &Checkpoint,
        page_token: Option<&str>,
    ) -> Result<HistoryResponse, ProviderError> {
        let mut url = format!(
            "{}/users/me/history?startHistoryId={}&historyTypes=messageAdded&historyTypes=messageDeleted&historyTypes=labelAdded&historyTypes=labelRemoved",
            self.base_url,
            urlencoding::encode(checkpoint.as_str()),
        );
        if let Some(token) = page_token {
            url.push_str(&format!("&pageToken={}", urlencoding::encode(token)));
        }

        match self.session.get_json(&url) {
            Ok(history) => Ok(history),
            // Gmail answers 404 when the startHistoryId is outside the
            // retention window
            Err(ProviderError::Status(404)) => Err(ProviderError::CheckpointExpired),
            Err(e) => Err(e),
        }
    }
}

impl MailProvider for GmailProvider {
    fn profile(&self) -> Result<Profile, ProviderError> {
        let url = format!("{}/users/me/profile", self.base_url);
        let profile: ProfileResponse = self.session.get_json(&url)?;
        Ok(Profile {
            email_address: profile.email_address,
        })
    }

    fn list_message_ids(
        &self,
        scope: ListScope,
        page_token: Option<&str>,
        page_size: usize,
    ) -> Result<MessageIdPage, ProviderError> {
        let mut url = format!(
            "{}/users/me/messages?maxResults={}&q={}",
            self.base_url,
            page_size.min(Self::MAX_PAGE_SIZE),
            urlencoding::encode(scope.query()),
        );
        if let Some(token) = page_token {
            url.push_str(&format!("&pageToken={}", urlencoding::encode(token)));
        }

        let list: ListMessagesResponse = self.session.get_json(&url)?;
        let ids = list
            .messages
            .unwrap_or_default()
            .into_iter()
            .map(|m| MessageId::new(m.id))
            .collect();

        Ok(MessageIdPage {
            ids,
            next_page_token: list.next_page_token,
        })
    }

    fn get_message(&self, id: &MessageId) -> Result<RawMessage, ProviderError> {
        let url = format!(
            "{}/users/me/messages/{}?format=full",
            self.base_url,
            id.as_str()
        );
        self.session.get_json(&url)
    }

    fn changes_since(&self, checkpoint: &Checkpoint) -> Result<ChangeFeed, ProviderError> {
        let mut events = Vec::new();
        let mut new_checkpoint = checkpoint.clone();
        let mut page_token: Option<String> = None;

        loop {
            let response = self.history_page(checkpoint, page_token.as_deref())?;

            for record in response.history.unwrap_or_default() {
                for added in record.messages_added.unwrap_or_default() {
                    events.push(ChangeEvent::Added(MessageId::new(added.message.id)));
                }
                for deleted in record.messages_deleted.unwrap_or_default() {
                    events.push(ChangeEvent::Deleted(MessageId::new(deleted.message.id)));
                }
                for change in record.labels_added.unwrap_or_default() {
                    events.push(ChangeEvent::LabelsChanged {
                        id: MessageId::new(change.message.id),
                        added: change.label_ids.unwrap_or_default(),
                        removed: Vec::new(),
                    });
                }
                for change in record.labels_removed.unwrap_or_default() {
                    events.push(ChangeEvent::LabelsChanged {
                        id: MessageId::new(change.message.id),
                        added: Vec::new(),
                        removed: change.label_ids.unwrap_or_default(),
                    });
                }
            }

            if let Some(id) = response.history_id {
                new_checkpoint = Checkpoint::new(id);
            }

            match response.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        debug!(
            "change feed from {} yielded {} events, new checkpoint {}",
            checkpoint.as_str(),
            events.len(),
            new_checkpoint.as_str()
        );

        Ok(ChangeFeed {
            events,
            new_checkpoint,
        })
    }

    fn current_checkpoint(&self) -> Result<Checkpoint, ProviderError> {
        let url = format!("{}/users/me/profile", self.base_url);
        let profile: ProfileResponse = self.session.get_json(&url)?;
        profile
            .history_id
            .map(Checkpoint::new)
            .ok_or_else(|| ProviderError::Decode("profile response missing historyId".to_string()))
    }
}
