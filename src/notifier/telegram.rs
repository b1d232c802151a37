//! Telegram notifier
//!
//! Two bots: the operator bot receives user-facing events, the admin bot
//! receives everything. Identical messages to the same chat within the
//! duplicate window are dropped.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{Channel, Event, Notifier};
use crate::config::TelegramConfig;
use crate::error::NotifyError;

#[derive(Debug, Clone)]
struct BotTarget {
    token: String,
    chat_id: String,
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
}

/// Drops a message identical to the last one sent to a chat within `window`
#[derive(Debug)]
pub struct DuplicateFilter {
    window: Duration,
    last: HashMap<String, (String, Instant)>,
}

impl DuplicateFilter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last: HashMap::new(),
        }
    }

    pub fn admit(&mut self, chat_id: &str, text: &str, now: Instant) -> bool {
        if let Some((last_text, at)) = self.last.get(chat_id) {
            if last_text == text && now.saturating_duration_since(*at) < self.window {
                return false;
            }
        }
        self.last
            .insert(chat_id.to_string(), (text.to_string(), now));
        true
    }
}

pub struct TelegramNotifier {
    client: Client,
    api_base: String,
    operator: Option<BotTarget>,
    admin: Option<BotTarget>,
    filter: Mutex<DuplicateFilter>,
}

impl TelegramNotifier {
    pub fn new(config: &TelegramConfig) -> Result<Self, NotifyError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        let target = |token: &Option<String>, chat: &Option<String>| match (token, chat) {
            (Some(token), Some(chat_id)) => Some(BotTarget {
                token: token.clone(),
                chat_id: chat_id.clone(),
            }),
            _ => None,
        };

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            operator: target(&config.operator_token, &config.operator_chat_id),
            admin: target(&config.admin_token, &config.admin_chat_id),
            filter: Mutex::new(DuplicateFilter::new(Duration::from_secs(
                config.duplicate_window_secs,
            ))),
        })
    }

    fn targets(&self, channel: Channel) -> Vec<&BotTarget> {
        let mut targets = Vec::with_capacity(2);
        if channel == Channel::Operator {
            targets.extend(self.operator.as_ref());
        }
        targets.extend(self.admin.as_ref());
        targets
    }

    async fn send(&self, target: &BotTarget, text: &str) -> Result<(), NotifyError> {
        if !self
            .filter
            .lock()
            .await
            .admit(&target.chat_id, text, Instant::now())
        {
            debug!("Dropping duplicate message to chat {}", target.chat_id);
            return Ok(());
        }

        let url = format!("{}/bot{}/sendMessage", self.api_base, target.token);
        let response = self
            .client
            .post(&url)
            .json(&SendMessage {
                chat_id: &target.chat_id,
                text,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, channel: Channel, event: &Event) -> Result<(), NotifyError> {
        let text = event.to_string();
        let mut first_error = None;

        for target in self.targets(channel) {
            if let Err(e) = self.send(target, &text).await {
                warn!("Telegram delivery to chat {} failed: {}", target.chat_id, e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_filter() {
        let mut filter = DuplicateFilter::new(Duration::from_secs(3));
        let t0 = Instant::now();

        assert!(filter.admit("1", "hello", t0));
        assert!(!filter.admit("1", "hello", t0 + Duration::from_secs(2)));
        // other chats are tracked separately
        assert!(filter.admit("2", "hello", t0 + Duration::from_secs(2)));
        // a different message always goes through
        assert!(filter.admit("1", "bye", t0 + Duration::from_secs(2)));
        assert!(filter.admit("1", "hello", t0 + Duration::from_secs(2)));
        assert!(filter.admit("1", "hello", t0 + Duration::from_secs(6)));
    }

    #[test]
    fn test_admin_mirrors_operator_channel() {
        let config = TelegramConfig {
            operator_token: Some("op".to_string()),
            operator_chat_id: Some("100".to_string()),
            admin_token: Some("adm".to_string()),
            admin_chat_id: Some("200".to_string()),
            ..TelegramConfig::default()
        };
        let notifier = TelegramNotifier::new(&config).unwrap();

        let chats: Vec<&str> = notifier
            .targets(Channel::Operator)
            .iter()
            .map(|t| t.chat_id.as_str())
            .collect();
        assert_eq!(chats, vec!["100", "200"]);

        let chats: Vec<&str> = notifier
            .targets(Channel::Admin)
            .iter()
            .map(|t| t.chat_id.as_str())
            .collect();
        assert_eq!(chats, vec!["200"]);
    }

    #[test]
    fn test_missing_chat_id_disables_bot() {
        let config = TelegramConfig {
            operator_token: Some("op".to_string()),
            ..TelegramConfig::default()
        };
        let notifier = TelegramNotifier::new(&config).unwrap();
        assert!(notifier.targets(Channel::Operator).is_empty());
    }
}
