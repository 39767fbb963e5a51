//! Recipient resolution for group-addressed records.

use std::collections::HashMap;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use thiserror::Error;

/// Errors that can occur resolving recipients.
#[derive(Debug, Error)]
pub enum RecipientError {
    /// Redis operation failed
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Lookup failed for a non-transport reason
    #[error("recipient lookup failed: {0}")]
    Lookup(String),
}

/// A (user, client) pair returned by broadcast resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserClient {
    pub user_id: String,
    pub client_id: String,
}

/// Resolves group targets into concrete recipient sets.
#[async_trait]
pub trait RecipientResolver: Send + Sync {
    /// All users belonging to a client
    async fn resolve_client_users(&self, client_id: &str) -> Result<Vec<String>, RecipientError>;

    /// Every known user, with their client
    async fn resolve_all_users(&self) -> Result<Vec<UserClient>, RecipientError>;

    /// Active participants of a channel
    async fn resolve_channel_participants(
        &self,
        channel_id: &str,
    ) -> Result<Vec<String>, RecipientError>;
}

/// Redis set-backed recipient resolver.
///
/// Key layout: `clients` holds the client registry, `client:{id}:users` the
/// members of a client, `channel:{id}:participants` the active participants
/// of a channel. Membership maintenance belongs to the lifecycle services,
/// not this pipeline.
pub struct RedisRecipientResolver {
    conn: ConnectionManager,
}

impl RedisRecipientResolver {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl RecipientResolver for RedisRecipientResolver {
    async fn resolve_client_users(&self, client_id: &str) -> Result<Vec<String>, RecipientError> {
        let mut conn = self.conn.clone();
        let users: Vec<String> = conn.smembers(format!("client:{}:users", client_id)).await?;
        Ok(users)
    }

    async fn resolve_all_users(&self) -> Result<Vec<UserClient>, RecipientError> {
        let mut conn = self.conn.clone();
        let clients: Vec<String> = conn.smembers("clients").await?;

        let mut all = Vec::new();
        for client_id in clients {
            let users: Vec<String> = conn.smembers(format!("client:{}:users", client_id)).await?;
            all.extend(users.into_iter().map(|user_id| UserClient {
                user_id,
                client_id: client_id.clone(),
            }));
        }
        Ok(all)
    }

    async fn resolve_channel_participants(
        &self,
        channel_id: &str,
    ) -> Result<Vec<String>, RecipientError> {
        let mut conn = self.conn.clone();
        let participants: Vec<String> = conn
            .smembers(format!("channel:{}:participants", channel_id))
            .await?;
        Ok(participants)
    }
}

/// Fixed in-memory resolver for tests and local runs.
#[derive(Debug, Default)]
pub struct StaticRecipientResolver {
    client_users: HashMap<String, Vec<String>>,
    channel_participants: HashMap<String, Vec<String>>,
}

impl StaticRecipientResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(mut self, client_id: impl Into<String>, users: Vec<String>) -> Self {
        self.client_users.insert(client_id.into(), users);
        self
    }

    pub fn with_channel(mut self, channel_id: impl Into<String>, participants: Vec<String>) -> Self {
        self.channel_participants
            .insert(channel_id.into(), participants);
        self
    }
}

#[async_trait]
impl RecipientResolver for StaticRecipientResolver {
    async fn resolve_client_users(&self, client_id: &str) -> Result<Vec<String>, RecipientError> {
        Ok(self.client_users.get(client_id).cloned().unwrap_or_default())
    }

    async fn resolve_all_users(&self) -> Result<Vec<UserClient>, RecipientError> {
        let mut all = Vec::new();
        for (client_id, users) in &self.client_users {
            all.extend(users.iter().map(|user_id| UserClient {
                user_id: user_id.clone(),
                client_id: client_id.clone(),
            }));
        }
        Ok(all)
    }

    async fn resolve_channel_participants(
        &self,
        channel_id: &str,
    ) -> Result<Vec<String>, RecipientError> {
        Ok(self
            .channel_participants
            .get(channel_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_resolver_client_users() {
        let resolver = StaticRecipientResolver::new()
            .with_client("t1", vec!["u1".into(), "u2".into()])
            .with_client("t2", vec!["u3".into()]);

        assert_eq!(resolver.resolve_client_users("t1").await.unwrap().len(), 2);
        assert!(resolver.resolve_client_users("t9").await.unwrap().is_empty());
        assert_eq!(resolver.resolve_all_users().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_static_resolver_channel_participants() {
        let resolver =
            StaticRecipientResolver::new().with_channel("general", vec!["u1".into(), "u5".into()]);

        let participants = resolver
            .resolve_channel_participants("general")
            .await
            .unwrap();
        assert_eq!(participants, vec!["u1".to_string(), "u5".to_string()]);
    }
}
