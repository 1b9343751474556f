use async_trait::async_trait;
use relay::HostUser;
use std::collections::HashMap;

/// Looks up host users that notifications are addressed to.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find(&self, id: u64) -> Option<HostUser>;
}

/// Users listed in the `users` section of the config file.
pub struct ConfigDirectory {
    users: HashMap<u64, HostUser>,
}

impl ConfigDirectory {
    pub fn new(users: Vec<HostUser>) -> Self {
        ConfigDirectory {
            users: users.into_iter().map(|user| (user.id, user)).collect(),
        }
    }
}

#[async_trait]
impl UserDirectory for ConfigDirectory {
    async fn find(&self, id: u64) -> Option<HostUser> {
        self.users.get(&id).cloned()
    }
}
