use super::TestEnv;
use latchkey::accounts::{Accounts, Profile};
use latchkey::store::{Group, Store, User};

/// Builder for test groups with an attached role.
pub struct GroupBuilder {
    id: String,
    display_name: String,
    role_id: Option<String>,
}

impl GroupBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            display_name: id.to_string(),
            role_id: None,
        }
    }

    pub fn with_name(mut self, display_name: &str) -> Self {
        self.display_name = display_name.to_string();
        self
    }

    pub fn with_role(mut self, role_id: &str) -> Self {
        self.role_id = Some(role_id.to_string());
        self
    }

    pub async fn create(self, env: &TestEnv) -> Group {
        let group = env
            .store
            .insert_group(Group {
                id: self.id,
                display_name: self.display_name,
                created_at: 0,
            })
            .await
            .expect("Failed to create test group");
        if let Some(role_id) = self.role_id {
            env.hierarchy
                .assign_role(&group.id, &role_id)
                .await
                .expect("Failed to assign role");
        }
        group
    }
}

/// Builder for test users, registered through the accounts module so the
/// private singleton group exists.
pub struct UserBuilder {
    username: String,
    email: Option<String>,
    identity_id: Option<String>,
}

impl UserBuilder {
    pub fn new(username: &str) -> Self {
        Self {
            username: username.to_string(),
            email: None,
            identity_id: None,
        }
    }

    pub fn with_email(mut self, email: &str) -> Self {
        self.email = Some(email.to_string());
        self
    }

    pub fn with_identity(mut self, identity_id: &str) -> Self {
        self.identity_id = Some(identity_id.to_string());
        self
    }

    pub async fn create(self, env: &TestEnv) -> User {
        let accounts = Accounts::new(env.store.clone(), env.hierarchy.clone());
        accounts
            .register(Profile {
                username: self.username,
                email: self.email,
                identity_id: self.identity_id,
                ..Profile::default()
            })
            .await
            .expect("Failed to create test user")
    }
}
