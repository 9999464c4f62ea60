use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use reqwest::{Method, RequestBuilder, StatusCode, Url};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use threescale_operator_core::error::ReconcileError;

/// Credentials of the provider account the developer portal is managed with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderAccount {
    pub admin_url: String,
    pub token: String,
}

impl ProviderAccount {
    pub fn host(&self) -> String {
        Url::parse(&self.admin_url)
            .ok()
            .and_then(|url| url.host_str().map(str::to_owned))
            .unwrap_or_else(|| self.admin_url.to_owned())
    }
}

#[derive(Debug, Error)]
pub enum PortalError {
    #[error("Invalid admin portal URL '{}'! Reason: {}", .0, .1)]
    InvalidUrl(String, String),
    #[error("Couldn't reach the admin portal! Reason: {}", .0)]
    Transport(reqwest::Error),
    #[error("The admin portal responded with {}: {}", .0, .1)]
    Status(StatusCode, String),
}

impl From<PortalError> for ReconcileError {
    fn from(error: PortalError) -> Self {
        ReconcileError::Portal(error.to_string())
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct PortalUser {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub role: String,
    pub state: String,
}

impl PortalUser {
    pub fn is_suspended(&self) -> bool {
        self.state == "suspended"
    }

    pub fn is_active(&self) -> bool {
        self.state == "active"
    }
}

#[derive(Serialize, Clone, Debug)]
pub struct NewPortalUser {
    pub username: String,
    pub email: String,
    pub password: String,
}

/// The developer user management part of the product admin API.
#[async_trait]
pub trait DeveloperPortal: Send + Sync {
    async fn find_user(
        &self,
        account_id: i64,
        username: &str,
    ) -> Result<Option<PortalUser>, PortalError>;

    async fn create_user(
        &self,
        account_id: i64,
        user: &NewPortalUser,
    ) -> Result<PortalUser, PortalError>;

    async fn update_user_email(
        &self,
        account_id: i64,
        user_id: i64,
        email: &str,
    ) -> Result<PortalUser, PortalError>;

    /// Applies one of the state changing actions: `activate`, `suspend`,
    /// `unsuspend`, `admin` or `member`.
    async fn change_user(
        &self,
        account_id: i64,
        user_id: i64,
        action: &str,
    ) -> Result<PortalUser, PortalError>;
}

/// Opens a portal client for a provider account.
pub trait PortalConnector: Send + Sync {
    fn connect(&self, account: &ProviderAccount) -> Result<Arc<dyn DeveloperPortal>, PortalError>;
}

#[derive(Deserialize)]
struct UserEnvelope {
    user: PortalUser,
}

#[derive(Deserialize)]
struct UsersEnvelope {
    users: Vec<UserEnvelope>,
}

pub struct PortaClient {
    http: reqwest::Client,
    admin_url: Url,
    token: String,
}

impl PortaClient {
    pub fn new(http: reqwest::Client, account: &ProviderAccount) -> Result<Self, PortalError> {
        let admin_url = Url::parse(&account.admin_url).map_err(|error| {
            PortalError::InvalidUrl(account.admin_url.to_owned(), error.to_string())
        })?;

        Ok(Self {
            http,
            admin_url,
            token: account.token.to_owned(),
        })
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, PortalError> {
        let url = self
            .admin_url
            .join(path)
            .map_err(|error| PortalError::InvalidUrl(path.to_owned(), error.to_string()))?;

        debug!("{method} {url}");

        Ok(self
            .http
            .request(method, url)
            .header("Accept", "application/json")
            .query(&[("access_token", &self.token)]))
    }

    async fn send<T: for<'de> Deserialize<'de>>(request: RequestBuilder) -> Result<T, PortalError> {
        let response = request.send().await.map_err(PortalError::Transport)?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PortalError::Status(status, body));
        }

        response.json::<T>().await.map_err(PortalError::Transport)
    }

    fn users_path(account_id: i64) -> String {
        format!("/admin/api/accounts/{account_id}/users.json")
    }

    fn user_path(account_id: i64, user_id: i64, action: Option<&str>) -> String {
        match action {
            Some(action) => {
                format!("/admin/api/accounts/{account_id}/users/{user_id}/{action}.json")
            }
            None => format!("/admin/api/accounts/{account_id}/users/{user_id}.json"),
        }
    }
}

#[async_trait]
impl DeveloperPortal for PortaClient {
    async fn find_user(
        &self,
        account_id: i64,
        username: &str,
    ) -> Result<Option<PortalUser>, PortalError> {
        let users: UsersEnvelope =
            Self::send(self.request(Method::GET, &Self::users_path(account_id))?).await?;

        Ok(users
            .users
            .into_iter()
            .map(|envelope| envelope.user)
            .find(|user| user.username == username))
    }

    async fn create_user(
        &self,
        account_id: i64,
        user: &NewPortalUser,
    ) -> Result<PortalUser, PortalError> {
        let request = self
            .request(Method::POST, &Self::users_path(account_id))?
            .form(user);
        let created: UserEnvelope = Self::send(request).await?;

        Ok(created.user)
    }

    async fn update_user_email(
        &self,
        account_id: i64,
        user_id: i64,
        email: &str,
    ) -> Result<PortalUser, PortalError> {
        let request = self
            .request(Method::PUT, &Self::user_path(account_id, user_id, None))?
            .form(&[("email", email)]);
        let updated: UserEnvelope = Self::send(request).await?;

        Ok(updated.user)
    }

    async fn change_user(
        &self,
        account_id: i64,
        user_id: i64,
        action: &str,
    ) -> Result<PortalUser, PortalError> {
        let path = Self::user_path(account_id, user_id, Some(action));
        let request = self.request(Method::PUT, &path)?;
        let updated: UserEnvelope = Self::send(request).await?;

        Ok(updated.user)
    }
}

/// Connects through a single shared HTTP client.
#[derive(Default)]
pub struct PortaConnector {
    http: reqwest::Client,
}

impl PortalConnector for PortaConnector {
    fn connect(&self, account: &ProviderAccount) -> Result<Arc<dyn DeveloperPortal>, PortalError> {
        Ok(Arc::new(PortaClient::new(self.http.clone(), account)?))
    }
}

#[cfg(test)]
pub mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Portal kept in memory, shared by every connection it hands out.
    #[derive(Default)]
    pub struct FakePortal {
        pub users: Mutex<Vec<(i64, PortalUser)>>,
        pub actions: Mutex<Vec<String>>,
    }

    impl FakePortal {
        pub fn user(&self, username: &str) -> Option<PortalUser> {
            self.users
                .lock()
                .unwrap()
                .iter()
                .find(|(_, user)| user.username == username)
                .map(|(_, user)| user.clone())
        }

        pub fn actions(&self) -> Vec<String> {
            self.actions.lock().unwrap().clone()
        }

        fn modify(
            &self,
            user_id: i64,
            change: impl FnOnce(&mut PortalUser),
        ) -> Result<PortalUser, PortalError> {
            let mut users = self.users.lock().unwrap();
            let (_, user) = users
                .iter_mut()
                .find(|(_, user)| user.id == user_id)
                .ok_or_else(|| PortalError::Status(StatusCode::NOT_FOUND, "not found".into()))?;
            change(user);

            Ok(user.clone())
        }
    }

    #[async_trait]
    impl DeveloperPortal for FakePortal {
        async fn find_user(
            &self,
            account_id: i64,
            username: &str,
        ) -> Result<Option<PortalUser>, PortalError> {
            Ok(self
                .users
                .lock()
                .unwrap()
                .iter()
                .find(|(account, user)| *account == account_id && user.username == username)
                .map(|(_, user)| user.clone()))
        }

        async fn create_user(
            &self,
            account_id: i64,
            user: &NewPortalUser,
        ) -> Result<PortalUser, PortalError> {
            self.actions.lock().unwrap().push("create".to_owned());
            let mut users = self.users.lock().unwrap();
            let created = PortalUser {
                id: users.len() as i64 + 100,
                username: user.username.clone(),
                email: user.email.clone(),
                role: "member".to_owned(),
                state: "pending".to_owned(),
            };
            users.push((account_id, created.clone()));

            Ok(created)
        }

        async fn update_user_email(
            &self,
            _account_id: i64,
            user_id: i64,
            email: &str,
        ) -> Result<PortalUser, PortalError> {
            self.actions.lock().unwrap().push("email".to_owned());
            self.modify(user_id, |user| user.email = email.to_owned())
        }

        async fn change_user(
            &self,
            _account_id: i64,
            user_id: i64,
            action: &str,
        ) -> Result<PortalUser, PortalError> {
            self.actions.lock().unwrap().push(action.to_owned());
            self.modify(user_id, |user| match action {
                "activate" | "unsuspend" => user.state = "active".to_owned(),
                "suspend" => user.state = "suspended".to_owned(),
                role => user.role = role.to_owned(),
            })
        }
    }

    pub struct FakeConnector(pub Arc<FakePortal>);

    impl PortalConnector for FakeConnector {
        fn connect(
            &self,
            _account: &ProviderAccount,
        ) -> Result<Arc<dyn DeveloperPortal>, PortalError> {
            Ok(self.0.clone())
        }
    }
}
