use std::{borrow::Cow, sync::Arc};

use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use kube::{
    runtime::{controller::Action, watcher::Config, Controller},
    Client,
};
use log::{debug, info};
use threescale_operator_core::{
    error::{FieldError, ReconcileError},
    helpers::{object_info, RequireMetadata},
    kubernetes::client::{ClusterClient, KubeClusterClient},
    resources::crd::{
        status::ReadinessCondition,
        v1beta1::{
            developer_account::DeveloperAccount,
            developer_user::{DeveloperUser, DeveloperUserStatus},
            LocalReference,
        },
    },
};

use crate::{
    context::ReconcilerContext,
    helpers::handle_reconciliation_result,
    portal::{DeveloperPortal, NewPortalUser, PortalUser, ProviderAccount},
    status::{reconcile_status, StatusReporting},
};

use super::{error_action, retry_action, watched_api, within_deadline};

/// Secret describing the provider account when a resource names none.
pub const DEFAULT_PROVIDER_ACCOUNT_SECRET: &str = "threescale-provider-account";
pub const PROVIDER_ADMIN_URL_KEY: &str = "adminURL";
pub const PROVIDER_TOKEN_KEY: &str = "token";
pub const PASSWORD_KEY: &str = "password";

const DEVELOPER_ACCOUNT_PATH: &str = "spec.developerAccountRef";

/// What a reconciliation learned about the remote user, reported in the
/// status even when it failed half way.
#[derive(Debug, Clone, Default)]
pub struct DeveloperUserArtifacts {
    pub developer_user_id: Option<i64>,
    pub developer_account_id: Option<i64>,
    pub provider_account_host: Option<String>,
    pub state: Option<String>,
}

impl StatusReporting for DeveloperUser {
    type Status = DeveloperUserStatus;
    type Artifacts = DeveloperUserArtifacts;

    fn condition(&self) -> Option<&ReadinessCondition> {
        self.status
            .as_ref()
            .and_then(|status| status.condition.as_ref())
    }

    fn next_status(
        &self,
        condition: ReadinessCondition,
        artifacts: DeveloperUserArtifacts,
    ) -> DeveloperUserStatus {
        let previous = self.status.clone().unwrap_or_default();

        DeveloperUserStatus {
            condition: Some(condition),
            developer_user_id: artifacts.developer_user_id.or(previous.developer_user_id),
            developer_account_id: artifacts
                .developer_account_id
                .or(previous.developer_account_id),
            provider_account_host: artifacts
                .provider_account_host
                .or(previous.provider_account_host),
            state: artifacts.state.or(previous.state),
            observed_generation: self.metadata.generation,
        }
    }
}

pub async fn start_developer_user_controller(
    client: Client,
    context: Arc<ReconcilerContext<KubeClusterClient>>,
) {
    info!("Creating DeveloperUser controller...");

    let controller = Controller::new(
        watched_api::<DeveloperUser>(&client, &context.release),
        Config::default(),
    )
    .shutdown_on_signal()
    .run(
        reconcile_developer_user,
        reconcile_developer_user_error,
        context.clone(),
    )
    .for_each(handle_reconciliation_result);

    info!("DeveloperUser controller created!");

    controller.await
}

pub async fn reconcile_developer_user<C: ClusterClient + 'static>(
    object: Arc<DeveloperUser>,
    context: Arc<ReconcilerContext<C>>,
) -> Result<Action, ReconcileError> {
    if object.metadata.deletion_timestamp.is_some() {
        debug!(
            "{} is being deleted, skipping",
            object_info(object.as_ref())
        );
        return Ok(Action::await_change());
    }

    let mut artifacts = DeveloperUserArtifacts::default();
    let primary = within_deadline(&context, try_reconcile(&object, &context, &mut artifacts))
        .await
        .err();

    let retry = reconcile_status(&context, object.as_ref(), artifacts, primary).await?;

    Ok(retry_action(retry, &context))
}

pub fn reconcile_developer_user_error<C>(
    _object: Arc<DeveloperUser>,
    error: &ReconcileError,
    _context: Arc<ReconcilerContext<C>>,
) -> Action {
    error_action(error)
}

async fn try_reconcile<C: ClusterClient>(
    object: &DeveloperUser,
    context: &ReconcilerContext<C>,
    artifacts: &mut DeveloperUserArtifacts,
) -> Result<(), ReconcileError> {
    let errors = object.validate();
    if !errors.is_empty() {
        return Err(ReconcileError::InvalidSpec(errors));
    }

    let namespace = object.require_namespace_or(ReconcileError::MissingObjectData(
        "metadata.namespace".into(),
    ))?;
    let provider = lookup_provider_account(
        &context.client,
        namespace,
        object.spec.provider_account_ref.as_ref(),
    )
    .await?;
    artifacts.provider_account_host = Some(provider.host());

    let parent = find_parent_account(&context.client, object, namespace, &provider).await?;
    let account_id = parent.account_id().ok_or_else(|| {
        let field = format!("{}.status.accountId", object_info(&parent));
        ReconcileError::MissingObjectData(field.into())
    })?;
    artifacts.developer_account_id = Some(account_id);

    let portal = context.portals.connect(&provider)?;
    let user = sync_user(
        &context.client,
        portal.as_ref(),
        object,
        namespace,
        account_id,
    )
    .await?;
    artifacts.developer_user_id = Some(user.id);
    artifacts.state = Some(user.state);

    Ok(())
}

/// Reads the admin portal URL and token of the referenced provider account
/// secret.
pub async fn lookup_provider_account<C: ClusterClient>(
    client: &C,
    namespace: &str,
    reference: Option<&LocalReference>,
) -> Result<ProviderAccount, ReconcileError> {
    let name = reference
        .map(|reference| reference.name.as_str())
        .unwrap_or(DEFAULT_PROVIDER_ACCOUNT_SECRET);
    let secret = client
        .get::<Secret>(name, namespace)
        .await?
        .ok_or_else(|| {
            ReconcileError::MissingObjectData(format!("Secret {namespace}/{name}").into())
        })?;

    Ok(ProviderAccount {
        admin_url: read_secret_key(&secret, PROVIDER_ADMIN_URL_KEY)?,
        token: read_secret_key(&secret, PROVIDER_TOKEN_KEY)?,
    })
}

fn read_secret_key(secret: &Secret, key: &str) -> Result<String, ReconcileError> {
    let missing = || -> ReconcileError {
        ReconcileError::MissingObjectData(Cow::Owned(format!("{}.{key}", object_info(secret))))
    };

    if let Some(value) = secret.data.as_ref().and_then(|data| data.get(key)) {
        return String::from_utf8(value.0.to_owned()).map_err(|_| {
            ReconcileError::InvalidObjectData(format!("{}.{key}", object_info(secret)).into())
        });
    }

    secret
        .string_data
        .as_ref()
        .and_then(|data| data.get(key))
        .cloned()
        .ok_or_else(missing)
}

fn orphan(object: &DeveloperUser, detail: &str) -> ReconcileError {
    ReconcileError::Orphan(vec![FieldError::invalid(
        DEVELOPER_ACCOUNT_PATH,
        &object.spec.developer_account_ref.name,
        detail,
    )])
}

/// The developer account the user belongs to. It has to exist, belong to the
/// same provider account and be ready.
async fn find_parent_account<C: ClusterClient>(
    client: &C,
    object: &DeveloperUser,
    namespace: &str,
    provider: &ProviderAccount,
) -> Result<DeveloperAccount, ReconcileError> {
    let parent = client
        .get::<DeveloperAccount>(&object.spec.developer_account_ref.name, namespace)
        .await?
        .ok_or_else(|| orphan(object, "parent account resource not found"))?;

    let parent_provider =
        lookup_provider_account(client, namespace, parent.spec.provider_account_ref.as_ref())
            .await?;
    if parent_provider.admin_url != provider.admin_url {
        return Err(orphan(
            object,
            "parent account resource does not belong to the same provider account",
        ));
    }

    if !parent.is_ready() {
        return Err(orphan(object, "parent account resource not ready"));
    }

    Ok(parent)
}

/// Makes the portal user match the spec: created and activated when missing,
/// then email, role and suspension brought in line.
async fn sync_user<C: ClusterClient>(
    client: &C,
    portal: &dyn DeveloperPortal,
    object: &DeveloperUser,
    namespace: &str,
    account_id: i64,
) -> Result<PortalUser, ReconcileError> {
    let spec = &object.spec;

    let mut user = match portal.find_user(account_id, &spec.username).await? {
        Some(user) => user,
        None => {
            let name = &spec.password_credentials_ref.name;
            let secret = client
                .get::<Secret>(name, namespace)
                .await?
                .ok_or_else(|| {
                    ReconcileError::MissingObjectData(format!("Secret {namespace}/{name}").into())
                })?;
            let created = portal
                .create_user(
                    account_id,
                    &NewPortalUser {
                        username: spec.username.to_owned(),
                        email: spec.email.to_owned(),
                        password: read_secret_key(&secret, PASSWORD_KEY)?,
                    },
                )
                .await?;
            info!(
                "Created developer user '{}' (id {})",
                created.username, created.id
            );

            match created.is_active() {
                true => created,
                false => {
                    portal
                        .change_user(account_id, created.id, "activate")
                        .await?
                }
            }
        }
    };

    if user.email != spec.email {
        user = portal
            .update_user_email(account_id, user.id, &spec.email)
            .await?;
        info!("Updated the email of developer user '{}'", user.username);
    }

    if user.role != spec.role() {
        user = portal.change_user(account_id, user.id, spec.role()).await?;
        info!("Developer user '{}' is now {}", user.username, user.role);
    }

    match (spec.is_suspended(), user.is_suspended()) {
        (true, false) => {
            user = portal.change_user(account_id, user.id, "suspend").await?;
            info!("Suspended developer user '{}'", user.username);
        }
        (false, true) => {
            user = portal.change_user(account_id, user.id, "unsuspend").await?;
            info!("Unsuspended developer user '{}'", user.username);
        }
        _ => (),
    }

    Ok(user)
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeMap, time::Duration};

    use chrono::Utc;
    use kube::{core::ObjectMeta, runtime::events::EventType};
    use threescale_operator_core::{
        kubernetes::memory::InMemoryClusterClient,
        resources::{
            crd::{
                status::{REASON_INVALID_SPEC, REASON_ORPHAN, REASON_READY},
                v1beta1::{
                    developer_account::{DeveloperAccountSpec, DeveloperAccountStatus},
                    developer_user::DeveloperUserSpec,
                },
            },
            operator::OperatorRelease,
        },
    };

    use crate::{
        events::testing::RecordingEventPublisher,
        portal::testing::{FakeConnector, FakePortal},
    };

    use super::*;

    const ADMIN_URL: &str = "https://acme-admin.example.com";

    struct Fixture {
        context: Arc<ReconcilerContext<InMemoryClusterClient>>,
        events: Arc<RecordingEventPublisher>,
        portal: Arc<FakePortal>,
    }

    fn meta(name: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_owned()),
            namespace: Some("3scale".to_owned()),
            generation: Some(2),
            ..Default::default()
        }
    }

    fn secret(name: &str, entries: &[(&str, &str)]) -> Secret {
        Secret {
            metadata: meta(name),
            string_data: Some(
                entries
                    .iter()
                    .map(|(key, value)| (key.to_string(), value.to_string()))
                    .collect::<BTreeMap<_, _>>(),
            ),
            ..Default::default()
        }
    }

    fn developer_user(spec: serde_json::Value) -> DeveloperUser {
        let mut value = serde_json::json!({
            "username": "jane",
            "email": "jane@example.com",
            "passwordCredentialsRef": { "name": "jane-password" },
            "developerAccountRef": { "name": "acme" }
        });
        if let (Some(base), Some(extra)) = (value.as_object_mut(), spec.as_object()) {
            base.extend(extra.clone());
        }

        DeveloperUser {
            metadata: meta("jane"),
            spec: serde_json::from_value::<DeveloperUserSpec>(value).unwrap(),
            status: None,
        }
    }

    fn developer_account(ready: bool) -> DeveloperAccount {
        DeveloperAccount {
            metadata: meta("acme"),
            spec: DeveloperAccountSpec {
                org_name: "ACME".to_owned(),
                ..Default::default()
            },
            status: Some(DeveloperAccountStatus {
                condition: Some(ReadinessCondition::next(
                    None,
                    ready,
                    if ready { REASON_READY } else { REASON_ORPHAN },
                    String::new(),
                    Utc::now(),
                )),
                account_id: Some(7),
                ..Default::default()
            }),
        }
    }

    fn fixture(user: &DeveloperUser) -> Fixture {
        let client = InMemoryClusterClient::new();
        client.insert(user);
        client.insert(&secret(
            DEFAULT_PROVIDER_ACCOUNT_SECRET,
            &[(PROVIDER_ADMIN_URL_KEY, ADMIN_URL), (PROVIDER_TOKEN_KEY, "s3cr3t")],
        ));
        client.insert(&secret("jane-password", &[(PASSWORD_KEY, "hunter2")]));

        let events = Arc::new(RecordingEventPublisher::default());
        let portal = Arc::new(FakePortal::default());
        let context = Arc::new(ReconcilerContext::new(
            client,
            events.clone(),
            Arc::new(FakeConnector(portal.clone())),
            OperatorRelease::default(),
        ));

        Fixture {
            context,
            events,
            portal,
        }
    }

    fn stored_status(fixture: &Fixture) -> DeveloperUserStatus {
        fixture
            .context
            .client
            .fetch::<DeveloperUser>("jane", "3scale")
            .and_then(|user| user.status)
            .unwrap()
    }

    #[tokio::test]
    async fn new_users_are_created_activated_and_reported() {
        let user = developer_user(serde_json::json!({ "role": "admin" }));
        let fixture = fixture(&user);
        fixture.context.client.insert(&developer_account(true));

        let action = reconcile_developer_user(Arc::new(user), fixture.context.clone())
            .await
            .unwrap();

        assert_eq!(
            action,
            Action::requeue(fixture.context.config.resync_period)
        );
        assert_eq!(
            fixture.portal.actions(),
            vec!["create", "activate", "admin"]
        );
        let status = stored_status(&fixture);
        assert!(status.condition.unwrap().ready);
        assert_eq!(status.developer_user_id, Some(100));
        assert_eq!(status.developer_account_id, Some(7));
        assert_eq!(
            status.provider_account_host.as_deref(),
            Some("acme-admin.example.com")
        );
        assert_eq!(status.state.as_deref(), Some("active"));
        assert_eq!(status.observed_generation, Some(2));
    }

    #[tokio::test]
    async fn converged_users_are_left_alone() {
        let user = developer_user(serde_json::json!({}));
        let fixture = fixture(&user);
        fixture.context.client.insert(&developer_account(true));

        reconcile_developer_user(Arc::new(user.clone()), fixture.context.clone())
            .await
            .unwrap();
        reconcile_developer_user(Arc::new(user), fixture.context.clone())
            .await
            .unwrap();

        assert_eq!(fixture.portal.actions(), vec!["create", "activate"]);
    }

    #[tokio::test]
    async fn email_and_suspension_follow_the_spec() {
        let user = developer_user(serde_json::json!({}));
        let fixture = fixture(&user);
        fixture.context.client.insert(&developer_account(true));
        reconcile_developer_user(Arc::new(user), fixture.context.clone())
            .await
            .unwrap();

        let changed = developer_user(serde_json::json!({
            "email": "jane.doe@example.com",
            "suspended": true
        }));
        reconcile_developer_user(Arc::new(changed), fixture.context.clone())
            .await
            .unwrap();

        let remote = fixture.portal.user("jane").unwrap();
        assert_eq!(remote.email, "jane.doe@example.com");
        assert!(remote.is_suspended());
        assert_eq!(stored_status(&fixture).state.as_deref(), Some("suspended"));
    }

    #[tokio::test]
    async fn missing_parent_account_is_an_orphan_retried_immediately() {
        let user = developer_user(serde_json::json!({}));
        let fixture = fixture(&user);

        let action = reconcile_developer_user(Arc::new(user), fixture.context.clone())
            .await
            .unwrap();

        assert_eq!(action, Action::requeue(Duration::ZERO));
        let status = stored_status(&fixture);
        let condition = status.condition.unwrap();
        assert_eq!(condition.reason, REASON_ORPHAN);
        assert!(condition
            .message
            .contains("parent account resource not found"));
        assert_eq!(
            status.provider_account_host.as_deref(),
            Some("acme-admin.example.com")
        );
        assert_eq!(fixture.events.events()[0].type_, EventType::Normal);
        assert!(fixture.portal.actions().is_empty());
    }

    #[tokio::test]
    async fn parent_account_must_be_ready() {
        let user = developer_user(serde_json::json!({}));
        let fixture = fixture(&user);
        fixture.context.client.insert(&developer_account(false));

        reconcile_developer_user(Arc::new(user), fixture.context.clone())
            .await
            .unwrap();

        let condition = stored_status(&fixture).condition.unwrap();
        assert!(condition
            .message
            .contains("parent account resource not ready"));
    }

    #[tokio::test]
    async fn parent_account_of_another_provider_is_an_orphan() {
        let user = developer_user(serde_json::json!({}));
        let fixture = fixture(&user);
        let mut account = developer_account(true);
        account.spec.provider_account_ref = Some(LocalReference {
            name: "other-provider".to_owned(),
        });
        fixture.context.client.insert(&account);
        fixture.context.client.insert(&secret(
            "other-provider",
            &[
                (PROVIDER_ADMIN_URL_KEY, "https://other-admin.example.com"),
                (PROVIDER_TOKEN_KEY, "t0k3n"),
            ],
        ));

        reconcile_developer_user(Arc::new(user), fixture.context.clone())
            .await
            .unwrap();

        let condition = stored_status(&fixture).condition.unwrap();
        assert_eq!(condition.reason, REASON_ORPHAN);
        assert!(condition
            .message
            .contains("does not belong to the same provider account"));
    }

    #[tokio::test]
    async fn invalid_spec_is_reported_without_retry() {
        let user = developer_user(serde_json::json!({ "role": "owner" }));
        let fixture = fixture(&user);
        fixture.context.client.insert(&developer_account(true));

        let action = reconcile_developer_user(Arc::new(user), fixture.context.clone())
            .await
            .unwrap();

        assert_eq!(
            action,
            Action::requeue(fixture.context.config.resync_period)
        );
        let condition = stored_status(&fixture).condition.unwrap();
        assert_eq!(condition.reason, REASON_INVALID_SPEC);
        assert_eq!(fixture.events.events()[0].type_, EventType::Warning);
        assert!(fixture.portal.actions().is_empty());
    }

    #[tokio::test]
    async fn missing_provider_account_is_an_error() {
        let user = developer_user(serde_json::json!({
            "providerAccountRef": { "name": "missing" }
        }));
        let fixture = fixture(&user);

        let error = reconcile_developer_user(Arc::new(user), fixture.context.clone())
            .await
            .unwrap_err();

        assert!(matches!(error, ReconcileError::MissingObjectData(_)));
        assert!(!stored_status(&fixture).condition.unwrap().ready);
    }
}
