use std::collections::BTreeMap;

use k8s_openapi::{
    api::{
        apps::v1::Deployment,
        core::v1::{
            ConfigMap, Container, EnvVar, PersistentVolumeClaim, PersistentVolumeClaimSpec,
            ResourceRequirements, Secret, Service, ServicePort, ServiceSpec, Volume,
        },
        policy::v1::{PodDisruptionBudget, PodDisruptionBudgetSpec},
    },
    apimachinery::pkg::{
        api::resource::Quantity, apis::meta::v1::LabelSelector, util::intstr::IntOrString,
    },
};

use crate::resources::{
    crd::monitoring::{
        PodMetricsEndpoint, PodMonitor, PodMonitorSpec, PrometheusRule, PrometheusRuleSpec, Rule,
        RuleGroup,
    },
    labels::get_selector_labels,
    ResourceGenerationError,
};

use super::{
    generate_password,
    images::SYSTEM_STREAM,
    string_data,
    workloads::{
        claim_volume, config_map_volume, container, env, port, requirements, secret_env,
        volume_mount, WorkloadTemplate,
    },
    FileStorage, PlatformRelease,
};

pub const SYSTEM_APP: &str = "system-app";
pub const SYSTEM_SIDEKIQ: &str = "system-sidekiq";
pub const SYSTEM_SPHINX: &str = "system-sphinx";
pub const SYSTEM_STORAGE: &str = "system-storage";
pub const SYSTEM_CONFIG_MAP: &str = "system";
pub const SYSTEM_ENVIRONMENT_CONFIG_MAP: &str = "system-environment";

pub const SYSTEM_SMTP_SECRET: &str = "system-smtp";
pub const SYSTEM_EVENTS_HOOK_SECRET: &str = "system-events-hook";
pub const SYSTEM_MASTER_APICAST_SECRET: &str = "system-master-apicast";
pub const SYSTEM_SEED_SECRET: &str = "system-seed";
pub const SYSTEM_RECAPTCHA_SECRET: &str = "system-recaptcha";
pub const SYSTEM_APP_SECRET: &str = "system-app";
pub const SYSTEM_MEMCACHE_SECRET: &str = "system-memcache";

pub const AWS_ACCESS_KEY_ID: &str = "AWS_ACCESS_KEY_ID";
pub const AWS_SECRET_ACCESS_KEY: &str = "AWS_SECRET_ACCESS_KEY";
pub const AWS_BUCKET: &str = "AWS_BUCKET";
pub const AWS_REGION: &str = "AWS_REGION";

/// Keys a file storage configuration secret must carry.
pub const S3_REQUIRED_KEYS: [&str; 4] = [
    AWS_ACCESS_KEY_ID,
    AWS_SECRET_ACCESS_KEY,
    AWS_BUCKET,
    AWS_REGION,
];

/// Containers of the system app, in pod order.
pub const SYSTEM_APP_CONTAINERS: [&str; 3] =
    ["system-master", "system-provider", "system-developer"];

const UNICORN_ARGS: [&str; 6] = [
    "container-entrypoint",
    "bundle",
    "exec",
    "unicorn",
    "-c",
    "config/unicorn.rb",
];

const ZYNC_CONFIG: &str = r#"production:
  endpoint: 'http://zync:8080'
  authentication:
    token: "<%= ENV.fetch('ZYNC_AUTHENTICATION_TOKEN') %>"
  connect_timeout: 5
  send_timeout: 5
  receive_timeout: 10
  root_url:
"#;

const ROLLING_UPDATES_CONFIG: &str = r#"production:
  old_charts: false
  new_provider_documentation: false
  proxy_pro: false
  instant_bill_plan_change: false
  service_permissions: true
  async_apicast_deploy: false
  duplicate_application_id: true
  duplicate_user_key: true
  plan_changes_wizard: false
  require_cc_on_signup: false
  apicast_per_service: true
  new_notification_system: true
  cms_api: false
  apicast_v2: true
  forum: false
  published_service_plan_signup: true
  apicast_oidc: true
  policies: true
  proxy_private_base_path: true
"#;

const SERVICE_DISCOVERY_CONFIG: &str = r#"production:
  enabled: <%= cluster_token_file_exists = File.exists?(cluster_token_file_path = '/var/run/secrets/kubernetes.io/serviceaccount/token') %>
  server_scheme: 'https'
  server_host: 'kubernetes.default.svc.cluster.local'
  server_port: 443
  authentication_method: service_account
  oauth_server_type: builtin
  client_id: '3scale'
  client_secret: '3scale'
  timeout: 1
  open_timeout: 1
  max_retry: 5
  verify_ssl: <%= OpenSSL::SSL::VERIFY_NONE %>
  bearer_token: "<%= File.read(cluster_token_file_path) if cluster_token_file_exists %>"
"#;

/// Element label of a system deployment, `system-sidekiq` is `sidekiq`.
fn system_element(deployment: &str) -> &str {
    deployment.trim_start_matches("system-")
}

impl PlatformRelease {
    pub fn generate_system_shared_storage(&self) -> PersistentVolumeClaim {
        PersistentVolumeClaim {
            metadata: self.generate_metadata(SYSTEM_STORAGE, "system", "app"),
            spec: Some(PersistentVolumeClaimSpec {
                access_modes: Some(vec!["ReadWriteMany".to_owned()]),
                storage_class_name: self.storage_class_name.to_owned(),
                resources: Some(ResourceRequirements {
                    requests: Some(BTreeMap::from([(
                        "storage".to_owned(),
                        Quantity("100Mi".to_owned()),
                    )])),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn generate_system_service(
        &self,
        name: &str,
        element: &str,
        selector: &str,
        ports: Vec<ServicePort>,
    ) -> Service {
        Service {
            metadata: self.generate_metadata(name, "system", element),
            spec: Some(ServiceSpec {
                selector: Some(get_selector_labels(selector)),
                ports: Some(ports),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub fn generate_system_provider_service(&self) -> Service {
        self.generate_system_service(
            "system-provider",
            "provider-ui",
            SYSTEM_APP,
            vec![service_port("http", 3000, "provider")],
        )
    }

    pub fn generate_system_master_service(&self) -> Service {
        self.generate_system_service(
            "system-master",
            "master-ui",
            SYSTEM_APP,
            vec![service_port("http", 3000, "master")],
        )
    }

    pub fn generate_system_developer_service(&self) -> Service {
        self.generate_system_service(
            "system-developer",
            "developer-ui",
            SYSTEM_APP,
            vec![
                service_port("http", 3000, "developer"),
                service_port("https", 443, "developer"),
            ],
        )
    }

    pub fn generate_system_sphinx_service(&self) -> Service {
        self.generate_system_service(
            SYSTEM_SPHINX,
            "sphinx",
            SYSTEM_SPHINX,
            vec![service_port("sphinx", 9306, "sphinx")],
        )
    }

    pub fn generate_system_memcache_service(&self) -> Service {
        self.generate_system_service(
            "system-memcache",
            "memcache",
            "system-memcache",
            vec![service_port("memcache", 11211, "memcache")],
        )
    }

    fn system_common_env(&self) -> Vec<EnvVar> {
        let mut env = vec![
            secret_env("SECRET_KEY_BASE", SYSTEM_APP_SECRET, "SECRET_KEY_BASE"),
            secret_env("MEMCACHE_SERVERS", SYSTEM_MEMCACHE_SECRET, "SERVERS"),
            secret_env("REDIS_URL", "system-redis", "URL"),
            secret_env("REDIS_NAMESPACE", "system-redis", "NAMESPACE"),
            secret_env("REDIS_SENTINEL_HOSTS", "system-redis", "SENTINEL_HOSTS"),
            secret_env("REDIS_SENTINEL_ROLE", "system-redis", "SENTINEL_ROLE"),
            secret_env("DATABASE_URL", "system-database", "URL"),
            secret_env(
                "MASTER_ACCESS_TOKEN",
                SYSTEM_SEED_SECRET,
                "MASTER_ACCESS_TOKEN",
            ),
            secret_env(
                "APICAST_ACCESS_TOKEN",
                SYSTEM_MASTER_APICAST_SECRET,
                "ACCESS_TOKEN",
            ),
            secret_env(
                "EVENTS_SHARED_SECRET",
                SYSTEM_EVENTS_HOOK_SECRET,
                "PASSWORD",
            ),
            secret_env(
                "RECAPTCHA_PUBLIC_KEY",
                SYSTEM_RECAPTCHA_SECRET,
                "PUBLIC_KEY",
            ),
            secret_env(
                "RECAPTCHA_PRIVATE_KEY",
                SYSTEM_RECAPTCHA_SECRET,
                "PRIVATE_KEY",
            ),
            env("THINKING_SPHINX_ADDRESS", SYSTEM_SPHINX),
            env(
                "THINKING_SPHINX_CONFIGURATION_FILE",
                "db/sphinx/production.conf",
            ),
        ];

        if let FileStorage::S3 {
            configuration_secret,
        } = &self.file_storage
        {
            env.extend(
                S3_REQUIRED_KEYS
                    .iter()
                    .map(|key| secret_env(key, configuration_secret, key)),
            );
        }

        env
    }

    fn system_app_container(
        &self,
        name: &str,
        tenant_mode: Option<&str>,
        port_name: &str,
        port_number: i32,
    ) -> Container {
        let mut args = vec!["env".to_owned()];
        args.extend(tenant_mode.map(|mode| format!("TENANT_MODE={mode}")));
        args.push(format!("PORT={port_number}"));
        args.extend(UNICORN_ARGS.iter().map(|arg| arg.to_string()));

        let mut volume_mounts = vec![volume_mount("system-config", "/opt/system-extra-configs")];
        if self.file_storage == FileStorage::VolumeClaim {
            volume_mounts.push(volume_mount("system-storage", "/opt/system/public/system"));
        }

        Container {
            args: Some(args),
            env: Some(self.system_common_env()),
            ports: Some(vec![port(port_name, port_number)]),
            resources: Some(self.resources_or(self.workloads.system_app.as_ref(), || {
                requirements("50m", "600Mi", "1000m", "800Mi")
            })),
            volume_mounts: Some(volume_mounts),
            ..container(name, &self.images.system)
        }
    }

    fn system_volumes(&self) -> Vec<Volume> {
        let mut volumes = vec![config_map_volume("system-config", SYSTEM_CONFIG_MAP)];
        if self.file_storage == FileStorage::VolumeClaim {
            volumes.push(claim_volume("system-storage", SYSTEM_STORAGE));
        }

        volumes
    }

    /// The system app runs the master, provider and developer portals side
    /// by side, one container each.
    pub fn generate_system_app_deployment(&self) -> Result<Deployment, ResourceGenerationError> {
        let [master, provider, developer] = SYSTEM_APP_CONTAINERS;
        let containers = vec![
            self.system_app_container(master, Some("master"), "master", 3002),
            self.system_app_container(provider, Some("provider"), "provider", 3000),
            self.system_app_container(developer, None, "developer", 3001),
        ];

        self.generate_workload_deployment(
            WorkloadTemplate::new(SYSTEM_APP, "system", "app", SYSTEM_STREAM, containers)
                .with_overrides(self.workloads.system_app.as_ref())
                .with_volumes(self.system_volumes()),
        )
    }

    pub fn generate_system_sidekiq_deployment(
        &self,
    ) -> Result<Deployment, ResourceGenerationError> {
        let overrides = self.workloads.system_sidekiq.as_ref();
        let container = Container {
            args: Some(vec![
                "rake".to_owned(),
                "sidekiq:worker".to_owned(),
                "RAILS_MAX_THREADS=25".to_owned(),
            ]),
            env: Some(self.system_common_env()),
            ports: Some(vec![port("metrics", 9394)]),
            resources: Some(self.resources_or(overrides, || {
                requirements("100m", "500Mi", "1000m", "2Gi")
            })),
            volume_mounts: Some(match self.file_storage {
                FileStorage::VolumeClaim => vec![
                    volume_mount("system-config", "/opt/system-extra-configs"),
                    volume_mount("system-storage", "/opt/system/public/system"),
                ],
                FileStorage::S3 { .. } => {
                    vec![volume_mount("system-config", "/opt/system-extra-configs")]
                }
            }),
            ..container(SYSTEM_SIDEKIQ, &self.images.system)
        };

        self.generate_workload_deployment(
            WorkloadTemplate::new(
                SYSTEM_SIDEKIQ,
                "system",
                "sidekiq",
                SYSTEM_STREAM,
                vec![container],
            )
            .with_overrides(overrides)
            .with_volumes(self.system_volumes()),
        )
    }

    pub fn generate_system_sphinx_deployment(&self) -> Result<Deployment, ResourceGenerationError> {
        let overrides = self.workloads.system_sphinx.as_ref();
        let database = volume_mount("system-sphinx-database", "/opt/system/db/sphinx");
        let container = Container {
            args: Some(vec![
                "rake".to_owned(),
                "openshift:thinking_sphinx:start".to_owned(),
            ]),
            env: Some(vec![
                env("RAILS_ENV", "production"),
                env("THINKING_SPHINX_PORT", "9306"),
                env(
                    "THINKING_SPHINX_PID_FILE",
                    "/opt/system/db/sphinx/searchd.pid",
                ),
                secret_env("DATABASE_URL", "system-database", "URL"),
                secret_env("SECRET_KEY_BASE", SYSTEM_APP_SECRET, "SECRET_KEY_BASE"),
                secret_env("REDIS_URL", "system-redis", "URL"),
            ]),
            ports: Some(vec![port("sphinx", 9306)]),
            resources: Some(self.resources_or(overrides, || {
                requirements("80m", "250Mi", "1000m", "512Mi")
            })),
            volume_mounts: Some(vec![database]),
            ..container(SYSTEM_SPHINX, &self.images.system)
        };

        self.generate_workload_deployment(
            WorkloadTemplate::new(
                SYSTEM_SPHINX,
                "system",
                "sphinx",
                SYSTEM_STREAM,
                vec![container],
            )
            .with_overrides(overrides)
                .with_volumes(vec![Volume {
                    name: "system-sphinx-database".to_owned(),
                    empty_dir: Some(Default::default()),
                    ..Default::default()
                }]),
        )
    }

    pub fn generate_system_config_map(&self) -> ConfigMap {
        ConfigMap {
            metadata: self.generate_metadata(SYSTEM_CONFIG_MAP, "system", "app"),
            data: Some(BTreeMap::from([
                ("zync.yml".to_owned(), ZYNC_CONFIG.to_owned()),
                (
                    "rolling_updates.yml".to_owned(),
                    ROLLING_UPDATES_CONFIG.to_owned(),
                ),
                (
                    "service_discovery.yml".to_owned(),
                    SERVICE_DISCOVERY_CONFIG.to_owned(),
                ),
            ])),
            ..Default::default()
        }
    }

    pub fn generate_system_environment_config_map(&self) -> ConfigMap {
        ConfigMap {
            metadata: self.generate_metadata(SYSTEM_ENVIRONMENT_CONFIG_MAP, "system", "app"),
            data: Some(string_data(&[
                ("AMP_RELEASE", self.product_version.to_owned()),
                ("APICAST_REGISTRY_URL", "http://apicast-staging:8090/policies".to_owned()),
                ("FORCE_SSL", "true".to_owned()),
                ("PROVIDER_PLAN", "enterprise".to_owned()),
                ("RAILS_ENV", "production".to_owned()),
                ("RAILS_LOG_LEVEL", "info".to_owned()),
                ("RAILS_LOG_TO_STDOUT", "true".to_owned()),
                ("SSL_CERT_DIR", "/etc/pki/tls/certs".to_owned()),
                ("THINKING_SPHINX_PORT", "9306".to_owned()),
                ("THREESCALE_SANDBOX_PROXY_OPENSSL_VERIFY_MODE", "VERIFY_NONE".to_owned()),
                ("THREESCALE_SUPERDOMAIN", self.wildcard_domain.to_owned()),
            ])),
            ..Default::default()
        }
    }

    fn generate_system_secret(&self, name: &str, data: &[(&str, String)]) -> Secret {
        Secret {
            metadata: self.generate_metadata(name, "system", "app"),
            string_data: Some(string_data(data)),
            type_: Some("Opaque".to_owned()),
            ..Default::default()
        }
    }

    pub fn generate_system_smtp_secret(&self) -> Secret {
        self.generate_system_secret(
            SYSTEM_SMTP_SECRET,
            &[
                ("address", String::new()),
                ("authentication", String::new()),
                ("domain", String::new()),
                ("openssl.verify.mode", String::new()),
                ("password", String::new()),
                ("port", String::new()),
                ("username", String::new()),
            ],
        )
    }

    pub fn generate_system_events_hook_secret(&self) -> Secret {
        self.generate_system_secret(
            SYSTEM_EVENTS_HOOK_SECRET,
            &[
                ("URL", "http://system-master:3000/master/events/import".to_owned()),
                ("PASSWORD", generate_password(8)),
            ],
        )
    }

    pub fn generate_system_master_apicast_secret(&self) -> Secret {
        self.generate_system_secret(
            SYSTEM_MASTER_APICAST_SECRET,
            &[
                ("ACCESS_TOKEN", generate_password(8)),
                ("BASE_URL", format!("http://{}@system-master:3000", generate_password(8))),
            ],
        )
    }

    pub fn generate_system_seed_secret(&self) -> Secret {
        self.generate_system_secret(
            SYSTEM_SEED_SECRET,
            &[
                ("MASTER_DOMAIN", "master".to_owned()),
                ("MASTER_USER", "master".to_owned()),
                ("MASTER_PASSWORD", generate_password(8)),
                ("MASTER_ACCESS_TOKEN", generate_password(8)),
                ("TENANT_NAME", self.tenant_name.to_owned()),
                ("ADMIN_USER", "admin".to_owned()),
                ("ADMIN_PASSWORD", generate_password(8)),
                ("ADMIN_ACCESS_TOKEN", generate_password(16)),
                ("ADMIN_EMAIL", String::new()),
            ],
        )
    }

    pub fn generate_system_recaptcha_secret(&self) -> Secret {
        self.generate_system_secret(
            SYSTEM_RECAPTCHA_SECRET,
            &[("PUBLIC_KEY", String::new()), ("PRIVATE_KEY", String::new())],
        )
    }

    pub fn generate_system_app_secret(&self) -> Secret {
        self.generate_system_secret(
            SYSTEM_APP_SECRET,
            &[("SECRET_KEY_BASE", generate_password(128))],
        )
    }

    pub fn generate_system_memcache_secret(&self) -> Secret {
        self.generate_system_secret(
            SYSTEM_MEMCACHE_SECRET,
            &[("SERVERS", "system-memcache:11211".to_owned())],
        )
    }

    pub fn generate_system_pod_disruption_budget(&self, deployment: &str) -> PodDisruptionBudget {
        PodDisruptionBudget {
            metadata: self.generate_metadata(deployment, "system", system_element(deployment)),
            spec: Some(PodDisruptionBudgetSpec {
                selector: Some(LabelSelector {
                    match_expressions: None,
                    match_labels: Some(get_selector_labels(deployment)),
                }),
                max_unavailable: Some(IntOrString::Int(1)),
                min_available: None,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub fn generate_system_app_pod_disruption_budget(&self) -> PodDisruptionBudget {
        self.generate_system_pod_disruption_budget(SYSTEM_APP)
    }

    pub fn generate_system_sidekiq_pod_disruption_budget(&self) -> PodDisruptionBudget {
        self.generate_system_pod_disruption_budget(SYSTEM_SIDEKIQ)
    }

    fn generate_system_pod_monitor(&self, deployment: &str, ports: &[&str]) -> PodMonitor {
        PodMonitor {
            metadata: self.generate_metadata(deployment, "system", system_element(deployment)),
            spec: PodMonitorSpec {
                selector: LabelSelector {
                    match_expressions: None,
                    match_labels: Some(get_selector_labels(deployment)),
                },
                pod_metrics_endpoints: ports
                    .iter()
                    .map(|port| PodMetricsEndpoint {
                        port: Some(port.to_string()),
                        path: Some("/metrics".to_owned()),
                        scheme: Some("http".to_owned()),
                        interval: Some("30s".to_owned()),
                    })
                    .collect(),
                job_label: None,
            },
        }
    }

    pub fn generate_system_app_pod_monitor(&self) -> PodMonitor {
        self.generate_system_pod_monitor(SYSTEM_APP, &["master", "provider", "developer"])
    }

    pub fn generate_system_sidekiq_pod_monitor(&self) -> PodMonitor {
        self.generate_system_pod_monitor(SYSTEM_SIDEKIQ, &["metrics"])
    }

    fn generate_system_prometheus_rule(
        &self,
        deployment: &str,
        rules: Vec<Rule>,
    ) -> PrometheusRule {
        PrometheusRule {
            metadata: self.generate_metadata(deployment, "system", system_element(deployment)),
            spec: PrometheusRuleSpec {
                groups: vec![RuleGroup {
                    name: format!("{}/{deployment}.rules", self.namespace),
                    rules,
                }],
            },
        }
    }

    pub fn generate_system_app_prometheus_rule(&self) -> PrometheusRule {
        let namespace = &self.namespace;

        self.generate_system_prometheus_rule(
            SYSTEM_APP,
            vec![
                alert(
                    "ThreescaleSystemApp5XXRequestsHigh",
                    format!("sum(rate(rails_requests_total{{namespace='{namespace}',pod=~'system-app-[a-z0-9]+-[a-z0-9]+',status=~'5[0-9]*'}}[1m])) by (namespace,job) > 50"),
                    "critical",
                    "Job {{ $labels.job }} on {{ $labels.namespace }} has more than 50 HTTP 5xx requests per minute",
                ),
                alert(
                    "ThreescaleSystemAppJobDown",
                    format!("up{{job=~\".*system-app.*\",namespace=\"{namespace}\"}} == 0"),
                    "critical",
                    "Job {{ $labels.job }} on {{ $labels.namespace }} is DOWN",
                ),
            ],
        )
    }

    pub fn generate_system_sidekiq_prometheus_rule(&self) -> PrometheusRule {
        let namespace = &self.namespace;

        self.generate_system_prometheus_rule(
            SYSTEM_SIDEKIQ,
            vec![alert(
                "ThreescaleSystemSidekiqJobDown",
                format!("up{{job=~\".*system-sidekiq.*\",namespace=\"{namespace}\"}} == 0"),
                "critical",
                "Job {{ $labels.job }} on {{ $labels.namespace }} is DOWN",
            )],
        )
    }
}

fn service_port(name: &str, port: i32, target: &str) -> ServicePort {
    ServicePort {
        name: Some(name.to_owned()),
        port,
        protocol: Some("TCP".to_owned()),
        target_port: Some(IntOrString::String(target.to_owned())),
        ..Default::default()
    }
}

fn alert(name: &str, expr: String, severity: &str, description: &str) -> Rule {
    Rule {
        alert: Some(name.to_owned()),
        expr,
        for_: Some("5m".to_owned()),
        labels: Some(BTreeMap::from([("severity".to_owned(), severity.to_owned())])),
        annotations: Some(BTreeMap::from([
            ("summary".to_owned(), description.to_owned()),
            ("description".to_owned(), description.to_owned()),
        ])),
    }
}
