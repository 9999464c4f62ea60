use std::collections::BTreeMap;

use k8s_openapi::{
    api::{
        apps::v1::{Deployment, DeploymentSpec, DeploymentStrategy},
        core::v1::{
            ConfigMapVolumeSource, Container, ContainerPort, EnvVar, EnvVarSource,
            PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec, ResourceRequirements,
            SecretKeySelector, Volume, VolumeMount,
        },
    },
    apimachinery::pkg::{api::resource::Quantity, apis::meta::v1::LabelSelector},
};
use kube::core::ObjectMeta;

use crate::resources::{
    crd::v1alpha1::api_manager::WorkloadSpec,
    labels::{get_metering_labels, get_selector_labels, SubcomponentType},
    triggers::{write_image_triggers, ImageTrigger},
    ResourceGenerationError,
};

use super::{
    images::{
        APICAST_STREAM, BACKEND_STREAM, MEMCACHED_STREAM, SYSTEM_MYSQL_STREAM,
        SYSTEM_POSTGRESQL_STREAM, ZYNC_DATABASE_STREAM, ZYNC_STREAM,
    },
    PlatformRelease,
};

pub const APICAST_STAGING: &str = "apicast-staging";
pub const APICAST_PRODUCTION: &str = "apicast-production";
pub const BACKEND_LISTENER: &str = "backend-listener";
pub const BACKEND_WORKER: &str = "backend-worker";
pub const BACKEND_CRON: &str = "backend-cron";
pub const ZYNC: &str = "zync";
pub const ZYNC_QUE: &str = "zync-que";
pub const ZYNC_DATABASE: &str = "zync-database";
pub const SYSTEM_MEMCACHE: &str = "system-memcache";
pub const SYSTEM_MYSQL: &str = "system-mysql";
pub const SYSTEM_POSTGRESQL: &str = "system-postgresql";

pub const MYSQL_EXTRA_CONFIG_MAP: &str = "mysql-extra-conf";
pub const MYSQL_MAIN_CONFIG_MAP: &str = "mysql-main-conf";
pub const SYSTEM_DATABASE_SECRET: &str = "system-database";
pub const BACKEND_REDIS_SECRET: &str = "backend-redis";
pub const ZYNC_SECRET: &str = "zync";

const WAIT_FOR_REDIS: &str =
    "until rake connectivity:redis_storage_queue_check; do sleep $SLEEP_SECONDS; done";

/// Shape of one platform deployment before the common parts are filled in.
#[derive(Debug, Clone)]
pub struct WorkloadTemplate<'a> {
    pub name: &'a str,
    pub component: &'a str,
    pub element: &'a str,
    pub subcomponent_type: SubcomponentType,
    /// image stream the deployment follows
    pub stream: &'a str,
    pub containers: Vec<Container>,
    pub init_containers: Option<Vec<Container>>,
    pub volumes: Option<Vec<Volume>>,
    pub replicas: i32,
    pub overrides: Option<&'a WorkloadSpec>,
    pub recreate: bool,
}

impl<'a> WorkloadTemplate<'a> {
    pub fn new(
        name: &'a str,
        component: &'a str,
        element: &'a str,
        stream: &'a str,
        containers: Vec<Container>,
    ) -> Self {
        Self {
            name,
            component,
            element,
            subcomponent_type: SubcomponentType::Application,
            stream,
            containers,
            init_containers: None,
            volumes: None,
            replicas: 1,
            overrides: None,
            recreate: false,
        }
    }

    pub fn infrastructure(self) -> Self {
        Self {
            subcomponent_type: SubcomponentType::Infrastructure,
            recreate: true,
            ..self
        }
    }

    pub fn with_overrides(self, overrides: Option<&'a WorkloadSpec>) -> Self {
        Self { overrides, ..self }
    }

    pub fn with_volumes(self, volumes: Vec<Volume>) -> Self {
        Self {
            volumes: Some(volumes),
            ..self
        }
    }

    pub fn with_init_containers(self, init_containers: Vec<Container>) -> Self {
        Self {
            init_containers: Some(init_containers),
            ..self
        }
    }
}

impl PlatformRelease {
    pub fn generate_pod_template_labels(
        &self,
        name: &str,
        component: &str,
        element: &str,
        subcomponent_type: SubcomponentType,
    ) -> BTreeMap<String, String> {
        let mut labels = self.generate_metadata(name, component, element)
            .labels
            .unwrap_or_default();
        labels.extend(get_selector_labels(name));
        labels.extend(get_metering_labels(
            component,
            element,
            &self.product_version,
            subcomponent_type,
        ));

        labels
    }

    /// Deployment following `stream` through a single image change trigger.
    pub fn generate_workload_deployment(
        &self,
        template: WorkloadTemplate,
    ) -> Result<Deployment, ResourceGenerationError> {
        let overrides = template.overrides;
        let stream_tag = self.get_stream_tag(template.stream);
        let trigger = match template.containers.as_slice() {
            [single] => ImageTrigger::image_change(stream_tag, &single.name),
            _ => ImageTrigger::image_change_all_containers(stream_tag),
        };

        let mut deployment = Deployment {
            metadata: self.generate_metadata(template.name, template.component, template.element),
            spec: Some(DeploymentSpec {
                replicas: Some(
                    overrides
                        .and_then(|workload| workload.replicas)
                        .unwrap_or(template.replicas),
                ),
                selector: LabelSelector {
                    match_expressions: None,
                    match_labels: Some(get_selector_labels(template.name)),
                },
                strategy: template.recreate.then(|| DeploymentStrategy {
                    type_: Some("Recreate".to_owned()),
                    rolling_update: None,
                }),
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(self.generate_pod_template_labels(
                            template.name,
                            template.component,
                            template.element,
                            template.subcomponent_type,
                        )),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        affinity: overrides.and_then(|workload| workload.affinity.to_owned()),
                        tolerations: overrides.and_then(|workload| workload.tolerations.to_owned()),
                        containers: template.containers,
                        init_containers: template.init_containers,
                        volumes: template.volumes,
                        service_account_name: Some("amp".to_owned()),
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        };

        write_image_triggers(&mut deployment, &[trigger])
            .map_err(ResourceGenerationError::TriggerSerialization)?;

        Ok(deployment)
    }

    pub fn generate_apicast_staging_deployment(
        &self,
    ) -> Result<Deployment, ResourceGenerationError> {
        self.generate_apicast_deployment(APICAST_STAGING, "staging", "lazy", "none")
    }

    pub fn generate_apicast_production_deployment(
        &self,
    ) -> Result<Deployment, ResourceGenerationError> {
        self.generate_apicast_deployment(APICAST_PRODUCTION, "production", "boot", "300")
    }

    fn generate_apicast_deployment(
        &self,
        name: &str,
        environment: &str,
        loader: &str,
        cache: &str,
    ) -> Result<Deployment, ResourceGenerationError> {
        let container = Container {
            env: Some(vec![
                env("APICAST_CONFIGURATION_LOADER", loader),
                env("APICAST_CONFIGURATION_CACHE", cache),
                env("THREESCALE_DEPLOYMENT_ENV", environment),
                env("APICAST_MANAGEMENT_API", "status"),
                env("OPENSSL_VERIFY", "false"),
                env("APICAST_RESPONSE_CODES", "true"),
                secret_env(
                    "THREESCALE_PORTAL_ENDPOINT",
                    "apicast-environment",
                    "THREESCALE_PORTAL_ENDPOINT",
                ),
            ]),
            ports: Some(vec![
                port("proxy", 8080),
                port("management", 8090),
                port("metrics", 9421),
            ]),
            resources: Some(self.resources_or(None, || {
                requirements("50m", "64Mi", "100m", "128Mi")
            })),
            ..container(name, &self.images.apicast)
        };

        self.generate_workload_deployment(WorkloadTemplate::new(
            name,
            "apicast",
            environment,
            APICAST_STREAM,
            vec![container],
        ))
    }

    pub fn generate_backend_listener_deployment(
        &self,
    ) -> Result<Deployment, ResourceGenerationError> {
        let container = Container {
            args: Some(vec![
                "bin/3scale_backend".to_owned(),
                "start".to_owned(),
                "-e".to_owned(),
                "production".to_owned(),
                "-p".to_owned(),
                "3000".to_owned(),
                "-x".to_owned(),
                "/dev/stdout".to_owned(),
            ]),
            env: Some(backend_redis_env()),
            ports: Some(vec![port("http", 3000)]),
            resources: Some(self.resources_or(None, || {
                requirements("500m", "550Mi", "1", "700Mi")
            })),
            ..container(BACKEND_LISTENER, &self.images.backend)
        };

        self.generate_workload_deployment(WorkloadTemplate::new(
            BACKEND_LISTENER,
            "backend",
            "listener",
            BACKEND_STREAM,
            vec![container],
        ))
    }

    pub fn generate_backend_worker_deployment(
        &self,
    ) -> Result<Deployment, ResourceGenerationError> {
        let container = Container {
            args: Some(vec!["bin/3scale_backend_worker".to_owned(), "run".to_owned()]),
            env: Some(backend_redis_env()),
            resources: Some(self.resources_or(None, || requirements("150m", "50Mi", "1", "300Mi"))),
            ..container(BACKEND_WORKER, &self.images.backend)
        };

        self.generate_workload_deployment(
            WorkloadTemplate::new(
                BACKEND_WORKER,
                "backend",
                "worker",
                BACKEND_STREAM,
                vec![container],
            )
            .with_init_containers(vec![wait_for_redis(&self.images.backend)]),
        )
    }

    pub fn generate_backend_cron_deployment(
        &self,
    ) -> Result<Deployment, ResourceGenerationError> {
        let container = Container {
            args: Some(vec!["backend-cron".to_owned()]),
            env: Some(backend_redis_env()),
            resources: Some(self.resources_or(None, || {
                requirements("50m", "40Mi", "150m", "80Mi")
            })),
            ..container(BACKEND_CRON, &self.images.backend)
        };

        self.generate_workload_deployment(
            WorkloadTemplate::new(
                BACKEND_CRON,
                "backend",
                "cron",
                BACKEND_STREAM,
                vec![container],
            )
            .with_init_containers(vec![wait_for_redis(&self.images.backend)]),
        )
    }

    pub fn generate_zync_deployment(&self) -> Result<Deployment, ResourceGenerationError> {
        let container = Container {
            env: Some(zync_env()),
            ports: Some(vec![port("http", 8080), port("metrics", 9393)]),
            resources: Some(self.resources_or(None, || requirements("150m", "250M", "1", "512Mi"))),
            ..container(ZYNC, &self.images.zync)
        };

        self.generate_workload_deployment(WorkloadTemplate::new(
            ZYNC,
            "zync",
            "zync",
            ZYNC_STREAM,
            vec![container],
        ))
    }

    pub fn generate_zync_que_deployment(&self) -> Result<Deployment, ResourceGenerationError> {
        let container = Container {
            args: Some(vec!["exec".to_owned(), "rails".to_owned(), "que".to_owned()]),
            command: Some(vec!["/usr/bin/bash".to_owned()]),
            env: Some(zync_env()),
            ports: Some(vec![port("metrics", 9394)]),
            resources: Some(self.resources_or(None, || requirements("250m", "250M", "1", "512Mi"))),
            ..container(ZYNC_QUE, &self.images.zync)
        };

        self.generate_workload_deployment(WorkloadTemplate::new(
            ZYNC_QUE,
            "zync",
            "zync-que",
            ZYNC_STREAM,
            vec![container],
        ))
    }

    pub fn generate_zync_database_deployment(&self) -> Result<Deployment, ResourceGenerationError> {
        let container = Container {
            env: Some(vec![
                env("POSTGRESQL_USER", "zync"),
                env("POSTGRESQL_DATABASE", "zync_production"),
                secret_env("POSTGRESQL_PASSWORD", ZYNC_SECRET, "ZYNC_DATABASE_PASSWORD"),
            ]),
            ports: Some(vec![port("postgresql", 5432)]),
            resources: Some(self.resources_or(None, || requirements("50m", "250M", "250m", "2G"))),
            volume_mounts: Some(vec![volume_mount("zync-database-data", "/var/lib/pgsql/data")]),
            ..container("postgresql", &self.images.zync_postgresql)
        };

        self.generate_workload_deployment(
            WorkloadTemplate::new(
                ZYNC_DATABASE,
                "zync",
                "database",
                ZYNC_DATABASE_STREAM,
                vec![container],
            )
            .infrastructure()
            .with_volumes(vec![Volume {
                name: "zync-database-data".to_owned(),
                empty_dir: Some(Default::default()),
                ..Default::default()
            }]),
        )
    }

    pub fn generate_memcached_deployment(
        &self,
    ) -> Result<Deployment, ResourceGenerationError> {
        let container = Container {
            command: Some(vec!["memcached".to_owned(), "-m".to_owned(), "64".to_owned()]),
            ports: Some(vec![port("memcache", 11211)]),
            resources: Some(self.resources_or(None, || {
                requirements("50m", "64Mi", "250m", "96Mi")
            })),
            ..container("memcache", &self.images.memcached)
        };

        self.generate_workload_deployment(
            WorkloadTemplate::new(
                SYSTEM_MEMCACHE,
                "system",
                "memcache",
                MEMCACHED_STREAM,
                vec![container],
            )
            .infrastructure(),
        )
    }

    pub fn generate_system_mysql_deployment(
        &self,
    ) -> Result<Deployment, ResourceGenerationError> {
        let overrides = self.workloads.system_database.as_ref();
        let container = Container {
            env: Some(vec![
                secret_env("MYSQL_USER", SYSTEM_DATABASE_SECRET, "DB_USER"),
                secret_env("MYSQL_PASSWORD", SYSTEM_DATABASE_SECRET, "DB_PASSWORD"),
                env("MYSQL_DATABASE", "system"),
                secret_env(
                    "MYSQL_ROOT_PASSWORD",
                    SYSTEM_DATABASE_SECRET,
                    "DB_ROOT_PASSWORD",
                ),
                env("MYSQL_DEFAULTS_FILE", "/etc/my-extra/my.cnf"),
            ]),
            ports: Some(vec![port("mysql", 3306)]),
            resources: Some(self.resources_or(overrides, || {
                requirements("250m", "512Mi", "1", "2Gi")
            })),
            volume_mounts: Some(vec![
                volume_mount("mysql-storage", "/var/lib/mysql/data"),
                volume_mount("mysql-extra-conf", "/etc/my-extra.d"),
                volume_mount("mysql-main-conf", "/etc/my-extra"),
            ]),
            ..container(SYSTEM_MYSQL, &self.images.system_mysql)
        };

        self.generate_workload_deployment(
            WorkloadTemplate::new(
                SYSTEM_MYSQL,
                "system",
                "mysql",
                SYSTEM_MYSQL_STREAM,
                vec![container],
            )
            .infrastructure()
            .with_overrides(overrides)
            .with_volumes(vec![
                claim_volume("mysql-storage", "mysql-storage"),
                config_map_volume("mysql-extra-conf", MYSQL_EXTRA_CONFIG_MAP),
                config_map_volume("mysql-main-conf", MYSQL_MAIN_CONFIG_MAP),
            ]),
        )
    }

    pub fn generate_system_postgresql_deployment(
        &self,
    ) -> Result<Deployment, ResourceGenerationError> {
        let overrides = self.workloads.system_database.as_ref();
        let container = Container {
            env: Some(vec![
                secret_env("POSTGRESQL_USER", SYSTEM_DATABASE_SECRET, "DB_USER"),
                secret_env("POSTGRESQL_PASSWORD", SYSTEM_DATABASE_SECRET, "DB_PASSWORD"),
                env("POSTGRESQL_DATABASE", "system"),
            ]),
            ports: Some(vec![port("postgresql", 5432)]),
            resources: Some(self.resources_or(overrides, || {
                requirements("250m", "512Mi", "1", "2Gi")
            })),
            volume_mounts: Some(vec![volume_mount("postgresql-data", "/var/lib/pgsql/data")]),
            ..container(SYSTEM_POSTGRESQL, &self.images.system_postgresql)
        };

        self.generate_workload_deployment(
            WorkloadTemplate::new(
                SYSTEM_POSTGRESQL,
                "system",
                "postgresql",
                SYSTEM_POSTGRESQL_STREAM,
                vec![container],
            )
            .infrastructure()
            .with_overrides(overrides)
            .with_volumes(vec![claim_volume("postgresql-data", "postgresql-data")]),
        )
    }

    /// Every deployment of the platform, skipping the external dependencies.
    pub fn generate_all_deployments(&self) -> Result<Vec<Deployment>, ResourceGenerationError> {
        let mut deployments = vec![
            self.generate_apicast_staging_deployment()?,
            self.generate_apicast_production_deployment()?,
            self.generate_backend_listener_deployment()?,
            self.generate_backend_worker_deployment()?,
            self.generate_backend_cron_deployment()?,
            self.generate_zync_deployment()?,
            self.generate_zync_que_deployment()?,
            self.generate_memcached_deployment()?,
            self.generate_system_app_deployment()?,
            self.generate_system_sidekiq_deployment()?,
            self.generate_system_sphinx_deployment()?,
        ];

        if !self.external.system_redis {
            deployments.push(self.generate_system_redis_deployment()?);
        }
        if !self.external.backend_redis {
            deployments.push(self.generate_backend_redis_deployment()?);
        }
        if self.is_system_postgresql_enabled() {
            deployments.push(self.generate_system_postgresql_deployment()?);
        }
        if self.is_system_mysql_enabled() {
            deployments.push(self.generate_system_mysql_deployment()?);
        }
        if !self.external.zync_database {
            deployments.push(self.generate_zync_database_deployment()?);
        }

        Ok(deployments)
    }
}

pub fn container(name: &str, image: &str) -> Container {
    Container {
        name: name.to_owned(),
        image: Some(image.to_owned()),
        image_pull_policy: Some("IfNotPresent".to_owned()),
        ..Default::default()
    }
}

pub fn env(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_owned(),
        value: Some(value.to_owned()),
        value_from: None,
    }
}

pub fn secret_env(name: &str, secret: &str, key: &str) -> EnvVar {
    EnvVar {
        name: name.to_owned(),
        value: None,
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: Some(secret.to_owned()),
                key: key.to_owned(),
                optional: None,
            }),
            ..Default::default()
        }),
    }
}

pub fn port(name: &str, container_port: i32) -> ContainerPort {
    ContainerPort {
        name: Some(name.to_owned()),
        container_port,
        protocol: Some("TCP".to_owned()),
        ..Default::default()
    }
}

pub fn volume_mount(name: &str, mount_path: &str) -> VolumeMount {
    VolumeMount {
        name: name.to_owned(),
        mount_path: mount_path.to_owned(),
        ..Default::default()
    }
}

pub fn claim_volume(name: &str, claim: &str) -> Volume {
    Volume {
        name: name.to_owned(),
        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
            claim_name: claim.to_owned(),
            read_only: None,
        }),
        ..Default::default()
    }
}

pub fn config_map_volume(name: &str, config_map: &str) -> Volume {
    Volume {
        name: name.to_owned(),
        config_map: Some(ConfigMapVolumeSource {
            name: Some(config_map.to_owned()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn requirements(
    cpu_request: &str,
    memory_request: &str,
    cpu_limit: &str,
    memory_limit: &str,
) -> ResourceRequirements {
    ResourceRequirements {
        requests: Some(BTreeMap::from([
            ("cpu".to_owned(), Quantity(cpu_request.to_owned())),
            ("memory".to_owned(), Quantity(memory_request.to_owned())),
        ])),
        limits: Some(BTreeMap::from([
            ("cpu".to_owned(), Quantity(cpu_limit.to_owned())),
            ("memory".to_owned(), Quantity(memory_limit.to_owned())),
        ])),
        ..Default::default()
    }
}

fn backend_redis_env() -> Vec<EnvVar> {
    vec![
        secret_env(
            "CONFIG_REDIS_PROXY",
            BACKEND_REDIS_SECRET,
            "REDIS_STORAGE_URL",
        ),
        secret_env(
            "CONFIG_QUEUES_MASTER_NAME",
            BACKEND_REDIS_SECRET,
            "REDIS_QUEUES_URL",
        ),
        env("RACK_ENV", "production"),
        env("PUMA_WORKERS", "16"),
    ]
}

fn zync_env() -> Vec<EnvVar> {
    vec![
        env("RAILS_LOG_TO_STDOUT", "true"),
        env("RAILS_ENV", "production"),
        secret_env("DATABASE_URL", ZYNC_SECRET, "DATABASE_URL"),
        secret_env("SECRET_KEY_BASE", ZYNC_SECRET, "SECRET_KEY_BASE"),
        secret_env(
            "ZYNC_AUTHENTICATION_TOKEN",
            ZYNC_SECRET,
            "ZYNC_AUTHENTICATION_TOKEN",
        ),
    ]
}

fn wait_for_redis(image: &str) -> Container {
    Container {
        command: Some(vec![
            "/opt/app/entrypoint.sh".to_owned(),
            "sh".to_owned(),
            "-c".to_owned(),
            WAIT_FOR_REDIS.to_owned(),
        ]),
        env: Some(vec![
            secret_env(
                "CONFIG_QUEUES_MASTER_NAME",
                BACKEND_REDIS_SECRET,
                "REDIS_QUEUES_URL",
            ),
            env("SLEEP_SECONDS", "1"),
        ]),
        ..container("backend-redis-svc", image)
    }
}
