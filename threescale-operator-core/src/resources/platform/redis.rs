use std::collections::BTreeMap;

use k8s_openapi::{
    api::{
        apps::v1::Deployment,
        core::v1::{
            ConfigMap, Container, PersistentVolumeClaim, PersistentVolumeClaimSpec,
            ResourceRequirements, Secret, Service, ServicePort, ServiceSpec,
        },
    },
    apimachinery::pkg::{api::resource::Quantity, util::intstr::IntOrString},
};

use crate::resources::{
    crd::{openshift::ImageStream, v1alpha1::api_manager::WorkloadSpec},
    labels::get_selector_labels,
    ResourceGenerationError,
};

use super::{
    images::{BACKEND_REDIS_STREAM, SYSTEM_REDIS_STREAM},
    string_data,
    workloads::{
        claim_volume, config_map_volume, container, port, requirements, volume_mount,
        WorkloadTemplate,
    },
    PlatformRelease,
};

pub const REDIS_CONFIG_MAP: &str = "redis-config";
pub const BACKEND_REDIS: &str = "backend-redis";
pub const SYSTEM_REDIS: &str = "system-redis";
pub const SYSTEM_REDIS_SECRET: &str = "system-redis";

const REDIS_CONFIG: &str = "protected-mode no

port 6379

timeout 0
tcp-keepalive 300

daemonize no
supervised no

loglevel notice

databases 16

save 900 1
save 300 10
save 60 10000

stop-writes-on-bgsave-error yes

rdbcompression yes
rdbchecksum yes

dbfilename dump.rdb

slave-serve-stale-data yes
slave-read-only yes

repl-diskless-sync no
repl-disable-tcp-nodelay no

appendonly yes
appendfilename \"appendonly.aof\"
appendfsync everysec
no-appendfsync-on-rewrite no
auto-aof-rewrite-percentage 100
auto-aof-rewrite-min-size 64mb
aof-load-truncated yes

lua-time-limit 5000

activerehashing no

aof-rewrite-incremental-fsync yes
dir /var/lib/redis/data
";

/// Which of the two redis instances of the platform to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedisFlavor {
    Backend,
    System,
}

impl RedisFlavor {
    pub fn name(&self) -> &'static str {
        match self {
            RedisFlavor::Backend => BACKEND_REDIS,
            RedisFlavor::System => SYSTEM_REDIS,
        }
    }

    pub fn component(&self) -> &'static str {
        match self {
            RedisFlavor::Backend => "backend",
            RedisFlavor::System => "system",
        }
    }

    pub fn stream(&self) -> &'static str {
        match self {
            RedisFlavor::Backend => BACKEND_REDIS_STREAM,
            RedisFlavor::System => SYSTEM_REDIS_STREAM,
        }
    }

    pub fn claim_name(&self) -> String {
        format!("{}-storage", self.name())
    }
}

impl PlatformRelease {
    fn redis_overrides(&self, flavor: RedisFlavor) -> Option<&WorkloadSpec> {
        match flavor {
            RedisFlavor::Backend => self.workloads.backend_redis.as_ref(),
            RedisFlavor::System => self.workloads.system_redis.as_ref(),
        }
    }

    fn redis_image(&self, flavor: RedisFlavor) -> &str {
        match flavor {
            RedisFlavor::Backend => &self.images.backend_redis,
            RedisFlavor::System => &self.images.system_redis,
        }
    }

    pub fn generate_redis_deployment(
        &self,
        flavor: RedisFlavor,
    ) -> Result<Deployment, ResourceGenerationError> {
        let name = flavor.name();
        let overrides = self.redis_overrides(flavor);
        let container = Container {
            command: Some(vec![
                "/opt/rh/rh-redis32/root/usr/bin/redis-server".to_owned(),
                "/etc/redis.d/redis.conf".to_owned(),
                "--daemonize".to_owned(),
                "no".to_owned(),
            ]),
            ports: Some(vec![port("redis", 6379)]),
            resources: Some(self.resources_or(overrides, || {
                requirements("1000m", "1024Mi", "2000m", "32Gi")
            })),
            volume_mounts: Some(vec![
                volume_mount("redis-storage", "/var/lib/redis/data"),
                volume_mount("redis-config", "/etc/redis.d/"),
            ]),
            ..container(name, self.redis_image(flavor))
        };

        self.generate_workload_deployment(
            WorkloadTemplate::new(
                name,
                flavor.component(),
                "redis",
                flavor.stream(),
                vec![container],
            )
            .infrastructure()
            .with_overrides(overrides)
            .with_volumes(vec![
                claim_volume("redis-storage", &flavor.claim_name()),
                config_map_volume("redis-config", REDIS_CONFIG_MAP),
            ]),
        )
    }

    pub fn generate_backend_redis_deployment(&self) -> Result<Deployment, ResourceGenerationError> {
        self.generate_redis_deployment(RedisFlavor::Backend)
    }

    pub fn generate_system_redis_deployment(&self) -> Result<Deployment, ResourceGenerationError> {
        self.generate_redis_deployment(RedisFlavor::System)
    }

    pub fn generate_redis_service(&self, flavor: RedisFlavor) -> Service {
        let name = flavor.name();

        Service {
            metadata: self.generate_metadata(name, flavor.component(), "redis"),
            spec: Some(ServiceSpec {
                selector: Some(get_selector_labels(name)),
                ports: Some(vec![ServicePort {
                    name: Some("redis".to_owned()),
                    port: 6379,
                    protocol: Some("TCP".to_owned()),
                    target_port: Some(IntOrString::Int(6379)),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub fn generate_redis_config_map(&self, flavor: RedisFlavor) -> ConfigMap {
        ConfigMap {
            metadata: self.generate_metadata(REDIS_CONFIG_MAP, flavor.component(), "redis"),
            data: Some(BTreeMap::from([("redis.conf".to_owned(), REDIS_CONFIG.to_owned())])),
            ..Default::default()
        }
    }

    pub fn generate_redis_claim(&self, flavor: RedisFlavor) -> PersistentVolumeClaim {
        PersistentVolumeClaim {
            metadata: self.generate_metadata(&flavor.claim_name(), flavor.component(), "redis"),
            spec: Some(PersistentVolumeClaimSpec {
                access_modes: Some(vec!["ReadWriteOnce".to_owned()]),
                resources: Some(ResourceRequirements {
                    requests: Some(BTreeMap::from([(
                        "storage".to_owned(),
                        Quantity("1Gi".to_owned()),
                    )])),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub fn generate_redis_image_stream(&self, flavor: RedisFlavor) -> ImageStream {
        match flavor {
            RedisFlavor::Backend => self.generate_backend_redis_image_stream(),
            RedisFlavor::System => self.generate_system_redis_image_stream(),
        }
    }

    /// Connection settings the other components read the redis address from.
    pub fn generate_redis_secret(&self, flavor: RedisFlavor) -> Secret {
        let data = match flavor {
            RedisFlavor::Backend => string_data(&[
                ("REDIS_STORAGE_URL", format!("redis://{BACKEND_REDIS}:6379/0")),
                ("REDIS_STORAGE_SENTINEL_HOSTS", String::new()),
                ("REDIS_STORAGE_SENTINEL_ROLE", String::new()),
                ("REDIS_QUEUES_URL", format!("redis://{BACKEND_REDIS}:6379/1")),
                ("REDIS_QUEUES_SENTINEL_HOSTS", String::new()),
                ("REDIS_QUEUES_SENTINEL_ROLE", String::new()),
            ]),
            RedisFlavor::System => string_data(&[
                ("URL", format!("redis://{SYSTEM_REDIS}:6379/1")),
                ("NAMESPACE", String::new()),
                ("SENTINEL_HOSTS", String::new()),
                ("SENTINEL_ROLE", String::new()),
            ]),
        };

        Secret {
            metadata: self.generate_metadata(flavor.name(), flavor.component(), "redis"),
            string_data: Some(data),
            type_: Some("Opaque".to_owned()),
            ..Default::default()
        }
    }
}
