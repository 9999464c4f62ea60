use std::collections::BTreeMap;

use kube::core::ObjectMeta;

use crate::resources::crd::openshift::{
    ImageLookupPolicy, ImageStream, ImageStreamSpec, TagReference,
};

use super::PlatformRelease;

pub const APICAST_STREAM: &str = "amp-apicast";
pub const BACKEND_STREAM: &str = "amp-backend";
pub const SYSTEM_STREAM: &str = "amp-system";
pub const ZYNC_STREAM: &str = "amp-zync";
pub const ZYNC_DATABASE_STREAM: &str = "zync-database-postgresql";
pub const MEMCACHED_STREAM: &str = "system-memcached";
pub const BACKEND_REDIS_STREAM: &str = "backend-redis";
pub const SYSTEM_REDIS_STREAM: &str = "system-redis";
pub const SYSTEM_MYSQL_STREAM: &str = "system-mysql";
pub const SYSTEM_POSTGRESQL_STREAM: &str = "system-postgresql";

impl PlatformRelease {
    /// Stream with a version tag importing `image` and a `latest` tag
    /// following it.
    pub fn generate_image_stream(
        &self,
        name: &str,
        component: &str,
        display_name: &str,
        image: &str,
    ) -> ImageStream {
        let annotations = BTreeMap::from([(
            "openshift.io/display-name".to_owned(),
            display_name.to_owned(),
        )]);
        let version = &self.product_version;
        let latest = TagReference {
            annotations: Some(BTreeMap::from([(
                "openshift.io/display-name".to_owned(),
                format!("{display_name} (latest)"),
            )])),
            ..TagReference::alias("latest", version.to_owned())
        };
        let versioned = TagReference {
            annotations: Some(BTreeMap::from([(
                "openshift.io/display-name".to_owned(),
                format!("{display_name} {version}"),
            )])),
            ..TagReference::docker_image(version.to_owned(), image, self.insecure_import)
        };

        ImageStream {
            metadata: ObjectMeta {
                annotations: Some(annotations),
                ..self.generate_metadata(name, component, name)
            },
            spec: ImageStreamSpec {
                lookup_policy: Some(ImageLookupPolicy { local: false }),
                docker_image_repository: None,
                tags: Some(vec![latest, versioned]),
            },
        }
    }

    pub fn generate_apicast_image_stream(&self) -> ImageStream {
        self.generate_image_stream(
            APICAST_STREAM,
            "apicast",
            "AMP APIcast",
            &self.images.apicast,
        )
    }

    pub fn generate_backend_image_stream(&self) -> ImageStream {
        self.generate_image_stream(
            BACKEND_STREAM,
            "backend",
            "AMP backend",
            &self.images.backend,
        )
    }

    pub fn generate_system_image_stream(&self) -> ImageStream {
        self.generate_image_stream(SYSTEM_STREAM, "system", "AMP system", &self.images.system)
    }

    pub fn generate_zync_image_stream(&self) -> ImageStream {
        self.generate_image_stream(ZYNC_STREAM, "zync", "AMP Zync", &self.images.zync)
    }

    pub fn generate_zync_database_image_stream(&self) -> ImageStream {
        self.generate_image_stream(
            ZYNC_DATABASE_STREAM,
            "zync",
            "Zync database PostgreSQL",
            &self.images.zync_postgresql,
        )
    }

    pub fn generate_memcached_image_stream(&self) -> ImageStream {
        self.generate_image_stream(
            MEMCACHED_STREAM,
            "system",
            "System memcached",
            &self.images.memcached,
        )
    }

    pub fn generate_backend_redis_image_stream(&self) -> ImageStream {
        self.generate_image_stream(
            BACKEND_REDIS_STREAM,
            "backend",
            "Backend Redis",
            &self.images.backend_redis,
        )
    }

    pub fn generate_system_redis_image_stream(&self) -> ImageStream {
        self.generate_image_stream(
            SYSTEM_REDIS_STREAM,
            "system",
            "System Redis",
            &self.images.system_redis,
        )
    }

    pub fn generate_system_mysql_image_stream(&self) -> ImageStream {
        self.generate_image_stream(
            SYSTEM_MYSQL_STREAM,
            "system",
            "System MySQL",
            &self.images.system_mysql,
        )
    }

    pub fn generate_system_postgresql_image_stream(&self) -> ImageStream {
        self.generate_image_stream(
            SYSTEM_POSTGRESQL_STREAM,
            "system",
            "System PostgreSQL",
            &self.images.system_postgresql,
        )
    }

    /// Streams of the product components, the zync database one only when
    /// the database is internal.
    pub fn generate_product_image_streams(&self) -> Vec<ImageStream> {
        let mut streams = vec![
            self.generate_apicast_image_stream(),
            self.generate_backend_image_stream(),
            self.generate_system_image_stream(),
            self.generate_zync_image_stream(),
            self.generate_memcached_image_stream(),
        ];

        if !self.external.zync_database {
            streams.push(self.generate_zync_database_image_stream());
        }

        streams
    }
}
