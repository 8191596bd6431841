//! Control-plane registry backed by a `tenants` table.

use async_trait::async_trait;
use sea_orm::{ConnectOptions, Database, DatabaseConnection, EntityTrait, QueryOrder};
use tracing::{debug, info};

use crate::error::RegistryError;

use super::record::{ConnectionTarget, Driver, TenantRecord, TenantStatus};
use super::registry::TenantRegistry;

/// Row layout of the control-plane `tenants` table.
pub mod tenant {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "tenants")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub slug: String,
        pub status: String,
        pub db_driver: String,
        pub db_host: String,
        pub db_port: Option<i32>,
        pub db_username: Option<String>,
        pub db_password: Option<String>,
        pub db_name: String,
        pub created_at: DateTimeUtc,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

impl TryFrom<tenant::Model> for TenantRecord {
    type Error = RegistryError;

    fn try_from(row: tenant::Model) -> Result<Self, Self::Error> {
        let invalid = |what: String| RegistryError::InvalidData(format!("tenant {}: {}", row.slug, what));

        let status = TenantStatus::parse(&row.status)
            .ok_or_else(|| invalid(format!("unknown status {:?}", row.status)))?;
        let driver = Driver::parse(&row.db_driver)
            .ok_or_else(|| invalid(format!("unknown driver {:?}", row.db_driver)))?;
        let port = row
            .db_port
            .map(u16::try_from)
            .transpose()
            .map_err(|_| invalid(format!("port out of range: {:?}", row.db_port)))?;

        Ok(TenantRecord {
            connection_target: ConnectionTarget {
                driver,
                host: row.db_host,
                port,
                username: row.db_username,
                password: row.db_password,
                database: row.db_name,
            },
            slug: row.slug,
            status,
            created_at: row.created_at,
        })
    }
}

impl From<&TenantRecord> for tenant::ActiveModel {
    fn from(record: &TenantRecord) -> Self {
        use sea_orm::ActiveValue::Set;

        let target = &record.connection_target;
        tenant::ActiveModel {
            slug: Set(record.slug.clone()),
            status: Set(record.status.as_str().to_string()),
            db_driver: Set(target.driver.scheme().to_string()),
            db_host: Set(target.host.clone()),
            db_port: Set(target.port.map(i32::from)),
            db_username: Set(target.username.clone()),
            db_password: Set(target.password.clone()),
            db_name: Set(target.database.clone()),
            created_at: Set(record.created_at),
        }
    }
}

/// Registry that reads tenant records from the control-plane database.
#[derive(Clone)]
pub struct DatabaseRegistry {
    db: DatabaseConnection,
}

impl DatabaseRegistry {
    /// Wrap an existing control-plane connection.
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Connect to the control-plane database.
    pub async fn connect(url: &str, pool_size: u32) -> Result<Self, RegistryError> {
        let mut options = ConnectOptions::new(url);
        options.max_connections(pool_size).sqlx_logging(false);

        let db = Database::connect(options).await?;
        info!("Connected to tenant registry");
        Ok(Self::new(db))
    }

    /// Control-plane connection, for provisioning tools and tests.
    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Close the control-plane connection.
    pub async fn close(self) -> Result<(), RegistryError> {
        self.db.close().await.map_err(RegistryError::from)
    }
}

#[async_trait]
impl TenantRegistry for DatabaseRegistry {
    async fn find_by_slug(&self, slug: &str) -> Result<Option<TenantRecord>, RegistryError> {
        debug!(slug = %slug, "Registry point lookup");
        tenant::Entity::find_by_id(slug.to_string())
            .one(&self.db)
            .await?
            .map(TenantRecord::try_from)
            .transpose()
    }

    async fn list(&self) -> Result<Vec<TenantRecord>, RegistryError> {
        tenant::Entity::find()
            .order_by_asc(tenant::Column::Slug)
            .all(&self.db)
            .await?
            .into_iter()
            .map(TenantRecord::try_from)
            .collect()
    }
}
