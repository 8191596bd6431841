//! Tenant-scoped repository facade.
//!
//! Binding is pure wiring: given an established connection to one tenant's
//! database, [`RepositoryFacade::bind`] produces one [`Repository`] per entity,
//! all sharing that connection. Code holding a facade can only ever reach the
//! tenant it was bound for.
//!
//! ```text
//! (entity definitions) x (DatabaseConnection) ──bind──▶ RepositoryFacade
//!                                                        ├── users()
//!                                                        ├── students()
//!                                                        └── fees()
//! ```

pub mod entity;

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use sea_orm::sea_query::IntoCondition;
use sea_orm::{
    ActiveModelBehavior, ActiveModelTrait, DatabaseConnection, DbBackend, DbErr, EntityTrait,
    IntoActiveModel, PaginatorTrait, PrimaryKeyTrait, QueryFilter,
};

use entity::{fee, student, user};

// =============================================================================
// Repository
// =============================================================================

/// Data access for one entity on one tenant's database.
pub struct Repository<E: EntityTrait> {
    db: DatabaseConnection,
    _entity: PhantomData<fn() -> E>,
}

impl<E: EntityTrait> Clone for Repository<E> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E> Repository<E>
where
    E: EntityTrait,
    E::Model: Send + Sync + 'static,
{
    fn new(db: DatabaseConnection) -> Self {
        Self {
            db,
            _entity: PhantomData,
        }
    }

    /// Load every row.
    pub async fn find_all(&self) -> Result<Vec<E::Model>, DbErr> {
        E::find().all(&self.db).await
    }

    /// Load one row by primary key.
    pub async fn find_by_id<K>(&self, id: K) -> Result<Option<E::Model>, DbErr>
    where
        K: Into<<E::PrimaryKey as PrimaryKeyTrait>::ValueType>,
    {
        E::find_by_id(id).one(&self.db).await
    }

    /// Load rows matching a condition, e.g. `user::Column::Role.eq("teacher")`.
    pub async fn find_where<F>(&self, filter: F) -> Result<Vec<E::Model>, DbErr>
    where
        F: IntoCondition,
    {
        E::find().filter(filter).all(&self.db).await
    }

    /// Number of rows.
    pub async fn count(&self) -> Result<u64, DbErr> {
        E::find().count(&self.db).await
    }

    /// Insert a row and return it as stored.
    pub async fn insert<A>(&self, model: A) -> Result<E::Model, DbErr>
    where
        A: ActiveModelTrait<Entity = E> + ActiveModelBehavior + Send + 'static,
        E::Model: IntoActiveModel<A>,
    {
        model.insert(&self.db).await
    }

    /// Delete one row by primary key. Returns the number of rows removed.
    pub async fn delete_by_id<K>(&self, id: K) -> Result<u64, DbErr>
    where
        K: Into<<E::PrimaryKey as PrimaryKeyTrait>::ValueType>,
    {
        let result = E::delete_by_id(id).exec(&self.db).await?;
        Ok(result.rows_affected)
    }
}

// =============================================================================
// RepositoryFacade
// =============================================================================

/// The set of repositories bound to one tenant's connection.
///
/// Cheap to clone; clones share the same binding.
#[derive(Clone)]
pub struct RepositoryFacade {
    inner: Arc<BoundRepositories>,
}

struct BoundRepositories {
    slug: String,
    db: DatabaseConnection,
    users: Repository<user::Entity>,
    students: Repository<student::Entity>,
    fees: Repository<fee::Entity>,
}

impl RepositoryFacade {
    /// Bind every tenant entity to the given connection.
    pub fn bind(slug: impl Into<String>, db: DatabaseConnection) -> Self {
        Self {
            inner: Arc::new(BoundRepositories {
                slug: slug.into(),
                users: Repository::new(db.clone()),
                students: Repository::new(db.clone()),
                fees: Repository::new(db.clone()),
                db,
            }),
        }
    }

    /// Slug of the tenant this facade is bound to.
    pub fn slug(&self) -> &str {
        &self.inner.slug
    }

    pub fn users(&self) -> &Repository<user::Entity> {
        &self.inner.users
    }

    pub fn students(&self) -> &Repository<student::Entity> {
        &self.inner.students
    }

    pub fn fees(&self) -> &Repository<fee::Entity> {
        &self.inner.fees
    }

    /// Backend of the bound connection.
    pub fn backend(&self) -> DbBackend {
        use sea_orm::ConnectionTrait;
        self.inner.db.get_database_backend()
    }

    /// Check the bound connection is alive.
    pub async fn ping(&self) -> Result<(), DbErr> {
        self.inner.db.ping().await
    }

    /// Whether two facades come from the same binding.
    pub fn same_binding(&self, other: &RepositoryFacade) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Close the underlying connection pool. Every clone of this facade stops working.
    pub(crate) async fn close(&self) -> Result<(), DbErr> {
        self.inner.db.clone().close().await
    }
}

impl fmt::Debug for RepositoryFacade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepositoryFacade")
            .field("slug", &self.inner.slug)
            .finish_non_exhaustive()
    }
}
