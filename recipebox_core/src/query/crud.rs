use std::marker::PhantomData;

use sea_orm::{
    sea_query::OnConflict, ActiveModelBehavior, ActiveModelTrait, ActiveValue, ColumnTrait,
    Condition, ConnectionTrait, EntityName, EntityTrait, IntoActiveModel, Iterable, ModelTrait,
    PaginatorTrait, PrimaryKeyToColumn, PrimaryKeyTrait, QueryFilter, TryGetableMany,
};

use super::{Aggregate, AggregateResult, FindMany, GroupBy, GroupRow};
use crate::error::QueryError;

/// The per-model verb surface (find/create/update/upsert/delete/aggregate)
/// over any entity and any connection, including an open transaction.
///
/// Filters are plain sea-orm conditions, so the unique lookups trust the
/// caller to filter on a unique key; the first matching row is used.
pub struct Crud<'a, E, C> {
    db: &'a C,
    _entity: PhantomData<E>,
}

pub fn crud<E, C>(db: &C) -> Crud<'_, E, C>
where
    E: EntityTrait,
    C: ConnectionTrait,
{
    Crud {
        db,
        _entity: PhantomData,
    }
}

/// Condition matching exactly the row `model` was loaded from.
pub fn primary_key_condition<E: EntityTrait>(model: &E::Model) -> Condition {
    E::PrimaryKey::iter().fold(Condition::all(), |condition, key| {
        let column = key.into_column();
        condition.add(column.eq(model.get(column)))
    })
}

/// Copies every `Set` field of `source` onto `target`.
fn merge_set_fields<A: ActiveModelTrait>(target: &mut A, source: &A) {
    for column in <A::Entity as EntityTrait>::Column::iter() {
        if let ActiveValue::Set(value) = source.get(column) {
            target.set(column, value);
        }
    }
}

impl<'a, E, C> Crud<'a, E, C>
where
    E: EntityTrait,
    E::Model: Sync,
    C: ConnectionTrait,
{
    fn not_found() -> QueryError {
        QueryError::NotFound(E::default().table_name().to_string())
    }

    pub async fn find_by_id<T>(&self, id: T) -> Result<Option<E::Model>, QueryError>
    where
        T: Into<<E::PrimaryKey as PrimaryKeyTrait>::ValueType>,
    {
        Ok(E::find_by_id(id).one(self.db).await?)
    }

    pub async fn find_unique(&self, filter: Condition) -> Result<Option<E::Model>, QueryError> {
        Ok(E::find().filter(filter).one(self.db).await?)
    }

    pub async fn find_unique_or_throw(&self, filter: Condition) -> Result<E::Model, QueryError> {
        self.find_unique(filter).await?.ok_or_else(Self::not_found)
    }

    pub async fn find_first(&self, args: FindMany<E>) -> Result<Option<E::Model>, QueryError> {
        Ok(args.take(1).into_select().one(self.db).await?)
    }

    pub async fn find_many(&self, args: FindMany<E>) -> Result<Vec<E::Model>, QueryError> {
        Ok(args.into_select().all(self.db).await?)
    }

    pub async fn count(&self, filter: Condition) -> Result<u64, QueryError> {
        Ok(E::find().filter(filter).count(self.db).await?)
    }

    /// Inserts one row, running the model's `before_save` hook.
    pub async fn create<A>(&self, data: A) -> Result<E::Model, QueryError>
    where
        A: ActiveModelTrait<Entity = E> + ActiveModelBehavior + Send,
        E::Model: IntoActiveModel<A>,
    {
        Ok(data.insert(self.db).await?)
    }

    /// Inserts every row in one statement and returns how many were written.
    /// With `skip_duplicates`, rows hitting a unique or primary key are dropped.
    pub async fn create_many<A>(&self, data: Vec<A>, skip_duplicates: bool) -> Result<u64, QueryError>
    where
        A: ActiveModelTrait<Entity = E> + ActiveModelBehavior + Send,
        E::Model: IntoActiveModel<A>,
    {
        if data.is_empty() {
            return Ok(0);
        }

        let mut prepared = Vec::with_capacity(data.len());
        for active in data {
            prepared.push(active.before_save(self.db, true).await?);
        }

        let mut insert = E::insert_many(prepared);
        if skip_duplicates {
            insert = insert.on_conflict(OnConflict::new().do_nothing().to_owned());
        }

        Ok(insert.exec_without_returning(self.db).await?)
    }

    /// Applies the `Set` fields of `data` to the row matching `filter`.
    pub async fn update<A>(&self, filter: Condition, data: A) -> Result<E::Model, QueryError>
    where
        A: ActiveModelTrait<Entity = E> + ActiveModelBehavior + Send,
        E::Model: IntoActiveModel<A>,
    {
        let existing = self.find_unique_or_throw(filter).await?;
        self.apply_update(existing, &data).await
    }

    async fn apply_update<A>(&self, existing: E::Model, data: &A) -> Result<E::Model, QueryError>
    where
        A: ActiveModelTrait<Entity = E> + ActiveModelBehavior + Send,
        E::Model: IntoActiveModel<A>,
    {
        if !data.is_changed() {
            return Ok(existing);
        }

        let mut active = existing.into_active_model();
        merge_set_fields(&mut active, data);
        Ok(active.update(self.db).await?)
    }

    /// Bulk update; model hooks do not run. Returns the number of matched rows.
    pub async fn update_many<A>(&self, filter: Condition, data: A) -> Result<u64, QueryError>
    where
        A: ActiveModelTrait<Entity = E>,
    {
        if !data.is_changed() {
            return self.count(filter).await;
        }

        let result = E::update_many().set(data).filter(filter).exec(self.db).await?;
        Ok(result.rows_affected)
    }

    /// Updates the row matching `filter` with `update`, or inserts `create`.
    pub async fn upsert<A>(&self, filter: Condition, create: A, update: A) -> Result<E::Model, QueryError>
    where
        A: ActiveModelTrait<Entity = E> + ActiveModelBehavior + Send,
        E::Model: IntoActiveModel<A>,
    {
        match self.find_unique(filter).await? {
            Some(existing) => self.apply_update(existing, &update).await,
            None => self.create(create).await,
        }
    }

    /// Deletes the row matching `filter` and returns it.
    pub async fn delete(&self, filter: Condition) -> Result<E::Model, QueryError> {
        let existing = self.find_unique_or_throw(filter).await?;
        E::delete_many()
            .filter(primary_key_condition::<E>(&existing))
            .exec(self.db)
            .await?;
        Ok(existing)
    }

    pub async fn delete_many(&self, filter: Condition) -> Result<u64, QueryError> {
        let result = E::delete_many().filter(filter).exec(self.db).await?;
        Ok(result.rows_affected)
    }

    pub async fn aggregate(&self, args: Aggregate<E>) -> Result<AggregateResult, QueryError> {
        args.exec(self.db).await
    }

    /// Grouped aggregate; `K` decodes the grouping columns.
    pub async fn group_by<K>(&self, args: GroupBy<E>) -> Result<Vec<GroupRow<K>>, QueryError>
    where
        K: TryGetableMany,
    {
        args.exec(self.db).await
    }
}
