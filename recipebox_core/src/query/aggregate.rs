use std::collections::BTreeMap;

use sea_orm::{
    sea_query::{Alias, Asterisk, Expr, Func, IntoCondition, SimpleExpr},
    ColumnTrait, Condition, ConnectionTrait, DbBackend, DbErr, EntityTrait, IdenStatic, Order,
    QueryOrder, QueryResult, QuerySelect, QueryTrait, Select, TryGetableMany,
};
use serde::Serialize;

use super::find::filter_if_any;
use crate::error::QueryError;

const COUNT_ALIAS: &str = "_count";

/// Aggregate functions over a numeric column. Results are returned as `f64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFn {
    Avg,
    Sum,
    Min,
    Max,
}

impl AggregateFn {
    fn prefix(self) -> &'static str {
        match self {
            AggregateFn::Avg => "_avg",
            AggregateFn::Sum => "_sum",
            AggregateFn::Min => "_min",
            AggregateFn::Max => "_max",
        }
    }

    fn alias<C: ColumnTrait>(self, column: C) -> String {
        format!("{}_{}", self.prefix(), column.as_str())
    }

    fn expr<E: EntityTrait>(self, column: E::Column, backend: DbBackend) -> SimpleExpr {
        let column = Expr::col((E::default(), column));
        let call = match self {
            AggregateFn::Avg => Func::avg(column),
            AggregateFn::Sum => Func::sum(column),
            AggregateFn::Min => Func::min(column),
            AggregateFn::Max => Func::max(column),
        };
        // Backends disagree on the result type of AVG/SUM over integers.
        Expr::expr(call).cast_as(Alias::new(float_type(backend)))
    }
}

fn float_type(backend: DbBackend) -> &'static str {
    match backend {
        DbBackend::MySql => "DOUBLE",
        _ => "DOUBLE PRECISION",
    }
}

fn count_expr() -> SimpleExpr {
    Func::count(Expr::col(Asterisk)).into()
}

/// Computed aggregates keyed by column name. Absent keys were not requested;
/// `None` values mean the aggregate ran over no non-null rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AggregateResult {
    pub count: Option<u64>,
    pub avg: BTreeMap<String, Option<f64>>,
    pub sum: BTreeMap<String, Option<f64>>,
    pub min: BTreeMap<String, Option<f64>>,
    pub max: BTreeMap<String, Option<f64>>,
}

impl AggregateResult {
    pub fn avg<C: ColumnTrait>(&self, column: C) -> Option<f64> {
        self.avg.get(column.as_str()).copied().flatten()
    }

    pub fn sum<C: ColumnTrait>(&self, column: C) -> Option<f64> {
        self.sum.get(column.as_str()).copied().flatten()
    }

    pub fn min<C: ColumnTrait>(&self, column: C) -> Option<f64> {
        self.min.get(column.as_str()).copied().flatten()
    }

    pub fn max<C: ColumnTrait>(&self, column: C) -> Option<f64> {
        self.max.get(column.as_str()).copied().flatten()
    }

    fn read<E: EntityTrait>(
        row: &QueryResult,
        count: bool,
        fields: &[(AggregateFn, E::Column)],
    ) -> Result<Self, DbErr> {
        let mut result = AggregateResult::default();

        if count {
            let count: i64 = row.try_get("", COUNT_ALIAS)?;
            result.count = Some(u64::try_from(count).unwrap_or_default());
        }

        for (func, column) in fields {
            let value: Option<f64> = row.try_get("", &func.alias(*column))?;
            let slot = match func {
                AggregateFn::Avg => &mut result.avg,
                AggregateFn::Sum => &mut result.sum,
                AggregateFn::Min => &mut result.min,
                AggregateFn::Max => &mut result.max,
            };
            slot.insert(column.as_str().to_string(), value);
        }

        Ok(result)
    }
}

fn select_aggregates<E: EntityTrait>(
    mut select: Select<E>,
    count: bool,
    fields: &[(AggregateFn, E::Column)],
    backend: DbBackend,
) -> Select<E> {
    if count {
        select = select.column_as(count_expr(), COUNT_ALIAS);
    }
    for (func, column) in fields {
        select = select.column_as(func.expr::<E>(*column, backend), func.alias(*column).as_str());
    }
    select
}

/// Arguments for a whole-table aggregate.
pub struct Aggregate<E: EntityTrait> {
    filter: Condition,
    count: bool,
    fields: Vec<(AggregateFn, E::Column)>,
}

impl<E: EntityTrait> Default for Aggregate<E> {
    fn default() -> Self {
        Self {
            filter: Condition::all(),
            count: false,
            fields: Vec::new(),
        }
    }
}

impl<E: EntityTrait> Aggregate<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter<F: IntoCondition>(mut self, filter: F) -> Self {
        self.filter = self.filter.add(filter.into_condition());
        self
    }

    pub fn count(mut self) -> Self {
        self.count = true;
        self
    }

    pub fn avg(mut self, column: E::Column) -> Self {
        self.fields.push((AggregateFn::Avg, column));
        self
    }

    pub fn sum(mut self, column: E::Column) -> Self {
        self.fields.push((AggregateFn::Sum, column));
        self
    }

    pub fn min(mut self, column: E::Column) -> Self {
        self.fields.push((AggregateFn::Min, column));
        self
    }

    pub fn max(mut self, column: E::Column) -> Self {
        self.fields.push((AggregateFn::Max, column));
        self
    }

    fn into_select(self, backend: DbBackend) -> (Select<E>, bool, Vec<(AggregateFn, E::Column)>) {
        let select = filter_if_any(E::find(), self.filter).select_only();
        let select = select_aggregates(select, self.count, &self.fields, backend);
        (select, self.count, self.fields)
    }

    pub(crate) async fn exec<C: ConnectionTrait>(self, db: &C) -> Result<AggregateResult, QueryError> {
        let backend = db.get_database_backend();
        let (select, count, fields) = self.into_select(backend);
        if !count && fields.is_empty() {
            return Ok(AggregateResult::default());
        }

        let statement = select.build(backend);
        let row = db
            .query_one(statement)
            .await?
            .ok_or_else(|| DbErr::RecordNotFound("aggregate returned no row".to_string()))?;

        Ok(AggregateResult::read::<E>(&row, count, &fields)?)
    }
}

/// One group of a `GroupBy` query: the typed key plus its aggregates.
/// `aggregates.count` is always present.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupRow<K> {
    pub key: K,
    pub aggregates: AggregateResult,
}

impl<K> GroupRow<K> {
    pub fn count(&self) -> u64 {
        self.aggregates.count.unwrap_or_default()
    }
}

/// Arguments for a grouped aggregate. Rows are grouped by `by` columns, in
/// order; the key type passed to `group_by::<K>` must decode those columns
/// (a single value for one column, a tuple for several).
pub struct GroupBy<E: EntityTrait> {
    by: Vec<E::Column>,
    filter: Condition,
    having: Option<Condition>,
    fields: Vec<(AggregateFn, E::Column)>,
    order_by_count: Option<Order>,
    skip: Option<u64>,
    take: Option<u64>,
}

impl<E: EntityTrait> GroupBy<E> {
    pub fn new(by: impl IntoIterator<Item = E::Column>) -> Self {
        Self {
            by: by.into_iter().collect(),
            filter: Condition::all(),
            having: None,
            fields: Vec::new(),
            order_by_count: None,
            skip: None,
            take: None,
        }
    }

    pub fn filter<F: IntoCondition>(mut self, filter: F) -> Self {
        self.filter = self.filter.add(filter.into_condition());
        self
    }

    /// Filters groups after aggregation; multiple calls are AND-ed.
    pub fn having<F: IntoCondition>(mut self, having: F) -> Self {
        let having = having.into_condition();
        self.having = Some(match self.having.take() {
            Some(existing) => existing.add(having),
            None => Condition::all().add(having),
        });
        self
    }

    pub fn having_count_gte(self, min: u64) -> Self {
        self.having(Expr::expr(count_expr()).gte(min))
    }

    pub fn avg(mut self, column: E::Column) -> Self {
        self.fields.push((AggregateFn::Avg, column));
        self
    }

    pub fn sum(mut self, column: E::Column) -> Self {
        self.fields.push((AggregateFn::Sum, column));
        self
    }

    pub fn min(mut self, column: E::Column) -> Self {
        self.fields.push((AggregateFn::Min, column));
        self
    }

    pub fn max(mut self, column: E::Column) -> Self {
        self.fields.push((AggregateFn::Max, column));
        self
    }

    /// Orders groups by their row count. Ties fall back to the key order.
    pub fn order_by_count(mut self, order: Order) -> Self {
        self.order_by_count = Some(order);
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn take(mut self, take: u64) -> Self {
        self.take = Some(take);
        self
    }

    fn key_aliases(&self) -> Vec<String> {
        (0..self.by.len()).map(|i| format!("_key_{i}")).collect()
    }

    fn into_select(self, backend: DbBackend) -> (Select<E>, Vec<String>, Vec<(AggregateFn, E::Column)>) {
        let key_aliases = self.key_aliases();
        let mut select = filter_if_any(E::find(), self.filter).select_only();

        for (column, alias) in self.by.iter().zip(&key_aliases) {
            select = select.column_as(Expr::col((E::default(), *column)), alias.as_str());
        }
        select = select_aggregates(select, true, &self.fields, backend);
        for column in &self.by {
            select = select.group_by(Expr::col((E::default(), *column)));
        }
        if let Some(having) = self.having {
            select = select.having(having);
        }
        if let Some(order) = self.order_by_count {
            select = select.order_by(count_expr(), order);
        }
        for column in &self.by {
            select = select.order_by(Expr::col((E::default(), *column)), Order::Asc);
        }
        if let Some(skip) = self.skip {
            select = select.offset(skip);
        }
        if let Some(take) = self.take {
            select = select.limit(take);
        }

        (select, key_aliases, self.fields)
    }

    pub(crate) async fn exec<K, C>(self, db: &C) -> Result<Vec<GroupRow<K>>, QueryError>
    where
        K: TryGetableMany,
        C: ConnectionTrait,
    {
        let backend = db.get_database_backend();
        let (select, key_aliases, fields) = self.into_select(backend);
        let statement = select.build(backend);

        let rows = db.query_all(statement).await?;
        let mut groups = Vec::with_capacity(rows.len());
        for row in rows {
            let key = K::try_get_many(&row, "", &key_aliases).map_err(DbErr::from)?;
            let aggregates = AggregateResult::read::<E>(&row, true, &fields)?;
            groups.push(GroupRow { key, aggregates });
        }

        Ok(groups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::prelude::*;

    #[test]
    fn aggregate_selects_aliased_expressions() {
        let (select, _, _) = Aggregate::<Review>::new()
            .filter(ReviewColumn::Rating.gte(2))
            .count()
            .avg(ReviewColumn::Rating)
            .max(ReviewColumn::Rating)
            .into_select(DbBackend::Postgres);
        let sql = select.build(DbBackend::Postgres).to_string();

        assert!(sql.contains(r#"COUNT(*) AS "_count""#));
        assert!(sql.contains(r#"CAST(AVG("review"."rating") AS DOUBLE PRECISION) AS "_avg_rating""#));
        assert!(sql.contains(r#"CAST(MAX("review"."rating") AS DOUBLE PRECISION) AS "_max_rating""#));
        assert!(sql.contains(r#"WHERE "review"."rating" >= 2"#));
    }

    #[test]
    fn group_by_groups_orders_and_filters_groups() {
        let (select, keys, _) = GroupBy::<RecipeTag>::new([RecipeTagColumn::TagId])
            .having_count_gte(2)
            .order_by_count(Order::Desc)
            .take(5)
            .into_select(DbBackend::Postgres);
        let sql = select.build(DbBackend::Postgres).to_string();

        assert_eq!(keys, vec!["_key_0".to_string()]);
        assert!(sql.contains(r#"GROUP BY "recipe_tag"."tag_id""#));
        assert!(sql.contains("HAVING COUNT(*) >= 2"));
        assert!(sql.contains(r#"ORDER BY COUNT(*) DESC, "recipe_tag"."tag_id" ASC"#));
        assert!(sql.contains("LIMIT 5"));
    }

    #[test]
    fn casts_follow_the_backend() {
        let (select, _, _) = Aggregate::<Review>::new()
            .avg(ReviewColumn::Rating)
            .into_select(DbBackend::MySql);
        let sql = select.build(DbBackend::MySql).to_string();

        assert!(sql.contains("CAST(AVG(`review`.`rating`) AS DOUBLE)"), "{sql}");
        assert!(!sql.contains("WHERE"), "{sql}");
    }
}
