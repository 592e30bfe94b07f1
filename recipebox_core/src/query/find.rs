use sea_orm::{
    sea_query::{IntoCondition, LikeExpr},
    Condition, EntityTrait, Order, QueryFilter, QueryOrder, QuerySelect, Select,
};

/// `%fragment%` as a LIKE pattern, with `\`, `%` and `_` in `fragment`
/// matched literally.
pub fn contains_pattern(fragment: &str) -> LikeExpr {
    let mut pattern = String::with_capacity(fragment.len() + 2);
    pattern.push('%');
    for ch in fragment.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    LikeExpr::new(pattern).escape('\\')
}

/// Applies `filter` unless it is an empty `Condition::all()`.
pub(crate) fn filter_if_any<E: EntityTrait>(select: Select<E>, filter: Condition) -> Select<E> {
    if filter.is_empty() {
        select
    } else {
        select.filter(filter)
    }
}

/// Arguments shared by `find_first` and `find_many`: a filter, an ordered
/// list of sort keys and optional skip/take pagination.
pub struct FindMany<E: EntityTrait> {
    pub filter: Condition,
    pub order_by: Vec<(E::Column, Order)>,
    pub skip: Option<u64>,
    pub take: Option<u64>,
}

impl<E: EntityTrait> Default for FindMany<E> {
    fn default() -> Self {
        Self {
            filter: Condition::all(),
            order_by: Vec::new(),
            skip: None,
            take: None,
        }
    }
}

impl<E: EntityTrait> Clone for FindMany<E> {
    fn clone(&self) -> Self {
        Self {
            filter: self.filter.clone(),
            order_by: self.order_by.clone(),
            skip: self.skip,
            take: self.take,
        }
    }
}

impl<E: EntityTrait> FindMany<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a filter; multiple calls are AND-ed together.
    pub fn filter<F: IntoCondition>(mut self, filter: F) -> Self {
        self.filter = self.filter.add(filter.into_condition());
        self
    }

    pub fn order_by(mut self, column: E::Column, order: Order) -> Self {
        self.order_by.push((column, order));
        self
    }

    pub fn order_by_asc(self, column: E::Column) -> Self {
        self.order_by(column, Order::Asc)
    }

    pub fn order_by_desc(self, column: E::Column) -> Self {
        self.order_by(column, Order::Desc)
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn take(mut self, take: u64) -> Self {
        self.take = Some(take);
        self
    }

    /// Zero-based page of `per_page` rows.
    pub fn page(self, page: u64, per_page: u64) -> Self {
        self.skip(page * per_page).take(per_page)
    }

    pub fn into_select(self) -> Select<E> {
        let mut select = filter_if_any(E::find(), self.filter);
        for (column, order) in self.order_by {
            select = select.order_by(column, order);
        }
        if let Some(skip) = self.skip {
            select = select.offset(skip);
        }
        if let Some(take) = self.take {
            select = select.limit(take);
        }
        select
    }
}
