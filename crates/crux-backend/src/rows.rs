//! Row-oriented query/mutation interface over named tables.
//!
//! Filters use the service's `column=op.value` notation (`event_id=eq.<uuid>`),
//! the same strings the realtime change feed accepts, so a feed subscription
//! and its refetch query can share one filter.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::Backend;
use crate::error::BackendError;

/// Builder for a single-table select.
pub struct Select {
    backend: Backend,
    table: String,
    query: Vec<(String, String)>,
}

impl Select {
    /// Filter on `column = value`.
    pub fn eq(mut self, column: &str, value: impl ToString) -> Self {
        self.query.push((column.into(), format!("eq.{}", value.to_string())));
        self
    }

    /// Add a preformatted filter string: one or more `column=op.value`
    /// conditions joined with `&`.
    pub fn raw_filter(mut self, filter: &str) -> Self {
        self.query.extend(parse_filter(filter));
        self
    }

    pub fn order(mut self, column: &str, descending: bool) -> Self {
        let dir = if descending { "desc" } else { "asc" };
        self.query.push(("order".into(), format!("{column}.{dir}")));
        self
    }

    pub fn limit(mut self, n: u32) -> Self {
        self.query.push(("limit".into(), n.to_string()));
        self
    }

    pub async fn fetch<T: DeserializeOwned>(self) -> Result<Vec<T>, BackendError> {
        let url = self.backend.url(&format!("/rest/{}", self.table));
        let req = self.backend.authed(self.backend.http.get(url).query(&self.query));
        let resp = req.send().await?;

        if !resp.status().is_success() {
            return Err(self.backend.fail(resp).await);
        }
        let rows = resp.json::<Vec<T>>().await?;
        Ok(rows)
    }

    /// Fetch expecting exactly one row.
    pub async fn fetch_one<T: DeserializeOwned>(self) -> Result<T, BackendError> {
        let table = self.table.clone();
        let mut rows: Vec<T> = self.limit(1).fetch().await?;
        rows.pop()
            .ok_or_else(|| BackendError::NotFound(format!("no row in {table}")))
    }

    pub async fn fetch_optional<T: DeserializeOwned>(self) -> Result<Option<T>, BackendError> {
        let mut rows: Vec<T> = self.limit(1).fetch().await?;
        Ok(rows.pop())
    }
}

impl Backend {
    /// Start a select against `table`.
    pub fn from(&self, table: &str) -> Select {
        Select {
            backend: self.clone(),
            table: table.into(),
            query: Vec::new(),
        }
    }

    /// Insert one row, returning the stored representation.
    pub async fn insert<B, T>(&self, table: &str, row: &B) -> Result<T, BackendError>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let url = self.url(&format!("/rest/{table}"));
        let resp = self
            .authed(self.http.post(url).json(row))
            .header("prefer", "return=representation")
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(self.fail(resp).await);
        }
        Ok(resp.json().await?)
    }

    /// Insert-or-replace keyed on the table's uniqueness constraint.
    pub async fn upsert<B, T>(&self, table: &str, row: &B) -> Result<T, BackendError>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let url = self.url(&format!("/rest/{table}"));
        let resp = self
            .authed(self.http.post(url).json(row))
            .header("prefer", "resolution=merge-duplicates,return=representation")
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(self.fail(resp).await);
        }
        Ok(resp.json().await?)
    }

    /// Patch rows matching a filter (see [`Select::raw_filter`] for syntax).
    pub async fn update<B>(
        &self,
        table: &str,
        filter: &str,
        patch: &B,
    ) -> Result<(), BackendError>
    where
        B: Serialize + Sync,
    {
        let url = self.url(&format!("/rest/{table}"));
        let req = self.http.patch(url).json(patch).query(&parse_filter(filter));
        let resp = self.authed(req).send().await?;

        if !resp.status().is_success() {
            return Err(self.fail(resp).await);
        }
        Ok(())
    }

    /// Delete rows matching a filter. Deleting zero rows is not an error —
    /// stop-typing races its own expiry, for one.
    pub async fn delete(&self, table: &str, filter: &str) -> Result<(), BackendError> {
        let url = self.url(&format!("/rest/{table}"));
        let req = self.http.delete(url).query(&parse_filter(filter));
        let resp = self.authed(req).send().await?;

        if !resp.status().is_success() {
            return Err(self.fail(resp).await);
        }
        Ok(())
    }
}

/// Split `a=eq.1&b=eq.2` into query pairs.
pub(crate) fn parse_filter(filter: &str) -> Vec<(String, String)> {
    filter
        .split('&')
        .filter_map(|part| part.split_once('='))
        .map(|(column, rest)| (column.to_string(), rest.to_string()))
        .collect()
}
