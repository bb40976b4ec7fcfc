//! `MetricMap` — a `metric name -> value` map, stored as JSONB.
//!
//! Resources configure thresholds per usage-metric and assets report usage
//! per usage-metric (§3's GLOSSARY: "a resource may have multiple [usage
//! metrics], e.g. space and inodes"). A plain `BTreeMap` wrapped for a
//! Postgres `JSONB` column, the same delegation approach `common::id::Id`
//! uses for `BIGINT`.

use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgArgumentBuffer, PgTypeInfo, PgValueRef, Postgres};
use sqlx::{Decode, Encode, Type};
use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricMap(BTreeMap<String, f64>);

impl MetricMap {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn from_iter(entries: impl IntoIterator<Item = (String, f64)>) -> Self {
        Self(entries.into_iter().collect())
    }
}

impl Deref for MetricMap {
    type Target = BTreeMap<String, f64>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for MetricMap {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl FromIterator<(String, f64)> for MetricMap {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Type<Postgres> for MetricMap {
    fn type_info() -> PgTypeInfo {
        <sqlx::types::Json<BTreeMap<String, f64>> as Type<Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        <sqlx::types::Json<BTreeMap<String, f64>> as Type<Postgres>>::compatible(ty)
    }
}

impl Encode<'_, Postgres> for MetricMap {
    fn encode_by_ref(
        &self,
        buf: &mut PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        sqlx::types::Json(&self.0).encode_by_ref(buf)
    }
}

impl<'r> Decode<'r, Postgres> for MetricMap {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let json: sqlx::types::Json<BTreeMap<String, f64>> = Decode::<Postgres>::decode(value)?;
        Ok(Self(json.0))
    }
}
