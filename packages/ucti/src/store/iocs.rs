//! IoC persistence and post-IoC relations.

use std::collections::HashMap;

use sqlx::FromRow;

use super::Store;
use crate::error::{Result, UctiError};
use crate::types::{Ioc, IocType};

#[derive(Debug, FromRow)]
struct IocRow {
    id: i64,
    value: String,
    #[sqlx(rename = "type")]
    ioc_type: String,
    subtype: Option<String>,
    comment: Option<String>,
}

impl IocRow {
    fn into_ioc(self) -> Result<Ioc> {
        let ioc_type = IocType::parse(&self.ioc_type)
            .ok_or_else(|| UctiError::Config(format!("unknown IoC type {:?}", self.ioc_type)))?;
        Ok(Ioc {
            id: self.id,
            value: self.value,
            ioc_type,
            subtype: self.subtype,
            comment: self.comment,
        })
    }
}

impl Store {
    /// Fetch-or-create by the `(type, subtype, value)` triple.
    pub async fn upsert_ioc(
        &self,
        ioc_type: IocType,
        subtype: Option<&str>,
        value: &str,
        comment: Option<&str>,
    ) -> Result<Ioc> {
        // SQLite treats NULLs as distinct inside UNIQUE, so NULL subtypes
        // need an explicit existence check to keep the triple unique.
        let existing: Option<IocRow> = sqlx::query_as(
            "SELECT id, value, type, subtype, comment FROM iocs \
             WHERE type = ?1 AND subtype IS ?2 AND value = ?3",
        )
        .bind(ioc_type.as_str())
        .bind(subtype)
        .bind(value)
        .fetch_optional(self.pool())
        .await?;
        if let Some(row) = existing {
            return row.into_ioc();
        }

        let row: IocRow = sqlx::query_as(
            "INSERT INTO iocs (value, type, subtype, comment) VALUES (?1, ?2, ?3, ?4) \
             RETURNING id, value, type, subtype, comment",
        )
        .bind(value)
        .bind(ioc_type.as_str())
        .bind(subtype)
        .bind(comment)
        .fetch_one(self.pool())
        .await?;
        row.into_ioc()
    }

    pub async fn connect_ioc(&self, post_id: i64, ioc_id: i64) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO post_iocs (post_id, ioc_id) VALUES (?1, ?2)")
            .bind(post_id)
            .bind(ioc_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn iocs_for_post(&self, post_id: i64) -> Result<Vec<Ioc>> {
        let rows: Vec<IocRow> = sqlx::query_as(
            "SELECT i.id, i.value, i.type, i.subtype, i.comment FROM iocs i \
             JOIN post_iocs pi ON pi.ioc_id = i.id \
             WHERE pi.post_id = ?1 ORDER BY i.id",
        )
        .bind(post_id)
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(IocRow::into_ioc).collect()
    }

    /// IoCs linked to any of the given posts, with the linking post ids.
    /// Drives the IoC aggregation endpoints.
    pub async fn iocs_with_posts(&self, post_ids: &[i64]) -> Result<Vec<(Ioc, Vec<i64>)>> {
        if post_ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; post_ids.len()].join(", ");
        let sql = format!(
            "SELECT i.id, i.value, i.type, i.subtype, i.comment, pi.post_id \
             FROM iocs i JOIN post_iocs pi ON pi.ioc_id = i.id \
             WHERE pi.post_id IN ({placeholders}) ORDER BY i.id",
        );
        let mut query =
            sqlx::query_as::<_, (i64, String, String, Option<String>, Option<String>, i64)>(&sql);
        for id in post_ids {
            query = query.bind(id);
        }

        let mut grouped: HashMap<i64, (Ioc, Vec<i64>)> = HashMap::new();
        for (id, value, raw_type, subtype, comment, post_id) in
            query.fetch_all(self.pool()).await?
        {
            let entry = match grouped.entry(id) {
                std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut(),
                std::collections::hash_map::Entry::Vacant(slot) => {
                    let ioc = IocRow {
                        id,
                        value,
                        ioc_type: raw_type,
                        subtype,
                        comment,
                    }
                    .into_ioc()?;
                    slot.insert((ioc, Vec::new()))
                }
            };
            entry.1.push(post_id);
        }

        let mut result: Vec<(Ioc, Vec<i64>)> = grouped.into_values().collect();
        result.sort_by_key(|(ioc, _)| ioc.id);
        Ok(result)
    }
}
