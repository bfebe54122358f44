//! Tag persistence and post-tag relations.

use std::collections::HashMap;

use sqlx::FromRow;

use super::Store;
use crate::error::Result;
use crate::types::{tag::random_color, Tag};

#[derive(Debug, FromRow)]
struct TagRow {
    id: i64,
    name: String,
    color: String,
}

impl From<TagRow> for Tag {
    fn from(row: TagRow) -> Self {
        Tag {
            id: row.id,
            name: row.name,
            color: row.color,
        }
    }
}

impl Store {
    /// Fetch-or-create by name. New tags get a random color; existing tags
    /// keep theirs.
    pub async fn upsert_tag(&self, name: &str) -> Result<Tag> {
        let row: TagRow = sqlx::query_as(
            "INSERT INTO tags (name, color) VALUES (?1, ?2) \
             ON CONFLICT(name) DO UPDATE SET name = excluded.name \
             RETURNING id, name, color",
        )
        .bind(name)
        .bind(random_color())
        .fetch_one(self.pool())
        .await?;
        Ok(row.into())
    }

    pub async fn connect_tag(&self, post_id: i64, tag_id: i64) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO post_tags (post_id, tag_id) VALUES (?1, ?2)")
            .bind(post_id)
            .bind(tag_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Remove one post-tag relation. The tag itself and its other posts are
    /// untouched.
    pub async fn disconnect_tag(&self, post_id: i64, tag_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM post_tags WHERE post_id = ?1 AND tag_id = ?2")
            .bind(post_id)
            .bind(tag_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn tags_for_post(&self, post_id: i64) -> Result<Vec<Tag>> {
        let rows: Vec<TagRow> = sqlx::query_as(
            "SELECT t.id, t.name, t.color FROM tags t \
             JOIN post_tags pt ON pt.tag_id = t.id \
             WHERE pt.post_id = ?1 ORDER BY t.name",
        )
        .bind(post_id)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(Tag::from).collect())
    }

    /// Tag names per post for a set of posts, one query.
    pub async fn tag_names_for_posts(&self, post_ids: &[i64]) -> Result<HashMap<i64, Vec<String>>> {
        let mut map: HashMap<i64, Vec<String>> = HashMap::new();
        if post_ids.is_empty() {
            return Ok(map);
        }
        let placeholders = vec!["?"; post_ids.len()].join(", ");
        let sql = format!(
            "SELECT pt.post_id, t.name FROM post_tags pt \
             JOIN tags t ON t.id = pt.tag_id \
             WHERE pt.post_id IN ({placeholders}) ORDER BY t.name"
        );
        let mut query = sqlx::query_as::<_, (i64, String)>(&sql);
        for id in post_ids {
            query = query.bind(id);
        }
        for (post_id, name) in query.fetch_all(self.pool()).await? {
            map.entry(post_id).or_default().push(name);
        }
        Ok(map)
    }

    /// Page through all tags in ascending id order.
    pub async fn tags_after(&self, id_gt: i64, limit: i64) -> Result<Vec<Tag>> {
        let rows: Vec<TagRow> = sqlx::query_as(
            "SELECT id, name, color FROM tags WHERE id > ?1 ORDER BY id ASC LIMIT ?2",
        )
        .bind(id_gt)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(Tag::from).collect())
    }

    pub async fn post_count_for_tag(&self, tag_id: i64) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM post_tags WHERE tag_id = ?1")
            .bind(tag_id)
            .fetch_one(self.pool())
            .await?;
        Ok(count)
    }

    /// Remove a tag and all of its relations.
    pub async fn delete_tag(&self, tag_id: i64) -> Result<()> {
        let mut tx = self.pool().begin().await?;
        sqlx::query("DELETE FROM post_tags WHERE tag_id = ?1")
            .bind(tag_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM tags WHERE id = ?1")
            .bind(tag_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Move every post of `from_tag` onto `to_tag`, then drop `from_tag`.
    /// Used when the cleanup job judges two tags equivalent.
    pub async fn reparent_tag(&self, from_tag: i64, to_tag: i64) -> Result<()> {
        let mut tx = self.pool().begin().await?;
        sqlx::query(
            "INSERT OR IGNORE INTO post_tags (post_id, tag_id) \
             SELECT post_id, ?1 FROM post_tags WHERE tag_id = ?2",
        )
        .bind(to_tag)
        .bind(from_tag)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM post_tags WHERE tag_id = ?1")
            .bind(from_tag)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM tags WHERE id = ?1")
            .bind(from_tag)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}
