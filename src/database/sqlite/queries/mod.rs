
use super::models::*;
use anyhow::{Context, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, warn};

use crate::config::is_valid_table_name;
use crate::corpus::{QuestionAnswer, RawRow};

// Table and column names come from configuration, so they are checked before
// being spliced into SQL.
fn check_identifiers<'a>(names: impl IntoIterator<Item = &'a str>) -> Result<()> {
    for name in names {
        if !is_valid_table_name(name) {
            anyhow::bail!("Invalid SQL identifier: {:?}", name);
        }
    }
    Ok(())
}

// Columns are declared TEXT, but SQLite stores whatever it is given. A value of
// another type reads as NULL so one bad cell cannot fail the whole table.
fn text_column(row: &SqliteRow, column: usize, table: &str, index: usize) -> Option<String> {
    match row.try_get::<Option<String>, _>(column) {
        Ok(value) => value,
        Err(e) => {
            warn!("Row {} of {}: column {} is not text: {}", index, table, column, e);
            None
        }
    }
}

pub struct CorpusQueries;

impl CorpusQueries {
    /// Rows of `table` with a non-NULL embedding, in insertion order
    #[inline]
    pub async fn fetch_embedded_rows(
        pool: &SqlitePool,
        table: &str,
        columns: &[&str],
    ) -> Result<Vec<RawRow>> {
        check_identifiers(std::iter::once(table).chain(columns.iter().copied()))?;

        let query_str = format!(
            "SELECT {}, embedding FROM {} WHERE embedding IS NOT NULL ORDER BY rowid",
            columns.join(", "),
            table
        );
        debug!("Fetching corpus rows: {}", query_str);

        let rows = sqlx::query(&query_str)
            .fetch_all(pool)
            .await
            .with_context(|| format!("Failed to fetch rows from {table}"))?;

        Ok(rows
            .iter()
            .enumerate()
            .map(|(index, row)| {
                let fields = (0..columns.len())
                    .map(|column| text_column(row, column, table, index))
                    .collect();
                // an unreadable embedding stays empty and is dropped when decoded
                let embedding = text_column(row, columns.len(), table, index).unwrap_or_default();
                RawRow { fields, embedding }
            })
            .collect())
    }

    /// Up to `count` random question/answer pairs
    #[inline]
    pub async fn sample_pairs(
        pool: &SqlitePool,
        table: &str,
        count: usize,
    ) -> Result<Vec<QuestionAnswer>> {
        check_identifiers([table])?;

        let query_str = format!(
            "SELECT question, answer FROM {table} \
             WHERE question IS NOT NULL AND answer IS NOT NULL \
             ORDER BY RANDOM() LIMIT ?"
        );

        let rows = sqlx::query(&query_str)
            .bind(i64::try_from(count).unwrap_or(i64::MAX))
            .fetch_all(pool)
            .await
            .with_context(|| format!("Failed to sample pairs from {table}"))?;

        rows.iter()
            .map(|row| -> Result<QuestionAnswer, sqlx::Error> {
                Ok(QuestionAnswer {
                    question: row.try_get("question")?,
                    answer: row.try_get("answer")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .context("Failed to decode sampled pairs")
    }

    #[inline]
    pub async fn count_rows(pool: &SqlitePool, table: &str) -> Result<i64> {
        check_identifiers([table])?;

        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(pool)
            .await
            .with_context(|| format!("Failed to count rows in {table}"))?;

        Ok(count)
    }

    #[inline]
    pub async fn insert_qa(pool: &SqlitePool, table: &str, entry: &NewQaEntry) -> Result<i64> {
        check_identifiers([table])?;

        let query_str = format!(
            "INSERT INTO {table} (question, answer, source, focus_area, embedding) \
             VALUES (?, ?, ?, ?, ?)"
        );

        let id = sqlx::query(&query_str)
            .bind(&entry.question)
            .bind(&entry.answer)
            .bind(&entry.source)
            .bind(&entry.focus_area)
            .bind(&entry.embedding)
            .execute(pool)
            .await
            .context("Failed to insert question/answer entry")?
            .last_insert_rowid();

        Ok(id)
    }

    #[inline]
    pub async fn insert_medication(
        pool: &SqlitePool,
        table: &str,
        entry: &NewMedicationEntry,
    ) -> Result<i64> {
        check_identifiers([table])?;

        let query_str = format!(
            "INSERT INTO {table} (drug, indication, side_effects, drug_interaction, embedding) \
             VALUES (?, ?, ?, ?, ?)"
        );

        let id = sqlx::query(&query_str)
            .bind(&entry.drug)
            .bind(&entry.indication)
            .bind(&entry.side_effects)
            .bind(&entry.drug_interaction)
            .bind(&entry.embedding)
            .execute(pool)
            .await
            .context("Failed to insert medication entry")?
            .last_insert_rowid();

        Ok(id)
    }

    #[inline]
    pub async fn get_qa(pool: &SqlitePool, table: &str, id: i64) -> Result<Option<QaEntry>> {
        check_identifiers([table])?;

        let query_str = format!(
            "SELECT id, question, answer, source, focus_area, embedding FROM {table} WHERE id = ?"
        );

        let entry = sqlx::query_as::<_, QaEntry>(&query_str)
            .bind(id)
            .fetch_optional(pool)
            .await
            .context("Failed to get question/answer entry")?;

        Ok(entry)
    }
}
