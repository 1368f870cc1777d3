/// Result persistence operations
///
/// Stores run metadata and analyzer results. Exports are idempotent: each
/// run's rows in an analyzer table are deleted and rewritten inside one
/// transaction, so re-analysing a run replaces its results instead of
/// duplicating them. All queries are parameterized.
use anyhow::{Context, Result};
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use tracing::{error, info};

use crate::analysis::{AnalyzerReport, ConvReport};
use crate::runs::RunConfig;

/// One row of the `runs` table
#[derive(Debug, Clone)]
pub struct RunRow {
    pub run_id: u32,
    pub testee_id: String,
    pub conv_partner_id: String,
    pub conv_length: u32,
    pub amount_convs: u32,
    pub conv_starter: String,
    pub date_time_generated: String,
    pub date_time_tested: String,
}

/// Repository over the result tables
pub struct ResultStore {
    pool: SqlitePool,
}

impl ResultStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Record a run's metadata. A new id is inserted in full; a known id
    /// only gets its `date_time_tested` stamp refreshed, the original
    /// generation record is never overwritten.
    pub async fn record_run(&self, run_id: u32, config: &RunConfig) -> Result<()> {
        let tested = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();

        let exists: Option<i64> = sqlx::query_scalar("SELECT run_id FROM runs WHERE run_id = ?")
            .bind(run_id as i64)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to look up run")?;

        if exists.is_some() {
            sqlx::query("UPDATE runs SET date_time_tested = ? WHERE run_id = ?")
                .bind(&tested)
                .bind(run_id as i64)
                .execute(&self.pool)
                .await
                .context("Failed to update run test timestamp")?;
            return Ok(());
        }

        sqlx::query(
            "INSERT INTO runs (run_id, testee_id, conv_partner_id, conv_length, amount_convs, \
             conv_starter, date_time_generated, date_time_tested) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(run_id as i64)
        .bind(&config.testee_id)
        .bind(&config.conv_partner_id)
        .bind(config.conv_length as i64)
        .bind(config.amount_convs as i64)
        .bind(&config.conv_starter)
        .bind(&config.date_time_generated)
        .bind(&tested)
        .execute(&self.pool)
        .await
        .context("Failed to insert run")?;

        Ok(())
    }

    /// Export one analyzer's report. For each run the old rows are deleted
    /// and the new ones inserted in a single transaction, so a failure
    /// rolls the run back to its previous rows. A failed run is logged and
    /// does not stop the export of the other runs.
    pub async fn export(&self, report: &AnalyzerReport) -> Result<()> {
        // Group the per-conversation reports by run so each run gets one
        // transaction.
        let mut by_run: BTreeMap<u32, Vec<(u32, &ConvReport)>> = BTreeMap::new();
        for (&(run_id, conv_nbr), conv_report) in &report.results {
            by_run.entry(run_id).or_default().push((conv_nbr, conv_report));
        }

        for (run_id, conversations) in by_run {
            if let Err(e) = self.export_run(run_id, &conversations).await {
                error!(
                    run_id,
                    analyzer = report.analyzer_id,
                    error = %e,
                    "result export failed for run"
                );
            } else {
                info!(run_id, analyzer = report.analyzer_id, "results exported");
            }
        }
        Ok(())
    }

    async fn export_run(
        &self,
        run_id: u32,
        conversations: &[(u32, &ConvReport)],
    ) -> Result<()> {
        let Some(table) = conversations.first().map(|(_, r)| table_for(r)) else {
            return Ok(());
        };

        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        sqlx::query(&format!("DELETE FROM {} WHERE run_id = ?", table))
            .bind(run_id as i64)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to clear {} for run {}", table, run_id))?;

        for &(conv_nbr, conv_report) in conversations {
            match conv_report {
                ConvReport::Toxicity(rows) => {
                    for row in rows {
                        sqlx::query(
                            "INSERT INTO tox_results (run_id, conv_nbr, msg_nbr, toxicity_type, \
                             toxicity_level) VALUES (?, ?, ?, ?, ?)",
                        )
                        .bind(run_id as i64)
                        .bind(conv_nbr as i64)
                        .bind(row.msg_nbr as i64)
                        .bind(&row.toxicity_type)
                        .bind(row.toxicity_level)
                        .execute(&mut *tx)
                        .await
                        .with_context(|| format!("Failed to insert tox_results for run {}", run_id))?;
                    }
                }
                ConvReport::Vocabulary(counts) => {
                    for ((word, rank), &frequency) in counts {
                        sqlx::query(
                            "INSERT INTO vocab_results (run_id, conv_nbr, word, word_rank, \
                             frequency) VALUES (?, ?, ?, ?, ?)",
                        )
                        .bind(run_id as i64)
                        .bind(conv_nbr as i64)
                        .bind(word)
                        .bind(*rank)
                        .bind(frequency as i64)
                        .execute(&mut *tx)
                        .await
                        .with_context(|| {
                            format!("Failed to insert vocab_results for run {}", run_id)
                        })?;
                    }
                }
                ConvReport::Coherence(rows) => {
                    for row in rows {
                        sqlx::query(
                            "INSERT INTO coherence_results (run_id, conv_nbr, msg_nbr, neg_pred) \
                             VALUES (?, ?, ?, ?)",
                        )
                        .bind(run_id as i64)
                        .bind(conv_nbr as i64)
                        .bind(row.msg_nbr as i64)
                        .bind(row.neg_pred)
                        .execute(&mut *tx)
                        .await
                        .with_context(|| {
                            format!("Failed to insert coherence_results for run {}", run_id)
                        })?;
                    }
                }
                ConvReport::Readability(index) => {
                    // No metric for this conversation means no row.
                    if let Some(index) = index {
                        sqlx::query(
                            "INSERT INTO readability_results (run_id, conv_nbr, readab_index) \
                             VALUES (?, ?, ?)",
                        )
                        .bind(run_id as i64)
                        .bind(conv_nbr as i64)
                        .bind(index)
                        .execute(&mut *tx)
                        .await
                        .with_context(|| {
                            format!("Failed to insert readability_results for run {}", run_id)
                        })?;
                    }
                }
            }
        }

        tx.commit().await.context("Failed to commit export")?;
        Ok(())
    }

    /// Recorded runs, most recent first.
    pub async fn list_runs(&self, limit: u32) -> Result<Vec<RunRow>> {
        let rows = sqlx::query(
            "SELECT run_id, testee_id, conv_partner_id, conv_length, amount_convs, conv_starter, \
             date_time_generated, date_time_tested \
             FROM runs ORDER BY run_id DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list runs")?;

        Ok(rows
            .iter()
            .map(|row| RunRow {
                run_id: row.get::<i64, _>("run_id") as u32,
                testee_id: row.get("testee_id"),
                conv_partner_id: row.get("conv_partner_id"),
                conv_length: row.get::<i64, _>("conv_length") as u32,
                amount_convs: row.get::<i64, _>("amount_convs") as u32,
                conv_starter: row.get("conv_starter"),
                date_time_generated: row.get("date_time_generated"),
                date_time_tested: row.get("date_time_tested"),
            })
            .collect())
    }
}

fn table_for(report: &ConvReport) -> &'static str {
    match report {
        ConvReport::Toxicity(_) => "tox_results",
        ConvReport::Vocabulary(_) => "vocab_results",
        ConvReport::Coherence(_) => "coherence_results",
        ConvReport::Readability(_) => "readability_results",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{CoherenceScore, ToxicityScore};
    use crate::db::Database;
    use tempfile::TempDir;

    fn run_config() -> RunConfig {
        RunConfig {
            testee_id: "blenderbot90m".to_string(),
            conv_partner_id: "partner-bot".to_string(),
            conv_length: 2,
            amount_convs: 1,
            conv_starter: String::new(),
            random_conv_start: true,
            date_time_generated: "2026-01-01 12:00:00".to_string(),
        }
    }

    fn readability_report(values: &[(u32, u32, f64)]) -> AnalyzerReport {
        let mut results = BTreeMap::new();
        for &(run_id, conv_nbr, index) in values {
            results.insert((run_id, conv_nbr), ConvReport::Readability(Some(index)));
        }
        AnalyzerReport {
            analyzer_id: "readability",
            results,
        }
    }

    async fn db() -> (TempDir, Database) {
        let temp_dir = TempDir::new().unwrap();
        let database = Database::new(&temp_dir.path().join("results.sqlite"))
            .await
            .unwrap();
        (temp_dir, database)
    }

    #[tokio::test]
    async fn record_run_preserves_original_metadata() {
        let (_dir, database) = db().await;
        let store = database.results();

        store.record_run(1, &run_config()).await.unwrap();

        let mut changed = run_config();
        changed.testee_id = "intruder".to_string();
        store.record_run(1, &changed).await.unwrap();

        let runs = store.list_runs(10).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].testee_id, "blenderbot90m");
        assert_eq!(runs[0].date_time_generated, "2026-01-01 12:00:00");
    }

    #[tokio::test]
    async fn export_twice_equals_export_once() {
        let (_dir, database) = db().await;
        let store = database.results();
        store.record_run(1, &run_config()).await.unwrap();

        let report = readability_report(&[(1, 1, 5.0), (1, 2, 7.5)]);
        store.export(&report).await.unwrap();
        store.export(&report).await.unwrap();

        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM readability_results WHERE run_id = 1")
                .fetch_one(database.pool())
                .await
                .unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn export_replaces_previous_results() {
        let (_dir, database) = db().await;
        let store = database.results();
        store.record_run(1, &run_config()).await.unwrap();

        store
            .export(&readability_report(&[(1, 1, 5.0)]))
            .await
            .unwrap();
        store
            .export(&readability_report(&[(1, 1, 9.0)]))
            .await
            .unwrap();

        let value: f64 = sqlx::query_scalar(
            "SELECT readab_index FROM readability_results WHERE run_id = 1 AND conv_nbr = 1",
        )
        .fetch_one(database.pool())
        .await
        .unwrap();
        assert_eq!(value, 9.0);
    }

    #[tokio::test]
    async fn export_keeps_other_runs_untouched() {
        let (_dir, database) = db().await;
        let store = database.results();
        store.record_run(1, &run_config()).await.unwrap();
        store.record_run(2, &run_config()).await.unwrap();

        store
            .export(&readability_report(&[(1, 1, 5.0), (2, 1, 6.0)]))
            .await
            .unwrap();
        // Re-export only run 2
        store
            .export(&readability_report(&[(2, 1, 8.0)]))
            .await
            .unwrap();

        let run1: f64 =
            sqlx::query_scalar("SELECT readab_index FROM readability_results WHERE run_id = 1")
                .fetch_one(database.pool())
                .await
                .unwrap();
        assert_eq!(run1, 5.0);
    }

    #[tokio::test]
    async fn exports_all_report_variants() {
        let (_dir, database) = db().await;
        let store = database.results();
        store.record_run(3, &run_config()).await.unwrap();

        let mut tox = BTreeMap::new();
        tox.insert(
            (3, 1),
            ConvReport::Toxicity(vec![ToxicityScore {
                msg_nbr: 1,
                toxicity_type: "toxic".to_string(),
                toxicity_level: 0.03,
            }]),
        );
        store
            .export(&AnalyzerReport {
                analyzer_id: "toxicity",
                results: tox,
            })
            .await
            .unwrap();

        let mut vocab = BTreeMap::new();
        let mut counts = crate::analysis::VocabularyCounts::new();
        counts.insert(("the".to_string(), Some(1)), 3);
        counts.insert(("frobnicator".to_string(), None), 1);
        vocab.insert((3, 1), ConvReport::Vocabulary(counts));
        store
            .export(&AnalyzerReport {
                analyzer_id: "vocabulary",
                results: vocab,
            })
            .await
            .unwrap();

        let mut coherence = BTreeMap::new();
        coherence.insert(
            (3, 1),
            ConvReport::Coherence(vec![CoherenceScore {
                msg_nbr: 1,
                neg_pred: 0.2,
            }]),
        );
        store
            .export(&AnalyzerReport {
                analyzer_id: "coherence",
                results: coherence,
            })
            .await
            .unwrap();

        let tox_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tox_results")
            .fetch_one(database.pool())
            .await
            .unwrap();
        assert_eq!(tox_count, 1);

        // NULL rank lands as NULL, not zero
        let null_rank: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM vocab_results WHERE word = 'frobnicator' AND word_rank IS NULL",
        )
        .fetch_one(database.pool())
        .await
        .unwrap();
        assert_eq!(null_rank, 1);

        let neg_pred: f64 = sqlx::query_scalar("SELECT neg_pred FROM coherence_results")
            .fetch_one(database.pool())
            .await
            .unwrap();
        assert_eq!(neg_pred, 0.2);
    }
}
