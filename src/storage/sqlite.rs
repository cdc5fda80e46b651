use super::{Baseline, Build, DeletedRows, Screenshot, StoreError};
use crate::annotate::ImageAnnotation;
use crate::compare::status::{ScreenRecord, ScreenStatus};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use std::time::Duration;

#[derive(Clone)]
pub struct ResultStore {
    pool: SqlitePool,
}

impl ResultStore {
    /// Open (creating if needed) the database at `db_url` and ensure the schema.
    pub async fn connect(db_url: &str) -> Result<Self, StoreError> {
        if let Some(path) = db_url.strip_prefix("sqlite://") {
            if let Some(parent) = std::path::Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
        }
        let options = SqliteConnectOptions::from_str(db_url)?.create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;
        Self::with_pool(pool).await
    }

    /// Private in-memory database, one connection kept alive for the store's lifetime.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
            .connect("sqlite::memory:")
            .await?;
        Self::with_pool(pool).await
    }

    pub async fn with_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS builds (
                project_id TEXT NOT NULL,
                build_id TEXT NOT NULL,
                build_name TEXT,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (project_id, build_id)
            );",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS baselines (
                project_id TEXT NOT NULL,
                screen_name TEXT NOT NULL,
                source_url TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (project_id, screen_name)
            );",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS screenshots (
                project_id TEXT NOT NULL,
                build_id TEXT NOT NULL,
                image_name TEXT NOT NULL,
                source_url TEXT NOT NULL,
                PRIMARY KEY (project_id, build_id, image_name)
            );",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS results (
                project_id TEXT NOT NULL,
                build_id TEXT NOT NULL,
                image_name TEXT NOT NULL,
                status TEXT NOT NULL,
                diff_percent INTEGER NOT NULL DEFAULT 0,
                heatmap_url TEXT,
                coordinates TEXT,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (project_id, build_id, image_name)
            );",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS annotations (
                project_id TEXT NOT NULL,
                build_id TEXT NOT NULL,
                image_name TEXT NOT NULL,
                reference_url TEXT,
                screenshot_url TEXT,
                items TEXT NOT NULL DEFAULT '[]',
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (project_id, build_id, image_name)
            );",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ── Builds ─────────────────────────────────────────

    /// Return the build, creating it on first reference.
    pub async fn ensure_build(
        &self,
        project_id: &str,
        build_id: &str,
        build_name: Option<&str>,
    ) -> Result<Build, StoreError> {
        sqlx::query(
            "INSERT OR IGNORE INTO builds (project_id, build_id, build_name, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(project_id)
        .bind(build_id)
        .bind(build_name)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        let row = sqlx::query(
            "SELECT project_id, build_id, build_name, created_at FROM builds WHERE project_id = ? AND build_id = ?",
        )
        .bind(project_id)
        .bind(build_id)
        .fetch_one(&self.pool)
        .await?;
        build_from_row(&row)
    }

    pub async fn get_build(&self, project_id: &str, build_id: &str) -> Result<Option<Build>, StoreError> {
        let row = sqlx::query(
            "SELECT project_id, build_id, build_name, created_at FROM builds WHERE project_id = ? AND build_id = ?",
        )
        .bind(project_id)
        .bind(build_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(build_from_row).transpose()
    }

    /// Newest first.
    pub async fn list_builds(&self, project_id: &str) -> Result<Vec<Build>, StoreError> {
        let rows = sqlx::query(
            "SELECT project_id, build_id, build_name, created_at FROM builds WHERE project_id = ? ORDER BY created_at DESC, build_id DESC",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(build_from_row).collect()
    }

    // ── Baselines ──────────────────────────────────────

    /// Register or replace the reference image for a screen.
    pub async fn upsert_baseline(
        &self,
        project_id: &str,
        screen_name: &str,
        source_url: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO baselines (project_id, screen_name, source_url, created_at) VALUES (?, ?, ?, ?)
             ON CONFLICT (project_id, screen_name) DO UPDATE SET source_url = excluded.source_url, created_at = excluded.created_at",
        )
        .bind(project_id)
        .bind(screen_name)
        .bind(source_url)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn find_baseline(
        &self,
        project_id: &str,
        screen_name: &str,
    ) -> Result<Option<Baseline>, StoreError> {
        let row = sqlx::query(
            "SELECT project_id, screen_name, source_url, created_at FROM baselines WHERE project_id = ? AND screen_name = ?",
        )
        .bind(project_id)
        .bind(screen_name)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(baseline_from_row).transpose()
    }

    pub async fn list_baselines(&self, project_id: &str) -> Result<Vec<Baseline>, StoreError> {
        let rows = sqlx::query(
            "SELECT project_id, screen_name, source_url, created_at FROM baselines WHERE project_id = ? ORDER BY screen_name",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(baseline_from_row).collect()
    }

    /// Returns whether a baseline was removed.
    pub async fn delete_baseline(&self, project_id: &str, screen_name: &str) -> Result<bool, StoreError> {
        let done = sqlx::query("DELETE FROM baselines WHERE project_id = ? AND screen_name = ?")
            .bind(project_id)
            .bind(screen_name)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected() > 0)
    }

    /// Remove every baseline of a project. Returns how many were removed.
    pub async fn delete_baselines(&self, project_id: &str) -> Result<u64, StoreError> {
        let done = sqlx::query("DELETE FROM baselines WHERE project_id = ?")
            .bind(project_id)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected())
    }

    // ── Screenshots ────────────────────────────────────

    pub async fn upsert_screenshot(
        &self,
        project_id: &str,
        build_id: &str,
        image_name: &str,
        source_url: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO screenshots (project_id, build_id, image_name, source_url) VALUES (?, ?, ?, ?)
             ON CONFLICT (project_id, build_id, image_name) DO UPDATE SET source_url = excluded.source_url",
        )
        .bind(project_id)
        .bind(build_id)
        .bind(image_name)
        .bind(source_url)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_screenshots(
        &self,
        project_id: &str,
        build_id: &str,
    ) -> Result<Vec<Screenshot>, StoreError> {
        let rows = sqlx::query(
            "SELECT project_id, build_id, image_name, source_url FROM screenshots
             WHERE project_id = ? AND build_id = ? ORDER BY image_name",
        )
        .bind(project_id)
        .bind(build_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(Screenshot {
                    project_id: row.try_get("project_id")?,
                    build_id: row.try_get("build_id")?,
                    image_name: row.try_get("image_name")?,
                    source_url: row.try_get("source_url")?,
                })
            })
            .collect()
    }

    // ── Screen records ─────────────────────────────────

    pub async fn get_record(
        &self,
        project_id: &str,
        build_id: &str,
        image_name: &str,
    ) -> Result<Option<ScreenRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT project_id, build_id, image_name, status, diff_percent, heatmap_url, coordinates, updated_at
             FROM results WHERE project_id = ? AND build_id = ? AND image_name = ?",
        )
        .bind(project_id)
        .bind(build_id)
        .bind(image_name)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(record_from_row).transpose()
    }

    /// Insert or overwrite the single current record for a screen.
    pub async fn save_record(&self, record: &ScreenRecord) -> Result<(), StoreError> {
        let coordinates = record
            .coordinates
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            "INSERT INTO results (project_id, build_id, image_name, status, diff_percent, heatmap_url, coordinates, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (project_id, build_id, image_name) DO UPDATE SET
                status = excluded.status,
                diff_percent = excluded.diff_percent,
                heatmap_url = excluded.heatmap_url,
                coordinates = excluded.coordinates,
                updated_at = excluded.updated_at",
        )
        .bind(&record.project_id)
        .bind(&record.build_id)
        .bind(&record.image_name)
        .bind(record.result_status.as_str())
        .bind(record.diff_percent as i64)
        .bind(&record.heatmap_url)
        .bind(coordinates)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_records(
        &self,
        project_id: &str,
        build_id: &str,
    ) -> Result<Vec<ScreenRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT project_id, build_id, image_name, status, diff_percent, heatmap_url, coordinates, updated_at
             FROM results WHERE project_id = ? AND build_id = ? ORDER BY image_name",
        )
        .bind(project_id)
        .bind(build_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(record_from_row).collect()
    }

    // ── Annotations ────────────────────────────────────

    pub async fn get_annotation(
        &self,
        project_id: &str,
        build_id: &str,
        image_name: &str,
    ) -> Result<Option<ImageAnnotation>, StoreError> {
        let row = sqlx::query(
            "SELECT project_id, build_id, image_name, reference_url, screenshot_url, items, updated_at
             FROM annotations WHERE project_id = ? AND build_id = ? AND image_name = ?",
        )
        .bind(project_id)
        .bind(build_id)
        .bind(image_name)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(annotation_from_row).transpose()
    }

    pub async fn save_annotation(&self, annotation: &ImageAnnotation) -> Result<(), StoreError> {
        let items = serde_json::to_string(&annotation.items)?;
        sqlx::query(
            "INSERT INTO annotations (project_id, build_id, image_name, reference_url, screenshot_url, items, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (project_id, build_id, image_name) DO UPDATE SET
                reference_url = excluded.reference_url,
                screenshot_url = excluded.screenshot_url,
                items = excluded.items,
                updated_at = excluded.updated_at",
        )
        .bind(&annotation.project_id)
        .bind(&annotation.build_id)
        .bind(&annotation.image_name)
        .bind(&annotation.reference_url)
        .bind(&annotation.screenshot_url)
        .bind(items)
        .bind(annotation.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_annotations(
        &self,
        project_id: &str,
        build_id: &str,
    ) -> Result<Vec<ImageAnnotation>, StoreError> {
        let rows = sqlx::query(
            "SELECT project_id, build_id, image_name, reference_url, screenshot_url, items, updated_at
             FROM annotations WHERE project_id = ? AND build_id = ? ORDER BY image_name",
        )
        .bind(project_id)
        .bind(build_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(annotation_from_row).collect()
    }

    // ── Teardown ───────────────────────────────────────

    /// Remove every row belonging to a project.
    pub async fn delete_project(&self, project_id: &str) -> Result<DeletedRows, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut deleted = DeletedRows::default();

        for (table, slot) in [
            ("builds", &mut deleted.builds),
            ("baselines", &mut deleted.baselines),
            ("screenshots", &mut deleted.screenshots),
            ("results", &mut deleted.results),
            ("annotations", &mut deleted.annotations),
        ] {
            let sql = format!("DELETE FROM {} WHERE project_id = ?", table);
            *slot = sqlx::query(&sql)
                .bind(project_id)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }

        tx.commit().await?;
        tracing::info!(project_id, ?deleted, "project deleted");
        Ok(deleted)
    }
}

fn build_from_row(row: &SqliteRow) -> Result<Build, StoreError> {
    Ok(Build {
        project_id: row.try_get("project_id")?,
        build_id: row.try_get("build_id")?,
        build_name: row.try_get("build_name")?,
        created_at: row.try_get("created_at")?,
    })
}

fn baseline_from_row(row: &SqliteRow) -> Result<Baseline, StoreError> {
    Ok(Baseline {
        project_id: row.try_get("project_id")?,
        screen_name: row.try_get("screen_name")?,
        source_url: row.try_get("source_url")?,
        created_at: row.try_get("created_at")?,
    })
}

fn record_from_row(row: &SqliteRow) -> Result<ScreenRecord, StoreError> {
    let status: String = row.try_get("status")?;
    let result_status = status.parse::<ScreenStatus>().map_err(StoreError::Corrupt)?;
    let diff_percent: i64 = row.try_get("diff_percent")?;
    let diff_percent = u8::try_from(diff_percent)
        .map_err(|_| StoreError::Corrupt(format!("diff_percent out of range: {}", diff_percent)))?;
    let coordinates: Option<String> = row.try_get("coordinates")?;

    Ok(ScreenRecord {
        project_id: row.try_get("project_id")?,
        build_id: row.try_get("build_id")?,
        image_name: row.try_get("image_name")?,
        result_status,
        diff_percent,
        heatmap_url: row.try_get("heatmap_url")?,
        coordinates: coordinates.as_deref().map(serde_json::from_str).transpose()?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn annotation_from_row(row: &SqliteRow) -> Result<ImageAnnotation, StoreError> {
    let items: String = row.try_get("items")?;
    Ok(ImageAnnotation {
        project_id: row.try_get("project_id")?,
        build_id: row.try_get("build_id")?,
        image_name: row.try_get("image_name")?,
        reference_url: row.try_get("reference_url")?,
        screenshot_url: row.try_get("screenshot_url")?,
        items: serde_json::from_str(&items)?,
        updated_at: row.try_get("updated_at")?,
    })
}
