use std::sync::Arc;

use chrono::NaiveDate;
use sqlx::PgPool;
use uuid::Uuid;

use health_export_ingest::config::PipelineConfig;
use health_export_ingest::services::batch_manager;
use health_export_ingest::services::pipeline::{run_pipeline, PipelineShared};
use health_export_ingest::services::source_registry::SourceRegistry;

const SAMPLE_EXPORT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<HealthData>
  <Record type="HKQuantityTypeIdentifierStepCount" sourceName="iPhone" sourceVersion="17.0"
          startDate="2024-01-15 08:00:00 -0500" endDate="2024-01-15 08:01:00 -0500"
          value="120" unit="count"/>
  <Record type="HKCategoryTypeIdentifierSleepAnalysis" sourceName="Watch" sourceVersion="10.0"
          startDate="2024-01-15 23:00:00 -0500" endDate="2024-01-16 06:00:00 -0500"
          value="HKCategoryValueSleepAnalysisInBed"/>
  <Workout workoutActivityType="HKWorkoutActivityTypeRunning" sourceName="Watch" sourceVersion="10.0"
           startDate="2024-01-15 07:00:00 -0500" endDate="2024-01-15 07:30:00 -0500"
           duration="30" durationUnit="min" totalDistance="5" totalDistanceUnit="km"
           totalEnergyBurned="300" totalEnergyBurnedUnit="kcal">
    <MetadataEntry key="weather" value="sunny"/>
    <WorkoutRoute>
      <Location date="2024-01-15 07:00:00 -0500" latitude="40.0" longitude="-75.0" altitude="10"/>
      <Location date="2024-01-15 07:15:00 -0500" latitude="40.01" longitude="-75.01" altitude="12"/>
    </WorkoutRoute>
  </Workout>
  <ActivitySummary dateComponents="2024-01-15" activeEnergyBurned="500" activeEnergyBurnedUnit="kcal"
                    activeEnergyBurnedGoal="600" appleExerciseTime="45" appleExerciseTimeGoal="30"
                    appleStandHours="10" appleStandHoursGoal="12"/>
</HealthData>
"#;

async fn write_sample_export(dir: &std::path::Path) -> std::path::PathBuf {
    let path = dir.join("export.xml");
    tokio::fs::write(&path, SAMPLE_EXPORT).await.unwrap();
    path
}

#[sqlx::test]
async fn ingesting_a_small_export_lands_every_entity_kind(pool: PgPool) -> sqlx::Result<()> {
    let dir = tempfile::tempdir().unwrap();
    let xml_path = write_sample_export(dir.path()).await;

    let owner_id = Uuid::new_v4();
    let batch = batch_manager::create_batch(&pool, owner_id, "export.xml".to_string())
        .await
        .unwrap();

    let config = Arc::new(PipelineConfig {
        batch_size: 10,
        ..PipelineConfig::default()
    });
    let registry = Arc::new(SourceRegistry::warm(pool.clone()).await.unwrap());
    let shared = Arc::new(PipelineShared::new(config.max_diagnostic_messages));

    let summary = run_pipeline(
        pool.clone(),
        config,
        registry,
        owner_id,
        batch.id,
        &xml_path,
        shared,
    )
    .await
    .unwrap();

    assert!(!summary.cancelled);
    assert_eq!(summary.skipped_count, 0);

    let sample_count: (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM quantitative_samples WHERE batch_id = $1")
            .bind(batch.id)
            .fetch_one(&pool)
            .await?;
    assert_eq!(sample_count.0, 1);

    let categorical_count: (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM categorical_samples WHERE batch_id = $1")
            .bind(batch.id)
            .fetch_one(&pool)
            .await?;
    assert_eq!(categorical_count.0, 1);

    let workout_row: (String, f64) =
        sqlx::query_as("SELECT activity_type, distance_meters FROM workouts WHERE batch_id = $1")
            .bind(batch.id)
            .fetch_one(&pool)
            .await?;
    assert_eq!(workout_row.0, "Running");
    assert!((workout_row.1 - 5000.0).abs() < 1e-6);

    let route_point_count: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM route_points rp JOIN workouts w ON w.id = rp.workout_id WHERE w.batch_id = $1",
    )
    .bind(batch.id)
    .fetch_one(&pool)
    .await?;
    assert_eq!(route_point_count.0, 2);

    let summary_row: (NaiveDate,) =
        sqlx::query_as("SELECT date FROM activity_summaries WHERE batch_id = $1")
            .bind(batch.id)
            .fetch_one(&pool)
            .await?;
    assert_eq!(summary_row.0, NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());

    Ok(())
}

#[sqlx::test]
async fn rerunning_the_same_export_does_not_duplicate_rows(pool: PgPool) -> sqlx::Result<()> {
    let dir = tempfile::tempdir().unwrap();
    let xml_path = write_sample_export(dir.path()).await;
    let owner_id = Uuid::new_v4();
    let config = Arc::new(PipelineConfig::default());
    let registry = Arc::new(SourceRegistry::warm(pool.clone()).await.unwrap());

    for _ in 0..2 {
        let batch = batch_manager::create_batch(&pool, owner_id, "export.xml".to_string())
            .await
            .unwrap();
        let shared = Arc::new(PipelineShared::new(config.max_diagnostic_messages));
        run_pipeline(
            pool.clone(),
            config.clone(),
            registry.clone(),
            owner_id,
            batch.id,
            &xml_path,
            shared,
        )
        .await
        .unwrap();
    }

    let sample_count: (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM quantitative_samples WHERE owner_id = $1")
            .bind(owner_id)
            .fetch_one(&pool)
            .await?;
    assert_eq!(sample_count.0, 1);

    Ok(())
}
