use super::*;
use tempfile::TempDir;

async fn create_test_store() -> (IndexStore, TempDir) {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let store = IndexStore::new(temp_dir.path().join("vectors"))
        .await
        .expect("should create index store");
    (store, temp_dir)
}

fn test_record(text: &str, department: &str, vector: Vec<f32>) -> ChunkRecord {
    let mut metadata = DocumentMetadata::new(
        format!("data/{}/notes.md", department.to_lowercase()),
        SourceFormat::Markdown,
        department,
    );
    metadata.chunk_index = Some(0);
    ChunkRecord::new(vector, Document::new(text.to_string(), metadata))
}

fn finance_records() -> Vec<ChunkRecord> {
    vec![
        test_record("Budget approvals", "Finance", vec![1.0, 0.0, 0.0, 0.0]),
        test_record("Travel expenses", "Finance", vec![0.0, 1.0, 0.0, 0.0]),
        test_record("Payroll schedule", "Finance", vec![0.0, 0.0, 1.0, 0.0]),
    ]
}

#[tokio::test]
async fn store_initialization_creates_directory() {
    let (store, temp_dir) = create_test_store().await;
    assert!(store.path().exists());
    assert_eq!(store.path(), temp_dir.path().join("vectors"));
}

#[tokio::test]
async fn build_index_reports_counts() {
    let (store, _temp_dir) = create_test_store().await;

    let index = store
        .build_index("Finance", &finance_records())
        .await
        .expect("should build index");

    assert_eq!(index.department(), "Finance");
    assert_eq!(index.chunk_count(), 3);
    assert_eq!(index.dimension(), 4);
    assert_eq!(index.count_rows().await.expect("should count rows"), 3);
}

#[tokio::test]
async fn search_returns_nearest_first() {
    let (store, _temp_dir) = create_test_store().await;
    let index = store
        .build_index("Finance", &finance_records())
        .await
        .expect("should build index");

    let hits = index
        .search(&[0.0, 0.9, 0.1, 0.0], 2)
        .await
        .expect("search should succeed");

    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].document.text, "Travel expenses");
    assert_eq!(hits[0].document.metadata.department, "Finance");
    assert_eq!(hits[0].document.metadata.format, SourceFormat::Markdown);
    assert_eq!(hits[0].document.metadata.chunk_index, Some(0));
    assert_eq!(hits[0].document.metadata.row, None);
    assert!(hits[0].score >= hits[1].score);
    assert!((hits[0].score - (1.0 - hits[0].distance)).abs() < f32::EPSILON);
}

#[tokio::test]
async fn rebuild_leaves_earlier_handles_searchable() {
    let (store, _temp_dir) = create_test_store().await;
    let first = store
        .build_index("Finance", &finance_records())
        .await
        .expect("should build index");

    let second = store
        .build_index(
            "finance",
            &[test_record("Only row", "Finance", vec![0.5, 0.5])],
        )
        .await
        .expect("should rebuild index");

    assert_ne!(first.table_name(), second.table_name());
    assert_eq!(second.count_rows().await.expect("should count rows"), 1);
    assert_eq!(second.dimension(), 2);

    let hits = first
        .search(&[0.0, 0.9, 0.1, 0.0], 3)
        .await
        .expect("earlier build should still search");
    assert_eq!(hits.len(), 3);
    assert_eq!(hits[0].document.text, "Travel expenses");

    let opened = store
        .open_index("Finance")
        .await
        .expect("open should succeed")
        .expect("table should exist");
    assert_eq!(opened.table_name(), second.table_name());
    assert_eq!(opened.chunk_count(), 1);
}

#[tokio::test]
async fn prune_keeps_only_the_newest_build() {
    let (store, _temp_dir) = create_test_store().await;
    for _ in 0..3 {
        store
            .build_index("Finance", &finance_records())
            .await
            .expect("should build index");
    }
    let newest = store
        .build_index("Finance", &finance_records())
        .await
        .expect("should build index");
    let marketing = store
        .build_index("Marketing", &[test_record("Launch", "Marketing", vec![1.0, 0.0])])
        .await
        .expect("should build index");

    assert_eq!(
        store.table_generations("finance").await.expect("should list").len(),
        4
    );
    assert_eq!(store.prune_index("Finance").await.expect("should prune"), 3);
    assert_eq!(
        store.table_generations("Finance").await.expect("should list"),
        vec![newest.table_name().to_string()]
    );
    assert_eq!(store.prune_index("Finance").await.expect("should prune"), 0);

    assert_eq!(
        store.table_generations("Marketing").await.expect("should list"),
        vec![marketing.table_name().to_string()]
    );
    assert!(store.drop_table(marketing.table_name()).await.expect("should drop"));
    assert!(!store.drop_table(marketing.table_name()).await.expect("should drop"));
}

#[tokio::test]
async fn mismatched_dimensions_are_rejected() {
    let (store, _temp_dir) = create_test_store().await;
    let records = vec![
        test_record("a", "Hr", vec![1.0, 0.0, 0.0]),
        test_record("b", "Hr", vec![1.0, 0.0]),
    ];

    let result = store.build_index("Hr", &records).await;
    assert!(matches!(result, Err(AssistantError::Embedding(_))));
}

#[tokio::test]
async fn empty_build_is_rejected() {
    let (store, _temp_dir) = create_test_store().await;
    assert!(store.build_index("Hr", &[]).await.is_err());
}

#[tokio::test]
async fn query_dimension_must_match() {
    let (store, _temp_dir) = create_test_store().await;
    let index = store
        .build_index("Finance", &finance_records())
        .await
        .expect("should build index");

    let result = index.search(&[1.0, 0.0], 1).await;
    assert!(matches!(result, Err(AssistantError::Embedding(_))));
}

#[tokio::test]
async fn open_and_drop_index() {
    let (store, _temp_dir) = create_test_store().await;
    assert!(
        store
            .open_index("Finance")
            .await
            .expect("open should succeed")
            .is_none()
    );

    let built = store
        .build_index("Finance", &finance_records())
        .await
        .expect("should build index");

    let opened = store
        .open_index("finance")
        .await
        .expect("open should succeed")
        .expect("table should exist");
    assert_eq!(opened.chunk_count(), 3);
    assert_eq!(opened.dimension(), 4);
    assert_eq!(
        opened.built_at().timestamp(),
        built.built_at().timestamp()
    );

    assert!(store.drop_index("Finance").await.expect("drop should succeed"));
    assert!(!store.drop_index("Finance").await.expect("drop should succeed"));
    assert!(
        store
            .open_index("Finance")
            .await
            .expect("open should succeed")
            .is_none()
    );
}

#[tokio::test]
async fn csv_rows_keep_row_index() {
    let (store, _temp_dir) = create_test_store().await;
    let mut metadata = DocumentMetadata::new("data/hr/hr_data.csv", SourceFormat::Csv, "Hr");
    metadata.row = Some(7);
    let record = ChunkRecord::new(
        vec![0.3, 0.4],
        Document::new("full_name: Ada".to_string(), metadata),
    );

    let index = store
        .build_index("Hr", &[record])
        .await
        .expect("should build index");
    let hits = index.search(&[0.3, 0.4], 4).await.expect("search should succeed");

    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].document.metadata.row, Some(7));
    assert_eq!(hits[0].document.metadata.chunk_index, None);
    assert_eq!(hits[0].document.metadata.source, PathBuf::from("data/hr/hr_data.csv"));
}
