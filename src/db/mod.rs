mod repository;
mod schema;

pub use repository::{RecordOutcome, Repository};

#[cfg(test)]
pub(crate) mod testing {
    use super::Repository;

    /// A repository on a fresh database file; keep the dir alive for the test.
    pub(crate) async fn test_repository() -> (tempfile::TempDir, Repository) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feeds.db");
        let repo = Repository::new(path.to_str().unwrap()).await.unwrap();
        (dir, repo)
    }
}
