/// Errors surfaced by a single `CtLogClient` call (`get_sth` / `get_entries`).
///
/// Every variant is treated as network-transient by the Puller: it counts
/// toward `failedScanCount` and is followed by a fixed backoff sleep, never
/// an immediate abort.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("request to {log} failed: {source}")]
    Request {
        log: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("{log} returned a malformed response: {0}", log = .log)]
    Malformed { log: String, detail: String },
}

/// Errors from a single parallel scan over `[start, end)`.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("fetcher pool task panicked or was cancelled")]
    TaskJoin(#[from] tokio::task::JoinError),
}

/// Errors from `CommitBatch` that are not the expected duplicate-key case.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("seen-set query failed: {0}")]
    SeenSetQuery(#[source] sqlx::Error),
    #[error("seen-set insert failed: {0}")]
    SeenSetInsert(#[source] sqlx::Error),
    #[error("shard file I/O failed for prefix {prefix}: {source}")]
    ShardWrite {
        prefix: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from the progress store: fatal at startup, and fatal during a run.
#[derive(Debug, thiserror::Error)]
pub enum ProgressError {
    #[error("failed to open progress store at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: sqlx::Error,
    },
    #[error("failed to migrate progress store schema: {0}")]
    Migrate(#[source] sqlx::Error),
    #[error("failed to read progress row for {name}: {source}")]
    Read {
        name: String,
        #[source]
        source: sqlx::Error,
    },
    #[error("failed to persist progress row for {name}: {source}")]
    Write {
        name: String,
        #[source]
        source: sqlx::Error,
    },
}
