use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use bytes::Bytes;
use deadpool_postgres::Pool;
use futures::SinkExt;
use once_cell::sync::OnceCell;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::{Error, Result};

/// One batch ready to be handed to a transport
#[derive(Debug, Clone)]
pub struct CopyRequest {
    /// Target table in dot-notation
    pub table: String,
    /// Column names, in payload order
    pub columns: Vec<String>,
    pub delimiter: u8,
    /// CSV payload, header row included
    pub data: Bytes,
}

impl CopyRequest {
    fn copy_target(&self) -> String {
        format!(
            "{} ({}) FROM STDIN DELIMITER '{}' CSV HEADER",
            self.table,
            self.columns.join(", "),
            self.delimiter as char
        )
    }
}

/// High-throughput loader for the initial population of the company table.
///
/// A transport loads the whole CSV payload or fails, there is no per-row
/// reporting. Uniqueness is only enforced later by the index build.
#[async_trait]
pub trait BulkTransport: Send + Sync + fmt::Debug {
    /// Pre-flight check that the transport can be reached at all
    async fn check(&self) -> Result<()>;

    /// Load every row of `request` or fail as a unit
    async fn load(&self, request: &CopyRequest) -> Result<()>;
}

/// Encode rows as CSV with a header line
pub fn encode_rows<I, J>(columns: &[String], delimiter: u8, rows: &[(I, J)]) -> Result<Bytes>
where
    I: AsRef<str>,
    J: AsRef<str>,
{
    let mut w = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .from_writer(Vec::new());
    let csv_err = |e: csv::Error| Error::bulk_load("payload", e.to_string());
    w.write_record(columns).map_err(csv_err)?;
    for (id, json) in rows {
        w.write_record([id.as_ref(), json.as_ref()]).map_err(csv_err)?;
    }
    let data = w
        .into_inner()
        .map_err(|e| Error::bulk_load("payload", e.to_string()))?;
    Ok(Bytes::from(data))
}

/// Loads through the PostgreSQL command line client (`psql \copy`)
pub struct PsqlTransport {
    program: PathBuf,
    uri: String,
    resolved: OnceCell<PathBuf>,
}

impl PsqlTransport {
    pub fn new(program: impl Into<PathBuf>, uri: impl Into<String>) -> Self {
        PsqlTransport {
            program: program.into(),
            uri: uri.into(),
            resolved: OnceCell::new(),
        }
    }

    /// Locate the executable, either at an explicit path or in `PATH`
    fn locate(&self) -> Result<&Path> {
        let path = self.resolved.get_or_try_init(|| {
            find_executable(&self.program).ok_or_else(|| {
                Error::bulk_load(
                    "transport",
                    format!(
                        "postgres client ({}) not installed or not in PATH",
                        self.program.display()
                    ),
                )
            })
        })?;
        Ok(path.as_path())
    }
}

impl fmt::Debug for PsqlTransport {
    // uri may carry a password
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PsqlTransport")
            .field("program", &self.program)
            .finish()
    }
}

#[async_trait]
impl BulkTransport for PsqlTransport {
    async fn check(&self) -> Result<()> {
        self.locate().map(|_| ())
    }

    async fn load(&self, request: &CopyRequest) -> Result<()> {
        let program = self.locate()?;
        let mut child = Command::new(program)
            .arg(&self.uri)
            .arg("-v")
            .arg("ON_ERROR_STOP=1")
            .arg("-c")
            .arg(format!("\\copy {};", request.copy_target()))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::bulk_load(&request.table, e.to_string()))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::bulk_load(&request.table, "could not open stdin"))?;
        let data = request.data.clone();
        let feed = async move {
            stdin.write_all(&data).await?;
            stdin.shutdown().await
        };
        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        let output = output.map_err(|e| Error::bulk_load(&request.table, e.to_string()))?;

        if !output.status.success() {
            let diagnostic = String::from_utf8_lossy(&output.stderr).trim().to_string();
            log::warn!("bulk load into {} failed: {}", request.table, diagnostic);
            return Err(Error::bulk_load(
                &request.table,
                format!("{} ({})", diagnostic, output.status),
            ));
        }
        fed.map_err(|e| Error::bulk_load(&request.table, e.to_string()))
    }
}

fn find_executable(program: &Path) -> Option<PathBuf> {
    if program.components().count() > 1 {
        return program.is_file().then(|| program.to_path_buf());
    }
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

/// Loads through `COPY ... FROM STDIN` on a pooled connection
#[derive(Clone)]
pub struct CopyInTransport {
    pool: Pool,
}

impl CopyInTransport {
    pub fn new(pool: Pool) -> Self {
        CopyInTransport { pool }
    }
}

impl fmt::Debug for CopyInTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CopyInTransport").finish_non_exhaustive()
    }
}

#[async_trait]
impl BulkTransport for CopyInTransport {
    async fn check(&self) -> Result<()> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| Error::bulk_load("transport", e.to_string()))?;
        client
            .simple_query("SELECT 1")
            .await
            .map_err(|e| Error::bulk_load("transport", e.to_string()))?;
        Ok(())
    }

    async fn load(&self, request: &CopyRequest) -> Result<()> {
        let fail = |e: &dyn fmt::Display| Error::bulk_load(&request.table, e.to_string());
        let sql = format!("COPY {}", request.copy_target());
        let client = self.pool.get().await.map_err(|e| fail(&e))?;
        let sink = client
            .copy_in::<_, Bytes>(sql.as_str())
            .await
            .map_err(|e| fail(&e))?;
        futures::pin_mut!(sink);
        sink.send(request.data.clone()).await.map_err(|e| fail(&e))?;
        sink.as_mut().finish().await.map_err(|e| fail(&e))?;
        Ok(())
    }
}
