use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use tokio_postgres::NoTls;

use crate::bulk::{encode_rows, BulkTransport, CopyInTransport, CopyRequest, PsqlTransport};
use crate::catalog::{Catalog, Statement};
use crate::constants::{BULK_DELIMITER, DEFAULT_MAX_CONNECTIONS, PSQL_PROGRAM};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::types::Naming;

/// Bulk transport used by [`Store::load_batch`]
#[derive(Clone)]
pub enum Transport {
    /// `psql \copy` through an external executable
    Psql { program: PathBuf },
    /// `COPY ... FROM STDIN` on a pooled connection
    CopyIn,
    Custom(Arc<dyn BulkTransport>),
}

impl Default for Transport {
    fn default() -> Self {
        Transport::Psql {
            program: PathBuf::from(PSQL_PROGRAM),
        }
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Psql { program } => f.debug_struct("Psql").field("program", program).finish(),
            Transport::CopyIn => f.write_str("CopyIn"),
            Transport::Custom(t) => f.debug_tuple("Custom").field(t).finish(),
        }
    }
}

/// Options for opening a [`Store`]
#[derive(Clone)]
pub struct StoreOptions {
    uri: String,
    naming: Naming,
    max_connections: usize,
    transport: Transport,
}

impl StoreOptions {
    /// Defaults for `uri`, with tables under `schema`
    pub fn new(uri: impl Into<String>, schema: impl Into<String>) -> Self {
        StoreOptions {
            uri: uri.into(),
            naming: Naming::new(schema),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            transport: Transport::default(),
        }
    }

    /// Override the naming convention, schema included
    pub fn set_naming(&mut self, naming: Naming) -> &mut Self {
        self.naming = naming;
        self
    }

    pub fn set_max_connections(&mut self, max: usize) -> Result<&mut Self> {
        if max == 0 {
            return Err(Error::invalid_input(
                max.to_string(),
                "pool needs at least one connection",
            ));
        }
        self.max_connections = max;
        Ok(self)
    }

    pub fn set_transport(&mut self, transport: Transport) -> &mut Self {
        self.transport = transport;
        self
    }

    pub fn naming(&self) -> &Naming {
        &self.naming
    }

    /// Render the statements, create the pool and check it is alive.
    ///
    /// The store is returned fully usable or not at all.
    pub async fn open(self) -> Result<Store> {
        let catalog = Catalog::load(&self.naming)?;

        let pg_config: tokio_postgres::Config = self
            .uri
            .parse()
            .map_err(|e: tokio_postgres::Error| Error::Connection(e.to_string()))?;
        let mut manager_config = ManagerConfig::default();
        manager_config.recycling_method = RecyclingMethod::Fast;
        let manager = Manager::from_config(pg_config, NoTls, manager_config);
        let pool = Pool::builder(manager)
            .max_size(self.max_connections)
            .build()
            .map_err(|e| Error::Connection(e.to_string()))?;

        if let Err(e) = ping(&pool).await {
            pool.close();
            return Err(e);
        }

        let transport: Arc<dyn BulkTransport> = match self.transport {
            Transport::Psql { program } => Arc::new(PsqlTransport::new(program, self.uri.clone())),
            Transport::CopyIn => Arc::new(CopyInTransport::new(pool.clone())),
            Transport::Custom(t) => t,
        };

        log::info!(
            "Connected to postgres, tables under schema {}",
            self.naming.schema
        );
        Ok(Store {
            pool,
            naming: self.naming,
            catalog,
            transport,
        })
    }
}

impl fmt::Debug for StoreOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreOptions")
            .field("naming", &self.naming)
            .field("max_connections", &self.max_connections)
            .field("transport", &self.transport)
            .finish_non_exhaustive()
    }
}

async fn ping(pool: &Pool) -> Result<()> {
    let client = pool
        .get()
        .await
        .map_err(|e| Error::Connection(e.to_string()))?;
    client
        .simple_query("SELECT 1")
        .await
        .map_err(|e| Error::Connection(e.to_string()))?;
    Ok(())
}

/// Handle over the company and metadata tables.
///
/// Owns the connection pool; every call borrows a pooled connection and
/// releases it when done. Safe to share between tasks.
pub struct Store {
    pool: Pool,
    naming: Naming,
    catalog: Catalog,
    transport: Arc<dyn BulkTransport>,
}

impl Store {
    /// Open with the default naming convention and transport
    pub async fn open(uri: impl Into<String>, schema: impl Into<String>) -> Result<Self> {
        StoreOptions::new(uri, schema).open().await
    }

    /// Release every pooled connection
    pub fn close(self) {
        log::info!("Closing connections to postgres");
        self.pool.close();
    }

    pub fn naming(&self) -> &Naming {
        &self.naming
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub(crate) async fn client(&self) -> Result<deadpool_postgres::Client> {
        self.pool
            .get()
            .await
            .map_err(|e| Error::storage("getting a connection from the pool", e))
    }

    pub(crate) async fn prepare(
        &self,
        client: &deadpool_postgres::Client,
        statement: Statement,
    ) -> Result<tokio_postgres::Statement> {
        client
            .prepare_cached(self.catalog.statement(statement))
            .await
            .map_err(|e| Error::postgres(format!("preparing {}", statement.name()), e))
    }

    async fn execute_script(&self, ctx: &Context, statement: Statement, action: &str) -> Result<()> {
        let sql = self.catalog.statement(statement);
        ctx.run(async {
            let client = self.client().await?;
            client
                .batch_execute(sql)
                .await
                .map_err(|e| Error::postgres(format!("{} with: {}", action, sql), e))
        })
        .await
    }

    /// Create the schema and both tables. Fails if the tables exist.
    pub async fn create_schema(&self, ctx: &Context) -> Result<()> {
        log::info!("Creating table {}…", self.naming.company_table_full_name());
        self.execute_script(ctx, Statement::CreateSchema, "creating table")
            .await
    }

    /// Drop both tables. Fails if they are missing.
    pub async fn drop_schema(&self, ctx: &Context) -> Result<()> {
        log::info!("Dropping table {}…", self.naming.company_table_full_name());
        self.execute_script(ctx, Statement::DropSchema, "dropping table")
            .await
    }

    /// Drop duplicated ids and make the id unique. Runs after every bulk
    /// load of a cycle and before any merge; safe to run again.
    pub async fn build_index(&self, ctx: &Context) -> Result<()> {
        log::info!("Creating indexes…");
        self.execute_script(ctx, Statement::CreateIndex, "creating index")
            .await
    }

    /// Pre-flight check of the bulk transport
    pub async fn check_transport(&self, ctx: &Context) -> Result<()> {
        ctx.run(self.transport.check()).await
    }

    /// Append `(id, json)` rows through the bulk transport, all or nothing
    pub async fn load_batch<I, J>(&self, ctx: &Context, rows: &[(I, J)]) -> Result<()>
    where
        I: AsRef<str>,
        J: AsRef<str>,
    {
        for (id, _) in rows {
            let id = id.as_ref();
            id.parse::<i64>()
                .map_err(|e| Error::invalid_input(id, format!("cnpj is not an integer: {}", e)))?;
        }
        ctx.check()?;
        if rows.is_empty() {
            return Ok(());
        }

        let columns = vec![self.naming.id_field.clone(), self.naming.json_field.clone()];
        let data = encode_rows(&columns, BULK_DELIMITER, rows)?;
        let request = CopyRequest {
            table: self.naming.company_table_full_name(),
            columns,
            delimiter: BULK_DELIMITER,
            data,
        };
        log::debug!("Loading {} rows into {}", rows.len(), request.table);

        ctx.run(async {
            self.transport.check().await?;
            self.transport.load(&request).await
        })
        .await
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("naming", &self.naming)
            .field("transport", &self.transport)
            .finish_non_exhaustive()
    }
}
