use futures::future::join_all;
use tokio_postgres::types::ToSql;

use crate::catalog::Statement;
use crate::companies::{first_failure, queue_updates, FragmentShape, RangeUpdate};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::store::Store;

impl Store {
    /// [`Store::merge_json`] as a single transaction: either every statement
    /// of the batch commits or none does. Dropping the call before commit
    /// rolls the batch back.
    pub async fn merge_json_atomic<B, F>(&self, ctx: &Context, items: &[(B, F)]) -> Result<()>
    where
        B: AsRef<str> + Sync,
        F: AsRef<str> + Sync,
    {
        let updates = queue_updates(items, FragmentShape::Object)?;
        self.send_transaction(ctx, Statement::MergeJson, &updates, "updating companies")
            .await
    }

    /// [`Store::append_partners`] as a single transaction
    pub async fn append_partners_atomic<B, F>(&self, ctx: &Context, items: &[(B, F)]) -> Result<()>
    where
        B: AsRef<str> + Sync,
        F: AsRef<str> + Sync,
    {
        let updates = queue_updates(items, FragmentShape::Array)?;
        self.send_transaction(ctx, Statement::AppendPartners, &updates, "adding partners")
            .await
    }

    async fn send_transaction(
        &self,
        ctx: &Context,
        statement: Statement,
        updates: &[RangeUpdate<'_>],
        action: &str,
    ) -> Result<()> {
        ctx.check()?;
        if updates.is_empty() {
            return Ok(());
        }
        log::debug!("{}: {} bases in one transaction", action, updates.len());
        let sql = self.catalog().statement(statement);
        ctx.run(async {
            let mut client = self.client().await?;
            let pg: &mut tokio_postgres::Client = &mut client;
            let txn = pg
                .transaction()
                .await
                .map_err(|e| Error::postgres("starting transaction", e))?;
            let prepared = txn
                .prepare(sql)
                .await
                .map_err(|e| Error::postgres(format!("preparing {}", statement.name()), e))?;
            let pending = updates.iter().map(|u| {
                let params: [&(dyn ToSql + Sync); 3] = [&u.range.min, &u.range.max, &u.fragment];
                txn.execute_raw(&prepared, params)
            });
            if let Some((e, failed)) = first_failure(join_all(pending).await) {
                log::warn!(
                    "{}: {} of {} statements failed, rolling back",
                    action,
                    failed,
                    updates.len()
                );
                if let Err(rollback) = txn.rollback().await {
                    log::warn!("{}: rollback failed: {}", action, rollback);
                }
                return Err(Error::postgres(action, e));
            }
            txn.commit()
                .await
                .map_err(|e| Error::postgres(format!("committing while {}", action), e))
        })
        .await
    }
}
