use futures::future::join_all;
use tokio_postgres::types::ToSql;

use crate::catalog::Statement;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::range::BaseRange;
use crate::store::Store;

/// Expected JSON type of an update fragment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FragmentShape {
    Object,
    Array,
}

/// One queued range-scoped update
#[derive(Debug, Clone, Copy)]
pub(crate) struct RangeUpdate<'a> {
    pub(crate) range: BaseRange,
    pub(crate) fragment: &'a str,
}

/// First error of a pipelined batch in submission order, with the number of
/// failed statements. Every result has already been awaited.
pub(crate) fn first_failure<T, E>(
    results: impl IntoIterator<Item = std::result::Result<T, E>>,
) -> Option<(E, usize)> {
    let mut failed = 0;
    let mut first = None;
    for result in results {
        if let Err(e) = result {
            failed += 1;
            first.get_or_insert(e);
        }
    }
    first.map(|e| (e, failed))
}

/// Resolve every base and check every fragment; one bad item rejects the
/// whole batch before anything is sent.
pub(crate) fn queue_updates<'a, B, F>(
    items: &'a [(B, F)],
    shape: FragmentShape,
) -> Result<Vec<RangeUpdate<'a>>>
where
    B: AsRef<str>,
    F: AsRef<str>,
{
    items
        .iter()
        .map(|(base, fragment)| {
            let range = BaseRange::for_base(base.as_ref())?;
            let fragment = fragment.as_ref();
            let value: serde_json::Value = serde_json::from_str(fragment)
                .map_err(|e| Error::invalid_input(fragment, format!("fragment is not JSON: {}", e)))?;
            match shape {
                FragmentShape::Object if !value.is_object() => Err(Error::invalid_input(
                    fragment,
                    "merge fragment must be a JSON object",
                )),
                FragmentShape::Array if !value.is_array() => Err(Error::invalid_input(
                    fragment,
                    "partners fragment must be a JSON array",
                )),
                _ => Ok(RangeUpdate { range, fragment }),
            }
        })
        .collect()
}

impl Store {
    /// JSON payload of the company `id`
    pub async fn get_company(&self, ctx: &Context, id: &str) -> Result<String> {
        let n: i64 = id
            .parse()
            .map_err(|e| Error::invalid_input(id, format!("cnpj is not an integer: {}", e)))?;
        ctx.run(async {
            let client = self.client().await?;
            let statement = self.prepare(&client, Statement::GetCompany).await?;
            let rows = client
                .query(&statement, &[&n])
                .await
                .map_err(|e| Error::postgres(format!("looking for cnpj {}", n), e))?;
            match rows.len() {
                0 => Err(Error::NotFound(format!("cnpj {}", n))),
                1 => rows[0]
                    .try_get::<_, String>(0)
                    .map_err(|e| Error::postgres(format!("reading cnpj {}", n), e)),
                count => Err(Error::DuplicateRows { id: n, rows: count }),
            }
        })
        .await
    }

    /// Merge each JSON object into the payload of every company of its base.
    /// Keys of the fragment win on conflict.
    ///
    /// Each item becomes one `UPDATE ... WHERE id BETWEEN min AND max`, so
    /// every establishment of the base is touched. Statements are not wrapped
    /// in a transaction and commit one by one; see
    /// [`Store::merge_json_atomic`] for the all-or-nothing variant.
    pub async fn merge_json<B, F>(&self, ctx: &Context, items: &[(B, F)]) -> Result<()>
    where
        B: AsRef<str> + Sync,
        F: AsRef<str> + Sync,
    {
        let updates = queue_updates(items, FragmentShape::Object)?;
        self.send_pipeline(ctx, Statement::MergeJson, &updates, "updating companies")
            .await
    }

    /// Append each JSON array to the partners of every company of its base.
    /// Entries are not deduplicated, replaying a batch appends again.
    pub async fn append_partners<B, F>(&self, ctx: &Context, items: &[(B, F)]) -> Result<()>
    where
        B: AsRef<str> + Sync,
        F: AsRef<str> + Sync,
    {
        let updates = queue_updates(items, FragmentShape::Array)?;
        self.send_pipeline(ctx, Statement::AppendPartners, &updates, "adding partners")
            .await
    }

    /// Write every statement of the batch to one connection before awaiting
    /// any response. The batch is one round trip, plus one prepare round trip
    /// the first time a pooled connection sees the statement. The call returns
    /// only once the server answered every statement, even after a failure.
    async fn send_pipeline(
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
        log::debug!("{}: {} bases in one pipeline", action, updates.len());
        ctx.run(async {
            let client = self.client().await?;
            let prepared = self.prepare(&client, statement).await?;
            let pending = updates.iter().map(|u| {
                let params: [&(dyn ToSql + Sync); 3] = [&u.range.min, &u.range.max, &u.fragment];
                client.execute_raw(&prepared, params)
            });
            match first_failure(join_all(pending).await) {
                Some((e, failed)) => {
                    log::warn!("{}: {} of {} statements failed", action, failed, updates.len());
                    Err(Error::postgres(action, e))
                }
                None => Ok(()),
            }
        })
        .await
    }
}
