use crate::catalog::Statement;
use crate::constants::MAX_META_KEY_LEN;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::store::Store;

/// Metadata keys are at most 16 characters long
pub(crate) fn validate_key(key: &str) -> Result<()> {
    if key.chars().count() > MAX_META_KEY_LEN {
        return Err(Error::invalid_input(
            key,
            format!(
                "metadata table can only take keys that are at maximum {} chars long",
                MAX_META_KEY_LEN
            ),
        ));
    }
    Ok(())
}

impl Store {
    /// Save a key/value pair in the metadata table, replacing any prior value
    pub async fn set_meta(&self, ctx: &Context, key: &str, value: &str) -> Result<()> {
        validate_key(key)?;
        ctx.run(async {
            let client = self.client().await?;
            let statement = self.prepare(&client, Statement::MetaSave).await?;
            client
                .execute(&statement, &[&key, &value])
                .await
                .map_err(|e| Error::postgres(format!("saving {} to metadata", key), e))?;
            Ok(())
        })
        .await
    }

    /// Read a value from the metadata table
    pub async fn get_meta(&self, ctx: &Context, key: &str) -> Result<String> {
        ctx.run(async {
            let client = self.client().await?;
            let statement = self.prepare(&client, Statement::MetaRead).await?;
            let row = client
                .query_opt(&statement, &[&key])
                .await
                .map_err(|e| Error::postgres(format!("looking for metadata key {}", key), e))?
                .ok_or_else(|| Error::NotFound(format!("metadata key {}", key)))?;
            row.try_get::<_, String>(0)
                .map_err(|e| Error::postgres(format!("reading metadata key {}", key), e))
        })
        .await
    }
}
