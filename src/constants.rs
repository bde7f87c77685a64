// Default naming convention
pub const COMPANY_TABLE_NAME: &str = "cnpj";
pub const META_TABLE_NAME: &str = "meta";
pub const ID_FIELD_NAME: &str = "id";
pub const JSON_FIELD_NAME: &str = "json";
pub const KEY_FIELD_NAME: &str = "key";
pub const VALUE_FIELD_NAME: &str = "value";
/// JSON field holding the partners array
pub const PARTNERS_JSON_FIELD_NAME: &str = "qsa";
pub const DEFAULT_SCHEMA: &str = "public";

/// Number of concrete identifiers denoted by one base (6-digit suffix)
pub const BASE_RANGE_SPAN: i64 = 1_000_000;

/// Metadata keys are capped at 16 characters
pub const MAX_META_KEY_LEN: usize = 16;

/// Default pool size
pub const DEFAULT_MAX_CONNECTIONS: usize = 8;

/// Default bulk transport executable
pub const PSQL_PROGRAM: &str = "psql";
/// Delimiter of the bulk load payload
pub const BULK_DELIMITER: u8 = b',';
